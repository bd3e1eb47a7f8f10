pub mod cache;
pub mod context;
pub mod guard;
pub mod status;

pub use cache::{PortfolioCache, Slot, Timed, MARKET_INDEX_CACHE_TTL};
pub use context::{AppContext, Collaborators};
pub use guard::{FetchGuard, GuardPermit};
pub use status::{CategoryStatus, ChangeListener, StatusRegistry, StatusView};

pub mod auth;
pub mod holdings;
pub mod kite;
pub mod tokens;
pub mod zerodha;

pub use auth::{AuthenticationManager, Credential, LoginEvent, LoginHook, LoginPolicy};
pub use holdings::HoldingsService;
pub use kite::{KiteApi, KiteApiFactory, KiteConnectClient, KiteConnectFactory};
pub use tokens::{SessionRecord, SessionStore, DEFAULT_TOKEN_TTL};
pub use zerodha::{AccountBatch, PortfolioSource, ZerodhaClient};

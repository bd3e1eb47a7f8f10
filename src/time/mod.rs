pub mod session;
pub mod schedule;

pub use session::{format_timestamp, get_market_timings, is_market_open_at, is_trading_day};
pub use schedule::{DailySchedule, GOLD_PRICE_FETCH_HOURS};

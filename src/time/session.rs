/// Market session and timing utilities
use chrono::{DateTime, Datelike, NaiveTime, Utc, Weekday};
use chrono_tz::Asia::Kolkata;

/// Trading window in exchange local time (IST), bounds inclusive
pub const MARKET_OPEN: (u32, u32) = (9, 0);
pub const MARKET_CLOSE: (u32, u32) = (16, 0);

/// Check if the date is a weekday in exchange local time (holidays not considered)
pub fn is_trading_day(now: DateTime<Utc>) -> bool {
    !matches!(now.with_timezone(&Kolkata).weekday(), Weekday::Sat | Weekday::Sun)
}

/// Get market timings (open, close) in exchange local time
pub fn get_market_timings() -> (NaiveTime, NaiveTime) {
    (
        NaiveTime::from_hms_opt(MARKET_OPEN.0, MARKET_OPEN.1, 0).unwrap_or(NaiveTime::MIN),
        NaiveTime::from_hms_opt(MARKET_CLOSE.0, MARKET_CLOSE.1, 0).unwrap_or(NaiveTime::MIN),
    )
}

/// Check if the equity market is open, evaluated in IST regardless of host timezone
pub fn is_market_open_at(now: DateTime<Utc>) -> bool {
    if !is_trading_day(now) {
        return false;
    }
    let (open, close) = get_market_timings();
    let current = now.with_timezone(&Kolkata).time();
    current >= open && current <= close
}

/// Render a timestamp for the dashboard in exchange local time
pub fn format_timestamp(ts: Option<DateTime<Utc>>) -> Option<String> {
    ts.map(|t| t.with_timezone(&Kolkata).format("%Y-%m-%d %H:%M:%S").to_string())
}

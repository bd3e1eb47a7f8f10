/// Background refresh orchestration and the auto-refresh scheduler
pub mod fetchers;
pub mod scheduler;

pub use fetchers::{
    fetch_fixed_deposits_data, fetch_nifty50_data, fetch_physical_gold_data, fetch_portfolio_data,
    run_background_fetch, start_initial_refresh, start_refresh, OnComplete, RefreshOptions, RefreshStart,
};
pub use scheduler::{should_auto_refresh, AutoRefreshScheduler, RefreshDecision, SkipReason};

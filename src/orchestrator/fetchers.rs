/// Per-category fetches and the composite background refresh
use chrono::Utc;
use chrono_tz::Asia::Kolkata;
use futures_util::future::join_all;
use futures_util::FutureExt;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

use crate::broker::LoginPolicy;
use crate::error::TrackerError;
use crate::market_data::fallback_symbols;
use crate::sheets::{calculate_current_value, compute_fd_summary};
use crate::state::{AppContext, GuardPermit, StatusRegistry};
use crate::time::DailySchedule;
use crate::types::{Category, FixedDepositSnapshot};

pub const PHYSICAL_GOLD_FETCH_ERROR: &str = "Failed to fetch physical gold data";
pub const FIXED_DEPOSITS_FETCH_ERROR: &str = "Failed to fetch fixed deposits data";

/// Invoked once every category task of a composite refresh has finished
pub type OnComplete = Box<dyn FnOnce() + Send + 'static>;

/// Defaults describe a scheduled refresh: no forced login, never prompts
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RefreshOptions {
    /// Skip cached and renewed sessions and go straight to interactive login
    pub force_login: bool,
    /// Triggered by a user; also forces the gold price fetch
    pub is_manual: bool,
    /// May end in an interactive login when no session can be reused or renewed
    pub interactive: bool,
}

impl RefreshOptions {
    pub fn scheduled() -> Self {
        Self::default()
    }

    /// Process start: let the strategy chain decide, prompting only as a last resort
    pub fn startup() -> Self {
        RefreshOptions {
            force_login: false,
            is_manual: false,
            interactive: true,
        }
    }

    pub fn manual(force_login: bool) -> Self {
        RefreshOptions {
            force_login,
            is_manual: true,
            interactive: true,
        }
    }

    pub fn login_policy(&self) -> LoginPolicy {
        LoginPolicy {
            force_login: self.force_login,
            interactive: self.interactive,
        }
    }
}

pub enum RefreshStart {
    Started(JoinHandle<()>),
    AlreadyInProgress,
}

impl RefreshStart {
    pub fn is_started(&self) -> bool {
        matches!(self, RefreshStart::Started(_))
    }
}

/// Drive one category through `updating -> (updated | error)`.
///
/// `commit` runs only when `fetch` succeeds, and always before the final
/// transition. A panic inside `fetch` is reported as an error.
async fn run_category<T, F>(
    status: &StatusRegistry,
    category: Category,
    fetch: F,
    commit: impl FnOnce(T),
) -> bool
where
    F: Future<Output = std::result::Result<T, String>>,
{
    let error = match AssertUnwindSafe(fetch).catch_unwind().await {
        Ok(Ok(value)) => {
            commit(value);
            None
        }
        Ok(Err(e)) => Some(e),
        Err(_) => {
            error!("{} fetch panicked", category);
            Some(format!("Unexpected error while fetching {} data", category))
        }
    };
    let ok = error.is_none();
    status.set_updated(category, error.as_deref());
    ok
}

/// Fetch holdings and SIPs for every configured account.
///
/// The permit keeps the portfolio guard set until the status transition is done.
pub async fn fetch_portfolio_data(ctx: Arc<AppContext>, policy: LoginPolicy, permit: GuardPermit) {
    ctx.status.set_updating(Category::Portfolio, None);

    let fetch = async {
        let batch = ctx
            .sources
            .brokerage
            .fetch_all_accounts_data(&ctx.config.accounts, policy)
            .await;
        match batch.error {
            Some(e) => {
                let current = ctx.cache.portfolio.load();
                info!(
                    "Preserved {} existing stocks, {} MFs, {} SIPs after partial fetch failure",
                    current.stocks.len(),
                    current.mf_holdings.len(),
                    current.sips.len()
                );
                Err(e)
            }
            None => Ok(batch.snapshot),
        }
    };

    run_category(&ctx.status, Category::Portfolio, fetch, |snapshot| {
        info!(
            "Portfolio data updated: {} stocks, {} MFs, {} SIPs",
            snapshot.stocks.len(),
            snapshot.mf_holdings.len(),
            snapshot.sips.len()
        );
        ctx.cache.portfolio.store(snapshot);
    })
    .await;

    drop(permit);
}

fn nifty50_error(e: &TrackerError) -> String {
    match e {
        TrackerError::NetworkTimeout(_) => {
            warn!("NSE website timeout - Nifty 50 data not updated (server slow)");
            "NSE website timeout".to_string()
        }
        TrackerError::ConnectionFailed(_) => {
            warn!("Cannot connect to NSE website - Nifty 50 data not updated");
            "Connection error".to_string()
        }
        other => {
            error!("Error fetching Nifty 50 data: {}", other);
            other.to_string()
        }
    }
}

/// Quotes for the index constituents. Skipped while another Nifty 50 fetch runs.
pub async fn fetch_nifty50_data(ctx: Arc<AppContext>) {
    let Some(_permit) = ctx.nifty50_guard.try_acquire() else {
        info!("Nifty 50 fetch already in progress, skipping");
        return;
    };
    ctx.status.set_updating(Category::Nifty50, None);

    let fetch = async {
        info!("Fetching Nifty 50 data...");
        let quotes = &ctx.sources.quotes;
        let mut symbols = quotes.fetch_nifty50_symbols().await;
        if symbols.is_empty() {
            warn!("Failed to fetch symbols from NSE, using fallback list");
            symbols = fallback_symbols();
        }
        quotes.fetch_quotes(&symbols).await.map_err(|e| nifty50_error(&e))
    };

    run_category(&ctx.status, Category::Nifty50, fetch, |quotes| {
        info!("Nifty 50 data updated: {} stocks", quotes.len());
        ctx.cache.nifty50.store(quotes);
    })
    .await;
}

/// Refresh cached gold prices when forced or when a scheduled slot is due.
/// Failures keep the previous prices.
async fn refresh_gold_prices(ctx: &AppContext, force: bool) {
    let schedule = DailySchedule::gold_prices();
    let now = Utc::now();
    if !force && !schedule.is_due(ctx.cache.gold_prices_last_fetch(), now) {
        info!(
            "Skipping gold price fetch - using cached prices (next scheduled: {} IST)",
            schedule.describe()
        );
        return;
    }

    match ctx.sources.gold_prices.fetch_gold_prices().await {
        Some(prices) => {
            info!("Gold prices updated: {:?}", prices.prices.keys().collect::<Vec<_>>());
            ctx.cache.store_gold_prices(prices, now);
        }
        None => warn!("Failed to fetch gold prices - keeping cached prices if available"),
    }
}

/// Holdings from the spreadsheet, then (on success) the gold price schedule
pub async fn fetch_physical_gold_data(ctx: Arc<AppContext>, force_gold_price_fetch: bool) {
    let Some(source) = ctx.sources.physical_gold.clone() else {
        return;
    };
    ctx.status.set_updating(Category::PhysicalGold, None);

    let fetch = async {
        let holdings = source.fetch_holdings().await.map_err(|e| {
            error!("Error fetching Physical Gold data: {}", e);
            PHYSICAL_GOLD_FETCH_ERROR.to_string()
        })?;
        refresh_gold_prices(&ctx, force_gold_price_fetch).await;
        Ok::<_, String>(holdings)
    };

    let ok = run_category(&ctx.status, Category::PhysicalGold, fetch, |holdings| {
        info!("Physical Gold data updated: {} holdings", holdings.len());
        ctx.cache.physical_gold.store(holdings);
    })
    .await;
    if !ok {
        info!(
            "Preserved {} existing physical gold holdings after fetch failure",
            ctx.cache.physical_gold.load().len()
        );
    }
}

/// Deposits from the spreadsheet, valued as of today (IST) with a fresh summary
pub async fn fetch_fixed_deposits_data(ctx: Arc<AppContext>) {
    let Some(source) = ctx.sources.fixed_deposits.clone() else {
        return;
    };
    ctx.status.set_updating(Category::FixedDeposits, None);

    let fetch = async {
        let fail = |e: TrackerError| {
            error!("Error fetching Fixed Deposits data: {}", e);
            FIXED_DEPOSITS_FETCH_ERROR.to_string()
        };
        let raw = source.fetch_deposits().await.map_err(fail)?;
        let today = Utc::now().with_timezone(&Kolkata).date_naive();
        let deposits = calculate_current_value(&raw, today).map_err(fail)?;
        let summary = compute_fd_summary(&deposits);
        Ok::<_, String>(FixedDepositSnapshot { deposits, summary })
    };

    let ok = run_category(&ctx.status, Category::FixedDeposits, fetch, |snapshot| {
        info!(
            "Fixed Deposits data updated: {} deposits, {} summary groups",
            snapshot.deposits.len(),
            snapshot.summary.len()
        );
        ctx.cache.fixed_deposits.store(snapshot);
    })
    .await;
    if !ok {
        info!(
            "Preserved {} existing fixed deposits after fetch failure",
            ctx.cache.fixed_deposits.load().deposits.len()
        );
    }
}

/// Fan out to every category, wait for all of them, then run `on_complete`
pub async fn run_background_fetch(
    ctx: Arc<AppContext>,
    options: RefreshOptions,
    permit: GuardPermit,
    on_complete: Option<OnComplete>,
) {
    let force_gold = options.is_manual || ctx.cache.gold_prices_last_fetch().is_none();

    let tasks = vec![
        tokio::spawn(fetch_portfolio_data(Arc::clone(&ctx), options.login_policy(), permit)),
        tokio::spawn(fetch_nifty50_data(Arc::clone(&ctx))),
        tokio::spawn(fetch_physical_gold_data(Arc::clone(&ctx), force_gold)),
        tokio::spawn(fetch_fixed_deposits_data(Arc::clone(&ctx))),
    ];
    for result in join_all(tasks).await {
        if let Err(e) = result {
            error!("Fetch task failed: {}", e);
        }
    }

    if let Some(on_complete) = on_complete {
        on_complete();
    }
}

/// Start a composite refresh unless one already holds the portfolio guard
pub fn start_refresh(
    ctx: &Arc<AppContext>,
    options: RefreshOptions,
    on_complete: Option<OnComplete>,
) -> RefreshStart {
    let Some(permit) = ctx.portfolio_guard.try_acquire() else {
        info!("Refresh requested while a fetch is in progress");
        return RefreshStart::AlreadyInProgress;
    };
    info!(
        "Starting background refresh (force_login={}, manual={}, interactive={})",
        options.force_login, options.is_manual, options.interactive
    );
    RefreshStart::Started(tokio::spawn(run_background_fetch(
        Arc::clone(ctx),
        options,
        permit,
        on_complete,
    )))
}

/// First refresh after process start
pub fn start_initial_refresh(ctx: &Arc<AppContext>) -> RefreshStart {
    if ctx.all_sessions_valid() {
        info!("All cached sessions valid");
    } else {
        info!("One or more cached sessions invalid - renewing or logging in on startup");
    }
    start_refresh(ctx, RefreshOptions::startup(), None)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::broker::auth::tests::MockKite;
    use crate::broker::tokens::DEFAULT_TOKEN_TTL;
    use crate::broker::zerodha::tests::holding;
    use crate::state::context::tests::{test_context, StubSources};
    use crate::types::{FetchState, FixedDeposit, PhysicalGoldHolding, PortfolioSnapshot, StockQuote};
    use parking_lot::Mutex;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::time::Duration;

    fn valid(token: &str, symbol: &str) -> MockKite {
        MockKite {
            valid_token: Some(token.into()),
            holdings: vec![holding(symbol, 10.0, 100.0)],
            ..Default::default()
        }
    }

    async fn finish(start: RefreshStart) {
        match start {
            RefreshStart::Started(handle) => handle.await.unwrap(),
            RefreshStart::AlreadyInProgress => panic!("refresh did not start"),
        }
    }

    fn assert_settled(ctx: &AppContext) {
        for category in Category::ALL {
            assert_ne!(ctx.status.get(category).state, FetchState::Updating, "{}", category);
        }
    }

    #[tokio::test]
    async fn test_missing_session_times_out_interactive_login() {
        let dir = tempfile::tempdir().unwrap();
        let ctx = test_context(&dir, vec![("Acc1", MockKite::default())], Arc::default(), false, Duration::ZERO);
        assert_eq!(ctx.status.get(Category::Portfolio).state, FetchState::Updating);

        finish(start_initial_refresh(&ctx)).await;

        let portfolio = ctx.status.get(Category::Portfolio);
        assert_eq!(portfolio.state, FetchState::Error);
        assert!(ctx.status.last_error().unwrap().contains("Timed out"));
        assert!(ctx.status.waiting_for_login());
        assert!(!ctx.portfolio_guard.is_set());
        assert_settled(&ctx);
    }

    #[tokio::test]
    async fn test_startup_renews_expired_session_instead_of_prompting() {
        let dir = tempfile::tempdir().unwrap();
        let kite = MockKite {
            renew_to: Some("renewed".into()),
            holdings: vec![holding("AAA", 10.0, 100.0)],
            ..Default::default()
        };
        let ctx = test_context(&dir, vec![("Acc1", kite)], Arc::default(), false, Duration::ZERO);
        ctx.sessions
            .set_token("Acc1", "expired", Some("r1".into()), chrono::Duration::seconds(-60))
            .unwrap();
        assert!(!ctx.all_sessions_valid());

        finish(start_initial_refresh(&ctx)).await;

        assert_eq!(ctx.status.get(Category::Portfolio).state, FetchState::Updated);
        assert_eq!(ctx.sessions.get_token("Acc1").as_deref(), Some("renewed"));
        assert!(!ctx.status.waiting_for_login());
        assert_eq!(ctx.cache.portfolio.load().stocks.len(), 1);
    }

    #[tokio::test]
    async fn test_valid_sessions_fetch_all_accounts() {
        let dir = tempfile::tempdir().unwrap();
        let ctx = test_context(
            &dir,
            vec![("Acc1", valid("t1", "AAA")), ("Acc2", valid("t2", "BBB"))],
            Arc::default(),
            false,
            Duration::ZERO,
        );
        ctx.sessions.set_token("Acc1", "t1", None, DEFAULT_TOKEN_TTL).unwrap();
        ctx.sessions.set_token("Acc2", "t2", None, DEFAULT_TOKEN_TTL).unwrap();

        finish(start_refresh(&ctx, RefreshOptions::default(), None)).await;

        let portfolio = ctx.cache.portfolio.load();
        let accounts: Vec<_> = portfolio.stocks.iter().map(|s| s.account.clone().unwrap()).collect();
        assert_eq!(accounts, vec!["Acc1", "Acc2"]);
        assert_eq!(ctx.status.get(Category::Portfolio).state, FetchState::Updated);
        assert!(ctx.status.get(Category::Portfolio).last_updated.is_some());
        assert!(!ctx.status.waiting_for_login());
        assert_eq!(ctx.cache.nifty50.load().len(), 50);
    }

    #[tokio::test]
    async fn test_failed_fetch_preserves_previous_snapshot() {
        let dir = tempfile::tempdir().unwrap();
        let failing = MockKite {
            valid_token: Some("t1".into()),
            fail_holdings: Some("network unreachable".into()),
            ..Default::default()
        };
        let ctx = test_context(&dir, vec![("Acc1", failing)], Arc::default(), false, Duration::ZERO);
        ctx.sessions.set_token("Acc1", "t1", None, DEFAULT_TOKEN_TTL).unwrap();

        let previous = PortfolioSnapshot {
            stocks: vec![holding("AAA", 10.0, 100.0), holding("BBB", 1.0, 50.0)],
            ..Default::default()
        };
        ctx.cache.portfolio.store(previous.clone());

        finish(start_refresh(&ctx, RefreshOptions::default(), None)).await;

        assert_eq!(*ctx.cache.portfolio.load(), previous);
        assert_eq!(ctx.status.get(Category::Portfolio).state, FetchState::Error);
        assert!(ctx.status.last_error().unwrap().contains("network unreachable"));
    }

    #[tokio::test]
    async fn test_second_refresh_is_rejected_while_guard_held() {
        let dir = tempfile::tempdir().unwrap();
        let ctx = test_context(&dir, vec![("Acc1", MockKite::default())], Arc::default(), false, Duration::ZERO);

        let permit = ctx.portfolio_guard.try_acquire().unwrap();
        assert!(!start_refresh(&ctx, RefreshOptions::default(), None).is_started());
        drop(permit);
        assert!(start_refresh(&ctx, RefreshOptions::default(), None).is_started());
    }

    #[tokio::test]
    async fn test_on_complete_runs_after_all_categories() {
        let dir = tempfile::tempdir().unwrap();
        let stubs = Arc::new(StubSources {
            holdings: Some(Ok(vec![PhysicalGoldHolding::default()])),
            deposits: Some(Ok(vec![FixedDeposit {
                original_investment_date: "January 1, 2024".into(),
                bank_name: "HDFC".into(),
                deposit_year: 1.0,
                original_amount: 1000.0,
                interest_rate: 7.0,
                ..Default::default()
            }])),
            ..Default::default()
        });
        let ctx = test_context(&dir, vec![("Acc1", MockKite::default())], stubs, true, Duration::ZERO);

        let called = Arc::new(AtomicBool::new(false));
        let flag = Arc::clone(&called);
        let observed = Arc::clone(&ctx);
        finish(start_refresh(
            &ctx,
            RefreshOptions::default(),
            Some(Box::new(move || {
                assert_settled(&observed);
                flag.store(true, Ordering::SeqCst);
            })),
        ))
        .await;

        assert!(called.load(Ordering::SeqCst));
        assert_eq!(ctx.cache.physical_gold.load().len(), 1);
        let fds = ctx.cache.fixed_deposits.load();
        assert_eq!(fds.deposits.len(), 1);
        assert_eq!(fds.summary.len(), 1);
        assert_eq!(fds.summary[0].total_deposited, 1000.0);
    }

    #[tokio::test]
    async fn test_nifty50_timeout_maps_error_and_keeps_cache() {
        let dir = tempfile::tempdir().unwrap();
        let stubs = Arc::new(StubSources {
            quotes: Mutex::new(Some(Err("slow".into()))),
            ..Default::default()
        });
        let ctx = test_context(&dir, vec![("Acc1", MockKite::default())], stubs, false, Duration::ZERO);
        ctx.cache.nifty50.store(vec![StockQuote::empty("INFY")]);

        fetch_nifty50_data(Arc::clone(&ctx)).await;

        assert_eq!(ctx.status.get(Category::Nifty50).state, FetchState::Error);
        assert_eq!(ctx.status.last_error().as_deref(), Some("NSE website timeout"));
        assert_eq!(ctx.cache.nifty50.load().len(), 1);
        assert!(!ctx.nifty50_guard.is_set());
    }

    #[tokio::test]
    async fn test_nifty50_skipped_while_running() {
        let dir = tempfile::tempdir().unwrap();
        let ctx = test_context(&dir, vec![("Acc1", MockKite::default())], Arc::default(), false, Duration::ZERO);

        let _permit = ctx.nifty50_guard.try_acquire().unwrap();
        fetch_nifty50_data(Arc::clone(&ctx)).await;

        let status = ctx.status.get(Category::Nifty50);
        assert_eq!(status.state, FetchState::Updated);
        assert!(status.last_updated.is_none());
        assert!(ctx.cache.nifty50.load().is_empty());
    }

    #[tokio::test]
    async fn test_physical_gold_failure_skips_gold_prices() {
        let dir = tempfile::tempdir().unwrap();
        let stubs = Arc::new(StubSources {
            holdings: Some(Err("sheet unavailable".into())),
            ..Default::default()
        });
        let ctx = test_context(&dir, vec![("Acc1", MockKite::default())], Arc::clone(&stubs), true, Duration::ZERO);

        fetch_physical_gold_data(Arc::clone(&ctx), true).await;

        assert_eq!(ctx.status.get(Category::PhysicalGold).state, FetchState::Error);
        assert_eq!(ctx.status.last_error().as_deref(), Some(PHYSICAL_GOLD_FETCH_ERROR));
        assert_eq!(stubs.gold_price_calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_forced_gold_price_fetch_updates_cache() {
        let dir = tempfile::tempdir().unwrap();
        let mut prices = crate::types::GoldPrices::default();
        prices
            .prices
            .insert("999".into(), crate::types::GoldRate { am: 7500.0, pm: 7500.0 });
        let stubs = Arc::new(StubSources {
            gold_prices: Some(prices.clone()),
            ..Default::default()
        });
        let ctx = test_context(&dir, vec![("Acc1", MockKite::default())], Arc::clone(&stubs), true, Duration::ZERO);

        fetch_physical_gold_data(Arc::clone(&ctx), true).await;
        assert_eq!(stubs.gold_price_calls.load(Ordering::SeqCst), 1);
        assert!(ctx.cache.gold_prices_last_fetch().is_some());
        let cached = ctx.cache.gold_prices.load();
        let timed = Option::as_ref(&cached).unwrap();
        assert_eq!(timed.value, prices);

        // fetched moments ago, so the schedule is not due again
        fetch_physical_gold_data(Arc::clone(&ctx), false).await;
        assert_eq!(stubs.gold_price_calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_panicking_source_ends_in_error() {
        let dir = tempfile::tempdir().unwrap();
        let stubs = Arc::new(StubSources {
            panic_on_deposits: true,
            ..Default::default()
        });
        let ctx = test_context(&dir, vec![("Acc1", MockKite::default())], stubs, true, Duration::ZERO);

        fetch_fixed_deposits_data(Arc::clone(&ctx)).await;

        assert_eq!(ctx.status.get(Category::FixedDeposits).state, FetchState::Error);
        assert!(ctx.status.last_error().unwrap().contains("fixed_deposits"));
    }

    #[tokio::test]
    async fn test_invalid_deposit_reports_fetch_error() {
        let dir = tempfile::tempdir().unwrap();
        let stubs = Arc::new(StubSources {
            deposits: Some(Ok(vec![FixedDeposit {
                bank_name: "SBI".into(),
                interest_rate: 7.0,
                ..Default::default()
            }])),
            ..Default::default()
        });
        let ctx = test_context(&dir, vec![("Acc1", MockKite::default())], stubs, true, Duration::ZERO);

        fetch_fixed_deposits_data(Arc::clone(&ctx)).await;
        assert_eq!(ctx.status.last_error().as_deref(), Some(FIXED_DEPOSITS_FETCH_ERROR));
        assert!(ctx.cache.fixed_deposits.load().deposits.is_empty());
    }

    #[tokio::test]
    async fn test_disabled_sheets_leave_status_alone() {
        let dir = tempfile::tempdir().unwrap();
        let ctx = test_context(&dir, vec![("Acc1", MockKite::default())], Arc::default(), false, Duration::ZERO);

        fetch_physical_gold_data(Arc::clone(&ctx), true).await;
        fetch_fixed_deposits_data(Arc::clone(&ctx)).await;

        for category in [Category::PhysicalGold, Category::FixedDeposits] {
            let status = ctx.status.get(category);
            assert_eq!(status.state, FetchState::Updated);
            assert!(status.last_updated.is_none());
        }
    }
}

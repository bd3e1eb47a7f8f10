/// Application context shared by the orchestrator, scheduler and HTTP surface
use chrono::{DateTime, Utc};
use std::sync::{Arc, Weak};
use std::time::Duration;
use tracing::{info, warn};

use crate::broker::{
    AuthenticationManager, KiteConnectFactory, LoginEvent, PortfolioSource, SessionStore,
    ZerodhaClient,
};
use crate::error::Result;
use crate::events::{StatusBroadcaster, StatusSnapshot};
use crate::market_data::{
    GoldPriceSource, IbjaGoldPriceClient, MarketIndexSource, NseClient, QuoteSource,
    YahooIndexClient,
};
use crate::sheets::{
    FixedDepositSource, FixedDepositsService, GoogleSheetsClient, PhysicalGoldService,
    PhysicalGoldSource, SheetReader,
};
use crate::state::{FetchGuard, PortfolioCache, StatusRegistry};
use crate::types::{Config, SheetFeatureConfig};

/// External data sources, one per category (plus the market-wide feeds)
pub struct Collaborators {
    pub brokerage: Arc<dyn PortfolioSource>,
    pub quotes: Arc<dyn QuoteSource>,
    pub market_indices: Arc<dyn MarketIndexSource>,
    pub gold_prices: Arc<dyn GoldPriceSource>,
    /// `None` when the spreadsheet feature is disabled
    pub physical_gold: Option<Arc<dyn PhysicalGoldSource>>,
    pub fixed_deposits: Option<Arc<dyn FixedDepositSource>>,
}

pub struct AppContext {
    pub config: Arc<Config>,
    pub sessions: Arc<SessionStore>,
    pub auth: Arc<AuthenticationManager>,
    pub status: Arc<StatusRegistry>,
    pub cache: Arc<PortfolioCache>,
    pub broadcaster: Arc<StatusBroadcaster>,
    pub portfolio_guard: Arc<FetchGuard>,
    pub nifty50_guard: Arc<FetchGuard>,
    pub sources: Collaborators,
}

impl AppContext {
    /// Wire status changes and login events to the broadcaster
    pub fn new(config: Config, auth: Arc<AuthenticationManager>, sources: Collaborators) -> Arc<Self> {
        let ctx = Arc::new(AppContext {
            config: Arc::new(config),
            sessions: Arc::clone(auth.sessions()),
            auth,
            status: Arc::new(StatusRegistry::new()),
            cache: Arc::new(PortfolioCache::new()),
            broadcaster: Arc::new(StatusBroadcaster::new()),
            portfolio_guard: FetchGuard::new("portfolio"),
            nifty50_guard: FetchGuard::new("nifty50"),
            sources,
        });

        let weak: Weak<AppContext> = Arc::downgrade(&ctx);
        ctx.status.add_change_listener(Arc::new(move || -> Result<()> {
            if let Some(ctx) = weak.upgrade() {
                ctx.broadcast_status()?;
            }
            Ok(())
        }));

        let weak: Weak<AppContext> = Arc::downgrade(&ctx);
        ctx.auth.set_login_hook(Arc::new(move |event: LoginEvent| {
            let Some(ctx) = weak.upgrade() else {
                return;
            };
            match event {
                LoginEvent::Waiting { account, login_url } => {
                    info!("Waiting for {} to log in", account);
                    ctx.status.set_waiting_for_login(true, Some(login_url));
                }
                LoginEvent::StillWaiting { .. } => ctx.status.touch(),
            }
        }));

        ctx
    }

    /// Build the production context: Kite, NSE, Yahoo, IBJA and Google Sheets clients
    pub fn from_config(config: Config) -> Result<Arc<Self>> {
        let sessions = Arc::new(SessionStore::open(config.session_cache_file()));
        let auth = Arc::new(AuthenticationManager::new(
            sessions,
            Duration::from_secs(config.timeouts.request_token_timeout_seconds),
        ));

        let features = &config.features;
        let physical_gold = sheet_reader(&config, &features.fetch_physical_gold_from_google_sheets, "physical gold")
            .map(|(reader, (id, range))| {
                Arc::new(PhysicalGoldService::new(reader, id, range)) as Arc<dyn PhysicalGoldSource>
            });
        let fixed_deposits = sheet_reader(&config, &features.fetch_fixed_deposits_from_google_sheets, "fixed deposits")
            .map(|(reader, (id, range))| {
                Arc::new(FixedDepositsService::new(reader, id, range)) as Arc<dyn FixedDepositSource>
            });

        let sources = Collaborators {
            brokerage: Arc::new(ZerodhaClient::new(
                Arc::clone(&auth),
                Arc::new(KiteConnectFactory::new()?),
            )),
            quotes: Arc::new(NseClient::new()),
            market_indices: Arc::new(YahooIndexClient::new()?),
            gold_prices: Arc::new(IbjaGoldPriceClient::new()?),
            physical_gold,
            fixed_deposits,
        };

        Ok(Self::new(config, auth, sources))
    }

    pub fn account_names(&self) -> Vec<String> {
        self.config.account_names()
    }

    pub fn all_sessions_valid(&self) -> bool {
        self.sessions.all_valid(&self.account_names())
    }

    pub fn status_snapshot_at(&self, now: DateTime<Utc>) -> StatusSnapshot {
        StatusSnapshot::capture(
            &self.status.snapshot(),
            self.sessions.get_validity(&self.account_names()),
            now,
        )
    }

    pub fn status_snapshot(&self) -> StatusSnapshot {
        self.status_snapshot_at(Utc::now())
    }

    /// Push the current snapshot to every SSE subscriber
    pub fn broadcast_status(&self) -> Result<usize> {
        let message = self.status_snapshot().to_json()?;
        Ok(self.broadcaster.broadcast(&message))
    }
}

/// Spreadsheet reader for an enabled feature, with its sheet id and range.
///
/// A feature that is enabled but lacks a spreadsheet id or a usable
/// credentials file is treated as disabled.
fn sheet_reader(
    config: &Config,
    feature: &SheetFeatureConfig,
    label: &str,
) -> Option<(Arc<dyn SheetReader>, (String, Option<String>))> {
    if !feature.enabled {
        return None;
    }
    let Some(spreadsheet_id) = feature.spreadsheet_id.clone().filter(|id| !id.is_empty()) else {
        warn!("Google Sheets {} is enabled but no spreadsheet_id is configured", label);
        return None;
    };
    let Some(credentials) = feature.credentials_file.as_deref() else {
        warn!("Google Sheets {} is enabled but no credentials_file is configured", label);
        return None;
    };

    match GoogleSheetsClient::from_credentials_file(&config.resolve_path(credentials)) {
        Ok(client) => {
            info!("Google Sheets {} enabled", label);
            Some((Arc::new(client), (spreadsheet_id, feature.range_name.clone())))
        }
        Err(e) => {
            warn!("Failed to initialize Google Sheets client for {}: {}", label, e);
            None
        }
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::broker::zerodha::tests::client_with;
    use crate::broker::auth::tests::MockKite;
    use crate::error::TrackerError;
    use crate::types::{
        AccountConfig, FixedDeposit, GoldPrices, MarketIndices, PhysicalGoldHolding, StockQuote,
    };
    use async_trait::async_trait;
    use parking_lot::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Scriptable stand-in for every non-brokerage source
    #[derive(Default)]
    pub struct StubSources {
        pub symbols: Vec<String>,
        pub quotes: Mutex<Option<std::result::Result<Vec<StockQuote>, String>>>,
        pub gold_prices: Option<GoldPrices>,
        pub gold_price_calls: AtomicUsize,
        pub holdings: Option<std::result::Result<Vec<PhysicalGoldHolding>, String>>,
        pub deposits: Option<std::result::Result<Vec<FixedDeposit>, String>>,
        pub panic_on_deposits: bool,
    }

    #[async_trait]
    impl QuoteSource for StubSources {
        async fn fetch_nifty50_symbols(&self) -> Vec<String> {
            self.symbols.clone()
        }

        async fn fetch_quotes(&self, symbols: &[String]) -> Result<Vec<StockQuote>> {
            match self.quotes.lock().clone() {
                Some(Ok(quotes)) => Ok(quotes),
                Some(Err(msg)) => Err(TrackerError::NetworkTimeout(msg)),
                None => Ok(symbols.iter().map(|s| StockQuote::empty(s)).collect()),
            }
        }
    }

    #[async_trait]
    impl MarketIndexSource for StubSources {
        async fn fetch_market_indices(&self) -> MarketIndices {
            MarketIndices::default()
        }
    }

    #[async_trait]
    impl GoldPriceSource for StubSources {
        async fn fetch_gold_prices(&self) -> Option<GoldPrices> {
            self.gold_price_calls.fetch_add(1, Ordering::SeqCst);
            self.gold_prices.clone()
        }
    }

    #[async_trait]
    impl PhysicalGoldSource for StubSources {
        async fn fetch_holdings(&self) -> Result<Vec<PhysicalGoldHolding>> {
            match &self.holdings {
                Some(Ok(h)) => Ok(h.clone()),
                Some(Err(msg)) => Err(TrackerError::ConnectionFailed(msg.clone())),
                None => Ok(Vec::new()),
            }
        }
    }

    #[async_trait]
    impl FixedDepositSource for StubSources {
        async fn fetch_deposits(&self) -> Result<Vec<FixedDeposit>> {
            if self.panic_on_deposits {
                panic!("sheet exploded");
            }
            match &self.deposits {
                Some(Ok(d)) => Ok(d.clone()),
                Some(Err(msg)) => Err(TrackerError::ConnectionFailed(msg.clone())),
                None => Ok(Vec::new()),
            }
        }
    }

    pub fn config_with(accounts: &[&str]) -> Config {
        Config {
            accounts: accounts
                .iter()
                .map(|name| AccountConfig {
                    name: name.to_string(),
                    api_key: format!("{}-key", name),
                    api_secret: format!("{}-secret", name),
                })
                .collect(),
            ..Default::default()
        }
    }

    /// Context over mock Kite accounts and shared stub sources; the sheet
    /// features are enabled only when `with_sheets` is set
    pub fn test_context(
        dir: &tempfile::TempDir,
        apis: Vec<(&str, MockKite)>,
        stubs: Arc<StubSources>,
        with_sheets: bool,
        login_timeout: Duration,
    ) -> Arc<AppContext> {
        let names: Vec<&str> = apis.iter().map(|(n, _)| *n).collect();
        let config = config_with(&names);
        let client = client_with(dir, apis, login_timeout);
        let auth = Arc::clone(client.auth());
        let sources = Collaborators {
            brokerage: Arc::new(client),
            quotes: stubs.clone(),
            market_indices: stubs.clone(),
            gold_prices: stubs.clone(),
            physical_gold: with_sheets.then(|| stubs.clone() as Arc<dyn PhysicalGoldSource>),
            fixed_deposits: with_sheets.then(|| stubs.clone() as Arc<dyn FixedDepositSource>),
        };
        AppContext::new(config, auth, sources)
    }

    #[tokio::test]
    async fn test_status_changes_are_broadcast() {
        let dir = tempfile::tempdir().unwrap();
        let ctx = test_context(&dir, vec![("Acc1", MockKite::default())], Arc::default(), false, Duration::ZERO);
        let mut sub = ctx.broadcaster.subscribe();

        ctx.status.set_updating(crate::types::Category::Nifty50, None);
        let message = sub.recv().await.unwrap();
        let json: serde_json::Value = serde_json::from_str(&message).unwrap();
        assert_eq!(json["nifty50_state"], "updating");
        assert_eq!(json["session_validity"]["Acc1"], false);
    }

    #[tokio::test]
    async fn test_login_hook_sets_waiting_flag() {
        let dir = tempfile::tempdir().unwrap();
        let ctx = test_context(&dir, vec![("Acc1", MockKite::default())], Arc::default(), false, Duration::ZERO);

        // zero timeout: the interactive strategy announces the URL, then gives up
        let _ = ctx.sources.brokerage.fetch_all_accounts_data(&ctx.config.accounts, crate::broker::LoginPolicy::default()).await;
        let snapshot = ctx.status_snapshot();
        assert!(snapshot.waiting_for_login);
        assert!(snapshot.login_url.unwrap().contains("api_key=mock"));
    }

    #[test]
    fn test_disabled_sheet_feature_has_no_reader() {
        let config = Config::default();
        let feature = SheetFeatureConfig {
            enabled: true,
            spreadsheet_id: None,
            ..Default::default()
        };
        assert!(sheet_reader(&config, &feature, "physical gold").is_none());
        assert!(sheet_reader(&config, &SheetFeatureConfig::default(), "fixed deposits").is_none());
    }
}

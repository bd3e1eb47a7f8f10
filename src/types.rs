/// Core type definitions for the portfolio tracker
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::path::PathBuf;

// ---------------------------------------------------------------------------
// Categories and lifecycle states
// ---------------------------------------------------------------------------

/// Data-source category with its own status entry and cache slot
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Category {
    /// Brokerage stocks, mutual funds and SIPs (fetched as one batch)
    Portfolio,
    Nifty50,
    PhysicalGold,
    FixedDeposits,
}

impl Category {
    pub const ALL: [Category; 4] = [
        Category::Portfolio,
        Category::Nifty50,
        Category::PhysicalGold,
        Category::FixedDeposits,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Category::Portfolio => "portfolio",
            Category::Nifty50 => "nifty50",
            Category::PhysicalGold => "physical_gold",
            Category::FixedDeposits => "fixed_deposits",
        }
    }
}

impl fmt::Display for Category {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Tri-state fetch lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FetchState {
    Updating,
    Updated,
    Error,
}

impl FetchState {
    pub fn as_str(&self) -> &'static str {
        match self {
            FetchState::Updating => "updating",
            FetchState::Updated => "updated",
            FetchState::Error => "error",
        }
    }
}

// ---------------------------------------------------------------------------
// Brokerage records
// ---------------------------------------------------------------------------

/// Equity holding as returned by the Kite `/portfolio/holdings` endpoint
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct StockHolding {
    pub tradingsymbol: String,
    #[serde(default)]
    pub exchange: String,
    #[serde(default)]
    pub isin: String,
    #[serde(default)]
    pub quantity: f64,
    #[serde(default)]
    pub t1_quantity: f64,
    #[serde(default)]
    pub average_price: f64,
    #[serde(default)]
    pub last_price: f64,
    #[serde(default)]
    pub close_price: f64,
    #[serde(default)]
    pub pnl: f64,
    #[serde(default)]
    pub day_change: f64,
    #[serde(default)]
    pub day_change_percentage: f64,
    #[serde(default)]
    pub invested: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub account: Option<String>,
}

/// Mutual fund holding as returned by the Kite `/mf/holdings` endpoint
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct MfHolding {
    pub tradingsymbol: String,
    #[serde(default)]
    pub fund: String,
    #[serde(default)]
    pub folio: Option<String>,
    #[serde(default)]
    pub quantity: f64,
    #[serde(default)]
    pub t1_quantity: f64,
    #[serde(default)]
    pub average_price: f64,
    #[serde(default)]
    pub last_price: f64,
    #[serde(default)]
    pub last_price_date: Option<String>,
    #[serde(default)]
    pub pnl: f64,
    #[serde(default)]
    pub invested: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub account: Option<String>,
}

/// Systematic investment plan as returned by the Kite `/mf/sips` endpoint
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct Sip {
    pub sip_id: String,
    #[serde(default)]
    pub tradingsymbol: String,
    #[serde(default)]
    pub fund: String,
    #[serde(default)]
    pub status: String,
    #[serde(default)]
    pub frequency: String,
    #[serde(default)]
    pub instalment_amount: f64,
    #[serde(default)]
    pub instalments: i64,
    #[serde(default)]
    pub completed_instalments: i64,
    #[serde(default)]
    pub next_instalment: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub account: Option<String>,
}

/// Records that carry the name of the sub-account they were fetched from
pub trait AccountTagged {
    fn set_account(&mut self, account: &str);
}

impl AccountTagged for StockHolding {
    fn set_account(&mut self, account: &str) {
        self.account = Some(account.to_string());
    }
}

impl AccountTagged for MfHolding {
    fn set_account(&mut self, account: &str) {
        self.account = Some(account.to_string());
    }
}

impl AccountTagged for Sip {
    fn set_account(&mut self, account: &str) {
        self.account = Some(account.to_string());
    }
}

/// Merged brokerage data for all configured accounts
#[derive(Debug, Clone, PartialEq, Default, Serialize)]
pub struct PortfolioSnapshot {
    pub stocks: Vec<StockHolding>,
    pub mf_holdings: Vec<MfHolding>,
    pub sips: Vec<Sip>,
}

// ---------------------------------------------------------------------------
// Market data records
// ---------------------------------------------------------------------------

/// Quote for one index constituent
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct StockQuote {
    pub symbol: String,
    pub name: String,
    pub ltp: f64,
    pub change: f64,
    #[serde(rename = "pChange")]
    pub p_change: f64,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
}

impl StockQuote {
    /// Zeroed quote used when a symbol could not be fetched
    pub fn empty(symbol: &str) -> Self {
        StockQuote {
            symbol: symbol.to_string(),
            name: symbol.to_string(),
            ..Default::default()
        }
    }
}

/// Headline index value with an intraday sparkline
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct IndexSummary {
    pub name: String,
    pub value: f64,
    pub change: f64,
    #[serde(rename = "pChange")]
    pub p_change: f64,
    pub chart: Vec<f64>,
}

impl IndexSummary {
    pub fn empty(name: &str) -> Self {
        IndexSummary {
            name: name.to_string(),
            ..Default::default()
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct MarketIndices {
    pub nifty50: IndexSummary,
    pub sensex: IndexSummary,
}

/// Morning/evening rate for one gold purity, INR per gram
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GoldRate {
    pub am: f64,
    pub pm: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct GoldPrices {
    /// Purity code ("999", "916", ...) to rate
    pub prices: BTreeMap<String, GoldRate>,
}

// ---------------------------------------------------------------------------
// Spreadsheet records
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct PhysicalGoldHolding {
    pub date: String,
    #[serde(rename = "type")]
    pub kind: String,
    pub retail_outlet: String,
    pub purity: String,
    pub weight_gms: f64,
    pub bought_ibja_rate_per_gm: f64,
    pub row_number: usize,
}

/// Physical gold holding priced against the latest IBJA rate
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EnrichedGoldHolding {
    #[serde(flatten)]
    pub holding: PhysicalGoldHolding,
    pub latest_ibja_price_per_gm: Option<f64>,
    pub pl: f64,
    pub pl_pct: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct FixedDeposit {
    pub original_investment_date: String,
    pub reinvested_date: String,
    pub bank_name: String,
    pub deposit_year: f64,
    pub deposit_month: f64,
    pub deposit_day: f64,
    pub original_amount: f64,
    pub reinvested_amount: f64,
    pub interest_rate: f64,
    pub redeemed: bool,
    pub account: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub maturity_date: Option<String>,
    #[serde(default)]
    pub current_value: f64,
    #[serde(default)]
    pub estimated_returns: f64,
}

/// Fixed deposits aggregated per bank and account
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FdSummary {
    pub bank: String,
    pub account: String,
    pub total_deposited: f64,
    pub total_current_value: f64,
    pub total_returns: f64,
}

/// Enriched deposits together with the summary derived from them
#[derive(Debug, Clone, PartialEq, Default, Serialize)]
pub struct FixedDepositSnapshot {
    pub deposits: Vec<FixedDeposit>,
    pub summary: Vec<FdSummary>,
}

// ---------------------------------------------------------------------------
// Configuration
// ---------------------------------------------------------------------------

/// Credentials for one brokerage sub-account
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
pub struct AccountConfig {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub api_key: String,
    #[serde(default)]
    pub api_secret: String,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub callback_host: String,
    pub callback_port: u16,
    pub callback_path: String,
    pub ui_host: String,
    pub ui_port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        ServerConfig {
            callback_host: "127.0.0.1".to_string(),
            callback_port: 5000,
            callback_path: "/callback".to_string(),
            ui_host: "127.0.0.1".to_string(),
            ui_port: 8000,
        }
    }
}

impl ServerConfig {
    pub fn redirect_url(&self) -> String {
        format!(
            "http://{}:{}{}",
            self.callback_host, self.callback_port, self.callback_path
        )
    }

    pub fn dashboard_url(&self) -> String {
        format!("http://{}:{}/", self.ui_host, self.ui_port)
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct TimeoutConfig {
    pub request_token_timeout_seconds: u64,
    pub auto_refresh_interval_seconds: u64,
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        TimeoutConfig {
            request_token_timeout_seconds: 180,
            auto_refresh_interval_seconds: 60,
        }
    }
}

/// One Google Sheets backed feature
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct SheetFeatureConfig {
    pub enabled: bool,
    pub credentials_file: Option<PathBuf>,
    pub spreadsheet_id: Option<String>,
    pub range_name: Option<String>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct FeatureConfig {
    pub auto_refresh_outside_market_hours: bool,
    pub fetch_physical_gold_from_google_sheets: SheetFeatureConfig,
    pub fetch_fixed_deposits_from_google_sheets: SheetFeatureConfig,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct LoggingConfig {
    pub json: bool,
    pub filter: Option<String>,
}

/// Application configuration
#[derive(Debug, Clone, Deserialize, Default)]
pub struct Config {
    #[serde(default)]
    pub accounts: Vec<AccountConfig>,
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub timeouts: TimeoutConfig,
    #[serde(default)]
    pub features: FeatureConfig,
    #[serde(default)]
    pub logging: LoggingConfig,

    /// Directory the config file was loaded from; set by the loader
    #[serde(skip)]
    pub base_dir: PathBuf,
}

impl Config {
    pub fn account_names(&self) -> Vec<String> {
        self.accounts.iter().map(|a| a.name.clone()).collect()
    }

    pub fn session_cache_file(&self) -> PathBuf {
        self.base_dir.join(crate::config::SESSION_CACHE_FILENAME)
    }

    /// Resolve a configured path relative to the config directory
    pub fn resolve_path(&self, path: &std::path::Path) -> PathBuf {
        if path.is_absolute() {
            path.to_path_buf()
        } else {
            self.base_dir.join(path)
        }
    }
}

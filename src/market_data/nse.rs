/// NSE quote client for NIFTY 50 constituents
use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use std::time::Duration;
use tracing::{debug, error, info, warn};

use crate::error::{Result, TrackerError};
use crate::market_data::QuoteSource;
use crate::types::StockQuote;

const NSE_BASE_URL: &str = "https://www.nseindia.com";
const NSE_REQUEST_TIMEOUT: Duration = Duration::from_secs(10);
/// Pause between per-symbol requests to stay under NSE's rate limit
const NSE_REQUEST_DELAY: Duration = Duration::from_millis(200);
pub(crate) const USER_AGENT: &str =
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36";

/// Used when the constituent list itself cannot be fetched
pub const NIFTY50_FALLBACK_SYMBOLS: [&str; 50] = [
    "ADANIPORTS", "ASIANPAINT", "AXISBANK", "BAJAJ-AUTO", "BAJFINANCE",
    "BAJAJFINSV", "BHARTIARTL", "BPCL", "BRITANNIA", "CIPLA",
    "COALINDIA", "DIVISLAB", "DRREDDY", "EICHERMOT", "GRASIM",
    "HCLTECH", "HDFCBANK", "HDFCLIFE", "HEROMOTOCO", "HINDALCO",
    "HINDUNILVR", "ICICIBANK", "INDUSINDBK", "INFY", "ITC",
    "JSWSTEEL", "KOTAKBANK", "LT", "M&M", "MARUTI",
    "NESTLEIND", "NTPC", "ONGC", "POWERGRID", "RELIANCE",
    "SBILIFE", "SBIN", "SHRIRAMFIN", "SUNPHARMA", "TATACONSUM",
    "TATAMOTORS", "TATASTEEL", "TCS", "TECHM", "TITAN",
    "ULTRACEMCO", "WIPRO", "APOLLOHOSP", "ADANIENT", "LTIM",
];

pub fn fallback_symbols() -> Vec<String> {
    NIFTY50_FALLBACK_SYMBOLS.iter().map(|s| s.to_string()).collect()
}

#[derive(Debug, Deserialize)]
struct IndexResponse {
    #[serde(default)]
    data: Vec<IndexConstituent>,
}

#[derive(Debug, Deserialize)]
struct IndexConstituent {
    #[serde(default)]
    symbol: Option<String>,
}

#[derive(Debug, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
struct QuoteResponse {
    #[serde(default)]
    info: QuoteInfo,
    #[serde(default)]
    price_info: PriceInfo,
}

#[derive(Debug, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
struct QuoteInfo {
    #[serde(default)]
    company_name: Option<String>,
}

#[derive(Debug, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
struct PriceInfo {
    #[serde(default)]
    last_price: f64,
    #[serde(default)]
    change: f64,
    #[serde(default)]
    p_change: f64,
    #[serde(default)]
    open: f64,
    #[serde(default)]
    previous_close: f64,
    #[serde(default)]
    intra_day_high_low: HighLow,
}

#[derive(Debug, Deserialize, Default)]
struct HighLow {
    #[serde(default)]
    max: f64,
    #[serde(default)]
    min: f64,
}

pub struct NseClient {
    base_url: String,
    request_delay: Duration,
}

impl Default for NseClient {
    fn default() -> Self {
        Self::new()
    }
}

impl NseClient {
    pub fn new() -> Self {
        NseClient {
            base_url: NSE_BASE_URL.to_string(),
            request_delay: NSE_REQUEST_DELAY,
        }
    }

    /// A cookie-carrying client primed by visiting the NSE home page
    async fn create_session(&self) -> Result<Client> {
        let client = Client::builder()
            .cookie_store(true)
            .timeout(NSE_REQUEST_TIMEOUT)
            .user_agent(USER_AGENT)
            .build()?;

        client
            .get(&self.base_url)
            .header("Accept", "application/json")
            .header("Accept-Language", "en-US,en;q=0.9")
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    warn!("NSE website is slow to respond (timeout after {:?})", NSE_REQUEST_TIMEOUT);
                } else if e.is_connect() {
                    warn!("Cannot connect to NSE website (network issue)");
                } else {
                    error!("Error creating NSE session: {}", e);
                }
                TrackerError::from_transport("NSE", e)
            })?;
        Ok(client)
    }

    async fn fetch_stock_quote(&self, session: &Client, symbol: &str) -> StockQuote {
        let url = format!(
            "{}/api/quote-equity?symbol={}",
            self.base_url,
            urlencoding::encode(symbol)
        );
        let quote = match session.get(&url).header("Accept", "application/json").send().await {
            Ok(resp) if resp.status().is_success() => match resp.json::<QuoteResponse>().await {
                Ok(body) => to_stock_quote(symbol, body),
                Err(e) => {
                    warn!("Bad quote payload for {}: {}", symbol, e);
                    StockQuote::empty(symbol)
                }
            },
            Ok(resp) => {
                warn!("NSE API returned status {} for {}", resp.status(), symbol);
                StockQuote::empty(symbol)
            }
            Err(e) if e.is_timeout() => {
                warn!("Request timeout for {} (NSE server slow to respond)", symbol);
                StockQuote::empty(symbol)
            }
            Err(e) => {
                warn!("Request failed for {}: {}", symbol, e);
                StockQuote::empty(symbol)
            }
        };
        tokio::time::sleep(self.request_delay).await;
        quote
    }
}

fn to_stock_quote(symbol: &str, body: QuoteResponse) -> StockQuote {
    let price = body.price_info;
    StockQuote {
        symbol: symbol.to_string(),
        name: body.info.company_name.unwrap_or_else(|| symbol.to_string()),
        ltp: price.last_price,
        change: price.change,
        p_change: price.p_change,
        open: price.open,
        high: price.intra_day_high_low.max,
        low: price.intra_day_high_low.min,
        close: price.previous_close,
    }
}

fn parse_index_symbols(body: IndexResponse) -> Vec<String> {
    body.data
        .into_iter()
        .filter_map(|c| c.symbol)
        .filter(|s| !s.is_empty() && s != "NIFTY 50")
        .collect()
}

#[async_trait]
impl QuoteSource for NseClient {
    async fn fetch_nifty50_symbols(&self) -> Vec<String> {
        let session = match self.create_session().await {
            Ok(session) => session,
            Err(e) => {
                warn!("NSE unavailable while fetching Nifty 50 symbols: {}", e);
                return Vec::new();
            }
        };

        let url = format!("{}/api/equity-stockIndices?index=NIFTY%2050", self.base_url);
        match session.get(&url).header("Accept", "application/json").send().await {
            Ok(resp) if resp.status().is_success() => match resp.json::<IndexResponse>().await {
                Ok(body) => {
                    let symbols = parse_index_symbols(body);
                    debug!("Fetched {} Nifty 50 symbols", symbols.len());
                    symbols
                }
                Err(e) => {
                    error!("Error parsing Nifty 50 symbols: {}", e);
                    Vec::new()
                }
            },
            Ok(resp) => {
                warn!("Failed to fetch Nifty 50 symbols: HTTP {}", resp.status());
                Vec::new()
            }
            Err(e) => {
                warn!("Error fetching Nifty 50 symbols: {}", e);
                Vec::new()
            }
        }
    }

    async fn fetch_quotes(&self, symbols: &[String]) -> Result<Vec<StockQuote>> {
        let session = self.create_session().await?;
        let mut quotes = Vec::with_capacity(symbols.len());
        for symbol in symbols {
            quotes.push(self.fetch_stock_quote(&session, symbol).await);
        }
        info!("Fetched {} NSE quotes", quotes.len());
        Ok(quotes)
    }
}

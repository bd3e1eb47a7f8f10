/// Public market data: NSE quotes, headline indices and IBJA gold rates
pub mod gold_price;
pub mod indices;
pub mod nse;

use async_trait::async_trait;

use crate::error::Result;
use crate::types::{GoldPrices, MarketIndices, StockQuote};

pub use gold_price::{parse_gold_prices, IbjaGoldPriceClient};
pub use indices::YahooIndexClient;
pub use nse::{fallback_symbols, NseClient, NIFTY50_FALLBACK_SYMBOLS};

#[async_trait]
pub trait QuoteSource: Send + Sync {
    /// Current index constituents; empty when NSE cannot be reached
    async fn fetch_nifty50_symbols(&self) -> Vec<String>;

    /// Quotes in symbol order. Fails only when no session can be opened;
    /// individual symbol failures produce zeroed quotes.
    async fn fetch_quotes(&self, symbols: &[String]) -> Result<Vec<StockQuote>>;
}

#[async_trait]
pub trait MarketIndexSource: Send + Sync {
    async fn fetch_market_indices(&self) -> MarketIndices;
}

#[async_trait]
pub trait GoldPriceSource: Send + Sync {
    async fn fetch_gold_prices(&self) -> Option<GoldPrices>;
}

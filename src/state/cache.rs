/// Shared snapshot cache, one slot per data source
use chrono::{DateTime, Duration, Utc};
use parking_lot::RwLock;
use std::sync::Arc;

use crate::types::{
    FixedDepositSnapshot, GoldPrices, MarketIndices, PhysicalGoldHolding, PortfolioSnapshot,
    StockQuote,
};

/// Market indices are fetched on demand and reused for this long
pub const MARKET_INDEX_CACHE_TTL: Duration = Duration::seconds(15);

/// One replaceable snapshot. The lock is held only for the pointer swap.
pub struct Slot<T> {
    value: RwLock<Arc<T>>,
}

impl<T: Default> Default for Slot<T> {
    fn default() -> Self {
        Slot {
            value: RwLock::new(Arc::new(T::default())),
        }
    }
}

impl<T> Slot<T> {
    pub fn new(value: T) -> Self {
        Slot {
            value: RwLock::new(Arc::new(value)),
        }
    }

    pub fn load(&self) -> Arc<T> {
        Arc::clone(&self.value.read())
    }

    pub fn store(&self, value: T) {
        *self.value.write() = Arc::new(value);
    }
}

/// A value together with the time it was fetched
#[derive(Debug, Clone, PartialEq)]
pub struct Timed<T> {
    pub value: T,
    pub fetched_at: DateTime<Utc>,
}

#[derive(Default)]
pub struct PortfolioCache {
    /// Stocks, MF holdings and SIPs replaced together
    pub portfolio: Slot<PortfolioSnapshot>,
    pub nifty50: Slot<Vec<StockQuote>>,
    pub physical_gold: Slot<Vec<PhysicalGoldHolding>>,
    /// Deposits and their summary replaced together
    pub fixed_deposits: Slot<FixedDepositSnapshot>,
    pub gold_prices: Slot<Option<Timed<GoldPrices>>>,
    pub market_indices: Slot<Option<Timed<MarketIndices>>>,
}

impl PortfolioCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn gold_prices_last_fetch(&self) -> Option<DateTime<Utc>> {
        self.gold_prices.load().as_ref().as_ref().map(|t| t.fetched_at)
    }

    pub fn store_gold_prices(&self, prices: GoldPrices, now: DateTime<Utc>) {
        self.gold_prices.store(Some(Timed {
            value: prices,
            fetched_at: now,
        }));
    }

    /// Cached indices if fetched less than the TTL ago
    pub fn fresh_market_indices(&self, now: DateTime<Utc>) -> Option<MarketIndices> {
        let slot = self.market_indices.load();
        slot.as_ref()
            .as_ref()
            .filter(|t| now - t.fetched_at < MARKET_INDEX_CACHE_TTL)
            .map(|t| t.value.clone())
    }

    pub fn store_market_indices(&self, indices: MarketIndices, now: DateTime<Utc>) {
        self.market_indices.store(Some(Timed {
            value: indices,
            fetched_at: now,
        }));
    }
}

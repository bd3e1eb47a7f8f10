/// Holdings and SIP fetching with per-account enrichment
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::warn;

use crate::broker::kite::KiteApi;
use crate::error::Result;
use crate::types::{AccountTagged, MfHolding, Sip, StockHolding};

/// Positions whose unsettled (T1) units count toward the holding
pub trait SettledPosition: AccountTagged {
    fn fold_unsettled(&mut self);
}

impl SettledPosition for StockHolding {
    fn fold_unsettled(&mut self) {
        self.quantity += self.t1_quantity;
        self.invested = self.quantity * self.average_price;
    }
}

impl SettledPosition for MfHolding {
    fn fold_unsettled(&mut self) {
        self.quantity += self.t1_quantity;
        self.invested = self.quantity * self.average_price;
    }
}

/// Tag records with their account; nothing else changes
pub fn tag_account<T: AccountTagged>(items: &mut [T], account: &str) {
    for item in items.iter_mut() {
        item.set_account(account);
    }
}

/// Tag holdings, fold T1 quantity into quantity and set `invested = quantity * average_price`
pub fn add_account_info<T: SettledPosition>(holdings: &mut [T], account: &str) {
    for holding in holdings.iter_mut() {
        holding.set_account(account);
        holding.fold_unsettled();
    }
}

/// Concatenate per-account lists, keeping account order
pub fn merge_items<T>(per_account: Vec<Vec<T>>) -> Vec<T> {
    per_account.into_iter().flatten().collect()
}

#[derive(Default)]
pub struct HoldingsService {
    /// tradingsymbol -> NAV date, loaded once per process
    nav_dates: Mutex<Option<Arc<HashMap<String, Option<String>>>>>,
}

impl HoldingsService {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn fetch_holdings(
        &self,
        api: &dyn KiteApi,
        access_token: &str,
    ) -> Result<(Vec<StockHolding>, Vec<MfHolding>)> {
        let stocks = api.holdings(access_token).await?;
        let mut mf_holdings = api.mf_holdings(access_token).await?;
        self.add_nav_dates(&mut mf_holdings, api, access_token).await;
        Ok((stocks, mf_holdings))
    }

    /// SIP failures degrade to an empty list
    pub async fn fetch_sips(&self, api: &dyn KiteApi, access_token: &str) -> Vec<Sip> {
        match api.mf_sips(access_token).await {
            Ok(sips) => sips,
            Err(e) => {
                warn!("Error fetching SIPs: {}", e);
                Vec::new()
            }
        }
    }

    async fn add_nav_dates(&self, holdings: &mut [MfHolding], api: &dyn KiteApi, access_token: &str) {
        let cached = self.nav_dates.lock().clone();
        let nav_dates = match cached {
            Some(map) => map,
            None => match api.mf_instruments(access_token).await {
                Ok(instruments) => {
                    let map: HashMap<String, Option<String>> = instruments
                        .into_iter()
                        .map(|i| (i.tradingsymbol, i.last_price_date))
                        .collect();
                    let map = Arc::new(map);
                    *self.nav_dates.lock() = Some(Arc::clone(&map));
                    map
                }
                Err(e) => {
                    warn!("Error fetching MF instruments for NAV dates: {}", e);
                    return;
                }
            },
        };

        for holding in holdings.iter_mut() {
            if let Some(date) = nav_dates.get(&holding.tradingsymbol) {
                if date.is_some() {
                    holding.last_price_date = date.clone();
                }
            }
        }
    }
}

/// Physical gold holdings read from a spreadsheet and priced against IBJA rates
use async_trait::async_trait;
use serde_json::Value;
use std::sync::Arc;
use tracing::info;

use crate::error::Result;
use crate::sheets::client::{cell_number, cell_text, parse_rows, SheetReader};
use crate::sheets::PhysicalGoldSource;
use crate::types::{EnrichedGoldHolding, GoldPrices, PhysicalGoldHolding};

pub const DEFAULT_PHYSICAL_GOLD_RANGE: &str = "Sheet1!A:F";

/// Columns: Date, Type, Retail Outlet, Purity, Weight (gms), IBJA rate when bought
pub fn parse_holding_row(row: &[Value], row_number: usize) -> Result<PhysicalGoldHolding> {
    Ok(PhysicalGoldHolding {
        date: cell_text(row, 0),
        kind: cell_text(row, 1),
        retail_outlet: cell_text(row, 2),
        purity: cell_text(row, 3),
        weight_gms: cell_number(row, 4),
        bought_ibja_rate_per_gm: cell_number(row, 5),
        row_number,
    })
}

pub struct PhysicalGoldService {
    reader: Arc<dyn SheetReader>,
    spreadsheet_id: String,
    range_name: String,
}

impl PhysicalGoldService {
    pub fn new(reader: Arc<dyn SheetReader>, spreadsheet_id: String, range_name: Option<String>) -> Self {
        PhysicalGoldService {
            reader,
            spreadsheet_id,
            range_name: range_name.unwrap_or_else(|| DEFAULT_PHYSICAL_GOLD_RANGE.to_string()),
        }
    }
}

#[async_trait]
impl PhysicalGoldSource for PhysicalGoldService {
    async fn fetch_holdings(&self) -> Result<Vec<PhysicalGoldHolding>> {
        info!("Fetching Physical Gold data from Google Sheets...");
        let rows = self
            .reader
            .fetch_sheet_data(&self.spreadsheet_id, &self.range_name)
            .await?;
        Ok(parse_rows(&rows, "physical gold holdings", parse_holding_row))
    }
}

/// Latest per-gram rate for a holding's purity label
fn latest_rate(purity: &str, prices: &GoldPrices) -> Option<f64> {
    let code = if purity.contains("999") || purity.contains("24K") {
        "999"
    } else if purity.contains("916") || purity.contains("22K") {
        "916"
    } else {
        return None;
    };
    prices.prices.get(code).map(|rate| rate.pm)
}

/// Attach the latest rate and profit/loss to each holding
pub fn enrich_holdings_with_prices(
    holdings: &[PhysicalGoldHolding],
    prices: Option<&GoldPrices>,
) -> Vec<EnrichedGoldHolding> {
    holdings
        .iter()
        .map(|holding| {
            let latest = prices.and_then(|p| latest_rate(&holding.purity, p));
            let (mut pl, mut pl_pct) = (0.0, 0.0);
            if let Some(latest) = latest {
                if latest != 0.0 && holding.bought_ibja_rate_per_gm != 0.0 && holding.weight_gms != 0.0 {
                    let invested = holding.bought_ibja_rate_per_gm * holding.weight_gms;
                    pl = latest * holding.weight_gms - invested;
                    pl_pct = pl / invested * 100.0;
                }
            }
            EnrichedGoldHolding {
                holding: holding.clone(),
                latest_ibja_price_per_gm: latest,
                pl,
                pl_pct,
            }
        })
        .collect()
}

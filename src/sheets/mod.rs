/// Spreadsheet-backed holdings: physical gold and fixed deposits
pub mod client;
pub mod fixed_deposits;
pub mod physical_gold;

use async_trait::async_trait;

use crate::error::Result;
use crate::types::{FixedDeposit, PhysicalGoldHolding};

pub use client::{parse_number, parse_yes_no, GoogleSheetsClient, SheetReader};
pub use fixed_deposits::{calculate_current_value, compute_fd_summary, FixedDepositsService};
pub use physical_gold::{enrich_holdings_with_prices, PhysicalGoldService};

#[async_trait]
pub trait PhysicalGoldSource: Send + Sync {
    async fn fetch_holdings(&self) -> Result<Vec<PhysicalGoldHolding>>;
}

#[async_trait]
pub trait FixedDepositSource: Send + Sync {
    /// Raw rows; valuation happens in the orchestrator
    async fn fetch_deposits(&self) -> Result<Vec<FixedDeposit>>;
}

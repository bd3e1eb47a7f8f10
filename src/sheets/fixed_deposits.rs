/// Fixed deposits: sheet parsing, compound-interest valuation and per-bank summary
use async_trait::async_trait;
use chrono::{Duration, NaiveDate};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, info};

use crate::error::{Result, TrackerError};
use crate::sheets::client::{cell_number, cell_text, parse_rows, parse_yes_no, SheetReader};
use crate::sheets::FixedDepositSource;
use crate::types::{FdSummary, FixedDeposit};

pub const DEFAULT_FIXED_DEPOSITS_RANGE: &str = "FixedDeposits!A:K";
const DATE_FORMAT: &str = "%B %d, %Y";
/// Quarterly compounding
const COMPOUNDING_PER_YEAR: f64 = 4.0;

/// Columns: Original date, Reinvested date, Bank, Years, Months, Days,
/// Original amount, Reinvested amount, Rate, Redeemed?, Account
pub fn parse_deposit_row(row: &[Value], _row_number: usize) -> Result<FixedDeposit> {
    let deposit = FixedDeposit {
        original_investment_date: cell_text(row, 0),
        reinvested_date: cell_text(row, 1),
        bank_name: cell_text(row, 2),
        deposit_year: cell_number(row, 3),
        deposit_month: cell_number(row, 4),
        deposit_day: cell_number(row, 5),
        original_amount: cell_number(row, 6),
        reinvested_amount: cell_number(row, 7),
        interest_rate: cell_number(row, 8),
        redeemed: row.get(9).map(parse_yes_no).unwrap_or(false),
        account: cell_text(row, 10),
        ..Default::default()
    };

    if deposit.bank_name.is_empty() {
        return Err(TrackerError::InvalidData(
            "Missing bank name in fixed deposit row".to_string(),
        ));
    }
    if deposit.interest_rate <= 0.0 {
        return Err(TrackerError::InvalidData(format!(
            "Invalid interest rate for deposit at {}",
            deposit.bank_name
        )));
    }
    Ok(deposit)
}

pub struct FixedDepositsService {
    reader: Arc<dyn SheetReader>,
    spreadsheet_id: String,
    range_name: String,
}

impl FixedDepositsService {
    pub fn new(reader: Arc<dyn SheetReader>, spreadsheet_id: String, range_name: Option<String>) -> Self {
        FixedDepositsService {
            reader,
            spreadsheet_id,
            range_name: range_name.unwrap_or_else(|| DEFAULT_FIXED_DEPOSITS_RANGE.to_string()),
        }
    }
}

#[async_trait]
impl FixedDepositSource for FixedDepositsService {
    async fn fetch_deposits(&self) -> Result<Vec<FixedDeposit>> {
        info!("Fetching Fixed Deposits data from Google Sheets...");
        let rows = self
            .reader
            .fetch_sheet_data(&self.spreadsheet_id, &self.range_name)
            .await?;
        Ok(parse_rows(&rows, "fixed deposits", parse_deposit_row))
    }
}

/// `principal * (1 + r/n)^(n*t)`; non-positive inputs return the principal
pub fn compound_value(principal: f64, annual_rate_pct: f64, years: f64) -> f64 {
    if principal <= 0.0 || annual_rate_pct <= 0.0 || years <= 0.0 {
        return principal;
    }
    let rate = annual_rate_pct / 100.0;
    principal * (1.0 + rate / COMPOUNDING_PER_YEAR).powf(COMPOUNDING_PER_YEAR * years)
}

fn deposit_date(deposit: &FixedDeposit) -> Option<NaiveDate> {
    let text = if deposit.reinvested_date.is_empty() {
        deposit.original_investment_date.as_str()
    } else {
        deposit.reinvested_date.as_str()
    };
    if text.is_empty() {
        return None;
    }
    NaiveDate::parse_from_str(text.trim(), DATE_FORMAT).ok().or_else(|| {
        if deposit.deposit_year > 0.0 && deposit.deposit_month > 0.0 && deposit.deposit_day > 0.0 {
            NaiveDate::from_ymd_opt(
                deposit.deposit_year as i32,
                deposit.deposit_month as u32,
                deposit.deposit_day as u32,
            )
        } else {
            None
        }
    })
}

/// Value every active deposit as of `today`, sorted by maturity.
///
/// Redeemed deposits are dropped. Maturity is the deposit date plus
/// `365*years + 30*months + days` days. Any deposit whose value cannot be
/// computed fails the whole batch.
pub fn calculate_current_value(deposits: &[FixedDeposit], today: NaiveDate) -> Result<Vec<FixedDeposit>> {
    let mut enriched = Vec::with_capacity(deposits.len());

    for deposit in deposits.iter().filter(|d| !d.redeemed) {
        let bank = &deposit.bank_name;
        let date = deposit_date(deposit);

        let Some(date) = date.filter(|_| deposit.deposit_year > 0.0) else {
            return Err(TrackerError::InvalidData(format!(
                "Missing maturity date for deposit at {}: provide a deposit date and period (Year/Month/Day)",
                bank
            )));
        };

        let maturity = [
            deposit.deposit_year * 365.0,
            deposit.deposit_month * 30.0,
            deposit.deposit_day,
        ]
        .iter()
        .try_fold(0i64, |total, days| total.checked_add(*days as i64))
        .and_then(Duration::try_days)
        .and_then(|period| date.checked_add_signed(period));
        let Some(maturity) = maturity else {
            return Err(TrackerError::InvalidData(format!(
                "Invalid deposit period for fixed deposit at {}: {}y {}m {}d",
                bank, deposit.deposit_year, deposit.deposit_month, deposit.deposit_day
            )));
        };
        debug!(
            "Calculated maturity date for {}: {} (Period: {}y {}m {}d)",
            bank,
            maturity.format(DATE_FORMAT),
            deposit.deposit_year as i64,
            deposit.deposit_month as i64,
            deposit.deposit_day as i64
        );

        let principal = if deposit.reinvested_amount != 0.0 {
            deposit.reinvested_amount
        } else {
            deposit.original_amount
        };
        if principal <= 0.0 {
            return Err(TrackerError::InvalidData(format!(
                "Invalid principal amount ({}) for fixed deposit at {}",
                principal, bank
            )));
        }
        if deposit.interest_rate <= 0.0 {
            return Err(TrackerError::InvalidData(format!(
                "Invalid interest rate ({}) for fixed deposit at {}",
                deposit.interest_rate, bank
            )));
        }

        let years_elapsed = (today - date).num_days() as f64 / 365.0;
        let current_value = compound_value(principal, deposit.interest_rate, years_elapsed);

        let mut valued = deposit.clone();
        valued.maturity_date = Some(maturity.format(DATE_FORMAT).to_string());
        valued.current_value = current_value;
        valued.estimated_returns = current_value - principal;
        enriched.push((maturity, valued));
    }

    enriched.sort_by_key(|(maturity, _)| *maturity);
    Ok(enriched.into_iter().map(|(_, d)| d).collect())
}

/// Totals per bank and account, in first-seen order
pub fn compute_fd_summary(deposits: &[FixedDeposit]) -> Vec<FdSummary> {
    let mut index: HashMap<(String, String), usize> = HashMap::new();
    let mut groups: Vec<FdSummary> = Vec::new();

    for deposit in deposits {
        let key = (deposit.bank_name.clone(), deposit.account.clone());
        let slot = *index.entry(key).or_insert_with(|| {
            groups.push(FdSummary {
                bank: deposit.bank_name.clone(),
                account: deposit.account.clone(),
                total_deposited: 0.0,
                total_current_value: 0.0,
                total_returns: 0.0,
            });
            groups.len() - 1
        });
        groups[slot].total_deposited += deposit.original_amount;
        groups[slot].total_current_value += deposit.current_value;
    }

    for group in groups.iter_mut() {
        group.total_returns = group.total_current_value - group.total_deposited;
    }
    groups
}

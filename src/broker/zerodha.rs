/// Multi-account brokerage fetch
use async_trait::async_trait;
use futures_util::future::join_all;
use std::sync::Arc;
use tracing::{error, info, warn};

use crate::broker::auth::{AuthenticationManager, LoginPolicy};
use crate::broker::holdings::{add_account_info, merge_items, tag_account, HoldingsService};
use crate::broker::kite::KiteApiFactory;
use crate::error::{Result, TrackerError};
use crate::types::{AccountConfig, MfHolding, PortfolioSnapshot, Sip, StockHolding};

/// Merged data for every account plus the last per-account failure, if any
#[derive(Debug, Clone, Default)]
pub struct AccountBatch {
    pub snapshot: PortfolioSnapshot,
    pub error: Option<String>,
}

type AccountData = (Vec<StockHolding>, Vec<MfHolding>, Vec<Sip>);

/// Brokerage data for every configured account
#[async_trait]
pub trait PortfolioSource: Send + Sync {
    async fn fetch_all_accounts_data(&self, accounts: &[AccountConfig], policy: LoginPolicy) -> AccountBatch;
}

pub struct ZerodhaClient {
    auth: Arc<AuthenticationManager>,
    kite: Arc<dyn KiteApiFactory>,
    holdings: HoldingsService,
}

impl ZerodhaClient {
    pub fn new(auth: Arc<AuthenticationManager>, kite: Arc<dyn KiteApiFactory>) -> Self {
        ZerodhaClient {
            auth,
            kite,
            holdings: HoldingsService::new(),
        }
    }

    pub fn auth(&self) -> &Arc<AuthenticationManager> {
        &self.auth
    }

    /// Authenticate one account and fetch its holdings and SIPs
    pub async fn fetch_account_data(
        &self,
        account: &AccountConfig,
        policy: LoginPolicy,
    ) -> Result<AccountData> {
        let api = self.kite.for_account(account);
        let credential = self
            .auth
            .authenticate(account, api.as_ref(), policy)
            .await?;

        let (stocks, mfs) = self
            .holdings
            .fetch_holdings(api.as_ref(), &credential.access_token)
            .await
            .map_err(|e| {
                if e.category() == crate::error::ErrorCategory::Network {
                    warn!("Kite API timeout for account {}: {}", account.name, e);
                }
                e
            })?;
        let sips = self
            .holdings
            .fetch_sips(api.as_ref(), &credential.access_token)
            .await;
        Ok((stocks, mfs, sips))
    }

    fn finish_account(account: &AccountConfig, result: Result<AccountData>) -> Result<AccountData> {
        match result {
            Ok((mut stocks, mut mfs, mut sips)) => {
                add_account_info(&mut stocks, &account.name);
                add_account_info(&mut mfs, &account.name);
                tag_account(&mut sips, &account.name);
                Ok((stocks, mfs, sips))
            }
            Err(e) => {
                error!("Error fetching holdings for {}: {}", account.name, e);
                Err(TrackerError::PartialBatch {
                    account: account.name.clone(),
                    message: e.to_string(),
                })
            }
        }
    }

    /// Fetch every account and merge the results in account order.
    ///
    /// Runs sequentially when any account needs an interactive login (only one
    /// login callback can be pending at a time), concurrently otherwise. The
    /// concurrent pass never prompts: accounts whose cached session turns out
    /// to be unusable are retried one at a time afterwards, and only when
    /// `policy` allows an interactive login.
    pub async fn fetch_all_accounts_data(
        &self,
        accounts: &[AccountConfig],
        policy: LoginPolicy,
    ) -> AccountBatch {
        let sessions = self.auth.sessions();
        let needs_login =
            policy.force_login || accounts.iter().any(|a| !sessions.is_valid(&a.name));

        let mut results: Vec<Result<AccountData>> = Vec::with_capacity(accounts.len());
        if needs_login {
            info!("Sequential fetch required (login needed for one or more accounts)");
            for account in accounts {
                let result = self.fetch_account_data(account, policy).await;
                results.push(Self::finish_account(account, result));
            }
        } else {
            info!("Parallel fetch (all accounts have valid tokens)");
            let unattended = LoginPolicy {
                interactive: false,
                ..policy
            };
            let first_pass = join_all(
                accounts
                    .iter()
                    .map(|account| self.fetch_account_data(account, unattended)),
            )
            .await;

            for (account, result) in accounts.iter().zip(first_pass) {
                let result = match result {
                    Err(TrackerError::LoginRequired(_)) if policy.interactive => {
                        info!("Cached session for {} was rejected; falling back to login", account.name);
                        self.fetch_account_data(account, policy).await
                    }
                    other => other,
                };
                results.push(Self::finish_account(account, result));
            }
        }

        let mut error = None;
        let mut all_stocks = Vec::with_capacity(results.len());
        let mut all_mfs = Vec::with_capacity(results.len());
        let mut all_sips = Vec::with_capacity(results.len());
        for result in results {
            match result {
                Ok((stocks, mfs, sips)) => {
                    all_stocks.push(stocks);
                    all_mfs.push(mfs);
                    all_sips.push(sips);
                }
                Err(e) => error = Some(e.to_string()),
            }
        }

        AccountBatch {
            snapshot: PortfolioSnapshot {
                stocks: merge_items(all_stocks),
                mf_holdings: merge_items(all_mfs),
                sips: merge_items(all_sips),
            },
            error,
        }
    }
}

#[async_trait]
impl PortfolioSource for ZerodhaClient {
    async fn fetch_all_accounts_data(&self, accounts: &[AccountConfig], policy: LoginPolicy) -> AccountBatch {
        ZerodhaClient::fetch_all_accounts_data(self, accounts, policy).await
    }
}

/// Fixed-interval auto-refresh loop
use chrono::{DateTime, Utc};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::info;

use crate::orchestrator::fetchers::{start_refresh, RefreshOptions, RefreshStart};
use crate::state::AppContext;
use crate::time::is_market_open_at;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    MarketClosed,
    RefreshInProgress,
    SessionsInvalid,
}

impl SkipReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            SkipReason::MarketClosed => "market closed and auto_refresh_outside_market_hours disabled",
            SkipReason::RefreshInProgress => "manual refresh in progress",
            SkipReason::SessionsInvalid => "one or more sessions invalid - manual login required",
        }
    }
}

impl fmt::Display for SkipReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RefreshDecision {
    Run,
    Skip(SkipReason),
}

/// Checked in order: market hours, running fetch, session validity.
/// An invalid session never triggers an interactive login from here.
pub fn should_auto_refresh(ctx: &AppContext, now: DateTime<Utc>) -> RefreshDecision {
    if !is_market_open_at(now) && !ctx.config.features.auto_refresh_outside_market_hours {
        return RefreshDecision::Skip(SkipReason::MarketClosed);
    }
    if ctx.portfolio_guard.is_set() {
        return RefreshDecision::Skip(SkipReason::RefreshInProgress);
    }
    if !ctx.all_sessions_valid() {
        return RefreshDecision::Skip(SkipReason::SessionsInvalid);
    }
    RefreshDecision::Run
}

pub struct AutoRefreshScheduler {
    ctx: Arc<AppContext>,
    interval: Duration,
}

impl AutoRefreshScheduler {
    pub fn new(ctx: Arc<AppContext>) -> Self {
        let interval = Duration::from_secs(ctx.config.timeouts.auto_refresh_interval_seconds);
        AutoRefreshScheduler { ctx, interval }
    }

    pub fn with_interval(ctx: Arc<AppContext>, interval: Duration) -> Self {
        AutoRefreshScheduler { ctx, interval }
    }

    /// One scheduler check; returns the refresh task when one was started
    pub fn tick(&self, now: DateTime<Utc>) -> Option<JoinHandle<()>> {
        if let RefreshDecision::Skip(reason) = should_auto_refresh(&self.ctx, now) {
            info!("Auto-refresh skipped: {}", reason);
            return None;
        }

        let market = if is_market_open_at(now) {
            "during market hours"
        } else {
            "outside market hours"
        };
        info!("Auto-refresh triggered ({})", market);
        match start_refresh(&self.ctx, RefreshOptions::scheduled(), None) {
            RefreshStart::Started(handle) => Some(handle),
            RefreshStart::AlreadyInProgress => None,
        }
    }

    /// Sleep, check, repeat until `shutdown` flips to true. Refreshes run in
    /// their own tasks so a slow fetch never delays the next check.
    pub async fn run(self, mut shutdown: watch::Receiver<bool>) {
        info!("Auto-refresh every {:?}", self.interval);
        loop {
            tokio::select! {
                _ = tokio::time::sleep(self.interval) => {}
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                    continue;
                }
            }
            self.tick(Utc::now());
        }
        info!("Auto-refresh stopped");
    }
}

/// Main entry point for the portfolio tracker
use anyhow::{Context, Result};
use std::sync::Arc;
use tokio::sync::watch;
use tokio::task::JoinSet;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use portfolio_tracker::{
    config::{load_config, validate_accounts, DEFAULT_CONFIG_PATH},
    orchestrator::{start_initial_refresh, AutoRefreshScheduler},
    server::{build_router, callback_router, serve},
    state::AppContext,
    Config,
};

const DEFAULT_LOG_FILTER: &str = "portfolio_tracker=info,tower_http=warn";

fn init_logging(config: &Config) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        EnvFilter::new(
            config
                .logging
                .filter
                .as_deref()
                .unwrap_or(DEFAULT_LOG_FILTER),
        )
    });

    if config.logging.json {
        tracing_subscriber::fmt()
            .json()
            .with_env_filter(filter)
            .init();
    } else {
        tracing_subscriber::fmt().with_env_filter(filter).init();
    }
}

/// Application state
pub struct TrackerApp {
    ctx: Arc<AppContext>,
    shutdown: Arc<watch::Sender<bool>>,
}

impl TrackerApp {
    pub fn new(config: Config) -> Result<Self> {
        let ctx = AppContext::from_config(config).context("Failed to build application context")?;
        let (shutdown, _) = watch::channel(false);
        Ok(TrackerApp {
            ctx,
            shutdown: Arc::new(shutdown),
        })
    }

    pub async fn run(&self) -> Result<()> {
        let server = &self.ctx.config.server;

        let mut servers = JoinSet::new();
        servers.spawn(serve(
            "Dashboard",
            server.ui_host.clone(),
            server.ui_port,
            build_router(Arc::clone(&self.ctx)),
            self.shutdown.subscribe(),
        ));
        servers.spawn(serve(
            "Callback",
            server.callback_host.clone(),
            server.callback_port,
            callback_router(Arc::clone(&self.ctx.auth), &server.callback_path),
            self.shutdown.subscribe(),
        ));
        info!("Dashboard available at {}", server.dashboard_url());

        start_initial_refresh(&self.ctx);
        let scheduler = tokio::spawn(
            AutoRefreshScheduler::new(Arc::clone(&self.ctx)).run(self.shutdown.subscribe()),
        );

        self.setup_shutdown_handler();

        // the first server to stop, for whatever reason, stops the rest
        while let Some(joined) = servers.join_next().await {
            match joined {
                Ok(Ok(())) => {}
                Ok(Err(e)) => error!("Server failed: {} ({})", e, e.error_code()),
                Err(e) => error!("Server task panicked: {}", e),
            }
            self.shutdown.send_replace(true);
        }

        if let Err(e) = scheduler.await {
            warn!("Auto-refresh task ended abnormally: {}", e);
        }
        info!("Shutdown complete");
        Ok(())
    }

    fn setup_shutdown_handler(&self) {
        let shutdown = Arc::clone(&self.shutdown);
        tokio::spawn(async move {
            match tokio::signal::ctrl_c().await {
                Ok(()) => {
                    info!("Ctrl+C received - shutting down");
                    shutdown.send_replace(true);
                }
                Err(e) => error!("Failed to listen for Ctrl+C: {}", e),
            }
        });
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let config_path =
        std::env::var("CONFIG_PATH").unwrap_or_else(|_| DEFAULT_CONFIG_PATH.to_string());

    let config = load_config(&config_path)
        .with_context(|| format!("Failed to load configuration from {}", config_path))?;
    init_logging(&config);
    validate_accounts(&config.accounts).context("Invalid account configuration")?;
    info!(
        "Configuration loaded from {} ({} account(s))",
        config_path,
        config.accounts.len()
    );

    let app = TrackerApp::new(config)?;
    app.run().await
}

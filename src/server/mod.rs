/// HTTP surface: dashboard data API and the login callback listener
pub mod callback;
pub mod routes;

pub use callback::callback_router;
pub use routes::{build_router, NO_CACHE, SSE_KEEPALIVE_INTERVAL};

use axum::Router;
use tokio::net::TcpListener;
use tokio::sync::watch;
use tracing::info;

use crate::error::{Result, TrackerError};

/// Bind `host:port` and serve `router` until `shutdown` flips to true
pub async fn serve(
    name: &'static str,
    host: String,
    port: u16,
    router: Router,
    mut shutdown: watch::Receiver<bool>,
) -> Result<()> {
    let addr = format!("{}:{}", host, port);
    let listener = TcpListener::bind(&addr).await.map_err(|e| {
        TrackerError::ConfigError(format!("Failed to bind {} server on {}: {}", name, addr, e))
    })?;
    info!("{} server listening on http://{}", name, addr);

    axum::serve(listener, router)
        .with_graceful_shutdown(async move {
            while !*shutdown.borrow() {
                if shutdown.changed().await.is_err() {
                    break;
                }
            }
        })
        .await?;
    info!("{} server stopped", name);
    Ok(())
}

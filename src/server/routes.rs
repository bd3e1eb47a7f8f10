/// Dashboard data API: JSON snapshots, SSE status stream and manual refresh
use axum::extract::State;
use axum::http::{header, Method, StatusCode};
use axum::response::sse::{Event, KeepAlive, Sse};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use chrono::Utc;
use serde::Serialize;
use serde_json::json;
use std::convert::Infallible;
use std::sync::Arc;
use std::time::Duration;
use tokio_stream::{Stream, StreamExt};
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::{info, warn};

use crate::orchestrator::{start_refresh, RefreshOptions, RefreshStart};
use crate::sheets::enrich_holdings_with_prices;
use crate::state::AppContext;

pub const NO_CACHE: &str = "no-cache, no-store, must-revalidate";
pub const SSE_KEEPALIVE_INTERVAL: Duration = Duration::from_secs(30);

pub fn build_router(ctx: Arc<AppContext>) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([Method::GET, Method::POST]);

    Router::new()
        .route("/status", get(get_status))
        .route("/events", get(status_events))
        .route("/refresh", post(post_refresh))
        .route("/stocks_data", get(get_stocks))
        .route("/mf_holdings_data", get(get_mf_holdings))
        .route("/sips_data", get(get_sips))
        .route("/nifty50_data", get(get_nifty50))
        .route("/physical_gold_data", get(get_physical_gold))
        .route("/fixed_deposits_data", get(get_fixed_deposits))
        .route("/fd_summary_data", get(get_fd_summary))
        .route("/market_indices", get(get_market_indices))
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(ctx)
}

fn no_cache_json<T: Serialize>(body: T) -> Response {
    ([(header::CACHE_CONTROL, NO_CACHE)], Json(body)).into_response()
}

async fn get_status(State(ctx): State<Arc<AppContext>>) -> Response {
    no_cache_json(ctx.status_snapshot())
}

/// Initial snapshot first, then every broadcast status change
async fn status_events(
    State(ctx): State<Arc<AppContext>>,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    // subscribe before capturing so no change between the two is lost
    let updates = ctx.broadcaster.subscribe();
    let initial = match ctx.status_snapshot().to_json() {
        Ok(json) => json,
        Err(e) => {
            warn!("Failed to serialize status snapshot: {}", e);
            "{}".to_string()
        }
    };

    let stream = tokio_stream::once(Ok(Event::default().data(initial)))
        .chain(updates.map(|message| Ok(Event::default().data(message))));

    Sse::new(stream).keep_alive(
        KeepAlive::new()
            .interval(SSE_KEEPALIVE_INTERVAL)
            .text("keepalive"),
    )
}

async fn post_refresh(State(ctx): State<Arc<AppContext>>) -> Response {
    let needs_login = !ctx.all_sessions_valid();
    match start_refresh(&ctx, RefreshOptions::manual(needs_login), None) {
        RefreshStart::Started(_) => {
            info!("Manual refresh started (needs_login={})", needs_login);
            (
                StatusCode::ACCEPTED,
                Json(json!({ "status": "started", "needs_login": needs_login })),
            )
                .into_response()
        }
        RefreshStart::AlreadyInProgress => (
            StatusCode::CONFLICT,
            Json(json!({ "error": "Fetch already in progress" })),
        )
            .into_response(),
    }
}

async fn get_stocks(State(ctx): State<Arc<AppContext>>) -> Response {
    let mut stocks = ctx.cache.portfolio.load().stocks.clone();
    stocks.sort_by(|a, b| a.tradingsymbol.cmp(&b.tradingsymbol));
    no_cache_json(stocks)
}

async fn get_mf_holdings(State(ctx): State<Arc<AppContext>>) -> Response {
    let mut funds = ctx.cache.portfolio.load().mf_holdings.clone();
    funds.sort_by(|a, b| a.fund.cmp(&b.fund));
    no_cache_json(funds)
}

async fn get_sips(State(ctx): State<Arc<AppContext>>) -> Response {
    let mut sips = ctx.cache.portfolio.load().sips.clone();
    sips.sort_by(|a, b| a.status.cmp(&b.status));
    no_cache_json(sips)
}

async fn get_nifty50(State(ctx): State<Arc<AppContext>>) -> Response {
    let mut quotes = (*ctx.cache.nifty50.load()).clone();
    quotes.sort_by(|a, b| a.symbol.cmp(&b.symbol));
    no_cache_json(quotes)
}

/// Holdings priced against whatever gold rates are cached right now
async fn get_physical_gold(State(ctx): State<Arc<AppContext>>) -> Response {
    let holdings = ctx.cache.physical_gold.load();
    let prices = ctx.cache.gold_prices.load();
    let mut enriched = enrich_holdings_with_prices(
        &holdings,
        Option::as_ref(&prices).map(|timed| &timed.value),
    );
    enriched.sort_by(|a, b| a.holding.date.cmp(&b.holding.date));
    no_cache_json(enriched)
}

/// Deposits stay in maturity order
async fn get_fixed_deposits(State(ctx): State<Arc<AppContext>>) -> Response {
    no_cache_json(&ctx.cache.fixed_deposits.load().deposits)
}

async fn get_fd_summary(State(ctx): State<Arc<AppContext>>) -> Response {
    no_cache_json(&ctx.cache.fixed_deposits.load().summary)
}

async fn get_market_indices(State(ctx): State<Arc<AppContext>>) -> Response {
    if let Some(indices) = ctx.cache.fresh_market_indices(Utc::now()) {
        return no_cache_json(indices);
    }
    let indices = ctx.sources.market_indices.fetch_market_indices().await;
    ctx.cache.store_market_indices(indices.clone(), Utc::now());
    no_cache_json(indices)
}

/// Kite Connect login redirect target
use axum::extract::{Query, State};
use axum::http::StatusCode;
use axum::response::Html;
use axum::routing::get;
use axum::Router;
use serde::Deserialize;
use std::sync::Arc;
use tower_http::trace::TraceLayer;
use tracing::warn;

use crate::broker::AuthenticationManager;

const LOGIN_SUCCESS_PAGE: &str = "<!DOCTYPE html><html><head><title>Login successful</title></head>\
<body><h2>Login successful</h2><p>You can close this window and return to the dashboard.</p></body></html>";

const LOGIN_FAILED_PAGE: &str = "<!DOCTYPE html><html><head><title>Login failed</title></head>\
<body><h2>Login failed</h2><p>No request token was received. Start the login again from the dashboard.</p></body></html>";

#[derive(Debug, Deserialize)]
struct CallbackQuery {
    request_token: Option<String>,
}

/// Router serving only `path`; the request token is handed to the waiting login
pub fn callback_router(auth: Arc<AuthenticationManager>, path: &str) -> Router {
    Router::new()
        .route(path, get(login_callback))
        .layer(TraceLayer::new_for_http())
        .with_state(auth)
}

async fn login_callback(
    State(auth): State<Arc<AuthenticationManager>>,
    Query(query): Query<CallbackQuery>,
) -> (StatusCode, Html<&'static str>) {
    match query.request_token.filter(|t| !t.is_empty()) {
        Some(token) => {
            auth.set_request_token(&token);
            (StatusCode::OK, Html(LOGIN_SUCCESS_PAGE))
        }
        None => {
            warn!("Login callback hit without a request_token");
            (StatusCode::BAD_REQUEST, Html(LOGIN_FAILED_PAGE))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::broker::auth::tests::MockKite;
    use crate::broker::LoginPolicy;
    use crate::state::context::tests::test_context;
    use axum::body::Body;
    use axum::http::Request;
    use std::time::Duration;
    use tower::ServiceExt;

    async fn get_page(app: Router, uri: &str) -> (StatusCode, String) {
        let req = Request::builder().uri(uri).body(Body::empty()).unwrap();
        let resp = app.oneshot(req).await.unwrap();
        let status = resp.status();
        let body = axum::body::to_bytes(resp.into_body(), 64 * 1024)
            .await
            .unwrap();
        (status, String::from_utf8(body.to_vec()).unwrap())
    }

    #[tokio::test]
    async fn test_missing_token_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let ctx = test_context(&dir, vec![("Acc1", MockKite::default())], Arc::default(), false, Duration::ZERO);

        let app = callback_router(Arc::clone(&ctx.auth), "/callback");
        let (status, body) = get_page(app.clone(), "/callback").await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert!(body.contains("Login failed"));

        let (status, _) = get_page(app, "/callback?request_token=").await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_token_completes_waiting_login() {
        let dir = tempfile::tempdir().unwrap();
        let kite = MockKite {
            session_token: Some("fresh".into()),
            ..Default::default()
        };
        let ctx = test_context(&dir, vec![("Acc1", kite)], Arc::default(), false, Duration::from_secs(5));
        let app = callback_router(Arc::clone(&ctx.auth), "/callback");

        let login = {
            let ctx = Arc::clone(&ctx);
            tokio::spawn(async move {
                ctx.sources
                    .brokerage
                    .fetch_all_accounts_data(&ctx.config.accounts, LoginPolicy::interactive(true))
                    .await
            })
        };
        tokio::time::sleep(Duration::from_millis(100)).await;

        let (status, body) = get_page(app, "/callback?request_token=req-123").await;
        assert_eq!(status, StatusCode::OK);
        assert!(body.contains("Login successful"));

        login.await.unwrap();
        assert_eq!(ctx.sessions.get_token("Acc1").as_deref(), Some("fresh:req-123"));
    }
}

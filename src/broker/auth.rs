/// Kite authentication: cached session, renewal, then interactive login
use async_trait::async_trait;
use parking_lot::{Mutex, RwLock};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Notify;
use tokio::time::Instant;
use tracing::{info, warn};

use crate::broker::kite::KiteApi;
use crate::broker::tokens::{SessionStore, DEFAULT_TOKEN_TTL};
use crate::error::{Result, TrackerError};
use crate::types::AccountConfig;

/// How often a pending interactive login re-announces itself
pub const LOGIN_HEARTBEAT_INTERVAL: Duration = Duration::from_secs(5);

/// A usable access token for one account
#[derive(Debug, Clone, PartialEq)]
pub struct Credential {
    pub account: String,
    pub access_token: String,
}

/// Result of one strategy in the chain
#[derive(Debug)]
pub enum AuthOutcome {
    Authenticated(Credential),
    NeedNext,
    Fatal(TrackerError),
}

/// Progress of an interactive login, reported to whoever shows status to the user
#[derive(Debug, Clone, PartialEq)]
pub enum LoginEvent {
    Waiting { account: String, login_url: String },
    StillWaiting { account: String },
}

pub type LoginHook = Arc<dyn Fn(LoginEvent) + Send + Sync>;

/// How far the strategy chain may go for one account
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LoginPolicy {
    /// Skip cached and renewed sessions and go straight to interactive login
    pub force_login: bool,
    /// Whether the chain may end in an interactive login at all
    pub interactive: bool,
}

impl LoginPolicy {
    pub const fn interactive(force_login: bool) -> Self {
        LoginPolicy {
            force_login,
            interactive: true,
        }
    }

    /// Cached session or renewal only; never prompts for a login
    pub const fn unattended() -> Self {
        LoginPolicy {
            force_login: false,
            interactive: false,
        }
    }
}

impl Default for LoginPolicy {
    fn default() -> Self {
        Self::interactive(false)
    }
}

/// Everything a strategy needs for one attempt
pub struct AuthAttempt<'a> {
    pub account: &'a AccountConfig,
    pub api: &'a dyn KiteApi,
    pub policy: LoginPolicy,
}

#[async_trait]
pub trait AuthStrategy: Send + Sync {
    fn name(&self) -> &'static str;
    async fn attempt(&self, attempt: &AuthAttempt<'_>) -> AuthOutcome;
}

/// Reuse a cached, unexpired token after probing it with a profile call
pub struct CachedSessionStrategy {
    sessions: Arc<SessionStore>,
}

#[async_trait]
impl AuthStrategy for CachedSessionStrategy {
    fn name(&self) -> &'static str {
        "cached"
    }

    async fn attempt(&self, attempt: &AuthAttempt<'_>) -> AuthOutcome {
        let name = &attempt.account.name;
        if attempt.policy.force_login || !self.sessions.is_valid(name) {
            return AuthOutcome::NeedNext;
        }
        let Some(token) = self.sessions.get_token(name) else {
            return AuthOutcome::NeedNext;
        };

        info!("Using cached token for {}", name);
        match attempt.api.profile(&token).await {
            Ok(_) => AuthOutcome::Authenticated(Credential {
                account: name.clone(),
                access_token: token,
            }),
            Err(e) => {
                warn!("Cached token failed for {}: {}", name, e);
                AuthOutcome::NeedNext
            }
        }
    }
}

/// Exchange the stored refresh token for a new access token
pub struct RenewSessionStrategy {
    sessions: Arc<SessionStore>,
}

#[async_trait]
impl AuthStrategy for RenewSessionStrategy {
    fn name(&self) -> &'static str {
        "renew"
    }

    async fn attempt(&self, attempt: &AuthAttempt<'_>) -> AuthOutcome {
        let name = &attempt.account.name;
        if attempt.policy.force_login {
            return AuthOutcome::NeedNext;
        }
        let Some(refresh_token) = self.sessions.get_refresh_token(name) else {
            return AuthOutcome::NeedNext;
        };

        info!("Attempting to renew session for {}...", name);
        match attempt.api.renew_access_token(&refresh_token).await {
            Ok(session) => {
                let refresh = session.refresh_token.or(Some(refresh_token));
                if let Err(e) =
                    self.sessions
                        .set_token(name, &session.access_token, refresh, DEFAULT_TOKEN_TTL)
                {
                    return AuthOutcome::Fatal(e);
                }
                info!("Successfully renewed session for {}", name);
                AuthOutcome::Authenticated(Credential {
                    account: name.clone(),
                    access_token: session.access_token,
                })
            }
            Err(e) => {
                warn!("Session renewal failed for {}: {}", name, e);
                AuthOutcome::NeedNext
            }
        }
    }
}

/// Hands the OAuth callback's request token to the login waiting for it
#[derive(Default)]
pub struct RequestTokenSlot {
    token: Mutex<Option<String>>,
    notify: Notify,
}

impl RequestTokenSlot {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&self, token: &str) {
        *self.token.lock() = Some(token.to_string());
        self.notify.notify_one();
    }

    fn clear(&self) {
        self.token.lock().take();
    }

    fn take(&self) -> Option<String> {
        self.token.lock().take()
    }

    /// Wait until a token arrives or the deadline passes, calling `heartbeat` periodically
    async fn wait(
        &self,
        account: &str,
        timeout: Duration,
        heartbeat: impl Fn(),
    ) -> Result<String> {
        let deadline = Instant::now() + timeout;
        let mut ticker = tokio::time::interval_at(
            Instant::now() + LOGIN_HEARTBEAT_INTERVAL,
            LOGIN_HEARTBEAT_INTERVAL,
        );

        loop {
            if let Some(token) = self.take() {
                return Ok(token);
            }
            tokio::select! {
                _ = tokio::time::sleep_until(deadline) => {
                    return self.take().ok_or_else(|| {
                        TrackerError::LoginTimeout(format!(
                            "Timed out waiting for request_token for {}",
                            account
                        ))
                    });
                }
                _ = self.notify.notified() => {}
                _ = ticker.tick() => heartbeat(),
            }
        }
    }
}

/// Full OAuth login: announce the login URL, wait for the callback, exchange the token
pub struct InteractiveLoginStrategy {
    sessions: Arc<SessionStore>,
    request_tokens: Arc<RequestTokenSlot>,
    timeout: Duration,
    hook: Arc<RwLock<Option<LoginHook>>>,
}

impl InteractiveLoginStrategy {
    fn emit(&self, event: LoginEvent) {
        let hook = self.hook.read().clone();
        if let Some(hook) = hook {
            hook(event);
        }
    }
}

#[async_trait]
impl AuthStrategy for InteractiveLoginStrategy {
    fn name(&self) -> &'static str {
        "interactive"
    }

    async fn attempt(&self, attempt: &AuthAttempt<'_>) -> AuthOutcome {
        let name = &attempt.account.name;
        if !attempt.policy.interactive {
            return AuthOutcome::Fatal(TrackerError::LoginRequired(format!(
                "no usable session for {} and interactive login is not allowed here",
                name
            )));
        }
        let login_url = attempt.api.login_url();
        info!("Initiating login flow for {}: open {}", name, login_url);

        self.request_tokens.clear();
        self.emit(LoginEvent::Waiting {
            account: name.clone(),
            login_url,
        });

        let request_token = match self
            .request_tokens
            .wait(name, self.timeout, || {
                info!("Still waiting for login of {}", name);
                self.emit(LoginEvent::StillWaiting {
                    account: name.clone(),
                });
            })
            .await
        {
            Ok(token) => token,
            Err(e) => return AuthOutcome::Fatal(e),
        };

        let session = match attempt.api.generate_session(&request_token).await {
            Ok(session) => session,
            Err(e) => {
                return AuthOutcome::Fatal(TrackerError::AuthenticationFailed(format!(
                    "Failed to obtain access_token for {}: {}",
                    name, e
                )))
            }
        };
        if session.access_token.is_empty() {
            return AuthOutcome::Fatal(TrackerError::AuthenticationFailed(
                "Failed to obtain access_token".to_string(),
            ));
        }

        if let Err(e) = self.sessions.set_token(
            name,
            &session.access_token,
            session.refresh_token.clone(),
            DEFAULT_TOKEN_TTL,
        ) {
            return AuthOutcome::Fatal(e);
        }
        info!("Successfully authenticated {}", name);
        AuthOutcome::Authenticated(Credential {
            account: name.clone(),
            access_token: session.access_token,
        })
    }
}

/// Runs the strategy chain for an account
pub struct AuthenticationManager {
    sessions: Arc<SessionStore>,
    request_tokens: Arc<RequestTokenSlot>,
    login_hook: Arc<RwLock<Option<LoginHook>>>,
    strategies: Vec<Box<dyn AuthStrategy>>,
}

impl AuthenticationManager {
    pub fn new(sessions: Arc<SessionStore>, request_token_timeout: Duration) -> Self {
        let request_tokens = Arc::new(RequestTokenSlot::new());
        let login_hook: Arc<RwLock<Option<LoginHook>>> = Arc::new(RwLock::new(None));

        let strategies: Vec<Box<dyn AuthStrategy>> = vec![
            Box::new(CachedSessionStrategy {
                sessions: Arc::clone(&sessions),
            }),
            Box::new(RenewSessionStrategy {
                sessions: Arc::clone(&sessions),
            }),
            Box::new(InteractiveLoginStrategy {
                sessions: Arc::clone(&sessions),
                request_tokens: Arc::clone(&request_tokens),
                timeout: request_token_timeout,
                hook: Arc::clone(&login_hook),
            }),
        ];

        AuthenticationManager {
            sessions,
            request_tokens,
            login_hook,
            strategies,
        }
    }

    pub fn sessions(&self) -> &Arc<SessionStore> {
        &self.sessions
    }

    pub fn set_login_hook(&self, hook: LoginHook) {
        *self.login_hook.write() = Some(hook);
    }

    /// Called by the OAuth callback route
    pub fn set_request_token(&self, token: &str) {
        info!("Received request_token from login callback");
        self.request_tokens.set(token);
    }

    pub async fn authenticate(
        &self,
        account: &AccountConfig,
        api: &dyn KiteApi,
        policy: LoginPolicy,
    ) -> Result<Credential> {
        let attempt = AuthAttempt {
            account,
            api,
            policy,
        };

        for strategy in &self.strategies {
            match strategy.attempt(&attempt).await {
                AuthOutcome::Authenticated(credential) => {
                    info!("{} authenticated via {} strategy", account.name, strategy.name());
                    return Ok(credential);
                }
                AuthOutcome::NeedNext => continue,
                AuthOutcome::Fatal(e) => {
                    warn!("{} strategy failed for {}: {}", strategy.name(), account.name, e);
                    return Err(e);
                }
            }
        }

        Err(TrackerError::AuthenticationFailed(format!(
            "No authentication strategy succeeded for {}",
            account.name
        )))
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::broker::kite::{KiteSession, MfInstrument, UserProfile};
    use crate::types::{MfHolding, Sip, StockHolding};
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Scriptable Kite API used across broker and orchestrator tests
    #[derive(Default)]
    pub struct MockKite {
        pub valid_token: Option<String>,
        pub renew_to: Option<String>,
        pub session_token: Option<String>,
        pub holdings: Vec<StockHolding>,
        pub mf_holdings: Vec<MfHolding>,
        pub sips: Vec<Sip>,
        pub instruments: Vec<MfInstrument>,
        pub fail_holdings: Option<String>,
        pub fail_sips: bool,
        pub profile_calls: AtomicUsize,
        pub holdings_delay: Option<Duration>,
    }

    #[async_trait]
    impl KiteApi for MockKite {
        fn login_url(&self) -> String {
            "https://kite.zerodha.com/connect/login?v=3&api_key=mock".to_string()
        }

        async fn generate_session(&self, request_token: &str) -> Result<KiteSession> {
            match &self.session_token {
                Some(token) => Ok(KiteSession {
                    access_token: format!("{}:{}", token, request_token),
                    refresh_token: Some("refresh".into()),
                    user_id: "AB1234".into(),
                }),
                None => Err(TrackerError::TokenRejected("invalid request token".into())),
            }
        }

        async fn renew_access_token(&self, _refresh_token: &str) -> Result<KiteSession> {
            match &self.renew_to {
                Some(token) => Ok(KiteSession {
                    access_token: token.clone(),
                    refresh_token: None,
                    user_id: "AB1234".into(),
                }),
                None => Err(TrackerError::TokenRejected("refresh expired".into())),
            }
        }

        async fn profile(&self, access_token: &str) -> Result<UserProfile> {
            self.profile_calls.fetch_add(1, Ordering::SeqCst);
            if self.valid_token.as_deref() == Some(access_token) {
                Ok(UserProfile {
                    user_id: "AB1234".into(),
                    user_name: "Test".into(),
                })
            } else {
                Err(TrackerError::TokenRejected("bad token".into()))
            }
        }

        async fn holdings(&self, _access_token: &str) -> Result<Vec<StockHolding>> {
            if let Some(delay) = self.holdings_delay {
                tokio::time::sleep(delay).await;
            }
            match &self.fail_holdings {
                Some(msg) => Err(TrackerError::ConnectionFailed(msg.clone())),
                None => Ok(self.holdings.clone()),
            }
        }

        async fn mf_holdings(&self, _access_token: &str) -> Result<Vec<MfHolding>> {
            Ok(self.mf_holdings.clone())
        }

        async fn mf_sips(&self, _access_token: &str) -> Result<Vec<Sip>> {
            if self.fail_sips {
                Err(TrackerError::NetworkTimeout("Kite".into()))
            } else {
                Ok(self.sips.clone())
            }
        }

        async fn mf_instruments(&self, _access_token: &str) -> Result<Vec<MfInstrument>> {
            Ok(self.instruments.clone())
        }
    }

    pub fn account(name: &str) -> AccountConfig {
        AccountConfig {
            name: name.into(),
            api_key: format!("{}-key", name),
            api_secret: format!("{}-secret", name),
        }
    }

    fn manager(dir: &tempfile::TempDir, timeout: Duration) -> AuthenticationManager {
        let sessions = Arc::new(SessionStore::new(dir.path().join(".session_cache.json")));
        AuthenticationManager::new(sessions, timeout)
    }

    #[tokio::test]
    async fn test_cached_token_is_used() {
        let dir = tempfile::tempdir().unwrap();
        let auth = manager(&dir, Duration::from_secs(0));
        auth.sessions()
            .set_token("Acc1", "cached", None, DEFAULT_TOKEN_TTL)
            .unwrap();
        let api = MockKite {
            valid_token: Some("cached".into()),
            ..Default::default()
        };

        let cred = auth.authenticate(&account("Acc1"), &api, LoginPolicy::default()).await.unwrap();
        assert_eq!(cred.access_token, "cached");
        assert_eq!(api.profile_calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_rejected_cached_token_falls_back_to_renew() {
        let dir = tempfile::tempdir().unwrap();
        let auth = manager(&dir, Duration::from_secs(0));
        auth.sessions()
            .set_token("Acc1", "stale", Some("r1".into()), DEFAULT_TOKEN_TTL)
            .unwrap();
        let api = MockKite {
            renew_to: Some("renewed".into()),
            ..Default::default()
        };

        let cred = auth.authenticate(&account("Acc1"), &api, LoginPolicy::default()).await.unwrap();
        assert_eq!(cred.access_token, "renewed");
        assert_eq!(auth.sessions().get_token("Acc1").as_deref(), Some("renewed"));
        assert_eq!(auth.sessions().get_refresh_token("Acc1").as_deref(), Some("r1"));
    }

    #[tokio::test]
    async fn test_no_session_times_out_waiting_for_login() {
        let dir = tempfile::tempdir().unwrap();
        let auth = manager(&dir, Duration::from_secs(0));
        let events = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&events);
        auth.set_login_hook(Arc::new(move |e: LoginEvent| sink.lock().push(e)));

        let err = auth
            .authenticate(&account("Acc1"), &MockKite::default(), LoginPolicy::default())
            .await
            .unwrap_err();
        assert_eq!(err.to_string(), "Timed out waiting for request_token for Acc1");
        assert!(matches!(
            events.lock().first(),
            Some(LoginEvent::Waiting { account, .. }) if account == "Acc1"
        ));
    }

    #[tokio::test]
    async fn test_unattended_policy_never_prompts() {
        let dir = tempfile::tempdir().unwrap();
        let auth = manager(&dir, Duration::from_secs(5));
        let events = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&events);
        auth.set_login_hook(Arc::new(move |e: LoginEvent| sink.lock().push(e)));
        auth.sessions()
            .set_token("Acc1", "t1", None, DEFAULT_TOKEN_TTL)
            .unwrap();
        // locally valid, but upstream has revoked it and there is nothing to renew with
        let api = MockKite {
            valid_token: Some("other".into()),
            ..Default::default()
        };

        let err = auth
            .authenticate(&account("Acc1"), &api, LoginPolicy::unattended())
            .await
            .unwrap_err();
        assert!(matches!(err, TrackerError::LoginRequired(_)));
        assert!(err.requires_login());
        assert!(events.lock().is_empty());
    }

    #[tokio::test]
    async fn test_unattended_policy_still_renews() {
        let dir = tempfile::tempdir().unwrap();
        let auth = manager(&dir, Duration::from_secs(0));
        auth.sessions()
            .set_token("Acc1", "stale", Some("r1".into()), DEFAULT_TOKEN_TTL)
            .unwrap();
        let api = MockKite {
            renew_to: Some("renewed".into()),
            ..Default::default()
        };

        let cred = auth
            .authenticate(&account("Acc1"), &api, LoginPolicy::unattended())
            .await
            .unwrap();
        assert_eq!(cred.access_token, "renewed");
    }

    #[tokio::test]
    async fn test_callback_token_completes_login() {
        let dir = tempfile::tempdir().unwrap();
        let auth = Arc::new(manager(&dir, Duration::from_secs(5)));
        let api = MockKite {
            session_token: Some("fresh".into()),
            ..Default::default()
        };

        let callback = Arc::clone(&auth);
        auth.set_login_hook(Arc::new(move |event: LoginEvent| {
            if let LoginEvent::Waiting { .. } = event {
                callback.set_request_token("req-1");
            }
        }));

        let cred = auth
            .authenticate(&account("Acc1"), &api, LoginPolicy::interactive(true))
            .await
            .unwrap();
        assert_eq!(cred.access_token, "fresh:req-1");
        assert!(auth.sessions().is_valid("Acc1"));
        assert_eq!(api.profile_calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_heartbeat_while_waiting() {
        let dir = tempfile::tempdir().unwrap();
        let auth = manager(&dir, Duration::from_secs(12));
        let events = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&events);
        auth.set_login_hook(Arc::new(move |e: LoginEvent| sink.lock().push(e)));

        let result = auth
            .authenticate(&account("Acc1"), &MockKite::default(), LoginPolicy::default())
            .await;
        assert!(matches!(result, Err(TrackerError::LoginTimeout(_))));

        let heartbeats = events
            .lock()
            .iter()
            .filter(|e| matches!(e, LoginEvent::StillWaiting { .. }))
            .count();
        assert_eq!(heartbeats, 2);
    }
}

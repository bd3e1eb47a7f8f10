/// Kite Connect REST client
use async_trait::async_trait;
use reqwest::Client;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use sha2::{Digest, Sha256};
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

use crate::error::{Result, TrackerError};
use crate::types::{AccountConfig, MfHolding, Sip, StockHolding};

const API_ROOT: &str = "https://api.kite.trade";
const LOGIN_ROOT: &str = "https://kite.zerodha.com/connect/login";
const KITE_VERSION: &str = "3";
const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Tokens returned by a successful login or renewal
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct KiteSession {
    pub access_token: String,
    #[serde(default)]
    pub refresh_token: Option<String>,
    #[serde(default)]
    pub user_id: String,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct UserProfile {
    pub user_id: String,
    #[serde(default)]
    pub user_name: String,
}

/// One row of the MF instrument dump; only the columns we use
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct MfInstrument {
    pub tradingsymbol: String,
    #[serde(default)]
    pub last_price_date: Option<String>,
}

/// Kite Connect operations for one API key
#[async_trait]
pub trait KiteApi: Send + Sync {
    fn login_url(&self) -> String;
    async fn generate_session(&self, request_token: &str) -> Result<KiteSession>;
    async fn renew_access_token(&self, refresh_token: &str) -> Result<KiteSession>;
    async fn profile(&self, access_token: &str) -> Result<UserProfile>;
    async fn holdings(&self, access_token: &str) -> Result<Vec<StockHolding>>;
    async fn mf_holdings(&self, access_token: &str) -> Result<Vec<MfHolding>>;
    async fn mf_sips(&self, access_token: &str) -> Result<Vec<Sip>>;
    async fn mf_instruments(&self, access_token: &str) -> Result<Vec<MfInstrument>>;
}

/// Builds an API handle for an account's credentials
pub trait KiteApiFactory: Send + Sync {
    fn for_account(&self, account: &AccountConfig) -> Arc<dyn KiteApi>;
}

#[derive(Debug, Deserialize)]
struct KiteEnvelope<T> {
    status: String,
    #[serde(default)]
    message: Option<String>,
    #[serde(default)]
    error_type: Option<String>,
    data: Option<T>,
}

pub struct KiteConnectClient {
    client: Client,
    api_key: String,
    api_secret: String,
    root: String,
}

impl KiteConnectClient {
    pub fn new(client: Client, api_key: &str, api_secret: &str) -> Self {
        KiteConnectClient {
            client,
            api_key: api_key.to_string(),
            api_secret: api_secret.to_string(),
            root: API_ROOT.to_string(),
        }
    }

    pub fn http_client() -> Result<Client> {
        Ok(Client::builder().timeout(REQUEST_TIMEOUT).build()?)
    }

    /// SHA-256 of api_key + token + api_secret, hex encoded
    fn checksum(&self, token: &str) -> String {
        let mut hasher = Sha256::new();
        hasher.update(self.api_key.as_bytes());
        hasher.update(token.as_bytes());
        hasher.update(self.api_secret.as_bytes());
        hasher
            .finalize()
            .iter()
            .map(|b| format!("{:02x}", b))
            .collect()
    }

    fn auth_header(&self, access_token: &str) -> String {
        format!("token {}:{}", self.api_key, access_token)
    }

    async fn get<T: DeserializeOwned>(&self, path: &str, access_token: &str) -> Result<T> {
        let response = self
            .client
            .get(format!("{}{}", self.root, path))
            .header("X-Kite-Version", KITE_VERSION)
            .header("Authorization", self.auth_header(access_token))
            .send()
            .await
            .map_err(|e| TrackerError::from_transport("Kite", e))?;

        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| TrackerError::from_transport("Kite", e))?;
        debug!("Kite GET {} -> {}", path, status);
        Self::unwrap_envelope(status.as_u16(), &body)
    }

    async fn post_form<T: DeserializeOwned>(&self, path: &str, form: &[(&str, &str)]) -> Result<T> {
        let response = self
            .client
            .post(format!("{}{}", self.root, path))
            .header("X-Kite-Version", KITE_VERSION)
            .form(form)
            .send()
            .await
            .map_err(|e| TrackerError::from_transport("Kite", e))?;

        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| TrackerError::from_transport("Kite", e))?;
        debug!("Kite POST {} -> {}", path, status);
        Self::unwrap_envelope(status.as_u16(), &body)
    }

    fn unwrap_envelope<T: DeserializeOwned>(status: u16, body: &str) -> Result<T> {
        let envelope: KiteEnvelope<T> = serde_json::from_str(body).map_err(|e| {
            if status >= 400 {
                TrackerError::UpstreamApi {
                    service: "Kite".to_string(),
                    status,
                    message: body.chars().take(200).collect(),
                }
            } else {
                TrackerError::DeserializationError(e)
            }
        })?;

        if envelope.status != "success" {
            let message = envelope.message.unwrap_or_else(|| "unknown error".to_string());
            return Err(match envelope.error_type.as_deref() {
                Some("TokenException") => TrackerError::TokenRejected(message),
                _ => TrackerError::UpstreamApi {
                    service: "Kite".to_string(),
                    status,
                    message,
                },
            });
        }

        envelope
            .data
            .ok_or_else(|| TrackerError::MissingData("Kite response has no data".to_string()))
    }
}

#[async_trait]
impl KiteApi for KiteConnectClient {
    fn login_url(&self) -> String {
        format!("{}?v={}&api_key={}", LOGIN_ROOT, KITE_VERSION, urlencoding::encode(&self.api_key))
    }

    async fn generate_session(&self, request_token: &str) -> Result<KiteSession> {
        let checksum = self.checksum(request_token);
        self.post_form(
            "/session/token",
            &[
                ("api_key", self.api_key.as_str()),
                ("request_token", request_token),
                ("checksum", checksum.as_str()),
            ],
        )
        .await
    }

    async fn renew_access_token(&self, refresh_token: &str) -> Result<KiteSession> {
        let checksum = self.checksum(refresh_token);
        self.post_form(
            "/session/refresh_token",
            &[
                ("api_key", self.api_key.as_str()),
                ("refresh_token", refresh_token),
                ("checksum", checksum.as_str()),
            ],
        )
        .await
    }

    async fn profile(&self, access_token: &str) -> Result<UserProfile> {
        self.get("/user/profile", access_token).await
    }

    async fn holdings(&self, access_token: &str) -> Result<Vec<StockHolding>> {
        self.get("/portfolio/holdings", access_token).await
    }

    async fn mf_holdings(&self, access_token: &str) -> Result<Vec<MfHolding>> {
        self.get("/mf/holdings", access_token).await
    }

    async fn mf_sips(&self, access_token: &str) -> Result<Vec<Sip>> {
        self.get("/mf/sips", access_token).await
    }

    /// The instrument dump is CSV, not the JSON envelope
    async fn mf_instruments(&self, access_token: &str) -> Result<Vec<MfInstrument>> {
        let response = self
            .client
            .get(format!("{}/mf/instruments", self.root))
            .header("X-Kite-Version", KITE_VERSION)
            .header("Authorization", self.auth_header(access_token))
            .send()
            .await
            .map_err(|e| TrackerError::from_transport("Kite", e))?;

        let status = response.status();
        if !status.is_success() {
            return Err(TrackerError::UpstreamApi {
                service: "Kite".to_string(),
                status: status.as_u16(),
                message: "MF instrument download failed".to_string(),
            });
        }
        let body = response
            .text()
            .await
            .map_err(|e| TrackerError::from_transport("Kite", e))?;
        parse_mf_instruments(&body)
    }
}

pub fn parse_mf_instruments(csv_text: &str) -> Result<Vec<MfInstrument>> {
    let mut reader = csv::Reader::from_reader(csv_text.as_bytes());
    let mut instruments = Vec::new();
    for record in reader.deserialize::<MfInstrument>() {
        match record {
            Ok(inst) => instruments.push(inst),
            Err(e) => debug!("Skipping MF instrument row: {}", e),
        }
    }
    Ok(instruments)
}

/// Creates a `KiteConnectClient` per account over one shared HTTP client
pub struct KiteConnectFactory {
    client: Client,
}

impl KiteConnectFactory {
    pub fn new() -> Result<Self> {
        Ok(KiteConnectFactory {
            client: KiteConnectClient::http_client()?,
        })
    }
}

impl KiteApiFactory for KiteConnectFactory {
    fn for_account(&self, account: &AccountConfig) -> Arc<dyn KiteApi> {
        Arc::new(KiteConnectClient::new(
            self.client.clone(),
            &account.api_key,
            &account.api_secret,
        ))
    }
}

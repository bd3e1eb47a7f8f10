/// Google Sheets v4 client authenticated with a service account
use async_trait::async_trait;
use chrono::Utc;
use jsonwebtoken::{encode, Algorithm, EncodingKey, Header};
use parking_lot::Mutex;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::path::Path;
use std::time::{Duration, Instant};
use tracing::{info, warn};

use crate::error::{Result, TrackerError};

const SHEETS_API_ROOT: &str = "https://sheets.googleapis.com/v4/spreadsheets";
const SHEETS_SCOPE: &str = "https://www.googleapis.com/auth/spreadsheets.readonly";
const DEFAULT_TOKEN_URI: &str = "https://oauth2.googleapis.com/token";
const REQUEST_TIMEOUT: Duration = Duration::from_secs(20);
const ASSERTION_LIFETIME_SECS: i64 = 3600;
/// Bearer tokens are refreshed this long before Google expires them
const TOKEN_REFRESH_MARGIN: Duration = Duration::from_secs(60);

const JWT_BEARER_GRANT: &str = "urn:ietf:params:oauth:grant-type:jwt-bearer";

const MAX_RETRIES: u32 = 2;
const RETRY_DELAY: Duration = Duration::from_secs(1);

pub type SheetRow = Vec<Value>;

/// Anything that can read a rectangular range of cells
#[async_trait]
pub trait SheetReader: Send + Sync {
    async fn fetch_sheet_data(&self, spreadsheet_id: &str, range_name: &str) -> Result<Vec<SheetRow>>;
}

#[derive(Debug, Clone, Deserialize)]
struct ServiceAccountKey {
    client_email: String,
    private_key: String,
    #[serde(default)]
    token_uri: Option<String>,
}

#[derive(Debug, Serialize)]
struct AssertionClaims<'a> {
    iss: &'a str,
    scope: &'a str,
    aud: &'a str,
    iat: i64,
    exp: i64,
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    #[serde(default)]
    expires_in: Option<u64>,
}

#[derive(Debug, Deserialize)]
struct ValueRange {
    #[serde(default)]
    values: Vec<SheetRow>,
}

struct BearerToken {
    value: String,
    refresh_at: Instant,
}

pub struct GoogleSheetsClient {
    client: Client,
    key: ServiceAccountKey,
    encoding_key: EncodingKey,
    token: Mutex<Option<BearerToken>>,
}

impl GoogleSheetsClient {
    /// Load a service-account key file
    pub fn from_credentials_file(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path).map_err(|e| {
            TrackerError::ConfigError(format!(
                "Cannot read Google credentials file {}: {}",
                path.display(),
                e
            ))
        })?;
        let key: ServiceAccountKey = serde_json::from_str(&raw)?;
        let encoding_key = EncodingKey::from_rsa_pem(key.private_key.as_bytes()).map_err(|e| {
            TrackerError::ConfigError(format!("Invalid service account private key: {}", e))
        })?;

        Ok(GoogleSheetsClient {
            client: Client::builder().timeout(REQUEST_TIMEOUT).build()?,
            key,
            encoding_key,
            token: Mutex::new(None),
        })
    }

    fn token_uri(&self) -> &str {
        self.key.token_uri.as_deref().unwrap_or(DEFAULT_TOKEN_URI)
    }

    fn signed_assertion(&self) -> Result<String> {
        let now = Utc::now().timestamp();
        let claims = AssertionClaims {
            iss: &self.key.client_email,
            scope: SHEETS_SCOPE,
            aud: self.token_uri(),
            iat: now,
            exp: now + ASSERTION_LIFETIME_SECS,
        };
        encode(&Header::new(Algorithm::RS256), &claims, &self.encoding_key)
            .map_err(|e| TrackerError::AuthenticationFailed(format!("Cannot sign Google assertion: {}", e)))
    }

    async fn access_token(&self) -> Result<String> {
        let cached = self
            .token
            .lock()
            .as_ref()
            .filter(|t| Instant::now() < t.refresh_at)
            .map(|t| t.value.clone());
        if let Some(token) = cached {
            return Ok(token);
        }

        let assertion = self.signed_assertion()?;
        let resp = self
            .client
            .post(self.token_uri())
            .form(&token_request_form(&assertion))
            .send()
            .await
            .map_err(|e| TrackerError::from_transport("Google OAuth", e))?;

        let status = resp.status();
        if !status.is_success() {
            let message = resp.text().await.unwrap_or_default();
            return Err(TrackerError::UpstreamApi {
                service: "Google OAuth".to_string(),
                status: status.as_u16(),
                message,
            });
        }

        let token: TokenResponse = resp.json().await?;
        let lifetime = Duration::from_secs(token.expires_in.unwrap_or(3600));
        *self.token.lock() = Some(BearerToken {
            value: token.access_token.clone(),
            refresh_at: Instant::now() + lifetime.saturating_sub(TOKEN_REFRESH_MARGIN),
        });
        info!("Successfully authenticated with Google Sheets API");
        Ok(token.access_token)
    }

    async fn fetch_once(&self, spreadsheet_id: &str, range_name: &str) -> Result<Vec<SheetRow>> {
        let token = self.access_token().await?;
        let url = format!(
            "{}/{}/values/{}",
            SHEETS_API_ROOT,
            urlencoding::encode(spreadsheet_id),
            urlencoding::encode(range_name)
        );
        let resp = self
            .client
            .get(&url)
            .bearer_auth(token)
            .send()
            .await
            .map_err(|e| TrackerError::from_transport("Google Sheets", e))?;

        let status = resp.status();
        if !status.is_success() {
            let message = resp.text().await.unwrap_or_default();
            return Err(TrackerError::UpstreamApi {
                service: "Google Sheets".to_string(),
                status: status.as_u16(),
                message,
            });
        }

        let range: ValueRange = resp.json().await?;
        info!("Fetched {} rows from Google Sheets range {}", range.values.len(), range_name);
        Ok(range.values)
    }
}

#[async_trait]
impl SheetReader for GoogleSheetsClient {
    async fn fetch_sheet_data(&self, spreadsheet_id: &str, range_name: &str) -> Result<Vec<SheetRow>> {
        let mut delay = RETRY_DELAY;
        let mut attempt = 0;
        loop {
            match self.fetch_once(spreadsheet_id, range_name).await {
                Ok(rows) => return Ok(rows),
                Err(e) if e.is_transient() && attempt < MAX_RETRIES => {
                    attempt += 1;
                    warn!(
                        "Google Sheets fetch failed (attempt {}/{}): {} - retrying in {:?}",
                        attempt,
                        MAX_RETRIES + 1,
                        e,
                        delay
                    );
                    tokio::time::sleep(delay).await;
                    delay *= 2;
                }
                Err(e) => return Err(e),
            }
        }
    }
}

/// Form fields exchanging a signed service-account assertion for a bearer token
fn token_request_form(assertion: &str) -> [(&'static str, &str); 2] {
    [("grant_type", JWT_BEARER_GRANT), ("assertion", assertion)]
}

/// Cell as a number; currency symbols, separators and percent signs are
/// ignored and anything unparseable reads as 0
pub fn parse_number(value: &Value) -> f64 {
    match value {
        Value::Number(n) => n.as_f64().unwrap_or(0.0),
        Value::String(s) => {
            let cleaned: String = s
                .chars()
                .filter(|c| !matches!(c, '₹' | ',' | '%') && !c.is_whitespace())
                .collect();
            cleaned.parse().unwrap_or(0.0)
        }
        _ => 0.0,
    }
}

pub fn parse_yes_no(value: &Value) -> bool {
    match value {
        Value::String(s) => matches!(s.trim().to_lowercase().as_str(), "yes" | "y" | "true" | "1"),
        Value::Bool(b) => *b,
        _ => false,
    }
}

/// Cell rendered as text, empty when absent
pub fn cell_text(row: &[Value], index: usize) -> String {
    match row.get(index) {
        Some(Value::String(s)) => s.clone(),
        Some(Value::Null) | None => String::new(),
        Some(other) => other.to_string(),
    }
}

pub fn cell_number(row: &[Value], index: usize) -> f64 {
    row.get(index).map(parse_number).unwrap_or(0.0)
}

fn row_is_blank(row: &[Value]) -> bool {
    row.iter().all(|v| match v {
        Value::Null => true,
        Value::String(s) => s.is_empty(),
        _ => false,
    })
}

/// Skip the header row and blank rows, then parse each data row.
///
/// Rows are numbered as the sheet shows them (first data row is 2). A row
/// that fails to parse is logged and dropped.
pub fn parse_rows<T>(
    rows: &[SheetRow],
    entity: &str,
    parse: impl Fn(&[Value], usize) -> Result<T>,
) -> Vec<T> {
    if rows.len() < 2 {
        info!("No {} data found", entity);
        return Vec::new();
    }

    let mut items = Vec::with_capacity(rows.len() - 1);
    for (offset, row) in rows.iter().enumerate().skip(1) {
        if row_is_blank(row) {
            continue;
        }
        let row_number = offset + 1;
        match parse(row, row_number) {
            Ok(item) => items.push(item),
            Err(e) => warn!("Error parsing {} row {}: {}", entity, row_number, e),
        }
    }
    info!("Parsed {} {}", items.len(), entity);
    items
}

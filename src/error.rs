/// Centralized error types for the portfolio tracker
use thiserror::Error;

/// Coarse error classes used for logging and for deciding how a failure is surfaced
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    Network,
    Api,
    Authentication,
    Data,
    Configuration,
    Unknown,
}

impl ErrorCategory {
    pub fn as_str(&self) -> &str {
        match self {
            ErrorCategory::Network => "network",
            ErrorCategory::Api => "api",
            ErrorCategory::Authentication => "authentication",
            ErrorCategory::Data => "data",
            ErrorCategory::Configuration => "configuration",
            ErrorCategory::Unknown => "unknown",
        }
    }
}

#[derive(Error, Debug)]
pub enum TrackerError {
    // Authentication Errors
    #[error("Authentication failed: {0}")]
    AuthenticationFailed(String),

    #[error("Token rejected: {0}")]
    TokenRejected(String),

    #[error("{0}")]
    LoginTimeout(String),

    #[error("Authentication required: {0}")]
    LoginRequired(String),

    // Network Errors
    #[error("HTTP request failed: {0}")]
    HttpError(#[from] reqwest::Error),

    #[error("Network timeout: {0}")]
    NetworkTimeout(String),

    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    // Upstream API Errors
    #[error("{service} returned HTTP {status}: {message}")]
    UpstreamApi {
        service: String,
        status: u16,
        message: String,
    },

    // Data Errors
    #[error("Invalid data: {0}")]
    InvalidData(String),

    #[error("Missing data: {0}")]
    MissingData(String),

    #[error("Deserialization failed: {0}")]
    DeserializationError(#[from] serde_json::Error),

    // Batch Errors
    #[error("Fetch failed for account {account}: {message}")]
    PartialBatch { account: String, message: String },

    // Orchestration Errors
    #[error("Fetch already in progress: {0}")]
    FetchInProgress(String),

    // Configuration Errors
    #[error("Configuration error: {0}")]
    ConfigError(String),

    // File I/O Errors
    #[error("File I/O error: {0}")]
    FileError(#[from] std::io::Error),

    // Generic Errors
    #[error("Internal error: {0}")]
    InternalError(String),
}

pub type Result<T> = std::result::Result<T, TrackerError>;

impl TrackerError {
    /// Classify a transport failure from an external service
    pub fn from_transport(service: &str, err: reqwest::Error) -> Self {
        if err.is_timeout() {
            TrackerError::NetworkTimeout(format!("{} request timeout - server slow to respond", service))
        } else if err.is_connect() {
            TrackerError::ConnectionFailed(format!("Cannot connect to {} - network unavailable", service))
        } else if let Some(status) = err.status() {
            TrackerError::UpstreamApi {
                service: service.to_string(),
                status: status.as_u16(),
                message: err.to_string(),
            }
        } else {
            TrackerError::HttpError(err)
        }
    }

    pub fn category(&self) -> ErrorCategory {
        match self {
            TrackerError::AuthenticationFailed(_)
            | TrackerError::TokenRejected(_)
            | TrackerError::LoginTimeout(_)
            | TrackerError::LoginRequired(_) => ErrorCategory::Authentication,
            TrackerError::HttpError(e) if e.is_timeout() || e.is_connect() => ErrorCategory::Network,
            TrackerError::HttpError(_) => ErrorCategory::Api,
            TrackerError::NetworkTimeout(_) | TrackerError::ConnectionFailed(_) => ErrorCategory::Network,
            TrackerError::UpstreamApi { .. } => ErrorCategory::Api,
            TrackerError::InvalidData(_)
            | TrackerError::MissingData(_)
            | TrackerError::DeserializationError(_) => ErrorCategory::Data,
            TrackerError::ConfigError(_) => ErrorCategory::Configuration,
            TrackerError::PartialBatch { .. }
            | TrackerError::FetchInProgress(_)
            | TrackerError::FileError(_)
            | TrackerError::InternalError(_) => ErrorCategory::Unknown,
        }
    }

    /// Transient failures that a later refresh may succeed on
    pub fn is_transient(&self) -> bool {
        match self {
            TrackerError::UpstreamApi { status, .. } => *status >= 500,
            _ => self.category() == ErrorCategory::Network,
        }
    }

    /// Failures that can only be resolved by a human completing the login flow
    pub fn requires_login(&self) -> bool {
        matches!(
            self,
            TrackerError::TokenRejected(_)
                | TrackerError::LoginTimeout(_)
                | TrackerError::LoginRequired(_)
        ) || matches!(self, TrackerError::UpstreamApi { status: 401 | 403, .. })
    }

    /// Get error code for logging
    pub fn error_code(&self) -> &str {
        match self {
            TrackerError::AuthenticationFailed(_) => "AUTH_001",
            TrackerError::TokenRejected(_) => "AUTH_002",
            TrackerError::LoginTimeout(_) => "AUTH_003",
            TrackerError::LoginRequired(_) => "AUTH_004",
            TrackerError::HttpError(_) => "NET_001",
            TrackerError::NetworkTimeout(_) => "NET_002",
            TrackerError::ConnectionFailed(_) => "NET_003",
            TrackerError::UpstreamApi { .. } => "API_001",
            TrackerError::InvalidData(_) => "DATA_001",
            TrackerError::MissingData(_) => "DATA_002",
            TrackerError::DeserializationError(_) => "DATA_003",
            TrackerError::PartialBatch { .. } => "BATCH_001",
            TrackerError::FetchInProgress(_) => "FETCH_001",
            TrackerError::ConfigError(_) => "CFG_001",
            TrackerError::FileError(_) => "FILE_001",
            TrackerError::InternalError(_) => "INT_001",
        }
    }
}

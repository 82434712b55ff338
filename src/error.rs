use hyper::StatusCode;
use thiserror::Error;

/// Unified error type for the Shunt proxy
#[derive(Error, Debug)]
pub enum ShuntError {
    // Configuration errors
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    // Forwarding errors
    #[error("Invalid backend URL: {0}")]
    InvalidBackendUrl(String),

    #[error("Failed to build SOCKS5 proxy: {0}")]
    Socks5Proxy(String),

    #[error("Backend request failed: {0}")]
    Upstream(#[from] reqwest::Error),

    #[error("Response relay failed: {0}")]
    Relay(String),

    // Selection errors
    #[error("No usable backend available")]
    NoBackendAvailable,

    #[error("Unsupported strategy: {0}")]
    UnknownStrategy(String),

    // Listener errors
    #[error("TLS error: {0}")]
    Tls(String),

    #[error("Connection error: {0}")]
    Connection(String),

    // I/O errors
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    // HTTP errors
    #[error("HTTP error: {0}")]
    Http(#[from] http::Error),
}

/// Result type alias for Shunt operations
pub type Result<T> = std::result::Result<T, ShuntError>;

impl ShuntError {
    /// Get the HTTP status code this error surfaces as
    pub fn status_code(&self) -> StatusCode {
        match self {
            // 502 Bad Gateway
            ShuntError::InvalidBackendUrl(_)
            | ShuntError::Socks5Proxy(_)
            | ShuntError::Upstream(_)
            | ShuntError::Relay(_) => StatusCode::BAD_GATEWAY,

            // 503 Service Unavailable
            ShuntError::NoBackendAvailable | ShuntError::UnknownStrategy(_) => {
                StatusCode::SERVICE_UNAVAILABLE
            }

            // 500 Internal Server Error
            ShuntError::InvalidConfig(_)
            | ShuntError::Tls(_)
            | ShuntError::Connection(_)
            | ShuntError::Io(_)
            | ShuntError::Http(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Check if this is a server error (5xx)
    pub fn is_server_error(&self) -> bool {
        self.status_code().is_server_error()
    }
}

// Convert from URL parse errors
impl From<url::ParseError> for ShuntError {
    fn from(err: url::ParseError) -> Self {
        ShuntError::InvalidBackendUrl(err.to_string())
    }
}

// Convert from YAML parse errors
impl From<serde_yaml::Error> for ShuntError {
    fn from(err: serde_yaml::Error) -> Self {
        ShuntError::InvalidConfig(err.to_string())
    }
}

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use thiserror::Error;

/// Unified error type for the gateway
#[derive(Error, Debug)]
pub enum GatewayError {
    // Pool errors
    #[error("no active proxy")]
    NoActiveProxy,

    #[error("Proxy not found: {0}")]
    ProxyNotFound(String),

    #[error("Invalid proxy uri: {0}")]
    InvalidProxyUri(String),

    #[error("Unsupported proxy scheme: {0}")]
    UnsupportedScheme(String),

    // Upstream errors
    #[error("Proxy connection failed: {0}")]
    ProxyConnectionFailed(String),

    #[error("Upstream status {status} rejected")]
    StatusRejected { status: u16 },

    #[error("All attempts failed after {attempts} tries")]
    AllAttemptsFailed { attempts: u32 },

    #[error("Operation timed out")]
    Timeout,

    // Tunnel errors
    #[error("CONNECT failed: {0}")]
    ConnectFailed(String),

    #[error("Connection upgrade failed: {0}")]
    UpgradeFailed(String),

    #[error("Body stream error: {0}")]
    BodyStream(String),

    // Request errors
    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    // Configuration errors
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    // I/O errors
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    // HTTP errors
    #[error("HTTP error: {0}")]
    Http(String),

    // Internal errors
    #[error("Internal error: {0}")]
    Internal(String),
}

/// Result type alias for gateway operations
pub type Result<T> = std::result::Result<T, GatewayError>;

impl GatewayError {
    /// Get the HTTP status code for this error
    pub fn status_code(&self) -> StatusCode {
        match self {
            // 400 Bad Request
            GatewayError::InvalidRequest(_)
            | GatewayError::InvalidProxyUri(_)
            | GatewayError::UnsupportedScheme(_)
            | GatewayError::InvalidConfig(_) => StatusCode::BAD_REQUEST,

            // 404 Not Found
            GatewayError::ProxyNotFound(_) => StatusCode::NOT_FOUND,

            // 502 Bad Gateway
            GatewayError::ProxyConnectionFailed(_)
            | GatewayError::StatusRejected { .. }
            | GatewayError::ConnectFailed(_)
            | GatewayError::UpgradeFailed(_)
            | GatewayError::BodyStream(_)
            | GatewayError::AllAttemptsFailed { .. } => StatusCode::BAD_GATEWAY,

            // 503 Service Unavailable
            GatewayError::NoActiveProxy => StatusCode::SERVICE_UNAVAILABLE,

            // 504 Gateway Timeout
            GatewayError::Timeout => StatusCode::GATEWAY_TIMEOUT,

            // 500 Internal Server Error
            GatewayError::Io(_) | GatewayError::Http(_) | GatewayError::Internal(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }

    /// Check if this is a client error (4xx)
    pub fn is_client_error(&self) -> bool {
        self.status_code().is_client_error()
    }

    /// Check if this is a server error (5xx)
    pub fn is_server_error(&self) -> bool {
        self.status_code().is_server_error()
    }
}

// Admin API error responses
impl IntoResponse for GatewayError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let body = json!({
            "error": self.to_string(),
        });

        (status, Json(body)).into_response()
    }
}

impl From<hyper::Error> for GatewayError {
    fn from(err: hyper::Error) -> Self {
        GatewayError::Http(err.to_string())
    }
}

impl From<http::Error> for GatewayError {
    fn from(err: http::Error) -> Self {
        GatewayError::Http(err.to_string())
    }
}

impl From<url::ParseError> for GatewayError {
    fn from(err: url::ParseError) -> Self {
        GatewayError::InvalidProxyUri(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_status_code_mapping() {
        assert_eq!(
            GatewayError::InvalidRequest("bad".to_string()).status_code(),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            GatewayError::UnsupportedScheme("ftp".to_string()).status_code(),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            GatewayError::ProxyNotFound("http://a:1".to_string()).status_code(),
            StatusCode::NOT_FOUND
        );
        assert_eq!(
            GatewayError::StatusRejected { status: 503 }.status_code(),
            StatusCode::BAD_GATEWAY
        );
        assert_eq!(GatewayError::Timeout.status_code(), StatusCode::GATEWAY_TIMEOUT);
        assert_eq!(
            GatewayError::NoActiveProxy.status_code(),
            StatusCode::SERVICE_UNAVAILABLE
        );
    }

    #[test]
    fn test_error_client_server_helpers() {
        assert!(GatewayError::InvalidRequest("bad".to_string()).is_client_error());
        assert!(!GatewayError::InvalidRequest("bad".to_string()).is_server_error());

        assert!(GatewayError::NoActiveProxy.is_server_error());
        assert!(!GatewayError::NoActiveProxy.is_client_error());
    }

    #[test]
    fn test_no_active_proxy_message() {
        assert_eq!(GatewayError::NoActiveProxy.to_string(), "no active proxy");
    }
}

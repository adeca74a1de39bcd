use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use std::fmt;

/// Main error type for the node registry
#[derive(Debug)]
pub enum AtlasError {
    /// Malformed caller input: bad address, oversized field, bad PGP ID
    Validation(String),

    /// A trust or business rule rejected the request: netmask, address
    /// mismatch, wrong token or CAPTCHA
    Policy(String),

    /// No matching node or queue entry
    NotFound(String),

    /// Mutations are disabled on this instance
    ReadOnly,

    /// Persistence failures
    Storage(String),

    /// Email notice failures
    Notify(String),

    /// Peer map retrieval or decoding failures
    Federation(String),

    /// Configuration or CLI argument errors
    Config(String),

    /// CAPTCHA image or audio could not be produced
    Render(String),

    /// System I/O errors
    Io(std::io::Error),

    /// JSON serialization/deserialization errors
    Serialization(serde_json::Error),
}

impl fmt::Display for AtlasError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AtlasError::Validation(msg) => write!(f, "{}", msg),
            AtlasError::Policy(msg) => write!(f, "{}", msg),
            AtlasError::NotFound(msg) => write!(f, "{}", msg),
            AtlasError::ReadOnly => write!(f, "database in readonly mode"),
            AtlasError::Storage(msg) => write!(f, "Storage error: {}", msg),
            AtlasError::Notify(msg) => write!(f, "Notification error: {}", msg),
            AtlasError::Federation(msg) => write!(f, "Federation error: {}", msg),
            AtlasError::Config(msg) => write!(f, "Configuration error: {}", msg),
            AtlasError::Render(msg) => write!(f, "Render error: {}", msg),
            AtlasError::Io(err) => write!(f, "I/O error: {}", err),
            AtlasError::Serialization(err) => write!(f, "Serialization error: {}", err),
        }
    }
}

impl std::error::Error for AtlasError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            AtlasError::Io(err) => Some(err),
            AtlasError::Serialization(err) => Some(err),
            _ => None,
        }
    }
}

// Convenient type alias for Results using our error type
pub type Result<T> = std::result::Result<T, AtlasError>;

impl AtlasError {
    /// Get the appropriate HTTP status code for this error
    pub fn status_code(&self) -> StatusCode {
        match self {
            AtlasError::Validation(_) => StatusCode::BAD_REQUEST,
            AtlasError::Policy(_) => StatusCode::FORBIDDEN,
            AtlasError::NotFound(_) => StatusCode::NOT_FOUND,
            AtlasError::ReadOnly => StatusCode::FORBIDDEN,
            AtlasError::Storage(_)
            | AtlasError::Notify(_)
            | AtlasError::Federation(_)
            | AtlasError::Config(_)
            | AtlasError::Render(_)
            | AtlasError::Io(_)
            | AtlasError::Serialization(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Caller-facing errors carry their message; internal ones stay opaque.
    pub fn is_internal(&self) -> bool {
        self.status_code() == StatusCode::INTERNAL_SERVER_ERROR
    }

    /// Get a user-friendly error message
    pub fn user_message(&self) -> String {
        if self.is_internal() {
            "Internal server error. Please try again later.".to_string()
        } else {
            self.to_string()
        }
    }

    /// Get the error type identifier
    pub fn error_type(&self) -> &'static str {
        match self {
            AtlasError::Validation(_) => "validation_error",
            AtlasError::Policy(_) => "policy_error",
            AtlasError::NotFound(_) => "not_found",
            AtlasError::ReadOnly => "read_only",
            AtlasError::Storage(_) => "storage_error",
            AtlasError::Notify(_) => "notify_error",
            AtlasError::Federation(_) => "federation_error",
            AtlasError::Config(_) => "configuration_error",
            AtlasError::Render(_) => "render_error",
            AtlasError::Io(_) => "io_error",
            AtlasError::Serialization(_) => "serialization_error",
        }
    }
}

// Responses share the {"data", "error"} envelope that peer maps decode
impl IntoResponse for AtlasError {
    fn into_response(self) -> Response {
        let status_code = self.status_code();
        if self.is_internal() {
            tracing::error!(err = %self, "Internal error while handling request");
        } else {
            tracing::debug!(err = %self, "Rejected request");
        }

        let body = json!({
            "data": null,
            "error": {
                "code": status_code.as_u16(),
                "message": self.user_message(),
                "type": self.error_type(),
            }
        });

        (status_code, Json(body)).into_response()
    }
}

// Conversions from common error types
impl From<std::io::Error> for AtlasError {
    fn from(err: std::io::Error) -> Self {
        AtlasError::Io(err)
    }
}

impl From<serde_json::Error> for AtlasError {
    fn from(err: serde_json::Error) -> Self {
        AtlasError::Serialization(err)
    }
}

impl From<reqwest::Error> for AtlasError {
    fn from(err: reqwest::Error) -> Self {
        AtlasError::Federation(err.to_string())
    }
}

impl From<hound::Error> for AtlasError {
    fn from(err: hound::Error) -> Self {
        AtlasError::Render(err.to_string())
    }
}

// Helper macros for common error construction patterns
#[macro_export]
macro_rules! validation_error {
    ($msg:expr) => {
        $crate::error::AtlasError::Validation($msg.to_string())
    };
    ($fmt:expr, $($arg:tt)*) => {
        $crate::error::AtlasError::Validation(format!($fmt, $($arg)*))
    };
}

#[macro_export]
macro_rules! policy_error {
    ($msg:expr) => {
        $crate::error::AtlasError::Policy($msg.to_string())
    };
    ($fmt:expr, $($arg:tt)*) => {
        $crate::error::AtlasError::Policy(format!($fmt, $($arg)*))
    };
}

#[macro_export]
macro_rules! storage_error {
    ($msg:expr) => {
        $crate::error::AtlasError::Storage($msg.to_string())
    };
    ($fmt:expr, $($arg:tt)*) => {
        $crate::error::AtlasError::Storage(format!($fmt, $($arg)*))
    };
}

#[macro_export]
macro_rules! config_error {
    ($msg:expr) => {
        $crate::error::AtlasError::Config($msg.to_string())
    };
    ($fmt:expr, $($arg:tt)*) => {
        $crate::error::AtlasError::Config(format!($fmt, $($arg)*))
    };
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = AtlasError::Validation("addressInvalid".to_string());
        assert_eq!(err.to_string(), "addressInvalid");

        let io_err = AtlasError::Io(std::io::Error::new(
            std::io::ErrorKind::NotFound,
            "File not found",
        ));
        assert!(io_err.to_string().contains("I/O error"));
    }

    #[test]
    fn test_internal_errors_are_opaque() {
        let err = storage_error!("table nodes is locked");
        assert!(err.is_internal());
        assert!(!err.user_message().contains("locked"));

        let err = policy_error!("remote address does not match Node address");
        assert!(!err.is_internal());
        assert_eq!(err.status_code(), StatusCode::FORBIDDEN);
        assert!(err.user_message().contains("does not match"));
    }

    #[test]
    fn test_macros() {
        let err = config_error!("heartbeat rate {} is invalid", 0);
        assert_eq!(err.to_string(), "Configuration error: heartbeat rate 0 is invalid");

        let err = validation_error!("contactTooLong");
        assert_eq!(err.status_code(), StatusCode::BAD_REQUEST);
        assert_eq!(err.error_type(), "validation_error");
    }
}

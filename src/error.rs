//! Unified application error model for the credential/session core.
//! One enum crosses the coordinator boundary; callers (HTTP handlers and
//! other frontends) map it to their transport via `http_status`.

use serde::{Deserialize, Serialize};
use std::fmt::{Display, Formatter};

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum AppError {
    InvalidRequest { code: String, message: String },
    NotFound { code: String, message: String },
    Conflict { code: String, message: String },
    Unauthorized { code: String, message: String },
    Internal { code: String, message: String },
}

impl AppError {
    pub fn code_str(&self) -> &str {
        match self {
            AppError::InvalidRequest { code, .. }
            | AppError::NotFound { code, .. }
            | AppError::Conflict { code, .. }
            | AppError::Unauthorized { code, .. }
            | AppError::Internal { code, .. } => code.as_str(),
        }
    }

    pub fn message(&self) -> &str {
        match self {
            AppError::InvalidRequest { message, .. }
            | AppError::NotFound { message, .. }
            | AppError::Conflict { message, .. }
            | AppError::Unauthorized { message, .. }
            | AppError::Internal { message, .. } => message.as_str(),
        }
    }

    pub fn invalid<S: Into<String>>(code: S, msg: S) -> Self { AppError::InvalidRequest { code: code.into(), message: msg.into() } }
    pub fn not_found<S: Into<String>>(code: S, msg: S) -> Self { AppError::NotFound { code: code.into(), message: msg.into() } }
    pub fn conflict<S: Into<String>>(code: S, msg: S) -> Self { AppError::Conflict { code: code.into(), message: msg.into() } }
    pub fn unauthorized<S: Into<String>>(code: S, msg: S) -> Self { AppError::Unauthorized { code: code.into(), message: msg.into() } }
    pub fn internal<S: Into<String>>(code: S, msg: S) -> Self { AppError::Internal { code: code.into(), message: msg.into() } }

    /// The one shape surfaced for both "unknown user" and "wrong secret".
    /// Login must not let a caller distinguish the two (username enumeration).
    pub fn bad_credentials() -> Self {
        AppError::unauthorized("invalid_credentials", "invalid username/email or password")
    }

    /// Map to HTTP status code.
    pub fn http_status(&self) -> u16 {
        match self {
            AppError::InvalidRequest { .. } => 400,
            AppError::NotFound { .. } => 404,
            AppError::Conflict { .. } => 409,
            AppError::Unauthorized { .. } => 401,
            AppError::Internal { .. } => 500,
        }
    }

    /// Only `Internal` is fatal to an operation; everything else is a
    /// caller-recoverable outcome (retry with the right credential, re-login).
    pub fn is_fatal(&self) -> bool {
        matches!(self, AppError::Internal { .. })
    }
}

impl Display for AppError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.code_str(), self.message())
    }
}

impl std::error::Error for AppError {}

pub type AppResult<T> = Result<T, AppError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn http_status_mapping() {
        assert_eq!(AppError::invalid("bad_input", "oops").http_status(), 400);
        assert_eq!(AppError::not_found("not_found", "missing").http_status(), 404);
        assert_eq!(AppError::conflict("conflict", "dup").http_status(), 409);
        assert_eq!(AppError::unauthorized("auth", "no").http_status(), 401);
        assert_eq!(AppError::internal("internal", "panic").http_status(), 500);
    }

    #[test]
    fn bad_credentials_is_one_shape() {
        // Both login failure paths must produce this exact value.
        let a = AppError::bad_credentials();
        let b = AppError::bad_credentials();
        assert_eq!(a, b);
        assert_eq!(a.http_status(), 401);
        assert_eq!(a.code_str(), "invalid_credentials");
    }

    #[test]
    fn fatality() {
        assert!(AppError::internal("x", "y").is_fatal());
        assert!(!AppError::bad_credentials().is_fatal());
        assert!(!AppError::not_found("x", "y").is_fatal());
    }

    #[test]
    fn serde_tagged_shape() {
        let v = serde_json::to_value(AppError::bad_credentials()).unwrap();
        assert_eq!(v.get("type").and_then(|t| t.as_str()), Some("unauthorized"));
        assert_eq!(v.get("code").and_then(|c| c.as_str()), Some("invalid_credentials"));
    }
}

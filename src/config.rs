//! Token lifetime configuration. Values are deployment policy, not
//! algorithm: the issuer reads whatever is configured here.

use crate::error::{AppError, AppResult};

pub const DEFAULT_ACCESS_TTL_SECS: i64 = 15 * 60; // minutes-scale
pub const DEFAULT_RENEWAL_TTL_SECS: i64 = 7 * 24 * 60 * 60; // day/week-scale

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AuthConfig {
    pub access_ttl_secs: i64,
    pub renewal_ttl_secs: i64,
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self { access_ttl_secs: DEFAULT_ACCESS_TTL_SECS, renewal_ttl_secs: DEFAULT_RENEWAL_TTL_SECS }
    }
}

impl AuthConfig {
    /// Access tokens must live strictly shorter than renewal tokens, and
    /// both lifetimes must be positive.
    pub fn new(access_ttl_secs: i64, renewal_ttl_secs: i64) -> AppResult<Self> {
        if access_ttl_secs <= 0 || renewal_ttl_secs <= 0 {
            return Err(AppError::invalid("bad_ttl", "token lifetimes must be positive"));
        }
        if access_ttl_secs >= renewal_ttl_secs {
            return Err(AppError::invalid("bad_ttl", "access lifetime must be shorter than renewal lifetime"));
        }
        Ok(Self { access_ttl_secs, renewal_ttl_secs })
    }

    /// Environment overrides with defaults; invalid combinations fall back
    /// to the defaults rather than failing startup.
    pub fn from_env() -> Self {
        let access = std::env::var("KEYWARDEN_ACCESS_TTL_SECS").ok()
            .and_then(|s| s.parse::<i64>().ok()).unwrap_or(DEFAULT_ACCESS_TTL_SECS);
        let renewal = std::env::var("KEYWARDEN_RENEWAL_TTL_SECS").ok()
            .and_then(|s| s.parse::<i64>().ok()).unwrap_or(DEFAULT_RENEWAL_TTL_SECS);
        Self::new(access, renewal).unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_ordered() {
        let c = AuthConfig::default();
        assert!(c.access_ttl_secs < c.renewal_ttl_secs);
    }

    #[test]
    fn rejects_inverted_lifetimes() {
        assert!(AuthConfig::new(3600, 60).is_err());
        assert!(AuthConfig::new(60, 60).is_err());
        assert!(AuthConfig::new(0, 60).is_err());
        assert!(AuthConfig::new(-5, 60).is_err());
        assert!(AuthConfig::new(60, 3600).is_ok());
    }
}

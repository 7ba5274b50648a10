//! Signed session tokens. Access and renewal tokens are HS256 JWTs carrying
//! the subject id, a kind discriminator, issuance/expiry times and a random
//! `jti`, so two tokens issued back-to-back for one subject never collide.
//! Expiry is evaluated against the clock supplied at verification time.

use std::sync::Arc;

use base64::Engine;
use chrono::{DateTime, TimeZone, Utc};
use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;

use crate::config::AuthConfig;
use crate::error::{AppError, AppResult};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TokenKind {
    Access,
    Renewal,
}

impl TokenKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            TokenKind::Access => "access",
            TokenKind::Renewal => "renewal",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct Claims {
    sub: String,
    kind: TokenKind,
    iat: i64,
    exp: i64,
    jti: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum TokenError {
    #[error("token is malformed")]
    Malformed,
    #[error("token signature does not match any accepted key")]
    SignatureInvalid,
    #[error("token is expired")]
    Expired,
    #[error("token kind does not match the expected kind")]
    KindMismatch,
}

/// Injected signing-key capability. Process-wide state lives behind this
/// seam instead of a global: init at startup, immutable thereafter.
/// `accepted_verification_keys` may include retired keys so tokens signed
/// before a rotation keep verifying until natural expiry.
pub trait KeyProvider: Send + Sync {
    fn current_signing_key(&self) -> &[u8];
    fn accepted_verification_keys(&self) -> Vec<&[u8]>;
}

/// Single current secret plus optional retired ones.
pub struct StaticKeyProvider {
    current: Vec<u8>,
    retired: Vec<Vec<u8>>,
}

impl StaticKeyProvider {
    pub fn new(secret: impl Into<Vec<u8>>) -> Self {
        Self { current: secret.into(), retired: Vec::new() }
    }

    pub fn with_retired(mut self, retired: impl Into<Vec<u8>>) -> Self {
        self.retired.push(retired.into());
        self
    }

    /// `KEYWARDEN_TOKEN_SECRET`, or a random per-process secret when unset
    /// (tokens then survive only as long as the process; fine for dev).
    pub fn from_env() -> AppResult<Self> {
        if let Ok(secret) = std::env::var("KEYWARDEN_TOKEN_SECRET") {
            if !secret.is_empty() {
                return Ok(Self::new(secret.into_bytes()));
            }
        }
        tracing::warn!(target: "keywarden::auth", "KEYWARDEN_TOKEN_SECRET not set; using a random per-process signing key");
        let mut buf = [0u8; 32];
        getrandom::getrandom(&mut buf)
            .map_err(|e| AppError::internal("keygen_failed".to_string(), e.to_string()))?;
        Ok(Self::new(buf.to_vec()))
    }
}

impl KeyProvider for StaticKeyProvider {
    fn current_signing_key(&self) -> &[u8] {
        &self.current
    }

    fn accepted_verification_keys(&self) -> Vec<&[u8]> {
        let mut keys: Vec<&[u8]> = vec![&self.current];
        keys.extend(self.retired.iter().map(|k| k.as_slice()));
        keys
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IssuedToken {
    pub token: String,
    pub expires_at: DateTime<Utc>,
}

// 128-bit random id, base64url without padding
fn fresh_jti() -> AppResult<String> {
    let mut buf = [0u8; 16];
    getrandom::getrandom(&mut buf)
        .map_err(|e| AppError::internal("jti_failed".to_string(), e.to_string()))?;
    Ok(base64::engine::general_purpose::URL_SAFE_NO_PAD.encode(buf))
}

pub struct TokenIssuer {
    keys: Arc<dyn KeyProvider>,
    config: AuthConfig,
}

impl TokenIssuer {
    pub fn new(keys: Arc<dyn KeyProvider>, config: AuthConfig) -> Self {
        Self { keys, config }
    }

    pub fn issue_access(&self, subject: &str) -> AppResult<IssuedToken> {
        self.issue(subject, TokenKind::Access, self.config.access_ttl_secs)
    }

    pub fn issue_renewal(&self, subject: &str) -> AppResult<IssuedToken> {
        self.issue(subject, TokenKind::Renewal, self.config.renewal_ttl_secs)
    }

    fn issue(&self, subject: &str, kind: TokenKind, ttl_secs: i64) -> AppResult<IssuedToken> {
        let now = Utc::now().timestamp();
        let exp = now + ttl_secs;
        let claims = Claims {
            sub: subject.to_string(),
            kind,
            iat: now,
            exp,
            jti: fresh_jti()?,
        };
        let token = encode(
            &Header::new(Algorithm::HS256),
            &claims,
            &EncodingKey::from_secret(self.keys.current_signing_key()),
        )
        .map_err(|e| AppError::internal("token_sign_failed".to_string(), e.to_string()))?;
        debug!(target: "keywarden::token", "issued kind={} sub={} exp={}", kind.as_str(), subject, exp);
        Ok(IssuedToken { token, expires_at: Utc.timestamp_opt(exp, 0).single().unwrap_or_else(Utc::now) })
    }
}

pub struct TokenVerifier {
    keys: Arc<dyn KeyProvider>,
}

impl TokenVerifier {
    pub fn new(keys: Arc<dyn KeyProvider>) -> Self {
        Self { keys }
    }

    /// Validate against the system clock.
    pub fn verify(&self, token: &str, expected_kind: TokenKind) -> Result<String, TokenError> {
        self.verify_at(token, expected_kind, Utc::now().timestamp())
    }

    /// Validate signature, expiry and kind against a caller-supplied clock,
    /// returning the subject id. Never touches the identity store.
    pub fn verify_at(
        &self,
        token: &str,
        expected_kind: TokenKind,
        now_ts: i64,
    ) -> Result<String, TokenError> {
        // Expiry is checked below against `now_ts`, not by the decoder.
        let mut validation = Validation::new(Algorithm::HS256);
        validation.validate_exp = false;
        validation.required_spec_claims.clear();

        let mut bad_signature = false;
        for key in self.keys.accepted_verification_keys() {
            match decode::<Claims>(token, &DecodingKey::from_secret(key), &validation) {
                Ok(data) => {
                    let claims = data.claims;
                    if now_ts >= claims.exp {
                        return Err(TokenError::Expired);
                    }
                    if claims.kind != expected_kind {
                        return Err(TokenError::KindMismatch);
                    }
                    return Ok(claims.sub);
                }
                Err(e) => match e.kind() {
                    jsonwebtoken::errors::ErrorKind::InvalidSignature => {
                        bad_signature = true;
                    }
                    _ => return Err(TokenError::Malformed),
                },
            }
        }
        if bad_signature {
            Err(TokenError::SignatureInvalid)
        } else {
            // No key decoded it and none flagged the signature: either the
            // provider has no keys or the token never parsed.
            Err(TokenError::Malformed)
        }
    }
}

//! Session orchestration: credential verification, token-pair issuance,
//! rotation and revocation. States per session run
//! Anonymous -> Authenticated -> Revoked, with re-entry via fresh login.
//!
//! Access tokens are stateless: logout cannot recall one before natural
//! expiry. Revocation bites on renewal tokens only, through the stored
//! per-identity value and the repository's conditional update.

use std::sync::Arc;

use tracing::{debug, info};

use crate::config::AuthConfig;
use crate::error::{AppError, AppResult};
use crate::security;

use super::record::{normalize_ident, IdentityView, NewIdentity};
use super::repository::{IdentityRepository, RenewalGuard};
use super::token::{IssuedToken, KeyProvider, TokenIssuer, TokenKind, TokenVerifier};

#[derive(Debug, Clone)]
pub struct LoginRequest {
    pub username: Option<String>,
    pub email: Option<String>,
    pub secret: String,
}

#[derive(Debug, Clone)]
pub struct LoginResponse {
    pub access: IssuedToken,
    pub renewal: IssuedToken,
    pub identity: IdentityView,
}

#[derive(Debug, Clone)]
pub struct TokenPair {
    pub access: IssuedToken,
    pub renewal: IssuedToken,
}

#[derive(Debug, Clone)]
pub struct RegisterRequest {
    pub username: String,
    pub email: String,
    pub secret: String,
    pub display_name: String,
    /// Opaque locators (avatar, cover image, ...). Upload/storage is the
    /// caller's concern; this core never dereferences them.
    pub asset_refs: Vec<String>,
}

pub struct SessionCoordinator {
    repo: Arc<dyn IdentityRepository>,
    issuer: TokenIssuer,
    verifier: TokenVerifier,
}

impl SessionCoordinator {
    pub fn new(repo: Arc<dyn IdentityRepository>, keys: Arc<dyn KeyProvider>, config: AuthConfig) -> Self {
        Self {
            repo,
            issuer: TokenIssuer::new(keys.clone(), config),
            verifier: TokenVerifier::new(keys),
        }
    }

    /// Verify credential, issue a token pair, persist the renewal value.
    /// Unknown identity and wrong secret surface the identical error shape;
    /// only the internal log line tells them apart.
    pub fn login(&self, req: &LoginRequest) -> AppResult<LoginResponse> {
        let username = req.username.as_deref().map(normalize_ident).filter(|s| !s.is_empty());
        let email = req.email.as_deref().map(normalize_ident).filter(|s| !s.is_empty());
        if username.is_none() && email.is_none() {
            return Err(AppError::invalid("missing_identifier", "a username or email is required"));
        }

        let found = self.repo.find_by_username_or_email(username.as_deref(), email.as_deref())?;
        let Some(record) = found else {
            debug!(target: "keywarden::auth", "login rejected: no identity for username={:?} email={:?}", username, email);
            return Err(AppError::bad_credentials());
        };
        if !security::verify_password(&record.credential_digest, &req.secret) {
            debug!(target: "keywarden::auth", "login rejected: secret mismatch user={}", record.username);
            return Err(AppError::bad_credentials());
        }

        let pair = self.issue_pair(&record.id)?;
        // A fresh login always wins: the overwrite revokes any prior renewal
        // chain for this identity. Tokens that were not durably recorded must
        // never reach the caller, so a failed write is fatal here.
        let stored = self.repo.compare_and_set_renewal_token(
            &record.id,
            RenewalGuard::Any,
            Some(&pair.renewal.token),
        )?;
        if !stored {
            return Err(AppError::internal(
                "renewal_persist_failed",
                "could not record the renewal token",
            ));
        }
        info!(target: "keywarden::auth", "auth.login user={} id={}", record.username, record.id);
        Ok(LoginResponse { access: pair.access, renewal: pair.renewal, identity: record.view() })
    }

    /// Rotate a renewal token: the presented value must verify AND still be
    /// the stored one, and the swap to the fresh value is conditional on the
    /// presented value. Two renewals racing on one token: exactly one wins,
    /// the loser gets Unauthorized and is never retried here.
    pub fn renew(&self, presented: &str) -> AppResult<TokenPair> {
        let subject = self.verifier.verify(presented, TokenKind::Renewal).map_err(|e| {
            debug!(target: "keywarden::auth", "renew rejected: {}", e);
            AppError::unauthorized("invalid_renewal_token".to_string(), e.to_string())
        })?;
        let record = self
            .repo
            .find_by_id(&subject)?
            .ok_or_else(|| AppError::not_found("unknown_identity", "no identity for token subject"))?;

        // Revocation check: logout cleared it, or a prior rotation replaced it.
        if record.renewal_token.as_deref() != Some(presented) {
            debug!(target: "keywarden::auth", "renew rejected: stale token id={}", record.id);
            return Err(AppError::unauthorized("stale_renewal_token", "renewal token is no longer active"));
        }

        let pair = self.issue_pair(&record.id)?;
        let rotated = self.repo.compare_and_set_renewal_token(
            &record.id,
            RenewalGuard::Equals(presented),
            Some(&pair.renewal.token),
        )?;
        if !rotated {
            // A concurrent renewal or logout got there first.
            debug!(target: "keywarden::auth", "renew rejected: lost rotation race id={}", record.id);
            return Err(AppError::unauthorized("stale_renewal_token", "renewal token is no longer active"));
        }
        info!(target: "keywarden::auth", "auth.renew id={}", record.id);
        Ok(pair)
    }

    /// Clear the stored renewal value. Idempotent; a second logout or an
    /// unknown subject is not an error. Already-issued access tokens keep
    /// verifying until they expire.
    pub fn logout(&self, subject: &str) -> AppResult<()> {
        let _ = self.repo.compare_and_set_renewal_token(subject, RenewalGuard::Any, None)?;
        info!(target: "keywarden::auth", "auth.logout id={}", subject);
        Ok(())
    }

    /// Stateless access check: signature + expiry + kind, no store lookup.
    pub fn authenticate(&self, access_token: &str) -> AppResult<String> {
        self.verifier.verify(access_token, TokenKind::Access).map_err(|e| {
            debug!(target: "keywarden::auth", "authenticate rejected: {}", e);
            AppError::unauthorized("invalid_access_token".to_string(), e.to_string())
        })
    }

    /// Registration: normalize, validate, hash, create. The repository's own
    /// uniqueness check closes the create/create race; the pre-check here
    /// exists to give the common duplicate a clean Conflict without hashing.
    pub fn register(&self, req: &RegisterRequest) -> AppResult<IdentityView> {
        let username = normalize_ident(&req.username);
        let email = normalize_ident(&req.email);
        let display_name = req.display_name.trim();
        if username.is_empty() || email.is_empty() || display_name.is_empty() || req.secret.is_empty() {
            return Err(AppError::invalid(
                "missing_field",
                "username, email, display name and password are all required",
            ));
        }
        if self.repo.find_by_username_or_email(Some(&username), Some(&email))?.is_some() {
            return Err(AppError::conflict(
                "identity_exists",
                "an identity with that username or email already exists",
            ));
        }
        let digest = security::hash_password(&req.secret)
            .map_err(|e| AppError::internal("hash_failed".to_string(), e.to_string()))?;
        let record = self.repo.create(NewIdentity {
            username,
            email,
            credential_digest: digest,
            display_name: display_name.to_string(),
            asset_refs: req.asset_refs.clone(),
        })?;
        info!(target: "keywarden::auth", "auth.register user={} id={}", record.username, record.id);
        Ok(record.view())
    }

    fn issue_pair(&self, subject: &str) -> AppResult<TokenPair> {
        let access = self.issuer.issue_access(subject)?;
        let renewal = self.issuer.issue_renewal(subject)?;
        Ok(TokenPair { access, renewal })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::AppError;
    use crate::identity::record::IdentityRecord;
    use crate::identity::repository::MemoryRepository;
    use crate::identity::token::StaticKeyProvider;

    fn coordinator() -> (Arc<MemoryRepository>, SessionCoordinator) {
        let repo = Arc::new(MemoryRepository::new());
        let keys: Arc<dyn KeyProvider> = Arc::new(StaticKeyProvider::new(b"unit-secret".to_vec()));
        let coord =
            SessionCoordinator::new(repo.clone(), keys, AuthConfig::new(60, 3600).unwrap());
        (repo, coord)
    }

    fn register_ada(coord: &SessionCoordinator) -> IdentityView {
        coord
            .register(&RegisterRequest {
                username: "Ada".into(),
                email: "Ada@X.IO".into(),
                secret: "S3cret!".into(),
                display_name: "Ada Lovelace".into(),
                asset_refs: vec!["avatars/ada.png".into()],
            })
            .unwrap()
    }

    fn login_ada(coord: &SessionCoordinator) -> LoginResponse {
        coord
            .login(&LoginRequest {
                username: Some("ada".into()),
                email: None,
                secret: "S3cret!".into(),
            })
            .unwrap()
    }

    #[test]
    fn login_persists_the_returned_renewal_token() {
        let (repo, coord) = coordinator();
        register_ada(&coord);
        let resp = login_ada(&coord);
        let stored = repo.find_by_id(&resp.identity.id).unwrap().unwrap().renewal_token;
        assert_eq!(stored.as_deref(), Some(resp.renewal.token.as_str()));
    }

    #[test]
    fn login_by_email_alone_works() {
        let (_, coord) = coordinator();
        register_ada(&coord);
        let resp = coord
            .login(&LoginRequest { username: None, email: Some(" ADA@x.io ".into()), secret: "S3cret!".into() })
            .unwrap();
        assert_eq!(resp.identity.username, "ada");
    }

    #[test]
    fn login_without_identifier_is_invalid_request() {
        let (_, coord) = coordinator();
        register_ada(&coord);
        let err = coord
            .login(&LoginRequest { username: None, email: Some("  ".into()), secret: "S3cret!".into() })
            .unwrap_err();
        assert_eq!(err.http_status(), 400);
    }

    #[test]
    fn unknown_user_and_wrong_secret_are_indistinguishable() {
        let (_, coord) = coordinator();
        register_ada(&coord);
        let unknown = coord
            .login(&LoginRequest { username: Some("bob".into()), email: None, secret: "S3cret!".into() })
            .unwrap_err();
        let wrong = coord
            .login(&LoginRequest { username: Some("ada".into()), email: None, secret: "nope".into() })
            .unwrap_err();
        assert_eq!(unknown, wrong);
        assert_eq!(unknown, AppError::bad_credentials());
    }

    #[test]
    fn renew_rotates_and_stales_the_old_token() {
        let (repo, coord) = coordinator();
        register_ada(&coord);
        let resp = login_ada(&coord);

        let pair = coord.renew(&resp.renewal.token).unwrap();
        assert_ne!(pair.renewal.token, resp.renewal.token);
        let stored = repo.find_by_id(&resp.identity.id).unwrap().unwrap().renewal_token;
        assert_eq!(stored.as_deref(), Some(pair.renewal.token.as_str()));

        // the original, now rotated-out token is rejected
        let err = coord.renew(&resp.renewal.token).unwrap_err();
        assert_eq!(err.http_status(), 401);
    }

    #[test]
    fn renew_rejects_an_access_token() {
        let (_, coord) = coordinator();
        register_ada(&coord);
        let resp = login_ada(&coord);
        let err = coord.renew(&resp.access.token).unwrap_err();
        assert_eq!(err.http_status(), 401);
    }

    #[test]
    fn logout_revokes_renewal_and_is_idempotent() {
        let (repo, coord) = coordinator();
        register_ada(&coord);
        let resp = login_ada(&coord);

        coord.logout(&resp.identity.id).unwrap();
        assert!(repo.find_by_id(&resp.identity.id).unwrap().unwrap().renewal_token.is_none());
        coord.logout(&resp.identity.id).unwrap();
        coord.logout("never-existed").unwrap();

        let err = coord.renew(&resp.renewal.token).unwrap_err();
        assert_eq!(err.http_status(), 401);
    }

    #[test]
    fn access_tokens_survive_logout_until_expiry() {
        let (_, coord) = coordinator();
        register_ada(&coord);
        let resp = login_ada(&coord);
        coord.logout(&resp.identity.id).unwrap();
        // documented gap: stateless access tokens cannot be recalled
        assert_eq!(coord.authenticate(&resp.access.token).unwrap(), resp.identity.id);
    }

    #[test]
    fn second_login_revokes_the_first_renewal_chain() {
        let (_, coord) = coordinator();
        register_ada(&coord);
        let first = login_ada(&coord);
        let _second = login_ada(&coord);
        let err = coord.renew(&first.renewal.token).unwrap_err();
        assert_eq!(err.http_status(), 401);
    }

    #[test]
    fn register_validates_and_detects_duplicates() {
        let (_, coord) = coordinator();
        let view = register_ada(&coord);
        assert_eq!(view.username, "ada");
        assert_eq!(view.email, "ada@x.io");

        let dup = coord
            .register(&RegisterRequest {
                username: "ADA".into(),
                email: "elsewhere@x.io".into(),
                secret: "pw".into(),
                display_name: "Someone".into(),
                asset_refs: vec![],
            })
            .unwrap_err();
        assert_eq!(dup.http_status(), 409);

        let blank = coord
            .register(&RegisterRequest {
                username: "  ".into(),
                email: "b@x.io".into(),
                secret: "pw".into(),
                display_name: "B".into(),
                asset_refs: vec![],
            })
            .unwrap_err();
        assert_eq!(blank.http_status(), 400);
    }

    // Repository stub whose conditional update always fails, to exercise the
    // tokens-must-be-durably-recorded rule.
    struct BrokenCas(MemoryRepository);

    impl IdentityRepository for BrokenCas {
        fn find_by_username_or_email(
            &self,
            username: Option<&str>,
            email: Option<&str>,
        ) -> AppResult<Option<IdentityRecord>> {
            self.0.find_by_username_or_email(username, email)
        }
        fn find_by_id(&self, id: &str) -> AppResult<Option<IdentityRecord>> {
            self.0.find_by_id(id)
        }
        fn compare_and_set_renewal_token(
            &self,
            _id: &str,
            _guard: RenewalGuard<'_>,
            _new_value: Option<&str>,
        ) -> AppResult<bool> {
            Err(AppError::internal("store_down", "write failed"))
        }
        fn create(&self, new: NewIdentity) -> AppResult<IdentityRecord> {
            self.0.create(new)
        }
    }

    #[test]
    fn login_with_failed_persistence_is_internal_and_returns_no_tokens() {
        let repo = Arc::new(BrokenCas(MemoryRepository::new()));
        let keys: Arc<dyn KeyProvider> = Arc::new(StaticKeyProvider::new(b"unit-secret".to_vec()));
        let coord = SessionCoordinator::new(repo, keys, AuthConfig::default());
        coord
            .register(&RegisterRequest {
                username: "ada".into(),
                email: "ada@x.io".into(),
                secret: "S3cret!".into(),
                display_name: "Ada".into(),
                asset_refs: vec![],
            })
            .unwrap();
        let err = coord
            .login(&LoginRequest { username: Some("ada".into()), email: None, secret: "S3cret!".into() })
            .unwrap_err();
        assert!(err.is_fatal());
    }
}

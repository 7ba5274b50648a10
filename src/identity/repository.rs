use std::collections::HashMap;

use chrono::Utc;
use parking_lot::RwLock;

use crate::error::{AppError, AppResult};

use super::record::{normalize_ident, IdentityRecord, NewIdentity};

/// Precondition for a renewal-token mutation. The repository applies guard
/// and write as one atomic step; callers never read-then-write.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RenewalGuard<'a> {
    /// Unconditional: fresh login overwrite, logout clear.
    Any,
    /// Rotate only while the stored value still equals this one. A stale or
    /// already-rotated token observes a conflict.
    Equals(&'a str),
}

/// Abstract identity store. Implementations must make
/// `compare_and_set_renewal_token` atomic with respect to concurrent calls
/// for the same id; that primitive is the only synchronization boundary in
/// this core.
pub trait IdentityRepository: Send + Sync {
    /// Lookup by normalized username or email; either field alone suffices.
    fn find_by_username_or_email(
        &self,
        username: Option<&str>,
        email: Option<&str>,
    ) -> AppResult<Option<IdentityRecord>>;

    fn find_by_id(&self, id: &str) -> AppResult<Option<IdentityRecord>>;

    /// Returns Ok(false) when the guard does not hold (conflict — the caller
    /// must treat the presented token as revoked/stale) or when no record
    /// with this id exists. Errors are reserved for store failures.
    fn compare_and_set_renewal_token(
        &self,
        id: &str,
        guard: RenewalGuard<'_>,
        new_value: Option<&str>,
    ) -> AppResult<bool>;

    /// Invoked by registration only, after the credential has been hashed.
    fn create(&self, new: NewIdentity) -> AppResult<IdentityRecord>;
}

#[derive(Default)]
struct MemoryInner {
    records: HashMap<String, IdentityRecord>,
    by_username: HashMap<String, String>,
    by_email: HashMap<String, String>,
}

/// In-process store over a single RwLock. Used by tests and by embedders
/// without an external record store; the CAS runs under the write lock.
#[derive(Default)]
pub struct MemoryRepository {
    inner: RwLock<MemoryInner>,
}

impl MemoryRepository {
    pub fn new() -> Self {
        Self::default()
    }
}

impl IdentityRepository for MemoryRepository {
    fn find_by_username_or_email(
        &self,
        username: Option<&str>,
        email: Option<&str>,
    ) -> AppResult<Option<IdentityRecord>> {
        let inner = self.inner.read();
        let id = username
            .map(normalize_ident)
            .and_then(|u| inner.by_username.get(&u))
            .or_else(|| email.map(normalize_ident).and_then(|e| inner.by_email.get(&e)));
        Ok(id.and_then(|id| inner.records.get(id)).cloned())
    }

    fn find_by_id(&self, id: &str) -> AppResult<Option<IdentityRecord>> {
        Ok(self.inner.read().records.get(id).cloned())
    }

    fn compare_and_set_renewal_token(
        &self,
        id: &str,
        guard: RenewalGuard<'_>,
        new_value: Option<&str>,
    ) -> AppResult<bool> {
        let mut inner = self.inner.write();
        let Some(rec) = inner.records.get_mut(id) else {
            return Ok(false);
        };
        let holds = match guard {
            RenewalGuard::Any => true,
            RenewalGuard::Equals(expected) => rec.renewal_token.as_deref() == Some(expected),
        };
        if !holds {
            return Ok(false);
        }
        rec.renewal_token = new_value.map(|v| v.to_string());
        rec.updated_at = Utc::now();
        Ok(true)
    }

    fn create(&self, new: NewIdentity) -> AppResult<IdentityRecord> {
        let username = normalize_ident(&new.username);
        let email = normalize_ident(&new.email);
        if username.is_empty() || email.is_empty() {
            return Err(AppError::invalid("missing_field", "username and email are required"));
        }
        if new.credential_digest.is_empty() {
            return Err(AppError::invalid("missing_digest", "credential digest is required"));
        }
        let mut inner = self.inner.write();
        if inner.by_username.contains_key(&username) || inner.by_email.contains_key(&email) {
            return Err(AppError::conflict(
                "identity_exists",
                "an identity with that username or email already exists",
            ));
        }
        let now = Utc::now();
        let rec = IdentityRecord {
            id: uuid::Uuid::new_v4().to_string(),
            username: username.clone(),
            email: email.clone(),
            credential_digest: new.credential_digest,
            display_name: new.display_name,
            asset_refs: new.asset_refs,
            renewal_token: None,
            created_at: now,
            updated_at: now,
        };
        inner.by_username.insert(username, rec.id.clone());
        inner.by_email.insert(email, rec.id.clone());
        inner.records.insert(rec.id.clone(), rec.clone());
        Ok(rec)
    }
}

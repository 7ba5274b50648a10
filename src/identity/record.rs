use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Canonical form for usernames and emails: trimmed and case-folded.
/// Uniqueness and lookups are defined over this form only.
pub fn normalize_ident(raw: &str) -> String {
    raw.trim().to_lowercase()
}

/// Durable representation of one registered principal. The credential digest
/// is the PHC string produced by `security::hash_password`; the plaintext
/// secret is never stored. `renewal_token` holds the single currently-live
/// renewal token for this identity, or None when no renewable session exists.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IdentityRecord {
    pub id: String,
    pub username: String,
    pub email: String,
    pub credential_digest: String,
    pub display_name: String,
    pub asset_refs: Vec<String>,
    pub renewal_token: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl IdentityRecord {
    /// Sanitized projection handed back to callers. Excludes the credential
    /// digest and the stored renewal token.
    pub fn view(&self) -> IdentityView {
        IdentityView {
            id: self.id.clone(),
            username: self.username.clone(),
            email: self.email.clone(),
            display_name: self.display_name.clone(),
            asset_refs: self.asset_refs.clone(),
            created_at: self.created_at,
            updated_at: self.updated_at,
        }
    }
}

/// Input to `IdentityRepository::create`. Fields are expected already
/// normalized and the digest already hashed; registration owns both steps.
#[derive(Debug, Clone)]
pub struct NewIdentity {
    pub username: String,
    pub email: String,
    pub credential_digest: String,
    pub display_name: String,
    pub asset_refs: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct IdentityView {
    pub id: String,
    pub username: String,
    pub email: String,
    pub display_name: String,
    #[serde(default)]
    pub asset_refs: Vec<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalization_trims_and_casefolds() {
        assert_eq!(normalize_ident("  Ada "), "ada");
        assert_eq!(normalize_ident("Ada@X.IO"), "ada@x.io");
        assert_eq!(normalize_ident("   "), "");
    }

    #[test]
    fn view_excludes_secret_material() {
        let rec = IdentityRecord {
            id: "id-1".into(),
            username: "ada".into(),
            email: "ada@x.io".into(),
            credential_digest: "$argon2id$...".into(),
            display_name: "Ada".into(),
            asset_refs: vec!["avatars/ada.png".into()],
            renewal_token: Some("tok".into()),
            created_at: Utc::now(),
            updated_at: Utc::now(),
        };
        let v = serde_json::to_value(rec.view()).unwrap();
        let obj = v.as_object().unwrap();
        assert!(obj.contains_key("username"));
        assert!(!obj.contains_key("credential_digest"));
        assert!(!obj.contains_key("renewal_token"));
    }
}

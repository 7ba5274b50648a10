//! Identity verification and session-token lifecycle.
//! Keep the public surface thin and split implementation across sub-modules.

mod record;
mod repository;
mod session;
mod token;

pub use record::{normalize_ident, IdentityRecord, IdentityView, NewIdentity};
pub use repository::{IdentityRepository, MemoryRepository, RenewalGuard};
pub use session::{LoginRequest, LoginResponse, RegisterRequest, SessionCoordinator, TokenPair};
pub use token::{
    IssuedToken, KeyProvider, StaticKeyProvider, TokenError, TokenIssuer, TokenKind, TokenVerifier,
};

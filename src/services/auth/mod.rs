pub mod authenticator;
pub mod claims;
pub mod claims_cache;
pub mod clock;
pub mod error;
pub mod factory;
pub mod key_store;
pub mod revocation;
pub mod sources;
pub mod verifier;

pub use authenticator::{Authenticator, AuthenticatorConfig};
pub use claims::Claims;
pub use error::{AuthError, AuthErrorKind, VerificationError};
pub use factory::build_authenticator;

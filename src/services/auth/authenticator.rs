use std::{sync::Arc, time::Duration};

use tracing::debug;

use crate::services::auth::{
    claims::Claims,
    claims_cache::{ClaimsCache, DEFAULT_CACHE_MAX_ENTRIES, DEFAULT_CACHE_MAX_TTL},
    clock::Clock,
    error::AuthError,
    key_store::KeyStore,
    revocation::RevocationFilter,
    verifier::{Verifier, VerifierPolicy},
};

/// Everything the authenticator needs to know, passed in at construction.
#[derive(Debug, Clone)]
pub struct AuthenticatorConfig {
    pub clock_skew: Duration,
    pub issuer: Option<String>,
    pub audience: Option<String>,
    pub default_key_id: Option<String>,
    pub cache_max_entries: u64,
    pub cache_max_ttl: Duration,
}

impl Default for AuthenticatorConfig {
    fn default() -> Self {
        Self {
            clock_skew: Duration::ZERO,
            issuer: None,
            audience: None,
            default_key_id: None,
            cache_max_entries: DEFAULT_CACHE_MAX_ENTRIES,
            cache_max_ttl: DEFAULT_CACHE_MAX_TTL,
        }
    }
}

/// Cache → verify → revocation pipeline behind a single `authenticate` call.
#[derive(Debug)]
pub struct Authenticator {
    verifier: Verifier,
    cache: Arc<ClaimsCache>,
    keys: Arc<KeyStore>,
    revocations: Arc<RevocationFilter>,
}

impl Authenticator {
    pub fn new(
        config: AuthenticatorConfig,
        keys: Arc<KeyStore>,
        revocations: Arc<RevocationFilter>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let policy = VerifierPolicy {
            clock_skew_seconds: config.clock_skew.as_secs(),
            issuer: config.issuer,
            audience: config.audience,
            default_key_id: config.default_key_id,
        };
        let cache = Arc::new(ClaimsCache::new(
            config.cache_max_entries,
            config.cache_max_ttl,
            clock.clone(),
        ));

        Self {
            verifier: Verifier::new(keys.clone(), clock, policy),
            cache,
            keys,
            revocations,
        }
    }

    /// The token is taken as-is; only an empty string counts as missing.
    pub fn authenticate(&self, token: &str) -> Result<Claims, AuthError> {
        if token.is_empty() {
            return Err(AuthError::MissingToken);
        }

        let claims = match self.cache.lookup(token) {
            Some(claims) => claims,
            None => {
                // Failures are never cached: a key rotated in later must get a fresh look.
                let claims = self.verifier.verify(token).inspect_err(|err| {
                    debug!(reason = %err, "token verification failed");
                })?;
                self.cache.store(token, &claims);
                claims
            }
        };

        // Checked on hits too, so a revocation takes effect on the very next call.
        let revoked = self.revocations.is_revoked(&claims.sub, claims.iat)
            || claims
                .token_id()
                .is_some_and(|jti| self.revocations.is_token_revoked(jti));
        if revoked {
            debug!(subject = %claims.sub, "token revoked");
            self.cache.invalidate(token);
            return Err(AuthError::Revoked);
        }

        Ok(claims)
    }

    pub fn cache(&self) -> &Arc<ClaimsCache> {
        &self.cache
    }

    pub fn keys(&self) -> &Arc<KeyStore> {
        &self.keys
    }

    pub fn revocations(&self) -> &Arc<RevocationFilter> {
        &self.revocations
    }
}

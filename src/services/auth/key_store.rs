//! Verification key store.
//!
//! Readers load an immutable snapshot (`ArcSwap`) and never take a lock.
//! Rotation clones the snapshot, appends the new key, prunes keys whose
//! validity window has elapsed and publishes the result in one atomic store.
//! A mutex serializes writers so two rotations cannot drop each other's keys.
use std::{collections::HashMap, fmt, sync::Arc};

use arc_swap::ArcSwap;
use jsonwebtoken::{Algorithm, DecodingKey};
use parking_lot::Mutex;
use thiserror::Error;
use tracing::{debug, info};

use crate::services::auth::clock::Clock;

#[derive(Debug, Error)]
pub enum KeyStoreError {
    #[error("signing key not found: {0}")]
    NotFound(String),
    #[error("signing key already present: {0}")]
    DuplicateKey(String),
    #[error("signing key validity window already elapsed: {0}")]
    AlreadyElapsed(String),
    #[error("invalid key material for {kid}: {reason}")]
    InvalidKeyMaterial { kid: String, reason: String },
}

/// A single verification key. Immutable once built.
///
/// Key material is intentionally not printable via Debug.
#[derive(Clone)]
pub struct VerificationKey {
    kid: String,
    algorithm: Algorithm,
    decoding_key: DecodingKey,
    not_before: Option<u64>,
    not_after: Option<u64>,
}

impl fmt::Debug for VerificationKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("VerificationKey")
            .field("kid", &self.kid)
            .field("algorithm", &self.algorithm)
            .field("not_before", &self.not_before)
            .field("not_after", &self.not_after)
            .finish()
    }
}

impl VerificationKey {
    /// Shared-secret key for the HS* family.
    pub fn hmac(
        kid: impl Into<String>,
        algorithm: Algorithm,
        secret: &[u8],
    ) -> Result<Self, KeyStoreError> {
        let kid = kid.into();
        if !matches!(
            algorithm,
            Algorithm::HS256 | Algorithm::HS384 | Algorithm::HS512
        ) {
            return Err(KeyStoreError::InvalidKeyMaterial {
                kid,
                reason: format!("{algorithm:?} is not an HMAC algorithm"),
            });
        }
        if secret.is_empty() {
            return Err(KeyStoreError::InvalidKeyMaterial {
                kid,
                reason: "empty secret".to_string(),
            });
        }

        Ok(Self::build(kid, algorithm, DecodingKey::from_secret(secret)))
    }

    /// Public key in PEM form for the RS*/PS*, ES* and EdDSA families.
    pub fn from_pem(
        kid: impl Into<String>,
        algorithm: Algorithm,
        pem: &str,
    ) -> Result<Self, KeyStoreError> {
        let kid = kid.into();
        let pem = pem.as_bytes();

        let decoded = match algorithm {
            Algorithm::RS256
            | Algorithm::RS384
            | Algorithm::RS512
            | Algorithm::PS256
            | Algorithm::PS384
            | Algorithm::PS512 => DecodingKey::from_rsa_pem(pem),
            Algorithm::ES256 | Algorithm::ES384 => DecodingKey::from_ec_pem(pem),
            Algorithm::EdDSA => DecodingKey::from_ed_pem(pem),
            other => {
                return Err(KeyStoreError::InvalidKeyMaterial {
                    kid,
                    reason: format!("{other:?} does not use a PEM public key"),
                });
            }
        };

        let decoding_key = decoded.map_err(|e| KeyStoreError::InvalidKeyMaterial {
            kid: kid.clone(),
            reason: e.to_string(),
        })?;

        Ok(Self::build(kid, algorithm, decoding_key))
    }

    fn build(kid: String, algorithm: Algorithm, decoding_key: DecodingKey) -> Self {
        Self {
            kid,
            algorithm,
            decoding_key,
            not_before: None,
            not_after: None,
        }
    }

    pub fn with_validity(mut self, not_before: Option<u64>, not_after: Option<u64>) -> Self {
        self.not_before = not_before;
        self.not_after = not_after;
        self
    }

    pub fn kid(&self) -> &str {
        &self.kid
    }

    pub fn algorithm(&self) -> Algorithm {
        self.algorithm
    }

    pub fn decoding_key(&self) -> &DecodingKey {
        &self.decoding_key
    }

    pub fn not_before(&self) -> Option<u64> {
        self.not_before
    }

    pub fn not_after(&self) -> Option<u64> {
        self.not_after
    }

    pub fn is_valid_at(&self, now: u64) -> bool {
        self.not_before.is_none_or(|nbf| now >= nbf) && !self.has_elapsed(now)
    }

    pub fn has_elapsed(&self, now: u64) -> bool {
        self.not_after.is_some_and(|na| now > na)
    }
}

#[derive(Debug, Default)]
struct KeySet {
    keys: HashMap<String, Arc<VerificationKey>>,
    // Most recently rotated-in key; every other key is retiring.
    current: Option<String>,
}

pub struct KeyStore {
    snapshot: ArcSwap<KeySet>,
    rotate_lock: Mutex<()>,
    clock: Arc<dyn Clock>,
}

impl fmt::Debug for KeyStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let set = self.snapshot.load();
        f.debug_struct("KeyStore")
            .field("keys", &set.keys.len())
            .field("current", &set.current)
            .finish()
    }
}

impl KeyStore {
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self {
            snapshot: ArcSwap::from_pointee(KeySet::default()),
            rotate_lock: Mutex::new(()),
            clock,
        }
    }

    /// Build a store from an initial key list, rotating them in order.
    pub fn with_keys(
        clock: Arc<dyn Clock>,
        keys: impl IntoIterator<Item = VerificationKey>,
    ) -> Result<Self, KeyStoreError> {
        let store = Self::new(clock);
        for key in keys {
            store.rotate(key)?;
        }
        Ok(store)
    }

    /// Lock-free lookup of a key that is inside its validity window.
    pub fn get_key(&self, kid: &str) -> Result<Arc<VerificationKey>, KeyStoreError> {
        let now = self.clock.now();
        self.snapshot
            .load()
            .keys
            .get(kid)
            .filter(|key| key.is_valid_at(now))
            .cloned()
            .ok_or_else(|| KeyStoreError::NotFound(kid.to_string()))
    }

    /// Append `key` and make it current. Older keys stay until they elapse.
    pub fn rotate(&self, key: VerificationKey) -> Result<(), KeyStoreError> {
        let _guard = self.rotate_lock.lock();
        let now = self.clock.now();

        if key.has_elapsed(now) {
            return Err(KeyStoreError::AlreadyElapsed(key.kid));
        }

        let previous = self.snapshot.load_full();
        if previous.keys.contains_key(&key.kid) {
            return Err(KeyStoreError::DuplicateKey(key.kid));
        }

        let mut keys: HashMap<String, Arc<VerificationKey>> = previous
            .keys
            .iter()
            .filter(|(_, k)| !k.has_elapsed(now))
            .map(|(kid, k)| (kid.clone(), Arc::clone(k)))
            .collect();

        let pruned = previous.keys.len() - keys.len();
        if pruned > 0 {
            debug!(pruned, "pruned elapsed signing keys");
        }

        let kid = key.kid.clone();
        info!(kid = %kid, algorithm = ?key.algorithm, retiring = ?previous.current, "rotating in signing key");
        keys.insert(kid.clone(), Arc::new(key));

        self.snapshot.store(Arc::new(KeySet {
            keys,
            current: Some(kid),
        }));

        Ok(())
    }

    pub fn contains(&self, kid: &str) -> bool {
        self.snapshot.load().keys.contains_key(kid)
    }

    pub fn current_key_id(&self) -> Option<String> {
        self.snapshot.load().current.clone()
    }

    pub fn key_ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.snapshot.load().keys.keys().cloned().collect();
        ids.sort();
        ids
    }

    pub fn len(&self) -> usize {
        self.snapshot.load().keys.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

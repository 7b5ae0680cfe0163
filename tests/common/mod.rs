#![allow(dead_code)]

use std::sync::Arc;

use base64::{Engine as _, engine::general_purpose::URL_SAFE_NO_PAD};
use jsonwebtoken::{Algorithm, EncodingKey, Header};
use serde_json::Value;
use token_gate::services::auth::{
    Authenticator, AuthenticatorConfig,
    clock::ManualClock,
    key_store::{KeyStore, VerificationKey},
    revocation::RevocationFilter,
};

pub const K1_SECRET: &[u8] = b"k1-integration-secret";
pub const K2_SECRET: &[u8] = b"k2-integration-secret";

pub struct Harness {
    pub clock: Arc<ManualClock>,
    pub auth: Arc<Authenticator>,
}

pub fn harness(now: u64) -> Harness {
    harness_with(now, AuthenticatorConfig::default())
}

pub fn harness_with(now: u64, config: AuthenticatorConfig) -> Harness {
    let clock = Arc::new(ManualClock::new(now));
    let keys = KeyStore::with_keys(
        clock.clone(),
        [VerificationKey::hmac("k1", Algorithm::HS256, K1_SECRET).unwrap()],
    )
    .unwrap();
    let auth = Authenticator::new(
        config,
        Arc::new(keys),
        Arc::new(RevocationFilter::new()),
        clock.clone(),
    );
    Harness {
        clock,
        auth: Arc::new(auth),
    }
}

pub fn mint(kid: &str, secret: &[u8], payload: &Value) -> String {
    let mut header = Header::new(Algorithm::HS256);
    header.kid = Some(kid.to_string());
    jsonwebtoken::encode(&header, payload, &EncodingKey::from_secret(secret)).unwrap()
}

/// Flip one bit of the decoded signature and re-encode it.
pub fn flip_signature_bit(token: &str, byte: usize, bit: u8) -> String {
    let (signed, signature) = token.rsplit_once('.').unwrap();
    let mut raw = URL_SAFE_NO_PAD.decode(signature).unwrap();
    raw[byte] ^= 1 << bit;
    format!("{signed}.{}", URL_SAFE_NO_PAD.encode(raw))
}

//! JWS compact token verification.
//!
//! Order of checks:
//! 1. structure (three base64url segments, decodable JOSE header)
//! 2. key resolution (`kid`, falling back to the configured default key id)
//! 3. algorithm pinning + signature (constant-time inside the crypto backend)
//! 4. payload decoding into [`Claims`]
//! 5. issuer / audience
//! 6. `exp` / `nbf` against the injected clock with skew tolerance
use std::{collections::HashSet, sync::Arc};

use base64::{Engine as _, engine::general_purpose::URL_SAFE_NO_PAD};
use jsonwebtoken::{Validation, errors::ErrorKind};
use tracing::trace;

use crate::services::auth::{
    claims::Claims, clock::Clock, error::VerificationError, key_store::KeyStore,
};

/// Verification policy. Timestamps are unix seconds.
#[derive(Debug, Clone, Default)]
pub struct VerifierPolicy {
    pub clock_skew_seconds: u64,
    pub issuer: Option<String>,
    pub audience: Option<String>,
    // Used when the token header carries no `kid`.
    pub default_key_id: Option<String>,
}

pub struct Verifier {
    keys: Arc<KeyStore>,
    clock: Arc<dyn Clock>,
    policy: VerifierPolicy,
}

impl std::fmt::Debug for Verifier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Verifier")
            .field("keys", &self.keys)
            .field("policy", &self.policy)
            .finish()
    }
}

impl Verifier {
    pub fn new(keys: Arc<KeyStore>, clock: Arc<dyn Clock>, policy: VerifierPolicy) -> Self {
        Self {
            keys,
            clock,
            policy,
        }
    }

    pub fn verify(&self, token: &str) -> Result<Claims, VerificationError> {
        check_structure(token)?;

        let header = jsonwebtoken::decode_header(token)
            .map_err(|_| VerificationError::MalformedToken("invalid header"))?;

        let kid = header
            .kid
            .as_deref()
            .or(self.policy.default_key_id.as_deref())
            .ok_or_else(|| VerificationError::UnknownKey("<none>".to_string()))?;

        let key = self
            .keys
            .get_key(kid)
            .map_err(|_| VerificationError::UnknownKey(kid.to_string()))?;

        // The key decides the algorithm, never the token.
        if header.alg != key.algorithm() {
            trace!(kid, declared = ?header.alg, expected = ?key.algorithm(), "algorithm mismatch");
            return Err(VerificationError::SignatureMismatch);
        }

        let mut validation = Validation::new(key.algorithm());
        validation.validate_exp = false;
        validation.validate_nbf = false;
        validation.validate_aud = false;
        validation.required_spec_claims = HashSet::new();

        let claims = jsonwebtoken::decode::<Claims>(token, key.decoding_key(), &validation)
            .map_err(|e| match e.kind() {
                ErrorKind::InvalidSignature
                | ErrorKind::InvalidAlgorithm
                | ErrorKind::InvalidKeyFormat => VerificationError::SignatureMismatch,
                ErrorKind::Json(_) | ErrorKind::Utf8(_) => {
                    VerificationError::MalformedClaims(e.to_string())
                }
                _ => VerificationError::MalformedToken("undecodable token"),
            })?
            .claims;

        if claims.sub.trim().is_empty() {
            return Err(VerificationError::MalformedClaims("empty 'sub'".to_string()));
        }

        if let Some(expected) = self.policy.issuer.as_deref() {
            if claims.iss.as_deref() != Some(expected) {
                return Err(VerificationError::InvalidIssuer);
            }
        }
        if let Some(expected) = self.policy.audience.as_deref() {
            if !claims.has_audience(expected) {
                return Err(VerificationError::InvalidAudience);
            }
        }

        self.check_time(&claims)?;

        Ok(claims)
    }

    fn check_time(&self, claims: &Claims) -> Result<(), VerificationError> {
        let now = self.clock.now();
        let skew = self.policy.clock_skew_seconds;

        if claims.exp.saturating_add(skew) < now {
            return Err(VerificationError::Expired);
        }
        if let Some(nbf) = claims.nbf {
            if nbf.saturating_sub(skew) > now {
                return Err(VerificationError::NotYetValid);
            }
        }
        Ok(())
    }
}

fn check_structure(token: &str) -> Result<(), VerificationError> {
    let mut segments = token.split('.');
    let (Some(header), Some(payload), Some(signature), None) = (
        segments.next(),
        segments.next(),
        segments.next(),
        segments.next(),
    ) else {
        return Err(VerificationError::MalformedToken("expected three segments"));
    };

    if header.is_empty() || payload.is_empty() {
        return Err(VerificationError::MalformedToken("empty segment"));
    }
    for segment in [header, payload, signature] {
        URL_SAFE_NO_PAD
            .decode(segment)
            .map_err(|_| VerificationError::MalformedToken("invalid base64url segment"))?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::auth::{clock::ManualClock, key_store::VerificationKey};
    use jsonwebtoken::{Algorithm, EncodingKey, Header};
    use serde_json::{Value, json};

    const SECRET: &[u8] = b"unit-test-secret";

    fn setup(now: u64, policy: VerifierPolicy) -> (Verifier, Arc<ManualClock>) {
        let clock = Arc::new(ManualClock::new(now));
        let keys = KeyStore::with_keys(
            clock.clone(),
            [VerificationKey::hmac("k1", Algorithm::HS256, SECRET).unwrap()],
        )
        .unwrap();
        (
            Verifier::new(Arc::new(keys), clock.clone(), policy),
            clock,
        )
    }

    fn sign(kid: Option<&str>, payload: &Value) -> String {
        let mut header = Header::new(Algorithm::HS256);
        header.kid = kid.map(str::to_string);
        jsonwebtoken::encode(&header, payload, &EncodingKey::from_secret(SECRET)).unwrap()
    }

    #[test]
    fn valid_token_yields_claims() {
        let (verifier, _) = setup(150, VerifierPolicy::default());
        let payload = json!({"sub": "u1", "iat": 100, "exp": 200, "role": "admin"});
        let claims = verifier.verify(&sign(Some("k1"), &payload)).unwrap();
        assert_eq!(serde_json::to_value(&claims).unwrap(), payload);
    }

    #[test]
    fn structure_errors_are_malformed_token() {
        let (verifier, _) = setup(150, VerifierPolicy::default());
        for token in ["", "abc", "a.b", "a.b.c.d", "!!.e30.", ".e30.sig"] {
            assert!(
                matches!(
                    verifier.verify(token),
                    Err(VerificationError::MalformedToken(_))
                ),
                "{token:?}"
            );
        }
    }

    #[test]
    fn unknown_or_missing_kid() {
        let (verifier, _) = setup(150, VerifierPolicy::default());
        let payload = json!({"sub": "u1", "iat": 100, "exp": 200});
        assert!(matches!(
            verifier.verify(&sign(Some("nope"), &payload)),
            Err(VerificationError::UnknownKey(kid)) if kid == "nope"
        ));
        assert!(matches!(
            verifier.verify(&sign(None, &payload)),
            Err(VerificationError::UnknownKey(_))
        ));
    }

    #[test]
    fn default_key_id_covers_headers_without_kid() {
        let policy = VerifierPolicy {
            default_key_id: Some("k1".to_string()),
            ..Default::default()
        };
        let (verifier, _) = setup(150, policy);
        let payload = json!({"sub": "u1", "iat": 100, "exp": 200});
        assert!(verifier.verify(&sign(None, &payload)).is_ok());
    }

    #[test]
    fn declared_algorithm_must_match_key() {
        let (verifier, _) = setup(150, VerifierPolicy::default());
        let mut header = Header::new(Algorithm::HS512);
        header.kid = Some("k1".to_string());
        let token = jsonwebtoken::encode(
            &header,
            &json!({"sub": "u1", "iat": 100, "exp": 200}),
            &EncodingKey::from_secret(SECRET),
        )
        .unwrap();
        assert_eq!(
            verifier.verify(&token),
            Err(VerificationError::SignatureMismatch)
        );
    }

    #[test]
    fn wrong_secret_is_signature_mismatch() {
        let (verifier, _) = setup(150, VerifierPolicy::default());
        let mut header = Header::new(Algorithm::HS256);
        header.kid = Some("k1".to_string());
        let token = jsonwebtoken::encode(
            &header,
            &json!({"sub": "u1", "iat": 100, "exp": 200}),
            &EncodingKey::from_secret(b"someone-else"),
        )
        .unwrap();
        assert_eq!(
            verifier.verify(&token),
            Err(VerificationError::SignatureMismatch)
        );
    }

    #[test]
    fn missing_required_claims_are_malformed_claims() {
        let (verifier, _) = setup(150, VerifierPolicy::default());
        for payload in [
            json!({"iat": 100, "exp": 200}),
            json!({"sub": "u1", "exp": 200}),
            json!({"sub": "u1", "iat": 100}),
            json!({"sub": "  ", "iat": 100, "exp": 200}),
            json!({"sub": "u1", "iat": 100, "exp": "soon"}),
            json!({"sub": "u1", "iat": 100, "exp": 200, "iss": null}),
            json!({"sub": "u1", "iat": 100, "exp": 200, "aud": null}),
        ] {
            assert!(
                matches!(
                    verifier.verify(&sign(Some("k1"), &payload)),
                    Err(VerificationError::MalformedClaims(_))
                ),
                "{payload}"
            );
        }
    }

    #[test]
    fn expiry_and_not_before() {
        let (verifier, clock) = setup(150, VerifierPolicy::default());
        let token = sign(Some("k1"), &json!({"sub": "u1", "iat": 100, "nbf": 120, "exp": 200}));

        assert!(verifier.verify(&token).is_ok());

        clock.set(200);
        assert!(verifier.verify(&token).is_ok());

        clock.set(201);
        assert_eq!(verifier.verify(&token), Err(VerificationError::Expired));

        clock.set(119);
        assert_eq!(verifier.verify(&token), Err(VerificationError::NotYetValid));
    }

    #[test]
    fn skew_tolerance_widens_both_edges() {
        let policy = VerifierPolicy {
            clock_skew_seconds: 30,
            ..Default::default()
        };
        let (verifier, clock) = setup(225, policy);
        let token = sign(Some("k1"), &json!({"sub": "u1", "iat": 100, "nbf": 120, "exp": 200}));
        assert!(verifier.verify(&token).is_ok());

        clock.set(95);
        assert!(verifier.verify(&token).is_ok());

        clock.set(231);
        assert_eq!(verifier.verify(&token), Err(VerificationError::Expired));
    }

    #[test]
    fn issuer_and_audience_checks() {
        let policy = VerifierPolicy {
            issuer: Some("gate".to_string()),
            audience: Some("api".to_string()),
            ..Default::default()
        };
        let (verifier, _) = setup(150, policy);

        let ok = sign(
            Some("k1"),
            &json!({"sub": "u1", "iat": 100, "exp": 200, "iss": "gate", "aud": ["api"]}),
        );
        assert!(verifier.verify(&ok).is_ok());

        let bad_iss = sign(
            Some("k1"),
            &json!({"sub": "u1", "iat": 100, "exp": 200, "iss": "other", "aud": "api"}),
        );
        assert_eq!(
            verifier.verify(&bad_iss),
            Err(VerificationError::InvalidIssuer)
        );

        let no_aud = sign(
            Some("k1"),
            &json!({"sub": "u1", "iat": 100, "exp": 200, "iss": "gate"}),
        );
        assert_eq!(
            verifier.verify(&no_aud),
            Err(VerificationError::InvalidAudience)
        );
    }
}

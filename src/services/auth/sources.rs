//! Bootstrap loading of signing keys and revocation records.
//!
//! This is the only I/O the auth layer does, and it never runs on the request
//! path: keys and records are read at startup and on each refresh tick, then
//! pushed into the in-memory [`KeyStore`] / [`RevocationFilter`].
use std::{
    path::{Path, PathBuf},
    str::FromStr,
    sync::Arc,
    time::Duration,
};

use base64::{Engine as _, engine::general_purpose::STANDARD};
use jsonwebtoken::Algorithm;
use serde::Deserialize;
use thiserror::Error;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::services::auth::{
    key_store::{KeyStore, KeyStoreError, VerificationKey},
    revocation::{RevocationFilter, RevocationRecord},
};

/// Key id used for a key configured from a single shared secret.
pub const DEFAULT_KEY_ID: &str = "default";

#[derive(Debug, Error)]
pub enum SourceError {
    #[error("failed to read {}: {source}", path.display())]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("failed to parse {}: {source}", path.display())]
    Parse {
        path: PathBuf,
        source: serde_json::Error,
    },
    #[error("invalid key entry {kid}: {reason}")]
    InvalidEntry { kid: String, reason: String },
    #[error(transparent)]
    Key(#[from] KeyStoreError),
}

/// Where verification keys come from.
#[derive(Clone)]
pub enum SigningKeySource {
    /// JSON array of [`KeySpec`].
    File(PathBuf),
    /// A single HS256 shared secret.
    Secret { kid: String, secret: String },
}

impl std::fmt::Debug for SigningKeySource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        // Do not print key material
        match self {
            Self::File(path) => f.debug_tuple("File").field(path).finish(),
            Self::Secret { kid, .. } => f.debug_struct("Secret").field("kid", kid).finish(),
        }
    }
}

/// One entry of a signing key file.
#[derive(Deserialize)]
pub struct KeySpec {
    pub kid: String,
    pub alg: String,
    #[serde(default)]
    pub secret: Option<String>,
    #[serde(default)]
    pub secret_base64: Option<String>,
    #[serde(default)]
    pub public_key_pem: Option<String>,
    #[serde(default)]
    pub not_before: Option<u64>,
    #[serde(default)]
    pub not_after: Option<u64>,
}

impl KeySpec {
    pub fn into_key(self) -> Result<VerificationKey, SourceError> {
        let invalid = |reason: &str| SourceError::InvalidEntry {
            kid: self.kid.clone(),
            reason: reason.to_string(),
        };

        let algorithm = Algorithm::from_str(&self.alg).map_err(|_| invalid("unknown alg"))?;

        let key = match (&self.secret, &self.secret_base64, &self.public_key_pem) {
            (Some(secret), None, None) => {
                VerificationKey::hmac(&self.kid, algorithm, secret.as_bytes())?
            }
            (None, Some(encoded), None) => {
                let secret = STANDARD
                    .decode(encoded.trim())
                    .map_err(|_| invalid("secret_base64 is not valid base64"))?;
                VerificationKey::hmac(&self.kid, algorithm, &secret)?
            }
            (None, None, Some(pem)) => {
                VerificationKey::from_pem(&self.kid, algorithm, &pem.replace("\\n", "\n"))?
            }
            _ => {
                return Err(invalid(
                    "exactly one of secret, secret_base64, public_key_pem is required",
                ));
            }
        };

        Ok(key.with_validity(self.not_before, self.not_after))
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReloadReport {
    pub keys_added: usize,
    pub keys_skipped: usize,
    pub keys_rejected: usize,
    pub revocations_applied: usize,
    pub revocations_changed: usize,
    pub revocations_lifted: usize,
}

impl ReloadReport {
    pub fn has_changes(&self) -> bool {
        self.keys_added > 0 || self.revocations_changed > 0 || self.revocations_lifted > 0
    }
}

/// Keys read from a source, plus how many entries were unusable.
#[derive(Debug, Default)]
pub struct KeyBatch {
    pub keys: Vec<VerificationKey>,
    pub rejected: usize,
}

/// Configured key and revocation sources.
#[derive(Debug, Clone)]
pub struct Sources {
    pub signing_keys: SigningKeySource,
    pub revocations: Option<PathBuf>,
}

impl Sources {
    /// Read the signing key source. A bad entry in a key file is logged and
    /// skipped; only an unreadable or unparsable file fails the whole load.
    pub async fn load_keys(&self) -> Result<KeyBatch, SourceError> {
        match &self.signing_keys {
            SigningKeySource::Secret { kid, secret } => Ok(KeyBatch {
                keys: vec![VerificationKey::hmac(
                    kid.as_str(),
                    Algorithm::HS256,
                    secret.as_bytes(),
                )?],
                rejected: 0,
            }),
            SigningKeySource::File(path) => {
                let specs: Vec<KeySpec> = read_json(path).await?;
                let mut batch = KeyBatch::default();
                for spec in specs {
                    match spec.into_key() {
                        Ok(key) => batch.keys.push(key),
                        Err(err) => {
                            warn!(error = %err, "skipping signing key entry");
                            batch.rejected += 1;
                        }
                    }
                }
                Ok(batch)
            }
        }
    }

    pub async fn load_revocations(&self) -> Result<Vec<RevocationRecord>, SourceError> {
        match &self.revocations {
            Some(path) => read_json(path).await,
            None => Ok(Vec::new()),
        }
    }

    /// Push newly seen keys and the revocation file into the live stores.
    ///
    /// Keys already present are left untouched (the store is append-only);
    /// keys whose window has elapsed are skipped. When a revocation file is
    /// configured it is authoritative: records removed from it are lifted.
    /// The key pass and the revocation pass run independently, so a broken
    /// key file never holds back revocations; the first failure is returned
    /// after both have run.
    pub async fn reload(
        &self,
        store: &KeyStore,
        filter: &RevocationFilter,
    ) -> Result<ReloadReport, SourceError> {
        let mut report = ReloadReport::default();
        let keys = self.reload_keys(store, &mut report).await;
        let revocations = self.reload_revocations(filter, &mut report).await;
        keys.and(revocations).map(|()| report)
    }

    async fn reload_keys(
        &self,
        store: &KeyStore,
        report: &mut ReloadReport,
    ) -> Result<(), SourceError> {
        let batch = self.load_keys().await?;
        report.keys_rejected = batch.rejected;

        for key in batch.keys {
            if store.contains(key.kid()) {
                report.keys_skipped += 1;
                continue;
            }
            match store.rotate(key) {
                Ok(()) => report.keys_added += 1,
                Err(KeyStoreError::AlreadyElapsed(kid)) => {
                    warn!(kid = %kid, "skipping elapsed signing key");
                    report.keys_skipped += 1;
                }
                Err(err) => {
                    warn!(error = %err, "signing key rejected by key store");
                    report.keys_rejected += 1;
                }
            }
        }
        Ok(())
    }

    async fn reload_revocations(
        &self,
        filter: &RevocationFilter,
        report: &mut ReloadReport,
    ) -> Result<(), SourceError> {
        if self.revocations.is_none() {
            return Ok(());
        }
        let records = self.load_revocations().await?;
        report.revocations_applied = records.len();

        let replaced = filter.replace_all(records);
        report.revocations_changed = replaced.changed;
        report.revocations_lifted = replaced.lifted;
        Ok(())
    }

    /// Re-run [`reload`](Self::reload) every `interval` until `cancel` fires.
    /// Failures are logged and retried on the next tick.
    pub fn spawn_refresh(
        self: Arc<Self>,
        interval: Duration,
        store: Arc<KeyStore>,
        filter: Arc<RevocationFilter>,
        cancel: CancellationToken,
    ) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            // First tick fires immediately; startup already loaded once.
            ticker.tick().await;
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = ticker.tick() => {
                        match self.reload(&store, &filter).await {
                            Ok(report) if report.has_changes() => {
                                info!(?report, "auth sources reloaded");
                            }
                            Ok(report) => debug!(?report, "auth sources unchanged"),
                            Err(err) => warn!(error = %err, "auth source reload failed"),
                        }
                    }
                }
            }
        })
    }
}

async fn read_json<T: serde::de::DeserializeOwned>(path: &Path) -> Result<T, SourceError> {
    let raw = tokio::fs::read_to_string(path)
        .await
        .map_err(|source| SourceError::Io {
            path: path.to_path_buf(),
            source,
        })?;
    serde_json::from_str(&raw).map_err(|source| SourceError::Parse {
        path: path.to_path_buf(),
        source,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::auth::clock::ManualClock;
    use std::io::Write;

    fn write_temp(contents: &str) -> tempfile::NamedTempFile {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(contents.as_bytes()).unwrap();
        file
    }

    #[test]
    fn key_spec_requires_exactly_one_material() {
        let spec: KeySpec =
            serde_json::from_str(r#"{"kid": "k1", "alg": "HS256", "secret": "a", "secret_base64": "YQ=="}"#)
                .unwrap();
        assert!(matches!(
            spec.into_key(),
            Err(SourceError::InvalidEntry { .. })
        ));

        let spec: KeySpec = serde_json::from_str(r#"{"kid": "k1", "alg": "HS999"}"#).unwrap();
        assert!(matches!(
            spec.into_key(),
            Err(SourceError::InvalidEntry { .. })
        ));
    }

    #[test]
    fn key_spec_builds_hmac_key_with_window() {
        let spec: KeySpec = serde_json::from_str(
            r#"{"kid": "k1", "alg": "HS384", "secret_base64": "c2VjcmV0", "not_before": 10, "not_after": 20}"#,
        )
        .unwrap();
        let key = spec.into_key().unwrap();
        assert_eq!(key.kid(), "k1");
        assert_eq!(key.algorithm(), Algorithm::HS384);
        assert_eq!(key.not_before(), Some(10));
        assert_eq!(key.not_after(), Some(20));
    }

    #[tokio::test]
    async fn reload_appends_new_keys_and_applies_revocations() {
        let keys = write_temp(
            r#"[{"kid": "k1", "alg": "HS256", "secret": "one"},
                {"kid": "old", "alg": "HS256", "secret": "x", "not_after": 50}]"#,
        );
        let revocations = write_temp(r#"[{"subject": "u1", "revoked_at": 120}]"#);

        let sources = Sources {
            signing_keys: SigningKeySource::File(keys.path().to_path_buf()),
            revocations: Some(revocations.path().to_path_buf()),
        };
        let store = KeyStore::new(Arc::new(ManualClock::new(100)));
        let filter = RevocationFilter::new();

        let report = sources.reload(&store, &filter).await.unwrap();
        assert_eq!(
            report,
            ReloadReport {
                keys_added: 1,
                keys_skipped: 1,
                revocations_applied: 1,
                revocations_changed: 1,
                ..Default::default()
            }
        );
        assert!(store.contains("k1"));
        assert!(filter.is_revoked("u1", 100));

        let again = sources.reload(&store, &filter).await.unwrap();
        assert_eq!(again.keys_added, 0);
        assert_eq!(again.keys_skipped, 2);
        assert!(!again.has_changes());
    }

    #[tokio::test]
    async fn bad_key_entry_is_skipped_and_revocations_still_apply() {
        let keys = write_temp(
            r#"[{"kid": "k1", "alg": "HS256", "secret": "one"},
                {"kid": "k2", "alg": "HS256"}]"#,
        );
        let revocations = write_temp(
            r#"[{"subject": "u1", "revoked_at": 120}, {"subject": "u2", "revoked_at": 120}]"#,
        );
        let sources = Sources {
            signing_keys: SigningKeySource::File(keys.path().to_path_buf()),
            revocations: Some(revocations.path().to_path_buf()),
        };
        let store = KeyStore::new(Arc::new(ManualClock::new(100)));
        let filter = RevocationFilter::new();

        let report = sources.reload(&store, &filter).await.unwrap();
        assert_eq!(report.keys_added, 1);
        assert_eq!(report.keys_rejected, 1);
        assert!(store.contains("k1"));
        assert!(!store.contains("k2"));
        assert!(filter.is_revoked("u1", 100));
        assert!(filter.is_revoked("u2", 100));
    }

    #[tokio::test]
    async fn unreadable_key_file_does_not_block_revocations() {
        let revocations = write_temp(r#"[{"subject": "u2", "revoked_at": 120}]"#);
        let sources = Sources {
            signing_keys: SigningKeySource::File(PathBuf::from("/definitely/not/here.json")),
            revocations: Some(revocations.path().to_path_buf()),
        };
        let store = KeyStore::new(Arc::new(ManualClock::new(100)));
        let filter = RevocationFilter::new();

        assert!(matches!(
            sources.reload(&store, &filter).await,
            Err(SourceError::Io { .. })
        ));
        assert!(filter.is_revoked("u2", 100));
    }

    #[tokio::test]
    async fn revocation_file_is_authoritative_on_reload() {
        let revocations = write_temp(r#"[{"subject": "u1", "revoked_at": 120}]"#);
        let sources = Sources {
            signing_keys: SigningKeySource::Secret {
                kid: DEFAULT_KEY_ID.to_string(),
                secret: "s3cret".to_string(),
            },
            revocations: Some(revocations.path().to_path_buf()),
        };
        let store = KeyStore::new(Arc::new(ManualClock::new(100)));
        let filter = RevocationFilter::new();

        sources.reload(&store, &filter).await.unwrap();
        assert!(filter.is_revoked("u1", 100));

        std::fs::write(revocations.path(), "[]").unwrap();
        let report = sources.reload(&store, &filter).await.unwrap();
        assert_eq!(report.revocations_lifted, 1);
        assert!(report.has_changes());
        assert!(!filter.is_revoked("u1", 100));
    }

    #[tokio::test]
    async fn without_a_revocation_file_reload_leaves_the_filter_alone() {
        let sources = Sources {
            signing_keys: SigningKeySource::Secret {
                kid: DEFAULT_KEY_ID.to_string(),
                secret: "s3cret".to_string(),
            },
            revocations: None,
        };
        let store = KeyStore::new(Arc::new(ManualClock::new(100)));
        let filter = RevocationFilter::new();
        filter.revoke_subject("u1", 120);

        sources.reload(&store, &filter).await.unwrap();
        assert!(filter.is_revoked("u1", 100));
    }

    #[tokio::test]
    async fn missing_file_is_an_io_error() {
        let sources = Sources {
            signing_keys: SigningKeySource::File(PathBuf::from("/definitely/not/here.json")),
            revocations: None,
        };
        assert!(matches!(
            sources.load_keys().await,
            Err(SourceError::Io { .. })
        ));
    }

    #[tokio::test]
    async fn shared_secret_source_yields_default_key() {
        let sources = Sources {
            signing_keys: SigningKeySource::Secret {
                kid: DEFAULT_KEY_ID.to_string(),
                secret: "s3cret".to_string(),
            },
            revocations: None,
        };
        let batch = sources.load_keys().await.unwrap();
        assert_eq!(batch.rejected, 0);
        assert_eq!(batch.keys.len(), 1);
        assert_eq!(batch.keys[0].kid(), DEFAULT_KEY_ID);
        assert!(!format!("{sources:?}").contains("s3cret"));
    }
}

/// Factory: build the `Authenticator` and its sources from application `Config`.
use std::{sync::Arc, time::Duration};

use crate::config::Config;
use crate::services::auth::{
    Authenticator, AuthenticatorConfig,
    clock::{Clock, SystemClock},
    key_store::KeyStore,
    revocation::RevocationFilter,
    sources::{SourceError, Sources},
};

pub fn authenticator_config(config: &Config) -> AuthenticatorConfig {
    AuthenticatorConfig {
        clock_skew: Duration::from_secs(config.clock_skew_seconds),
        issuer: config.auth_issuer.clone(),
        audience: config.auth_audience.clone(),
        default_key_id: config.default_key_id.clone(),
        cache_max_entries: config.cache_max_entries,
        cache_max_ttl: Duration::from_secs(config.cache_max_ttl_seconds),
    }
}

/// Load keys and revocation records once, then wire everything together.
pub async fn build_authenticator(
    config: &Config,
) -> Result<(Arc<Authenticator>, Arc<Sources>), SourceError> {
    let clock: Arc<dyn Clock> = Arc::new(SystemClock);
    let sources = Arc::new(Sources {
        signing_keys: config.signing_key_source.clone(),
        revocations: config.revocations_file.clone(),
    });

    let keys = Arc::new(KeyStore::new(clock.clone()));
    let revocations = Arc::new(RevocationFilter::new());
    let report = sources.reload(&keys, &revocations).await?;

    if keys.is_empty() {
        tracing::warn!("no usable signing keys loaded; every token will be rejected");
    }
    tracing::info!(
        keys = report.keys_added,
        revocations = report.revocations_applied,
        current = ?keys.current_key_id(),
        "auth sources loaded"
    );

    let auth = Authenticator::new(authenticator_config(config), keys, revocations, clock);
    Ok((Arc::new(auth), sources))
}

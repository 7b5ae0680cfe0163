/*
 * Responsibility
 * - Load settings from the environment (port, key/revocation sources, cache limits)
 * - Validate them (missing or unparsable values fail startup)
 * - Pick the signing key source per environment; the auth core never reads env itself
 */
use std::fmt;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::str::FromStr;

use crate::services::auth::claims_cache::{DEFAULT_CACHE_MAX_ENTRIES, DEFAULT_CACHE_MAX_TTL};
use crate::services::auth::sources::{DEFAULT_KEY_ID, SigningKeySource};

// Used only outside production when no key source is configured.
const DEV_SECRET: &str = "dev-secret";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AppEnv {
    Development,
    Production,
}

impl AppEnv {
    fn parse(value: Option<String>) -> Self {
        match value
            .unwrap_or_else(|| "development".to_string())
            .to_ascii_lowercase()
            .as_str()
        {
            "production" | "prod" => Self::Production,
            _ => Self::Development,
        }
    }

    pub fn is_production(&self) -> bool {
        matches!(self, Self::Production)
    }
}

#[derive(Debug, PartialEq, Eq)]
pub enum ConfigError {
    Missing(&'static str),
    Invalid(&'static str),
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigError::Missing(key) => write!(f, "missing configuration: {}", key),
            ConfigError::Invalid(key) => write!(f, "invalid configuration: {}", key),
        }
    }
}

impl std::error::Error for ConfigError {}

#[derive(Debug, Clone)]
pub struct Config {
    pub addr: SocketAddr,
    pub app_env: AppEnv,

    pub signing_key_source: SigningKeySource,
    pub default_key_id: Option<String>,
    pub auth_issuer: Option<String>,
    pub auth_audience: Option<String>,
    pub clock_skew_seconds: u64,

    pub cache_max_entries: u64,
    pub cache_max_ttl_seconds: u64,
    pub cache_sweep_seconds: u64,

    pub revocations_file: Option<PathBuf>,
    // None disables periodic reload of key / revocation sources.
    pub source_reload_seconds: Option<u64>,
}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        dotenvy::dotenv().ok();
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build from an arbitrary variable lookup (the environment, or a map in tests).
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let non_empty = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        let port: u16 = parse_or(&non_empty, "PORT", 3000)?;
        let addr: SocketAddr = SocketAddr::from_str(&format!("0.0.0.0:{}", port))
            .map_err(|_| ConfigError::Invalid("PORT"))?;

        let app_env = AppEnv::parse(non_empty("APP_ENV"));

        let signing_key_source = match (
            non_empty("AUTH_SIGNING_KEYS_FILE"),
            non_empty("AUTH_JWT_SECRET"),
        ) {
            (Some(path), None) => SigningKeySource::File(PathBuf::from(path)),
            (None, Some(secret)) => SigningKeySource::Secret {
                kid: DEFAULT_KEY_ID.to_string(),
                secret,
            },
            (Some(_), Some(_)) => return Err(ConfigError::Invalid("AUTH_JWT_SECRET")),
            (None, None) if app_env.is_production() => {
                return Err(ConfigError::Missing("AUTH_SIGNING_KEYS_FILE"));
            }
            (None, None) => SigningKeySource::Secret {
                kid: DEFAULT_KEY_ID.to_string(),
                secret: DEV_SECRET.to_string(),
            },
        };

        // Tokens minted from a shared secret usually carry no `kid`.
        let default_key_id =
            non_empty("AUTH_DEFAULT_KEY_ID").or_else(|| match &signing_key_source {
                SigningKeySource::Secret { kid, .. } => Some(kid.clone()),
                SigningKeySource::File(_) => None,
            });

        let cache_max_entries = parse_or(
            &non_empty,
            "AUTH_CACHE_MAX_ENTRIES",
            DEFAULT_CACHE_MAX_ENTRIES,
        )?;
        if cache_max_entries == 0 {
            return Err(ConfigError::Invalid("AUTH_CACHE_MAX_ENTRIES"));
        }

        let cache_sweep_seconds = parse_or(&non_empty, "AUTH_CACHE_SWEEP_SECONDS", 60)?;
        if cache_sweep_seconds == 0 {
            return Err(ConfigError::Invalid("AUTH_CACHE_SWEEP_SECONDS"));
        }

        let source_reload_seconds = match non_empty("AUTH_SOURCE_RELOAD_SECONDS") {
            Some(v) => match v.trim().parse::<u64>() {
                Ok(0) | Err(_) => return Err(ConfigError::Invalid("AUTH_SOURCE_RELOAD_SECONDS")),
                Ok(n) => Some(n),
            },
            None => None,
        };

        Ok(Self {
            addr,
            app_env,
            signing_key_source,
            default_key_id,
            auth_issuer: non_empty("AUTH_ISSUER"),
            auth_audience: non_empty("AUTH_AUDIENCE"),
            clock_skew_seconds: parse_or(&non_empty, "AUTH_CLOCK_SKEW_SECONDS", 0)?,
            cache_max_entries,
            cache_max_ttl_seconds: parse_or(
                &non_empty,
                "AUTH_CACHE_MAX_TTL_SECONDS",
                DEFAULT_CACHE_MAX_TTL.as_secs(),
            )?,
            cache_sweep_seconds,
            revocations_file: non_empty("AUTH_REVOCATIONS_FILE").map(PathBuf::from),
            source_reload_seconds,
        })
    }
}

fn parse_or<T, F>(lookup: &F, key: &'static str, default: T) -> Result<T, ConfigError>
where
    T: FromStr,
    F: Fn(&str) -> Option<String>,
{
    match lookup(key) {
        Some(v) => v.trim().parse().map_err(|_| ConfigError::Invalid(key)),
        None => Ok(default),
    }
}

use serde::{Deserialize, Deserializer, Serialize, de::Error as _};
use serde_json::{Map, Value};

/// Verified token claims.
///
/// The registered claims the gateway relies on are typed; everything else in
/// the payload is kept verbatim in `extra` so downstream handlers see exactly
/// what the issuer encoded. An optional registered claim set to `null` is
/// rejected rather than silently dropped.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Claims {
    pub sub: String,
    pub exp: u64,
    pub iat: u64,

    #[serde(
        default,
        deserialize_with = "present",
        skip_serializing_if = "Option::is_none"
    )]
    pub nbf: Option<u64>,
    #[serde(
        default,
        deserialize_with = "present",
        skip_serializing_if = "Option::is_none"
    )]
    pub iss: Option<String>,
    // Either a string or an array of strings.
    #[serde(
        default,
        deserialize_with = "present",
        skip_serializing_if = "Option::is_none"
    )]
    pub aud: Option<Value>,
    #[serde(
        default,
        deserialize_with = "present",
        skip_serializing_if = "Option::is_none"
    )]
    pub jti: Option<String>,

    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

fn present<'de, D, T>(deserializer: D) -> Result<Option<T>, D::Error>
where
    D: Deserializer<'de>,
    T: Deserialize<'de>,
{
    match Option::<T>::deserialize(deserializer)? {
        Some(value) => Ok(Some(value)),
        None => Err(D::Error::custom("registered claim must not be null")),
    }
}

impl Claims {
    pub fn subject(&self) -> &str {
        &self.sub
    }

    pub fn expires_at(&self) -> u64 {
        self.exp
    }

    pub fn issued_at(&self) -> u64 {
        self.iat
    }

    pub fn token_id(&self) -> Option<&str> {
        self.jti.as_deref()
    }

    pub fn get(&self, name: &str) -> Option<&Value> {
        self.extra.get(name)
    }

    /// True when `aud` names `audience`, as a string or inside an array.
    pub fn has_audience(&self, audience: &str) -> bool {
        match &self.aud {
            Some(Value::String(s)) => s == audience,
            Some(Value::Array(arr)) => arr
                .iter()
                .any(|v| matches!(v, Value::String(s) if s == audience)),
            _ => false,
        }
    }
}

//! Connection settings for the coordination store.

use crate::error::{RegistryError, Result};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Default dial timeout.
pub const DEFAULT_DIAL_TIMEOUT: Duration = Duration::from_secs(5);

/// Default deadline for each individual store request.
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(1);

const ENV_ENDPOINTS: &str = "KEYSPACE_ENDPOINTS";
const ENV_DIAL_TIMEOUT_MS: &str = "KEYSPACE_DIAL_TIMEOUT_MS";
const ENV_REQUEST_TIMEOUT_MS: &str = "KEYSPACE_REQUEST_TIMEOUT_MS";

/// Registry configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegistryConfig {
    /// Store endpoints (`host:port` or full URLs)
    pub endpoints: Vec<String>,

    /// Connection establishment timeout
    #[serde(rename = "dial_timeout_ms", with = "millis", default = "default_dial_timeout")]
    pub dial_timeout: Duration,

    /// Per-request deadline
    #[serde(rename = "request_timeout_ms", with = "millis", default = "default_request_timeout")]
    pub request_timeout: Duration,
}

fn default_dial_timeout() -> Duration {
    DEFAULT_DIAL_TIMEOUT
}

fn default_request_timeout() -> Duration {
    DEFAULT_REQUEST_TIMEOUT
}

impl RegistryConfig {
    /// Create config for the given endpoints with default timeouts
    pub fn new<I, S>(endpoints: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            endpoints: endpoints.into_iter().map(Into::into).collect(),
            dial_timeout: DEFAULT_DIAL_TIMEOUT,
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
        }
    }

    /// Set dial timeout
    pub fn with_dial_timeout(mut self, timeout: Duration) -> Self {
        self.dial_timeout = timeout;
        self
    }

    /// Set per-request timeout
    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    /// Load configuration from `KEYSPACE_*` environment variables.
    ///
    /// `KEYSPACE_ENDPOINTS` is a comma separated endpoint list and is required.
    /// `KEYSPACE_DIAL_TIMEOUT_MS` and `KEYSPACE_REQUEST_TIMEOUT_MS` are optional.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub(crate) fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let endpoints: Vec<String> = lookup(ENV_ENDPOINTS)
            .ok_or_else(|| {
                RegistryError::InvalidConfiguration(format!("{} is not set", ENV_ENDPOINTS))
            })?
            .split(',')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(String::from)
            .collect();

        let mut config = Self::new(endpoints);

        if let Some(ms) = lookup(ENV_DIAL_TIMEOUT_MS) {
            config.dial_timeout = parse_millis(ENV_DIAL_TIMEOUT_MS, &ms)?;
        }
        if let Some(ms) = lookup(ENV_REQUEST_TIMEOUT_MS) {
            config.request_timeout = parse_millis(ENV_REQUEST_TIMEOUT_MS, &ms)?;
        }

        config.validate()?;
        Ok(config)
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<()> {
        if self.endpoints.is_empty() {
            return Err(RegistryError::InvalidConfiguration(
                "at least one endpoint is required".to_string(),
            ));
        }
        if self.dial_timeout.is_zero() {
            return Err(RegistryError::InvalidConfiguration(
                "dial timeout must be non-zero".to_string(),
            ));
        }
        if self.request_timeout.is_zero() {
            return Err(RegistryError::InvalidConfiguration(
                "request timeout must be non-zero".to_string(),
            ));
        }
        Ok(())
    }
}

fn parse_millis(name: &str, value: &str) -> Result<Duration> {
    value
        .trim()
        .parse::<u64>()
        .map(Duration::from_millis)
        .map_err(|e| RegistryError::InvalidConfiguration(format!("{}: {}", name, e)))
}

mod millis {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(value.as_millis() as u64)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        u64::deserialize(deserializer).map(Duration::from_millis)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key: &str| vars.get(key).cloned()
    }

    #[test]
    fn test_defaults() {
        let config = RegistryConfig::new(["localhost:2379"]);
        assert_eq!(config.dial_timeout, Duration::from_secs(5));
        assert_eq!(config.request_timeout, Duration::from_secs(1));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_validate_rejects_empty_endpoints() {
        let config = RegistryConfig::new(Vec::<String>::new());
        assert!(matches!(
            config.validate(),
            Err(RegistryError::InvalidConfiguration(_))
        ));
    }

    #[test]
    fn test_validate_rejects_zero_timeout() {
        let config = RegistryConfig::new(["localhost:2379"]).with_request_timeout(Duration::ZERO);
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_from_lookup() {
        let config = RegistryConfig::from_lookup(lookup(&[
            ("KEYSPACE_ENDPOINTS", "10.0.0.1:2379, 10.0.0.2:2379,"),
            ("KEYSPACE_REQUEST_TIMEOUT_MS", "250"),
        ]))
        .unwrap();

        assert_eq!(config.endpoints, vec!["10.0.0.1:2379", "10.0.0.2:2379"]);
        assert_eq!(config.request_timeout, Duration::from_millis(250));
        assert_eq!(config.dial_timeout, DEFAULT_DIAL_TIMEOUT);
    }

    #[test]
    fn test_from_lookup_missing_endpoints() {
        let result = RegistryConfig::from_lookup(lookup(&[]));
        assert!(matches!(result, Err(RegistryError::InvalidConfiguration(_))));
    }

    #[test]
    fn test_from_lookup_bad_number() {
        let result = RegistryConfig::from_lookup(lookup(&[
            ("KEYSPACE_ENDPOINTS", "localhost:2379"),
            ("KEYSPACE_DIAL_TIMEOUT_MS", "soon"),
        ]));
        assert!(result.is_err());
    }

    #[test]
    fn test_deserialize_millis() {
        let config: RegistryConfig = serde_json::from_str(
            r#"{"endpoints": ["localhost:2379"], "dial_timeout_ms": 2000}"#,
        )
        .unwrap();

        assert_eq!(config.dial_timeout, Duration::from_secs(2));
        assert_eq!(config.request_timeout, DEFAULT_REQUEST_TIMEOUT);
    }
}

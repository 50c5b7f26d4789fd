//! etcd key-value store over the v3 JSON gateway

use crate::error::{RegistryError, Result};
use crate::store::{KeyValue, KvStore, StoreConnector, prefix_range_end};
use async_trait::async_trait;
use base64::{Engine as _, engine::general_purpose};
use serde::{Deserialize, Deserializer};
use std::time::Duration;
use tokio::task::JoinSet;
use tracing::{debug, warn};
use url::Url;

/// Dials etcd clusters through the gRPC gateway (`/v3/...`)
#[derive(Debug, Clone)]
pub struct EtcdConnector {
    api_prefix: String,
}

impl EtcdConnector {
    /// Create new etcd connector
    ///
    /// # Examples
    ///
    /// ```rust,ignore
    /// use keyspace_registry::EtcdConnector;
    ///
    /// let connector = EtcdConnector::new();
    /// let kv = connector.connect(&["localhost:2379".into()], Duration::from_secs(5)).await?;
    /// ```
    pub fn new() -> Self {
        Self {
            api_prefix: "/v3".to_string(),
        }
    }

    /// Use a different gateway path prefix (e.g. `/v3beta` on old clusters)
    pub fn with_api_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.api_prefix = prefix.into();
        self
    }
}

impl Default for EtcdConnector {
    fn default() -> Self {
        Self::new()
    }
}

/// Turn `host:port` or a full URL into a base URL without trailing slash
pub fn normalize_endpoint(endpoint: &str) -> Result<Url> {
    let endpoint = endpoint.trim();
    if endpoint.is_empty() {
        return Err(RegistryError::InvalidConfiguration(
            "empty endpoint".to_string(),
        ));
    }

    let with_scheme = if endpoint.contains("://") {
        endpoint.to_string()
    } else {
        format!("http://{}", endpoint)
    };

    let url = Url::parse(&with_scheme).map_err(|e| {
        RegistryError::InvalidConfiguration(format!("invalid endpoint {}: {}", endpoint, e))
    })?;

    if url.host_str().is_none() {
        return Err(RegistryError::InvalidConfiguration(format!(
            "endpoint {} has no host",
            endpoint
        )));
    }

    Ok(url)
}

#[async_trait]
impl StoreConnector for EtcdConnector {
    async fn connect(
        &self,
        endpoints: &[String],
        dial_timeout: Duration,
    ) -> Result<Box<dyn KvStore>> {
        if endpoints.is_empty() {
            return Err(RegistryError::InvalidConfiguration(
                "at least one endpoint is required".to_string(),
            ));
        }
        let urls = endpoints
            .iter()
            .map(|e| normalize_endpoint(e))
            .collect::<Result<Vec<_>>>()?;

        let client = reqwest::Client::builder()
            .connect_timeout(dial_timeout)
            .build()
            .map_err(|e| RegistryError::Connection(e.to_string()))?;

        // Probe every endpoint at once so one hung member cannot eat the whole dial budget.
        let mut probes = JoinSet::new();
        for url in urls {
            let base_url = format!("{}{}", url.as_str().trim_end_matches('/'), self.api_prefix);
            let client = client.clone();
            probes.spawn(async move {
                probe(&client, &base_url, dial_timeout)
                    .await
                    .map(|_| base_url)
                    .map_err(|e| format!("{}: {}", url, e))
            });
        }

        let mut last_error = String::from("no endpoints tried");
        while let Some(joined) = probes.join_next().await {
            match joined {
                Ok(Ok(base_url)) => {
                    debug!("Connected to etcd at {}", base_url);
                    return Ok(Box::new(EtcdStore { base_url, client }));
                }
                Ok(Err(e)) => last_error = e,
                Err(e) => last_error = e.to_string(),
            }
            warn!("etcd endpoint unavailable: {}", last_error);
        }

        Err(RegistryError::Connection(last_error))
    }
}

async fn probe(
    client: &reqwest::Client,
    base_url: &str,
    dial_timeout: Duration,
) -> std::result::Result<(), String> {
    let response = client
        .post(format!("{}/maintenance/status", base_url))
        .json(&serde_json::json!({}))
        .timeout(dial_timeout)
        .send()
        .await
        .map_err(|e| e.to_string())?;

    if response.status().is_success() {
        Ok(())
    } else {
        Err(format!("answered {}", response.status()))
    }
}

/// Handle bound to one etcd gateway endpoint
pub struct EtcdStore {
    base_url: String,
    client: reqwest::Client,
}

impl EtcdStore {
    async fn call<T: serde::de::DeserializeOwned>(
        &self,
        method: &str,
        payload: serde_json::Value,
    ) -> Result<T> {
        let url = format!("{}/{}", self.base_url, method);
        let response = self.client.post(&url).json(&payload).send().await?;

        if !response.status().is_success() {
            let status = response.status();
            let error = response
                .text()
                .await
                .unwrap_or_else(|_| "Unknown error".to_string());
            return Err(RegistryError::Store(format!("{} {}: {}", method, status, error)));
        }

        response
            .json()
            .await
            .map_err(|e| RegistryError::Decode(format!("{} response: {}", method, e)))
    }
}

fn encode(bytes: &[u8]) -> String {
    general_purpose::STANDARD.encode(bytes)
}

fn decode(field: &str, value: &str) -> Result<Vec<u8>> {
    general_purpose::STANDARD
        .decode(value)
        .map_err(|e| RegistryError::Decode(format!("{}: {}", field, e)))
}

/// The gateway renders int64 fields as JSON strings
fn lenient_i64<'de, D: Deserializer<'de>>(deserializer: D) -> std::result::Result<i64, D::Error> {
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Raw {
        Num(i64),
        Str(String),
    }

    match Raw::deserialize(deserializer)? {
        Raw::Num(n) => Ok(n),
        Raw::Str(s) => s.parse().map_err(serde::de::Error::custom),
    }
}

#[derive(Deserialize)]
struct RangeResponse {
    #[serde(default)]
    kvs: Vec<EtcdKv>,
}

#[derive(Deserialize)]
struct EtcdKv {
    key: String,
    #[serde(default)]
    value: String,
    #[serde(default, deserialize_with = "lenient_i64")]
    mod_revision: i64,
}

impl EtcdKv {
    fn into_key_value(self) -> Result<KeyValue> {
        // Lossy so a single bad key is rejected by whoever parses it, not the whole range.
        let key = String::from_utf8_lossy(&decode("key", &self.key)?).into_owned();
        Ok(KeyValue {
            key,
            value: decode("value", &self.value)?,
            mod_revision: self.mod_revision,
        })
    }
}

#[derive(Deserialize)]
struct DeleteRangeResponse {
    #[serde(default, deserialize_with = "lenient_i64")]
    deleted: i64,
}

#[derive(Deserialize)]
struct TxnResponse {
    #[serde(default)]
    succeeded: bool,
}

#[async_trait]
impl KvStore for EtcdStore {
    async fn put(&self, key: &str, value: &[u8]) -> Result<()> {
        let _: serde_json::Value = self
            .call(
                "kv/put",
                serde_json::json!({
                    "key": encode(key.as_bytes()),
                    "value": encode(value),
                }),
            )
            .await?;
        Ok(())
    }

    async fn get(&self, key: &str) -> Result<Option<KeyValue>> {
        let response: RangeResponse = self
            .call("kv/range", serde_json::json!({ "key": encode(key.as_bytes()) }))
            .await?;

        response
            .kvs
            .into_iter()
            .next()
            .map(EtcdKv::into_key_value)
            .transpose()
    }

    async fn get_prefix(&self, prefix: &str) -> Result<Vec<KeyValue>> {
        let response: RangeResponse = self
            .call(
                "kv/range",
                serde_json::json!({
                    "key": encode(prefix.as_bytes()),
                    "range_end": encode(&prefix_range_end(prefix.as_bytes())),
                }),
            )
            .await?;

        response
            .kvs
            .into_iter()
            .map(EtcdKv::into_key_value)
            .collect()
    }

    async fn delete(&self, key: &str) -> Result<u64> {
        let response: DeleteRangeResponse = self
            .call(
                "kv/deleterange",
                serde_json::json!({ "key": encode(key.as_bytes()) }),
            )
            .await?;
        Ok(response.deleted.max(0) as u64)
    }

    async fn put_if_revision(
        &self,
        key: &str,
        expected: Option<i64>,
        value: &[u8],
    ) -> Result<bool> {
        let key_b64 = encode(key.as_bytes());
        let compare = match expected {
            Some(revision) => serde_json::json!({
                "target": "MOD",
                "key": key_b64,
                "mod_revision": revision.to_string(),
                "result": "EQUAL",
            }),
            None => serde_json::json!({
                "target": "CREATE",
                "key": key_b64,
                "create_revision": "0",
                "result": "EQUAL",
            }),
        };

        let response: TxnResponse = self
            .call(
                "kv/txn",
                serde_json::json!({
                    "compare": [compare],
                    "success": [{
                        "request_put": { "key": key_b64, "value": encode(value) }
                    }],
                }),
            )
            .await?;
        Ok(response.succeeded)
    }
}

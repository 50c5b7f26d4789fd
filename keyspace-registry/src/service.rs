//! Service registration and lookup
//!
//! A service instance is stored entirely in its key:
//! `/services/{name}/{ip}:{port}`. The value is the Unix timestamp of the last
//! registration and is never read back. Re-registering the same instance just
//! refreshes the timestamp. Nothing expires on its own, so instances stay
//! listed until explicitly unregistered.

use crate::error::{RegistryError, Result};
use crate::provisioner::Provisioner;
use rand::Rng;
use std::fmt;
use tracing::{debug, info, warn};

/// Root of the service key namespace
pub const SERVICES_PREFIX: &str = "/services/";

/// One running instance of a named service
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Service {
    /// Service name
    pub name: String,

    /// Host/IP address
    pub ip: String,

    /// Port, kept as text exactly as it appears in the key
    pub port: String,
}

impl Service {
    /// Create new service instance
    pub fn new(name: impl Into<String>, ip: impl Into<String>, port: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ip: ip.into(),
            port: port.into(),
        }
    }

    /// Store key for this instance
    pub fn key(&self) -> String {
        service_key(&self.name, &self.ip, &self.port)
    }

    /// `ip:port`
    pub fn address(&self) -> String {
        format!("{}:{}", self.ip, self.port)
    }
}

impl fmt::Display for Service {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}:{}", self.name, self.ip, self.port)
    }
}

/// `/services/{name}/{ip}:{port}`
pub fn service_key(name: &str, ip: &str, port: &str) -> String {
    format!("{}{}/{}:{}", SERVICES_PREFIX, name, ip, port)
}

/// `/services/{name}/`, the range prefix for every instance of `name`
pub fn service_prefix(name: &str) -> String {
    format!("{}{}/", SERVICES_PREFIX, name)
}

/// Decode an instance from its key.
///
/// The address is the last path segment, split on its last `:` so bracketed
/// IPv6 hosts keep their colons.
pub fn parse_service_key(name: &str, key: &str) -> Result<Service> {
    let malformed = || RegistryError::MalformedKey(key.to_string());

    let address = key.strip_prefix(&service_prefix(name)).ok_or_else(malformed)?;
    if address.contains('/') {
        return Err(malformed());
    }
    let (ip, port) = address.rsplit_once(':').ok_or_else(malformed)?;
    if ip.is_empty() || port.is_empty() {
        return Err(malformed());
    }

    Ok(Service::new(name, ip, port))
}

/// Uniform pick over the current snapshot; every instance, including the
/// last one, is selectable.
pub(crate) fn pick_random<T>(items: &[T]) -> Option<&T> {
    match items.len() {
        0 => None,
        1 => items.first(),
        len => items.get(rand::rng().random_range(0..len)),
    }
}

/// Registers, unregisters and resolves service instances
#[derive(Clone)]
pub struct ServiceRegistry {
    provisioner: Provisioner,
}

impl ServiceRegistry {
    /// Create new service registry
    pub fn new(provisioner: Provisioner) -> Self {
        Self { provisioner }
    }

    /// Announce an instance. Idempotent for the same name, ip and port.
    pub async fn register_service(&self, service: &Service) -> Result<()> {
        let kv = self.provisioner.acquire().await?;
        let key = service.key();
        let timestamp = chrono::Utc::now().timestamp().to_string();

        self.provisioner
            .request(kv.put(&key, timestamp.as_bytes()))
            .await?;

        info!("Registered service {}", service);
        Ok(())
    }

    /// Remove an instance. Removing an unknown instance is not an error.
    pub async fn unregister_service(&self, service: &Service) -> Result<()> {
        let kv = self.provisioner.acquire().await?;
        let deleted = self.provisioner.request(kv.delete(&service.key())).await?;

        if deleted > 0 {
            info!("Unregistered service {}", service);
        } else {
            debug!("Service {} was not registered", service);
        }
        Ok(())
    }

    /// Every registered instance of `name`, in key order.
    ///
    /// Keys under the prefix that do not parse are skipped.
    pub async fn get_service_instances(&self, name: &str) -> Result<Vec<Service>> {
        let kv = self.provisioner.acquire().await?;
        let kvs = self
            .provisioner
            .request(kv.get_prefix(&service_prefix(name)))
            .await?;

        let instances: Vec<Service> = kvs
            .iter()
            .filter_map(|entry| match parse_service_key(name, &entry.key) {
                Ok(service) => Some(service),
                Err(e) => {
                    warn!("Skipping entry: {}", e);
                    None
                }
            })
            .collect();

        debug!("Found {} instances of service {}", instances.len(), name);
        Ok(instances)
    }

    /// Pick one registered instance of `name` at random.
    ///
    /// `Ok(None)` means the lookup succeeded and nothing is registered.
    pub async fn get_service(&self, name: &str) -> Result<Option<Service>> {
        let instances = self.get_service_instances(name).await?;
        Ok(pick_random(&instances).cloned())
    }
}

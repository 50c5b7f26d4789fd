//! Connection provisioning
//!
//! Every registry operation dials its own short-lived store handle through a
//! [`Provisioner`] and drops it before returning. Handles are never pooled.
//! Each individual store request is raced against the configured request
//! timeout and, when one is attached, the caller's cancellation token.

use crate::config::RegistryConfig;
use crate::error::{RegistryError, Result};
use crate::store::{KvStore, StoreConnector};
use std::future::Future;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::debug;

/// Dials store handles with bounded timeouts
#[derive(Clone)]
pub struct Provisioner {
    connector: Arc<dyn StoreConnector>,
    config: RegistryConfig,
    cancel: Option<CancellationToken>,
}

impl Provisioner {
    /// Create new provisioner
    pub fn new(connector: impl StoreConnector + 'static, config: RegistryConfig) -> Self {
        Self {
            connector: Arc::new(connector),
            config,
            cancel: None,
        }
    }

    /// Abort in-flight requests once `token` is cancelled.
    ///
    /// Timeouts are unaffected; whichever fires first wins.
    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancel = Some(token);
        self
    }

    /// Configuration in use
    pub fn config(&self) -> &RegistryConfig {
        &self.config
    }

    /// Open a fresh handle, bounded by the dial timeout
    pub async fn acquire(&self) -> Result<Box<dyn KvStore>> {
        self.config.validate()?;
        let dial_timeout = self.config.dial_timeout;

        let dial = async {
            tokio::time::timeout(
                dial_timeout,
                self.connector.connect(&self.config.endpoints, dial_timeout),
            )
            .await
            .map_err(|_| {
                RegistryError::Connection(format!(
                    "dial to {:?} timed out after {:?}",
                    self.config.endpoints, dial_timeout
                ))
            })?
        };

        let handle = self.guard(dial).await?;
        debug!("Acquired store handle for {:?}", self.config.endpoints);
        Ok(handle)
    }

    /// Run one store request under the request timeout
    pub async fn request<T, F>(&self, fut: F) -> Result<T>
    where
        F: Future<Output = Result<T>>,
    {
        let timeout = self.config.request_timeout;
        let bounded = async {
            tokio::time::timeout(timeout, fut)
                .await
                .map_err(|_| RegistryError::Timeout(timeout))?
        };
        self.guard(bounded).await
    }

    async fn guard<T, F>(&self, fut: F) -> Result<T>
    where
        F: Future<Output = Result<T>>,
    {
        match &self.cancel {
            Some(token) => tokio::select! {
                biased;
                _ = token.cancelled() => Err(RegistryError::Cancelled),
                result = fut => result,
            },
            None => fut.await,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::MemoryConnector;
    use std::time::Duration;

    fn config() -> RegistryConfig {
        RegistryConfig::new(["mem:2379"])
    }

    #[tokio::test]
    async fn test_acquire_and_release() {
        let connector = MemoryConnector::new();
        let provisioner = Provisioner::new(connector.clone(), config());

        let handle = provisioner.acquire().await.unwrap();
        assert_eq!(connector.open_handles(), 1);
        drop(handle);
        assert_eq!(connector.open_handles(), 0);
    }

    #[tokio::test]
    async fn test_acquire_unreachable_is_error() {
        let connector = MemoryConnector::new();
        connector.set_reachable(false);
        let provisioner = Provisioner::new(connector, config());

        let err = provisioner.acquire().await.err().unwrap();
        assert!(err.is_connection());
    }

    #[tokio::test]
    async fn test_acquire_invalid_config() {
        let provisioner =
            Provisioner::new(MemoryConnector::new(), RegistryConfig::new(Vec::<String>::new()));
        let err = provisioner.acquire().await.err().unwrap();
        assert!(matches!(err, RegistryError::InvalidConfiguration(_)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_dial_timeout() {
        let connector = MemoryConnector::new().with_dial_delay(Duration::from_secs(10));
        let provisioner = Provisioner::new(connector, config());

        let err = provisioner.acquire().await.err().unwrap();
        assert!(err.is_connection());
        assert!(err.to_string().contains("timed out"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_request_timeout() {
        let provisioner = Provisioner::new(MemoryConnector::new(), config());

        let result: Result<()> = provisioner
            .request(async {
                tokio::time::sleep(Duration::from_secs(2)).await;
                Ok(())
            })
            .await;

        let err = result.unwrap_err();
        assert!(err.is_timeout());
        assert!(matches!(err, RegistryError::Timeout(d) if d == Duration::from_secs(1)));
    }

    #[tokio::test]
    async fn test_request_cancelled() {
        let token = CancellationToken::new();
        let provisioner =
            Provisioner::new(MemoryConnector::new(), config()).with_cancellation(token.clone());

        token.cancel();
        let result: Result<()> = provisioner.request(std::future::pending()).await;

        assert!(matches!(result, Err(RegistryError::Cancelled)));
    }

    #[tokio::test]
    async fn test_request_passes_through() {
        let provisioner = Provisioner::new(MemoryConnector::new(), config())
            .with_cancellation(CancellationToken::new());

        let value = provisioner.request(async { Ok(42) }).await.unwrap();
        assert_eq!(value, 42);
    }
}

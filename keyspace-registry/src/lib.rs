//! Service and module registry over a key-value coordination store
//!
//! This crate shapes how an etcd-style key-value store is used to announce
//! services and to keep a shared catalog of discovery modules.
//!
//! ## Features
//!
//! - **Service Registration** - Announce instances under `/services/{name}/{ip}:{port}`
//! - **Service Lookup** - Pick a registered instance uniformly at random
//! - **Module Catalog** - Maintain a JSON list of discovery modules under `/modules`
//! - **Multiple Backends** - etcd (v3 JSON gateway) or in-memory
//!
//! Instances never expire on their own; a crashed process stays listed until
//! someone unregisters it.
//!
//! ## Quick Start
//!
//! ### In-Memory Backend (Testing)
//!
//! ```rust,ignore
//! use keyspace_registry::*;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let provisioner = Provisioner::new(MemoryConnector::new(), RegistryConfig::new(["mem"]));
//!     let services = ServiceRegistry::new(provisioner);
//!
//!     services.register_service(&Service::new("api", "10.0.0.1", "8080")).await?;
//!
//!     match services.get_service("api").await? {
//!         Some(instance) => println!("Found: {}", instance.address()),
//!         None => println!("No instance registered"),
//!     }
//!
//!     Ok(())
//! }
//! ```
//!
//! ### etcd Backend
//!
//! ```rust,ignore
//! use keyspace_registry::*;
//!
//! let config = RegistryConfig::from_env()?;
//! let modules = ModuleRegistry::new(Provisioner::new(EtcdConnector::new(), config));
//!
//! modules
//!     .register_module(
//!         &DiscoveryModule::new("Auth", "AUTH")
//!             .with_permission(Permission::new("Read users", "USERS_READ")),
//!     )
//!     .await?;
//! ```

pub mod config;
pub mod error;
pub mod etcd;
pub mod memory;
pub mod module;
pub mod provisioner;
pub mod service;
pub mod store;

pub use config::RegistryConfig;
pub use error::{RegistryError, Result};
pub use etcd::EtcdConnector;
pub use memory::{MemoryConnector, MemoryStore};
pub use module::{DiscoveryModule, DiscoveryModulesList, ModuleRegistry, Permission};
pub use provisioner::Provisioner;
pub use service::{Service, ServiceRegistry};
pub use store::{KeyValue, KvStore, StoreConnector};
pub use tokio_util::sync::CancellationToken;

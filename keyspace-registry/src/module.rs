//! Discovery module catalog
//!
//! The whole catalog lives as one JSON array under [`MODULES_KEY`]. Every
//! mutation reads the array, changes it in memory and writes it back.
//!
//! [`ModuleRegistry::register_module`] and [`ModuleRegistry::unregister_module`]
//! are plain read-modify-write: two writers that read the same catalog both
//! succeed and the last write wins, silently dropping the other's change. The
//! `*_checked` variants make the write conditional on the catalog revision that
//! was read and report [`RegistryError::Conflict`] instead of overwriting.

use crate::error::{RegistryError, Result};
use crate::provisioner::Provisioner;
use crate::store::KvStore;
use serde::{Deserialize, Deserializer, Serialize};
use tracing::{debug, info, warn};

/// Key holding the serialized catalog
pub const MODULES_KEY: &str = "/modules";

/// A named capability flag
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Permission {
    /// Display label
    pub label: String,

    /// Permission code
    pub code: String,
}

impl Permission {
    /// Create new permission
    pub fn new(label: impl Into<String>, code: impl Into<String>) -> Self {
        Self {
            label: label.into(),
            code: code.into(),
        }
    }
}

/// A registrable capability group, identified by `code`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DiscoveryModule {
    /// Display label, not necessarily unique
    pub label: String,

    /// Unique identity within the catalog
    pub code: String,

    /// Permissions granted by this module
    #[serde(default, deserialize_with = "null_as_empty")]
    pub permissions: Vec<Permission>,
}

impl DiscoveryModule {
    /// Create new module without permissions
    pub fn new(label: impl Into<String>, code: impl Into<String>) -> Self {
        Self {
            label: label.into(),
            code: code.into(),
            permissions: Vec::new(),
        }
    }

    /// Add a permission
    pub fn with_permission(mut self, permission: Permission) -> Self {
        self.permissions.push(permission);
        self
    }
}

/// Ordered module catalog, as stored under [`MODULES_KEY`]
pub type DiscoveryModulesList = Vec<DiscoveryModule>;

// Existing catalogs may carry `"permissions": null` for modules without permissions.
fn null_as_empty<'de, D: Deserializer<'de>>(
    deserializer: D,
) -> std::result::Result<Vec<Permission>, D::Error> {
    Ok(Option::<Vec<Permission>>::deserialize(deserializer)?.unwrap_or_default())
}

/// Encode a catalog to its stored JSON form
pub fn encode_modules(modules: &[DiscoveryModule]) -> Result<Vec<u8>> {
    Ok(serde_json::to_vec(modules)?)
}

/// Decode a catalog from its stored JSON form
pub fn decode_modules(bytes: &[u8]) -> Result<DiscoveryModulesList> {
    serde_json::from_slice(bytes)
        .map_err(|e| RegistryError::Decode(format!("{}: {}", MODULES_KEY, e)))
}

/// Append `module` unless its code is already present. Returns whether it was added.
fn insert_module(modules: &mut DiscoveryModulesList, module: &DiscoveryModule) -> bool {
    if modules.iter().any(|m| m.code == module.code) {
        return false;
    }
    modules.push(module.clone());
    true
}

/// Drop every entry with `code`. Returns how many were removed.
fn remove_module(modules: &mut DiscoveryModulesList, code: &str) -> usize {
    let before = modules.len();
    modules.retain(|m| m.code != code);
    before - modules.len()
}

/// Catalog snapshot plus the revision it was read at (`None` if the key was absent)
struct Snapshot {
    modules: DiscoveryModulesList,
    revision: Option<i64>,
}

/// Maintains the shared module catalog
#[derive(Clone)]
pub struct ModuleRegistry {
    provisioner: Provisioner,
}

impl ModuleRegistry {
    /// Create new module registry
    pub fn new(provisioner: Provisioner) -> Self {
        Self { provisioner }
    }

    async fn read(&self, kv: &dyn KvStore) -> Result<Snapshot> {
        match self.provisioner.request(kv.get(MODULES_KEY)).await? {
            Some(entry) => Ok(Snapshot {
                modules: decode_modules(&entry.value)?,
                revision: Some(entry.mod_revision),
            }),
            None => Ok(Snapshot {
                modules: Vec::new(),
                revision: None,
            }),
        }
    }

    async fn write(&self, kv: &dyn KvStore, modules: &[DiscoveryModule]) -> Result<()> {
        let payload = encode_modules(modules)?;
        self.provisioner.request(kv.put(MODULES_KEY, &payload)).await
    }

    async fn write_checked(&self, kv: &dyn KvStore, snapshot: &Snapshot) -> Result<()> {
        let payload = encode_modules(&snapshot.modules)?;
        let written = self
            .provisioner
            .request(kv.put_if_revision(MODULES_KEY, snapshot.revision, &payload))
            .await?;

        if written {
            Ok(())
        } else {
            warn!("Module catalog changed concurrently, write rejected");
            Err(RegistryError::Conflict(MODULES_KEY.to_string()))
        }
    }

    /// Current catalog. An absent catalog is an empty list.
    pub async fn get_registered_modules(&self) -> Result<DiscoveryModulesList> {
        let kv = self.provisioner.acquire().await?;
        let snapshot = self.read(kv.as_ref()).await?;
        debug!("Read {} registered modules", snapshot.modules.len());
        Ok(snapshot.modules)
    }

    /// Append `module` unless a module with the same code exists.
    ///
    /// Not atomic: a concurrent writer can overwrite this change.
    pub async fn register_module(&self, module: &DiscoveryModule) -> Result<()> {
        let kv = self.provisioner.acquire().await?;
        let mut snapshot = self.read(kv.as_ref()).await?;

        if !insert_module(&mut snapshot.modules, module) {
            debug!("Module {} already registered", module.code);
            return Ok(());
        }

        self.write(kv.as_ref(), &snapshot.modules).await?;
        info!("Registered module {}", module.code);
        Ok(())
    }

    /// Remove every module with the same code. Unknown codes are a no-op.
    ///
    /// Not atomic: a concurrent writer can overwrite this change.
    pub async fn unregister_module(&self, module: &DiscoveryModule) -> Result<()> {
        let kv = self.provisioner.acquire().await?;
        let mut snapshot = self.read(kv.as_ref()).await?;

        if remove_module(&mut snapshot.modules, &module.code) == 0 {
            debug!("Module {} not registered", module.code);
            return Ok(());
        }

        self.write(kv.as_ref(), &snapshot.modules).await?;
        info!("Unregistered module {}", module.code);
        Ok(())
    }

    /// Like [`register_module`](Self::register_module), but fails with
    /// [`RegistryError::Conflict`] if the catalog changed since it was read.
    pub async fn register_module_checked(&self, module: &DiscoveryModule) -> Result<()> {
        let kv = self.provisioner.acquire().await?;
        let mut snapshot = self.read(kv.as_ref()).await?;

        if !insert_module(&mut snapshot.modules, module) {
            debug!("Module {} already registered", module.code);
            return Ok(());
        }

        self.write_checked(kv.as_ref(), &snapshot).await?;
        info!("Registered module {}", module.code);
        Ok(())
    }

    /// Like [`unregister_module`](Self::unregister_module), but fails with
    /// [`RegistryError::Conflict`] if the catalog changed since it was read.
    pub async fn unregister_module_checked(&self, module: &DiscoveryModule) -> Result<()> {
        let kv = self.provisioner.acquire().await?;
        let mut snapshot = self.read(kv.as_ref()).await?;

        if remove_module(&mut snapshot.modules, &module.code) == 0 {
            debug!("Module {} not registered", module.code);
            return Ok(());
        }

        self.write_checked(kv.as_ref(), &snapshot).await?;
        info!("Unregistered module {}", module.code);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_json_field_names() {
        let module = DiscoveryModule::new("Auth", "AUTH")
            .with_permission(Permission::new("Read users", "USERS_READ"));

        let json = String::from_utf8(encode_modules(&[module]).unwrap()).unwrap();
        assert_eq!(
            json,
            r#"[{"label":"Auth","code":"AUTH","permissions":[{"label":"Read users","code":"USERS_READ"}]}]"#
        );
    }

    #[test]
    fn test_decode_null_and_missing_permissions() {
        let modules = decode_modules(
            br#"[{"label":"Auth","code":"AUTH","permissions":null},{"label":"Billing","code":"BILL"}]"#,
        )
        .unwrap();

        assert_eq!(
            modules,
            vec![
                DiscoveryModule::new("Auth", "AUTH"),
                DiscoveryModule::new("Billing", "BILL")
            ]
        );
    }

    #[test]
    fn test_decode_round_trip_preserves_order() {
        let modules = vec![
            DiscoveryModule::new("Zeta", "Z").with_permission(Permission::new("b", "B")),
            DiscoveryModule::new("Alpha", "A")
                .with_permission(Permission::new("y", "Y"))
                .with_permission(Permission::new("x", "X")),
        ];

        let decoded = decode_modules(&encode_modules(&modules).unwrap()).unwrap();
        assert_eq!(decoded, modules);
    }

    #[test]
    fn test_decode_rejects_wrong_shape() {
        assert!(matches!(
            decode_modules(br#"{"label":"Auth"}"#),
            Err(RegistryError::Decode(_))
        ));
        assert!(matches!(decode_modules(b"not json"), Err(RegistryError::Decode(_))));
    }

    #[test]
    fn test_insert_is_keyed_on_code() {
        let mut modules = vec![DiscoveryModule::new("Auth", "AUTH")];

        assert!(!insert_module(&mut modules, &DiscoveryModule::new("Other label", "AUTH")));
        assert!(insert_module(&mut modules, &DiscoveryModule::new("Auth", "AUTH2")));
        assert_eq!(modules.len(), 2);
        assert_eq!(modules[0].label, "Auth");
    }

    #[test]
    fn test_remove_drops_all_matches() {
        let mut modules = vec![
            DiscoveryModule::new("a", "X"),
            DiscoveryModule::new("b", "Y"),
            DiscoveryModule::new("c", "X"),
        ];

        assert_eq!(remove_module(&mut modules, "X"), 2);
        assert_eq!(modules, vec![DiscoveryModule::new("b", "Y")]);
        assert_eq!(remove_module(&mut modules, "missing"), 0);
    }
}

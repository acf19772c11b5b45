//! State store - last-known provisioned state
//!
//! A [`Snapshot`] records, per resource address, the provider id, the
//! resolved input attributes and the provider-returned outputs. Sensitive
//! values never appear in `resources`; they live in the `secrets` section.

use crate::error::{Error, Result};
use crate::types::{Address, Attributes, Value};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

/// Snapshot format version written by this crate
pub const STATE_VERSION: u32 = 1;

// ============================================================================
// Snapshot
// ============================================================================

/// The materialized counterpart of one declaration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResourceRecord {
    /// Provider-assigned identifier
    pub id: String,
    /// Resources this one referenced when it was last applied
    #[serde(default)]
    pub dependencies: Vec<Address>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    /// Resolved input attributes (non-sensitive)
    #[serde(default)]
    pub attributes: Attributes,
    /// Provider-computed attributes (non-sensitive)
    #[serde(default)]
    pub outputs: Attributes,
}

impl ResourceRecord {
    pub fn new(id: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            id: id.into(),
            dependencies: Vec::new(),
            created_at: now,
            updated_at: now,
            attributes: Attributes::new(),
            outputs: Attributes::new(),
        }
    }
}

/// Sensitive inputs and outputs of one resource
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SecretRecord {
    #[serde(default)]
    pub attributes: Attributes,
    #[serde(default)]
    pub outputs: Attributes,
}

impl SecretRecord {
    pub fn is_empty(&self) -> bool {
        self.attributes.is_empty() && self.outputs.is_empty()
    }
}

/// Persisted record of last-known provisioned state
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Snapshot {
    pub version: u32,
    /// Incremented on every save
    pub serial: u64,
    pub last_updated: DateTime<Utc>,
    #[serde(default)]
    pub resources: BTreeMap<Address, ResourceRecord>,
    /// Protected section: sensitive values only
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub secrets: BTreeMap<Address, SecretRecord>,
}

impl Default for Snapshot {
    fn default() -> Self {
        Self {
            version: STATE_VERSION,
            serial: 0,
            last_updated: Utc::now(),
            resources: BTreeMap::new(),
            secrets: BTreeMap::new(),
        }
    }
}

impl Snapshot {
    pub fn new() -> Self {
        Self::default()
    }

    /// Bump the serial and timestamp before a save
    pub fn touch(&mut self) {
        self.serial += 1;
        self.last_updated = Utc::now();
    }

    pub fn is_empty(&self) -> bool {
        self.resources.is_empty()
    }

    pub fn contains(&self, address: &Address) -> bool {
        self.resources.contains_key(address)
    }

    pub fn record(&self, address: &Address) -> Option<&ResourceRecord> {
        self.resources.get(address)
    }

    pub fn secrets(&self, address: &Address) -> Option<&SecretRecord> {
        self.secrets.get(address)
    }

    pub fn addresses(&self) -> impl Iterator<Item = &Address> {
        self.resources.keys()
    }

    /// All input attributes, sensitive ones included
    pub fn inputs(&self, address: &Address) -> Option<Attributes> {
        let record = self.resources.get(address)?;
        let mut inputs = record.attributes.clone();
        if let Some(secret) = self.secrets.get(address) {
            inputs.extend(secret.attributes.clone());
        }
        Some(inputs)
    }

    /// Look up an attribute; outputs win over inputs
    ///
    /// Returns the value and whether it is sensitive.
    pub fn lookup(&self, address: &Address, attribute: &str) -> Option<(Value, bool)> {
        let record = self.resources.get(address)?;
        let secret = self.secrets.get(address);
        if let Some(v) = record.outputs.get(attribute) {
            return Some((v.clone(), false));
        }
        if let Some(v) = secret.and_then(|s| s.outputs.get(attribute)) {
            return Some((v.clone(), true));
        }
        if attribute == "id" {
            return Some((Value::String(record.id.clone()), false));
        }
        if let Some(v) = record.attributes.get(attribute) {
            return Some((v.clone(), false));
        }
        secret
            .and_then(|s| s.attributes.get(attribute))
            .map(|v| (v.clone(), true))
    }

    /// Insert or replace a resource record and its secrets
    pub fn upsert(&mut self, address: Address, record: ResourceRecord, secrets: SecretRecord) {
        if secrets.is_empty() {
            self.secrets.remove(&address);
        } else {
            self.secrets.insert(address.clone(), secrets);
        }
        self.resources.insert(address, record);
    }

    /// Forget a resource
    pub fn remove(&mut self, address: &Address) -> Option<ResourceRecord> {
        self.secrets.remove(address);
        self.resources.remove(address)
    }
}

// ============================================================================
// Stores
// ============================================================================

/// Where snapshots are persisted
pub trait StateStore: Send + Sync {
    /// Last snapshot, or an empty one if none exists
    fn load(&self) -> Result<Snapshot>;

    /// Persist a snapshot; a failed save leaves the previous one intact
    fn save(&self, snapshot: &Snapshot) -> Result<()>;
}

/// TOML snapshot on disk, written with write-new-then-swap
#[derive(Debug, Clone)]
pub struct FileStateStore {
    path: PathBuf,
}

impl FileStateStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Copy of the previous snapshot kept on every save
    pub fn backup_path(&self) -> PathBuf {
        let mut name = self
            .path
            .file_name()
            .map(|n| n.to_os_string())
            .unwrap_or_default();
        name.push(".backup");
        self.path.with_file_name(name)
    }

    fn state_error(&self, message: impl Into<String>) -> Error {
        Error::State {
            path: self.path.clone(),
            message: message.into(),
        }
    }
}

impl StateStore for FileStateStore {
    fn load(&self) -> Result<Snapshot> {
        if !self.path.exists() {
            log::debug!("State file does not exist, using empty snapshot");
            return Ok(Snapshot::default());
        }

        let content = fs::read_to_string(&self.path)?;
        let snapshot: Snapshot = toml::from_str(&content)
            .map_err(|e| self.state_error(format!("failed to parse: {e}")))?;

        if snapshot.version > STATE_VERSION {
            return Err(self.state_error(format!(
                "written by a newer version (format {}, supported {})",
                snapshot.version, STATE_VERSION
            )));
        }

        log::debug!(
            "Loaded state serial {} from {}",
            snapshot.serial,
            self.path.display()
        );
        Ok(snapshot)
    }

    fn save(&self, snapshot: &Snapshot) -> Result<()> {
        let dir = match self.path.parent() {
            Some(p) if !p.as_os_str().is_empty() => p.to_path_buf(),
            _ => PathBuf::from("."),
        };
        fs::create_dir_all(&dir)?;

        let content = toml::to_string_pretty(snapshot)
            .map_err(|e| self.state_error(format!("failed to serialize: {e}")))?;

        let mut tmp = tempfile::NamedTempFile::new_in(&dir)?;
        tmp.write_all(content.as_bytes())?;
        tmp.as_file().sync_all()?;

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            fs::set_permissions(tmp.path(), fs::Permissions::from_mode(0o600))?;
        }

        if self.path.exists() {
            fs::copy(&self.path, self.backup_path())?;
        }

        tmp.persist(&self.path).map_err(|e| Error::Io(e.error))?;

        log::debug!(
            "Saved state serial {} to {}",
            snapshot.serial,
            self.path.display()
        );
        Ok(())
    }
}

/// In-memory store for plans, tests and embedding
#[derive(Debug, Default)]
pub struct MemoryStateStore {
    snapshot: Mutex<Option<Snapshot>>,
}

impl MemoryStateStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl StateStore for MemoryStateStore {
    fn load(&self) -> Result<Snapshot> {
        let guard = match self.snapshot.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        Ok(guard.clone().unwrap_or_default())
    }

    fn save(&self, snapshot: &Snapshot) -> Result<()> {
        let mut guard = match self.snapshot.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        *guard = Some(snapshot.clone());
        Ok(())
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn addr(s: &str) -> Address {
        s.parse().unwrap()
    }

    fn sample_snapshot() -> Snapshot {
        let mut snapshot = Snapshot::new();

        let mut network = ResourceRecord::new("enp-1");
        network.attributes.insert("name".into(), Value::from("analytics"));
        snapshot.upsert(addr("vpc_network.main"), network, SecretRecord::default());

        let mut key = ResourceRecord::new("aje-1");
        key.dependencies.push(addr("iam_service_account.sa"));
        key.outputs.insert("access_key".into(), Value::from("YCAJ"));
        let mut secrets = SecretRecord::default();
        secrets
            .outputs
            .insert("secret_key".into(), Value::from("s3cr3t"));
        snapshot.upsert(addr("iam_static_access_key.sa"), key, secrets);
        snapshot
    }

    #[test]
    fn test_load_missing_is_empty() {
        let dir = TempDir::new().unwrap();
        let store = FileStateStore::new(dir.path().join("state.toml"));
        let snapshot = store.load().unwrap();
        assert!(snapshot.is_empty());
        assert_eq!(snapshot.serial, 0);
        assert_eq!(snapshot.version, STATE_VERSION);
    }

    #[test]
    fn test_save_then_load() {
        let dir = TempDir::new().unwrap();
        let store = FileStateStore::new(dir.path().join("state.toml"));
        let mut snapshot = sample_snapshot();
        snapshot.touch();
        store.save(&snapshot).unwrap();

        let loaded = store.load().unwrap();
        assert_eq!(loaded.serial, 1);
        assert_eq!(loaded.resources, snapshot.resources);
        assert_eq!(loaded.secrets, snapshot.secrets);
    }

    #[test]
    fn test_secrets_stay_in_protected_section() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("state.toml");
        let store = FileStateStore::new(&path);
        store.save(&sample_snapshot()).unwrap();

        let content = fs::read_to_string(&path).unwrap();
        let secrets_at = content.find("[secrets").unwrap();
        let secret_at = content.find("s3cr3t").unwrap();
        assert!(secret_at > secrets_at);
        assert_eq!(content.matches("s3cr3t").count(), 1);
    }

    #[test]
    fn test_save_keeps_backup_and_no_temp_files() {
        let dir = TempDir::new().unwrap();
        let store = FileStateStore::new(dir.path().join("state.toml"));

        let mut snapshot = sample_snapshot();
        snapshot.touch();
        store.save(&snapshot).unwrap();
        snapshot.remove(&addr("vpc_network.main"));
        snapshot.touch();
        store.save(&snapshot).unwrap();

        let backup: Snapshot =
            toml::from_str(&fs::read_to_string(store.backup_path()).unwrap()).unwrap();
        assert_eq!(backup.serial, 1);
        assert!(backup.contains(&addr("vpc_network.main")));
        assert!(!store.load().unwrap().contains(&addr("vpc_network.main")));

        let mut names: Vec<String> = fs::read_dir(dir.path())
            .unwrap()
            .map(|e| e.unwrap().file_name().to_string_lossy().to_string())
            .collect();
        names.sort();
        assert_eq!(names, vec!["state.toml", "state.toml.backup"]);
    }

    #[cfg(unix)]
    #[test]
    fn test_state_file_is_private() {
        use std::os::unix::fs::PermissionsExt;

        let dir = TempDir::new().unwrap();
        let store = FileStateStore::new(dir.path().join("state.toml"));
        store.save(&sample_snapshot()).unwrap();
        let mode = fs::metadata(store.path()).unwrap().permissions().mode();
        assert_eq!(mode & 0o777, 0o600);
    }

    #[test]
    fn test_corrupt_state_is_an_error() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("state.toml");
        fs::write(&path, "this is = = not toml").unwrap();
        let err = FileStateStore::new(&path).load().unwrap_err();
        assert!(matches!(err, Error::State { .. }));
    }

    #[test]
    fn test_lookup_prefers_outputs_and_flags_secrets() {
        let snapshot = sample_snapshot();
        let key = addr("iam_static_access_key.sa");
        assert_eq!(
            snapshot.lookup(&key, "access_key"),
            Some((Value::from("YCAJ"), false))
        );
        assert_eq!(
            snapshot.lookup(&key, "secret_key"),
            Some((Value::from("s3cr3t"), true))
        );
        assert_eq!(
            snapshot.lookup(&key, "id"),
            Some((Value::from("aje-1"), false))
        );
        assert_eq!(snapshot.lookup(&key, "missing"), None);
    }

    #[test]
    fn test_remove_drops_secrets() {
        let mut snapshot = sample_snapshot();
        let key = addr("iam_static_access_key.sa");
        assert!(snapshot.remove(&key).is_some());
        assert!(snapshot.secrets(&key).is_none());
    }

    #[test]
    fn test_memory_store() {
        let store = MemoryStateStore::new();
        assert!(store.load().unwrap().is_empty());
        store.save(&sample_snapshot()).unwrap();
        assert_eq!(store.load().unwrap().resources.len(), 2);
    }
}

use anyhow::Context;
use serde_derive::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, info, warn};

/// Schema version written by this build.
pub const CONFIG_VERSION: u32 = 2;

pub const DEFAULT_UPDATE_INTERVAL_SECS: u64 = 30;
pub const MIN_UPDATE_INTERVAL_SECS: u64 = 5;
pub const MAX_UPDATE_INTERVAL_SECS: u64 = 3600;

/// Connection settings entered in the setup form.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EntryData {
    pub name: String,
    pub host: String,
}

/// User-tunable settings for an entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct EntryOptions {
    #[serde(default = "default_update_interval")]
    pub update_interval: u64,
}

fn default_update_interval() -> u64 {
    DEFAULT_UPDATE_INTERVAL_SECS
}

impl Default for EntryOptions {
    fn default() -> Self {
        Self {
            update_interval: DEFAULT_UPDATE_INTERVAL_SECS,
        }
    }
}

/// Whether `secs` is an accepted poll interval.
pub fn update_interval_in_range(secs: u64) -> bool {
    (MIN_UPDATE_INTERVAL_SECS..=MAX_UPDATE_INTERVAL_SECS).contains(&secs)
}

impl EntryOptions {
    pub fn update_interval(&self) -> Duration {
        Duration::from_secs(self.update_interval)
    }
}

/// A configured meter at the current schema version.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConfigEntry {
    pub entry_id: String,
    pub title: String,
    /// Device serial number
    pub unique_id: String,
    pub data: EntryData,
    pub options: EntryOptions,
}

impl ConfigEntry {
    pub fn new(title: impl Into<String>, unique_id: impl Into<String>, data: EntryData) -> Self {
        Self {
            entry_id: uuid::Uuid::new_v4().simple().to_string(),
            title: title.into(),
            unique_id: unique_id.into(),
            data,
            options: EntryOptions::default(),
        }
    }
}

/// An entry as found on disk, at whatever version wrote it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoredEntry {
    pub entry_id: String,
    pub version: u32,
    pub title: String,
    #[serde(default)]
    pub unique_id: Option<String>,
    #[serde(default)]
    pub data: Map<String, Value>,
    #[serde(default)]
    pub options: Map<String, Value>,
}

impl From<&ConfigEntry> for StoredEntry {
    fn from(entry: &ConfigEntry) -> Self {
        let data = Map::from_iter([
            ("name".to_string(), Value::from(entry.data.name.clone())),
            ("host".to_string(), Value::from(entry.data.host.clone())),
        ]);
        let options = Map::from_iter([(
            "update_interval".to_string(),
            Value::from(entry.options.update_interval),
        )]);
        Self {
            entry_id: entry.entry_id.clone(),
            version: CONFIG_VERSION,
            title: entry.title.clone(),
            unique_id: Some(entry.unique_id.clone()),
            data,
            options,
        }
    }
}

impl TryFrom<&StoredEntry> for ConfigEntry {
    type Error = anyhow::Error;

    fn try_from(stored: &StoredEntry) -> Result<Self, Self::Error> {
        if stored.version != CONFIG_VERSION {
            anyhow::bail!(
                "entry {} is at version {}, expected {}",
                stored.entry_id,
                stored.version,
                CONFIG_VERSION
            );
        }
        let data: EntryData = serde_json::from_value(Value::Object(stored.data.clone()))
            .with_context(|| format!("invalid data in entry {}", stored.entry_id))?;
        let options: EntryOptions = serde_json::from_value(Value::Object(stored.options.clone()))
            .with_context(|| format!("invalid options in entry {}", stored.entry_id))?;
        if !update_interval_in_range(options.update_interval) {
            anyhow::bail!(
                "entry {} has update interval {}s, expected {MIN_UPDATE_INTERVAL_SECS}..={MAX_UPDATE_INTERVAL_SECS}",
                stored.entry_id,
                options.update_interval
            );
        }
        let unique_id = stored
            .unique_id
            .clone()
            .with_context(|| format!("entry {} has no unique id", stored.entry_id))?;
        Ok(Self {
            entry_id: stored.entry_id.clone(),
            title: stored.title.clone(),
            unique_id,
            data,
            options,
        })
    }
}

/// Upgrades a stored entry to [`CONFIG_VERSION`] in place.
///
/// Returns `false`, leaving the entry untouched, when it was written by a newer
/// version or cannot be upgraded.
pub fn migrate_entry(entry: &mut StoredEntry) -> bool {
    debug!(entry_id = %entry.entry_id, version = entry.version, "Migrating configuration");

    if entry.version > CONFIG_VERSION {
        warn!(
            entry_id = %entry.entry_id,
            version = entry.version,
            "Configuration is from a newer version, refusing to migrate"
        );
        return false;
    }

    if entry.version == 1 {
        // `hostname` was renamed to `host`
        let Some(host) = entry.data.get("hostname").cloned() else {
            warn!(entry_id = %entry.entry_id, "Version 1 configuration has no hostname");
            return false;
        };
        entry.data.remove("hostname");
        entry.data.insert("host".to_string(), host);
        entry.version = CONFIG_VERSION;
    }

    debug!(entry_id = %entry.entry_id, version = entry.version, "Migration successful");
    true
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct StoreFile {
    #[serde(default)]
    entries: Vec<StoredEntry>,
}

/// JSON file holding every configured meter.
#[derive(Debug)]
pub struct ConfigStore {
    path: PathBuf,
    entries: Vec<StoredEntry>,
    dirty: bool,
}

impl ConfigStore {
    /// Opens the store, starting empty if the file does not exist yet.
    pub fn open(path: impl Into<PathBuf>) -> anyhow::Result<Self> {
        let path = path.into();
        let entries = if path.is_file() {
            let raw = std::fs::read_to_string(&path)
                .with_context(|| format!("reading {}", path.display()))?;
            let file: StoreFile = serde_json::from_str(&raw)
                .with_context(|| format!("parsing {}", path.display()))?;
            file.entries
        } else {
            Vec::new()
        };
        debug!(path = %path.display(), entries = entries.len(), "Opened config store");
        Ok(Self {
            path,
            entries,
            dirty: false,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Migrates every entry and resets missing or out-of-range options to the defaults.
    ///
    /// Returns the ids of entries that could not be migrated.
    pub fn migrate(&mut self) -> Vec<String> {
        let mut failed = Vec::new();
        for entry in &mut self.entries {
            let version = entry.version;
            if !migrate_entry(entry) {
                failed.push(entry.entry_id.clone());
                continue;
            }
            if entry.version != version {
                self.dirty = true;
            }
            let interval = entry.options.get("update_interval");
            let valid = interval
                .and_then(Value::as_u64)
                .is_some_and(update_interval_in_range);
            if !valid {
                if let Some(interval) = interval {
                    warn!(
                        entry_id = %entry.entry_id,
                        %interval,
                        "Update interval out of range, resetting to default"
                    );
                }
                entry.options.insert(
                    "update_interval".to_string(),
                    Value::from(DEFAULT_UPDATE_INTERVAL_SECS),
                );
                self.dirty = true;
            }
        }
        failed
    }

    /// Entries usable at the current schema version.
    pub fn entries(&self) -> Vec<ConfigEntry> {
        self.entries
            .iter()
            .filter_map(|stored| match ConfigEntry::try_from(stored) {
                Ok(entry) => Some(entry),
                Err(err) => {
                    warn!(error = format!("{err:#}"), "Skipping configuration entry");
                    None
                }
            })
            .collect()
    }

    pub fn stored_entries(&self) -> &[StoredEntry] {
        &self.entries
    }

    pub fn contains_unique_id(&self, unique_id: &str) -> bool {
        self.entries
            .iter()
            .any(|entry| entry.unique_id.as_deref() == Some(unique_id))
    }

    pub fn add(&mut self, entry: &ConfigEntry) {
        info!(entry_id = %entry.entry_id, title = %entry.title, "Adding configuration entry");
        self.entries.push(StoredEntry::from(entry));
        self.dirty = true;
    }

    pub fn update_options(&mut self, entry_id: &str, options: EntryOptions) -> anyhow::Result<()> {
        let entry = self
            .entries
            .iter_mut()
            .find(|entry| entry.entry_id == entry_id)
            .with_context(|| format!("no configuration entry {entry_id}"))?;
        entry.options.insert(
            "update_interval".to_string(),
            Value::from(options.update_interval),
        );
        self.dirty = true;
        Ok(())
    }

    pub fn is_dirty(&self) -> bool {
        self.dirty
    }

    pub fn save(&mut self) -> anyhow::Result<()> {
        let file = StoreFile {
            entries: self.entries.clone(),
        };
        let raw = serde_json::to_string_pretty(&file)?;
        std::fs::write(&self.path, raw)
            .with_context(|| format!("writing {}", self.path.display()))?;
        self.dirty = false;
        debug!(path = %self.path.display(), "Saved config store");
        Ok(())
    }
}

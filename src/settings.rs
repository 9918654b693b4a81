//! Persistent key/value settings store.
//!
//! The core treats settings as an opaque collaborator: short string keys,
//! string or i32 values, default fallback when a key is missing. App-scoped
//! variants suffix the key with the active application id so each flashed
//! application keeps its own copy. [`TomlSettings`] is the host-side
//! implementation, one TOML table written back on every change.

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::{PoisonError, RwLock};

use tracing::{debug, warn};

/// Logical path of the active ROM.
pub const KEY_ROM_FILE_PATH: &str = "RomFilePath";
/// One-shot start action, see [`crate::app::StartAction`].
pub const KEY_START_ACTION: &str = "StartAction";
/// Boot-once flag: 0 means return to the launcher on the next restart.
pub const KEY_STARTUP_APP: &str = "StartupApp";
/// Application id last selected in the launcher.
pub const KEY_SELECTED_APP: &str = "SelectedApp";

pub trait SettingsStore: Send + Sync {
    fn get_str(&self, key: &str, default: &str) -> String;
    fn set_str(&self, key: &str, value: &str);
    fn get_i32(&self, key: &str, default: i32) -> i32;
    fn set_i32(&self, key: &str, value: i32);

    /// App-scoped read: the key is suffixed with the application id.
    fn get_app_i32(&self, key: &str, app_id: i32, default: i32) -> i32 {
        self.get_i32(&app_key(key, app_id), default)
    }

    fn set_app_i32(&self, key: &str, app_id: i32, value: i32) {
        self.set_i32(&app_key(key, app_id), value);
    }
}

fn app_key(key: &str, app_id: i32) -> String {
    format!("{key}.{app_id}")
}

/// TOML-file-backed settings table.
pub struct TomlSettings {
    path: PathBuf,
    values: RwLock<BTreeMap<String, toml::Value>>,
}

impl TomlSettings {
    /// Loads the table from `path`, starting empty if the file is missing
    /// or unparseable (settings fall back to defaults either way).
    pub fn load(path: PathBuf) -> Self {
        let values = match std::fs::read_to_string(&path) {
            Ok(text) => toml::from_str(&text).unwrap_or_else(|e| {
                warn!("settings file {} unparseable: {e}", path.display());
                BTreeMap::new()
            }),
            Err(_) => BTreeMap::new(),
        };
        Self {
            path,
            values: RwLock::new(values),
        }
    }

    fn persist(&self, values: &BTreeMap<String, toml::Value>) {
        let text = match toml::to_string_pretty(values) {
            Ok(text) => text,
            Err(e) => {
                warn!("failed to serialize settings: {e}");
                return;
            }
        };
        if let Some(parent) = self.path.parent() {
            let _ = std::fs::create_dir_all(parent);
        }
        if let Err(e) = std::fs::write(&self.path, text) {
            warn!("failed to write settings file {}: {e}", self.path.display());
        }
    }

    fn set_value(&self, key: &str, value: toml::Value) {
        let mut values = self
            .values
            .write()
            .unwrap_or_else(PoisonError::into_inner);
        if values.get(key) == Some(&value) {
            return;
        }
        debug!("settings: {key} = {value}");
        values.insert(key.to_string(), value);
        self.persist(&values);
    }
}

impl SettingsStore for TomlSettings {
    fn get_str(&self, key: &str, default: &str) -> String {
        let values = self.values.read().unwrap_or_else(PoisonError::into_inner);
        match values.get(key) {
            Some(toml::Value::String(s)) => s.clone(),
            _ => default.to_string(),
        }
    }

    fn set_str(&self, key: &str, value: &str) {
        self.set_value(key, toml::Value::String(value.to_string()));
    }

    fn get_i32(&self, key: &str, default: i32) -> i32 {
        let values = self.values.read().unwrap_or_else(PoisonError::into_inner);
        match values.get(key) {
            Some(toml::Value::Integer(v)) => *v as i32,
            _ => default,
        }
    }

    fn set_i32(&self, key: &str, value: i32) {
        self.set_value(key, toml::Value::Integer(i64::from(value)));
    }
}

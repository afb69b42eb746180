//! JSON-backed state store: config defaults, templates, and session records.
//!
//! The state file is a single JSON object written with sorted keys, 2-space
//! indentation, and a trailing newline. It is loaded fresh at process start
//! and written back atomically (temp file plus rename in the destination
//! directory) at the end of each mutating command. There is no locking;
//! concurrent invocations race and the last writer wins, but each individual
//! save is all-or-nothing.

use std::collections::BTreeMap;

use camino::{Utf8Path, Utf8PathBuf};
use cap_std::{ambient_authority, fs_utf8::Dir};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use thiserror::Error;
use uuid::Uuid;

use crate::util::{expand_tilde, now_iso_utc};

/// Environment variable overriding the state file location.
pub const STATE_FILE_ENV: &str = "SKIFF_STATE_FILE";

/// Current schema tag written to new state documents.
pub const STATE_SCHEMA_VERSION: u32 = 1;

/// Status strings written by skiff itself. The provider may report others;
/// `status` stays a free-form string so new provider codes pass through.
pub mod status {
    /// Instance created but never started.
    pub const CREATED: &str = "Created";
    /// Start issued; waiting for the provider to report `Running`.
    pub const STARTING: &str = "Starting";
    /// Provider reports the instance as running.
    pub const RUNNING: &str = "Running";
    /// Stop issued; waiting for the provider to report `Stopped`.
    pub const STOPPING: &str = "Stopping";
    /// Provider reports the instance as stopped.
    pub const STOPPED: &str = "Stopped";
    /// The start call after creation failed; see `last_error`.
    pub const START_FAILED: &str = "StartFailed";
    /// A sync pass could not find the instance in any queried region.
    pub const NOT_FOUND: &str = "NotFound";
}

/// Errors raised by the state store.
#[derive(Debug, Error)]
pub enum StateError {
    /// Raised when the state file is not valid JSON or a top-level field has
    /// the wrong shape.
    #[error("state file {path} is corrupted: {message}")]
    Corrupt {
        /// Path of the offending file.
        path: Utf8PathBuf,
        /// Parser or shape error message.
        message: String,
    },
    /// Raised when file system operations fail.
    #[error("failed to access {path}: {message}")]
    Io {
        /// Path that could not be accessed.
        path: Utf8PathBuf,
        /// Human-readable error message.
        message: String,
    },
    /// Raised when no home directory can be determined for the default path.
    #[error("cannot determine home directory: set HOME or {STATE_FILE_ENV}")]
    MissingHome,
    /// Raised when the document cannot be serialized.
    #[error("failed to serialize state: {message}")]
    Serialize {
        /// Serializer error message.
        message: String,
    },
}

/// A named, reusable partial configuration applied as the middle layer when
/// resolving effective create parameters.
#[derive(Clone, Debug, Default, Deserialize, PartialEq, Serialize)]
pub struct Template {
    /// Template name (also the key in `StateDocument::templates`).
    #[serde(default)]
    pub name: String,
    /// Free-text description shown by `template list`.
    #[serde(default)]
    pub description: String,
    /// Partial config override set; same key space as the global config.
    #[serde(default)]
    pub config: Map<String, Value>,
    /// Creation timestamp (UTC, RFC 3339).
    #[serde(default)]
    pub created_at: Option<String>,
    /// Last mutation timestamp (UTC, RFC 3339).
    #[serde(default)]
    pub updated_at: Option<String>,
}

/// One named session: a handle to exactly one remote instance plus cached
/// observational state.
///
/// Observed-state fields (`status`, `public_ip`, `private_ip`,
/// `last_refresh_at`, `last_error`, `missing_since`) are mutated only by
/// lifecycle and sync operations, never directly by the user.
#[derive(Clone, Debug, Default, Deserialize, Eq, PartialEq, Serialize)]
pub struct SessionRecord {
    /// Session name; unique key in `StateDocument::sessions`.
    #[serde(default)]
    pub name: String,
    /// Template used at creation time, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub template: Option<String>,
    /// Region the instance lives in.
    #[serde(default)]
    pub region_id: String,
    /// Remote instance identifier; assigned once at creation, immutable
    /// thereafter, and the sole join key used by sync.
    #[serde(default)]
    pub instance_id: String,
    /// Image the instance was created from.
    #[serde(default)]
    pub image_id: Option<String>,
    /// Commercial instance type.
    #[serde(default)]
    pub instance_type: Option<String>,
    /// Instance name as known to the provider.
    #[serde(default)]
    pub instance_name: Option<String>,
    /// OS hostname requested at creation, if any.
    #[serde(default)]
    pub hostname: Option<String>,
    /// Key pair attached at creation; absent for imported sessions.
    #[serde(default)]
    pub key_pair_name: Option<String>,
    /// System disk category actually used at creation.
    #[serde(default)]
    pub system_disk_category: Option<String>,
    /// System disk size in GB.
    #[serde(default)]
    pub system_disk_size: Option<i64>,
    /// ESSD performance level.
    #[serde(default)]
    pub system_disk_performance_level: Option<String>,
    /// Creation timestamp (UTC, RFC 3339).
    #[serde(default)]
    pub created_at: Option<String>,
    /// Set when the record was imported by `sync --import`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub imported_at: Option<String>,
    /// Last observed provider status (free-form string).
    #[serde(default)]
    pub status: String,
    /// Last observed public IP.
    #[serde(default)]
    pub public_ip: Option<String>,
    /// Last observed private IP.
    #[serde(default)]
    pub private_ip: Option<String>,
    /// SSH user for connect/scp; falls back to global config then `root`.
    #[serde(default)]
    pub ssh_user: Option<String>,
    /// When the record was last refreshed from the provider.
    #[serde(default)]
    pub last_refresh_at: Option<String>,
    /// Last lifecycle error captured for this session.
    #[serde(default)]
    pub last_error: Option<String>,
    /// Set when a sync pass cannot find the instance; cleared on the next
    /// successful match. Absent from the JSON when unset.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub missing_since: Option<String>,
}

impl SessionRecord {
    /// Returns `(region_id, instance_id)` when both are recorded, which is
    /// the precondition for any remote operation on this session.
    #[must_use]
    pub fn instance_ref(&self) -> Option<(&str, &str)> {
        let region = self.region_id.trim();
        let instance = self.instance_id.trim();
        if region.is_empty() || instance.is_empty() {
            return None;
        }
        Some((region, instance))
    }
}

/// Root of the persisted state file.
#[derive(Clone, Debug, Deserialize, PartialEq, Serialize)]
pub struct StateDocument {
    /// Schema tag; defaults to [`STATE_SCHEMA_VERSION`] when absent.
    #[serde(default = "default_version")]
    pub version: u32,
    /// Timestamp the document was first created.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_at: Option<String>,
    /// Timestamp of the last save; stamped by [`StateStore::save`].
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<String>,
    /// Global config defaults; normalization fills the canonical key set.
    #[serde(default)]
    pub config: Map<String, Value>,
    /// Named templates.
    #[serde(default)]
    pub templates: BTreeMap<String, Template>,
    /// Named session records.
    #[serde(default)]
    pub sessions: BTreeMap<String, SessionRecord>,
    /// Unknown top-level keys: preserved across load/save, otherwise ignored.
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

const fn default_version() -> u32 {
    STATE_SCHEMA_VERSION
}

impl Default for StateDocument {
    fn default() -> Self {
        Self::new()
    }
}

impl StateDocument {
    /// Builds a fresh default document with the canonical config key set.
    #[must_use]
    pub fn new() -> Self {
        Self {
            version: STATE_SCHEMA_VERSION,
            created_at: Some(now_iso_utc()),
            updated_at: None,
            config: default_config(),
            templates: BTreeMap::new(),
            sessions: BTreeMap::new(),
            extra: Map::new(),
        }
    }

    /// Fills missing canonical config keys with their defaults. Keys beyond
    /// the canonical set are preserved untouched. Idempotent.
    pub fn normalize(&mut self) {
        for (key, value) in default_config() {
            self.config.entry(key).or_insert(value);
        }
    }

    /// Looks up a config value as a trimmed, non-empty string.
    #[must_use]
    pub fn config_str(&self, key: &str) -> Option<&str> {
        self.config
            .get(key)
            .and_then(Value::as_str)
            .map(str::trim)
            .filter(|value| !value.is_empty())
    }

    /// Looks up a config value as an integer.
    #[must_use]
    pub fn config_i64(&self, key: &str) -> Option<i64> {
        self.config.get(key).and_then(Value::as_i64)
    }

    /// Looks up a config value as a boolean, with a fallback for missing or
    /// null entries.
    #[must_use]
    pub fn config_bool(&self, key: &str, default: bool) -> bool {
        self.config
            .get(key)
            .and_then(Value::as_bool)
            .unwrap_or(default)
    }
}

/// Returns the canonical default config map.
///
/// Every key listed here is present in a normalized document, even when the
/// value is null or empty.
#[must_use]
pub fn default_config() -> Map<String, Value> {
    let defaults = serde_json::json!({
        // Placement
        "region_id": "",
        "image_id": "",
        "instance_type": "",
        "security_group_id": "",
        "v_switch_id": "",
        "key_pair_name": "",
        // System disk; null lets the provider pick its defaults.
        "system_disk_category": null,
        "system_disk_size": null,
        "system_disk_performance_level": null,
        // Ordered fallback categories tried when the provider rejects the
        // default category for the chosen instance family.
        "system_disk_category_fallbacks": ["cloud_auto", "cloud_essd"],
        // Public IP allocation
        "auto_allocate_public_ip": true,
        "internet_charge_type": "PayByTraffic",
        "internet_max_bandwidth_out": 10,
        // Spot / preemptible instances
        "spot_strategy": "SpotAsPriceGo",
        "spot_price_limit": null,
        "spot_duration": null,
        "spot_interruption_behavior": null,
        // OS hostname
        "hostname": null,
        "set_hostname_to_session": true,
        // SSH
        "ssh_user": "root",
        "ssh_private_key_path": "",
        "ssh_strict_host_key_checking": false,
        "ssh_extra_args": [],
        "ssh_config_host_prefix": "skiff-",
        "auto_ssh_config": true,
        // Polling / timeouts
        "timeout_seconds": 600,
        "poll_interval_seconds": 5,
        // Arbitrary user metadata carried along untouched.
        "meta": {},
    });
    match defaults {
        Value::Object(map) => map,
        _ => Map::new(),
    }
}

/// Returns the canonical config keys accepted by `config set`, sorted.
#[must_use]
pub fn known_config_keys() -> Vec<String> {
    default_config().keys().cloned().collect()
}

/// Loads and saves [`StateDocument`]s at a resolved path.
#[derive(Clone, Debug)]
pub struct StateStore {
    path: Utf8PathBuf,
}

impl StateStore {
    /// Creates a store for an explicit path.
    #[must_use]
    pub const fn new(path: Utf8PathBuf) -> Self {
        Self { path }
    }

    /// Resolves the state file location: explicit argument, then the
    /// `SKIFF_STATE_FILE` environment variable, then
    /// `~/.skiff/state.json`.
    ///
    /// # Errors
    ///
    /// Returns [`StateError::MissingHome`] when no explicit path or override
    /// is given and the home directory cannot be determined.
    pub fn resolve(explicit: Option<Utf8PathBuf>) -> Result<Self, StateError> {
        if let Some(path) = explicit {
            return Ok(Self::new(Utf8PathBuf::from(expand_tilde(path.as_str()))));
        }
        if let Some(env) = std::env::var_os(STATE_FILE_ENV) {
            let raw = env.to_string_lossy().into_owned();
            if !raw.trim().is_empty() {
                return Ok(Self::new(Utf8PathBuf::from(expand_tilde(&raw))));
            }
        }
        let home = home_dir().ok_or(StateError::MissingHome)?;
        Ok(Self::new(home.join(".skiff").join("state.json")))
    }

    /// Returns the resolved state file path.
    #[must_use]
    pub fn path(&self) -> &Utf8Path {
        &self.path
    }

    /// Loads the state document, returning a fresh default when the file
    /// does not exist yet.
    ///
    /// # Errors
    ///
    /// Returns [`StateError::Corrupt`] when the file contents are not valid
    /// JSON or a top-level field has the wrong shape, and
    /// [`StateError::Io`] for filesystem failures.
    pub fn load(&self) -> Result<StateDocument, StateError> {
        let Some(contents) = self.read_optional()? else {
            return Ok(StateDocument::new());
        };
        let mut document: StateDocument =
            serde_json::from_str(&contents).map_err(|err| StateError::Corrupt {
                path: self.path.clone(),
                message: err.to_string(),
            })?;
        document.normalize();
        Ok(document)
    }

    /// Normalizes the document, stamps `updated_at`, and atomically replaces
    /// the state file: the content is written to a uniquely named temp file
    /// in the destination directory and renamed over the target, so the
    /// previous valid document survives an interrupted save.
    ///
    /// # Errors
    ///
    /// Returns [`StateError::Io`] when the directory or file cannot be
    /// written, or [`StateError::Serialize`] when encoding fails.
    pub fn save(&self, document: &mut StateDocument) -> Result<(), StateError> {
        document.normalize();
        if document.created_at.is_none() {
            document.created_at = Some(now_iso_utc());
        }
        document.updated_at = Some(now_iso_utc());
        let rendered = render_document(document)?;
        self.atomic_write(rendered.as_bytes())
    }

    fn read_optional(&self) -> Result<Option<String>, StateError> {
        let (parent, file_name) = split_path(&self.path)?;
        let dir = match Dir::open_ambient_dir(parent, ambient_authority()) {
            Ok(dir) => dir,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(err) => {
                return Err(StateError::Io {
                    path: parent.to_path_buf(),
                    message: err.to_string(),
                });
            }
        };
        match dir.read_to_string(file_name) {
            Ok(contents) => Ok(Some(contents)),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(err) => Err(StateError::Io {
                path: self.path.clone(),
                message: err.to_string(),
            }),
        }
    }

    fn atomic_write(&self, bytes: &[u8]) -> Result<(), StateError> {
        let (parent, file_name) = split_path(&self.path)?;
        Dir::create_ambient_dir_all(parent, ambient_authority()).map_err(|err| StateError::Io {
            path: parent.to_path_buf(),
            message: err.to_string(),
        })?;
        let dir =
            Dir::open_ambient_dir(parent, ambient_authority()).map_err(|err| StateError::Io {
                path: parent.to_path_buf(),
                message: err.to_string(),
            })?;

        let temp_name = format!("{file_name}.{}.tmp", Uuid::new_v4().simple());
        dir.write(&temp_name, bytes).map_err(|err| StateError::Io {
            path: self.path.clone(),
            message: err.to_string(),
        })?;
        if let Err(err) = dir.rename(&temp_name, &dir, file_name) {
            dir.remove_file(&temp_name).ok();
            return Err(StateError::Io {
                path: self.path.clone(),
                message: err.to_string(),
            });
        }
        Ok(())
    }
}

fn split_path(path: &Utf8Path) -> Result<(&Utf8Path, &str), StateError> {
    let parent = path.parent().unwrap_or_else(|| Utf8Path::new("."));
    let file_name = path.file_name().ok_or_else(|| StateError::Io {
        path: path.to_path_buf(),
        message: String::from("state file path is missing a filename"),
    })?;
    Ok((parent, file_name))
}

fn render_document(document: &StateDocument) -> Result<String, StateError> {
    // Round-tripping through Value sorts object keys.
    let value = serde_json::to_value(document).map_err(|err| StateError::Serialize {
        message: err.to_string(),
    })?;
    let mut text = serde_json::to_string_pretty(&value).map_err(|err| StateError::Serialize {
        message: err.to_string(),
    })?;
    text.push('\n');
    Ok(text)
}

fn home_dir() -> Option<Utf8PathBuf> {
    for var in ["HOME", "USERPROFILE"] {
        if let Some(value) = std::env::var_os(var) {
            let raw = value.to_string_lossy().into_owned();
            if !raw.trim().is_empty() {
                return Some(Utf8PathBuf::from(raw));
            }
        }
    }
    None
}

#[cfg(test)]
mod tests;

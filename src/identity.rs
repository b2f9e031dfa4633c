// Copyright 2025 coScene
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

// Installation identity and the key/value store it persists into

use crate::error::{Result, TelemetryError};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use std::collections::BTreeMap;
use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError};
use tracing::{info, warn};
use uuid::Uuid;

/// Key under which the installation id is stored.
pub const INSTALLATION_ID_KEY: &str = "installation_id";

/// Key/value persistence capability supplied by the embedding application.
pub trait KeyValueStore: Send + Sync {
    fn get(&self, key: &str) -> Result<Option<String>>;

    fn set(&self, key: &str, value: &str) -> Result<()>;

    /// Store `value` only if `key` is absent or holds an empty string.
    /// Returns the value that is stored once the call completes: `value` if
    /// it won, otherwise the existing one.
    ///
    /// The default implementation is a plain read-then-write; stores that
    /// can be shared across processes should override it.
    fn set_if_absent(&self, key: &str, value: &str) -> Result<String> {
        if let Some(existing) = self.get(key)?.filter(|v| !v.is_empty()) {
            return Ok(existing);
        }
        self.set(key, value)?;
        Ok(value.to_string())
    }
}

/// In-memory store, mostly for tests and embedders without persistence.
#[derive(Default)]
pub struct MemoryKeyValueStore {
    values: DashMap<String, String>,
}

impl MemoryKeyValueStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl KeyValueStore for MemoryKeyValueStore {
    fn get(&self, key: &str) -> Result<Option<String>> {
        Ok(self.values.get(key).map(|v| v.value().clone()))
    }

    fn set(&self, key: &str, value: &str) -> Result<()> {
        self.values.insert(key.to_string(), value.to_string());
        Ok(())
    }

    fn set_if_absent(&self, key: &str, value: &str) -> Result<String> {
        match self.values.entry(key.to_string()) {
            Entry::Occupied(entry) if !entry.get().is_empty() => Ok(entry.get().clone()),
            Entry::Occupied(mut entry) => {
                entry.insert(value.to_string());
                Ok(value.to_string())
            }
            Entry::Vacant(entry) => {
                entry.insert(value.to_string());
                Ok(value.to_string())
            }
        }
    }
}

/// JSON file store. Every write replaces the file atomically.
pub struct FileKeyValueStore {
    path: PathBuf,
    lock: Mutex<()>,
}

impl FileKeyValueStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            lock: Mutex::new(()),
        }
    }

    /// Store at `<dir>/preferences.json`.
    pub fn in_dir(dir: &Path) -> Self {
        Self::new(dir.join("preferences.json"))
    }

    fn read_all(&self) -> Result<BTreeMap<String, String>> {
        match fs::read(&self.path) {
            Ok(data) => Ok(serde_json::from_slice(&data)?),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(BTreeMap::new()),
            Err(e) => Err(TelemetryError::storage(&self.path, e)),
        }
    }

    fn write_all(&self, values: &BTreeMap<String, String>) -> Result<()> {
        let data = serde_json::to_vec_pretty(values)?;
        let tmp_path = self.path.with_extension("json.tmp");

        let write = || -> std::io::Result<()> {
            if let Some(parent) = self.path.parent() {
                fs::create_dir_all(parent)?;
            }
            let mut file = OpenOptions::new()
                .write(true)
                .create(true)
                .truncate(true)
                .open(&tmp_path)?;
            file.write_all(&data)?;
            file.sync_all()?;
            fs::rename(&tmp_path, &self.path)
        };

        write().map_err(|e| TelemetryError::storage(&self.path, e))
    }
}

impl KeyValueStore for FileKeyValueStore {
    fn get(&self, key: &str) -> Result<Option<String>> {
        let _guard = self.lock.lock().unwrap_or_else(PoisonError::into_inner);
        Ok(self.read_all()?.get(key).cloned())
    }

    fn set(&self, key: &str, value: &str) -> Result<()> {
        let _guard = self.lock.lock().unwrap_or_else(PoisonError::into_inner);
        let mut values = self.read_all()?;
        values.insert(key.to_string(), value.to_string());
        self.write_all(&values)
    }

    fn set_if_absent(&self, key: &str, value: &str) -> Result<String> {
        let _guard = self.lock.lock().unwrap_or_else(PoisonError::into_inner);
        let mut values = self.read_all()?;
        if let Some(existing) = values.get(key).filter(|v| !v.is_empty()) {
            return Ok(existing.clone());
        }
        values.insert(key.to_string(), value.to_string());
        self.write_all(&values)?;
        Ok(value.to_string())
    }
}

/// Stable per-install identifier, created once and cached in memory.
pub struct InstallationIdentity {
    store: Arc<dyn KeyValueStore>,
    cached: Mutex<Option<String>>,
}

impl InstallationIdentity {
    pub fn new(store: Arc<dyn KeyValueStore>) -> Self {
        Self {
            store,
            cached: Mutex::new(None),
        }
    }

    /// Return the installation id, generating and persisting it on first use.
    ///
    /// Racing first calls agree on one value: creation goes through the
    /// store's set-if-absent, and the loser adopts the stored value. If
    /// persisting fails, a generated id is used for the rest of the process.
    pub fn get_or_create(&self) -> String {
        let mut cached = self.cached.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(id) = cached.as_ref() {
            return id.clone();
        }

        let id = match self.resolve() {
            Ok(id) => id,
            Err(e) => {
                let fallback = generate_id();
                let error = TelemetryError::IdentityPersistFailure(e.to_string());
                warn!("{}; using in-memory id {} for this process", error, fallback);
                fallback
            }
        };

        *cached = Some(id.clone());
        id
    }

    // An empty stored id counts as missing and is replaced
    fn resolve(&self) -> Result<String> {
        if let Some(existing) = self
            .store
            .get(INSTALLATION_ID_KEY)?
            .filter(|v| !v.is_empty())
        {
            return Ok(existing);
        }

        let candidate = generate_id();
        let stored = self.store.set_if_absent(INSTALLATION_ID_KEY, &candidate)?;
        if stored == candidate {
            info!("Generated new installation id {}", stored);
        }
        Ok(stored)
    }
}

fn generate_id() -> String {
    Uuid::new_v4().to_string()
}

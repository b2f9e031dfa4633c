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

// Installation identity tests

use std::collections::HashSet;
use std::sync::Arc;
use std::thread;
use telemetry_engine::identity::INSTALLATION_ID_KEY;
use telemetry_engine::{FileKeyValueStore, InstallationIdentity, KeyValueStore, MemoryKeyValueStore};
use tempfile::TempDir;

fn race(store: Arc<dyn KeyValueStore>, threads: usize) -> HashSet<String> {
    thread::scope(|scope| {
        let handles: Vec<_> = (0..threads)
            .map(|_| {
                let store = store.clone();
                scope.spawn(move || InstallationIdentity::new(store).get_or_create())
            })
            .collect();
        handles.into_iter().map(|h| h.join().unwrap()).collect()
    })
}

#[test]
fn test_racing_first_use_agrees_on_one_id_in_memory() {
    let store: Arc<dyn KeyValueStore> = Arc::new(MemoryKeyValueStore::new());
    let ids = race(store.clone(), 8);
    assert_eq!(ids.len(), 1);
    assert_eq!(store.get(INSTALLATION_ID_KEY).unwrap(), ids.into_iter().next());
}

#[test]
fn test_racing_first_use_agrees_on_one_id_on_disk() {
    let temp_dir = TempDir::new().unwrap();
    let store: Arc<dyn KeyValueStore> = Arc::new(FileKeyValueStore::in_dir(temp_dir.path()));
    let ids = race(store, 8);
    assert_eq!(ids.len(), 1);
}

#[test]
fn test_id_persists_across_restarts() {
    let temp_dir = TempDir::new().unwrap();

    let first = InstallationIdentity::new(Arc::new(FileKeyValueStore::in_dir(temp_dir.path())))
        .get_or_create();
    let second = InstallationIdentity::new(Arc::new(FileKeyValueStore::in_dir(temp_dir.path())))
        .get_or_create();

    assert_eq!(first, second);
    assert_eq!(first.len(), 36);
}

#[test]
fn test_unwritable_store_still_yields_stable_id() {
    let temp_dir = TempDir::new().unwrap();
    // Parent of the preferences file is a regular file, so writes fail
    let blocker = temp_dir.path().join("blocker");
    std::fs::write(&blocker, b"x").unwrap();
    let store = Arc::new(FileKeyValueStore::new(blocker.join("preferences.json")));

    let identity = InstallationIdentity::new(store);
    let id = identity.get_or_create();
    assert!(!id.is_empty());
    assert_eq!(identity.get_or_create(), id);
}

#[test]
fn test_empty_id_on_disk_is_regenerated_and_persisted() {
    let temp_dir = TempDir::new().unwrap();
    let store = Arc::new(FileKeyValueStore::in_dir(temp_dir.path()));
    store.set(INSTALLATION_ID_KEY, "").unwrap();

    let id = InstallationIdentity::new(store).get_or_create();
    assert_eq!(id.len(), 36);

    let reopened = FileKeyValueStore::in_dir(temp_dir.path());
    assert_eq!(reopened.get(INSTALLATION_ID_KEY).unwrap(), Some(id));
}

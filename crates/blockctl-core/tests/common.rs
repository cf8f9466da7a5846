//! Shared fixtures for core integration tests.

use std::collections::BTreeMap;
use std::sync::Mutex;

use blockctl_core::error::Result;
use blockctl_core::model::{Snapshot, Volume};
use blockctl_core::{MemoryStore, RevertDispatcher, RevertJob};

pub const PROJECT: &str = "p1";
pub const OTHER_PROJECT: &str = "p2";

/// Query parameters from string pairs.
pub fn params(pairs: &[(&str, &str)]) -> BTreeMap<String, String> {
    pairs
        .iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect()
}

/// Store with two volumes in [`PROJECT`] and one in [`OTHER_PROJECT`].
pub fn three_volume_store() -> MemoryStore {
    let store = MemoryStore::new();
    store.insert_volume(Volume::new(PROJECT, 1).with_name("test1"));
    store.insert_volume(Volume::new(PROJECT, 2).with_name("test2"));
    store.insert_volume(Volume::new(OTHER_PROJECT, 4).with_name("test3"));
    store
}

/// Store holding one available volume with one available snapshot.
pub fn revertible() -> (MemoryStore, Volume, Snapshot) {
    let store = MemoryStore::new();
    let volume = Volume::new(PROJECT, 1);
    let snapshot = Snapshot::of(&volume);
    store.insert_volume(volume.clone());
    store
        .insert_snapshot(snapshot.clone())
        .expect("volume was just inserted");
    (store, volume, snapshot)
}

/// Dispatcher that remembers every job it accepted.
#[derive(Default)]
pub struct RecordingDispatcher {
    pub jobs: Mutex<Vec<RevertJob>>,
}

impl RevertDispatcher for RecordingDispatcher {
    fn dispatch(&self, job: RevertJob) -> Result<()> {
        self.jobs.lock().unwrap().push(job);
        Ok(())
    }
}

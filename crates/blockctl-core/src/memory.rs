//! In-memory implementation of [`VolumeStore`].
//!
//! Volumes and snapshots live in `DashMap`s. A conditional status update
//! holds the entry's shard lock for the whole compare-and-swap, so it is
//! atomic with respect to every other caller.

use chrono::Utc;
use dashmap::DashMap;
use serde::Deserialize;
use uuid::Uuid;

use crate::context::TenantScope;
use crate::error::{ApiError, Result};
use crate::filter::ListFilters;
use crate::model::{Snapshot, SnapshotStatus, Volume, VolumeStatus};
use crate::store::{Listable, Pagination, VolumeStore};

/// Seed data for an in-memory store.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Fixture {
    /// Volumes, inserted first.
    #[serde(default)]
    pub volumes: Vec<Volume>,
    /// Snapshots; each must name a volume of the fixture.
    #[serde(default)]
    pub snapshots: Vec<Snapshot>,
}

/// A [`VolumeStore`] held entirely in memory.
pub struct MemoryStore {
    volumes: DashMap<Uuid, Volume>,
    snapshots: DashMap<Uuid, Snapshot>,
}

impl MemoryStore {
    /// Creates a new empty store.
    pub fn new() -> Self {
        Self {
            volumes: DashMap::new(),
            snapshots: DashMap::new(),
        }
    }

    /// Creates a store holding the fixture's records.
    ///
    /// Snapshots whose volume is not in the fixture are rejected.
    pub fn from_fixture(fixture: Fixture) -> Result<Self> {
        let store = Self::new();
        for volume in fixture.volumes {
            store.insert_volume(volume);
        }
        for snapshot in fixture.snapshots {
            store.insert_snapshot(snapshot)?;
        }
        Ok(store)
    }

    /// Insert or replace a volume.
    pub fn insert_volume(&self, volume: Volume) {
        self.volumes.insert(volume.id, volume);
    }

    /// Insert a snapshot. Its volume must already exist.
    pub fn insert_snapshot(&self, snapshot: Snapshot) -> Result<()> {
        if !self.volumes.contains_key(&snapshot.volume_id) {
            return Err(ApiError::NotFound {
                kind: crate::error::ResourceKind::Volume,
                id: snapshot.volume_id.to_string(),
            });
        }
        self.snapshots.insert(snapshot.id, snapshot);
        Ok(())
    }

    /// Current status of a volume.
    pub fn volume_status(&self, id: Uuid) -> Option<VolumeStatus> {
        self.volumes.get(&id).map(|v| v.status)
    }

    /// Current status of a snapshot.
    pub fn snapshot_status(&self, id: Uuid) -> Option<SnapshotStatus> {
        self.snapshots.get(&id).map(|s| s.status)
    }

    /// Number of volumes held.
    pub fn volume_count(&self) -> usize {
        self.volumes.len()
    }

    /// Number of snapshots held.
    pub fn snapshot_count(&self) -> usize {
        self.snapshots.len()
    }
}

fn matching<T>(records: &DashMap<Uuid, T>, filters: &ListFilters, scope: &TenantScope) -> Vec<T>
where
    T: Listable + Clone,
{
    records
        .iter()
        .filter(|entry| scope.includes(entry.project_id()) && filters.matches(entry.value()))
        .map(|entry| entry.value().clone())
        .collect()
}

/// Sort `records` and cut the page `pagination` selects.
fn page<T: Listable>(mut records: Vec<T>, pagination: &Pagination) -> Result<Vec<T>> {
    records.sort_by(|a, b| pagination.compare(a, b));

    let start = match pagination.marker {
        Some(marker) => {
            let position = records.iter().position(|r| r.id() == marker).ok_or_else(|| {
                ApiError::InvalidInput(format!("marker {} could not be found", marker))
            })?;
            position + 1
        }
        None => 0,
    };

    Ok(records
        .into_iter()
        .skip(start.saturating_add(pagination.offset))
        .take(pagination.limit.unwrap_or(usize::MAX))
        .collect())
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl VolumeStore for MemoryStore {
    fn get_volume(&self, id: Uuid) -> Result<Option<Volume>> {
        Ok(self.volumes.get(&id).map(|v| v.clone()))
    }

    fn get_snapshot(&self, id: Uuid) -> Result<Option<Snapshot>> {
        Ok(self.snapshots.get(&id).map(|s| s.clone()))
    }

    fn get_latest_snapshot(&self, volume_id: Uuid) -> Result<Option<Snapshot>> {
        Ok(self
            .snapshots
            .iter()
            .filter(|s| s.volume_id == volume_id)
            .max_by(|a, b| a.created_at.cmp(&b.created_at).then(a.id.cmp(&b.id)))
            .map(|s| s.value().clone()))
    }

    fn conditional_update_volume_status(
        &self,
        id: Uuid,
        expected: &[VolumeStatus],
        new: VolumeStatus,
    ) -> Result<bool> {
        let Some(mut volume) = self.volumes.get_mut(&id) else {
            return Ok(false);
        };
        if !expected.contains(&volume.status) {
            return Ok(false);
        }
        volume.status = new;
        volume.updated_at = Some(Utc::now());
        Ok(true)
    }

    fn conditional_update_snapshot_status(
        &self,
        id: Uuid,
        expected: &[SnapshotStatus],
        new: SnapshotStatus,
    ) -> Result<bool> {
        let Some(mut snapshot) = self.snapshots.get_mut(&id) else {
            return Ok(false);
        };
        if !expected.contains(&snapshot.status) {
            return Ok(false);
        }
        snapshot.status = new;
        snapshot.updated_at = Some(Utc::now());
        Ok(true)
    }

    fn query_volumes(
        &self,
        filters: &ListFilters,
        scope: &TenantScope,
        pagination: &Pagination,
    ) -> Result<Vec<Volume>> {
        page(matching(&self.volumes, filters, scope), pagination)
    }

    fn count_volumes(&self, filters: &ListFilters, scope: &TenantScope) -> Result<usize> {
        Ok(self
            .volumes
            .iter()
            .filter(|entry| scope.includes(&entry.project_id) && filters.matches(entry.value()))
            .count())
    }

    fn query_snapshots(
        &self,
        filters: &ListFilters,
        scope: &TenantScope,
        pagination: &Pagination,
    ) -> Result<Vec<Snapshot>> {
        page(matching(&self.snapshots, filters, scope), pagination)
    }

    fn count_snapshots(&self, filters: &ListFilters, scope: &TenantScope) -> Result<usize> {
        Ok(self
            .snapshots
            .iter()
            .filter(|entry| scope.includes(&entry.project_id) && filters.matches(entry.value()))
            .count())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn project(id: &str) -> TenantScope {
        TenantScope::Project(id.to_string())
    }

    #[test]
    fn test_conditional_update_volume_status() {
        let store = MemoryStore::new();
        let volume = Volume::new("p1", 1);
        let id = volume.id;
        store.insert_volume(volume);

        assert!(store
            .conditional_update_volume_status(id, &[VolumeStatus::Available], VolumeStatus::Reverting)
            .unwrap());
        assert_eq!(store.volume_status(id), Some(VolumeStatus::Reverting));

        assert!(!store
            .conditional_update_volume_status(id, &[VolumeStatus::Available], VolumeStatus::Reverting)
            .unwrap());
        assert!(store.get_volume(id).unwrap().unwrap().updated_at.is_some());
    }

    #[test]
    fn test_conditional_update_missing_entity() {
        let store = MemoryStore::new();
        assert!(!store
            .conditional_update_volume_status(
                Uuid::new_v4(),
                &[VolumeStatus::Available],
                VolumeStatus::Reverting
            )
            .unwrap());
        assert!(!store
            .conditional_update_snapshot_status(
                Uuid::new_v4(),
                &[SnapshotStatus::Available],
                SnapshotStatus::Restoring
            )
            .unwrap());
    }

    #[test]
    fn test_latest_snapshot_by_creation_time() {
        let store = MemoryStore::new();
        let volume = Volume::new("p1", 1);
        let now = Utc::now();
        let older = Snapshot::of(&volume).with_created_at(now - Duration::hours(1));
        let newer = Snapshot::of(&volume).with_created_at(now);
        let newer_id = newer.id;
        store.insert_volume(volume.clone());
        store.insert_snapshot(newer).unwrap();
        store.insert_snapshot(older).unwrap();

        let latest = store.get_latest_snapshot(volume.id).unwrap().unwrap();
        assert_eq!(latest.id, newer_id);
        assert!(store.get_latest_snapshot(Uuid::new_v4()).unwrap().is_none());
    }

    #[test]
    fn test_snapshot_requires_volume() {
        let store = MemoryStore::new();
        let orphan = Snapshot::of(&Volume::new("p1", 1));
        assert!(store.insert_snapshot(orphan).is_err());
    }

    #[test]
    fn test_query_scope_and_pagination() {
        let store = MemoryStore::new();
        let now = Utc::now();
        let mut ids = Vec::new();
        for i in 0..5 {
            let volume = Volume::new("p1", 1).with_created_at(now + Duration::seconds(i));
            ids.push(volume.id);
            store.insert_volume(volume);
        }
        store.insert_volume(Volume::new("p2", 1));

        let filters = ListFilters::default();
        let all = store
            .query_volumes(&filters, &project("p1"), &Pagination::default())
            .unwrap();
        assert_eq!(all.len(), 5);
        // Newest first.
        assert_eq!(all[0].id, ids[4]);

        let page = Pagination {
            limit: Some(2),
            marker: Some(ids[4]),
            ..Pagination::default()
        };
        let second = store.query_volumes(&filters, &project("p1"), &page).unwrap();
        assert_eq!(second.iter().map(|v| v.id).collect::<Vec<_>>(), vec![ids[3], ids[2]]);

        let offset = Pagination {
            offset: 4,
            ..Pagination::default()
        };
        let tail = store.query_volumes(&filters, &project("p1"), &offset).unwrap();
        assert_eq!(tail.len(), 1);

        assert_eq!(store.count_volumes(&filters, &TenantScope::AllTenants).unwrap(), 6);
    }

    #[test]
    fn test_huge_offset_after_marker_is_empty_page() {
        let store = MemoryStore::new();
        let now = Utc::now();
        let first = Volume::new("p1", 1).with_created_at(now);
        let marker = first.id;
        store.insert_volume(first);
        store.insert_volume(Volume::new("p1", 1).with_created_at(now - Duration::seconds(1)));

        let page = Pagination {
            marker: Some(marker),
            offset: usize::MAX,
            ..Pagination::default()
        };
        let volumes = store
            .query_volumes(&ListFilters::default(), &project("p1"), &page)
            .unwrap();
        assert!(volumes.is_empty());
    }

    #[test]
    fn test_query_snapshots_scope_filters_and_order() {
        let store = MemoryStore::new();
        let now = Utc::now();
        let own = Volume::new("p1", 1);
        let foreign = Volume::new("p2", 1);
        store.insert_volume(own.clone());
        store.insert_volume(foreign.clone());
        let older = Snapshot::of(&own).with_name("older").with_created_at(now - Duration::seconds(5));
        let newer = Snapshot::of(&own)
            .with_name("newer")
            .with_metadata("key1", "val1")
            .with_created_at(now);
        store.insert_snapshot(older.clone()).unwrap();
        store.insert_snapshot(newer.clone()).unwrap();
        store.insert_snapshot(Snapshot::of(&foreign)).unwrap();

        let all = store
            .query_snapshots(&ListFilters::default(), &project("p1"), &Pagination::default())
            .unwrap();
        assert_eq!(all.iter().map(|s| s.id).collect::<Vec<_>>(), vec![newer.id, older.id]);

        let tagged = ListFilters {
            metadata: Some([("key1".to_string(), "val1".to_string())].into()),
            ..ListFilters::default()
        };
        let hits = store
            .query_snapshots(&tagged, &project("p1"), &Pagination::default())
            .unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].id, newer.id);

        let after_newer = Pagination {
            marker: Some(newer.id),
            ..Pagination::default()
        };
        let rest = store
            .query_snapshots(&ListFilters::default(), &project("p1"), &after_newer)
            .unwrap();
        assert_eq!(rest.iter().map(|s| s.id).collect::<Vec<_>>(), vec![older.id]);

        assert_eq!(store.count_snapshots(&ListFilters::default(), &project("p1")).unwrap(), 2);
        assert_eq!(
            store
                .count_snapshots(&ListFilters::default(), &TenantScope::AllTenants)
                .unwrap(),
            3
        );
        assert_eq!(store.snapshot_count(), 3);
    }

    #[test]
    fn test_query_unknown_marker() {
        let store = MemoryStore::new();
        store.insert_volume(Volume::new("p1", 1));
        let page = Pagination {
            marker: Some(Uuid::new_v4()),
            ..Pagination::default()
        };
        let err = store
            .query_volumes(&ListFilters::default(), &project("p1"), &page)
            .unwrap_err();
        assert_eq!(err.kind(), crate::error::ErrorKind::InvalidInput);
    }

    #[test]
    fn test_from_fixture() {
        let volume = Volume::new("p1", 3);
        let snapshot = Snapshot::of(&volume);
        let store = MemoryStore::from_fixture(Fixture {
            volumes: vec![volume.clone()],
            snapshots: vec![snapshot.clone()],
        })
        .unwrap();
        assert_eq!(store.volume_count(), 1);
        assert_eq!(store.snapshot_status(snapshot.id), Some(SnapshotStatus::Available));
    }
}

//! Storage port consumed by the core.
//!
//! This trait abstracts over the persistence collaborator. The only
//! concurrency-control primitive the core relies on is the conditional
//! status update: a single atomic compare-and-swap on one entity's status,
//! visible to every caller as soon as it reports success.

use std::cmp::Ordering;
use std::fmt;
use std::str::FromStr;

use uuid::Uuid;

use crate::context::TenantScope;
use crate::error::{ApiError, Result};
use crate::filter::{Filterable, ListFilters};
use crate::model::{Snapshot, SnapshotStatus, Volume, VolumeStatus};

/// Persistence operations available to the core.
pub trait VolumeStore: Send + Sync {
    /// Get a volume by id. Returns None if it doesn't exist.
    fn get_volume(&self, id: Uuid) -> Result<Option<Volume>>;

    /// Get a snapshot by id. Returns None if it doesn't exist.
    fn get_snapshot(&self, id: Uuid) -> Result<Option<Snapshot>>;

    /// The most recently created snapshot of `volume_id`, if any.
    fn get_latest_snapshot(&self, volume_id: Uuid) -> Result<Option<Snapshot>>;

    /// Atomically set the volume status to `new` if it is currently one of
    /// `expected`. Returns whether the update happened.
    fn conditional_update_volume_status(
        &self,
        id: Uuid,
        expected: &[VolumeStatus],
        new: VolumeStatus,
    ) -> Result<bool>;

    /// Snapshot counterpart of [`VolumeStore::conditional_update_volume_status`].
    fn conditional_update_snapshot_status(
        &self,
        id: Uuid,
        expected: &[SnapshotStatus],
        new: SnapshotStatus,
    ) -> Result<bool>;

    /// One page of volumes matching `filters` within `scope`.
    fn query_volumes(
        &self,
        filters: &ListFilters,
        scope: &TenantScope,
        pagination: &Pagination,
    ) -> Result<Vec<Volume>>;

    /// Number of volumes matching `filters` within `scope`, ignoring
    /// pagination.
    fn count_volumes(&self, filters: &ListFilters, scope: &TenantScope) -> Result<usize>;

    /// One page of snapshots matching `filters` within `scope`.
    fn query_snapshots(
        &self,
        filters: &ListFilters,
        scope: &TenantScope,
        pagination: &Pagination,
    ) -> Result<Vec<Snapshot>>;

    /// Snapshot counterpart of [`VolumeStore::count_volumes`].
    fn count_snapshots(&self, filters: &ListFilters, scope: &TenantScope) -> Result<usize>;
}

/// A record that can be listed: filtered, ordered and paged by id.
pub trait Listable: Filterable {
    /// Identifier used as the paging marker.
    fn id(&self) -> Uuid;

    /// Owning project, for tenant scoping.
    fn project_id(&self) -> &str;

    /// Compare two records on `key`, ascending.
    fn compare_on(&self, other: &Self, key: SortKey) -> Ordering;
}

impl Listable for Volume {
    fn id(&self) -> Uuid {
        self.id
    }

    fn project_id(&self) -> &str {
        &self.project_id
    }

    fn compare_on(&self, other: &Self, key: SortKey) -> Ordering {
        match key {
            SortKey::CreatedAt => self.created_at.cmp(&other.created_at),
            SortKey::UpdatedAt => self.updated_at.cmp(&other.updated_at),
            SortKey::Id => self.id.cmp(&other.id),
            SortKey::Name => self.name.cmp(&other.name),
            SortKey::Size => self.size.cmp(&other.size),
            SortKey::Status => self.status.as_str().cmp(other.status.as_str()),
            SortKey::AvailabilityZone => self.availability_zone.cmp(&other.availability_zone),
        }
    }
}

impl Listable for Snapshot {
    fn id(&self) -> Uuid {
        self.id
    }

    fn project_id(&self) -> &str {
        &self.project_id
    }

    fn compare_on(&self, other: &Self, key: SortKey) -> Ordering {
        match key {
            SortKey::CreatedAt => self.created_at.cmp(&other.created_at),
            SortKey::UpdatedAt => self.updated_at.cmp(&other.updated_at),
            SortKey::Id => self.id.cmp(&other.id),
            SortKey::Name => self.name.cmp(&other.name),
            SortKey::Size => self.volume_size.cmp(&other.volume_size),
            SortKey::Status => self.status.as_str().cmp(other.status.as_str()),
            SortKey::AvailabilityZone => self.availability_zone.cmp(&other.availability_zone),
        }
    }
}

/// Sortable attributes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SortKey {
    /// `created_at`.
    CreatedAt,
    /// `updated_at`; never-updated records sort first.
    UpdatedAt,
    /// `id`, the final tie-breaker.
    Id,
    /// `name`, also accepted as `display_name`.
    Name,
    /// `size`.
    Size,
    /// `status`, by wire name.
    Status,
    /// `availability_zone`.
    AvailabilityZone,
}

impl FromStr for SortKey {
    type Err = ApiError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim() {
            "created_at" => Ok(SortKey::CreatedAt),
            "updated_at" => Ok(SortKey::UpdatedAt),
            "id" => Ok(SortKey::Id),
            "name" | "display_name" => Ok(SortKey::Name),
            "size" => Ok(SortKey::Size),
            "status" => Ok(SortKey::Status),
            "availability_zone" => Ok(SortKey::AvailabilityZone),
            other => Err(ApiError::InvalidInput(format!("invalid sort key {:?}", other))),
        }
    }
}

impl fmt::Display for SortKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            SortKey::CreatedAt => "created_at",
            SortKey::UpdatedAt => "updated_at",
            SortKey::Id => "id",
            SortKey::Name => "name",
            SortKey::Size => "size",
            SortKey::Status => "status",
            SortKey::AvailabilityZone => "availability_zone",
        };
        f.write_str(name)
    }
}

/// Sort direction; descending unless the caller says otherwise.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SortDir {
    /// Ascending.
    Asc,
    /// Descending.
    Desc,
}

impl FromStr for SortDir {
    type Err = ApiError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "asc" => Ok(SortDir::Asc),
            "desc" => Ok(SortDir::Desc),
            other => Err(ApiError::InvalidInput(format!("invalid sort direction {:?}", other))),
        }
    }
}

/// Page selection and ordering for the store's query methods.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Pagination {
    /// Maximum page size; `None` returns everything after the marker.
    pub limit: Option<usize>,
    /// Id of the last record of the previous page.
    pub marker: Option<Uuid>,
    /// Number of matching records to skip after the marker.
    pub offset: usize,
    /// Ordering, most significant key first.
    pub sort: Vec<(SortKey, SortDir)>,
}

impl Pagination {
    /// Newest first, id as tie-breaker.
    pub fn default_sort() -> Vec<(SortKey, SortDir)> {
        vec![(SortKey::CreatedAt, SortDir::Desc), (SortKey::Id, SortDir::Desc)]
    }

    /// Everything in creation order, oldest first.
    pub fn creation_order() -> Self {
        Self {
            limit: None,
            marker: None,
            offset: 0,
            sort: vec![(SortKey::CreatedAt, SortDir::Asc), (SortKey::Id, SortDir::Asc)],
        }
    }

    /// Total order over records according to `sort`.
    pub fn compare<T: Listable>(&self, a: &T, b: &T) -> Ordering {
        for (key, dir) in &self.sort {
            let ord = match dir {
                SortDir::Asc => a.compare_on(b, *key),
                SortDir::Desc => b.compare_on(a, *key),
            };
            if ord != Ordering::Equal {
                return ord;
            }
        }
        Ordering::Equal
    }
}

impl Default for Pagination {
    fn default() -> Self {
        Self {
            limit: None,
            marker: None,
            offset: 0,
            sort: Self::default_sort(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, Utc};

    #[test]
    fn test_sort_key_parse() {
        assert_eq!("created_at".parse::<SortKey>().unwrap(), SortKey::CreatedAt);
        assert_eq!("display_name".parse::<SortKey>().unwrap(), SortKey::Name);
        assert!("colour".parse::<SortKey>().is_err());
        assert_eq!(SortKey::AvailabilityZone.to_string(), "availability_zone");
    }

    #[test]
    fn test_sort_dir_parse() {
        assert_eq!("ASC".parse::<SortDir>().unwrap(), SortDir::Asc);
        assert_eq!("desc".parse::<SortDir>().unwrap(), SortDir::Desc);
        assert!("up".parse::<SortDir>().is_err());
    }

    #[test]
    fn test_compare_multi_key() {
        let now = Utc::now();
        let a = Volume::new("p1", 1).with_created_at(now);
        let b = Volume::new("p1", 2).with_created_at(now + Duration::seconds(1));
        let pagination = Pagination::default();
        assert_eq!(pagination.compare(&a, &b), Ordering::Greater);

        let by_size = Pagination {
            sort: vec![(SortKey::Size, SortDir::Asc)],
            ..Pagination::default()
        };
        assert_eq!(by_size.compare(&a, &b), Ordering::Less);
    }

    #[test]
    fn test_compare_snapshots_by_name() {
        let volume = Volume::new("p1", 1);
        let first = Snapshot::of(&volume).with_name("test1");
        let second = Snapshot::of(&volume).with_name("test2");
        let by_name = Pagination {
            sort: vec![(SortKey::Name, SortDir::Desc)],
            ..Pagination::default()
        };
        assert_eq!(by_name.compare(&second, &first), Ordering::Less);
        assert_eq!(Listable::project_id(&first), "p1");
    }
}

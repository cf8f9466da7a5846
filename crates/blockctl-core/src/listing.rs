//! Filtered, paginated volume and snapshot listing with optional total
//! count.

use std::collections::BTreeMap;

use uuid::Uuid;

use crate::context::{RequestContext, TenantScope};
use crate::error::{ApiError, Result};
use crate::filter::{parse_bool, FilterValidator, ListFilters};
use crate::model::{Snapshot, Volume};
use crate::store::{Listable, Pagination, SortDir, SortKey, VolumeStore};
use crate::version::{versions, Feature, FeatureSet};

/// Default cap on page size.
pub const DEFAULT_MAX_LIMIT: usize = 1000;

/// One page of a listing.
#[derive(Debug, Clone, PartialEq)]
pub struct Page<T> {
    /// Records of this page, in listing order.
    pub items: Vec<T>,
    /// Total matches ignoring pagination; only set when requested and
    /// supported at the negotiated version.
    pub count: Option<usize>,
    /// Effective page size.
    pub limit: usize,
}

/// One page of a volume listing.
pub type VolumePage = Page<Volume>;

/// One page of a snapshot listing.
pub type SnapshotPage = Page<Snapshot>;

impl<T: Listable> Page<T> {
    /// Marker for the next page, when this page is full.
    pub fn next_marker(&self) -> Option<Uuid> {
        if self.limit > 0 && self.items.len() == self.limit {
            self.items.last().map(Listable::id)
        } else {
            None
        }
    }
}

/// Executes listing requests against a [`VolumeStore`].
#[derive(Debug, Clone)]
pub struct ListingPaginator {
    validator: FilterValidator,
    snapshot_validator: FilterValidator,
    max_limit: usize,
    strict_tenant_scope: bool,
}

impl ListingPaginator {
    /// Create a paginator validating volume filters with `validator` and
    /// snapshot filters with the default snapshot allow-list.
    pub fn new(validator: FilterValidator, max_limit: usize, strict_tenant_scope: bool) -> Self {
        Self {
            validator,
            snapshot_validator: FilterValidator::snapshots(),
            max_limit,
            strict_tenant_scope,
        }
    }

    /// Replace the snapshot filter validator.
    pub fn with_snapshot_validator(mut self, validator: FilterValidator) -> Self {
        self.snapshot_validator = validator;
        self
    }

    /// Volume filter validator.
    pub fn validator(&self) -> &FilterValidator {
        &self.validator
    }

    /// Snapshot filter validator.
    pub fn snapshot_validator(&self) -> &FilterValidator {
        &self.snapshot_validator
    }

    /// Resolve the tenant scope from the `all_tenants` parameter.
    pub fn scope(&self, ctx: &RequestContext, params: &BTreeMap<String, String>) -> Result<TenantScope> {
        let all_tenants = match params.get("all_tenants") {
            Some(value) => parse_bool("all_tenants", value, true)?,
            None => false,
        };
        ctx.resolve_scope(all_tenants, self.strict_tenant_scope)
    }

    /// Parse `limit`, `marker`, `offset` and the sort parameters.
    pub fn pagination(&self, params: &BTreeMap<String, String>) -> Result<Pagination> {
        let limit = match params.get("limit") {
            Some(raw) => parse_non_negative("limit", raw)?.min(self.max_limit),
            None => self.max_limit,
        };
        let offset = match params.get("offset") {
            Some(raw) => parse_non_negative("offset", raw)?,
            None => 0,
        };
        let marker = params
            .get("marker")
            .map(|raw| {
                Uuid::parse_str(raw.trim())
                    .map_err(|_| ApiError::InvalidInput(format!("marker {:?} is not a valid id", raw)))
            })
            .transpose()?;

        Ok(Pagination {
            limit: Some(limit),
            marker,
            offset,
            sort: parse_sort(params)?,
        })
    }

    /// Whether the caller asked for a total count and may have one.
    pub fn wants_count(&self, params: &BTreeMap<String, String>, features: &FeatureSet) -> Result<bool> {
        if !features.is_enabled(Feature::CountInfo) {
            return Ok(false);
        }
        match params.get("with_count") {
            Some(value) => parse_bool("with_count", value, true),
            None => Ok(false),
        }
    }

    /// Run a volume listing request.
    pub fn list(
        &self,
        store: &dyn VolumeStore,
        ctx: &RequestContext,
        features: &FeatureSet,
        params: &BTreeMap<String, String>,
    ) -> Result<VolumePage> {
        let filters = self.validator.validate(params, ctx, features)?;
        let scope = self.scope(ctx, params)?;
        let pagination = self.pagination(params)?;
        let with_count = self.wants_count(params, features)?;
        self.execute(store, &filters, &scope, &pagination, with_count)
    }

    /// Query a page of volumes, and the total count when `with_count` is
    /// set.
    pub fn execute(
        &self,
        store: &dyn VolumeStore,
        filters: &ListFilters,
        scope: &TenantScope,
        pagination: &Pagination,
        with_count: bool,
    ) -> Result<VolumePage> {
        let volumes = store.query_volumes(filters, scope, pagination)?;
        let count = if with_count {
            Some(store.count_volumes(filters, scope)?)
        } else {
            None
        };

        tracing::debug!(
            %scope,
            returned = volumes.len(),
            count = ?count,
            "listed volumes"
        );

        Ok(Page {
            items: volumes,
            count,
            limit: pagination.limit.unwrap_or(self.max_limit),
        })
    }

    /// Run a snapshot listing request.
    ///
    /// Sorting by `name` is an error before the snapshot-sort version.
    pub fn list_snapshots(
        &self,
        store: &dyn VolumeStore,
        ctx: &RequestContext,
        features: &FeatureSet,
        params: &BTreeMap<String, String>,
    ) -> Result<SnapshotPage> {
        let filters = self.snapshot_validator.validate(params, ctx, features)?;
        let scope = self.scope(ctx, params)?;
        let pagination = self.pagination(params)?;
        if !features.is_enabled(Feature::SnapshotSort)
            && pagination.sort.iter().any(|(key, _)| *key == SortKey::Name)
        {
            return Err(ApiError::InvalidInput(format!(
                "sort key name is not supported for snapshots before version {}",
                versions::SNAPSHOT_SORT
            )));
        }
        let with_count = self.wants_count(params, features)?;

        let snapshots = store.query_snapshots(&filters, &scope, &pagination)?;
        let count = if with_count {
            Some(store.count_snapshots(&filters, &scope)?)
        } else {
            None
        };

        tracing::debug!(
            %scope,
            returned = snapshots.len(),
            count = ?count,
            "listed snapshots"
        );

        Ok(Page {
            items: snapshots,
            count,
            limit: pagination.limit.unwrap_or(self.max_limit),
        })
    }
}

impl Default for ListingPaginator {
    fn default() -> Self {
        Self::new(FilterValidator::default(), DEFAULT_MAX_LIMIT, false)
    }
}

fn parse_non_negative(name: &str, raw: &str) -> Result<usize> {
    raw.trim()
        .parse::<usize>()
        .map_err(|_| ApiError::InvalidInput(format!("{} must be a non-negative integer, got {:?}", name, raw)))
}

fn sort_entry(key: &str, dir: Option<&str>) -> Result<(SortKey, SortDir)> {
    let key: SortKey = key.parse()?;
    let dir = match dir {
        Some(dir) => dir.parse()?,
        None => SortDir::Desc,
    };
    Ok((key, dir))
}

/// `sort=key[:dir],...` or the older `sort_key`/`sort_dir` pair.
fn parse_sort(params: &BTreeMap<String, String>) -> Result<Vec<(SortKey, SortDir)>> {
    let legacy = params.contains_key("sort_key") || params.contains_key("sort_dir");
    let mut sort: Vec<(SortKey, SortDir)> = match (params.get("sort"), legacy) {
        (Some(_), true) => {
            return Err(ApiError::InvalidInput(
                "sort_key and sort_dir cannot be combined with sort".to_string(),
            ))
        }
        (Some(raw), false) => raw
            .split(',')
            .filter(|part| !part.trim().is_empty())
            .map(|part| match part.split_once(':') {
                Some((key, dir)) => sort_entry(key, Some(dir)),
                None => sort_entry(part, None),
            })
            .collect::<Result<_>>()?,
        (None, true) => {
            let keys: Vec<&str> = params
                .get("sort_key")
                .map(|k| k.split(',').collect())
                .unwrap_or_else(|| vec!["created_at"]);
            let dirs: Vec<&str> = params
                .get("sort_dir")
                .map(|d| d.split(',').collect())
                .unwrap_or_default();
            keys.iter()
                .enumerate()
                .map(|(i, key)| sort_entry(key, dirs.get(i).or(dirs.last()).copied()))
                .collect::<Result<_>>()?
        }
        (None, false) => return Ok(Pagination::default_sort()),
    };

    if sort.is_empty() {
        return Ok(Pagination::default_sort());
    }
    if !sort.iter().any(|(key, _)| *key == SortKey::Id) {
        sort.push((SortKey::Id, SortDir::Desc));
    }
    Ok(sort)
}

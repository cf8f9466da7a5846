//! Volume summary: total size, total count and, from the metadata-summary
//! version on, the distinct metadata values seen per key.

use std::collections::{BTreeMap, HashSet};

use serde::Serialize;

use crate::context::TenantScope;
use crate::error::Result;
use crate::filter::ListFilters;
use crate::model::Volume;
use crate::store::{Pagination, VolumeStore};
use crate::version::{Feature, FeatureSet};

/// Aggregate over the volumes visible in a scope.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct VolumeSummary {
    /// Sum of volume sizes in GiB.
    pub total_size: f64,
    /// Number of volumes.
    pub total_count: u64,
    /// Absent below the metadata-summary version.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub metadata: Option<BTreeMap<String, Vec<String>>>,
}

/// Accumulates distinct metadata values per key, in order of first
/// appearance.
#[derive(Debug, Default)]
pub struct MetadataSummary {
    values: BTreeMap<String, Vec<String>>,
    seen: HashSet<(String, String)>,
}

impl MetadataSummary {
    /// An empty accumulator.
    pub fn new() -> Self {
        Self::default()
    }

    /// Record one metadata pair.
    pub fn observe(&mut self, key: &str, value: &str) {
        if self.seen.insert((key.to_string(), value.to_string())) {
            self.values
                .entry(key.to_string())
                .or_default()
                .push(value.to_string());
        }
    }

    /// Distinct values per key.
    pub fn into_map(self) -> BTreeMap<String, Vec<String>> {
        self.values
    }
}

/// Aggregate `volumes` (already in visiting order).
pub fn aggregate<'a, I>(volumes: I, with_metadata: bool) -> VolumeSummary
where
    I: IntoIterator<Item = &'a Volume>,
{
    let mut total_size = 0.0;
    let mut total_count = 0;
    let mut metadata = with_metadata.then(MetadataSummary::new);

    for volume in volumes {
        total_size += volume.size as f64;
        total_count += 1;
        if let Some(summary) = metadata.as_mut() {
            for (key, value) in &volume.metadata {
                summary.observe(key, value);
            }
        }
    }

    VolumeSummary {
        total_size,
        total_count,
        metadata: metadata.map(MetadataSummary::into_map),
    }
}

/// Summarize every volume visible in `scope`.
///
/// Fails with `VersionNotFound` below the summary version.
pub fn summarize(store: &dyn VolumeStore, scope: &TenantScope, features: &FeatureSet) -> Result<VolumeSummary> {
    features.require(Feature::VolumeSummary)?;

    let volumes = store.query_volumes(&ListFilters::default(), scope, &Pagination::creation_order())?;
    let summary = aggregate(&volumes, features.is_enabled(Feature::SummaryMetadata));

    tracing::debug!(
        %scope,
        total_count = summary.total_count,
        total_size = summary.total_size,
        "computed volume summary"
    );
    Ok(summary)
}

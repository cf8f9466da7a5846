//! API version negotiation for the volume API.
//!
//! A client names the version it speaks in a request header. The negotiator
//! resolves that token to a concrete [`ApiVersion`] and derives a
//! [`FeatureSet`] from the declarative [`FEATURE_TABLE`], once per request.
//! Every other component consumes the feature set and never looks at the raw
//! token again.

use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;

use crate::error::{ApiError, Result};

/// A `MAJOR.MINOR` API version.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ApiVersion {
    /// Major version; only 3 is served.
    pub major: u16,
    /// Minor version; each bump adds behavior.
    pub minor: u16,
}

impl ApiVersion {
    /// Create a new API version.
    pub const fn new(major: u16, minor: u16) -> Self {
        ApiVersion { major, minor }
    }
}

impl fmt::Display for ApiVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.major, self.minor)
    }
}

impl FromStr for ApiVersion {
    type Err = ApiError;

    fn from_str(s: &str) -> Result<Self> {
        let invalid = || ApiError::InvalidVersion(s.to_string());
        let (major, minor) = s.trim().split_once('.').ok_or_else(invalid)?;

        // No leading zeros, no signs, no empty components.
        let well_formed = |part: &str, allow_zero: bool| {
            !part.is_empty()
                && part.bytes().all(|b| b.is_ascii_digit())
                && ((part == "0" && allow_zero) || !part.starts_with('0'))
        };
        if !well_formed(major, false) || !well_formed(minor, true) {
            return Err(invalid());
        }

        Ok(ApiVersion {
            major: major.parse().map_err(|_| invalid())?,
            minor: minor.parse().map_err(|_| invalid())?,
        })
    }
}

/// Named versions at which behavior changed.
pub mod versions {
    use super::ApiVersion;

    /// Version assumed when the client sends no version header.
    pub const BASE_VERSION: ApiVersion = ApiVersion::new(3, 0);
    /// Strict parsing of boolean list filters.
    pub const VOLUME_LIST_BOOTABLE: ApiVersion = ApiVersion::new(3, 2);
    /// `glance_metadata` list filter.
    pub const VOLUME_LIST_GLANCE_METADATA: ApiVersion = ApiVersion::new(3, 4);
    /// `group_id` list filter.
    pub const VOLUME_LIST_GROUP: ApiVersion = ApiVersion::new(3, 10);
    /// `GET volumes/summary`.
    pub const VOLUME_SUMMARY: ApiVersion = ApiVersion::new(3, 12);
    /// `group_id` in the volume representation.
    pub const GROUP_VOLUME: ApiVersion = ApiVersion::new(3, 13);
    /// `group_snapshot_id` in the snapshot representation.
    pub const GROUP_SNAPSHOTS: ApiVersion = ApiVersion::new(3, 14);
    /// `provider_id` in the admin volume representation.
    pub const VOLUME_DETAIL_PROVIDER_ID: ApiVersion = ApiVersion::new(3, 21);
    /// `metadata` filter on snapshot listings.
    pub const SNAPSHOT_LIST_METADATA_FILTER: ApiVersion = ApiVersion::new(3, 22);
    /// Snapshot listings may sort by `name`.
    pub const SNAPSHOT_SORT: ApiVersion = ApiVersion::new(3, 30);
    /// Resource filters are validated against the allow-list.
    pub const RESOURCE_FILTER: ApiVersion = ApiVersion::new(3, 31);
    /// `key~=value` inexact filters.
    pub const LIKE_FILTER: ApiVersion = ApiVersion::new(3, 34);
    /// Metadata aggregation in the volume summary.
    pub const VOLUME_SUMMARY_METADATA: ApiVersion = ApiVersion::new(3, 36);
    /// Revert a volume to its latest snapshot.
    pub const VOLUME_REVERT: ApiVersion = ApiVersion::new(3, 40);
    /// `user_id` in the snapshot representation.
    pub const SNAPSHOT_LIST_USER_ID: ApiVersion = ApiVersion::new(3, 41);
    /// `with_count` on list requests.
    pub const SUPPORT_COUNT_INFO: ApiVersion = ApiVersion::new(3, 45);
    /// Highest version served.
    pub const MAX_VERSION: ApiVersion = ApiVersion::new(3, 45);
}

/// Availability window of a feature. `max: None` means "and every later
/// version".
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VersionRange {
    /// Minimum version (inclusive).
    pub min: ApiVersion,
    /// Maximum version (inclusive), open when `None`.
    pub max: Option<ApiVersion>,
}

impl VersionRange {
    /// An open-ended range starting at `min`.
    pub const fn since(min: ApiVersion) -> Self {
        VersionRange { min, max: None }
    }

    /// A closed range.
    pub const fn between(min: ApiVersion, max: ApiVersion) -> Self {
        VersionRange {
            min,
            max: Some(max),
        }
    }

    /// Check if a version is within this range.
    pub fn contains(&self, version: ApiVersion) -> bool {
        version >= self.min && self.max.map_or(true, |max| version <= max)
    }
}

impl fmt::Display for VersionRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.max {
            Some(max) => write!(f, "[{}, {}]", self.min, max),
            None => write!(f, "[{}, )", self.min),
        }
    }
}

/// Version-gated capabilities.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Feature {
    /// Unrecognized boolean filter strings read as `false`.
    LenientBooleanFilters,
    /// `glance_metadata` list filter is honored.
    GlanceMetadataFilter,
    /// `group_id` list filter is honored.
    GroupFilter,
    /// The summary endpoint exists.
    VolumeSummary,
    /// `group_id` appears in volume views.
    GroupIdField,
    /// `group_snapshot_id` appears in snapshot views.
    GroupSnapshotIdField,
    /// `provider_id` appears in admin volume views.
    ProviderIdField,
    /// `metadata` snapshot list filter is honored.
    SnapshotMetadataFilter,
    /// Snapshot listings accept the `name` sort key.
    SnapshotSort,
    /// Filter keys are validated against the allow-list.
    ResourceFilter,
    /// `key~` filters match inexactly.
    LikeFilter,
    /// The summary aggregates metadata.
    SummaryMetadata,
    /// The revert action exists.
    VolumeRevert,
    /// `user_id` appears in snapshot views.
    SnapshotUserIdField,
    /// `with_count` is honored on list requests.
    CountInfo,
}

impl Feature {
    /// Name used in logs and `VersionNotFound` errors.
    pub fn name(&self) -> &'static str {
        match self {
            Feature::LenientBooleanFilters => "lenient_boolean_filters",
            Feature::GlanceMetadataFilter => "glance_metadata_filter",
            Feature::GroupFilter => "group_filter",
            Feature::VolumeSummary => "volumes/summary",
            Feature::GroupIdField => "group_id",
            Feature::GroupSnapshotIdField => "group_snapshot_id",
            Feature::ProviderIdField => "provider_id",
            Feature::SnapshotMetadataFilter => "snapshot_metadata_filter",
            Feature::SnapshotSort => "snapshot_sort",
            Feature::ResourceFilter => "resource_filter",
            Feature::LikeFilter => "like_filter",
            Feature::SummaryMetadata => "summary_metadata",
            Feature::VolumeRevert => "volumes/action#revert",
            Feature::SnapshotUserIdField => "snapshot user_id",
            Feature::CountInfo => "with_count",
        }
    }

    /// Availability window from [`FEATURE_TABLE`].
    pub fn range(&self) -> VersionRange {
        FEATURE_TABLE
            .iter()
            .find(|(feature, _)| feature == self)
            .map(|(_, range)| *range)
            .unwrap_or(VersionRange::since(versions::MAX_VERSION))
    }
}

/// Feature availability windows.
pub const FEATURE_TABLE: &[(Feature, VersionRange)] = &[
    (
        Feature::LenientBooleanFilters,
        VersionRange::between(versions::BASE_VERSION, ApiVersion::new(3, 1)),
    ),
    (
        Feature::GlanceMetadataFilter,
        VersionRange::since(versions::VOLUME_LIST_GLANCE_METADATA),
    ),
    (Feature::GroupFilter, VersionRange::since(versions::VOLUME_LIST_GROUP)),
    (Feature::VolumeSummary, VersionRange::since(versions::VOLUME_SUMMARY)),
    (Feature::GroupIdField, VersionRange::since(versions::GROUP_VOLUME)),
    (
        Feature::GroupSnapshotIdField,
        VersionRange::since(versions::GROUP_SNAPSHOTS),
    ),
    (
        Feature::ProviderIdField,
        VersionRange::since(versions::VOLUME_DETAIL_PROVIDER_ID),
    ),
    (
        Feature::SnapshotMetadataFilter,
        VersionRange::since(versions::SNAPSHOT_LIST_METADATA_FILTER),
    ),
    (Feature::SnapshotSort, VersionRange::since(versions::SNAPSHOT_SORT)),
    (Feature::ResourceFilter, VersionRange::since(versions::RESOURCE_FILTER)),
    (Feature::LikeFilter, VersionRange::since(versions::LIKE_FILTER)),
    (
        Feature::SummaryMetadata,
        VersionRange::since(versions::VOLUME_SUMMARY_METADATA),
    ),
    (Feature::VolumeRevert, VersionRange::since(versions::VOLUME_REVERT)),
    (
        Feature::SnapshotUserIdField,
        VersionRange::since(versions::SNAPSHOT_LIST_USER_ID),
    ),
    (Feature::CountInfo, VersionRange::since(versions::SUPPORT_COUNT_INFO)),
];

/// Capabilities enabled at a negotiated version.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FeatureSet {
    version: ApiVersion,
    enabled: BTreeSet<Feature>,
}

impl FeatureSet {
    /// Derive the feature set for `version` from [`FEATURE_TABLE`].
    pub fn for_version(version: ApiVersion) -> Self {
        let enabled = FEATURE_TABLE
            .iter()
            .filter(|(_, range)| range.contains(version))
            .map(|(feature, _)| *feature)
            .collect();
        FeatureSet { version, enabled }
    }

    /// The negotiated version this set was derived from.
    pub fn version(&self) -> ApiVersion {
        self.version
    }

    /// Whether `feature` is available at this version.
    pub fn is_enabled(&self, feature: Feature) -> bool {
        self.enabled.contains(&feature)
    }

    /// Fail with `VersionNotFound` unless `feature` is enabled.
    pub fn require(&self, feature: Feature) -> Result<()> {
        if self.is_enabled(feature) {
            Ok(())
        } else {
            Err(ApiError::VersionNotFound {
                method: feature.name(),
                version: self.version,
            })
        }
    }

    /// Enabled features in declaration order.
    pub fn iter(&self) -> impl Iterator<Item = Feature> + '_ {
        self.enabled.iter().copied()
    }
}

/// Resolves client version tokens against the served version range.
#[derive(Debug, Clone)]
pub struct VersionNegotiator {
    min: ApiVersion,
    max: ApiVersion,
}

impl VersionNegotiator {
    /// Service name accepted as a prefix of the header value.
    pub const SERVICE: &'static str = "volume";

    /// Create a negotiator serving `[min, max]`.
    pub fn new(min: ApiVersion, max: ApiVersion) -> Self {
        VersionNegotiator { min, max }
    }

    /// Lowest served version, assumed when no header is sent.
    pub fn min(&self) -> ApiVersion {
        self.min
    }

    /// Highest served version, selected by `latest`.
    pub fn max(&self) -> ApiVersion {
        self.max
    }

    /// Resolve a header value (`"volume 3.40"`, `"3.40"`, `"latest"`) to a
    /// served version. No header means the base version.
    pub fn negotiate(&self, token: Option<&str>) -> Result<ApiVersion> {
        let Some(raw) = token.map(str::trim).filter(|t| !t.is_empty()) else {
            return Ok(self.min);
        };

        let value = match raw.split_once(char::is_whitespace) {
            Some((service, rest)) if service.eq_ignore_ascii_case(Self::SERVICE) => rest.trim(),
            Some(_) => return Err(ApiError::InvalidVersion(raw.to_string())),
            None => raw,
        };

        if value.eq_ignore_ascii_case("latest") {
            return Ok(self.max);
        }

        let version: ApiVersion = value.parse()?;
        if version < self.min || version > self.max {
            return Err(ApiError::UnsupportedVersion {
                version,
                min: self.min,
                max: self.max,
            });
        }
        Ok(version)
    }

    /// Negotiate and derive the feature set in one step.
    pub fn negotiate_features(&self, token: Option<&str>) -> Result<FeatureSet> {
        let version = self.negotiate(token)?;
        tracing::trace!(%version, "negotiated API version");
        Ok(FeatureSet::for_version(version))
    }
}

impl Default for VersionNegotiator {
    fn default() -> Self {
        Self::new(versions::BASE_VERSION, versions::MAX_VERSION)
    }
}

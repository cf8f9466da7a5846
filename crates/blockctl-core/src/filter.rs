//! List-query filter validation and normalization.
//!
//! Two independent policies apply here. The generic unknown-filter policy
//! decides what happens to keys outside the allow-list: they are dropped
//! below [`Feature::ResourceFilter`] and rejected at or above it. The
//! feature-gated filter policy makes `glance_metadata` and `group_id` on
//! volumes, and `metadata` on snapshots, inert below their own thresholds.
//! The two cross their thresholds at different versions, so they are kept
//! apart.

use std::collections::{BTreeMap, BTreeSet};

use uuid::Uuid;

use crate::context::RequestContext;
use crate::error::{ApiError, Result};
use crate::model::{Snapshot, Volume};
use crate::version::{Feature, FeatureSet};

/// Volume attributes callers may filter on by default.
pub const DEFAULT_VOLUME_FILTERS: &[&str] = &[
    "name",
    "status",
    "metadata",
    "bootable",
    "migration_status",
    "availability_zone",
    "group_id",
    "size",
    "glance_metadata",
];

/// Snapshot attributes callers may filter on by default.
pub const DEFAULT_SNAPSHOT_FILTERS: &[&str] = &["name", "status", "volume_id", "metadata", "availability_zone"];

/// Query keys consumed by the listing layer; never treated as filters.
pub const RESERVED_KEYS: &[&str] = &[
    "limit",
    "marker",
    "offset",
    "sort",
    "sort_key",
    "sort_dir",
    "with_count",
    "all_tenants",
];

const LIKE_SUFFIX: char = '~';

/// Parse a boolean query value.
///
/// Accepts `1/0`, `t/f`, `true/false`, `on/off`, `y/n`, `yes/no` in any
/// case. Anything else is an error when `strict`, `false` otherwise.
pub fn parse_bool(name: &str, value: &str, strict: bool) -> Result<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "t" | "true" | "on" | "y" | "yes" => Ok(true),
        "0" | "f" | "false" | "off" | "n" | "no" => Ok(false),
        _ if strict => Err(ApiError::InvalidInput(format!(
            "{} must be a boolean, got {:?}",
            name, value
        ))),
        _ => Ok(false),
    }
}

/// Parse a nested key/value filter such as `{"image_name": "cirros"}`.
/// Single-quoted dict literals are accepted too.
fn parse_key_values(name: &str, value: &str) -> Result<BTreeMap<String, String>> {
    let parsed: serde_json::Map<String, serde_json::Value> = serde_json::from_str(value)
        .or_else(|_| serde_json::from_str(&value.replace('\'', "\"")))
        .map_err(|e| ApiError::InvalidInput(format!("{} is not a valid mapping: {}", name, e)))?;

    Ok(parsed
        .into_iter()
        .map(|(k, v)| match v {
            serde_json::Value::String(s) => (k, s),
            other => (k, other.to_string()),
        })
        .collect())
}

/// The collection a [`FilterValidator`] guards.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Resource {
    /// `volumes` listings.
    Volume,
    /// `snapshots` listings.
    Snapshot,
}

/// A record list filters can be evaluated against.
pub trait Filterable {
    /// String form of a filterable attribute. `None` for attributes the
    /// record does not have, which therefore match nothing.
    fn attribute(&self, key: &str) -> Option<String>;

    /// User metadata.
    fn metadata(&self) -> &BTreeMap<String, String>;

    /// Image metadata, for records that carry it.
    fn glance_metadata(&self) -> Option<&BTreeMap<String, String>> {
        None
    }

    /// Bootable flag, for records that carry it.
    fn bootable(&self) -> Option<bool> {
        None
    }

    /// Owning group, for records that can belong to one.
    fn group_id(&self) -> Option<Uuid> {
        None
    }
}

impl Filterable for Volume {
    fn attribute(&self, key: &str) -> Option<String> {
        match key {
            "id" => Some(self.id.to_string()),
            "name" | "display_name" => self.name.clone(),
            "description" | "display_description" => self.description.clone(),
            "status" => Some(self.status.as_str().to_string()),
            "size" => Some(self.size.to_string()),
            "availability_zone" => Some(self.availability_zone.clone()),
            "migration_status" => self.migration_status.clone(),
            "project_id" => Some(self.project_id.clone()),
            "user_id" => Some(self.user_id.clone()),
            "provider_id" => self.provider_id.clone(),
            "snapshot_id" => self.snapshot_id.map(|id| id.to_string()),
            "source_volid" => self.source_volid.map(|id| id.to_string()),
            _ => None,
        }
    }

    fn metadata(&self) -> &BTreeMap<String, String> {
        &self.metadata
    }

    fn glance_metadata(&self) -> Option<&BTreeMap<String, String>> {
        Some(&self.glance_metadata)
    }

    fn bootable(&self) -> Option<bool> {
        Some(self.bootable)
    }

    fn group_id(&self) -> Option<Uuid> {
        self.group_id
    }
}

impl Filterable for Snapshot {
    fn attribute(&self, key: &str) -> Option<String> {
        match key {
            "id" => Some(self.id.to_string()),
            "name" | "display_name" => self.name.clone(),
            "description" | "display_description" => self.description.clone(),
            "status" => Some(self.status.as_str().to_string()),
            "volume_id" => Some(self.volume_id.to_string()),
            "size" | "volume_size" => Some(self.volume_size.to_string()),
            "availability_zone" => Some(self.availability_zone.clone()),
            "project_id" => Some(self.project_id.clone()),
            "user_id" => Some(self.user_id.clone()),
            "group_snapshot_id" => self.group_snapshot_id.map(|id| id.to_string()),
            _ => None,
        }
    }

    fn metadata(&self) -> &BTreeMap<String, String> {
        &self.metadata
    }
}

/// How a single attribute filter matches.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FieldMatch {
    /// Equality.
    Exact(String),
    /// Substring match, from a `key~=value` filter.
    Like(String),
}

impl FieldMatch {
    fn matches(&self, actual: &str) -> bool {
        match self {
            FieldMatch::Exact(expected) => actual == expected,
            FieldMatch::Like(fragment) => actual.contains(fragment.as_str()),
        }
    }
}

/// Normalized filters handed to the store.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ListFilters {
    /// Attribute filters keyed by attribute name.
    pub fields: BTreeMap<String, FieldMatch>,
    /// Required bootable flag.
    pub bootable: Option<bool>,
    /// Every pair must be present in the record metadata.
    pub metadata: Option<BTreeMap<String, String>>,
    /// Every pair must be present in the image metadata.
    pub glance_metadata: Option<BTreeMap<String, String>>,
    /// Required owning group.
    pub group_id: Option<Uuid>,
    /// Feature-gated keys that were present but inert at this version.
    pub inert: Vec<String>,
    /// Unknown keys dropped below the resource-filter threshold.
    pub ignored: Vec<String>,
}

impl ListFilters {
    /// Whether `item` satisfies every filter.
    pub fn matches<T: Filterable + ?Sized>(&self, item: &T) -> bool {
        let fields_match = self.fields.iter().all(|(key, expected)| {
            item.attribute(key).map_or(false, |actual| expected.matches(&actual))
        });

        fields_match
            && self.bootable.map_or(true, |b| item.bootable() == Some(b))
            && self.group_id.map_or(true, |g| item.group_id() == Some(g))
            && contains_all(Some(item.metadata()), self.metadata.as_ref())
            && contains_all(item.glance_metadata(), self.glance_metadata.as_ref())
    }

    /// Whether no filter constrains the listing.
    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
            && self.bootable.is_none()
            && self.metadata.is_none()
            && self.glance_metadata.is_none()
            && self.group_id.is_none()
    }
}

fn contains_all(actual: Option<&BTreeMap<String, String>>, wanted: Option<&BTreeMap<String, String>>) -> bool {
    match (actual, wanted) {
        (_, None) => true,
        (None, Some(_)) => false,
        (Some(actual), Some(wanted)) => wanted.iter().all(|(k, v)| actual.get(k) == Some(v)),
    }
}

/// Validates raw list-query parameters against an allow-list.
#[derive(Debug, Clone)]
pub struct FilterValidator {
    resource: Resource,
    allowed: BTreeSet<String>,
}

impl FilterValidator {
    /// Create a volume validator for the given allow-list.
    pub fn new<I, S>(allowed: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self::for_resource(Resource::Volume, allowed)
    }

    /// Create a validator for `resource` with the given allow-list.
    pub fn for_resource<I, S>(resource: Resource, allowed: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            resource,
            allowed: allowed.into_iter().map(Into::into).collect(),
        }
    }

    /// Snapshot validator with the default allow-list.
    pub fn snapshots() -> Self {
        Self::for_resource(Resource::Snapshot, DEFAULT_SNAPSHOT_FILTERS.iter().copied())
    }

    /// The collection this validator guards.
    pub fn resource(&self) -> Resource {
        self.resource
    }

    /// Whether `key` is on the allow-list.
    pub fn is_allowed(&self, key: &str) -> bool {
        self.allowed.contains(key)
    }

    /// Validate and normalize `raw`. Reserved listing keys are skipped.
    pub fn validate(
        &self,
        raw: &BTreeMap<String, String>,
        ctx: &RequestContext,
        features: &FeatureSet,
    ) -> Result<ListFilters> {
        let like_enabled = features.is_enabled(Feature::LikeFilter);
        let strict_unknown = features.is_enabled(Feature::ResourceFilter);
        let strict_bool = !features.is_enabled(Feature::LenientBooleanFilters);

        let mut filters = ListFilters::default();
        let mut rejected = Vec::new();

        for (key, value) in raw {
            if RESERVED_KEYS.contains(&key.as_str()) {
                continue;
            }

            let (base, like) = match key.strip_suffix(LIKE_SUFFIX) {
                Some(base) if like_enabled && !base.is_empty() => (base, true),
                _ => (key.as_str(), false),
            };

            if !self.is_allowed(base) {
                if ctx.is_admin {
                    // Admins may filter on any attribute.
                    filters.fields.insert(base.to_string(), field_match(value, like));
                } else if strict_unknown {
                    rejected.push(key.clone());
                } else {
                    tracing::debug!(filter = %key, "ignoring unsupported filter");
                    filters.ignored.push(key.clone());
                }
                continue;
            }

            match (self.resource, base) {
                (Resource::Volume, "bootable") => filters.bootable = Some(parse_bool(base, value, strict_bool)?),
                (Resource::Volume, "metadata") => filters.metadata = Some(parse_key_values(base, value)?),
                (Resource::Snapshot, "metadata") => {
                    if features.is_enabled(Feature::SnapshotMetadataFilter) {
                        filters.metadata = Some(parse_key_values(base, value)?);
                    } else {
                        filters.inert.push(key.clone());
                    }
                }
                (Resource::Volume, "glance_metadata") => {
                    if features.is_enabled(Feature::GlanceMetadataFilter) {
                        filters.glance_metadata = Some(parse_key_values(base, value)?);
                    } else {
                        filters.inert.push(key.clone());
                    }
                }
                (Resource::Volume, "group_id") => {
                    if features.is_enabled(Feature::GroupFilter) {
                        let group_id = Uuid::parse_str(value.trim()).map_err(|_| {
                            ApiError::InvalidInput(format!("group_id {:?} is not a valid UUID", value))
                        })?;
                        filters.group_id = Some(group_id);
                    } else {
                        filters.inert.push(key.clone());
                    }
                }
                _ => {
                    filters.fields.insert(base.to_string(), field_match(value, like));
                }
            }
        }

        if !rejected.is_empty() {
            return Err(ApiError::InvalidInput(format!(
                "invalid filters {} are found in query options",
                rejected.join(",")
            )));
        }

        if !filters.inert.is_empty() {
            tracing::debug!(
                keys = ?filters.inert,
                resource = ?self.resource,
                version = %features.version(),
                "filters not supported at this version are inert"
            );
        }
        Ok(filters)
    }
}

impl Default for FilterValidator {
    fn default() -> Self {
        Self::new(DEFAULT_VOLUME_FILTERS.iter().copied())
    }
}

fn field_match(value: &str, like: bool) -> FieldMatch {
    if like {
        FieldMatch::Like(value.to_string())
    } else {
        FieldMatch::Exact(value.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use crate::version::{versions, ApiVersion};

    fn raw(pairs: &[(&str, &str)]) -> BTreeMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    fn at(minor: u16) -> FeatureSet {
        FeatureSet::for_version(ApiVersion::new(3, minor))
    }

    fn user() -> RequestContext {
        RequestContext::new("u1", "p1")
    }

    #[test]
    fn test_unknown_filter_ignored_below_resource_filter() {
        let validator = FilterValidator::default();
        let filters = validator
            .validate(&raw(&[("color", "red")]), &user(), &at(30))
            .unwrap();
        assert_eq!(filters.ignored, vec!["color".to_string()]);
        assert!(filters.is_empty());
    }

    #[test]
    fn test_unknown_filter_rejected_at_resource_filter() {
        let validator = FilterValidator::default();
        let err = validator
            .validate(&raw(&[("color", "red")]), &user(), &at(31))
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidInput);
        assert!(err.to_string().contains("color"));
    }

    #[test]
    fn test_admin_unknown_filter_becomes_attribute_filter() {
        let validator = FilterValidator::default();
        let admin = RequestContext::admin("u1", "p1");
        let filters = validator
            .validate(&raw(&[("color", "red")]), &admin, &at(45))
            .unwrap();
        assert_eq!(filters.fields.get("color"), Some(&FieldMatch::Exact("red".to_string())));
        assert!(!filters.matches(&Volume::new("p1", 1)));
    }

    #[test]
    fn test_reserved_keys_are_not_filters() {
        let validator = FilterValidator::default();
        let filters = validator
            .validate(
                &raw(&[("limit", "1"), ("with_count", "true"), ("all_tenants", "1")]),
                &user(),
                &at(45),
            )
            .unwrap();
        assert!(filters.is_empty());
        assert!(filters.ignored.is_empty());
    }

    #[test]
    fn test_like_filter_only_at_threshold() {
        let validator = FilterValidator::default();
        let filters = validator
            .validate(&raw(&[("name~", "vol")]), &user(), &at(34))
            .unwrap();
        assert_eq!(filters.fields.get("name"), Some(&FieldMatch::Like("vol".to_string())));

        // Before like support the key is just an unknown filter.
        let err = validator
            .validate(&raw(&[("name~", "vol")]), &user(), &at(33))
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidInput);

        let filters = validator
            .validate(&raw(&[("name~", "vol")]), &user(), &at(30))
            .unwrap();
        assert_eq!(filters.ignored, vec!["name~".to_string()]);
    }

    #[test]
    fn test_bootable_strict_parsing() {
        let validator = FilterValidator::default();
        let err = validator
            .validate(&raw(&[("bootable", "maybe")]), &user(), &at(2))
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidInput);

        let filters = validator
            .validate(&raw(&[("bootable", "True")]), &user(), &at(2))
            .unwrap();
        assert_eq!(filters.bootable, Some(true));
    }

    #[test]
    fn test_bootable_lenient_before_strict_version() {
        let validator = FilterValidator::default();
        let filters = validator
            .validate(&raw(&[("bootable", "maybe")]), &user(), &at(1))
            .unwrap();
        assert_eq!(filters.bootable, Some(false));
    }

    #[test]
    fn test_glance_metadata_gated() {
        let validator = FilterValidator::default();
        let query = raw(&[("glance_metadata", "{'image_name': 'imageTestOne'}")]);

        let below = validator.validate(&query, &user(), &at(3)).unwrap();
        assert!(below.glance_metadata.is_none());
        assert_eq!(below.inert, vec!["glance_metadata".to_string()]);

        let at_threshold = validator
            .validate(&query, &user(), &FeatureSet::for_version(versions::VOLUME_LIST_GLANCE_METADATA))
            .unwrap();
        let expected: BTreeMap<String, String> =
            [("image_name".to_string(), "imageTestOne".to_string())].into();
        assert_eq!(at_threshold.glance_metadata, Some(expected));
    }

    #[test]
    fn test_group_id_gated_and_validated() {
        let validator = FilterValidator::default();
        let group = Uuid::new_v4();
        let query = raw(&[("group_id", &group.to_string())]);

        let below = validator.validate(&query, &user(), &at(9)).unwrap();
        assert!(below.group_id.is_none());
        assert_eq!(below.inert, vec!["group_id".to_string()]);

        let honored = validator.validate(&query, &user(), &at(10)).unwrap();
        assert_eq!(honored.group_id, Some(group));

        let err = validator
            .validate(&raw(&[("group_id", "not-a-uuid")]), &user(), &at(10))
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidInput);
    }

    #[test]
    fn test_metadata_filter_malformed() {
        let validator = FilterValidator::default();
        let err = validator
            .validate(&raw(&[("metadata", "{not json")]), &user(), &at(45))
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidInput);
    }

    #[test]
    fn test_matches_metadata_and_fields() {
        let volume = Volume::new("p1", 5)
            .with_name("db-volume")
            .with_metadata("tier", "gold")
            .with_metadata("env", "prod");
        let validator = FilterValidator::default();

        let filters = validator
            .validate(
                &raw(&[("metadata", r#"{"tier": "gold"}"#), ("name~", "db"), ("size", "5")]),
                &user(),
                &at(45),
            )
            .unwrap();
        assert!(filters.matches(&volume));

        let filters = validator
            .validate(&raw(&[("metadata", r#"{"tier": "silver"}"#)]), &user(), &at(45))
            .unwrap();
        assert!(!filters.matches(&volume));
    }

    #[test]
    fn test_parse_bool_values() {
        assert!(parse_bool("x", "YES", true).unwrap());
        assert!(!parse_bool("x", "off", true).unwrap());
        assert!(parse_bool("x", "1", true).unwrap());
        assert!(parse_bool("x", "2", true).is_err());
        assert!(!parse_bool("x", "2", false).unwrap());
    }

    #[test]
    fn test_snapshot_metadata_filter_gated() {
        let validator = FilterValidator::snapshots();
        let query = raw(&[("metadata", r#"{"key1": "val1"}"#)]);

        let below = validator.validate(&query, &user(), &at(21)).unwrap();
        assert!(below.metadata.is_none());
        assert_eq!(below.inert, vec!["metadata".to_string()]);

        let honored = validator
            .validate(&query, &user(), &FeatureSet::for_version(versions::SNAPSHOT_LIST_METADATA_FILTER))
            .unwrap();
        let expected: BTreeMap<String, String> = [("key1".to_string(), "val1".to_string())].into();
        assert_eq!(honored.metadata, Some(expected));
    }

    #[test]
    fn test_snapshot_allow_list() {
        let validator = FilterValidator::snapshots();
        assert_eq!(validator.resource(), Resource::Snapshot);

        let volume = Volume::new("p1", 1);
        let snapshot = Snapshot::of(&volume);
        let filters = validator
            .validate(&raw(&[("volume_id", &volume.id.to_string())]), &user(), &at(31))
            .unwrap();
        assert!(filters.matches(&snapshot));

        // Volume-only keys are unknown on snapshots.
        let err = validator
            .validate(&raw(&[("bootable", "true")]), &user(), &at(31))
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidInput);
    }

    #[test]
    fn test_snapshot_never_matches_volume_only_filters() {
        let snapshot = Snapshot::of(&Volume::new("p1", 1));
        let filters = ListFilters {
            bootable: Some(false),
            ..ListFilters::default()
        };
        assert!(!filters.matches(&snapshot));

        let filters = ListFilters {
            glance_metadata: Some(BTreeMap::new()),
            ..ListFilters::default()
        };
        assert!(!filters.matches(&snapshot));
    }
}

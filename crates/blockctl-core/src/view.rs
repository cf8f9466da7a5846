//! External representations of volumes and snapshots.
//!
//! Which optional fields are present depends on the negotiated
//! [`FeatureSet`] and, for a few administrative fields, on the caller's
//! role. A field that is absent is different from a field that is `null`:
//! `group_id` is omitted below its version and `null` at or above it for a
//! volume without a group.
//!
//! A full page gets a `next` link that repeats the request's query with
//! `marker` and `limit` replaced, so filters, scope, sort and `with_count`
//! carry over to the following page.

#![allow(missing_docs)]

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::Serialize;
use uuid::Uuid;

use crate::attachment::{project_attachments, AttachmentView};
use crate::context::RequestContext;
use crate::listing::{SnapshotPage, VolumePage};
use crate::model::{Snapshot, Volume};
use crate::summary::VolumeSummary;
use crate::version::{Feature, FeatureSet};

/// A hypermedia link.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Link {
    /// `self`, `bookmark` or `next`.
    pub rel: &'static str,
    /// Absolute URL.
    pub href: String,
}

/// Volume as shown by the plain listing.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct VolumeBrief {
    pub id: Uuid,
    pub name: Option<String>,
    /// `self` and `bookmark` links.
    pub links: Vec<Link>,
}

/// Volume as shown by show and the detail listing.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct VolumeDetail {
    pub id: Uuid,
    pub name: Option<String>,
    pub description: Option<String>,
    pub status: String,
    pub size: u64,
    pub availability_zone: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: Option<DateTime<Utc>>,
    pub metadata: BTreeMap<String, String>,
    /// `"true"` or `"false"`.
    pub bootable: String,
    pub snapshot_id: Option<Uuid>,
    pub source_volid: Option<Uuid>,
    pub user_id: String,
    pub attachments: Vec<AttachmentView>,
    pub links: Vec<Link>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub group_id: Option<Option<Uuid>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub provider_id: Option<Option<String>>,
    #[serde(
        rename = "os-vol-tenant-attr:tenant_id",
        skip_serializing_if = "Option::is_none"
    )]
    pub tenant_id: Option<String>,
}

/// Body of a volume list response.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct VolumeList<T> {
    /// Volumes of this page.
    pub volumes: Vec<T>,
    /// `next` link, present only for a full page.
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub volumes_links: Vec<Link>,
    /// Total matches, present only when requested and supported.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub count: Option<usize>,
}

/// Body of a volume show response.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct VolumeEnvelope {
    pub volume: VolumeDetail,
}

/// Body of a summary response.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SummaryEnvelope {
    #[serde(rename = "volume-summary")]
    pub volume_summary: VolumeSummary,
}

/// Snapshot as shown by show and both listings.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SnapshotView {
    pub id: Uuid,
    pub status: String,
    pub size: u64,
    pub volume_id: Uuid,
    pub name: Option<String>,
    pub description: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: Option<DateTime<Utc>>,
    pub metadata: BTreeMap<String, String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub group_snapshot_id: Option<Option<Uuid>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user_id: Option<String>,
    /// Owning project; omitted from the plain listing.
    #[serde(
        rename = "os-extended-snapshot-attributes:project_id",
        skip_serializing_if = "Option::is_none"
    )]
    pub project_id: Option<String>,
}

/// Body of a snapshot show response.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SnapshotEnvelope {
    pub snapshot: SnapshotView,
}

/// Body of a snapshot list response.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SnapshotList {
    /// Snapshots of this page.
    pub snapshots: Vec<SnapshotView>,
    /// `next` link, present only for a full page.
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub snapshots_links: Vec<Link>,
    /// Total matches, present only when requested and supported.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub count: Option<usize>,
}

/// Builds response bodies. Links are rooted at the public endpoint.
#[derive(Debug, Clone)]
pub struct ViewBuilder {
    endpoint: String,
}

impl ViewBuilder {
    /// Create a builder rooting links at `public_endpoint`.
    pub fn new(public_endpoint: &str) -> Self {
        Self {
            endpoint: public_endpoint.trim_end_matches('/').to_string(),
        }
    }

    fn volume_links(&self, volume: &Volume) -> Vec<Link> {
        vec![
            Link {
                rel: "self",
                href: format!("{}/v3/{}/volumes/{}", self.endpoint, volume.project_id, volume.id),
            },
            Link {
                rel: "bookmark",
                href: format!("{}/{}/volumes/{}", self.endpoint, volume.project_id, volume.id),
            },
        ]
    }

    /// Listing view of `volume`.
    pub fn brief(&self, volume: &Volume) -> VolumeBrief {
        VolumeBrief {
            id: volume.id,
            name: volume.name.clone(),
            links: self.volume_links(volume),
        }
    }

    /// Detailed view of `volume` for `ctx` at the negotiated version.
    pub fn detail(&self, volume: &Volume, ctx: &RequestContext, features: &FeatureSet) -> VolumeDetail {
        VolumeDetail {
            id: volume.id,
            name: volume.name.clone(),
            description: volume.description.clone(),
            status: volume.status.to_string(),
            size: volume.size,
            availability_zone: volume.availability_zone.clone(),
            created_at: volume.created_at,
            updated_at: volume.updated_at,
            metadata: volume.metadata.clone(),
            bootable: volume.bootable.to_string(),
            snapshot_id: volume.snapshot_id,
            source_volid: volume.source_volid,
            user_id: volume.user_id.clone(),
            attachments: project_attachments(&volume.attachments),
            links: self.volume_links(volume),
            group_id: features
                .is_enabled(Feature::GroupIdField)
                .then_some(volume.group_id),
            provider_id: (ctx.is_admin && features.is_enabled(Feature::ProviderIdField))
                .then(|| volume.provider_id.clone()),
            tenant_id: ctx.is_admin.then(|| volume.project_id.clone()),
        }
    }

    /// Show response for `volume`.
    pub fn show(&self, volume: &Volume, ctx: &RequestContext, features: &FeatureSet) -> VolumeEnvelope {
        VolumeEnvelope {
            volume: self.detail(volume, ctx, features),
        }
    }

    /// A `next` link for `path` when there is a following page.
    ///
    /// The request's query is kept except for `offset`, which the marker
    /// supersedes.
    fn next_link(
        &self,
        path: &str,
        marker: Option<Uuid>,
        limit: usize,
        params: &BTreeMap<String, String>,
    ) -> Vec<Link> {
        let Some(marker) = marker else {
            return Vec::new();
        };

        let mut query = params.clone();
        query.remove("offset");
        query.insert("limit".to_string(), limit.to_string());
        query.insert("marker".to_string(), marker.to_string());
        let query = query
            .iter()
            .map(|(k, v)| format!("{}={}", urlencoding::encode(k), urlencoding::encode(v)))
            .collect::<Vec<_>>()
            .join("&");

        vec![Link {
            rel: "next",
            href: format!("{}{}?{}", self.endpoint, path, query),
        }]
    }

    /// Plain volume listing. `params` is the request query.
    pub fn index(
        &self,
        page: &VolumePage,
        project_id: &str,
        params: &BTreeMap<String, String>,
    ) -> VolumeList<VolumeBrief> {
        let path = format!("/v3/{}/volumes", project_id);
        VolumeList {
            volumes: page.items.iter().map(|v| self.brief(v)).collect(),
            volumes_links: self.next_link(&path, page.next_marker(), page.limit, params),
            count: page.count,
        }
    }

    /// Detailed volume listing. `params` is the request query.
    pub fn detail_list(
        &self,
        page: &VolumePage,
        project_id: &str,
        params: &BTreeMap<String, String>,
        ctx: &RequestContext,
        features: &FeatureSet,
    ) -> VolumeList<VolumeDetail> {
        let path = format!("/v3/{}/volumes/detail", project_id);
        VolumeList {
            volumes: page
                .items
                .iter()
                .map(|v| self.detail(v, ctx, features))
                .collect(),
            volumes_links: self.next_link(&path, page.next_marker(), page.limit, params),
            count: page.count,
        }
    }

    /// Summary response.
    pub fn summary(&self, summary: VolumeSummary) -> SummaryEnvelope {
        SummaryEnvelope {
            volume_summary: summary,
        }
    }

    fn snapshot_view(&self, snapshot: &Snapshot, features: &FeatureSet, extended: bool) -> SnapshotView {
        SnapshotView {
            id: snapshot.id,
            status: snapshot.status.to_string(),
            size: snapshot.volume_size,
            volume_id: snapshot.volume_id,
            name: snapshot.name.clone(),
            description: snapshot.description.clone(),
            created_at: snapshot.created_at,
            updated_at: snapshot.updated_at,
            metadata: snapshot.metadata.clone(),
            group_snapshot_id: features
                .is_enabled(Feature::GroupSnapshotIdField)
                .then_some(snapshot.group_snapshot_id),
            user_id: features
                .is_enabled(Feature::SnapshotUserIdField)
                .then(|| snapshot.user_id.clone()),
            project_id: extended.then(|| snapshot.project_id.clone()),
        }
    }

    /// Show response for `snapshot`.
    pub fn snapshot(&self, snapshot: &Snapshot, features: &FeatureSet) -> SnapshotEnvelope {
        SnapshotEnvelope {
            snapshot: self.snapshot_view(snapshot, features, true),
        }
    }

    /// Snapshot listing; `detail` adds the extended attributes.
    pub fn snapshot_list(
        &self,
        page: &SnapshotPage,
        project_id: &str,
        params: &BTreeMap<String, String>,
        features: &FeatureSet,
        detail: bool,
    ) -> SnapshotList {
        let path = if detail {
            format!("/v3/{}/snapshots/detail", project_id)
        } else {
            format!("/v3/{}/snapshots", project_id)
        };
        SnapshotList {
            snapshots: page
                .items
                .iter()
                .map(|s| self.snapshot_view(s, features, detail))
                .collect(),
            snapshots_links: self.next_link(&path, page.next_marker(), page.limit, params),
            count: page.count,
        }
    }
}

impl Default for ViewBuilder {
    fn default() -> Self {
        Self::new("http://localhost:8776")
    }
}

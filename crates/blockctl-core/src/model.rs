//! Volume, snapshot and attachment records as held by the persistence
//! collaborator.

use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Lifecycle state of a volume.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum VolumeStatus {
    /// Being provisioned.
    #[serde(rename = "creating")]
    Creating,
    /// Idle and usable.
    #[serde(rename = "available")]
    Available,
    /// Held for an attachment that has not started.
    #[serde(rename = "reserved")]
    Reserved,
    /// Attachment in progress.
    #[serde(rename = "attaching")]
    Attaching,
    /// Detachment in progress.
    #[serde(rename = "detaching")]
    Detaching,
    /// Attached to at least one server.
    #[serde(rename = "in-use")]
    InUse,
    /// Locked by an administrative operation.
    #[serde(rename = "maintenance")]
    Maintenance,
    /// Being deleted.
    #[serde(rename = "deleting")]
    Deleting,
    /// Offered for transfer to another project.
    #[serde(rename = "awaiting-transfer")]
    AwaitingTransfer,
    /// A backend operation failed.
    #[serde(rename = "error")]
    Error,
    /// Deletion failed.
    #[serde(rename = "error_deleting")]
    ErrorDeleting,
    /// Import of an existing backend volume failed.
    #[serde(rename = "error_managing")]
    ErrorManaging,
    /// A backup is being taken.
    #[serde(rename = "backing-up")]
    BackingUp,
    /// A backup is being restored onto the volume.
    #[serde(rename = "restoring-backup")]
    RestoringBackup,
    /// Being reverted to a snapshot.
    #[serde(rename = "reverting")]
    Reverting,
    /// Being resized.
    #[serde(rename = "extending")]
    Extending,
    /// Image data is being written.
    #[serde(rename = "downloading")]
    Downloading,
    /// Being uploaded to an image.
    #[serde(rename = "uploading")]
    Uploading,
    /// Changing volume type.
    #[serde(rename = "retyping")]
    Retyping,
    /// Resize failed.
    #[serde(rename = "error_extending")]
    ErrorExtending,
}

impl VolumeStatus {
    /// Wire name.
    pub fn as_str(&self) -> &'static str {
        match self {
            VolumeStatus::Creating => "creating",
            VolumeStatus::Available => "available",
            VolumeStatus::Reserved => "reserved",
            VolumeStatus::Attaching => "attaching",
            VolumeStatus::Detaching => "detaching",
            VolumeStatus::InUse => "in-use",
            VolumeStatus::Maintenance => "maintenance",
            VolumeStatus::Deleting => "deleting",
            VolumeStatus::AwaitingTransfer => "awaiting-transfer",
            VolumeStatus::Error => "error",
            VolumeStatus::ErrorDeleting => "error_deleting",
            VolumeStatus::ErrorManaging => "error_managing",
            VolumeStatus::BackingUp => "backing-up",
            VolumeStatus::RestoringBackup => "restoring-backup",
            VolumeStatus::Reverting => "reverting",
            VolumeStatus::Extending => "extending",
            VolumeStatus::Downloading => "downloading",
            VolumeStatus::Uploading => "uploading",
            VolumeStatus::Retyping => "retyping",
            VolumeStatus::ErrorExtending => "error_extending",
        }
    }
}

impl fmt::Display for VolumeStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Lifecycle state of a snapshot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SnapshotStatus {
    /// Being taken.
    Creating,
    /// Complete and usable.
    Available,
    /// Being deleted.
    Deleting,
    /// Creation failed.
    Error,
    /// Deletion failed.
    ErrorDeleting,
    /// Being released from management.
    Unmanaging,
    /// A backup is being taken from it.
    #[serde(rename = "backing-up")]
    BackingUp,
    /// Its data is being copied back onto the volume.
    Restoring,
}

impl SnapshotStatus {
    /// Wire name.
    pub fn as_str(&self) -> &'static str {
        match self {
            SnapshotStatus::Creating => "creating",
            SnapshotStatus::Available => "available",
            SnapshotStatus::Deleting => "deleting",
            SnapshotStatus::Error => "error",
            SnapshotStatus::ErrorDeleting => "error_deleting",
            SnapshotStatus::Unmanaging => "unmanaging",
            SnapshotStatus::BackingUp => "backing-up",
            SnapshotStatus::Restoring => "restoring",
        }
    }
}

impl fmt::Display for SnapshotStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// State of a single volume attachment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AttachStatus {
    /// Connection in progress.
    Attaching,
    /// Connected; the only state shown to callers.
    Attached,
    /// Disconnection in progress.
    Detaching,
    /// Disconnected.
    Detached,
    /// Connection failed.
    ErrorAttaching,
    /// Disconnection failed.
    ErrorDetaching,
    /// Reserved for a server, not yet connected.
    Reserved,
}

/// An attachment of a volume to a server.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Attachment {
    /// Attachment id.
    pub id: Uuid,
    /// Attached volume.
    pub volume_id: Uuid,
    /// Server the volume is attached to.
    #[serde(default)]
    pub instance_uuid: Option<Uuid>,
    /// Host of that server.
    #[serde(default)]
    pub attached_host: Option<String>,
    /// Device path on the server.
    #[serde(default)]
    pub mountpoint: Option<String>,
    /// When the attachment completed.
    #[serde(default)]
    pub attach_time: Option<DateTime<Utc>>,
    /// Current state.
    pub attach_status: AttachStatus,
}

impl Attachment {
    /// A bare attachment record in the given state.
    pub fn new(volume_id: Uuid, attach_status: AttachStatus) -> Self {
        Self {
            id: Uuid::new_v4(),
            volume_id,
            instance_uuid: None,
            attached_host: None,
            mountpoint: None,
            attach_time: None,
            attach_status,
        }
    }
}

/// A block storage volume.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Volume {
    /// Volume id.
    pub id: Uuid,
    /// Lifecycle state.
    pub status: VolumeStatus,
    /// Size in GiB.
    pub size: u64,
    /// Display name.
    #[serde(default)]
    pub name: Option<String>,
    /// Display description.
    #[serde(default)]
    pub description: Option<String>,
    /// User metadata.
    #[serde(default)]
    pub metadata: BTreeMap<String, String>,
    /// Image properties copied onto bootable volumes.
    #[serde(default)]
    pub glance_metadata: BTreeMap<String, String>,
    /// Availability zone.
    pub availability_zone: String,
    /// Owning project.
    pub project_id: String,
    /// Creating user.
    pub user_id: String,
    /// Whether the volume can boot a server.
    #[serde(default)]
    pub bootable: bool,
    /// Consistency group, if any.
    #[serde(default)]
    pub group_id: Option<Uuid>,
    /// Snapshot the volume was created from.
    #[serde(default)]
    pub snapshot_id: Option<Uuid>,
    /// Volume the volume was cloned from.
    #[serde(default)]
    pub source_volid: Option<Uuid>,
    /// Backend-assigned identifier.
    #[serde(default)]
    pub provider_id: Option<String>,
    /// State of an ongoing or past migration.
    #[serde(default)]
    pub migration_status: Option<String>,
    /// Creation time.
    pub created_at: DateTime<Utc>,
    /// Time of the last status change.
    #[serde(default)]
    pub updated_at: Option<DateTime<Utc>>,
    /// Attachment records in creation order, every state included.
    #[serde(default)]
    pub attachments: Vec<Attachment>,
}

impl Volume {
    /// A new `available` volume owned by `project_id`.
    pub fn new(project_id: impl Into<String>, size: u64) -> Self {
        Self {
            id: Uuid::new_v4(),
            status: VolumeStatus::Available,
            size,
            name: None,
            description: None,
            metadata: BTreeMap::new(),
            glance_metadata: BTreeMap::new(),
            availability_zone: "nova".to_string(),
            project_id: project_id.into(),
            user_id: String::new(),
            bootable: false,
            group_id: None,
            snapshot_id: None,
            source_volid: None,
            provider_id: None,
            migration_status: None,
            created_at: Utc::now(),
            updated_at: None,
            attachments: Vec::new(),
        }
    }

    /// Set the display name.
    pub fn with_name(mut self, name: &str) -> Self {
        self.name = Some(name.to_string());
        self
    }

    /// Set the status.
    pub fn with_status(mut self, status: VolumeStatus) -> Self {
        self.status = status;
        self
    }

    /// Add one user metadata pair.
    pub fn with_metadata(mut self, key: &str, value: &str) -> Self {
        self.metadata.insert(key.to_string(), value.to_string());
        self
    }

    /// Add one image metadata pair.
    pub fn with_glance_metadata(mut self, key: &str, value: &str) -> Self {
        self.glance_metadata.insert(key.to_string(), value.to_string());
        self
    }

    /// Put the volume in a group.
    pub fn with_group(mut self, group_id: Uuid) -> Self {
        self.group_id = Some(group_id);
        self
    }

    /// Set the creation time.
    pub fn with_created_at(mut self, created_at: DateTime<Utc>) -> Self {
        self.created_at = created_at;
        self
    }

    /// Append an attachment record.
    pub fn with_attachment(mut self, attachment: Attachment) -> Self {
        self.attachments.push(attachment);
        self
    }
}

/// A point-in-time snapshot of a volume.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Snapshot {
    /// Snapshot id.
    pub id: Uuid,
    /// Lifecycle state.
    pub status: SnapshotStatus,
    /// Source volume.
    pub volume_id: Uuid,
    /// Size of the source volume when the snapshot was taken, in GiB.
    pub volume_size: u64,
    /// Display name.
    #[serde(default)]
    pub name: Option<String>,
    /// Display description.
    #[serde(default)]
    pub description: Option<String>,
    /// Zone of the source volume.
    #[serde(default)]
    pub availability_zone: String,
    /// Owning project.
    pub project_id: String,
    /// Creating user.
    pub user_id: String,
    /// Group snapshot this snapshot was taken as part of.
    #[serde(default)]
    pub group_snapshot_id: Option<Uuid>,
    /// User metadata.
    #[serde(default)]
    pub metadata: BTreeMap<String, String>,
    /// Creation time.
    pub created_at: DateTime<Utc>,
    /// Time of the last status change.
    #[serde(default)]
    pub updated_at: Option<DateTime<Utc>>,
}

impl Snapshot {
    /// A new `available` snapshot of `volume`.
    pub fn of(volume: &Volume) -> Self {
        Self {
            id: Uuid::new_v4(),
            status: SnapshotStatus::Available,
            volume_id: volume.id,
            volume_size: volume.size,
            name: None,
            description: None,
            availability_zone: volume.availability_zone.clone(),
            project_id: volume.project_id.clone(),
            user_id: volume.user_id.clone(),
            group_snapshot_id: None,
            metadata: BTreeMap::new(),
            created_at: Utc::now(),
            updated_at: None,
        }
    }

    /// Set the display name.
    pub fn with_name(mut self, name: &str) -> Self {
        self.name = Some(name.to_string());
        self
    }

    /// Set the status.
    pub fn with_status(mut self, status: SnapshotStatus) -> Self {
        self.status = status;
        self
    }

    /// Add one user metadata pair.
    pub fn with_metadata(mut self, key: &str, value: &str) -> Self {
        self.metadata.insert(key.to_string(), value.to_string());
        self
    }

    /// Set the creation time.
    pub fn with_created_at(mut self, created_at: DateTime<Utc>) -> Self {
        self.created_at = created_at;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_volume_status_wire_names() {
        assert_eq!(serde_json::to_string(&VolumeStatus::InUse).unwrap(), "\"in-use\"");
        assert_eq!(
            serde_json::from_str::<VolumeStatus>("\"error_deleting\"").unwrap(),
            VolumeStatus::ErrorDeleting
        );
        assert_eq!(VolumeStatus::Reverting.to_string(), "reverting");
    }

    #[test]
    fn test_snapshot_status_wire_names() {
        assert_eq!(
            serde_json::to_string(&SnapshotStatus::BackingUp).unwrap(),
            "\"backing-up\""
        );
        assert_eq!(
            serde_json::from_str::<SnapshotStatus>("\"restoring\"").unwrap(),
            SnapshotStatus::Restoring
        );
    }

    #[test]
    fn test_snapshot_of_volume() {
        let volume = Volume::new("p1", 10);
        let snapshot = Snapshot::of(&volume);
        assert_eq!(snapshot.volume_id, volume.id);
        assert_eq!(snapshot.volume_size, 10);
        assert_eq!(snapshot.project_id, "p1");
        assert_eq!(snapshot.status, SnapshotStatus::Available);
    }

    #[test]
    fn test_volume_deserialize_defaults() {
        let json = r#"{
            "id": "ea895e29-8485-4930-bbb8-c5616a309c0e",
            "status": "available",
            "size": 1,
            "availability_zone": "nova",
            "project_id": "p1",
            "user_id": "u1",
            "created_at": "2017-08-31T21:55:07Z"
        }"#;
        let volume: Volume = serde_json::from_str(json).unwrap();
        assert!(volume.metadata.is_empty());
        assert!(volume.attachments.is_empty());
        assert!(volume.group_id.is_none());
        assert!(!volume.bootable);
    }
}

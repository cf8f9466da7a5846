//! External view of volume attachments.

use chrono::{DateTime, Utc};
use serde::Serialize;
use uuid::Uuid;

use crate::model::{AttachStatus, Attachment};

/// An attachment as shown to API clients.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AttachmentView {
    /// Id of the attached volume.
    pub id: Uuid,
    /// Id of the attachment record.
    pub attachment_id: Uuid,
    /// Same as `id`.
    pub volume_id: Uuid,
    /// Server the volume is attached to.
    pub server_id: Option<Uuid>,
    /// Host of that server.
    pub host_name: Option<String>,
    /// Device path on the server.
    pub device: Option<String>,
    /// When the attachment completed.
    pub attached_at: Option<DateTime<Utc>>,
}

impl From<&Attachment> for AttachmentView {
    fn from(attachment: &Attachment) -> Self {
        Self {
            id: attachment.volume_id,
            attachment_id: attachment.id,
            volume_id: attachment.volume_id,
            server_id: attachment.instance_uuid,
            host_name: attachment.attached_host.clone(),
            device: attachment.mountpoint.clone(),
            attached_at: attachment.attach_time,
        }
    }
}

/// Views of the `attached` entries of `attachments`, in input order. Every
/// other status is left out.
pub fn project_attachments(attachments: &[Attachment]) -> Vec<AttachmentView> {
    attachments
        .iter()
        .filter(|a| a.attach_status == AttachStatus::Attached)
        .map(AttachmentView::from)
        .collect()
}

use chrono::Utc;
use sea_orm::*;

use crate::entity::attachments;
use crate::error::VigilError;
use crate::model::auth::TenantContext;
use crate::model::common::{ALLOWED_MIME_TYPES, MAX_ATTACHMENT_BYTES};
use crate::model::incident::ScanStatus;
use crate::model::job::JOB_SCAN_ATTACHMENT;
use crate::service::audit;
use crate::service::incident;
use crate::service::job;

/// Metadata of a received upload; the byte stream itself is handed to the
/// configured object store by the transport layer.
#[derive(Clone, Debug)]
pub struct Upload {
    pub file_name: String,
    pub mime_type: String,
    pub size_bytes: usize,
}

/// Whitelist and size gate, applied before any row is written.
pub fn validate_upload(upload: &Upload) -> Result<(), VigilError> {
    if upload.file_name.trim().is_empty() {
        return Err(VigilError::AttachmentRejected(
            "file name must not be empty".to_string(),
        ));
    }
    if upload.size_bytes == 0 {
        return Err(VigilError::AttachmentRejected("file is empty".to_string()));
    }
    if upload.size_bytes > MAX_ATTACHMENT_BYTES {
        return Err(VigilError::AttachmentRejected(format!(
            "file exceeds {} bytes",
            MAX_ATTACHMENT_BYTES
        )));
    }
    if !ALLOWED_MIME_TYPES.contains(&upload.mime_type.as_str()) {
        return Err(VigilError::AttachmentRejected(format!(
            "mime type '{}' is not allowed",
            upload.mime_type
        )));
    }
    Ok(())
}

/// Record an upload against an incident. The attachment row starts PENDING
/// and the scan job enqueues in the same transaction.
pub async fn create(
    db: &DatabaseConnection,
    ctx: &TenantContext,
    incident_id: &str,
    upload: Upload,
) -> anyhow::Result<attachments::Model> {
    if !ctx.role.can_write() {
        return Err(VigilError::AccessDenied(
            "write access requires the ENGINEER or ADMIN role".to_string(),
        )
        .into());
    }
    validate_upload(&upload)?;

    let txn = db.begin().await?;
    let incident = incident::find_scoped(&txn, ctx, incident_id).await?;

    let id = uuid::Uuid::new_v4().to_string();
    let attachment = attachments::ActiveModel {
        id: Set(id.clone()),
        incident_id: Set(incident.id.clone()),
        tenant_id: Set(ctx.tenant_id.clone()),
        file_name: Set(upload.file_name.clone()),
        mime_type: Set(upload.mime_type.clone()),
        size_bytes: Set(upload.size_bytes as i64),
        storage_url: Set(format!(
            "store://{}/{}/{}",
            ctx.tenant_id, incident.id, id
        )),
        scan_status: Set(ScanStatus::Pending.as_str().to_string()),
        created_at: Set(Utc::now()),
    };
    let attachment = attachment.insert(&txn).await?;

    job::enqueue(
        &txn,
        &ctx.tenant_id,
        JOB_SCAN_ATTACHMENT,
        serde_json::json!({ "attachmentId": attachment.id }),
    )
    .await?;

    audit::record(
        &txn,
        ctx,
        audit::ACTION_CREATE,
        "attachment",
        &attachment.id,
        None,
        Some(serde_json::to_value(&attachment)?),
        None,
    )
    .await?;

    txn.commit().await?;
    Ok(attachment)
}

pub async fn delete(
    db: &DatabaseConnection,
    ctx: &TenantContext,
    incident_id: &str,
    attachment_id: &str,
) -> anyhow::Result<()> {
    if !ctx.role.can_write() {
        return Err(VigilError::AccessDenied(
            "write access requires the ENGINEER or ADMIN role".to_string(),
        )
        .into());
    }

    let txn = db.begin().await?;

    let attachment = attachments::Entity::find()
        .filter(attachments::Column::TenantId.eq(ctx.tenant_id.as_str()))
        .filter(attachments::Column::IncidentId.eq(incident_id))
        .filter(attachments::Column::Id.eq(attachment_id))
        .one(&txn)
        .await?
        .ok_or_else(|| VigilError::NotFound("attachment".to_string()))?;

    let before = serde_json::to_value(&attachment)?;
    attachment.clone().delete(&txn).await?;

    audit::record(
        &txn,
        ctx,
        audit::ACTION_DELETE,
        "attachment",
        attachment_id,
        Some(before),
        None,
        None,
    )
    .await?;

    txn.commit().await?;
    Ok(())
}

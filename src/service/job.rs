use std::time::Duration;

use chrono::Utc;
use sea_orm::*;
use tracing::{debug, info, warn};

use crate::entity::{attachments, incidents, jobs, timeline_events};
use crate::model::common::MAX_JOB_RETRIES;
use crate::model::incident::ScanStatus;
use crate::model::job::{
    IncidentSummaryPayload, JOB_INCIDENT_SUMMARY, JOB_SCAN_ATTACHMENT, JOB_SEND_NOTIFICATION,
    JobStatus, ScanAttachmentPayload, SendNotificationPayload,
};

/// Insert a job row. Callers pass the transaction of the triggering mutation
/// so a rollback leaks no job.
pub async fn enqueue<C: ConnectionTrait>(
    conn: &C,
    tenant_id: &str,
    job_type: &str,
    payload: serde_json::Value,
) -> anyhow::Result<jobs::Model> {
    let now = Utc::now();
    let job = jobs::ActiveModel {
        id: Set(uuid::Uuid::new_v4().to_string()),
        tenant_id: Set(tenant_id.to_string()),
        job_type: Set(job_type.to_string()),
        payload: Set(payload.to_string()),
        status: Set(JobStatus::Pending.as_str().to_string()),
        result: Set(None),
        error: Set(None),
        retries: Set(0),
        created_at: Set(now),
        updated_at: Set(now),
        processed_at: Set(None),
    };

    Ok(job.insert(conn).await?)
}

#[derive(Clone, Debug)]
pub struct WorkerConfig {
    pub poll_interval: Duration,
    pub batch_size: u64,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(5),
            batch_size: 10,
        }
    }
}

/// Worker loop: poll for pending jobs and drain a batch each tick. Runs
/// until the process exits.
pub async fn run(db: DatabaseConnection, config: WorkerConfig) {
    info!(
        poll_interval_ms = config.poll_interval.as_millis() as u64,
        batch_size = config.batch_size,
        "job worker started"
    );
    let mut ticker = tokio::time::interval(config.poll_interval);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

    loop {
        ticker.tick().await;
        match process_batch(&db, config.batch_size).await {
            Ok(0) => {}
            Ok(n) => debug!(processed = n, "job batch drained"),
            Err(e) => warn!(error = %e, "job batch failed"),
        }
    }
}

/// Fetch up to `batch_size` pending jobs, oldest first, and process each.
/// Delivery is at-least-once; handlers are idempotent.
pub async fn process_batch(db: &DatabaseConnection, batch_size: u64) -> anyhow::Result<u32> {
    let pending = jobs::Entity::find()
        .filter(jobs::Column::Status.eq(JobStatus::Pending.as_str()))
        .order_by_asc(jobs::Column::CreatedAt)
        .limit(batch_size)
        .all(db)
        .await?;

    let mut processed = 0;
    for job in pending {
        process_job(db, job).await?;
        processed += 1;
    }

    Ok(processed)
}

async fn process_job(db: &DatabaseConnection, job: jobs::Model) -> anyhow::Result<()> {
    let mut claim: jobs::ActiveModel = job.clone().into();
    claim.status = Set(JobStatus::Processing.as_str().to_string());
    claim.updated_at = Set(Utc::now());
    let job = claim.update(db).await?;

    match execute(db, &job).await {
        Ok(result) => {
            let mut done: jobs::ActiveModel = job.into();
            done.status = Set(JobStatus::Completed.as_str().to_string());
            done.result = Set(Some(result.to_string()));
            done.processed_at = Set(Some(Utc::now()));
            done.updated_at = Set(Utc::now());
            done.update(db).await?;
        }
        Err(e) => {
            warn!(error = %e, job_type = %job.job_type, job_id = %job.id, "job handler failed");
            let retries = job.retries;
            let mut failed: jobs::ActiveModel = job.into();
            failed.error = Set(Some(e.to_string()));
            failed.updated_at = Set(Utc::now());
            if retries < MAX_JOB_RETRIES {
                failed.status = Set(JobStatus::Pending.as_str().to_string());
                failed.retries = Set(retries + 1);
            } else {
                failed.status = Set(JobStatus::Failed.as_str().to_string());
                failed.processed_at = Set(Some(Utc::now()));
            }
            failed.update(db).await?;
        }
    }

    Ok(())
}

async fn execute(db: &DatabaseConnection, job: &jobs::Model) -> anyhow::Result<serde_json::Value> {
    match job.job_type.as_str() {
        JOB_SCAN_ATTACHMENT => scan_attachment(db, job).await,
        JOB_SEND_NOTIFICATION => send_notification(job),
        JOB_INCIDENT_SUMMARY => incident_summary(db, job).await,
        other => Err(anyhow::anyhow!("unknown job type: {}", other)),
    }
}

/// Deterministic scan stub: the EICAR marker in the file name scans
/// INFECTED, anything else CLEAN. Reprocessing yields the same verdict.
pub fn scan_verdict(file_name: &str) -> ScanStatus {
    if file_name.to_lowercase().contains("eicar") {
        ScanStatus::Infected
    } else {
        ScanStatus::Clean
    }
}

async fn scan_attachment(
    db: &DatabaseConnection,
    job: &jobs::Model,
) -> anyhow::Result<serde_json::Value> {
    let payload: ScanAttachmentPayload = serde_json::from_str(&job.payload)?;

    let attachment = attachments::Entity::find()
        .filter(attachments::Column::TenantId.eq(job.tenant_id.as_str()))
        .filter(attachments::Column::Id.eq(payload.attachment_id.as_str()))
        .one(db)
        .await?
        .ok_or_else(|| anyhow::anyhow!("attachment {} not found", payload.attachment_id))?;

    let mut scanning: attachments::ActiveModel = attachment.clone().into();
    scanning.scan_status = Set(ScanStatus::Scanning.as_str().to_string());
    let attachment = scanning.update(db).await?;

    let verdict = scan_verdict(&attachment.file_name);
    let mut scanned: attachments::ActiveModel = attachment.into();
    scanned.scan_status = Set(verdict.as_str().to_string());
    let attachment = scanned.update(db).await?;

    Ok(serde_json::json!({
        "attachmentId": attachment.id,
        "scanStatus": verdict,
        "sizeBytes": attachment.size_bytes,
    }))
}

fn send_notification(job: &jobs::Model) -> anyhow::Result<serde_json::Value> {
    let payload: SendNotificationPayload = serde_json::from_str(&job.payload)?;
    // Delivery is an external collaborator; the core records the intent.
    info!(
        user_id = %payload.user_id,
        kind = %payload.kind,
        "notification recorded"
    );

    Ok(serde_json::json!({
        "delivered": false,
        "reason": "notification delivery not configured",
        "userId": payload.user_id,
    }))
}

async fn incident_summary(
    db: &DatabaseConnection,
    job: &jobs::Model,
) -> anyhow::Result<serde_json::Value> {
    let payload: IncidentSummaryPayload = serde_json::from_str(&job.payload)?;

    let incident = incidents::Entity::find()
        .filter(incidents::Column::TenantId.eq(job.tenant_id.as_str()))
        .filter(incidents::Column::Id.eq(payload.incident_id.as_str()))
        .one(db)
        .await?
        .ok_or_else(|| anyhow::anyhow!("incident {} not found", payload.incident_id))?;

    let head = timeline_events::Entity::find()
        .filter(timeline_events::Column::TenantId.eq(job.tenant_id.as_str()))
        .filter(timeline_events::Column::IncidentId.eq(incident.id.as_str()))
        .order_by_desc(timeline_events::Column::CreatedAt)
        .order_by_desc(timeline_events::Column::Id)
        .limit(20)
        .all(db)
        .await?;

    Ok(serde_json::json!({
        "incidentId": incident.id,
        "title": incident.title,
        "status": incident.status,
        "severity": incident.severity,
        "recentEventCount": head.len(),
        "recipientIds": payload.recipient_ids,
    }))
}

//! Attachment lifecycle and the worker protocol: lease, retry budget,
//! terminal states and idempotent handlers.

mod common;

use sea_orm::{ActiveModelTrait, ColumnTrait, EntityTrait, QueryFilter, Set};

use vigil::entity::{attachments, jobs};
use vigil::error::VigilError;
use vigil::model::incident::CreateIncident;
use vigil::service::{attachment, incident, job};

fn sample_incident() -> CreateIncident {
    CreateIncident {
        title: "Upload pipeline stalled".to_string(),
        severity: "SEV3".to_string(),
        service: "files".to_string(),
        environment: "PROD".to_string(),
        tags: vec![],
    }
}

fn png_upload(file_name: &str) -> attachment::Upload {
    attachment::Upload {
        file_name: file_name.to_string(),
        mime_type: "image/png".to_string(),
        size_bytes: 1024,
    }
}

#[tokio::test]
async fn test_upload_enqueues_scan_job_and_worker_completes_it() {
    let db = common::setup_db().await;
    let ws = common::seed_workspace(&db, "acme").await;

    let created = incident::create(&db, &ws.engineer_ctx, sample_incident())
        .await
        .unwrap();
    let uploaded = attachment::create(&db, &ws.engineer_ctx, &created.id, png_upload("graph.png"))
        .await
        .unwrap();
    assert_eq!(uploaded.scan_status, "PENDING");

    let queued = jobs::Entity::find()
        .filter(jobs::Column::JobType.eq("SCAN_ATTACHMENT"))
        .all(&db)
        .await
        .unwrap();
    assert_eq!(queued.len(), 1);
    assert_eq!(queued[0].status, "PENDING");
    assert_eq!(queued[0].tenant_id, ws.tenant.id);

    let processed = job::process_batch(&db, 10).await.unwrap();
    assert_eq!(processed, 1);

    let scanned = attachments::Entity::find_by_id(uploaded.id.clone())
        .one(&db)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(scanned.scan_status, "CLEAN");

    let done = jobs::Entity::find_by_id(queued[0].id.clone())
        .one(&db)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(done.status, "COMPLETED");
    assert_eq!(done.retries, 0);
    assert!(done.processed_at.is_some());
    let result: serde_json::Value = serde_json::from_str(done.result.as_deref().unwrap()).unwrap();
    assert_eq!(result["scanStatus"], "CLEAN");

    // Nothing pending remains.
    assert_eq!(job::process_batch(&db, 10).await.unwrap(), 0);
}

#[tokio::test]
async fn test_eicar_marker_scans_infected() {
    let db = common::setup_db().await;
    let ws = common::seed_workspace(&db, "acme").await;

    let created = incident::create(&db, &ws.engineer_ctx, sample_incident())
        .await
        .unwrap();
    let uploaded = attachment::create(
        &db,
        &ws.engineer_ctx,
        &created.id,
        png_upload("eicar-test.png"),
    )
    .await
    .unwrap();

    job::process_batch(&db, 10).await.unwrap();

    let scanned = attachments::Entity::find_by_id(uploaded.id.clone())
        .one(&db)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(scanned.scan_status, "INFECTED");
}

#[tokio::test]
async fn test_reprocessing_a_job_is_idempotent() {
    let db = common::setup_db().await;
    let ws = common::seed_workspace(&db, "acme").await;

    let created = incident::create(&db, &ws.engineer_ctx, sample_incident())
        .await
        .unwrap();
    let uploaded = attachment::create(&db, &ws.engineer_ctx, &created.id, png_upload("dump.png"))
        .await
        .unwrap();

    job::process_batch(&db, 10).await.unwrap();

    // Simulate at-least-once redelivery by resetting the completed job.
    let done = jobs::Entity::find()
        .filter(jobs::Column::JobType.eq("SCAN_ATTACHMENT"))
        .one(&db)
        .await
        .unwrap()
        .unwrap();
    let mut redeliver: jobs::ActiveModel = done.into();
    redeliver.status = Set("PENDING".to_string());
    redeliver.update(&db).await.unwrap();

    job::process_batch(&db, 10).await.unwrap();

    let scanned = attachments::Entity::find_by_id(uploaded.id.clone())
        .one(&db)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(scanned.scan_status, "CLEAN");
}

#[tokio::test]
async fn test_retry_budget_then_failed() {
    let db = common::setup_db().await;
    let ws = common::seed_workspace(&db, "acme").await;

    // A job whose handler always errors.
    let queued = job::enqueue(
        &db,
        &ws.tenant.id,
        "SCAN_ATTACHMENT",
        serde_json::json!({ "attachmentId": "missing" }),
    )
    .await
    .unwrap();

    for expected_retries in 1..=3 {
        job::process_batch(&db, 10).await.unwrap();
        let row = jobs::Entity::find_by_id(queued.id.clone())
            .one(&db)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(row.status, "PENDING");
        assert_eq!(row.retries, expected_retries);
        assert!(row.error.is_some());
    }

    // Fourth failure exhausts the budget.
    job::process_batch(&db, 10).await.unwrap();
    let row = jobs::Entity::find_by_id(queued.id.clone())
        .one(&db)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(row.status, "FAILED");
    assert_eq!(row.retries, 3);
    assert!(row.error.is_some());

    // Terminal: the worker will not pick it up again.
    assert_eq!(job::process_batch(&db, 10).await.unwrap(), 0);
}

#[tokio::test]
async fn test_unknown_job_type_fails_after_retries() {
    let db = common::setup_db().await;
    let ws = common::seed_workspace(&db, "acme").await;

    let queued = job::enqueue(&db, &ws.tenant.id, "RENDER_PDF", serde_json::json!({}))
        .await
        .unwrap();

    for _ in 0..4 {
        job::process_batch(&db, 10).await.unwrap();
    }

    let row = jobs::Entity::find_by_id(queued.id.clone())
        .one(&db)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(row.status, "FAILED");
    assert!(row.error.as_deref().unwrap().contains("unknown job type"));
}

#[tokio::test]
async fn test_notification_and_summary_handlers() {
    let db = common::setup_db().await;
    let ws = common::seed_workspace(&db, "acme").await;

    let created = incident::create(&db, &ws.engineer_ctx, sample_incident())
        .await
        .unwrap();

    job::enqueue(
        &db,
        &ws.tenant.id,
        "SEND_NOTIFICATION",
        serde_json::json!({
            "userId": ws.engineer.id,
            "kind": "incident-opened",
            "message": "SEV3 opened",
        }),
    )
    .await
    .unwrap();
    job::enqueue(
        &db,
        &ws.tenant.id,
        "INCIDENT_SUMMARY",
        serde_json::json!({
            "incidentId": created.id,
            "recipientIds": [ws.admin.id],
        }),
    )
    .await
    .unwrap();

    let processed = job::process_batch(&db, 10).await.unwrap();
    assert_eq!(processed, 2);

    let rows = jobs::Entity::find().all(&db).await.unwrap();
    for row in rows {
        assert_eq!(row.status, "COMPLETED", "job {} not completed", row.job_type);
    }
}

#[tokio::test]
async fn test_assignment_and_resolution_enqueue_work() {
    let db = common::setup_db().await;
    let ws = common::seed_workspace(&db, "acme").await;

    let created = incident::create(&db, &ws.engineer_ctx, sample_incident())
        .await
        .unwrap();

    incident::assign(
        &db,
        &ws.engineer_ctx,
        &created.id,
        Some(ws.engineer.id.clone()),
    )
    .await
    .unwrap();

    let notifications = jobs::Entity::find()
        .filter(jobs::Column::JobType.eq("SEND_NOTIFICATION"))
        .all(&db)
        .await
        .unwrap();
    assert_eq!(notifications.len(), 1);
    let payload: serde_json::Value =
        serde_json::from_str(&notifications[0].payload).unwrap();
    assert_eq!(payload["userId"], ws.engineer.id.as_str());

    incident::change_status(
        &db,
        &ws.engineer_ctx,
        &created.id,
        vigil::model::incident::IncidentStatus::Resolved,
        None,
    )
    .await
    .unwrap();

    let summaries = jobs::Entity::find()
        .filter(jobs::Column::JobType.eq("INCIDENT_SUMMARY"))
        .all(&db)
        .await
        .unwrap();
    assert_eq!(summaries.len(), 1);
    let payload: serde_json::Value = serde_json::from_str(&summaries[0].payload).unwrap();
    assert_eq!(payload["incidentId"], created.id.as_str());
    // Creator and assignee are the same engineer here: deduplicated.
    assert_eq!(payload["recipientIds"].as_array().unwrap().len(), 1);

    // The worker drains both.
    let processed = job::process_batch(&db, 10).await.unwrap();
    assert_eq!(processed, 2);
}

#[tokio::test]
async fn test_rejected_upload_leaks_no_job() {
    let db = common::setup_db().await;
    let ws = common::seed_workspace(&db, "acme").await;

    let created = incident::create(&db, &ws.engineer_ctx, sample_incident())
        .await
        .unwrap();

    let err = attachment::create(
        &db,
        &ws.engineer_ctx,
        &created.id,
        attachment::Upload {
            file_name: "payload.exe".to_string(),
            mime_type: "application/x-msdownload".to_string(),
            size_bytes: 1024,
        },
    )
    .await
    .unwrap_err();
    assert!(matches!(
        common::domain_error(&err),
        Some(VigilError::AttachmentRejected(_))
    ));

    let queued = jobs::Entity::find().all(&db).await.unwrap();
    assert!(queued.is_empty());
}

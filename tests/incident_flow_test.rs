//! Incident life cycle: creation, transitions, assignment, timeline,
//! bulk operations and cursor pagination.

mod common;

use std::time::Duration;

use sea_orm::{ColumnTrait, EntityTrait, PaginatorTrait, QueryFilter};

use vigil::entity::{audit_logs, incidents, timeline_events};
use vigil::error::VigilError;
use vigil::model::incident::{CreateIncident, EventType, IncidentFilter, IncidentStatus};
use vigil::service::{audit, incident};

fn checkout_incident() -> CreateIncident {
    CreateIncident {
        title: "Shopping Cart Checkout Failure".to_string(),
        severity: "SEV1".to_string(),
        service: "Payment Gateway".to_string(),
        environment: "PROD".to_string(),
        tags: vec!["checkout".to_string(), "payments".to_string()],
    }
}

async fn timeline_for(
    db: &sea_orm::DatabaseConnection,
    incident_id: &str,
) -> Vec<timeline_events::Model> {
    timeline_events::Entity::find()
        .filter(timeline_events::Column::IncidentId.eq(incident_id))
        .all(db)
        .await
        .unwrap()
}

#[tokio::test]
async fn test_create_writes_incident_event_and_audit_atomically() {
    let db = common::setup_db().await;
    let ws = common::seed_workspace(&db, "acme").await;

    let created = incident::create(&db, &ws.engineer_ctx, checkout_incident())
        .await
        .unwrap();

    assert_eq!(created.status, "OPEN");
    assert_eq!(created.severity, "SEV1");
    assert_eq!(created.tenant_id, ws.tenant.id);
    assert_eq!(created.created_by_id, ws.engineer.id);

    let timeline = timeline_for(&db, &created.id).await;
    assert_eq!(timeline.len(), 1);
    assert_eq!(timeline[0].event_type, "STATUS_CHANGE");
    let data: serde_json::Value =
        serde_json::from_str(timeline[0].data.as_deref().unwrap()).unwrap();
    assert_eq!(data["from"], serde_json::Value::Null);
    assert_eq!(data["to"], "OPEN");

    let audit_rows = audit::count_for_entity(&db, &ws.tenant.id, "incident", &created.id)
        .await
        .unwrap();
    assert_eq!(audit_rows, 1);
}

#[tokio::test]
async fn test_status_change_with_note() {
    let db = common::setup_db().await;
    let ws = common::seed_workspace(&db, "acme").await;

    let created = incident::create(&db, &ws.engineer_ctx, checkout_incident())
        .await
        .unwrap();

    // Ensure updated_at observably advances.
    tokio::time::sleep(Duration::from_millis(5)).await;

    let mitigated = incident::change_status(
        &db,
        &ws.engineer_ctx,
        &created.id,
        IncidentStatus::Mitigated,
        Some("cache flushed".to_string()),
    )
    .await
    .unwrap();

    assert_eq!(mitigated.status, "MITIGATED");
    assert!(mitigated.updated_at > created.updated_at);

    let timeline = timeline_for(&db, &created.id).await;
    assert_eq!(timeline.len(), 3);

    let status_changes: Vec<_> = timeline
        .iter()
        .filter(|e| e.event_type == "STATUS_CHANGE")
        .collect();
    assert_eq!(status_changes.len(), 2);
    let mitigation = status_changes
        .iter()
        .find(|e| {
            let data: serde_json::Value =
                serde_json::from_str(e.data.as_deref().unwrap()).unwrap();
            data["from"] == "OPEN"
        })
        .expect("OPEN -> MITIGATED status event");
    let transition: serde_json::Value =
        serde_json::from_str(mitigation.data.as_deref().unwrap()).unwrap();
    assert_eq!(transition["to"], "MITIGATED");

    let notes: Vec<_> = timeline.iter().filter(|e| e.event_type == "NOTE").collect();
    assert_eq!(notes.len(), 1);
    assert_eq!(notes[0].message.as_deref(), Some("cache flushed"));
    // The note and the status event share the transaction timestamp.
    assert_eq!(notes[0].created_at, mitigation.created_at);

    let audit_rows = audit::count_for_entity(&db, &ws.tenant.id, "incident", &created.id)
        .await
        .unwrap();
    assert_eq!(audit_rows, 2);
}

#[tokio::test]
async fn test_illegal_transition_leaves_no_trace() {
    let db = common::setup_db().await;
    let ws = common::seed_workspace(&db, "acme").await;

    let created = incident::create(&db, &ws.engineer_ctx, checkout_incident())
        .await
        .unwrap();
    incident::change_status(&db, &ws.engineer_ctx, &created.id, IncidentStatus::Resolved, None)
        .await
        .unwrap();

    let events_before = timeline_for(&db, &created.id).await.len();
    let audit_before = audit::count_for_entity(&db, &ws.tenant.id, "incident", &created.id)
        .await
        .unwrap();

    let err = incident::change_status(
        &db,
        &ws.engineer_ctx,
        &created.id,
        IncidentStatus::Open,
        None,
    )
    .await
    .unwrap_err();

    match common::domain_error(&err) {
        Some(VigilError::InvalidTransition { from, to }) => {
            assert_eq!(*from, IncidentStatus::Resolved);
            assert_eq!(*to, IncidentStatus::Open);
            assert!(from.allowed_transitions().is_empty());
        }
        other => panic!("expected InvalidTransition, got {:?}", other),
    }

    let row = incidents::Entity::find_by_id(created.id.clone())
        .one(&db)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(row.status, "RESOLVED");
    assert_eq!(timeline_for(&db, &created.id).await.len(), events_before);
    assert_eq!(
        audit::count_for_entity(&db, &ws.tenant.id, "incident", &created.id)
            .await
            .unwrap(),
        audit_before
    );
}

#[tokio::test]
async fn test_self_transition_rejected() {
    let db = common::setup_db().await;
    let ws = common::seed_workspace(&db, "acme").await;

    let created = incident::create(&db, &ws.engineer_ctx, checkout_incident())
        .await
        .unwrap();

    let err = incident::change_status(&db, &ws.engineer_ctx, &created.id, IncidentStatus::Open, None)
        .await
        .unwrap_err();
    assert!(matches!(
        common::domain_error(&err),
        Some(VigilError::InvalidTransition { .. })
    ));
}

#[tokio::test]
async fn test_viewer_cannot_mutate() {
    let db = common::setup_db().await;
    let ws = common::seed_workspace(&db, "acme").await;

    let err = incident::create(&db, &ws.viewer_ctx, checkout_incident())
        .await
        .unwrap_err();
    assert!(matches!(
        common::domain_error(&err),
        Some(VigilError::AccessDenied(_))
    ));

    // Reads are fine.
    let created = incident::create(&db, &ws.engineer_ctx, checkout_incident())
        .await
        .unwrap();
    let (found, _, _) = incident::get_detail(&db, &ws.viewer_ctx, &created.id)
        .await
        .unwrap();
    assert_eq!(found.id, created.id);
}

#[tokio::test]
async fn test_assignment_requires_membership() {
    let db = common::setup_db().await;
    let ws = common::seed_workspace(&db, "acme").await;
    let outsider = common::seed_user(&db, "outsider@elsewhere.test").await;

    let created = incident::create(&db, &ws.engineer_ctx, checkout_incident())
        .await
        .unwrap();

    let err = incident::assign(&db, &ws.engineer_ctx, &created.id, Some(outsider.id.clone()))
        .await
        .unwrap_err();
    assert!(matches!(
        common::domain_error(&err),
        Some(VigilError::AssigneeNotInTenant)
    ));

    let assigned = incident::assign(
        &db,
        &ws.engineer_ctx,
        &created.id,
        Some(ws.engineer.id.clone()),
    )
    .await
    .unwrap();
    assert_eq!(assigned.assignee_id.as_deref(), Some(ws.engineer.id.as_str()));

    let timeline = timeline_for(&db, &created.id).await;
    assert!(timeline.iter().any(|e| e.event_type == "ACTION"));
}

#[tokio::test]
async fn test_append_event_rejects_status_change_type() {
    let db = common::setup_db().await;
    let ws = common::seed_workspace(&db, "acme").await;

    let created = incident::create(&db, &ws.engineer_ctx, checkout_incident())
        .await
        .unwrap();

    let err = incident::append_event(
        &db,
        &ws.engineer_ctx,
        &created.id,
        EventType::StatusChange,
        "sneaky".to_string(),
    )
    .await
    .unwrap_err();
    assert!(matches!(
        common::domain_error(&err),
        Some(VigilError::Validation(_))
    ));

    let err = incident::append_event(
        &db,
        &ws.engineer_ctx,
        &created.id,
        EventType::Note,
        "  ".to_string(),
    )
    .await
    .unwrap_err();
    assert!(matches!(
        common::domain_error(&err),
        Some(VigilError::Validation(_))
    ));

    let note = incident::append_event(
        &db,
        &ws.engineer_ctx,
        &created.id,
        EventType::Note,
        "mitigation in progress".to_string(),
    )
    .await
    .unwrap();
    assert_eq!(note.event_type, "NOTE");
}

#[tokio::test]
async fn test_title_and_service_validation() {
    let db = common::setup_db().await;
    let ws = common::seed_workspace(&db, "acme").await;

    let mut req = checkout_incident();
    req.title = "Oops".to_string();
    let err = incident::create(&db, &ws.engineer_ctx, req).await.unwrap_err();
    assert!(matches!(
        common::domain_error(&err),
        Some(VigilError::Validation(_))
    ));

    let mut req = checkout_incident();
    req.service = "  ".to_string();
    let err = incident::create(&db, &ws.engineer_ctx, req).await.unwrap_err();
    assert!(matches!(
        common::domain_error(&err),
        Some(VigilError::Validation(_))
    ));
}

#[tokio::test]
async fn test_bulk_status_change_is_atomic() {
    let db = common::setup_db().await;
    let ws = common::seed_workspace(&db, "acme").await;

    let open = incident::create(&db, &ws.engineer_ctx, checkout_incident())
        .await
        .unwrap();
    let mitigated = incident::create(&db, &ws.engineer_ctx, checkout_incident())
        .await
        .unwrap();
    incident::change_status(
        &db,
        &ws.engineer_ctx,
        &mitigated.id,
        IncidentStatus::Mitigated,
        None,
    )
    .await
    .unwrap();
    let resolved = incident::create(&db, &ws.engineer_ctx, checkout_incident())
        .await
        .unwrap();
    incident::change_status(
        &db,
        &ws.engineer_ctx,
        &resolved.id,
        IncidentStatus::Resolved,
        None,
    )
    .await
    .unwrap();

    let ids = vec![open.id.clone(), mitigated.id.clone(), resolved.id.clone()];

    // MITIGATED and RESOLVED have no path back to OPEN: nothing moves.
    let err = incident::bulk_change_status(&db, &ws.engineer_ctx, &ids, IncidentStatus::Open)
        .await
        .unwrap_err();
    assert!(matches!(
        common::domain_error(&err),
        Some(VigilError::InvalidTransition { .. })
    ));

    let statuses: Vec<String> = incidents::Entity::find()
        .filter(incidents::Column::Id.is_in(ids.clone()))
        .all(&db)
        .await
        .unwrap()
        .into_iter()
        .map(|i| i.status)
        .collect();
    assert_eq!(statuses.iter().filter(|s| *s == "OPEN").count(), 1);
    assert_eq!(statuses.iter().filter(|s| *s == "MITIGATED").count(), 1);
    assert_eq!(statuses.iter().filter(|s| *s == "RESOLVED").count(), 1);

    let audit_before = audit_logs::Entity::find()
        .filter(audit_logs::Column::Action.eq("BULK_STATUS"))
        .count(&db)
        .await
        .unwrap();
    assert_eq!(audit_before, 0);

    let events_before = timeline_events::Entity::find().count(&db).await.unwrap();

    // Every selected incident has a path to RESOLVED (identity included).
    let updated = incident::bulk_change_status(&db, &ws.engineer_ctx, &ids, IncidentStatus::Resolved)
        .await
        .unwrap();
    assert_eq!(updated, 3);

    for id in &ids {
        let row = incidents::Entity::find_by_id(id.clone())
            .one(&db)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(row.status, "RESOLVED");
    }

    let events_after = timeline_events::Entity::find().count(&db).await.unwrap();
    assert_eq!(events_after, events_before + 3);

    let bulk_audit = audit_logs::Entity::find()
        .filter(audit_logs::Column::Action.eq("BULK_STATUS"))
        .count(&db)
        .await
        .unwrap();
    assert_eq!(bulk_audit, 3);
}

#[tokio::test]
async fn test_bulk_assign() {
    let db = common::setup_db().await;
    let ws = common::seed_workspace(&db, "acme").await;

    let a = incident::create(&db, &ws.engineer_ctx, checkout_incident())
        .await
        .unwrap();
    let b = incident::create(&db, &ws.engineer_ctx, checkout_incident())
        .await
        .unwrap();
    let ids = vec![a.id.clone(), b.id.clone()];

    let updated = incident::bulk_assign(&db, &ws.engineer_ctx, &ids, &ws.engineer.id)
        .await
        .unwrap();
    assert_eq!(updated, 2);

    for id in &ids {
        let row = incidents::Entity::find_by_id(id.clone())
            .one(&db)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(row.assignee_id.as_deref(), Some(ws.engineer.id.as_str()));
    }

    let err = incident::bulk_assign(&db, &ws.engineer_ctx, &ids, "nobody")
        .await
        .unwrap_err();
    assert!(matches!(
        common::domain_error(&err),
        Some(VigilError::AssigneeNotInTenant)
    ));
}

#[tokio::test]
async fn test_cursor_pagination_is_stable() {
    let db = common::setup_db().await;
    let ws = common::seed_workspace(&db, "acme").await;

    for i in 0..5 {
        let mut req = checkout_incident();
        req.title = format!("Checkout failure wave {}", i);
        incident::create(&db, &ws.engineer_ctx, req).await.unwrap();
        tokio::time::sleep(Duration::from_millis(2)).await;
    }

    let mut seen = Vec::new();
    let mut cursor: Option<String> = None;

    loop {
        let filter = IncidentFilter {
            cursor: cursor.clone(),
            limit: Some(2),
            ..Default::default()
        };
        let page = incident::list(&db, &ws.engineer_ctx, &filter).await.unwrap();
        assert!(page.items.len() <= 2);
        for item in &page.items {
            seen.push(item.id.clone());
        }
        if !page.has_more {
            assert!(page.next_cursor.is_none());
            break;
        }
        cursor = page.next_cursor.clone();
        assert!(cursor.is_some());
    }

    // All five, no duplicates, newest first.
    assert_eq!(seen.len(), 5);
    let unique: std::collections::HashSet<_> = seen.iter().collect();
    assert_eq!(unique.len(), 5);

    let newest_first = incident::list(&db, &ws.engineer_ctx, &IncidentFilter::default())
        .await
        .unwrap();
    let titles: Vec<_> = newest_first
        .items
        .iter()
        .map(|i| i.title.clone())
        .collect();
    assert_eq!(titles[0], "Checkout failure wave 4");
    assert_eq!(titles[4], "Checkout failure wave 0");
}

#[tokio::test]
async fn test_list_filters() {
    let db = common::setup_db().await;
    let ws = common::seed_workspace(&db, "acme").await;

    let payment = incident::create(&db, &ws.engineer_ctx, checkout_incident())
        .await
        .unwrap();

    let mut req = checkout_incident();
    req.title = "Search latency regression".to_string();
    req.service = "Search API".to_string();
    req.severity = "SEV3".to_string();
    req.tags = vec!["latency".to_string()];
    let search = incident::create(&db, &ws.engineer_ctx, req).await.unwrap();
    incident::change_status(&db, &ws.engineer_ctx, &search.id, IncidentStatus::Mitigated, None)
        .await
        .unwrap();

    let filter = IncidentFilter {
        status: Some("MITIGATED".to_string()),
        ..Default::default()
    };
    let page = incident::list(&db, &ws.engineer_ctx, &filter).await.unwrap();
    assert_eq!(page.items.len(), 1);
    assert_eq!(page.items[0].id, search.id);

    // Case-insensitive substring over title OR service.
    let filter = IncidentFilter {
        search: Some("PAYMENT".to_string()),
        ..Default::default()
    };
    let page = incident::list(&db, &ws.engineer_ctx, &filter).await.unwrap();
    assert_eq!(page.items.len(), 1);
    assert_eq!(page.items[0].id, payment.id);

    let filter = IncidentFilter {
        tag: Some("latency".to_string()),
        ..Default::default()
    };
    let page = incident::list(&db, &ws.engineer_ctx, &filter).await.unwrap();
    assert_eq!(page.items.len(), 1);
    assert_eq!(page.items[0].id, search.id);

    let filter = IncidentFilter {
        severity: Some("SEV2".to_string()),
        ..Default::default()
    };
    let page = incident::list(&db, &ws.engineer_ctx, &filter).await.unwrap();
    assert!(page.items.is_empty());
}

use std::str::FromStr;

use chrono::{DateTime, Utc};
use sea_orm::sea_query::{Expr, ExprTrait, Func};
use sea_orm::*;

use crate::entity::{attachments, incidents, timeline_events};
use crate::error::VigilError;
use crate::model::auth::TenantContext;
use crate::model::common::{CursorPage, clamp_limit};
use crate::model::incident::{
    CreateIncident, Environment, EventType, IncidentFilter, IncidentStatus, Severity,
    UpdateIncident,
};
use crate::model::job::{JOB_INCIDENT_SUMMARY, JOB_SEND_NOTIFICATION};
use crate::service::audit;
use crate::service::job;
use crate::service::membership;

fn require_writer(ctx: &TenantContext) -> Result<(), VigilError> {
    if ctx.role.can_write() {
        Ok(())
    } else {
        Err(VigilError::AccessDenied(
            "write access requires the ENGINEER or ADMIN role".to_string(),
        ))
    }
}

fn tags_json(tags: &[String]) -> String {
    serde_json::to_string(tags).unwrap_or_else(|_| "[]".to_string())
}

/// Fetch an incident within the caller's tenant. A row in another tenant is
/// indistinguishable from an absent one.
pub async fn find_scoped<C: ConnectionTrait>(
    conn: &C,
    ctx: &TenantContext,
    id: &str,
) -> anyhow::Result<incidents::Model> {
    incidents::Entity::find()
        .filter(incidents::Column::TenantId.eq(ctx.tenant_id.as_str()))
        .filter(incidents::Column::Id.eq(id))
        .one(conn)
        .await?
        .ok_or_else(|| VigilError::NotFound("incident".to_string()).into())
}

pub(crate) async fn insert_event<C: ConnectionTrait>(
    conn: &C,
    ctx: &TenantContext,
    incident_id: &str,
    event_type: EventType,
    message: Option<String>,
    data: Option<serde_json::Value>,
    at: DateTime<Utc>,
) -> anyhow::Result<timeline_events::Model> {
    let event = timeline_events::ActiveModel {
        id: Set(uuid::Uuid::new_v4().to_string()),
        incident_id: Set(incident_id.to_string()),
        tenant_id: Set(ctx.tenant_id.clone()),
        event_type: Set(event_type.as_str().to_string()),
        message: Set(message),
        data: Set(data.map(|v| v.to_string())),
        created_by_id: Set(ctx.user_id.clone()),
        created_at: Set(at),
    };

    Ok(event.insert(conn).await?)
}

fn validate_create(req: &CreateIncident) -> Result<(Severity, Environment), VigilError> {
    if req.title.trim().len() < 5 {
        return Err(VigilError::Validation(
            "title must be at least 5 characters".to_string(),
        ));
    }
    if req.service.trim().is_empty() {
        return Err(VigilError::Validation("service must not be empty".to_string()));
    }
    let severity = Severity::from_str(&req.severity).map_err(VigilError::Validation)?;
    let environment = Environment::from_str(&req.environment).map_err(VigilError::Validation)?;
    Ok((severity, environment))
}

/// Create an incident. The row, its opening STATUS_CHANGE timeline event and
/// the CREATE audit entry commit in one transaction.
pub async fn create(
    db: &DatabaseConnection,
    ctx: &TenantContext,
    req: CreateIncident,
) -> anyhow::Result<incidents::Model> {
    require_writer(ctx)?;
    let (severity, environment) = validate_create(&req)?;

    let now = Utc::now();
    let txn = db.begin().await?;

    let incident = incidents::ActiveModel {
        id: Set(uuid::Uuid::new_v4().to_string()),
        tenant_id: Set(ctx.tenant_id.clone()),
        title: Set(req.title.trim().to_string()),
        severity: Set(severity.as_str().to_string()),
        status: Set(IncidentStatus::Open.as_str().to_string()),
        service: Set(req.service.trim().to_string()),
        environment: Set(environment.as_str().to_string()),
        tags: Set(tags_json(&req.tags)),
        created_by_id: Set(ctx.user_id.clone()),
        assignee_id: Set(None),
        created_at: Set(now),
        updated_at: Set(now),
    };
    let incident = incident.insert(&txn).await?;

    insert_event(
        &txn,
        ctx,
        &incident.id,
        EventType::StatusChange,
        None,
        Some(serde_json::json!({ "from": null, "to": IncidentStatus::Open })),
        now,
    )
    .await?;

    audit::record(
        &txn,
        ctx,
        audit::ACTION_CREATE,
        "incident",
        &incident.id,
        None,
        Some(serde_json::to_value(&incident)?),
        None,
    )
    .await?;

    txn.commit().await?;
    Ok(incident)
}

/// Transition an incident. The status read and write share one transaction;
/// the STATUS_CHANGE event, optional NOTE and audit row carry the same
/// timestamp and commit atomically.
pub async fn change_status(
    db: &DatabaseConnection,
    ctx: &TenantContext,
    id: &str,
    new_status: IncidentStatus,
    message: Option<String>,
) -> anyhow::Result<incidents::Model> {
    require_writer(ctx)?;

    let txn = db.begin().await?;
    let incident = find_scoped(&txn, ctx, id).await?;
    let current = IncidentStatus::from_str(&incident.status).map_err(VigilError::Validation)?;

    if !current.can_transition_to(new_status) {
        return Err(VigilError::InvalidTransition {
            from: current,
            to: new_status,
        }
        .into());
    }

    let before = serde_json::to_value(&incident)?;
    let now = Utc::now();

    let mut update: incidents::ActiveModel = incident.into();
    update.status = Set(new_status.as_str().to_string());
    update.updated_at = Set(now);
    let incident = update.update(&txn).await?;

    insert_event(
        &txn,
        ctx,
        &incident.id,
        EventType::StatusChange,
        None,
        Some(serde_json::json!({ "from": current, "to": new_status })),
        now,
    )
    .await?;

    let message = message.filter(|m| !m.trim().is_empty());
    if let Some(note) = message {
        insert_event(
            &txn,
            ctx,
            &incident.id,
            EventType::Note,
            Some(note),
            None,
            now,
        )
        .await?;
    }

    if new_status == IncidentStatus::Resolved {
        let mut recipients = vec![incident.created_by_id.clone()];
        if let Some(assignee) = &incident.assignee_id {
            if !recipients.contains(assignee) {
                recipients.push(assignee.clone());
            }
        }
        job::enqueue(
            &txn,
            &ctx.tenant_id,
            JOB_INCIDENT_SUMMARY,
            serde_json::json!({
                "incidentId": incident.id,
                "recipientIds": recipients,
            }),
        )
        .await?;
    }

    audit::record(
        &txn,
        ctx,
        audit::ACTION_STATUS_CHANGE,
        "incident",
        &incident.id,
        Some(before),
        Some(serde_json::to_value(&incident)?),
        None,
    )
    .await?;

    txn.commit().await?;
    Ok(incident)
}

/// Assign or unassign. The assignee must hold a membership in the same
/// tenant.
pub async fn assign(
    db: &DatabaseConnection,
    ctx: &TenantContext,
    id: &str,
    assignee_id: Option<String>,
) -> anyhow::Result<incidents::Model> {
    require_writer(ctx)?;

    if let Some(assignee) = &assignee_id {
        if !membership::is_member(db, &ctx.tenant_id, assignee).await? {
            return Err(VigilError::AssigneeNotInTenant.into());
        }
    }

    let txn = db.begin().await?;
    let incident = find_scoped(&txn, ctx, id).await?;
    let before = serde_json::to_value(&incident)?;
    let now = Utc::now();

    let note = match &assignee_id {
        Some(assignee) => format!("assigned to {}", assignee),
        None => "unassigned".to_string(),
    };

    let mut update: incidents::ActiveModel = incident.into();
    update.assignee_id = Set(assignee_id);
    update.updated_at = Set(now);
    let incident = update.update(&txn).await?;

    insert_event(
        &txn,
        ctx,
        &incident.id,
        EventType::Action,
        Some(note),
        None,
        now,
    )
    .await?;

    if let Some(assignee) = &incident.assignee_id {
        job::enqueue(
            &txn,
            &ctx.tenant_id,
            JOB_SEND_NOTIFICATION,
            serde_json::json!({
                "userId": assignee,
                "kind": "incident-assigned",
                "message": format!("you were assigned to '{}'", incident.title),
            }),
        )
        .await?;
    }

    audit::record(
        &txn,
        ctx,
        audit::ACTION_ASSIGN,
        "incident",
        &incident.id,
        Some(before),
        Some(serde_json::to_value(&incident)?),
        None,
    )
    .await?;

    txn.commit().await?;
    Ok(incident)
}

/// Update descriptive fields. Does not touch status or assignee.
pub async fn update_fields(
    db: &DatabaseConnection,
    ctx: &TenantContext,
    id: &str,
    req: UpdateIncident,
) -> anyhow::Result<incidents::Model> {
    require_writer(ctx)?;
    if req.is_empty() {
        return Err(VigilError::Validation("no fields to update".to_string()).into());
    }

    if let Some(title) = &req.title {
        if title.trim().len() < 5 {
            return Err(
                VigilError::Validation("title must be at least 5 characters".to_string()).into(),
            );
        }
    }
    if let Some(service) = &req.service {
        if service.trim().is_empty() {
            return Err(VigilError::Validation("service must not be empty".to_string()).into());
        }
    }
    let severity = match &req.severity {
        Some(s) => Some(Severity::from_str(s).map_err(VigilError::Validation)?),
        None => None,
    };
    let environment = match &req.environment {
        Some(e) => Some(Environment::from_str(e).map_err(VigilError::Validation)?),
        None => None,
    };

    let txn = db.begin().await?;
    let incident = find_scoped(&txn, ctx, id).await?;
    let before = serde_json::to_value(&incident)?;

    let mut update: incidents::ActiveModel = incident.into();
    if let Some(title) = req.title {
        update.title = Set(title.trim().to_string());
    }
    if let Some(severity) = severity {
        update.severity = Set(severity.as_str().to_string());
    }
    if let Some(service) = req.service {
        update.service = Set(service.trim().to_string());
    }
    if let Some(environment) = environment {
        update.environment = Set(environment.as_str().to_string());
    }
    if let Some(tags) = req.tags {
        update.tags = Set(tags_json(&tags));
    }
    update.updated_at = Set(Utc::now());
    let incident = update.update(&txn).await?;

    audit::record(
        &txn,
        ctx,
        audit::ACTION_UPDATE,
        "incident",
        &incident.id,
        Some(before),
        Some(serde_json::to_value(&incident)?),
        None,
    )
    .await?;

    txn.commit().await?;
    Ok(incident)
}

/// Append a NOTE or ACTION. STATUS_CHANGE events are produced only by the
/// transition path and are rejected here.
pub async fn append_event(
    db: &DatabaseConnection,
    ctx: &TenantContext,
    incident_id: &str,
    event_type: EventType,
    message: String,
) -> anyhow::Result<timeline_events::Model> {
    require_writer(ctx)?;

    if event_type == EventType::StatusChange {
        return Err(VigilError::Validation(
            "STATUS_CHANGE events are produced by status transitions".to_string(),
        )
        .into());
    }
    if message.trim().is_empty() {
        return Err(VigilError::Validation("message must not be empty".to_string()).into());
    }

    let txn = db.begin().await?;
    let incident = find_scoped(&txn, ctx, incident_id).await?;

    let event = insert_event(
        &txn,
        ctx,
        &incident.id,
        event_type,
        Some(message),
        None,
        Utc::now(),
    )
    .await?;

    audit::record(
        &txn,
        ctx,
        audit::ACTION_CREATE,
        "timeline_event",
        &event.id,
        None,
        Some(serde_json::to_value(&event)?),
        None,
    )
    .await?;

    txn.commit().await?;
    Ok(event)
}

/// Incident with its full timeline (oldest first) and attachments.
pub async fn get_detail(
    db: &DatabaseConnection,
    ctx: &TenantContext,
    id: &str,
) -> anyhow::Result<(
    incidents::Model,
    Vec<timeline_events::Model>,
    Vec<attachments::Model>,
)> {
    let incident = find_scoped(db, ctx, id).await?;

    let timeline = timeline_events::Entity::find()
        .filter(timeline_events::Column::TenantId.eq(ctx.tenant_id.as_str()))
        .filter(timeline_events::Column::IncidentId.eq(incident.id.as_str()))
        .order_by_asc(timeline_events::Column::CreatedAt)
        .order_by_asc(timeline_events::Column::Id)
        .all(db)
        .await?;

    let attachments = attachments::Entity::find()
        .filter(attachments::Column::TenantId.eq(ctx.tenant_id.as_str()))
        .filter(attachments::Column::IncidentId.eq(incident.id.as_str()))
        .order_by_asc(attachments::Column::CreatedAt)
        .all(db)
        .await?;

    Ok((incident, timeline, attachments))
}

/// Filtered listing, `created_at DESC, id DESC`, cursor-paginated by the id
/// of the last returned row.
pub async fn list(
    db: &DatabaseConnection,
    ctx: &TenantContext,
    filter: &IncidentFilter,
) -> anyhow::Result<CursorPage<incidents::Model>> {
    let mut select =
        incidents::Entity::find().filter(incidents::Column::TenantId.eq(ctx.tenant_id.as_str()));

    if let Some(status) = &filter.status {
        let status = IncidentStatus::from_str(status).map_err(VigilError::Validation)?;
        select = select.filter(incidents::Column::Status.eq(status.as_str()));
    }
    if let Some(severity) = &filter.severity {
        let severity = Severity::from_str(severity).map_err(VigilError::Validation)?;
        select = select.filter(incidents::Column::Severity.eq(severity.as_str()));
    }
    if let Some(environment) = &filter.environment {
        let environment = Environment::from_str(environment).map_err(VigilError::Validation)?;
        select = select.filter(incidents::Column::Environment.eq(environment.as_str()));
    }
    if let Some(service) = &filter.service {
        let pattern = format!("%{}%", service.to_lowercase());
        select = select.filter(
            Expr::expr(Func::lower(Expr::col(incidents::Column::Service))).like(pattern),
        );
    }
    if let Some(tag) = &filter.tag {
        // Tags are a JSON array of strings; membership is a quoted substring
        // match on the serialized form.
        select = select.filter(incidents::Column::Tags.contains(format!("\"{}\"", tag)));
    }
    if let Some(assignee) = &filter.assignee {
        select = select.filter(incidents::Column::AssigneeId.eq(assignee));
    }
    if let Some(search) = &filter.search {
        let pattern = format!("%{}%", search.to_lowercase());
        select = select.filter(
            Condition::any()
                .add(
                    Expr::expr(Func::lower(Expr::col(incidents::Column::Title)))
                        .like(pattern.clone()),
                )
                .add(Expr::expr(Func::lower(Expr::col(incidents::Column::Service))).like(pattern)),
        );
    }

    if let Some(cursor) = &filter.cursor {
        let anchor = incidents::Entity::find()
            .filter(incidents::Column::TenantId.eq(ctx.tenant_id.as_str()))
            .filter(incidents::Column::Id.eq(cursor))
            .one(db)
            .await?
            .ok_or_else(|| VigilError::Validation("invalid cursor".to_string()))?;
        select = select.filter(
            Condition::any()
                .add(incidents::Column::CreatedAt.lt(anchor.created_at))
                .add(
                    Condition::all()
                        .add(incidents::Column::CreatedAt.eq(anchor.created_at))
                        .add(incidents::Column::Id.lt(anchor.id)),
                ),
        );
    }

    let limit = clamp_limit(filter.limit);
    let rows = select
        .order_by_desc(incidents::Column::CreatedAt)
        .order_by_desc(incidents::Column::Id)
        .limit(limit + 1)
        .all(db)
        .await?;

    Ok(CursorPage::from_probe(rows, limit, |row| row.id.clone()))
}

/// Bulk status change. Every incident is validated against the transition
/// table before any row is touched; one illegal pair fails the whole batch.
pub async fn bulk_change_status(
    db: &DatabaseConnection,
    ctx: &TenantContext,
    ids: &[String],
    target: IncidentStatus,
) -> anyhow::Result<u64> {
    require_writer(ctx)?;
    if ids.is_empty() {
        return Err(VigilError::Validation("no incidents selected".to_string()).into());
    }

    let txn = db.begin().await?;

    let selected = incidents::Entity::find()
        .filter(incidents::Column::TenantId.eq(ctx.tenant_id.as_str()))
        .filter(incidents::Column::Id.is_in(ids.iter().map(String::as_str)))
        .all(&txn)
        .await?;

    if selected.len() != ids.len() {
        return Err(VigilError::NotFound("incident".to_string()).into());
    }

    for incident in &selected {
        let current = IncidentStatus::from_str(&incident.status).map_err(VigilError::Validation)?;
        if !current.has_path_to(target) {
            return Err(VigilError::InvalidTransition {
                from: current,
                to: target,
            }
            .into());
        }
    }

    let now = Utc::now();
    let mut updated = 0;
    for incident in selected {
        let current = IncidentStatus::from_str(&incident.status).map_err(VigilError::Validation)?;
        let before = serde_json::to_value(&incident)?;

        let mut update: incidents::ActiveModel = incident.into();
        update.status = Set(target.as_str().to_string());
        update.updated_at = Set(now);
        let incident = update.update(&txn).await?;

        insert_event(
            &txn,
            ctx,
            &incident.id,
            EventType::StatusChange,
            None,
            Some(serde_json::json!({ "from": current, "to": target })),
            now,
        )
        .await?;

        audit::record(
            &txn,
            ctx,
            audit::ACTION_BULK_STATUS,
            "incident",
            &incident.id,
            Some(before),
            Some(serde_json::to_value(&incident)?),
            None,
        )
        .await?;

        updated += 1;
    }

    txn.commit().await?;
    Ok(updated)
}

/// Bulk assignment of a single engineer across the selection.
pub async fn bulk_assign(
    db: &DatabaseConnection,
    ctx: &TenantContext,
    ids: &[String],
    assignee_id: &str,
) -> anyhow::Result<u64> {
    require_writer(ctx)?;
    if ids.is_empty() {
        return Err(VigilError::Validation("no incidents selected".to_string()).into());
    }
    if !membership::is_member(db, &ctx.tenant_id, assignee_id).await? {
        return Err(VigilError::AssigneeNotInTenant.into());
    }

    let txn = db.begin().await?;

    let selected = incidents::Entity::find()
        .filter(incidents::Column::TenantId.eq(ctx.tenant_id.as_str()))
        .filter(incidents::Column::Id.is_in(ids.iter().map(String::as_str)))
        .all(&txn)
        .await?;

    if selected.len() != ids.len() {
        return Err(VigilError::NotFound("incident".to_string()).into());
    }

    let now = Utc::now();
    let mut updated = 0;
    for incident in selected {
        let before = serde_json::to_value(&incident)?;

        let mut update: incidents::ActiveModel = incident.into();
        update.assignee_id = Set(Some(assignee_id.to_string()));
        update.updated_at = Set(now);
        let incident = update.update(&txn).await?;

        insert_event(
            &txn,
            ctx,
            &incident.id,
            EventType::Action,
            Some(format!("assigned to {}", assignee_id)),
            None,
            now,
        )
        .await?;

        audit::record(
            &txn,
            ctx,
            audit::ACTION_BULK_ASSIGN,
            "incident",
            &incident.id,
            Some(before),
            Some(serde_json::to_value(&incident)?),
            None,
        )
        .await?;

        updated += 1;
    }

    txn.commit().await?;
    Ok(updated)
}

use chrono::{DateTime, Utc};
use sea_orm::*;
use serde::Deserialize;

use crate::entity::audit_logs;
use crate::error::VigilError;
use crate::model::auth::TenantContext;
use crate::model::common::{CursorPage, clamp_limit};

pub const ACTION_CREATE: &str = "CREATE";
pub const ACTION_UPDATE: &str = "UPDATE";
pub const ACTION_DELETE: &str = "DELETE";
pub const ACTION_STATUS_CHANGE: &str = "STATUS_CHANGE";
pub const ACTION_ASSIGN: &str = "ASSIGN";
pub const ACTION_BULK_ASSIGN: &str = "BULK_ASSIGN";
pub const ACTION_BULK_STATUS: &str = "BULK_STATUS";

/// Append one audit row. Callers pass the transaction of the mutation being
/// recorded so the row commits or rolls back with it.
#[allow(clippy::too_many_arguments)]
pub async fn record<C: ConnectionTrait>(
    conn: &C,
    ctx: &TenantContext,
    action: &str,
    entity_type: &str,
    entity_id: &str,
    before_data: Option<serde_json::Value>,
    after_data: Option<serde_json::Value>,
    metadata: Option<serde_json::Value>,
) -> anyhow::Result<audit_logs::Model> {
    let entry = audit_logs::ActiveModel {
        id: Set(uuid::Uuid::new_v4().to_string()),
        tenant_id: Set(ctx.tenant_id.clone()),
        actor_id: Set(ctx.user_id.clone()),
        action: Set(action.to_string()),
        entity_type: Set(entity_type.to_string()),
        entity_id: Set(entity_id.to_string()),
        before_data: Set(before_data.map(|v| v.to_string())),
        after_data: Set(after_data.map(|v| v.to_string())),
        metadata: Set(metadata.map(|v| v.to_string())),
        created_at: Set(Utc::now()),
    };

    Ok(entry.insert(conn).await?)
}

#[derive(Clone, Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuditFilter {
    pub entity_type: Option<String>,
    pub entity_id: Option<String>,
    pub actor_id: Option<String>,
    pub action: Option<String>,
    pub start_date: Option<DateTime<Utc>>,
    pub end_date: Option<DateTime<Utc>>,
    pub cursor: Option<String>,
    pub limit: Option<u64>,
}

/// Admin-only listing, newest first, cursor-paginated.
pub async fn list(
    db: &DatabaseConnection,
    ctx: &TenantContext,
    filter: &AuditFilter,
) -> anyhow::Result<CursorPage<audit_logs::Model>> {
    if !ctx.role.is_admin() {
        return Err(VigilError::AccessDenied("audit logs are admin-only".to_string()).into());
    }

    let mut select =
        audit_logs::Entity::find().filter(audit_logs::Column::TenantId.eq(ctx.tenant_id.as_str()));

    if let Some(entity_type) = &filter.entity_type {
        select = select.filter(audit_logs::Column::EntityType.eq(entity_type));
    }
    if let Some(entity_id) = &filter.entity_id {
        select = select.filter(audit_logs::Column::EntityId.eq(entity_id));
    }
    if let Some(actor_id) = &filter.actor_id {
        select = select.filter(audit_logs::Column::ActorId.eq(actor_id));
    }
    if let Some(action) = &filter.action {
        select = select.filter(audit_logs::Column::Action.eq(action));
    }
    if let Some(start) = filter.start_date {
        select = select.filter(audit_logs::Column::CreatedAt.gte(start));
    }
    if let Some(end) = filter.end_date {
        select = select.filter(audit_logs::Column::CreatedAt.lte(end));
    }

    if let Some(cursor) = &filter.cursor {
        let anchor = audit_logs::Entity::find()
            .filter(audit_logs::Column::TenantId.eq(ctx.tenant_id.as_str()))
            .filter(audit_logs::Column::Id.eq(cursor))
            .one(db)
            .await?
            .ok_or_else(|| VigilError::Validation("invalid cursor".to_string()))?;
        select = select.filter(
            Condition::any()
                .add(audit_logs::Column::CreatedAt.lt(anchor.created_at))
                .add(
                    Condition::all()
                        .add(audit_logs::Column::CreatedAt.eq(anchor.created_at))
                        .add(audit_logs::Column::Id.lt(anchor.id)),
                ),
        );
    }

    let limit = clamp_limit(filter.limit);
    let rows = select
        .order_by_desc(audit_logs::Column::CreatedAt)
        .order_by_desc(audit_logs::Column::Id)
        .limit(limit + 1)
        .all(db)
        .await?;

    Ok(CursorPage::from_probe(rows, limit, |row| row.id.clone()))
}

/// Audit rows for one tenant and entity, used by mutation tests and the
/// worker's idempotence accounting.
pub async fn count_for_entity(
    db: &DatabaseConnection,
    tenant_id: &str,
    entity_type: &str,
    entity_id: &str,
) -> anyhow::Result<u64> {
    Ok(audit_logs::Entity::find()
        .filter(audit_logs::Column::TenantId.eq(tenant_id))
        .filter(audit_logs::Column::EntityType.eq(entity_type))
        .filter(audit_logs::Column::EntityId.eq(entity_id))
        .count(db)
        .await?)
}

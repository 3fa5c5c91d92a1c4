use chrono::Utc;
use sea_orm::*;

use crate::entity::saved_views;
use crate::error::VigilError;
use crate::model::auth::TenantContext;
use crate::service::audit;

const ALLOWED_FILTER_KEYS: [&str; 4] = ["status", "severity", "environment", "search"];

#[derive(Clone, Debug, serde::Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateSavedView {
    pub name: String,
    pub filters: serde_json::Map<String, serde_json::Value>,
}

/// Views belonging to the calling user, newest first.
pub async fn list(
    db: &DatabaseConnection,
    ctx: &TenantContext,
) -> anyhow::Result<Vec<saved_views::Model>> {
    Ok(saved_views::Entity::find()
        .filter(saved_views::Column::TenantId.eq(ctx.tenant_id.as_str()))
        .filter(saved_views::Column::UserId.eq(ctx.user_id.as_str()))
        .order_by_desc(saved_views::Column::CreatedAt)
        .order_by_desc(saved_views::Column::Id)
        .all(db)
        .await?)
}

fn validate_filters(filters: &serde_json::Map<String, serde_json::Value>) -> Result<(), VigilError> {
    for key in filters.keys() {
        if !ALLOWED_FILTER_KEYS.contains(&key.as_str()) {
            return Err(VigilError::Validation(format!("unknown filter key: {}", key)));
        }
    }
    Ok(())
}

pub async fn create(
    db: &DatabaseConnection,
    ctx: &TenantContext,
    req: CreateSavedView,
) -> anyhow::Result<saved_views::Model> {
    if req.name.trim().is_empty() {
        return Err(VigilError::Validation("name must not be empty".to_string()).into());
    }
    validate_filters(&req.filters)?;

    let txn = db.begin().await?;

    let view = saved_views::ActiveModel {
        id: Set(uuid::Uuid::new_v4().to_string()),
        tenant_id: Set(ctx.tenant_id.clone()),
        user_id: Set(ctx.user_id.clone()),
        name: Set(req.name.trim().to_string()),
        filters: Set(serde_json::Value::Object(req.filters).to_string()),
        created_at: Set(Utc::now()),
    };
    let view = view.insert(&txn).await?;

    audit::record(
        &txn,
        ctx,
        audit::ACTION_CREATE,
        "saved_view",
        &view.id,
        None,
        Some(serde_json::to_value(&view)?),
        None,
    )
    .await?;

    txn.commit().await?;
    Ok(view)
}

/// Owners delete their own views; admins may delete any view in the tenant.
pub async fn delete(db: &DatabaseConnection, ctx: &TenantContext, id: &str) -> anyhow::Result<()> {
    let txn = db.begin().await?;

    let view = saved_views::Entity::find()
        .filter(saved_views::Column::TenantId.eq(ctx.tenant_id.as_str()))
        .filter(saved_views::Column::Id.eq(id))
        .one(&txn)
        .await?
        .ok_or_else(|| VigilError::NotFound("saved view".to_string()))?;

    if view.user_id != ctx.user_id && !ctx.role.is_admin() {
        return Err(VigilError::AccessDenied(
            "only the owner or an admin may delete a saved view".to_string(),
        )
        .into());
    }

    let before = serde_json::to_value(&view)?;
    view.delete(&txn).await?;

    audit::record(
        &txn,
        ctx,
        audit::ACTION_DELETE,
        "saved_view",
        id,
        Some(before),
        None,
        None,
    )
    .await?;

    txn.commit().await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_filter_key_validation() {
        let mut filters = serde_json::Map::new();
        filters.insert("status".to_string(), serde_json::json!("OPEN"));
        filters.insert("search".to_string(), serde_json::json!("checkout"));
        assert!(validate_filters(&filters).is_ok());

        filters.insert("sortBy".to_string(), serde_json::json!("title"));
        assert!(validate_filters(&filters).is_err());
    }
}

use std::collections::HashMap;
use std::str::FromStr;

use chrono::Utc;
use sea_orm::*;
use tracing::warn;

use crate::entity::{feature_flags, flag_rules};
use crate::error::VigilError;
use crate::model::auth::TenantContext;
use crate::model::flag::{
    EvalContext, Evaluation, FlagSnapshot, ParsedRule, RuleSpec, evaluate, valid_flag_key,
};
use crate::model::incident::Environment;
use crate::service::audit;

fn require_writer(ctx: &TenantContext) -> Result<(), VigilError> {
    if ctx.role.can_write() {
        Ok(())
    } else {
        Err(VigilError::AccessDenied(
            "write access requires the ENGINEER or ADMIN role".to_string(),
        ))
    }
}

#[derive(Clone, Debug, serde::Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateFlag {
    pub key: String,
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub enabled: bool,
    pub environment: String,
}

#[derive(Clone, Debug, Default, serde::Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateFlag {
    pub name: Option<String>,
    pub description: Option<String>,
    pub enabled: Option<bool>,
}

pub async fn find_scoped<C: ConnectionTrait>(
    conn: &C,
    ctx: &TenantContext,
    id: &str,
) -> anyhow::Result<feature_flags::Model> {
    feature_flags::Entity::find()
        .filter(feature_flags::Column::TenantId.eq(ctx.tenant_id.as_str()))
        .filter(feature_flags::Column::Id.eq(id))
        .one(conn)
        .await?
        .ok_or_else(|| VigilError::NotFound("feature flag".to_string()).into())
}

/// Create a flag; `(tenant, key, environment)` must be unique.
pub async fn create(
    db: &DatabaseConnection,
    ctx: &TenantContext,
    req: CreateFlag,
) -> anyhow::Result<feature_flags::Model> {
    require_writer(ctx)?;

    if !valid_flag_key(&req.key) {
        return Err(VigilError::Validation(
            "key must be lowercase alphanumeric with '-' or '_'".to_string(),
        )
        .into());
    }
    if req.name.trim().is_empty() {
        return Err(VigilError::Validation("name must not be empty".to_string()).into());
    }
    let environment = Environment::from_str(&req.environment).map_err(VigilError::Validation)?;

    let duplicate = feature_flags::Entity::find()
        .filter(feature_flags::Column::TenantId.eq(ctx.tenant_id.as_str()))
        .filter(feature_flags::Column::Key.eq(req.key.as_str()))
        .filter(feature_flags::Column::Environment.eq(environment.as_str()))
        .count(db)
        .await?;
    if duplicate > 0 {
        return Err(VigilError::DuplicateFlagKey(req.key).into());
    }

    let now = Utc::now();
    let txn = db.begin().await?;

    let flag = feature_flags::ActiveModel {
        id: Set(uuid::Uuid::new_v4().to_string()),
        tenant_id: Set(ctx.tenant_id.clone()),
        key: Set(req.key),
        name: Set(req.name.trim().to_string()),
        description: Set(req.description),
        enabled: Set(req.enabled),
        environment: Set(environment.as_str().to_string()),
        created_at: Set(now),
        updated_at: Set(now),
    };
    let flag = flag.insert(&txn).await?;

    audit::record(
        &txn,
        ctx,
        audit::ACTION_CREATE,
        "feature_flag",
        &flag.id,
        None,
        Some(serde_json::to_value(&flag)?),
        None,
    )
    .await?;

    txn.commit().await?;
    Ok(flag)
}

/// All flags in the tenant with their rule counts.
pub async fn list(
    db: &DatabaseConnection,
    ctx: &TenantContext,
) -> anyhow::Result<Vec<(feature_flags::Model, u64)>> {
    let flags = feature_flags::Entity::find()
        .filter(feature_flags::Column::TenantId.eq(ctx.tenant_id.as_str()))
        .order_by_asc(feature_flags::Column::Key)
        .order_by_asc(feature_flags::Column::Environment)
        .all(db)
        .await?;

    let rules = flag_rules::Entity::find()
        .filter(flag_rules::Column::TenantId.eq(ctx.tenant_id.as_str()))
        .all(db)
        .await?;

    let mut counts: HashMap<String, u64> = HashMap::new();
    for rule in rules {
        *counts.entry(rule.flag_id).or_default() += 1;
    }

    Ok(flags
        .into_iter()
        .map(|flag| {
            let count = counts.get(&flag.id).copied().unwrap_or(0);
            (flag, count)
        })
        .collect())
}

pub async fn update(
    db: &DatabaseConnection,
    ctx: &TenantContext,
    id: &str,
    req: UpdateFlag,
) -> anyhow::Result<feature_flags::Model> {
    require_writer(ctx)?;

    if let Some(name) = &req.name {
        if name.trim().is_empty() {
            return Err(VigilError::Validation("name must not be empty".to_string()).into());
        }
    }

    let txn = db.begin().await?;
    let flag = find_scoped(&txn, ctx, id).await?;
    let before = serde_json::to_value(&flag)?;

    let mut update: feature_flags::ActiveModel = flag.into();
    if let Some(name) = req.name {
        update.name = Set(name.trim().to_string());
    }
    if let Some(description) = req.description {
        update.description = Set(description);
    }
    if let Some(enabled) = req.enabled {
        update.enabled = Set(enabled);
    }
    update.updated_at = Set(Utc::now());
    let flag = update.update(&txn).await?;

    audit::record(
        &txn,
        ctx,
        audit::ACTION_UPDATE,
        "feature_flag",
        &flag.id,
        Some(before),
        Some(serde_json::to_value(&flag)?),
        None,
    )
    .await?;

    txn.commit().await?;
    Ok(flag)
}

/// Delete a flag and its rules.
pub async fn delete(db: &DatabaseConnection, ctx: &TenantContext, id: &str) -> anyhow::Result<()> {
    require_writer(ctx)?;

    let txn = db.begin().await?;
    let flag = find_scoped(&txn, ctx, id).await?;
    let before = serde_json::to_value(&flag)?;

    flag_rules::Entity::delete_many()
        .filter(flag_rules::Column::TenantId.eq(ctx.tenant_id.as_str()))
        .filter(flag_rules::Column::FlagId.eq(flag.id.as_str()))
        .exec(&txn)
        .await?;
    let flag_id = flag.id.clone();
    flag.delete(&txn).await?;

    audit::record(
        &txn,
        ctx,
        audit::ACTION_DELETE,
        "feature_flag",
        &flag_id,
        Some(before),
        None,
        None,
    )
    .await?;

    txn.commit().await?;
    Ok(())
}

/// Add a rule; the rule body is validated before anything is written.
/// Without an explicit order the rule appends after the current maximum.
pub async fn add_rule(
    db: &DatabaseConnection,
    ctx: &TenantContext,
    flag_id: &str,
    spec: RuleSpec,
    sort_order: Option<i32>,
) -> anyhow::Result<flag_rules::Model> {
    require_writer(ctx)?;
    spec.validate().map_err(VigilError::Validation)?;

    let txn = db.begin().await?;
    let flag = find_scoped(&txn, ctx, flag_id).await?;

    let sort_order = match sort_order {
        Some(order) => order,
        None => {
            let max: Option<i32> = flag_rules::Entity::find()
                .filter(flag_rules::Column::FlagId.eq(flag.id.as_str()))
                .select_only()
                .column_as(flag_rules::Column::SortOrder.max(), "max")
                .into_tuple()
                .one(&txn)
                .await?
                .flatten();
            max.map(|m| m + 1).unwrap_or(0)
        }
    };

    let rule = flag_rules::ActiveModel {
        id: Set(uuid::Uuid::new_v4().to_string()),
        flag_id: Set(flag.id.clone()),
        tenant_id: Set(ctx.tenant_id.clone()),
        rule_type: Set(spec.type_name().to_string()),
        condition: Set(spec.condition_json()),
        sort_order: Set(sort_order),
        created_at: Set(Utc::now()),
    };
    let rule = rule.insert(&txn).await?;

    audit::record(
        &txn,
        ctx,
        audit::ACTION_CREATE,
        "flag_rule",
        &rule.id,
        None,
        Some(serde_json::to_value(&rule)?),
        None,
    )
    .await?;

    txn.commit().await?;
    Ok(rule)
}

pub async fn remove_rule(
    db: &DatabaseConnection,
    ctx: &TenantContext,
    flag_id: &str,
    rule_id: &str,
) -> anyhow::Result<()> {
    require_writer(ctx)?;

    let txn = db.begin().await?;

    let rule = flag_rules::Entity::find()
        .filter(flag_rules::Column::TenantId.eq(ctx.tenant_id.as_str()))
        .filter(flag_rules::Column::FlagId.eq(flag_id))
        .filter(flag_rules::Column::Id.eq(rule_id))
        .one(&txn)
        .await?
        .ok_or_else(|| VigilError::NotFound("rule".to_string()))?;

    let before = serde_json::to_value(&rule)?;
    rule.delete(&txn).await?;

    audit::record(
        &txn,
        ctx,
        audit::ACTION_DELETE,
        "flag_rule",
        rule_id,
        Some(before),
        None,
        None,
    )
    .await?;

    txn.commit().await?;
    Ok(())
}

pub async fn rules(
    db: &DatabaseConnection,
    ctx: &TenantContext,
    flag_id: &str,
) -> anyhow::Result<Vec<flag_rules::Model>> {
    let flag = find_scoped(db, ctx, flag_id).await?;

    Ok(flag_rules::Entity::find()
        .filter(flag_rules::Column::TenantId.eq(ctx.tenant_id.as_str()))
        .filter(flag_rules::Column::FlagId.eq(flag.id.as_str()))
        .order_by_asc(flag_rules::Column::SortOrder)
        .order_by_asc(flag_rules::Column::CreatedAt)
        .all(db)
        .await?)
}

/// Evaluate a flag for a context. Deterministic: one store read, no other
/// I/O. Stored rules that fail to parse are traced and never match.
pub async fn evaluate_flag(
    db: &DatabaseConnection,
    ctx: &TenantContext,
    flag_id: &str,
    eval_ctx: &EvalContext,
) -> anyhow::Result<Evaluation> {
    let flag = find_scoped(db, ctx, flag_id).await?;
    let stored = rules(db, ctx, flag_id).await?;

    let parsed: Vec<ParsedRule> = stored
        .iter()
        .map(|row| {
            let spec = match RuleSpec::from_row(&row.rule_type, &row.condition) {
                Ok(spec) => Some(spec),
                Err(e) => {
                    warn!(rule_id = %row.id, error = %e, "stored rule failed to parse");
                    None
                }
            };
            ParsedRule {
                raw_type: row.rule_type.clone(),
                spec,
            }
        })
        .collect();

    let snapshot = FlagSnapshot {
        key: flag.key.clone(),
        enabled: flag.enabled,
        environment: flag.environment.clone(),
    };

    Ok(evaluate(&snapshot, &parsed, eval_ctx))
}

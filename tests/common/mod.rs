//! Shared fixtures: an in-memory SQLite store built from the entities, plus
//! tenant/user/membership seeding.

#![allow(dead_code)]

use chrono::Utc;
use sea_orm::{ActiveModelTrait, ConnectionTrait, Database, DatabaseConnection, Schema, Set};

use vigil::entity::{
    attachments, audit_logs, feature_flags, flag_rules, incidents, jobs, memberships, saved_views,
    tenants, timeline_events, users,
};
use vigil::model::auth::{Role, TenantContext};

pub async fn setup_db() -> DatabaseConnection {
    let db = Database::connect("sqlite::memory:")
        .await
        .expect("connect to in-memory sqlite");

    let backend = db.get_database_backend();
    let schema = Schema::new(backend);

    let statements = [
        schema.create_table_from_entity(tenants::Entity),
        schema.create_table_from_entity(users::Entity),
        schema.create_table_from_entity(memberships::Entity),
        schema.create_table_from_entity(incidents::Entity),
        schema.create_table_from_entity(timeline_events::Entity),
        schema.create_table_from_entity(attachments::Entity),
        schema.create_table_from_entity(saved_views::Entity),
        schema.create_table_from_entity(feature_flags::Entity),
        schema.create_table_from_entity(flag_rules::Entity),
        schema.create_table_from_entity(audit_logs::Entity),
        schema.create_table_from_entity(jobs::Entity),
    ];
    for statement in &statements {
        db.execute(backend.build(statement))
            .await
            .expect("create table");
    }

    db
}

pub async fn seed_tenant(db: &DatabaseConnection, slug: &str) -> tenants::Model {
    let now = Utc::now();
    tenants::ActiveModel {
        id: Set(uuid::Uuid::new_v4().to_string()),
        slug: Set(slug.to_string()),
        name: Set(format!("{} Inc", slug)),
        created_at: Set(now),
        updated_at: Set(now),
    }
    .insert(db)
    .await
    .expect("insert tenant")
}

pub async fn seed_user(db: &DatabaseConnection, email: &str) -> users::Model {
    let now = Utc::now();
    users::ActiveModel {
        id: Set(uuid::Uuid::new_v4().to_string()),
        email: Set(email.to_string()),
        name: Set(email.split('@').next().unwrap_or("user").to_string()),
        password_hash: Set("$2b$10$placeholderplaceholderplace".to_string()),
        created_at: Set(now),
        updated_at: Set(now),
    }
    .insert(db)
    .await
    .expect("insert user")
}

pub async fn seed_membership(
    db: &DatabaseConnection,
    tenant_id: &str,
    user_id: &str,
    role: Role,
) -> memberships::Model {
    memberships::ActiveModel {
        id: Set(uuid::Uuid::new_v4().to_string()),
        user_id: Set(user_id.to_string()),
        tenant_id: Set(tenant_id.to_string()),
        role: Set(role.as_str().to_string()),
        created_at: Set(Utc::now()),
    }
    .insert(db)
    .await
    .expect("insert membership")
}

/// A tenant with one member per role and ready-made contexts.
pub struct Workspace {
    pub tenant: tenants::Model,
    pub admin: users::Model,
    pub engineer: users::Model,
    pub viewer: users::Model,
    pub admin_ctx: TenantContext,
    pub engineer_ctx: TenantContext,
    pub viewer_ctx: TenantContext,
}

pub async fn seed_workspace(db: &DatabaseConnection, slug: &str) -> Workspace {
    let tenant = seed_tenant(db, slug).await;

    let admin = seed_user(db, &format!("admin@{}.test", slug)).await;
    let engineer = seed_user(db, &format!("engineer@{}.test", slug)).await;
    let viewer = seed_user(db, &format!("viewer@{}.test", slug)).await;

    seed_membership(db, &tenant.id, &admin.id, Role::Admin).await;
    seed_membership(db, &tenant.id, &engineer.id, Role::Engineer).await;
    seed_membership(db, &tenant.id, &viewer.id, Role::Viewer).await;

    let admin_ctx = TenantContext::new(&tenant.id, &admin.id, Role::Admin);
    let engineer_ctx = TenantContext::new(&tenant.id, &engineer.id, Role::Engineer);
    let viewer_ctx = TenantContext::new(&tenant.id, &viewer.id, Role::Viewer);

    Workspace {
        tenant,
        admin,
        engineer,
        viewer,
        admin_ctx,
        engineer_ctx,
        viewer_ctx,
    }
}

/// Downcast an anyhow error to the domain variant for assertions.
pub fn domain_error(err: &anyhow::Error) -> Option<&vigil::error::VigilError> {
    err.downcast_ref::<vigil::error::VigilError>()
}

use std::str::FromStr;

use sea_orm::*;

use crate::entity::memberships;
use crate::model::auth::Role;

/// Resolve the role a user holds in a tenant, if any.
pub async fn find_role(
    db: &DatabaseConnection,
    tenant_id: &str,
    user_id: &str,
) -> anyhow::Result<Option<Role>> {
    let membership = memberships::Entity::find()
        .filter(memberships::Column::TenantId.eq(tenant_id))
        .filter(memberships::Column::UserId.eq(user_id))
        .one(db)
        .await?;

    match membership {
        Some(m) => {
            let role = Role::from_str(&m.role).map_err(anyhow::Error::msg)?;
            Ok(Some(role))
        }
        None => Ok(None),
    }
}

/// Whether a user is a member of the tenant at all. Used to validate
/// assignees before they are written onto an incident.
pub async fn is_member<C: ConnectionTrait>(
    conn: &C,
    tenant_id: &str,
    user_id: &str,
) -> anyhow::Result<bool> {
    let count = memberships::Entity::find()
        .filter(memberships::Column::TenantId.eq(tenant_id))
        .filter(memberships::Column::UserId.eq(user_id))
        .count(conn)
        .await?;

    Ok(count > 0)
}

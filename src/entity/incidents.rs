//! Incident entity. Status follows the OPEN -> MITIGATED -> RESOLVED state
//! machine; rows are never hard-deleted by request handlers.

use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, PartialEq, DeriveEntityModel, Eq, Serialize, Deserialize)]
#[sea_orm(table_name = "incidents")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: String,
    pub tenant_id: String,
    pub title: String,
    /// SEV1..SEV4
    pub severity: String,
    /// OPEN, MITIGATED or RESOLVED
    pub status: String,
    pub service: String,
    /// DEV, STAGING or PROD
    pub environment: String,
    /// JSON array of strings; insertion order is preserved.
    #[sea_orm(column_type = "Text")]
    pub tags: String,
    pub created_by_id: String,
    #[sea_orm(nullable)]
    pub assignee_id: Option<String>,
    pub created_at: DateTimeUtc,
    pub updated_at: DateTimeUtc,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

impl ActiveModelBehavior for ActiveModel {}

//! Timeline event entity. Append-only; never mutated or deleted.
//!
//! `tenant_id` is denormalized from the incident so every query stays
//! tenant-scoped without a join.

use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, PartialEq, DeriveEntityModel, Eq, Serialize, Deserialize)]
#[sea_orm(table_name = "timeline_events")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: String,
    pub incident_id: String,
    pub tenant_id: String,
    /// NOTE, ACTION or STATUS_CHANGE
    pub event_type: String,
    #[sea_orm(column_type = "Text", nullable)]
    pub message: Option<String>,
    /// Structured payload, e.g. `{"from":"OPEN","to":"MITIGATED"}`.
    #[sea_orm(column_type = "Text", nullable)]
    pub data: Option<String>,
    pub created_by_id: String,
    pub created_at: DateTimeUtc,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

impl ActiveModelBehavior for ActiveModel {}

//! Flag rule entity. Rules are owned by their flag and deleted with it;
//! evaluation walks rules in ascending `sort_order`.

use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, PartialEq, DeriveEntityModel, Eq, Serialize, Deserialize)]
#[sea_orm(table_name = "flag_rules")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: String,
    pub flag_id: String,
    pub tenant_id: String,
    /// ALLOWLIST, PERCENT_ROLLOUT, AND or OR
    pub rule_type: String,
    /// JSON payload; for AND/OR it nests full rule bodies.
    #[sea_orm(column_type = "Text")]
    pub condition: String,
    pub sort_order: i32,
    pub created_at: DateTimeUtc,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

impl ActiveModelBehavior for ActiveModel {}

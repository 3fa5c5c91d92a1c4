//! Attachment entity. `scan_status` is written only by the scanning job.

use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, PartialEq, DeriveEntityModel, Eq, Serialize, Deserialize)]
#[sea_orm(table_name = "attachments")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: String,
    pub incident_id: String,
    pub tenant_id: String,
    pub file_name: String,
    pub mime_type: String,
    pub size_bytes: i64,
    pub storage_url: String,
    /// PENDING, SCANNING, CLEAN, INFECTED or FAILED
    pub scan_status: String,
    pub created_at: DateTimeUtc,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

impl ActiveModelBehavior for ActiveModel {}

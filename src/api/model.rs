use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};

use crate::entity::{
    attachments, audit_logs, feature_flags, flag_rules, incidents, saved_views, timeline_events,
};

/// Distinguishes an absent field from an explicit `null` in PATCH bodies.
fn double_option<'de, T, D>(deserializer: D) -> Result<Option<Option<T>>, D::Error>
where
    T: Deserialize<'de>,
    D: Deserializer<'de>,
{
    Option::<T>::deserialize(deserializer).map(Some)
}

fn parse_json_or_null(raw: &Option<String>) -> Option<serde_json::Value> {
    raw.as_deref()
        .and_then(|s| serde_json::from_str(s).ok())
}

#[derive(Clone, Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct IncidentDto {
    pub id: String,
    pub title: String,
    pub severity: String,
    pub status: String,
    pub service: String,
    pub environment: String,
    pub tags: Vec<String>,
    pub created_by_id: String,
    pub assignee_id: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl From<incidents::Model> for IncidentDto {
    fn from(m: incidents::Model) -> Self {
        let tags = serde_json::from_str(&m.tags).unwrap_or_default();
        Self {
            id: m.id,
            title: m.title,
            severity: m.severity,
            status: m.status,
            service: m.service,
            environment: m.environment,
            tags,
            created_by_id: m.created_by_id,
            assignee_id: m.assignee_id,
            created_at: m.created_at,
            updated_at: m.updated_at,
        }
    }
}

#[derive(Clone, Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TimelineEventDto {
    pub id: String,
    pub incident_id: String,
    #[serde(rename = "type")]
    pub event_type: String,
    pub message: Option<String>,
    pub data: Option<serde_json::Value>,
    pub created_by_id: String,
    pub created_at: DateTime<Utc>,
}

impl From<timeline_events::Model> for TimelineEventDto {
    fn from(m: timeline_events::Model) -> Self {
        let data = parse_json_or_null(&m.data);
        Self {
            id: m.id,
            incident_id: m.incident_id,
            event_type: m.event_type,
            message: m.message,
            data,
            created_by_id: m.created_by_id,
            created_at: m.created_at,
        }
    }
}

#[derive(Clone, Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AttachmentDto {
    pub id: String,
    pub incident_id: String,
    pub file_name: String,
    pub mime_type: String,
    pub size_bytes: i64,
    pub storage_url: String,
    pub scan_status: String,
    pub created_at: DateTime<Utc>,
}

impl From<attachments::Model> for AttachmentDto {
    fn from(m: attachments::Model) -> Self {
        Self {
            id: m.id,
            incident_id: m.incident_id,
            file_name: m.file_name,
            mime_type: m.mime_type,
            size_bytes: m.size_bytes,
            storage_url: m.storage_url,
            scan_status: m.scan_status,
            created_at: m.created_at,
        }
    }
}

#[derive(Clone, Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct IncidentDetailDto {
    #[serde(flatten)]
    pub incident: IncidentDto,
    pub timeline: Vec<TimelineEventDto>,
    pub attachments: Vec<AttachmentDto>,
}

#[derive(Clone, Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FlagDto {
    pub id: String,
    pub key: String,
    pub name: String,
    pub description: String,
    pub enabled: bool,
    pub environment: String,
    pub rule_count: u64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl FlagDto {
    pub fn from_model(m: feature_flags::Model, rule_count: u64) -> Self {
        Self {
            id: m.id,
            key: m.key,
            name: m.name,
            description: m.description,
            enabled: m.enabled,
            environment: m.environment,
            rule_count,
            created_at: m.created_at,
            updated_at: m.updated_at,
        }
    }
}

#[derive(Clone, Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RuleDto {
    pub id: String,
    pub flag_id: String,
    #[serde(rename = "type")]
    pub rule_type: String,
    pub condition: serde_json::Value,
    pub order: i32,
    pub created_at: DateTime<Utc>,
}

impl From<flag_rules::Model> for RuleDto {
    fn from(m: flag_rules::Model) -> Self {
        let condition = serde_json::from_str(&m.condition).unwrap_or(serde_json::Value::Null);
        Self {
            id: m.id,
            flag_id: m.flag_id,
            rule_type: m.rule_type,
            condition,
            order: m.sort_order,
            created_at: m.created_at,
        }
    }
}

#[derive(Clone, Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AuditLogDto {
    pub id: String,
    pub actor_id: String,
    pub action: String,
    pub entity_type: String,
    pub entity_id: String,
    pub before_data: Option<serde_json::Value>,
    pub after_data: Option<serde_json::Value>,
    pub metadata: Option<serde_json::Value>,
    pub created_at: DateTime<Utc>,
}

impl From<audit_logs::Model> for AuditLogDto {
    fn from(m: audit_logs::Model) -> Self {
        let before_data = parse_json_or_null(&m.before_data);
        let after_data = parse_json_or_null(&m.after_data);
        let metadata = parse_json_or_null(&m.metadata);
        Self {
            id: m.id,
            actor_id: m.actor_id,
            action: m.action,
            entity_type: m.entity_type,
            entity_id: m.entity_id,
            before_data,
            after_data,
            metadata,
            created_at: m.created_at,
        }
    }
}

#[derive(Clone, Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SavedViewDto {
    pub id: String,
    pub user_id: String,
    pub name: String,
    pub filters: serde_json::Value,
    pub created_at: DateTime<Utc>,
}

impl From<saved_views::Model> for SavedViewDto {
    fn from(m: saved_views::Model) -> Self {
        let filters = serde_json::from_str(&m.filters).unwrap_or(serde_json::Value::Null);
        Self {
            id: m.id,
            user_id: m.user_id,
            name: m.name,
            filters,
            created_at: m.created_at,
        }
    }
}

/// PATCH body for an incident. Exactly one concern is applied per request:
/// a status transition (with optional note), an assignment change, or a
/// descriptive-field update.
#[derive(Clone, Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PatchIncidentRequest {
    pub status: Option<String>,
    pub message: Option<String>,
    #[serde(default, deserialize_with = "double_option")]
    pub assignee_id: Option<Option<String>>,
    pub title: Option<String>,
    pub severity: Option<String>,
    pub service: Option<String>,
    pub environment: Option<String>,
    pub tags: Option<Vec<String>>,
}

#[derive(Clone, Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateEventRequest {
    #[serde(rename = "type")]
    pub event_type: String,
    pub message: String,
}

#[derive(Clone, Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BulkActionRequest {
    /// `assign-engineer` or `change-status`.
    pub action: String,
    pub incident_ids: Vec<String>,
    pub assignee_id: Option<String>,
    pub status: Option<String>,
}

#[derive(Clone, Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateRuleRequest {
    pub order: Option<i32>,
    pub rule: serde_json::Value,
}

#[derive(Clone, Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct IncidentListResponse {
    pub incidents: Vec<IncidentDto>,
    pub next_cursor: Option<String>,
    pub has_more: bool,
}

#[derive(Clone, Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FlagListResponse {
    pub flags: Vec<FlagDto>,
}

#[derive(Clone, Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AuditListResponse {
    pub logs: Vec<AuditLogDto>,
    pub next_cursor: Option<String>,
    pub has_more: bool,
}

#[derive(Clone, Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdatedCountResponse {
    pub updated_count: u64,
}

#[derive(Clone, Debug, Serialize)]
pub struct SuccessResponse {
    pub success: bool,
}

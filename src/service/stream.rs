use chrono::{DateTime, Utc};
use sea_orm::*;
use serde::Serialize;

use crate::entity::{incidents, timeline_events};
use crate::model::auth::TenantContext;
use crate::service::incident;

/// Per-connection observation state. The poll loop compares the store
/// against these watermarks and emits only what advanced.
#[derive(Clone, Debug)]
pub struct StreamState {
    pub last_updated_at: DateTime<Utc>,
    pub last_event_count: u64,
}

#[derive(Clone, Debug, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum StreamEvent {
    Connected {
        #[serde(rename = "incidentId")]
        incident_id: String,
    },
    IncidentUpdated {
        status: String,
        severity: String,
        #[serde(rename = "assigneeId")]
        assignee_id: Option<String>,
        #[serde(rename = "updatedAt")]
        updated_at: DateTime<Utc>,
    },
    TimelineUpdated {
        #[serde(rename = "newEvents")]
        new_events: Vec<timeline_events::Model>,
    },
    Deleted {},
}

/// One SSE frame: `data: <json>` terminated by a blank line.
pub fn sse_frame(event: &StreamEvent) -> String {
    let json = serde_json::to_string(event).unwrap_or_else(|_| "{}".to_string());
    format!("data: {}\n\n", json)
}

/// Comment frame keeping intermediaries from reaping idle connections.
pub const HEARTBEAT_FRAME: &str = ": ping\n\n";

/// Resolve the incident inside the caller's tenant and capture the initial
/// watermarks. Fails with not-found before any frame is written.
pub async fn open(
    db: &DatabaseConnection,
    ctx: &TenantContext,
    incident_id: &str,
) -> anyhow::Result<(incidents::Model, StreamState)> {
    let incident = incident::find_scoped(db, ctx, incident_id).await?;

    let event_count = timeline_events::Entity::find()
        .filter(timeline_events::Column::TenantId.eq(ctx.tenant_id.as_str()))
        .filter(timeline_events::Column::IncidentId.eq(incident.id.as_str()))
        .count(db)
        .await?;

    let state = StreamState {
        last_updated_at: incident.updated_at,
        last_event_count: event_count,
    };

    Ok((incident, state))
}

/// One observation pass. Emits `incident_updated` when `updated_at`
/// advanced, `timeline_updated` with exactly the new events (newest first)
/// when the event count grew, and `deleted` when the row is gone.
pub async fn poll_once(
    db: &DatabaseConnection,
    tenant_id: &str,
    incident_id: &str,
    state: &mut StreamState,
) -> anyhow::Result<Vec<StreamEvent>> {
    let incident = incidents::Entity::find()
        .filter(incidents::Column::TenantId.eq(tenant_id))
        .filter(incidents::Column::Id.eq(incident_id))
        .one(db)
        .await?;

    let incident = match incident {
        Some(incident) => incident,
        None => return Ok(vec![StreamEvent::Deleted {}]),
    };

    let mut events = Vec::new();

    if incident.updated_at > state.last_updated_at {
        state.last_updated_at = incident.updated_at;
        events.push(StreamEvent::IncidentUpdated {
            status: incident.status.clone(),
            severity: incident.severity.clone(),
            assignee_id: incident.assignee_id.clone(),
            updated_at: incident.updated_at,
        });
    }

    let count = timeline_events::Entity::find()
        .filter(timeline_events::Column::TenantId.eq(tenant_id))
        .filter(timeline_events::Column::IncidentId.eq(incident_id))
        .count(db)
        .await?;

    if count > state.last_event_count {
        let delta = count - state.last_event_count;
        let new_events = timeline_events::Entity::find()
            .filter(timeline_events::Column::TenantId.eq(tenant_id))
            .filter(timeline_events::Column::IncidentId.eq(incident_id))
            .order_by_desc(timeline_events::Column::CreatedAt)
            .order_by_desc(timeline_events::Column::Id)
            .limit(delta)
            .all(db)
            .await?;
        state.last_event_count = count;
        events.push(StreamEvent::TimelineUpdated { new_events });
    }

    Ok(events)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_frame_shape() {
        let frame = sse_frame(&StreamEvent::Connected {
            incident_id: "i1".to_string(),
        });
        assert!(frame.starts_with("data: "));
        assert!(frame.ends_with("\n\n"));
        assert!(frame.contains("\"type\":\"connected\""));
        assert!(frame.contains("\"incidentId\":\"i1\""));
    }

    #[test]
    fn test_heartbeat_is_a_comment() {
        assert!(HEARTBEAT_FRAME.starts_with(':'));
        assert!(HEARTBEAT_FRAME.ends_with("\n\n"));
    }
}

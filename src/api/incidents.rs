use std::str::FromStr;
use std::time::Duration;

use actix_multipart::Multipart;
use actix_web::{HttpRequest, HttpResponse, Scope, delete, get, patch, post, web};
use futures_util::StreamExt;
use sea_orm::DatabaseConnection;
use tracing::warn;

use crate::api::model::{
    AttachmentDto, BulkActionRequest, CreateEventRequest, IncidentDetailDto, IncidentDto,
    IncidentListResponse, PatchIncidentRequest, SuccessResponse, TimelineEventDto,
    UpdatedCountResponse,
};
use crate::api::tenant_context;
use crate::error::{AppError, VigilError};
use crate::model::common::{AppState, MAX_ATTACHMENT_BYTES};
use crate::model::incident::{CreateIncident, EventType, IncidentFilter, IncidentStatus, UpdateIncident};
use crate::service;
use crate::service::stream::{HEARTBEAT_FRAME, StreamEvent, StreamState, sse_frame};

pub fn routers() -> Scope {
    web::scope("/incidents")
        .service(bulk_action)
        .service(list)
        .service(create)
        .service(detail)
        .service(patch_incident)
        .service(append_event)
        .service(upload_attachment)
        .service(delete_attachment)
        .service(stream)
}

#[get("")]
async fn list(
    req: HttpRequest,
    data: web::Data<AppState>,
    params: web::Query<IncidentFilter>,
) -> Result<HttpResponse, AppError> {
    let ctx = tenant_context(&req, &data).await?;

    let page = service::incident::list(&data.database_connection, &ctx, &params).await?;

    Ok(HttpResponse::Ok().json(IncidentListResponse {
        incidents: page.items.into_iter().map(IncidentDto::from).collect(),
        next_cursor: page.next_cursor,
        has_more: page.has_more,
    }))
}

#[post("")]
async fn create(
    req: HttpRequest,
    data: web::Data<AppState>,
    body: web::Json<CreateIncident>,
) -> Result<HttpResponse, AppError> {
    let ctx = tenant_context(&req, &data).await?;

    let incident =
        service::incident::create(&data.database_connection, &ctx, body.into_inner()).await?;

    Ok(HttpResponse::Created().json(IncidentDto::from(incident)))
}

#[get("/{id}")]
async fn detail(
    req: HttpRequest,
    data: web::Data<AppState>,
    path: web::Path<String>,
) -> Result<HttpResponse, AppError> {
    let ctx = tenant_context(&req, &data).await?;

    let (incident, timeline, attachments) =
        service::incident::get_detail(&data.database_connection, &ctx, &path).await?;

    Ok(HttpResponse::Ok().json(IncidentDetailDto {
        incident: IncidentDto::from(incident),
        timeline: timeline.into_iter().map(TimelineEventDto::from).collect(),
        attachments: attachments.into_iter().map(AttachmentDto::from).collect(),
    }))
}

#[patch("/{id}")]
async fn patch_incident(
    req: HttpRequest,
    data: web::Data<AppState>,
    path: web::Path<String>,
    body: web::Json<PatchIncidentRequest>,
) -> Result<HttpResponse, AppError> {
    let ctx = tenant_context(&req, &data).await?;
    let body = body.into_inner();
    let db = &data.database_connection;

    let incident = if let Some(status) = body.status {
        let status = IncidentStatus::from_str(&status).map_err(VigilError::Validation)?;
        service::incident::change_status(db, &ctx, &path, status, body.message).await?
    } else if let Some(assignee_id) = body.assignee_id {
        service::incident::assign(db, &ctx, &path, assignee_id).await?
    } else {
        let update = UpdateIncident {
            title: body.title,
            severity: body.severity,
            service: body.service,
            environment: body.environment,
            tags: body.tags,
        };
        service::incident::update_fields(db, &ctx, &path, update).await?
    };

    Ok(HttpResponse::Ok().json(IncidentDto::from(incident)))
}

#[post("/{id}/timeline")]
async fn append_event(
    req: HttpRequest,
    data: web::Data<AppState>,
    path: web::Path<String>,
    body: web::Json<CreateEventRequest>,
) -> Result<HttpResponse, AppError> {
    let ctx = tenant_context(&req, &data).await?;
    let body = body.into_inner();

    let event_type = EventType::from_str(&body.event_type).map_err(VigilError::Validation)?;
    let event = service::incident::append_event(
        &data.database_connection,
        &ctx,
        &path,
        event_type,
        body.message,
    )
    .await?;

    Ok(HttpResponse::Created().json(TimelineEventDto::from(event)))
}

#[post("/{id}/attachments")]
async fn upload_attachment(
    req: HttpRequest,
    data: web::Data<AppState>,
    path: web::Path<String>,
    mut payload: Multipart,
) -> Result<HttpResponse, AppError> {
    let ctx = tenant_context(&req, &data).await?;

    let mut upload: Option<service::attachment::Upload> = None;
    while let Some(Ok(mut field)) = payload.next().await {
        let (is_file, file_name) = match field.content_disposition() {
            Some(cd) => (
                cd.get_name() == Some("file"),
                cd.get_filename().map(|s| s.to_string()),
            ),
            None => (false, None),
        };
        if !is_file {
            continue;
        }

        let mime_type = field
            .content_type()
            .map(|m| m.to_string())
            .unwrap_or_else(|| "application/octet-stream".to_string());

        let mut size_bytes = 0usize;
        while let Some(Ok(chunk)) = field.next().await {
            size_bytes += chunk.len();
            if size_bytes > MAX_ATTACHMENT_BYTES {
                return Err(VigilError::AttachmentRejected(format!(
                    "file exceeds {} bytes",
                    MAX_ATTACHMENT_BYTES
                ))
                .into());
            }
        }

        upload = Some(service::attachment::Upload {
            file_name: file_name.unwrap_or_default(),
            mime_type,
            size_bytes,
        });
        break;
    }

    let upload = upload
        .ok_or_else(|| VigilError::Validation("multipart field 'file' is required".to_string()))?;

    let attachment =
        service::attachment::create(&data.database_connection, &ctx, &path, upload).await?;

    Ok(HttpResponse::Created().json(AttachmentDto::from(attachment)))
}

#[delete("/{id}/attachments/{aid}")]
async fn delete_attachment(
    req: HttpRequest,
    data: web::Data<AppState>,
    path: web::Path<(String, String)>,
) -> Result<HttpResponse, AppError> {
    let ctx = tenant_context(&req, &data).await?;
    let (incident_id, attachment_id) = path.into_inner();

    service::attachment::delete(&data.database_connection, &ctx, &incident_id, &attachment_id)
        .await?;

    Ok(HttpResponse::Ok().json(SuccessResponse { success: true }))
}

#[post("/bulk-action")]
async fn bulk_action(
    req: HttpRequest,
    data: web::Data<AppState>,
    body: web::Json<BulkActionRequest>,
) -> Result<HttpResponse, AppError> {
    let ctx = tenant_context(&req, &data).await?;
    let body = body.into_inner();
    let db = &data.database_connection;

    let updated_count = match body.action.as_str() {
        "assign-engineer" => {
            let assignee_id = body.assignee_id.ok_or_else(|| {
                VigilError::Validation("assigneeId is required for assign-engineer".to_string())
            })?;
            service::incident::bulk_assign(db, &ctx, &body.incident_ids, &assignee_id).await?
        }
        "change-status" => {
            let status = body.status.ok_or_else(|| {
                VigilError::Validation("status is required for change-status".to_string())
            })?;
            let status = IncidentStatus::from_str(&status).map_err(VigilError::Validation)?;
            service::incident::bulk_change_status(db, &ctx, &body.incident_ids, status).await?
        }
        other => {
            return Err(
                VigilError::Validation(format!("unknown bulk action: {}", other)).into(),
            );
        }
    };

    Ok(HttpResponse::Ok().json(UpdatedCountResponse { updated_count }))
}

struct StreamLoop {
    db: DatabaseConnection,
    tenant_id: String,
    incident_id: String,
    state: StreamState,
    poll_interval: Duration,
    opened: bool,
    closed: bool,
}

/// Long-lived per-incident change stream. Membership is checked before the
/// first frame; afterwards the loop polls the store and pushes heartbeats
/// plus whatever advanced. Client disconnect drops the stream future and
/// ends the loop.
#[get("/{id}/stream")]
async fn stream(
    req: HttpRequest,
    data: web::Data<AppState>,
    path: web::Path<String>,
) -> Result<HttpResponse, AppError> {
    let ctx = tenant_context(&req, &data).await?;
    let incident_id = path.into_inner();

    let (_, state) =
        service::stream::open(&data.database_connection, &ctx, &incident_id).await?;

    let loop_state = StreamLoop {
        db: data.database_connection.clone(),
        tenant_id: ctx.tenant_id.clone(),
        incident_id,
        state,
        poll_interval: Duration::from_millis(data.realtime_poll_ms()),
        opened: false,
        closed: false,
    };

    let body = futures_util::stream::unfold(loop_state, |mut s| async move {
        if s.closed {
            return None;
        }

        if !s.opened {
            s.opened = true;
            let frame = sse_frame(&StreamEvent::Connected {
                incident_id: s.incident_id.clone(),
            });
            return Some((Ok::<web::Bytes, actix_web::Error>(frame.into()), s));
        }

        tokio::time::sleep(s.poll_interval).await;

        let mut chunk = String::from(HEARTBEAT_FRAME);
        match service::stream::poll_once(&s.db, &s.tenant_id, &s.incident_id, &mut s.state).await
        {
            Ok(events) => {
                for event in &events {
                    chunk.push_str(&sse_frame(event));
                    if matches!(event, StreamEvent::Deleted {}) {
                        s.closed = true;
                    }
                }
            }
            Err(e) => {
                warn!(error = %e, incident_id = %s.incident_id, "stream poll failed");
            }
        }

        Some((Ok(chunk.into()), s))
    });

    Ok(HttpResponse::Ok()
        .content_type("text/event-stream")
        .insert_header(("Cache-Control", "no-cache, no-transform"))
        .insert_header(("Connection", "keep-alive"))
        .streaming(body))
}

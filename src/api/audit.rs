use actix_web::{HttpRequest, HttpResponse, Scope, get, web};

use crate::api::model::{AuditListResponse, AuditLogDto};
use crate::api::tenant_context;
use crate::error::AppError;
use crate::model::common::AppState;
use crate::service;
use crate::service::audit::AuditFilter;

pub fn routers() -> Scope {
    web::scope("/audit-logs").service(list)
}

#[get("")]
async fn list(
    req: HttpRequest,
    data: web::Data<AppState>,
    params: web::Query<AuditFilter>,
) -> Result<HttpResponse, AppError> {
    let ctx = tenant_context(&req, &data).await?;

    let page = service::audit::list(&data.database_connection, &ctx, &params).await?;

    Ok(HttpResponse::Ok().json(AuditListResponse {
        logs: page.items.into_iter().map(AuditLogDto::from).collect(),
        next_cursor: page.next_cursor,
        has_more: page.has_more,
    }))
}

use actix_web::{HttpRequest, HttpResponse, Scope, delete, get, post, web};

use crate::api::model::{SavedViewDto, SuccessResponse};
use crate::api::{session_claims, tenant_context};
use crate::error::{AppError, VigilError};
use crate::model::auth::TenantContext;
use crate::model::common::AppState;
use crate::service;

pub fn routers() -> Scope {
    web::scope("/tenants/{tenant}/saved-views")
        .service(list)
        .service(create)
        .service(remove)
}

/// The URL names the tenant by slug; it must be the session's active tenant.
/// A mismatch is indistinguishable from an absent tenant.
async fn scoped_context(
    req: &HttpRequest,
    data: &AppState,
    slug: &str,
) -> Result<TenantContext, AppError> {
    let claims = session_claims(req)?;
    if claims.tenant_slug != slug {
        return Err(VigilError::NotFound("tenant".to_string()).into());
    }
    tenant_context(req, data).await
}

#[get("")]
async fn list(
    req: HttpRequest,
    data: web::Data<AppState>,
    path: web::Path<String>,
) -> Result<HttpResponse, AppError> {
    let ctx = scoped_context(&req, &data, &path).await?;

    let views = service::saved_view::list(&data.database_connection, &ctx).await?;

    Ok(HttpResponse::Ok()
        .json(views.into_iter().map(SavedViewDto::from).collect::<Vec<_>>()))
}

#[post("")]
async fn create(
    req: HttpRequest,
    data: web::Data<AppState>,
    path: web::Path<String>,
    body: web::Json<service::saved_view::CreateSavedView>,
) -> Result<HttpResponse, AppError> {
    let ctx = scoped_context(&req, &data, &path).await?;

    let view =
        service::saved_view::create(&data.database_connection, &ctx, body.into_inner()).await?;

    Ok(HttpResponse::Created().json(SavedViewDto::from(view)))
}

#[delete("/{vid}")]
async fn remove(
    req: HttpRequest,
    data: web::Data<AppState>,
    path: web::Path<(String, String)>,
) -> Result<HttpResponse, AppError> {
    let (slug, view_id) = path.into_inner();
    let ctx = scoped_context(&req, &data, &slug).await?;

    service::saved_view::delete(&data.database_connection, &ctx, &view_id).await?;

    Ok(HttpResponse::Ok().json(SuccessResponse { success: true }))
}

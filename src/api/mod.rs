// HTTP surface: request DTOs, handlers and the route table.

pub mod audit;
pub mod flags;
pub mod health;
pub mod incidents;
pub mod model;
pub mod router;
pub mod saved_views;

use actix_web::{HttpMessage, HttpRequest};

use crate::error::{AppError, VigilError};
use crate::model::auth::{SessionClaims, TenantContext};
use crate::model::common::AppState;
use crate::service;

/// The authenticated session claims placed by the authentication middleware.
pub fn session_claims(req: &HttpRequest) -> Result<SessionClaims, AppError> {
    req.extensions()
        .get::<SessionClaims>()
        .cloned()
        .ok_or_else(|| VigilError::TenantContextMissing.into())
}

/// Build the tenant context for this request: the session must name an
/// active tenant and the principal must hold a membership in it. Everything
/// the data layer does flows through the returned context.
pub async fn tenant_context(
    req: &HttpRequest,
    state: &AppState,
) -> Result<TenantContext, AppError> {
    let claims = session_claims(req)?;
    if claims.tenant_id.is_empty() {
        return Err(VigilError::TenantContextMissing.into());
    }

    let role =
        service::membership::find_role(&state.database_connection, &claims.tenant_id, &claims.sub)
            .await?
            .ok_or_else(|| {
                VigilError::AccessDenied("no membership in the active tenant".to_string())
            })?;

    Ok(TenantContext::new(&claims.tenant_id, &claims.sub, role))
}

// Error handling for the vigil control plane: domain error variants and the
// actix-web response mapping.

use std::fmt::{Display, Formatter};

use actix_web::HttpResponse;
use actix_web::http::StatusCode;

use crate::model::common::ErrorResult;
use crate::model::incident::IncidentStatus;

#[derive(thiserror::Error, Debug)]
pub enum VigilError {
    #[error("tenant context missing")]
    TenantContextMissing,
    #[error("access denied: {0}")]
    AccessDenied(String),
    #[error("{0} not found")]
    NotFound(String),
    #[error("{0}")]
    Validation(String),
    #[error("invalid status transition from {from} to {to}")]
    InvalidTransition {
        from: IncidentStatus,
        to: IncidentStatus,
    },
    #[error("assignee is not a member of this tenant")]
    AssigneeNotInTenant,
    #[error("feature flag '{0}' already exists for this environment")]
    DuplicateFlagKey(String),
    #[error("attachment rejected: {0}")]
    AttachmentRejected(String),
}

impl VigilError {
    fn status(&self) -> StatusCode {
        match self {
            VigilError::TenantContextMissing => StatusCode::UNAUTHORIZED,
            VigilError::AccessDenied(_) => StatusCode::FORBIDDEN,
            VigilError::NotFound(_) => StatusCode::NOT_FOUND,
            VigilError::Validation(_)
            | VigilError::InvalidTransition { .. }
            | VigilError::AssigneeNotInTenant
            | VigilError::AttachmentRejected(_) => StatusCode::BAD_REQUEST,
            VigilError::DuplicateFlagKey(_) => StatusCode::CONFLICT,
        }
    }
}

/// Wrapper carrying any failure out of a handler. Domain variants map to
/// their taxonomy status; everything else is a 500 with a generic phrase
/// (the cause is logged, never echoed).
#[derive(Debug)]
pub struct AppError {
    inner: anyhow::Error,
}

impl Display for AppError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.inner)
    }
}

impl From<anyhow::Error> for AppError {
    fn from(value: anyhow::Error) -> Self {
        AppError { inner: value }
    }
}

impl From<VigilError> for AppError {
    fn from(value: VigilError) -> Self {
        AppError {
            inner: anyhow::Error::from(value),
        }
    }
}

impl From<sea_orm::DbErr> for AppError {
    fn from(value: sea_orm::DbErr) -> Self {
        AppError {
            inner: anyhow::Error::from(value),
        }
    }
}

impl actix_web::error::ResponseError for AppError {
    fn error_response(&self) -> HttpResponse {
        if let Some(e) = self.inner.downcast_ref::<VigilError>() {
            let status = e.status();
            if let VigilError::InvalidTransition { from, to } = e {
                // 400 carrying the set of legal next states.
                return HttpResponse::build(status).json(serde_json::json!({
                    "timestamp": chrono::Utc::now().to_rfc3339(),
                    "status": status.as_u16(),
                    "error": "Bad Request",
                    "message": e.to_string(),
                    "from": from,
                    "to": to,
                    "allowed": from.allowed_transitions(),
                }));
            }
            let reason = status.canonical_reason().unwrap_or("Error");
            return HttpResponse::build(status).json(ErrorResult::new(
                status.as_u16() as i32,
                reason,
                e.to_string(),
            ));
        }

        tracing::error!(error = %self.inner, "request failed");
        HttpResponse::InternalServerError().json(ErrorResult::new(
            500,
            "Internal Server Error",
            "internal server error".to_string(),
        ))
    }
}

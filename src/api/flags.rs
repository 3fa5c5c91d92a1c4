use actix_web::{HttpRequest, HttpResponse, Scope, delete, get, patch, post, web};

use crate::api::model::{CreateRuleRequest, FlagDto, FlagListResponse, RuleDto, SuccessResponse};
use crate::api::tenant_context;
use crate::error::{AppError, VigilError};
use crate::model::common::AppState;
use crate::model::flag::{EvalContext, RuleSpec};
use crate::service;

pub fn routers() -> Scope {
    web::scope("/feature-flags")
        .service(list)
        .service(create)
        .service(update)
        .service(remove)
        .service(evaluate)
        .service(list_rules)
        .service(add_rule)
        .service(remove_rule)
}

#[get("")]
async fn list(req: HttpRequest, data: web::Data<AppState>) -> Result<HttpResponse, AppError> {
    let ctx = tenant_context(&req, &data).await?;

    let flags = service::flag::list(&data.database_connection, &ctx).await?;

    Ok(HttpResponse::Ok().json(FlagListResponse {
        flags: flags
            .into_iter()
            .map(|(flag, rule_count)| FlagDto::from_model(flag, rule_count))
            .collect(),
    }))
}

#[post("")]
async fn create(
    req: HttpRequest,
    data: web::Data<AppState>,
    body: web::Json<service::flag::CreateFlag>,
) -> Result<HttpResponse, AppError> {
    let ctx = tenant_context(&req, &data).await?;

    let flag = service::flag::create(&data.database_connection, &ctx, body.into_inner()).await?;

    Ok(HttpResponse::Created().json(FlagDto::from_model(flag, 0)))
}

#[patch("/{id}")]
async fn update(
    req: HttpRequest,
    data: web::Data<AppState>,
    path: web::Path<String>,
    body: web::Json<service::flag::UpdateFlag>,
) -> Result<HttpResponse, AppError> {
    let ctx = tenant_context(&req, &data).await?;

    let flag =
        service::flag::update(&data.database_connection, &ctx, &path, body.into_inner()).await?;
    let rule_count = service::flag::rules(&data.database_connection, &ctx, &flag.id)
        .await?
        .len() as u64;

    Ok(HttpResponse::Ok().json(FlagDto::from_model(flag, rule_count)))
}

#[delete("/{id}")]
async fn remove(
    req: HttpRequest,
    data: web::Data<AppState>,
    path: web::Path<String>,
) -> Result<HttpResponse, AppError> {
    let ctx = tenant_context(&req, &data).await?;

    service::flag::delete(&data.database_connection, &ctx, &path).await?;

    Ok(HttpResponse::Ok().json(SuccessResponse { success: true }))
}

#[post("/{id}/evaluate")]
async fn evaluate(
    req: HttpRequest,
    data: web::Data<AppState>,
    path: web::Path<String>,
    body: web::Json<EvalContext>,
) -> Result<HttpResponse, AppError> {
    let ctx = tenant_context(&req, &data).await?;

    let evaluation =
        service::flag::evaluate_flag(&data.database_connection, &ctx, &path, &body).await?;

    Ok(HttpResponse::Ok().json(evaluation))
}

#[get("/{id}/rules")]
async fn list_rules(
    req: HttpRequest,
    data: web::Data<AppState>,
    path: web::Path<String>,
) -> Result<HttpResponse, AppError> {
    let ctx = tenant_context(&req, &data).await?;

    let rules = service::flag::rules(&data.database_connection, &ctx, &path).await?;

    Ok(HttpResponse::Ok().json(rules.into_iter().map(RuleDto::from).collect::<Vec<_>>()))
}

#[post("/{id}/rules")]
async fn add_rule(
    req: HttpRequest,
    data: web::Data<AppState>,
    path: web::Path<String>,
    body: web::Json<CreateRuleRequest>,
) -> Result<HttpResponse, AppError> {
    let ctx = tenant_context(&req, &data).await?;
    let body = body.into_inner();

    let spec: RuleSpec = serde_json::from_value(body.rule)
        .map_err(|e| VigilError::Validation(format!("invalid rule: {}", e)))?;

    let rule =
        service::flag::add_rule(&data.database_connection, &ctx, &path, spec, body.order).await?;

    Ok(HttpResponse::Created().json(RuleDto::from(rule)))
}

#[delete("/{id}/rules/{rid}")]
async fn remove_rule(
    req: HttpRequest,
    data: web::Data<AppState>,
    path: web::Path<(String, String)>,
) -> Result<HttpResponse, AppError> {
    let ctx = tenant_context(&req, &data).await?;
    let (flag_id, rule_id) = path.into_inner();

    service::flag::remove_rule(&data.database_connection, &ctx, &flag_id, &rule_id).await?;

    Ok(HttpResponse::Ok().json(SuccessResponse { success: true }))
}

use actix_service::forward_ready;
use actix_utils::future::{Ready, ok};
use actix_web::Error;
use actix_web::HttpMessage;
use actix_web::HttpResponse;
use actix_web::body::EitherBody;
use actix_web::dev::{Service, ServiceRequest, ServiceResponse, Transform};
use actix_web::http::Method;
use actix_web::web::Data;
use futures_core::future::LocalBoxFuture;

use crate::model::common::{ACCESS_TOKEN_HEADER, AppState, ErrorResult, SESSION_COOKIE};
use crate::service;

const IGNORE_ROUTES: [&str; 1] = ["/api/health"];

/// Session authentication: every request except the ignore list must carry a
/// decodable session token in the `session` cookie or the `accessToken`
/// header. Valid claims are stored in the request extensions.
pub struct Authentication;

impl<S, B> Transform<S, ServiceRequest> for Authentication
where
    S: Service<ServiceRequest, Response = ServiceResponse<B>, Error = Error>,
    S::Future: 'static,
    B: 'static,
{
    type Response = ServiceResponse<EitherBody<B>>;
    type Error = Error;
    type InitError = ();
    type Transform = AuthenticationMiddleware<S>;
    type Future = Ready<Result<Self::Transform, Self::InitError>>;

    fn new_transform(&self, service: S) -> Self::Future {
        ok(AuthenticationMiddleware { service })
    }
}

pub struct AuthenticationMiddleware<S> {
    service: S,
}

impl<S, B> Service<ServiceRequest> for AuthenticationMiddleware<S>
where
    S: Service<ServiceRequest, Response = ServiceResponse<B>, Error = Error>,
    S::Future: 'static,
    B: 'static,
{
    type Response = ServiceResponse<EitherBody<B>>;
    type Error = Error;
    type Future = LocalBoxFuture<'static, Result<Self::Response, Self::Error>>;

    forward_ready!(service);

    fn call(&self, req: ServiceRequest) -> Self::Future {
        let mut authenticate_pass = false;
        let mut failure_message = "authentication required";

        if Method::OPTIONS == *req.method() {
            authenticate_pass = true;
        } else {
            authenticate_pass = IGNORE_ROUTES
                .iter()
                .any(|ignore_route| req.path().starts_with(ignore_route));
        }

        if !authenticate_pass {
            let token = req
                .cookie(SESSION_COOKIE)
                .map(|cookie| cookie.value().to_string())
                .or_else(|| {
                    req.headers()
                        .get(ACCESS_TOKEN_HEADER)
                        .and_then(|header| header.to_str().ok())
                        .map(|header| header.trim().to_string())
                });

            if let Some(token) = token {
                let secret_key = req
                    .app_data::<Data<AppState>>()
                    .map(|state| state.token_secret_key.clone())
                    .unwrap_or_default();

                match service::session::decode_session_token(&token, &secret_key) {
                    Ok(token_data) => {
                        authenticate_pass = true;
                        req.extensions_mut().insert(token_data.claims);
                    }
                    Err(err) => {
                        failure_message = match err.kind() {
                            jsonwebtoken::errors::ErrorKind::ExpiredSignature => "session expired",
                            _ => "session invalid",
                        };
                    }
                }
            }
        }

        if !authenticate_pass {
            let (request, _pl) = req.into_parts();
            let response = HttpResponse::Unauthorized()
                .json(ErrorResult::new(
                    401,
                    "Unauthorized",
                    failure_message.to_string(),
                ))
                .map_into_right_body();

            return Box::pin(async { Ok(ServiceResponse::new(request, response)) });
        }

        let res = self.service.call(req);

        Box::pin(async move { res.await.map(ServiceResponse::map_into_left_body) })
    }
}

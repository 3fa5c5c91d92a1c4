// Cross-site request forgery protection for unsafe methods. The browser
// attaches Origin (or Referer) on cross-site submissions; a matching host or
// the fetch marker header admits the request.

use actix_service::forward_ready;
use actix_utils::future::{Ready, ok};
use actix_web::Error;
use actix_web::HttpResponse;
use actix_web::body::EitherBody;
use actix_web::dev::{Service, ServiceRequest, ServiceResponse, Transform};
use actix_web::http::Method;
use futures_core::future::LocalBoxFuture;

use crate::model::common::ErrorResult;

const REQUESTED_WITH_HEADER: &str = "X-Requested-With";
const REQUESTED_WITH_MARKER: &str = "fetch";

/// Extract `host[:port]` from an Origin or Referer value.
fn url_host(value: &str) -> Option<&str> {
    let rest = value.split_once("://").map(|(_, rest)| rest)?;
    let host = rest.split('/').next().unwrap_or(rest);
    if host.is_empty() { None } else { Some(host) }
}

/// Whether the request passes the CSRF gate against the given request host.
pub fn check_unsafe_request(
    request_host: &str,
    origin: Option<&str>,
    referer: Option<&str>,
    requested_with: Option<&str>,
) -> bool {
    if let Some(origin) = origin {
        return url_host(origin) == Some(request_host);
    }
    if let Some(referer) = referer {
        return url_host(referer) == Some(request_host);
    }
    // No browsable provenance at all: only programmatic clients can set a
    // custom header, which a cross-site form cannot.
    requested_with == Some(REQUESTED_WITH_MARKER)
}

pub struct CsrfProtection;

impl<S, B> Transform<S, ServiceRequest> for CsrfProtection
where
    S: Service<ServiceRequest, Response = ServiceResponse<B>, Error = Error>,
    S::Future: 'static,
    B: 'static,
{
    type Response = ServiceResponse<EitherBody<B>>;
    type Error = Error;
    type InitError = ();
    type Transform = CsrfProtectionMiddleware<S>;
    type Future = Ready<Result<Self::Transform, Self::InitError>>;

    fn new_transform(&self, service: S) -> Self::Future {
        ok(CsrfProtectionMiddleware { service })
    }
}

pub struct CsrfProtectionMiddleware<S> {
    service: S,
}

impl<S, B> Service<ServiceRequest> for CsrfProtectionMiddleware<S>
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
        let safe = matches!(*req.method(), Method::GET | Method::HEAD | Method::OPTIONS);

        if !safe {
            let request_host = req.connection_info().host().to_string();
            let header = |name: &str| {
                req.headers()
                    .get(name)
                    .and_then(|value| value.to_str().ok())
                    .map(|value| value.to_string())
            };
            let origin = header("Origin");
            let referer = header("Referer");
            let requested_with = header(REQUESTED_WITH_HEADER);

            let allowed = check_unsafe_request(
                &request_host,
                origin.as_deref(),
                referer.as_deref(),
                requested_with.as_deref(),
            );

            if !allowed {
                let (request, _pl) = req.into_parts();
                let response = HttpResponse::Forbidden()
                    .json(ErrorResult::new(
                        403,
                        "Forbidden",
                        "cross-site request rejected".to_string(),
                    ))
                    .map_into_right_body();

                return Box::pin(async { Ok(ServiceResponse::new(request, response)) });
            }
        }

        let res = self.service.call(req);

        Box::pin(async move { res.await.map(ServiceResponse::map_into_left_body) })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const HOST: &str = "vigil.example.com";

    #[test]
    fn test_matching_origin_passes() {
        assert!(check_unsafe_request(
            HOST,
            Some("https://vigil.example.com"),
            None,
            None
        ));
        assert!(check_unsafe_request(
            HOST,
            Some("https://vigil.example.com/some/page"),
            None,
            None
        ));
    }

    #[test]
    fn test_foreign_origin_rejected() {
        assert!(!check_unsafe_request(
            HOST,
            Some("https://evil.example.net"),
            None,
            None
        ));
        // A present-but-mismatched Origin is rejected even if Referer would
        // have matched.
        assert!(!check_unsafe_request(
            HOST,
            Some("https://evil.example.net"),
            Some("https://vigil.example.com/page"),
            None
        ));
    }

    #[test]
    fn test_referer_fallback() {
        assert!(check_unsafe_request(
            HOST,
            None,
            Some("https://vigil.example.com/incidents"),
            None
        ));
        assert!(!check_unsafe_request(
            HOST,
            None,
            Some("https://evil.example.net/form"),
            None
        ));
    }

    #[test]
    fn test_fetch_marker_admits_headerless_requests() {
        assert!(check_unsafe_request(HOST, None, None, Some("fetch")));
        assert!(!check_unsafe_request(HOST, None, None, Some("XMLHttpRequest")));
        assert!(!check_unsafe_request(HOST, None, None, None));
    }

    #[test]
    fn test_host_with_port() {
        assert!(check_unsafe_request(
            "localhost:8080",
            Some("http://localhost:8080"),
            None,
            None
        ));
        assert!(!check_unsafe_request(
            "localhost:8080",
            Some("http://localhost:9090"),
            None,
            None
        ));
    }

    #[test]
    fn test_malformed_origin_rejected() {
        assert!(!check_unsafe_request(HOST, Some("not a url"), None, None));
        assert!(!check_unsafe_request(HOST, Some("https://"), None, None));
    }
}

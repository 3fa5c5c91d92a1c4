// Fixed-window rate limiting keyed by (operation class, principal).
// Windows are absolute 60-second intervals; counters live in process memory
// and reset on restart.

use std::collections::HashMap;
use std::future::{Future, Ready, ready};
use std::pin::Pin;
use std::sync::Arc;
use std::sync::Mutex;

use actix_web::{
    Error, HttpMessage, HttpResponse,
    body::EitherBody,
    dev::{Service, ServiceRequest, ServiceResponse, Transform},
    http::{Method, StatusCode},
};
use serde::Serialize;

use crate::model::auth::SessionClaims;
use crate::model::common::{
    RATE_SWEEP_THRESHOLD, RATE_WINDOW_SECS, READ_REQUESTS_PER_WINDOW, WRITE_REQUESTS_PER_WINDOW,
};

#[derive(Clone)]
pub struct RateLimitConfig {
    pub read_limit: u32,
    pub write_limit: u32,
    pub window_secs: i64,
    pub enabled: bool,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            read_limit: READ_REQUESTS_PER_WINDOW,
            write_limit: WRITE_REQUESTS_PER_WINDOW,
            window_secs: RATE_WINDOW_SECS,
            enabled: true,
        }
    }
}

struct WindowCounter {
    count: u32,
    reset_at: i64,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum OperationClass {
    Read,
    Write,
}

impl OperationClass {
    fn as_str(self) -> &'static str {
        match self {
            OperationClass::Read => "read",
            OperationClass::Write => "write",
        }
    }

    pub fn of(method: &Method) -> Self {
        if matches!(*method, Method::GET | Method::HEAD | Method::OPTIONS) {
            OperationClass::Read
        } else {
            OperationClass::Write
        }
    }
}

/// Decision for one request: whether it passes, how much budget remains in
/// the current window, and when the window resets (unix seconds).
#[derive(Clone, Copy, Debug)]
pub struct RateDecision {
    pub allowed: bool,
    pub limit: u32,
    pub remaining: u32,
    pub reset_at: i64,
}

pub struct RateLimiterState {
    windows: Mutex<HashMap<String, WindowCounter>>,
    config: RateLimitConfig,
}

impl RateLimiterState {
    pub fn new(config: RateLimitConfig) -> Self {
        Self {
            windows: Mutex::new(HashMap::new()),
            config,
        }
    }

    fn limit_for(&self, class: OperationClass) -> u32 {
        match class {
            OperationClass::Read => self.config.read_limit,
            OperationClass::Write => self.config.write_limit,
        }
    }

    /// Count one request against `(class, principal)` at time `now`.
    pub fn check(&self, class: OperationClass, principal: &str, now: i64) -> RateDecision {
        let limit = self.limit_for(class);
        if !self.config.enabled {
            return RateDecision {
                allowed: true,
                limit,
                remaining: limit,
                reset_at: now,
            };
        }

        let window_start = now - now.rem_euclid(self.config.window_secs);
        let reset_at = window_start + self.config.window_secs;
        let key = format!("{}:{}", class.as_str(), principal);

        let mut windows = match self.windows.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };

        if windows.len() > RATE_SWEEP_THRESHOLD {
            windows.retain(|_, counter| counter.reset_at > now);
        }

        let counter = windows.entry(key).or_insert(WindowCounter {
            count: 0,
            reset_at,
        });
        // A counter from an elapsed window is discarded lazily on access.
        if counter.reset_at <= now {
            counter.count = 0;
            counter.reset_at = reset_at;
        }

        if counter.count >= limit {
            return RateDecision {
                allowed: false,
                limit,
                remaining: 0,
                reset_at: counter.reset_at,
            };
        }

        counter.count += 1;
        RateDecision {
            allowed: true,
            limit,
            remaining: limit - counter.count,
            reset_at: counter.reset_at,
        }
    }
}

pub struct RateLimiter {
    state: Arc<RateLimiterState>,
}

impl RateLimiter {
    pub fn new(config: RateLimitConfig) -> Self {
        Self {
            state: Arc::new(RateLimiterState::new(config)),
        }
    }

    pub fn with_defaults() -> Self {
        Self::new(RateLimitConfig::default())
    }
}

impl<S, B> Transform<S, ServiceRequest> for RateLimiter
where
    S: Service<ServiceRequest, Response = ServiceResponse<B>, Error = Error>,
    S::Future: 'static,
    B: 'static,
{
    type Response = ServiceResponse<EitherBody<B>>;
    type Error = Error;
    type Transform = RateLimiterMiddleware<S>;
    type InitError = ();
    type Future = Ready<Result<Self::Transform, Self::InitError>>;

    fn new_transform(&self, service: S) -> Self::Future {
        ready(Ok(RateLimiterMiddleware {
            service,
            state: self.state.clone(),
        }))
    }
}

pub struct RateLimiterMiddleware<S> {
    service: S,
    state: Arc<RateLimiterState>,
}

#[derive(Serialize)]
struct RateLimitError {
    code: i32,
    message: String,
    remaining: u32,
    #[serde(rename = "resetAt")]
    reset_at: i64,
}

impl<S, B> Service<ServiceRequest> for RateLimiterMiddleware<S>
where
    S: Service<ServiceRequest, Response = ServiceResponse<B>, Error = Error>,
    S::Future: 'static,
    B: 'static,
{
    type Response = ServiceResponse<EitherBody<B>>;
    type Error = Error;
    type Future = Pin<Box<dyn Future<Output = Result<Self::Response, Self::Error>>>>;

    fn poll_ready(
        &self,
        ctx: &mut std::task::Context<'_>,
    ) -> std::task::Poll<Result<(), Self::Error>> {
        self.service.poll_ready(ctx)
    }

    fn call(&self, req: ServiceRequest) -> Self::Future {
        // Authenticated principal where available; the peer address covers
        // the unauthenticated paths.
        let principal = req
            .extensions()
            .get::<SessionClaims>()
            .map(|claims| claims.sub.clone())
            .unwrap_or_else(|| {
                req.connection_info()
                    .realip_remote_addr()
                    .unwrap_or("unknown")
                    .to_string()
            });

        let class = OperationClass::of(req.method());
        let decision = self
            .state
            .check(class, &principal, chrono::Utc::now().timestamp());

        if !decision.allowed {
            let response = HttpResponse::build(StatusCode::TOO_MANY_REQUESTS)
                .insert_header(("X-RateLimit-Limit", decision.limit.to_string()))
                .insert_header(("X-RateLimit-Remaining", "0"))
                .insert_header(("X-RateLimit-Reset", decision.reset_at.to_string()))
                .json(RateLimitError {
                    code: 429,
                    message: "rate limit exceeded, try again after the window resets".to_string(),
                    remaining: 0,
                    reset_at: decision.reset_at,
                });

            return Box::pin(async move { Ok(req.into_response(response).map_into_right_body()) });
        }

        let fut = self.service.call(req);

        Box::pin(async move {
            let mut res = fut.await?;

            res.headers_mut().insert(
                actix_web::http::header::HeaderName::from_static("x-ratelimit-limit"),
                actix_web::http::header::HeaderValue::from_str(&decision.limit.to_string())
                    .unwrap_or_else(|_| actix_web::http::header::HeaderValue::from_static("0")),
            );
            res.headers_mut().insert(
                actix_web::http::header::HeaderName::from_static("x-ratelimit-remaining"),
                actix_web::http::header::HeaderValue::from_str(&decision.remaining.to_string())
                    .unwrap_or_else(|_| actix_web::http::header::HeaderValue::from_static("0")),
            );
            res.headers_mut().insert(
                actix_web::http::header::HeaderName::from_static("x-ratelimit-reset"),
                actix_web::http::header::HeaderValue::from_str(&decision.reset_at.to_string())
                    .unwrap_or_else(|_| actix_web::http::header::HeaderValue::from_static("0")),
            );

            Ok(res.map_into_left_body())
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn state(read: u32, write: u32) -> RateLimiterState {
        RateLimiterState::new(RateLimitConfig {
            read_limit: read,
            write_limit: write,
            window_secs: 60,
            enabled: true,
        })
    }

    #[test]
    fn test_write_budget_exhausts() {
        let state = state(100, 3);
        for _ in 0..3 {
            assert!(state.check(OperationClass::Write, "u1", 1_000).allowed);
        }
        let decision = state.check(OperationClass::Write, "u1", 1_000);
        assert!(!decision.allowed);
        assert_eq!(decision.remaining, 0);
    }

    #[test]
    fn test_classes_are_independent() {
        let state = state(2, 2);
        state.check(OperationClass::Write, "u1", 1_000);
        state.check(OperationClass::Write, "u1", 1_000);
        assert!(!state.check(OperationClass::Write, "u1", 1_000).allowed);
        // Reads still have budget.
        assert!(state.check(OperationClass::Read, "u1", 1_000).allowed);
    }

    #[test]
    fn test_principals_are_independent() {
        let state = state(100, 1);
        assert!(state.check(OperationClass::Write, "u1", 1_000).allowed);
        assert!(!state.check(OperationClass::Write, "u1", 1_000).allowed);
        assert!(state.check(OperationClass::Write, "u2", 1_000).allowed);
    }

    #[test]
    fn test_window_boundaries_are_absolute() {
        let state = state(100, 1);
        // 1_000 falls in the window [960, 1020).
        assert!(state.check(OperationClass::Write, "u1", 1_000).allowed);
        let denied = state.check(OperationClass::Write, "u1", 1_019);
        assert!(!denied.allowed);
        assert_eq!(denied.reset_at, 1_020);
        // The next window admits again.
        assert!(state.check(OperationClass::Write, "u1", 1_020).allowed);
    }

    #[test]
    fn test_operation_class_of_method() {
        assert_eq!(OperationClass::of(&Method::GET), OperationClass::Read);
        assert_eq!(OperationClass::of(&Method::HEAD), OperationClass::Read);
        assert_eq!(OperationClass::of(&Method::POST), OperationClass::Write);
        assert_eq!(OperationClass::of(&Method::PATCH), OperationClass::Write);
        assert_eq!(OperationClass::of(&Method::DELETE), OperationClass::Write);
    }

    #[test]
    fn test_disabled_limiter_admits_everything() {
        let state = RateLimiterState::new(RateLimitConfig {
            read_limit: 1,
            write_limit: 1,
            window_secs: 60,
            enabled: false,
        });
        for _ in 0..10 {
            assert!(state.check(OperationClass::Write, "u1", 1_000).allowed);
        }
    }
}

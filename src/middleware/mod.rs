use actix_web::{
    body::EitherBody,
    dev::{self, forward_ready, Service, ServiceRequest, ServiceResponse, Transform},
    http::Method,
    web, Error, FromRequest, HttpRequest, HttpResponse, ResponseError,
};
use chrono::{DateTime, Duration, Utc};
use futures_util::future::{ok, LocalBoxFuture, Ready};
use rand::RngCore;
use std::collections::HashMap;
use std::future::{ready, Ready as StdReady};
use std::sync::{Arc, RwLock};

use crate::config::Config;
use crate::error::ApiError;
use crate::helper::auth_helpers::{self, TokenKind, AUTH_COOKIE};

/// The caller behind a request, resolved from the auth token.
///
/// Extraction checks the `token` cookie first and falls back to an
/// `Authorization: Bearer` header so the API stays usable from non-browser
/// clients.
pub struct AuthenticatedUser {
    pub user_id: String,
}

impl FromRequest for AuthenticatedUser {
    type Error = ApiError;
    type Future = StdReady<Result<Self, Self::Error>>;

    fn from_request(req: &HttpRequest, _: &mut dev::Payload) -> Self::Future {
        let config = match req.app_data::<web::Data<Config>>() {
            Some(c) => c,
            None => {
                return ready(Err(ApiError::internal(
                    "Config is not registered as app data",
                    "missing web::Data<Config>",
                )));
            }
        };

        let token = req
            .cookie(AUTH_COOKIE)
            .map(|c| c.value().to_string())
            .or_else(|| {
                req.headers()
                    .get("Authorization")
                    .and_then(|v| v.to_str().ok())
                    .and_then(|s| s.strip_prefix("Bearer "))
                    .map(|s| s.trim().to_string())
            });

        let token = match token {
            Some(t) => t,
            None => {
                return ready(Err(ApiError::Authentication(
                    "Authentication required".to_string(),
                )))
            }
        };

        match auth_helpers::verify_token(&config.jwt_secret, &token, TokenKind::Auth) {
            Ok(user_id) => ready(Ok(AuthenticatedUser { user_id })),
            Err(message) => ready(Err(ApiError::Authentication(message))),
        }
    }
}

const CSRF_TOKEN_TTL_HOURS: i64 = 2;

/// Server-side half of the double-submit CSRF scheme. Keyed by an opaque
/// session id that travels in the `csrf_session` cookie; the matching token
/// travels in the response body and comes back in the `X-CSRF-Token` header.
pub struct CsrfStore {
    tokens: RwLock<HashMap<String, (String, DateTime<Utc>)>>,
}

impl CsrfStore {
    pub fn new() -> Self {
        CsrfStore {
            tokens: RwLock::new(HashMap::new()),
        }
    }

    /// Mints a fresh (session id, token) pair and evicts anything expired.
    pub fn issue(&self) -> (String, String) {
        let session_id = random_hex(16);
        let token = random_hex(32);
        let expires_at = Utc::now() + Duration::hours(CSRF_TOKEN_TTL_HOURS);

        let mut tokens = self.tokens.write().unwrap_or_else(|poisoned| {
            log::error!("RwLock for CSRF tokens was poisoned! Recovering.");
            poisoned.into_inner()
        });
        let now = Utc::now();
        tokens.retain(|_, (_, expiry)| *expiry > now);
        tokens.insert(session_id.clone(), (token.clone(), expires_at));
        (session_id, token)
    }

    pub fn validate(&self, session_id: &str, token: &str) -> bool {
        let tokens = self.tokens.read().unwrap_or_else(|poisoned| {
            log::error!("RwLock for CSRF tokens was poisoned! Recovering.");
            poisoned.into_inner()
        });
        match tokens.get(session_id) {
            Some((stored, expiry)) => *expiry > Utc::now() && stored == token,
            None => false,
        }
    }
}

impl Default for CsrfStore {
    fn default() -> Self {
        Self::new()
    }
}

fn random_hex(bytes: usize) -> String {
    let mut buf = vec![0u8; bytes];
    rand::thread_rng().fill_bytes(&mut buf);
    hex::encode(buf)
}

/// Rejects mutating requests that do not carry a valid CSRF token pair.
/// Safe methods pass through untouched.
pub struct CsrfProtection {
    store: Arc<CsrfStore>,
}

impl CsrfProtection {
    pub fn new(store: Arc<CsrfStore>) -> Self {
        CsrfProtection { store }
    }
}

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
        ok(CsrfProtectionMiddleware {
            service,
            store: self.store.clone(),
        })
    }
}

pub struct CsrfProtectionMiddleware<S> {
    service: S,
    store: Arc<CsrfStore>,
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
        let is_mutating = matches!(
            *req.method(),
            Method::POST | Method::PUT | Method::PATCH | Method::DELETE
        );

        if !is_mutating {
            let fut = self.service.call(req);
            return Box::pin(async move {
                let res = fut.await?;
                Ok(res.map_into_left_body())
            });
        }

        let session_id = req.cookie("csrf_session").map(|c| c.value().to_string());
        let header_token = req
            .headers()
            .get("X-CSRF-Token")
            .and_then(|v| v.to_str().ok())
            .map(|s| s.to_string());

        let is_valid = match (session_id, header_token) {
            (Some(session_id), Some(token)) => self.store.validate(&session_id, &token),
            _ => false,
        };

        if is_valid {
            let fut = self.service.call(req);
            Box::pin(async move {
                let res = fut.await?;
                Ok(res.map_into_left_body())
            })
        } else {
            Box::pin(async move {
                let (http_req, _payload) = req.into_parts();
                let res = HttpResponse::Forbidden()
                    .json(serde_json::json!({ "message": "Invalid or missing CSRF token" }))
                    .map_into_right_body();
                Ok(ServiceResponse::new(http_req, res))
            })
        }
    }
}

/// Sliding-window request counter keyed by client IP.
pub struct SlidingWindow {
    max_requests: usize,
    window: Duration,
    hits: RwLock<HashMap<String, Vec<DateTime<Utc>>>>,
}

impl SlidingWindow {
    pub fn new(max_requests: usize, window: Duration) -> Self {
        SlidingWindow {
            max_requests,
            window,
            hits: RwLock::new(HashMap::new()),
        }
    }

    /// Records a hit for `key` and reports whether it is still within the
    /// allowance.
    pub fn check(&self, key: &str) -> bool {
        let now = Utc::now();
        let cutoff = now - self.window;

        let mut hits = self.hits.write().unwrap_or_else(|poisoned| {
            log::error!("RwLock for rate limiter was poisoned! Recovering.");
            poisoned.into_inner()
        });
        hits.retain(|_, stamps| {
            stamps.retain(|t| *t > cutoff);
            !stamps.is_empty()
        });

        let stamps = hits.entry(key.to_string()).or_default();
        if stamps.len() >= self.max_requests {
            return false;
        }
        stamps.push(now);
        true
    }
}

/// Resolves the client IP, preferring `X-Forwarded-For` so the limits hold
/// behind a reverse proxy.
fn client_ip(req: &ServiceRequest) -> Option<String> {
    req.headers()
        .get("X-Forwarded-For")
        .and_then(|v| v.to_str().ok())
        .and_then(|s| s.split(',').next())
        .map(|s| s.trim().to_string())
        .or_else(|| req.peer_addr().map(|addr| addr.ip().to_string()))
}

pub struct RateLimit {
    limiter: Arc<SlidingWindow>,
}

impl RateLimit {
    pub fn new(limiter: Arc<SlidingWindow>) -> Self {
        RateLimit { limiter }
    }
}

impl<S, B> Transform<S, ServiceRequest> for RateLimit
where
    S: Service<ServiceRequest, Response = ServiceResponse<B>, Error = Error>,
    S::Future: 'static,
    B: 'static,
{
    type Response = ServiceResponse<EitherBody<B>>;
    type Error = Error;
    type InitError = ();
    type Transform = RateLimitMiddleware<S>;
    type Future = Ready<Result<Self::Transform, Self::InitError>>;

    fn new_transform(&self, service: S) -> Self::Future {
        ok(RateLimitMiddleware {
            service,
            limiter: self.limiter.clone(),
        })
    }
}

pub struct RateLimitMiddleware<S> {
    service: S,
    limiter: Arc<SlidingWindow>,
}

impl<S, B> Service<ServiceRequest> for RateLimitMiddleware<S>
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
        let allowed = match client_ip(&req) {
            Some(ip) => self.limiter.check(&ip),
            None => {
                log::warn!("Could not determine client IP for rate limiting; allowing request.");
                true
            }
        };

        if allowed {
            let fut = self.service.call(req);
            Box::pin(async move {
                let res = fut.await?;
                Ok(res.map_into_left_body())
            })
        } else {
            Box::pin(async move {
                let (http_req, _payload) = req.into_parts();
                let res = ApiError::RateLimited.error_response().map_into_right_body();
                Ok(ServiceResponse::new(http_req, res))
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn csrf_store_round_trip_and_rejections() {
        let store = CsrfStore::new();
        let (session_id, token) = store.issue();
        assert!(store.validate(&session_id, &token));
        assert!(!store.validate(&session_id, "wrong-token"));
        assert!(!store.validate("unknown-session", &token));
    }

    #[test]
    fn csrf_tokens_are_unique_per_issue() {
        let store = CsrfStore::new();
        let (s1, t1) = store.issue();
        let (s2, t2) = store.issue();
        assert_ne!(s1, s2);
        assert_ne!(t1, t2);
        assert!(store.validate(&s1, &t1));
        assert!(store.validate(&s2, &t2));
    }

    #[test]
    fn sliding_window_blocks_after_limit() {
        let limiter = SlidingWindow::new(3, Duration::minutes(15));
        assert!(limiter.check("10.0.0.1"));
        assert!(limiter.check("10.0.0.1"));
        assert!(limiter.check("10.0.0.1"));
        assert!(!limiter.check("10.0.0.1"));
        // Other clients are unaffected.
        assert!(limiter.check("10.0.0.2"));
    }

    #[test]
    fn sliding_window_forgets_old_hits() {
        let limiter = SlidingWindow::new(1, Duration::milliseconds(-1));
        // A window in the past means every prior hit is already stale.
        assert!(limiter.check("10.0.0.1"));
        assert!(limiter.check("10.0.0.1"));
    }
}

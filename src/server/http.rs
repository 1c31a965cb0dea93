//! HTTP server implementation
//!
//! hyper http1 with TokioIo; one task per connection. Bodies are buffered
//! under a size cap before routing so handlers work on plain bytes.

use bytes::Bytes;
use http_body_util::{BodyExt, Full, Limited};
use hyper::body::Incoming;
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper::{Method, Request, Response, StatusCode};
use hyper_util::rt::TokioIo;
use std::convert::Infallible;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;
use tokio::net::TcpListener;
use tracing::{debug, error, info, warn};

use super::reply::{Handled, Reply};
use super::request::ApiRequest;
use crate::audit::{AuditTrail, MemoryAuditStore};
use crate::auth::{Caller, JwtValidator};
use crate::cache::CacheLayer;
use crate::complaint::{ComplaintStateMachine, MemoryComplaintStore};
use crate::config::Args;
use crate::counter::{CounterStore, MemoryCounterStore};
use crate::db::MongoClient;
use crate::notify::{LogDispatcher, NotificationDispatcher};
use crate::ratelimit::{is_exempt_path, Admission, RateLimiter, RouteClass};
use crate::routes;
use crate::scheduler::AutoResolutionScheduler;
use crate::scoring::FallbackScorer;
use crate::types::{GrievanceError, Result};

/// Lifetime of dev tokens and the expiry checked on verification
pub const TOKEN_EXPIRY_SECS: u64 = 3600;

/// Shared application state
pub struct AppState {
    pub args: Args,
    pub complaints: Arc<ComplaintStateMachine>,
    pub limiter: RateLimiter,
    pub jwt: JwtValidator,
    pub scheduler: Arc<AutoResolutionScheduler>,
    /// Backs rate limits, the read cache and the sweep lease
    pub counters: Arc<dyn CounterStore>,
    pub notifier: Arc<dyn NotificationDispatcher>,
    pub mongo: Option<MongoClient>,
    pub started_at: Instant,
}

impl AppState {
    pub fn new(
        args: Args,
        complaints: Arc<ComplaintStateMachine>,
        counters: Arc<dyn CounterStore>,
        notifier: Arc<dyn NotificationDispatcher>,
    ) -> Result<Self> {
        let jwt = match &args.jwt_secret {
            Some(secret) => JwtValidator::new(secret.clone(), TOKEN_EXPIRY_SECS)?,
            None if args.dev_mode => JwtValidator::new_dev(),
            None => {
                return Err(GrievanceError::Config(
                    "JWT_SECRET is required in production mode".into(),
                ))
            }
        };

        let scheduler = Arc::new(AutoResolutionScheduler::new(
            Arc::clone(&complaints),
            Arc::clone(&counters),
            args.auto_resolve.enabled,
            args.auto_resolve.interval(),
            args.instance_id.to_string(),
        ));

        Ok(Self {
            limiter: RateLimiter::new(Arc::clone(&counters)),
            jwt,
            scheduler,
            counters,
            notifier,
            complaints,
            mongo: None,
            started_at: Instant::now(),
            args,
        })
    }

    /// State backed entirely by in-process stores (dev mode without
    /// MongoDB, and tests)
    pub fn in_memory(args: Args) -> Result<Self> {
        let counters: Arc<dyn CounterStore> = Arc::new(MemoryCounterStore::new());
        let cache = Arc::new(CacheLayer::new(
            Arc::clone(&counters),
            std::time::Duration::from_secs(args.cache_ttl_secs),
        ));
        let audit = Arc::new(AuditTrail::spawn(
            Arc::new(MemoryAuditStore::new()),
            args.audit_queue_capacity,
        ));
        let notifier: Arc<dyn NotificationDispatcher> = Arc::new(LogDispatcher);
        let complaints = Arc::new(
            ComplaintStateMachine::new(
                Arc::new(MemoryComplaintStore::new()),
                cache,
                audit,
                Arc::clone(&notifier),
                Arc::new(FallbackScorer::keyword_only()),
            )
            .with_stale_after(args.auto_resolve.stale_after()),
        );
        Self::new(args, complaints, counters, notifier)
    }

    pub fn with_limiter(mut self, limiter: RateLimiter) -> Self {
        self.limiter = limiter;
        self
    }

    pub fn with_mongo(mut self, mongo: MongoClient) -> Self {
        self.mongo = Some(mongo);
        self
    }

    pub fn cache(&self) -> &Arc<CacheLayer> {
        self.complaints.cache()
    }

    pub fn audit(&self) -> &Arc<AuditTrail> {
        self.complaints.audit()
    }

    pub fn authenticate(&self, req: &ApiRequest) -> Result<Caller> {
        self.jwt.authenticate(req.authorization())
    }

    /// Count a request against `class`; a rejection is a finished 429 reply
    pub async fn admit(
        &self,
        class: RouteClass,
        identity: &str,
    ) -> std::result::Result<Admission, Reply> {
        let admission = self.limiter.admit(class, identity).await;
        if admission.allowed {
            Ok(admission)
        } else {
            Err(Reply::rate_limited(class, admission))
        }
    }
}

/// Start the HTTP server
pub async fn run(state: Arc<AppState>) -> Result<()> {
    let listener = TcpListener::bind(state.args.listen).await?;

    info!(
        "Grievance listening on {} as instance {}",
        state.args.listen, state.args.instance_id
    );

    if state.args.dev_mode {
        warn!("Development mode enabled - dev JWT secret accepted");
    }

    loop {
        match listener.accept().await {
            Ok((stream, addr)) => {
                let state = Arc::clone(&state);
                tokio::spawn(async move {
                    let io = TokioIo::new(stream);

                    let service = service_fn(move |req| {
                        let state = Arc::clone(&state);
                        async move { handle_request(state, addr, req).await }
                    });

                    if let Err(err) = http1::Builder::new()
                        .serve_connection(io, service)
                        .await
                    {
                        debug!("Error serving connection from {}: {:?}", addr, err);
                    }
                });
            }
            Err(e) => {
                error!("Error accepting connection: {:?}", e);
            }
        }
    }
}

/// Buffer the body, then route under the request timeout
async fn handle_request(
    state: Arc<AppState>,
    addr: SocketAddr,
    req: Request<Incoming>,
) -> std::result::Result<Response<Full<Bytes>>, Infallible> {
    let (parts, body) = req.into_parts();
    let limit = state.args.max_body_bytes;

    let body = match Limited::new(body, limit).collect().await {
        Ok(collected) => collected.to_bytes(),
        Err(e) => {
            debug!(error = %e, "Rejected request body");
            let reply = Reply::json(
                StatusCode::PAYLOAD_TOO_LARGE,
                &serde_json::json!({
                    "success": false,
                    "error": format!("Request body exceeds {} bytes", limit),
                    "reason": "validation_failed",
                }),
            );
            return Ok(reply.into_response());
        }
    };

    let req = Request::from_parts(parts, body);
    let timeout = state.args.request_timeout();
    match tokio::time::timeout(timeout, route(state, addr, req)).await {
        Ok(response) => Ok(response),
        Err(_) => {
            warn!(timeout_ms = timeout.as_millis() as u64, "Request timed out");
            let reply = Reply::json(
                StatusCode::SERVICE_UNAVAILABLE,
                &serde_json::json!({
                    "success": false,
                    "error": "Request timed out",
                    "reason": "upstream_unavailable",
                }),
            );
            Ok(reply.into_response())
        }
    }
}

/// Route one buffered request. Applies the general rate limit, then
/// dispatches on method and path segments.
pub async fn route(
    state: Arc<AppState>,
    addr: SocketAddr,
    req: Request<Bytes>,
) -> Response<Full<Bytes>> {
    let req = ApiRequest::new(req, addr, &state.args.trusted_proxies);
    debug!("[{}] {} {}", req.client_ip, req.method, req.path);

    if req.method == Method::OPTIONS {
        return preflight_response();
    }

    let general = if is_exempt_path(&req.path) {
        None
    } else {
        match state.admit(RouteClass::General, &req.client_ip).await {
            Ok(admission) => Some(admission),
            Err(reply) => return reply.into_response(),
        }
    };

    let reply = match dispatch(&state, &req).await {
        Ok(reply) | Err(reply) => reply,
    };

    // A class-specific admission is the tighter one; report it instead
    let reply = match general {
        Some(admission) if reply.admission.is_none() => reply.with_admission(admission),
        _ => reply,
    };
    reply.into_response()
}

async fn dispatch(state: &AppState, req: &ApiRequest) -> Handled {
    let segments = req.segments();

    match (&req.method, segments.as_slice()) {
        (&Method::GET, ["health"]) => routes::health::health_check(state).await,

        (&Method::POST, ["auth", "send-otp"]) => routes::auth::send_otp(state, req).await,

        // Collection routes come before `:id` so literal segments win
        (&Method::POST, ["complaints"]) => routes::complaints::create(state, req).await,
        (&Method::GET, ["complaints"]) => routes::complaints::list_all(state, req).await,
        (&Method::GET, ["complaints", "mine"]) => routes::complaints::list_mine(state, req).await,
        (&Method::GET, ["complaints", "nearby"]) => {
            routes::complaints::nearby(state, req, None).await
        }
        (&Method::GET, ["complaints", "nearby", lat, lng]) => {
            routes::complaints::nearby(state, req, Some((*lat, *lng))).await
        }
        (&Method::POST, ["complaints", "trigger-auto-resolution"]) => {
            routes::complaints::trigger_auto_resolution(state, req).await
        }

        (&Method::GET, ["complaints", id]) => routes::complaints::get(state, req, id).await,
        (&Method::GET, ["complaints", id, "history"]) => {
            routes::complaints::history(state, req, id).await
        }
        (&Method::POST, ["complaints", id, "upvote"]) => {
            routes::complaints::upvote(state, req, id).await
        }
        (&Method::POST, ["complaints", id, "confirm_resolution" | "confirm-resolution"]) => {
            routes::complaints::confirm_resolution(state, req, id).await
        }
        (&Method::POST, ["complaints", id, "refile"]) => {
            routes::complaints::refile(state, req, id).await
        }
        (&Method::PATCH | &Method::POST | &Method::PUT, ["complaints", id, "status"]) => {
            routes::complaints::update_status(state, req, id).await
        }
        (&Method::POST, ["complaints", id, "escalate"]) => {
            routes::complaints::escalate(state, req, id).await
        }

        (&Method::GET, ["audit-logs"]) => routes::audit_logs::list(state, req).await,
        (&Method::GET, ["audit-logs", "export"]) => routes::audit_logs::export(state, req).await,
        (&Method::GET, ["audit-logs", "stats"]) => routes::audit_logs::stats(state, req).await,
        (&Method::GET, ["audit-logs", "users", user_id]) => {
            routes::audit_logs::user_activity(state, req, user_id).await
        }
        (&Method::GET, ["audit-logs", "departments", department_id]) => {
            routes::audit_logs::department_activity(state, req, department_id).await
        }

        _ => Err(Reply::not_found(&req.path)),
    }
}

/// CORS preflight response
fn preflight_response() -> Response<Full<Bytes>> {
    let mut response = Reply::no_content().into_response();
    let headers = response.headers_mut();
    headers.insert(
        "access-control-allow-headers",
        hyper::header::HeaderValue::from_static("Content-Type, Authorization"),
    );
    headers.insert(
        "access-control-allow-methods",
        hyper::header::HeaderValue::from_static("GET, POST, PATCH, PUT, OPTIONS"),
    );
    headers.insert(
        "access-control-max-age",
        hyper::header::HeaderValue::from_static("86400"),
    );
    response
}

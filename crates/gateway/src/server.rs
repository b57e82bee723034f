//! Router construction and the HTTP middleware stack (§4.K). Grounded in the
//! teacher's `server.rs`: same layer ordering, same CORS and security-header
//! treatment, generalized to the chat core's routes.

use axum::{
    Json, Router,
    extract::{Request, State},
    http::{HeaderValue, StatusCode, header},
    response::IntoResponse,
    routing::get,
};
use tower_http::{
    LatencyUnit,
    catch_panic::CatchPanicLayer,
    compression::CompressionLayer,
    cors::{AllowOrigin, Any, CorsLayer},
    request_id::{MakeRequestUuid, PropagateRequestIdLayer, SetRequestIdLayer},
    sensitive_headers::SetSensitiveHeadersLayer,
    set_header::SetResponseHeaderLayer,
    trace::{DefaultOnRequest, DefaultOnResponse, TraceLayer},
};
use tracing::Level;

use crate::{middleware::rate_limit_gate, state::AppState, ws};

/// 2 MiB request body limit; large enough for any chat payload this core
/// defines, small enough to bound abuse (§4.K, matches the teacher's limit).
const REQUEST_BODY_LIMIT: usize = 2 * 1024 * 1024;

/// Build the full gateway router: routes, state, and middleware stack.
#[must_use]
pub fn build_router(state: AppState) -> Router {
    let cors = build_cors_layer(&state);
    let http_request_logs = state.config.server.http_request_logs;

    let router = Router::new()
        .route("/health", get(health_handler))
        .route("/metrics", get(metrics_handler))
        .route("/ws/chat", get(ws::ws_upgrade_handler))
        .nest("/api/auth", crate::auth_routes::router());

    let router = router
        .layer(axum::middleware::from_fn_with_state(state.clone(), rate_limit_gate))
        .with_state(state);

    apply_middleware_stack(router, cors, http_request_logs)
}

/// Same-origin CORS: validates the `Origin` header against the configured
/// allow-list rather than reflecting `Any`, per §4.K's production refusal of
/// a wildcard (enforced at config-validation time, not here).
fn build_cors_layer(state: &AppState) -> CorsLayer {
    let allowed = &state.config.cors.allowed_origins;
    if allowed.iter().any(|o| o == "*") {
        return CorsLayer::new().allow_origin(Any).allow_methods(Any).allow_headers(Any);
    }

    let origins: Vec<HeaderValue> = allowed.iter().filter_map(|o| HeaderValue::from_str(o).ok()).collect();
    CorsLayer::new()
        .allow_origin(AllowOrigin::list(origins))
        .allow_methods(Any)
        .allow_headers(Any)
}

/// Layer order (outermost -> innermost for requests), matching the teacher.
/// `.layer()` wraps *outside* whatever was added before it, so the calls
/// below run bottom-to-top against an incoming request:
/// 1. `CatchPanicLayer` — converts handler panics to 500s
/// 2. `SetSensitiveHeadersLayer` — redacts Authorization/Cookie/Set-Cookie from traces
/// 3. `SetRequestIdLayer` — generates `x-request-id` before tracing
/// 4. `TraceLayer` (optional) — logs requests with the redacted headers
/// 5. Security response headers
/// 6. `PropagateRequestIdLayer` — copies `x-request-id` to the response
/// 7. `CorsLayer` — security headers must wrap CORS so a preflight response
///    CORS answers directly still picks them up on the way out
/// 8. `RequestBodyLimitLayer`
/// 9. `CompressionLayer` (innermost)
fn apply_middleware_stack(router: Router, cors: CorsLayer, http_request_logs: bool) -> Router {
    let router = router
        .layer(CompressionLayer::new())
        .layer(tower_http::limit::RequestBodyLimitLayer::new(REQUEST_BODY_LIMIT))
        .layer(cors)
        .layer(PropagateRequestIdLayer::x_request_id())
        .layer(SetResponseHeaderLayer::overriding(
            header::HeaderName::from_static("x-content-type-options"),
            HeaderValue::from_static("nosniff"),
        ))
        .layer(SetResponseHeaderLayer::overriding(
            header::HeaderName::from_static("x-frame-options"),
            HeaderValue::from_static("deny"),
        ))
        .layer(SetResponseHeaderLayer::overriding(
            header::HeaderName::from_static("referrer-policy"),
            HeaderValue::from_static("strict-origin-when-cross-origin"),
        ));

    let router = apply_http_trace_layer(router, http_request_logs);

    router
        .layer(SetRequestIdLayer::x_request_id(MakeRequestUuid))
        .layer(SetSensitiveHeadersLayer::new([
            header::AUTHORIZATION,
            header::COOKIE,
            header::SET_COOKIE,
        ]))
        .layer(CatchPanicLayer::new())
}

fn apply_http_trace_layer(router: Router, enabled: bool) -> Router {
    if !enabled {
        return router;
    }
    let http_trace = TraceLayer::new_for_http()
        .make_span_with(|request: &Request| {
            let request_id = request
                .headers()
                .get("x-request-id")
                .and_then(|v| v.to_str().ok())
                .unwrap_or("-")
                .to_owned();
            tracing::info_span!(
                "http_request",
                method = %request.method(),
                uri = %request.uri(),
                request_id = %request_id,
            )
        })
        .on_request(DefaultOnRequest::new().level(Level::INFO))
        .on_response(DefaultOnResponse::new().level(Level::INFO).latency_unit(LatencyUnit::Millis));
    router.layer(http_trace)
}

/// Aggregates each subsystem's own probe into one body (§4.K "Health endpoint
/// composition"): `status` is `"down"` only if every dependency is
/// unhealthy, `"degraded"` if at least one circuit breaker is open, else
/// `"ok"` — mirroring the teacher's `metrics_routes.rs` composing several
/// subsystem snapshots into one JSON response.
async fn health_handler(State(state): State<AppState>) -> impl IntoResponse {
    let session_store = state.hub.session_store_health().await;
    let message_broker = state.broker.health_check().await;
    let generator = state.orchestrator.matcher().generator_health().await;
    let rate_limiter_ok = !state.http_rate_limiter.circuit_open();
    let degraded = state.http_rate_limiter.circuit_open() || state.orchestrator.matcher().any_circuit_open();

    let healthy_count = [session_store.healthy, message_broker, generator, rate_limiter_ok]
        .iter()
        .filter(|ok| **ok)
        .count();
    let status = if healthy_count == 0 {
        "down"
    } else if degraded || healthy_count < 4 {
        "degraded"
    } else {
        "ok"
    };

    Json(serde_json::json!({
        "status": status,
        "session_store": { "healthy": session_store.healthy, "latency_ms": session_store.latency_ms },
        "message_broker": { "healthy": message_broker },
        "rate_limiter": { "healthy": rate_limiter_ok },
        "generator": { "healthy": generator },
    }))
}

/// Unauthenticated by design, matching the teacher's scrape endpoint — a
/// text body that is empty when the `prometheus` feature isn't compiled in.
async fn metrics_handler(State(state): State<AppState>) -> impl IntoResponse {
    (StatusCode::OK, state.metrics_handle.render())
}

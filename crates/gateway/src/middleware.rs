//! Request-level admission control (§4.B, §4.K): classifies each HTTP
//! request by path/method into a `chatcore_ratelimit::EndpointClass` and
//! runs it past the shared rate limiter before the handler sees it. Mirrors
//! the teacher's `request_throttle::throttle_gate`, but delegates the actual
//! sliding-window bookkeeping to `chatcore-ratelimit` instead of keeping a
//! second, gateway-local window.

use axum::{
    body::Body,
    extract::{ConnectInfo, State},
    http::{Method, Request, StatusCode},
    middleware::Next,
    response::{IntoResponse, Json, Response},
};
use chatcore_ratelimit::{EndpointClass, RateDecision};

use crate::{client_ip::resolve_client_ip, state::AppState};

fn classify(method: &Method, path: &str) -> Option<EndpointClass> {
    if path == "/api/auth/login" && method == Method::POST {
        return Some(EndpointClass::Login);
    }
    if path.starts_with("/api/auth/") {
        return Some(EndpointClass::AuthApi);
    }
    if path.starts_with("/api/") || path == "/ws/chat" {
        return Some(EndpointClass::General);
    }
    None
}

pub async fn rate_limit_gate(
    State(state): State<AppState>,
    ConnectInfo(peer): ConnectInfo<std::net::SocketAddr>,
    request: Request<Body>,
    next: Next,
) -> Response {
    let method = request.method().clone();
    let path = request.uri().path().to_owned();
    let Some(class) = classify(&method, &path) else {
        return next.run(request).await;
    };

    let client_ip = resolve_client_ip(request.headers(), peer);
    match state.http_rate_limiter.check(client_ip, class).await {
        RateDecision::Allowed => next.run(request).await,
        RateDecision::Denied { retry_after } => rate_limited_response(&path, retry_after.as_secs().max(1)),
    }
}

fn rate_limited_response(path: &str, retry_after_seconds: u64) -> Response {
    let mut response = if path.starts_with("/api/") {
        (
            StatusCode::TOO_MANY_REQUESTS,
            Json(serde_json::json!({
                "error": "too many requests",
                "retry_after_seconds": retry_after_seconds,
            })),
        )
            .into_response()
    } else {
        (
            StatusCode::TOO_MANY_REQUESTS,
            format!("too many requests, retry after {retry_after_seconds}s"),
        )
            .into_response()
    };

    if let Ok(value) = retry_after_seconds.to_string().parse() {
        response.headers_mut().insert(axum::http::header::RETRY_AFTER, value);
    }
    response
}

#[cfg(test)]
mod tests {
    use axum::http::Method;

    use super::*;

    #[test]
    fn classifies_login_as_login_class() {
        assert_eq!(classify(&Method::POST, "/api/auth/login"), Some(EndpointClass::Login));
    }

    #[test]
    fn classifies_other_auth_routes_as_auth_api() {
        assert_eq!(classify(&Method::POST, "/api/auth/refresh"), Some(EndpointClass::AuthApi));
    }

    #[test]
    fn classifies_ws_upgrade_as_general() {
        assert_eq!(classify(&Method::GET, "/ws/chat"), Some(EndpointClass::General));
    }

    #[test]
    fn health_is_not_throttled() {
        assert_eq!(classify(&Method::GET, "/health"), None);
    }
}

//! `/api/auth/*` handlers (§4.F, §6): login, refresh, logout, and the
//! current-session probe. Grounded in the teacher's `auth_routes.rs`, but
//! built on `axum_extra`'s typed `CookieJar` rather than the teacher's raw
//! `Set-Cookie` header strings, and delegating all token bookkeeping to
//! `chatcore_auth::AuthService` instead of a sqlx-backed `CredentialStore`.

use axum::{
    Json, Router,
    extract::{ConnectInfo, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
};
use axum_extra::extract::{
    CookieJar,
    cookie::{Cookie, SameSite},
};
use chatcore_auth::Error as AuthError;
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;

use crate::{client_ip::resolve_client_ip, state::AppState};

pub const ACCESS_COOKIE: &str = "chatcore_access";
pub const REFRESH_COOKIE: &str = "chatcore_refresh";

#[must_use]
pub fn router() -> Router<AppState> {
    Router::new()
        .route("/login", post(login_handler))
        .route("/refresh", post(refresh_handler))
        .route("/logout", post(logout_handler))
        .route("/me", get(me_handler))
}

#[derive(Debug, Deserialize)]
struct LoginRequest {
    username: String,
    password: String,
}

#[derive(Debug, Serialize)]
struct SessionResponse {
    user_id: String,
    username: String,
}

async fn login_handler(
    State(state): State<AppState>,
    ConnectInfo(peer): ConnectInfo<SocketAddr>,
    headers: axum::http::HeaderMap,
    jar: CookieJar,
    Json(body): Json<LoginRequest>,
) -> Response {
    let client_ip = resolve_client_ip(&headers, peer);
    match state.auth.login(client_ip, &body.username, &body.password, state.user_directory.as_ref()).await {
        Ok(result) => {
            let jar = jar
                .add(access_cookie(&state, result.access_token))
                .add(refresh_cookie(&state, result.refresh_token_id));
            (
                jar,
                Json(SessionResponse {
                    user_id: result.user_id,
                    username: result.username,
                }),
            )
                .into_response()
        },
        Err(error) => auth_error_response(error),
    }
}

async fn refresh_handler(State(state): State<AppState>, jar: CookieJar) -> Response {
    let Some(refresh_token_id) = jar.get(REFRESH_COOKIE).map(|c| c.value().to_string()) else {
        return (StatusCode::UNAUTHORIZED, "missing refresh token").into_response();
    };
    match state.auth.refresh(&refresh_token_id).await {
        Ok(result) => {
            let jar = jar
                .add(access_cookie(&state, result.access_token))
                .add(refresh_cookie(&state, result.refresh_token_id));
            (jar, StatusCode::NO_CONTENT).into_response()
        },
        Err(error) => auth_error_response(error),
    }
}

async fn logout_handler(State(state): State<AppState>, jar: CookieJar) -> Response {
    if let Some(refresh_token_id) = jar.get(REFRESH_COOKIE).map(|c| c.value().to_string()) {
        let _ = state.auth.logout(&refresh_token_id).await;
    }
    let jar = jar.remove(Cookie::from(ACCESS_COOKIE)).remove(Cookie::from(REFRESH_COOKIE));
    (jar, StatusCode::NO_CONTENT).into_response()
}

async fn me_handler(State(state): State<AppState>, jar: CookieJar) -> Response {
    let Some(access_token) = jar.get(ACCESS_COOKIE).map(|c| c.value().to_string()) else {
        return (StatusCode::UNAUTHORIZED, "missing access token").into_response();
    };
    match state.auth.verify_access_token(&access_token) {
        Ok(claims) => Json(SessionResponse {
            user_id: claims.user_id,
            username: claims.username,
        })
        .into_response(),
        Err(error) => auth_error_response(error),
    }
}

fn access_cookie(state: &AppState, token: String) -> Cookie<'static> {
    Cookie::build((ACCESS_COOKIE, token))
        .http_only(true)
        .secure(state.config.is_production())
        .same_site(SameSite::Strict)
        .path("/")
        .max_age(time::Duration::seconds(state.config.auth.access_token_ttl_seconds as i64))
        .build()
}

fn refresh_cookie(state: &AppState, token_id: String) -> Cookie<'static> {
    Cookie::build((REFRESH_COOKIE, token_id))
        .http_only(true)
        .secure(state.config.is_production())
        .same_site(SameSite::Strict)
        .path("/api/auth")
        .max_age(time::Duration::seconds(state.config.auth.refresh_token_ttl_seconds as i64))
        .build()
}

fn auth_error_response(error: AuthError) -> Response {
    let status = StatusCode::from_u16(error.status_code()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
    let body: chatcore_protocol::ErrorBody = error.into();
    (status, Json(body)).into_response()
}

//! Gateway: the HTTP/WebSocket frontend (§4.K).
//!
//! Lifecycle:
//! 1. Load + validate config (refuses to start in production on a fatal diagnostic)
//! 2. Construct the shared subsystems (`AppState`)
//! 3. Build the router: `/health`, `/ws/chat`, `/api/auth/*`, optional `/metrics`
//! 4. Bind and serve, with a graceful shutdown that drains the connection hub
//!
//! Everything downstream of the WebSocket upgrade and the auth routes is core
//! logic living in `chatcore-hub`, `chatcore-orchestrator`, and `chatcore-auth`;
//! this crate only wires HTTP/WS transport to those services.

pub mod client_ip;
pub mod middleware;
pub mod server;
pub mod state;
pub mod user_directory;
pub mod ws;

pub mod auth_routes;

pub use state::AppState;

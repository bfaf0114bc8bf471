//! Web API 层。
//!
//! 提供 Axum 路由，将 HTTP / WebSocket 请求委托给应用层的用例服务。

mod auth;
mod client_ip;
mod error;
mod routes;
mod state;
mod ws_connection;

pub use auth::{Claims, JwtService, LoginResponse, RefreshClaims};
pub use client_ip::client_ip;
pub use config::JwtConfig;
pub use error::{ApiError, ErrorBody};
pub use routes::router;
pub use state::AppState;

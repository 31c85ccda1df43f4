//! Web API 层。
//!
//! 提供 Axum 路由：`/chatHub` 上的 WebSocket 实时中继，文件上传下载，
//! 以及对文件路由生效的带宽限速中间件。

mod bandwidth;
mod error;
mod files;
mod identity;
mod routes;
mod state;
mod ws_connection;

pub use bandwidth::{limit_bandwidth, matches_target, throttle_body};
pub use error::ApiError;
pub use routes::router;
pub use state::AppState;

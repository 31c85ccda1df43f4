//! 握手请求中的用户身份
//!
//! 身份认证由外部机制完成，这里只读取它写入的请求头。

use axum::http::HeaderMap;
use domain::UserId;

/// 读取请求头中的用户ID；缺失或无法解析时返回 `None`
pub fn user_from_headers(headers: &HeaderMap, header_name: &str) -> Option<UserId> {
    let raw = headers.get(header_name)?.to_str().ok()?;
    match raw.trim().parse::<i64>() {
        Ok(id) => Some(UserId(id)),
        Err(err) => {
            tracing::warn!(header = header_name, value = raw, error = %err, "无法解析用户ID请求头");
            None
        }
    }
}

//! 带宽限速中间件
//!
//! 请求路径命中配置的前缀（不区分大小写）时：POST/PUT 的请求体按上传速率读取，
//! GET 的响应体按下载速率发送，其余方法原样放行。
//! 请求体被丢弃（客户端中止）时，正在进行的等待随之取消。

use std::io;

use axum::{
    body::Body,
    extract::{Request, State},
    http::Method,
    middleware::Next,
    response::Response,
};
use config::BandwidthConfig;
use futures_util::TryStreamExt;
use infrastructure::{ThrottledStream, TransferDirection};
use tokio_util::io::{ReaderStream, StreamReader};

use crate::state::AppState;

/// 路径是否需要限速
pub fn matches_target(config: &BandwidthConfig, path: &str) -> bool {
    let path = path.to_ascii_lowercase();
    config
        .target_path_prefixes
        .iter()
        .any(|prefix| path.starts_with(&prefix.to_ascii_lowercase()))
}

/// 把 HTTP 消息体包装为限速流
pub fn throttle_body(body: Body, rate_kbps: i64, direction: TransferDirection) -> Body {
    let reader = StreamReader::new(body.into_data_stream().map_err(io::Error::other));
    let throttled = ThrottledStream::new(reader, rate_kbps, direction);
    Body::from_stream(ReaderStream::new(throttled))
}

pub async fn limit_bandwidth(
    State(state): State<AppState>,
    request: Request,
    next: Next,
) -> Response {
    let config = state.bandwidth.clone();
    if !config.enabled || !matches_target(&config, request.uri().path()) {
        return next.run(request).await;
    }

    let method = request.method().clone();
    let request = if method == Method::POST || method == Method::PUT {
        tracing::debug!(
            path = %request.uri().path(),
            rate_kbps = config.max_upload_rate_kbps,
            "上传限速"
        );
        request.map(|body| {
            throttle_body(body, config.max_upload_rate_kbps, TransferDirection::Upload)
        })
    } else {
        request
    };

    let response = next.run(request).await;

    if method == Method::GET {
        tracing::debug!(rate_kbps = config.max_download_rate_kbps, "下载限速");
        response.map(|body| {
            throttle_body(body, config.max_download_rate_kbps, TransferDirection::Download)
        })
    } else {
        response
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::to_bytes;

    #[test]
    fn prefix_match_ignores_case() {
        let config = BandwidthConfig::default();
        assert!(matches_target(&config, "/api/files/report.pdf"));
        assert!(matches_target(&config, "/API/Files/report.pdf"));
        assert!(!matches_target(&config, "/api/users/1"));
        assert!(!matches_target(&config, "/chatHub"));
    }

    #[test]
    fn empty_prefix_list_matches_nothing() {
        assert!(!matches_target(&BandwidthConfig::unlimited(), "/api/files/a"));
    }

    #[tokio::test(start_paused = true)]
    async fn throttled_body_keeps_content_and_paces() {
        let payload = vec![3u8; 300 * 1024];
        let started = tokio::time::Instant::now();

        let body = throttle_body(Body::from(payload.clone()), 100, TransferDirection::Download);
        let bytes = to_bytes(body, usize::MAX).await.unwrap();

        assert_eq!(bytes.as_ref(), payload.as_slice());
        assert!(started.elapsed() >= std::time::Duration::from_millis(1_900));
    }
}

//! 主应用程序入口
//!
//! 加载配置，装配中继服务并启动 Axum Web 服务。

use std::sync::Arc;

use application::{
    ConnectionHub, ConnectionRegistry, MessageRelay, MessageRelayDependencies,
    PresenceBroadcaster, SystemClock,
};
use config::AppConfig;
use infrastructure::InMemoryChatStore;
use tracing_subscriber::EnvFilter;
use web_api::{router, AppState};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // 初始化日志，未设置 RUST_LOG 时默认 info
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let config = AppConfig::load()?;
    tracing::info!(
        bandwidth_enabled = config.bandwidth.enabled,
        upload_kbps = config.bandwidth.max_upload_rate_kbps,
        download_kbps = config.bandwidth.max_download_rate_kbps,
        upload_dir = %config.storage.upload_dir,
        "配置已加载"
    );

    // 消息与用户存储使用同一个内存实现
    let store = Arc::new(InMemoryChatStore::new());

    let registry = Arc::new(ConnectionRegistry::new());
    let hub = Arc::new(ConnectionHub::new(registry, config.relay.outbound_buffer));
    let presence = Arc::new(PresenceBroadcaster::new(hub.clone(), store.clone()));
    let relay = Arc::new(MessageRelay::new(MessageRelayDependencies {
        hub,
        presence,
        messages: store,
        clock: Arc::new(SystemClock),
    }));

    let app = router(AppState::new(relay, &config));
    let address = config.server.bind_address();
    let listener = tokio::net::TcpListener::bind(&address).await?;

    tracing::info!("中继服务器启动在 http://{address}");
    axum::serve(listener, app).await?;

    Ok(())
}

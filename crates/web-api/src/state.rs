use std::path::PathBuf;
use std::sync::Arc;

use application::MessageRelay;
use config::{AppConfig, BandwidthConfig};

#[derive(Clone)]
pub struct AppState {
    pub relay: Arc<MessageRelay>,
    pub bandwidth: Arc<BandwidthConfig>,
    /// 握手时读取用户ID的请求头，已转为小写
    pub identity_header: Arc<str>,
    pub upload_dir: Arc<PathBuf>,
}

impl AppState {
    pub fn new(relay: Arc<MessageRelay>, config: &AppConfig) -> Self {
        Self {
            relay,
            bandwidth: Arc::new(config.bandwidth.clone()),
            identity_header: Arc::from(config.relay.identity_header.to_ascii_lowercase()),
            upload_dir: Arc::new(PathBuf::from(&config.storage.upload_dir)),
        }
    }
}

#![allow(dead_code)]

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use application::{
    ConnectionHub, ConnectionRegistry, MessageRelay, MessageRelayDependencies,
    PresenceBroadcaster, SystemClock,
};
use config::AppConfig;
use futures_util::StreamExt;
use infrastructure::InMemoryChatStore;
use serde_json::Value;
use tokio::{net::TcpListener, sync::oneshot, time::sleep};
use tokio_tungstenite::{
    tungstenite::Message as TungsteniteMessage, MaybeTlsStream, WebSocketStream,
};
use web_api::{router, AppState};

pub type WsClient = WebSocketStream<MaybeTlsStream<tokio::net::TcpStream>>;

/// 在随机端口上运行的完整服务
pub struct TestServer {
    pub addr: SocketAddr,
    pub store: Arc<InMemoryChatStore>,
    pub upload_dir: PathBuf,
    shutdown: Option<oneshot::Sender<()>>,
}

impl TestServer {
    pub async fn start(mut config: AppConfig) -> Self {
        let nanos = std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .unwrap()
            .as_nanos();
        let upload_dir = std::env::temp_dir().join(format!(
            "chat-relay-test-{}-{}",
            std::process::id(),
            nanos
        ));
        config.storage.upload_dir = upload_dir.to_string_lossy().into_owned();

        let store = Arc::new(InMemoryChatStore::new());
        let hub = Arc::new(ConnectionHub::new(
            Arc::new(ConnectionRegistry::new()),
            config.relay.outbound_buffer,
        ));
        let presence = Arc::new(PresenceBroadcaster::new(hub.clone(), store.clone()));
        let relay = Arc::new(MessageRelay::new(MessageRelayDependencies {
            hub,
            presence,
            messages: store.clone(),
            clock: Arc::new(SystemClock),
        }));
        let app = router(AppState::new(relay, &config));

        let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
        let addr = listener.local_addr().expect("addr");
        let (shutdown_tx, shutdown_rx) = oneshot::channel::<()>();

        tokio::spawn(async move {
            axum::serve(listener, app.into_make_service())
                .with_graceful_shutdown(async {
                    let _ = shutdown_rx.await;
                })
                .await
                .ok();
        });

        // 等待服务器启动
        sleep(Duration::from_millis(50)).await;

        Self {
            addr,
            store,
            upload_dir,
            shutdown: Some(shutdown_tx),
        }
    }

    pub fn http(&self, path: &str) -> String {
        format!("http://{}{}", self.addr, path)
    }

    pub fn ws_url(&self) -> String {
        format!("ws://{}/chatHub", self.addr)
    }
}

impl Drop for TestServer {
    fn drop(&mut self) {
        if let Some(shutdown) = self.shutdown.take() {
            let _ = shutdown.send(());
        }
        let _ = std::fs::remove_dir_all(&self.upload_dir);
    }
}

/// 读取下一条服务端事件，跳过控制帧
pub async fn next_event(ws: &mut WsClient) -> Value {
    loop {
        let frame = tokio::time::timeout(Duration::from_secs(2), ws.next())
            .await
            .expect("timed out waiting for event")
            .expect("socket closed")
            .expect("socket error");
        if let TungsteniteMessage::Text(text) = frame {
            return serde_json::from_str(text.as_str()).expect("event json");
        }
    }
}

/// 断言短时间内没有新事件
pub async fn assert_silent(ws: &mut WsClient) {
    let result = tokio::time::timeout(Duration::from_millis(150), ws.next()).await;
    if let Ok(Some(Ok(TungsteniteMessage::Text(text)))) = result {
        panic!("unexpected event: {}", text.as_str());
    }
}

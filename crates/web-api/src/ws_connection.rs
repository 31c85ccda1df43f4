use std::ops::ControlFlow;
use std::sync::Arc;

use application::{MessageRelay, RelayError};
use axum::body::Bytes;
use axum::extract::ws::{Message as WsMessage, WebSocket};
use domain::{ClientCommand, ConnectionId, ServerEvent, UserId};
use futures_util::{SinkExt, StreamExt};
use tokio::sync::mpsc;

/// WebSocket 连接
///
/// 一个连接对应一个 [`ConnectionId`]：
/// - 发送任务把中继投递到出站队列的事件写成 JSON 文本帧
/// - 接收任务把文本帧解析为客户端命令交给中继执行
/// - 任一任务结束即视为断开，断开只清理一次
pub struct WebSocketConnection {
    socket: WebSocket,
    relay: Arc<MessageRelay>,
    connection_id: ConnectionId,
    outbound: mpsc::Receiver<ServerEvent>,
}

impl WebSocketConnection {
    /// 接入中继；握手时已知用户身份则直接加入聊天
    pub async fn open(socket: WebSocket, relay: Arc<MessageRelay>, user_id: Option<UserId>) -> Self {
        let connection_id = ConnectionId::new();
        let outbound = relay.connected(connection_id);
        tracing::info!(connection_id = %connection_id, "WebSocket 连接已建立");

        if let Some(user_id) = user_id {
            relay.join_chat(connection_id, user_id).await;
        }

        Self {
            socket,
            relay,
            connection_id,
            outbound,
        }
    }

    pub async fn run(self) {
        let Self {
            socket,
            relay,
            connection_id,
            mut outbound,
        } = self;
        let (mut sender, mut incoming) = socket.split();

        // 接收任务发出的控制帧
        let (cmd_tx, mut cmd_rx) = mpsc::channel::<WsCommand>(32);

        let mut send_task = tokio::spawn(async move {
            loop {
                let frame = tokio::select! {
                    Some(cmd) = cmd_rx.recv() => match cmd {
                        WsCommand::SendPong(data) => WsMessage::Pong(data),
                    },
                    event = outbound.recv() => {
                        let Some(event) = event else { break };
                        match event.to_json() {
                            Ok(json) => WsMessage::Text(json.into()),
                            Err(err) => {
                                tracing::warn!(error = %err, event = event.name(), "事件序列化失败");
                                continue;
                            }
                        }
                    }
                };
                if sender.send(frame).await.is_err() {
                    tracing::debug!(connection_id = %connection_id, "WebSocket 写入失败");
                    break;
                }
            }
            if let Err(err) = sender.close().await {
                tracing::debug!(connection_id = %connection_id, error = %err, "关闭 WebSocket 失败");
            }
        });

        let mut recv_task = tokio::spawn({
            let relay = relay.clone();
            async move {
                while let Some(message) = incoming.next().await {
                    let message = match message {
                        Ok(message) => message,
                        Err(err) => {
                            tracing::debug!(connection_id = %connection_id, error = %err, "WebSocket 读取失败");
                            break;
                        }
                    };
                    if handle_incoming(&relay, connection_id, message, &cmd_tx)
                        .await
                        .is_break()
                    {
                        break;
                    }
                }
            }
        });

        tokio::select! {
            _ = &mut send_task => {
                tracing::debug!(connection_id = %connection_id, "WebSocket 发送任务结束");
                recv_task.abort();
            }
            _ = &mut recv_task => {
                tracing::debug!(connection_id = %connection_id, "WebSocket 接收任务结束");
                send_task.abort();
            }
        }

        let removal = relay.disconnected(connection_id).await;
        tracing::info!(
            connection_id = %connection_id,
            user_id = ?removal.map(|r| r.user_id),
            "WebSocket 连接已断开"
        );
    }
}

/// 处理一帧客户端消息，`Break` 表示连接应当结束
async fn handle_incoming(
    relay: &MessageRelay,
    connection_id: ConnectionId,
    message: WsMessage,
    cmd_tx: &mpsc::Sender<WsCommand>,
) -> ControlFlow<()> {
    match message {
        WsMessage::Text(text) => match ClientCommand::from_json(text.as_str()) {
            Ok(command) => relay.dispatch(connection_id, command).await,
            Err(err) => {
                relay.report_error(connection_id, &RelayError::InvalidCommand(err.to_string()))
            }
        },
        WsMessage::Binary(_) => relay.report_error(
            connection_id,
            &RelayError::InvalidCommand("binary frames are not supported".into()),
        ),
        WsMessage::Ping(data) => {
            if cmd_tx.send(WsCommand::SendPong(data)).await.is_err() {
                return ControlFlow::Break(());
            }
        }
        WsMessage::Pong(_) => {}
        WsMessage::Close(_) => {
            tracing::debug!(connection_id = %connection_id, "收到关闭帧");
            return ControlFlow::Break(());
        }
    }
    ControlFlow::Continue(())
}

/// 发送任务的写命令
#[derive(Debug)]
enum WsCommand {
    SendPong(Bytes),
}

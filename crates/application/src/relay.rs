//! 消息中继
//!
//! 处理客户端命令：身份从注册表解析，持久化委托给外部消息存储，
//! 生命周期事件（已发送、已接收、已送达、已读）和输入状态通过用户组扇出。
//! 任何操作错误都只转换成发给调用方连接的 `Error` 事件，不会断开连接。

use std::sync::Arc;

use domain::{
    ClientCommand, ConnectionId, Message, MessageId, MessageStore, SendMessageRequest, ServerEvent,
    UserId,
};
use tokio::sync::mpsc;

use crate::broadcaster::ConnectionHub;
use crate::clock::Clock;
use crate::error::RelayError;
use crate::presence::PresenceBroadcaster;
use crate::registry::{ConnectionRegistry, Registration, Removal};

/// 中继依赖
pub struct MessageRelayDependencies {
    pub hub: Arc<ConnectionHub>,
    pub presence: Arc<PresenceBroadcaster>,
    pub messages: Arc<dyn MessageStore>,
    pub clock: Arc<dyn Clock>,
}

pub struct MessageRelay {
    registry: Arc<ConnectionRegistry>,
    hub: Arc<ConnectionHub>,
    presence: Arc<PresenceBroadcaster>,
    messages: Arc<dyn MessageStore>,
    clock: Arc<dyn Clock>,
}

impl MessageRelay {
    pub fn new(deps: MessageRelayDependencies) -> Self {
        Self {
            registry: deps.hub.registry().clone(),
            hub: deps.hub,
            presence: deps.presence,
            messages: deps.messages,
            clock: deps.clock,
        }
    }

    pub fn registry(&self) -> &Arc<ConnectionRegistry> {
        &self.registry
    }

    /// 传输层连接建立
    pub fn connected(&self, connection_id: ConnectionId) -> mpsc::Receiver<ServerEvent> {
        tracing::debug!(connection_id = %connection_id, "连接已接入");
        self.hub.attach(connection_id)
    }

    /// 传输层连接断开（主动关闭或传输层检测到），可重复调用
    pub async fn disconnected(&self, connection_id: ConnectionId) -> Option<Removal> {
        self.hub.detach(connection_id);
        self.presence.disconnect(connection_id).await
    }

    /// 执行一条客户端命令，错误转换为发给调用方的 `Error` 事件
    pub async fn dispatch(&self, connection_id: ConnectionId, command: ClientCommand) {
        let result = match command {
            ClientCommand::JoinChat { user_id } => {
                self.join_chat(connection_id, user_id).await;
                Ok(())
            }
            ClientCommand::SendMessage(request) => {
                self.send_message(connection_id, request).await.map(|_| ())
            }
            ClientCommand::MarkMessageAsRead { message_id } => {
                self.mark_read(connection_id, message_id).await.map(|_| ())
            }
            ClientCommand::StartTyping { receiver_id } => {
                self.start_typing(connection_id, receiver_id);
                Ok(())
            }
            ClientCommand::StopTyping { receiver_id } => {
                self.stop_typing(connection_id, receiver_id);
                Ok(())
            }
            ClientCommand::GetOnlineUsers => {
                self.get_online_users(connection_id);
                Ok(())
            }
        };

        if let Err(err) = result {
            self.report_error(connection_id, &err);
        }
    }

    /// 向调用方连接报告错误
    pub fn report_error(&self, connection_id: ConnectionId, err: &RelayError) {
        if err.is_client_error() {
            tracing::warn!(connection_id = %connection_id, error = %err, "命令执行失败");
        } else {
            tracing::error!(connection_id = %connection_id, error = %err, "命令执行失败");
        }
        if let Err(send_err) = self
            .hub
            .send_to_connection(connection_id, ServerEvent::error(err.to_string()))
        {
            tracing::warn!(connection_id = %connection_id, error = %send_err, "错误事件投递失败");
        }
    }

    pub async fn join_chat(&self, connection_id: ConnectionId, user_id: UserId) -> Registration {
        self.presence.connect(connection_id, user_id).await
    }

    fn caller(&self, connection_id: ConnectionId) -> Result<UserId, RelayError> {
        self.registry
            .user_of(connection_id)
            .ok_or(RelayError::Authentication)
    }

    /// 发送消息
    ///
    /// 持久化成功后：发送者组收到 `MessageSent`，接收者组收到 `MessageReceived`；
    /// 接收者在线时标记送达，再通知发送者组 `MessageDelivered`。
    pub async fn send_message(
        &self,
        connection_id: ConnectionId,
        request: SendMessageRequest,
    ) -> Result<Message, RelayError> {
        let sender_id = self.caller(connection_id)?;
        let receiver_id = request.receiver_id;

        let message = self.messages.create(sender_id, request).await?;
        tracing::info!(
            message_id = %message.id,
            sender_id = %sender_id,
            receiver_id = %receiver_id,
            "消息已持久化"
        );

        self.hub
            .send_to_group(sender_id, ServerEvent::MessageSent(message.clone()));
        self.hub
            .send_to_group(receiver_id, ServerEvent::MessageReceived(message.clone()));

        if !self.registry.connections_of(receiver_id).is_empty() {
            if self.messages.mark_delivered(message.id).await? {
                let event = ServerEvent::MessageDelivered {
                    message_id: message.id,
                    delivered_at: self.clock.now(),
                };
                self.hub.send_to_group(sender_id, event);
            } else {
                tracing::warn!(message_id = %message.id, "标记送达时消息已不存在");
            }
        }

        Ok(message)
    }

    /// 标记已读
    ///
    /// 非接收者调用时存储返回 `false`，不广播也不报错。
    pub async fn mark_read(
        &self,
        connection_id: ConnectionId,
        message_id: MessageId,
    ) -> Result<bool, RelayError> {
        let reader_id = self.caller(connection_id)?;

        if !self.messages.mark_read(reader_id, message_id).await? {
            tracing::debug!(message_id = %message_id, reader_id = %reader_id, "标记已读被拒绝");
            return Ok(false);
        }

        let message = self
            .messages
            .get_by_id(message_id)
            .await?
            .ok_or_else(|| RelayError::NotFound(format!("message {message_id}")))?;

        let event = ServerEvent::MessageRead {
            message_id,
            read_at: message.read_at.unwrap_or_else(|| self.clock.now()),
            read_by: reader_id,
        };
        self.hub.send_to_group(message.sender_id, event);
        Ok(true)
    }

    pub fn start_typing(&self, connection_id: ConnectionId, receiver_id: UserId) {
        if let Some(sender_id) = self.registry.user_of(connection_id) {
            self.hub
                .send_to_group(receiver_id, ServerEvent::UserStartedTyping(sender_id));
        }
    }

    pub fn stop_typing(&self, connection_id: ConnectionId, receiver_id: UserId) {
        if let Some(sender_id) = self.registry.user_of(connection_id) {
            self.hub
                .send_to_group(receiver_id, ServerEvent::UserStoppedTyping(sender_id));
        }
    }

    /// 当前在线用户，只回复给调用方
    pub fn get_online_users(&self, connection_id: ConnectionId) -> Vec<UserId> {
        let users = self.registry.online_users();
        if let Err(err) = self
            .hub
            .send_to_connection(connection_id, ServerEvent::OnlineUsers(users.clone()))
        {
            tracing::warn!(connection_id = %connection_id, error = %err, "在线用户列表投递失败");
        }
        users
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{DateTime, TimeZone, Utc};
    use domain::{MockMessageStore, MockUserStore, StoreError, Timestamp};

    struct FixedClock(DateTime<Utc>);

    impl Clock for FixedClock {
        fn now(&self) -> Timestamp {
            self.0
        }
    }

    fn at() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 10, 4, 12, 0, 0).unwrap()
    }

    fn message(id: i64, sender: i64, receiver: i64) -> Message {
        Message {
            id: MessageId(id),
            sender_id: UserId(sender),
            receiver_id: UserId(receiver),
            message_type: "text".into(),
            content: Some("hello".into()),
            sent_at: at(),
            delivered_at: None,
            read_at: None,
        }
    }

    fn relay(messages: MockMessageStore) -> MessageRelay {
        relay_with_capacity(messages, 32)
    }

    fn relay_with_capacity(messages: MockMessageStore, capacity: usize) -> MessageRelay {
        let mut users = MockUserStore::new();
        users.expect_touch_last_seen().returning(|_| Ok(()));
        let hub = Arc::new(ConnectionHub::new(Arc::new(ConnectionRegistry::new()), capacity));
        let presence = Arc::new(PresenceBroadcaster::new(hub.clone(), Arc::new(users)));
        MessageRelay::new(MessageRelayDependencies {
            hub,
            presence,
            messages: Arc::new(messages),
            clock: Arc::new(FixedClock(at())),
        })
    }

    async fn join(relay: &MessageRelay, user: i64) -> (ConnectionId, mpsc::Receiver<ServerEvent>) {
        let connection_id = ConnectionId::new();
        let rx = relay.connected(connection_id);
        relay.join_chat(connection_id, UserId(user)).await;
        (connection_id, rx)
    }

    fn drain(rx: &mut mpsc::Receiver<ServerEvent>) -> Vec<ServerEvent> {
        let mut events = Vec::new();
        while let Ok(event) = rx.try_recv() {
            events.push(event);
        }
        events
    }

    #[tokio::test]
    async fn send_to_online_receiver_fans_out_all_events() {
        let mut store = MockMessageStore::new();
        store
            .expect_create()
            .withf(|sender, request| *sender == UserId(1) && request.receiver_id == UserId(2))
            .times(1)
            .returning(|_, _| Ok(message(10, 1, 2)));
        store
            .expect_mark_delivered()
            .withf(|id| *id == MessageId(10))
            .times(1)
            .returning(|_| Ok(true));
        let relay = relay(store);

        let (a1, mut a1_rx) = join(&relay, 1).await;
        let (_a2, mut a2_rx) = join(&relay, 1).await;
        let (_b1, mut b1_rx) = join(&relay, 2).await;
        drain(&mut a1_rx);
        drain(&mut a2_rx);
        drain(&mut b1_rx);

        relay
            .dispatch(
                a1,
                ClientCommand::SendMessage(SendMessageRequest::text(UserId(2), "hello")),
            )
            .await;

        let delivered = ServerEvent::MessageDelivered {
            message_id: MessageId(10),
            delivered_at: at(),
        };
        let expected_sender = vec![ServerEvent::MessageSent(message(10, 1, 2)), delivered];
        assert_eq!(drain(&mut a1_rx), expected_sender);
        assert_eq!(drain(&mut a2_rx), expected_sender);
        assert_eq!(
            drain(&mut b1_rx),
            vec![ServerEvent::MessageReceived(message(10, 1, 2))]
        );
    }

    #[tokio::test]
    async fn full_sender_queue_does_not_fail_the_send() {
        let mut store = MockMessageStore::new();
        store
            .expect_create()
            .times(1)
            .returning(|_, _| Ok(message(12, 1, 2)));
        store.expect_mark_delivered().times(1).returning(|_| Ok(true));
        let relay = relay_with_capacity(store, 1);

        let (a1, mut a1_rx) = join(&relay, 1).await;
        // 用户 2 上线的广播占满 a1 的队列
        let (_b1, mut b1_rx) = join(&relay, 2).await;
        let (_a2, mut a2_rx) = join(&relay, 1).await;

        let sent = relay
            .send_message(a1, SendMessageRequest::text(UserId(2), "hello"))
            .await
            .unwrap();

        assert_eq!(sent.id, MessageId(12));
        assert_eq!(drain(&mut a1_rx), vec![ServerEvent::UserOnline(UserId(2))]);
        assert_eq!(
            drain(&mut a2_rx),
            vec![ServerEvent::MessageSent(message(12, 1, 2))]
        );
        assert_eq!(
            drain(&mut b1_rx),
            vec![ServerEvent::MessageReceived(message(12, 1, 2))]
        );
    }

    #[tokio::test]
    async fn send_to_offline_receiver_only_confirms() {
        let mut store = MockMessageStore::new();
        store
            .expect_create()
            .returning(|_, _| Ok(message(11, 1, 2)));
        store.expect_mark_delivered().never();
        let relay = relay(store);
        let (a1, mut a1_rx) = join(&relay, 1).await;

        let sent = relay
            .send_message(a1, SendMessageRequest::text(UserId(2), "hello"))
            .await
            .unwrap();

        assert_eq!(sent.id, MessageId(11));
        assert_eq!(
            drain(&mut a1_rx),
            vec![ServerEvent::MessageSent(message(11, 1, 2))]
        );
    }

    #[tokio::test]
    async fn unregistered_sender_gets_error_and_nothing_is_persisted() {
        let mut store = MockMessageStore::new();
        store.expect_create().never();
        let relay = relay(store);
        let stranger = ConnectionId::new();
        let mut rx = relay.connected(stranger);

        relay
            .dispatch(
                stranger,
                ClientCommand::SendMessage(SendMessageRequest::text(UserId(2), "hi")),
            )
            .await;

        assert_eq!(
            drain(&mut rx),
            vec![ServerEvent::error("User not authenticated")]
        );
    }

    #[tokio::test]
    async fn validation_failure_reaches_only_the_caller() {
        let mut store = MockMessageStore::new();
        store
            .expect_create()
            .returning(|_, _| Err(StoreError::validation("receiver 404 does not exist")));
        let relay = relay(store);
        let (a1, mut a1_rx) = join(&relay, 1).await;
        let (_a2, mut a2_rx) = join(&relay, 1).await;
        drain(&mut a1_rx);

        relay
            .dispatch(
                a1,
                ClientCommand::SendMessage(SendMessageRequest::text(UserId(404), "hi")),
            )
            .await;

        assert_eq!(
            drain(&mut a1_rx),
            vec![ServerEvent::error(
                "validation failed: receiver 404 does not exist"
            )]
        );
        assert!(drain(&mut a2_rx).is_empty());
        assert!(relay.registry().user_of(a1).is_some());
    }

    #[tokio::test]
    async fn read_receipt_goes_to_sender_group() {
        let mut store = MockMessageStore::new();
        store
            .expect_mark_read()
            .withf(|reader, id| *reader == UserId(2) && *id == MessageId(10))
            .returning(|_, _| Ok(true));
        store.expect_get_by_id().returning(|_| {
            let mut read = message(10, 1, 2);
            read.read_at = Some(at());
            Ok(Some(read))
        });
        let relay = relay(store);
        let (_a1, mut a1_rx) = join(&relay, 1).await;
        let (b1, mut b1_rx) = join(&relay, 2).await;
        drain(&mut a1_rx);

        assert!(relay.mark_read(b1, MessageId(10)).await.unwrap());
        assert_eq!(
            drain(&mut a1_rx),
            vec![ServerEvent::MessageRead {
                message_id: MessageId(10),
                read_at: at(),
                read_by: UserId(2),
            }]
        );
        assert!(drain(&mut b1_rx).is_empty());
    }

    #[tokio::test]
    async fn read_by_non_receiver_is_silently_rejected() {
        let mut store = MockMessageStore::new();
        store.expect_mark_read().returning(|_, _| Ok(false));
        store.expect_get_by_id().never();
        let relay = relay(store);
        let (a1, mut a1_rx) = join(&relay, 1).await;
        let (c1, mut c1_rx) = join(&relay, 3).await;
        drain(&mut a1_rx);
        drain(&mut c1_rx);

        relay
            .dispatch(c1, ClientCommand::MarkMessageAsRead { message_id: MessageId(10) })
            .await;

        assert!(!relay.mark_read(a1, MessageId(10)).await.unwrap());
        assert!(drain(&mut a1_rx).is_empty());
        assert!(drain(&mut c1_rx).is_empty());
    }

    #[tokio::test]
    async fn typing_reaches_receiver_group_only() {
        let relay = relay(MockMessageStore::new());
        let (a1, mut a1_rx) = join(&relay, 1).await;
        let (_b1, mut b1_rx) = join(&relay, 2).await;
        let (_b2, mut b2_rx) = join(&relay, 2).await;
        drain(&mut a1_rx);
        drain(&mut b1_rx);

        relay
            .dispatch(a1, ClientCommand::StartTyping { receiver_id: UserId(2) })
            .await;
        relay
            .dispatch(a1, ClientCommand::StopTyping { receiver_id: UserId(2) })
            .await;

        let expected = vec![
            ServerEvent::UserStartedTyping(UserId(1)),
            ServerEvent::UserStoppedTyping(UserId(1)),
        ];
        assert_eq!(drain(&mut b1_rx), expected);
        assert_eq!(drain(&mut b2_rx), expected);
        assert!(drain(&mut a1_rx).is_empty());
    }

    #[tokio::test]
    async fn typing_from_unknown_connection_is_dropped() {
        let relay = relay(MockMessageStore::new());
        let (_b1, mut b1_rx) = join(&relay, 2).await;
        let stranger = ConnectionId::new();
        let mut stranger_rx = relay.connected(stranger);

        relay
            .dispatch(stranger, ClientCommand::StartTyping { receiver_id: UserId(2) })
            .await;

        assert!(drain(&mut b1_rx).is_empty());
        assert!(drain(&mut stranger_rx).is_empty());
    }

    #[tokio::test]
    async fn online_users_reply_only_to_caller() {
        let relay = relay(MockMessageStore::new());
        let (a1, mut a1_rx) = join(&relay, 1).await;
        let (_b1, mut b1_rx) = join(&relay, 2).await;
        drain(&mut a1_rx);
        drain(&mut b1_rx);

        relay.dispatch(a1, ClientCommand::GetOnlineUsers).await;

        assert_eq!(
            drain(&mut a1_rx),
            vec![ServerEvent::OnlineUsers(vec![UserId(1), UserId(2)])]
        );
        assert!(drain(&mut b1_rx).is_empty());
    }

    #[tokio::test]
    async fn disconnect_detaches_and_announces_once() {
        let relay = relay(MockMessageStore::new());
        let (_a1, mut a1_rx) = join(&relay, 1).await;
        let (b1, _b1_rx) = join(&relay, 2).await;
        drain(&mut a1_rx);

        assert!(relay.disconnected(b1).await.unwrap().went_offline);
        assert!(relay.disconnected(b1).await.is_none());
        assert_eq!(drain(&mut a1_rx), vec![ServerEvent::UserOffline(UserId(2))]);
    }
}

//! 发送路由
//!
//! 走法和聊天优先走直连，失败或未连通时改走中继；
//! 其余消息（房间与控制事件）一律经中继，与中继的房间状态保持一致。

use std::sync::Arc;

use tracing::{debug, warn};

use protocol::Message;

use super::{MessageChannel, Route};

/// 直连优先、中继兜底的发送器
pub struct FallbackDispatcher<H, D> {
    hub: Arc<H>,
    direct: Arc<D>,
}

impl<H: MessageChannel, D: MessageChannel> FallbackDispatcher<H, D> {
    pub fn new(hub: Arc<H>, direct: Arc<D>) -> Self {
        Self { hub, direct }
    }

    /// 发送消息，两条通道都不可用时返回 false
    pub async fn send(&self, msg: &Message) -> bool {
        self.route_and_send(msg).await.is_some()
    }

    /// 发送消息并返回实际使用的通道
    pub async fn route_and_send(&self, msg: &Message) -> Option<Route> {
        if msg.kind.is_realtime() && self.direct.is_connected() {
            match self.direct.send(msg).await {
                Ok(()) => return Some(self.direct.route()),
                Err(e) => warn!(kind = ?msg.kind, error = %e, "direct send failed, falling back to hub"),
            }
        }

        match self.hub.send(msg).await {
            Ok(()) => Some(self.hub.route()),
            Err(e) => {
                warn!(kind = ?msg.kind, error = %e, "message could not be delivered");
                None
            }
        }
    }

    /// 只走直连（直连握手用）
    pub async fn send_direct(&self, msg: &Message) -> bool {
        match self.direct.send(msg).await {
            Ok(()) => true,
            Err(e) => {
                debug!(error = %e, "direct-only send failed");
                false
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use protocol::{ChatPayload, MessageType, Move, MovePayload, Position, ProtocolError, SystemEvent};
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Mutex;

    struct MockChannel {
        route: Route,
        connected: AtomicBool,
        failing: AtomicBool,
        sent: Mutex<Vec<Message>>,
    }

    impl MockChannel {
        fn new(route: Route, connected: bool) -> Arc<Self> {
            Arc::new(Self {
                route,
                connected: AtomicBool::new(connected),
                failing: AtomicBool::new(false),
                sent: Mutex::new(Vec::new()),
            })
        }

        fn sent(&self) -> usize {
            self.sent.lock().unwrap().len()
        }
    }

    #[async_trait]
    impl MessageChannel for MockChannel {
        fn is_connected(&self) -> bool {
            self.connected.load(Ordering::SeqCst)
        }

        async fn send(&self, msg: &Message) -> protocol::Result<()> {
            if !self.is_connected() {
                return Err(ProtocolError::NotConnected);
            }
            if self.failing.load(Ordering::SeqCst) {
                // 与真实通道一致：发送失败后视为断开
                self.connected.store(false, Ordering::SeqCst);
                return Err(ProtocolError::ConnectionClosed);
            }
            self.sent.lock().unwrap().push(msg.clone());
            Ok(())
        }

        fn route(&self) -> Route {
            self.route
        }
    }

    fn move_msg() -> Message {
        let mv = Move::normal(Position::new(6, 4), Position::new(5, 4));
        Message::with_payload("alice", "bob", MessageType::Move, &MovePayload::new(mv)).unwrap()
    }

    fn chat_msg() -> Message {
        Message::with_payload("alice", "bob", MessageType::Chat, &ChatPayload { text: "gg".into() }).unwrap()
    }

    #[tokio::test]
    async fn test_realtime_prefers_direct() {
        let hub = MockChannel::new(Route::Hub, true);
        let direct = MockChannel::new(Route::Direct, true);
        let dispatcher = FallbackDispatcher::new(hub.clone(), direct.clone());

        assert_eq!(dispatcher.route_and_send(&move_msg()).await, Some(Route::Direct));
        assert_eq!(dispatcher.route_and_send(&chat_msg()).await, Some(Route::Direct));
        assert_eq!(direct.sent(), 2);
        assert_eq!(hub.sent(), 0);
    }

    #[tokio::test]
    async fn test_direct_failure_falls_back_to_hub() {
        let hub = MockChannel::new(Route::Hub, true);
        let direct = MockChannel::new(Route::Direct, true);
        direct.failing.store(true, Ordering::SeqCst);
        let dispatcher = FallbackDispatcher::new(hub.clone(), direct.clone());

        assert_eq!(dispatcher.route_and_send(&move_msg()).await, Some(Route::Hub));
        assert!(!direct.is_connected());
        assert_eq!(dispatcher.route_and_send(&move_msg()).await, Some(Route::Hub));
        assert_eq!(dispatcher.route_and_send(&chat_msg()).await, Some(Route::Hub));
        assert_eq!(hub.sent(), 3);
    }

    #[tokio::test]
    async fn test_system_always_uses_hub() {
        let hub = MockChannel::new(Route::Hub, true);
        let direct = MockChannel::new(Route::Direct, true);
        let dispatcher = FallbackDispatcher::new(hub.clone(), direct.clone());

        let resign = Message::system("alice", "bob", &SystemEvent::Resign).unwrap();
        assert_eq!(dispatcher.route_and_send(&resign).await, Some(Route::Hub));
        assert_eq!(direct.sent(), 0);
    }

    #[tokio::test]
    async fn test_nothing_available() {
        let hub = MockChannel::new(Route::Hub, false);
        let direct = MockChannel::new(Route::Direct, false);
        let dispatcher = FallbackDispatcher::new(hub, direct);

        assert!(!dispatcher.send(&move_msg()).await);
        assert!(!dispatcher.send_direct(&chat_msg()).await);
    }
}

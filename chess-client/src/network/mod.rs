//! 网络通信模块
//!
//! 两条通道：到中继的长连接和玩家之间的直连。
//! 两边的读任务都把收到的内容送进同一个 `Inbound` 队列，由协调任务单线程处理。

mod direct;
mod fallback;
mod hub;

pub use direct::DirectPeer;
pub use fallback::FallbackDispatcher;
pub use hub::HubConnection;

use async_trait::async_trait;
use protocol::Message;

/// 消息实际经过的通道
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Route {
    /// 玩家直连
    Direct,
    /// 经中继转发
    Hub,
}

/// 读任务和连接任务产生的事件
#[derive(Debug, Clone)]
pub enum Inbound {
    /// 收到一条消息
    Message { route: Route, message: Message },
    /// 已连上中继（尚未登录）
    HubConnected,
    /// 多次重试后仍无法连上中继
    HubConnectFailed(String),
    /// 中继连接断开
    HubDisconnected,
    /// 直连建立，`outbound` 表示是本方拨出的
    PeerLinked { outbound: bool },
    /// 直连断开
    PeerDisconnected,
}

/// 可发送消息的通道
#[async_trait]
pub trait MessageChannel: Send + Sync {
    /// 通道当前是否可用
    fn is_connected(&self) -> bool;

    /// 发送一条消息
    async fn send(&self, msg: &Message) -> protocol::Result<()>;

    /// 通道类型
    fn route(&self) -> Route;
}

//! 国际象棋联网客户端
//!
//! 优先玩家直连，直连不可用时经中继转发。
//! 界面层通过 [`ClientHandle`] 发命令，从事件队列读取 [`ClientEvent`]。

pub mod client;
pub mod config;
pub mod events;
pub mod game;
pub mod network;

pub use client::{ClientHandle, HybridClient};
pub use config::ClientConfig;
pub use events::{ClientCommand, ClientEvent, RequestKind};
pub use game::{GameSync, Session};
pub use network::{DirectPeer, FallbackDispatcher, HubConnection, Inbound, MessageChannel, Route};

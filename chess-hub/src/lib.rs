//! 国际象棋中继服务
//!
//! 包含:
//! - 玩家管理（登录、昵称唯一性）
//! - 房间系统（建房、加入、快速匹配）
//! - 直连地址交换
//! - 对局消息转发

pub mod config;
pub mod player;
pub mod room;
pub mod server;

pub use config::HubConfig;
pub use player::{Player, PlayerId, PlayerManager, PlayerStatus};
pub use room::{Departure, Room, RoomError, RoomId, RoomManager};
pub use server::{HubServer, MessageHandler, PendingMessages, ServerState};

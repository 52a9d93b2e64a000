//! 消息类型定义
//!
//! 线上格式：每行一个 JSON 对象 `{from, to, type, content}`，
//! `content` 本身是按 `type` 区分的 JSON 字符串。

use serde::{de::DeserializeOwned, Deserialize, Serialize};

use crate::error::Result;
use crate::moves::Move;
use crate::piece::Color;

/// 消息类型
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum MessageType {
    Login,
    System,
    PeerInfo,
    Move,
    Chat,
    Error,
    Ping,
    Pong,
}

impl MessageType {
    /// 实时对局数据（优先走直连）
    pub fn is_realtime(&self) -> bool {
        matches!(self, MessageType::Move | MessageType::Chat)
    }
}

/// 线上消息
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    pub from: String,
    pub to: String,
    #[serde(rename = "type")]
    pub kind: MessageType,
    #[serde(default)]
    pub content: String,
}

impl Message {
    /// 创建原始消息
    pub fn new(
        from: impl Into<String>,
        to: impl Into<String>,
        kind: MessageType,
        content: impl Into<String>,
    ) -> Self {
        Self {
            from: from.into(),
            to: to.into(),
            kind,
            content: content.into(),
        }
    }

    /// 以 JSON 载荷创建消息
    pub fn with_payload<T: Serialize>(
        from: impl Into<String>,
        to: impl Into<String>,
        kind: MessageType,
        payload: &T,
    ) -> Result<Self> {
        Ok(Self::new(from, to, kind, serde_json::to_string(payload)?))
    }

    /// 系统事件消息
    pub fn system(from: impl Into<String>, to: impl Into<String>, event: &SystemEvent) -> Result<Self> {
        Self::with_payload(from, to, MessageType::System, event)
    }

    /// 错误消息
    pub fn error(to: impl Into<String>, code: ErrorCode, message: impl Into<String>) -> Result<Self> {
        let event = SystemEvent::Error {
            code,
            message: message.into(),
        };
        Self::with_payload(crate::HUB_SENDER, to, MessageType::Error, &event)
    }

    /// 心跳
    pub fn ping(from: impl Into<String>) -> Self {
        Self::new(from, crate::HUB_SENDER, MessageType::Ping, "")
    }

    /// 心跳回应
    pub fn pong(to: impl Into<String>) -> Self {
        Self::new(crate::HUB_SENDER, to, MessageType::Pong, "")
    }

    /// 解码载荷
    pub fn payload<T: DeserializeOwned>(&self) -> Result<T> {
        Ok(serde_json::from_str(&self.content)?)
    }

    /// 解码系统事件（System 与 Error 类型共用）
    pub fn event(&self) -> Result<SystemEvent> {
        self.payload()
    }
}

/// 登录载荷
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum LoginPayload {
    Current {
        name: String,
        #[serde(rename = "p2pPort", alias = "p2p_port", default)]
        p2p_port: u16,
    },
    /// 旧版客户端：登录同时建房或进房
    #[serde(rename_all = "camelCase")]
    Legacy {
        player_name: String,
        #[serde(default)]
        room_id: Option<String>,
        #[serde(default)]
        create_room: bool,
    },
}

impl LoginPayload {
    pub fn new(name: impl Into<String>, p2p_port: u16) -> Self {
        LoginPayload::Current {
            name: name.into(),
            p2p_port,
        }
    }

    pub fn name(&self) -> &str {
        match self {
            LoginPayload::Current { name, .. } => name,
            LoginPayload::Legacy { player_name, .. } => player_name,
        }
    }

    /// 直连监听端口，旧版客户端没有
    pub fn p2p_port(&self) -> u16 {
        match self {
            LoginPayload::Current { p2p_port, .. } => *p2p_port,
            LoginPayload::Legacy { .. } => 0,
        }
    }
}

/// 对端地址（由中继观察到的地址 + 对方上报的监听端口）
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PeerInfo {
    pub host: String,
    pub port: u16,
    /// 为 true 的一方负责主动拨号
    pub is_host: bool,
}

/// 走法载荷，附带可选的棋钟快照
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MovePayload {
    #[serde(flatten)]
    pub mv: Move,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub white_time_ms: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub black_time_ms: Option<u64>,
}

impl MovePayload {
    pub fn new(mv: Move) -> Self {
        Self {
            mv,
            white_time_ms: None,
            black_time_ms: None,
        }
    }

    pub fn with_clock(mv: Move, white_ms: u64, black_ms: u64) -> Self {
        Self {
            mv,
            white_time_ms: Some(white_ms),
            black_time_ms: Some(black_ms),
        }
    }

    /// 双方时间都带了才算有效快照
    pub fn clock(&self) -> Option<(u64, u64)> {
        self.white_time_ms.zip(self.black_time_ms)
    }
}

/// 聊天载荷
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatPayload {
    pub text: String,
}

/// 系统事件
///
/// 中继只解读房间类事件，其余原样转发给同房间的对手。
/// 不认识的事件名解码为 `Unknown`。
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case", rename_all_fields = "camelCase")]
pub enum SystemEvent {
    // === 中继房间事件 ===
    LoginSuccess,
    CreateRoom,
    JoinRoom {
        room_id: String,
    },
    QuickMatch,
    LeaveRoom,
    RoomCreated {
        room_id: String,
        color: Color,
    },
    Joined {
        room_id: String,
        color: Color,
        opponent: String,
    },
    PlayerJoined {
        room_id: String,
        color: Color,
        opponent: String,
    },
    GameStart {
        room_id: String,
    },
    OpponentLeft {
        #[serde(default)]
        player: Option<String>,
    },

    // === 对局事件（中继只转发） ===
    Handshake {
        name: String,
    },
    Undo,
    NewGameRequest,
    NewGameAccept,
    NewGameReject,
    Resign,
    DrawOffer,
    DrawAccept,
    DrawReject,
    PauseRequest,
    PauseAccept,
    PauseReject,
    ResumeRequest,
    ResumeAccept,
    ResumeReject,
    Timeout,
    /// 收到无法应用的走法后请求对方发送完整历史
    SyncRequest,
    SyncState {
        moves: Vec<Move>,
    },

    Error {
        code: ErrorCode,
        message: String,
    },

    #[serde(other)]
    Unknown,
}

/// 错误码定义
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
#[repr(u16)]
pub enum ErrorCode {
    // === 房间相关 (1xx) ===
    /// 房间不存在
    RoomNotFound = 100,
    /// 房间已满
    RoomFull = 101,
    /// 不在房间中
    NotInRoom = 103,
    /// 已在房间中
    AlreadyInRoom = 104,

    // === 玩家相关 (3xx) ===
    /// 无效昵称
    InvalidNickname = 300,
    /// 尚未登录
    NotLoggedIn = 301,
    /// 昵称已被占用
    NicknameOccupied = 302,

    // === 协议相关 (4xx) ===
    /// 无法解析的消息
    MalformedMessage = 400,
}

impl std::fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:?}", self)
    }
}

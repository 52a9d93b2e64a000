//! 客户端命令与事件
//!
//! 界面层通过 `ClientCommand` 驱动客户端，通过 `ClientEvent` 接收通知。

use protocol::{ChessError, Color, ErrorCode, GameResult, GameSnapshot, Move, SystemEvent};

/// 需要对手同意的请求
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RequestKind {
    NewGame,
    Draw,
    Pause,
    Resume,
}

impl RequestKind {
    /// 面向玩家的名称
    pub fn label(&self) -> &'static str {
        match self {
            RequestKind::NewGame => "new game request",
            RequestKind::Draw => "draw offer",
            RequestKind::Pause => "pause request",
            RequestKind::Resume => "resume request",
        }
    }

    /// 发起请求的事件
    pub fn request_event(&self) -> SystemEvent {
        match self {
            RequestKind::NewGame => SystemEvent::NewGameRequest,
            RequestKind::Draw => SystemEvent::DrawOffer,
            RequestKind::Pause => SystemEvent::PauseRequest,
            RequestKind::Resume => SystemEvent::ResumeRequest,
        }
    }

    /// 答复请求的事件
    pub fn answer_event(&self, accept: bool) -> SystemEvent {
        match (self, accept) {
            (RequestKind::NewGame, true) => SystemEvent::NewGameAccept,
            (RequestKind::NewGame, false) => SystemEvent::NewGameReject,
            (RequestKind::Draw, true) => SystemEvent::DrawAccept,
            (RequestKind::Draw, false) => SystemEvent::DrawReject,
            (RequestKind::Pause, true) => SystemEvent::PauseAccept,
            (RequestKind::Pause, false) => SystemEvent::PauseReject,
            (RequestKind::Resume, true) => SystemEvent::ResumeAccept,
            (RequestKind::Resume, false) => SystemEvent::ResumeReject,
        }
    }

    /// 把收到的事件拆成 (请求类型, 是否为答复, 是否同意)
    pub fn classify(event: &SystemEvent) -> Option<(RequestKind, Option<bool>)> {
        let classified = match event {
            SystemEvent::NewGameRequest => (RequestKind::NewGame, None),
            SystemEvent::NewGameAccept => (RequestKind::NewGame, Some(true)),
            SystemEvent::NewGameReject => (RequestKind::NewGame, Some(false)),
            SystemEvent::DrawOffer => (RequestKind::Draw, None),
            SystemEvent::DrawAccept => (RequestKind::Draw, Some(true)),
            SystemEvent::DrawReject => (RequestKind::Draw, Some(false)),
            SystemEvent::PauseRequest => (RequestKind::Pause, None),
            SystemEvent::PauseAccept => (RequestKind::Pause, Some(true)),
            SystemEvent::PauseReject => (RequestKind::Pause, Some(false)),
            SystemEvent::ResumeRequest => (RequestKind::Resume, None),
            SystemEvent::ResumeAccept => (RequestKind::Resume, Some(true)),
            SystemEvent::ResumeReject => (RequestKind::Resume, Some(false)),
            _ => return None,
        };
        Some(classified)
    }
}

/// 界面层发给客户端的命令
#[derive(Debug, Clone, PartialEq)]
pub enum ClientCommand {
    /// 连接中继并登录
    Connect,
    /// 断开后重新连接，仍在有效房间时重新加入
    Reconnect,
    CreateRoom,
    JoinRoom(String),
    QuickMatch,
    LeaveRoom,
    MakeMove(Move),
    SendChat(String),
    Resign,
    /// 悔一步并通知对手
    Undo,
    Request(RequestKind),
    Respond { kind: RequestKind, accept: bool },
    Shutdown,
}

/// 客户端发给界面层的通知
#[derive(Debug, Clone, PartialEq)]
pub enum ClientEvent {
    /// 面向玩家的状态文字
    Status(String),
    /// 已登录中继
    HubConnected,
    /// 重试后仍无法连上中继
    HubConnectFailed(String),
    HubDisconnected,
    /// 中继返回的错误
    HubError { code: ErrorCode, message: String },
    RoomAssigned {
        room_id: String,
        color: Color,
        opponent: Option<String>,
    },
    /// 新的一局开始（局面已重置）
    GameStarted(GameSnapshot),
    /// 走法已应用（本地或对手），悔棋和重新同步后也会发出
    MoveApplied { snapshot: GameSnapshot, local: bool },
    MoveRejected { mv: Move, reason: ChessError },
    TerminalResult(GameResult),
    Chat { from: String, text: String },
    OpponentRequest { from: String, kind: RequestKind },
    /// 对手答复了本方的请求
    RequestAnswered { kind: RequestKind, accepted: bool },
    OpponentLeft(Option<String>),
    PeerLinked,
    PeerDisconnected,
    Clock { white_ms: u64, black_ms: u64 },
}

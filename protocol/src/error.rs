//! 错误类型定义

use thiserror::Error;

use crate::piece::Position;

/// 国际象棋规则错误
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ChessError {
    /// 没有棋子
    #[error("No piece at {0}")]
    NoPiece(Position),

    /// 棋子颜色与走子方不符
    #[error("Piece at {0} does not belong to the side to move")]
    WrongColor(Position),

    /// 不是你的回合
    #[error("Not your turn")]
    NotYourTurn,

    /// 非法走法
    #[error("Illegal move: {from} -> {to}")]
    IllegalMove { from: Position, to: Position },

    /// 游戏已结束
    #[error("Game is already over")]
    GameOver,

    /// 无效的 FEN 字符串
    #[error("Invalid FEN string: {reason}")]
    InvalidFen { reason: String },

    /// 无效的坐标记谱
    #[error("Invalid move notation: {0}")]
    InvalidNotation(String),
}

/// 协议错误类型
#[derive(Error, Debug)]
pub enum ProtocolError {
    /// IO 错误
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON 序列化错误
    #[error("JSON serialization error: {0}")]
    Json(#[from] serde_json::Error),

    /// 单行消息超长
    #[error("Line too long: more than {max} bytes")]
    LineTooLong { max: usize },

    /// 连接超时
    #[error("Connection timeout")]
    ConnectionTimeout,

    /// 连接已关闭
    #[error("Connection closed")]
    ConnectionClosed,

    /// 尚未建立连接
    #[error("Not connected")]
    NotConnected,

    /// 昵称为空
    #[error("Nickname is empty")]
    NicknameEmpty,

    /// 昵称过长
    #[error("Nickname too long: {len} chars (max: {max})")]
    NicknameTooLong { len: usize, max: usize },

    /// 昵称已被占用
    #[error("Nickname is already occupied")]
    NicknameOccupied,
}

impl ProtocolError {
    /// 是否为可跳过的单行解析错误（连接本身仍然可用）
    pub fn is_malformed_line(&self) -> bool {
        matches!(self, ProtocolError::Json(_))
    }
}

/// 协议操作结果类型
pub type Result<T> = std::result::Result<T, ProtocolError>;

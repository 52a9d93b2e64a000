//! 国际象棋共享协议库
//!
//! 包含:
//! - 棋子、棋盘、位置等核心数据结构
//! - 走法生成、规则验证和对局状态机
//! - 棋钟
//! - 线上消息定义 (Message 及各类载荷)
//! - 传输层抽象 (Connector, Connection, Listener traits)
//! - 行编解码 (LineReader, LineWriter)
//! - FEN 与坐标记谱

mod board;
mod clock;
mod constants;
mod error;
mod fen;
mod game;
mod message;
mod moves;
mod notation;
mod piece;
mod transport;

pub use board::Board;
pub use clock::GameClock;
pub use constants::*;
pub use error::{ChessError, ProtocolError, Result};
pub use fen::{Fen, FenPosition, INITIAL_FEN};
pub use game::{Game, GameResult, GameSnapshot};
pub use message::{
    ChatPayload, ErrorCode, LoginPayload, Message, MessageType, MovePayload, PeerInfo,
    SystemEvent,
};
pub use moves::{GenerateFn, Move, MoveGenerator, MoveKind};
pub use notation::Notation;
pub use piece::{Color, Piece, PieceKind, Position};
pub use transport::{
    Connection, Connector, Listener,
    TcpConnection, TcpConnector, TcpListener,
    NetworkConfig,
    LineReader, LineWriter,
};

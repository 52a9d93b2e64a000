//! 坐标记谱
//!
//! 使用 `e2e4`、`e7e8q` 这种长代数坐标，状态提示和测试都用它描述走法。

use crate::error::ChessError;
use crate::game::Game;
use crate::moves::Move;
use crate::piece::{PieceKind, Position};

/// 记谱工具
pub struct Notation;

impl Notation {
    /// 走法转为坐标记谱
    pub fn to_coordinate(mv: &Move) -> String {
        let mut s = format!("{}{}", mv.from, mv.to);
        if let Some(kind) = mv.promotes_to {
            s.push(kind.letter().to_ascii_lowercase());
        }
        s
    }

    /// 解析坐标记谱，返回起点、终点和升变棋子
    pub fn parse_coordinate(s: &str) -> Result<(Position, Position, Option<PieceKind>), ChessError> {
        let s = s.trim();
        let invalid = || ChessError::InvalidNotation(s.to_string());

        if !(4..=5).contains(&s.len()) || !s.is_ascii() {
            return Err(invalid());
        }
        let from = Position::from_algebraic(&s[0..2]).ok_or_else(invalid)?;
        let to = Position::from_algebraic(&s[2..4]).ok_or_else(invalid)?;

        let promotes_to = match s.chars().nth(4) {
            None => None,
            Some(c) => match c.to_ascii_lowercase() {
                'q' => Some(PieceKind::Queen),
                'r' => Some(PieceKind::Rook),
                'b' => Some(PieceKind::Bishop),
                'n' => Some(PieceKind::Knight),
                _ => return Err(invalid()),
            },
        };

        Ok((from, to, promotes_to))
    }

    /// 在当前局面中把坐标记谱解析为合法走法（未写明升变时默认升后）
    pub fn resolve(game: &Game, s: &str) -> Result<Move, ChessError> {
        let (from, to, promotes_to) = Self::parse_coordinate(s)?;
        let candidates: Vec<Move> = game
            .legal_moves_for(from)
            .into_iter()
            .filter(|mv| mv.to == to)
            .collect();

        let wanted = match promotes_to {
            Some(kind) => Some(kind),
            None if candidates.iter().any(|mv| mv.promotes_to.is_some()) => Some(PieceKind::Queen),
            None => None,
        };

        candidates
            .into_iter()
            .find(|mv| mv.promotes_to == wanted)
            .ok_or(ChessError::IllegalMove { from, to })
    }
}

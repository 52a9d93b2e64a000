//! FEN 格式解析和生成
//!
//! 格式：`<棋盘> <走子方> <易位权> <过路兵> <半回合计数> <回合数>`
//!
//! 示例：
//! `rnbqkbnr/pppppppp/8/8/8/8/PPPPPPPP/RNBQKBNR w KQkq - 0 1`

use crate::board::Board;
use crate::error::ChessError;
use crate::piece::{Color, Piece, PieceKind, Position};

/// 初始局面 FEN
pub const INITIAL_FEN: &str = "rnbqkbnr/pppppppp/8/8/8/8/PPPPPPPP/RNBQKBNR w KQkq - 0 1";

/// FEN 描述的完整局面
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FenPosition {
    pub board: Board,
    pub turn: Color,
    pub half_move_clock: u32,
    pub full_move: u32,
}

impl FenPosition {
    /// 标准初始局面
    pub fn initial() -> Self {
        Self {
            board: Board::initial(),
            turn: Color::White,
            half_move_clock: 0,
            full_move: 1,
        }
    }
}

/// FEN 格式处理
pub struct Fen;

impl Fen {
    /// 解析 FEN 字符串
    pub fn parse(fen: &str) -> Result<FenPosition, ChessError> {
        let parts: Vec<&str> = fen.split_whitespace().collect();
        if parts.is_empty() {
            return Err(Self::invalid("Empty FEN string"));
        }

        let mut board = Self::parse_board(parts[0])?;

        let turn = match parts.get(1) {
            Some(s) => s
                .chars()
                .next()
                .and_then(Color::from_fen_char)
                .ok_or_else(|| Self::invalid(format!("Invalid side to move: {}", s)))?,
            None => Color::White,
        };

        Self::apply_castling_rights(&mut board, parts.get(2).copied().unwrap_or("-"))?;

        let en_passant = match parts.get(3).copied().unwrap_or("-") {
            "-" => None,
            s => Some(
                Position::from_algebraic(s)
                    .ok_or_else(|| Self::invalid(format!("Invalid en passant square: {}", s)))?,
            ),
        };
        board.set_en_passant_target(en_passant);

        let half_move_clock = parts.get(4).and_then(|s| s.parse().ok()).unwrap_or(0);
        let full_move = parts.get(5).and_then(|s| s.parse().ok()).unwrap_or(1);

        Ok(FenPosition {
            board,
            turn,
            half_move_clock,
            full_move,
        })
    }

    /// 解析棋盘部分
    fn parse_board(board_str: &str) -> Result<Board, ChessError> {
        let mut board = Board::empty();
        let rows: Vec<&str> = board_str.split('/').collect();

        if rows.len() != 8 {
            return Err(Self::invalid(format!("Expected 8 rows, got {}", rows.len())));
        }

        // FEN 从第 8 横排开始，正好对应第 0 行
        for (row_idx, row) in rows.iter().enumerate() {
            let mut col = 0i8;

            for c in row.chars() {
                if col >= 8 {
                    return Err(Self::invalid(format!("Row {} has too many columns", row_idx)));
                }

                if let Some(empty_count) = c.to_digit(10) {
                    col += empty_count as i8;
                } else if let Some(mut piece) = Piece::from_fen_char(c) {
                    let pos = Position::new(row_idx as i8, col);
                    if piece.kind == PieceKind::Pawn {
                        piece.has_moved = pos.row != piece.color.pawn_start_row();
                    }
                    board.set(pos, Some(piece));
                    col += 1;
                } else {
                    return Err(Self::invalid(format!("Invalid piece character: {}", c)));
                }
            }

            if col != 8 {
                return Err(Self::invalid(format!(
                    "Row {} has {} columns, expected 8",
                    row_idx, col
                )));
            }
        }

        Ok(board)
    }

    /// 易位权映射为王和车的 has_moved 标记
    fn apply_castling_rights(board: &mut Board, rights: &str) -> Result<(), ChessError> {
        if rights != "-" && rights.chars().any(|c| !"KQkq".contains(c)) {
            return Err(Self::invalid(format!("Invalid castling rights: {}", rights)));
        }

        // 先全部视为已移动，再按易位权恢复
        for (pos, mut piece) in board.all_pieces() {
            if matches!(piece.kind, PieceKind::King | PieceKind::Rook) {
                piece.has_moved = true;
                board.set(pos, Some(piece));
            }
        }

        for c in rights.chars().filter(|c| *c != '-') {
            let color = if c.is_ascii_uppercase() {
                Color::White
            } else {
                Color::Black
            };
            let rook_col = if c.eq_ignore_ascii_case(&'k') { 7 } else { 0 };
            let row = color.back_rank();

            for (col, kind) in [(4, PieceKind::King), (rook_col, PieceKind::Rook)] {
                let pos = Position::new(row, col);
                match board.get(pos) {
                    Some(mut piece) if piece.kind == kind && piece.color == color => {
                        piece.has_moved = false;
                        board.set(pos, Some(piece));
                    }
                    _ => {
                        return Err(Self::invalid(format!(
                            "Castling right {} without {:?} on {}",
                            c, kind, pos
                        )))
                    }
                }
            }
        }

        Ok(())
    }

    /// 生成完整 FEN 字符串
    pub fn to_string(position: &FenPosition) -> String {
        format!(
            "{} {} {} {} {} {}",
            Self::placement(&position.board),
            position.turn.to_fen_char(),
            Self::castling_rights(&position.board),
            position
                .board
                .en_passant_target()
                .map(|p| p.to_string())
                .unwrap_or_else(|| "-".to_string()),
            position.half_move_clock,
            position.full_move
        )
    }

    /// 棋子摆放部分
    pub fn placement(board: &Board) -> String {
        let mut result = String::with_capacity(72);

        for row in 0..8 {
            let mut empty = 0;
            for col in 0..8 {
                match board.get(Position::new(row, col)) {
                    Some(piece) => {
                        if empty > 0 {
                            result.push_str(&empty.to_string());
                            empty = 0;
                        }
                        result.push(piece.to_fen_char());
                    }
                    None => empty += 1,
                }
            }
            if empty > 0 {
                result.push_str(&empty.to_string());
            }
            if row < 7 {
                result.push('/');
            }
        }

        result
    }

    /// 从棋子的移动标记推出易位权
    pub fn castling_rights(board: &Board) -> String {
        let mut rights = String::new();
        for (color, king_side, queen_side) in [(Color::White, 'K', 'Q'), (Color::Black, 'k', 'q')] {
            if board.castle_pieces_ready(color, 7) {
                rights.push(king_side);
            }
            if board.castle_pieces_ready(color, 0) {
                rights.push(queen_side);
            }
        }
        if rights.is_empty() {
            rights.push('-');
        }
        rights
    }

    fn invalid(reason: impl Into<String>) -> ChessError {
        ChessError::InvalidFen {
            reason: reason.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_initial_fen() {
        let position = Fen::parse(INITIAL_FEN).unwrap();
        assert_eq!(position, FenPosition::initial());
    }

    #[test]
    fn test_fen_roundtrip() {
        let fen = "r3k2r/pp3ppp/8/3pP3/8/8/PP3PPP/R3K2R w Kq d6 4 17";
        let position = Fen::parse(fen).unwrap();
        assert_eq!(Fen::to_string(&position), fen);
    }

    #[test]
    fn test_castling_rights_map_to_moved_flags() {
        let position = Fen::parse("r3k2r/8/8/8/8/8/8/R3K2R w Kq - 0 1").unwrap();
        let board = &position.board;

        assert!(!board.get(Position::new(7, 7)).unwrap().has_moved);
        assert!(board.get(Position::new(7, 0)).unwrap().has_moved);
        assert!(board.get(Position::new(0, 7)).unwrap().has_moved);
        assert!(!board.get(Position::new(0, 0)).unwrap().has_moved);
        assert!(board.can_castle_king_side(Color::White));
        assert!(!board.can_castle_queen_side(Color::White));
    }

    #[test]
    fn test_invalid_fen() {
        assert!(Fen::parse("").is_err());
        assert!(Fen::parse("8/8/8 w - - 0 1").is_err());
        assert!(Fen::parse("rnbqkbnr/pppppppp/8/8/8/8/PPPPPPPP/RNBQKBNX w KQkq - 0 1").is_err());
        // 声明了易位权但车不在原位
        assert!(Fen::parse("4k3/8/8/8/8/8/8/4K3 w K - 0 1").is_err());
    }
}

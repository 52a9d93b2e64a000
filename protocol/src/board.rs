//! 棋盘定义

use serde::{Deserialize, Serialize};

use crate::constants::BOARD_SIZE;
use crate::moves::{Move, MoveGenerator, MoveKind};
use crate::piece::{Color, Piece, PieceKind, Position};

/// 8x8 棋盘
///
/// 坐标：第 0 行是黑方底线，第 7 行是白方底线。
/// `Clone` 即深拷贝，棋子的 `has_moved` 随之复制。
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Board {
    /// 8x8 格子，索引 = row * 8 + col
    squares: Vec<Option<Piece>>,
    /// 吃过路兵目标格（仅在双步之后的一手内有效）
    en_passant_target: Option<Position>,
}

impl Board {
    /// 创建空棋盘
    pub fn empty() -> Self {
        Self {
            squares: vec![None; BOARD_SIZE * BOARD_SIZE],
            en_passant_target: None,
        }
    }

    /// 创建初始棋盘
    pub fn initial() -> Self {
        let mut board = Self::empty();
        let back_row = [
            PieceKind::Rook,
            PieceKind::Knight,
            PieceKind::Bishop,
            PieceKind::Queen,
            PieceKind::King,
            PieceKind::Bishop,
            PieceKind::Knight,
            PieceKind::Rook,
        ];

        for color in [Color::White, Color::Black] {
            for (col, kind) in back_row.iter().enumerate() {
                let col = col as i8;
                board.set(
                    Position::new(color.back_rank(), col),
                    Some(Piece::new(*kind, color)),
                );
                board.set(
                    Position::new(color.pawn_start_row(), col),
                    Some(Piece::new(PieceKind::Pawn, color)),
                );
            }
        }

        board
    }

    /// 获取指定位置的棋子，越界返回 None
    pub fn get(&self, pos: Position) -> Option<Piece> {
        if pos.is_valid() {
            self.squares[pos.to_index()]
        } else {
            None
        }
    }

    /// 设置指定位置的棋子，越界忽略
    pub fn set(&mut self, pos: Position, piece: Option<Piece>) {
        if pos.is_valid() {
            self.squares[pos.to_index()] = piece;
        }
    }

    /// 吃过路兵目标格
    pub fn en_passant_target(&self) -> Option<Position> {
        self.en_passant_target
    }

    /// 设置吃过路兵目标格（FEN 导入使用）
    pub fn set_en_passant_target(&mut self, target: Option<Position>) {
        self.en_passant_target = target;
    }

    /// 执行走法
    ///
    /// 调用方负责保证走法合法；这里只按走法类型改写格子。
    ///
    /// # Panics
    ///
    /// 起点没有棋子时 panic，这是调用约定被破坏而非可恢复错误。
    pub fn apply_move(&mut self, mv: &Move) {
        let Some(mut piece) = self.get(mv.from) else {
            panic!("apply_move: no piece at {}", mv.from);
        };

        self.en_passant_target = None;
        self.set(mv.from, None);
        piece.has_moved = true;

        match mv.kind {
            MoveKind::Normal | MoveKind::Capture => {
                self.set(mv.to, Some(piece));
            }
            MoveKind::DoublePawnPush => {
                self.set(mv.to, Some(piece));
                self.en_passant_target =
                    Some(Position::new((mv.from.row + mv.to.row) / 2, mv.from.col));
            }
            MoveKind::EnPassant => {
                self.set(mv.to, Some(piece));
                // 被吃的兵在落点"身后"，而不是落点上
                self.set(Position::new(mv.from.row, mv.to.col), None);
            }
            MoveKind::CastleKingside => {
                self.set(mv.to, Some(piece));
                self.relocate_rook(mv.from.row, 7, 5);
            }
            MoveKind::CastleQueenside => {
                self.set(mv.to, Some(piece));
                self.relocate_rook(mv.from.row, 0, 3);
            }
            MoveKind::Promotion => {
                let kind = mv.promotes_to.unwrap_or(PieceKind::Queen);
                self.set(
                    mv.to,
                    Some(Piece {
                        color: piece.color,
                        kind,
                        has_moved: true,
                    }),
                );
            }
        }
    }

    fn relocate_rook(&mut self, row: i8, from_col: i8, to_col: i8) {
        let from = Position::new(row, from_col);
        if let Some(mut rook) = self.get(from) {
            rook.has_moved = true;
            self.set(from, None);
            self.set(Position::new(row, to_col), Some(rook));
        }
    }

    /// 查找指定阵营的王
    pub fn find_king(&self, color: Color) -> Option<Position> {
        self.pieces(color)
            .into_iter()
            .find(|(_, piece)| piece.kind == PieceKind::King)
            .map(|(pos, _)| pos)
    }

    /// 获取指定阵营的所有棋子
    pub fn pieces(&self, color: Color) -> Vec<(Position, Piece)> {
        self.all_pieces()
            .into_iter()
            .filter(|(_, piece)| piece.color == color)
            .collect()
    }

    /// 获取所有棋子
    pub fn all_pieces(&self) -> Vec<(Position, Piece)> {
        self.squares
            .iter()
            .enumerate()
            .filter_map(|(index, square)| {
                let piece = (*square)?;
                Position::from_index(index).map(|pos| (pos, piece))
            })
            .collect()
    }

    /// 指定阵营是否被将军
    pub fn is_in_check(&self, color: Color) -> bool {
        MoveGenerator::is_in_check(self, color)
    }

    /// 某格是否被指定阵营攻击
    pub fn is_square_attacked(&self, pos: Position, by: Color) -> bool {
        MoveGenerator::is_square_attacked(self, pos, by)
    }

    /// 是否可以短易位
    pub fn can_castle_king_side(&self, color: Color) -> bool {
        let row = color.back_rank();
        self.castle_pieces_ready(color, 7)
            && self.squares_empty(row, &[5, 6])
            && !self.is_in_check(color)
            && !self.any_attacked(row, &[5, 6], color.opponent())
    }

    /// 是否可以长易位
    pub fn can_castle_queen_side(&self, color: Color) -> bool {
        let row = color.back_rank();
        // b 格只需为空，王不经过它
        self.castle_pieces_ready(color, 0)
            && self.squares_empty(row, &[1, 2, 3])
            && !self.is_in_check(color)
            && !self.any_attacked(row, &[2, 3], color.opponent())
    }

    /// 王和对应车都在原位且未移动过
    pub(crate) fn castle_pieces_ready(&self, color: Color, rook_col: i8) -> bool {
        let row = color.back_rank();
        let unmoved = |col: i8, kind: PieceKind| {
            matches!(
                self.get(Position::new(row, col)),
                Some(p) if p.kind == kind && p.color == color && !p.has_moved
            )
        };
        unmoved(4, PieceKind::King) && unmoved(rook_col, PieceKind::Rook)
    }

    fn squares_empty(&self, row: i8, cols: &[i8]) -> bool {
        cols.iter()
            .all(|&col| self.get(Position::new(row, col)).is_none())
    }

    fn any_attacked(&self, row: i8, cols: &[i8], by: Color) -> bool {
        cols.iter()
            .any(|&col| self.is_square_attacked(Position::new(row, col), by))
    }
}

impl Default for Board {
    fn default() -> Self {
        Self::initial()
    }
}

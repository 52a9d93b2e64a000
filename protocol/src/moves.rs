//! 走法生成和攻击判定

use serde::{Deserialize, Serialize};

use crate::board::Board;
use crate::piece::{Color, Piece, PieceKind, Position};

/// 走法类型
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum MoveKind {
    Normal,
    Capture,
    DoublePawnPush,
    EnPassant,
    CastleKingside,
    CastleQueenside,
    /// 兵升变（无论是否吃子）
    Promotion,
}

/// 走法
///
/// 既是合法性校验的比较对象，也直接作为网络载荷发送。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Move {
    pub from: Position,
    pub to: Position,
    pub kind: MoveKind,
    #[serde(default)]
    pub promotes_to: Option<PieceKind>,
}

impl Move {
    /// 创建指定类型的走法
    pub fn new(from: Position, to: Position, kind: MoveKind) -> Self {
        Self {
            from,
            to,
            kind,
            promotes_to: None,
        }
    }

    /// 普通走法
    pub fn normal(from: Position, to: Position) -> Self {
        Self::new(from, to, MoveKind::Normal)
    }

    /// 吃子走法
    pub fn capture(from: Position, to: Position) -> Self {
        Self::new(from, to, MoveKind::Capture)
    }

    /// 升变走法
    pub fn promotion(from: Position, to: Position, promotes_to: PieceKind) -> Self {
        Self {
            from,
            to,
            kind: MoveKind::Promotion,
            promotes_to: Some(promotes_to),
        }
    }

    /// 是否为王车易位
    pub fn is_castle(&self) -> bool {
        matches!(self.kind, MoveKind::CastleKingside | MoveKind::CastleQueenside)
    }
}

impl std::fmt::Display for Move {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}{}", self.from, self.to)?;
        if let Some(kind) = self.promotes_to {
            write!(f, "={}", kind.letter())?;
        }
        Ok(())
    }
}

/// 单个棋子的走法生成函数
pub type GenerateFn = fn(&Board, Position, Piece, &mut Vec<Move>);

const KNIGHT_OFFSETS: [(i8, i8); 8] = [
    (-2, -1),
    (-2, 1),
    (-1, -2),
    (-1, 2),
    (1, -2),
    (1, 2),
    (2, -1),
    (2, 1),
];

const KING_OFFSETS: [(i8, i8); 8] = [
    (-1, -1),
    (-1, 0),
    (-1, 1),
    (0, -1),
    (0, 1),
    (1, -1),
    (1, 0),
    (1, 1),
];

const ROOK_DIRECTIONS: [(i8, i8); 4] = [(-1, 0), (1, 0), (0, -1), (0, 1)];

const BISHOP_DIRECTIONS: [(i8, i8); 4] = [(-1, -1), (-1, 1), (1, -1), (1, 1)];

/// 走法生成器
pub struct MoveGenerator;

impl MoveGenerator {
    /// 按棋子类型取得生成函数
    pub fn generator(kind: PieceKind) -> GenerateFn {
        match kind {
            PieceKind::Pawn => Self::generate_pawn_moves,
            PieceKind::Knight => Self::generate_knight_moves,
            PieceKind::Bishop => Self::generate_bishop_moves,
            PieceKind::Rook => Self::generate_rook_moves,
            PieceKind::Queen => Self::generate_queen_moves,
            PieceKind::King => Self::generate_king_moves,
        }
    }

    /// 生成指定位置棋子的伪合法走法（不考虑己方是否被将军）
    pub fn generate(board: &Board, pos: Position) -> Vec<Move> {
        let mut moves = Vec::with_capacity(32);
        if let Some(piece) = board.get(pos) {
            Self::generator(piece.kind)(board, pos, piece, &mut moves);
        }
        moves
    }

    /// 生成指定阵营的所有伪合法走法
    pub fn generate_pseudo_legal(board: &Board, color: Color) -> Vec<Move> {
        let mut moves = Vec::with_capacity(64);
        for (pos, piece) in board.pieces(color) {
            Self::generator(piece.kind)(board, pos, piece, &mut moves);
        }
        moves
    }

    /// 生成兵的走法
    fn generate_pawn_moves(board: &Board, pos: Position, piece: Piece, moves: &mut Vec<Move>) {
        let dir = piece.color.pawn_direction();

        if let Some(one) = pos.offset(dir, 0) {
            if board.get(one).is_none() {
                Self::add_pawn_move(pos, one, piece.color, MoveKind::Normal, moves);

                // 双步只能从初始行走，且两格都必须为空
                if pos.row == piece.color.pawn_start_row() {
                    if let Some(two) = pos.offset(dir * 2, 0) {
                        if board.get(two).is_none() {
                            moves.push(Move::new(pos, two, MoveKind::DoublePawnPush));
                        }
                    }
                }
            }
        }

        for dc in [-1, 1] {
            let Some(diag) = pos.offset(dir, dc) else {
                continue;
            };
            match board.get(diag) {
                Some(target) if target.color != piece.color => {
                    Self::add_pawn_move(pos, diag, piece.color, MoveKind::Capture, moves);
                }
                None if board.en_passant_target() == Some(diag) => {
                    // 被吃的兵在起点同一行、落点同一列
                    let victim = board.get(Position::new(pos.row, diag.col));
                    if matches!(victim, Some(v) if v.kind == PieceKind::Pawn && v.color != piece.color)
                    {
                        moves.push(Move::new(pos, diag, MoveKind::EnPassant));
                    }
                }
                _ => {}
            }
        }
    }

    /// 兵到达底线时展开为四种升变
    fn add_pawn_move(
        from: Position,
        to: Position,
        color: Color,
        kind: MoveKind,
        moves: &mut Vec<Move>,
    ) {
        if to.row == color.promotion_row() {
            for promotes_to in PieceKind::PROMOTION_CHOICES {
                moves.push(Move::promotion(from, to, promotes_to));
            }
        } else {
            moves.push(Move::new(from, to, kind));
        }
    }

    /// 生成马的走法
    fn generate_knight_moves(board: &Board, pos: Position, piece: Piece, moves: &mut Vec<Move>) {
        for (dr, dc) in KNIGHT_OFFSETS {
            if let Some(to) = pos.offset(dr, dc) {
                Self::try_add_move(board, pos, to, piece.color, moves);
            }
        }
    }

    fn generate_bishop_moves(board: &Board, pos: Position, piece: Piece, moves: &mut Vec<Move>) {
        Self::generate_sliding_moves(board, pos, piece.color, &BISHOP_DIRECTIONS, moves);
    }

    fn generate_rook_moves(board: &Board, pos: Position, piece: Piece, moves: &mut Vec<Move>) {
        Self::generate_sliding_moves(board, pos, piece.color, &ROOK_DIRECTIONS, moves);
    }

    fn generate_queen_moves(board: &Board, pos: Position, piece: Piece, moves: &mut Vec<Move>) {
        Self::generate_sliding_moves(board, pos, piece.color, &ROOK_DIRECTIONS, moves);
        Self::generate_sliding_moves(board, pos, piece.color, &BISHOP_DIRECTIONS, moves);
    }

    /// 沿方向滑动：遇到己方棋子停止，遇到敌方棋子吃子后停止
    fn generate_sliding_moves(
        board: &Board,
        pos: Position,
        color: Color,
        directions: &[(i8, i8)],
        moves: &mut Vec<Move>,
    ) {
        for &(dr, dc) in directions {
            let mut current = pos;
            while let Some(next) = current.offset(dr, dc) {
                match board.get(next) {
                    None => moves.push(Move::normal(pos, next)),
                    Some(target) => {
                        if target.color != color {
                            moves.push(Move::capture(pos, next));
                        }
                        break;
                    }
                }
                current = next;
            }
        }
    }

    /// 生成王的走法（含王车易位）
    fn generate_king_moves(board: &Board, pos: Position, piece: Piece, moves: &mut Vec<Move>) {
        for (dr, dc) in KING_OFFSETS {
            if let Some(to) = pos.offset(dr, dc) {
                Self::try_add_move(board, pos, to, piece.color, moves);
            }
        }

        if piece.has_moved {
            return;
        }
        let back = piece.color.back_rank();
        if board.can_castle_king_side(piece.color) {
            moves.push(Move::new(pos, Position::new(back, 6), MoveKind::CastleKingside));
        }
        if board.can_castle_queen_side(piece.color) {
            moves.push(Move::new(pos, Position::new(back, 2), MoveKind::CastleQueenside));
        }
    }

    /// 尝试添加走法：空位为普通走法，敌子为吃子
    fn try_add_move(board: &Board, from: Position, to: Position, color: Color, moves: &mut Vec<Move>) {
        match board.get(to) {
            None => moves.push(Move::normal(from, to)),
            Some(target) if target.color != color => moves.push(Move::capture(from, to)),
            Some(_) => {}
        }
    }

    /// 检查指定阵营是否被将军
    pub fn is_in_check(board: &Board, color: Color) -> bool {
        match board.find_king(color) {
            Some(king_pos) => Self::is_square_attacked(board, king_pos, color.opponent()),
            None => false,
        }
    }

    /// 检查某格是否被指定阵营攻击
    pub fn is_square_attacked(board: &Board, target: Position, by: Color) -> bool {
        board
            .pieces(by)
            .into_iter()
            .any(|(pos, piece)| Self::can_attack(board, pos, piece, target))
    }

    /// 检查棋子是否能攻击目标位置
    ///
    /// 王只做相邻判定，不会递归进入走法生成（王车易位检查依赖这一点）。
    fn can_attack(board: &Board, from: Position, piece: Piece, target: Position) -> bool {
        if from == target {
            return false;
        }
        let dr = target.row - from.row;
        let dc = target.col - from.col;

        match piece.kind {
            PieceKind::Pawn => dr == piece.color.pawn_direction() && dc.abs() == 1,
            PieceKind::Knight => {
                (dr.abs() == 1 && dc.abs() == 2) || (dr.abs() == 2 && dc.abs() == 1)
            }
            PieceKind::King => dr.abs() <= 1 && dc.abs() <= 1,
            PieceKind::Rook => (dr == 0 || dc == 0) && Self::ray_is_clear(board, from, target),
            PieceKind::Bishop => dr.abs() == dc.abs() && Self::ray_is_clear(board, from, target),
            PieceKind::Queen => {
                (dr == 0 || dc == 0 || dr.abs() == dc.abs())
                    && Self::ray_is_clear(board, from, target)
            }
        }
    }

    /// 检查两点之间（不含端点）是否无子
    fn ray_is_clear(board: &Board, from: Position, target: Position) -> bool {
        let step_r = (target.row - from.row).signum();
        let step_c = (target.col - from.col).signum();
        let mut current = Position::new(from.row + step_r, from.col + step_c);

        while current != target {
            if board.get(current).is_some() {
                return false;
            }
            current = Position::new(current.row + step_r, current.col + step_c);
        }
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pos(s: &str) -> Position {
        Position::from_algebraic(s).unwrap()
    }

    #[test]
    fn test_initial_moves() {
        let board = Board::initial();
        let moves = MoveGenerator::generate_pseudo_legal(&board, Color::White);
        // 16 个兵步 + 4 个马步
        assert_eq!(moves.len(), 20);

        let e2 = MoveGenerator::generate(&board, pos("e2"));
        assert!(e2.contains(&Move::normal(pos("e2"), pos("e3"))));
        assert!(e2.contains(&Move::new(pos("e2"), pos("e4"), MoveKind::DoublePawnPush)));
    }

    #[test]
    fn test_sliding_stops_at_pieces() {
        let mut board = Board::empty();
        board.set(pos("a1"), Some(Piece::new(PieceKind::Rook, Color::White)));
        board.set(pos("a4"), Some(Piece::new(PieceKind::Pawn, Color::White)));
        board.set(pos("c1"), Some(Piece::new(PieceKind::Knight, Color::Black)));

        let moves = MoveGenerator::generate(&board, pos("a1"));
        assert!(moves.contains(&Move::normal(pos("a1"), pos("a3"))));
        assert!(!moves.contains(&Move::normal(pos("a1"), pos("a4"))));
        assert!(moves.contains(&Move::capture(pos("a1"), pos("c1"))));
        assert!(!moves.iter().any(|m| m.to == pos("d1")));
        assert_eq!(moves.len(), 4);
    }

    #[test]
    fn test_pawn_promotion_choices() {
        let mut board = Board::empty();
        board.set(pos("b7"), Some(Piece::new(PieceKind::Pawn, Color::White)));
        board.set(pos("a8"), Some(Piece::new(PieceKind::Rook, Color::Black)));

        let moves = MoveGenerator::generate(&board, pos("b7"));
        // 直进 4 种 + 吃子 4 种
        assert_eq!(moves.len(), 8);
        assert!(moves.iter().all(|m| m.kind == MoveKind::Promotion));
        assert!(moves.contains(&Move::promotion(pos("b7"), pos("a8"), PieceKind::Knight)));
    }

    #[test]
    fn test_en_passant_generation() {
        let mut board = Board::empty();
        board.set(pos("e5"), Some(Piece::new(PieceKind::Pawn, Color::White)));
        board.set(pos("d7"), Some(Piece::new(PieceKind::Pawn, Color::Black)));
        board.apply_move(&Move::new(pos("d7"), pos("d5"), MoveKind::DoublePawnPush));

        assert_eq!(board.en_passant_target(), Some(pos("d6")));
        let moves = MoveGenerator::generate(&board, pos("e5"));
        assert!(moves.contains(&Move::new(pos("e5"), pos("d6"), MoveKind::EnPassant)));
    }

    #[test]
    fn test_pawn_attacks_only_diagonally() {
        let mut board = Board::empty();
        board.set(pos("e4"), Some(Piece::new(PieceKind::Pawn, Color::White)));

        assert!(MoveGenerator::is_square_attacked(&board, pos("d5"), Color::White));
        assert!(MoveGenerator::is_square_attacked(&board, pos("f5"), Color::White));
        assert!(!MoveGenerator::is_square_attacked(&board, pos("e5"), Color::White));
    }

    #[test]
    fn test_king_adjacency_check() {
        let mut board = Board::empty();
        board.set(pos("e1"), Some(Piece::new(PieceKind::King, Color::White)));
        board.set(pos("e2"), Some(Piece::new(PieceKind::King, Color::Black)));

        assert!(MoveGenerator::is_in_check(&board, Color::White));
        assert!(MoveGenerator::is_in_check(&board, Color::Black));
    }
}

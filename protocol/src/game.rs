//! 对局状态机
//!
//! 走子方、合法性过滤、终局判定、历史与重放式悔棋。

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::board::Board;
use crate::constants::{FIFTY_MOVE_LIMIT, REPETITION_LIMIT};
use crate::error::ChessError;
use crate::fen::{Fen, FenPosition};
use crate::moves::{Move, MoveGenerator, MoveKind};
use crate::piece::{Color, PieceKind, Position};

/// 对局结果
///
/// 带颜色的变体里，颜色一律是输的一方：`CheckmateWhite` 表示白方被将死。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum GameResult {
    Ongoing,
    /// 白方被将死
    CheckmateWhite,
    /// 黑方被将死
    CheckmateBlack,
    Stalemate,
    DrawByAgreement,
    DrawFiftyMove,
    DrawThreefold,
    /// 该方认输
    Resigned(Color),
    /// 该方超时
    TimedOut(Color),
    /// 该方离开对局
    Abandoned(Color),
}

impl GameResult {
    /// 是否已终局
    pub fn is_terminal(&self) -> bool {
        *self != GameResult::Ongoing
    }

    /// 胜方，和棋或未结束时为 None
    pub fn winner(&self) -> Option<Color> {
        match self {
            GameResult::CheckmateWhite => Some(Color::Black),
            GameResult::CheckmateBlack => Some(Color::White),
            GameResult::Resigned(loser)
            | GameResult::TimedOut(loser)
            | GameResult::Abandoned(loser) => Some(loser.opponent()),
            _ => None,
        }
    }

    /// 面向玩家的描述
    pub fn describe(&self) -> String {
        match self {
            GameResult::Ongoing => "Game in progress".to_string(),
            GameResult::CheckmateWhite => "White is checkmated. Black wins!".to_string(),
            GameResult::CheckmateBlack => "Black is checkmated. White wins!".to_string(),
            GameResult::Stalemate => "Stalemate. Draw.".to_string(),
            GameResult::DrawByAgreement => "Draw by agreement.".to_string(),
            GameResult::DrawFiftyMove => "Draw by the fifty-move rule.".to_string(),
            GameResult::DrawThreefold => "Draw by threefold repetition.".to_string(),
            GameResult::Resigned(color) => {
                format!("{} resigned. {} wins!", color, color.opponent())
            }
            GameResult::TimedOut(color) => {
                format!("{} ran out of time. {} wins!", color, color.opponent())
            }
            GameResult::Abandoned(color) => {
                format!("{} left the game. {} wins!", color, color.opponent())
            }
        }
    }
}

/// 交给界面层的只读局面快照
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GameSnapshot {
    pub board: Board,
    pub turn: Color,
    pub result: GameResult,
    pub last_move: Option<Move>,
    pub move_count: usize,
    pub in_check: bool,
    pub half_move_clock: u32,
}

/// 一局棋
#[derive(Debug, Clone)]
pub struct Game {
    board: Board,
    turn: Color,
    result: GameResult,
    history: Vec<Move>,
    /// 距上次兵步或吃子的半回合数
    half_move_clock: u32,
    /// 局面指纹 -> 出现次数
    position_history: HashMap<String, u32>,
    /// 重放起点（悔棋从这里重新走）
    start: FenPosition,
}

impl Game {
    /// 标准初始局面
    pub fn new() -> Self {
        Self::from_position(FenPosition::initial())
    }

    /// 从 FEN 开局
    pub fn from_fen(fen: &str) -> Result<Self, ChessError> {
        Ok(Self::from_position(Fen::parse(fen)?))
    }

    fn from_position(start: FenPosition) -> Self {
        let mut game = Self {
            board: start.board.clone(),
            turn: start.turn,
            result: GameResult::Ongoing,
            history: Vec::new(),
            half_move_clock: start.half_move_clock,
            position_history: HashMap::new(),
            start,
        };
        game.record_position();
        game.result = game.compute_result();
        game
    }

    /// 回到标准初始局面，清空历史
    pub fn reset(&mut self) {
        *self = Self::new();
    }

    pub fn board(&self) -> &Board {
        &self.board
    }

    pub fn turn(&self) -> Color {
        self.turn
    }

    pub fn result(&self) -> GameResult {
        self.result
    }

    pub fn history(&self) -> &[Move] {
        &self.history
    }

    pub fn half_move_clock(&self) -> u32 {
        self.half_move_clock
    }

    pub fn last_move(&self) -> Option<Move> {
        self.history.last().copied()
    }

    pub fn is_over(&self) -> bool {
        self.result.is_terminal()
    }

    /// 走子方是否被将军
    pub fn is_in_check(&self) -> bool {
        self.board.is_in_check(self.turn)
    }

    /// 当前局面已出现的次数
    pub fn repetition_count(&self) -> u32 {
        self.position_history
            .get(&self.fingerprint())
            .copied()
            .unwrap_or(0)
    }

    /// 指定位置棋子的合法走法
    ///
    /// 没有棋子或不是走子方的棋子时返回空。
    pub fn legal_moves_for(&self, pos: Position) -> Vec<Move> {
        match self.board.get(pos) {
            Some(piece) if piece.color == self.turn => {}
            _ => return Vec::new(),
        }

        MoveGenerator::generate(&self.board, pos)
            .into_iter()
            .filter(|mv| self.keeps_king_safe(mv))
            .collect()
    }

    /// 走子方的全部合法走法
    pub fn all_legal_moves(&self) -> Vec<Move> {
        MoveGenerator::generate_pseudo_legal(&self.board, self.turn)
            .into_iter()
            .filter(|mv| self.keeps_king_safe(mv))
            .collect()
    }

    /// 在棋盘副本上模拟走法，检查己方王是否安全
    fn keeps_king_safe(&self, mv: &Move) -> bool {
        let Some(piece) = self.board.get(mv.from) else {
            return false;
        };
        let mut test_board = self.board.clone();
        test_board.apply_move(mv);
        !test_board.is_in_check(piece.color)
    }

    /// 校验后执行走法
    pub fn apply_move_if_legal(&mut self, mv: Move) -> Result<GameResult, ChessError> {
        if self.is_over() {
            return Err(ChessError::GameOver);
        }
        let piece = self.board.get(mv.from).ok_or(ChessError::NoPiece(mv.from))?;
        if piece.color != self.turn {
            return Err(ChessError::WrongColor(mv.from));
        }
        if !self.legal_moves_for(mv.from).contains(&mv) {
            return Err(ChessError::IllegalMove {
                from: mv.from,
                to: mv.to,
            });
        }

        self.apply_internal(mv);
        Ok(self.result)
    }

    /// 执行对手发来的走法
    ///
    /// 对手已经在本地校验过，这里仍然拒绝结构上不可能的走法。
    /// 起止格吻合但类型不一致时，按本地生成的走法执行并记录告警。
    pub fn apply_remote_move(&mut self, mv: Move) -> Result<GameResult, ChessError> {
        if self.is_over() {
            return Err(ChessError::GameOver);
        }
        let Some(piece) = self.board.get(mv.from) else {
            warn!(%mv, "remote move from an empty square");
            return Err(ChessError::NoPiece(mv.from));
        };
        if piece.color != self.turn {
            warn!(%mv, turn = %self.turn, "remote move by the wrong side");
            return Err(ChessError::WrongColor(mv.from));
        }

        let legal = self.legal_moves_for(mv.from);
        if legal.contains(&mv) {
            self.apply_internal(mv);
            return Ok(self.result);
        }

        let wanted = mv.promotes_to.or_else(|| {
            (piece.kind == PieceKind::Pawn && mv.to.row == piece.color.promotion_row())
                .then_some(PieceKind::Queen)
        });
        match legal
            .into_iter()
            .find(|m| m.to == mv.to && m.promotes_to == wanted)
        {
            Some(canonical) => {
                warn!(received = ?mv.kind, applied = ?canonical.kind, "remote move kind mismatch");
                self.apply_internal(canonical);
                Ok(self.result)
            }
            None => {
                warn!(%mv, "remote move is not legal in the local position");
                Err(ChessError::IllegalMove {
                    from: mv.from,
                    to: mv.to,
                })
            }
        }
    }

    /// 外部设定终局（和棋协议、认输、超时、离开）
    pub fn conclude(&mut self, result: GameResult) -> bool {
        if self.is_over() || !result.is_terminal() {
            return false;
        }
        self.result = result;
        true
    }

    /// 悔一步：丢弃最后一手，从起点重放剩余历史
    pub fn undo_last_move(&mut self) -> Option<Move> {
        let mut moves = std::mem::take(&mut self.history);
        let undone = moves.pop()?;

        let start = self.start.clone();
        *self = Self::from_position(start);
        for mv in moves {
            self.apply_internal(mv);
        }
        Some(undone)
    }

    /// 从标准开局按顺序重放一组走法，全部合法才替换当前对局
    pub fn replay(moves: &[Move]) -> Result<Self, ChessError> {
        let mut game = Self::new();
        for mv in moves {
            game.apply_move_if_legal(*mv)?;
        }
        Ok(game)
    }

    fn apply_internal(&mut self, mv: Move) {
        let resets_clock = self.board.get(mv.to).is_some()
            || mv.kind == MoveKind::EnPassant
            || matches!(self.board.get(mv.from), Some(p) if p.kind == PieceKind::Pawn);

        self.board.apply_move(&mv);
        self.history.push(mv);
        self.turn = self.turn.opponent();

        if resets_clock {
            // 兵步或吃子之后，之前的局面不可能再出现
            self.half_move_clock = 0;
            self.position_history.clear();
        } else {
            self.half_move_clock += 1;
        }

        self.record_position();
        self.result = self.compute_result();
    }

    fn record_position(&mut self) {
        *self.position_history.entry(self.fingerprint()).or_insert(0) += 1;
    }

    fn compute_result(&self) -> GameResult {
        if self.all_legal_moves().is_empty() {
            if self.is_in_check() {
                return match self.turn {
                    Color::White => GameResult::CheckmateWhite,
                    Color::Black => GameResult::CheckmateBlack,
                };
            }
            return GameResult::Stalemate;
        }
        if self.half_move_clock >= FIFTY_MOVE_LIMIT {
            return GameResult::DrawFiftyMove;
        }
        if self.repetition_count() >= REPETITION_LIMIT {
            return GameResult::DrawThreefold;
        }
        GameResult::Ongoing
    }

    /// 局面指纹：摆放 | 走子方 | 易位权 | 过路兵目标
    pub fn fingerprint(&self) -> String {
        format!(
            "{}|{}|{}|{}",
            Fen::placement(&self.board),
            self.turn.to_fen_char(),
            Fen::castling_rights(&self.board),
            self.board
                .en_passant_target()
                .map(|p| p.to_string())
                .unwrap_or_else(|| "-".to_string())
        )
    }

    /// 当前局面的 FEN
    pub fn to_fen(&self) -> String {
        let plies = self.history.len() as u32 + u32::from(self.start.turn == Color::Black);
        Fen::to_string(&FenPosition {
            board: self.board.clone(),
            turn: self.turn,
            half_move_clock: self.half_move_clock,
            full_move: self.start.full_move + plies / 2,
        })
    }

    /// 界面快照
    pub fn snapshot(&self) -> GameSnapshot {
        GameSnapshot {
            board: self.board.clone(),
            turn: self.turn,
            result: self.result,
            last_move: self.last_move(),
            move_count: self.history.len(),
            in_check: self.is_in_check(),
            half_move_clock: self.half_move_clock,
        }
    }
}

impl Default for Game {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::notation::Notation;

    fn play(game: &mut Game, moves: &[&str]) {
        for s in moves {
            let mv = Notation::resolve(game, s).unwrap();
            game.apply_move_if_legal(mv).unwrap();
        }
    }

    #[test]
    fn test_fools_mate() {
        let mut game = Game::new();
        play(&mut game, &["f2f3", "e7e5", "g2g4", "d8h4"]);

        assert_eq!(game.result(), GameResult::CheckmateWhite);
        assert_eq!(game.result().winner(), Some(Color::Black));
        assert!(game.all_legal_moves().is_empty());

        let mv = Move::normal(Position::new(6, 0), Position::new(5, 0));
        assert_eq!(game.apply_move_if_legal(mv), Err(ChessError::GameOver));
    }

    #[test]
    fn test_rejects_wrong_turn_and_illegal() {
        let mut game = Game::new();
        let black = Move::normal(Position::new(1, 4), Position::new(2, 4));
        assert_eq!(
            game.apply_move_if_legal(black),
            Err(ChessError::WrongColor(Position::new(1, 4)))
        );

        let jump = Move::normal(Position::new(6, 4), Position::new(3, 4));
        assert!(matches!(
            game.apply_move_if_legal(jump),
            Err(ChessError::IllegalMove { .. })
        ));
        assert!(game.history().is_empty());
        assert_eq!(game.board(), &Board::initial());
    }

    #[test]
    fn test_legal_moves_never_leave_king_in_check() {
        let mut game = Game::new();

        for ply in 0..60 {
            let moves = game.all_legal_moves();
            if moves.is_empty() || game.is_over() {
                break;
            }
            for mv in &moves {
                let mut board = game.board().clone();
                board.apply_move(mv);
                assert!(!board.is_in_check(game.turn()), "{} leaves king in check", mv);
            }
            let mv = moves[(ply * 7 + 3) % moves.len()];
            game.apply_move_if_legal(mv).unwrap();
        }
    }

    #[test]
    fn test_pinned_piece_cannot_move() {
        let game = Game::from_fen("4k3/4r3/8/8/8/8/4N3/4K3 w - - 0 1").unwrap();
        assert!(game.legal_moves_for(Position::from_algebraic("e2").unwrap()).is_empty());
    }

    #[test]
    fn test_fifty_move_rule_from_clock() {
        let mut game = Game::from_fen("4k3/8/8/8/8/8/8/R3K3 w - - 98 60").unwrap();
        play(&mut game, &["a1a2"]);
        assert_eq!(game.result(), GameResult::Ongoing);
        assert_eq!(game.half_move_clock(), 99);

        play(&mut game, &["e8d8"]);
        assert_eq!(game.result(), GameResult::DrawFiftyMove);
    }

    #[test]
    fn test_fifty_move_rule_by_play() {
        let mut game = Game::from_fen("r3k3/8/8/8/8/8/8/4K2R w - - 0 1").unwrap();

        for ply in 0..100 {
            let next = game
                .all_legal_moves()
                .into_iter()
                .filter(|mv| game.board().get(mv.to).is_none())
                .find_map(|mv| {
                    let mut trial = game.clone();
                    trial.apply_move_if_legal(mv).ok()?;
                    let wanted = if ply == 99 {
                        GameResult::DrawFiftyMove
                    } else {
                        GameResult::Ongoing
                    };
                    (trial.repetition_count() == 1 && trial.result() == wanted).then_some(mv)
                })
                .expect("a fresh quiet move exists");

            game.apply_move_if_legal(next).unwrap();
            if ply == 98 {
                assert_eq!(game.half_move_clock(), 99);
                assert_eq!(game.result(), GameResult::Ongoing);
            }
        }

        assert_eq!(game.half_move_clock(), 100);
        assert_eq!(game.result(), GameResult::DrawFiftyMove);
    }

    #[test]
    fn test_pawn_move_resets_clock_and_repetition() {
        let mut game = Game::new();
        play(&mut game, &["g1f3", "g8f6"]);
        assert_eq!(game.half_move_clock(), 2);

        play(&mut game, &["e2e4"]);
        assert_eq!(game.half_move_clock(), 0);
        assert_eq!(game.repetition_count(), 1);
    }

    #[test]
    fn test_threefold_on_third_occurrence() {
        let mut game = Game::from_fen("4k3/8/8/8/8/8/4P3/4K3 w - - 0 1").unwrap();
        let shuffle = ["e1d1", "e8d8", "d1e1", "d8e8"];

        play(&mut game, &shuffle);
        assert_eq!(game.repetition_count(), 2);
        assert_eq!(game.result(), GameResult::Ongoing);

        play(&mut game, &shuffle[..3]);
        assert_eq!(game.result(), GameResult::Ongoing);

        play(&mut game, &shuffle[3..]);
        assert_eq!(game.repetition_count(), 3);
        assert_eq!(game.result(), GameResult::DrawThreefold);
    }

    #[test]
    fn test_castling_through_game() {
        let mut game = Game::new();
        play(&mut game, &["e2e4", "e7e5", "g1f3", "b8c6", "f1c4", "g8f6", "e1g1"]);

        let board = game.board();
        assert_eq!(board.get(Position::new(7, 6)).unwrap().kind, PieceKind::King);
        assert_eq!(board.get(Position::new(7, 5)).unwrap().kind, PieceKind::Rook);
        assert_eq!(game.last_move().unwrap().kind, MoveKind::CastleKingside);
    }

    #[test]
    fn test_undo_replay_law() {
        let mut game = Game::new();
        play(
            &mut game,
            &["e2e4", "d7d5", "e4d5", "d8d5", "b1c3", "d5a5", "g1f3", "c8g4", "f1e2", "b8c6", "e1g1"],
        );
        let before = game.board().clone();
        let clock = game.half_move_clock();

        let undone = game.undo_last_move().unwrap();
        assert_eq!(undone.kind, MoveKind::CastleKingside);
        assert_eq!(game.turn(), Color::White);
        assert_eq!(game.history().len(), 10);

        game.apply_move_if_legal(undone).unwrap();
        assert_eq!(game.board(), &before);
        assert_eq!(game.half_move_clock(), clock);
    }

    #[test]
    fn test_undo_on_empty_history() {
        let mut game = Game::new();
        assert_eq!(game.undo_last_move(), None);
        assert_eq!(game.board(), &Board::initial());
    }

    #[test]
    fn test_en_passant_and_promotion() {
        let mut game = Game::new();
        play(&mut game, &["e2e4", "a7a6", "e4e5", "d7d5", "e5d6"]);
        assert_eq!(game.last_move().unwrap().kind, MoveKind::EnPassant);
        assert!(game.board().get(Position::from_algebraic("d5").unwrap()).is_none());

        play(&mut game, &["a6a5", "d6c7", "a5a4", "c7b8n"]);
        let piece = game.board().get(Position::from_algebraic("b8").unwrap()).unwrap();
        assert_eq!(piece.kind, PieceKind::Knight);
        assert_eq!(piece.color, Color::White);
    }

    #[test]
    fn test_remote_move_kind_mismatch_uses_local_move() {
        let mut game = Game::new();
        // 对方把双步写成普通走法
        let sloppy = Move::normal(Position::new(6, 4), Position::new(4, 4));
        game.apply_remote_move(sloppy).unwrap();

        assert_eq!(game.last_move().unwrap().kind, MoveKind::DoublePawnPush);
        assert_eq!(game.board().en_passant_target(), Some(Position::new(5, 4)));
    }

    #[test]
    fn test_remote_move_accepts_every_legal_move() {
        let mut game = Game::new();

        for ply in 0..40 {
            let moves = game.all_legal_moves();
            if moves.is_empty() || game.is_over() {
                break;
            }
            for mv in &moves {
                let mut strict = game.clone();
                let mut remote = game.clone();
                let expected = strict.apply_move_if_legal(*mv).unwrap();
                assert_eq!(remote.apply_remote_move(*mv), Ok(expected), "{} rejected remotely", mv);
                assert_eq!(remote.board(), strict.board());
            }
            let mv = moves[(ply * 5 + 1) % moves.len()];
            game.apply_move_if_legal(mv).unwrap();
        }
    }

    #[test]
    fn test_remote_move_structural_rejects() {
        let mut game = Game::new();
        let empty = Move::normal(Position::new(4, 4), Position::new(3, 4));
        assert_eq!(game.apply_remote_move(empty), Err(ChessError::NoPiece(empty.from)));

        let wrong = Move::normal(Position::new(1, 0), Position::new(2, 0));
        assert_eq!(game.apply_remote_move(wrong), Err(ChessError::WrongColor(wrong.from)));
        assert!(game.history().is_empty());
    }

    #[test]
    fn test_conclude_only_once() {
        let mut game = Game::new();
        assert!(game.conclude(GameResult::DrawByAgreement));
        assert!(!game.conclude(GameResult::Resigned(Color::White)));
        assert_eq!(game.result(), GameResult::DrawByAgreement);
        assert_eq!(game.result().winner(), None);
    }

    #[test]
    fn test_replay_and_fen() {
        let mut game = Game::new();
        play(&mut game, &["e2e4", "c7c5", "g1f3"]);

        let copy = Game::replay(game.history()).unwrap();
        assert_eq!(copy.fingerprint(), game.fingerprint());
        assert_eq!(
            copy.to_fen(),
            "rnbqkbnr/pp1ppppp/8/2p5/4P3/5N2/PPPP1PPP/RNBQKB1R b KQkq - 1 2"
        );

        let bogus = [Move::normal(Position::new(6, 4), Position::new(3, 4))];
        assert!(Game::replay(&bogus).is_err());
    }
}

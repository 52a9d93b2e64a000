//! 对局同步
//!
//! `GameSync` 独占一局棋、棋钟和会话。协调任务是唯一的持有者，
//! 本地走法和对手走法都在同一个任务里串行应用。

use tracing::{debug, info, warn};

use protocol::{ChessError, Color, Game, GameClock, GameResult, GameSnapshot, Move};

use super::session::Session;

/// 对局同步器
pub struct GameSync {
    game: Game,
    clock: GameClock,
    session: Session,
    initial_time_ms: u64,
}

impl GameSync {
    pub fn new(session: Session, initial_time_ms: u64) -> Self {
        Self {
            game: Game::new(),
            clock: GameClock::with_time(initial_time_ms),
            session,
            initial_time_ms,
        }
    }

    pub fn game(&self) -> &Game {
        &self.game
    }

    pub fn clock(&self) -> &GameClock {
        &self.clock
    }

    pub fn session(&self) -> &Session {
        &self.session
    }

    pub fn session_mut(&mut self) -> &mut Session {
        &mut self.session
    }

    pub fn snapshot(&self) -> GameSnapshot {
        self.game.snapshot()
    }

    /// 应用本地走法
    ///
    /// 对局中先确认轮到本方，再交给规则引擎校验。失败时不修改任何状态。
    /// 发送由调用方在成功后进行。
    pub fn apply_local_move(&mut self, mv: Move) -> Result<GameResult, ChessError> {
        if self.session.in_match() && self.session.local_color != self.game.turn() {
            debug!(%mv, turn = %self.game.turn(), "local move out of turn");
            return Err(ChessError::NotYourTurn);
        }

        let result = self.game.apply_move_if_legal(mv)?;
        self.after_move(result);
        Ok(result)
    }

    /// 应用对手走法
    ///
    /// 走宽松路径：它接受所有严格合法的走法，另外容忍走法种类标错，
    /// 所以这里被拒就说明局面已经分叉，不再用严格路径重试。
    pub fn apply_remote_move(&mut self, mv: Move, from: &str) -> Result<GameResult, ChessError> {
        if self.session.in_match() && self.session.local_color == self.game.turn() {
            warn!(from, %mv, "opponent moved during our turn");
            return Err(ChessError::NotYourTurn);
        }

        let result = self.game.apply_remote_move(mv).map_err(|e| {
            warn!(from, %mv, error = %e, "remote move dropped, positions have diverged");
            e
        })?;

        self.after_move(result);
        Ok(result)
    }

    fn after_move(&mut self, result: GameResult) {
        if result.is_terminal() {
            self.clock.pause();
        } else {
            self.clock.switch_turn();
        }
    }

    /// 回到初始局面，白方先走，棋钟重新开始
    ///
    /// 连续调用结果相同。
    pub fn sync_game_state(&mut self) {
        self.game.reset();
        self.clock = GameClock::with_time(self.initial_time_ms);
        self.clock.start(Color::White);
        self.session.clear_requests();
        info!(color = %self.session.local_color, "game state synchronized, White to move");
    }

    /// 房间完成或收到开局信号时调用；同一房间只重置一次
    pub fn start_match(&mut self, room_id: &str) -> bool {
        if !self.session.mark_synced(room_id) {
            debug!(room_id, "match already started");
            return false;
        }
        self.sync_game_state();
        true
    }

    /// 用对手发来的完整历史替换本地对局
    pub fn replay_moves(&mut self, moves: &[Move]) -> Result<(), ChessError> {
        self.game = Game::replay(moves)?;
        self.align_clock();
        if self.game.is_over() {
            self.clock.pause();
        }
        info!(moves = moves.len(), "replayed game history");
        Ok(())
    }

    /// 悔一步；对局已结束或没有历史时返回 None
    pub fn undo(&mut self) -> Option<Move> {
        if self.game.is_over() {
            return None;
        }
        let undone = self.game.undo_last_move()?;
        self.align_clock();
        Some(undone)
    }

    fn align_clock(&mut self) {
        if self.clock.current_turn() != self.game.turn() {
            self.clock.switch_turn();
        }
    }

    /// 外部终局（认输、和棋、超时、离开）
    pub fn conclude(&mut self, result: GameResult) -> bool {
        if !self.game.conclude(result) {
            return false;
        }
        self.clock.pause();
        true
    }

    /// 用对手随走法带来的时间校正本地棋钟
    pub fn apply_clock_snapshot(&mut self, white_ms: u64, black_ms: u64) {
        self.clock.set_times(white_ms, black_ms);
    }

    pub fn pause_clock(&mut self) {
        self.clock.pause();
    }

    pub fn resume_clock(&mut self) {
        if self.session.in_match() && !self.game.is_over() {
            self.clock.resume();
        }
    }

    /// 对局中走子方时间耗尽时返回该方
    pub fn flag_fallen(&self) -> Option<Color> {
        let turn = self.game.turn();
        (self.session.in_match()
            && !self.game.is_over()
            && self.clock.is_running()
            && self.clock.is_timeout(turn))
        .then_some(turn)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use protocol::{Board, Notation, Position, INITIAL_TIME_MS};

    fn matched(color: Color) -> GameSync {
        let mut session = Session::new("alice");
        session.assign_room("ABC123", color);
        session.set_opponent("bob");
        let mut sync = GameSync::new(session, INITIAL_TIME_MS);
        assert!(sync.start_match("ABC123"));
        sync
    }

    fn mv(sync: &GameSync, s: &str) -> Move {
        Notation::resolve(sync.game(), s).unwrap()
    }

    #[test]
    fn test_local_move_checks_turn() {
        let mut sync = matched(Color::Black);
        let e4 = mv(&sync, "e2e4");

        assert_eq!(sync.apply_local_move(e4), Err(ChessError::NotYourTurn));
        assert!(sync.game().history().is_empty());

        sync.apply_remote_move(e4, "bob").unwrap();
        let e5 = mv(&sync, "e7e5");
        assert_eq!(sync.apply_local_move(e5), Ok(GameResult::Ongoing));
        assert_eq!(sync.game().history().len(), 2);
        assert_eq!(sync.clock().current_turn(), Color::White);
    }

    #[test]
    fn test_offline_play_has_no_turn_owner() {
        let mut sync = GameSync::new(Session::new("solo"), INITIAL_TIME_MS);
        let e4 = mv(&sync, "e2e4");
        sync.apply_local_move(e4).unwrap();
        let e5 = mv(&sync, "e7e5");
        sync.apply_local_move(e5).unwrap();
        assert_eq!(sync.game().turn(), Color::White);
    }

    #[test]
    fn test_bad_remote_move_leaves_state() {
        let mut sync = matched(Color::Black);
        let before = sync.game().to_fen();

        // 白方对手想动黑棋
        let bogus = Move::normal(Position::new(1, 0), Position::new(2, 0));
        assert_eq!(
            sync.apply_remote_move(bogus, "bob"),
            Err(ChessError::WrongColor(Position::new(1, 0)))
        );
        // 空格出发
        let empty = Move::normal(Position::new(4, 4), Position::new(3, 4));
        assert!(sync.apply_remote_move(empty, "bob").is_err());
        assert_eq!(sync.game().to_fen(), before);

        // 轮到本方时对手的走法一律拒绝
        let e4 = mv(&sync, "e2e4");
        sync.apply_remote_move(e4, "bob").unwrap();
        let d4 = Move::normal(Position::new(6, 3), Position::new(4, 3));
        assert_eq!(sync.apply_remote_move(d4, "bob"), Err(ChessError::NotYourTurn));
    }

    #[test]
    fn test_sync_is_idempotent() {
        let mut sync = matched(Color::White);
        let e4 = mv(&sync, "e2e4");
        sync.apply_local_move(e4).unwrap();

        sync.sync_game_state();
        let once = sync.snapshot();
        sync.sync_game_state();
        let twice = sync.snapshot();

        assert_eq!(once, twice);
        assert_eq!(*sync.game().board(), Board::initial());
        assert_eq!(sync.game().turn(), Color::White);
        assert!(sync.game().history().is_empty());
        assert!(sync.clock().is_running());
    }

    #[test]
    fn test_start_match_once_per_room() {
        let mut sync = matched(Color::White);
        let e4 = mv(&sync, "e2e4");
        sync.apply_local_move(e4).unwrap();

        // 开局信号晚到，不应清掉已走的棋
        assert!(!sync.start_match("ABC123"));
        assert_eq!(sync.game().history().len(), 1);
    }

    #[test]
    fn test_replay_and_undo() {
        let mut sync = matched(Color::White);
        let moves: Vec<Move> = {
            let mut game = Game::new();
            ["e2e4", "e7e5", "g1f3"]
                .iter()
                .map(|s| {
                    let m = Notation::resolve(&game, s).unwrap();
                    game.apply_move_if_legal(m).unwrap();
                    m
                })
                .collect()
        };

        sync.replay_moves(&moves).unwrap();
        assert_eq!(sync.game().history(), moves.as_slice());
        assert_eq!(sync.clock().current_turn(), Color::Black);

        assert_eq!(sync.undo(), Some(moves[2]));
        assert_eq!(sync.game().turn(), Color::White);
        assert_eq!(sync.clock().current_turn(), Color::White);

        // 非法历史不替换
        let bad = vec![moves[1]];
        assert!(sync.replay_moves(&bad).is_err());
        assert_eq!(sync.game().history().len(), 2);
    }

    #[test]
    fn test_conclude_stops_clock() {
        let mut sync = matched(Color::White);
        assert!(sync.conclude(GameResult::Resigned(Color::White)));
        assert!(!sync.clock().is_running());
        assert!(!sync.conclude(GameResult::DrawByAgreement));
        assert_eq!(sync.undo(), None);
        assert_eq!(sync.flag_fallen(), None);
    }

    #[test]
    fn test_flag_fall() {
        let mut session = Session::new("alice");
        session.assign_room("ABC123", Color::White);
        session.set_opponent("bob");
        let mut sync = GameSync::new(session, 0);
        sync.start_match("ABC123");
        assert_eq!(sync.flag_fallen(), Some(Color::White));
    }
}

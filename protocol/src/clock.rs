//! 对局计时
//!
//! 每方一个倒计时，没有加秒或其他让时规则。

use std::time::Instant;

use crate::constants::INITIAL_TIME_MS;
use crate::piece::Color;

/// 双方棋钟
#[derive(Debug, Clone)]
pub struct GameClock {
    /// 白方剩余时间（毫秒）
    white_time_ms: u64,
    /// 黑方剩余时间（毫秒）
    black_time_ms: u64,
    /// 当前计时方
    current_turn: Color,
    /// 当前回合开始时间，未运行时为 None
    turn_start: Option<Instant>,
}

impl GameClock {
    /// 创建停止状态的棋钟（每方默认 10 分钟）
    pub fn new() -> Self {
        Self::with_time(INITIAL_TIME_MS)
    }

    /// 创建自定义时间的棋钟
    pub fn with_time(time_ms: u64) -> Self {
        Self {
            white_time_ms: time_ms,
            black_time_ms: time_ms,
            current_turn: Color::White,
            turn_start: None,
        }
    }

    /// 开始为指定方计时
    pub fn start(&mut self, turn: Color) {
        self.current_turn = turn;
        self.turn_start = Some(Instant::now());
    }

    /// 是否正在走时
    pub fn is_running(&self) -> bool {
        self.turn_start.is_some()
    }

    /// 获取指定方剩余时间（毫秒）
    pub fn time_ms(&self, color: Color) -> u64 {
        let base = match color {
            Color::White => self.white_time_ms,
            Color::Black => self.black_time_ms,
        };
        match self.turn_start {
            Some(start) if color == self.current_turn => {
                base.saturating_sub(start.elapsed().as_millis() as u64)
            }
            _ => base,
        }
    }

    /// 把当前方已用时间记入余量
    fn settle(&mut self) {
        let remaining = self.time_ms(self.current_turn);
        match self.current_turn {
            Color::White => self.white_time_ms = remaining,
            Color::Black => self.black_time_ms = remaining,
        }
    }

    /// 切换走子方
    pub fn switch_turn(&mut self) {
        let running = self.is_running();
        self.settle();
        self.current_turn = self.current_turn.opponent();
        if running {
            self.turn_start = Some(Instant::now());
        }
    }

    /// 暂停计时
    pub fn pause(&mut self) {
        if self.is_running() {
            self.settle();
            self.turn_start = None;
        }
    }

    /// 恢复计时
    pub fn resume(&mut self) {
        if !self.is_running() {
            self.turn_start = Some(Instant::now());
        }
    }

    /// 检查是否超时
    pub fn is_timeout(&self, color: Color) -> bool {
        self.time_ms(color) == 0
    }

    /// 当前计时方
    pub fn current_turn(&self) -> Color {
        self.current_turn
    }

    /// 用对手随走法带来的时间覆盖本地余量
    pub fn set_times(&mut self, white_ms: u64, black_ms: u64) {
        self.white_time_ms = white_ms;
        self.black_time_ms = black_ms;
        if self.is_running() {
            self.turn_start = Some(Instant::now());
        }
    }

    /// (白方, 黑方) 剩余时间
    pub fn snapshot(&self) -> (u64, u64) {
        (self.time_ms(Color::White), self.time_ms(Color::Black))
    }
}

impl Default for GameClock {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_clock_stopped_until_started() {
        let clock = GameClock::with_time(1000);
        std::thread::sleep(Duration::from_millis(20));
        assert_eq!(clock.snapshot(), (1000, 1000));
        assert!(!clock.is_running());
    }

    #[test]
    fn test_clock_counts_current_side_only() {
        let mut clock = GameClock::with_time(10_000);
        clock.start(Color::White);
        std::thread::sleep(Duration::from_millis(30));

        assert!(clock.time_ms(Color::White) < 10_000);
        assert_eq!(clock.time_ms(Color::Black), 10_000);

        clock.switch_turn();
        let white = clock.time_ms(Color::White);
        std::thread::sleep(Duration::from_millis(20));
        assert_eq!(clock.time_ms(Color::White), white);
        assert!(clock.time_ms(Color::Black) < 10_000);
    }

    #[test]
    fn test_pause_freezes_time() {
        let mut clock = GameClock::with_time(10_000);
        clock.start(Color::Black);
        clock.pause();
        let frozen = clock.time_ms(Color::Black);
        std::thread::sleep(Duration::from_millis(20));
        assert_eq!(clock.time_ms(Color::Black), frozen);

        clock.resume();
        assert!(clock.is_running());
    }

    #[test]
    fn test_timeout() {
        let mut clock = GameClock::with_time(5);
        clock.start(Color::White);
        std::thread::sleep(Duration::from_millis(20));
        assert!(clock.is_timeout(Color::White));
        assert!(!clock.is_timeout(Color::Black));
    }

    #[test]
    fn test_set_times() {
        let mut clock = GameClock::new();
        clock.set_times(1234, 5678);
        assert_eq!(clock.snapshot(), (1234, 5678));
    }
}

//! 协议常量定义

use std::time::Duration;

/// 棋盘边长（8x8）
pub const BOARD_SIZE: usize = 8;

/// 中继服务默认端口
pub const DEFAULT_HUB_PORT: u16 = 9999;

/// 昵称最大长度
pub const MAX_NICKNAME_LEN: usize = 20;

/// 单行消息最大字节数
pub const MAX_LINE_SIZE: usize = 65536;

/// 房间号长度
pub const ROOM_ID_LEN: usize = 6;

/// 连接中继的最大尝试次数
pub const MAX_CONNECT_ATTEMPTS: u32 = 3;

/// 重试退避基准（毫秒），第 n 次失败后等待 base * 2^(n-1)
pub const RETRY_BASE_DELAY_MS: u64 = 1000;

/// 客户端心跳间隔（秒）
pub const HEARTBEAT_INTERVAL_SECS: u64 = 10;

/// 心跳超时（秒）- 超过此时间无消息则断开
pub const HEARTBEAT_TIMEOUT_SECS: u64 = 30;

/// 连接超时（秒）
pub const CONNECT_TIMEOUT_SECS: u64 = 5;

/// 每方初始时间（毫秒）- 10分钟
pub const INITIAL_TIME_MS: u64 = 10 * 60 * 1000;

/// 五十回合规则对应的半回合数
pub const FIFTY_MOVE_LIMIT: u32 = 100;

/// 重复局面判和次数
pub const REPETITION_LIMIT: u32 = 3;

/// 中继服务自身在消息中的名字
pub const HUB_SENDER: &str = "server";

/// 连接超时 Duration
pub const CONNECT_TIMEOUT: Duration = Duration::from_secs(CONNECT_TIMEOUT_SECS);

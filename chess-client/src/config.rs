//! 客户端配置

use std::time::Duration;

use protocol::{
    NetworkConfig, HEARTBEAT_INTERVAL_SECS, HEARTBEAT_TIMEOUT_SECS, INITIAL_TIME_MS,
    MAX_CONNECT_ATTEMPTS, RETRY_BASE_DELAY_MS,
};

/// 客户端配置
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientConfig {
    /// 中继地址
    pub hub: NetworkConfig,
    /// 直连监听端口，0 表示由系统分配
    pub p2p_port: u16,
    /// 连接中继的最大尝试次数
    pub connect_attempts: u32,
    /// 重试退避基准（毫秒）
    pub retry_base_delay_ms: u64,
    /// 心跳间隔（秒）
    pub heartbeat_interval_secs: u64,
    /// 多久收不到中继消息视为断线（秒）
    pub idle_timeout_secs: u64,
    /// 每方初始时间（毫秒）
    pub initial_time_ms: u64,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            hub: NetworkConfig::default(),
            p2p_port: 0,
            connect_attempts: MAX_CONNECT_ATTEMPTS,
            retry_base_delay_ms: RETRY_BASE_DELAY_MS,
            heartbeat_interval_secs: HEARTBEAT_INTERVAL_SECS,
            idle_timeout_secs: HEARTBEAT_TIMEOUT_SECS,
            initial_time_ms: INITIAL_TIME_MS,
        }
    }
}

impl ClientConfig {
    /// 从环境变量读取，缺省或无法解析时使用默认值
    pub fn from_env() -> Self {
        use std::env;

        let mut config = Self::default();

        if let Some(host) = env::var("CHESS_HUB_HOST")
            .ok()
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
        {
            config.hub.host = host;
        }
        if let Some(port) = env::var("CHESS_HUB_PORT").ok().and_then(|s| s.parse().ok()) {
            config.hub.port = port;
        }
        if let Some(port) = env::var("CHESS_P2P_PORT").ok().and_then(|s| s.parse().ok()) {
            config.p2p_port = port;
        }

        config
    }

    /// 第 `attempt` 次失败后的等待时间
    pub fn retry_delay(&self, attempt: u32) -> Duration {
        let factor = 1u64 << attempt.saturating_sub(1).min(16);
        Duration::from_millis(self.retry_base_delay_ms.saturating_mul(factor))
    }

    pub fn heartbeat_interval(&self) -> Duration {
        Duration::from_secs(self.heartbeat_interval_secs.max(1))
    }

    pub fn idle_timeout(&self) -> Duration {
        Duration::from_secs(self.idle_timeout_secs.max(1))
    }
}

//! 中继服务配置

use std::time::Duration;

use serde::{Deserialize, Serialize};

use protocol::{DEFAULT_HUB_PORT, HEARTBEAT_TIMEOUT_SECS};

/// 中继服务配置
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct HubConfig {
    /// 监听地址
    pub bind_host: String,
    /// 监听端口
    pub port: u16,
    /// 客户端无消息多久后断开（秒）
    pub idle_timeout_secs: u64,
}

impl Default for HubConfig {
    fn default() -> Self {
        Self {
            bind_host: "0.0.0.0".to_string(),
            port: DEFAULT_HUB_PORT,
            idle_timeout_secs: HEARTBEAT_TIMEOUT_SECS,
        }
    }
}

impl HubConfig {
    /// 从环境变量读取，缺省或无法解析时使用默认值
    pub fn from_env() -> Self {
        use std::env;

        let defaults = Self::default();

        let bind_host = env::var("CHESS_HUB_HOST")
            .ok()
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .unwrap_or(defaults.bind_host);
        let port = env::var("CHESS_HUB_PORT")
            .ok()
            .and_then(|s| s.parse().ok())
            .unwrap_or(defaults.port);
        let idle_timeout_secs = env::var("CHESS_HUB_IDLE_TIMEOUT")
            .ok()
            .and_then(|s| s.parse().ok())
            .filter(|secs| *secs > 0)
            .unwrap_or(defaults.idle_timeout_secs);

        Self {
            bind_host,
            port,
            idle_timeout_secs,
        }
    }

    /// 监听地址
    pub fn addr(&self) -> String {
        format!("{}:{}", self.bind_host, self.port)
    }

    pub fn idle_timeout(&self) -> Duration {
        Duration::from_secs(self.idle_timeout_secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = HubConfig::default();
        assert_eq!(config.port, 9999);
        assert_eq!(config.addr(), "0.0.0.0:9999");
        assert_eq!(config.idle_timeout(), Duration::from_secs(30));
    }
}

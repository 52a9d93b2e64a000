//! 玩家管理

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};

use protocol::{ProtocolError, MAX_NICKNAME_LEN};

use crate::room::RoomId;

/// 连接/玩家 ID
pub type PlayerId = u64;

/// 玩家状态
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PlayerStatus {
    /// 已连接，尚未登录
    Connected,
    /// 已登录，在大厅
    LoggedIn,
    /// 在房间中
    InRoom(RoomId),
}

/// 玩家信息
#[derive(Debug, Clone)]
pub struct Player {
    pub id: PlayerId,
    pub nickname: Option<String>,
    /// 中继看到的对端地址（不信任客户端自报的地址）
    pub addr: Option<SocketAddr>,
    /// 玩家上报的直连监听端口，0 表示没有
    pub p2p_port: u16,
    pub status: PlayerStatus,
}

impl Player {
    pub fn new(id: PlayerId, addr: Option<SocketAddr>) -> Self {
        Self {
            id,
            nickname: None,
            addr,
            p2p_port: 0,
            status: PlayerStatus::Connected,
        }
    }

    pub fn is_logged_in(&self) -> bool {
        self.status != PlayerStatus::Connected
    }

    /// 显示名，未登录时用连接号代替
    pub fn display_name(&self) -> String {
        self.nickname
            .clone()
            .unwrap_or_else(|| format!("guest-{}", self.id))
    }
}

/// 玩家管理器
pub struct PlayerManager {
    /// 玩家 ID -> 玩家信息
    players: HashMap<PlayerId, Player>,
    /// 昵称 -> 玩家 ID（用于昵称唯一性检查）
    nickname_to_id: HashMap<String, PlayerId>,
    /// ID 生成器
    next_id: AtomicU64,
}

impl PlayerManager {
    pub fn new() -> Self {
        Self {
            players: HashMap::new(),
            nickname_to_id: HashMap::new(),
            next_id: AtomicU64::new(1),
        }
    }

    /// 生成新的玩家 ID
    fn generate_id(&self) -> PlayerId {
        self.next_id.fetch_add(1, Ordering::SeqCst)
    }

    /// 验证昵称
    pub fn validate_nickname(nickname: &str) -> Result<(), ProtocolError> {
        if nickname.trim().is_empty() {
            return Err(ProtocolError::NicknameEmpty);
        }
        let len = nickname.chars().count();
        if len > MAX_NICKNAME_LEN {
            return Err(ProtocolError::NicknameTooLong {
                len,
                max: MAX_NICKNAME_LEN,
            });
        }
        Ok(())
    }

    /// 登记新连接
    pub fn connect(&mut self, addr: Option<SocketAddr>) -> PlayerId {
        let id = self.generate_id();
        self.players.insert(id, Player::new(id, addr));
        id
    }

    /// 登录玩家
    pub fn login(
        &mut self,
        player_id: PlayerId,
        nickname: &str,
        p2p_port: u16,
    ) -> Result<(), ProtocolError> {
        let nickname = nickname.trim();
        Self::validate_nickname(nickname)?;

        // 检查昵称是否已被其他连接占用
        if let Some(&owner) = self.nickname_to_id.get(nickname) {
            if owner != player_id {
                return Err(ProtocolError::NicknameOccupied);
            }
        }

        let player = self
            .players
            .get_mut(&player_id)
            .ok_or(ProtocolError::ConnectionClosed)?;

        // 重复登录时释放旧昵称
        if let Some(old) = player.nickname.take() {
            self.nickname_to_id.remove(&old);
        }
        player.nickname = Some(nickname.to_string());
        player.p2p_port = p2p_port;
        if player.status == PlayerStatus::Connected {
            player.status = PlayerStatus::LoggedIn;
        }
        self.nickname_to_id.insert(nickname.to_string(), player_id);

        Ok(())
    }

    /// 移除玩家（连接断开）
    pub fn remove(&mut self, player_id: PlayerId) -> Option<Player> {
        let player = self.players.remove(&player_id)?;
        if let Some(nickname) = &player.nickname {
            self.nickname_to_id.remove(nickname);
        }
        Some(player)
    }

    /// 获取玩家
    pub fn get(&self, player_id: PlayerId) -> Option<&Player> {
        self.players.get(&player_id)
    }

    /// 设置玩家状态
    pub fn set_status(&mut self, player_id: PlayerId, status: PlayerStatus) {
        if let Some(player) = self.players.get_mut(&player_id) {
            player.status = status;
        }
    }

    /// 获取玩家显示名
    pub fn display_name(&self, player_id: PlayerId) -> String {
        self.players
            .get(&player_id)
            .map(Player::display_name)
            .unwrap_or_else(|| format!("guest-{}", player_id))
    }

    /// 是否已登录
    pub fn is_logged_in(&self, player_id: PlayerId) -> bool {
        self.players
            .get(&player_id)
            .map(Player::is_logged_in)
            .unwrap_or(false)
    }

    /// 在线连接数
    pub fn count(&self) -> usize {
        self.players.len()
    }
}

impl Default for PlayerManager {
    fn default() -> Self {
        Self::new()
    }
}

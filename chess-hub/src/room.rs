//! 房间系统

use std::collections::HashMap;
use std::time::Instant;

use rand::distributions::Alphanumeric;
use rand::Rng;
use thiserror::Error;

use protocol::{Color, ErrorCode, ROOM_ID_LEN};

use crate::player::PlayerId;

/// 房间 ID（6 位大写字母数字）
pub type RoomId = String;

/// 房间操作错误
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RoomError {
    #[error("Room {0} not found")]
    NotFound(RoomId),

    #[error("Room {0} is full")]
    Full(RoomId),

    #[error("Already in room {0}")]
    AlreadyInRoom(RoomId),

    #[error("Not in a room")]
    NotInRoom,
}

impl RoomError {
    /// 对应的线上错误码
    pub fn code(&self) -> ErrorCode {
        match self {
            RoomError::NotFound(_) => ErrorCode::RoomNotFound,
            RoomError::Full(_) => ErrorCode::RoomFull,
            RoomError::AlreadyInRoom(_) => ErrorCode::AlreadyInRoom,
            RoomError::NotInRoom => ErrorCode::NotInRoom,
        }
    }
}

/// 房间
///
/// 成员按加入顺序排列：第一个是白方，第二个是黑方。
#[derive(Debug, Clone)]
pub struct Room {
    pub id: RoomId,
    members: Vec<PlayerId>,
    /// 创建时间（快速匹配优先最早的房间）
    pub created_at: Instant,
}

impl Room {
    /// 创建新房间
    pub fn new(id: RoomId, creator: PlayerId) -> Self {
        Self {
            id,
            members: vec![creator],
            created_at: Instant::now(),
        }
    }

    pub fn members(&self) -> &[PlayerId] {
        &self.members
    }

    /// 检查房间是否已满
    pub fn is_full(&self) -> bool {
        self.members.len() >= 2
    }

    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }

    /// 检查玩家是否在房间中
    pub fn has_player(&self, player_id: PlayerId) -> bool {
        self.members.contains(&player_id)
    }

    /// 获取玩家的颜色
    pub fn color_of(&self, player_id: PlayerId) -> Option<Color> {
        match self.members.iter().position(|&id| id == player_id)? {
            0 => Some(Color::White),
            _ => Some(Color::Black),
        }
    }

    /// 获取指定颜色的玩家 ID
    pub fn player_of(&self, color: Color) -> Option<PlayerId> {
        match color {
            Color::White => self.members.first().copied(),
            Color::Black => self.members.get(1).copied(),
        }
    }

    /// 获取对手 ID
    pub fn get_opponent_id(&self, player_id: PlayerId) -> Option<PlayerId> {
        if !self.has_player(player_id) {
            return None;
        }
        self.members.iter().copied().find(|&id| id != player_id)
    }

    /// 添加玩家到房间
    fn add_player(&mut self, player_id: PlayerId) -> Result<Color, RoomError> {
        if self.is_full() {
            return Err(RoomError::Full(self.id.clone()));
        }
        self.members.push(player_id);
        Ok(if self.members.len() == 1 {
            Color::White
        } else {
            Color::Black
        })
    }

    /// 从房间移除玩家
    fn remove_player(&mut self, player_id: PlayerId) -> bool {
        let before = self.members.len();
        self.members.retain(|&id| id != player_id);
        self.members.len() != before
    }
}

/// 离开房间的结果
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Departure {
    pub room_id: RoomId,
    /// 仍留在房间中的玩家
    pub remaining: Vec<PlayerId>,
    /// 房间是否因此被销毁
    pub closed: bool,
}

/// 房间管理器
pub struct RoomManager {
    /// 房间 ID -> 房间
    rooms: HashMap<RoomId, Room>,
    /// 玩家 ID -> 所在房间 ID
    player_rooms: HashMap<PlayerId, RoomId>,
}

impl RoomManager {
    pub fn new() -> Self {
        Self {
            rooms: HashMap::new(),
            player_rooms: HashMap::new(),
        }
    }

    /// 生成未被占用的房间号
    fn generate_id(&self) -> RoomId {
        let mut rng = rand::thread_rng();
        loop {
            let id: String = (&mut rng)
                .sample_iter(&Alphanumeric)
                .take(ROOM_ID_LEN)
                .map(|b| char::from(b).to_ascii_uppercase())
                .collect();
            if !self.rooms.contains_key(&id) {
                return id;
            }
        }
    }

    fn ensure_not_in_room(&self, player_id: PlayerId) -> Result<(), RoomError> {
        match self.player_rooms.get(&player_id) {
            Some(room_id) => Err(RoomError::AlreadyInRoom(room_id.clone())),
            None => Ok(()),
        }
    }

    /// 创建房间，创建者执白
    pub fn create_room(&mut self, player_id: PlayerId) -> Result<RoomId, RoomError> {
        self.ensure_not_in_room(player_id)?;

        let id = self.generate_id();
        self.rooms.insert(id.clone(), Room::new(id.clone(), player_id));
        self.player_rooms.insert(player_id, id.clone());
        Ok(id)
    }

    /// 加入指定房间
    pub fn join_room(&mut self, player_id: PlayerId, room_id: &str) -> Result<Color, RoomError> {
        self.ensure_not_in_room(player_id)?;

        let room_id = room_id.trim().to_ascii_uppercase();
        let room = self
            .rooms
            .get_mut(&room_id)
            .ok_or_else(|| RoomError::NotFound(room_id.clone()))?;
        let color = room.add_player(player_id)?;
        self.player_rooms.insert(player_id, room_id);
        Ok(color)
    }

    /// 快速匹配：加入最早的单人房间，没有则新建
    ///
    /// 返回 (房间号, 颜色)，颜色为白表示新建了房间。
    pub fn quick_match(&mut self, player_id: PlayerId) -> Result<(RoomId, Color), RoomError> {
        self.ensure_not_in_room(player_id)?;

        let waiting = self
            .rooms
            .values()
            .filter(|room| room.members.len() == 1)
            .min_by_key(|room| room.created_at)
            .map(|room| room.id.clone());

        match waiting {
            Some(room_id) => {
                let color = self.join_room(player_id, &room_id)?;
                Ok((room_id, color))
            }
            None => {
                let room_id = self.create_room(player_id)?;
                Ok((room_id, Color::White))
            }
        }
    }

    /// 离开所在房间，空房间随即销毁
    pub fn leave(&mut self, player_id: PlayerId) -> Result<Departure, RoomError> {
        let room_id = self
            .player_rooms
            .remove(&player_id)
            .ok_or(RoomError::NotInRoom)?;
        let room = self
            .rooms
            .get_mut(&room_id)
            .ok_or_else(|| RoomError::NotFound(room_id.clone()))?;

        room.remove_player(player_id);
        let remaining = room.members.clone();
        let closed = room.is_empty();
        if closed {
            self.rooms.remove(&room_id);
        }

        Ok(Departure {
            room_id,
            remaining,
            closed,
        })
    }

    /// 获取房间
    pub fn get(&self, room_id: &str) -> Option<&Room> {
        self.rooms.get(room_id)
    }

    /// 查找玩家所在房间
    pub fn find_player_room(&self, player_id: PlayerId) -> Option<&Room> {
        self.player_rooms
            .get(&player_id)
            .and_then(|room_id| self.rooms.get(room_id))
    }

    /// 房间数量
    pub fn count(&self) -> usize {
        self.rooms.len()
    }
}

impl Default for RoomManager {
    fn default() -> Self {
        Self::new()
    }
}

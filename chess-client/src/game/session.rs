//! 对局会话
//!
//! 登录时创建，中继分配房间和颜色后填充，离开房间或断线时清空。

use std::collections::{HashMap, HashSet};

use protocol::Color;

use crate::events::RequestKind;

/// 会话状态
#[derive(Debug, Clone)]
pub struct Session {
    pub player_name: String,
    /// 本方颜色（未分配房间时为白）
    pub local_color: Color,
    pub opponent_name: Option<String>,
    pub room_id: Option<String>,
    /// 本方发出、尚未得到答复的请求
    outgoing: HashSet<RequestKind>,
    /// 对手发来、尚未答复的请求，附对手名字
    incoming: HashMap<RequestKind, String>,
    /// 已经为哪个房间开过局（房间完成与开局信号只重置一次）
    synced_room: Option<String>,
}

impl Session {
    pub fn new(player_name: impl Into<String>) -> Self {
        Self {
            player_name: player_name.into(),
            local_color: Color::White,
            opponent_name: None,
            room_id: None,
            outgoing: HashSet::new(),
            incoming: HashMap::new(),
            synced_room: None,
        }
    }

    /// 中继分配了房间和颜色
    pub fn assign_room(&mut self, room_id: impl Into<String>, color: Color) {
        let room_id = room_id.into();
        if self.room_id.as_deref() != Some(room_id.as_str()) {
            self.synced_room = None;
        }
        self.room_id = Some(room_id);
        self.local_color = color;
    }

    pub fn set_opponent(&mut self, name: impl Into<String>) {
        self.opponent_name = Some(name.into());
    }

    /// 对手离开，保留房间（等待下一位对手）
    pub fn clear_opponent(&mut self) {
        self.opponent_name = None;
        self.clear_requests();
        self.synced_room = None;
    }

    /// 离开房间
    pub fn leave_room(&mut self) {
        self.room_id = None;
        self.local_color = Color::White;
        self.clear_opponent();
    }

    /// 是否处于双人对局中
    pub fn in_match(&self) -> bool {
        self.room_id.is_some() && self.opponent_name.is_some()
    }

    /// 对手颜色
    pub fn opponent_color(&self) -> Color {
        self.local_color.opponent()
    }

    /// 标记该房间已开局，已标记过返回 false
    pub fn mark_synced(&mut self, room_id: &str) -> bool {
        if self.synced_room.as_deref() == Some(room_id) {
            return false;
        }
        self.synced_room = Some(room_id.to_string());
        true
    }

    /// 记下本方发出的请求
    pub fn begin_request(&mut self, kind: RequestKind) {
        self.outgoing.insert(kind);
    }

    /// 记下对手发来的请求，同类请求只保留最新一次
    pub fn receive_request(&mut self, kind: RequestKind, from: impl Into<String>) {
        self.incoming.insert(kind, from.into());
    }

    /// 收到答复时取出本方的请求；没有发过则返回 false
    pub fn take_outgoing(&mut self, kind: RequestKind) -> bool {
        self.outgoing.remove(&kind)
    }

    /// 答复前取出对手的请求
    pub fn take_incoming(&mut self, kind: RequestKind) -> Option<String> {
        self.incoming.remove(&kind)
    }

    pub fn is_awaiting_answer(&self, kind: RequestKind) -> bool {
        self.outgoing.contains(&kind)
    }

    pub fn clear_requests(&mut self) {
        self.outgoing.clear();
        self.incoming.clear();
    }

    /// 对手显示名
    pub fn opponent_display(&self) -> &str {
        self.opponent_name.as_deref().unwrap_or("opponent")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lifecycle() {
        let mut session = Session::new("alice");
        assert!(!session.in_match());

        session.assign_room("ABC123", Color::Black);
        assert!(!session.in_match());
        session.set_opponent("bob");
        assert!(session.in_match());
        assert_eq!(session.opponent_color(), Color::White);

        session.leave_room();
        assert!(!session.in_match());
        assert_eq!(session.room_id, None);
        assert_eq!(session.local_color, Color::White);
    }

    #[test]
    fn test_mark_synced_once_per_room() {
        let mut session = Session::new("alice");
        session.assign_room("ABC123", Color::White);
        assert!(session.mark_synced("ABC123"));
        assert!(!session.mark_synced("ABC123"));

        // 对手离开后新对手进来，需要重新开局
        session.clear_opponent();
        assert!(session.mark_synced("ABC123"));
    }

    #[test]
    fn test_requests_are_matched_per_kind() {
        let mut session = Session::new("alice");
        session.assign_room("ABC123", Color::White);
        session.set_opponent("bob");

        // 没有发过求和，答复不算数
        assert!(!session.take_outgoing(RequestKind::Draw));

        session.begin_request(RequestKind::Draw);
        assert!(session.is_awaiting_answer(RequestKind::Draw));
        assert!(!session.take_outgoing(RequestKind::Pause));
        assert!(session.take_outgoing(RequestKind::Draw));
        assert!(!session.take_outgoing(RequestKind::Draw));

        assert_eq!(session.take_incoming(RequestKind::NewGame), None);
        session.receive_request(RequestKind::NewGame, "bob");
        // 本方发出的同类请求与对手的互不影响
        session.begin_request(RequestKind::NewGame);
        assert_eq!(session.take_incoming(RequestKind::NewGame).as_deref(), Some("bob"));
        assert_eq!(session.take_incoming(RequestKind::NewGame), None);
        assert!(session.is_awaiting_answer(RequestKind::NewGame));

        session.receive_request(RequestKind::Pause, "bob");
        session.clear_opponent();
        assert!(!session.is_awaiting_answer(RequestKind::NewGame));
        assert_eq!(session.take_incoming(RequestKind::Pause), None);
    }
}

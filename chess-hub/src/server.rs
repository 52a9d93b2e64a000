//! 中继服务主逻辑
//!
//! 每个连接一个读任务和一个写任务；所有状态修改都在 `ServerState` 锁内完成。
//! 锁内只做非阻塞投递，队列满的连接直接踢掉，不等待。

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{mpsc, Mutex, Notify};
use tokio::time::timeout;
use tracing::{debug, info, warn};

use protocol::{
    Color, Connection, ErrorCode, Listener, LoginPayload, Message, MessageType, PeerInfo,
    ProtocolError, SystemEvent, TcpConnection, TcpListener, HUB_SENDER,
};

use crate::config::HubConfig;
use crate::player::{PlayerId, PlayerManager, PlayerStatus};
use crate::room::{RoomError, RoomManager};

/// 每个连接的待发送队列长度
const OUTBOUND_CAPACITY: usize = 64;

/// 断开后等待写任务发完剩余消息的时间
const WRITER_DRAIN: Duration = Duration::from_secs(2);

/// 单个连接的发送端
pub struct Outbound {
    tx: mpsc::Sender<Message>,
    /// 队列满时通知读任务断开
    kicked: Arc<Notify>,
}

/// 服务器状态
pub struct ServerState {
    pub players: PlayerManager,
    pub rooms: RoomManager,
    /// 玩家 ID -> 消息发送通道
    pub connections: HashMap<PlayerId, Outbound>,
}

impl ServerState {
    pub fn new() -> Self {
        Self {
            players: PlayerManager::new(),
            rooms: RoomManager::new(),
            connections: HashMap::new(),
        }
    }

    /// 登记新连接
    pub fn register(&mut self, addr: Option<SocketAddr>, tx: mpsc::Sender<Message>) -> PlayerId {
        let player_id = self.players.connect(addr);
        let outbound = Outbound {
            tx,
            kicked: Arc::new(Notify::new()),
        };
        self.connections.insert(player_id, outbound);
        player_id
    }

    /// 连接被踢掉时触发的信号
    pub fn kick_signal(&self, player_id: PlayerId) -> Option<Arc<Notify>> {
        self.connections
            .get(&player_id)
            .map(|outbound| Arc::clone(&outbound.kicked))
    }

    /// 发送消息给玩家，不等待
    ///
    /// 队列已满说明对方不再读取：移除其发送端并通知读任务断开，
    /// 断线清理照常由读任务完成。
    pub fn send_to_player(&mut self, player_id: PlayerId, msg: Message) {
        let Some(outbound) = self.connections.get(&player_id) else {
            debug!(player_id, "no connection, message dropped");
            return;
        };

        match outbound.tx.try_send(msg) {
            Ok(()) => {}
            Err(TrySendError::Closed(_)) => debug!(player_id, "outbound channel closed"),
            Err(TrySendError::Full(_)) => {
                warn!(player_id, "outbound queue full, dropping slow client");
                if let Some(outbound) = self.connections.remove(&player_id) {
                    outbound.kicked.notify_one();
                }
            }
        }
    }
}

impl Default for ServerState {
    fn default() -> Self {
        Self::new()
    }
}

/// 待发送的消息（按产生顺序发送）
#[derive(Debug, Default)]
pub struct PendingMessages {
    messages: Vec<(PlayerId, Message)>,
}

impl PendingMessages {
    fn new() -> Self {
        Self::default()
    }

    fn send(&mut self, player_id: PlayerId, msg: Message) {
        self.messages.push((player_id, msg));
    }

    /// 发给同房间的其他成员，返回发送数量
    fn send_to_others(&mut self, state: &ServerState, player_id: PlayerId, msg: &Message) -> usize {
        let Some(room) = state.rooms.find_player_room(player_id) else {
            return 0;
        };
        let mut count = 0;
        for &member in room.members() {
            if member != player_id {
                self.send(member, msg.clone());
                count += 1;
            }
        }
        count
    }

    fn system(&mut self, state: &ServerState, player_id: PlayerId, event: SystemEvent) {
        let to = state.players.display_name(player_id);
        match Message::system(HUB_SENDER, to, &event) {
            Ok(msg) => self.send(player_id, msg),
            Err(e) => warn!(error = %e, "failed to encode system event"),
        }
    }

    fn error(&mut self, state: &ServerState, player_id: PlayerId, code: ErrorCode, text: &str) {
        let to = state.players.display_name(player_id);
        match Message::error(to, code, text) {
            Ok(msg) => self.send(player_id, msg),
            Err(e) => warn!(error = %e, "failed to encode error"),
        }
    }

    /// 取出全部消息
    pub fn into_messages(self) -> Vec<(PlayerId, Message)> {
        self.messages
    }

    fn flush(self, state: &mut ServerState) {
        for (player_id, msg) in self.messages {
            state.send_to_player(player_id, msg);
        }
    }
}

/// 消息处理器
pub struct MessageHandler;

impl MessageHandler {
    /// 处理客户端消息并发送所有产生的消息
    pub fn handle(state: &mut ServerState, player_id: PlayerId, msg: Message) {
        let pending = Self::process(state, player_id, msg);
        pending.flush(state);
    }

    /// 处理客户端消息，返回待发送的消息
    pub fn process(state: &mut ServerState, player_id: PlayerId, msg: Message) -> PendingMessages {
        let mut pending = PendingMessages::new();

        match msg.kind {
            MessageType::Login => Self::handle_login(state, &mut pending, player_id, &msg),
            MessageType::Ping => {
                pending.send(player_id, Message::pong(state.players.display_name(player_id)));
            }
            MessageType::Pong => {}
            _ if !state.players.is_logged_in(player_id) => {
                pending.error(state, player_id, ErrorCode::NotLoggedIn, "Please log in first");
            }
            MessageType::System => Self::handle_system(state, &mut pending, player_id, msg),
            MessageType::Move | MessageType::Chat => {
                Self::handle_relay(state, &mut pending, player_id, msg);
            }
            MessageType::PeerInfo | MessageType::Error => {
                debug!(player_id, kind = ?msg.kind, "ignoring client-sent message");
            }
        }

        pending
    }

    /// 处理登录
    fn handle_login(
        state: &mut ServerState,
        pending: &mut PendingMessages,
        player_id: PlayerId,
        msg: &Message,
    ) {
        let login: LoginPayload = match msg.payload() {
            Ok(login) => login,
            Err(e) => {
                warn!(player_id, error = %e, "malformed login payload");
                pending.error(state, player_id, ErrorCode::MalformedMessage, "Malformed login");
                return;
            }
        };

        if let Err(e) = state.players.login(player_id, login.name(), login.p2p_port()) {
            let code = match e {
                ProtocolError::NicknameOccupied => ErrorCode::NicknameOccupied,
                _ => ErrorCode::InvalidNickname,
            };
            pending.error(state, player_id, code, &e.to_string());
            return;
        }

        info!(player_id, name = login.name(), p2p_port = login.p2p_port(), "player logged in");
        pending.system(state, player_id, SystemEvent::LoginSuccess);

        // 旧版客户端在登录时顺带建房/进房
        if let LoginPayload::Legacy {
            room_id, create_room, ..
        } = login
        {
            if create_room {
                Self::handle_create_room(state, pending, player_id);
            } else if let Some(room_id) = room_id {
                Self::handle_join_room(state, pending, player_id, &room_id);
            }
        }
    }

    /// 处理系统事件：房间类事件由中继执行，其余转发给对手
    fn handle_system(
        state: &mut ServerState,
        pending: &mut PendingMessages,
        player_id: PlayerId,
        msg: Message,
    ) {
        let event = match msg.event() {
            Ok(event) => event,
            Err(e) => {
                warn!(player_id, error = %e, "malformed system payload");
                pending.error(state, player_id, ErrorCode::MalformedMessage, "Malformed system event");
                return;
            }
        };

        match event {
            SystemEvent::CreateRoom => Self::handle_create_room(state, pending, player_id),
            SystemEvent::JoinRoom { room_id } => {
                Self::handle_join_room(state, pending, player_id, &room_id);
            }
            SystemEvent::QuickMatch => Self::handle_quick_match(state, pending, player_id),
            SystemEvent::LeaveRoom => {
                pending.send_to_others(state, player_id, &msg);
                Self::handle_leave_room(state, pending, player_id);
            }
            other => {
                if other == SystemEvent::Unknown {
                    debug!(player_id, "relaying unknown system event");
                }
                Self::handle_relay(state, pending, player_id, msg);
            }
        }
    }

    /// 原样转发给同房间的其他成员
    fn handle_relay(
        state: &mut ServerState,
        pending: &mut PendingMessages,
        player_id: PlayerId,
        msg: Message,
    ) {
        if state.rooms.find_player_room(player_id).is_none() {
            pending.error(state, player_id, ErrorCode::NotInRoom, "Not in a room");
            return;
        }
        let relayed = pending.send_to_others(state, player_id, &msg);
        debug!(player_id, kind = ?msg.kind, relayed, "relayed message");
    }

    /// 处理创建房间
    fn handle_create_room(state: &mut ServerState, pending: &mut PendingMessages, player_id: PlayerId) {
        match state.rooms.create_room(player_id) {
            Ok(room_id) => {
                info!(player_id, room_id = %room_id, "room created");
                state
                    .players
                    .set_status(player_id, PlayerStatus::InRoom(room_id.clone()));
                pending.system(
                    state,
                    player_id,
                    SystemEvent::RoomCreated {
                        room_id,
                        color: Color::White,
                    },
                );
            }
            Err(e) => Self::room_error(state, pending, player_id, e),
        }
    }

    /// 处理加入房间
    fn handle_join_room(
        state: &mut ServerState,
        pending: &mut PendingMessages,
        player_id: PlayerId,
        room_id: &str,
    ) {
        match state.rooms.join_room(player_id, room_id) {
            Ok(_) => Self::complete_room(state, pending, player_id),
            Err(e) => Self::room_error(state, pending, player_id, e),
        }
    }

    /// 处理快速匹配
    fn handle_quick_match(state: &mut ServerState, pending: &mut PendingMessages, player_id: PlayerId) {
        match state.rooms.quick_match(player_id) {
            Ok((room_id, Color::White)) => {
                info!(player_id, room_id = %room_id, "quick match waiting");
                state
                    .players
                    .set_status(player_id, PlayerStatus::InRoom(room_id.clone()));
                pending.system(
                    state,
                    player_id,
                    SystemEvent::RoomCreated {
                        room_id,
                        color: Color::White,
                    },
                );
            }
            Ok(_) => Self::complete_room(state, pending, player_id),
            Err(e) => Self::room_error(state, pending, player_id, e),
        }
    }

    /// 第二名玩家入座：通知双方，交换直连地址，开始对局
    fn complete_room(state: &mut ServerState, pending: &mut PendingMessages, joiner: PlayerId) {
        let Some(room) = state.rooms.find_player_room(joiner) else {
            return;
        };
        let room_id = room.id.clone();
        let (Some(white), Some(black)) = (room.player_of(Color::White), room.player_of(Color::Black))
        else {
            return;
        };

        state
            .players
            .set_status(joiner, PlayerStatus::InRoom(room_id.clone()));
        info!(room_id = %room_id, white, black, "room completed");

        let joiner_color = if joiner == white { Color::White } else { Color::Black };
        let host = if joiner == white { black } else { white };

        pending.system(
            state,
            joiner,
            SystemEvent::Joined {
                room_id: room_id.clone(),
                color: joiner_color,
                opponent: state.players.display_name(host),
            },
        );
        pending.system(
            state,
            host,
            SystemEvent::PlayerJoined {
                room_id: room_id.clone(),
                color: joiner_color.opponent(),
                opponent: state.players.display_name(joiner),
            },
        );

        // 白方负责拨号
        Self::send_peer_info(state, pending, white, black, true);
        Self::send_peer_info(state, pending, black, white, false);

        for player_id in [white, black] {
            pending.system(
                state,
                player_id,
                SystemEvent::GameStart {
                    room_id: room_id.clone(),
                },
            );
        }
    }

    /// 把 `target` 的观察地址和监听端口告诉 `receiver`
    fn send_peer_info(
        state: &ServerState,
        pending: &mut PendingMessages,
        receiver: PlayerId,
        target: PlayerId,
        is_host: bool,
    ) {
        let Some(target_player) = state.players.get(target) else {
            return;
        };
        let Some(addr) = target_player.addr else {
            warn!(target, "no observed address, skipping peer info");
            return;
        };

        let info = PeerInfo {
            host: addr.ip().to_string(),
            port: target_player.p2p_port,
            is_host,
        };
        let to = state.players.display_name(receiver);
        match Message::with_payload(HUB_SENDER, to, MessageType::PeerInfo, &info) {
            Ok(msg) => pending.send(receiver, msg),
            Err(e) => warn!(error = %e, "failed to encode peer info"),
        }
    }

    /// 处理离开房间
    fn handle_leave_room(state: &mut ServerState, pending: &mut PendingMessages, player_id: PlayerId) {
        match state.rooms.leave(player_id) {
            Ok(departure) => {
                info!(player_id, room_id = %departure.room_id, closed = departure.closed, "player left room");
                state.players.set_status(player_id, PlayerStatus::LoggedIn);

                let name = state.players.display_name(player_id);
                for member in departure.remaining {
                    pending.system(
                        state,
                        member,
                        SystemEvent::OpponentLeft {
                            player: Some(name.clone()),
                        },
                    );
                }
            }
            Err(e) => Self::room_error(state, pending, player_id, e),
        }
    }

    fn room_error(state: &ServerState, pending: &mut PendingMessages, player_id: PlayerId, e: RoomError) {
        debug!(player_id, error = %e, "room operation rejected");
        pending.error(state, player_id, e.code(), &e.to_string());
    }

    /// 处理玩家断线
    pub fn handle_disconnect(state: &mut ServerState, player_id: PlayerId) {
        let mut pending = PendingMessages::new();

        if state.rooms.find_player_room(player_id).is_some() {
            Self::handle_leave_room(state, &mut pending, player_id);
        }
        state.players.remove(player_id);

        // 移除连接
        state.connections.remove(&player_id);

        pending.flush(state);
    }
}

/// 中继服务
pub struct HubServer {
    listener: TcpListener,
    state: Arc<Mutex<ServerState>>,
    idle_timeout: Duration,
}

impl HubServer {
    /// 绑定监听端口
    pub async fn bind(config: &HubConfig) -> anyhow::Result<Self> {
        let listener = TcpListener::bind(&config.addr()).await?;
        Ok(Self {
            listener,
            state: Arc::new(Mutex::new(ServerState::new())),
            idle_timeout: config.idle_timeout(),
        })
    }

    /// 实际监听地址（端口为 0 时由系统分配）
    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.listener.local_addr()
    }

    /// 共享状态
    pub fn state(&self) -> Arc<Mutex<ServerState>> {
        Arc::clone(&self.state)
    }

    /// 接受连接直到监听出错
    pub async fn run(mut self) -> anyhow::Result<()> {
        info!(addr = ?self.local_addr(), "hub listening");

        loop {
            let conn = match self.listener.accept().await {
                Ok(conn) => conn,
                Err(e) => {
                    warn!(error = %e, "accept failed");
                    continue;
                }
            };
            tokio::spawn(handle_connection(conn, Arc::clone(&self.state), self.idle_timeout));
        }
    }
}

/// 单个连接的生命周期
async fn handle_connection(conn: TcpConnection, state: Arc<Mutex<ServerState>>, idle: Duration) {
    let addr = conn.peer_addr();
    let (mut reader, mut writer) = conn.split();
    let (tx, mut rx) = mpsc::channel::<Message>(OUTBOUND_CAPACITY);

    let (player_id, kicked) = {
        let mut state = state.lock().await;
        let player_id = state.register(addr, tx);
        (player_id, state.kick_signal(player_id))
    };
    let Some(kicked) = kicked else {
        return;
    };
    info!(player_id, addr = ?addr, "client connected");

    let mut writer_task = tokio::spawn(async move {
        while let Some(msg) = rx.recv().await {
            if let Err(e) = writer.write_message(&msg).await {
                debug!(player_id, error = %e, "write failed");
                break;
            }
        }
        let _ = writer.shutdown().await;
    });

    loop {
        let read = tokio::select! {
            _ = kicked.notified() => {
                info!(player_id, "client kicked");
                break;
            }
            read = timeout(idle, reader.read_message::<Message>()) => read,
        };

        match read {
            Err(_) => {
                info!(player_id, "idle timeout");
                break;
            }
            Ok(Ok(msg)) => {
                MessageHandler::handle(&mut *state.lock().await, player_id, msg);
            }
            Ok(Err(e)) if e.is_malformed_line() => {
                warn!(player_id, error = %e, "malformed line");
                let mut state = state.lock().await;
                let to = state.players.display_name(player_id);
                if let Ok(msg) = Message::error(to, ErrorCode::MalformedMessage, "Malformed line") {
                    state.send_to_player(player_id, msg);
                }
            }
            Ok(Err(ProtocolError::ConnectionClosed)) => {
                info!(player_id, "client closed connection");
                break;
            }
            Ok(Err(e)) => {
                warn!(player_id, error = %e, "read failed");
                break;
            }
        }
    }

    MessageHandler::handle_disconnect(&mut *state.lock().await, player_id);
    // 发送端已移除，写任务发完剩余消息后退出；对方不读时放弃
    if timeout(WRITER_DRAIN, &mut writer_task).await.is_err() {
        debug!(player_id, "writer stalled, aborting");
        writer_task.abort();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use protocol::ChatPayload;

    fn addr(port: u16) -> Option<SocketAddr> {
        Some(SocketAddr::from(([10, 0, 0, 1], port)))
    }

    fn login(state: &mut ServerState, name: &str, p2p_port: u16) -> PlayerId {
        let (tx, _rx) = mpsc::channel(8);
        let id = state.register(addr(40000 + p2p_port), tx);
        let msg = Message::with_payload(name, HUB_SENDER, MessageType::Login, &LoginPayload::new(name, p2p_port))
            .unwrap();
        let out = MessageHandler::process(state, id, msg).into_messages();
        assert_eq!(out[0].1.event().unwrap(), SystemEvent::LoginSuccess);
        id
    }

    fn system(state: &mut ServerState, id: PlayerId, event: SystemEvent) -> Vec<(PlayerId, Message)> {
        let msg = Message::system("client", HUB_SENDER, &event).unwrap();
        MessageHandler::process(state, id, msg).into_messages()
    }

    fn events_for(out: &[(PlayerId, Message)], id: PlayerId) -> Vec<Message> {
        out.iter()
            .filter(|(to, _)| *to == id)
            .map(|(_, msg)| msg.clone())
            .collect()
    }

    fn create(state: &mut ServerState, id: PlayerId) -> String {
        let out = system(state, id, SystemEvent::CreateRoom);
        match out[0].1.event().unwrap() {
            SystemEvent::RoomCreated { room_id, color } => {
                assert_eq!(color, Color::White);
                room_id
            }
            other => panic!("unexpected event: {:?}", other),
        }
    }

    #[test]
    fn test_requires_login() {
        let mut state = ServerState::new();
        let (tx, _rx) = mpsc::channel(8);
        let id = state.register(None, tx);

        let out = system(&mut state, id, SystemEvent::CreateRoom);
        assert_eq!(out[0].1.kind, MessageType::Error);
        assert!(matches!(
            out[0].1.event().unwrap(),
            SystemEvent::Error { code: ErrorCode::NotLoggedIn, .. }
        ));

        let pong = MessageHandler::process(&mut state, id, Message::ping("x")).into_messages();
        assert_eq!(pong[0].1.kind, MessageType::Pong);
    }

    #[test]
    fn test_duplicate_nickname_rejected() {
        let mut state = ServerState::new();
        login(&mut state, "alice", 1);

        let (tx, _rx) = mpsc::channel(8);
        let id = state.register(None, tx);
        let msg = Message::with_payload("alice", HUB_SENDER, MessageType::Login, &LoginPayload::new("alice", 2))
            .unwrap();
        let out = MessageHandler::process(&mut state, id, msg).into_messages();
        assert!(matches!(
            out[0].1.event().unwrap(),
            SystemEvent::Error { code: ErrorCode::NicknameOccupied, .. }
        ));
    }

    #[test]
    fn test_room_completion_assigns_colors_and_peers() {
        let mut state = ServerState::new();
        let alice = login(&mut state, "alice", 1);
        let bob = login(&mut state, "bob", 2);

        let room_id = create(&mut state, alice);
        let out = system(&mut state, bob, SystemEvent::JoinRoom { room_id: room_id.clone() });

        let to_bob = events_for(&out, bob);
        assert_eq!(
            to_bob[0].event().unwrap(),
            SystemEvent::Joined {
                room_id: room_id.clone(),
                color: Color::Black,
                opponent: "alice".to_string(),
            }
        );
        let bob_peer: PeerInfo = to_bob[1].payload().unwrap();
        assert_eq!(bob_peer, PeerInfo { host: "10.0.0.1".to_string(), port: 1, is_host: false });
        assert_eq!(to_bob[2].event().unwrap(), SystemEvent::GameStart { room_id: room_id.clone() });

        let to_alice = events_for(&out, alice);
        assert!(matches!(
            to_alice[0].event().unwrap(),
            SystemEvent::PlayerJoined { color: Color::White, .. }
        ));
        let alice_peer: PeerInfo = to_alice[1].payload().unwrap();
        assert_eq!(alice_peer.port, 2);
        assert!(alice_peer.is_host);
    }

    #[test]
    fn test_third_player_gets_room_full() {
        let mut state = ServerState::new();
        let alice = login(&mut state, "alice", 1);
        let bob = login(&mut state, "bob", 2);
        let carol = login(&mut state, "carol", 3);

        let room_id = create(&mut state, alice);
        system(&mut state, bob, SystemEvent::JoinRoom { room_id: room_id.clone() });
        let out = system(&mut state, carol, SystemEvent::JoinRoom { room_id });

        assert_eq!(out.len(), 1);
        assert!(matches!(
            out[0].1.event().unwrap(),
            SystemEvent::Error { code: ErrorCode::RoomFull, .. }
        ));

        let out = system(&mut state, carol, SystemEvent::JoinRoom { room_id: "ZZZZZZ".to_string() });
        assert!(matches!(
            out[0].1.event().unwrap(),
            SystemEvent::Error { code: ErrorCode::RoomNotFound, .. }
        ));
    }

    #[test]
    fn test_quick_match() {
        let mut state = ServerState::new();
        let alice = login(&mut state, "alice", 1);
        let bob = login(&mut state, "bob", 2);

        let out = system(&mut state, alice, SystemEvent::QuickMatch);
        assert!(matches!(out[0].1.event().unwrap(), SystemEvent::RoomCreated { .. }));

        let out = system(&mut state, bob, SystemEvent::QuickMatch);
        assert!(matches!(
            events_for(&out, bob)[0].event().unwrap(),
            SystemEvent::Joined { color: Color::Black, .. }
        ));
    }

    #[test]
    fn test_relay_is_verbatim() {
        let mut state = ServerState::new();
        let alice = login(&mut state, "alice", 1);
        let bob = login(&mut state, "bob", 2);
        let room_id = create(&mut state, alice);
        system(&mut state, bob, SystemEvent::JoinRoom { room_id });

        let chat = Message::with_payload("alice", "bob", MessageType::Chat, &ChatPayload { text: "hi".into() })
            .unwrap();
        let out = MessageHandler::process(&mut state, alice, chat.clone()).into_messages();
        assert_eq!(out, vec![(bob, chat)]);

        let custom = Message::new("bob", "alice", MessageType::System, r#"{"event":"emote","icon":"wave"}"#);
        let out = MessageHandler::process(&mut state, bob, custom.clone()).into_messages();
        assert_eq!(out, vec![(alice, custom)]);

        let resign = Message::system("bob", "alice", &SystemEvent::Resign).unwrap();
        let out = MessageHandler::process(&mut state, bob, resign.clone()).into_messages();
        assert_eq!(out, vec![(alice, resign)]);
    }

    #[test]
    fn test_relay_outside_room_is_error() {
        let mut state = ServerState::new();
        let alice = login(&mut state, "alice", 1);
        let chat = Message::with_payload("alice", "bob", MessageType::Chat, &ChatPayload { text: "hi".into() })
            .unwrap();
        let out = MessageHandler::process(&mut state, alice, chat).into_messages();
        assert!(matches!(
            out[0].1.event().unwrap(),
            SystemEvent::Error { code: ErrorCode::NotInRoom, .. }
        ));
    }

    #[test]
    fn test_leave_relays_then_notifies() {
        let mut state = ServerState::new();
        let alice = login(&mut state, "alice", 1);
        let bob = login(&mut state, "bob", 2);
        let room_id = create(&mut state, alice);
        system(&mut state, bob, SystemEvent::JoinRoom { room_id: room_id.clone() });

        let out = system(&mut state, bob, SystemEvent::LeaveRoom);
        let to_alice = events_for(&out, alice);
        assert_eq!(to_alice[0].event().unwrap(), SystemEvent::LeaveRoom);
        assert_eq!(
            to_alice[1].event().unwrap(),
            SystemEvent::OpponentLeft { player: Some("bob".to_string()) }
        );
        assert_eq!(state.players.get(bob).unwrap().status, PlayerStatus::LoggedIn);
        assert_eq!(state.rooms.get(&room_id).unwrap().members(), &[alice]);
    }

    #[tokio::test]
    async fn test_disconnect_notifies_and_tears_down() {
        let mut state = ServerState::new();
        let (alice_tx, mut alice_rx) = mpsc::channel(8);
        let alice = state.register(addr(1), alice_tx);
        let alice_login = Message::with_payload("alice", HUB_SENDER, MessageType::Login, &LoginPayload::new("alice", 1))
            .unwrap();
        MessageHandler::handle(&mut state, alice, alice_login);
        let bob = login(&mut state, "bob", 2);

        let room_id = create(&mut state, alice);
        system(&mut state, bob, SystemEvent::JoinRoom { room_id: room_id.clone() });

        MessageHandler::handle_disconnect(&mut state, bob);

        assert_eq!(alice_rx.recv().await.unwrap().event().unwrap(), SystemEvent::LoginSuccess);
        assert_eq!(
            alice_rx.recv().await.unwrap().event().unwrap(),
            SystemEvent::OpponentLeft { player: Some("bob".to_string()) }
        );
        assert!(state.players.get(bob).is_none());

        MessageHandler::handle_disconnect(&mut state, alice);
        assert!(state.rooms.get(&room_id).is_none());
        assert_eq!(state.rooms.count(), 0);
    }

    #[tokio::test]
    async fn test_full_queue_drops_slow_client() {
        let mut state = ServerState::new();
        let (tx, _rx) = mpsc::channel(2);
        let slow = state.register(addr(3), tx);
        let kicked = state.kick_signal(slow).unwrap();

        // 对方不读，第三条 Pong 放不进队列
        for _ in 0..3 {
            MessageHandler::handle(&mut state, slow, Message::ping("slow"));
        }
        assert!(!state.connections.contains_key(&slow));
        timeout(Duration::from_secs(1), kicked.notified()).await.unwrap();

        // 之后的投递直接丢弃，不会阻塞
        MessageHandler::handle(&mut state, slow, Message::ping("slow"));
        let bob = login(&mut state, "bob", 2);
        assert!(state.connections.contains_key(&bob));
    }

    #[test]
    fn test_legacy_login_creates_room() {
        let mut state = ServerState::new();
        let (tx, _rx) = mpsc::channel(8);
        let id = state.register(addr(9), tx);
        let legacy = LoginPayload::Legacy {
            player_name: "old".to_string(),
            room_id: None,
            create_room: true,
        };
        let msg = Message::with_payload("old", HUB_SENDER, MessageType::Login, &legacy).unwrap();
        let out = MessageHandler::process(&mut state, id, msg).into_messages();

        assert_eq!(out[0].1.event().unwrap(), SystemEvent::LoginSuccess);
        assert!(matches!(out[1].1.event().unwrap(), SystemEvent::RoomCreated { .. }));
    }
}

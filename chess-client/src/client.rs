//! 客户端协调任务
//!
//! 一个任务串行处理三路输入：界面命令、两条连接的入站消息、定时器。
//! 对局状态只在这里修改。

use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::{interval, MissedTickBehavior};
use tracing::{debug, info, warn};

use protocol::{
    ChatPayload, Color, GameResult, LoginPayload, Message, MessageType, Move, MovePayload,
    PeerInfo, SystemEvent, HUB_SENDER,
};

use crate::config::ClientConfig;
use crate::events::{ClientCommand, ClientEvent, RequestKind};
use crate::game::{GameSync, Session};
use crate::network::{DirectPeer, FallbackDispatcher, HubConnection, Inbound, MessageChannel, Route};

/// 棋钟检查间隔
const CLOCK_TICK: Duration = Duration::from_millis(500);

/// 客户端句柄，界面层持有
pub struct ClientHandle {
    commands: mpsc::UnboundedSender<ClientCommand>,
    task: JoinHandle<()>,
    p2p_port: u16,
}

impl ClientHandle {
    /// 发送命令，客户端已停止时返回 false
    pub fn send(&self, command: ClientCommand) -> bool {
        self.commands.send(command).is_ok()
    }

    pub fn connect(&self) -> bool {
        self.send(ClientCommand::Connect)
    }

    pub fn reconnect(&self) -> bool {
        self.send(ClientCommand::Reconnect)
    }

    pub fn create_room(&self) -> bool {
        self.send(ClientCommand::CreateRoom)
    }

    pub fn join_room(&self, room_id: impl Into<String>) -> bool {
        self.send(ClientCommand::JoinRoom(room_id.into()))
    }

    pub fn quick_match(&self) -> bool {
        self.send(ClientCommand::QuickMatch)
    }

    pub fn leave_room(&self) -> bool {
        self.send(ClientCommand::LeaveRoom)
    }

    pub fn make_move(&self, mv: Move) -> bool {
        self.send(ClientCommand::MakeMove(mv))
    }

    pub fn send_chat(&self, text: impl Into<String>) -> bool {
        self.send(ClientCommand::SendChat(text.into()))
    }

    pub fn resign(&self) -> bool {
        self.send(ClientCommand::Resign)
    }

    pub fn undo(&self) -> bool {
        self.send(ClientCommand::Undo)
    }

    pub fn offer_draw(&self) -> bool {
        self.send(ClientCommand::Request(RequestKind::Draw))
    }

    pub fn respond_draw(&self, accept: bool) -> bool {
        self.send(ClientCommand::Respond { kind: RequestKind::Draw, accept })
    }

    pub fn request_new_game(&self) -> bool {
        self.send(ClientCommand::Request(RequestKind::NewGame))
    }

    pub fn respond_new_game(&self, accept: bool) -> bool {
        self.send(ClientCommand::Respond { kind: RequestKind::NewGame, accept })
    }

    pub fn request_pause(&self) -> bool {
        self.send(ClientCommand::Request(RequestKind::Pause))
    }

    pub fn respond_pause(&self, accept: bool) -> bool {
        self.send(ClientCommand::Respond { kind: RequestKind::Pause, accept })
    }

    pub fn request_resume(&self) -> bool {
        self.send(ClientCommand::Request(RequestKind::Resume))
    }

    pub fn respond_resume(&self, accept: bool) -> bool {
        self.send(ClientCommand::Respond { kind: RequestKind::Resume, accept })
    }

    /// 直连监听端口
    pub fn p2p_port(&self) -> u16 {
        self.p2p_port
    }

    /// 停止客户端，关闭所有连接并等待协调任务退出
    pub async fn shutdown(self) {
        let _ = self.commands.send(ClientCommand::Shutdown);
        let _ = self.task.await;
    }
}

/// 混合连接客户端
pub struct HybridClient;

impl HybridClient {
    /// 开始直连监听并启动协调任务
    ///
    /// 不会自动连接中继，需要界面层发送 `Connect`。
    pub async fn start(
        config: ClientConfig,
        name: impl Into<String>,
    ) -> anyhow::Result<(ClientHandle, mpsc::UnboundedReceiver<ClientEvent>)> {
        let name = name.into();
        let (inbound_tx, inbound_rx) = mpsc::unbounded_channel();
        let (command_tx, command_rx) = mpsc::unbounded_channel();
        let (event_tx, event_rx) = mpsc::unbounded_channel();

        let peer = DirectPeer::bind(config.p2p_port, inbound_tx.clone()).await?;
        let hub = Arc::new(HubConnection::new(inbound_tx.clone()));
        let p2p_port = peer.listening_port();
        info!(name = %name, p2p_port, "client started");

        let coordinator = Coordinator {
            dispatcher: FallbackDispatcher::new(Arc::clone(&hub), Arc::clone(&peer)),
            sync: GameSync::new(Session::new(name), config.initial_time_ms),
            config,
            hub,
            peer,
            events: event_tx,
            inbound_tx,
            connecting: false,
            logged_in: false,
            rejoin_room: None,
        };
        let task = tokio::spawn(coordinator.run(command_rx, inbound_rx));

        let handle = ClientHandle {
            commands: command_tx,
            task,
            p2p_port,
        };
        Ok((handle, event_rx))
    }
}

/// 协调任务状态
struct Coordinator {
    config: ClientConfig,
    hub: Arc<HubConnection>,
    peer: Arc<DirectPeer>,
    dispatcher: FallbackDispatcher<HubConnection, DirectPeer>,
    sync: GameSync,
    events: mpsc::UnboundedSender<ClientEvent>,
    /// 连接任务完成后通过它回报
    inbound_tx: mpsc::UnboundedSender<Inbound>,
    connecting: bool,
    logged_in: bool,
    /// 断线前所在房间，重连登录后尝试重新加入
    rejoin_room: Option<String>,
}

impl Coordinator {
    async fn run(
        mut self,
        mut commands: mpsc::UnboundedReceiver<ClientCommand>,
        mut inbound: mpsc::UnboundedReceiver<Inbound>,
    ) {
        let mut heartbeat = interval(self.config.heartbeat_interval());
        heartbeat.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut clock_tick = interval(CLOCK_TICK);
        clock_tick.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                command = commands.recv() => match command {
                    Some(ClientCommand::Shutdown) | None => break,
                    Some(command) => self.handle_command(command).await,
                },
                Some(event) = inbound.recv() => self.handle_inbound(event).await,
                _ = heartbeat.tick() => self.heartbeat().await,
                _ = clock_tick.tick() => self.tick_clock().await,
            }
        }

        self.hub.close().await;
        self.peer.shutdown().await;
        info!(name = %self.name(), "client stopped");
    }

    // ------------------------------------------------------------------
    // 工具
    // ------------------------------------------------------------------

    fn name(&self) -> &str {
        &self.sync.session().player_name
    }

    fn emit(&self, event: ClientEvent) {
        let _ = self.events.send(event);
    }

    fn status(&self, text: impl Into<String>) {
        let text = text.into();
        debug!(status = %text);
        self.emit(ClientEvent::Status(text));
    }

    /// 发给对手的消息（经中继时由中继按房间转发）
    fn message_to_opponent<T: Serialize>(&self, kind: MessageType, payload: &T) -> Option<Message> {
        let session = self.sync.session();
        match Message::with_payload(&session.player_name, session.opponent_display(), kind, payload) {
            Ok(msg) => Some(msg),
            Err(e) => {
                warn!(error = %e, ?kind, "failed to encode message");
                None
            }
        }
    }

    async fn send_to_opponent<T: Serialize>(&self, kind: MessageType, payload: &T) -> Option<Route> {
        let msg = self.message_to_opponent(kind, payload)?;
        let route = self.dispatcher.route_and_send(&msg).await;
        match route {
            Some(route) => debug!(?kind, ?route, "message sent"),
            None => self.status("Message could not be delivered: no connection available"),
        }
        route
    }

    async fn send_event(&self, event: SystemEvent) -> bool {
        self.send_to_opponent(MessageType::System, &event).await.is_some()
    }

    /// 房间命令只发给中继
    async fn send_room_command(&self, event: SystemEvent) {
        if !self.logged_in {
            self.status("Not connected to the hub");
            return;
        }
        match Message::system(self.name(), HUB_SENDER, &event) {
            Ok(msg) => {
                if !self.dispatcher.send(&msg).await {
                    self.status("Lost connection to the hub");
                }
            }
            Err(e) => warn!(error = %e, "failed to encode room command"),
        }
    }

    fn finish(&mut self, result: GameResult) {
        if self.sync.conclude(result) {
            info!(?result, "game over");
            self.status(result.describe());
            self.emit(ClientEvent::TerminalResult(result));
        }
    }

    fn start_match(&mut self, room_id: &str) {
        if !self.sync.start_match(room_id) {
            return;
        }
        self.emit(ClientEvent::GameStarted(self.sync.snapshot()));
        let text = match self.sync.session().local_color {
            Color::White => "Game started. You play White and move first.",
            Color::Black => "Game started. You play Black, waiting for White.",
        };
        self.status(text);
    }

    fn in_match_or_status(&self) -> bool {
        if self.sync.session().in_match() {
            true
        } else {
            self.status("No opponent in the room");
            false
        }
    }

    // ------------------------------------------------------------------
    // 界面命令
    // ------------------------------------------------------------------

    async fn handle_command(&mut self, command: ClientCommand) {
        match command {
            ClientCommand::Connect => self.connect(),
            ClientCommand::Reconnect => {
                self.hub.close().await;
                self.logged_in = false;
                self.connecting = false;
                self.rejoin_room = self.sync.session().room_id.clone();
                self.connect();
            }
            ClientCommand::CreateRoom => self.send_room_command(SystemEvent::CreateRoom).await,
            ClientCommand::JoinRoom(room_id) => {
                self.send_room_command(SystemEvent::JoinRoom { room_id }).await
            }
            ClientCommand::QuickMatch => self.send_room_command(SystemEvent::QuickMatch).await,
            ClientCommand::LeaveRoom => self.leave_room().await,
            ClientCommand::MakeMove(mv) => self.make_move(mv).await,
            ClientCommand::SendChat(text) => {
                if self.in_match_or_status() {
                    self.send_to_opponent(MessageType::Chat, &ChatPayload { text }).await;
                }
            }
            ClientCommand::Resign => self.resign().await,
            ClientCommand::Undo => self.undo().await,
            ClientCommand::Request(kind) => self.request(kind).await,
            ClientCommand::Respond { kind, accept } => self.respond(kind, accept).await,
            ClientCommand::Shutdown => {}
        }
    }

    /// 在独立任务中连接中继，不阻塞协调任务
    fn connect(&mut self) {
        if self.hub.is_connected() || self.connecting {
            self.status("Already connected to the hub");
            return;
        }
        self.connecting = true;

        let hub = Arc::clone(&self.hub);
        let config = self.config.clone();
        let tx = self.inbound_tx.clone();
        tokio::spawn(async move {
            let outcome = match hub.connect(&config).await {
                Ok(()) => Inbound::HubConnected,
                Err(e) => Inbound::HubConnectFailed(e.to_string()),
            };
            let _ = tx.send(outcome);
        });

        self.status(format!("Connecting to {}...", self.config.hub.addr()));
    }

    async fn leave_room(&mut self) {
        if self.sync.session().room_id.is_none() {
            self.status("Not in a room");
            return;
        }

        self.send_room_command(SystemEvent::LeaveRoom).await;
        if self.sync.session().in_match() {
            let local = self.sync.session().local_color;
            self.finish(GameResult::Abandoned(local));
        }
        self.peer.close().await;
        self.sync.session_mut().leave_room();
        self.status("Left the room");
    }

    async fn make_move(&mut self, mv: Move) {
        let result = match self.sync.apply_local_move(mv) {
            Ok(result) => result,
            Err(reason) => {
                debug!(%mv, error = %reason, "local move rejected");
                self.emit(ClientEvent::MoveRejected { mv, reason });
                return;
            }
        };

        self.emit(ClientEvent::MoveApplied {
            snapshot: self.sync.snapshot(),
            local: true,
        });

        // 先应用再发送
        if self.sync.session().in_match() {
            let (white_ms, black_ms) = self.sync.clock().snapshot();
            let payload = MovePayload::with_clock(mv, white_ms, black_ms);
            self.send_to_opponent(MessageType::Move, &payload).await;
        }

        if result.is_terminal() {
            self.status(result.describe());
            self.emit(ClientEvent::TerminalResult(result));
        }
    }

    async fn resign(&mut self) {
        if !self.in_match_or_status() {
            return;
        }
        if self.sync.game().is_over() {
            self.status("The game is already over");
            return;
        }
        let local = self.sync.session().local_color;
        self.finish(GameResult::Resigned(local));
        self.send_event(SystemEvent::Resign).await;
    }

    async fn undo(&mut self) {
        match self.sync.undo() {
            Some(mv) => {
                debug!(%mv, "took back a move");
                self.emit(ClientEvent::MoveApplied {
                    snapshot: self.sync.snapshot(),
                    local: true,
                });
                if self.sync.session().in_match() {
                    self.send_event(SystemEvent::Undo).await;
                }
            }
            None => self.status("Nothing to undo"),
        }
    }

    async fn request(&mut self, kind: RequestKind) {
        if !self.in_match_or_status() {
            return;
        }
        if self.send_event(kind.request_event()).await {
            self.sync.session_mut().begin_request(kind);
            let opponent = self.sync.session().opponent_display().to_string();
            self.status(format!("Waiting for {} to answer...", opponent));
        }
    }

    async fn respond(&mut self, kind: RequestKind, accept: bool) {
        if !self.in_match_or_status() {
            return;
        }
        if self.sync.session_mut().take_incoming(kind).is_none() {
            self.status(format!("No {} to answer", kind.label()));
            return;
        }

        self.send_event(kind.answer_event(accept)).await;
        if accept {
            self.apply_agreement(kind);
        }
    }

    /// 双方同意后的效果
    fn apply_agreement(&mut self, kind: RequestKind) {
        match kind {
            RequestKind::NewGame => {
                self.sync.sync_game_state();
                self.emit(ClientEvent::GameStarted(self.sync.snapshot()));
                self.status("New game started");
            }
            RequestKind::Draw => self.finish(GameResult::DrawByAgreement),
            RequestKind::Pause => {
                self.sync.pause_clock();
                self.status("Game paused");
            }
            RequestKind::Resume => {
                self.sync.resume_clock();
                self.status("Game resumed");
            }
        }
    }

    // ------------------------------------------------------------------
    // 定时器
    // ------------------------------------------------------------------

    async fn heartbeat(&self) {
        if !self.hub.is_connected() {
            return;
        }
        if let Err(e) = self.hub.send(&Message::ping(self.name())).await {
            debug!(error = %e, "heartbeat failed");
        }
    }

    async fn tick_clock(&mut self) {
        if let Some(color) = self.sync.flag_fallen() {
            // 只判本方超时，对方超时由对方客户端上报
            if color == self.sync.session().local_color {
                self.finish(GameResult::TimedOut(color));
                self.send_event(SystemEvent::Timeout).await;
            }
            return;
        }

        if self.sync.session().in_match() && self.sync.clock().is_running() {
            let (white_ms, black_ms) = self.sync.clock().snapshot();
            self.emit(ClientEvent::Clock { white_ms, black_ms });
        }
    }

    // ------------------------------------------------------------------
    // 入站
    // ------------------------------------------------------------------

    async fn handle_inbound(&mut self, inbound: Inbound) {
        match inbound {
            Inbound::Message { route, message } => self.handle_message(route, message).await,
            Inbound::HubConnected => {
                self.connecting = false;
                let login = LoginPayload::new(self.name(), self.peer.listening_port());
                match Message::with_payload(self.name(), HUB_SENDER, MessageType::Login, &login) {
                    Ok(msg) => {
                        if let Err(e) = self.hub.send(&msg).await {
                            warn!(error = %e, "failed to send login");
                        }
                    }
                    Err(e) => warn!(error = %e, "failed to encode login"),
                }
            }
            Inbound::HubConnectFailed(reason) => {
                self.connecting = false;
                self.status(format!("Could not reach the hub: {}", reason));
                self.emit(ClientEvent::HubConnectFailed(reason));
            }
            Inbound::HubDisconnected => {
                self.logged_in = false;
                self.rejoin_room = self.sync.session().room_id.clone();
                self.emit(ClientEvent::HubDisconnected);
                self.status("Lost connection to the hub");
            }
            Inbound::PeerLinked { outbound } => {
                debug!(outbound, "direct link up");
                self.emit(ClientEvent::PeerLinked);
                let handshake = SystemEvent::Handshake {
                    name: self.name().to_string(),
                };
                if let Some(msg) = self.message_to_opponent(MessageType::System, &handshake) {
                    self.dispatcher.send_direct(&msg).await;
                }
            }
            Inbound::PeerDisconnected => {
                self.emit(ClientEvent::PeerDisconnected);
                if self.sync.session().in_match() {
                    self.status("Direct link lost, relaying through the hub");
                }
            }
        }
    }

    async fn handle_message(&mut self, route: Route, message: Message) {
        match message.kind {
            MessageType::Ping | MessageType::Pong | MessageType::Login => {}
            MessageType::Error => match message.event() {
                Ok(SystemEvent::Error { code, message: text }) => {
                    warn!(%code, text = %text, "hub reported an error");
                    self.status(text.clone());
                    self.emit(ClientEvent::HubError { code, message: text });
                }
                other => warn!(?other, "unexpected error payload"),
            },
            MessageType::PeerInfo => match message.payload::<PeerInfo>() {
                Ok(info) => self.handle_peer_info(info),
                Err(e) => warn!(error = %e, "malformed peer info"),
            },
            MessageType::Move => match message.payload::<MovePayload>() {
                Ok(payload) => self.handle_remote_move(route, &message.from, payload).await,
                Err(e) => warn!(error = %e, "malformed move payload"),
            },
            MessageType::Chat => match message.payload::<ChatPayload>() {
                Ok(chat) => self.emit(ClientEvent::Chat {
                    from: message.from,
                    text: chat.text,
                }),
                Err(e) => warn!(error = %e, "malformed chat payload"),
            },
            MessageType::System => match message.event() {
                Ok(event) => self.handle_system(&message.from, event).await,
                Err(e) => warn!(error = %e, "malformed system event"),
            },
        }
    }

    /// 负责拨号的一方在后台拨号，失败就一直用中继
    fn handle_peer_info(&self, info: PeerInfo) {
        if !info.is_host {
            debug!(host = %info.host, port = info.port, "waiting for opponent to dial");
            return;
        }
        if info.port == 0 {
            self.status("Opponent has no direct port, relaying through the hub");
            return;
        }

        let peer = Arc::clone(&self.peer);
        tokio::spawn(async move {
            if let Err(e) = peer.dial(&info.host, info.port).await {
                warn!(host = %info.host, port = info.port, error = %e, "direct dial failed, staying on the hub");
            }
        });
    }

    async fn handle_remote_move(&mut self, route: Route, from: &str, payload: MovePayload) {
        if !self.sync.session().in_match() {
            debug!(from, "ignoring move outside of a match");
            return;
        }

        match self.sync.apply_remote_move(payload.mv, from) {
            Ok(result) => {
                debug!(?route, mv = %payload.mv, "remote move applied");
                if let Some((white_ms, black_ms)) = payload.clock() {
                    self.sync.apply_clock_snapshot(white_ms, black_ms);
                }
                self.emit(ClientEvent::MoveApplied {
                    snapshot: self.sync.snapshot(),
                    local: false,
                });
                if result.is_terminal() {
                    self.status(result.describe());
                    self.emit(ClientEvent::TerminalResult(result));
                }
            }
            Err(e) => {
                warn!(from, error = %e, "requesting full history from opponent");
                self.status("Out of sync with the opponent, resynchronizing...");
                self.send_event(SystemEvent::SyncRequest).await;
            }
        }
    }

    async fn handle_system(&mut self, from: &str, event: SystemEvent) {
        match event {
            SystemEvent::LoginSuccess => {
                self.logged_in = true;
                self.emit(ClientEvent::HubConnected);
                self.status(format!("Logged in as {}", self.name()));
                if let Some(room_id) = self.rejoin_room.take() {
                    info!(room_id = %room_id, "rejoining room after reconnect");
                    self.sync.session_mut().leave_room();
                    self.send_room_command(SystemEvent::JoinRoom { room_id }).await;
                }
            }
            SystemEvent::RoomCreated { room_id, color } => {
                self.sync.session_mut().assign_room(room_id.clone(), color);
                self.status(format!("Room {} created, waiting for an opponent", room_id));
                self.emit(ClientEvent::RoomAssigned {
                    room_id,
                    color,
                    opponent: None,
                });
            }
            SystemEvent::Joined {
                room_id,
                color,
                opponent,
            }
            | SystemEvent::PlayerJoined {
                room_id,
                color,
                opponent,
            } => {
                let session = self.sync.session_mut();
                session.assign_room(room_id.clone(), color);
                session.set_opponent(opponent.clone());
                self.emit(ClientEvent::RoomAssigned {
                    room_id: room_id.clone(),
                    color,
                    opponent: Some(opponent),
                });
                self.start_match(&room_id);
            }
            SystemEvent::GameStart { room_id } => {
                if self.sync.session().room_id.as_deref() == Some(room_id.as_str()) {
                    self.start_match(&room_id);
                }
            }
            SystemEvent::Handshake { name } => {
                let session = self.sync.session_mut();
                if session.room_id.is_some() && session.opponent_name.is_none() {
                    session.set_opponent(name.clone());
                }
                self.status(format!("Direct link established with {}", name));
            }
            SystemEvent::Undo => {
                if self.sync.undo().is_some() {
                    self.emit(ClientEvent::MoveApplied {
                        snapshot: self.sync.snapshot(),
                        local: false,
                    });
                    self.status(format!("{} took back a move", from));
                } else {
                    self.status("Opponent's undo could not be applied");
                }
            }
            SystemEvent::Resign => {
                let color = self.sync.session().opponent_color();
                self.finish(GameResult::Resigned(color));
            }
            SystemEvent::Timeout => {
                let color = self.sync.session().opponent_color();
                self.finish(GameResult::TimedOut(color));
            }
            SystemEvent::LeaveRoom => {
                self.status(format!("{} is leaving the room", from));
            }
            SystemEvent::OpponentLeft { player } => self.on_opponent_left(player).await,
            SystemEvent::SyncRequest => {
                let moves = self.sync.game().history().to_vec();
                info!(moves = moves.len(), "sending full history to opponent");
                self.send_event(SystemEvent::SyncState { moves }).await;
            }
            SystemEvent::SyncState { moves } => match self.sync.replay_moves(&moves) {
                Ok(()) => {
                    self.emit(ClientEvent::MoveApplied {
                        snapshot: self.sync.snapshot(),
                        local: false,
                    });
                    self.status("Resynchronized with the opponent");
                    let result = self.sync.game().result();
                    if result.is_terminal() {
                        self.emit(ClientEvent::TerminalResult(result));
                    }
                }
                Err(e) => {
                    warn!(error = %e, "opponent history does not replay");
                    self.status("Could not resynchronize with the opponent");
                }
            },
            SystemEvent::Error { code, message } => {
                self.status(message.clone());
                self.emit(ClientEvent::HubError { code, message });
            }
            other => match RequestKind::classify(&other) {
                Some((kind, answer)) => self.on_request(from, kind, answer),
                None => debug!(?other, "ignoring system event"),
            },
        }
    }

    async fn on_opponent_left(&mut self, player: Option<String>) {
        if self.sync.session().in_match() {
            let color = self.sync.session().opponent_color();
            self.finish(GameResult::Abandoned(color));
        }
        self.sync.session_mut().clear_opponent();
        self.peer.close().await;

        let name = player.clone().unwrap_or_else(|| "Opponent".to_string());
        self.status(format!("{} left the room", name));
        self.emit(ClientEvent::OpponentLeft(player));
    }

    fn on_request(&mut self, from: &str, kind: RequestKind, answer: Option<bool>) {
        let Some(accepted) = answer else {
            self.sync.session_mut().receive_request(kind, from);
            self.emit(ClientEvent::OpponentRequest {
                from: from.to_string(),
                kind,
            });
            return;
        };

        if !self.sync.session_mut().take_outgoing(kind) {
            debug!(from, ?kind, accepted, "answer to a request we did not send");
            return;
        }
        self.emit(ClientEvent::RequestAnswered { kind, accepted });
        if accepted {
            self.apply_agreement(kind);
        } else {
            let opponent = self.sync.session().opponent_display().to_string();
            self.status(format!("{} declined", opponent));
        }
    }
}

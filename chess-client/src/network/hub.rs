//! 中继连接
//!
//! 连接在独立任务中建立（带指数退避重试），建立后一个读任务持续接收。

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;
use tokio::time::{sleep, timeout};
use tracing::{debug, info, warn};

use protocol::{
    Connector, LineReader, LineWriter, Message, ProtocolError, TcpConnection, TcpConnector,
};

use super::{Inbound, MessageChannel, Route};
use crate::config::ClientConfig;

/// 到中继的连接
pub struct HubConnection {
    /// 写端（发送与关闭互斥）
    writer: Mutex<Option<LineWriter<OwnedWriteHalf>>>,
    reader: Mutex<Option<JoinHandle<()>>>,
    connected: AtomicBool,
    /// 每建立一次连接加一，旧读任务据此判断自己是否过期
    generation: AtomicU64,
    inbound: mpsc::UnboundedSender<Inbound>,
}

impl HubConnection {
    pub fn new(inbound: mpsc::UnboundedSender<Inbound>) -> Self {
        Self {
            writer: Mutex::new(None),
            reader: Mutex::new(None),
            connected: AtomicBool::new(false),
            generation: AtomicU64::new(0),
            inbound,
        }
    }

    /// 连接中继，失败时按 base * 2^(n-1) 退避重试
    ///
    /// 只建立 TCP 连接，登录由调用方随后发送。
    pub async fn connect(self: &Arc<Self>, config: &ClientConfig) -> protocol::Result<()> {
        let addr = config.hub.addr();
        let attempts = config.connect_attempts.max(1);
        let mut last_error = ProtocolError::NotConnected;

        for attempt in 1..=attempts {
            match TcpConnector.connect(&addr).await {
                Ok(conn) => {
                    info!(addr = %addr, attempt, "connected to hub");
                    self.attach(conn, config.idle_timeout()).await;
                    return Ok(());
                }
                Err(e) => {
                    warn!(addr = %addr, attempt, attempts, error = %e, "hub connect failed");
                    last_error = e;
                    if attempt < attempts {
                        sleep(config.retry_delay(attempt)).await;
                    }
                }
            }
        }

        Err(last_error)
    }

    async fn attach(self: &Arc<Self>, conn: TcpConnection, idle: Duration) {
        self.close().await;

        let (reader, writer) = conn.split();
        let id = self.generation.fetch_add(1, Ordering::SeqCst) + 1;
        *self.writer.lock().await = Some(writer);
        self.connected.store(true, Ordering::SeqCst);

        let hub = Arc::clone(self);
        let handle = tokio::spawn(async move { hub.read_loop(reader, id, idle).await });
        *self.reader.lock().await = Some(handle);
    }

    async fn read_loop(self: Arc<Self>, mut reader: LineReader<OwnedReadHalf>, id: u64, idle: Duration) {
        loop {
            match timeout(idle, reader.read_message::<Message>()).await {
                Err(_) => {
                    warn!("hub silent for {:?}, dropping connection", idle);
                    break;
                }
                Ok(Ok(message)) => {
                    let inbound = Inbound::Message {
                        route: Route::Hub,
                        message,
                    };
                    if self.inbound.send(inbound).is_err() {
                        break;
                    }
                }
                Ok(Err(e)) if e.is_malformed_line() => {
                    warn!(error = %e, "malformed line from hub");
                }
                Ok(Err(e)) => {
                    info!(error = %e, "hub read loop ended");
                    break;
                }
            }
        }

        self.link_lost(id, false).await;
    }

    /// 连接失效：只有当前这一代连接负责清理并上报
    async fn link_lost(&self, id: u64, abort_reader: bool) {
        if self
            .generation
            .compare_exchange(id, id + 1, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            return;
        }

        self.connected.store(false, Ordering::SeqCst);
        if let Some(mut writer) = self.writer.lock().await.take() {
            let _ = writer.shutdown().await;
        }
        if abort_reader {
            if let Some(handle) = self.reader.lock().await.take() {
                handle.abort();
            }
        }
        let _ = self.inbound.send(Inbound::HubDisconnected);
    }

    /// 主动关闭，不上报断线
    pub async fn close(&self) {
        self.generation.fetch_add(1, Ordering::SeqCst);
        self.connected.store(false, Ordering::SeqCst);

        if let Some(mut writer) = self.writer.lock().await.take() {
            let _ = writer.shutdown().await;
        }
        if let Some(handle) = self.reader.lock().await.take() {
            handle.abort();
        }
    }
}

#[async_trait]
impl MessageChannel for HubConnection {
    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    async fn send(&self, msg: &Message) -> protocol::Result<()> {
        let mut guard = self.writer.lock().await;
        let Some(writer) = guard.as_mut() else {
            return Err(ProtocolError::NotConnected);
        };

        match writer.write_message(msg).await {
            Ok(()) => {
                debug!(kind = ?msg.kind, "sent via hub");
                Ok(())
            }
            Err(e) => {
                drop(guard);
                warn!(error = %e, "hub send failed");
                let id = self.generation.load(Ordering::SeqCst);
                self.link_lost(id, true).await;
                Err(e)
            }
        }
    }

    fn route(&self) -> Route {
        Route::Hub
    }
}

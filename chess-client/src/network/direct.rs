//! 玩家直连
//!
//! 同时监听和按需拨号，先建立的那条连接成为唯一的活动连接，
//! 之后到达的连接立即关闭。活动连接断开后可以再次建立。

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use protocol::{
    Connection, Connector, LineReader, LineWriter, Listener, Message, ProtocolError,
    TcpConnection, TcpConnector, TcpListener,
};

use super::{Inbound, MessageChannel, Route};

/// 当前活动连接
struct ActiveLink {
    id: u64,
    writer: LineWriter<OwnedWriteHalf>,
    reader: JoinHandle<()>,
}

/// 直连端点
pub struct DirectPeer {
    port: u16,
    link: Mutex<Option<ActiveLink>>,
    accept_task: Mutex<Option<JoinHandle<()>>>,
    connected: AtomicBool,
    next_link_id: AtomicU64,
    inbound: mpsc::UnboundedSender<Inbound>,
}

impl DirectPeer {
    /// 在指定端口监听（0 表示由系统分配）并开始接受连接
    pub async fn bind(port: u16, inbound: mpsc::UnboundedSender<Inbound>) -> protocol::Result<Arc<Self>> {
        let mut listener = TcpListener::bind(&format!("0.0.0.0:{}", port)).await?;
        let port = listener
            .local_addr()
            .map(|addr| addr.port())
            .ok_or(ProtocolError::NotConnected)?;
        info!(port, "direct peer listening");

        let peer = Arc::new(Self {
            port,
            link: Mutex::new(None),
            accept_task: Mutex::new(None),
            connected: AtomicBool::new(false),
            next_link_id: AtomicU64::new(1),
            inbound,
        });

        let acceptor = Arc::clone(&peer);
        let handle = tokio::spawn(async move {
            loop {
                match listener.accept().await {
                    Ok(conn) => {
                        let addr = conn.peer_addr();
                        if !acceptor.install(conn, false).await {
                            info!(addr = ?addr, "refused extra direct connection");
                        }
                    }
                    Err(e) => {
                        warn!(error = %e, "direct accept failed");
                    }
                }
            }
        });
        *peer.accept_task.lock().await = Some(handle);

        Ok(peer)
    }

    /// 对外公布的监听端口
    pub fn listening_port(&self) -> u16 {
        self.port
    }

    /// 主动拨号；已有活动连接时直接返回
    pub async fn dial(self: &Arc<Self>, host: &str, port: u16) -> protocol::Result<()> {
        if self.is_connected() {
            return Ok(());
        }

        let addr = format!("{}:{}", host, port);
        let conn = TcpConnector.connect(&addr).await?;
        info!(addr = %addr, "dialed peer");
        if !self.install(conn, true).await {
            debug!(addr = %addr, "lost race to an inbound link");
        }
        Ok(())
    }

    /// 把新连接设为活动连接；已有活动连接时关闭新连接并返回 false
    async fn install(self: &Arc<Self>, mut conn: TcpConnection, outbound: bool) -> bool {
        let mut link = self.link.lock().await;
        if link.is_some() {
            drop(link);
            let _ = conn.close().await;
            return false;
        }

        let id = self.next_link_id.fetch_add(1, Ordering::SeqCst);
        let (reader, writer) = conn.split();
        let peer = Arc::clone(self);
        let reader = tokio::spawn(async move { peer.read_loop(reader, id).await });

        *link = Some(ActiveLink { id, writer, reader });
        self.connected.store(true, Ordering::SeqCst);
        // 持锁上报，保证 PeerLinked 先于该连接的 PeerDisconnected
        let _ = self.inbound.send(Inbound::PeerLinked { outbound });
        true
    }

    async fn read_loop(self: Arc<Self>, mut reader: LineReader<OwnedReadHalf>, id: u64) {
        loop {
            match reader.read_message::<Message>().await {
                Ok(message) => {
                    let inbound = Inbound::Message {
                        route: Route::Direct,
                        message,
                    };
                    if self.inbound.send(inbound).is_err() {
                        break;
                    }
                }
                Err(e) if e.is_malformed_line() => {
                    warn!(error = %e, "malformed line from peer");
                }
                Err(e) => {
                    info!(error = %e, "direct link closed");
                    break;
                }
            }
        }

        if self.drop_link(Some(id), false).await {
            let _ = self.inbound.send(Inbound::PeerDisconnected);
        }
    }

    /// 拆除活动连接；`id` 给定时只拆除那一条
    async fn drop_link(&self, id: Option<u64>, abort_reader: bool) -> bool {
        let mut guard = self.link.lock().await;
        let matches = match (guard.as_ref(), id) {
            (Some(link), Some(id)) => link.id == id,
            (Some(_), None) => true,
            (None, _) => false,
        };
        if !matches {
            return false;
        }

        let Some(mut link) = guard.take() else {
            return false;
        };
        self.connected.store(false, Ordering::SeqCst);
        drop(guard);

        let _ = link.writer.shutdown().await;
        if abort_reader {
            link.reader.abort();
        }
        true
    }

    /// 关闭活动连接（离开房间时调用），不上报断线
    pub async fn close(&self) {
        self.drop_link(None, true).await;
    }

    /// 关闭活动连接并停止监听
    pub async fn shutdown(&self) {
        self.close().await;
        if let Some(handle) = self.accept_task.lock().await.take() {
            handle.abort();
        }
    }
}

#[async_trait]
impl MessageChannel for DirectPeer {
    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    async fn send(&self, msg: &Message) -> protocol::Result<()> {
        let mut guard = self.link.lock().await;
        let Some(link) = guard.as_mut() else {
            return Err(ProtocolError::NotConnected);
        };

        match link.writer.write_message(msg).await {
            Ok(()) => {
                debug!(kind = ?msg.kind, "sent via direct link");
                Ok(())
            }
            Err(e) => {
                let id = link.id;
                drop(guard);
                warn!(error = %e, "direct send failed, closing link");
                if self.drop_link(Some(id), true).await {
                    let _ = self.inbound.send(Inbound::PeerDisconnected);
                }
                Err(e)
            }
        }
    }

    fn route(&self) -> Route {
        Route::Direct
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use tokio::time::timeout;

    async fn next(rx: &mut mpsc::UnboundedReceiver<Inbound>) -> Inbound {
        timeout(Duration::from_secs(5), rx.recv())
            .await
            .expect("timed out")
            .expect("channel closed")
    }

    #[tokio::test]
    async fn test_dial_and_exchange() {
        let (a_tx, mut a_rx) = mpsc::unbounded_channel();
        let (b_tx, mut b_rx) = mpsc::unbounded_channel();
        let a = DirectPeer::bind(0, a_tx).await.unwrap();
        let b = DirectPeer::bind(0, b_tx).await.unwrap();
        assert_ne!(a.listening_port(), 0);

        a.dial("127.0.0.1", b.listening_port()).await.unwrap();
        assert!(matches!(next(&mut a_rx).await, Inbound::PeerLinked { outbound: true }));
        assert!(matches!(next(&mut b_rx).await, Inbound::PeerLinked { outbound: false }));
        assert!(a.is_connected());
        assert!(b.is_connected());

        a.send(&Message::ping("alice")).await.unwrap();
        match next(&mut b_rx).await {
            Inbound::Message { route, message } => {
                assert_eq!(route, Route::Direct);
                assert_eq!(message.from, "alice");
            }
            other => panic!("unexpected inbound: {:?}", other),
        }

        // 一端关闭，另一端收到断线并可重新使用
        a.close().await;
        assert!(matches!(next(&mut b_rx).await, Inbound::PeerDisconnected));
        assert!(!b.is_connected());
        assert!(b.send(&Message::ping("bob")).await.is_err());

        a.shutdown().await;
        b.shutdown().await;
    }

    #[tokio::test]
    async fn test_second_link_refused() {
        let (a_tx, mut a_rx) = mpsc::unbounded_channel();
        let (b_tx, _b_rx) = mpsc::unbounded_channel();
        let (c_tx, mut c_rx) = mpsc::unbounded_channel();
        let a = DirectPeer::bind(0, a_tx).await.unwrap();
        let b = DirectPeer::bind(0, b_tx).await.unwrap();
        let c = DirectPeer::bind(0, c_tx).await.unwrap();

        b.dial("127.0.0.1", a.listening_port()).await.unwrap();
        assert!(matches!(next(&mut a_rx).await, Inbound::PeerLinked { .. }));

        // 第三方连上后立即被关闭
        c.dial("127.0.0.1", a.listening_port()).await.unwrap();
        assert!(matches!(next(&mut c_rx).await, Inbound::PeerLinked { outbound: true }));
        assert!(matches!(next(&mut c_rx).await, Inbound::PeerDisconnected));

        // 原连接不受影响
        b.send(&Message::ping("bob")).await.unwrap();
        assert!(matches!(next(&mut a_rx).await, Inbound::Message { .. }));
    }
}

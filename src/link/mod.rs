//! # 服务器间链接（服务端）
//!
//! 路由服务与存储服务接受会话网关发起的长连接。每条链接一个读循环、一个写任务，
//! 两者只通过有界队列通信。链接在收到注册帧之前发来的任何帧都会被丢弃。

use std::future::Future;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, OnceLock};
use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::protocol::{Body, CommandRegistry, Message, read_message, write_message};

/// 链接写超时
pub const WRITE_TIMEOUT: Duration = Duration::from_secs(10);
/// 链接发送队列深度
const LINK_QUEUE_DEPTH: usize = 1024;

pub type LinkId = u64;

static NEXT_LINK_ID: AtomicU64 = AtomicU64::new(1);

/// 一条已接受的服务器链接
#[derive(Debug)]
pub struct ServerLink {
    id: LinkId,
    peer: SocketAddr,
    server_id: OnceLock<String>,
    tx: mpsc::Sender<Message>,
}

impl ServerLink {
    pub fn new(peer: SocketAddr, tx: mpsc::Sender<Message>) -> Self {
        Self {
            id: NEXT_LINK_ID.fetch_add(1, Ordering::Relaxed),
            peer,
            server_id: OnceLock::new(),
            tx,
        }
    }

    pub fn id(&self) -> LinkId {
        self.id
    }

    pub fn peer(&self) -> SocketAddr {
        self.peer
    }

    /// 注册得到的对端服务器标识
    pub fn server_id(&self) -> Option<&str> {
        self.server_id.get().map(String::as_str)
    }

    pub fn is_registered(&self) -> bool {
        self.server_id.get().is_some()
    }

    fn register(&self, server_id: String) -> bool {
        self.server_id.set(server_id).is_ok()
    }

    /// 入队一条消息，队列满时等待；链接已关闭返回 false
    pub async fn send(&self, msg: Message) -> bool {
        self.tx.send(msg).await.is_ok()
    }
}

/// 链接事件处理
#[async_trait]
pub trait LinkHandler: Send + Sync + 'static {
    /// 期望的注册命令字
    fn register_cmd(&self) -> u32;

    async fn on_registered(&self, link: &Arc<ServerLink>);

    /// 已注册链接上的业务帧
    async fn on_message(&self, link: &Arc<ServerLink>, msg: Message);

    async fn on_closed(&self, link: &Arc<ServerLink>);
}

/// 接受链接直到 `shutdown` 完成
pub async fn serve_links<H, F>(
    listener: TcpListener,
    registry: Arc<CommandRegistry>,
    handler: Arc<H>,
    shutdown: F,
) -> Result<()>
where
    H: LinkHandler,
    F: Future<Output = ()>,
{
    let local = listener.local_addr().context("listener has no local address")?;
    info!(address = %local, "accepting server links");
    tokio::pin!(shutdown);

    loop {
        tokio::select! {
            accepted = listener.accept() => {
                match accepted {
                    Ok((stream, peer)) => {
                        let registry = registry.clone();
                        let handler = handler.clone();
                        tokio::spawn(async move {
                            serve_link(stream, peer, registry, handler).await;
                        });
                    }
                    Err(err) => {
                        warn!(?err, "failed to accept server link");
                    }
                }
            }
            _ = &mut shutdown => {
                info!(address = %local, "server link listener stopped");
                return Ok(());
            }
        }
    }
}

/// 处理单条链接直到对端断开
pub async fn serve_link<H: LinkHandler>(
    stream: TcpStream,
    peer: SocketAddr,
    registry: Arc<CommandRegistry>,
    handler: Arc<H>,
) {
    if let Err(err) = stream.set_nodelay(true) {
        debug!(?err, peer = %peer, "failed to set TCP_NODELAY");
    }
    let (mut reader, mut writer) = stream.into_split();
    let (tx, mut rx) = mpsc::channel::<Message>(LINK_QUEUE_DEPTH);
    let link = Arc::new(ServerLink::new(peer, tx));

    let link_id = link.id();
    let write_task = tokio::spawn(async move {
        let mut seq: u32 = 0;
        while let Some(mut msg) = rx.recv().await {
            seq = seq.wrapping_add(1);
            msg.seq = seq;
            match tokio::time::timeout(WRITE_TIMEOUT, write_message(&mut writer, &msg)).await {
                Ok(Ok(())) => {}
                Ok(Err(err)) => {
                    warn!(?err, link_id, "server link write failed");
                    break;
                }
                Err(_) => {
                    warn!(link_id, "server link write timed out");
                    break;
                }
            }
        }
    });

    debug!(link_id, peer = %peer, "server link accepted");
    loop {
        let msg = match read_message(&mut reader, &registry).await {
            Ok(msg) => msg,
            Err(err) => {
                if err.is_closed() {
                    debug!(link_id, "server link closed by peer");
                } else {
                    warn!(?err, link_id, "server link read failed");
                }
                break;
            }
        };

        if !link.is_registered() {
            match (msg.cmd == handler.register_cmd(), msg.body) {
                (true, Body::ServerRegister(register)) => {
                    info!(link_id, server_id = %register.server_id, peer = %peer, "server link registered");
                    link.register(register.server_id);
                    handler.on_registered(&link).await;
                }
                _ => {
                    warn!(link_id, cmd = msg.cmd, "frame before registration dropped");
                }
            }
            continue;
        }

        if msg.cmd == handler.register_cmd() {
            debug!(link_id, "duplicate registration ignored");
            continue;
        }
        handler.on_message(&link, msg).await;
    }

    if link.is_registered() {
        handler.on_closed(&link).await;
    }
    write_task.abort();
}

//! # 服务器间通道（会话网关侧）
//!
//! 到单个路由 / 存储服务器的长连接，断线后按指数退避重连。
//!
//! - 每次连上都先发注册帧，再重放当前全部订阅，最后才处理发送队列
//! - 订阅按引用计数维护，计数从 0 到 1 时发订阅帧，从 1 到 0 时发退订帧
//! - 存储 RPC 以本链接上的 seq 关联 `RESULT.req_seq`，链接断开时在途请求全部失败
//!
//! 订阅表只由通道任务自己持有，订阅操作与普通帧走同一个有序队列。

mod subscription;

pub use subscription::ChannelSubscription;

use std::collections::HashMap;
use std::io;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use spark_im_core::{ExponentialBackoff, ProtocolError};
use spark_im_core::protocol::command::RESULT;
use spark_im_core::protocol::{
    Body, CommandRegistry, Message, RpcResult, ServerRegister, read_message, write_message,
};
use tokio::io::AsyncWrite;
use tokio::net::TcpStream;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::error::{GatewayError, Result};

/// 单帧写超时
pub const WRITE_TIMEOUT: Duration = Duration::from_secs(10);
/// RPC 等待结果的上限
pub const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);
const OUTBOUND_QUEUE_DEPTH: usize = 1024;

/// 通道收到的非 RESULT 帧
#[async_trait]
pub trait ChannelHandler: Send + Sync + 'static {
    async fn on_message(&self, msg: Message);
}

enum Outbound {
    Frame(Message),
    Request(Message, oneshot::Sender<RpcResult>),
    Subscribe(ChannelSubscription),
    Unsubscribe(ChannelSubscription),
}

enum ConnectionEnd {
    /// 通道被丢弃，不再重连
    Shutdown,
    Lost(String),
}

pub struct Channel {
    addr: String,
    connected: Arc<AtomicBool>,
    outbound: mpsc::Sender<Outbound>,
    task: JoinHandle<()>,
}

impl Channel {
    /// 启动通道任务，立即返回；连接在后台建立
    pub fn start(
        addr: impl Into<String>,
        register_cmd: u32,
        server_id: &str,
        registry: Arc<CommandRegistry>,
        handler: Arc<dyn ChannelHandler>,
    ) -> Self {
        let addr = addr.into();
        let connected = Arc::new(AtomicBool::new(false));
        let (outbound, rx) = mpsc::channel(OUTBOUND_QUEUE_DEPTH);
        let register = Message::new(
            register_cmd,
            Body::ServerRegister(ServerRegister {
                server_id: server_id.to_string(),
            }),
        );
        let worker = ChannelWorker {
            addr: addr.clone(),
            register,
            registry,
            handler,
            connected: connected.clone(),
            subscriptions: HashMap::new(),
        };
        let task = tokio::spawn(worker.run(rx));
        Self {
            addr,
            connected,
            outbound,
            task,
        }
    }

    pub fn addr(&self) -> &str {
        &self.addr
    }

    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::Acquire)
    }

    /// 入队一帧，队列满时等待
    pub async fn send(&self, msg: Message) -> Result<()> {
        self.enqueue(Outbound::Frame(msg)).await
    }

    /// 发送请求并等待对应的 RESULT
    pub async fn request(&self, msg: Message) -> Result<RpcResult> {
        let (tx, rx) = oneshot::channel();
        self.enqueue(Outbound::Request(msg, tx)).await?;
        match tokio::time::timeout(REQUEST_TIMEOUT, rx).await {
            Ok(Ok(result)) => Ok(result),
            Ok(Err(_)) => Err(GatewayError::ChannelClosed(self.addr.clone())),
            Err(_) => Err(GatewayError::RequestTimeout(self.addr.clone())),
        }
    }

    pub async fn subscribe(&self, sub: ChannelSubscription) -> Result<()> {
        self.enqueue(Outbound::Subscribe(sub)).await
    }

    pub async fn unsubscribe(&self, sub: ChannelSubscription) -> Result<()> {
        self.enqueue(Outbound::Unsubscribe(sub)).await
    }

    async fn enqueue(&self, item: Outbound) -> Result<()> {
        self.outbound
            .send(item)
            .await
            .map_err(|_| GatewayError::ChannelClosed(self.addr.clone()))
    }
}

impl Drop for Channel {
    fn drop(&mut self) {
        self.task.abort();
    }
}

struct ChannelWorker {
    addr: String,
    register: Message,
    registry: Arc<CommandRegistry>,
    handler: Arc<dyn ChannelHandler>,
    connected: Arc<AtomicBool>,
    subscriptions: HashMap<ChannelSubscription, usize>,
}

impl ChannelWorker {
    async fn run(mut self, mut rx: mpsc::Receiver<Outbound>) {
        let mut backoff = ExponentialBackoff::default();
        loop {
            match TcpStream::connect(&self.addr).await {
                Ok(stream) => {
                    backoff.reset();
                    configure_stream(&stream, &self.addr);
                    info!(addr = %self.addr, "channel connected");
                    self.connected.store(true, Ordering::Release);
                    let end = self.run_connection(stream, &mut rx).await;
                    self.connected.store(false, Ordering::Release);
                    match end {
                        ConnectionEnd::Shutdown => {
                            debug!(addr = %self.addr, "channel shut down");
                            return;
                        }
                        ConnectionEnd::Lost(reason) => {
                            warn!(addr = %self.addr, %reason, "channel lost");
                        }
                    }
                }
                Err(err) => {
                    warn!(addr = %self.addr, ?err, "channel connect failed");
                }
            }
            tokio::time::sleep(backoff.next_delay()).await;
        }
    }

    async fn run_connection(
        &mut self,
        stream: TcpStream,
        rx: &mut mpsc::Receiver<Outbound>,
    ) -> ConnectionEnd {
        let (mut reader, mut writer) = stream.into_split();
        let pending: Mutex<HashMap<u32, oneshot::Sender<RpcResult>>> = Mutex::new(HashMap::new());

        let registry = self.registry.clone();
        let handler = self.handler.clone();
        let addr = self.addr.clone();
        let pending_ref = &pending;

        let read_loop = async move {
            loop {
                let msg = match read_message(&mut reader, &registry).await {
                    Ok(msg) => msg,
                    Err(err) => return ConnectionEnd::Lost(err.to_string()),
                };
                if msg.cmd == RESULT {
                    if let Body::Result(result) = msg.body {
                        let waiter = match pending_ref.lock() {
                            Ok(mut pending) => pending.remove(&result.req_seq),
                            Err(poisoned) => poisoned.into_inner().remove(&result.req_seq),
                        };
                        match waiter {
                            Some(tx) => {
                                let _ = tx.send(result);
                            }
                            None => debug!(addr = %addr, req_seq = result.req_seq, "stale result dropped"),
                        }
                    }
                    continue;
                }
                handler.on_message(msg).await;
            }
        };

        let write_loop = async {
            let mut seq: u32 = 0;
            if let Err(err) = write_frame(&mut writer, &mut seq, self.register.clone()).await {
                return ConnectionEnd::Lost(err.to_string());
            }
            let replay: Vec<ChannelSubscription> = self.subscriptions.keys().copied().collect();
            let replayed = replay.len();
            for sub in replay {
                if let Err(err) = write_frame(&mut writer, &mut seq, sub.frame(true)).await {
                    return ConnectionEnd::Lost(err.to_string());
                }
            }
            debug!(addr = %self.addr, replayed, "channel registered");

            loop {
                let Some(item) = rx.recv().await else {
                    return ConnectionEnd::Shutdown;
                };
                let frame = match item {
                    Outbound::Frame(msg) => Some(msg),
                    Outbound::Request(msg, reply) => {
                        let req_seq = seq.wrapping_add(1);
                        match pending.lock() {
                            Ok(mut pending) => pending.insert(req_seq, reply),
                            Err(poisoned) => poisoned.into_inner().insert(req_seq, reply),
                        };
                        Some(msg)
                    }
                    Outbound::Subscribe(sub) => {
                        let count = self.subscriptions.entry(sub).or_insert(0);
                        *count += 1;
                        (*count == 1).then(|| sub.frame(true))
                    }
                    Outbound::Unsubscribe(sub) => match self.subscriptions.get_mut(&sub) {
                        Some(count) if *count > 1 => {
                            *count -= 1;
                            None
                        }
                        Some(_) => {
                            self.subscriptions.remove(&sub);
                            Some(sub.frame(false))
                        }
                        None => {
                            debug!(?sub, "unsubscribe without subscription ignored");
                            None
                        }
                    },
                };
                if let Some(msg) = frame {
                    if let Err(err) = write_frame(&mut writer, &mut seq, msg).await {
                        return ConnectionEnd::Lost(err.to_string());
                    }
                }
            }
        };

        tokio::select! {
            end = read_loop => end,
            end = write_loop => end,
        }
    }
}

/// 以下一个 seq 写出一帧
async fn write_frame<W>(writer: &mut W, seq: &mut u32, mut msg: Message) -> Result<()>
where
    W: AsyncWrite + Unpin,
{
    *seq = seq.wrapping_add(1);
    msg.seq = *seq;
    match tokio::time::timeout(WRITE_TIMEOUT, write_message(writer, &msg)).await {
        Ok(result) => result.map_err(GatewayError::from),
        Err(_) => Err(GatewayError::Protocol(ProtocolError::Io(io::Error::new(
            io::ErrorKind::TimedOut,
            "channel write timed out",
        )))),
    }
}

fn configure_stream(stream: &TcpStream, addr: &str) {
    if let Err(err) = stream.set_nodelay(true) {
        debug!(addr, ?err, "failed to set TCP_NODELAY");
    }
    if let Err(err) = socket2::SockRef::from(stream).set_keepalive(true) {
        debug!(addr, ?err, "failed to enable TCP keepalive");
    }
}

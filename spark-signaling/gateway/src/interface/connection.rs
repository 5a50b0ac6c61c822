//! 客户端连接的读写循环
//!
//! 读任务解码上行帧交给 [`Session`]；写任务按 `wt` → `owt` → `ewt` 的优先级取帧，
//! 积压队列关闭之前不会下发在线消息。任一方向失败都会关闭整个连接。

use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use spark_im_core::metrics::GatewayMetrics;
use spark_im_core::protocol::{Message, read_message, write_message};
use tokio::io::{AsyncWriteExt, BufReader};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::{TcpListener, TcpStream};
use tracing::{debug, info, warn};

use crate::application::{Session, SessionQueues, SessionServices};
use crate::domain::EMessage;

/// 单帧写超时
pub const WRITE_TIMEOUT: Duration = Duration::from_secs(10);

/// 客户端监听循环，直到 `shutdown` 完成
pub async fn serve_clients<F>(
    listener: TcpListener,
    services: Arc<SessionServices>,
    shutdown: F,
) -> Result<()>
where
    F: Future<Output = ()>,
{
    let local = listener.local_addr().context("listener has no local address")?;
    info!(address = %local, "accepting client connections");
    tokio::pin!(shutdown);

    loop {
        tokio::select! {
            accepted = listener.accept() => {
                match accepted {
                    Ok((stream, peer)) => {
                        let services = services.clone();
                        tokio::spawn(async move {
                            serve_client(stream, peer, services).await;
                        });
                    }
                    Err(err) => {
                        warn!(?err, "failed to accept client connection");
                    }
                }
            }
            _ = &mut shutdown => {
                info!(address = %local, "client listener stopped");
                return Ok(());
            }
        }
    }
}

/// 处理单个客户端连接直到断开
pub async fn serve_client(stream: TcpStream, peer: SocketAddr, services: Arc<SessionServices>) {
    if let Err(err) = stream.set_nodelay(true) {
        debug!(?err, peer = %peer, "failed to set TCP_NODELAY");
    }
    let metrics = services.metrics.clone();
    metrics.connections_active.inc();

    let (reader, writer) = stream.into_split();
    let (session, queues) = Session::new(services, Some(peer));
    let client_id = session.shared().id();
    debug!(client_id, peer = %peer, "client connected");

    let write_task = tokio::spawn(write_loop(writer, queues, metrics.clone()));
    read_loop(reader, session).await;
    if let Err(err) = write_task.await {
        warn!(?err, client_id, "client writer task failed");
    }

    metrics.connections_active.dec();
    debug!(client_id, peer = %peer, "client connection closed");
}

async fn read_loop(reader: OwnedReadHalf, mut session: Session) {
    let registry = session.registry().clone();
    let shared = session.shared().clone();
    let mut closed = shared.close_signal();
    let mut reader = BufReader::new(reader);

    while !shared.is_closed() {
        let msg = tokio::select! {
            _ = closed.changed() => break,
            result = read_message(&mut reader, &registry) => match result {
                Ok(msg) => msg,
                Err(err) if err.is_closed() => {
                    debug!(client_id = shared.id(), "client closed connection");
                    break;
                }
                Err(err) => {
                    info!(%err, client_id = shared.id(), "client read failed");
                    break;
                }
            },
        };
        session.handle(msg).await;
    }

    shared.close();
    session.disconnect().await;
}

enum Outgoing {
    Control(Message),
    Persisted(EMessage),
}

async fn write_loop(mut writer: OwnedWriteHalf, queues: SessionQueues, metrics: Arc<GatewayMetrics>) {
    let SessionQueues {
        shared,
        mut wt,
        mut owt,
        mut ewt,
    } = queues;
    let mut closed = shared.close_signal();
    let mut seq: u32 = 0;
    let mut backlog_open = true;
    let mut live_open = true;

    while !shared.is_closed() {
        let outgoing = tokio::select! {
            biased;
            _ = closed.changed() => break,
            item = wt.recv() => match item {
                Some(Some(msg)) => Outgoing::Control(msg),
                _ => break,
            },
            item = owt.recv(), if backlog_open => match item {
                Some(emsg) => Outgoing::Persisted(emsg),
                None => {
                    backlog_open = false;
                    continue;
                }
            },
            item = ewt.recv(), if !backlog_open && live_open => match item {
                Some(emsg) => Outgoing::Persisted(emsg),
                None => {
                    live_open = false;
                    continue;
                }
            },
        };

        seq = seq.wrapping_add(1);
        let mut msg = match outgoing {
            Outgoing::Control(msg) => msg,
            Outgoing::Persisted(emsg) => {
                let msg = emsg.msg.clone();
                if emsg.msgid > 0 {
                    shared.track_unacked(seq, emsg);
                }
                msg
            }
        };
        msg.seq = seq;
        msg.version = shared.version();

        match tokio::time::timeout(WRITE_TIMEOUT, write_message(&mut writer, &msg)).await {
            Ok(Ok(())) => metrics.messages_out_total.inc(),
            Ok(Err(err)) => {
                info!(%err, client_id = shared.id(), cmd = msg.cmd, "client write failed");
                break;
            }
            Err(_) => {
                warn!(client_id = shared.id(), cmd = msg.cmd, "client write timed out");
                break;
            }
        }
    }

    shared.close();
    let _ = writer.shutdown().await;
}

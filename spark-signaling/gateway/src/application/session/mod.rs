//! # 客户端会话状态机
//!
//! 每条客户端连接对应一个 `Session`，由连接的读任务独占。读任务解码上行帧后交给
//! [`Session::handle`]，写任务只从三个队列取帧：
//!
//! - `wt`：控制帧与实时消息，`None` 通知写任务关闭连接
//! - `owt`：离线积压，加载完成后关闭
//! - `ewt`：在线期间由存储服务推送的已持久化消息，`owt` 关闭后才开始下发
//!
//! 认证前只处理 `AUTH_TOKEN`、`PING` 与 `HEARTBEAT`。

mod auth;
mod contact;
mod group;
mod message;
mod room;

#[cfg(test)]
mod tests;

use std::collections::HashSet;
use std::net::SocketAddr;
use std::sync::Arc;

use spark_im_core::metrics::GatewayMetrics;
use spark_im_core::protocol::command::*;
use spark_im_core::protocol::{Body, CommandRegistry, ImMessage, Message, MessageAck};
use spark_im_core::current_secs;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use super::client::{ClientHandle, SessionShared};
use super::group_manager::GroupManager;
use super::presence::Presence;
use super::user_manager::UserManager;
use crate::domain::{
    CallbackPayload, DeviceRegistry, EMessage, LoginPointRecord, LoginPointStore, TokenStore,
};
use crate::infrastructure::{RouteClient, StorageClient};

/// 控制队列深度
pub const CONTROL_QUEUE_DEPTH: usize = 10;
/// 离线积压队列深度
pub const BACKLOG_QUEUE_DEPTH: usize = 10;

/// 会话依赖的全部服务，进程内共享一份
pub struct SessionServices {
    pub server_id: String,
    pub registry: Arc<CommandRegistry>,
    pub presence: Arc<Presence>,
    pub storage: Arc<StorageClient>,
    pub route: Arc<RouteClient>,
    pub users: Arc<UserManager>,
    pub groups: Arc<GroupManager>,
    pub tokens: Arc<dyn TokenStore>,
    pub devices: Arc<dyn DeviceRegistry>,
    pub login_points: Arc<dyn LoginPointStore>,
    pub metrics: Arc<GatewayMetrics>,
    /// 在线消息队列深度，满时关闭会话
    pub live_queue_depth: usize,
}

/// 写任务持有的队列接收端
pub struct SessionQueues {
    pub shared: Arc<SessionShared>,
    pub wt: mpsc::Receiver<Option<Message>>,
    pub owt: mpsc::Receiver<EMessage>,
    pub ewt: mpsc::Receiver<EMessage>,
}

pub struct Session {
    services: Arc<SessionServices>,
    shared: Arc<SessionShared>,
    peer: Option<SocketAddr>,
    wt: mpsc::Sender<Option<Message>>,
    owt: Option<mpsc::Sender<EMessage>>,
    ewt: mpsc::Sender<EMessage>,
    client: Option<Arc<ClientHandle>>,
    rooms: HashSet<i64>,
    group_subscriptions: Vec<i64>,
}

impl Session {
    pub fn new(services: Arc<SessionServices>, peer: Option<SocketAddr>) -> (Self, SessionQueues) {
        let shared = Arc::new(SessionShared::new());
        let (wt, wt_rx) = mpsc::channel(CONTROL_QUEUE_DEPTH);
        let (owt, owt_rx) = mpsc::channel(BACKLOG_QUEUE_DEPTH);
        let (ewt, ewt_rx) = mpsc::channel(services.live_queue_depth.max(1));

        let session = Self {
            services,
            shared: shared.clone(),
            peer,
            wt,
            owt: Some(owt),
            ewt,
            client: None,
            rooms: HashSet::new(),
            group_subscriptions: Vec::new(),
        };
        let queues = SessionQueues {
            shared,
            wt: wt_rx,
            owt: owt_rx,
            ewt: ewt_rx,
        };
        (session, queues)
    }

    pub fn shared(&self) -> &Arc<SessionShared> {
        &self.shared
    }

    pub fn registry(&self) -> &Arc<CommandRegistry> {
        &self.services.registry
    }

    pub fn is_authenticated(&self) -> bool {
        self.client.is_some()
    }

    /// 处理一条上行消息
    pub async fn handle(&mut self, msg: Message) {
        match msg.cmd {
            PING => self.send(Message::new(PONG, Body::Empty)).await,
            HEARTBEAT => {}
            AUTH_TOKEN => match msg.body {
                Body::AuthToken(auth) => self.handle_auth_token(auth, msg.version).await,
                _ => debug!("auth frame without token payload"),
            },
            cmd => {
                let Some(client) = self.client.clone() else {
                    warn!(cmd, client_id = self.shared.id(), "client has not been authenticated");
                    return;
                };
                self.dispatch(&client, msg).await;
            }
        }
    }

    async fn dispatch(&mut self, client: &Arc<ClientHandle>, msg: Message) {
        match msg.cmd {
            IM | TRANSMIT_USER => self.handle_peer_message(client, msg).await,
            GROUP_IM | TRANSMIT_GROUP => self.handle_group_message(client, msg).await,
            CUSTOMER_SERVICE => self.handle_customer_service(client, msg).await,
            ACK => self.handle_ack(client, msg).await,
            RT | INPUTING | VOIP_CONTROL => self.handle_realtime(client, msg).await,
            SUBSCRIBE_ONLINE_STATE => self.handle_subscribe_state(client, msg).await,
            UNREAD_COUNT => self.handle_unread_count(client, msg).await,
            ENTER_ROOM => self.handle_enter_room(client, msg).await,
            LEAVE_ROOM => self.handle_leave_room(client, msg).await,
            ROOM_IM | TRANSMIT_ROOM => self.handle_room_message(client, msg).await,
            CONTACT_INVITE => self.handle_contact_invite(client, msg).await,
            CONTACT_ACCEPT => self.handle_contact_accept(client, msg).await,
            CONTACT_REFUSE => self.handle_contact_refuse(client, msg).await,
            CONTACT_DEL => self.handle_contact_del(client, msg).await,
            CONTACT_BLACK => self.handle_contact_black(client, msg).await,
            CONTACT_UNBLACK => self.handle_contact_unblack(client, msg).await,
            GROUP_CREATE => self.handle_group_create(client, msg).await,
            GROUP_SELF_JOIN => self.handle_group_self_join(client, msg).await,
            GROUP_INVITE_JOIN => self.handle_group_invite_join(client, msg).await,
            GROUP_REMOVE => self.handle_group_remove(client, msg).await,
            GROUP_QUIT => self.handle_group_quit(client, msg).await,
            GROUP_DEL => self.handle_group_del(client, msg).await,
            cmd => debug!(
                cmd,
                name = self.services.registry.name(cmd),
                uid = client.uid,
                "unhandled client command"
            ),
        }
    }

    /// 连接断开后的清理
    ///
    /// 离开房间、注销在线目录、退订服务器通道、删除登录点，最后让写任务退出。
    pub async fn disconnect(&mut self) {
        if let Some(client) = self.client.take() {
            let services = self.services.clone();
            for room_id in std::mem::take(&mut self.rooms) {
                services.presence.leave_room(room_id, &client).await;
                if let Err(err) = services.route.unsubscribe_room(client.appid, room_id).await {
                    debug!(?err, room_id, "failed to unsubscribe room");
                }
            }

            services.presence.remove_client(&client).await;
            services.metrics.clients_authenticated.dec();

            if let Err(err) = services.storage.unsubscribe_user(client.appid, client.uid).await {
                debug!(?err, uid = client.uid, "failed to unsubscribe user from storage");
            }
            if let Err(err) = services.route.unsubscribe_user(client.appid, client.uid).await {
                debug!(?err, uid = client.uid, "failed to unsubscribe user from route");
            }
            for gid in std::mem::take(&mut self.group_subscriptions) {
                if let Err(err) = services
                    .storage
                    .unsubscribe_group_member(client.appid, gid, client.uid)
                    .await
                {
                    debug!(?err, gid, uid = client.uid, "failed to unsubscribe group member");
                }
            }

            let point = LoginPointRecord {
                appid: client.appid,
                uid: client.uid,
                platform: client.platform,
                device: client.device.clone(),
                server_id: services.server_id.clone(),
            };
            if let Err(err) = services.login_points.remove(&point).await {
                warn!(?err, uid = client.uid, "failed to remove login point");
            }
            info!(
                uid = client.uid,
                appid = client.appid,
                device_id = client.device_id,
                unacked = self.shared.unacked_len(),
                "client disconnected"
            );
        }
        self.owt = None;
        // 写任务可能已经退出
        let _ = self.wt.send(None).await;
    }

    /// 写入控制队列，写任务退出后静默丢弃
    async fn send(&self, msg: Message) {
        if self.wt.send(Some(msg)).await.is_err() {
            debug!(client_id = self.shared.id(), "control queue closed");
        }
    }

    async fn ack(&self, seq: u32) {
        self.send(Message::new(ACK, Body::Ack(MessageAck { seq }))).await;
    }

    /// 以透传消息通知 `receiver`，持久化到其点对点队列
    async fn notify(&self, client: &ClientHandle, receiver: i64, payload: CallbackPayload) {
        let content = match serde_json::to_string(&payload) {
            Ok(content) => content,
            Err(err) => {
                warn!(?err, cmd = payload.cmd, "failed to encode callback payload");
                return;
            }
        };
        let msg = Message::new(
            TRANSMIT_USER,
            Body::Im(ImMessage {
                sender: client.uid,
                receiver,
                timestamp: current_secs() as i32,
                msgid: 0,
                content,
            }),
        );
        if let Err(err) = self
            .services
            .storage
            .save_peer(client.appid, receiver, client.device_id, msg)
            .await
        {
            warn!(?err, receiver, cmd = payload.cmd, "failed to persist callback notification");
        }
    }
}

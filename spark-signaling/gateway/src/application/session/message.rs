//! 消息类命令：点对点、群、客服、确认、实时消息与在线状态

use futures::future::join_all;
use spark_im_core::current_secs;
use spark_im_core::protocol::command::{IM, ONLINE_STATE};
use spark_im_core::protocol::{AppMessage, Body, Message, OnlineState};
use tracing::{debug, info, warn};

use super::Session;
use crate::application::client::ClientHandle;
use crate::domain::{DeliveryKind, GroupKind};
use crate::error::Result;

impl Session {
    /// `IM` 与 `TRANSMIT_USER`
    ///
    /// 被接收方拉黑时仍然回 ACK，消息直接丢弃。IM 额外保存一份到发送方队列，
    /// 供发送者的其它设备同步。
    pub(super) async fn handle_peer_message(&mut self, client: &ClientHandle, msg: Message) {
        let (cmd, seq) = (msg.cmd, msg.seq);
        let Body::Im(mut im) = msg.body else {
            return;
        };
        if im.sender != client.uid {
            warn!(sender = im.sender, uid = client.uid, cmd, "peer message sender mismatch");
            return;
        }
        if self.services.users.is_black(im.receiver, im.sender).await {
            info!(sender = im.sender, receiver = im.receiver, "sender is blacklisted by receiver");
            self.ack(seq).await;
            return;
        }

        im.timestamp = current_secs() as i32;
        let (sender, receiver) = (im.sender, im.receiver);
        let stored = Message::new(cmd, Body::Im(im));
        let storage = &self.services.storage;
        let msgid = match storage
            .save_peer(client.appid, receiver, client.device_id, stored.clone())
            .await
        {
            Ok(msgid) => msgid,
            Err(err) => {
                warn!(?err, sender, receiver, "failed to persist peer message");
                return;
            }
        };
        if cmd == IM {
            if let Err(err) = storage
                .save_peer(client.appid, sender, client.device_id, stored)
                .await
            {
                warn!(?err, sender, "failed to persist sender copy");
            }
        }

        self.ack(seq).await;
        self.services.metrics.messages_in_total.inc();
        info!(sender, receiver, msgid, cmd, "peer message persisted");
    }

    /// `GROUP_IM` 与 `TRANSMIT_GROUP`
    pub(super) async fn handle_group_message(&mut self, client: &ClientHandle, msg: Message) {
        let (cmd, seq) = (msg.cmd, msg.seq);
        let Body::Im(mut im) = msg.body else {
            return;
        };
        let gid = im.receiver;
        let Some(group) = self.services.groups.find_app_group(client.appid, gid).await else {
            warn!(gid, uid = client.uid, "group not found");
            return;
        };
        if im.sender != client.uid {
            warn!(sender = im.sender, uid = client.uid, gid, "group message sender mismatch");
            return;
        }
        if !group.is_member(client.uid) {
            warn!(uid = client.uid, gid, "sender is not a group member");
            return;
        }

        im.timestamp = current_secs() as i32;
        let stored = Message::new(cmd, Body::Im(im));
        let storage = &self.services.storage;
        let persisted: Result<()> = match group.kind {
            GroupKind::Super => storage
                .save_group(client.appid, gid, client.device_id, stored)
                .await
                .map(|_| ()),
            GroupKind::Normal => {
                let saves = group.members.iter().map(|member| {
                    storage.save_peer(client.appid, *member, client.device_id, stored.clone())
                });
                join_all(saves)
                    .await
                    .into_iter()
                    .try_for_each(|saved| saved.map(|_| ()))
            }
        };
        if let Err(err) = persisted {
            warn!(?err, gid, uid = client.uid, "failed to persist group message");
            return;
        }

        self.ack(seq).await;
        self.services.metrics.messages_in_total.inc();
        info!(sender = client.uid, gid, kind = ?group.kind, members = group.member_count(), "group message persisted");
    }

    pub(super) async fn handle_customer_service(&mut self, client: &ClientHandle, msg: Message) {
        let seq = msg.seq;
        let Body::CustomerService(mut cs) = msg.body else {
            return;
        };
        if cs.sender != client.uid {
            warn!(sender = cs.sender, uid = client.uid, "customer service sender mismatch");
            return;
        }

        cs.timestamp = current_secs() as i32;
        let (sender, receiver) = (cs.sender, cs.receiver);
        let stored = Message::new(msg.cmd, Body::CustomerService(cs));
        let storage = &self.services.storage;
        if let Err(err) = storage
            .save_peer(client.appid, receiver, client.device_id, stored.clone())
            .await
        {
            warn!(?err, sender, receiver, "failed to persist customer service message");
            return;
        }
        if let Err(err) = storage
            .save_peer(client.appid, sender, client.device_id, stored)
            .await
        {
            warn!(?err, sender, "failed to persist customer service sender copy");
        }

        self.ack(seq).await;
        self.services.metrics.messages_in_total.inc();
    }

    /// 客户端确认，推进对应队列的游标
    pub(super) async fn handle_ack(&mut self, client: &ClientHandle, msg: Message) {
        let Body::Ack(ack) = msg.body else {
            return;
        };
        let Some(emsg) = self.shared.take_unacked(ack.seq) else {
            debug!(seq = ack.seq, uid = client.uid, "ack for unknown seq");
            return;
        };
        if emsg.msgid == 0 || client.device_id == 0 {
            return;
        }

        let storage = &self.services.storage;
        let advanced = match emsg.kind {
            DeliveryKind::Peer => {
                storage
                    .dequeue(client.appid, client.uid, client.device_id, emsg.msgid)
                    .await
            }
            DeliveryKind::Group { gid } => {
                storage
                    .dequeue_group(client.appid, gid, client.uid, client.device_id, emsg.msgid)
                    .await
            }
        };
        if let Err(err) = advanced {
            warn!(?err, uid = client.uid, msgid = emsg.msgid, "failed to advance cursor");
        }
    }

    /// `RT`、`INPUTING`、`VOIP_CONTROL`：投递给本机会话并经路由服务转发，不持久化
    pub(super) async fn handle_realtime(&mut self, client: &ClientHandle, msg: Message) {
        let receiver = match &msg.body {
            Body::Rt(rt) => rt.receiver,
            Body::Inputing(inputing) => inputing.receiver,
            Body::VoipControl(voip) => voip.receiver,
            _ => return,
        };
        if msg.body.sender() != Some(client.uid) {
            warn!(cmd = msg.cmd, uid = client.uid, "realtime message sender mismatch");
            return;
        }

        let msg = Message::new(msg.cmd, msg.body);
        let targets = self.services.presence.find_clients(client.appid, receiver).await;
        for target in targets.iter() {
            if !target.is_self_echo(Some(client.uid), client.device_id) {
                target.deliver(msg.clone());
            }
        }

        let cmd = msg.cmd;
        let app = AppMessage::new(client.appid, receiver, client.device_id, msg);
        if let Err(err) = self.services.route.publish(app).await {
            warn!(?err, cmd, receiver, "failed to publish realtime message");
        }
        self.services.metrics.messages_in_total.inc();
        debug!(cmd, sender = client.uid, receiver, "realtime message forwarded");
    }

    /// 按本机在线目录回复在线状态
    pub(super) async fn handle_subscribe_state(&mut self, client: &ClientHandle, msg: Message) {
        let Body::SubscribeState(state) = msg.body else {
            return;
        };
        for uid in state.uids {
            let online = self.services.presence.is_online(client.appid, uid).await;
            self.send(Message::new(
                ONLINE_STATE,
                Body::OnlineState(OnlineState {
                    sender: uid,
                    online: i32::from(online),
                }),
            ))
            .await;
        }
    }

    pub(super) async fn handle_unread_count(&mut self, client: &ClientHandle, msg: Message) {
        let Body::UnreadCount(unread) = msg.body else {
            return;
        };
        if let Err(err) = self
            .services
            .login_points
            .set_unread_count(client.appid, client.uid, unread.count)
            .await
        {
            warn!(?err, uid = client.uid, "failed to store unread count");
        }
    }
}

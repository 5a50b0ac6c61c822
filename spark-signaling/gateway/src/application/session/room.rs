//! 聊天室：只在内存中维护成员，消息不持久化

use std::sync::Arc;

use spark_im_core::protocol::{AppMessage, Body, Message};
use tracing::{debug, info, warn};

use super::Session;
use crate::application::client::ClientHandle;

impl Session {
    pub(super) async fn handle_enter_room(&mut self, client: &Arc<ClientHandle>, msg: Message) {
        let Body::Room(room) = msg.body else {
            return;
        };
        let room_id = room.0;
        if room_id == 0 {
            return;
        }
        if !self.rooms.insert(room_id) {
            debug!(room_id, uid = client.uid, "already in room");
            return;
        }

        self.services.presence.enter_room(room_id, client).await;
        if let Err(err) = self.services.route.subscribe_room(client.appid, room_id).await {
            warn!(?err, room_id, "failed to subscribe room");
        }
        info!(room_id, uid = client.uid, "enter room");
    }

    pub(super) async fn handle_leave_room(&mut self, client: &Arc<ClientHandle>, msg: Message) {
        let Body::Room(room) = msg.body else {
            return;
        };
        let room_id = room.0;
        if room_id == 0 || !self.rooms.remove(&room_id) {
            return;
        }

        self.services.presence.leave_room(room_id, client).await;
        if let Err(err) = self.services.route.unsubscribe_room(client.appid, room_id).await {
            warn!(?err, room_id, "failed to unsubscribe room");
        }
        info!(room_id, uid = client.uid, "leave room");
    }

    /// `ROOM_IM` 与 `TRANSMIT_ROOM`
    pub(super) async fn handle_room_message(&mut self, client: &Arc<ClientHandle>, msg: Message) {
        let (cmd, seq) = (msg.cmd, msg.seq);
        let Body::Rt(rt) = msg.body else {
            return;
        };
        let room_id = rt.receiver;
        if !self.rooms.contains(&room_id) {
            warn!(room_id, uid = client.uid, "room message for a room the client has not entered");
            return;
        }

        let msg = Message::new(cmd, Body::Rt(rt));
        let members = self.services.presence.room_clients(client.appid, room_id).await;
        for member in members.iter() {
            if member.id() != client.id() {
                member.deliver(msg.clone());
            }
        }

        let app = AppMessage::new(client.appid, room_id, client.device_id, msg);
        if let Err(err) = self.services.route.publish_room(app).await {
            warn!(?err, room_id, "failed to publish room message");
        }
        self.ack(seq).await;
        self.services.metrics.messages_in_total.inc();
    }
}

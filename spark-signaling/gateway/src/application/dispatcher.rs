//! 服务器通道下行消息分发
//!
//! 存储服务发布的已持久化消息进入客户端的在线队列，路由服务转发的实时消息直接投递。

use std::sync::Arc;

use async_trait::async_trait;
use spark_im_core::protocol::command::{PUBLISH, PUBLISH_GROUP, PUBLISH_ROOM};
use spark_im_core::protocol::{AppMessage, Body, Message};
use tracing::{debug, warn};

use super::client::ClientHandle;
use super::group_manager::GroupManager;
use super::presence::Presence;
use crate::domain::{DeliveryKind, EMessage};
use crate::infrastructure::ChannelHandler;

pub struct PublishDispatcher {
    presence: Arc<Presence>,
    groups: Arc<GroupManager>,
}

impl PublishDispatcher {
    pub fn new(presence: Arc<Presence>, groups: Arc<GroupManager>) -> Self {
        Self { presence, groups }
    }

    /// 点对点队列的消息，或路由转发的实时消息
    async fn dispatch_peer(&self, app: AppMessage) -> usize {
        let clients = self.presence.find_clients(app.appid, app.receiver).await;
        self.deliver_to(&clients, &app, DeliveryKind::Peer)
    }

    /// 超级群消息，投递给本机在线的群成员
    async fn dispatch_group(&self, app: AppMessage) -> usize {
        let gid = app.receiver;
        let Some(group) = self.groups.find_app_group(app.appid, gid).await else {
            warn!(gid, "group message for unknown group dropped");
            return 0;
        };
        let mut delivered = 0;
        for uid in group.members.iter() {
            let clients = self.presence.find_clients(app.appid, *uid).await;
            delivered += self.deliver_to(&clients, &app, DeliveryKind::Group { gid });
        }
        delivered
    }

    async fn dispatch_room(&self, app: AppMessage) -> usize {
        let clients = self.presence.room_clients(app.appid, app.receiver).await;
        self.deliver_to(&clients, &app, DeliveryKind::Peer)
    }

    fn deliver_to(&self, clients: &[Arc<ClientHandle>], app: &AppMessage, kind: DeliveryKind) -> usize {
        let sender = app.msg.body.sender();
        let mut delivered = 0;
        for client in clients {
            if client.is_self_echo(sender, app.device_id) {
                continue;
            }
            let accepted = if app.msgid > 0 {
                client.enqueue_live(EMessage {
                    msgid: app.msgid,
                    kind,
                    msg: app.msg.clone(),
                })
            } else {
                client.deliver(app.msg.clone())
            };
            if accepted {
                delivered += 1;
            }
        }
        delivered
    }
}

#[async_trait]
impl ChannelHandler for PublishDispatcher {
    async fn on_message(&self, msg: Message) {
        let cmd = msg.cmd;
        let Body::App(app) = msg.body else {
            debug!(cmd, "unexpected frame from server channel");
            return;
        };
        let delivered = match cmd {
            PUBLISH => self.dispatch_peer(*app).await,
            PUBLISH_GROUP => self.dispatch_group(*app).await,
            PUBLISH_ROOM => self.dispatch_room(*app).await,
            _ => {
                debug!(cmd, "unexpected publish command");
                return;
            }
        };
        debug!(cmd, delivered, "publish dispatched");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::application::client::SessionShared;
    use crate::domain::{Group, GroupKind};
    use crate::infrastructure::MemoryRelationStore;
    use spark_im_core::protocol::ImMessage;
    use spark_im_core::protocol::command::{GROUP_IM, IM};
    use tokio::sync::mpsc;

    struct TestClient {
        handle: Arc<ClientHandle>,
        wt: mpsc::Receiver<Option<Message>>,
        ewt: mpsc::Receiver<EMessage>,
    }

    fn test_client(uid: i64, device_id: i64) -> TestClient {
        let (wt_tx, wt) = mpsc::channel(10);
        let (ewt_tx, ewt) = mpsc::channel(16);
        let handle = Arc::new(ClientHandle::new(
            1,
            uid,
            device_id,
            1,
            format!("device-{device_id}"),
            Arc::new(SessionShared::new()),
            wt_tx,
            ewt_tx,
        ));
        TestClient { handle, wt, ewt }
    }

    fn im(cmd: u32, sender: i64, receiver: i64) -> Message {
        Message::new(
            cmd,
            Body::Im(ImMessage {
                sender,
                receiver,
                timestamp: 0,
                msgid: 0,
                content: "hello".to_string(),
            }),
        )
    }

    fn publish(cmd: u32, receiver: i64, msgid: i64, device_id: i64, inner: Message) -> Message {
        let mut app = AppMessage::new(1, receiver, device_id, inner);
        app.msgid = msgid;
        Message::new(cmd, Body::App(Box::new(app)))
    }

    fn dispatcher() -> (PublishDispatcher, Arc<Presence>, Arc<GroupManager>) {
        let presence = Arc::new(Presence::new());
        let groups = Arc::new(GroupManager::new(Arc::new(MemoryRelationStore::new())));
        (
            PublishDispatcher::new(presence.clone(), groups.clone()),
            presence,
            groups,
        )
    }

    /// 测试：已持久化消息进入在线队列，发送设备不回显
    #[tokio::test]
    async fn test_persisted_peer_message_skips_sending_device() {
        let (dispatcher, presence, _groups) = dispatcher();
        let mut phone = test_client(100, 7);
        let mut tablet = test_client(100, 8);
        presence.add_client(&phone.handle).await;
        presence.add_client(&tablet.handle).await;

        // 用户 100 从设备 7 发出的消息写入自己的队列（发送者副本）
        dispatcher
            .on_message(publish(PUBLISH, 100, 4096, 7, im(IM, 100, 200)))
            .await;

        let copy = tablet.ewt.try_recv().unwrap();
        assert_eq!(copy.msgid, 4096);
        assert_eq!(copy.kind, DeliveryKind::Peer);
        assert!(phone.ewt.try_recv().is_err());
        assert!(phone.wt.try_recv().is_err());
    }

    /// 测试：未持久化消息走控制队列
    #[tokio::test]
    async fn test_realtime_message_uses_control_queue() {
        let (dispatcher, presence, _groups) = dispatcher();
        let mut receiver = test_client(200, 1);
        presence.add_client(&receiver.handle).await;

        dispatcher
            .on_message(publish(PUBLISH, 200, 0, 9, im(IM, 100, 200)))
            .await;
        let delivered = receiver.wt.try_recv().unwrap().unwrap();
        assert_eq!(delivered.cmd, IM);
        assert!(receiver.ewt.try_recv().is_err());
    }

    /// 测试：超级群消息按成员分发并标记群游标
    #[tokio::test]
    async fn test_super_group_dispatch() {
        let (dispatcher, presence, groups) = dispatcher();
        groups
            .create_group(Group {
                gid: 77,
                appid: 1,
                owner: 100,
                title: String::new(),
                description: String::new(),
                is_private: false,
                is_allow_invite: true,
                kind: GroupKind::Super,
                members: Arc::new([100, 200, 300].into_iter().collect()),
            })
            .await
            .unwrap();
        let mut member = test_client(200, 1);
        let mut outsider = test_client(400, 1);
        presence.add_client(&member.handle).await;
        presence.add_client(&outsider.handle).await;

        dispatcher
            .on_message(publish(PUBLISH_GROUP, 77, 8192, 5, im(GROUP_IM, 100, 77)))
            .await;
        let msg = member.ewt.try_recv().unwrap();
        assert_eq!(msg.kind, DeliveryKind::Group { gid: 77 });
        assert!(outsider.ewt.try_recv().is_err());
    }
}

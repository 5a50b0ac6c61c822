use std::sync::Arc;

use async_trait::async_trait;
use spark_im_core::link::{LinkHandler, ServerLink};
use spark_im_core::protocol::command::{
    PUBLISH, PUBLISH_ROOM, SERVER_REGISTER, SUBSCRIBE, SUBSCRIBE_ROOM, UNSUBSCRIBE,
    UNSUBSCRIBE_ROOM,
};
use spark_im_core::protocol::{Body, Message};
use spark_im_core::routing::Subscription;
use tracing::{debug, info, warn};

use crate::application::RouteService;

/// 路由服务的链接处理器，所有帧在读循环内顺序处理
pub struct RouteLinkHandler {
    service: Arc<RouteService>,
}

impl RouteLinkHandler {
    pub fn new(service: Arc<RouteService>) -> Self {
        Self { service }
    }
}

#[async_trait]
impl LinkHandler for RouteLinkHandler {
    fn register_cmd(&self) -> u32 {
        SERVER_REGISTER
    }

    async fn on_registered(&self, link: &Arc<ServerLink>) {
        self.service.add_link(link.clone()).await;
    }

    async fn on_message(&self, link: &Arc<ServerLink>, msg: Message) {
        let link_id = link.id();
        match (msg.cmd, &msg.body) {
            (SUBSCRIBE, Body::AppUser(id)) => {
                self.service
                    .subscribe(link_id, id.appid, Subscription::User { uid: id.uid })
                    .await;
            }
            (UNSUBSCRIBE, Body::AppUser(id)) => {
                self.service
                    .unsubscribe(link_id, id.appid, Subscription::User { uid: id.uid })
                    .await;
            }
            (SUBSCRIBE_ROOM, Body::AppRoom(id)) => {
                let sub = Subscription::Room {
                    room_id: id.room_id,
                };
                self.service.subscribe(link_id, id.appid, sub).await;
            }
            (UNSUBSCRIBE_ROOM, Body::AppRoom(id)) => {
                let sub = Subscription::Room {
                    room_id: id.room_id,
                };
                self.service.unsubscribe(link_id, id.appid, sub).await;
            }
            (PUBLISH, _) => {
                if let Err(err) = self.service.publish(link_id, msg).await {
                    warn!(%err, link_id, "publish failed");
                }
            }
            (PUBLISH_ROOM, _) => {
                if let Err(err) = self.service.publish_room(link_id, msg).await {
                    warn!(%err, link_id, "room publish failed");
                }
            }
            (cmd, _) => debug!(cmd, link_id, "ignored frame on route link"),
        }
    }

    async fn on_closed(&self, link: &Arc<ServerLink>) {
        self.service.remove_link(link.id()).await;
        info!(
            link_id = link.id(),
            server_id = link.server_id().unwrap_or_default(),
            "route link closed"
        );
    }
}

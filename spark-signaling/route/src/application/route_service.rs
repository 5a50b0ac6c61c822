use std::sync::Arc;

use spark_im_core::link::{LinkId, ServerLink};
use spark_im_core::metrics::RouteMetrics;
use spark_im_core::protocol::command::{PUBLISH, PUBLISH_ROOM, VOIP_CONTROL};
use spark_im_core::protocol::{AppMessage, Body, Message};
use spark_im_core::push::{self, PushQueue, VOIP_PUSH_QUEUE, VoipPushNotification};
use spark_im_core::routing::{RouteTable, Subscription};
use tracing::debug;

use crate::error::{Result, RouteError};

pub struct RouteService {
    routes: Arc<RouteTable>,
    push: Arc<dyn PushQueue>,
    metrics: Arc<RouteMetrics>,
}

impl RouteService {
    pub fn new(routes: Arc<RouteTable>, push: Arc<dyn PushQueue>, metrics: Arc<RouteMetrics>) -> Self {
        Self {
            routes,
            push,
            metrics,
        }
    }

    pub fn routes(&self) -> &Arc<RouteTable> {
        &self.routes
    }

    pub async fn add_link(&self, link: Arc<ServerLink>) {
        self.routes.add_link(link).await;
        self.metrics.links_active.inc();
    }

    pub async fn remove_link(&self, link_id: LinkId) {
        if self.routes.remove_link(link_id).await {
            self.metrics.links_active.dec();
        }
    }

    pub async fn subscribe(&self, link_id: LinkId, appid: i64, sub: Subscription) {
        if !self.routes.subscribe(link_id, appid, sub).await {
            debug!(link_id, appid, ?sub, "subscription already present");
        }
    }

    pub async fn unsubscribe(&self, link_id: LinkId, appid: i64, sub: Subscription) {
        if !self.routes.unsubscribe(link_id, appid, sub).await {
            debug!(link_id, appid, ?sub, "subscription not found");
        }
    }

    /// 转发给订阅了接收者的其他链接，返回转发次数
    ///
    /// 没有任何订阅者的首次 VOIP 拨号写入 VOIP 推送队列。
    pub async fn publish(&self, from: LinkId, msg: Message) -> Result<usize> {
        let app = Self::app_message(&msg)?;
        let links = self.routes.user_links(app.appid, app.receiver).await;

        if links.is_empty() {
            self.metrics.publish_dropped_total.inc();
            if let Some(notification) = voip_dial_push(app) {
                push::enqueue(self.push.as_ref(), VOIP_PUSH_QUEUE, &notification)
                    .await
                    .map_err(RouteError::Push)?;
            }
            return Ok(0);
        }
        Ok(self.forward(from, PUBLISH, links, msg).await)
    }

    /// 转发给订阅了房间的其他链接
    pub async fn publish_room(&self, from: LinkId, msg: Message) -> Result<usize> {
        let app = Self::app_message(&msg)?;
        let links = self.routes.room_links(app.appid, app.receiver).await;
        Ok(self.forward(from, PUBLISH_ROOM, links, msg).await)
    }

    fn app_message(msg: &Message) -> Result<&AppMessage> {
        match &msg.body {
            Body::App(app) => Ok(app),
            _ => Err(RouteError::InvalidPublish(msg.cmd)),
        }
    }

    async fn forward(
        &self,
        from: LinkId,
        cmd: u32,
        links: Vec<Arc<ServerLink>>,
        msg: Message,
    ) -> usize {
        let label = if cmd == PUBLISH { "publish" } else { "publish_room" };
        let mut forwarded = 0;
        for link in links.into_iter().filter(|link| link.id() != from) {
            if link.send(msg.clone()).await {
                forwarded += 1;
            }
        }
        self.metrics
            .publish_total
            .with_label_values(&[label])
            .inc_by(forwarded as u64);
        forwarded
    }
}

/// 首次拨号的 VOIP 信令对应的推送
fn voip_dial_push(app: &AppMessage) -> Option<VoipPushNotification> {
    match (app.msg.cmd, &app.msg.body) {
        (VOIP_CONTROL, Body::VoipControl(voip)) if voip.dial_count() == 1 => {
            Some(VoipPushNotification {
                appid: app.appid,
                sender: voip.sender,
                receiver: voip.receiver,
            })
        }
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::{BufMut, BytesMut};
    use spark_im_core::protocol::VoipControl;
    use spark_im_core::protocol::command::IM;
    use spark_im_core::protocol::{ImMessage, VOIP_COMMAND_DIAL};
    use spark_im_core::push::MemoryPushQueue;
    use tokio::sync::mpsc;

    fn service(push: Arc<MemoryPushQueue>) -> RouteService {
        RouteService::new(Arc::new(RouteTable::new()), push, Arc::new(RouteMetrics::new()))
    }

    fn link() -> (Arc<ServerLink>, mpsc::Receiver<Message>) {
        let (tx, rx) = mpsc::channel(8);
        (Arc::new(ServerLink::new("127.0.0.1:1".parse().unwrap(), tx)), rx)
    }

    fn publish(receiver: i64, inner: Message) -> Message {
        Message::new(PUBLISH, Body::App(Box::new(AppMessage::new(1, receiver, 0, inner))))
    }

    fn voip(dial: i32) -> Message {
        let mut content = BytesMut::new();
        content.put_i32(VOIP_COMMAND_DIAL);
        content.put_i32(dial);
        Message::new(
            VOIP_CONTROL,
            Body::VoipControl(VoipControl {
                sender: 10,
                receiver: 20,
                content: content.freeze(),
            }),
        )
    }

    /// 测试：转发给订阅者但不回发给来源链接
    #[tokio::test]
    async fn test_publish_skips_origin_link() {
        let svc = service(Arc::new(MemoryPushQueue::new()));
        let (a, mut rx_a) = link();
        let (b, mut rx_b) = link();
        svc.add_link(a.clone()).await;
        svc.add_link(b.clone()).await;
        svc.subscribe(a.id(), 1, Subscription::User { uid: 20 }).await;
        svc.subscribe(b.id(), 1, Subscription::User { uid: 20 }).await;

        let inner = Message::new(IM, Body::Im(ImMessage::default()));
        assert_eq!(svc.publish(a.id(), publish(20, inner)).await.unwrap(), 1);
        assert_eq!(rx_b.recv().await.unwrap().cmd, PUBLISH);
        assert!(rx_a.try_recv().is_err());
    }

    /// 测试：无订阅者的首次拨号写入 VOIP 推送队列，后续拨号不推送
    #[tokio::test]
    async fn test_voip_first_dial_pushes() {
        let push = Arc::new(MemoryPushQueue::new());
        let svc = service(push.clone());

        assert_eq!(svc.publish(99, publish(20, voip(1))).await.unwrap(), 0);
        let entries = push.drain();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].0, VOIP_PUSH_QUEUE);
        assert!(entries[0].1.contains("\"receiver\":20"));

        svc.publish(99, publish(20, voip(2))).await.unwrap();
        assert!(push.drain().is_empty());
    }

    #[tokio::test]
    async fn test_publish_rejects_non_app_body() {
        let svc = service(Arc::new(MemoryPushQueue::new()));
        let msg = Message::new(PUBLISH, Body::Empty);
        assert!(matches!(
            svc.publish(1, msg).await,
            Err(RouteError::InvalidPublish(PUBLISH))
        ));
    }
}

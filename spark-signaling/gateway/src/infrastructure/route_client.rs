//! 路由服务客户端
//!
//! 订阅发往全部路由服务器，发布任选一台。

use std::sync::Arc;

use rand::Rng;
use spark_im_core::protocol::command::{PUBLISH, PUBLISH_ROOM, SERVER_REGISTER};
use spark_im_core::protocol::{AppMessage, Body, CommandRegistry, Message};
use tracing::debug;

use crate::error::Result;
use crate::infrastructure::channel::{Channel, ChannelHandler, ChannelSubscription};

pub struct RouteClient {
    channels: Vec<Channel>,
}

impl RouteClient {
    /// 地址列表为空时所有操作都是空操作（单机部署）
    pub fn start(
        addrs: &[String],
        server_id: &str,
        registry: Arc<CommandRegistry>,
        handler: Arc<dyn ChannelHandler>,
    ) -> Self {
        let channels = addrs
            .iter()
            .map(|addr| {
                Channel::start(
                    addr.clone(),
                    SERVER_REGISTER,
                    server_id,
                    registry.clone(),
                    handler.clone(),
                )
            })
            .collect();
        Self { channels }
    }

    pub async fn subscribe_user(&self, appid: i64, uid: i64) -> Result<()> {
        self.subscribe_all(ChannelSubscription::User { appid, uid }).await
    }

    pub async fn unsubscribe_user(&self, appid: i64, uid: i64) -> Result<()> {
        self.unsubscribe_all(ChannelSubscription::User { appid, uid }).await
    }

    pub async fn subscribe_room(&self, appid: i64, room_id: i64) -> Result<()> {
        self.subscribe_all(ChannelSubscription::Room { appid, room_id }).await
    }

    pub async fn unsubscribe_room(&self, appid: i64, room_id: i64) -> Result<()> {
        self.unsubscribe_all(ChannelSubscription::Room { appid, room_id }).await
    }

    /// 转发给持有 `app.receiver` 连接的其它会话服务器
    pub async fn publish(&self, app: AppMessage) -> Result<()> {
        self.publish_with(PUBLISH, app).await
    }

    /// 转发给有 `app.receiver` 房间成员的其它会话服务器
    pub async fn publish_room(&self, app: AppMessage) -> Result<()> {
        self.publish_with(PUBLISH_ROOM, app).await
    }

    async fn publish_with(&self, cmd: u32, app: AppMessage) -> Result<()> {
        let Some(channel) = self.pick() else {
            debug!(cmd, "no route server configured, publish skipped");
            return Ok(());
        };
        channel.send(Message::new(cmd, Body::App(Box::new(app)))).await
    }

    fn pick(&self) -> Option<&Channel> {
        match self.channels.len() {
            0 => None,
            1 => self.channels.first(),
            n => self.channels.get(rand::thread_rng().gen_range(0..n)),
        }
    }

    async fn subscribe_all(&self, sub: ChannelSubscription) -> Result<()> {
        for channel in &self.channels {
            channel.subscribe(sub).await?;
        }
        Ok(())
    }

    async fn unsubscribe_all(&self, sub: ChannelSubscription) -> Result<()> {
        for channel in &self.channels {
            channel.unsubscribe(sub).await?;
        }
        Ok(())
    }
}

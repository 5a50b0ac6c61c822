//! 存储服务客户端
//!
//! 每个存储服务器一条通道，按 `key % N` 选择：点对点队列用接收者 uid，群日志用 gid。

use std::sync::Arc;
use std::time::Instant;

use spark_im_core::metrics::GatewayMetrics;
use spark_im_core::protocol::command::{
    DEQUEUE, DEQUEUE_GROUP, LOAD_GROUP_OFFLINE, LOAD_HISTORY, LOAD_OFFLINE, SAVE_AND_ENQUEUE,
    SAVE_AND_ENQUEUE_GROUP, SERVER_REGISTER_STORAGE, status,
};
use spark_im_core::protocol::{
    AppMessage, Body, CommandRegistry, Dequeue, DequeueGroup, LoadGroupOffline, LoadHistory,
    LoadOffline, Message, OfflineBatch, RpcResult,
};
use spark_im_core::shard_index;

use crate::error::{GatewayError, Result};
use crate::infrastructure::channel::{Channel, ChannelHandler, ChannelSubscription};

pub struct StorageClient {
    channels: Vec<Channel>,
    registry: Arc<CommandRegistry>,
    metrics: Arc<GatewayMetrics>,
}

impl StorageClient {
    pub fn start(
        addrs: &[String],
        server_id: &str,
        registry: Arc<CommandRegistry>,
        handler: Arc<dyn ChannelHandler>,
        metrics: Arc<GatewayMetrics>,
    ) -> Result<Self> {
        if addrs.is_empty() {
            return Err(GatewayError::NoEndpoint("storage"));
        }
        let channels = addrs
            .iter()
            .map(|addr| {
                Channel::start(
                    addr.clone(),
                    SERVER_REGISTER_STORAGE,
                    server_id,
                    registry.clone(),
                    handler.clone(),
                )
            })
            .collect();
        Ok(Self {
            channels,
            registry,
            metrics,
        })
    }

    fn channel(&self, key: i64) -> &Channel {
        &self.channels[shard_index(key, self.channels.len())]
    }

    pub async fn subscribe_user(&self, appid: i64, uid: i64) -> Result<()> {
        self.channel(uid)
            .subscribe(ChannelSubscription::User { appid, uid })
            .await
    }

    pub async fn unsubscribe_user(&self, appid: i64, uid: i64) -> Result<()> {
        self.channel(uid)
            .unsubscribe(ChannelSubscription::User { appid, uid })
            .await
    }

    pub async fn subscribe_group_member(&self, appid: i64, gid: i64, uid: i64) -> Result<()> {
        self.channel(gid)
            .subscribe(ChannelSubscription::GroupMember { appid, gid, uid })
            .await
    }

    pub async fn unsubscribe_group_member(&self, appid: i64, gid: i64, uid: i64) -> Result<()> {
        self.channel(gid)
            .unsubscribe(ChannelSubscription::GroupMember { appid, gid, uid })
            .await
    }

    /// 持久化到 `receiver` 的点对点队列，返回 msgid
    pub async fn save_peer(
        &self,
        appid: i64,
        receiver: i64,
        device_id: i64,
        msg: Message,
    ) -> Result<i64> {
        let app = AppMessage::new(appid, receiver, device_id, msg);
        let request = Message::new(SAVE_AND_ENQUEUE, Body::App(Box::new(app)));
        let result = self.call(receiver, request).await?;
        Ok(result.content_i64()?)
    }

    /// 持久化到超级群日志，返回 msgid
    pub async fn save_group(&self, appid: i64, gid: i64, device_id: i64, msg: Message) -> Result<i64> {
        let app = AppMessage::new(appid, gid, device_id, msg);
        let request = Message::new(SAVE_AND_ENQUEUE_GROUP, Body::App(Box::new(app)));
        let result = self.call(gid, request).await?;
        Ok(result.content_i64()?)
    }

    /// 推进点对点游标，返回推进后的值
    pub async fn dequeue(&self, appid: i64, uid: i64, device_id: i64, msgid: i64) -> Result<i64> {
        let request = Message::new(
            DEQUEUE,
            Body::Dequeue(Dequeue {
                appid,
                receiver: uid,
                device_id,
                msgid,
            }),
        );
        let result = self.call(uid, request).await?;
        Ok(result.content_i64()?)
    }

    pub async fn dequeue_group(
        &self,
        appid: i64,
        gid: i64,
        uid: i64,
        device_id: i64,
        msgid: i64,
    ) -> Result<i64> {
        let request = Message::new(
            DEQUEUE_GROUP,
            Body::DequeueGroup(DequeueGroup {
                appid,
                gid,
                uid,
                device_id,
                msgid,
            }),
        );
        let result = self.call(gid, request).await?;
        Ok(result.content_i64()?)
    }

    pub async fn load_offline(
        &self,
        appid: i64,
        uid: i64,
        device_id: i64,
        after_msgid: i64,
    ) -> Result<OfflineBatch> {
        let request = Message::new(
            LOAD_OFFLINE,
            Body::LoadOffline(LoadOffline {
                appid,
                uid,
                device_id,
                after_msgid,
            }),
        );
        let result = self.call(uid, request).await?;
        Ok(OfflineBatch::decode(&result.content, &self.registry)?)
    }

    pub async fn load_group_offline(
        &self,
        appid: i64,
        gid: i64,
        uid: i64,
        device_id: i64,
        after_msgid: i64,
    ) -> Result<OfflineBatch> {
        let request = Message::new(
            LOAD_GROUP_OFFLINE,
            Body::LoadGroupOffline(LoadGroupOffline {
                appid,
                gid,
                uid,
                device_id,
                after_msgid,
            }),
        );
        let result = self.call(gid, request).await?;
        Ok(OfflineBatch::decode(&result.content, &self.registry)?)
    }

    /// 最近 `limit` 条点对点消息，升序
    pub async fn load_history(&self, appid: i64, uid: i64, limit: u32) -> Result<OfflineBatch> {
        let request = Message::new(LOAD_HISTORY, Body::LoadHistory(LoadHistory { appid, uid, limit }));
        let result = self.call(uid, request).await?;
        Ok(OfflineBatch::decode(&result.content, &self.registry)?)
    }

    async fn call(&self, key: i64, request: Message) -> Result<RpcResult> {
        let started = Instant::now();
        let result = self.channel(key).request(request).await;
        self.metrics
            .storage_rpc_duration_seconds
            .observe(started.elapsed().as_secs_f64());
        let result = result?;
        if result.status != status::OK {
            return Err(GatewayError::StorageStatus(result.status));
        }
        Ok(result)
    }
}

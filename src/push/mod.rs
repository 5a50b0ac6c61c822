//! # 离线推送队列
//!
//! 接收方没有任何在线连接时，把通知写入推送队列，由外部推送服务（APNs 等）消费。
//! 队列内容是 JSON，Redis 实现使用 `RPUSH`。

use std::sync::Mutex;

use anyhow::{Context, Result};
use async_trait::async_trait;
use redis::aio::ConnectionManager;
use serde::Serialize;

/// 普通消息推送队列
pub const PUSH_QUEUE: &str = "push_queue";
/// VOIP 来电推送队列
pub const VOIP_PUSH_QUEUE: &str = "voip_push_queue";

/// 点对点 / 客服消息推送
#[derive(Debug, Clone, Serialize)]
pub struct PeerPushNotification {
    pub appid: i64,
    pub sender: i64,
    pub receiver: i64,
    pub content: String,
}

/// 群消息推送
#[derive(Debug, Clone, Serialize)]
pub struct GroupPushNotification {
    pub appid: i64,
    pub sender: i64,
    pub receivers: Vec<i64>,
    pub content: String,
    pub group_id: i64,
}

/// VOIP 首次拨号推送
#[derive(Debug, Clone, Serialize)]
pub struct VoipPushNotification {
    pub appid: i64,
    pub sender: i64,
    pub receiver: i64,
}

/// 推送队列
#[async_trait]
pub trait PushQueue: Send + Sync {
    async fn push(&self, queue: &str, payload: String) -> Result<()>;
}

/// 序列化并写入推送队列
pub async fn enqueue<T: Serialize + Sync>(
    push_queue: &dyn PushQueue,
    queue: &str,
    notification: &T,
) -> Result<()> {
    let payload =
        serde_json::to_string(notification).context("failed to serialize push notification")?;
    push_queue.push(queue, payload).await
}

/// 基于 Redis 列表的推送队列
pub struct RedisPushQueue {
    conn: ConnectionManager,
}

impl RedisPushQueue {
    pub fn new(conn: ConnectionManager) -> Self {
        Self { conn }
    }

    pub async fn connect(url: &str) -> Result<Self> {
        let client =
            redis::Client::open(url).with_context(|| format!("invalid redis url: {url}"))?;
        let conn = client
            .get_connection_manager()
            .await
            .context("failed to connect redis for push queue")?;
        Ok(Self::new(conn))
    }
}

#[async_trait]
impl PushQueue for RedisPushQueue {
    async fn push(&self, queue: &str, payload: String) -> Result<()> {
        let mut conn = self.conn.clone();
        let _: () = redis::cmd("RPUSH")
            .arg(queue)
            .arg(payload)
            .query_async(&mut conn)
            .await
            .with_context(|| format!("failed to rpush to {queue}"))?;
        Ok(())
    }
}

/// 未配置推送时使用，丢弃所有通知
#[derive(Debug, Default)]
pub struct NoopPushQueue;

#[async_trait]
impl PushQueue for NoopPushQueue {
    async fn push(&self, queue: &str, _payload: String) -> Result<()> {
        tracing::trace!(queue = %queue, "push queue disabled, notification dropped");
        Ok(())
    }
}

/// 内存推送队列，记录所有写入（测试与单机调试用）
#[derive(Debug, Default)]
pub struct MemoryPushQueue {
    entries: Mutex<Vec<(String, String)>>,
}

impl MemoryPushQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// 取出并清空已写入的 `(queue, payload)`
    pub fn drain(&self) -> Vec<(String, String)> {
        match self.entries.lock() {
            Ok(mut entries) => std::mem::take(&mut *entries),
            Err(poisoned) => std::mem::take(&mut *poisoned.into_inner()),
        }
    }
}

#[async_trait]
impl PushQueue for MemoryPushQueue {
    async fn push(&self, queue: &str, payload: String) -> Result<()> {
        let mut entries = self
            .entries
            .lock()
            .map_err(|_| anyhow::anyhow!("memory push queue poisoned"))?;
        entries.push((queue.to_string(), payload));
        Ok(())
    }
}

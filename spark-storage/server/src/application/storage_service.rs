//! 存储应用服务
//!
//! 把消息日志、游标、路由表与推送队列组合成存储 RPC 的具体操作。

use std::sync::Arc;
use std::time::Instant;

use spark_im_core::metrics::StorageMetrics;
use spark_im_core::protocol::command::{PUBLISH, PUBLISH_GROUP};
use spark_im_core::protocol::{
    AppMessage, Body, Dequeue, DequeueGroup, LoadGroupOffline, LoadHistory, LoadOffline, Message,
    OfflineBatch,
};
use spark_im_core::push::{self, PUSH_QUEUE, PushQueue};
use spark_im_core::routing::RouteTable;
use tracing::{debug, warn};

use super::shard::ShardPool;
use crate::domain::{
    BatchBuilder, CursorKey, CursorStore, LogKind, MessageLog, OfflinePush, check_record_size,
    is_self_echo, offline_push,
};
use crate::error::{Result, StorageError};

/// 超级群离线最多返回的条数
pub const GROUP_OFFLINE_LIMIT: usize = 100;
/// 历史消息最多返回的条数
pub const HISTORY_LIMIT: usize = 100;

#[derive(Clone)]
struct StorageDeps {
    log: Arc<dyn MessageLog>,
    cursors: Arc<dyn CursorStore>,
    routes: Arc<RouteTable>,
    push: Arc<dyn PushQueue>,
    metrics: Arc<StorageMetrics>,
}

pub struct StorageService {
    deps: StorageDeps,
    shards: ShardPool,
}

impl StorageService {
    pub fn new(
        log: Arc<dyn MessageLog>,
        cursors: Arc<dyn CursorStore>,
        routes: Arc<RouteTable>,
        push: Arc<dyn PushQueue>,
        metrics: Arc<StorageMetrics>,
        shard_count: usize,
    ) -> Self {
        Self {
            deps: StorageDeps {
                log,
                cursors,
                routes,
                push,
                metrics,
            },
            shards: ShardPool::new(shard_count),
        }
    }

    pub fn routes(&self) -> &Arc<RouteTable> {
        &self.deps.routes
    }

    /// 持久化一条点对点消息并发布给订阅了接收者的会话服务器
    pub async fn save_peer(&self, app: AppMessage) -> Result<i64> {
        let deps = self.deps.clone();
        self.shards
            .execute(app.receiver, async move { deps.append_and_publish(LogKind::Peer, app).await })
            .await?
    }

    /// 持久化一条超级群消息并发布给有该群成员在线的会话服务器
    pub async fn save_group(&self, app: AppMessage) -> Result<i64> {
        let deps = self.deps.clone();
        self.shards
            .execute(app.receiver, async move { deps.append_and_publish(LogKind::Group, app).await })
            .await?
    }

    /// 推进点对点游标
    pub async fn dequeue(&self, req: Dequeue) -> Result<i64> {
        let key = CursorKey::Peer {
            appid: req.appid,
            uid: req.receiver,
            device_id: req.device_id,
        };
        self.advance(LogKind::Peer, req.appid, req.receiver, key, req.msgid)
            .await
    }

    /// 推进超级群成员游标
    pub async fn dequeue_group(&self, req: DequeueGroup) -> Result<i64> {
        let key = CursorKey::Group {
            appid: req.appid,
            gid: req.gid,
            uid: req.uid,
            device_id: req.device_id,
        };
        self.advance(LogKind::Group, req.appid, req.gid, key, req.msgid)
            .await
    }

    /// 游标之后的点对点离线消息，跳过本设备自己发出的记录
    pub async fn load_offline(&self, req: LoadOffline) -> Result<OfflineBatch> {
        let key = CursorKey::Peer {
            appid: req.appid,
            uid: req.uid,
            device_id: req.device_id,
        };
        let cursor = self.deps.load_cursor(&key).await?;
        let ids = self
            .deps
            .log
            .msgids_after(LogKind::Peer, req.appid, req.uid, cursor.max(req.after_msgid))
            .await;
        self.assemble(ids, |record| is_self_echo(record, req.uid, req.device_id))
            .await
    }

    /// 超级群离线消息：游标之后最新的 100 条，升序
    pub async fn load_group_offline(&self, req: LoadGroupOffline) -> Result<OfflineBatch> {
        let key = CursorKey::Group {
            appid: req.appid,
            gid: req.gid,
            uid: req.uid,
            device_id: req.device_id,
        };
        let cursor = self.deps.load_cursor(&key).await?;
        let ids = self
            .deps
            .log
            .msgids_after(LogKind::Group, req.appid, req.gid, cursor)
            .await;
        let start = ids.len().saturating_sub(GROUP_OFFLINE_LIMIT);
        let ids: Vec<i64> = ids[start..]
            .iter()
            .copied()
            .filter(|msgid| *msgid > req.after_msgid)
            .collect();
        self.assemble(ids, |record| is_self_echo(record, req.uid, req.device_id))
            .await
    }

    /// 用户点对点队列中最新的 `limit` 条记录，升序，不受游标影响
    pub async fn load_history(&self, req: LoadHistory) -> Result<OfflineBatch> {
        let limit = (req.limit as usize).min(HISTORY_LIMIT);
        let ids = self
            .deps
            .log
            .msgids_after(LogKind::Peer, req.appid, req.uid, 0)
            .await;
        let start = ids.len().saturating_sub(limit);

        // 从最新的一条往前装，装不下时保留较新的部分
        let mut builder = BatchBuilder::default();
        for msgid in ids[start..].iter().rev() {
            let record = self.deps.log.read(*msgid).await?;
            if !builder.push(record)? {
                break;
            }
        }
        let mut batch = builder.finish(false);
        batch.messages.reverse();
        self.deps
            .metrics
            .offline_loaded_total
            .inc_by(batch.messages.len() as u64);
        Ok(batch)
    }

    pub async fn flush_cursors(&self) -> Result<()> {
        self.deps
            .cursors
            .flush()
            .await
            .map_err(StorageError::Cursor)
    }

    async fn advance(
        &self,
        kind: LogKind,
        appid: i64,
        queue: i64,
        key: CursorKey,
        msgid: i64,
    ) -> Result<i64> {
        let deps = self.deps.clone();
        self.shards
            .execute(key.shard_key(), async move {
                let last = deps.log.last_msgid(kind, appid, queue).await;
                let target = msgid.min(last);
                if target <= 0 {
                    return deps.load_cursor(&key).await;
                }
                if target < msgid {
                    warn!(msgid, last, queue, "ack beyond last written record clamped");
                }
                deps.cursors
                    .advance(&key, target)
                    .await
                    .map_err(StorageError::Cursor)
            })
            .await?
    }

    async fn assemble<F>(&self, ids: Vec<i64>, skip: F) -> Result<OfflineBatch>
    where
        F: Fn(&AppMessage) -> bool,
    {
        let mut builder = BatchBuilder::default();
        let mut more = false;
        for msgid in ids {
            let record = self.deps.log.read(msgid).await?;
            if skip(&record) {
                builder.skip(msgid);
                continue;
            }
            if !builder.push(record)? {
                more = true;
                break;
            }
        }
        let batch = builder.finish(more);
        self.deps
            .metrics
            .offline_loaded_total
            .inc_by(batch.messages.len() as u64);
        Ok(batch)
    }
}

impl StorageDeps {
    async fn load_cursor(&self, key: &CursorKey) -> Result<i64> {
        self.cursors.load(key).await.map_err(StorageError::Cursor)
    }

    async fn append_and_publish(&self, kind: LogKind, mut app: AppMessage) -> Result<i64> {
        check_record_size(&app)?;
        let started = Instant::now();
        let msgid = self.log.append(kind, &app).await?;
        self.metrics
            .append_duration_seconds
            .observe(started.elapsed().as_secs_f64());
        self.metrics
            .messages_appended_total
            .with_label_values(&[kind.label()])
            .inc();
        app.msgid = msgid;

        let (cmd, links) = match kind {
            LogKind::Peer => (PUBLISH, self.routes.user_links(app.appid, app.receiver).await),
            LogKind::Group => (
                PUBLISH_GROUP,
                self.routes.group_links(app.appid, app.receiver).await,
            ),
        };

        if links.is_empty() {
            if kind == LogKind::Peer {
                self.push_offline(&app).await;
            }
            return Ok(msgid);
        }

        let publish = Message::new(cmd, Body::App(Box::new(app)));
        for link in links {
            if !link.send(publish.clone()).await {
                debug!(link_id = link.id(), msgid, "link closed before publish");
            }
        }
        Ok(msgid)
    }

    async fn push_offline(&self, app: &AppMessage) {
        let result = match offline_push(app) {
            Some(OfflinePush::Peer(notification)) => {
                push::enqueue(self.push.as_ref(), PUSH_QUEUE, &notification).await
            }
            Some(OfflinePush::Group(notification)) => {
                push::enqueue(self.push.as_ref(), PUSH_QUEUE, &notification).await
            }
            None => return,
        };
        match result {
            Ok(()) => self.metrics.push_enqueued_total.inc(),
            Err(err) => warn!(?err, appid = app.appid, receiver = app.receiver, "failed to enqueue push"),
        }
    }
}

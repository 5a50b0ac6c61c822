//! 分片 worker
//!
//! 同一队列（uid 或 gid）的追加、发布与游标推进都落到同一个 worker 上顺序执行。

use std::future::Future;
use std::pin::Pin;

use spark_im_core::utils::shard_index;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::debug;

use crate::error::{Result, StorageError};

type Job = Pin<Box<dyn Future<Output = ()> + Send>>;

const SHARD_QUEUE_DEPTH: usize = 1024;

pub struct ShardPool {
    senders: Vec<mpsc::Sender<Job>>,
    workers: Vec<JoinHandle<()>>,
}

impl ShardPool {
    pub fn new(count: usize) -> Self {
        let count = count.max(1);
        let mut senders = Vec::with_capacity(count);
        let mut workers = Vec::with_capacity(count);
        for shard in 0..count {
            let (tx, mut rx) = mpsc::channel::<Job>(SHARD_QUEUE_DEPTH);
            senders.push(tx);
            workers.push(tokio::spawn(async move {
                while let Some(job) = rx.recv().await {
                    job.await;
                }
                debug!(shard, "shard worker stopped");
            }));
        }
        Self { senders, workers }
    }

    pub fn len(&self) -> usize {
        self.senders.len()
    }

    pub fn is_empty(&self) -> bool {
        self.senders.is_empty()
    }

    /// 在 `key` 所属的 worker 上执行任务并等待结果
    pub async fn execute<T, F>(&self, key: i64, task: F) -> Result<T>
    where
        T: Send + 'static,
        F: Future<Output = T> + Send + 'static,
    {
        let shard = shard_index(key, self.senders.len());
        let (tx, rx) = oneshot::channel();
        let job: Job = Box::pin(async move {
            let _ = tx.send(task.await);
        });
        self.senders[shard]
            .send(job)
            .await
            .map_err(|_| StorageError::ShardClosed(shard))?;
        rx.await.map_err(|_| StorageError::ShardClosed(shard))
    }
}

impl Drop for ShardPool {
    fn drop(&mut self) {
        for worker in &self.workers {
            worker.abort();
        }
    }
}

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use async_trait::async_trait;
use tokio::sync::Mutex;
use tracing::{debug, info};

use crate::domain::model::CursorKey;
use crate::domain::repository::CursorStore;

const SNAPSHOT_FILE: &str = "received.json";

#[derive(Debug, Default)]
struct CursorState {
    cursors: HashMap<String, i64>,
    dirty: bool,
}

/// 以 JSON 快照保存游标，周期性整体落盘
///
/// 写入先落到临时文件再原子替换，崩溃后最多回退到上一次快照，
/// 回退只会造成重复投递。
pub struct FileCursorStore {
    path: PathBuf,
    state: Mutex<CursorState>,
    flush_lock: Mutex<()>,
}

impl FileCursorStore {
    pub async fn open(root: &Path) -> Result<Self> {
        tokio::fs::create_dir_all(root)
            .await
            .with_context(|| format!("failed to create {}", root.display()))?;
        let path = root.join(SNAPSHOT_FILE);

        let cursors = match tokio::fs::read(&path).await {
            Ok(raw) => serde_json::from_slice::<HashMap<String, i64>>(&raw)
                .with_context(|| format!("invalid cursor snapshot {}", path.display()))?,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => HashMap::new(),
            Err(err) => {
                return Err(err).with_context(|| format!("failed to read {}", path.display()));
            }
        };
        info!(path = %path.display(), count = cursors.len(), "cursor snapshot loaded");

        Ok(Self {
            path,
            state: Mutex::new(CursorState {
                cursors,
                dirty: false,
            }),
            flush_lock: Mutex::new(()),
        })
    }
}

#[async_trait]
impl CursorStore for FileCursorStore {
    async fn load(&self, key: &CursorKey) -> Result<i64> {
        let state = self.state.lock().await;
        Ok(state.cursors.get(&key.storage_key()).copied().unwrap_or(0))
    }

    async fn advance(&self, key: &CursorKey, msgid: i64) -> Result<i64> {
        let mut state = self.state.lock().await;
        let entry = state.cursors.entry(key.storage_key()).or_insert(0);
        if msgid > *entry {
            *entry = msgid;
            let value = *entry;
            state.dirty = true;
            return Ok(value);
        }
        Ok(*entry)
    }

    async fn flush(&self) -> Result<()> {
        let _guard = self.flush_lock.lock().await;
        let snapshot = {
            let mut state = self.state.lock().await;
            if !state.dirty {
                return Ok(());
            }
            state.dirty = false;
            state.cursors.clone()
        };

        let write = async {
            let raw = serde_json::to_vec(&snapshot)?;
            let tmp = self.path.with_extension("json.tmp");
            tokio::fs::write(&tmp, raw).await?;
            tokio::fs::rename(&tmp, &self.path).await?;
            anyhow::Ok(())
        };
        if let Err(err) = write.await {
            self.state.lock().await.dirty = true;
            return Err(err).with_context(|| format!("failed to write {}", self.path.display()));
        }
        debug!(count = snapshot.len(), "cursor snapshot flushed");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key(uid: i64) -> CursorKey {
        CursorKey::Peer {
            appid: 1,
            uid,
            device_id: 7,
        }
    }

    /// 测试：推进具有 max 语义，重复或回退的推进不生效
    #[tokio::test]
    async fn test_advance_is_monotonic() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileCursorStore::open(dir.path()).await.unwrap();

        assert_eq!(store.advance(&key(1), 100).await.unwrap(), 100);
        assert_eq!(store.advance(&key(1), 100).await.unwrap(), 100);
        assert_eq!(store.advance(&key(1), 50).await.unwrap(), 100);
        assert_eq!(store.load(&key(1)).await.unwrap(), 100);
        assert_eq!(store.load(&key(2)).await.unwrap(), 0);
    }

    /// 测试：快照落盘后重新打开可以恢复
    #[tokio::test]
    async fn test_flush_and_reload() {
        let dir = tempfile::tempdir().unwrap();
        {
            let store = FileCursorStore::open(dir.path()).await.unwrap();
            store.advance(&key(1), 64).await.unwrap();
            store.flush().await.unwrap();
        }
        let store = FileCursorStore::open(dir.path()).await.unwrap();
        assert_eq!(store.load(&key(1)).await.unwrap(), 64);
        assert!(!dir.path().join("received.json.tmp").exists());
    }

    /// 测试：未落盘的推进在重启后丢失，只会导致重复投递
    #[tokio::test]
    async fn test_unflushed_advance_is_lost() {
        let dir = tempfile::tempdir().unwrap();
        {
            let store = FileCursorStore::open(dir.path()).await.unwrap();
            store.advance(&key(1), 10).await.unwrap();
            store.flush().await.unwrap();
            store.advance(&key(1), 20).await.unwrap();
        }
        let store = FileCursorStore::open(dir.path()).await.unwrap();
        assert_eq!(store.load(&key(1)).await.unwrap(), 10);
    }
}

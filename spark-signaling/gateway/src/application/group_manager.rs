//! # 群组缓存
//!
//! `gid → Arc<Group>` 快照表。成员变更整体替换 `Arc<Group>`，读者永远看到完整的成员集合。
//! 所有写操作由 `writer` 串行化，容量检查与修改在同一个临界区内完成。

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::{Mutex, RwLock};
use tracing::info;

use crate::domain::{GROUP_CAPACITY, Group, RelationStore};
use crate::error::{GatewayError, Result};

pub struct GroupManager {
    relations: Arc<dyn RelationStore>,
    groups: RwLock<HashMap<i64, Arc<Group>>>,
    writer: Mutex<()>,
}

impl GroupManager {
    pub fn new(relations: Arc<dyn RelationStore>) -> Self {
        Self {
            relations,
            groups: RwLock::new(HashMap::new()),
            writer: Mutex::new(()),
        }
    }

    pub async fn find_group(&self, gid: i64) -> Option<Arc<Group>> {
        self.groups.read().await.get(&gid).cloned()
    }

    /// 按应用隔离的查找，其他应用的群视为不存在
    pub async fn find_app_group(&self, appid: i64, gid: i64) -> Option<Arc<Group>> {
        self.find_group(gid)
            .await
            .filter(|group| group.appid == appid)
    }

    /// 用户所在的全部群
    pub async fn find_user_groups(&self, appid: i64, uid: i64) -> Vec<Arc<Group>> {
        self.groups
            .read()
            .await
            .values()
            .filter(|group| group.appid == appid && group.is_member(uid))
            .cloned()
            .collect()
    }

    pub async fn group_count(&self) -> usize {
        self.groups.read().await.len()
    }

    /// 落库并加入缓存
    pub async fn create_group(&self, group: Group) -> Result<Arc<Group>> {
        if group.member_count() > GROUP_CAPACITY {
            return Err(GatewayError::GroupFull {
                gid: group.gid,
                members: group.member_count(),
            });
        }
        let _guard = self.writer.lock().await;
        self.relations.create_group(&group).await?;
        let group = Arc::new(group);
        self.groups.write().await.insert(group.gid, group.clone());
        info!(gid = group.gid, members = group.member_count(), "group created");
        Ok(group)
    }

    pub async fn remove_group(&self, gid: i64) -> Result<bool> {
        let _guard = self.writer.lock().await;
        if !self.groups.read().await.contains_key(&gid) {
            return Ok(false);
        }
        self.relations.delete_group(gid).await?;
        self.groups.write().await.remove(&gid);
        info!(gid, "group removed");
        Ok(true)
    }

    /// 加入单个成员；已是成员返回 false
    pub async fn add_member(&self, gid: i64, uid: i64) -> Result<bool> {
        Ok(!self.add_members(gid, &[uid]).await?.is_empty())
    }

    /// 批量加入成员，返回实际新增的成员
    ///
    /// 新增后超过容量时整批拒绝，不做任何修改。
    pub async fn add_members(&self, gid: i64, uids: &[i64]) -> Result<Vec<i64>> {
        let _guard = self.writer.lock().await;
        let mut group = self
            .find_group(gid)
            .await
            .ok_or(GatewayError::GroupNotFound(gid))?;

        let mut fresh: Vec<i64> = Vec::new();
        for uid in uids {
            if !group.is_member(*uid) && !fresh.contains(uid) {
                fresh.push(*uid);
            }
        }
        if group.member_count() + fresh.len() > GROUP_CAPACITY {
            return Err(GatewayError::GroupFull {
                gid,
                members: group.member_count(),
            });
        }

        let mut added = Vec::with_capacity(fresh.len());
        let mut failure = None;
        for uid in fresh {
            if let Err(err) = self.relations.add_group_member(gid, uid).await {
                failure = Some(err);
                break;
            }
            group = Arc::new(group.with_member(uid));
            added.push(uid);
        }
        if !added.is_empty() {
            self.groups.write().await.insert(gid, group);
        }
        match failure {
            Some(err) => Err(err.into()),
            None => Ok(added),
        }
    }

    /// 移除成员；本来就不是成员返回 false
    pub async fn remove_member(&self, gid: i64, uid: i64) -> Result<bool> {
        let _guard = self.writer.lock().await;
        let group = self
            .find_group(gid)
            .await
            .ok_or(GatewayError::GroupNotFound(gid))?;
        if !group.is_member(uid) {
            return Ok(false);
        }
        self.relations.remove_group_member(gid, uid).await?;
        self.groups
            .write()
            .await
            .insert(gid, Arc::new(group.without_member(uid)));
        Ok(true)
    }

    /// 从关系库全量重载
    pub async fn reload(&self) -> Result<usize> {
        let _guard = self.writer.lock().await;
        let loaded = self.relations.load_groups().await?;
        let count = loaded.len();
        let groups = loaded
            .into_iter()
            .map(|group| (group.gid, Arc::new(group)))
            .collect();
        *self.groups.write().await = groups;
        info!(groups = count, "groups reloaded");
        Ok(count)
    }
}

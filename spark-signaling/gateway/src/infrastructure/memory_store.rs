//! 进程内协作者实现
//!
//! 单机部署与测试使用，重启后数据丢失。

use std::collections::{BTreeSet, HashMap, HashSet};
use std::sync::Arc;
use std::sync::atomic::{AtomicI64, Ordering};

use anyhow::{Result, anyhow};
use async_trait::async_trait;
use tokio::sync::{Mutex, RwLock};

use crate::domain::{
    DeviceRegistry, Group, LoginPointRecord, LoginPointStore, RelationStore, TokenStore,
};

#[derive(Default)]
pub struct MemoryTokenStore {
    tokens: RwLock<HashMap<String, (i64, i64)>>,
}

impl MemoryTokenStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn insert(&self, token: impl Into<String>, appid: i64, uid: i64) {
        self.tokens.write().await.insert(token.into(), (appid, uid));
    }
}

#[async_trait]
impl TokenStore for MemoryTokenStore {
    async fn load(&self, token: &str) -> Result<(i64, i64)> {
        self.tokens
            .read()
            .await
            .get(token)
            .copied()
            .ok_or_else(|| anyhow!("access token not found"))
    }
}

#[derive(Default)]
pub struct MemoryDeviceRegistry {
    devices: Mutex<HashMap<(String, u8), i64>>,
    next_id: AtomicI64,
}

impl MemoryDeviceRegistry {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl DeviceRegistry for MemoryDeviceRegistry {
    async fn device_id(&self, device: &str, platform: u8) -> Result<i64> {
        let mut devices = self.devices.lock().await;
        let id = devices
            .entry((device.to_string(), platform))
            .or_insert_with(|| self.next_id.fetch_add(1, Ordering::Relaxed) + 1);
        Ok(*id)
    }
}

#[derive(Default)]
pub struct MemoryLoginPointStore {
    points: Mutex<HashMap<(i64, i64, u8), LoginPointRecord>>,
    unread: Mutex<HashMap<(i64, i64), i32>>,
}

impl MemoryLoginPointStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// 当前所有登录点
    pub async fn points(&self) -> Vec<LoginPointRecord> {
        self.points.lock().await.values().cloned().collect()
    }

    pub async fn unread_count(&self, appid: i64, uid: i64) -> Option<i32> {
        self.unread.lock().await.get(&(appid, uid)).copied()
    }
}

#[async_trait]
impl LoginPointStore for MemoryLoginPointStore {
    async fn add(&self, point: &LoginPointRecord) -> Result<()> {
        self.points
            .lock()
            .await
            .insert((point.appid, point.uid, point.platform), point.clone());
        Ok(())
    }

    async fn remove(&self, point: &LoginPointRecord) -> Result<()> {
        self.points
            .lock()
            .await
            .remove(&(point.appid, point.uid, point.platform));
        Ok(())
    }

    async fn set_unread_count(&self, appid: i64, uid: i64, count: i32) -> Result<()> {
        self.unread.lock().await.insert((appid, uid), count);
        Ok(())
    }
}

#[derive(Default)]
struct RelationState {
    users: HashSet<i64>,
    friends: BTreeSet<(i64, i64)>,
    blacks: BTreeSet<(i64, i64)>,
    groups: HashMap<i64, Group>,
}

/// 进程内关系存储
#[derive(Default)]
pub struct MemoryRelationStore {
    state: Mutex<RelationState>,
}

impl MemoryRelationStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// 登记一个存在的用户
    pub async fn add_user(&self, uid: i64) {
        self.state.lock().await.users.insert(uid);
    }
}

#[async_trait]
impl RelationStore for MemoryRelationStore {
    async fn user_exists(&self, uid: i64) -> Result<bool> {
        Ok(self.state.lock().await.users.contains(&uid))
    }

    async fn load_friendships(&self) -> Result<Vec<(i64, i64)>> {
        Ok(self.state.lock().await.friends.iter().copied().collect())
    }

    async fn add_friend(&self, uid: i64, friend: i64) -> Result<()> {
        let mut state = self.state.lock().await;
        state.friends.insert((uid, friend));
        state.friends.insert((friend, uid));
        Ok(())
    }

    async fn remove_friend(&self, uid: i64, friend: i64) -> Result<()> {
        let mut state = self.state.lock().await;
        state.friends.remove(&(uid, friend));
        state.friends.remove(&(friend, uid));
        Ok(())
    }

    async fn load_blacklist(&self) -> Result<Vec<(i64, i64)>> {
        Ok(self.state.lock().await.blacks.iter().copied().collect())
    }

    async fn add_black(&self, owner: i64, target: i64) -> Result<()> {
        self.state.lock().await.blacks.insert((owner, target));
        Ok(())
    }

    async fn remove_black(&self, owner: i64, target: i64) -> Result<()> {
        self.state.lock().await.blacks.remove(&(owner, target));
        Ok(())
    }

    async fn load_groups(&self) -> Result<Vec<Group>> {
        Ok(self.state.lock().await.groups.values().cloned().collect())
    }

    async fn create_group(&self, group: &Group) -> Result<()> {
        let mut state = self.state.lock().await;
        if state.groups.contains_key(&group.gid) {
            return Err(anyhow!("group {} already exists", group.gid));
        }
        state.groups.insert(group.gid, group.clone());
        Ok(())
    }

    async fn delete_group(&self, gid: i64) -> Result<()> {
        self.state.lock().await.groups.remove(&gid);
        Ok(())
    }

    async fn add_group_member(&self, gid: i64, uid: i64) -> Result<()> {
        let mut state = self.state.lock().await;
        let group = state
            .groups
            .get_mut(&gid)
            .ok_or_else(|| anyhow!("group {gid} not found"))?;
        *group = group.with_member(uid);
        Ok(())
    }

    async fn remove_group_member(&self, gid: i64, uid: i64) -> Result<()> {
        let mut state = self.state.lock().await;
        let group = state
            .groups
            .get_mut(&gid)
            .ok_or_else(|| anyhow!("group {gid} not found"))?;
        *group = group.without_member(uid);
        Ok(())
    }
}

/// 以共享指针形式返回全部进程内协作者，供单机装配与测试
pub struct MemoryCollaborators {
    pub tokens: Arc<MemoryTokenStore>,
    pub devices: Arc<MemoryDeviceRegistry>,
    pub login_points: Arc<MemoryLoginPointStore>,
    pub relations: Arc<MemoryRelationStore>,
}

impl MemoryCollaborators {
    pub fn new() -> Self {
        Self {
            tokens: Arc::new(MemoryTokenStore::new()),
            devices: Arc::new(MemoryDeviceRegistry::new()),
            login_points: Arc::new(MemoryLoginPointStore::new()),
            relations: Arc::new(MemoryRelationStore::new()),
        }
    }
}

impl Default for MemoryCollaborators {
    fn default() -> Self {
        Self::new()
    }
}

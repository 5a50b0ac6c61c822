//! 好友与黑名单缓存
//!
//! 写操作先落关系库再改缓存；缓存按固定间隔从关系库全量重载以消除漂移。

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use anyhow::Result;
use tokio::sync::RwLock;
use tracing::info;

use crate::domain::RelationStore;

type RelationMap = HashMap<i64, HashSet<i64>>;

pub struct UserManager {
    relations: Arc<dyn RelationStore>,
    friends: RwLock<RelationMap>,
    blacks: RwLock<RelationMap>,
}

impl UserManager {
    pub fn new(relations: Arc<dyn RelationStore>) -> Self {
        Self {
            relations,
            friends: RwLock::new(HashMap::new()),
            blacks: RwLock::new(HashMap::new()),
        }
    }

    pub fn relations(&self) -> &Arc<dyn RelationStore> {
        &self.relations
    }

    pub async fn is_friend(&self, uid: i64, other: i64) -> bool {
        contains(&*self.friends.read().await, uid, other)
    }

    /// `owner` 是否把 `target` 拉黑
    pub async fn is_black(&self, owner: i64, target: i64) -> bool {
        contains(&*self.blacks.read().await, owner, target)
    }

    pub async fn add_friend(&self, uid: i64, friend: i64) -> Result<()> {
        self.relations.add_friend(uid, friend).await?;
        let mut friends = self.friends.write().await;
        friends.entry(uid).or_default().insert(friend);
        friends.entry(friend).or_default().insert(uid);
        Ok(())
    }

    pub async fn remove_friend(&self, uid: i64, friend: i64) -> Result<()> {
        self.relations.remove_friend(uid, friend).await?;
        let mut friends = self.friends.write().await;
        remove(&mut friends, uid, friend);
        remove(&mut friends, friend, uid);
        Ok(())
    }

    pub async fn add_black(&self, owner: i64, target: i64) -> Result<()> {
        self.relations.add_black(owner, target).await?;
        self.blacks.write().await.entry(owner).or_default().insert(target);
        Ok(())
    }

    pub async fn remove_black(&self, owner: i64, target: i64) -> Result<()> {
        self.relations.remove_black(owner, target).await?;
        remove(&mut *self.blacks.write().await, owner, target);
        Ok(())
    }

    /// 从关系库全量重载
    pub async fn reload(&self) -> Result<()> {
        let friendships = self.relations.load_friendships().await?;
        let blacklist = self.relations.load_blacklist().await?;
        let friend_count = friendships.len();
        let black_count = blacklist.len();

        *self.friends.write().await = index(friendships);
        *self.blacks.write().await = index(blacklist);
        info!(friendships = friend_count, blacklist = black_count, "user relations reloaded");
        Ok(())
    }
}

fn contains(map: &RelationMap, key: i64, value: i64) -> bool {
    map.get(&key).is_some_and(|set| set.contains(&value))
}

fn remove(map: &mut RelationMap, key: i64, value: i64) {
    if let Some(set) = map.get_mut(&key) {
        set.remove(&value);
        if set.is_empty() {
            map.remove(&key);
        }
    }
}

fn index(pairs: Vec<(i64, i64)>) -> RelationMap {
    let mut map = RelationMap::new();
    for (key, value) in pairs {
        map.entry(key).or_default().insert(value);
    }
    map
}

//! # 本地在线目录
//!
//! `(appid, uid)` 与 `(appid, room_id)` 到本机客户端集合的映射。
//! 集合写时复制，查询返回不可变快照，投递时不持有锁。

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::RwLock;

use super::client::ClientHandle;

pub type ClientSet = Arc<Vec<Arc<ClientHandle>>>;

#[derive(Default)]
pub struct Presence {
    users: RwLock<HashMap<(i64, i64), ClientSet>>,
    rooms: RwLock<HashMap<(i64, i64), ClientSet>>,
}

impl Presence {
    pub fn new() -> Self {
        Self::default()
    }

    /// 登记客户端，返回该用户此前是否没有本机连接
    pub async fn add_client(&self, client: &Arc<ClientHandle>) -> bool {
        let mut users = self.users.write().await;
        insert_into(&mut users, (client.appid, client.uid), client)
    }

    /// 注销客户端，返回该用户是否已没有本机连接
    pub async fn remove_client(&self, client: &ClientHandle) -> bool {
        let mut users = self.users.write().await;
        remove_from(&mut users, (client.appid, client.uid), client)
    }

    pub async fn find_clients(&self, appid: i64, uid: i64) -> ClientSet {
        self.users
            .read()
            .await
            .get(&(appid, uid))
            .cloned()
            .unwrap_or_default()
    }

    pub async fn is_online(&self, appid: i64, uid: i64) -> bool {
        self.users.read().await.contains_key(&(appid, uid))
    }

    /// 本机在线用户数
    pub async fn user_count(&self) -> usize {
        self.users.read().await.len()
    }

    pub async fn enter_room(&self, room_id: i64, client: &Arc<ClientHandle>) -> bool {
        let mut rooms = self.rooms.write().await;
        insert_into(&mut rooms, (client.appid, room_id), client)
    }

    pub async fn leave_room(&self, room_id: i64, client: &ClientHandle) -> bool {
        let mut rooms = self.rooms.write().await;
        remove_from(&mut rooms, (client.appid, room_id), client)
    }

    pub async fn room_clients(&self, appid: i64, room_id: i64) -> ClientSet {
        self.rooms
            .read()
            .await
            .get(&(appid, room_id))
            .cloned()
            .unwrap_or_default()
    }
}

fn insert_into(
    map: &mut HashMap<(i64, i64), ClientSet>,
    key: (i64, i64),
    client: &Arc<ClientHandle>,
) -> bool {
    let current = map.get(&key).cloned().unwrap_or_default();
    if current.iter().any(|c| c.id() == client.id()) {
        return false;
    }
    let first = current.is_empty();
    let mut next = Vec::with_capacity(current.len() + 1);
    next.extend(current.iter().cloned());
    next.push(client.clone());
    map.insert(key, Arc::new(next));
    first
}

fn remove_from(
    map: &mut HashMap<(i64, i64), ClientSet>,
    key: (i64, i64),
    client: &ClientHandle,
) -> bool {
    let Some(current) = map.get(&key) else {
        return false;
    };
    let next: Vec<_> = current
        .iter()
        .filter(|c| c.id() != client.id())
        .cloned()
        .collect();
    if next.is_empty() {
        map.remove(&key);
        true
    } else {
        map.insert(key, Arc::new(next));
        false
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::application::client::SessionShared;
    use tokio::sync::mpsc;

    fn client(appid: i64, uid: i64) -> Arc<ClientHandle> {
        let (wt, _) = mpsc::channel(1);
        let (ewt, _) = mpsc::channel(1);
        Arc::new(ClientHandle::new(
            appid,
            uid,
            0,
            3,
            String::new(),
            Arc::new(SessionShared::new()),
            wt,
            ewt,
        ))
    }

    /// 测试：同一用户多连接，最后一个离开时用户下线
    #[tokio::test]
    async fn test_multi_device_presence() {
        let presence = Presence::new();
        let a = client(1, 100);
        let b = client(1, 100);

        assert!(presence.add_client(&a).await);
        assert!(!presence.add_client(&b).await);
        assert!(!presence.add_client(&a).await);
        assert_eq!(presence.find_clients(1, 100).await.len(), 2);
        assert!(!presence.is_online(2, 100).await);

        assert!(!presence.remove_client(&a).await);
        assert!(presence.is_online(1, 100).await);
        assert!(presence.remove_client(&b).await);
        assert!(!presence.is_online(1, 100).await);
        assert_eq!(presence.user_count().await, 0);
    }

    /// 测试：快照在后续修改后保持不变
    #[tokio::test]
    async fn test_snapshot_is_stable() {
        let presence = Presence::new();
        let a = client(1, 100);
        presence.enter_room(9, &a).await;
        let snapshot = presence.room_clients(1, 9).await;

        presence.enter_room(9, &client(1, 200)).await;
        presence.leave_room(9, &a).await;

        assert_eq!(snapshot.len(), 1);
        assert_eq!(snapshot[0].uid, 100);
        let current = presence.room_clients(1, 9).await;
        assert_eq!(current.len(), 1);
        assert_eq!(current[0].uid, 200);
    }
}

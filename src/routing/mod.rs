//! # 路由表
//!
//! 记录每条服务器链接订阅了哪些用户、房间与群成员。同一条链接的重复订阅只记一次，
//! 引用计数由网关侧维护，服务端只保存集合。

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use tokio::sync::RwLock;

use crate::link::{LinkId, ServerLink};

#[derive(Debug, Default)]
struct AppRoutes {
    uids: HashSet<i64>,
    rooms: HashSet<i64>,
    group_members: HashMap<i64, HashSet<i64>>,
}

impl AppRoutes {
    fn is_empty(&self) -> bool {
        self.uids.is_empty() && self.rooms.is_empty() && self.group_members.is_empty()
    }
}

#[derive(Debug)]
struct LinkRoutes {
    link: Arc<ServerLink>,
    apps: HashMap<i64, AppRoutes>,
}

/// 订阅类型
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Subscription {
    User { uid: i64 },
    Room { room_id: i64 },
    GroupMember { gid: i64, uid: i64 },
}

/// 按链接划分的订阅表
#[derive(Debug, Default)]
pub struct RouteTable {
    links: RwLock<HashMap<LinkId, LinkRoutes>>,
}

impl RouteTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn add_link(&self, link: Arc<ServerLink>) {
        let mut links = self.links.write().await;
        links.entry(link.id()).or_insert_with(|| LinkRoutes {
            link,
            apps: HashMap::new(),
        });
    }

    /// 移除链接及其全部订阅
    pub async fn remove_link(&self, link_id: LinkId) -> bool {
        self.links.write().await.remove(&link_id).is_some()
    }

    pub async fn link_count(&self) -> usize {
        self.links.read().await.len()
    }

    /// 添加订阅，返回是否为新增
    pub async fn subscribe(&self, link_id: LinkId, appid: i64, sub: Subscription) -> bool {
        let mut links = self.links.write().await;
        let Some(routes) = links.get_mut(&link_id) else {
            return false;
        };
        let app = routes.apps.entry(appid).or_default();
        match sub {
            Subscription::User { uid } => app.uids.insert(uid),
            Subscription::Room { room_id } => app.rooms.insert(room_id),
            Subscription::GroupMember { gid, uid } => {
                app.group_members.entry(gid).or_default().insert(uid)
            }
        }
    }

    /// 移除订阅，返回是否确实存在
    pub async fn unsubscribe(&self, link_id: LinkId, appid: i64, sub: Subscription) -> bool {
        let mut links = self.links.write().await;
        let Some(routes) = links.get_mut(&link_id) else {
            return false;
        };
        let Some(app) = routes.apps.get_mut(&appid) else {
            return false;
        };
        let removed = match sub {
            Subscription::User { uid } => app.uids.remove(&uid),
            Subscription::Room { room_id } => app.rooms.remove(&room_id),
            Subscription::GroupMember { gid, uid } => match app.group_members.get_mut(&gid) {
                Some(members) => {
                    let removed = members.remove(&uid);
                    if members.is_empty() {
                        app.group_members.remove(&gid);
                    }
                    removed
                }
                None => false,
            },
        };
        if app.is_empty() {
            routes.apps.remove(&appid);
        }
        removed
    }

    /// 订阅了某用户的所有链接
    pub async fn user_links(&self, appid: i64, uid: i64) -> Vec<Arc<ServerLink>> {
        self.collect(appid, |app| app.uids.contains(&uid)).await
    }

    /// 订阅了某房间的所有链接
    pub async fn room_links(&self, appid: i64, room_id: i64) -> Vec<Arc<ServerLink>> {
        self.collect(appid, |app| app.rooms.contains(&room_id)).await
    }

    /// 至少有一个该群成员在线的链接
    pub async fn group_links(&self, appid: i64, gid: i64) -> Vec<Arc<ServerLink>> {
        self.collect(appid, |app| {
            app.group_members
                .get(&gid)
                .is_some_and(|members| !members.is_empty())
        })
        .await
    }

    pub async fn is_user_online(&self, appid: i64, uid: i64) -> bool {
        let links = self.links.read().await;
        links
            .values()
            .any(|routes| routes.apps.get(&appid).is_some_and(|app| app.uids.contains(&uid)))
    }

    pub async fn is_group_member_online(&self, appid: i64, gid: i64, uid: i64) -> bool {
        let links = self.links.read().await;
        links.values().any(|routes| {
            routes.apps.get(&appid).is_some_and(|app| {
                app.group_members
                    .get(&gid)
                    .is_some_and(|members| members.contains(&uid))
            })
        })
    }

    async fn collect<F>(&self, appid: i64, pred: F) -> Vec<Arc<ServerLink>>
    where
        F: Fn(&AppRoutes) -> bool,
    {
        let links = self.links.read().await;
        links
            .values()
            .filter(|routes| routes.apps.get(&appid).is_some_and(&pred))
            .map(|routes| routes.link.clone())
            .collect()
    }
}

//! 外部协作者接口
//!
//! 令牌、设备号、登录点与好友 / 群组关系都由外部系统维护，网关只依赖这些 trait。

use anyhow::Result;
use async_trait::async_trait;

use super::model::Group;

/// 访问令牌查询
#[async_trait]
pub trait TokenStore: Send + Sync {
    /// 返回 `(appid, uid)`
    async fn load(&self, token: &str) -> Result<(i64, i64)>;
}

/// 设备字符串到数字设备号的映射，首次出现时分配
#[async_trait]
pub trait DeviceRegistry: Send + Sync {
    async fn device_id(&self, device: &str, platform: u8) -> Result<i64>;
}

/// 登录点记录
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoginPointRecord {
    pub appid: i64,
    pub uid: i64,
    pub platform: u8,
    pub device: String,
    pub server_id: String,
}

/// 用户登录点与未读数
#[async_trait]
pub trait LoginPointStore: Send + Sync {
    async fn add(&self, point: &LoginPointRecord) -> Result<()>;

    async fn remove(&self, point: &LoginPointRecord) -> Result<()>;

    /// 客户端上报的未读数（推送角标）
    async fn set_unread_count(&self, appid: i64, uid: i64, count: i32) -> Result<()>;
}

/// 好友、黑名单与群组关系存储
#[async_trait]
pub trait RelationStore: Send + Sync {
    async fn user_exists(&self, uid: i64) -> Result<bool>;

    /// 全部好友关系 `(uid, friend)`，双向各一条
    async fn load_friendships(&self) -> Result<Vec<(i64, i64)>>;

    async fn add_friend(&self, uid: i64, friend: i64) -> Result<()>;

    async fn remove_friend(&self, uid: i64, friend: i64) -> Result<()>;

    /// 全部黑名单 `(owner, target)`
    async fn load_blacklist(&self) -> Result<Vec<(i64, i64)>>;

    async fn add_black(&self, owner: i64, target: i64) -> Result<()>;

    async fn remove_black(&self, owner: i64, target: i64) -> Result<()>;

    /// 全部未删除的群组（含成员）
    async fn load_groups(&self) -> Result<Vec<Group>>;

    async fn create_group(&self, group: &Group) -> Result<()>;

    async fn delete_group(&self, gid: i64) -> Result<()>;

    async fn add_group_member(&self, gid: i64, uid: i64) -> Result<()>;

    async fn remove_group_member(&self, gid: i64, uid: i64) -> Result<()>;
}

//! Redis 实现的令牌、设备号与登录点存储

use anyhow::{Context, Result, anyhow};
use async_trait::async_trait;
use redis::AsyncCommands;
use redis::aio::ConnectionManager;
use serde::Serialize;
use spark_im_core::current_secs;

use crate::domain::{DeviceRegistry, LoginPointRecord, LoginPointStore, TokenStore};

pub async fn connect(url: &str) -> Result<ConnectionManager> {
    let client = redis::Client::open(url).with_context(|| format!("invalid redis url: {url}"))?;
    client
        .get_connection_manager()
        .await
        .context("failed to connect gateway redis")
}

/// 令牌哈希 `access_token_{token}`，字段 `app_id` / `user_id`
pub struct RedisTokenStore {
    conn: ConnectionManager,
}

impl RedisTokenStore {
    pub fn new(conn: ConnectionManager) -> Self {
        Self { conn }
    }

    fn key(token: &str) -> String {
        format!("access_token_{token}")
    }
}

#[async_trait]
impl TokenStore for RedisTokenStore {
    async fn load(&self, token: &str) -> Result<(i64, i64)> {
        let mut conn = self.conn.clone();
        let values: Vec<Option<i64>> = redis::cmd("HMGET")
            .arg(Self::key(token))
            .arg("app_id")
            .arg("user_id")
            .query_async(&mut conn)
            .await
            .context("failed to load access token")?;
        match values.as_slice() {
            [Some(appid), Some(uid)] => Ok((*appid, *uid)),
            _ => Err(anyhow!("access token not found")),
        }
    }
}

/// 设备号 `devices_{device}_{platform}`，新设备从计数器 `devices_id` 分配
pub struct RedisDeviceRegistry {
    conn: ConnectionManager,
}

impl RedisDeviceRegistry {
    pub fn new(conn: ConnectionManager) -> Self {
        Self { conn }
    }
}

#[async_trait]
impl DeviceRegistry for RedisDeviceRegistry {
    async fn device_id(&self, device: &str, platform: u8) -> Result<i64> {
        let key = format!("devices_{device}_{platform}");
        let mut conn = self.conn.clone();

        let existing: Option<i64> = conn.get(&key).await.context("failed to read device id")?;
        if let Some(id) = existing {
            return Ok(id);
        }

        let id: i64 = conn
            .incr("devices_id", 1)
            .await
            .context("failed to allocate device id")?;
        let created: bool = conn
            .set_nx(&key, id)
            .await
            .context("failed to store device id")?;
        if created {
            return Ok(id);
        }

        // 并发登录的另一个连接先写入
        let winner: Option<i64> = conn.get(&key).await.context("failed to read device id")?;
        winner.ok_or_else(|| anyhow!("device id for {key} vanished"))
    }
}

#[derive(Serialize)]
struct LoginPointValue<'a> {
    device_id: &'a str,
    server_id: &'a str,
    up_timestamp: i64,
}

/// 用户哈希 `users_{appid}_{uid}`：登录点字段 `login_{platform}`，未读数字段 `unread`
pub struct RedisLoginPointStore {
    conn: ConnectionManager,
}

impl RedisLoginPointStore {
    pub fn new(conn: ConnectionManager) -> Self {
        Self { conn }
    }

    fn key(appid: i64, uid: i64) -> String {
        format!("users_{appid}_{uid}")
    }
}

#[async_trait]
impl LoginPointStore for RedisLoginPointStore {
    async fn add(&self, point: &LoginPointRecord) -> Result<()> {
        let value = serde_json::to_string(&LoginPointValue {
            device_id: &point.device,
            server_id: &point.server_id,
            up_timestamp: current_secs(),
        })
        .context("failed to serialize login point")?;
        let mut conn = self.conn.clone();
        let _: () = conn
            .hset(
                Self::key(point.appid, point.uid),
                format!("login_{}", point.platform),
                value,
            )
            .await
            .context("failed to record login point")?;
        Ok(())
    }

    async fn remove(&self, point: &LoginPointRecord) -> Result<()> {
        let mut conn = self.conn.clone();
        let _: () = conn
            .hdel(
                Self::key(point.appid, point.uid),
                format!("login_{}", point.platform),
            )
            .await
            .context("failed to remove login point")?;
        Ok(())
    }

    async fn set_unread_count(&self, appid: i64, uid: i64, count: i32) -> Result<()> {
        let mut conn = self.conn.clone();
        let _: () = conn
            .hset(Self::key(appid, uid), "unread", count)
            .await
            .context("failed to set unread count")?;
        Ok(())
    }
}

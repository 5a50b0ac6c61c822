use anyhow::Result;
use async_trait::async_trait;
use redis::{AsyncCommands, Script, aio::ConnectionManager};

use crate::domain::model::CursorKey;
use crate::domain::repository::CursorStore;

/// 只在新值更大时写入，返回写入后的值
const ADVANCE_SCRIPT: &str = r#"
local current = tonumber(redis.call('HGET', KEYS[1], ARGV[1]) or '0')
local next = tonumber(ARGV[2])
if next > current then
    redis.call('HSET', KEYS[1], ARGV[1], ARGV[2])
    return next
end
return current
"#;

/// Redis 哈希保存的游标，每个队列一个哈希，字段为设备
pub struct RedisCursorStore {
    conn: ConnectionManager,
    advance: Script,
}

impl RedisCursorStore {
    pub fn new(conn: ConnectionManager) -> Self {
        Self {
            conn,
            advance: Script::new(ADVANCE_SCRIPT),
        }
    }

    pub async fn connect(url: &str) -> Result<Self> {
        let client = redis::Client::open(url)?;
        let conn = client.get_connection_manager().await?;
        Ok(Self::new(conn))
    }

    fn hash_and_field(key: &CursorKey) -> (String, String) {
        match key {
            CursorKey::Peer {
                appid,
                uid,
                device_id,
            } => (format!("spark:cursor:{appid}:{uid}"), device_id.to_string()),
            CursorKey::Group {
                appid,
                gid,
                uid,
                device_id,
            } => (
                format!("spark:group_cursor:{appid}:{gid}"),
                format!("{uid}_{device_id}"),
            ),
        }
    }
}

#[async_trait]
impl CursorStore for RedisCursorStore {
    async fn load(&self, key: &CursorKey) -> Result<i64> {
        let (hash, field) = Self::hash_and_field(key);
        let mut conn = self.conn.clone();
        let value: Option<i64> = conn.hget(hash, field).await?;
        Ok(value.unwrap_or(0))
    }

    async fn advance(&self, key: &CursorKey, msgid: i64) -> Result<i64> {
        let (hash, field) = Self::hash_and_field(key);
        let mut conn = self.conn.clone();
        let value: i64 = self
            .advance
            .key(hash)
            .arg(field)
            .arg(msgid)
            .invoke_async(&mut conn)
            .await?;
        Ok(value)
    }

    async fn flush(&self) -> Result<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hash_layout() {
        let (hash, field) = RedisCursorStore::hash_and_field(&CursorKey::Peer {
            appid: 1,
            uid: 2,
            device_id: 3,
        });
        assert_eq!(hash, "spark:cursor:1:2");
        assert_eq!(field, "3");

        let (hash, field) = RedisCursorStore::hash_and_field(&CursorKey::Group {
            appid: 1,
            gid: 9,
            uid: 2,
            device_id: 3,
        });
        assert_eq!(hash, "spark:group_cursor:1:9");
        assert_eq!(field, "2_3");
    }
}

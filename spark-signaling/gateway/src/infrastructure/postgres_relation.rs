//! # PostgreSQL 关系存储
//!
//! 好友、黑名单与群组关系。`users` 表归账号系统所有，这里只读。

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use anyhow::{Context, Result};
use async_trait::async_trait;
use sqlx::postgres::PgPoolOptions;
use sqlx::{PgPool, Row};
use tracing::info;

use crate::domain::{Group, GroupKind, RelationStore};
use spark_im_core::config::PostgresInstanceConfig;

const SCHEMA: &[&str] = &[
    r#"
    CREATE TABLE IF NOT EXISTS user_friends (
        user_id BIGINT NOT NULL,
        friend_id BIGINT NOT NULL,
        created_at TIMESTAMPTZ NOT NULL DEFAULT now(),
        PRIMARY KEY (user_id, friend_id)
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS user_blacks (
        user_id BIGINT NOT NULL,
        black_id BIGINT NOT NULL,
        created_at TIMESTAMPTZ NOT NULL DEFAULT now(),
        PRIMARY KEY (user_id, black_id)
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS im_groups (
        id BIGINT PRIMARY KEY,
        appid BIGINT NOT NULL,
        owner BIGINT NOT NULL,
        title TEXT NOT NULL DEFAULT '',
        description TEXT NOT NULL DEFAULT '',
        is_private BOOLEAN NOT NULL DEFAULT FALSE,
        is_allow_invite BOOLEAN NOT NULL DEFAULT TRUE,
        is_super BOOLEAN NOT NULL DEFAULT FALSE,
        deleted BOOLEAN NOT NULL DEFAULT FALSE,
        created_at TIMESTAMPTZ NOT NULL DEFAULT now()
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS im_group_members (
        group_id BIGINT NOT NULL,
        user_id BIGINT NOT NULL,
        created_at TIMESTAMPTZ NOT NULL DEFAULT now(),
        PRIMARY KEY (group_id, user_id)
    )
    "#,
];

pub struct PgRelationStore {
    pool: Arc<PgPool>,
}

impl PgRelationStore {
    pub fn new(pool: Arc<PgPool>) -> Self {
        Self { pool }
    }

    pub async fn connect(config: &PostgresInstanceConfig) -> Result<Self> {
        let mut options = PgPoolOptions::new();
        if let Some(max) = config.max_connections {
            options = options.max_connections(max);
        }
        if let Some(min) = config.min_connections {
            options = options.min_connections(min);
        }
        let pool = options
            .connect(&config.url)
            .await
            .context("Failed to connect to PostgreSQL")?;
        Ok(Self::new(Arc::new(pool)))
    }

    /// 创建网关自有的关系表
    pub async fn ensure_schema(&self) -> Result<()> {
        for statement in SCHEMA {
            sqlx::query(statement)
                .execute(&*self.pool)
                .await
                .context("Failed to create relation schema")?;
        }
        info!("relation schema ready");
        Ok(())
    }
}

#[async_trait]
impl RelationStore for PgRelationStore {
    async fn user_exists(&self, uid: i64) -> Result<bool> {
        let row = sqlx::query("SELECT EXISTS(SELECT 1 FROM users WHERE id = $1) AS present")
            .bind(uid)
            .fetch_one(&*self.pool)
            .await
            .context("Failed to query user")?;
        Ok(row.get("present"))
    }

    async fn load_friendships(&self) -> Result<Vec<(i64, i64)>> {
        let rows = sqlx::query("SELECT user_id, friend_id FROM user_friends")
            .fetch_all(&*self.pool)
            .await
            .context("Failed to load friendships")?;
        Ok(rows
            .into_iter()
            .map(|row| (row.get("user_id"), row.get("friend_id")))
            .collect())
    }

    async fn add_friend(&self, uid: i64, friend: i64) -> Result<()> {
        let mut tx = self.pool.begin().await.context("Failed to begin transaction")?;
        for (a, b) in [(uid, friend), (friend, uid)] {
            sqlx::query(
                "INSERT INTO user_friends (user_id, friend_id) VALUES ($1, $2) ON CONFLICT DO NOTHING",
            )
            .bind(a)
            .bind(b)
            .execute(&mut *tx)
            .await
            .context("Failed to insert friendship")?;
        }
        tx.commit().await.context("Failed to commit friendship")?;
        Ok(())
    }

    async fn remove_friend(&self, uid: i64, friend: i64) -> Result<()> {
        sqlx::query(
            r#"
            DELETE FROM user_friends
            WHERE (user_id = $1 AND friend_id = $2) OR (user_id = $2 AND friend_id = $1)
            "#,
        )
        .bind(uid)
        .bind(friend)
        .execute(&*self.pool)
        .await
        .context("Failed to delete friendship")?;
        Ok(())
    }

    async fn load_blacklist(&self) -> Result<Vec<(i64, i64)>> {
        let rows = sqlx::query("SELECT user_id, black_id FROM user_blacks")
            .fetch_all(&*self.pool)
            .await
            .context("Failed to load blacklist")?;
        Ok(rows
            .into_iter()
            .map(|row| (row.get("user_id"), row.get("black_id")))
            .collect())
    }

    async fn add_black(&self, owner: i64, target: i64) -> Result<()> {
        sqlx::query(
            "INSERT INTO user_blacks (user_id, black_id) VALUES ($1, $2) ON CONFLICT DO NOTHING",
        )
        .bind(owner)
        .bind(target)
        .execute(&*self.pool)
        .await
        .context("Failed to insert blacklist entry")?;
        Ok(())
    }

    async fn remove_black(&self, owner: i64, target: i64) -> Result<()> {
        sqlx::query("DELETE FROM user_blacks WHERE user_id = $1 AND black_id = $2")
            .bind(owner)
            .bind(target)
            .execute(&*self.pool)
            .await
            .context("Failed to delete blacklist entry")?;
        Ok(())
    }

    async fn load_groups(&self) -> Result<Vec<Group>> {
        let group_rows = sqlx::query(
            r#"
            SELECT id, appid, owner, title, description, is_private, is_allow_invite, is_super
            FROM im_groups
            WHERE deleted = FALSE
            "#,
        )
        .fetch_all(&*self.pool)
        .await
        .context("Failed to load groups")?;

        let member_rows = sqlx::query(
            r#"
            SELECT m.group_id, m.user_id
            FROM im_group_members m
            INNER JOIN im_groups g ON g.id = m.group_id
            WHERE g.deleted = FALSE
            "#,
        )
        .fetch_all(&*self.pool)
        .await
        .context("Failed to load group members")?;

        let mut members: HashMap<i64, HashSet<i64>> = HashMap::new();
        for row in member_rows {
            let gid: i64 = row.get("group_id");
            let uid: i64 = row.get("user_id");
            members.entry(gid).or_default().insert(uid);
        }

        Ok(group_rows
            .into_iter()
            .map(|row| {
                let gid: i64 = row.get("id");
                let is_super: bool = row.get("is_super");
                Group {
                    gid,
                    appid: row.get("appid"),
                    owner: row.get("owner"),
                    title: row.get("title"),
                    description: row.get("description"),
                    is_private: row.get("is_private"),
                    is_allow_invite: row.get("is_allow_invite"),
                    kind: GroupKind::from_super_flag(is_super),
                    members: Arc::new(members.remove(&gid).unwrap_or_default()),
                }
            })
            .collect())
    }

    async fn create_group(&self, group: &Group) -> Result<()> {
        let mut tx = self.pool.begin().await.context("Failed to begin transaction")?;
        sqlx::query(
            r#"
            INSERT INTO im_groups (id, appid, owner, title, description, is_private, is_allow_invite, is_super)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            "#,
        )
        .bind(group.gid)
        .bind(group.appid)
        .bind(group.owner)
        .bind(&group.title)
        .bind(&group.description)
        .bind(group.is_private)
        .bind(group.is_allow_invite)
        .bind(group.kind.is_super())
        .execute(&mut *tx)
        .await
        .context("Failed to insert group")?;

        for uid in group.members.iter() {
            sqlx::query(
                "INSERT INTO im_group_members (group_id, user_id) VALUES ($1, $2) ON CONFLICT DO NOTHING",
            )
            .bind(group.gid)
            .bind(*uid)
            .execute(&mut *tx)
            .await
            .context("Failed to insert group member")?;
        }
        tx.commit().await.context("Failed to commit group")?;
        Ok(())
    }

    async fn delete_group(&self, gid: i64) -> Result<()> {
        let mut tx = self.pool.begin().await.context("Failed to begin transaction")?;
        sqlx::query("UPDATE im_groups SET deleted = TRUE WHERE id = $1")
            .bind(gid)
            .execute(&mut *tx)
            .await
            .context("Failed to mark group deleted")?;
        sqlx::query("DELETE FROM im_group_members WHERE group_id = $1")
            .bind(gid)
            .execute(&mut *tx)
            .await
            .context("Failed to delete group members")?;
        tx.commit().await.context("Failed to commit group deletion")?;
        Ok(())
    }

    async fn add_group_member(&self, gid: i64, uid: i64) -> Result<()> {
        sqlx::query(
            "INSERT INTO im_group_members (group_id, user_id) VALUES ($1, $2) ON CONFLICT DO NOTHING",
        )
        .bind(gid)
        .bind(uid)
        .execute(&*self.pool)
        .await
        .context("Failed to insert group member")?;
        Ok(())
    }

    async fn remove_group_member(&self, gid: i64, uid: i64) -> Result<()> {
        sqlx::query("DELETE FROM im_group_members WHERE group_id = $1 AND user_id = $2")
            .bind(gid)
            .bind(uid)
            .execute(&*self.pool)
            .await
            .context("Failed to delete group member")?;
        Ok(())
    }
}

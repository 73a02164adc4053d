//! 本地偏好数据访问层（DAO）
//!
//! 扁平键值表，集合以排序后的 JSON 数组保存，读取时还原为集合。

use crate::bridge::conversation::ConversationPrefs;
use crate::bridge::db::{create_sqlite_pool, MEMORY_DB_URL};
use crate::bridge::prefs::models::{keys, MessagePrefs, PrivacySettings, Visibility};
use crate::bridge::types::ConvRef;
use anyhow::{Context, Result};
use sqlx::{Pool, Row, Sqlite};
use std::collections::HashSet;
use tracing::{debug, info, warn};

/// 偏好 DAO（基于 sqlx）
#[derive(Clone)]
pub struct PrefsDao {
    db: Pool<Sqlite>,
}

impl PrefsDao {
    pub fn new(db: Pool<Sqlite>) -> Self {
        Self { db }
    }

    /// 打开（或创建）偏好库并建表
    pub async fn open(db_url: &str) -> Result<Self> {
        let dao = Self::new(create_sqlite_pool(db_url).await?);
        dao.init_db().await?;
        Ok(dao)
    }

    /// 内存偏好库（测试或持久化不可用时）
    pub async fn open_in_memory() -> Result<Self> {
        Self::open(MEMORY_DB_URL).await
    }

    /// 初始化数据库表结构
    pub async fn init_db(&self) -> Result<()> {
        info!("[PrefsDAO/DB] 初始化偏好表结构");
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS bridge_prefs (
                pref_key TEXT PRIMARY KEY,
                pref_value TEXT NOT NULL DEFAULT ''
            )
            "#,
        )
        .execute(&self.db)
        .await
        .context("创建偏好表失败")?;
        Ok(())
    }

    pub async fn get_string(&self, key: &str) -> Result<Option<String>> {
        let row = sqlx::query("SELECT pref_value FROM bridge_prefs WHERE pref_key = ?")
            .bind(key)
            .fetch_optional(&self.db)
            .await
            .with_context(|| format!("读取偏好失败: {}", key))?;
        Ok(row.map(|r| r.get::<String, _>("pref_value")))
    }

    pub async fn set_string(&self, key: &str, value: &str) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO bridge_prefs (pref_key, pref_value) VALUES (?, ?)
            ON CONFLICT(pref_key) DO UPDATE SET pref_value = excluded.pref_value
            "#,
        )
        .bind(key)
        .bind(value)
        .execute(&self.db)
        .await
        .with_context(|| format!("写入偏好失败: {}", key))?;
        debug!("[PrefsDAO] 写入 {}", key);
        Ok(())
    }

    pub async fn remove(&self, key: &str) -> Result<()> {
        sqlx::query("DELETE FROM bridge_prefs WHERE pref_key = ?")
            .bind(key)
            .execute(&self.db)
            .await
            .with_context(|| format!("删除偏好失败: {}", key))?;
        Ok(())
    }

    pub async fn get_bool(&self, key: &str, default: bool) -> Result<bool> {
        Ok(match self.get_string(key).await?.as_deref() {
            Some("1") | Some("true") => true,
            Some("0") | Some("false") => false,
            _ => default,
        })
    }

    pub async fn set_bool(&self, key: &str, value: bool) -> Result<()> {
        self.set_string(key, if value { "1" } else { "0" }).await
    }

    pub async fn get_u32(&self, key: &str) -> Result<u32> {
        Ok(self
            .get_string(key)
            .await?
            .and_then(|v| v.parse().ok())
            .unwrap_or(0))
    }

    /// 读取集合；损坏的值按空集合处理
    pub async fn get_set(&self, key: &str) -> Result<HashSet<String>> {
        let Some(raw) = self.get_string(key).await? else {
            return Ok(HashSet::new());
        };
        match serde_json::from_str::<Vec<String>>(&raw) {
            Ok(list) => Ok(list.into_iter().collect()),
            Err(e) => {
                warn!("[PrefsDAO] ⚠️ 集合解析失败 {}: {}", key, e);
                Ok(HashSet::new())
            }
        }
    }

    pub async fn set_set(&self, key: &str, set: &HashSet<String>) -> Result<()> {
        let mut list: Vec<&String> = set.iter().collect();
        list.sort();
        let raw = serde_json::to_string(&list).context("序列化集合失败")?;
        self.set_string(key, &raw).await
    }

    /// 读取会话偏好
    pub async fn load_conversation(&self, conv: &ConvRef) -> Result<ConversationPrefs> {
        Ok(ConversationPrefs {
            pinned: self.get_bool(&keys::conv_pinned(conv), false).await?,
            muted: self.get_bool(&keys::conv_muted(conv), false).await?,
            unread: self.get_u32(&keys::conv_unread(conv)).await?,
            mention: self.get_u32(&keys::conv_mention(conv)).await?,
        })
    }

    /// 未读与 @ 计数在同一事务中写入，避免两者不同步
    pub async fn save_counters(&self, conv: &ConvRef, unread: u32, mention: u32) -> Result<()> {
        let mut tx = self.db.begin().await.context("开启事务失败")?;
        for (key, value) in [
            (keys::conv_unread(conv), unread),
            (keys::conv_mention(conv), mention),
        ] {
            sqlx::query(
                r#"
                INSERT INTO bridge_prefs (pref_key, pref_value) VALUES (?, ?)
                ON CONFLICT(pref_key) DO UPDATE SET pref_value = excluded.pref_value
                "#,
            )
            .bind(&key)
            .bind(value.to_string())
            .execute(&mut *tx)
            .await
            .with_context(|| format!("写入计数失败: {}", key))?;
        }
        tx.commit().await.context("提交计数事务失败")?;
        Ok(())
    }

    /// 读取会话的消息级偏好
    pub async fn load_messages(&self, conv: &ConvRef) -> Result<MessagePrefs> {
        let pinned = self
            .get_string(&keys::msg_pinned(conv))
            .await?
            .filter(|v| !v.is_empty());
        let last_file_path = self
            .get_string(&keys::msg_last_file_path(conv))
            .await?
            .filter(|v| !v.is_empty());
        Ok(MessagePrefs {
            deleted: self.get_set(&keys::msg_deleted(conv)).await?,
            recalled: self.get_set(&keys::msg_recalled(conv)).await?,
            pinned,
            favorites: self.get_set(&keys::msg_favorite(conv)).await?,
            last_file_path,
        })
    }

    /// 置顶消息，空字符串表示没有置顶
    pub async fn save_pinned_message(&self, conv: &ConvRef, id: Option<&str>) -> Result<()> {
        self.set_string(&keys::msg_pinned(conv), id.unwrap_or(""))
            .await
    }

    /// 清除会话的全部消息级偏好（删除聊天记录后）
    pub async fn clear_messages(&self, conv: &ConvRef) -> Result<()> {
        for key in [
            keys::msg_recalled(conv),
            keys::msg_pinned(conv),
            keys::msg_favorite(conv),
        ] {
            self.remove(&key).await?;
        }
        Ok(())
    }

    pub async fn load_privacy(&self) -> Result<PrivacySettings> {
        let d = PrivacySettings::default();
        let vis = |raw: Option<String>, fallback: Visibility| {
            raw.and_then(|v| v.parse().ok()).unwrap_or(fallback)
        };
        Ok(PrivacySettings {
            history_enabled: self
                .get_bool(keys::HISTORY_ENABLED, d.history_enabled)
                .await?,
            read_receipts_enabled: self
                .get_bool(keys::READ_RECEIPTS_ENABLED, d.read_receipts_enabled)
                .await?,
            screenshot_alerts_enabled: self
                .get_bool(keys::SCREENSHOT_ALERTS_ENABLED, d.screenshot_alerts_enabled)
                .await?,
            last_seen: vis(self.get_string(keys::PRIVACY_LAST_SEEN).await?, d.last_seen),
            profile_photo: vis(
                self.get_string(keys::PRIVACY_PROFILE_PHOTO).await?,
                d.profile_photo,
            ),
            group_invites: vis(
                self.get_string(keys::PRIVACY_GROUP_INVITES).await?,
                d.group_invites,
            ),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn sets_round_trip_without_order() {
        let dao = PrefsDao::open_in_memory().await.unwrap();
        let key = keys::msg_deleted(&ConvRef::peer("alice"));
        let set: HashSet<String> = ["m3", "m1", "m2"].iter().map(|s| s.to_string()).collect();
        dao.set_set(&key, &set).await.unwrap();
        assert_eq!(dao.get_set(&key).await.unwrap(), set);
        assert_eq!(
            dao.get_string(&key).await.unwrap().as_deref(),
            Some(r#"["m1","m2","m3"]"#)
        );
    }

    #[tokio::test]
    async fn corrupt_set_reads_as_empty() {
        let dao = PrefsDao::open_in_memory().await.unwrap();
        dao.set_string("msg_favorite_p:x", "not json").await.unwrap();
        assert!(dao.get_set("msg_favorite_p:x").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn counters_are_written_together() {
        let dao = PrefsDao::open_in_memory().await.unwrap();
        let conv = ConvRef::group("g1");
        dao.save_counters(&conv, 4, 2).await.unwrap();
        dao.set_bool(&keys::conv_muted(&conv), true).await.unwrap();
        let prefs = dao.load_conversation(&conv).await.unwrap();
        assert_eq!(
            prefs,
            ConversationPrefs {
                pinned: false,
                muted: true,
                unread: 4,
                mention: 2,
            }
        );
    }

    #[tokio::test]
    async fn pinned_message_empty_means_none() {
        let dao = PrefsDao::open_in_memory().await.unwrap();
        let conv = ConvRef::peer("bob");
        dao.save_pinned_message(&conv, Some("m1")).await.unwrap();
        assert_eq!(dao.load_messages(&conv).await.unwrap().pinned.as_deref(), Some("m1"));
        dao.save_pinned_message(&conv, None).await.unwrap();
        assert_eq!(dao.load_messages(&conv).await.unwrap().pinned, None);
    }

    #[tokio::test]
    async fn privacy_defaults_and_overrides() {
        let dao = PrefsDao::open_in_memory().await.unwrap();
        assert_eq!(dao.load_privacy().await.unwrap(), PrivacySettings::default());
        dao.set_string(keys::PRIVACY_LAST_SEEN, "nobody").await.unwrap();
        dao.set_bool(keys::READ_RECEIPTS_ENABLED, false).await.unwrap();
        let p = dao.load_privacy().await.unwrap();
        assert_eq!(p.last_seen, Visibility::Nobody);
        assert!(!p.read_receipts_enabled);
    }

    #[tokio::test]
    async fn file_store_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let url = crate::bridge::db::prefs_db_url(dir.path());
        let conv = ConvRef::peer("alice");
        {
            let dao = PrefsDao::open(&url).await.unwrap();
            let set: HashSet<String> = ["a".to_string(), "b".to_string()].into();
            dao.set_set(&keys::msg_recalled(&conv), &set).await.unwrap();
        }
        let dao = PrefsDao::open(&url).await.unwrap();
        let prefs = dao.load_messages(&conv).await.unwrap();
        assert_eq!(prefs.recalled.len(), 2);
        assert!(prefs.recalled.contains("a"));
    }
}

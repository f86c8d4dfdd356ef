//! 账户清除：同一事务内删除用户及所有引用
use application::repository::{AccountPurgeStore, PurgeReport};
use async_trait::async_trait;
use domain::{RepositoryError, UserId};
use sqlx::{PgPool, Postgres, Transaction};
use uuid::Uuid;

use crate::repository::map_sqlx_err;

/// 按顺序执行的删除语句，`$1` 为被清除的用户
const OWNED_ROWS: &[(&str, &str)] = &[
    (
        "relationships",
        "DELETE FROM relationships WHERE follower_id = $1 OR followed_id = $1",
    ),
    (
        "chat_messages",
        "DELETE FROM chat_messages WHERE sender_id = $1 OR receiver_id = $1",
    ),
    (
        "thread_milestones",
        "DELETE FROM thread_milestones WHERE user_low = $1 OR user_high = $1",
    ),
    (
        "notifications",
        "DELETE FROM notifications WHERE user_id = $1 OR actor_id = $1",
    ),
    ("payments", "DELETE FROM payments WHERE user_id = $1"),
    ("subscriptions", "DELETE FROM subscriptions WHERE user_id = $1"),
    (
        "push_notifications",
        "DELETE FROM push_notifications WHERE user_id = $1",
    ),
    (
        "activity_logs",
        "DELETE FROM activity_logs WHERE user_id = $1 OR target_user_id = $1",
    ),
    (
        "wali_contacts",
        "DELETE FROM wali_contacts WHERE subject_user_id = $1 OR contacted_by_user_id = $1",
    ),
];

#[derive(Clone)]
pub struct PgAccountPurgeStore {
    pool: PgPool,
}

impl PgAccountPurgeStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    async fn purge_in(
        tx: &mut Transaction<'static, Postgres>,
        user_id: Uuid,
    ) -> Result<PurgeReport, RepositoryError> {
        // 1. 锁定用户行，并发清除会在此排队
        let locked: Option<Uuid> =
            sqlx::query_scalar("SELECT id FROM users WHERE id = $1 FOR UPDATE")
                .bind(user_id)
                .fetch_optional(&mut **tx)
                .await
                .map_err(map_sqlx_err)?;
        if locked.is_none() {
            return Err(RepositoryError::NotFound);
        }

        // 2. 删除归属或涉及该用户的记录
        let mut report = PurgeReport::default();
        for (table, statement) in OWNED_ROWS {
            let affected = sqlx::query(statement)
                .bind(user_id)
                .execute(&mut **tx)
                .await
                .map_err(map_sqlx_err)?
                .rows_affected();
            tracing::debug!(table, affected, "清除关联记录");
            match *table {
                "relationships" => report.relationships = affected,
                "chat_messages" => report.messages = affected,
                "thread_milestones" => report.thread_milestones = affected,
                "notifications" => report.notifications = affected,
                "payments" => report.payments = affected,
                "subscriptions" => report.subscriptions = affected,
                "push_notifications" => report.push_notifications = affected,
                "activity_logs" => report.activity_logs = affected,
                _ => report.wali_contacts = affected,
            }
        }

        // 3. 从其他用户的列表字段中移除
        report.users_scrubbed = sqlx::query(
            r#"
            UPDATE users SET
                blocked_users = array_remove(blocked_users, $1),
                favorite_users = array_remove(favorite_users, $1),
                viewed_by = array_remove(viewed_by, $1),
                updated_at = NOW()
            WHERE id <> $1
              AND ($1 = ANY(blocked_users) OR $1 = ANY(favorite_users) OR $1 = ANY(viewed_by))
            "#,
        )
        .bind(user_id)
        .execute(&mut **tx)
        .await
        .map_err(map_sqlx_err)?
        .rows_affected();

        // 4. 最后删除用户本身
        let deleted = sqlx::query("DELETE FROM users WHERE id = $1")
            .bind(user_id)
            .execute(&mut **tx)
            .await
            .map_err(map_sqlx_err)?
            .rows_affected();
        report.user_deleted = deleted == 1;

        Ok(report)
    }
}

#[async_trait]
impl AccountPurgeStore for PgAccountPurgeStore {
    async fn purge_user(&self, user_id: UserId) -> Result<PurgeReport, RepositoryError> {
        let mut tx = self.pool.begin().await.map_err(map_sqlx_err)?;

        // 出错时事务随 drop 回滚
        let report = Self::purge_in(&mut tx, user_id.0).await?;

        tx.commit().await.map_err(map_sqlx_err)?;
        Ok(report)
    }
}

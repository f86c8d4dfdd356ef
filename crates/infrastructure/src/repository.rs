use std::sync::Arc;

use application::repository::{
    ActivityLogRepository, AllowanceInsert, ChatMessageRepository, NotificationRepository,
    RelationshipRepository, UserDirectory, WaliContactRepository,
};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use domain::{
    ActivityAction, ActivityLog, ActivityLogId, ChatMessage, ChatMessageStatus, ChatMessageType,
    EmailAddress, Gender, GuardianRecord, MessageBody, MessageId, Notification, NotificationId,
    NotificationKind, PairKey, Plan, Relationship, RelationshipId, RelationshipStatus,
    RepositoryError, User, UserId, WaliContactId, WaliContactRecord,
};
use sqlx::{postgres::PgPoolOptions, FromRow, PgPool, Postgres};
use uuid::Uuid;

use crate::purge::PgAccountPurgeStore;

const UNIQUE_VIOLATION: &str = "23505";

pub(crate) fn map_sqlx_err(err: sqlx::Error) -> RepositoryError {
    match &err {
        sqlx::Error::RowNotFound => RepositoryError::NotFound,
        sqlx::Error::Database(db) if db.code().as_deref() == Some(UNIQUE_VIOLATION) => {
            RepositoryError::conflict(db.constraint().unwrap_or("unique").to_string())
        }
        _ => RepositoryError::storage(err.to_string()),
    }
}

fn invalid_data(message: impl Into<String>) -> RepositoryError {
    RepositoryError::storage(message)
}

fn uuids(ids: &[UserId]) -> Vec<Uuid> {
    ids.iter().map(|id| id.0).collect()
}

const USER_COLUMNS: &str = "id, username, email, display_name, gender, plan, wali_details, \
     parent_email, blocked_users, favorite_users, viewed_by, created_at, updated_at";

#[derive(Debug, FromRow)]
struct UserRecord {
    id: Uuid,
    username: String,
    email: String,
    display_name: Option<String>,
    gender: String,
    plan: String,
    wali_details: Option<String>,
    parent_email: Option<String>,
    blocked_users: Vec<Uuid>,
    favorite_users: Vec<Uuid>,
    viewed_by: Vec<Uuid>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl TryFrom<UserRecord> for User {
    type Error = RepositoryError;

    fn try_from(value: UserRecord) -> Result<Self, Self::Error> {
        let email = EmailAddress::parse(value.email).map_err(|err| invalid_data(err.to_string()))?;
        let gender: Gender = value
            .gender
            .parse()
            .map_err(|err: domain::DomainError| invalid_data(err.to_string()))?;
        let plan: Plan = value
            .plan
            .parse()
            .map_err(|err: domain::DomainError| invalid_data(err.to_string()))?;
        // 无法解析的家长邮箱按未填写处理
        let parent_email = value
            .parent_email
            .filter(|raw| !raw.trim().is_empty())
            .and_then(|raw| EmailAddress::parse(raw).ok());

        Ok(User {
            id: UserId::from(value.id),
            username: value.username,
            email,
            display_name: value.display_name,
            gender,
            plan,
            wali: GuardianRecord::from_stored(value.wali_details.as_deref()),
            parent_email,
            blocked_users: value.blocked_users.into_iter().map(UserId::from).collect(),
            favorite_users: value.favorite_users.into_iter().map(UserId::from).collect(),
            viewed_by: value.viewed_by.into_iter().map(UserId::from).collect(),
            created_at: value.created_at,
            updated_at: value.updated_at,
        })
    }
}

#[derive(Debug, FromRow)]
struct RelationshipRecord {
    id: Uuid,
    follower_id: Uuid,
    followed_id: Uuid,
    status: String,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl TryFrom<RelationshipRecord> for Relationship {
    type Error = RepositoryError;

    fn try_from(value: RelationshipRecord) -> Result<Self, Self::Error> {
        let status: RelationshipStatus = value
            .status
            .parse()
            .map_err(|err: domain::DomainError| invalid_data(err.to_string()))?;
        Ok(Relationship {
            id: RelationshipId::from(value.id),
            follower_id: UserId::from(value.follower_id),
            followed_id: UserId::from(value.followed_id),
            status,
            created_at: value.created_at,
            updated_at: value.updated_at,
        })
    }
}

#[derive(Debug, FromRow)]
struct MessageRecord {
    id: Uuid,
    sender_id: Uuid,
    receiver_id: Uuid,
    body: String,
    status: String,
    message_type: String,
    created_at: DateTime<Utc>,
}

impl TryFrom<MessageRecord> for ChatMessage {
    type Error = RepositoryError;

    fn try_from(value: MessageRecord) -> Result<Self, Self::Error> {
        let body = MessageBody::new(value.body).map_err(|err| invalid_data(err.to_string()))?;
        let status: ChatMessageStatus = value
            .status
            .parse()
            .map_err(|err: domain::DomainError| invalid_data(err.to_string()))?;
        let message_type: ChatMessageType = value
            .message_type
            .parse()
            .map_err(|err: domain::DomainError| invalid_data(err.to_string()))?;

        let mut message = ChatMessage::new(
            MessageId::from(value.id),
            UserId::from(value.sender_id),
            UserId::from(value.receiver_id),
            body,
            message_type,
            value.created_at,
        );
        message.status = status;
        Ok(message)
    }
}

#[derive(Debug, FromRow)]
struct WaliContactRow {
    id: Uuid,
    subject_user_id: Uuid,
    wali_email: String,
    contacted_by_user_id: Uuid,
    message: String,
    created_at: DateTime<Utc>,
}

impl TryFrom<WaliContactRow> for WaliContactRecord {
    type Error = RepositoryError;

    fn try_from(value: WaliContactRow) -> Result<Self, Self::Error> {
        Ok(WaliContactRecord {
            id: WaliContactId::from(value.id),
            subject_user_id: UserId::from(value.subject_user_id),
            wali_email: EmailAddress::parse(value.wali_email)
                .map_err(|err| invalid_data(err.to_string()))?,
            contacted_by_user_id: UserId::from(value.contacted_by_user_id),
            message: value.message,
            created_at: value.created_at,
        })
    }
}

#[derive(Debug, FromRow)]
struct ActivityRecord {
    id: Uuid,
    user_id: Uuid,
    target_user_id: Option<Uuid>,
    action: String,
    created_at: DateTime<Utc>,
}

impl TryFrom<ActivityRecord> for ActivityLog {
    type Error = RepositoryError;

    fn try_from(value: ActivityRecord) -> Result<Self, Self::Error> {
        let action: ActivityAction = value
            .action
            .parse()
            .map_err(|err: domain::DomainError| invalid_data(err.to_string()))?;
        Ok(ActivityLog {
            id: ActivityLogId::from(value.id),
            user_id: UserId::from(value.user_id),
            target_user_id: value.target_user_id.map(UserId::from),
            action,
            created_at: value.created_at,
        })
    }
}

#[derive(Debug, FromRow)]
struct NotificationRecord {
    id: Uuid,
    user_id: Uuid,
    actor_id: Uuid,
    kind: String,
    message: String,
    is_read: bool,
    created_at: DateTime<Utc>,
}

impl TryFrom<NotificationRecord> for Notification {
    type Error = RepositoryError;

    fn try_from(value: NotificationRecord) -> Result<Self, Self::Error> {
        let kind: NotificationKind = value
            .kind
            .parse()
            .map_err(|err: domain::DomainError| invalid_data(err.to_string()))?;
        Ok(Notification {
            id: NotificationId::from(value.id),
            user_id: UserId::from(value.user_id),
            actor_id: UserId::from(value.actor_id),
            kind,
            message: value.message,
            is_read: value.is_read,
            created_at: value.created_at,
        })
    }
}

#[derive(Clone)]
pub struct PgUserDirectory {
    pool: PgPool,
}

impl PgUserDirectory {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// 写入或更新用户资料，供导入和测试使用
    pub async fn upsert(&self, user: &User) -> Result<User, RepositoryError> {
        let record = sqlx::query_as::<_, UserRecord>(&format!(
            r#"
            INSERT INTO users ({USER_COLUMNS})
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13)
            ON CONFLICT (id) DO UPDATE SET
                username = EXCLUDED.username,
                email = EXCLUDED.email,
                display_name = EXCLUDED.display_name,
                gender = EXCLUDED.gender,
                plan = EXCLUDED.plan,
                wali_details = EXCLUDED.wali_details,
                parent_email = EXCLUDED.parent_email,
                blocked_users = EXCLUDED.blocked_users,
                favorite_users = EXCLUDED.favorite_users,
                viewed_by = EXCLUDED.viewed_by,
                updated_at = EXCLUDED.updated_at
            RETURNING {USER_COLUMNS}
            "#
        ))
        .bind(user.id.0)
        .bind(&user.username)
        .bind(user.email.as_str())
        .bind(user.display_name.as_deref())
        .bind(user.gender.as_str())
        .bind(user.plan.as_str())
        .bind(user.wali.to_stored())
        .bind(user.parent_email.as_ref().map(|e| e.as_str()))
        .bind(uuids(&user.blocked_users))
        .bind(uuids(&user.favorite_users))
        .bind(uuids(&user.viewed_by))
        .bind(user.created_at)
        .bind(user.updated_at)
        .fetch_one(&self.pool)
        .await
        .map_err(map_sqlx_err)?;

        User::try_from(record)
    }
}

#[async_trait]
impl UserDirectory for PgUserDirectory {
    async fn find_by_id(&self, id: UserId) -> Result<Option<User>, RepositoryError> {
        let record = sqlx::query_as::<_, UserRecord>(&format!(
            "SELECT {USER_COLUMNS} FROM users WHERE id = $1"
        ))
        .bind(id.0)
        .fetch_optional(&self.pool)
        .await
        .map_err(map_sqlx_err)?;

        record.map(User::try_from).transpose()
    }

    async fn find_by_email(&self, email: &EmailAddress) -> Result<Option<User>, RepositoryError> {
        let record = sqlx::query_as::<_, UserRecord>(&format!(
            "SELECT {USER_COLUMNS} FROM users WHERE LOWER(email) = LOWER($1)"
        ))
        .bind(email.as_str())
        .fetch_optional(&self.pool)
        .await
        .map_err(map_sqlx_err)?;

        record.map(User::try_from).transpose()
    }

    async fn find_by_username(&self, username: &str) -> Result<Option<User>, RepositoryError> {
        let record = sqlx::query_as::<_, UserRecord>(&format!(
            "SELECT {USER_COLUMNS} FROM users WHERE username = $1"
        ))
        .bind(username)
        .fetch_optional(&self.pool)
        .await
        .map_err(map_sqlx_err)?;

        record.map(User::try_from).transpose()
    }

    async fn find_many(&self, ids: &[UserId]) -> Result<Vec<User>, RepositoryError> {
        if ids.is_empty() {
            return Ok(Vec::new());
        }
        let records = sqlx::query_as::<_, UserRecord>(&format!(
            "SELECT {USER_COLUMNS} FROM users WHERE id = ANY($1)"
        ))
        .bind(uuids(ids))
        .fetch_all(&self.pool)
        .await
        .map_err(map_sqlx_err)?;

        records.into_iter().map(User::try_from).collect()
    }
}

const RELATIONSHIP_COLUMNS: &str = "id, follower_id, followed_id, status, created_at, updated_at";

#[derive(Clone)]
pub struct PgRelationshipRepository {
    pool: PgPool,
}

impl PgRelationshipRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    async fn list_where(
        &self,
        predicate: &str,
        user_id: UserId,
        status: RelationshipStatus,
    ) -> Result<Vec<Relationship>, RepositoryError> {
        let records = sqlx::query_as::<_, RelationshipRecord>(&format!(
            "SELECT {RELATIONSHIP_COLUMNS} FROM relationships \
             WHERE status = $2 AND ({predicate}) ORDER BY created_at"
        ))
        .bind(user_id.0)
        .bind(status.as_str())
        .fetch_all(&self.pool)
        .await
        .map_err(map_sqlx_err)?;

        records.into_iter().map(Relationship::try_from).collect()
    }
}

#[async_trait]
impl RelationshipRepository for PgRelationshipRepository {
    async fn insert(&self, relationship: Relationship) -> Result<Relationship, RepositoryError> {
        let record = sqlx::query_as::<_, RelationshipRecord>(&format!(
            r#"
            INSERT INTO relationships (id, follower_id, followed_id, pair_key, status, created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            RETURNING {RELATIONSHIP_COLUMNS}
            "#
        ))
        .bind(relationship.id.0)
        .bind(relationship.follower_id.0)
        .bind(relationship.followed_id.0)
        .bind(relationship.pair_key().as_storage_key())
        .bind(relationship.status.as_str())
        .bind(relationship.created_at)
        .bind(relationship.updated_at)
        .fetch_one(&self.pool)
        .await
        .map_err(map_sqlx_err)?;

        Relationship::try_from(record)
    }

    async fn update_if_status(
        &self,
        relationship: Relationship,
        expected: RelationshipStatus,
    ) -> Result<Relationship, RepositoryError> {
        let record = sqlx::query_as::<_, RelationshipRecord>(&format!(
            r#"
            UPDATE relationships SET status = $2, updated_at = $3
            WHERE id = $1 AND status = $4
            RETURNING {RELATIONSHIP_COLUMNS}
            "#
        ))
        .bind(relationship.id.0)
        .bind(relationship.status.as_str())
        .bind(relationship.updated_at)
        .bind(expected.as_str())
        .fetch_optional(&self.pool)
        .await
        .map_err(map_sqlx_err)?;

        match record {
            Some(record) => Relationship::try_from(record),
            None => {
                let exists: bool =
                    sqlx::query_scalar("SELECT EXISTS (SELECT 1 FROM relationships WHERE id = $1)")
                        .bind(relationship.id.0)
                        .fetch_one(&self.pool)
                        .await
                        .map_err(map_sqlx_err)?;
                if exists {
                    Err(RepositoryError::conflict("relationships_status_guard"))
                } else {
                    Err(RepositoryError::NotFound)
                }
            }
        }
    }

    async fn delete_pending(&self, id: RelationshipId) -> Result<bool, RepositoryError> {
        let result = sqlx::query("DELETE FROM relationships WHERE id = $1 AND status = 'pending'")
            .bind(id.0)
            .execute(&self.pool)
            .await
            .map_err(map_sqlx_err)?;
        Ok(result.rows_affected() > 0)
    }

    async fn find_by_id(
        &self,
        id: RelationshipId,
    ) -> Result<Option<Relationship>, RepositoryError> {
        let record = sqlx::query_as::<_, RelationshipRecord>(&format!(
            "SELECT {RELATIONSHIP_COLUMNS} FROM relationships WHERE id = $1"
        ))
        .bind(id.0)
        .fetch_optional(&self.pool)
        .await
        .map_err(map_sqlx_err)?;

        record.map(Relationship::try_from).transpose()
    }

    async fn find_between(
        &self,
        a: UserId,
        b: UserId,
    ) -> Result<Option<Relationship>, RepositoryError> {
        let record = sqlx::query_as::<_, RelationshipRecord>(&format!(
            "SELECT {RELATIONSHIP_COLUMNS} FROM relationships WHERE pair_key = $1"
        ))
        .bind(PairKey::new(a, b).as_storage_key())
        .fetch_optional(&self.pool)
        .await
        .map_err(map_sqlx_err)?;

        record.map(Relationship::try_from).transpose()
    }

    async fn list_involving(
        &self,
        user_id: UserId,
        status: RelationshipStatus,
    ) -> Result<Vec<Relationship>, RepositoryError> {
        self.list_where("follower_id = $1 OR followed_id = $1", user_id, status)
            .await
    }

    async fn list_by_follower(
        &self,
        follower_id: UserId,
        status: RelationshipStatus,
    ) -> Result<Vec<Relationship>, RepositoryError> {
        self.list_where("follower_id = $1", follower_id, status).await
    }

    async fn list_by_followed(
        &self,
        followed_id: UserId,
        status: RelationshipStatus,
    ) -> Result<Vec<Relationship>, RepositoryError> {
        self.list_where("followed_id = $1", followed_id, status).await
    }
}

const MESSAGE_COLUMNS: &str = "id, sender_id, receiver_id, body, status, message_type, created_at";

#[derive(Clone)]
pub struct PgChatMessageRepository {
    pool: PgPool,
}

impl PgChatMessageRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

async fn insert_message<'e, E>(
    executor: E,
    message: &ChatMessage,
) -> Result<ChatMessage, RepositoryError>
where
    E: sqlx::Executor<'e, Database = Postgres>,
{
    let record = sqlx::query_as::<_, MessageRecord>(&format!(
        r#"
        INSERT INTO chat_messages (id, sender_id, receiver_id, pair_key, body, status, message_type, created_at)
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
        RETURNING {MESSAGE_COLUMNS}
        "#
    ))
    .bind(message.id.0)
    .bind(message.sender_id.0)
    .bind(message.receiver_id.0)
    .bind(message.pair_key().as_storage_key())
    .bind(message.body.as_str())
    .bind(message.status.as_str())
    .bind(message.message_type.as_str())
    .bind(message.created_at)
    .fetch_one(executor)
    .await
    .map_err(map_sqlx_err)?;

    ChatMessage::try_from(record)
}

#[async_trait]
impl ChatMessageRepository for PgChatMessageRepository {
    async fn insert(&self, message: ChatMessage) -> Result<ChatMessage, RepositoryError> {
        insert_message(&self.pool, &message).await
    }

    async fn insert_within_allowance(
        &self,
        message: ChatMessage,
        allowance: u32,
    ) -> Result<AllowanceInsert, RepositoryError> {
        let mut tx = self.pool.begin().await.map_err(map_sqlx_err)?;

        // 同一方向的写入在事务级咨询锁上排队，提交或回滚时自动释放
        sqlx::query("SELECT pg_advisory_xact_lock(hashtext($1))")
            .bind(format!(
                "chat_allowance:{}:{}",
                message.sender_id.0, message.receiver_id.0
            ))
            .execute(&mut *tx)
            .await
            .map_err(map_sqlx_err)?;

        let count: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM chat_messages WHERE sender_id = $1 AND receiver_id = $2",
        )
        .bind(message.sender_id.0)
        .bind(message.receiver_id.0)
        .fetch_one(&mut *tx)
        .await
        .map_err(map_sqlx_err)?;
        let sent = count.max(0) as u64;
        if sent >= u64::from(allowance) {
            tx.rollback().await.map_err(map_sqlx_err)?;
            return Ok(AllowanceInsert::Exhausted { sent });
        }

        let stored = insert_message(&mut *tx, &message).await?;
        tx.commit().await.map_err(map_sqlx_err)?;
        Ok(AllowanceInsert::Stored(stored))
    }

    async fn count_sent(&self, sender: UserId, receiver: UserId) -> Result<u64, RepositoryError> {
        let count: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM chat_messages WHERE sender_id = $1 AND receiver_id = $2",
        )
        .bind(sender.0)
        .bind(receiver.0)
        .fetch_one(&self.pool)
        .await
        .map_err(map_sqlx_err)?;
        Ok(count.max(0) as u64)
    }

    async fn count_thread(&self, pair: PairKey) -> Result<u64, RepositoryError> {
        let count: i64 =
            sqlx::query_scalar("SELECT COUNT(*) FROM chat_messages WHERE pair_key = $1")
                .bind(pair.as_storage_key())
                .fetch_one(&self.pool)
                .await
                .map_err(map_sqlx_err)?;
        Ok(count.max(0) as u64)
    }

    async fn list_thread(&self, pair: PairKey) -> Result<Vec<ChatMessage>, RepositoryError> {
        let records = sqlx::query_as::<_, MessageRecord>(&format!(
            "SELECT {MESSAGE_COLUMNS} FROM chat_messages WHERE pair_key = $1 ORDER BY created_at, seq"
        ))
        .bind(pair.as_storage_key())
        .fetch_all(&self.pool)
        .await
        .map_err(map_sqlx_err)?;

        records.into_iter().map(ChatMessage::try_from).collect()
    }

    async fn mark_read(&self, reader: UserId, ids: &[MessageId]) -> Result<u64, RepositoryError> {
        if ids.is_empty() {
            return Ok(0);
        }
        let ids: Vec<Uuid> = ids.iter().map(|id| id.0).collect();
        let result = sqlx::query(
            r#"
            UPDATE chat_messages SET status = 'READ'
            WHERE receiver_id = $1 AND id = ANY($2) AND status = 'UNREAD'
            "#,
        )
        .bind(reader.0)
        .bind(ids)
        .execute(&self.pool)
        .await
        .map_err(map_sqlx_err)?;
        Ok(result.rows_affected())
    }

    async fn claim_thread_milestone(
        &self,
        pair: PairKey,
        milestone: u64,
    ) -> Result<bool, RepositoryError> {
        let milestone = i64::try_from(milestone)
            .map_err(|_| invalid_data(format!("milestone {milestone} out of range")))?;
        let result = sqlx::query(
            r#"
            INSERT INTO thread_milestones (user_low, user_high, milestone)
            VALUES ($1, $2, $3)
            ON CONFLICT DO NOTHING
            "#,
        )
        .bind(pair.low().0)
        .bind(pair.high().0)
        .bind(milestone)
        .execute(&self.pool)
        .await
        .map_err(map_sqlx_err)?;
        Ok(result.rows_affected() == 1)
    }
}

#[derive(Clone)]
pub struct PgWaliContactRepository {
    pool: PgPool,
}

impl PgWaliContactRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl WaliContactRepository for PgWaliContactRepository {
    async fn append(
        &self,
        record: WaliContactRecord,
    ) -> Result<WaliContactRecord, RepositoryError> {
        sqlx::query(
            r#"
            INSERT INTO wali_contacts (id, subject_user_id, wali_email, contacted_by_user_id, message, created_at)
            VALUES ($1, $2, $3, $4, $5, $6)
            "#,
        )
        .bind(record.id.0)
        .bind(record.subject_user_id.0)
        .bind(record.wali_email.as_str())
        .bind(record.contacted_by_user_id.0)
        .bind(&record.message)
        .bind(record.created_at)
        .execute(&self.pool)
        .await
        .map_err(map_sqlx_err)?;
        Ok(record)
    }

    async fn list_for_subject(
        &self,
        subject: UserId,
    ) -> Result<Vec<WaliContactRecord>, RepositoryError> {
        let records = sqlx::query_as::<_, WaliContactRow>(
            r#"
            SELECT id, subject_user_id, wali_email, contacted_by_user_id, message, created_at
            FROM wali_contacts WHERE subject_user_id = $1 ORDER BY created_at
            "#,
        )
        .bind(subject.0)
        .fetch_all(&self.pool)
        .await
        .map_err(map_sqlx_err)?;

        records.into_iter().map(WaliContactRecord::try_from).collect()
    }
}

#[derive(Clone)]
pub struct PgActivityLogRepository {
    pool: PgPool,
}

impl PgActivityLogRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl ActivityLogRepository for PgActivityLogRepository {
    async fn append(&self, entry: ActivityLog) -> Result<(), RepositoryError> {
        sqlx::query(
            r#"
            INSERT INTO activity_logs (id, user_id, target_user_id, action, created_at)
            VALUES ($1, $2, $3, $4, $5)
            "#,
        )
        .bind(entry.id.0)
        .bind(entry.user_id.0)
        .bind(entry.target_user_id.map(|id| id.0))
        .bind(entry.action.as_str())
        .bind(entry.created_at)
        .execute(&self.pool)
        .await
        .map_err(map_sqlx_err)?;
        Ok(())
    }

    async fn list_for_user(&self, user_id: UserId) -> Result<Vec<ActivityLog>, RepositoryError> {
        let records = sqlx::query_as::<_, ActivityRecord>(
            r#"
            SELECT id, user_id, target_user_id, action, created_at
            FROM activity_logs WHERE user_id = $1 ORDER BY created_at
            "#,
        )
        .bind(user_id.0)
        .fetch_all(&self.pool)
        .await
        .map_err(map_sqlx_err)?;

        records.into_iter().map(ActivityLog::try_from).collect()
    }
}

#[derive(Clone)]
pub struct PgNotificationRepository {
    pool: PgPool,
}

impl PgNotificationRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl NotificationRepository for PgNotificationRepository {
    async fn insert(&self, notification: Notification) -> Result<Notification, RepositoryError> {
        sqlx::query(
            r#"
            INSERT INTO notifications (id, user_id, actor_id, kind, message, is_read, created_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            "#,
        )
        .bind(notification.id.0)
        .bind(notification.user_id.0)
        .bind(notification.actor_id.0)
        .bind(notification.kind.as_str())
        .bind(&notification.message)
        .bind(notification.is_read)
        .bind(notification.created_at)
        .execute(&self.pool)
        .await
        .map_err(map_sqlx_err)?;
        Ok(notification)
    }

    async fn list_for_user(&self, user_id: UserId) -> Result<Vec<Notification>, RepositoryError> {
        let records = sqlx::query_as::<_, NotificationRecord>(
            r#"
            SELECT id, user_id, actor_id, kind, message, is_read, created_at
            FROM notifications WHERE user_id = $1 ORDER BY created_at DESC
            "#,
        )
        .bind(user_id.0)
        .fetch_all(&self.pool)
        .await
        .map_err(map_sqlx_err)?;

        records.into_iter().map(Notification::try_from).collect()
    }
}

#[derive(Clone)]
pub struct PgStorage {
    pub pool: PgPool,
    pub user_directory: Arc<PgUserDirectory>,
    pub relationship_repository: Arc<PgRelationshipRepository>,
    pub message_repository: Arc<PgChatMessageRepository>,
    pub wali_contact_repository: Arc<PgWaliContactRepository>,
    pub activity_repository: Arc<PgActivityLogRepository>,
    pub notification_repository: Arc<PgNotificationRepository>,
    pub purge_store: Arc<PgAccountPurgeStore>,
}

impl PgStorage {
    pub fn new(pool: PgPool) -> Self {
        Self {
            user_directory: Arc::new(PgUserDirectory::new(pool.clone())),
            relationship_repository: Arc::new(PgRelationshipRepository::new(pool.clone())),
            message_repository: Arc::new(PgChatMessageRepository::new(pool.clone())),
            wali_contact_repository: Arc::new(PgWaliContactRepository::new(pool.clone())),
            activity_repository: Arc::new(PgActivityLogRepository::new(pool.clone())),
            notification_repository: Arc::new(PgNotificationRepository::new(pool.clone())),
            purge_store: Arc::new(PgAccountPurgeStore::new(pool.clone())),
            pool,
        }
    }
}

pub async fn create_pg_pool(
    database_url: &str,
    max_connections: u32,
) -> Result<PgPool, sqlx::Error> {
    PgPoolOptions::new()
        .max_connections(max_connections)
        .connect(database_url)
        .await
}

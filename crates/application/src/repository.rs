use async_trait::async_trait;
use domain::{
    ActivityLog, ChatMessage, EmailAddress, MessageId, Notification, PairKey, Relationship,
    RelationshipId, RelationshipStatus, RepositoryError, User, UserId, WaliContactRecord,
};
use serde::Serialize;

/// 用户目录，只读
#[async_trait]
pub trait UserDirectory: Send + Sync {
    async fn find_by_id(&self, id: UserId) -> Result<Option<User>, RepositoryError>;
    async fn find_by_email(&self, email: &EmailAddress) -> Result<Option<User>, RepositoryError>;
    async fn find_by_username(&self, username: &str) -> Result<Option<User>, RepositoryError>;
    async fn find_many(&self, ids: &[UserId]) -> Result<Vec<User>, RepositoryError>;
}

#[async_trait]
pub trait RelationshipRepository: Send + Sync {
    /// 插入新关系；同一无序用户对已有记录时返回 `RepositoryError::Conflict`
    async fn insert(&self, relationship: Relationship) -> Result<Relationship, RepositoryError>;

    /// 条件更新：仅当当前状态等于 `expected` 时写入。
    /// 记录不存在返回 `NotFound`，状态已变化返回 `Conflict`。
    async fn update_if_status(
        &self,
        relationship: Relationship,
        expected: RelationshipStatus,
    ) -> Result<Relationship, RepositoryError>;

    /// 仅删除仍处于 pending 的记录，返回是否删除
    async fn delete_pending(&self, id: RelationshipId) -> Result<bool, RepositoryError>;

    async fn find_by_id(&self, id: RelationshipId) -> Result<Option<Relationship>, RepositoryError>;

    /// 任意方向
    async fn find_between(&self, a: UserId, b: UserId)
        -> Result<Option<Relationship>, RepositoryError>;

    async fn list_involving(
        &self,
        user_id: UserId,
        status: RelationshipStatus,
    ) -> Result<Vec<Relationship>, RepositoryError>;

    async fn list_by_follower(
        &self,
        follower_id: UserId,
        status: RelationshipStatus,
    ) -> Result<Vec<Relationship>, RepositoryError>;

    async fn list_by_followed(
        &self,
        followed_id: UserId,
        status: RelationshipStatus,
    ) -> Result<Vec<Relationship>, RepositoryError>;
}

/// 额度内写入的结果
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AllowanceInsert {
    Stored(ChatMessage),
    /// 额度已满，`sent` 为写入前 sender -> receiver 的条数
    Exhausted { sent: u64 },
}

#[async_trait]
pub trait ChatMessageRepository: Send + Sync {
    async fn insert(&self, message: ChatMessage) -> Result<ChatMessage, RepositoryError>;

    /// 统计与写入作为一个原子步骤：同一 sender -> receiver 方向的并发写入串行化，
    /// 已有条数达到 `allowance` 时不写入。
    async fn insert_within_allowance(
        &self,
        message: ChatMessage,
        allowance: u32,
    ) -> Result<AllowanceInsert, RepositoryError>;

    /// sender -> receiver 方向的消息条数
    async fn count_sent(&self, sender: UserId, receiver: UserId) -> Result<u64, RepositoryError>;

    /// 双方往来消息总数
    async fn count_thread(&self, pair: PairKey) -> Result<u64, RepositoryError>;

    /// 按创建时间升序
    async fn list_thread(&self, pair: PairKey) -> Result<Vec<ChatMessage>, RepositoryError>;

    /// 把发给 `reader` 的未读消息标记为已读，返回实际变更条数
    async fn mark_read(&self, reader: UserId, ids: &[MessageId]) -> Result<u64, RepositoryError>;

    /// 认领会话的通知里程碑，首次认领返回 true
    async fn claim_thread_milestone(
        &self,
        pair: PairKey,
        milestone: u64,
    ) -> Result<bool, RepositoryError>;
}

#[async_trait]
pub trait WaliContactRepository: Send + Sync {
    async fn append(&self, record: WaliContactRecord) -> Result<WaliContactRecord, RepositoryError>;
    async fn list_for_subject(
        &self,
        subject: UserId,
    ) -> Result<Vec<WaliContactRecord>, RepositoryError>;
}

#[async_trait]
pub trait ActivityLogRepository: Send + Sync {
    async fn append(&self, entry: ActivityLog) -> Result<(), RepositoryError>;
    async fn list_for_user(&self, user_id: UserId) -> Result<Vec<ActivityLog>, RepositoryError>;
}

#[async_trait]
pub trait NotificationRepository: Send + Sync {
    async fn insert(&self, notification: Notification) -> Result<Notification, RepositoryError>;
    async fn list_for_user(&self, user_id: UserId) -> Result<Vec<Notification>, RepositoryError>;
}

/// 单个事务内清除账户及其全部引用
#[async_trait]
pub trait AccountPurgeStore: Send + Sync {
    /// 全部成功才提交；任何失败回滚并返回错误，数据保持原样
    async fn purge_user(&self, user_id: UserId) -> Result<PurgeReport, RepositoryError>;
}

/// 各集合删除/清理的记录数
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct PurgeReport {
    pub relationships: u64,
    pub messages: u64,
    pub thread_milestones: u64,
    pub notifications: u64,
    pub payments: u64,
    pub subscriptions: u64,
    pub activity_logs: u64,
    pub wali_contacts: u64,
    pub push_notifications: u64,
    /// 被移除引用的其他用户数
    pub users_scrubbed: u64,
    pub user_deleted: bool,
}

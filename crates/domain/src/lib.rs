//! 撮合系统核心领域模型
//!
//! 包含用户、匹配关系、聊天消息、审计记录等实体，以及套餐额度规则。

pub mod audit;
pub mod errors;
pub mod message;
pub mod notification;
pub mod plan;
pub mod relationship;
pub mod user;
pub mod value_objects;

// 重新导出常用类型
pub use audit::{ActivityAction, ActivityLog, WaliContactRecord};
pub use errors::{DomainError, DomainResult, RepositoryError, RepositoryResult};
pub use message::{
    CallEvent, CallMeta, ChatMessage, ChatMessageStatus, ChatMessageType, MessageBody,
};
pub use notification::{Notification, NotificationKind};
pub use plan::{word_count, PlanLimits, PlanTable};
pub use relationship::{Decision, Relationship, RelationshipStatus};
pub use user::{Gender, GuardianRecord, Plan, User, WaliDetails};
pub use value_objects::{
    ActivityLogId, EmailAddress, MessageId, NotificationId, PairKey, RelationshipId, Timestamp,
    UserId, WaliContactId,
};

//! 应用层实现。
//!
//! 围绕领域模型提供匹配关系、消息闸门、监护人通知和账户清除四类用例，
//! 并定义存储、邮件、推送等外部适配器的抽象。

pub mod clock;
pub mod email;
pub mod error;
pub mod memory;
pub mod profile_cache;
pub mod push;
pub mod repository;
pub mod services;

pub use clock::{Clock, SystemClock};
pub use email::{EmailDispatcher, EmailError, EmailQueue, OutboundEmail};
pub use error::{ApplicationError, ApplicationResult, ErrorKind, PlanLimitKind};
pub use memory::{InMemoryStore, MemoryState, PurgeStep};
pub use profile_cache::{ProfileCache, ProfileSummary};
pub use push::{LocalPushChannel, PushChannel, PushError, PushEvent, PushStream};
pub use repository::{
    AccountPurgeStore, ActivityLogRepository, AllowanceInsert, ChatMessageRepository,
    NotificationRepository, PurgeReport, RelationshipRepository, UserDirectory,
    WaliContactRepository,
};
pub use services::{
    guardian_recipients, AccountPurgeService, AccountPurgeServiceDependencies, ComplianceNotifier,
    ComplianceNotifierDependencies, ContactWaliRequest, MessagingService,
    MessagingServiceDependencies, PurgeSettings, RelationshipService,
    RelationshipServiceDependencies, RelationshipView, SendMessageRequest, SendPermit, ThreadEntry,
    UserSummary, VideoCallRequest, THREAD_NOTIFY_EVERY,
};

//! 基础设施层实现。
//!
//! 提供 Postgres 仓储、事务性账户清除、邮件服务商适配和 Redis 推送，实现应用层定义的接口。

pub mod builder;
pub mod email;
pub mod migrations;
pub mod purge;
pub mod push;
pub mod repository;
pub mod retry;

pub use builder::{Infrastructure, InfrastructureError};
pub use email::{HttpEmailDispatcher, LogEmailDispatcher, ResilientEmailDispatcher};
pub use migrations::MIGRATOR;
pub use purge::PgAccountPurgeStore;
pub use push::{FallbackPushChannel, RedisPushChannel};
pub use repository::{
    create_pg_pool, PgActivityLogRepository, PgChatMessageRepository, PgNotificationRepository,
    PgRelationshipRepository, PgStorage, PgUserDirectory, PgWaliContactRepository,
};
pub use retry::{retry_async, Backoff, RetryConfig};

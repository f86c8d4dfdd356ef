use std::sync::Arc;
use std::time::Duration;

use application::{
    repository::{
        AccountPurgeStore, ActivityLogRepository, ChatMessageRepository, NotificationRepository,
        RelationshipRepository, UserDirectory, WaliContactRepository,
    },
    EmailDispatcher, InMemoryStore, LocalPushChannel, PushChannel,
};
use config::{AppConfig, EmailProvider, StorageBackend};
use sqlx::PgPool;
use thiserror::Error;

use crate::{
    email::{HttpEmailDispatcher, LogEmailDispatcher, ResilientEmailDispatcher},
    migrations::MIGRATOR,
    push::{FallbackPushChannel, RedisPushChannel},
    repository::{create_pg_pool, PgStorage},
};

const LOCAL_PUSH_CAPACITY: usize = 1024;

#[derive(Debug, Error)]
pub enum InfrastructureError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error("migration error: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),
    #[error("redis error: {0}")]
    Redis(#[from] redis::RedisError),
    #[error("http client error: {0}")]
    Http(#[from] reqwest::Error),
    #[error("configuration error: {0}")]
    Config(String),
}

/// 服务层需要的全部适配器
#[derive(Clone)]
pub struct Infrastructure {
    pub pool: Option<PgPool>,
    /// 仅内存后端时存在，用于本地种子数据
    pub memory: Option<Arc<InMemoryStore>>,
    pub user_directory: Arc<dyn UserDirectory>,
    pub relationship_repository: Arc<dyn RelationshipRepository>,
    pub message_repository: Arc<dyn ChatMessageRepository>,
    pub wali_contact_repository: Arc<dyn WaliContactRepository>,
    pub activity_repository: Arc<dyn ActivityLogRepository>,
    pub notification_repository: Arc<dyn NotificationRepository>,
    pub purge_store: Arc<dyn AccountPurgeStore>,
    pub email_dispatcher: Arc<dyn EmailDispatcher>,
    pub push_channel: Arc<dyn PushChannel>,
    pub local_push: Arc<LocalPushChannel>,
}

impl Infrastructure {
    pub async fn connect(config: &AppConfig) -> Result<Self, InfrastructureError> {
        let email_dispatcher = build_email_dispatcher(config)?;
        let local_push = Arc::new(LocalPushChannel::new(LOCAL_PUSH_CAPACITY));
        let push_channel = build_push_channel(config, local_push.clone()).await?;

        match config.storage {
            StorageBackend::Postgres => {
                let pool =
                    create_pg_pool(&config.database.url, config.database.max_connections).await?;
                if config.database.run_migrations {
                    MIGRATOR.run(&pool).await?;
                    tracing::info!("数据库迁移完成");
                }
                let storage = PgStorage::new(pool);
                Ok(Self {
                    pool: Some(storage.pool.clone()),
                    memory: None,
                    user_directory: storage.user_directory,
                    relationship_repository: storage.relationship_repository,
                    message_repository: storage.message_repository,
                    wali_contact_repository: storage.wali_contact_repository,
                    activity_repository: storage.activity_repository,
                    notification_repository: storage.notification_repository,
                    purge_store: storage.purge_store,
                    email_dispatcher,
                    push_channel,
                    local_push,
                })
            }
            StorageBackend::Memory => {
                tracing::warn!("使用内存存储，进程退出后数据丢失");
                let store = Arc::new(InMemoryStore::new());
                Ok(Self::with_memory_store(
                    store,
                    email_dispatcher,
                    push_channel,
                    local_push,
                ))
            }
        }
    }

    pub fn in_memory(email_dispatcher: Arc<dyn EmailDispatcher>) -> Self {
        let local_push = Arc::new(LocalPushChannel::new(LOCAL_PUSH_CAPACITY));
        Self::with_memory_store(
            Arc::new(InMemoryStore::new()),
            email_dispatcher,
            local_push.clone(),
            local_push,
        )
    }

    fn with_memory_store(
        store: Arc<InMemoryStore>,
        email_dispatcher: Arc<dyn EmailDispatcher>,
        push_channel: Arc<dyn PushChannel>,
        local_push: Arc<LocalPushChannel>,
    ) -> Self {
        Self {
            pool: None,
            memory: Some(store.clone()),
            user_directory: store.clone(),
            relationship_repository: store.clone(),
            message_repository: store.clone(),
            wali_contact_repository: store.clone(),
            activity_repository: store.clone(),
            notification_repository: store.clone(),
            purge_store: store,
            email_dispatcher,
            push_channel,
            local_push,
        }
    }
}

fn build_email_dispatcher(
    config: &AppConfig,
) -> Result<Arc<dyn EmailDispatcher>, InfrastructureError> {
    let email = &config.email;
    match email.provider {
        EmailProvider::Log => Ok(Arc::new(LogEmailDispatcher)),
        EmailProvider::Http => {
            let endpoint = email.endpoint.clone().ok_or_else(|| {
                InfrastructureError::Config("email.endpoint is required for http provider".into())
            })?;
            let http = HttpEmailDispatcher::new(
                endpoint,
                email.api_key.clone(),
                email.from_address.clone(),
            )?;
            Ok(Arc::new(ResilientEmailDispatcher::new(
                Arc::new(http),
                Duration::from_millis(email.timeout_ms),
                email.max_attempts,
                Duration::from_millis(email.backoff_base_ms),
            )))
        }
    }
}

async fn build_push_channel(
    config: &AppConfig,
    local: Arc<LocalPushChannel>,
) -> Result<Arc<dyn PushChannel>, InfrastructureError> {
    match &config.redis.url {
        Some(url) => {
            let redis = RedisPushChannel::connect(url, config.redis.channel_prefix.clone()).await?;
            tracing::info!(prefix = %config.redis.channel_prefix, "Redis 推送通道已连接");
            Ok(Arc::new(FallbackPushChannel::new(Arc::new(redis), local)))
        }
        None => Ok(local as Arc<dyn PushChannel>),
    }
}

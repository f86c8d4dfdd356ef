//! 按配置装配全部服务
use std::sync::Arc;
use std::time::Duration;

use application::{
    AccountPurgeService, AccountPurgeServiceDependencies, Clock, ComplianceNotifier,
    ComplianceNotifierDependencies, EmailQueue, MessagingService, MessagingServiceDependencies,
    ProfileCache, PurgeSettings, RelationshipService, RelationshipServiceDependencies,
    SystemClock,
};
use config::{AppConfig, PlanConfig};
use domain::{PlanLimits, PlanTable};
use infrastructure::Infrastructure;
use tokio::task::JoinHandle;

pub struct AppServices {
    pub relationships: Arc<RelationshipService>,
    pub messaging: Arc<MessagingService>,
    pub notifier: Arc<ComplianceNotifier>,
    pub purge: Arc<AccountPurgeService>,
    pub profile_cache: Arc<ProfileCache>,
}

fn plan_limits(plan: &PlanConfig) -> PlanLimits {
    PlanLimits {
        allowance: plan.allowance,
        word_limit: plan.word_limit,
        video_call: plan.video_call,
    }
}

pub fn plan_table(config: &AppConfig) -> PlanTable {
    PlanTable {
        freemium: plan_limits(&config.plans.freemium),
        premium: plan_limits(&config.plans.premium),
        pro: plan_limits(&config.plans.pro),
    }
}

/// 返回服务集合和邮件 worker 句柄；服务全部丢弃后 worker 排空队列再退出
pub fn build(config: &AppConfig, infra: &Infrastructure) -> (AppServices, JoinHandle<()>) {
    let clock: Arc<dyn Clock> = Arc::new(SystemClock);
    let profile_cache = Arc::new(ProfileCache::new(
        infra.user_directory.clone(),
        Duration::from_secs(config.profile_cache.ttl_secs),
        config.profile_cache.capacity,
    ));
    let (email_queue, email_worker) = EmailQueue::start(
        infra.email_dispatcher.clone(),
        config.notifier.queue_capacity,
        config.notifier.max_in_flight,
    );

    let notifier = Arc::new(ComplianceNotifier::new(ComplianceNotifierDependencies {
        user_directory: infra.user_directory.clone(),
        message_repository: infra.message_repository.clone(),
        wali_contact_repository: infra.wali_contact_repository.clone(),
        activity_repository: infra.activity_repository.clone(),
        email_queue,
        clock: clock.clone(),
    }));

    let relationships = Arc::new(RelationshipService::new(RelationshipServiceDependencies {
        user_directory: infra.user_directory.clone(),
        relationship_repository: infra.relationship_repository.clone(),
        activity_repository: infra.activity_repository.clone(),
        notification_repository: infra.notification_repository.clone(),
        push_channel: infra.push_channel.clone(),
        clock: clock.clone(),
    }));

    let messaging = Arc::new(MessagingService::new(MessagingServiceDependencies {
        user_directory: infra.user_directory.clone(),
        relationship_repository: infra.relationship_repository.clone(),
        message_repository: infra.message_repository.clone(),
        notifier: notifier.clone(),
        profile_cache: profile_cache.clone(),
        push_channel: infra.push_channel.clone(),
        clock,
        plans: plan_table(config),
    }));

    let purge = Arc::new(AccountPurgeService::new(AccountPurgeServiceDependencies {
        user_directory: infra.user_directory.clone(),
        purge_store: infra.purge_store.clone(),
        profile_cache: profile_cache.clone(),
        settings: PurgeSettings {
            max_attempts: config.purge.max_attempts,
            ..PurgeSettings::default()
        },
    }));

    (
        AppServices {
            relationships,
            messaging,
            notifier,
            purge,
            profile_cache,
        },
        email_worker,
    )
}

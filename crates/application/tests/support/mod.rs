//! 集成测试共享的装配代码

#![allow(dead_code)]

use std::sync::{Arc, Mutex};
use std::time::Duration;

use application::{
    AccountPurgeService, AccountPurgeServiceDependencies, ComplianceNotifier,
    ComplianceNotifierDependencies, EmailDispatcher, EmailError, EmailQueue, InMemoryStore,
    LocalPushChannel, MessagingService, MessagingServiceDependencies, OutboundEmail, ProfileCache,
    PurgeSettings, RelationshipService, RelationshipServiceDependencies, SystemClock,
};
use async_trait::async_trait;
use chrono::Utc;
use domain::{
    Decision, EmailAddress, Gender, GuardianRecord, Plan, PlanTable, User, UserId, WaliDetails,
};

#[derive(Default)]
pub struct RecordingDispatcher {
    sent: Mutex<Vec<OutboundEmail>>,
}

impl RecordingDispatcher {
    pub fn sent(&self) -> Vec<OutboundEmail> {
        self.sent.lock().unwrap().clone()
    }

    pub fn sent_to(&self, address: &str) -> Vec<OutboundEmail> {
        self.sent()
            .into_iter()
            .filter(|email| email.to.same_mailbox(address))
            .collect()
    }
}

#[async_trait]
impl EmailDispatcher for RecordingDispatcher {
    async fn send(&self, email: &OutboundEmail) -> Result<(), EmailError> {
        self.sent.lock().unwrap().push(email.clone());
        Ok(())
    }
}

/// 发送总是失败的邮件服务
pub struct FailingDispatcher;

#[async_trait]
impl EmailDispatcher for FailingDispatcher {
    async fn send(&self, _email: &OutboundEmail) -> Result<(), EmailError> {
        Err(EmailError::Transport("provider unavailable".into()))
    }
}

pub struct Harness {
    pub store: Arc<InMemoryStore>,
    pub emails: Arc<RecordingDispatcher>,
    pub push: Arc<LocalPushChannel>,
    pub cache: Arc<ProfileCache>,
    pub relationships: RelationshipService,
    pub messaging: MessagingService,
    pub notifier: Arc<ComplianceNotifier>,
    pub purge: AccountPurgeService,
}

impl Harness {
    pub fn new() -> Self {
        let emails = Arc::new(RecordingDispatcher::default());
        Self::with_dispatcher(emails.clone(), emails)
    }

    pub fn with_dispatcher(
        dispatcher: Arc<dyn EmailDispatcher>,
        emails: Arc<RecordingDispatcher>,
    ) -> Self {
        let store = Arc::new(InMemoryStore::new());
        let push = Arc::new(LocalPushChannel::default());
        let clock = Arc::new(SystemClock);
        let cache = Arc::new(ProfileCache::new(
            store.clone(),
            Duration::from_secs(60),
            128,
        ));
        let (email_queue, _worker) = EmailQueue::start(dispatcher, 256, 4);

        let notifier = Arc::new(ComplianceNotifier::new(ComplianceNotifierDependencies {
            user_directory: store.clone(),
            message_repository: store.clone(),
            wali_contact_repository: store.clone(),
            activity_repository: store.clone(),
            email_queue,
            clock: clock.clone(),
        }));

        let relationships = RelationshipService::new(RelationshipServiceDependencies {
            user_directory: store.clone(),
            relationship_repository: store.clone(),
            activity_repository: store.clone(),
            notification_repository: store.clone(),
            push_channel: push.clone(),
            clock: clock.clone(),
        });

        let messaging = MessagingService::new(MessagingServiceDependencies {
            user_directory: store.clone(),
            relationship_repository: store.clone(),
            message_repository: store.clone(),
            notifier: notifier.clone(),
            profile_cache: cache.clone(),
            push_channel: push.clone(),
            clock,
            plans: PlanTable::default(),
        });

        let purge = AccountPurgeService::new(AccountPurgeServiceDependencies {
            user_directory: store.clone(),
            purge_store: store.clone(),
            profile_cache: cache.clone(),
            settings: PurgeSettings {
                max_attempts: 3,
                retry_delay: Duration::ZERO,
            },
        });

        Self {
            store,
            emails,
            push,
            cache,
            relationships,
            messaging,
            notifier,
            purge,
        }
    }

    pub fn user(&self, name: &str, gender: Gender, plan: Plan) -> User {
        let user = User::new(
            UserId::generate(),
            name,
            EmailAddress::parse(format!("{name}@example.com")).unwrap(),
            gender,
            plan,
            Utc::now(),
        )
        .unwrap();
        self.store.upsert_user(user.clone()).unwrap();
        user
    }

    pub fn save(&self, user: &User) {
        self.store.upsert_user(user.clone()).unwrap();
    }

    /// 带 wali 邮箱的女性用户
    pub fn sister(&self, name: &str, wali_email: &str, plan: Plan) -> User {
        let mut user = self.user(name, Gender::Female, plan);
        user.wali = GuardianRecord::Provided(WaliDetails {
            name: Some(format!("Wali of {name}")),
            email: Some(wali_email.to_string()),
            ..WaliDetails::default()
        });
        self.save(&user);
        user
    }

    pub async fn matched(&self, a: UserId, b: UserId) {
        let rel = self.relationships.send_request(a, b).await.unwrap();
        self.relationships
            .respond(rel.id, b, Decision::Accept)
            .await
            .unwrap();
    }

    /// 等待后台邮件达到指定数量
    pub async fn wait_for_emails(&self, expected: usize) -> Vec<OutboundEmail> {
        let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
        loop {
            let sent = self.emails.sent();
            if sent.len() >= expected || tokio::time::Instant::now() >= deadline {
                return sent;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    }

    /// 给后台任务留出时间，确认没有多余的邮件
    pub async fn settle(&self) -> Vec<OutboundEmail> {
        tokio::time::sleep(Duration::from_millis(150)).await;
        self.emails.sent()
    }
}

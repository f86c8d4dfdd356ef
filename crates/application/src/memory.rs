//! 内存存储实现
//!
//! 用于测试以及 `storage = "memory"` 的单进程部署。全部集合放在同一把锁之后，
//! 账户清除在快照上执行，成功后整体替换，从而保证原子性。

use std::collections::{HashMap, HashSet};
use std::sync::{Mutex, MutexGuard};

use async_trait::async_trait;
use domain::{
    ActivityLog, ChatMessage, ChatMessageStatus, EmailAddress, MessageId, Notification, PairKey,
    Relationship, RelationshipId, RelationshipStatus, RepositoryError, User, UserId,
    WaliContactRecord,
};
use uuid::Uuid;

use crate::repository::{
    AccountPurgeStore, ActivityLogRepository, AllowanceInsert, ChatMessageRepository,
    NotificationRepository, PurgeReport, RelationshipRepository, UserDirectory,
    WaliContactRepository,
};

/// 账户关联的账务类记录（支付、订阅、推送令牌）
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OwnedRecord {
    pub id: Uuid,
    pub user_id: UserId,
}

/// 清除流程中的各个步骤，用于故障注入
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PurgeStep {
    Relationships,
    Messages,
    Notifications,
    Billing,
    AuditTrail,
    UserReferences,
    UserRow,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct MemoryState {
    users: HashMap<UserId, User>,
    relationships: HashMap<RelationshipId, Relationship>,
    pair_index: HashMap<PairKey, RelationshipId>,
    messages: Vec<ChatMessage>,
    milestones: HashSet<(PairKey, u64)>,
    wali_contacts: Vec<WaliContactRecord>,
    activity_logs: Vec<ActivityLog>,
    notifications: Vec<Notification>,
    payments: Vec<OwnedRecord>,
    subscriptions: Vec<OwnedRecord>,
    push_notifications: Vec<OwnedRecord>,
}

impl MemoryState {
    /// 仍然引用该用户的记录数
    pub fn count_references(&self, user_id: UserId) -> usize {
        let pair_milestones = self
            .milestones
            .iter()
            .filter(|(pair, _)| pair.contains(user_id))
            .count();

        usize::from(self.users.contains_key(&user_id))
            + self
                .users
                .values()
                .filter(|user| user.references(user_id))
                .count()
            + self
                .relationships
                .values()
                .filter(|rel| rel.involves(user_id))
                .count()
            + self.messages.iter().filter(|m| m.involves(user_id)).count()
            + pair_milestones
            + self
                .wali_contacts
                .iter()
                .filter(|c| c.subject_user_id == user_id || c.contacted_by_user_id == user_id)
                .count()
            + self.activity_logs.iter().filter(|l| l.involves(user_id)).count()
            + self.notifications.iter().filter(|n| n.involves(user_id)).count()
            + self.payments.iter().filter(|r| r.user_id == user_id).count()
            + self.subscriptions.iter().filter(|r| r.user_id == user_id).count()
            + self
                .push_notifications
                .iter()
                .filter(|r| r.user_id == user_id)
                .count()
    }

    pub fn user(&self, user_id: UserId) -> Option<&User> {
        self.users.get(&user_id)
    }

    pub fn message_count(&self) -> usize {
        self.messages.len()
    }
}

#[derive(Debug, Clone, Copy)]
struct PurgeFault {
    step: PurgeStep,
    remaining: u32,
}

#[derive(Default)]
pub struct InMemoryStore {
    state: Mutex<MemoryState>,
    purge_fault: Mutex<Option<PurgeFault>>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> Result<MutexGuard<'_, MemoryState>, RepositoryError> {
        self.state
            .lock()
            .map_err(|_| RepositoryError::storage("memory store lock poisoned"))
    }

    pub fn upsert_user(&self, user: User) -> Result<(), RepositoryError> {
        let mut state = self.state()?;
        if let Some(existing) = state
            .users
            .values()
            .find(|u| u.id != user.id && u.email.same_mailbox(user.email.as_str()))
        {
            return Err(RepositoryError::conflict(format!(
                "users_email_key ({})",
                existing.email
            )));
        }
        state.users.insert(user.id, user);
        Ok(())
    }

    pub fn add_payment(&self, user_id: UserId) -> Result<(), RepositoryError> {
        self.state()?.payments.push(OwnedRecord {
            id: Uuid::new_v4(),
            user_id,
        });
        Ok(())
    }

    pub fn add_subscription(&self, user_id: UserId) -> Result<(), RepositoryError> {
        self.state()?.subscriptions.push(OwnedRecord {
            id: Uuid::new_v4(),
            user_id,
        });
        Ok(())
    }

    pub fn add_push_notification(&self, user_id: UserId) -> Result<(), RepositoryError> {
        self.state()?.push_notifications.push(OwnedRecord {
            id: Uuid::new_v4(),
            user_id,
        });
        Ok(())
    }

    pub fn snapshot(&self) -> Result<MemoryState, RepositoryError> {
        Ok(self.state()?.clone())
    }

    /// 让后续 `times` 次清除在指定步骤失败
    pub fn inject_purge_failure(&self, step: PurgeStep, times: u32) {
        if let Ok(mut fault) = self.purge_fault.lock() {
            *fault = Some(PurgeFault {
                step,
                remaining: times,
            });
        }
    }

    pub fn clear_purge_failure(&self) {
        if let Ok(mut fault) = self.purge_fault.lock() {
            *fault = None;
        }
    }

    fn checkpoint(&self, step: PurgeStep) -> Result<(), RepositoryError> {
        let mut fault = self
            .purge_fault
            .lock()
            .map_err(|_| RepositoryError::storage("fault lock poisoned"))?;
        match fault.as_mut() {
            Some(f) if f.step == step && f.remaining > 0 => {
                f.remaining -= 1;
                Err(RepositoryError::storage(format!(
                    "injected failure at {step:?}"
                )))
            }
            _ => Ok(()),
        }
    }

    fn purge_in(
        &self,
        draft: &mut MemoryState,
        user_id: UserId,
    ) -> Result<PurgeReport, RepositoryError> {
        let mut report = PurgeReport::default();

        self.checkpoint(PurgeStep::Relationships)?;
        let before = draft.relationships.len();
        draft.relationships.retain(|_, rel| !rel.involves(user_id));
        report.relationships = (before - draft.relationships.len()) as u64;
        let live: HashSet<RelationshipId> = draft.relationships.keys().copied().collect();
        draft.pair_index.retain(|_, id| live.contains(id));

        self.checkpoint(PurgeStep::Messages)?;
        let before = draft.messages.len();
        draft.messages.retain(|m| !m.involves(user_id));
        report.messages = (before - draft.messages.len()) as u64;
        let before = draft.milestones.len();
        draft.milestones.retain(|(pair, _)| !pair.contains(user_id));
        report.thread_milestones = (before - draft.milestones.len()) as u64;

        self.checkpoint(PurgeStep::Notifications)?;
        let before = draft.notifications.len();
        draft.notifications.retain(|n| !n.involves(user_id));
        report.notifications = (before - draft.notifications.len()) as u64;

        self.checkpoint(PurgeStep::Billing)?;
        report.payments = remove_owned(&mut draft.payments, user_id);
        report.subscriptions = remove_owned(&mut draft.subscriptions, user_id);
        report.push_notifications = remove_owned(&mut draft.push_notifications, user_id);

        self.checkpoint(PurgeStep::AuditTrail)?;
        let before = draft.activity_logs.len();
        draft.activity_logs.retain(|l| !l.involves(user_id));
        report.activity_logs = (before - draft.activity_logs.len()) as u64;
        let before = draft.wali_contacts.len();
        draft
            .wali_contacts
            .retain(|c| c.subject_user_id != user_id && c.contacted_by_user_id != user_id);
        report.wali_contacts = (before - draft.wali_contacts.len()) as u64;

        self.checkpoint(PurgeStep::UserReferences)?;
        for other in draft.users.values_mut().filter(|u| u.id != user_id) {
            if other.forget_user(user_id) {
                report.users_scrubbed += 1;
            }
        }

        self.checkpoint(PurgeStep::UserRow)?;
        report.user_deleted = draft.users.remove(&user_id).is_some();

        Ok(report)
    }
}

fn remove_owned(records: &mut Vec<OwnedRecord>, user_id: UserId) -> u64 {
    let before = records.len();
    records.retain(|r| r.user_id != user_id);
    (before - records.len()) as u64
}

#[async_trait]
impl UserDirectory for InMemoryStore {
    async fn find_by_id(&self, id: UserId) -> Result<Option<User>, RepositoryError> {
        Ok(self.state()?.users.get(&id).cloned())
    }

    async fn find_by_email(&self, email: &EmailAddress) -> Result<Option<User>, RepositoryError> {
        Ok(self
            .state()?
            .users
            .values()
            .find(|u| u.email.same_mailbox(email.as_str()))
            .cloned())
    }

    async fn find_by_username(&self, username: &str) -> Result<Option<User>, RepositoryError> {
        Ok(self
            .state()?
            .users
            .values()
            .find(|u| u.username == username)
            .cloned())
    }

    async fn find_many(&self, ids: &[UserId]) -> Result<Vec<User>, RepositoryError> {
        let state = self.state()?;
        Ok(ids.iter().filter_map(|id| state.users.get(id).cloned()).collect())
    }
}

#[async_trait]
impl RelationshipRepository for InMemoryStore {
    async fn insert(&self, relationship: Relationship) -> Result<Relationship, RepositoryError> {
        let mut state = self.state()?;
        let pair = relationship.pair_key();
        if state.pair_index.contains_key(&pair) {
            return Err(RepositoryError::conflict("relationships_pair_key_key"));
        }
        state.pair_index.insert(pair, relationship.id);
        state
            .relationships
            .insert(relationship.id, relationship.clone());
        Ok(relationship)
    }

    async fn update_if_status(
        &self,
        relationship: Relationship,
        expected: RelationshipStatus,
    ) -> Result<Relationship, RepositoryError> {
        let mut state = self.state()?;
        let current = state
            .relationships
            .get_mut(&relationship.id)
            .ok_or(RepositoryError::NotFound)?;
        if current.status != expected {
            return Err(RepositoryError::conflict("relationships_status_guard"));
        }
        *current = relationship.clone();
        Ok(relationship)
    }

    async fn delete_pending(&self, id: RelationshipId) -> Result<bool, RepositoryError> {
        let mut state = self.state()?;
        let pending = state
            .relationships
            .get(&id)
            .is_some_and(|rel| rel.status == RelationshipStatus::Pending);
        if !pending {
            return Ok(false);
        }
        if let Some(rel) = state.relationships.remove(&id) {
            state.pair_index.remove(&rel.pair_key());
        }
        Ok(true)
    }

    async fn find_by_id(
        &self,
        id: RelationshipId,
    ) -> Result<Option<Relationship>, RepositoryError> {
        Ok(self.state()?.relationships.get(&id).cloned())
    }

    async fn find_between(
        &self,
        a: UserId,
        b: UserId,
    ) -> Result<Option<Relationship>, RepositoryError> {
        let state = self.state()?;
        Ok(state
            .pair_index
            .get(&PairKey::new(a, b))
            .and_then(|id| state.relationships.get(id))
            .cloned())
    }

    async fn list_involving(
        &self,
        user_id: UserId,
        status: RelationshipStatus,
    ) -> Result<Vec<Relationship>, RepositoryError> {
        let state = self.state()?;
        let mut items: Vec<Relationship> = state
            .relationships
            .values()
            .filter(|rel| rel.status == status && rel.involves(user_id))
            .cloned()
            .collect();
        items.sort_by_key(|rel| rel.created_at);
        Ok(items)
    }

    async fn list_by_follower(
        &self,
        follower_id: UserId,
        status: RelationshipStatus,
    ) -> Result<Vec<Relationship>, RepositoryError> {
        let state = self.state()?;
        let mut items: Vec<Relationship> = state
            .relationships
            .values()
            .filter(|rel| rel.status == status && rel.follower_id == follower_id)
            .cloned()
            .collect();
        items.sort_by_key(|rel| rel.created_at);
        Ok(items)
    }

    async fn list_by_followed(
        &self,
        followed_id: UserId,
        status: RelationshipStatus,
    ) -> Result<Vec<Relationship>, RepositoryError> {
        let state = self.state()?;
        let mut items: Vec<Relationship> = state
            .relationships
            .values()
            .filter(|rel| rel.status == status && rel.followed_id == followed_id)
            .cloned()
            .collect();
        items.sort_by_key(|rel| rel.created_at);
        Ok(items)
    }
}

#[async_trait]
impl ChatMessageRepository for InMemoryStore {
    async fn insert(&self, message: ChatMessage) -> Result<ChatMessage, RepositoryError> {
        let mut state = self.state()?;
        if state.messages.iter().any(|m| m.id == message.id) {
            return Err(RepositoryError::conflict("chat_messages_pkey"));
        }
        state.messages.push(message.clone());
        Ok(message)
    }

    async fn insert_within_allowance(
        &self,
        message: ChatMessage,
        allowance: u32,
    ) -> Result<AllowanceInsert, RepositoryError> {
        let mut state = self.state()?;
        let sent = state
            .messages
            .iter()
            .filter(|m| m.sender_id == message.sender_id && m.receiver_id == message.receiver_id)
            .count() as u64;
        if sent >= u64::from(allowance) {
            return Ok(AllowanceInsert::Exhausted { sent });
        }
        if state.messages.iter().any(|m| m.id == message.id) {
            return Err(RepositoryError::conflict("chat_messages_pkey"));
        }
        state.messages.push(message.clone());
        Ok(AllowanceInsert::Stored(message))
    }

    async fn count_sent(&self, sender: UserId, receiver: UserId) -> Result<u64, RepositoryError> {
        Ok(self
            .state()?
            .messages
            .iter()
            .filter(|m| m.sender_id == sender && m.receiver_id == receiver)
            .count() as u64)
    }

    async fn count_thread(&self, pair: PairKey) -> Result<u64, RepositoryError> {
        Ok(self
            .state()?
            .messages
            .iter()
            .filter(|m| m.pair_key() == pair)
            .count() as u64)
    }

    async fn list_thread(&self, pair: PairKey) -> Result<Vec<ChatMessage>, RepositoryError> {
        let mut items: Vec<ChatMessage> = self
            .state()?
            .messages
            .iter()
            .filter(|m| m.pair_key() == pair)
            .cloned()
            .collect();
        // 稳定排序，同一时刻的消息保持插入顺序
        items.sort_by_key(|m| m.created_at);
        Ok(items)
    }

    async fn mark_read(&self, reader: UserId, ids: &[MessageId]) -> Result<u64, RepositoryError> {
        let wanted: HashSet<MessageId> = ids.iter().copied().collect();
        let mut state = self.state()?;
        let mut changed = 0;
        for message in state
            .messages
            .iter_mut()
            .filter(|m| m.receiver_id == reader && wanted.contains(&m.id))
        {
            if message.status == ChatMessageStatus::Unread && message.mark_read() {
                changed += 1;
            }
        }
        Ok(changed)
    }

    async fn claim_thread_milestone(
        &self,
        pair: PairKey,
        milestone: u64,
    ) -> Result<bool, RepositoryError> {
        Ok(self.state()?.milestones.insert((pair, milestone)))
    }
}

#[async_trait]
impl WaliContactRepository for InMemoryStore {
    async fn append(
        &self,
        record: WaliContactRecord,
    ) -> Result<WaliContactRecord, RepositoryError> {
        self.state()?.wali_contacts.push(record.clone());
        Ok(record)
    }

    async fn list_for_subject(
        &self,
        subject: UserId,
    ) -> Result<Vec<WaliContactRecord>, RepositoryError> {
        Ok(self
            .state()?
            .wali_contacts
            .iter()
            .filter(|c| c.subject_user_id == subject)
            .cloned()
            .collect())
    }
}

#[async_trait]
impl ActivityLogRepository for InMemoryStore {
    async fn append(&self, entry: ActivityLog) -> Result<(), RepositoryError> {
        self.state()?.activity_logs.push(entry);
        Ok(())
    }

    async fn list_for_user(&self, user_id: UserId) -> Result<Vec<ActivityLog>, RepositoryError> {
        Ok(self
            .state()?
            .activity_logs
            .iter()
            .filter(|l| l.user_id == user_id)
            .cloned()
            .collect())
    }
}

#[async_trait]
impl NotificationRepository for InMemoryStore {
    async fn insert(&self, notification: Notification) -> Result<Notification, RepositoryError> {
        self.state()?.notifications.push(notification.clone());
        Ok(notification)
    }

    async fn list_for_user(&self, user_id: UserId) -> Result<Vec<Notification>, RepositoryError> {
        Ok(self
            .state()?
            .notifications
            .iter()
            .filter(|n| n.user_id == user_id)
            .cloned()
            .collect())
    }
}

#[async_trait]
impl AccountPurgeStore for InMemoryStore {
    async fn purge_user(&self, user_id: UserId) -> Result<PurgeReport, RepositoryError> {
        let mut state = self.state()?;
        if !state.users.contains_key(&user_id) {
            return Err(RepositoryError::NotFound);
        }

        let mut draft = state.clone();
        let report = self.purge_in(&mut draft, user_id)?;
        *state = draft;
        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use domain::{ChatMessageType, Gender, MessageBody, Plan};

    fn user(name: &str, gender: Gender) -> User {
        User::new(
            UserId::generate(),
            name,
            EmailAddress::parse(format!("{name}@example.com")).unwrap(),
            gender,
            Plan::Freemium,
            Utc::now(),
        )
        .unwrap()
    }

    fn message(from: UserId, to: UserId, body: &str) -> ChatMessage {
        ChatMessage::new(
            MessageId::generate(),
            from,
            to,
            MessageBody::new(body).unwrap(),
            ChatMessageType::Text,
            Utc::now(),
        )
    }

    #[tokio::test]
    async fn pair_is_unique_in_either_direction() {
        let store = InMemoryStore::new();
        let (a, b) = (UserId::generate(), UserId::generate());
        let now = Utc::now();

        RelationshipRepository::insert(
            &store,
            Relationship::request(RelationshipId::generate(), a, b, now).unwrap(),
        )
        .await
        .unwrap();
        let err = RelationshipRepository::insert(
            &store,
            Relationship::request(RelationshipId::generate(), b, a, now).unwrap(),
        )
        .await
        .unwrap_err();

        assert!(err.is_conflict());
    }

    #[tokio::test]
    async fn conditional_update_detects_concurrent_change() {
        let store = InMemoryStore::new();
        let now = Utc::now();
        let (a, b) = (UserId::generate(), UserId::generate());
        let rel = Relationship::request(RelationshipId::generate(), a, b, now).unwrap();
        RelationshipRepository::insert(&store, rel.clone()).await.unwrap();

        let mut matched = rel.clone();
        matched.status = RelationshipStatus::Matched;
        store
            .update_if_status(matched.clone(), RelationshipStatus::Pending)
            .await
            .unwrap();

        let err = store
            .update_if_status(matched, RelationshipStatus::Pending)
            .await
            .unwrap_err();
        assert!(err.is_conflict());
        assert!(!store.delete_pending(rel.id).await.unwrap());
    }

    #[tokio::test]
    async fn mark_read_only_touches_reader_messages() {
        let store = InMemoryStore::new();
        let (a, b) = (UserId::generate(), UserId::generate());
        let to_b = message(a, b, "salam");
        let to_a = message(b, a, "wa alaykum");
        ChatMessageRepository::insert(&store, to_b.clone()).await.unwrap();
        ChatMessageRepository::insert(&store, to_a.clone()).await.unwrap();

        let changed = store.mark_read(b, &[to_b.id, to_a.id]).await.unwrap();
        assert_eq!(changed, 1);
        assert_eq!(store.mark_read(b, &[to_b.id]).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn allowance_is_counted_per_direction() {
        let store = InMemoryStore::new();
        let (a, b) = (UserId::generate(), UserId::generate());
        ChatMessageRepository::insert(&store, message(b, a, "salam"))
            .await
            .unwrap();

        for _ in 0..2 {
            let outcome = store
                .insert_within_allowance(message(a, b, "salam"), 2)
                .await
                .unwrap();
            assert!(matches!(outcome, AllowanceInsert::Stored(_)));
        }
        let outcome = store
            .insert_within_allowance(message(a, b, "one more"), 2)
            .await
            .unwrap();
        assert_eq!(outcome, AllowanceInsert::Exhausted { sent: 2 });
        assert_eq!(store.count_thread(PairKey::new(a, b)).await.unwrap(), 3);
    }

    #[tokio::test]
    async fn milestones_are_claimed_once() {
        let store = InMemoryStore::new();
        let pair = PairKey::new(UserId::generate(), UserId::generate());
        assert!(store.claim_thread_milestone(pair, 1).await.unwrap());
        assert!(!store.claim_thread_milestone(pair, 1).await.unwrap());
        assert!(store.claim_thread_milestone(pair, 2).await.unwrap());
    }

    #[tokio::test]
    async fn failed_purge_leaves_state_untouched() {
        let store = InMemoryStore::new();
        let alice = user("alice", Gender::Female);
        let mut bob = user("bob", Gender::Male);
        bob.favorite_users.push(alice.id);
        store.upsert_user(alice.clone()).unwrap();
        store.upsert_user(bob.clone()).unwrap();
        ChatMessageRepository::insert(&store, message(bob.id, alice.id, "hello"))
            .await
            .unwrap();
        store.add_payment(alice.id).unwrap();

        let before = store.snapshot().unwrap();
        store.inject_purge_failure(PurgeStep::UserReferences, 1);
        assert!(store.purge_user(alice.id).await.is_err());
        assert_eq!(store.snapshot().unwrap(), before);

        let report = store.purge_user(alice.id).await.unwrap();
        assert!(report.user_deleted);
        assert_eq!(report.messages, 1);
        assert_eq!(report.payments, 1);
        assert_eq!(report.users_scrubbed, 1);
        assert_eq!(store.snapshot().unwrap().count_references(alice.id), 0);
    }

    #[tokio::test]
    async fn duplicate_email_is_rejected() {
        let store = InMemoryStore::new();
        store.upsert_user(user("amina", Gender::Female)).unwrap();
        let mut clash = user("other", Gender::Female);
        clash.email = EmailAddress::parse("AMINA@example.com").unwrap();
        assert!(store.upsert_user(clash).unwrap_err().is_conflict());
    }
}

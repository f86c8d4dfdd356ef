use std::sync::Arc;

use domain::{
    CallEvent, CallMeta, ChatMessage, ChatMessageType, GuardianRecord, MessageBody, MessageId,
    PairKey, Plan, PlanLimits, PlanTable, Relationship, RelationshipId, User, UserId,
};
use serde::Serialize;
use serde_json::json;

use crate::{
    clock::Clock,
    error::{ApplicationError, ApplicationResult, PlanLimitKind},
    profile_cache::ProfileCache,
    push::{PushChannel, PushEvent},
    repository::{AllowanceInsert, ChatMessageRepository, RelationshipRepository, UserDirectory},
    services::compliance_notifier::ComplianceNotifier,
};

#[derive(Debug, Clone)]
pub struct SendMessageRequest {
    pub sender_id: UserId,
    pub receiver_id: UserId,
    pub body: String,
}

#[derive(Debug, Clone)]
pub struct VideoCallRequest {
    pub caller_id: UserId,
    pub recipient_id: UserId,
    pub meta: CallMeta,
}

/// 通过发送前检查后的额度快照
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SendPermit {
    pub relationship_id: RelationshipId,
    pub plan: Plan,
    pub limits: PlanLimits,
    pub sent_count: u64,
    pub words: usize,
}

impl SendPermit {
    /// 本条发送后剩余的条数
    pub fn remaining_after_send(&self) -> u64 {
        u64::from(self.limits.allowance).saturating_sub(self.sent_count + 1)
    }
}

/// 附带双方展示名的会话消息
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ThreadEntry {
    pub message: ChatMessage,
    pub sender_name: String,
    pub receiver_name: String,
}

pub struct MessagingServiceDependencies {
    pub user_directory: Arc<dyn UserDirectory>,
    pub relationship_repository: Arc<dyn RelationshipRepository>,
    pub message_repository: Arc<dyn ChatMessageRepository>,
    pub notifier: Arc<ComplianceNotifier>,
    pub profile_cache: Arc<ProfileCache>,
    pub push_channel: Arc<dyn PushChannel>,
    pub clock: Arc<dyn Clock>,
    pub plans: PlanTable,
}

/// 消息闸门：匹配关系、套餐额度、监护人信息全部满足才允许发送
pub struct MessagingService {
    deps: MessagingServiceDependencies,
}

impl MessagingService {
    pub fn new(deps: MessagingServiceDependencies) -> Self {
        Self { deps }
    }

    /// 只检查不写入
    pub async fn can_send(
        &self,
        sender_id: UserId,
        receiver_id: UserId,
        body: &str,
    ) -> ApplicationResult<SendPermit> {
        let body = MessageBody::new(body)?;
        self.check_send(sender_id, receiver_id, &body).await
    }

    pub async fn send(&self, request: SendMessageRequest) -> ApplicationResult<ChatMessage> {
        let body = MessageBody::new(request.body)?;
        let permit = self
            .check_send(request.sender_id, request.receiver_id, &body)
            .await?;

        let message = ChatMessage::new(
            MessageId::generate(),
            request.sender_id,
            request.receiver_id,
            body,
            ChatMessageType::Text,
            self.deps.clock.now(),
        );
        // 检查阶段的条数只是快照，最终以存储层的原子写入为准
        let stored = match self
            .deps
            .message_repository
            .insert_within_allowance(message, permit.limits.allowance)
            .await?
        {
            AllowanceInsert::Stored(stored) => stored,
            AllowanceInsert::Exhausted { sent } => {
                tracing::info!(
                    sender_id = %request.sender_id,
                    receiver_id = %request.receiver_id,
                    sent,
                    "并发发送已用尽额度"
                );
                return Err(ApplicationError::PlanExceeded(PlanLimitKind::Allowance {
                    sent,
                    allowance: permit.limits.allowance,
                }));
            }
        };

        tracing::info!(
            message_id = %stored.id,
            sender_id = %stored.sender_id,
            receiver_id = %stored.receiver_id,
            remaining = permit.remaining_after_send(),
            "消息已发送"
        );

        self.spawn_thread_notification(stored.sender_id, stored.receiver_id);
        self.push(
            stored.receiver_id,
            "new_message",
            json!({ "message": &stored }),
        )
        .await;

        Ok(stored)
    }

    /// 只标记发给 `reader_id` 的消息
    pub async fn mark_read(
        &self,
        reader_id: UserId,
        message_ids: &[MessageId],
    ) -> ApplicationResult<u64> {
        if message_ids.is_empty() {
            return Ok(0);
        }
        let changed = self
            .deps
            .message_repository
            .mark_read(reader_id, message_ids)
            .await?;
        tracing::debug!(reader_id = %reader_id, changed, "消息已读");
        Ok(changed)
    }

    pub async fn get_thread(
        &self,
        user_id: UserId,
        other_id: UserId,
    ) -> ApplicationResult<Vec<ThreadEntry>> {
        self.require_match(user_id, other_id).await?;

        let messages = self
            .deps
            .message_repository
            .list_thread(PairKey::new(user_id, other_id))
            .await?;
        let user_name = self.deps.profile_cache.display_name(user_id).await?;
        let other_name = self.deps.profile_cache.display_name(other_id).await?;

        Ok(messages
            .into_iter()
            .map(|message| {
                let (sender_name, receiver_name) = if message.sender_id == user_id {
                    (user_name.clone(), other_name.clone())
                } else {
                    (other_name.clone(), user_name.clone())
                };
                ThreadEntry {
                    message,
                    sender_name,
                    receiver_name,
                }
            })
            .collect())
    }

    /// 记录邀请消息并通知双方监护人
    pub async fn invite_video_call(
        &self,
        request: VideoCallRequest,
    ) -> ApplicationResult<ChatMessage> {
        let VideoCallRequest {
            caller_id,
            recipient_id,
            mut meta,
        } = request;

        if meta.call_id.trim().is_empty() {
            return Err(ApplicationError::validation("call_id", "cannot be empty"));
        }
        self.require_match(caller_id, recipient_id).await?;
        let caller = self.require_user(caller_id).await?;

        if !self.deps.plans.limits(caller.plan).video_call {
            return Err(ApplicationError::PlanExceeded(PlanLimitKind::VideoCall));
        }
        ensure_guardian_on_file(&caller)?;

        let body = MessageBody::new(format!("Video call invitation ({})", meta.call_id))?;
        let message = ChatMessage::new(
            MessageId::generate(),
            caller_id,
            recipient_id,
            body,
            ChatMessageType::VideoCallInvitation,
            self.deps.clock.now(),
        );
        let stored = self.deps.message_repository.insert(message).await?;

        meta.event = CallEvent::Started;
        tracing::info!(call_id = %meta.call_id, caller_id = %caller_id, "视频通话邀请已发送");

        // 邀请消息同样计入会话条数
        self.spawn_thread_notification(caller_id, recipient_id);
        self.spawn_call_notification(caller_id, recipient_id, meta.clone());
        self.push(
            recipient_id,
            "video_call_invitation",
            json!({ "message": &stored, "call": &meta }),
        )
        .await;

        Ok(stored)
    }

    /// 通话结束只负责通知，不做任何阻断
    pub async fn end_video_call(&self, request: VideoCallRequest) {
        let VideoCallRequest {
            caller_id,
            recipient_id,
            mut meta,
        } = request;
        meta.event = CallEvent::Ended;

        tracing::info!(
            call_id = %meta.call_id,
            duration_secs = ?meta.duration_secs,
            "视频通话已结束"
        );
        self.spawn_call_notification(caller_id, recipient_id, meta.clone());
        self.push(recipient_id, "video_call_ended", json!({ "call": &meta }))
            .await;
    }

    async fn check_send(
        &self,
        sender_id: UserId,
        receiver_id: UserId,
        body: &MessageBody,
    ) -> ApplicationResult<SendPermit> {
        let sender = self.require_user(sender_id).await?;
        let relationship = self.require_match(sender_id, receiver_id).await?;

        let limits = self.deps.plans.limits(sender.plan);
        let sent_count = self
            .deps
            .message_repository
            .count_sent(sender_id, receiver_id)
            .await?;
        if limits.allowance_exhausted(sent_count) {
            return Err(ApplicationError::PlanExceeded(PlanLimitKind::Allowance {
                sent: sent_count,
                allowance: limits.allowance,
            }));
        }

        let words = body.words();
        if limits.word_limit_reached(words) {
            return Err(ApplicationError::PlanExceeded(PlanLimitKind::WordLimit {
                words,
                word_limit: limits.word_limit,
            }));
        }

        ensure_guardian_on_file(&sender)?;

        Ok(SendPermit {
            relationship_id: relationship.id,
            plan: sender.plan,
            limits,
            sent_count,
            words,
        })
    }

    async fn require_user(&self, user_id: UserId) -> ApplicationResult<User> {
        self.deps
            .user_directory
            .find_by_id(user_id)
            .await?
            .ok_or_else(|| ApplicationError::not_found("user", user_id))
    }

    async fn require_match(&self, a: UserId, b: UserId) -> ApplicationResult<Relationship> {
        self.deps
            .relationship_repository
            .find_between(a, b)
            .await?
            .filter(Relationship::is_matched)
            .ok_or(ApplicationError::NotMatched)
    }

    fn spawn_thread_notification(&self, sender_id: UserId, receiver_id: UserId) {
        let repository = self.deps.message_repository.clone();
        let notifier = self.deps.notifier.clone();
        tokio::spawn(async move {
            match repository
                .count_thread(PairKey::new(sender_id, receiver_id))
                .await
            {
                Ok(total) => {
                    notifier.maybe_notify(sender_id, receiver_id, total).await;
                }
                Err(err) => tracing::warn!(error = %err, "统计会话消息数失败"),
            }
        });
    }

    fn spawn_call_notification(&self, caller_id: UserId, recipient_id: UserId, meta: CallMeta) {
        let notifier = self.deps.notifier.clone();
        tokio::spawn(async move {
            notifier
                .notify_video_call_guardians(caller_id, recipient_id, &meta)
                .await;
        });
    }

    async fn push(&self, recipient: UserId, event: &str, payload: serde_json::Value) {
        if let Err(err) = self
            .deps
            .push_channel
            .emit(PushEvent::new(recipient, event, payload))
            .await
        {
            tracing::warn!(recipient = %recipient, event, error = %err, "推送失败");
        }
    }
}

/// 女性用户必须登记可用的 wali 邮箱
fn ensure_guardian_on_file(user: &User) -> ApplicationResult<()> {
    if !user.is_female() {
        return Ok(());
    }
    match &user.wali {
        GuardianRecord::Missing => Err(ApplicationError::WaliRequired),
        GuardianRecord::Malformed { reason } => {
            Err(ApplicationError::MalformedWaliJson(reason.clone()))
        }
        GuardianRecord::Provided(details) if details.email().is_none() => {
            Err(ApplicationError::WaliEmailRequired)
        }
        GuardianRecord::Provided(_) => Ok(()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use domain::{EmailAddress, Gender, WaliDetails};

    fn female(wali: GuardianRecord) -> User {
        let mut user = User::new(
            UserId::generate(),
            "amina",
            EmailAddress::parse("amina@example.com").unwrap(),
            Gender::Female,
            Plan::Freemium,
            Utc::now(),
        )
        .unwrap();
        user.wali = wali;
        user
    }

    #[test]
    fn guardian_states_map_to_distinct_errors() {
        assert!(matches!(
            ensure_guardian_on_file(&female(GuardianRecord::Missing)),
            Err(ApplicationError::WaliRequired)
        ));
        assert!(matches!(
            ensure_guardian_on_file(&female(GuardianRecord::Malformed {
                reason: "eof".into()
            })),
            Err(ApplicationError::MalformedWaliJson(_))
        ));
        assert!(matches!(
            ensure_guardian_on_file(&female(GuardianRecord::Provided(WaliDetails {
                name: Some("Yusuf".into()),
                ..WaliDetails::default()
            }))),
            Err(ApplicationError::WaliEmailRequired)
        ));
        assert!(ensure_guardian_on_file(&female(GuardianRecord::Provided(WaliDetails {
            email: Some("yusuf@example.com".into()),
            ..WaliDetails::default()
        })))
        .is_ok());
    }

    #[test]
    fn remaining_never_underflows() {
        let permit = SendPermit {
            relationship_id: RelationshipId::generate(),
            plan: Plan::Freemium,
            limits: PlanTable::default().limits(Plan::Freemium),
            sent_count: 10,
            words: 1,
        };
        assert_eq!(permit.remaining_after_send(), 0);
    }
}

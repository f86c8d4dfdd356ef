use std::collections::HashMap;
use std::sync::Arc;

use domain::{
    ActivityAction, ActivityLog, Decision, Gender, Notification, NotificationKind, Plan,
    Relationship, RelationshipId, RelationshipStatus, RepositoryError, User, UserId,
};
use serde::Serialize;
use serde_json::json;

use crate::{
    clock::Clock,
    error::{ApplicationError, ApplicationResult},
    push::{PushChannel, PushEvent},
    repository::{
        ActivityLogRepository, NotificationRepository, RelationshipRepository, UserDirectory,
    },
};

/// 关系列表中对方的公开信息
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct UserSummary {
    pub id: UserId,
    pub username: String,
    pub display_name: String,
    pub gender: Gender,
    pub plan: Plan,
}

impl From<&User> for UserSummary {
    fn from(user: &User) -> Self {
        Self {
            id: user.id,
            username: user.username.clone(),
            display_name: user.display_label().to_string(),
            gender: user.gender,
            plan: user.plan,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RelationshipView {
    pub relationship: Relationship,
    pub counterpart: UserSummary,
}

pub struct RelationshipServiceDependencies {
    pub user_directory: Arc<dyn UserDirectory>,
    pub relationship_repository: Arc<dyn RelationshipRepository>,
    pub activity_repository: Arc<dyn ActivityLogRepository>,
    pub notification_repository: Arc<dyn NotificationRepository>,
    pub push_channel: Arc<dyn PushChannel>,
    pub clock: Arc<dyn Clock>,
}

/// 匹配关系状态机：pending -> matched | rejected，pending 可被发起方撤回
pub struct RelationshipService {
    deps: RelationshipServiceDependencies,
}

impl RelationshipService {
    pub fn new(deps: RelationshipServiceDependencies) -> Self {
        Self { deps }
    }

    pub async fn send_request(
        &self,
        follower_id: UserId,
        followed_id: UserId,
    ) -> ApplicationResult<Relationship> {
        let now = self.deps.clock.now();
        let relationship =
            Relationship::request(RelationshipId::generate(), follower_id, followed_id, now)?;

        let follower = self.require_user(follower_id).await?;
        self.require_user(followed_id).await?;

        if let Some(existing) = self
            .deps
            .relationship_repository
            .find_between(follower_id, followed_id)
            .await?
        {
            return Err(ApplicationError::DuplicateRelationship {
                status: existing.status,
            });
        }

        let stored = match self.deps.relationship_repository.insert(relationship).await {
            Ok(stored) => stored,
            Err(err) if err.is_conflict() => {
                // 并发请求抢先写入
                let status = self
                    .deps
                    .relationship_repository
                    .find_between(follower_id, followed_id)
                    .await?
                    .map(|existing| existing.status)
                    .unwrap_or(RelationshipStatus::Pending);
                return Err(ApplicationError::DuplicateRelationship { status });
            }
            Err(err) => return Err(err.into()),
        };

        tracing::info!(
            relationship_id = %stored.id,
            follower_id = %follower_id,
            followed_id = %followed_id,
            "匹配请求已创建"
        );

        self.record_activity(follower_id, followed_id, ActivityAction::RequestSent)
            .await;
        self.notify(followed_id, &follower, NotificationKind::MatchRequest, &stored)
            .await;

        Ok(stored)
    }

    pub async fn respond(
        &self,
        relationship_id: RelationshipId,
        acting_user_id: UserId,
        decision: Decision,
    ) -> ApplicationResult<Relationship> {
        let mut relationship = self.require_relationship(relationship_id).await?;
        relationship.respond(acting_user_id, decision, self.deps.clock.now())?;

        let updated = match self
            .deps
            .relationship_repository
            .update_if_status(relationship, RelationshipStatus::Pending)
            .await
        {
            Ok(updated) => updated,
            Err(RepositoryError::NotFound) => {
                return Err(ApplicationError::not_found("relationship", relationship_id))
            }
            Err(err) if err.is_conflict() => {
                return Err(self.lost_race(relationship_id, "respond to").await)
            }
            Err(err) => return Err(err.into()),
        };

        tracing::info!(
            relationship_id = %updated.id,
            status = %updated.status,
            "匹配请求已处理"
        );

        let (action, kind) = match decision {
            Decision::Accept => (ActivityAction::Matched, NotificationKind::MatchAccepted),
            Decision::Reject => (ActivityAction::Rejected, NotificationKind::MatchRejected),
        };
        self.record_activity(acting_user_id, updated.follower_id, action)
            .await;
        if let Some(actor) = self.actor(acting_user_id).await {
            self.notify(updated.follower_id, &actor, kind, &updated).await;
        }

        Ok(updated)
    }

    pub async fn withdraw(
        &self,
        relationship_id: RelationshipId,
        acting_user_id: UserId,
    ) -> ApplicationResult<()> {
        let relationship = self.require_relationship(relationship_id).await?;
        relationship.ensure_withdrawable(acting_user_id)?;

        let deleted = self
            .deps
            .relationship_repository
            .delete_pending(relationship_id)
            .await?;
        if !deleted {
            return Err(self.lost_race(relationship_id, "withdraw").await);
        }

        tracing::info!(relationship_id = %relationship_id, "匹配请求已撤回");

        self.record_activity(
            acting_user_id,
            relationship.followed_id,
            ActivityAction::Withdrew,
        )
        .await;
        if let Some(actor) = self.actor(acting_user_id).await {
            self.notify(
                relationship.followed_id,
                &actor,
                NotificationKind::RequestWithdrawn,
                &relationship,
            )
            .await;
        }

        Ok(())
    }

    /// 已匹配且性别相对的关系
    ///
    /// 性别过滤只在读取时生效，底层状态不受影响。
    pub async fn get_matches(&self, user_id: UserId) -> ApplicationResult<Vec<RelationshipView>> {
        let user = self.require_user(user_id).await?;
        let relationships = self
            .deps
            .relationship_repository
            .list_involving(user_id, RelationshipStatus::Matched)
            .await?;
        let wanted = user.gender.opposite();

        let views = self.attach_counterparts(user_id, relationships).await?;
        Ok(views
            .into_iter()
            .filter(|view| view.counterpart.gender == wanted)
            .collect())
    }

    /// 发给该用户、等待处理的请求
    pub async fn get_pending(&self, user_id: UserId) -> ApplicationResult<Vec<RelationshipView>> {
        let relationships = self
            .deps
            .relationship_repository
            .list_by_followed(user_id, RelationshipStatus::Pending)
            .await?;
        self.attach_counterparts(user_id, relationships).await
    }

    /// 该用户发出、尚未处理的请求
    pub async fn get_sent(&self, user_id: UserId) -> ApplicationResult<Vec<RelationshipView>> {
        let relationships = self
            .deps
            .relationship_repository
            .list_by_follower(user_id, RelationshipStatus::Pending)
            .await?;
        self.attach_counterparts(user_id, relationships).await
    }

    async fn attach_counterparts(
        &self,
        user_id: UserId,
        relationships: Vec<Relationship>,
    ) -> ApplicationResult<Vec<RelationshipView>> {
        let ids: Vec<UserId> = relationships
            .iter()
            .map(|rel| rel.counterpart(user_id))
            .collect();
        let users: HashMap<UserId, User> = self
            .deps
            .user_directory
            .find_many(&ids)
            .await?
            .into_iter()
            .map(|user| (user.id, user))
            .collect();

        // 对方已被删除的关系直接跳过
        Ok(relationships
            .into_iter()
            .filter_map(|relationship| {
                let counterpart = users.get(&relationship.counterpart(user_id))?;
                Some(RelationshipView {
                    counterpart: UserSummary::from(counterpart),
                    relationship,
                })
            })
            .collect())
    }

    async fn require_user(&self, user_id: UserId) -> ApplicationResult<User> {
        self.deps
            .user_directory
            .find_by_id(user_id)
            .await?
            .ok_or_else(|| ApplicationError::not_found("user", user_id))
    }

    async fn require_relationship(
        &self,
        relationship_id: RelationshipId,
    ) -> ApplicationResult<Relationship> {
        self.deps
            .relationship_repository
            .find_by_id(relationship_id)
            .await?
            .ok_or_else(|| ApplicationError::not_found("relationship", relationship_id))
    }

    /// 条件写入失败后重新读取，给出准确的错误
    async fn lost_race(
        &self,
        relationship_id: RelationshipId,
        action: &'static str,
    ) -> ApplicationError {
        match self
            .deps
            .relationship_repository
            .find_by_id(relationship_id)
            .await
        {
            Ok(Some(current)) => ApplicationError::InvalidStateTransition {
                from: current.status,
                action,
            },
            Ok(None) => ApplicationError::not_found("relationship", relationship_id),
            Err(err) => err.into(),
        }
    }

    async fn actor(&self, user_id: UserId) -> Option<User> {
        match self.deps.user_directory.find_by_id(user_id).await {
            Ok(user) => user,
            Err(err) => {
                tracing::warn!(user_id = %user_id, error = %err, "读取通知发起人失败");
                None
            }
        }
    }

    async fn record_activity(&self, user_id: UserId, target: UserId, action: ActivityAction) {
        let entry = ActivityLog::record(user_id, Some(target), action, self.deps.clock.now());
        if let Err(err) = self.deps.activity_repository.append(entry).await {
            tracing::warn!(
                user_id = %user_id,
                action = action.as_str(),
                error = %err,
                "写入活动日志失败"
            );
        }
    }

    async fn notify(
        &self,
        recipient: UserId,
        actor: &User,
        kind: NotificationKind,
        relationship: &Relationship,
    ) {
        let message = kind.default_message(actor.display_label());
        let notification = Notification::new(
            recipient,
            actor.id,
            kind,
            message.clone(),
            self.deps.clock.now(),
        );

        if let Err(err) = self
            .deps
            .notification_repository
            .insert(notification)
            .await
        {
            tracing::warn!(recipient = %recipient, kind = kind.as_str(), error = %err, "保存通知失败");
        }

        let event = PushEvent::new(
            recipient,
            kind.as_str(),
            json!({
                "relationship_id": relationship.id,
                "actor_id": actor.id,
                "status": relationship.status,
                "message": message,
            }),
        );
        if let Err(err) = self.deps.push_channel.emit(event).await {
            tracing::warn!(recipient = %recipient, kind = kind.as_str(), error = %err, "推送通知失败");
        }
    }
}

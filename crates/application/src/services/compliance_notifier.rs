//! 监护人（wali）合规通知
//!
//! 所有邮件只入队不等待，任何投递失败都不会影响聊天或通话本身。

use std::sync::Arc;

use domain::{
    ActivityAction, ActivityLog, CallEvent, CallMeta, EmailAddress, PairKey, User, UserId,
    WaliContactRecord,
};

use crate::{
    clock::Clock,
    email::{EmailQueue, OutboundEmail},
    error::{ApplicationError, ApplicationResult},
    repository::{
        ActivityLogRepository, ChatMessageRepository, UserDirectory, WaliContactRepository,
    },
};

/// 每累计多少条消息通知一次监护人
pub const THREAD_NOTIFY_EVERY: u64 = 5;

const MAX_CONTACT_NOTE_CHARS: usize = 2000;

#[derive(Debug, Clone)]
pub struct ContactWaliRequest {
    pub requester_id: UserId,
    pub target_user_id: UserId,
    pub message: String,
}

pub struct ComplianceNotifierDependencies {
    pub user_directory: Arc<dyn UserDirectory>,
    pub message_repository: Arc<dyn ChatMessageRepository>,
    pub wali_contact_repository: Arc<dyn WaliContactRepository>,
    pub activity_repository: Arc<dyn ActivityLogRepository>,
    pub email_queue: EmailQueue,
    pub clock: Arc<dyn Clock>,
}

pub struct ComplianceNotifier {
    deps: ComplianceNotifierDependencies,
}

/// 某个用户需要抄送的监护人地址
///
/// 家长邮箱与本人邮箱相同时忽略；女性用户额外包含 wali 邮箱，结果去重。
pub fn guardian_recipients(user: &User) -> Vec<EmailAddress> {
    let mut recipients: Vec<EmailAddress> = Vec::new();

    if let Some(parent) = &user.parent_email {
        if !parent.same_mailbox(user.email.as_str()) {
            recipients.push(parent.clone());
        }
    }

    if user.is_female() {
        if let Some(wali) = user.wali.details().and_then(|d| d.deliverable_email()) {
            if !recipients.iter().any(|r| r.same_mailbox(wali.as_str())) {
                recipients.push(wali);
            }
        }
    }

    recipients
}

impl ComplianceNotifier {
    pub fn new(deps: ComplianceNotifierDependencies) -> Self {
        Self { deps }
    }

    /// 会话总数每跨过一个 5 的倍数，向双方监护人各发一次通知。
    ///
    /// 里程碑通过存储认领，并发调用只有一方会真正入队；计数跳过的里程碑会向下补发，
    /// 遇到已认领的里程碑即停止。返回入队邮件数。
    pub async fn maybe_notify(&self, user_a: UserId, user_b: UserId, total_count: u64) -> usize {
        let latest = total_count / THREAD_NOTIFY_EVERY;
        if latest == 0 {
            return 0;
        }

        let pair = PairKey::new(user_a, user_b);
        let mut claimed = Vec::new();
        for milestone in (1..=latest).rev() {
            match self
                .deps
                .message_repository
                .claim_thread_milestone(pair, milestone)
                .await
            {
                Ok(true) => claimed.push(milestone),
                Ok(false) => break,
                Err(err) => {
                    tracing::warn!(pair = %pair, milestone, error = %err, "认领会话里程碑失败");
                    break;
                }
            }
        }
        if claimed.is_empty() {
            tracing::debug!(pair = %pair, total_count, "里程碑已通知过，跳过");
            return 0;
        }

        let Some((a, b)) = self.load_pair(user_a, user_b).await else {
            return 0;
        };

        let mut queued = 0;
        for milestone in claimed.into_iter().rev() {
            let reached = milestone * THREAD_NOTIFY_EVERY;
            for (subject, other) in [(&a, &b), (&b, &a)] {
                for to in guardian_recipients(subject) {
                    let email = thread_milestone_email(to, subject, other, reached);
                    if self.deps.email_queue.enqueue(email) {
                        queued += 1;
                    }
                }
            }
            tracing::info!(pair = %pair, milestone = reached, "会话里程碑通知已入队");
        }

        queued
    }

    /// 通话开始或结束时通知双方监护人，返回入队邮件数
    pub async fn notify_video_call_guardians(
        &self,
        caller_id: UserId,
        recipient_id: UserId,
        meta: &CallMeta,
    ) -> usize {
        let Some((caller, recipient)) = self.load_pair(caller_id, recipient_id).await else {
            return 0;
        };

        let mut queued = 0;
        for (subject, other) in [(&caller, &recipient), (&recipient, &caller)] {
            for to in guardian_recipients(subject) {
                let email = video_call_email(to, subject, other, meta);
                if self.deps.email_queue.enqueue(email) {
                    queued += 1;
                }
            }
        }

        tracing::info!(
            call_id = %meta.call_id,
            event = meta.event.as_str(),
            queued,
            "通话监护通知已入队"
        );
        queued
    }

    /// 代表请求方联系目标用户的 wali
    ///
    /// 先写审计记录，再入队邮件。
    pub async fn contact_wali(
        &self,
        request: ContactWaliRequest,
    ) -> ApplicationResult<WaliContactRecord> {
        let note = request.message.trim();
        if note.chars().count() > MAX_CONTACT_NOTE_CHARS {
            return Err(ApplicationError::validation(
                "message",
                format!("must be at most {MAX_CONTACT_NOTE_CHARS} characters"),
            ));
        }

        let requester = self
            .deps
            .user_directory
            .find_by_id(request.requester_id)
            .await?
            .ok_or_else(|| ApplicationError::not_found("user", request.requester_id))?;
        let target = self
            .deps
            .user_directory
            .find_by_id(request.target_user_id)
            .await?
            .ok_or_else(|| ApplicationError::not_found("user", request.target_user_id))?;

        if !target.is_female() {
            return Err(ApplicationError::AbsentWaliDetails);
        }
        let wali_email = target
            .wali
            .details()
            .and_then(|d| d.deliverable_email())
            .ok_or(ApplicationError::AbsentWaliDetails)?;

        let now = self.deps.clock.now();
        let record = self
            .deps
            .wali_contact_repository
            .append(WaliContactRecord::new(
                target.id,
                wali_email.clone(),
                requester.id,
                note,
                now,
            ))
            .await?;

        let entry = ActivityLog::record(
            requester.id,
            Some(target.id),
            ActivityAction::WaliContacted,
            now,
        );
        if let Err(err) = self.deps.activity_repository.append(entry).await {
            tracing::warn!(requester_id = %requester.id, error = %err, "写入活动日志失败");
        }

        self.deps
            .email_queue
            .enqueue(wali_contact_email(wali_email, &requester, &target, note));

        tracing::info!(
            requester_id = %requester.id,
            target_user_id = %target.id,
            contact_id = %record.id,
            "已联系 wali"
        );
        Ok(record)
    }

    async fn load_pair(&self, a: UserId, b: UserId) -> Option<(User, User)> {
        let users = match self.deps.user_directory.find_many(&[a, b]).await {
            Ok(users) => users,
            Err(err) => {
                tracing::warn!(error = %err, "读取通知对象失败");
                return None;
            }
        };
        let first = users.iter().find(|u| u.id == a)?.clone();
        let second = users.iter().find(|u| u.id == b)?.clone();
        Some((first, second))
    }
}

/// 转义写入邮件正文的用户文本
fn escape_html(text: &str) -> String {
    let mut escaped = String::with_capacity(text.len());
    for ch in text.chars() {
        match ch {
            '&' => escaped.push_str("&amp;"),
            '<' => escaped.push_str("&lt;"),
            '>' => escaped.push_str("&gt;"),
            '"' => escaped.push_str("&quot;"),
            '\'' => escaped.push_str("&#39;"),
            other => escaped.push(other),
        }
    }
    escaped
}

fn thread_milestone_email(
    to: EmailAddress,
    subject: &User,
    other: &User,
    reached: u64,
) -> OutboundEmail {
    OutboundEmail {
        to,
        subject: format!("Conversation update for {}", subject.display_label()),
        html: format!(
            "<p>{} and {} have now exchanged {} messages.</p>",
            escape_html(subject.display_label()),
            escape_html(other.display_label()),
            reached
        ),
    }
}

fn video_call_email(
    to: EmailAddress,
    subject: &User,
    other: &User,
    meta: &CallMeta,
) -> OutboundEmail {
    let (headline, detail) = match meta.event {
        CallEvent::Started => (
            "Video call started",
            format!(
                "{} started a video call with {} at {}.",
                escape_html(subject.display_label()),
                escape_html(other.display_label()),
                meta.at.to_rfc3339()
            ),
        ),
        CallEvent::Ended => (
            "Video call ended",
            format!(
                "The video call between {} and {} ended at {}{}.",
                escape_html(subject.display_label()),
                escape_html(other.display_label()),
                meta.at.to_rfc3339(),
                meta.duration_secs
                    .map(|secs| format!(" after {secs} seconds"))
                    .unwrap_or_default()
            ),
        ),
    };

    OutboundEmail {
        to,
        subject: format!("{headline} ({})", subject.display_label()),
        html: format!(
            "<p>{detail}</p><p>Call reference: {}</p>",
            escape_html(&meta.call_id)
        ),
    }
}

fn wali_contact_email(
    to: EmailAddress,
    requester: &User,
    target: &User,
    note: &str,
) -> OutboundEmail {
    let note = if note.is_empty() {
        String::new()
    } else {
        format!("<blockquote>{}</blockquote>", escape_html(note))
    };
    OutboundEmail {
        to,
        subject: format!("{} would like to get in touch", requester.display_label()),
        html: format!(
            "<p>{} has asked to contact you as the guardian of {}.</p>{}",
            escape_html(requester.display_label()),
            escape_html(target.display_label()),
            note
        ),
    }
}

//! 站内通知实体

use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::errors::DomainError;
use crate::value_objects::{NotificationId, Timestamp, UserId};

/// 通知类型
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NotificationKind {
    MatchRequest,
    MatchAccepted,
    MatchRejected,
    RequestWithdrawn,
}

impl NotificationKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            NotificationKind::MatchRequest => "match_request",
            NotificationKind::MatchAccepted => "match_accepted",
            NotificationKind::MatchRejected => "match_rejected",
            NotificationKind::RequestWithdrawn => "request_withdrawn",
        }
    }

    /// 默认文案
    pub fn default_message(&self, actor: &str) -> String {
        match self {
            NotificationKind::MatchRequest => format!("{actor} sent you a match request"),
            NotificationKind::MatchAccepted => format!("{actor} accepted your match request"),
            NotificationKind::MatchRejected => format!("{actor} declined your match request"),
            NotificationKind::RequestWithdrawn => format!("{actor} withdrew their match request"),
        }
    }
}

impl FromStr for NotificationKind {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "match_request" => Ok(NotificationKind::MatchRequest),
            "match_accepted" => Ok(NotificationKind::MatchAccepted),
            "match_rejected" => Ok(NotificationKind::MatchRejected),
            "request_withdrawn" => Ok(NotificationKind::RequestWithdrawn),
            other => Err(DomainError::invalid_argument(
                "kind",
                format!("unknown notification kind '{other}'"),
            )),
        }
    }
}

/// 站内通知
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Notification {
    pub id: NotificationId,
    pub user_id: UserId,
    pub actor_id: UserId,
    pub kind: NotificationKind,
    pub message: String,
    pub is_read: bool,
    pub created_at: Timestamp,
}

impl Notification {
    pub fn new(
        user_id: UserId,
        actor_id: UserId,
        kind: NotificationKind,
        message: impl Into<String>,
        created_at: Timestamp,
    ) -> Self {
        Self {
            id: NotificationId::generate(),
            user_id,
            actor_id,
            kind,
            message: message.into(),
            is_read: false,
            created_at,
        }
    }

    pub fn involves(&self, user_id: UserId) -> bool {
        self.user_id == user_id || self.actor_id == user_id
    }
}

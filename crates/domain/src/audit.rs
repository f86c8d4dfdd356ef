//! 审计类记录：监护人联系记录与活动日志，只追加不修改。

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::errors::DomainError;
use crate::value_objects::{ActivityLogId, EmailAddress, Timestamp, UserId, WaliContactId};

/// 监护人联系审计记录
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WaliContactRecord {
    pub id: WaliContactId,
    pub subject_user_id: UserId,
    pub wali_email: EmailAddress,
    pub contacted_by_user_id: UserId,
    pub message: String,
    pub created_at: Timestamp,
}

impl WaliContactRecord {
    pub fn new(
        subject_user_id: UserId,
        wali_email: EmailAddress,
        contacted_by_user_id: UserId,
        message: impl Into<String>,
        created_at: Timestamp,
    ) -> Self {
        Self {
            id: WaliContactId::generate(),
            subject_user_id,
            wali_email,
            contacted_by_user_id,
            message: message.into(),
            created_at,
        }
    }
}

/// 活动类型
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ActivityAction {
    RequestSent,
    Matched,
    Rejected,
    Withdrew,
    WaliContacted,
}

impl ActivityAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            ActivityAction::RequestSent => "REQUEST_SENT",
            ActivityAction::Matched => "MATCHED",
            ActivityAction::Rejected => "REJECTED",
            ActivityAction::Withdrew => "WITHDREW",
            ActivityAction::WaliContacted => "WALI_CONTACTED",
        }
    }
}

impl fmt::Display for ActivityAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ActivityAction {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "REQUEST_SENT" => Ok(ActivityAction::RequestSent),
            "MATCHED" => Ok(ActivityAction::Matched),
            "REJECTED" => Ok(ActivityAction::Rejected),
            "WITHDREW" => Ok(ActivityAction::Withdrew),
            "WALI_CONTACTED" => Ok(ActivityAction::WaliContacted),
            other => Err(DomainError::invalid_argument(
                "action",
                format!("unknown activity '{other}'"),
            )),
        }
    }
}

/// 活动日志
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActivityLog {
    pub id: ActivityLogId,
    pub user_id: UserId,
    pub target_user_id: Option<UserId>,
    pub action: ActivityAction,
    pub created_at: Timestamp,
}

impl ActivityLog {
    pub fn record(
        user_id: UserId,
        target_user_id: Option<UserId>,
        action: ActivityAction,
        created_at: Timestamp,
    ) -> Self {
        Self {
            id: ActivityLogId::generate(),
            user_id,
            target_user_id,
            action,
            created_at,
        }
    }

    pub fn involves(&self, user_id: UserId) -> bool {
        self.user_id == user_id || self.target_user_id == Some(user_id)
    }
}

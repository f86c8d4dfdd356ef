//! 匹配关系实体与状态机
//!
//! 状态：`pending -> matched | rejected`；`matched`、`rejected` 为终态。
//! 撤回与账户清除直接删除记录，不经过状态字段。

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::errors::{DomainError, DomainResult};
use crate::value_objects::{PairKey, RelationshipId, Timestamp, UserId};

/// 匹配关系状态
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RelationshipStatus {
    Pending,
    Matched,
    Rejected,
}

impl RelationshipStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            RelationshipStatus::Pending => "pending",
            RelationshipStatus::Matched => "matched",
            RelationshipStatus::Rejected => "rejected",
        }
    }
}

impl fmt::Display for RelationshipStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for RelationshipStatus {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(RelationshipStatus::Pending),
            "matched" => Ok(RelationshipStatus::Matched),
            "rejected" => Ok(RelationshipStatus::Rejected),
            other => Err(DomainError::invalid_argument(
                "status",
                format!("unknown relationship status '{other}'"),
            )),
        }
    }
}

/// 被请求方对匹配请求的决定
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Decision {
    Accept,
    Reject,
}

impl Decision {
    pub fn target_status(self) -> RelationshipStatus {
        match self {
            Decision::Accept => RelationshipStatus::Matched,
            Decision::Reject => RelationshipStatus::Rejected,
        }
    }
}

/// 匹配关系实体
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Relationship {
    pub id: RelationshipId,
    pub follower_id: UserId,
    pub followed_id: UserId,
    pub status: RelationshipStatus,
    pub created_at: Timestamp,
    pub updated_at: Timestamp,
}

impl Relationship {
    /// 发起新的匹配请求
    pub fn request(
        id: RelationshipId,
        follower_id: UserId,
        followed_id: UserId,
        now: Timestamp,
    ) -> DomainResult<Self> {
        if follower_id == followed_id {
            return Err(DomainError::invalid_argument(
                "followed_user_id",
                "cannot send a match request to yourself",
            ));
        }

        Ok(Self {
            id,
            follower_id,
            followed_id,
            status: RelationshipStatus::Pending,
            created_at: now,
            updated_at: now,
        })
    }

    pub fn pair_key(&self) -> PairKey {
        PairKey::new(self.follower_id, self.followed_id)
    }

    pub fn involves(&self, user_id: UserId) -> bool {
        self.follower_id == user_id || self.followed_id == user_id
    }

    /// 关系中的另一方
    pub fn counterpart(&self, user_id: UserId) -> UserId {
        if self.follower_id == user_id {
            self.followed_id
        } else {
            self.follower_id
        }
    }

    pub fn is_matched(&self) -> bool {
        self.status == RelationshipStatus::Matched
    }

    /// 被请求方作出决定
    pub fn respond(
        &mut self,
        acting_user: UserId,
        decision: Decision,
        now: Timestamp,
    ) -> DomainResult<()> {
        if acting_user != self.followed_id {
            return Err(DomainError::not_authorized("respond to this match request"));
        }
        if self.status != RelationshipStatus::Pending {
            return Err(DomainError::invalid_transition(self.status, "respond to"));
        }

        self.status = decision.target_status();
        self.updated_at = now;
        Ok(())
    }

    /// 校验发起方能否撤回；撤回本身由仓储删除记录完成
    ///
    /// 先看状态再看身份：非待处理的关系对任何人都是非法迁移。
    pub fn ensure_withdrawable(&self, acting_user: UserId) -> DomainResult<()> {
        if self.status != RelationshipStatus::Pending {
            return Err(DomainError::invalid_transition(self.status, "withdraw"));
        }
        if acting_user != self.follower_id {
            return Err(DomainError::not_authorized("withdraw this match request"));
        }
        Ok(())
    }
}

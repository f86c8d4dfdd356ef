//! 用户实体定义
//!
//! 用户由外部账户系统维护，这里只关心撮合与合规流程读取的字段。

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::errors::DomainError;
use crate::value_objects::{EmailAddress, Timestamp, UserId};

/// 性别
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Gender {
    Male,
    Female,
}

impl Gender {
    pub fn opposite(self) -> Self {
        match self {
            Gender::Male => Gender::Female,
            Gender::Female => Gender::Male,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Gender::Male => "male",
            Gender::Female => "female",
        }
    }
}

impl FromStr for Gender {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "male" => Ok(Gender::Male),
            "female" => Ok(Gender::Female),
            other => Err(DomainError::invalid_argument(
                "gender",
                format!("unknown gender '{other}'"),
            )),
        }
    }
}

impl fmt::Display for Gender {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// 订阅套餐
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Plan {
    #[default]
    Freemium,
    Premium,
    Pro,
}

impl Plan {
    pub fn as_str(&self) -> &'static str {
        match self {
            Plan::Freemium => "freemium",
            Plan::Premium => "premium",
            Plan::Pro => "pro",
        }
    }
}

impl FromStr for Plan {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "freemium" => Ok(Plan::Freemium),
            "premium" => Ok(Plan::Premium),
            "pro" => Ok(Plan::Pro),
            other => Err(DomainError::invalid_argument(
                "plan",
                format!("unknown plan '{other}'"),
            )),
        }
    }
}

impl fmt::Display for Plan {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// 监护人（Wali）资料
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct WaliDetails {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub phone: Option<String>,
    #[serde(default)]
    pub relationship: Option<String>,
}

impl WaliDetails {
    /// 去掉空白后非空的邮箱
    pub fn email(&self) -> Option<&str> {
        self.email
            .as_deref()
            .map(str::trim)
            .filter(|email| !email.is_empty())
    }

    /// 可以实际投递的邮箱
    pub fn deliverable_email(&self) -> Option<EmailAddress> {
        self.email().and_then(|email| EmailAddress::parse(email).ok())
    }
}

/// 监护人记录在数据边界处解析后的状态
///
/// 历史数据以 JSON 文本存储，加载用户时解析一次，之后各处只匹配这个枚举。
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum GuardianRecord {
    #[default]
    Missing,
    Provided(WaliDetails),
    Malformed { reason: String },
}

impl GuardianRecord {
    /// 从存储的原始 JSON 文本解析
    pub fn from_stored(raw: Option<&str>) -> Self {
        let raw = match raw.map(str::trim) {
            None | Some("") | Some("null") => return GuardianRecord::Missing,
            Some(raw) => raw,
        };

        match serde_json::from_str::<WaliDetails>(raw) {
            Ok(details) => GuardianRecord::Provided(details),
            Err(err) => GuardianRecord::Malformed {
                reason: err.to_string(),
            },
        }
    }

    /// 序列化回存储格式；格式错误的记录无法还原，按缺失处理
    pub fn to_stored(&self) -> Option<String> {
        match self {
            GuardianRecord::Provided(details) => serde_json::to_string(details).ok(),
            GuardianRecord::Missing | GuardianRecord::Malformed { .. } => None,
        }
    }

    pub fn details(&self) -> Option<&WaliDetails> {
        match self {
            GuardianRecord::Provided(details) => Some(details),
            _ => None,
        }
    }
}

/// 用户实体
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct User {
    pub id: UserId,
    pub username: String,
    pub email: EmailAddress,
    pub display_name: Option<String>,
    pub gender: Gender,
    pub plan: Plan,
    pub wali: GuardianRecord,
    pub parent_email: Option<EmailAddress>,
    pub blocked_users: Vec<UserId>,
    pub favorite_users: Vec<UserId>,
    pub viewed_by: Vec<UserId>,
    pub created_at: Timestamp,
    pub updated_at: Timestamp,
}

impl User {
    pub fn new(
        id: UserId,
        username: impl Into<String>,
        email: EmailAddress,
        gender: Gender,
        plan: Plan,
        now: Timestamp,
    ) -> Result<Self, DomainError> {
        let username = username.into().trim().to_owned();
        if username.is_empty() {
            return Err(DomainError::invalid_argument("username", "cannot be empty"));
        }

        Ok(Self {
            id,
            username,
            email,
            display_name: None,
            gender,
            plan,
            wali: GuardianRecord::Missing,
            parent_email: None,
            blocked_users: Vec::new(),
            favorite_users: Vec::new(),
            viewed_by: Vec::new(),
            created_at: now,
            updated_at: now,
        })
    }

    /// 对外展示的名称
    pub fn display_label(&self) -> &str {
        self.display_name.as_deref().unwrap_or(&self.username)
    }

    pub fn is_female(&self) -> bool {
        self.gender == Gender::Female
    }

    pub fn set_wali(&mut self, wali: GuardianRecord, now: Timestamp) {
        self.wali = wali;
        self.updated_at = now;
    }

    pub fn set_parent_email(&mut self, parent_email: Option<EmailAddress>, now: Timestamp) {
        self.parent_email = parent_email;
        self.updated_at = now;
    }

    /// 从三个关联数组中移除某个用户，返回是否有改动
    pub fn forget_user(&mut self, other: UserId) -> bool {
        let before =
            self.blocked_users.len() + self.favorite_users.len() + self.viewed_by.len();
        self.blocked_users.retain(|id| *id != other);
        self.favorite_users.retain(|id| *id != other);
        self.viewed_by.retain(|id| *id != other);
        let after = self.blocked_users.len() + self.favorite_users.len() + self.viewed_by.len();
        before != after
    }

    pub fn references(&self, other: UserId) -> bool {
        self.blocked_users.contains(&other)
            || self.favorite_users.contains(&other)
            || self.viewed_by.contains(&other)
    }
}

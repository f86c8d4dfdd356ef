use std::fmt;

use domain::{DomainError, RelationshipStatus, RepositoryError, UserId};
use thiserror::Error;

/// 超额的具体原因
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlanLimitKind {
    /// 对同一接收方的消息条数
    Allowance { sent: u64, allowance: u32 },
    /// 单条消息词数
    WordLimit { words: usize, word_limit: u32 },
    /// 套餐不含视频通话
    VideoCall,
}

impl fmt::Display for PlanLimitKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PlanLimitKind::Allowance { sent, allowance } => {
                write!(f, "{sent} messages already sent, allowance is {allowance}")
            }
            PlanLimitKind::WordLimit { words, word_limit } => {
                write!(f, "message has {words} words, limit is {word_limit}")
            }
            PlanLimitKind::VideoCall => f.write_str("video calls are not included in the plan"),
        }
    }
}

/// 对外暴露的错误标签
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    Validation,
    NotFound,
    DuplicateRelationship,
    InvalidStateTransition,
    NotAuthorized,
    PlanExceeded,
    WaliRequired,
    WaliEmailRequired,
    MalformedWaliJson,
    NotMatched,
    AbsentWaliDetails,
    PurgeFailed,
    Storage,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::Validation => "VALIDATION",
            ErrorKind::NotFound => "NOT_FOUND",
            ErrorKind::DuplicateRelationship => "DUPLICATE_RELATIONSHIP",
            ErrorKind::InvalidStateTransition => "INVALID_STATE_TRANSITION",
            ErrorKind::NotAuthorized => "NOT_AUTHORIZED",
            ErrorKind::PlanExceeded => "PLAN_EXCEEDED",
            ErrorKind::WaliRequired => "WALI_REQUIRED",
            ErrorKind::WaliEmailRequired => "WALI_EMAIL_REQUIRED",
            ErrorKind::MalformedWaliJson => "MALFORMED_WALI_JSON",
            ErrorKind::NotMatched => "NOT_MATCHED",
            ErrorKind::AbsentWaliDetails => "ABSENT_WALI_DETAILS",
            ErrorKind::PurgeFailed => "PURGE_FAILED",
            ErrorKind::Storage => "STORAGE",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Error)]
pub enum ApplicationError {
    #[error("validation failed: {field}: {message}")]
    Validation { field: String, message: String },
    #[error("{resource} {id} not found")]
    NotFound { resource: &'static str, id: String },
    #[error("a relationship already exists for this pair (status: {status})")]
    DuplicateRelationship { status: RelationshipStatus },
    #[error("cannot {action} a relationship in status {from}")]
    InvalidStateTransition {
        from: RelationshipStatus,
        action: &'static str,
    },
    #[error("not authorized to {0}")]
    NotAuthorized(String),
    #[error("plan limit exceeded: {0}")]
    PlanExceeded(PlanLimitKind),
    #[error("guardian details are required before messaging")]
    WaliRequired,
    #[error("guardian details must include an email address")]
    WaliEmailRequired,
    #[error("guardian details could not be parsed: {0}")]
    MalformedWaliJson(String),
    #[error("users are not matched")]
    NotMatched,
    #[error("target user has no reachable guardian")]
    AbsentWaliDetails,
    #[error("account purge for {user_id} failed: {reason}")]
    PurgeFailed { user_id: UserId, reason: String },
    #[error("repository error: {0}")]
    Repository(RepositoryError),
}

impl ApplicationError {
    pub fn not_found(resource: &'static str, id: impl ToString) -> Self {
        Self::NotFound {
            resource,
            id: id.to_string(),
        }
    }

    pub fn validation(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Validation {
            field: field.into(),
            message: message.into(),
        }
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            ApplicationError::Validation { .. } => ErrorKind::Validation,
            ApplicationError::NotFound { .. } => ErrorKind::NotFound,
            ApplicationError::DuplicateRelationship { .. } => ErrorKind::DuplicateRelationship,
            ApplicationError::InvalidStateTransition { .. } => ErrorKind::InvalidStateTransition,
            ApplicationError::NotAuthorized(_) => ErrorKind::NotAuthorized,
            ApplicationError::PlanExceeded(_) => ErrorKind::PlanExceeded,
            ApplicationError::WaliRequired => ErrorKind::WaliRequired,
            ApplicationError::WaliEmailRequired => ErrorKind::WaliEmailRequired,
            ApplicationError::MalformedWaliJson(_) => ErrorKind::MalformedWaliJson,
            ApplicationError::NotMatched => ErrorKind::NotMatched,
            ApplicationError::AbsentWaliDetails => ErrorKind::AbsentWaliDetails,
            ApplicationError::PurgeFailed { .. } => ErrorKind::PurgeFailed,
            ApplicationError::Repository(RepositoryError::NotFound) => ErrorKind::NotFound,
            ApplicationError::Repository(_) => ErrorKind::Storage,
        }
    }

    /// 原样重试可能成功的错误
    pub fn is_retryable(&self) -> bool {
        matches!(self.kind(), ErrorKind::PurgeFailed | ErrorKind::Storage)
    }
}

impl From<DomainError> for ApplicationError {
    fn from(value: DomainError) -> Self {
        match value {
            DomainError::InvalidArgument { field, message } => {
                ApplicationError::Validation { field, message }
            }
            DomainError::InvalidStateTransition { from, action } => {
                ApplicationError::InvalidStateTransition { from, action }
            }
            DomainError::NotAuthorized { action } => ApplicationError::NotAuthorized(action.into()),
        }
    }
}

impl From<RepositoryError> for ApplicationError {
    fn from(value: RepositoryError) -> Self {
        ApplicationError::Repository(value)
    }
}

pub type ApplicationResult<T> = Result<T, ApplicationError>;

//! 领域模型错误定义
//!
//! 定义了实体规则与仓储适配器可能产生的错误类型，提供清晰的错误上下文。

use thiserror::Error;

use crate::relationship::RelationshipStatus;

/// 领域模型错误类型
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DomainError {
    /// 参数校验失败
    #[error("invalid {field}: {message}")]
    InvalidArgument { field: String, message: String },

    /// 非法状态迁移
    #[error("cannot {action} a relationship in status {from}")]
    InvalidStateTransition {
        from: RelationshipStatus,
        action: &'static str,
    },

    /// 操作者无权执行该操作
    #[error("user is not allowed to {action}")]
    NotAuthorized { action: &'static str },
}

impl DomainError {
    /// 创建参数校验错误
    pub fn invalid_argument(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self::InvalidArgument {
            field: field.into(),
            message: message.into(),
        }
    }

    /// 创建非法状态迁移错误
    pub fn invalid_transition(from: RelationshipStatus, action: &'static str) -> Self {
        Self::InvalidStateTransition { from, action }
    }

    /// 创建权限错误
    pub fn not_authorized(action: &'static str) -> Self {
        Self::NotAuthorized { action }
    }
}

/// 仓储层错误
///
/// 适配器负责把底层存储错误归类到这里；`Conflict` 专指唯一约束冲突。
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RepositoryError {
    #[error("record not found")]
    NotFound,

    #[error("unique constraint violated: {constraint}")]
    Conflict { constraint: String },

    #[error("storage failure: {message}")]
    Storage { message: String },
}

impl RepositoryError {
    pub fn storage(message: impl Into<String>) -> Self {
        Self::Storage {
            message: message.into(),
        }
    }

    pub fn conflict(constraint: impl Into<String>) -> Self {
        Self::Conflict {
            constraint: constraint.into(),
        }
    }

    pub fn is_conflict(&self) -> bool {
        matches!(self, Self::Conflict { .. })
    }
}

/// 领域模型结果类型
pub type DomainResult<T> = Result<T, DomainError>;

/// 仓储结果类型
pub type RepositoryResult<T> = Result<T, RepositoryError>;

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::errors::DomainError;
use crate::plan::word_count;
use crate::value_objects::{MessageId, PairKey, Timestamp, UserId};

/// 消息类型
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChatMessageType {
    Text,
    VideoCallInvitation,
}

impl ChatMessageType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ChatMessageType::Text => "text",
            ChatMessageType::VideoCallInvitation => "video_call_invitation",
        }
    }
}

impl FromStr for ChatMessageType {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "text" => Ok(ChatMessageType::Text),
            "video_call_invitation" => Ok(ChatMessageType::VideoCallInvitation),
            other => Err(DomainError::invalid_argument(
                "type",
                format!("unknown message type '{other}'"),
            )),
        }
    }
}

/// 已读状态
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ChatMessageStatus {
    Unread,
    Read,
}

impl ChatMessageStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ChatMessageStatus::Unread => "UNREAD",
            ChatMessageStatus::Read => "READ",
        }
    }
}

impl FromStr for ChatMessageStatus {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "UNREAD" => Ok(ChatMessageStatus::Unread),
            "READ" => Ok(ChatMessageStatus::Read),
            other => Err(DomainError::invalid_argument(
                "status",
                format!("unknown message status '{other}'"),
            )),
        }
    }
}

/// 消息正文，至少包含一个词。
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MessageBody(String);

impl MessageBody {
    pub fn new(value: impl Into<String>) -> Result<Self, DomainError> {
        let value = value.into();
        if word_count(&value) == 0 {
            return Err(DomainError::invalid_argument("body", "cannot be empty"));
        }
        Ok(Self(value))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn words(&self) -> usize {
        word_count(&self.0)
    }
}

impl fmt::Display for MessageBody {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// 一对一聊天消息
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub id: MessageId,
    pub sender_id: UserId,
    pub receiver_id: UserId,
    pub body: MessageBody,
    pub status: ChatMessageStatus,
    pub message_type: ChatMessageType,
    pub created_at: Timestamp,
}

impl ChatMessage {
    pub fn new(
        id: MessageId,
        sender_id: UserId,
        receiver_id: UserId,
        body: MessageBody,
        message_type: ChatMessageType,
        created_at: Timestamp,
    ) -> Self {
        Self {
            id,
            sender_id,
            receiver_id,
            body,
            status: ChatMessageStatus::Unread,
            message_type,
            created_at,
        }
    }

    pub fn pair_key(&self) -> PairKey {
        PairKey::new(self.sender_id, self.receiver_id)
    }

    pub fn involves(&self, user_id: UserId) -> bool {
        self.sender_id == user_id || self.receiver_id == user_id
    }

    /// 标记已读，已读消息返回 false
    pub fn mark_read(&mut self) -> bool {
        if self.status == ChatMessageStatus::Read {
            return false;
        }
        self.status = ChatMessageStatus::Read;
        true
    }
}

/// 通话阶段
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CallEvent {
    Started,
    Ended,
}

impl CallEvent {
    pub fn as_str(&self) -> &'static str {
        match self {
            CallEvent::Started => "started",
            CallEvent::Ended => "ended",
        }
    }
}

/// 视频通话元数据，由外部通话 SDK 提供
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CallMeta {
    pub call_id: String,
    pub event: CallEvent,
    pub at: Timestamp,
    pub duration_secs: Option<u64>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    #[test]
    fn blank_body_is_rejected() {
        assert!(MessageBody::new(" \n\t").is_err());
        assert_eq!(MessageBody::new("as salaamu alaikum").unwrap().words(), 3);
    }

    #[test]
    fn mark_read_is_idempotent() {
        let mut message = ChatMessage::new(
            MessageId::generate(),
            UserId::generate(),
            UserId::generate(),
            MessageBody::new("hello").unwrap(),
            ChatMessageType::Text,
            Utc::now(),
        );
        assert_eq!(message.status, ChatMessageStatus::Unread);
        assert!(message.mark_read());
        assert!(!message.mark_read());
        assert_eq!(message.status, ChatMessageStatus::Read);
    }
}

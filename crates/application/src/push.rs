// 面向用户的实时推送
use async_trait::async_trait;
use domain::UserId;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::broadcast;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PushEvent {
    pub recipient: UserId,
    pub event: String,
    pub payload: serde_json::Value,
}

impl PushEvent {
    pub fn new(recipient: UserId, event: impl Into<String>, payload: serde_json::Value) -> Self {
        Self {
            recipient,
            event: event.into(),
            payload,
        }
    }
}

#[derive(Debug, Error)]
pub enum PushError {
    #[error("push failed: {0}")]
    Failed(String),
}

impl PushError {
    pub fn failed(message: impl Into<String>) -> Self {
        Self::Failed(message.into())
    }
}

/// 推送是尽力而为的，调用方只记录失败
#[async_trait]
pub trait PushChannel: Send + Sync {
    async fn emit(&self, event: PushEvent) -> Result<(), PushError>;
}

/// 进程内推送通道
#[derive(Clone)]
pub struct LocalPushChannel {
    sender: broadcast::Sender<PushEvent>,
}

impl LocalPushChannel {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self { sender }
    }

    pub fn subscribe(&self, user_id: UserId) -> PushStream {
        PushStream {
            receiver: self.sender.subscribe(),
            user_id,
        }
    }
}

impl Default for LocalPushChannel {
    fn default() -> Self {
        Self::new(1000)
    }
}

#[async_trait]
impl PushChannel for LocalPushChannel {
    async fn emit(&self, event: PushEvent) -> Result<(), PushError> {
        // 没有订阅者不算失败
        if self.sender.receiver_count() == 0 {
            return Ok(());
        }
        self.sender
            .send(event)
            .map_err(|err| PushError::failed(err.to_string()))?;
        Ok(())
    }
}

/// 单个用户的推送流
pub struct PushStream {
    receiver: broadcast::Receiver<PushEvent>,
    user_id: UserId,
}

impl PushStream {
    pub async fn recv(&mut self) -> Option<PushEvent> {
        loop {
            match self.receiver.recv().await {
                Ok(event) => {
                    if event.recipient == self.user_id {
                        return Some(event);
                    }
                }
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    tracing::warn!(user_id = %self.user_id, skipped, "推送流落后，部分事件已丢失");
                }
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn stream_only_yields_own_events() {
        let channel = LocalPushChannel::default();
        let alice = UserId::generate();
        let bob = UserId::generate();
        let mut stream = channel.subscribe(alice);

        channel
            .emit(PushEvent::new(bob, "new_message", json!({})))
            .await
            .unwrap();
        channel
            .emit(PushEvent::new(alice, "match_request", json!({"from": "bob"})))
            .await
            .unwrap();

        let event = stream.recv().await.unwrap();
        assert_eq!(event.recipient, alice);
        assert_eq!(event.event, "match_request");
    }

    #[tokio::test]
    async fn emit_without_subscribers_succeeds() {
        let channel = LocalPushChannel::default();
        let result = channel
            .emit(PushEvent::new(UserId::generate(), "noop", json!(null)))
            .await;
        assert!(result.is_ok());
    }
}

//! 合规邮件的出站抽象与异步投递队列
//!
//! 调用方只负责入队，真正的投递由后台 worker 完成，服务商故障不会阻塞请求路径。

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use domain::EmailAddress;
use serde::Serialize;
use thiserror::Error;
use tokio::sync::{mpsc, Semaphore};
use tokio::task::JoinHandle;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct OutboundEmail {
    pub to: EmailAddress,
    pub subject: String,
    pub html: String,
}

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum EmailError {
    #[error("email provider timed out after {0:?}")]
    Timeout(Duration),
    #[error("email provider rejected the message: {0}")]
    Rejected(String),
    #[error("email transport failure: {0}")]
    Transport(String),
}

impl EmailError {
    /// 被拒绝的请求重试也不会成功
    pub fn is_transient(&self) -> bool {
        !matches!(self, EmailError::Rejected(_))
    }
}

#[async_trait]
pub trait EmailDispatcher: Send + Sync {
    async fn send(&self, email: &OutboundEmail) -> Result<(), EmailError>;
}

/// 有界邮件队列，克隆后共享同一个 worker
#[derive(Clone)]
pub struct EmailQueue {
    sender: mpsc::Sender<OutboundEmail>,
}

impl EmailQueue {
    /// 创建队列并启动后台 worker。
    ///
    /// 所有 `EmailQueue` 句柄被丢弃后 worker 会等待在途投递完成再退出。
    pub fn start(
        dispatcher: Arc<dyn EmailDispatcher>,
        capacity: usize,
        max_in_flight: usize,
    ) -> (Self, JoinHandle<()>) {
        let (sender, receiver) = mpsc::channel(capacity.max(1));
        let handle = tokio::spawn(run_worker(dispatcher, receiver, max_in_flight.max(1)));
        (Self { sender }, handle)
    }

    /// 入队，不等待。队列已满或已关闭时丢弃并记录告警。
    pub fn enqueue(&self, email: OutboundEmail) -> bool {
        match self.sender.try_send(email) {
            Ok(()) => true,
            Err(mpsc::error::TrySendError::Full(email)) => {
                tracing::warn!(to = %email.to, subject = %email.subject, "邮件队列已满，丢弃通知");
                false
            }
            Err(mpsc::error::TrySendError::Closed(email)) => {
                tracing::warn!(to = %email.to, subject = %email.subject, "邮件队列已关闭，丢弃通知");
                false
            }
        }
    }
}

async fn run_worker(
    dispatcher: Arc<dyn EmailDispatcher>,
    mut receiver: mpsc::Receiver<OutboundEmail>,
    max_in_flight: usize,
) {
    let limiter = Arc::new(Semaphore::new(max_in_flight));

    while let Some(email) = receiver.recv().await {
        let permit = match limiter.clone().acquire_owned().await {
            Ok(permit) => permit,
            Err(_) => break,
        };
        let dispatcher = dispatcher.clone();
        tokio::spawn(async move {
            let _permit = permit;
            match dispatcher.send(&email).await {
                Ok(()) => tracing::debug!(to = %email.to, subject = %email.subject, "通知邮件已发送"),
                Err(err) => tracing::warn!(
                    to = %email.to,
                    subject = %email.subject,
                    error = %err,
                    "通知邮件发送失败，已丢弃"
                ),
            }
        });
    }

    // 等待在途投递结束
    let _ = limiter.acquire_many(max_in_flight as u32).await;
    tracing::info!("邮件队列 worker 已退出");
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    #[derive(Default)]
    struct Recorder {
        sent: Mutex<Vec<OutboundEmail>>,
        fail: bool,
    }

    #[async_trait]
    impl EmailDispatcher for Recorder {
        async fn send(&self, email: &OutboundEmail) -> Result<(), EmailError> {
            self.sent.lock().unwrap().push(email.clone());
            if self.fail {
                Err(EmailError::Transport("connection reset".into()))
            } else {
                Ok(())
            }
        }
    }

    fn email(to: &str) -> OutboundEmail {
        OutboundEmail {
            to: EmailAddress::parse(to).unwrap(),
            subject: "subject".into(),
            html: "<p>body</p>".into(),
        }
    }

    #[tokio::test]
    async fn worker_drains_queue_before_exit() {
        let recorder = Arc::new(Recorder::default());
        let (queue, handle) = EmailQueue::start(recorder.clone(), 8, 2);

        assert!(queue.enqueue(email("a@example.com")));
        assert!(queue.enqueue(email("b@example.com")));
        drop(queue);
        handle.await.unwrap();

        assert_eq!(recorder.sent.lock().unwrap().len(), 2);
    }

    #[tokio::test]
    async fn dispatch_failures_are_swallowed() {
        let recorder = Arc::new(Recorder {
            fail: true,
            ..Recorder::default()
        });
        let (queue, handle) = EmailQueue::start(recorder.clone(), 4, 1);

        assert!(queue.enqueue(email("a@example.com")));
        drop(queue);
        handle.await.unwrap();

        assert_eq!(recorder.sent.lock().unwrap().len(), 1);
    }

    #[test]
    fn rejected_is_not_transient() {
        assert!(!EmailError::Rejected("bad address".into()).is_transient());
        assert!(EmailError::Timeout(Duration::from_secs(1)).is_transient());
    }
}

//! 跨进程推送：Redis 发布，故障时退回进程内通道
use std::sync::{
    atomic::{AtomicU32, Ordering},
    Arc, Mutex,
};

use application::push::{PushChannel, PushError, PushEvent};
use async_trait::async_trait;
use redis::{aio::ConnectionManager, AsyncCommands};
use tokio::time::{Duration, Instant};

/// 按接收者分频道发布，频道名为 `{prefix}{user_id}`
#[derive(Clone)]
pub struct RedisPushChannel {
    connection: ConnectionManager,
    channel_prefix: String,
}

impl RedisPushChannel {
    pub async fn connect(
        url: &str,
        channel_prefix: impl Into<String>,
    ) -> Result<Self, redis::RedisError> {
        let client = redis::Client::open(url)?;
        let connection = client.get_connection_manager().await?;
        Ok(Self {
            connection,
            channel_prefix: channel_prefix.into(),
        })
    }

    pub fn channel_for(&self, event: &PushEvent) -> String {
        format!("{}{}", self.channel_prefix, event.recipient)
    }
}

#[async_trait]
impl PushChannel for RedisPushChannel {
    async fn emit(&self, event: PushEvent) -> Result<(), PushError> {
        let payload =
            serde_json::to_string(&event).map_err(|err| PushError::failed(err.to_string()))?;
        let channel = self.channel_for(&event);

        let mut connection = self.connection.clone();
        let receivers: i64 = connection
            .publish(&channel, payload)
            .await
            .map_err(|err| PushError::failed(err.to_string()))?;
        tracing::debug!(channel = %channel, event = %event.event, receivers, "推送已发布");
        Ok(())
    }
}

const FAILURE_THRESHOLD: u32 = 5;
const OPEN_DURATION: Duration = Duration::from_secs(30);

/// 连续失败达到阈值后暂停使用主通道，冷却期内全部走备用通道
pub struct FallbackPushChannel {
    primary: Arc<dyn PushChannel>,
    fallback: Arc<dyn PushChannel>,
    consecutive_failures: AtomicU32,
    open_until: Mutex<Option<Instant>>,
}

impl FallbackPushChannel {
    pub fn new(primary: Arc<dyn PushChannel>, fallback: Arc<dyn PushChannel>) -> Self {
        Self {
            primary,
            fallback,
            consecutive_failures: AtomicU32::new(0),
            open_until: Mutex::new(None),
        }
    }

    fn circuit_open(&self) -> bool {
        let mut guard = match self.open_until.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        match *guard {
            Some(until) if Instant::now() < until => true,
            Some(_) => {
                // 冷却结束，放行一次探测
                *guard = None;
                tracing::info!("推送主通道冷却结束，重新尝试");
                false
            }
            None => false,
        }
    }

    fn record_failure(&self) {
        let failures = self.consecutive_failures.fetch_add(1, Ordering::Relaxed) + 1;
        if failures >= FAILURE_THRESHOLD {
            let mut guard = match self.open_until.lock() {
                Ok(guard) => guard,
                Err(poisoned) => poisoned.into_inner(),
            };
            *guard = Some(Instant::now() + OPEN_DURATION);
            self.consecutive_failures.store(0, Ordering::Relaxed);
            tracing::error!(failures, "推送主通道不可用，切换到本地通道");
        }
    }
}

#[async_trait]
impl PushChannel for FallbackPushChannel {
    async fn emit(&self, event: PushEvent) -> Result<(), PushError> {
        if self.circuit_open() {
            return self.fallback.emit(event).await;
        }

        match self.primary.emit(event.clone()).await {
            Ok(()) => {
                self.consecutive_failures.store(0, Ordering::Relaxed);
                Ok(())
            }
            Err(err) => {
                tracing::warn!(error = %err, "推送主通道失败，使用本地通道");
                self.record_failure();
                self.fallback.emit(event).await
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use application::push::LocalPushChannel;
    use domain::UserId;
    use serde_json::json;

    struct BrokenChannel {
        calls: AtomicU32,
    }

    #[async_trait]
    impl PushChannel for BrokenChannel {
        async fn emit(&self, _event: PushEvent) -> Result<(), PushError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Err(PushError::failed("connection refused"))
        }
    }

    #[tokio::test]
    async fn falls_back_and_opens_circuit() {
        let broken = Arc::new(BrokenChannel {
            calls: AtomicU32::new(0),
        });
        let local = Arc::new(LocalPushChannel::new(16));
        let user = UserId::generate();
        let mut stream = local.subscribe(user);
        let channel = FallbackPushChannel::new(broken.clone(), local.clone());

        for _ in 0..(FAILURE_THRESHOLD + 3) {
            channel
                .emit(PushEvent::new(user, "new_message", json!({})))
                .await
                .unwrap();
        }

        assert_eq!(broken.calls.load(Ordering::SeqCst), FAILURE_THRESHOLD);
        let delivered = stream.recv().await.unwrap();
        assert_eq!(delivered.event, "new_message");
    }
}

//! 邮件服务商适配：日志投递、HTTP 投递，以及带超时和重试的包装
use std::sync::Arc;
use std::time::Duration;

use application::email::{EmailDispatcher, EmailError, OutboundEmail};
use async_trait::async_trait;
use reqwest::StatusCode;
use serde::Serialize;

use crate::retry::{retry_async, Backoff, RetryConfig};

/// 只写日志，不真正发送，用于本地开发
#[derive(Debug, Default, Clone)]
pub struct LogEmailDispatcher;

#[async_trait]
impl EmailDispatcher for LogEmailDispatcher {
    async fn send(&self, email: &OutboundEmail) -> Result<(), EmailError> {
        tracing::info!(to = %email.to, subject = %email.subject, "邮件（仅日志）");
        Ok(())
    }
}

#[derive(Debug, Serialize)]
struct SendEmailPayload<'a> {
    from: &'a str,
    to: [&'a str; 1],
    subject: &'a str,
    html: &'a str,
}

/// 以 JSON POST 调用事务邮件服务商
#[derive(Clone)]
pub struct HttpEmailDispatcher {
    client: reqwest::Client,
    endpoint: String,
    api_key: Option<String>,
    from_address: String,
}

impl HttpEmailDispatcher {
    pub fn new(
        endpoint: impl Into<String>,
        api_key: Option<String>,
        from_address: impl Into<String>,
    ) -> Result<Self, reqwest::Error> {
        let client = reqwest::Client::builder().build()?;
        Ok(Self {
            client,
            endpoint: endpoint.into(),
            api_key,
            from_address: from_address.into(),
        })
    }
}

fn classify_status(status: StatusCode, body: String) -> EmailError {
    if status == StatusCode::REQUEST_TIMEOUT
        || status == StatusCode::TOO_MANY_REQUESTS
        || status.is_server_error()
    {
        EmailError::Transport(format!("{status}: {body}"))
    } else {
        EmailError::Rejected(format!("{status}: {body}"))
    }
}

#[async_trait]
impl EmailDispatcher for HttpEmailDispatcher {
    async fn send(&self, email: &OutboundEmail) -> Result<(), EmailError> {
        let payload = SendEmailPayload {
            from: &self.from_address,
            to: [email.to.as_str()],
            subject: &email.subject,
            html: &email.html,
        };

        let mut request = self.client.post(&self.endpoint).json(&payload);
        if let Some(key) = &self.api_key {
            request = request.bearer_auth(key);
        }

        let response = request
            .send()
            .await
            .map_err(|err| EmailError::Transport(err.to_string()))?;

        let status = response.status();
        if status.is_success() {
            tracing::debug!(to = %email.to, %status, "邮件服务商已接收");
            return Ok(());
        }
        let body = response.text().await.unwrap_or_default();
        Err(classify_status(status, body))
    }
}

/// 为任意投递器加上单次超时和指数退避重试
pub struct ResilientEmailDispatcher {
    inner: Arc<dyn EmailDispatcher>,
    timeout: Duration,
    retry: RetryConfig,
}

impl ResilientEmailDispatcher {
    pub fn new(
        inner: Arc<dyn EmailDispatcher>,
        timeout: Duration,
        max_attempts: u32,
        backoff_base: Duration,
    ) -> Self {
        Self {
            inner,
            timeout,
            retry: RetryConfig {
                max_attempts,
                backoff: Backoff::exponential(backoff_base),
            },
        }
    }
}

#[async_trait]
impl EmailDispatcher for ResilientEmailDispatcher {
    async fn send(&self, email: &OutboundEmail) -> Result<(), EmailError> {
        let result = retry_async(&self.retry, EmailError::is_transient, |attempt| async move {
            match tokio::time::timeout(self.timeout, self.inner.send(email)).await {
                Ok(result) => result,
                Err(_) => {
                    tracing::debug!(to = %email.to, attempt, "邮件投递超时");
                    Err(EmailError::Timeout(self.timeout))
                }
            }
        })
        .await;

        if let Err(err) = &result {
            tracing::warn!(to = %email.to, subject = %email.subject, error = %err, "邮件投递失败");
        }
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn throttling_and_server_errors_are_transient() {
        assert!(classify_status(StatusCode::TOO_MANY_REQUESTS, String::new()).is_transient());
        assert!(classify_status(StatusCode::BAD_GATEWAY, String::new()).is_transient());
        assert!(classify_status(StatusCode::REQUEST_TIMEOUT, String::new()).is_transient());
    }

    #[test]
    fn client_errors_are_rejections() {
        let err = classify_status(StatusCode::UNPROCESSABLE_ENTITY, "bad address".into());
        assert!(matches!(err, EmailError::Rejected(ref m) if m.contains("bad address")));
    }
}

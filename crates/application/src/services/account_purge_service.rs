use std::sync::Arc;
use std::time::Duration;

use domain::{RepositoryError, UserId};

use crate::{
    error::{ApplicationError, ApplicationResult},
    profile_cache::ProfileCache,
    repository::{AccountPurgeStore, PurgeReport, UserDirectory},
};

#[derive(Debug, Clone, Copy)]
pub struct PurgeSettings {
    pub max_attempts: u32,
    pub retry_delay: Duration,
}

impl Default for PurgeSettings {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            retry_delay: Duration::from_millis(100),
        }
    }
}

pub struct AccountPurgeServiceDependencies {
    pub user_directory: Arc<dyn UserDirectory>,
    pub purge_store: Arc<dyn AccountPurgeStore>,
    pub profile_cache: Arc<ProfileCache>,
    pub settings: PurgeSettings,
}

/// 删除账户及所有引用，要么全部完成，要么什么都不改
pub struct AccountPurgeService {
    deps: AccountPurgeServiceDependencies,
}

impl AccountPurgeService {
    pub fn new(deps: AccountPurgeServiceDependencies) -> Self {
        Self { deps }
    }

    pub async fn purge_account(&self, user_id: UserId) -> ApplicationResult<PurgeReport> {
        match self.deps.user_directory.find_by_id(user_id).await {
            Ok(Some(_)) => {}
            Ok(None) => return Err(ApplicationError::not_found("user", user_id)),
            Err(err) => {
                return Err(ApplicationError::PurgeFailed {
                    user_id,
                    reason: err.to_string(),
                })
            }
        }

        let attempts = self.deps.settings.max_attempts.max(1);
        let mut last_error = None;

        for attempt in 1..=attempts {
            match self.deps.purge_store.purge_user(user_id).await {
                Ok(report) => {
                    self.deps.profile_cache.invalidate(user_id);
                    tracing::info!(
                        user_id = %user_id,
                        attempt,
                        relationships = report.relationships,
                        messages = report.messages,
                        users_scrubbed = report.users_scrubbed,
                        "账户已清除"
                    );
                    return Ok(report);
                }
                // 并发清除已经完成
                Err(RepositoryError::NotFound) => {
                    self.deps.profile_cache.invalidate(user_id);
                    return Err(ApplicationError::not_found("user", user_id));
                }
                Err(err) => {
                    tracing::warn!(user_id = %user_id, attempt, error = %err, "账户清除失败，已回滚");
                    last_error = Some(err);
                    if attempt < attempts {
                        tokio::time::sleep(self.deps.settings.retry_delay * attempt).await;
                    }
                }
            }
        }

        let reason = last_error
            .map(|err| err.to_string())
            .unwrap_or_else(|| "unknown error".to_string());
        tracing::error!(user_id = %user_id, attempts, reason = %reason, "账户清除重试耗尽");
        Err(ApplicationError::PurgeFailed { user_id, reason })
    }
}

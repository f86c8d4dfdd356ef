use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use std::time::{Duration, Instant};

use domain::{RepositoryError, User, UserId};

use crate::repository::UserDirectory;

/// 会话展示所需的用户资料
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProfileSummary {
    pub user_id: UserId,
    pub username: String,
    pub display_name: String,
}

impl From<&User> for ProfileSummary {
    fn from(user: &User) -> Self {
        Self {
            user_id: user.id,
            username: user.username.clone(),
            display_name: user.display_label().to_string(),
        }
    }
}

#[derive(Debug, Clone)]
struct CachedProfile {
    profile: ProfileSummary,
    fetched_at: Instant,
}

/// 带过期时间和容量上限的资料缓存
///
/// 只缓存展示字段，权限判断始终读取用户目录。
pub struct ProfileCache {
    directory: Arc<dyn UserDirectory>,
    ttl: Duration,
    capacity: usize,
    entries: RwLock<HashMap<UserId, CachedProfile>>,
}

impl ProfileCache {
    pub fn new(directory: Arc<dyn UserDirectory>, ttl: Duration, capacity: usize) -> Self {
        Self {
            directory,
            ttl,
            capacity: capacity.max(1),
            entries: RwLock::new(HashMap::new()),
        }
    }

    pub async fn get(&self, user_id: UserId) -> Result<Option<ProfileSummary>, RepositoryError> {
        if let Some(profile) = self.lookup_fresh(user_id) {
            return Ok(Some(profile));
        }

        let Some(user) = self.directory.find_by_id(user_id).await? else {
            self.invalidate(user_id);
            return Ok(None);
        };
        let profile = ProfileSummary::from(&user);
        self.store(profile.clone());
        Ok(Some(profile))
    }

    /// 找不到资料时返回占位名称
    pub async fn display_name(&self, user_id: UserId) -> Result<String, RepositoryError> {
        Ok(self
            .get(user_id)
            .await?
            .map(|profile| profile.display_name)
            .unwrap_or_else(|| "Unknown user".to_string()))
    }

    pub fn invalidate(&self, user_id: UserId) {
        if let Ok(mut entries) = self.entries.write() {
            entries.remove(&user_id);
        }
    }

    pub fn len(&self) -> usize {
        self.entries.read().map(|entries| entries.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn lookup_fresh(&self, user_id: UserId) -> Option<ProfileSummary> {
        let entries = self.entries.read().ok()?;
        let cached = entries.get(&user_id)?;
        (cached.fetched_at.elapsed() < self.ttl).then(|| cached.profile.clone())
    }

    fn store(&self, profile: ProfileSummary) {
        let Ok(mut entries) = self.entries.write() else {
            return;
        };

        if entries.len() >= self.capacity && !entries.contains_key(&profile.user_id) {
            let ttl = self.ttl;
            entries.retain(|_, cached| cached.fetched_at.elapsed() < ttl);
        }
        if entries.len() >= self.capacity && !entries.contains_key(&profile.user_id) {
            let oldest = entries
                .iter()
                .min_by_key(|(_, cached)| cached.fetched_at)
                .map(|(id, _)| *id);
            if let Some(oldest) = oldest {
                entries.remove(&oldest);
            }
        }

        entries.insert(
            profile.user_id,
            CachedProfile {
                profile,
                fetched_at: Instant::now(),
            },
        );
    }
}

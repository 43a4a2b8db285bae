//! Connection Registry (C3): `(user, device, platform) <-> session_id`
//! mapping, cross-node visible via `KvStore`, same-platform kick policy.
//! Grounded directly on
//! `examples/original_source/gateway/connection_manager/connection_manager.hpp`
//! (Redis key layout `user:sessions:{uid}` / `user:platform:{uid}` /
//! `session:user:{sid}` / `online:users`).

use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::config::{Platform, PlatformPolicyTable};
use crate::db::KvStore;
use crate::error::RegistryError;

/// Callback the registry uses to close a kicked session without owning the
/// transport itself, preserving the one-way ownership redesign (spec.md §9
/// "manual shared ownership graphs" flag): `Gateway` owns `Transport`,
/// which owns sessions; the registry only holds identifiers.
#[async_trait]
pub trait SessionCloser: Send + Sync {
    async fn close(&self, session_id: &str);
}

/// A no-op closer for tests and for nodes where the kicked session is
/// known to live elsewhere in the fleet.
pub struct NoopCloser;

#[async_trait]
impl SessionCloser for NoopCloser {
    async fn close(&self, _session_id: &str) {}
}

/// Stored in the registry for each live connection (spec.md §3).
/// `fingerprint` is supplemented optional forensic metadata (spec.md §9),
/// never used to bypass the device-bound checks in the auth core.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeviceSession {
    pub session_id: String,
    pub device_id: String,
    pub platform: String,
    pub connected_at: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fingerprint: Option<String>,
}

/// Outcome of [`ConnectionRegistry::add`].
#[derive(Debug, Clone, Default)]
pub struct AddResult {
    pub added: bool,
    pub kicked_session_id: Option<String>,
}

fn user_sessions_key(user_id: &str) -> String {
    format!("user:sessions:{}", user_id)
}

fn user_platform_key(user_id: &str) -> String {
    format!("user:platform:{}", user_id)
}

fn session_user_key(session_id: &str) -> String {
    format!("session:user:{}", session_id)
}

const ONLINE_USERS_KEY: &str = "online:users";

fn device_field(device_id: &str, platform: Platform) -> String {
    format!("{}:{}", device_id, platform.as_str())
}

pub struct ConnectionRegistry {
    kv: Arc<dyn KvStore>,
    policies: PlatformPolicyTable,
    closer: Arc<dyn SessionCloser>,
}

impl ConnectionRegistry {
    pub fn new(kv: Arc<dyn KvStore>, policies: PlatformPolicyTable, closer: Arc<dyn SessionCloser>) -> Self {
        Self { kv, policies, closer }
    }

    /// See spec.md §4.2: five mutations applied in order. On any `KvStore`
    /// error the mutation is reported; keys already applied are rolled
    /// back on a best-effort basis.
    pub async fn add(
        &self,
        user_id: &str,
        device_id: &str,
        platform: Platform,
        session_id: &str,
        connected_at: u64,
        fingerprint: Option<String>,
    ) -> Result<AddResult, RegistryError> {
        let policy = self.policies.get(platform);
        let mut kicked_session_id = None;

        if !policy.allow_multi_device {
            let existing = self.kv.hgetall(&user_sessions_key(user_id)).await?;
            let suffix = format!(":{}", platform.as_str());
            for (field, value) in existing {
                if !field.ends_with(&suffix) {
                    continue;
                }
                let other_device = field.trim_end_matches(&suffix);
                if other_device == device_id {
                    continue;
                }
                if let Ok(prior) = serde_json::from_str::<DeviceSession>(&value) {
                    warn!(user_id, platform = %platform, prior_session = %prior.session_id, "kicking prior same-platform session");
                    self.closer.close(&prior.session_id).await;
                    self.kv.hdel(&user_sessions_key(user_id), &field).await?;
                    self.kv.srem(&user_platform_key(user_id), &field).await?;
                    self.kv.del(&session_user_key(&prior.session_id)).await?;
                    kicked_session_id = Some(prior.session_id);
                }
            }
        }

        let session = DeviceSession {
            session_id: session_id.to_string(),
            device_id: device_id.to_string(),
            platform: platform.as_str().to_string(),
            connected_at,
            fingerprint,
        };
        let field = device_field(device_id, platform);
        let blob = serde_json::to_string(&session).map_err(|e| {
            RegistryError::Store(crate::error::KvError::Malformed(field.clone(), e.to_string()))
        })?;

        self.kv.hset(&user_sessions_key(user_id), &field, &blob).await?;
        self.kv.sadd(&user_platform_key(user_id), &field).await?;
        self.kv.hset(&session_user_key(session_id), "user_id", user_id).await?;
        self.kv.hset(&session_user_key(session_id), "device_id", device_id).await?;
        self.kv
            .hset(&session_user_key(session_id), "platform", platform.as_str())
            .await?;
        self.kv.sadd(ONLINE_USERS_KEY, user_id).await?;

        info!(user_id, device_id, platform = %platform, session_id, "session registered");

        Ok(AddResult {
            added: true,
            kicked_session_id,
        })
    }

    /// Inverse of `add`. Removes every `user:sessions` field whose device
    /// part equals `device_id`, regardless of platform (the registry
    /// layout names a session by `"{device_id}:{platform}"`, so a device
    /// only ever has one live entry per platform in practice).
    pub async fn remove(&self, user_id: &str, device_id: &str) -> Result<(), RegistryError> {
        let existing = self.kv.hgetall(&user_sessions_key(user_id)).await?;
        for (field, value) in existing {
            let other_device = field.split(':').next().unwrap_or_default();
            if other_device != device_id {
                continue;
            }
            if let Ok(session) = serde_json::from_str::<DeviceSession>(&value) {
                self.kv.del(&session_user_key(&session.session_id)).await?;
            }
            self.kv.hdel(&user_sessions_key(user_id), &field).await?;
            self.kv.srem(&user_platform_key(user_id), &field).await?;
        }

        if self.kv.hgetall(&user_sessions_key(user_id)).await?.is_empty() {
            self.kv.srem(ONLINE_USERS_KEY, user_id).await?;
        }
        Ok(())
    }

    pub async fn remove_by_session(&self, session_id: &str) -> Result<(), RegistryError> {
        let info = self.kv.hgetall(&session_user_key(session_id)).await?;
        let (Some(user_id), Some(device_id)) = (info.get("user_id"), info.get("device_id")) else {
            return Err(RegistryError::SessionNotFound(session_id.to_string()));
        };
        self.remove(user_id, device_id).await
    }

    pub async fn lookup(&self, user_id: &str, device_id: &str, platform: Platform) -> Result<Option<String>, RegistryError> {
        let field = device_field(device_id, platform);
        let value = self.kv.hget(&user_sessions_key(user_id), &field).await?;
        Ok(value
            .and_then(|v| serde_json::from_str::<DeviceSession>(&v).ok())
            .map(|s| s.session_id))
    }

    pub async fn list_user_sessions(&self, user_id: &str) -> Result<Vec<DeviceSession>, RegistryError> {
        let values = self.kv.hgetall(&user_sessions_key(user_id)).await?;
        Ok(values
            .values()
            .filter_map(|v| serde_json::from_str::<DeviceSession>(v).ok())
            .collect())
    }

    pub async fn is_online_on_platform(&self, user_id: &str, platform: Platform) -> Result<bool, RegistryError> {
        let suffix = format!(":{}", platform.as_str());
        let fields = self.kv.hgetall(&user_sessions_key(user_id)).await?;
        Ok(fields.keys().any(|f| f.ends_with(&suffix)))
    }

    pub async fn online_count(&self) -> Result<u64, RegistryError> {
        Ok(self.kv.scard(ONLINE_USERS_KEY).await?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::InMemoryKvStore;
    use crate::config::{PlatformPolicy, PlatformPolicyTable};

    fn registry(allow_multi_device: bool) -> ConnectionRegistry {
        let kv = Arc::new(InMemoryKvStore::new());
        let policies = PlatformPolicyTable::new().with_policy(
            Platform::Ios,
            PlatformPolicy {
                access_ttl_seconds: 300,
                refresh_ttl_seconds: 3600,
                allow_multi_device,
                refresh_window_fraction: 0.2,
                auto_refresh_enabled: true,
                max_refresh_retries: 3,
            },
        );
        ConnectionRegistry::new(kv, policies, Arc::new(NoopCloser))
    }

    #[tokio::test]
    async fn same_platform_kick_evicts_prior_session() {
        let reg = registry(false);
        reg.add("u", "d1", Platform::Ios, "s1", 1, None).await.unwrap();
        let result = reg.add("u", "d2", Platform::Ios, "s2", 2, None).await.unwrap();

        assert_eq!(result.kicked_session_id, Some("s1".to_string()));
        assert_eq!(reg.lookup("u", "d1", Platform::Ios).await.unwrap(), None);
        assert_eq!(reg.lookup("u", "d2", Platform::Ios).await.unwrap(), Some("s2".to_string()));
    }

    #[tokio::test]
    async fn multi_device_sessions_coexist() {
        let reg = registry(true);
        reg.add("u", "d1", Platform::Ios, "s1", 1, None).await.unwrap();
        reg.add("u", "d2", Platform::Ios, "s2", 2, None).await.unwrap();

        let sessions = reg.list_user_sessions("u").await.unwrap();
        assert_eq!(sessions.len(), 2);
    }

    #[tokio::test]
    async fn online_set_matches_session_presence() {
        let reg = registry(true);
        assert_eq!(reg.online_count().await.unwrap(), 0);
        reg.add("u", "d1", Platform::Ios, "s1", 1, None).await.unwrap();
        assert_eq!(reg.online_count().await.unwrap(), 1);
        reg.remove("u", "d1").await.unwrap();
        assert_eq!(reg.online_count().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn remove_by_session_resolves_owner() {
        let reg = registry(true);
        reg.add("u", "d1", Platform::Ios, "s1", 1, None).await.unwrap();
        reg.remove_by_session("s1").await.unwrap();
        assert_eq!(reg.lookup("u", "d1", Platform::Ios).await.unwrap(), None);
    }
}

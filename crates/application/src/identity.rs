//! 身份桥接。
//!
//! 用外部签发的 bearer 凭证换取本地身份记录：凭证先交给外部
//! 身份提供方校验，通过后把提供方资料 upsert 进本地用户存储。

use std::sync::Arc;

use async_trait::async_trait;
use domain::{User, UserId};
use serde::Serialize;
use thiserror::Error;
use uuid::Uuid;

use crate::clock::Clock;
use crate::error::ApplicationError;
use crate::repository::UserRepository;

/// 外部身份提供方返回的用户资料。
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProviderProfile {
    pub external_id: String,
    pub name: String,
    pub email: String,
    pub photo: Option<String>,
}

#[derive(Debug, Error)]
pub enum IdentityError {
    #[error("credential rejected")]
    Rejected,
    #[error("identity provider unreachable: {0}")]
    Unreachable(String),
}

#[async_trait]
pub trait IdentityProvider: Send + Sync {
    async fn verify(&self, token: &str) -> Result<ProviderProfile, IdentityError>;
}

/// 认证成功后返回给连接的本地身份句柄，也是 `me` 事件的载荷。
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LocalIdentity {
    pub local_id: UserId,
    pub external_id: String,
    pub name: String,
    pub photo: Option<String>,
}

pub struct IdentityServiceDependencies {
    pub provider: Arc<dyn IdentityProvider>,
    pub user_repository: Arc<dyn UserRepository>,
    pub clock: Arc<dyn Clock>,
}

pub struct IdentityService {
    deps: IdentityServiceDependencies,
}

impl IdentityService {
    pub fn new(deps: IdentityServiceDependencies) -> Self {
        Self { deps }
    }

    /// 凭证缺失、格式错误、被提供方拒绝、提供方不可达，
    /// 对调用方一律表现为同一个认证失败。
    pub async fn authenticate(
        &self,
        bearer: Option<&str>,
    ) -> Result<LocalIdentity, ApplicationError> {
        let token = bearer
            .map(str::trim)
            .filter(|token| !token.is_empty())
            .ok_or(ApplicationError::Authentication)?;

        let profile = self.deps.provider.verify(token).await.map_err(|err| {
            tracing::warn!(error = %err, "identity verification failed");
            ApplicationError::Authentication
        })?;

        let now = self.deps.clock.now();
        let candidate = User::from_provider(
            UserId::new(Uuid::new_v4()),
            profile.external_id,
            profile.name,
            profile.email,
            profile.photo,
            now,
        );
        let user = self
            .deps
            .user_repository
            .upsert_by_external_id(candidate)
            .await?;

        Ok(LocalIdentity {
            local_id: user.id,
            external_id: user.external_id,
            name: user.name,
            photo: user.photo,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::SystemClock;
    use crate::repository::memory::MemoryStorage;

    struct StaticProvider {
        profile: Option<ProviderProfile>,
    }

    #[async_trait]
    impl IdentityProvider for StaticProvider {
        async fn verify(&self, _token: &str) -> Result<ProviderProfile, IdentityError> {
            self.profile.clone().ok_or(IdentityError::Rejected)
        }
    }

    fn service(profile: Option<ProviderProfile>, storage: MemoryStorage) -> IdentityService {
        IdentityService::new(IdentityServiceDependencies {
            provider: Arc::new(StaticProvider { profile }),
            user_repository: Arc::new(storage),
            clock: Arc::new(SystemClock),
        })
    }

    fn profile(name: &str) -> ProviderProfile {
        ProviderProfile {
            external_id: "42".to_string(),
            name: name.to_string(),
            email: "user@example.com".to_string(),
            photo: None,
        }
    }

    #[tokio::test]
    async fn missing_or_blank_credential_is_rejected() {
        let service = service(Some(profile("A")), MemoryStorage::new());
        assert!(matches!(
            service.authenticate(None).await,
            Err(ApplicationError::Authentication)
        ));
        assert!(matches!(
            service.authenticate(Some("   ")).await,
            Err(ApplicationError::Authentication)
        ));
    }

    #[tokio::test]
    async fn provider_rejection_is_authentication_failure() {
        let service = service(None, MemoryStorage::new());
        assert!(matches!(
            service.authenticate(Some("token")).await,
            Err(ApplicationError::Authentication)
        ));
    }

    #[tokio::test]
    async fn repeated_authentication_upserts_the_same_local_user() {
        let storage = MemoryStorage::new();

        let first = service(Some(profile("Before")), storage.clone())
            .authenticate(Some("token"))
            .await
            .unwrap();
        let second = service(Some(profile("After")), storage.clone())
            .authenticate(Some("token"))
            .await
            .unwrap();

        // 同一外部 id 始终映射到同一本地用户，资料以最近一次为准
        assert_eq!(first.local_id, second.local_id);
        assert_eq!(second.name, "After");

        let stored = crate::repository::UserRepository::find_by_id(&storage, first.local_id)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(stored.name, "After");
    }
}

//! 外部身份提供方的 HTTP 桥接。
//!
//! 提供方通过 `GET /api/me` 校验 bearer 凭证并返回用户资料。
//! 凭证被拒与提供方不可达分别建模，上层统一按认证失败处理。

use application::{IdentityError, IdentityProvider, ProviderProfile};
use async_trait::async_trait;
use serde::Deserialize;

/// 提供方 `/api/me` 的响应体。id 可能是数字或字符串。
#[derive(Debug, Deserialize)]
struct MeResponse {
    id: serde_json::Value,
    name: Option<String>,
    email: String,
    photo: Option<String>,
}

impl MeResponse {
    fn external_id(&self) -> String {
        match &self.id {
            serde_json::Value::String(id) => id.clone(),
            other => other.to_string(),
        }
    }
}

pub struct HttpIdentityProvider {
    client: reqwest::Client,
    base_url: String,
}

impl HttpIdentityProvider {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
        }
    }
}

#[async_trait]
impl IdentityProvider for HttpIdentityProvider {
    async fn verify(&self, token: &str) -> Result<ProviderProfile, IdentityError> {
        let response = self
            .client
            .get(format!("{}/api/me", self.base_url))
            .bearer_auth(token)
            .header(reqwest::header::ACCEPT, "application/json")
            .send()
            .await
            .map_err(|err| IdentityError::Unreachable(err.to_string()))?;

        if !response.status().is_success() {
            tracing::debug!(status = %response.status(), "identity provider rejected credential");
            return Err(IdentityError::Rejected);
        }

        let me: MeResponse = response
            .json()
            .await
            .map_err(|err| IdentityError::Unreachable(err.to_string()))?;

        Ok(ProviderProfile {
            external_id: me.external_id(),
            name: me.name.unwrap_or_default(),
            email: me.email,
            photo: me.photo,
        })
    }
}

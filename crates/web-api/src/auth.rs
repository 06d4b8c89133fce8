//! Bearer 凭证提取与身份桥接。

use application::LocalIdentity;
use axum::http::{header, HeaderMap};

use crate::error::ApiError;
use crate::state::AppState;

pub fn bearer_token(headers: &HeaderMap) -> Option<&str> {
    headers
        .get(header::AUTHORIZATION)?
        .to_str()
        .ok()?
        .strip_prefix("Bearer ")
}

/// 每个请求独立走一次身份桥：校验外部凭证并 upsert 本地用户。
pub async fn bearer_identity(
    state: &AppState,
    headers: &HeaderMap,
) -> Result<LocalIdentity, ApiError> {
    state
        .identity_service
        .authenticate(bearer_token(headers))
        .await
        .map_err(ApiError::from)
}

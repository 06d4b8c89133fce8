use crate::value_objects::{Timestamp, UserId};

/// 本地身份记录，由外部身份提供方的资料 upsert 而来。
///
/// 以 `external_id` 为业务主键：每次认证成功都用提供方返回的
/// 资料覆盖本地字段（last-write-wins），本子系统从不删除用户。
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct User {
    pub id: UserId,
    pub external_id: String,
    pub name: String,
    pub email: String,
    pub photo: Option<String>,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: Timestamp,
    #[serde(with = "time::serde::rfc3339")]
    pub updated_at: Timestamp,
}

impl User {
    pub fn from_provider(
        id: UserId,
        external_id: impl Into<String>,
        name: impl Into<String>,
        email: impl Into<String>,
        photo: Option<String>,
        now: Timestamp,
    ) -> Self {
        Self {
            id,
            external_id: external_id.into(),
            name: name.into(),
            email: email.into(),
            photo,
            created_at: now,
            updated_at: now,
        }
    }

    /// 应用提供方下发的最新资料。
    pub fn apply_profile(
        &mut self,
        name: impl Into<String>,
        email: impl Into<String>,
        photo: Option<String>,
        now: Timestamp,
    ) {
        self.name = name.into();
        self.email = email.into();
        self.photo = photo;
        self.updated_at = now;
    }
}

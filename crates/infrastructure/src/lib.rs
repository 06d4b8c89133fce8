//! 基础设施层
//!
//! PostgreSQL 存储实现与外部身份提供方的 HTTP 适配。

pub mod identity;
pub mod repository;

pub use identity::HttpIdentityProvider;
pub use repository::{
    create_pg_pool, PgConversationRepository, PgMessageRepository, PgUserRepository,
};

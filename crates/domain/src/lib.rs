//! 会话引擎核心领域模型
//!
//! 包含用户、会话、消息等核心实体，以及房间命名与领域错误。

pub mod conversation;
pub mod errors;
pub mod message;
pub mod room;
pub mod user;
pub mod value_objects;

pub use conversation::{Conversation, Participant, ParticipantRole};
pub use errors::{DomainError, RepositoryError};
pub use message::{Message, MessageKind};
pub use room::Room;
pub use user::User;
pub use value_objects::{ConversationId, MessageId, Timestamp, UserId};

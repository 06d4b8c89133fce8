//! 应用层实现。
//!
//! 这里提供围绕领域模型的用例服务，处理输入校验、成员授权、
//! 以及对外部适配器（身份提供方、房间广播、存储）的抽象。

pub mod broadcaster;
pub mod clock;
pub mod dto;
pub mod error;
pub mod identity;
pub mod local_broadcast;
pub mod repository;
pub mod services;

pub use broadcaster::{
    BroadcastError, ConnectionId, LastMessagePreview, RoomBroadcaster, ServerEvent,
};
pub use clock::{Clock, SystemClock};
pub use dto::{ConversationView, LastMessageView, MessagePage, ParticipantView, UserSummary};
pub use error::ApplicationError;
pub use identity::{
    IdentityError, IdentityProvider, IdentityService, IdentityServiceDependencies, LocalIdentity,
    ProviderProfile,
};
pub use local_broadcast::LocalRoomRouter;
pub use repository::{
    memory::MemoryStorage, ConversationRepository, MessageRepository, UserRepository,
};
pub use services::{
    ChatService, ChatServiceDependencies, ConversationService, ConversationServiceDependencies,
    CreateGroupRequest, SendMessageRequest,
};

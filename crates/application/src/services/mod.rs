pub mod chat_service;
pub mod conversation_service;

#[cfg(test)]
mod conversation_service_tests;
#[cfg(test)]
pub(crate) mod test_support;

pub use chat_service::{ChatService, ChatServiceDependencies, SendMessageRequest};
pub use conversation_service::{
    ConversationService, ConversationServiceDependencies, CreateGroupRequest,
};

use std::sync::Arc;

use application::{ChatService, ConversationService, IdentityService, RoomBroadcaster};

#[derive(Clone)]
pub struct AppState {
    pub identity_service: Arc<IdentityService>,
    pub conversation_service: Arc<ConversationService>,
    pub chat_service: Arc<ChatService>,
    pub router: Arc<dyn RoomBroadcaster>,
}

impl AppState {
    pub fn new(
        identity_service: Arc<IdentityService>,
        conversation_service: Arc<ConversationService>,
        chat_service: Arc<ChatService>,
        router: Arc<dyn RoomBroadcaster>,
    ) -> Self {
        Self {
            identity_service,
            conversation_service,
            chat_service,
            router,
        }
    }
}

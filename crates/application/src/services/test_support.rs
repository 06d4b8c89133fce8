//! 服务层单元测试共用的测试环境。

use std::sync::Arc;

use domain::{Room, User, UserId};
use tokio::sync::mpsc::{self, UnboundedReceiver};
use uuid::Uuid;

use crate::broadcaster::{ConnectionId, RoomBroadcaster, ServerEvent};
use crate::clock::{Clock, SystemClock};
use crate::local_broadcast::LocalRoomRouter;
use crate::repository::memory::MemoryStorage;
use crate::repository::UserRepository;
use crate::services::{
    ChatService, ChatServiceDependencies, ConversationService, ConversationServiceDependencies,
};

pub struct TestHarness {
    pub storage: MemoryStorage,
    pub router: Arc<LocalRoomRouter>,
    pub chat: ChatService,
    pub conversations: ConversationService,
}

pub fn harness() -> TestHarness {
    let storage = MemoryStorage::new();
    let router = Arc::new(LocalRoomRouter::new());
    let clock: Arc<dyn Clock> = Arc::new(SystemClock);

    let chat = ChatService::new(ChatServiceDependencies {
        conversation_repository: Arc::new(storage.clone()),
        message_repository: Arc::new(storage.clone()),
        clock: clock.clone(),
        router: router.clone(),
    });
    let conversations = ConversationService::new(ConversationServiceDependencies {
        conversation_repository: Arc::new(storage.clone()),
        clock,
        router: router.clone(),
    });

    TestHarness {
        storage,
        router,
        chat,
        conversations,
    }
}

impl TestHarness {
    /// 模拟一次认证后的本地用户记录。
    pub async fn register_user(&self, name: &str) -> UserId {
        let user = User::from_provider(
            UserId::new(Uuid::new_v4()),
            format!("ext-{name}"),
            name,
            format!("{name}@example.com"),
            None,
            time::OffsetDateTime::now_utc(),
        );
        self.storage
            .upsert_by_external_id(user)
            .await
            .expect("upsert user")
            .id
    }

    /// 注册一条订阅了给定房间的监听连接。
    pub async fn listener(&self, rooms: &[Room]) -> (ConnectionId, UnboundedReceiver<ServerEvent>) {
        let connection = ConnectionId::generate();
        let (tx, rx) = mpsc::unbounded_channel();
        self.router.register(connection, tx).await;
        for room in rooms {
            self.router.join(connection, *room).await;
        }
        (connection, rx)
    }
}

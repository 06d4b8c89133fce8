//! 主应用程序入口
//!
//! 组装存储、身份桥、房间路由与用例服务，启动 Axum Web API。

use std::sync::Arc;

use application::{
    ChatService, ChatServiceDependencies, Clock, ConversationRepository, ConversationService,
    ConversationServiceDependencies, IdentityProvider, IdentityService,
    IdentityServiceDependencies, LocalRoomRouter, MessageRepository, RoomBroadcaster, SystemClock,
    UserRepository,
};
use config::AppConfig;
use infrastructure::{
    create_pg_pool, HttpIdentityProvider, PgConversationRepository, PgMessageRepository,
    PgUserRepository,
};
use tracing_subscriber::EnvFilter;
use web_api::{router, AppState};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let config = AppConfig::from_env_with_defaults();
    config.validate()?;

    tracing::info!(
        database = %config.database.url.split('@').next_back().unwrap_or("unknown"),
        identity = %config.identity.base_url,
        "加载配置完成"
    );

    let pg_pool = create_pg_pool(&config.database.url, config.database.max_connections).await?;
    sqlx::migrate!("../../migrations").run(&pg_pool).await?;

    let user_repository: Arc<dyn UserRepository> =
        Arc::new(PgUserRepository::new(pg_pool.clone()));
    let conversation_repository: Arc<dyn ConversationRepository> =
        Arc::new(PgConversationRepository::new(pg_pool.clone()));
    let message_repository: Arc<dyn MessageRepository> =
        Arc::new(PgMessageRepository::new(pg_pool));

    let clock: Arc<dyn Clock> = Arc::new(SystemClock);
    let room_router: Arc<dyn RoomBroadcaster> = Arc::new(LocalRoomRouter::new());
    let provider: Arc<dyn IdentityProvider> =
        Arc::new(HttpIdentityProvider::new(config.identity.base_url.clone()));

    let identity_service = IdentityService::new(IdentityServiceDependencies {
        provider,
        user_repository,
        clock: clock.clone(),
    });
    let conversation_service = ConversationService::new(ConversationServiceDependencies {
        conversation_repository: conversation_repository.clone(),
        clock: clock.clone(),
        router: room_router.clone(),
    });
    let chat_service = ChatService::new(ChatServiceDependencies {
        conversation_repository,
        message_repository,
        clock,
        router: room_router.clone(),
    });

    let state = AppState::new(
        Arc::new(identity_service),
        Arc::new(conversation_service),
        Arc::new(chat_service),
        room_router,
    );

    let app = router(state);
    let listener =
        tokio::net::TcpListener::bind((config.server.host.as_str(), config.server.port)).await?;

    tracing::info!(host = %config.server.host, port = config.server.port, "会话服务已启动");
    axum::serve(listener, app).await?;

    Ok(())
}

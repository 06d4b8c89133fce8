//! 端到端测试环境：内存存储 + 本地房间路由 + 桩身份提供方，
//! 在随机端口上起一个完整的服务。

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use application::{
    ChatService, ChatServiceDependencies, Clock, ConversationService,
    ConversationServiceDependencies, IdentityError, IdentityProvider, IdentityService,
    IdentityServiceDependencies, LocalRoomRouter, MemoryStorage, ProviderProfile, RoomBroadcaster,
    SystemClock,
};
use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpListener;
use tokio_tungstenite::tungstenite::Message as WsMessage;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use web_api::{router, AppState};

pub type WsClient = WebSocketStream<MaybeTlsStream<tokio::net::TcpStream>>;

/// 桩身份提供方：固定的 token → 资料映射。
struct StubIdentityProvider;

#[async_trait::async_trait]
impl IdentityProvider for StubIdentityProvider {
    async fn verify(&self, token: &str) -> Result<ProviderProfile, IdentityError> {
        let (external_id, name) = match token {
            "token-alice" => ("ext-alice", "Alice"),
            "token-bob" => ("ext-bob", "Bob"),
            "token-carol" => ("ext-carol", "Carol"),
            _ => return Err(IdentityError::Rejected),
        };
        Ok(ProviderProfile {
            external_id: external_id.to_string(),
            name: name.to_string(),
            email: format!("{name}@example.com").to_lowercase(),
            photo: None,
        })
    }
}

pub fn build_state() -> AppState {
    let storage = MemoryStorage::new();
    let room_router: Arc<dyn RoomBroadcaster> = Arc::new(LocalRoomRouter::new());
    let clock: Arc<dyn Clock> = Arc::new(SystemClock);

    let identity_service = IdentityService::new(IdentityServiceDependencies {
        provider: Arc::new(StubIdentityProvider),
        user_repository: Arc::new(storage.clone()),
        clock: clock.clone(),
    });
    let conversation_service = ConversationService::new(ConversationServiceDependencies {
        conversation_repository: Arc::new(storage.clone()),
        clock: clock.clone(),
        router: room_router.clone(),
    });
    let chat_service = ChatService::new(ChatServiceDependencies {
        conversation_repository: Arc::new(storage.clone()),
        message_repository: Arc::new(storage),
        clock,
        router: room_router.clone(),
    });

    AppState::new(
        Arc::new(identity_service),
        Arc::new(conversation_service),
        Arc::new(chat_service),
        room_router,
    )
}

/// 起一个真实监听的服务，返回地址。
pub async fn serve() -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
    let addr = listener.local_addr().expect("addr");
    let app = router(build_state());
    tokio::spawn(async move {
        axum::serve(listener, app).await.ok();
    });
    addr
}

/// 建立 WebSocket 连接并消费掉 `me` 事件，返回 (连接, 本地用户 id)。
pub async fn connect(addr: SocketAddr, token: &str) -> (WsClient, String) {
    let url = format!("ws://{addr}/api/v1/ws?token={token}");
    let (mut ws, _) = connect_async(url).await.expect("ws connect");

    let me = recv_json(&mut ws).await;
    assert_eq!(me["event"], "me");
    let local_id = me["data"]["localId"]
        .as_str()
        .expect("localId in me event")
        .to_string();
    (ws, local_id)
}

/// 读取下一个 JSON 帧，忽略心跳帧。
pub async fn recv_json(ws: &mut WsClient) -> serde_json::Value {
    loop {
        let frame = tokio::time::timeout(Duration::from_secs(5), ws.next())
            .await
            .expect("timed out waiting for websocket frame")
            .expect("websocket closed")
            .expect("websocket error");
        match frame {
            WsMessage::Text(text) => {
                return serde_json::from_str(text.as_str()).expect("json frame")
            }
            WsMessage::Ping(_) | WsMessage::Pong(_) => continue,
            other => panic!("unexpected frame: {other:?}"),
        }
    }
}

pub async fn send_json(ws: &mut WsClient, frame: serde_json::Value) {
    ws.send(WsMessage::Text(frame.to_string().into()))
        .await
        .expect("ws send");
}

/// 发送带 seq 的事件并等待对应的 ack，返回 ack 的 data。
/// 中途到达的推送事件原样返回给调用方。
pub async fn request(
    ws: &mut WsClient,
    seq: u64,
    frame: serde_json::Value,
) -> (serde_json::Value, Vec<serde_json::Value>) {
    send_json(ws, frame).await;
    let mut pushed = Vec::new();
    loop {
        let received = recv_json(ws).await;
        if received["event"] == "ack" && received["seq"] == seq {
            return (received["data"].clone(), pushed);
        }
        pushed.push(received);
    }
}

pub fn http(addr: SocketAddr, path: &str) -> String {
    format!("http://{addr}{path}")
}

use axum::{
    extract::{Path, Query, State, WebSocketUpgrade},
    http::{HeaderMap, StatusCode},
    response::Response,
    routing::{get, post},
    Json, Router,
};
use serde::Deserialize;
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use uuid::Uuid;

use application::{ConversationView, CreateGroupRequest, MessagePage};
use domain::Conversation;

use crate::auth::{bearer_identity, bearer_token};
use crate::error::ApiError;
use crate::state::AppState;
use crate::ws_connection::SessionConnection;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct CreateConversationPayload {
    #[serde(default)]
    is_group: bool,
    #[serde(default)]
    title: Option<String>,
    #[serde(default)]
    participant_ids: Vec<Uuid>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct AddParticipantsPayload {
    user_ids: Vec<Uuid>,
}

#[derive(Debug, Deserialize)]
struct MessagesQuery {
    page: Option<u32>,
    limit: Option<u32>,
}

#[derive(Debug, Deserialize)]
struct WsQuery {
    token: Option<String>,
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health))
        .nest("/api/v1", api_routes())
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}

fn api_routes() -> Router<AppState> {
    Router::new()
        .route(
            "/conversations",
            post(create_conversation).get(list_conversations),
        )
        .route(
            "/conversations/{conversation_id}/participants",
            post(add_participants),
        )
        .route(
            "/conversations/{conversation_id}/messages",
            get(get_messages),
        )
        .route("/ws", get(websocket_upgrade))
}

async fn health() -> StatusCode {
    StatusCode::OK
}

/// 单个参与者且非群聊时走两人会话的 find-or-create，其余建群。
async fn create_conversation(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(payload): Json<CreateConversationPayload>,
) -> Result<Json<Conversation>, ApiError> {
    let identity = bearer_identity(&state, &headers).await?;

    let conversation = if !payload.is_group && payload.participant_ids.len() == 1 {
        state
            .conversation_service
            .create_direct(identity.local_id, payload.participant_ids[0])
            .await?
    } else {
        state
            .conversation_service
            .create_group(CreateGroupRequest {
                creator_id: identity.local_id,
                participant_ids: payload.participant_ids,
                title: payload.title,
            })
            .await?
    };

    Ok(Json(conversation))
}

async fn list_conversations(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<Json<Vec<ConversationView>>, ApiError> {
    let identity = bearer_identity(&state, &headers).await?;
    let items = state
        .conversation_service
        .list_for_user(identity.local_id)
        .await?;
    Ok(Json(items))
}

async fn add_participants(
    State(state): State<AppState>,
    Path(conversation_id): Path<Uuid>,
    headers: HeaderMap,
    Json(payload): Json<AddParticipantsPayload>,
) -> Result<Json<Conversation>, ApiError> {
    let identity = bearer_identity(&state, &headers).await?;
    let conversation = state
        .conversation_service
        .add_participants(conversation_id, identity.local_id, payload.user_ids)
        .await?;
    Ok(Json(conversation))
}

async fn get_messages(
    State(state): State<AppState>,
    Path(conversation_id): Path<Uuid>,
    Query(query): Query<MessagesQuery>,
    headers: HeaderMap,
) -> Result<Json<MessagePage>, ApiError> {
    let identity = bearer_identity(&state, &headers).await?;
    let page = state
        .chat_service
        .list_messages(conversation_id, identity.local_id, query.page, query.limit)
        .await?;
    Ok(Json(page))
}

/// 凭证可放在 Authorization 头或握手的 `token` 查询参数里；
/// 认证在升级完成前进行，失败的连接直接拒绝。
async fn websocket_upgrade(
    State(state): State<AppState>,
    Query(query): Query<WsQuery>,
    headers: HeaderMap,
    ws: WebSocketUpgrade,
) -> Result<Response, ApiError> {
    let bearer = bearer_token(&headers).or(query.token.as_deref());
    let identity = state
        .identity_service
        .authenticate(bearer)
        .await
        .map_err(ApiError::from)?;

    let session = SessionConnection::new(state.clone(), identity);
    Ok(ws.on_upgrade(move |socket| session.run(socket)))
}

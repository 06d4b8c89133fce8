use std::sync::Arc;

use domain::{
    Conversation, ConversationId, DomainError, Message, MessageId, MessageKind, Room, UserId,
};
use uuid::Uuid;

use crate::broadcaster::{ConnectionId, LastMessagePreview, RoomBroadcaster, ServerEvent};
use crate::clock::Clock;
use crate::dto::MessagePage;
use crate::error::ApplicationError;
use crate::repository::{ConversationRepository, MessageRepository};

const DEFAULT_PAGE_SIZE: u32 = 50;
const MAX_PAGE_SIZE: u32 = 100;

#[derive(Debug, Clone)]
pub struct SendMessageRequest {
    pub conversation_id: Uuid,
    pub sender_id: UserId,
    pub kind: MessageKind,
    pub text: Option<String>,
    pub media_url: Option<String>,
}

pub struct ChatServiceDependencies {
    pub conversation_repository: Arc<dyn ConversationRepository>,
    pub message_repository: Arc<dyn MessageRepository>,
    pub clock: Arc<dyn Clock>,
    pub router: Arc<dyn RoomBroadcaster>,
}

/// 会话处理器背后的用例服务：成员校验、消息持久化、房间广播。
pub struct ChatService {
    deps: ChatServiceDependencies,
}

impl ChatService {
    pub fn new(deps: ChatServiceDependencies) -> Self {
        Self { deps }
    }

    /// 成员校验必须发生在任何写入之前。
    async fn load_for_participant(
        &self,
        conversation_id: ConversationId,
        user_id: UserId,
    ) -> Result<Conversation, ApplicationError> {
        let conversation = self
            .deps
            .conversation_repository
            .find_by_id(conversation_id)
            .await?
            .ok_or(DomainError::ConversationNotFound)?;
        if !conversation.is_participant(user_id) {
            return Err(DomainError::NotParticipant.into());
        }
        Ok(conversation)
    }

    /// 广播尽力而为：持久化成功后的投递失败只记日志，不回传调用方。
    async fn publish(&self, room: Room, event: ServerEvent, excluding: Option<ConnectionId>) {
        if let Err(err) = self.deps.router.broadcast(room, event, excluding).await {
            tracing::warn!(room = %room, error = %err, "broadcast failed");
        }
    }

    /// 加入会话房间前的校验；可重复调用，幂等。
    pub async fn join_conversation(
        &self,
        conversation_id: Uuid,
        user_id: UserId,
    ) -> Result<Conversation, ApplicationError> {
        self.load_for_participant(ConversationId::from(conversation_id), user_id)
            .await
    }

    /// 持久化消息并把结果扇出：先向会话房间推 `message:new`（包含
    /// 发送者自己的其他连接），再向每个参与者的个人房间推摘要，
    /// 无论对方是否已加入会话房间。
    pub async fn send_message(
        &self,
        request: SendMessageRequest,
    ) -> Result<Message, ApplicationError> {
        let conversation_id = ConversationId::from(request.conversation_id);
        let conversation = self
            .load_for_participant(conversation_id, request.sender_id)
            .await?;

        let message = Message::new(
            MessageId::from(Uuid::new_v4()),
            conversation_id,
            request.sender_id,
            request.kind,
            request.text,
            request.media_url,
            self.deps.clock.now(),
        )?;
        let stored = self.deps.message_repository.append(message).await?;

        self.publish(
            Room::Conversation(conversation_id),
            ServerEvent::MessageNew(stored.clone()),
            None,
        )
        .await;

        let preview = LastMessagePreview {
            text: stored.text.clone(),
            created_at: stored.created_at,
        };
        for participant in &conversation.participants {
            self.publish(
                Room::User(participant.user_id),
                ServerEvent::ConversationUpdate {
                    conversation_id,
                    last_message: preview.clone(),
                },
                None,
            )
            .await;
        }

        Ok(stored)
    }

    /// 输入指示不落盘，向会话房间转发并排除发起连接。
    pub async fn typing(
        &self,
        conversation_id: Uuid,
        user_id: UserId,
        connection: ConnectionId,
        is_typing: bool,
    ) {
        let conversation_id = ConversationId::from(conversation_id);
        self.publish(
            Room::Conversation(conversation_id),
            ServerEvent::Typing {
                conversation_id,
                user_id,
                is_typing,
            },
            Some(connection),
        )
        .await;
    }

    /// 幂等地累积已读回执。重复回执是客户端的正常行为，
    /// 集合不变也照样向会话房间广播确认。
    pub async fn message_read(
        &self,
        conversation_id: Uuid,
        message_id: Uuid,
        user_id: UserId,
    ) -> Result<(), ApplicationError> {
        let conversation_id = ConversationId::from(conversation_id);
        let message_id = MessageId::from(message_id);

        let message = self
            .deps
            .message_repository
            .find_by_id(message_id)
            .await?
            .ok_or(DomainError::MessageNotFound)?;
        if message.conversation_id != conversation_id {
            return Err(DomainError::MessageNotFound.into());
        }

        self.deps
            .message_repository
            .mark_read(message_id, user_id)
            .await?;

        self.publish(
            Room::Conversation(conversation_id),
            ServerEvent::MessageRead {
                message_id,
                user_id,
                timestamp: self.deps.clock.now(),
            },
            None,
        )
        .await;
        Ok(())
    }

    /// 历史分页：页从最新一页 (page=1) 往旧数，页内按时间正序返回。
    pub async fn list_messages(
        &self,
        conversation_id: Uuid,
        caller_id: UserId,
        page: Option<u32>,
        limit: Option<u32>,
    ) -> Result<MessagePage, ApplicationError> {
        let conversation_id = ConversationId::from(conversation_id);
        self.load_for_participant(conversation_id, caller_id)
            .await?;

        let page = page.unwrap_or(1).max(1);
        let limit = limit
            .unwrap_or(DEFAULT_PAGE_SIZE)
            .clamp(1, MAX_PAGE_SIZE);
        let offset = u64::from(page - 1) * u64::from(limit);

        let (messages, has_more) = self
            .deps
            .message_repository
            .list_page(conversation_id, offset, limit)
            .await?;
        Ok(MessagePage { messages, has_more })
    }
}

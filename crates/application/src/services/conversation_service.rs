use std::sync::Arc;

use domain::{Conversation, ConversationId, DomainError, Room, UserId};
use uuid::Uuid;

use crate::broadcaster::{RoomBroadcaster, ServerEvent};
use crate::clock::Clock;
use crate::dto::ConversationView;
use crate::error::ApplicationError;
use crate::repository::ConversationRepository;

#[derive(Debug, Clone)]
pub struct CreateGroupRequest {
    pub creator_id: UserId,
    pub participant_ids: Vec<Uuid>,
    pub title: Option<String>,
}

pub struct ConversationServiceDependencies {
    pub conversation_repository: Arc<dyn ConversationRepository>,
    pub clock: Arc<dyn Clock>,
    pub router: Arc<dyn RoomBroadcaster>,
}

/// 会话生命周期用例：创建、成员管理、列表查询。
pub struct ConversationService {
    deps: ConversationServiceDependencies,
}

impl ConversationService {
    pub fn new(deps: ConversationServiceDependencies) -> Self {
        Self { deps }
    }

    /// 两人会话的 find-or-create。并发下的去重交给存储层的
    /// 唯一约束，这里不持有任何锁。
    pub async fn create_direct(
        &self,
        creator_id: UserId,
        other_id: Uuid,
    ) -> Result<Conversation, ApplicationError> {
        let other_id = UserId::from(other_id);
        let candidate = Conversation::direct(
            ConversationId::from(Uuid::new_v4()),
            creator_id,
            other_id,
            self.deps.clock.now(),
        )?;
        let (conversation, created) = self
            .deps
            .conversation_repository
            .find_or_create_direct(candidate)
            .await?;

        if created {
            // 对端可能还没打开会话，推到个人房间让列表先出现
            if let Err(err) = self
                .deps
                .router
                .broadcast(
                    Room::User(other_id),
                    ServerEvent::ConversationNew(conversation.clone()),
                    None,
                )
                .await
            {
                tracing::warn!(error = %err, "conversation:new broadcast failed");
            }
        }
        Ok(conversation)
    }

    pub async fn create_group(
        &self,
        request: CreateGroupRequest,
    ) -> Result<Conversation, ApplicationError> {
        let participant_ids = request
            .participant_ids
            .into_iter()
            .map(UserId::from)
            .collect();
        let conversation = Conversation::group(
            ConversationId::from(Uuid::new_v4()),
            request.creator_id,
            participant_ids,
            request.title,
            self.deps.clock.now(),
        )?;
        self.deps
            .conversation_repository
            .create(conversation)
            .await
            .map_err(ApplicationError::from)
    }

    /// 只有现有参与者能拉人；校验失败不产生任何写入。
    pub async fn add_participants(
        &self,
        conversation_id: Uuid,
        caller_id: UserId,
        new_ids: Vec<Uuid>,
    ) -> Result<Conversation, ApplicationError> {
        let conversation_id = ConversationId::from(conversation_id);
        let conversation = self
            .deps
            .conversation_repository
            .find_by_id(conversation_id)
            .await?
            .ok_or(DomainError::ConversationNotFound)?;
        if !conversation.is_participant(caller_id) {
            return Err(DomainError::NotParticipant.into());
        }

        let new_ids: Vec<UserId> = new_ids.into_iter().map(UserId::from).collect();
        self.deps
            .conversation_repository
            .add_participants(conversation_id, &new_ids, self.deps.clock.now())
            .await
            .map_err(ApplicationError::from)
    }

    pub async fn list_for_user(
        &self,
        user_id: UserId,
    ) -> Result<Vec<ConversationView>, ApplicationError> {
        self.deps
            .conversation_repository
            .list_for_user(user_id)
            .await
            .map_err(ApplicationError::from)
    }
}

use async_trait::async_trait;
use domain::{
    Conversation, ConversationId, Message, MessageId, RepositoryError, Timestamp, User, UserId,
};

use crate::dto::ConversationView;

#[async_trait]
pub trait UserRepository: Send + Sync {
    /// 以外部 id 为键的幂等 upsert：首次见到即创建，
    /// 之后每次都用新资料覆盖（last-write-wins）。
    async fn upsert_by_external_id(&self, user: User) -> Result<User, RepositoryError>;
    async fn find_by_id(&self, id: UserId) -> Result<Option<User>, RepositoryError>;
}

#[async_trait]
pub trait ConversationRepository: Send + Sync {
    async fn create(&self, conversation: Conversation) -> Result<Conversation, RepositoryError>;
    /// 原子 find-or-create：同一无序用户对并发创建也只会产生一条
    /// 非群聊会话。返回 (会话, 是否新建)。
    async fn find_or_create_direct(
        &self,
        candidate: Conversation,
    ) -> Result<(Conversation, bool), RepositoryError>;
    async fn find_by_id(
        &self,
        id: ConversationId,
    ) -> Result<Option<Conversation>, RepositoryError>;
    /// 集合并集语义的成员追加，返回更新后的会话。
    async fn add_participants(
        &self,
        id: ConversationId,
        user_ids: &[UserId],
        joined_at: Timestamp,
    ) -> Result<Conversation, RepositoryError>;
    /// 用户参与的会话，按更新时间倒序，身份与最新消息已解析。
    async fn list_for_user(&self, user_id: UserId)
        -> Result<Vec<ConversationView>, RepositoryError>;
}

#[async_trait]
pub trait MessageRepository: Send + Sync {
    /// 写入消息并在同一事务内刷新会话的最新消息指针与更新时间。
    async fn append(&self, message: Message) -> Result<Message, RepositoryError>;
    async fn find_by_id(&self, id: MessageId) -> Result<Option<Message>, RepositoryError>;
    /// 原子的已读集合追加；重复调用是无操作。
    async fn mark_read(&self, id: MessageId, user_id: UserId) -> Result<Message, RepositoryError>;
    /// 从最新往回数 `offset` 条后取一页，页内按时间正序返回；
    /// 布尔值表示是否还有更旧的页。
    async fn list_page(
        &self,
        conversation_id: ConversationId,
        offset: u64,
        limit: u32,
    ) -> Result<(Vec<Message>, bool), RepositoryError>;
}

pub mod memory {
    //! 内存存储实现，用于测试与无数据库的本地运行。
    //!
    //! 所有仓储共享一把互斥锁，天然满足 find-or-create 与
    //! 已读集合追加的原子性要求。

    use std::collections::HashMap;
    use std::sync::Arc;

    use tokio::sync::Mutex;

    use super::*;
    use crate::dto::{ConversationView, LastMessageView, ParticipantView, UserSummary};

    #[derive(Default)]
    struct StorageState {
        users: HashMap<UserId, User>,
        users_by_external: HashMap<String, UserId>,
        conversations: HashMap<ConversationId, Conversation>,
        direct_index: HashMap<String, ConversationId>,
        messages: HashMap<MessageId, Message>,
        // 每个会话的消息按写入顺序排列，即时间正序
        timeline: HashMap<ConversationId, Vec<MessageId>>,
    }

    impl StorageState {
        fn summary(&self, user_id: UserId) -> Option<UserSummary> {
            self.users.get(&user_id).map(|user| UserSummary {
                id: user.id,
                name: user.name.clone(),
                photo: user.photo.clone(),
            })
        }

        fn view(&self, conversation: &Conversation) -> ConversationView {
            let participants = conversation
                .participants
                .iter()
                .map(|p| ParticipantView {
                    user_id: p.user_id,
                    role: p.role,
                    user: self.summary(p.user_id),
                })
                .collect();

            let last_message = conversation
                .last_message_id
                .and_then(|id| self.messages.get(&id))
                .map(|message| LastMessageView {
                    id: message.id,
                    kind: message.kind,
                    text: message.text.clone(),
                    media_url: message.media_url.clone(),
                    created_at: message.created_at,
                    sender: self.summary(message.sender_id),
                });

            ConversationView {
                id: conversation.id,
                title: conversation.title.clone(),
                is_group: conversation.is_group,
                participants,
                last_message,
                created_at: conversation.created_at,
                updated_at: conversation.updated_at,
            }
        }
    }

    #[derive(Clone, Default)]
    pub struct MemoryStorage {
        state: Arc<Mutex<StorageState>>,
    }

    impl MemoryStorage {
        pub fn new() -> Self {
            Self::default()
        }
    }

    #[async_trait]
    impl UserRepository for MemoryStorage {
        async fn upsert_by_external_id(&self, user: User) -> Result<User, RepositoryError> {
            let mut state = self.state.lock().await;
            if let Some(existing_id) = state.users_by_external.get(&user.external_id).copied() {
                let existing = state
                    .users
                    .get_mut(&existing_id)
                    .ok_or(RepositoryError::NotFound)?;
                existing.apply_profile(user.name, user.email, user.photo, user.updated_at);
                return Ok(existing.clone());
            }
            state
                .users_by_external
                .insert(user.external_id.clone(), user.id);
            state.users.insert(user.id, user.clone());
            Ok(user)
        }

        async fn find_by_id(&self, id: UserId) -> Result<Option<User>, RepositoryError> {
            let state = self.state.lock().await;
            Ok(state.users.get(&id).cloned())
        }
    }

    #[async_trait]
    impl ConversationRepository for MemoryStorage {
        async fn create(
            &self,
            conversation: Conversation,
        ) -> Result<Conversation, RepositoryError> {
            let mut state = self.state.lock().await;
            if state.conversations.contains_key(&conversation.id) {
                return Err(RepositoryError::Conflict);
            }
            state
                .conversations
                .insert(conversation.id, conversation.clone());
            Ok(conversation)
        }

        async fn find_or_create_direct(
            &self,
            candidate: Conversation,
        ) -> Result<(Conversation, bool), RepositoryError> {
            let mut state = self.state.lock().await;
            let [a, b] = [candidate.participants[0].user_id, candidate.participants[1].user_id];
            let key = Conversation::direct_key(a, b);
            if let Some(existing_id) = state.direct_index.get(&key).copied() {
                let existing = state
                    .conversations
                    .get(&existing_id)
                    .cloned()
                    .ok_or(RepositoryError::NotFound)?;
                return Ok((existing, false));
            }
            state.direct_index.insert(key, candidate.id);
            state
                .conversations
                .insert(candidate.id, candidate.clone());
            Ok((candidate, true))
        }

        async fn find_by_id(
            &self,
            id: ConversationId,
        ) -> Result<Option<Conversation>, RepositoryError> {
            let state = self.state.lock().await;
            Ok(state.conversations.get(&id).cloned())
        }

        async fn add_participants(
            &self,
            id: ConversationId,
            user_ids: &[UserId],
            joined_at: Timestamp,
        ) -> Result<Conversation, RepositoryError> {
            let mut state = self.state.lock().await;
            let conversation = state
                .conversations
                .get_mut(&id)
                .ok_or(RepositoryError::NotFound)?;
            conversation.add_participants(user_ids, joined_at);
            Ok(conversation.clone())
        }

        async fn list_for_user(
            &self,
            user_id: UserId,
        ) -> Result<Vec<ConversationView>, RepositoryError> {
            let state = self.state.lock().await;
            let mut items: Vec<&Conversation> = state
                .conversations
                .values()
                .filter(|c| c.is_participant(user_id))
                .collect();
            items.sort_by(|a, b| b.updated_at.cmp(&a.updated_at));
            Ok(items.into_iter().map(|c| state.view(c)).collect())
        }
    }

    #[async_trait]
    impl MessageRepository for MemoryStorage {
        async fn append(&self, message: Message) -> Result<Message, RepositoryError> {
            let mut state = self.state.lock().await;
            let conversation = state
                .conversations
                .get_mut(&message.conversation_id)
                .ok_or(RepositoryError::NotFound)?;
            conversation.record_message(message.id, message.created_at);
            state
                .timeline
                .entry(message.conversation_id)
                .or_default()
                .push(message.id);
            state.messages.insert(message.id, message.clone());
            Ok(message)
        }

        async fn find_by_id(&self, id: MessageId) -> Result<Option<Message>, RepositoryError> {
            let state = self.state.lock().await;
            Ok(state.messages.get(&id).cloned())
        }

        async fn mark_read(
            &self,
            id: MessageId,
            user_id: UserId,
        ) -> Result<Message, RepositoryError> {
            let mut state = self.state.lock().await;
            let message = state.messages.get_mut(&id).ok_or(RepositoryError::NotFound)?;
            message.mark_read(user_id);
            Ok(message.clone())
        }

        async fn list_page(
            &self,
            conversation_id: ConversationId,
            offset: u64,
            limit: u32,
        ) -> Result<(Vec<Message>, bool), RepositoryError> {
            let state = self.state.lock().await;
            let timeline = state
                .timeline
                .get(&conversation_id)
                .map(Vec::as_slice)
                .unwrap_or_default();
            let total = timeline.len();
            let offset = usize::try_from(offset).unwrap_or(usize::MAX);
            if offset >= total {
                return Ok((Vec::new(), false));
            }
            let end = total - offset;
            let start = end.saturating_sub(limit as usize);
            let messages = timeline[start..end]
                .iter()
                .filter_map(|id| state.messages.get(id).cloned())
                .collect();
            Ok((messages, start > 0))
        }
    }
}

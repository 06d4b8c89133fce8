//! PostgreSQL 仓储实现。
//!
//! 两处关键的原子性都压在数据库上：两人会话的唯一性由
//! `direct_key` 唯一索引保证，已读集合的追加由带包含检查的
//! 单条 UPDATE 保证，多进程部署下同样成立。

use std::collections::HashMap;

use application::{
    ConversationRepository, ConversationView, LastMessageView, MessageRepository, ParticipantView,
    UserRepository, UserSummary,
};
use async_trait::async_trait;
use domain::{
    Conversation, ConversationId, Message, MessageId, MessageKind, Participant, ParticipantRole,
    RepositoryError, Timestamp, User, UserId,
};
use sqlx::postgres::PgPoolOptions;
use sqlx::{FromRow, PgPool};
use time::OffsetDateTime;
use uuid::Uuid;

fn map_sqlx_err(err: sqlx::Error) -> RepositoryError {
    RepositoryError::storage(err.to_string())
}

#[derive(Debug, FromRow)]
struct UserRecord {
    id: Uuid,
    external_id: String,
    name: String,
    email: String,
    photo: Option<String>,
    created_at: OffsetDateTime,
    updated_at: OffsetDateTime,
}

impl From<UserRecord> for User {
    fn from(value: UserRecord) -> Self {
        User {
            id: UserId::from(value.id),
            external_id: value.external_id,
            name: value.name,
            email: value.email,
            photo: value.photo,
            created_at: value.created_at,
            updated_at: value.updated_at,
        }
    }
}

#[derive(Debug, FromRow)]
struct ConversationRecord {
    id: Uuid,
    title: Option<String>,
    is_group: bool,
    last_message_id: Option<Uuid>,
    created_at: OffsetDateTime,
    updated_at: OffsetDateTime,
}

#[derive(Debug, FromRow)]
struct ParticipantRecord {
    conversation_id: Uuid,
    user_id: Uuid,
    role: ParticipantRole,
}

impl ConversationRecord {
    fn into_conversation(self, participants: Vec<Participant>) -> Conversation {
        Conversation {
            id: ConversationId::from(self.id),
            title: self.title,
            is_group: self.is_group,
            participants,
            last_message_id: self.last_message_id.map(MessageId::from),
            created_at: self.created_at,
            updated_at: self.updated_at,
        }
    }
}

#[derive(Debug, FromRow)]
struct MessageRecord {
    id: Uuid,
    conversation_id: Uuid,
    sender_id: Uuid,
    kind: MessageKind,
    text: Option<String>,
    media_url: Option<String>,
    read_by: Vec<Uuid>,
    created_at: OffsetDateTime,
}

impl From<MessageRecord> for Message {
    fn from(value: MessageRecord) -> Self {
        Message {
            id: MessageId::from(value.id),
            conversation_id: ConversationId::from(value.conversation_id),
            sender_id: UserId::from(value.sender_id),
            kind: value.kind,
            text: value.text,
            media_url: value.media_url,
            read_by: value.read_by.into_iter().map(UserId::from).collect(),
            created_at: value.created_at,
        }
    }
}

#[derive(Clone)]
pub struct PgUserRepository {
    pool: PgPool,
}

impl PgUserRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl UserRepository for PgUserRepository {
    async fn upsert_by_external_id(&self, user: User) -> Result<User, RepositoryError> {
        let record = sqlx::query_as::<_, UserRecord>(
            r#"
            INSERT INTO users (id, external_id, name, email, photo, created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6, $6)
            ON CONFLICT (external_id)
            DO UPDATE SET name = EXCLUDED.name, email = EXCLUDED.email,
                          photo = EXCLUDED.photo, updated_at = EXCLUDED.updated_at
            RETURNING id, external_id, name, email, photo, created_at, updated_at
            "#,
        )
        .bind(Uuid::from(user.id))
        .bind(&user.external_id)
        .bind(&user.name)
        .bind(&user.email)
        .bind(&user.photo)
        .bind(user.updated_at)
        .fetch_one(&self.pool)
        .await
        .map_err(map_sqlx_err)?;

        Ok(User::from(record))
    }

    async fn find_by_id(&self, id: UserId) -> Result<Option<User>, RepositoryError> {
        let record = sqlx::query_as::<_, UserRecord>(
            r#"SELECT id, external_id, name, email, photo, created_at, updated_at FROM users WHERE id = $1"#,
        )
        .bind(Uuid::from(id))
        .fetch_optional(&self.pool)
        .await
        .map_err(map_sqlx_err)?;

        Ok(record.map(User::from))
    }
}

#[derive(Clone)]
pub struct PgConversationRepository {
    pool: PgPool,
}

impl PgConversationRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    async fn load_participants(
        &self,
        conversation_ids: &[Uuid],
    ) -> Result<HashMap<Uuid, Vec<Participant>>, RepositoryError> {
        let records = sqlx::query_as::<_, ParticipantRecord>(
            r#"
            SELECT conversation_id, user_id, role
            FROM conversation_participants
            WHERE conversation_id = ANY($1)
            ORDER BY seq
            "#,
        )
        .bind(conversation_ids)
        .fetch_all(&self.pool)
        .await
        .map_err(map_sqlx_err)?;

        let mut by_conversation: HashMap<Uuid, Vec<Participant>> = HashMap::new();
        for record in records {
            by_conversation
                .entry(record.conversation_id)
                .or_default()
                .push(Participant {
                    user_id: UserId::from(record.user_id),
                    role: record.role,
                });
        }
        Ok(by_conversation)
    }

    async fn load(&self, id: Uuid) -> Result<Option<Conversation>, RepositoryError> {
        let record = sqlx::query_as::<_, ConversationRecord>(
            r#"
            SELECT id, title, is_group, last_message_id, created_at, updated_at
            FROM conversations WHERE id = $1
            "#,
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await
        .map_err(map_sqlx_err)?;

        let Some(record) = record else {
            return Ok(None);
        };
        let mut participants = self.load_participants(&[record.id]).await?;
        let participants = participants.remove(&record.id).unwrap_or_default();
        Ok(Some(record.into_conversation(participants)))
    }
}

async fn insert_participants(
    tx: &mut sqlx::Transaction<'_, sqlx::Postgres>,
    conversation_id: Uuid,
    participants: &[Participant],
    joined_at: Timestamp,
) -> Result<(), RepositoryError> {
    // 逐条插入保证 seq 反映参与者的插入顺序
    for participant in participants {
        sqlx::query(
            r#"
            INSERT INTO conversation_participants (conversation_id, user_id, role, joined_at)
            VALUES ($1, $2, $3, $4)
            ON CONFLICT (conversation_id, user_id) DO NOTHING
            "#,
        )
        .bind(conversation_id)
        .bind(Uuid::from(participant.user_id))
        .bind(participant.role)
        .bind(joined_at)
        .execute(&mut **tx)
        .await
        .map_err(map_sqlx_err)?;
    }
    Ok(())
}

#[async_trait]
impl ConversationRepository for PgConversationRepository {
    async fn create(&self, conversation: Conversation) -> Result<Conversation, RepositoryError> {
        let mut tx = self.pool.begin().await.map_err(map_sqlx_err)?;

        sqlx::query(
            r#"
            INSERT INTO conversations (id, title, is_group, direct_key, created_at, updated_at)
            VALUES ($1, $2, $3, NULL, $4, $5)
            "#,
        )
        .bind(Uuid::from(conversation.id))
        .bind(&conversation.title)
        .bind(conversation.is_group)
        .bind(conversation.created_at)
        .bind(conversation.updated_at)
        .execute(&mut *tx)
        .await
        .map_err(map_sqlx_err)?;

        insert_participants(
            &mut tx,
            Uuid::from(conversation.id),
            &conversation.participants,
            conversation.created_at,
        )
        .await?;

        tx.commit().await.map_err(map_sqlx_err)?;
        Ok(conversation)
    }

    async fn find_or_create_direct(
        &self,
        candidate: Conversation,
    ) -> Result<(Conversation, bool), RepositoryError> {
        let [a, b] = [
            candidate.participants[0].user_id,
            candidate.participants[1].user_id,
        ];
        let direct_key = Conversation::direct_key(a, b);

        let mut tx = self.pool.begin().await.map_err(map_sqlx_err)?;

        // 唯一索引吸收并发的首次创建；输掉竞态的一方读到赢家的记录
        let inserted = sqlx::query(
            r#"
            INSERT INTO conversations (id, title, is_group, direct_key, created_at, updated_at)
            VALUES ($1, NULL, FALSE, $2, $3, $3)
            ON CONFLICT (direct_key) DO NOTHING
            "#,
        )
        .bind(Uuid::from(candidate.id))
        .bind(&direct_key)
        .bind(candidate.created_at)
        .execute(&mut *tx)
        .await
        .map_err(map_sqlx_err)?
        .rows_affected();

        if inserted == 1 {
            insert_participants(
                &mut tx,
                Uuid::from(candidate.id),
                &candidate.participants,
                candidate.created_at,
            )
            .await?;
        }
        tx.commit().await.map_err(map_sqlx_err)?;

        let id: Uuid =
            sqlx::query_scalar(r#"SELECT id FROM conversations WHERE direct_key = $1"#)
                .bind(&direct_key)
                .fetch_one(&self.pool)
                .await
                .map_err(map_sqlx_err)?;

        let conversation = self.load(id).await?.ok_or(RepositoryError::NotFound)?;
        Ok((conversation, inserted == 1))
    }

    async fn find_by_id(
        &self,
        id: ConversationId,
    ) -> Result<Option<Conversation>, RepositoryError> {
        self.load(Uuid::from(id)).await
    }

    async fn add_participants(
        &self,
        id: ConversationId,
        user_ids: &[UserId],
        joined_at: Timestamp,
    ) -> Result<Conversation, RepositoryError> {
        let conversation_id = Uuid::from(id);
        let mut tx = self.pool.begin().await.map_err(map_sqlx_err)?;

        let participants: Vec<Participant> =
            user_ids.iter().copied().map(Participant::member).collect();
        insert_participants(&mut tx, conversation_id, &participants, joined_at).await?;

        let touched = sqlx::query(r#"UPDATE conversations SET updated_at = $2 WHERE id = $1"#)
            .bind(conversation_id)
            .bind(joined_at)
            .execute(&mut *tx)
            .await
            .map_err(map_sqlx_err)?
            .rows_affected();
        if touched == 0 {
            return Err(RepositoryError::NotFound);
        }

        tx.commit().await.map_err(map_sqlx_err)?;
        self.load(conversation_id)
            .await?
            .ok_or(RepositoryError::NotFound)
    }

    async fn list_for_user(
        &self,
        user_id: UserId,
    ) -> Result<Vec<ConversationView>, RepositoryError> {
        let records = sqlx::query_as::<_, ConversationRecord>(
            r#"
            SELECT c.id, c.title, c.is_group, c.last_message_id, c.created_at, c.updated_at
            FROM conversations c
            JOIN conversation_participants cp ON cp.conversation_id = c.id
            WHERE cp.user_id = $1
            ORDER BY c.updated_at DESC
            "#,
        )
        .bind(Uuid::from(user_id))
        .fetch_all(&self.pool)
        .await
        .map_err(map_sqlx_err)?;

        if records.is_empty() {
            return Ok(Vec::new());
        }

        let conversation_ids: Vec<Uuid> = records.iter().map(|r| r.id).collect();
        let participants = self.load_participant_views(&conversation_ids).await?;
        let message_ids: Vec<Uuid> = records.iter().filter_map(|r| r.last_message_id).collect();
        let last_messages = self.load_last_messages(&message_ids).await?;

        Ok(records
            .into_iter()
            .map(|record| {
                let last_message = record
                    .last_message_id
                    .and_then(|id| last_messages.get(&id).cloned());
                ConversationView {
                    id: ConversationId::from(record.id),
                    title: record.title,
                    is_group: record.is_group,
                    participants: participants.get(&record.id).cloned().unwrap_or_default(),
                    last_message,
                    created_at: record.created_at,
                    updated_at: record.updated_at,
                }
            })
            .collect())
    }
}

#[derive(Debug, FromRow)]
struct ParticipantViewRecord {
    conversation_id: Uuid,
    user_id: Uuid,
    role: ParticipantRole,
    joined_id: Option<Uuid>,
    name: Option<String>,
    photo: Option<String>,
}

#[derive(Debug, FromRow)]
struct LastMessageRecord {
    id: Uuid,
    kind: MessageKind,
    text: Option<String>,
    media_url: Option<String>,
    created_at: OffsetDateTime,
    sender_joined_id: Option<Uuid>,
    sender_name: Option<String>,
    sender_photo: Option<String>,
}

impl PgConversationRepository {
    /// 读取时做反范式关联：参与者身份一并解析。
    async fn load_participant_views(
        &self,
        conversation_ids: &[Uuid],
    ) -> Result<HashMap<Uuid, Vec<ParticipantView>>, RepositoryError> {
        let records = sqlx::query_as::<_, ParticipantViewRecord>(
            r#"
            SELECT p.conversation_id, p.user_id, p.role,
                   u.id AS joined_id, u.name, u.photo
            FROM conversation_participants p
            LEFT JOIN users u ON u.id = p.user_id
            WHERE p.conversation_id = ANY($1)
            ORDER BY p.seq
            "#,
        )
        .bind(conversation_ids)
        .fetch_all(&self.pool)
        .await
        .map_err(map_sqlx_err)?;

        let mut by_conversation: HashMap<Uuid, Vec<ParticipantView>> = HashMap::new();
        for record in records {
            let user = record.joined_id.map(|id| UserSummary {
                id: UserId::from(id),
                name: record.name.clone().unwrap_or_default(),
                photo: record.photo.clone(),
            });
            by_conversation
                .entry(record.conversation_id)
                .or_default()
                .push(ParticipantView {
                    user_id: UserId::from(record.user_id),
                    role: record.role,
                    user,
                });
        }
        Ok(by_conversation)
    }

    async fn load_last_messages(
        &self,
        message_ids: &[Uuid],
    ) -> Result<HashMap<Uuid, LastMessageView>, RepositoryError> {
        if message_ids.is_empty() {
            return Ok(HashMap::new());
        }
        let records = sqlx::query_as::<_, LastMessageRecord>(
            r#"
            SELECT m.id, m.kind, m.text, m.media_url, m.created_at,
                   u.id AS sender_joined_id, u.name AS sender_name, u.photo AS sender_photo
            FROM messages m
            LEFT JOIN users u ON u.id = m.sender_id
            WHERE m.id = ANY($1)
            "#,
        )
        .bind(message_ids)
        .fetch_all(&self.pool)
        .await
        .map_err(map_sqlx_err)?;

        Ok(records
            .into_iter()
            .map(|record| {
                let sender = record.sender_joined_id.map(|id| UserSummary {
                    id: UserId::from(id),
                    name: record.sender_name.clone().unwrap_or_default(),
                    photo: record.sender_photo.clone(),
                });
                (
                    record.id,
                    LastMessageView {
                        id: MessageId::from(record.id),
                        kind: record.kind,
                        text: record.text,
                        media_url: record.media_url,
                        created_at: record.created_at,
                        sender,
                    },
                )
            })
            .collect())
    }
}

#[derive(Clone)]
pub struct PgMessageRepository {
    pool: PgPool,
}

impl PgMessageRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

const MESSAGE_COLUMNS: &str =
    "id, conversation_id, sender_id, kind, text, media_url, read_by, created_at";

#[async_trait]
impl MessageRepository for PgMessageRepository {
    async fn append(&self, message: Message) -> Result<Message, RepositoryError> {
        let mut tx = self.pool.begin().await.map_err(map_sqlx_err)?;

        let read_by: Vec<Uuid> = message.read_by.iter().copied().map(Uuid::from).collect();
        let record = sqlx::query_as::<_, MessageRecord>(&format!(
            r#"
            INSERT INTO messages (id, conversation_id, sender_id, kind, text, media_url, read_by, created_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            RETURNING {MESSAGE_COLUMNS}
            "#,
        ))
        .bind(Uuid::from(message.id))
        .bind(Uuid::from(message.conversation_id))
        .bind(Uuid::from(message.sender_id))
        .bind(message.kind)
        .bind(&message.text)
        .bind(&message.media_url)
        .bind(&read_by)
        .bind(message.created_at)
        .fetch_one(&mut *tx)
        .await
        .map_err(map_sqlx_err)?;

        // 同一事务内刷新会话的最新消息指针与更新时间
        let touched = sqlx::query(
            r#"UPDATE conversations SET last_message_id = $2, updated_at = $3 WHERE id = $1"#,
        )
        .bind(Uuid::from(message.conversation_id))
        .bind(Uuid::from(message.id))
        .bind(message.created_at)
        .execute(&mut *tx)
        .await
        .map_err(map_sqlx_err)?
        .rows_affected();
        if touched == 0 {
            return Err(RepositoryError::NotFound);
        }

        tx.commit().await.map_err(map_sqlx_err)?;
        Ok(Message::from(record))
    }

    async fn find_by_id(&self, id: MessageId) -> Result<Option<Message>, RepositoryError> {
        let record = sqlx::query_as::<_, MessageRecord>(&format!(
            r#"SELECT {MESSAGE_COLUMNS} FROM messages WHERE id = $1"#
        ))
        .bind(Uuid::from(id))
        .fetch_optional(&self.pool)
        .await
        .map_err(map_sqlx_err)?;

        Ok(record.map(Message::from))
    }

    async fn mark_read(&self, id: MessageId, user_id: UserId) -> Result<Message, RepositoryError> {
        // 包含检查 + 追加在单条语句内完成，重复回执不会写入第二次
        sqlx::query(
            r#"
            UPDATE messages
            SET read_by = read_by || $2::uuid
            WHERE id = $1 AND NOT (read_by @> ARRAY[$2::uuid])
            "#,
        )
        .bind(Uuid::from(id))
        .bind(Uuid::from(user_id))
        .execute(&self.pool)
        .await
        .map_err(map_sqlx_err)?;

        self.find_by_id(id).await?.ok_or(RepositoryError::NotFound)
    }

    async fn list_page(
        &self,
        conversation_id: ConversationId,
        offset: u64,
        limit: u32,
    ) -> Result<(Vec<Message>, bool), RepositoryError> {
        // 多取一条探测是否还有更旧的页
        let records = sqlx::query_as::<_, MessageRecord>(&format!(
            r#"
            SELECT {MESSAGE_COLUMNS}
            FROM messages
            WHERE conversation_id = $1
            ORDER BY created_at DESC, id DESC
            OFFSET $2 LIMIT $3
            "#,
        ))
        .bind(Uuid::from(conversation_id))
        .bind(offset as i64)
        .bind(i64::from(limit) + 1)
        .fetch_all(&self.pool)
        .await
        .map_err(map_sqlx_err)?;

        let has_more = records.len() > limit as usize;
        let mut messages: Vec<Message> = records
            .into_iter()
            .take(limit as usize)
            .map(Message::from)
            .collect();
        messages.reverse();
        Ok((messages, has_more))
    }
}

pub async fn create_pg_pool(
    database_url: &str,
    max_connections: u32,
) -> Result<PgPool, sqlx::Error> {
    PgPoolOptions::new()
        .max_connections(max_connections)
        .connect(database_url)
        .await
}

use crate::errors::DomainError;
use crate::value_objects::{ConversationId, MessageId, Timestamp, UserId};

#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize, sqlx::Type)]
#[sqlx(type_name = "message_kind", rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum MessageKind {
    Text,
    Image,
    File,
}

/// 消息实体，追加写入。
///
/// 创建后只有已读集合可以变化：集合单调增长，重复回执是无操作。
/// 发送者在创建时即进入已读集合。
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Message {
    pub id: MessageId,
    pub conversation_id: ConversationId,
    pub sender_id: UserId,
    pub kind: MessageKind,
    pub text: Option<String>,
    pub media_url: Option<String>,
    pub read_by: Vec<UserId>,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: Timestamp,
}

impl Message {
    pub fn new(
        id: MessageId,
        conversation_id: ConversationId,
        sender_id: UserId,
        kind: MessageKind,
        text: Option<String>,
        media_url: Option<String>,
        created_at: Timestamp,
    ) -> Result<Self, DomainError> {
        let text = text.filter(|t| !t.trim().is_empty());
        match kind {
            MessageKind::Text => {
                if text.is_none() {
                    return Err(DomainError::invalid_argument("text", "cannot be empty"));
                }
            }
            MessageKind::Image | MessageKind::File => {
                if media_url.is_none() {
                    return Err(DomainError::invalid_argument("mediaUrl", "is required"));
                }
            }
        }

        Ok(Self {
            id,
            conversation_id,
            sender_id,
            kind,
            text,
            media_url,
            read_by: vec![sender_id],
            created_at,
        })
    }

    pub fn is_read_by(&self, user_id: UserId) -> bool {
        self.read_by.contains(&user_id)
    }

    /// 幂等的已读回执：仅在 id 不在集合内时加入，返回集合是否变化。
    pub fn mark_read(&mut self, user_id: UserId) -> bool {
        if self.is_read_by(user_id) {
            return false;
        }
        self.read_by.push(user_id);
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use time::OffsetDateTime;
    use uuid::Uuid;

    fn text_message(sender: UserId) -> Message {
        Message::new(
            MessageId::new(Uuid::new_v4()),
            ConversationId::new(Uuid::new_v4()),
            sender,
            MessageKind::Text,
            Some("hi".to_string()),
            None,
            OffsetDateTime::now_utc(),
        )
        .unwrap()
    }

    #[test]
    fn sender_is_in_read_set_at_creation() {
        let sender = UserId::new(Uuid::new_v4());
        let message = text_message(sender);
        assert_eq!(message.read_by, vec![sender]);
    }

    #[test]
    fn mark_read_is_idempotent() {
        let sender = UserId::new(Uuid::new_v4());
        let reader = UserId::new(Uuid::new_v4());
        let mut message = text_message(sender);

        assert!(message.mark_read(reader));
        assert!(!message.mark_read(reader));
        assert!(!message.mark_read(sender));
        assert_eq!(message.read_by, vec![sender, reader]);
    }

    #[test]
    fn text_kind_requires_text() {
        let result = Message::new(
            MessageId::new(Uuid::new_v4()),
            ConversationId::new(Uuid::new_v4()),
            UserId::new(Uuid::new_v4()),
            MessageKind::Text,
            Some("   ".to_string()),
            None,
            OffsetDateTime::now_utc(),
        );
        assert!(matches!(result, Err(DomainError::InvalidArgument { .. })));
    }

    #[test]
    fn media_kinds_require_media_url() {
        let result = Message::new(
            MessageId::new(Uuid::new_v4()),
            ConversationId::new(Uuid::new_v4()),
            UserId::new(Uuid::new_v4()),
            MessageKind::Image,
            None,
            None,
            OffsetDateTime::now_utc(),
        );
        assert!(matches!(result, Err(DomainError::InvalidArgument { .. })));

        let message = Message::new(
            MessageId::new(Uuid::new_v4()),
            ConversationId::new(Uuid::new_v4()),
            UserId::new(Uuid::new_v4()),
            MessageKind::Image,
            None,
            Some("https://cdn.example.com/a.png".to_string()),
            OffsetDateTime::now_utc(),
        )
        .unwrap();
        assert!(message.text.is_none());
    }

    #[test]
    fn serializes_with_camel_case_wire_names() {
        let message = text_message(UserId::new(Uuid::new_v4()));
        let value = serde_json::to_value(&message).unwrap();
        assert!(value.get("conversationId").is_some());
        assert!(value.get("mediaUrl").is_some());
        assert!(value.get("readBy").is_some());
        assert!(value.get("createdAt").is_some());
    }
}

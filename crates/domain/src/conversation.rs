use crate::errors::DomainError;
use crate::value_objects::{ConversationId, MessageId, Timestamp, UserId};

#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize, sqlx::Type)]
#[sqlx(type_name = "participant_role", rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum ParticipantRole {
    Admin,
    Member,
}

#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Participant {
    pub user_id: UserId,
    pub role: ParticipantRole,
}

impl Participant {
    pub fn member(user_id: UserId) -> Self {
        Self {
            user_id,
            role: ParticipantRole::Member,
        }
    }
}

/// 会话实体。
///
/// 参与者列表保持插入顺序；非群聊会话固定两名互不相同的参与者，
/// 且同一无序用户对在系统内唯一（由存储层的 direct key 约束保证）。
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Conversation {
    pub id: ConversationId,
    pub title: Option<String>,
    pub is_group: bool,
    pub participants: Vec<Participant>,
    pub last_message_id: Option<MessageId>,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: Timestamp,
    #[serde(with = "time::serde::rfc3339")]
    pub updated_at: Timestamp,
}

impl Conversation {
    /// 两人会话的存储唯一键：按字典序排列的用户对。
    pub fn direct_key(a: UserId, b: UserId) -> String {
        let (low, high) = if a <= b { (a, b) } else { (b, a) };
        format!("{}:{}", low, high)
    }

    pub fn direct(
        id: ConversationId,
        a: UserId,
        b: UserId,
        now: Timestamp,
    ) -> Result<Self, DomainError> {
        if a == b {
            return Err(DomainError::invalid_argument(
                "participants",
                "direct conversation requires two distinct users",
            ));
        }
        Ok(Self {
            id,
            title: None,
            is_group: false,
            participants: vec![Participant::member(a), Participant::member(b)],
            last_message_id: None,
            created_at: now,
            updated_at: now,
        })
    }

    /// 创建群聊；参与者去重，创建者总是包含在内。
    /// 人数大于 2 且未提供标题时，落一个按创建日期生成的默认标题。
    pub fn group(
        id: ConversationId,
        creator: UserId,
        participant_ids: Vec<UserId>,
        title: Option<String>,
        now: Timestamp,
    ) -> Result<Self, DomainError> {
        let mut participants = vec![Participant::member(creator)];
        for user_id in participant_ids {
            if !participants.iter().any(|p| p.user_id == user_id) {
                participants.push(Participant::member(user_id));
            }
        }
        if participants.is_empty() {
            return Err(DomainError::invalid_argument(
                "participants",
                "cannot be empty",
            ));
        }

        let title = match title.filter(|t| !t.trim().is_empty()) {
            Some(title) => Some(title),
            None if participants.len() > 2 => Some(Self::default_group_title(now)),
            None => None,
        };

        Ok(Self {
            id,
            title,
            is_group: true,
            participants,
            last_message_id: None,
            created_at: now,
            updated_at: now,
        })
    }

    fn default_group_title(now: Timestamp) -> String {
        let date = now.date();
        format!(
            "Group ({:04}-{:02}-{:02})",
            date.year(),
            u8::from(date.month()),
            date.day()
        )
    }

    pub fn is_participant(&self, user_id: UserId) -> bool {
        self.participants.iter().any(|p| p.user_id == user_id)
    }

    /// 集合语义的成员追加：已存在的 id 不会重复进入列表。
    /// 返回实际新增的参与者数量。
    pub fn add_participants(&mut self, user_ids: &[UserId], now: Timestamp) -> usize {
        let mut added = 0;
        for user_id in user_ids {
            if !self.is_participant(*user_id) {
                self.participants.push(Participant::member(*user_id));
                added += 1;
            }
        }
        if added > 0 {
            self.updated_at = now;
        }
        added
    }

    /// 记录最新一条消息并刷新更新时间。
    pub fn record_message(&mut self, message_id: MessageId, at: Timestamp) {
        self.last_message_id = Some(message_id);
        self.updated_at = at;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use time::OffsetDateTime;
    use uuid::Uuid;

    fn user() -> UserId {
        UserId::new(Uuid::new_v4())
    }

    fn now() -> Timestamp {
        OffsetDateTime::now_utc()
    }

    #[test]
    fn direct_key_is_order_independent() {
        let a = user();
        let b = user();
        assert_eq!(
            Conversation::direct_key(a, b),
            Conversation::direct_key(b, a)
        );
    }

    #[test]
    fn direct_requires_distinct_users() {
        let a = user();
        let err = Conversation::direct(ConversationId::new(Uuid::new_v4()), a, a, now());
        assert!(matches!(err, Err(DomainError::InvalidArgument { .. })));
    }

    #[test]
    fn group_dedupes_and_includes_creator() {
        let creator = user();
        let other = user();
        let conversation = Conversation::group(
            ConversationId::new(Uuid::new_v4()),
            creator,
            vec![other, other, creator],
            Some("team".to_string()),
            now(),
        )
        .unwrap();

        let ids: Vec<UserId> = conversation
            .participants
            .iter()
            .map(|p| p.user_id)
            .collect();
        assert_eq!(ids, vec![creator, other]);
        assert!(conversation.is_group);
    }

    #[test]
    fn group_without_title_gets_dated_default_when_larger_than_two() {
        let creator = user();
        let conversation = Conversation::group(
            ConversationId::new(Uuid::new_v4()),
            creator,
            vec![user(), user()],
            None,
            now(),
        )
        .unwrap();

        let title = conversation.title.expect("default title");
        assert!(title.starts_with("Group ("), "unexpected title: {title}");
    }

    #[test]
    fn two_person_group_without_title_stays_untitled() {
        let creator = user();
        let conversation = Conversation::group(
            ConversationId::new(Uuid::new_v4()),
            creator,
            vec![user()],
            None,
            now(),
        )
        .unwrap();
        assert!(conversation.title.is_none());
    }

    #[test]
    fn add_participants_is_set_union() {
        let a = user();
        let b = user();
        let c = user();
        let mut conversation =
            Conversation::group(ConversationId::new(Uuid::new_v4()), a, vec![b], None, now())
                .unwrap();

        assert_eq!(conversation.add_participants(&[b, c, c], now()), 1);
        assert_eq!(conversation.participants.len(), 3);
        assert_eq!(conversation.add_participants(&[c], now()), 0);
        assert_eq!(conversation.participants.len(), 3);
    }

    #[test]
    fn new_participants_default_to_member_role() {
        let a = user();
        let conversation =
            Conversation::direct(ConversationId::new(Uuid::new_v4()), a, user(), now()).unwrap();
        assert!(conversation
            .participants
            .iter()
            .all(|p| p.role == ParticipantRole::Member));
    }
}

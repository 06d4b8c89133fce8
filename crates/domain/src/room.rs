use std::fmt;

use crate::value_objects::{ConversationId, UserId};

/// 广播房间命名。
///
/// 连接总是订阅自己的个人房间 `user:<id>`，并可在成员校验通过后
/// 订阅任意数量的会话房间 `conversation:<id>`。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Room {
    User(UserId),
    Conversation(ConversationId),
}

impl fmt::Display for Room {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Room::User(id) => write!(f, "user:{}", id),
            Room::Conversation(id) => write!(f, "conversation:{}", id),
        }
    }
}

//! 读取侧视图类型。
//!
//! 列表查询在存储层完成反范式关联（participant/发送者身份解析），
//! 这里只定义关联后的形状。

use domain::{ConversationId, Message, MessageId, MessageKind, ParticipantRole, Timestamp, UserId};
use serde::Serialize;

/// 展示用的用户摘要。
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UserSummary {
    pub id: UserId,
    pub name: String,
    pub photo: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ParticipantView {
    pub user_id: UserId,
    pub role: ParticipantRole,
    /// 身份记录缺失（尚未认证过的参与者）时为空。
    pub user: Option<UserSummary>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LastMessageView {
    pub id: MessageId,
    pub kind: MessageKind,
    pub text: Option<String>,
    pub media_url: Option<String>,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: Timestamp,
    pub sender: Option<UserSummary>,
}

/// 会话列表项：按最近更新排序，附带解析后的参与者与最新消息。
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ConversationView {
    pub id: ConversationId,
    pub title: Option<String>,
    pub is_group: bool,
    pub participants: Vec<ParticipantView>,
    pub last_message: Option<LastMessageView>,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: Timestamp,
    #[serde(with = "time::serde::rfc3339")]
    pub updated_at: Timestamp,
}

/// 一页历史消息，按时间正序排列。
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MessagePage {
    pub messages: Vec<Message>,
    pub has_more: bool,
}

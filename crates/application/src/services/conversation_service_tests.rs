//! 会话生命周期服务单元测试
//!
//! 覆盖两人会话唯一性、群聊创建、成员并集追加与列表视图。

use domain::{DomainError, MessageKind, Room, UserId};
use uuid::Uuid;

use crate::error::ApplicationError;
use crate::services::chat_service::SendMessageRequest;
use crate::services::conversation_service::CreateGroupRequest;
use crate::services::test_support::harness;
use crate::ServerEvent;

#[tokio::test]
async fn create_direct_twice_returns_the_same_conversation() {
    let env = harness();
    let a = env.register_user("alice").await;
    let b = env.register_user("bob").await;

    let first = env.conversations.create_direct(a, Uuid::from(b)).await.unwrap();
    // 两个方向都命中同一条记录
    let again = env.conversations.create_direct(a, Uuid::from(b)).await.unwrap();
    let reversed = env.conversations.create_direct(b, Uuid::from(a)).await.unwrap();

    assert_eq!(first.id, again.id);
    assert_eq!(first.id, reversed.id);
    assert_eq!(
        env.conversations.list_for_user(a).await.unwrap().len(),
        1,
        "duplicate direct conversation was created"
    );
}

#[tokio::test]
async fn create_direct_rejects_self_conversation() {
    let env = harness();
    let a = env.register_user("alice").await;
    let result = env.conversations.create_direct(a, Uuid::from(a)).await;
    assert!(matches!(
        result,
        Err(ApplicationError::Domain(DomainError::InvalidArgument { .. }))
    ));
}

#[tokio::test]
async fn first_direct_creation_notifies_the_other_personal_room() {
    let env = harness();
    let a = env.register_user("alice").await;
    let b = env.register_user("bob").await;
    let (_conn, mut rx) = env.listener(&[Room::User(b)]).await;

    let conversation = env.conversations.create_direct(a, Uuid::from(b)).await.unwrap();
    match rx.recv().await.expect("conversation:new") {
        ServerEvent::ConversationNew(received) => assert_eq!(received.id, conversation.id),
        other => panic!("unexpected event: {other:?}"),
    }

    // 复用已有会话时不再通知
    env.conversations.create_direct(a, Uuid::from(b)).await.unwrap();
    assert!(rx.try_recv().is_err());
}

#[tokio::test]
async fn create_group_dedupes_and_titles_by_date_when_missing() {
    let env = harness();
    let creator = env.register_user("alice").await;
    let b = env.register_user("bob").await;
    let c = env.register_user("carol").await;

    let group = env
        .conversations
        .create_group(CreateGroupRequest {
            creator_id: creator,
            participant_ids: vec![Uuid::from(b), Uuid::from(b), Uuid::from(c), Uuid::from(creator)],
            title: None,
        })
        .await
        .unwrap();

    assert!(group.is_group);
    let ids: Vec<UserId> = group.participants.iter().map(|p| p.user_id).collect();
    assert_eq!(ids, vec![creator, b, c]);
    assert!(group.title.unwrap().starts_with("Group ("));
}

#[tokio::test]
async fn add_participants_requires_membership_and_unions() {
    let env = harness();
    let creator = env.register_user("alice").await;
    let b = env.register_user("bob").await;
    let c = env.register_user("carol").await;
    let outsider = env.register_user("mallory").await;

    let group = env
        .conversations
        .create_group(CreateGroupRequest {
            creator_id: creator,
            participant_ids: vec![Uuid::from(b)],
            title: Some("team".to_string()),
        })
        .await
        .unwrap();

    let forbidden = env
        .conversations
        .add_participants(Uuid::from(group.id), outsider, vec![Uuid::from(outsider)])
        .await;
    assert!(matches!(
        forbidden,
        Err(ApplicationError::Domain(DomainError::NotParticipant))
    ));

    // 校验失败不产生写入
    let reloaded = env
        .chat
        .join_conversation(Uuid::from(group.id), creator)
        .await
        .unwrap();
    assert_eq!(reloaded.participants.len(), 2);

    let updated = env
        .conversations
        .add_participants(Uuid::from(group.id), creator, vec![Uuid::from(b), Uuid::from(c)])
        .await
        .unwrap();
    let ids: Vec<UserId> = updated.participants.iter().map(|p| p.user_id).collect();
    assert_eq!(ids, vec![creator, b, c]);
}

#[tokio::test]
async fn add_participants_rejects_unknown_conversation() {
    let env = harness();
    let a = env.register_user("alice").await;
    let result = env
        .conversations
        .add_participants(Uuid::new_v4(), a, vec![Uuid::new_v4()])
        .await;
    assert!(matches!(
        result,
        Err(ApplicationError::Domain(DomainError::ConversationNotFound))
    ));
}

#[tokio::test]
async fn list_for_user_orders_by_recent_update_and_resolves_identities() {
    let env = harness();
    let a = env.register_user("alice").await;
    let b = env.register_user("bob").await;
    let c = env.register_user("carol").await;

    let with_b = env.conversations.create_direct(a, Uuid::from(b)).await.unwrap();
    let with_c = env.conversations.create_direct(a, Uuid::from(c)).await.unwrap();

    // 给较早的会话发消息，把它顶到最前
    env.chat
        .send_message(SendMessageRequest {
            conversation_id: Uuid::from(with_b.id),
            sender_id: a,
            kind: MessageKind::Text,
            text: Some("bump".to_string()),
            media_url: None,
        })
        .await
        .unwrap();

    let listed = env.conversations.list_for_user(a).await.unwrap();
    assert_eq!(listed.len(), 2);
    assert_eq!(listed[0].id, with_b.id);
    assert_eq!(listed[1].id, with_c.id);

    // 参与者身份与最新消息的发送者都已解析
    let names: Vec<&str> = listed[0]
        .participants
        .iter()
        .map(|p| p.user.as_ref().expect("resolved user").name.as_str())
        .collect();
    assert_eq!(names, vec!["alice", "bob"]);

    let last = listed[0].last_message.as_ref().expect("last message");
    assert_eq!(last.text.as_deref(), Some("bump"));
    assert_eq!(last.sender.as_ref().unwrap().name, "alice");

    assert!(listed[1].last_message.is_none());

    // 不相关用户看不到别人的会话
    let empty = env
        .conversations
        .list_for_user(env.register_user("stranger").await)
        .await
        .unwrap();
    assert!(empty.is_empty());
}

// 进程内房间路由实现
use std::collections::{HashMap, HashSet};

use async_trait::async_trait;
use domain::Room;
use tokio::sync::mpsc::UnboundedSender;
use tokio::sync::RwLock;

use crate::broadcaster::{BroadcastError, ConnectionId, RoomBroadcaster, ServerEvent};

#[derive(Default)]
struct RouterState {
    senders: HashMap<ConnectionId, UnboundedSender<ServerEvent>>,
    rooms: HashMap<Room, HashSet<ConnectionId>>,
    joined: HashMap<ConnectionId, HashSet<Room>>,
}

impl RouterState {
    fn detach(&mut self, connection: ConnectionId) {
        if let Some(rooms) = self.joined.remove(&connection) {
            for room in rooms {
                if let Some(members) = self.rooms.get_mut(&room) {
                    members.remove(&connection);
                    if members.is_empty() {
                        self.rooms.remove(&room);
                    }
                }
            }
        }
    }
}

/// 单实例部署的房间索引：房间名 → 存活连接集合。
///
/// 状态只存在于本进程内存，连接断开即销毁，不落盘。
#[derive(Default)]
pub struct LocalRoomRouter {
    state: RwLock<RouterState>,
}

impl LocalRoomRouter {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl RoomBroadcaster for LocalRoomRouter {
    async fn register(&self, connection: ConnectionId, sender: UnboundedSender<ServerEvent>) {
        let mut state = self.state.write().await;
        state.senders.insert(connection, sender);
    }

    async fn unregister(&self, connection: ConnectionId) {
        let mut state = self.state.write().await;
        state.senders.remove(&connection);
        state.detach(connection);
    }

    async fn join(&self, connection: ConnectionId, room: Room) {
        let mut state = self.state.write().await;
        state.rooms.entry(room).or_default().insert(connection);
        state.joined.entry(connection).or_default().insert(room);
    }

    async fn leave(&self, connection: ConnectionId, room: Room) {
        let mut state = self.state.write().await;
        if let Some(members) = state.rooms.get_mut(&room) {
            members.remove(&connection);
            if members.is_empty() {
                state.rooms.remove(&room);
            }
        }
        if let Some(rooms) = state.joined.get_mut(&connection) {
            rooms.remove(&room);
        }
    }

    async fn leave_all(&self, connection: ConnectionId) {
        let mut state = self.state.write().await;
        state.detach(connection);
    }

    async fn broadcast(
        &self,
        room: Room,
        event: ServerEvent,
        excluding: Option<ConnectionId>,
    ) -> Result<(), BroadcastError> {
        let state = self.state.read().await;
        let Some(members) = state.rooms.get(&room) else {
            return Ok(());
        };
        for connection in members {
            if Some(*connection) == excluding {
                continue;
            }
            if let Some(sender) = state.senders.get(connection) {
                // 无界通道：发送不阻塞；接收端已关闭则静默丢弃
                if sender.send(event.clone()).is_err() {
                    tracing::debug!(room = %room, connection = %connection, "dropping event for closed connection");
                }
            }
        }
        Ok(())
    }
}

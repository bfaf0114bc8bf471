//! 会话注册表
//!
//! 记录每个已认证用户当前打开的 WebSocket 连接。同一用户可以同时持有多个连接，
//! 每个连接拥有一个有界的出站队列，连接任务负责把队列中的通知写到 socket。
//!
//! 用户索引与连接索引放在同一把锁后面，注册、移除和查询都看到一致的快照。

use std::collections::HashMap;

use domain::{ConnectionId, Notification, UserId};
use thiserror::Error;
use tokio::sync::{mpsc, RwLock};
use tracing::{debug, info};

/// 连接从握手到关闭的生命周期
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AdmissionState {
    /// 已握手，尚未通过令牌校验
    Pending,
    /// 已注册，可以接收推送
    Admitted,
    /// 已从注册表移除，不会再收到推送
    Closed,
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum DeliveryError {
    #[error("outbound queue of connection {0} is full")]
    QueueFull(ConnectionId),
    #[error("connection {0} is closed")]
    Closed(ConnectionId),
}

/// 注册表中一条连接的发送端
#[derive(Debug, Clone)]
pub struct SessionHandle {
    connection_id: ConnectionId,
    user_id: UserId,
    sender: mpsc::Sender<Notification>,
}

impl SessionHandle {
    pub fn connection_id(&self) -> ConnectionId {
        self.connection_id
    }

    pub fn user_id(&self) -> UserId {
        self.user_id
    }

    /// 非阻塞投递，队列满或连接已关闭时立即失败
    pub fn deliver(&self, notification: Notification) -> Result<(), DeliveryError> {
        self.sender.try_send(notification).map_err(|err| match err {
            mpsc::error::TrySendError::Full(_) => DeliveryError::QueueFull(self.connection_id),
            mpsc::error::TrySendError::Closed(_) => DeliveryError::Closed(self.connection_id),
        })
    }
}

/// 注册成功后交给连接任务的出站队列
#[derive(Debug)]
pub struct Admission {
    pub connection_id: ConnectionId,
    pub user_id: UserId,
    pub outbound: mpsc::Receiver<Notification>,
}

#[derive(Default)]
struct RegistryState {
    by_user: HashMap<UserId, HashMap<ConnectionId, SessionHandle>>,
    by_connection: HashMap<ConnectionId, UserId>,
}

pub struct SessionRegistry {
    state: RwLock<RegistryState>,
    outbound_buffer: usize,
}

impl SessionRegistry {
    pub fn new(outbound_buffer: usize) -> Self {
        Self {
            state: RwLock::new(RegistryState::default()),
            outbound_buffer: outbound_buffer.max(1),
        }
    }

    /// 注册一个已认证的连接。重复注册同一连接会替换旧的发送端。
    pub async fn admit(&self, connection_id: ConnectionId, user_id: UserId) -> Admission {
        let (sender, outbound) = mpsc::channel(self.outbound_buffer);
        let handle = SessionHandle {
            connection_id,
            user_id,
            sender,
        };

        let mut state = self.state.write().await;
        if let Some(previous) = state.by_connection.insert(connection_id, user_id) {
            if previous != user_id {
                detach(&mut state.by_user, previous, connection_id);
            }
        }
        state
            .by_user
            .entry(user_id)
            .or_default()
            .insert(connection_id, handle);
        let user_connections = state.by_user.get(&user_id).map_or(0, HashMap::len);
        drop(state);

        info!(
            connection_id = %connection_id,
            user_id = %user_id,
            user_connections,
            "session admitted"
        );

        Admission {
            connection_id,
            user_id,
            outbound,
        }
    }

    /// 幂等：连接不存在时返回 `false`
    pub async fn remove(&self, connection_id: ConnectionId) -> bool {
        let mut state = self.state.write().await;
        let Some(user_id) = state.by_connection.remove(&connection_id) else {
            debug!(connection_id = %connection_id, "session already removed");
            return false;
        };
        detach(&mut state.by_user, user_id, connection_id);
        drop(state);

        info!(connection_id = %connection_id, user_id = %user_id, "session removed");
        true
    }

    pub async fn connections_for(&self, user_id: UserId) -> Vec<SessionHandle> {
        let state = self.state.read().await;
        state
            .by_user
            .get(&user_id)
            .map(|connections| connections.values().cloned().collect())
            .unwrap_or_default()
    }

    pub async fn all_connections(&self) -> Vec<SessionHandle> {
        let state = self.state.read().await;
        state
            .by_user
            .values()
            .flat_map(|connections| connections.values().cloned())
            .collect()
    }

    pub async fn connection_count(&self) -> usize {
        self.state.read().await.by_connection.len()
    }

    pub async fn is_admitted(&self, connection_id: ConnectionId) -> bool {
        self.state
            .read()
            .await
            .by_connection
            .contains_key(&connection_id)
    }
}

fn detach(
    by_user: &mut HashMap<UserId, HashMap<ConnectionId, SessionHandle>>,
    user_id: UserId,
    connection_id: ConnectionId,
) {
    if let Some(connections) = by_user.get_mut(&user_id) {
        connections.remove(&connection_id);
        if connections.is_empty() {
            by_user.remove(&user_id);
        }
    }
}

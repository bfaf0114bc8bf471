use application::{Admission, AdmissionState, GateRejection};
use axum::extract::ws::{CloseFrame, Message as WsMessage, WebSocket};
use domain::{Actor, ConnectionId, Notification};
use futures_util::{SinkExt, StreamExt};
use tokio::sync::mpsc;

use crate::state::AppState;

/// WebSocket 连接
///
/// 生命周期：准入（注册到 SessionRegistry）-> 推送欢迎消息 -> 读写循环 -> 注销。
/// 写任务独占 socket 的发送端，通知和 pong 都经由它发出。
pub struct WebSocketConnection {
    socket: Option<WebSocket>,
    state: AppState,
    actor: Actor,
    connection_id: ConnectionId,
    admission_state: AdmissionState,
}

impl WebSocketConnection {
    pub fn new(socket: WebSocket, state: AppState, actor: Actor) -> Self {
        Self {
            socket: Some(socket),
            state,
            actor,
            connection_id: ConnectionId::generate(),
            admission_state: AdmissionState::Pending,
        }
    }

    /// 以 1008 关闭未通过准入的连接，不进入注册表
    pub async fn reject(mut socket: WebSocket, rejection: GateRejection) {
        let frame = CloseFrame {
            code: rejection.close_code(),
            reason: rejection.reason().into(),
        };
        if let Err(err) = socket.send(WsMessage::Close(Some(frame))).await {
            tracing::debug!(error = %err, "failed to send close frame");
        }
        tracing::info!(reason = rejection.reason(), "websocket connection rejected");
    }

    pub async fn run(mut self) {
        let Some(socket) = self.socket.take() else {
            return;
        };

        let Admission {
            connection_id,
            user_id,
            mut outbound,
        } = self
            .state
            .sessions
            .admit(self.connection_id, self.actor.user_id)
            .await;
        self.admission_state = AdmissionState::Admitted;
        tracing::info!(%connection_id, %user_id, "websocket connection admitted");

        let (mut sender, mut incoming) = socket.split();

        let welcome = Notification::welcome(user_id, self.state.clock.now());
        match encode(&welcome) {
            Some(payload) => {
                if sender.send(WsMessage::Text(payload.into())).await.is_err() {
                    tracing::warn!(%connection_id, "failed to send welcome message");
                }
            }
            None => tracing::warn!(%connection_id, "failed to serialize welcome message"),
        }

        let (cmd_tx, mut cmd_rx) = mpsc::channel::<WsCommand>(32);

        // 写任务：控制帧和推送通知都从这里写出
        let mut send_task = tokio::spawn(async move {
            loop {
                let message = tokio::select! {
                    Some(cmd) = cmd_rx.recv() => match cmd {
                        WsCommand::SendPong(data) => WsMessage::Pong(data.into()),
                    },
                    notification = outbound.recv() => {
                        // 注册表已移除该连接
                        let Some(notification) = notification else { break };
                        match encode(&notification) {
                            Some(payload) => WsMessage::Text(payload.into()),
                            None => continue,
                        }
                    }
                };
                if sender.send(message).await.is_err() {
                    tracing::warn!("failed to write websocket frame");
                    break;
                }
            }
            let _ = sender.close().await;
        });

        let mut recv_task = tokio::spawn(async move {
            while let Some(Ok(message)) = incoming.next().await {
                if Self::handle_incoming(message, &cmd_tx).await.is_err() {
                    break;
                }
            }
        });

        tokio::select! {
            _ = &mut send_task => {
                recv_task.abort();
                tracing::debug!(%connection_id, "websocket writer finished");
            }
            _ = &mut recv_task => {
                send_task.abort();
                tracing::debug!(%connection_id, "websocket reader finished");
            }
        }

        let removed = self.state.sessions.remove(connection_id).await;
        self.admission_state = AdmissionState::Closed;
        tracing::info!(%connection_id, %user_id, removed, "websocket connection closed");
    }

    async fn handle_incoming(
        message: WsMessage,
        cmd_tx: &mpsc::Sender<WsCommand>,
    ) -> Result<(), ()> {
        match message {
            WsMessage::Close(_) => {
                tracing::debug!("client closed websocket");
                return Err(());
            }
            WsMessage::Ping(data) => {
                if cmd_tx.send(WsCommand::SendPong(data.to_vec())).await.is_err() {
                    return Err(());
                }
            }
            WsMessage::Pong(_) => {}
            WsMessage::Text(_) | WsMessage::Binary(_) => {
                // 客户端不需要发送业务消息
                tracing::debug!("ignoring client message");
            }
        }
        Ok(())
    }
}

fn encode(notification: &Notification) -> Option<String> {
    serde_json::to_string(notification)
        .map_err(|err| tracing::warn!(error = %err, "failed to serialize notification"))
        .ok()
}

#[derive(Debug)]
enum WsCommand {
    SendPong(Vec<u8>),
}

impl Drop for WebSocketConnection {
    fn drop(&mut self) {
        tracing::debug!(
            connection_id = %self.connection_id,
            user_id = %self.actor.user_id,
            state = ?self.admission_state,
            "WebSocketConnection dropped"
        );
    }
}

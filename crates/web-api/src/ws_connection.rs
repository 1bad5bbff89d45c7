use std::collections::HashMap;

use axum::{
    extract::{
        ws::{close_code, CloseFrame, Message as WsMessage, WebSocket, WebSocketUpgrade},
        Query, State,
    },
    response::Response,
};
use futures_util::{SinkExt, StreamExt};
use tokio::sync::mpsc;

use application::ClientConnection;
use domain::UserId;

use crate::state::AppState;

pub async fn websocket_upgrade(
    State(state): State<AppState>,
    Query(query): Query<HashMap<String, String>>,
    ws: WebSocketUpgrade,
) -> Response {
    let user_id = query.get("userId").cloned();
    ws.on_upgrade(move |socket| async move {
        match user_id {
            None => reject(socket, "Missing userId parameter").await,
            Some(raw) => match UserId::parse(raw) {
                Ok(user_id) => WebSocketConnection::new(socket, state, user_id).run().await,
                Err(_) => reject(socket, "Invalid userId parameter").await,
            },
        }
    })
}

/// 以策略违规（1008）关闭连接
async fn reject(mut socket: WebSocket, reason: &'static str) {
    tracing::warn!(reason, "拒绝 WebSocket 连接");
    let frame = CloseFrame {
        code: close_code::POLICY,
        reason: reason.into(),
    };
    let _ = socket.send(WsMessage::Close(Some(frame))).await;
}

/// 写操作命令
#[derive(Debug)]
enum WsCommand {
    SendPong(Vec<u8>),
}

/// 单个用户的 WebSocket 连接
///
/// 建立时登记到连接表，断开时只释放自己那一条登记，
/// 同一用户的新连接会直接顶替旧连接。
struct WebSocketConnection {
    socket: WebSocket,
    state: AppState,
    user_id: UserId,
}

impl WebSocketConnection {
    fn new(socket: WebSocket, state: AppState, user_id: UserId) -> Self {
        Self {
            socket,
            state,
            user_id,
        }
    }

    async fn run(self) {
        let Self {
            socket,
            state,
            user_id,
        } = self;

        let (connection, mut outbound) = ClientConnection::channel(state.outbound_buffer);
        let connection_id = connection.id();
        if state
            .connections
            .register(user_id.clone(), connection)
            .is_some()
        {
            tracing::info!(user_id = %user_id, "新连接替换了旧连接");
        }
        tracing::info!(user_id = %user_id, online = state.connections.len(), "WebSocket 连接已建立");

        let (mut sender, mut incoming) = socket.split();
        let (cmd_tx, mut cmd_rx) = mpsc::channel::<WsCommand>(8);

        let mut send_task = tokio::spawn(async move {
            loop {
                tokio::select! {
                    frame = outbound.recv() => {
                        // 通道关闭说明连接已被顶替或注销
                        let Some(frame) = frame else { break };
                        if sender.send(WsMessage::Text(frame.into())).await.is_err() {
                            break;
                        }
                    }
                    Some(cmd) = cmd_rx.recv() => {
                        match cmd {
                            WsCommand::SendPong(data) => {
                                if sender.send(WsMessage::Pong(data.into())).await.is_err() {
                                    break;
                                }
                            }
                        }
                    }
                }
            }
            let _ = sender.close().await;
        });

        let mut recv_task = tokio::spawn(async move {
            while let Some(Ok(message)) = incoming.next().await {
                match message {
                    WsMessage::Close(_) => break,
                    WsMessage::Ping(data) => {
                        if cmd_tx.send(WsCommand::SendPong(data.to_vec())).await.is_err() {
                            break;
                        }
                    }
                    _ => tracing::debug!("忽略客户端消息"),
                }
            }
        });

        tokio::select! {
            _ = &mut send_task => recv_task.abort(),
            _ = &mut recv_task => send_task.abort(),
        }

        state.connections.release(&user_id, connection_id);
        tracing::info!(user_id = %user_id, "WebSocket 连接已断开");
    }
}

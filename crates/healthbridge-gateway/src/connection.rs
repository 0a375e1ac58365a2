use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use axum::extract::ws::{Message, WebSocket};
use bytes::Bytes;
use futures_util::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tracing::{info, warn};

use healthbridge_types::api::SendMessageRequest;
use healthbridge_types::events::{GatewayCommand, GatewayEvent};

use crate::messenger::Messenger;

/// Heartbeat interval: server sends a Ping every 15 seconds.
/// If 2 consecutive Pongs are missed (~30s), the connection is dropped.
const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(15);

/// Drive a WebSocket whose handshake credential was already verified at the
/// HTTP upgrade layer. The connection joins `user_id`'s channel for its whole
/// lifetime and leaves it on close; nothing persisted changes on disconnect.
pub async fn handle_connection(socket: WebSocket, messenger: Messenger, user_id: i64, name: String) {
    let (mut sender, mut receiver) = socket.split();
    let dispatcher = messenger.dispatcher().clone();

    // Ready is queued before joining so it is always the first frame.
    let (tx, mut rx) = mpsc::unbounded_channel();
    let _ = tx.send(GatewayEvent::Ready {
        user_id,
        name: name.clone(),
    });
    let conn_id = dispatcher.register(user_id, tx.clone()).await;

    info!("{} ({}) joined gateway channel [conn {}]", name, user_id, conn_id);

    let pong_received = Arc::new(AtomicBool::new(true));
    let pong_flag_send = pong_received.clone();
    let pong_flag_recv = pong_received.clone();

    // Forward channel events -> client, with heartbeat
    let mut send_task = tokio::spawn(async move {
        let mut heartbeat = tokio::time::interval(HEARTBEAT_INTERVAL);
        heartbeat.tick().await;
        let mut missed_heartbeats: u8 = 0;

        loop {
            tokio::select! {
                event = rx.recv() => {
                    let Some(event) = event else { break };
                    let text = match serde_json::to_string(&event) {
                        Ok(text) => text,
                        Err(e) => {
                            warn!("Failed to serialize gateway event: {}", e);
                            continue;
                        }
                    };
                    if sender.send(Message::Text(text.into())).await.is_err() {
                        break;
                    }
                }
                _ = heartbeat.tick() => {
                    if pong_flag_send.swap(false, Ordering::Acquire) {
                        missed_heartbeats = 0;
                    } else {
                        missed_heartbeats += 1;
                        if missed_heartbeats >= 2 {
                            warn!("Heartbeat timeout (missed {} pongs), dropping connection", missed_heartbeats);
                            break;
                        }
                    }
                    if sender.send(Message::Ping(Bytes::new())).await.is_err() {
                        break;
                    }
                }
            }
        }
    });

    // Read commands from client
    let name_recv = name.clone();
    let mut recv_task = tokio::spawn(async move {
        while let Some(Ok(msg)) = receiver.next().await {
            match msg {
                Message::Text(text) => match serde_json::from_str::<GatewayCommand>(&text) {
                    Ok(cmd) => handle_command(&messenger, user_id, &name_recv, cmd, &tx).await,
                    Err(e) => {
                        warn!(
                            "{} ({}) bad command: {} -- raw: {}",
                            name_recv,
                            user_id,
                            e,
                            text.chars().take(200).collect::<String>()
                        );
                        let _ = tx.send(GatewayEvent::Error {
                            message: "Unrecognized command".to_string(),
                        });
                    }
                },
                Message::Pong(_) => {
                    pong_flag_recv.store(true, Ordering::Release);
                }
                Message::Close(_) => break,
                _ => {}
            }
        }
    });

    // Wait for either task to finish
    tokio::select! {
        _ = &mut send_task => recv_task.abort(),
        _ = &mut recv_task => send_task.abort(),
    }

    dispatcher.unregister(user_id, conn_id).await;
    info!("{} ({}) left gateway channel [conn {}]", name, user_id, conn_id);
}

async fn handle_command(
    messenger: &Messenger,
    user_id: i64,
    name: &str,
    cmd: GatewayCommand,
    own_connection: &mpsc::UnboundedSender<GatewayEvent>,
) {
    match cmd {
        GatewayCommand::SendMessage { receiver_id, content } => {
            let req = SendMessageRequest { receiver_id, content };
            match messenger.send(user_id, req).await {
                // Acknowledged by the echo on the sender's channel
                Ok(message) => {
                    info!("Message {} sent by {} ({}) to {}", message.id, name, user_id, message.receiver_id);
                }
                Err(e) => {
                    warn!("{} ({}) send failed: {}", name, user_id, e);
                    let _ = own_connection.send(GatewayEvent::Error {
                        message: e.client_message(),
                    });
                }
            }
        }
    }
}

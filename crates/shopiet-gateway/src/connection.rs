use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use axum::extract::ws::{Message, WebSocket};
use bytes::Bytes;
use futures_util::{SinkExt, StreamExt};
use tokio::sync::broadcast::error::RecvError;
use tracing::{error, info, warn};

use shopiet_chat::ChatError;

use crate::session::Session;

/// Heartbeat interval: server sends a Ping every 15 seconds.
/// If 2 consecutive Pongs are missed (~30s), the connection is dropped.
const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(15);

/// Drive one chat socket until either side goes away.
///
/// The session was authorized at the HTTP upgrade; it joins its room here,
/// before any frame is read, and leaves it when the loop ends.
pub async fn handle_connection(socket: WebSocket, session: Session) {
    let mut events = match session.join() {
        Ok(events) => events,
        Err(e) => {
            warn!("{} could not join room {}: {}", session.username(), session.room_key(), e);
            return;
        }
    };
    let session = Arc::new(session);
    let (mut sender, mut receiver) = socket.split();

    info!("{} connected to room {}", session.username(), session.room_key());

    // Shared flag for heartbeat
    let pong_received = Arc::new(AtomicBool::new(true));
    let pong_flag_send = pong_received.clone();
    let pong_flag_recv = pong_received.clone();

    // Forward room events -> client, with heartbeat
    let mut send_task = tokio::spawn(async move {
        let mut heartbeat = tokio::time::interval(HEARTBEAT_INTERVAL);
        heartbeat.tick().await;
        let mut missed_heartbeats: u8 = 0;

        loop {
            tokio::select! {
                result = events.recv() => {
                    let event = match result {
                        Ok(event) => event,
                        Err(RecvError::Lagged(n)) => {
                            warn!("Connection lagged, dropped {} oldest events", n);
                            continue;
                        }
                        Err(RecvError::Closed) => break,
                    };

                    let text = match serde_json::to_string(&event) {
                        Ok(text) => text,
                        Err(e) => {
                            error!("Failed to encode chat event: {}", e);
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

    // Read chat payloads from client
    let recv_session = session.clone();
    let mut recv_task = tokio::spawn(async move {
        while let Some(Ok(msg)) = receiver.next().await {
            match msg {
                Message::Text(text) => {
                    // Detached so aborting this task cannot split a stored
                    // message from its broadcast. Awaited to keep frame order.
                    let session = recv_session.clone();
                    let handled = tokio::spawn(async move {
                        if let Err(e) = session.handle_text(&text).await {
                            match &e {
                                ChatError::Store(inner) => error!(
                                    "{} message to room {} not stored: {}",
                                    session.username(),
                                    session.room_key(),
                                    inner
                                ),
                                _ => warn!(
                                    "{} rejected payload: {} -- raw: {}",
                                    session.username(),
                                    e,
                                    truncate(&text, 200)
                                ),
                            }
                            session.reject(&e);
                        }
                    });
                    if let Err(e) = handled.await {
                        error!("Inbound handler for {} failed: {}", recv_session.username(), e);
                        break;
                    }
                }
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

    session.close();
    info!("{} disconnected from room {}", session.username(), session.room_key());
}

fn truncate(text: &str, max: usize) -> &str {
    match text.char_indices().nth(max) {
        Some((idx, _)) => &text[..idx],
        None => text,
    }
}

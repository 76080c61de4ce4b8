use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use axum::extract::ws::{Message, WebSocket};
use futures_util::{SinkExt, StreamExt};
use tracing::{debug, info, warn};

use crate::hub::Hub;

/// Heartbeat interval: server sends a Ping every 15 seconds.
/// If 2 consecutive Pongs are missed (~30s), the connection is dropped.
const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(15);

/// Run the pump pair for an authenticated, upgraded connection until either
/// side ends, then unregister the session.
pub async fn handle_connection(socket: WebSocket, hub: Hub, user_id: String) {
    let (mut sender, mut receiver) = socket.split();

    let (session, mut outbound) = hub.open_session(&user_id);
    let conn_id = session.conn_id();
    let closed = session.closed();
    info!("{} ({}) connected", user_id, conn_id);

    // Shared flag for heartbeat
    let pong_received = Arc::new(AtomicBool::new(true));
    let pong_flag_send = pong_received.clone();
    let pong_flag_recv = pong_received.clone();

    // Outbound pump: session buffer -> socket, with heartbeat
    let mut send_task = tokio::spawn(async move {
        let mut heartbeat = tokio::time::interval(HEARTBEAT_INTERVAL);
        heartbeat.tick().await;
        let mut missed_heartbeats: u8 = 0;

        loop {
            tokio::select! {
                item = outbound.recv() => {
                    let Some(text) = item else { break };
                    if sender.send(Message::Text(text.into())).await.is_err() {
                        return;
                    }
                }
                _ = closed.cancelled() => {
                    // Write out what was already handed over, then close.
                    outbound.close();
                    while let Some(text) = outbound.recv().await {
                        if sender.send(Message::Text(text.into())).await.is_err() {
                            return;
                        }
                    }
                    break;
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
                    if sender.send(Message::Ping(Vec::<u8>::new().into())).await.is_err() {
                        return;
                    }
                }
            }
        }

        let _ = sender.send(Message::Close(None)).await;
    });

    // Inbound pump: socket -> router
    let hub_recv = hub.clone();
    let user_recv = user_id.clone();
    let mut recv_task = tokio::spawn(async move {
        while let Some(frame) = receiver.next().await {
            let msg = match frame {
                Ok(msg) => msg,
                Err(e) => {
                    debug!("{} read error: {}", user_recv, e);
                    break;
                }
            };

            match msg {
                Message::Text(text) => {
                    hub_recv.process_message(&user_recv, text.as_str()).await;
                }
                Message::Binary(data) => match std::str::from_utf8(&data) {
                    Ok(text) => {
                        hub_recv.process_message(&user_recv, text).await;
                    }
                    Err(_) => warn!("{} sent a non-UTF-8 binary frame, dropped", user_recv),
                },
                Message::Pong(_) => {
                    pong_flag_recv.store(true, Ordering::Release);
                }
                Message::Close(_) => break,
                _ => {}
            }
        }
    });

    // Both pumps are running, so a backlog larger than the buffer cannot
    // stall the hand-over and pongs keep arriving while it drains.
    let activation = hub.activate(&session).await;
    if activation.backlog > 0 || activation.transient > 0 {
        info!(
            "{} ({}) caught up on {} persisted and {} in-memory messages",
            user_id, conn_id, activation.backlog, activation.transient
        );
    }

    // Wait for either task to finish
    tokio::select! {
        _ = &mut send_task => recv_task.abort(),
        _ = &mut recv_task => send_task.abort(),
    }

    hub.disconnect(&session).await;
    info!("{} ({}) disconnected", user_id, conn_id);
}

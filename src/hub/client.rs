//! Client Connection (`spec.md` §2 component M / §4.H).
//!
//! Read pump and write pump folded into a single `tokio::select!` loop
//! rather than two spawned tasks, since both halves of an `axum`
//! `WebSocket` can be driven from one future without extra synchronization.
//! Ping/pong/write-deadline cadence ported from
//! `original_source/.../handler/websocket/client.go`.

use axum::extract::ws::{Message, WebSocket};
use futures::{SinkExt, StreamExt};
use std::time::Duration;

use super::{default_initial_topics, ClientId, HubHandle};
use crate::message::ClientMessage;

/// Maximum inbound frame size, enforced by the caller via
/// `WebSocketUpgrade::max_message_size` before the socket reaches
/// [`handle_socket`] (`spec.md` §4.H).
pub const MAX_FRAME_BYTES: usize = 512;

const PING_PERIOD: Duration = Duration::from_secs(54);
const PONG_WAIT: Duration = Duration::from_secs(60);
const WRITE_WAIT: Duration = Duration::from_secs(10);

/// Drive one client's websocket connection until it closes, times out, or
/// the hub closes its send queue. Always leaves the hub on the way out.
pub async fn handle_socket(socket: WebSocket, hub: HubHandle) {
    let id = hub.next_client_id();
    let mut receiver = hub.join(id, default_initial_topics()).await;
    let (mut sink, mut stream) = socket.split();

    let mut ping_ticker = tokio::time::interval(PING_PERIOD);
    ping_ticker.tick().await; // first tick fires immediately; discard it

    loop {
        tokio::select! {
            _ = ping_ticker.tick() => {
                if tokio::time::timeout(WRITE_WAIT, sink.send(Message::Ping(Vec::new())))
                    .await
                    .is_err()
                {
                    tracing::debug!(client_id = id, "ping write timed out, closing");
                    break;
                }
            }
            outbound = receiver.recv() => {
                let Some(payload) = outbound else {
                    tracing::debug!(client_id = id, "send queue closed, closing connection");
                    break;
                };
                if tokio::time::timeout(WRITE_WAIT, sink.send(Message::Text(payload)))
                    .await
                    .is_err()
                {
                    tracing::debug!(client_id = id, "message write timed out, closing");
                    break;
                }
            }
            incoming = tokio::time::timeout(PONG_WAIT, stream.next()) => {
                match incoming {
                    Err(_elapsed) => {
                        tracing::debug!(client_id = id, "no activity within pong wait, closing");
                        break;
                    }
                    Ok(None) => break,
                    Ok(Some(Err(error))) => {
                        tracing::debug!(client_id = id, %error, "websocket read error");
                        break;
                    }
                    Ok(Some(Ok(message))) => {
                        if !handle_inbound(message, id, &hub).await {
                            break;
                        }
                    }
                }
            }
        }
    }

    hub.leave(id).await;
    let _ = sink.close().await;
}

/// Returns `false` when the connection should close.
async fn handle_inbound(message: Message, id: ClientId, hub: &HubHandle) -> bool {
    match message {
        Message::Text(text) => {
            match serde_json::from_str::<ClientMessage>(&text) {
                Ok(ClientMessage::Subscribe { topic, .. }) => hub.subscribe(id, topic).await,
                Ok(ClientMessage::Unsubscribe { topic, .. }) => hub.unsubscribe(id, topic).await,
                Err(error) => {
                    tracing::debug!(client_id = id, %error, "ignoring malformed client message");
                }
            }
            true
        }
        Message::Binary(_) | Message::Ping(_) | Message::Pong(_) => true,
        Message::Close(_) => false,
    }
}

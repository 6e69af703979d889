use std::sync::Arc;

use axum::extract::ws::{CloseFrame, Message, Utf8Bytes, WebSocket};
use axum::http::HeaderMap;
use futures_util::{SinkExt, StreamExt};
use tracing::{error, warn};

use crate::dispatcher::Dispatcher;
use crate::lifecycle::Connection;
use crate::registry::Outbound;

/// Drives one upgraded WebSocket from handshake to teardown.
///
/// `headers` are the HTTP headers of the upgrade request; the session
/// cookie in them is the only credential accepted. No application frame is
/// read or written before authentication succeeds.
pub async fn handle_connection(socket: WebSocket, dispatcher: Dispatcher, headers: HeaderMap) {
    let (mut sender, mut receiver) = socket.split();

    let (connection, mut outbound_rx) = match Connection::open(&dispatcher, &headers).await {
        Ok(opened) => opened,
        Err(e) => {
            warn!("WebSocket handshake rejected: {}", e);
            let _ = sender
                .send(close_message(e.close_code(), e.close_reason()))
                .await;
            return;
        }
    };
    let connection = Arc::new(connection);

    // Forward queued events -> client
    let mut send_task = tokio::spawn(async move {
        while let Some(msg) = outbound_rx.recv().await {
            match msg {
                Outbound::Event(event) => {
                    let text = match serde_json::to_string(&event) {
                        Ok(text) => text,
                        Err(e) => {
                            error!("Failed to encode {}: {}", event.name(), e);
                            continue;
                        }
                    };
                    if sender.send(Message::Text(text.into())).await.is_err() {
                        break;
                    }
                }
                Outbound::Close { code, reason } => {
                    let _ = sender.send(close_message(code, reason)).await;
                    break;
                }
            }
        }
    });

    // Read frames from client, one at a time so a user's frames keep their order
    let recv_connection = connection.clone();
    let recv_dispatcher = dispatcher.clone();
    let mut recv_task = tokio::spawn(async move {
        while let Some(Ok(msg)) = receiver.next().await {
            match msg {
                Message::Text(text) => {
                    recv_connection.handle_frame(&recv_dispatcher, text.as_str()).await;
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

    connection.close(&dispatcher).await;
}

fn close_message(code: u16, reason: &'static str) -> Message {
    Message::Close(Some(CloseFrame {
        code,
        reason: Utf8Bytes::from_static(reason),
    }))
}

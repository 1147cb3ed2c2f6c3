//! WebSocket accept handler.
//!
//! Clients connect to `ws://<host>:<port><ws_path>?room=<room>&peer_id=<id>`.
//! Each accepted socket is split: the read half feeds a [`RelaySession`],
//! the write half is drained from the connection's outbox by a writer task.

use crate::hub::{ConnectionHandle, Frame, Outbox};
use crate::server::SignalingRelay;
use crate::session::RelaySession;
use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::Query;
use axum::response::Response;
use axum::Extension;
use futures_util::stream::SplitSink;
use futures_util::{future, SinkExt, StreamExt};
use serde::Deserialize;
use std::sync::Arc;

/// Query parameters supplied at connection time.
#[derive(Debug, Default, Deserialize)]
pub struct ConnectParams {
    /// Room to join (empty = configured default).
    #[serde(default)]
    pub room: String,
    /// Caller's peer id (empty = rejected).
    #[serde(default)]
    pub peer_id: String,
}

/// Upgrade handler for the signaling endpoint.
pub async fn ws_handler(
    ws: WebSocketUpgrade,
    Query(params): Query<ConnectParams>,
    Extension(relay): Extension<Arc<SignalingRelay>>,
) -> Response {
    ws.on_upgrade(move |socket| serve_socket(relay, params, socket))
}

async fn serve_socket(relay: Arc<SignalingRelay>, params: ConnectParams, socket: WebSocket) {
    let session = RelaySession::new(relay, &params.room, &params.peer_id);
    let (handle, outbox) = ConnectionHandle::new();
    let (sink, stream) = socket.split();

    let writer = tokio::spawn(write_frames(sink, outbox));

    let inbound = Box::pin(
        stream
            .take_while(|msg| future::ready(matches!(msg, Ok(m) if !matches!(m, Message::Close(_)))))
            .filter_map(|msg| future::ready(msg.ok().and_then(into_frame))),
    );

    if let Err(e) = session.run(handle.clone(), inbound).await {
        tracing::debug!("connection ended: {}", e);
    }
    handle.close();
    let _ = writer.await;
}

fn into_frame(message: Message) -> Option<Frame> {
    match message {
        Message::Text(text) => Some(Frame::Text(text)),
        Message::Binary(bytes) => Some(Frame::Binary(bytes)),
        // Ping/pong are answered by axum
        Message::Ping(_) | Message::Pong(_) | Message::Close(_) => None,
    }
}

async fn write_frames(mut sink: SplitSink<WebSocket, Message>, mut outbox: Outbox) {
    loop {
        let frame = tokio::select! {
            _ = outbox.closed.cancelled() => break,
            frame = outbox.frames.recv() => match frame {
                Some(frame) => frame,
                None => break,
            },
        };
        let message = match frame {
            Frame::Text(text) => Message::Text(text),
            Frame::Binary(bytes) => Message::Binary(bytes),
        };
        if let Err(e) = sink.send(message).await {
            tracing::debug!("socket write failed: {}", e);
            break;
        }
    }
    // Dropping the receiver makes later hub writes fail
    outbox.closed.cancel();
    drop(outbox.frames);
    let _ = sink.close().await;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn params_default_to_empty() {
        let params: ConnectParams = serde_json::from_str("{}").unwrap();
        assert!(params.room.is_empty());
        assert!(params.peer_id.is_empty());
    }

    #[test]
    fn data_messages_become_frames() {
        assert_eq!(
            into_frame(Message::Text("hi".into())),
            Some(Frame::Text("hi".into()))
        );
        assert_eq!(
            into_frame(Message::Binary(vec![1, 2])),
            Some(Frame::Binary(vec![1, 2]))
        );
        assert_eq!(into_frame(Message::Ping(vec![])), None);
    }
}

//! WebSocket transport adapter
//!
//! Each socket becomes one hub connection. Binary frames carry protobuf
//! `ClientRequest`s in and `ServerEvent`s out; a writer task drains the
//! connection's outbound queue into the socket. The socket is closed as
//! soon as the hub unregisters the connection.

use axum::{
    extract::{
        ws::{Message, WebSocket},
        State, WebSocketUpgrade,
    },
    response::IntoResponse,
};
use bytes::Bytes;
use futures::{SinkExt, StreamExt};
use smartc_core::{ConnectionId, Error};
use smartc_hub::{ServerEvent, SignalingService, WireCodec};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::server::AppState;

pub async fn signal_handler(
    State(state): State<AppState>,
    ws: WebSocketUpgrade,
) -> impl IntoResponse {
    let max_message_size = state.config.server.max_message_size;
    ws.max_message_size(max_message_size)
        .on_upgrade(move |socket| handle_socket(socket, state))
}

fn binary(event: &ServerEvent) -> Message {
    Message::Binary(Bytes::from(WireCodec::encode_event(event)))
}

async fn handle_socket(socket: WebSocket, state: AppState) {
    let connection_id = ConnectionId::new(nanoid::nanoid!());
    let (mut sink, mut stream) = socket.split();

    let (tx, mut rx) = mpsc::channel::<ServerEvent>(state.config.hub.outbound_buffer);
    let guard = match state.hub.connect(connection_id.clone(), tx.clone()) {
        Ok(guard) => guard,
        Err(e) => {
            warn!(connection_id = %connection_id, error = %e, "Rejected WebSocket connection");
            let _ = sink.send(binary(&ServerEvent::rejected(0, &e))).await;
            let _ = sink.close().await;
            return;
        }
    };
    info!(connection_id = %connection_id, "WebSocket connection established");

    let writer_id = connection_id.clone();
    let writer = tokio::spawn(async move {
        while let Some(event) = rx.recv().await {
            if let Err(e) = sink.send(binary(&event)).await {
                debug!(connection_id = %writer_id, error = %e, "Failed to send WebSocket message");
                break;
            }
        }
        let _ = sink.close().await;
    });

    let closed = guard.closed();
    loop {
        let message = tokio::select! {
            () = closed.cancelled() => {
                info!(connection_id = %connection_id, "Connection unregistered by hub, closing socket");
                break;
            }
            message = stream.next() => message,
        };
        let Some(message) = message else {
            break;
        };

        let reply = match message {
            Ok(Message::Binary(frame)) => {
                state
                    .dispatch
                    .dispatch_frame(state.hub.as_ref(), &connection_id, &frame)
            }
            Ok(Message::Text(_)) => Some(ServerEvent::rejected(
                0,
                &Error::MalformedPayload("Text frames are not supported".into()),
            )),
            Ok(Message::Ping(_) | Message::Pong(_)) => {
                state.hub.heartbeat(&connection_id);
                None
            }
            Ok(Message::Close(_)) => break,
            Err(e) => {
                debug!(connection_id = %connection_id, error = %e, "WebSocket error");
                break;
            }
        };

        if let Some(reply) = reply {
            if tx.try_send(reply).is_err() {
                warn!(connection_id = %connection_id, "Outbound queue full, dropping reply");
            }
        }
    }

    // unregistering drops the hub's sender; ours goes next so the writer drains and exits
    drop(guard);
    drop(tx);
    if let Err(e) = writer.await {
        warn!(connection_id = %connection_id, error = %e, "WebSocket writer task failed");
    }
    info!(connection_id = %connection_id, "WebSocket connection closed");
}

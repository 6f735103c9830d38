//! WebSocket streaming transport for propagation runs.
//!
//! ## Protocol
//!
//! The subscriber sends exactly one request after the upgrade:
//!
//! ```json
//! { "direction": "both", "start_frame_index": 10, "max_frames": 50 }
//! ```
//!
//! The server then emits one message per produced frame,
//!
//! ```json
//! { "type": "frame", "frame_index": 9, "objects": [...] }
//! ```
//!
//! followed by exactly one terminal message — never a frame after it:
//!
//! ```json
//! { "type": "complete", "total_frames": 50 }
//! { "type": "error", "error": "inference failed at frame 12: ..." }
//! ```
//!
//! A subscriber disconnect closes the frame channel, which the propagation
//! engine observes as cancellation at its next inter-frame checkpoint; the
//! session returns to ready with its partial progress intact.

use axum::{
    extract::{
        Path, State,
        ws::{Message, WebSocket, WebSocketUpgrade},
    },
    response::IntoResponse,
};
use futures::{SinkExt, StreamExt};
use serde::Serialize;
use tracing::{debug, error, info};

use tracklet_core::{ObjectResult, PropagateRequest, SessionId, propagation};

use crate::api::ApiState;

/// WebSocket upgrade endpoint: `GET /api/v1/sessions/{id}/stream`.
pub async fn websocket_handler(
    ws: WebSocketUpgrade,
    Path(id): Path<String>,
    State(state): State<ApiState>,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_socket(socket, state, SessionId::from(id)))
}

/// Outbound stream messages.
#[derive(Debug, Serialize)]
#[serde(tag = "type", rename_all = "lowercase")]
enum StreamMessage {
    Frame {
        frame_index: u32,
        objects: Vec<ObjectResult>,
    },
    Complete {
        total_frames: usize,
    },
    Error {
        error: String,
    },
}

async fn handle_socket(socket: WebSocket, state: ApiState, id: SessionId) {
    let (mut sender, mut receiver) = socket.split();

    // One request message opens the run.
    let request = loop {
        match receiver.next().await {
            Some(Ok(Message::Text(text))) => {
                match serde_json::from_str::<PropagateRequest>(&text) {
                    Ok(request) => break request,
                    Err(e) => {
                        send_terminal(
                            &mut sender,
                            StreamMessage::Error {
                                error: format!("invalid propagation request: {e}"),
                            },
                        )
                        .await;
                        return;
                    }
                }
            }
            Some(Ok(Message::Ping(data))) => {
                let _ = sender.send(Message::Pong(data)).await;
            }
            Some(Ok(Message::Close(_))) | None => {
                debug!(session = %id, "subscriber left before sending a request");
                return;
            }
            Some(Ok(_)) => {} // Ignore binary/pong
            Some(Err(e)) => {
                error!(session = %id, error = %e, "websocket error before request");
                return;
            }
        }
    };

    let mut stream = match propagation::start(&state.store, &id, request) {
        Ok(stream) => stream,
        Err(err) => {
            send_terminal(
                &mut sender,
                StreamMessage::Error {
                    error: err.to_string(),
                },
            )
            .await;
            return;
        }
    };

    info!(
        session = %id,
        planned = stream.planned_frames(),
        "streaming propagation started"
    );

    let mut frames_sent = 0_usize;
    loop {
        tokio::select! {
            item = stream.next() => {
                match item {
                    Some(Ok(frame)) => {
                        let message = StreamMessage::Frame {
                            frame_index: frame.frame_index,
                            objects: frame.objects,
                        };
                        if !send_message(&mut sender, &message).await {
                            // Transport write failed; dropping the stream
                            // cancels the run at its next checkpoint.
                            debug!(session = %id, frames_sent, "subscriber gone mid-stream");
                            return;
                        }
                        frames_sent += 1;
                    }
                    Some(Err(err)) => {
                        send_terminal(
                            &mut sender,
                            StreamMessage::Error { error: err.to_string() },
                        )
                        .await;
                        return;
                    }
                    None => {
                        send_terminal(
                            &mut sender,
                            StreamMessage::Complete { total_frames: frames_sent },
                        )
                        .await;
                        info!(session = %id, frames_sent, "streaming propagation complete");
                        return;
                    }
                }
            }

            // Watch the inbound half for disconnects so cancellation is
            // observed even while no frame is in flight.
            inbound = receiver.next() => {
                match inbound {
                    Some(Ok(Message::Close(_))) | None => {
                        debug!(session = %id, frames_sent, "subscriber disconnected");
                        return;
                    }
                    Some(Ok(Message::Ping(data))) => {
                        let _ = sender.send(Message::Pong(data)).await;
                    }
                    Some(Ok(_)) => {} // Ignore extra client messages
                    Some(Err(e)) => {
                        debug!(session = %id, error = %e, "websocket error mid-stream");
                        return;
                    }
                }
            }
        }
    }
}

type WsSender = futures::stream::SplitSink<WebSocket, Message>;

/// Sends one message; false when the subscriber is gone.
async fn send_message(sender: &mut WsSender, message: &StreamMessage) -> bool {
    let Ok(json) = serde_json::to_string(message) else {
        return false;
    };
    sender.send(Message::Text(json.into())).await.is_ok()
}

async fn send_terminal(sender: &mut WsSender, message: StreamMessage) {
    let _ = send_message(sender, &message).await;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn frame_message_wire_shape() {
        let message = StreamMessage::Frame {
            frame_index: 9,
            objects: vec![ObjectResult {
                id: 1,
                mask: "44 2 8 2 44".to_string(),
                bbox: [0.5, 0.5, 0.2, 0.2],
                score: 0.95,
            }],
        };
        let json = serde_json::to_value(&message).unwrap();
        assert_eq!(json["type"], "frame");
        assert_eq!(json["frame_index"], 9);
        assert_eq!(json["objects"][0]["id"], 1);
        assert!(json["objects"][0]["box"].is_array());
    }

    #[test]
    fn terminal_message_wire_shapes() {
        let complete = serde_json::to_value(StreamMessage::Complete { total_frames: 50 }).unwrap();
        assert_eq!(complete["type"], "complete");
        assert_eq!(complete["total_frames"], 50);

        let error = serde_json::to_value(StreamMessage::Error {
            error: "session not found: ghost".to_string(),
        })
        .unwrap();
        assert_eq!(error["type"], "error");
        assert!(error["error"].as_str().unwrap().contains("ghost"));
    }

    #[test]
    fn request_message_defaults() {
        let request: PropagateRequest = serde_json::from_str("{}").unwrap();
        assert_eq!(request.start_frame_index, 0);
        assert!(request.max_frames.is_none());

        let request: PropagateRequest =
            serde_json::from_str(r#"{"direction":"forward","start_frame_index":3,"max_frames":7}"#)
                .unwrap();
        assert_eq!(request.start_frame_index, 3);
        assert_eq!(request.max_frames, Some(7));
    }
}

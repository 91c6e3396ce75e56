//! Media-stream WebSocket endpoint.
//!
//! After the webhook's XML response, the carrier opens a WebSocket here
//! and starts pushing JSON frames. The socket is split into a reader and
//! a writer task bridged by bounded channels, and a [`CallSession`] runs
//! the call between them; when the session returns, the socket closes.

use std::sync::Arc;

use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::State;
use axum::response::Response;
use futures_util::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::carrier::{CarrierCommand, CarrierEvent};
use crate::session::CallSession;
use crate::state::AppState;

/// Channel capacity for media frames in both directions. Telephony audio
/// arrives at 50 frames/s, so this absorbs several seconds of skew.
const MEDIA_CHANNEL_CAPACITY: usize = 256;

/// `GET /media-stream`
pub async fn media_stream_handler(
    ws: WebSocketUpgrade,
    State(state): State<Arc<AppState>>,
) -> Response {
    ws.on_upgrade(move |socket| handle_media_socket(socket, state))
}

async fn handle_media_socket(socket: WebSocket, state: Arc<AppState>) {
    info!("media stream socket opened");
    let (mut sink, mut source) = socket.split();

    let (event_tx, event_rx) = mpsc::channel::<CarrierEvent>(MEDIA_CHANNEL_CAPACITY);
    let (command_tx, mut command_rx) = mpsc::channel::<CarrierCommand>(MEDIA_CHANNEL_CAPACITY);

    // Writer: outbound commands to the carrier.
    let writer = tokio::spawn(async move {
        while let Some(command) = command_rx.recv().await {
            let json = match serde_json::to_string(&command) {
                Ok(json) => json,
                Err(e) => {
                    warn!(error = %e, "failed to serialize carrier command");
                    continue;
                }
            };
            if sink.send(Message::Text(json.into())).await.is_err() {
                break;
            }
        }
        let _ = sink.send(Message::Close(None)).await;
    });

    // Reader: inbound frames from the carrier. A malformed frame is
    // logged and dropped; it never ends the call.
    let reader = tokio::spawn(async move {
        while let Some(message) = source.next().await {
            match message {
                Ok(Message::Text(text)) => match CarrierEvent::parse(text.as_str()) {
                    Ok(event) => {
                        if event_tx.send(event).await.is_err() {
                            break;
                        }
                    }
                    Err(e) => {
                        warn!(error = %e, frame = %text, "malformed carrier frame dropped");
                    }
                },
                Ok(Message::Close(_)) => {
                    debug!("carrier closed the media socket");
                    break;
                }
                Ok(_) => {}
                Err(e) => {
                    warn!(error = %e, "media socket read failed");
                    break;
                }
            }
        }
        // Dropping event_tx tells the session the carrier is gone.
    });

    let session = CallSession::new(
        state.realtime_options(),
        Arc::clone(&state.dispatcher),
        Arc::clone(&state.transcripts),
        state.config.shop_name.clone(),
    );
    session.run(event_rx, command_tx).await;

    reader.abort();
    writer.abort();
    info!("media stream socket closed");
}

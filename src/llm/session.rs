//! Realtime LLM WebSocket session.
//!
//! [`LlmSession::connect`] opens the socket and returns a command handle
//! plus a channel of typed [`LlmEvent`]s. A single spawned task owns the
//! socket and multiplexes both directions; dropping the handle (or calling
//! [`LlmSession::disconnect`]) closes the connection.

use futures_util::{SinkExt, StreamExt};
use thiserror::Error;
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::Message;
use tracing::{debug, info, trace, warn};

use super::messages::{
    ClientEvent, ConversationItem, InputAudioTranscription, LlmEvent, SessionConfig, ToolDef,
    TurnDetection,
};

/// Realtime WebSocket endpoint.
const REALTIME_URL: &str = "wss://api.openai.com/v1/realtime";

/// Beta protocol marker required by the realtime service.
const REALTIME_BETA_HEADER: &str = "realtime=v1";

/// Telephony codec used end to end; the carrier payload passes through
/// untouched.
pub const AUDIO_FORMAT: &str = "g711_ulaw";

/// Input transcription model.
const TRANSCRIPTION_MODEL: &str = "whisper-1";

/// Server VAD tuning. Deliberately conservative to avoid echo-triggered
/// false starts on speakerphones.
const VAD_THRESHOLD: f32 = 0.8;
const VAD_PREFIX_PADDING_MS: u32 = 600;
const VAD_SILENCE_DURATION_MS: u32 = 1000;

/// Channel capacity in both directions; audio frames are small and
/// frequent.
const CHANNEL_CAPACITY: usize = 256;

#[derive(Debug, Error)]
pub enum LlmError {
    #[error("connection failed: {0}")]
    ConnectionFailed(String),

    #[error("session closed")]
    SessionClosed,
}

/// Connection settings for one call's LLM session.
#[derive(Debug, Clone)]
pub struct RealtimeOptions {
    pub api_key: String,
    pub model: String,
    pub voice: String,
}

/// Build the per-call session configuration: telephony codec on both
/// legs, input transcription, tuned server VAD, and the tool schemas.
pub fn build_session_config(
    options: &RealtimeOptions,
    instructions: String,
    tools: Vec<ToolDef>,
) -> SessionConfig {
    SessionConfig {
        modalities: Some(vec!["text".to_string(), "audio".to_string()]),
        instructions: Some(instructions),
        voice: Some(options.voice.clone()),
        input_audio_format: Some(AUDIO_FORMAT.to_string()),
        output_audio_format: Some(AUDIO_FORMAT.to_string()),
        input_audio_transcription: Some(InputAudioTranscription {
            model: TRANSCRIPTION_MODEL.to_string(),
        }),
        turn_detection: Some(TurnDetection::ServerVad {
            threshold: VAD_THRESHOLD,
            prefix_padding_ms: VAD_PREFIX_PADDING_MS,
            silence_duration_ms: VAD_SILENCE_DURATION_MS,
        }),
        tools: Some(tools),
        tool_choice: Some("auto".to_string()),
    }
}

/// Command handle for an open LLM session.
pub struct LlmSession {
    outbound: mpsc::Sender<ClientEvent>,
}

impl LlmSession {
    /// Open the realtime WebSocket and spawn the socket task. Returns the
    /// command handle and the inbound event channel.
    pub async fn connect(
        options: &RealtimeOptions,
    ) -> Result<(Self, mpsc::Receiver<LlmEvent>), LlmError> {
        let url = format!("{REALTIME_URL}?model={}", options.model);
        let mut request = url
            .into_client_request()
            .map_err(|e| LlmError::ConnectionFailed(e.to_string()))?;
        request.headers_mut().insert(
            "Authorization",
            format!("Bearer {}", options.api_key)
                .parse()
                .map_err(|_| LlmError::ConnectionFailed("invalid api key".to_string()))?,
        );
        request.headers_mut().insert(
            "OpenAI-Beta",
            REALTIME_BETA_HEADER
                .parse()
                .expect("static header value"),
        );

        let (ws_stream, _response) = tokio_tungstenite::connect_async(request)
            .await
            .map_err(|e| LlmError::ConnectionFailed(e.to_string()))?;
        info!(model = %options.model, "realtime LLM session connected");

        let (mut ws_sink, mut ws_source) = ws_stream.split();
        let (outbound_tx, mut outbound_rx) = mpsc::channel::<ClientEvent>(CHANNEL_CAPACITY);
        let (event_tx, event_rx) = mpsc::channel::<LlmEvent>(CHANNEL_CAPACITY);

        tokio::spawn(async move {
            loop {
                tokio::select! {
                    outgoing = outbound_rx.recv() => {
                        let Some(event) = outgoing else {
                            // Handle dropped: close the socket gracefully.
                            let _ = ws_sink.send(Message::Close(None)).await;
                            break;
                        };
                        let json = match serde_json::to_string(&event) {
                            Ok(json) => json,
                            Err(e) => {
                                warn!(error = %e, "failed to serialize client event");
                                continue;
                            }
                        };
                        if let Err(e) = ws_sink.send(Message::Text(json.into())).await {
                            warn!(error = %e, "LLM socket write failed");
                            break;
                        }
                    }

                    incoming = ws_source.next() => {
                        match incoming {
                            Some(Ok(Message::Text(text))) => {
                                match LlmEvent::parse(text.as_str()) {
                                    Ok(event) => {
                                        if event_tx.send(event).await.is_err() {
                                            break;
                                        }
                                    }
                                    Err(e) => {
                                        warn!(error = %e, "malformed LLM frame dropped");
                                    }
                                }
                            }
                            Some(Ok(Message::Ping(payload))) => {
                                let _ = ws_sink.send(Message::Pong(payload)).await;
                            }
                            Some(Ok(Message::Close(_))) | None => {
                                debug!("LLM socket closed");
                                break;
                            }
                            Some(Ok(_)) => {
                                trace!("ignoring non-text LLM frame");
                            }
                            Some(Err(e)) => {
                                warn!(error = %e, "LLM socket read failed");
                                break;
                            }
                        }
                    }
                }
            }
            let _ = event_tx.send(LlmEvent::Closed).await;
            debug!("LLM session task ended");
        });

        Ok((Self { outbound: outbound_tx }, event_rx))
    }

    /// Build a session handle around an existing command channel. Used by
    /// tests to observe outbound events without a live socket.
    pub fn from_parts(outbound: mpsc::Sender<ClientEvent>) -> Self {
        Self { outbound }
    }

    pub async fn update_session(&self, session: SessionConfig) -> Result<(), LlmError> {
        self.send(ClientEvent::SessionUpdate { session }).await
    }

    /// Append one caller audio frame (already base64, carrier codec).
    pub async fn send_audio(&self, audio: String) -> Result<(), LlmError> {
        self.send(ClientEvent::InputAudioBufferAppend { audio })
            .await
    }

    pub async fn create_response(&self) -> Result<(), LlmError> {
        self.send(ClientEvent::ResponseCreate).await
    }

    pub async fn cancel_response(&self) -> Result<(), LlmError> {
        self.send(ClientEvent::ResponseCancel).await
    }

    pub async fn clear_input_buffer(&self) -> Result<(), LlmError> {
        self.send(ClientEvent::InputAudioBufferClear).await
    }

    pub async fn commit_input_buffer(&self) -> Result<(), LlmError> {
        self.send(ClientEvent::InputAudioBufferCommit).await
    }

    /// Materialize a tool result and immediately request the follow-up
    /// response that voices it.
    pub async fn send_tool_result(&self, call_id: &str, output: &str) -> Result<(), LlmError> {
        self.send(ClientEvent::ConversationItemCreate {
            item: ConversationItem::function_call_output(call_id, output),
        })
        .await?;
        self.send(ClientEvent::ResponseCreate).await
    }

    /// Close the session. The socket task sends a close frame when the
    /// command channel drops.
    pub fn disconnect(self) {
        drop(self.outbound);
    }

    async fn send(&self, event: ClientEvent) -> Result<(), LlmError> {
        self.outbound
            .send(event)
            .await
            .map_err(|_| LlmError::SessionClosed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn tool_result_is_followed_by_a_response_request() {
        let (tx, mut rx) = mpsc::channel(8);
        let session = LlmSession::from_parts(tx);
        session.send_tool_result("call_7", "完了しました").await.unwrap();

        match rx.recv().await.unwrap() {
            ClientEvent::ConversationItemCreate { item } => {
                assert_eq!(item.call_id.as_deref(), Some("call_7"));
                assert_eq!(item.output.as_deref(), Some("完了しました"));
            }
            other => panic!("expected item create, got {other:?}"),
        }
        assert!(matches!(
            rx.recv().await.unwrap(),
            ClientEvent::ResponseCreate
        ));
    }

    #[tokio::test]
    async fn buffer_controls_emit_the_matching_events() {
        let (tx, mut rx) = mpsc::channel(8);
        let session = LlmSession::from_parts(tx);
        session.clear_input_buffer().await.unwrap();
        session.commit_input_buffer().await.unwrap();
        assert!(matches!(
            rx.recv().await.unwrap(),
            ClientEvent::InputAudioBufferClear
        ));
        assert!(matches!(
            rx.recv().await.unwrap(),
            ClientEvent::InputAudioBufferCommit
        ));
    }

    #[tokio::test]
    async fn send_fails_once_the_session_is_gone() {
        let (tx, rx) = mpsc::channel(1);
        drop(rx);
        let session = LlmSession::from_parts(tx);
        assert!(matches!(
            session.create_response().await,
            Err(LlmError::SessionClosed)
        ));
    }

    #[test]
    fn session_config_uses_the_telephony_codec_and_tuned_vad() {
        let options = RealtimeOptions {
            api_key: "key".to_string(),
            model: "gpt-4o-realtime-preview".to_string(),
            voice: "alloy".to_string(),
        };
        let config = build_session_config(&options, "指示".to_string(), Vec::new());
        assert_eq!(config.input_audio_format.as_deref(), Some(AUDIO_FORMAT));
        assert_eq!(config.output_audio_format.as_deref(), Some(AUDIO_FORMAT));
        assert_eq!(config.tool_choice.as_deref(), Some("auto"));
        match config.turn_detection {
            Some(TurnDetection::ServerVad {
                threshold,
                prefix_padding_ms,
                silence_duration_ms,
            }) => {
                assert_eq!(threshold, 0.8);
                assert_eq!(prefix_padding_ms, 600);
                assert_eq!(silence_duration_ms, 1000);
            }
            None => panic!("turn detection missing"),
        }
    }
}

//! Realtime LLM WebSocket message types.
//!
//! Client events are sent to the LLM service, server events received from
//! it. All events are JSON with a `type` tag. Event kinds this bridge does
//! not act on deserialize into [`LlmEvent::Unknown`] so a protocol
//! addition never breaks a live call.

use serde::{Deserialize, Serialize};

// =============================================================================
// Session configuration
// =============================================================================

/// Session configuration sent with `session.update`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionConfig {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub modalities: Option<Vec<String>>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub instructions: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub voice: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub input_audio_format: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub output_audio_format: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub input_audio_transcription: Option<InputAudioTranscription>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub turn_detection: Option<TurnDetection>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub tools: Option<Vec<ToolDef>>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub tool_choice: Option<String>,
}

/// Input transcription configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InputAudioTranscription {
    pub model: String,
}

/// Server-side VAD turn detection.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum TurnDetection {
    #[serde(rename = "server_vad")]
    ServerVad {
        threshold: f32,
        prefix_padding_ms: u32,
        silence_duration_ms: u32,
    },
}

/// Tool (function) declaration the LLM can call.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolDef {
    #[serde(rename = "type")]
    pub tool_type: String,
    pub name: String,
    pub description: String,
    pub parameters: serde_json::Value,
}

impl ToolDef {
    pub fn function(
        name: impl Into<String>,
        description: impl Into<String>,
        parameters: serde_json::Value,
    ) -> Self {
        Self {
            tool_type: "function".to_string(),
            name: name.into(),
            description: description.into(),
            parameters,
        }
    }
}

// =============================================================================
// Conversation items
// =============================================================================

/// A conversation item created by the client (tool output only, in this
/// bridge).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConversationItem {
    #[serde(rename = "type")]
    pub item_type: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub call_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub output: Option<String>,
}

impl ConversationItem {
    /// Tool-result item answering a function call.
    pub fn function_call_output(call_id: impl Into<String>, output: impl Into<String>) -> Self {
        Self {
            item_type: "function_call_output".to_string(),
            call_id: Some(call_id.into()),
            output: Some(output.into()),
        }
    }
}

// =============================================================================
// Client events
// =============================================================================

/// Events sent to the LLM service.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type")]
pub enum ClientEvent {
    #[serde(rename = "session.update")]
    SessionUpdate { session: SessionConfig },

    #[serde(rename = "input_audio_buffer.append")]
    InputAudioBufferAppend { audio: String },

    #[serde(rename = "input_audio_buffer.commit")]
    InputAudioBufferCommit,

    #[serde(rename = "input_audio_buffer.clear")]
    InputAudioBufferClear,

    #[serde(rename = "conversation.item.create")]
    ConversationItemCreate { item: ConversationItem },

    #[serde(rename = "response.create")]
    ResponseCreate,

    #[serde(rename = "response.cancel")]
    ResponseCancel,
}

// =============================================================================
// Server events
// =============================================================================

/// Error payload attached to `error` events.
#[derive(Debug, Clone, Deserialize)]
pub struct ApiError {
    #[serde(default, rename = "type")]
    pub error_type: Option<String>,
    #[serde(default)]
    pub code: Option<String>,
    #[serde(default)]
    pub message: String,
}

/// Error code for the benign cancel race: barge-in fired after the model
/// had already finished the response.
pub const CANCEL_NOT_ACTIVE: &str = "response_cancel_not_active";

impl ApiError {
    pub fn is_benign_cancel_race(&self) -> bool {
        self.code.as_deref() == Some(CANCEL_NOT_ACTIVE)
    }
}

/// Events received from the LLM service.
///
/// `Unknown` and `Closed` are produced locally, never deserialized:
/// `Unknown` by [`LlmEvent::parse`] for unrecognized kinds, `Closed` by
/// the socket task when the connection ends.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type")]
pub enum LlmEvent {
    #[serde(rename = "error")]
    Error { error: ApiError },

    #[serde(rename = "session.created")]
    SessionCreated,

    #[serde(rename = "session.updated")]
    SessionUpdated,

    #[serde(rename = "input_audio_buffer.speech_started")]
    SpeechStarted,

    #[serde(rename = "input_audio_buffer.speech_stopped")]
    SpeechStopped,

    #[serde(rename = "conversation.item.input_audio_transcription.completed")]
    TranscriptionCompleted {
        #[serde(default)]
        transcript: String,
    },

    #[serde(rename = "response.created")]
    ResponseCreated,

    #[serde(rename = "response.done")]
    ResponseDone,

    #[serde(rename = "response.audio.delta")]
    AudioDelta { delta: String },

    #[serde(rename = "response.audio.done")]
    AudioDone,

    #[serde(rename = "response.audio_transcript.done")]
    AudioTranscriptDone {
        #[serde(default)]
        transcript: String,
    },

    #[serde(rename = "response.function_call_arguments.done")]
    FunctionCallArgumentsDone {
        name: String,
        call_id: String,
        arguments: String,
    },

    #[serde(skip)]
    Unknown { kind: String, raw: serde_json::Value },

    #[serde(skip)]
    Closed,
}

impl LlmEvent {
    /// Parse a server frame. Unrecognized event kinds become `Unknown`;
    /// only malformed JSON is an error.
    pub fn parse(text: &str) -> Result<Self, serde_json::Error> {
        let value: serde_json::Value = serde_json::from_str(text)?;
        match LlmEvent::deserialize(&value) {
            Ok(event) => Ok(event),
            Err(_) => {
                let kind = value
                    .get("type")
                    .and_then(|t| t.as_str())
                    .unwrap_or("<missing type>")
                    .to_string();
                Ok(LlmEvent::Unknown { kind, raw: value })
            }
        }
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn client_events_carry_their_type_tag() {
        let json = serde_json::to_string(&ClientEvent::ResponseCancel).unwrap();
        assert!(json.contains("response.cancel"));

        let json = serde_json::to_string(&ClientEvent::InputAudioBufferAppend {
            audio: "AAAA".to_string(),
        })
        .unwrap();
        assert!(json.contains("input_audio_buffer.append"));
        assert!(json.contains("AAAA"));
    }

    #[test]
    fn tool_result_item_serializes_as_function_call_output() {
        let event = ClientEvent::ConversationItemCreate {
            item: ConversationItem::function_call_output("call_1", "done"),
        };
        let json = serde_json::to_string(&event).unwrap();
        assert!(json.contains("conversation.item.create"));
        assert!(json.contains("function_call_output"));
        assert!(json.contains("call_1"));
    }

    #[test]
    fn known_server_events_parse_into_typed_variants() {
        let event = LlmEvent::parse(
            r#"{"type":"response.audio.delta","response_id":"r1","delta":"BBBB"}"#,
        )
        .unwrap();
        match event {
            LlmEvent::AudioDelta { delta } => assert_eq!(delta, "BBBB"),
            other => panic!("wrong variant: {other:?}"),
        }

        let event = LlmEvent::parse(
            r#"{"type":"response.function_call_arguments.done","name":"check_order_status","call_id":"c9","arguments":"{}"}"#,
        )
        .unwrap();
        match event {
            LlmEvent::FunctionCallArgumentsDone { name, call_id, .. } => {
                assert_eq!(name, "check_order_status");
                assert_eq!(call_id, "c9");
            }
            other => panic!("wrong variant: {other:?}"),
        }
    }

    #[test]
    fn unknown_event_kinds_do_not_fail() {
        let event =
            LlmEvent::parse(r#"{"type":"rate_limits.updated","rate_limits":[]}"#).unwrap();
        match event {
            LlmEvent::Unknown { kind, .. } => assert_eq!(kind, "rate_limits.updated"),
            other => panic!("wrong variant: {other:?}"),
        }
    }

    #[test]
    fn malformed_json_is_an_error() {
        assert!(LlmEvent::parse("{not json").is_err());
    }

    #[test]
    fn benign_cancel_race_is_recognized() {
        let event = LlmEvent::parse(
            r#"{"type":"error","error":{"type":"invalid_request_error","code":"response_cancel_not_active","message":"no active response"}}"#,
        )
        .unwrap();
        match event {
            LlmEvent::Error { error } => assert!(error.is_benign_cancel_race()),
            other => panic!("wrong variant: {other:?}"),
        }
    }
}

//! Carrier media-stream frame types.
//!
//! The carrier speaks JSON text frames over the media WebSocket. Audio
//! payloads are opaque base64 strings in the carrier-native codec and are
//! never decoded here.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

/// Marker name the bridge attaches to the end of each assistant response;
/// the carrier echoes it back once playback actually finishes.
pub const PLAYBACK_COMPLETE_MARK: &str = "audio-complete";

/// Frames received from the carrier.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "event", rename_all = "lowercase")]
pub enum CarrierEvent {
    Connected,

    Start { start: StreamStart },

    Media { media: MediaFrame },

    Mark { mark: MarkFrame },

    Stop,
}

impl CarrierEvent {
    /// Parse one inbound frame. Malformed frames are the caller's problem
    /// to log and drop; a bad frame never kills the call.
    pub fn parse(text: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(text)
    }
}

/// Stream metadata delivered with `start`, including the custom
/// parameters set by the webhook (identification context and caller id).
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StreamStart {
    pub stream_sid: String,
    pub call_sid: String,
    #[serde(default)]
    pub custom_parameters: HashMap<String, String>,
}

/// One audio frame from the caller.
#[derive(Debug, Clone, Deserialize)]
pub struct MediaFrame {
    pub payload: String,
}

/// Playback acknowledgement of a named marker.
#[derive(Debug, Clone, Deserialize)]
pub struct MarkFrame {
    pub name: String,
}

/// Frames sent to the carrier.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "event", rename_all = "lowercase")]
pub enum CarrierCommand {
    Media {
        #[serde(rename = "streamSid")]
        stream_sid: String,
        media: OutboundMedia,
    },

    Mark {
        #[serde(rename = "streamSid")]
        stream_sid: String,
        mark: OutboundMark,
    },

    /// Flush any audio the carrier has queued but not yet played.
    Clear {
        #[serde(rename = "streamSid")]
        stream_sid: String,
    },
}

#[derive(Debug, Clone, Serialize)]
pub struct OutboundMedia {
    pub payload: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct OutboundMark {
    pub name: String,
}

impl CarrierCommand {
    pub fn media(stream_sid: &str, payload: String) -> Self {
        Self::Media {
            stream_sid: stream_sid.to_string(),
            media: OutboundMedia { payload },
        }
    }

    pub fn playback_mark(stream_sid: &str) -> Self {
        Self::Mark {
            stream_sid: stream_sid.to_string(),
            mark: OutboundMark {
                name: PLAYBACK_COMPLETE_MARK.to_string(),
            },
        }
    }

    pub fn clear(stream_sid: &str) -> Self {
        Self::Clear {
            stream_sid: stream_sid.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn start_frame_carries_custom_parameters() {
        let event = CarrierEvent::parse(
            r#"{
                "event": "start",
                "sequenceNumber": "1",
                "start": {
                    "accountSid": "AC00",
                    "streamSid": "MZ123",
                    "callSid": "CA1",
                    "tracks": ["inbound"],
                    "customParameters": {
                        "customerContext": "eyJmb3VuZCI6ZmFsc2V9",
                        "callerPhone": "+815012345678",
                        "callSid": "CA1"
                    }
                },
                "streamSid": "MZ123"
            }"#,
        )
        .unwrap();
        match event {
            CarrierEvent::Start { start } => {
                assert_eq!(start.stream_sid, "MZ123");
                assert_eq!(start.call_sid, "CA1");
                assert_eq!(
                    start.custom_parameters.get("callerPhone").map(String::as_str),
                    Some("+815012345678")
                );
            }
            other => panic!("wrong variant: {other:?}"),
        }
    }

    #[test]
    fn media_and_stop_frames_parse() {
        let event = CarrierEvent::parse(
            r#"{"event":"media","media":{"track":"inbound","chunk":"3","timestamp":"60","payload":"////"}}"#,
        )
        .unwrap();
        match event {
            CarrierEvent::Media { media } => assert_eq!(media.payload, "////"),
            other => panic!("wrong variant: {other:?}"),
        }

        assert!(matches!(
            CarrierEvent::parse(r#"{"event":"stop","streamSid":"MZ123"}"#).unwrap(),
            CarrierEvent::Stop
        ));
    }

    #[test]
    fn unknown_event_kind_is_a_parse_error() {
        assert!(CarrierEvent::parse(r#"{"event":"dtmf","dtmf":{"digit":"5"}}"#).is_err());
    }

    #[test]
    fn outbound_commands_serialize_with_stream_sid() {
        let json =
            serde_json::to_string(&CarrierCommand::media("MZ1", "AAAA".to_string())).unwrap();
        assert!(json.contains(r#""event":"media""#));
        assert!(json.contains(r#""streamSid":"MZ1""#));
        assert!(json.contains("AAAA"));

        let json = serde_json::to_string(&CarrierCommand::playback_mark("MZ1")).unwrap();
        assert!(json.contains(r#""event":"mark""#));
        assert!(json.contains(PLAYBACK_COMPLETE_MARK));

        let json = serde_json::to_string(&CarrierCommand::clear("MZ1")).unwrap();
        assert!(json.contains(r#""event":"clear""#));
    }
}

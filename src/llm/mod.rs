//! Streaming speech-to-speech LLM integration.

pub mod messages;
pub mod session;

pub use messages::{ApiError, ClientEvent, LlmEvent, SessionConfig, ToolDef};
pub use session::{build_session_config, LlmError, LlmSession, RealtimeOptions, AUDIO_FORMAT};

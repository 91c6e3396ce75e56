//! voicedesk — telephone-to-LLM voice bridge for e-commerce support.
//!
//! A call arrives at the telephony carrier, which POSTs a webhook here.
//! The bridge identifies the caller against the order backend before any
//! audio flows, then couples the carrier's media WebSocket to a streaming
//! speech-to-speech LLM session, arbitrating turn-taking (barge-in, echo
//! suppression), executing the business tools the model requests, and
//! recording a transcript.

pub mod backend;
pub mod carrier;
pub mod config;
pub mod handlers;
pub mod llm;
pub mod routes;
pub mod session;
pub mod state;
pub mod tools;
pub mod transcript;

pub use config::{BridgeConfig, ConfigError, Environment};
pub use state::AppState;

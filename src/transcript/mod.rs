//! Append-only call transcript sink.
//!
//! Everything here is best-effort: sink failures are logged and swallowed
//! so transcript trouble can never affect a live call.

use async_trait::async_trait;
use chrono::Utc;
use serde::Serialize;
use serde_json::json;
use tracing::{debug, warn};
use uuid::Uuid;

/// Who produced a transcript line.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Speaker {
    Caller,
    Assistant,
    System,
    Tool,
}

/// Opaque handle to one call's transcript.
#[derive(Debug, Clone)]
pub struct TranscriptRef(pub String);

/// Metadata recorded when a call opens.
#[derive(Debug, Clone)]
pub struct CallMeta {
    pub call_sid: String,
    pub caller_phone: String,
    pub customer_name: Option<String>,
    pub identified: bool,
}

#[async_trait]
pub trait TranscriptSink: Send + Sync {
    /// Open a call record; `None` means transcripts are disabled (or the
    /// open failed) and subsequent appends are skipped.
    async fn start_call(&self, meta: CallMeta) -> Option<TranscriptRef>;

    async fn append_message(&self, r: &TranscriptRef, speaker: Speaker, content: &str);

    async fn append_tool_call(&self, r: &TranscriptRef, name: &str, args: &str, result: &str);

    async fn end_call(&self, r: &TranscriptRef, duration_seconds: u64);
}

/// Sink used when no transcript store is configured.
pub struct NoopSink;

#[async_trait]
impl TranscriptSink for NoopSink {
    async fn start_call(&self, meta: CallMeta) -> Option<TranscriptRef> {
        debug!(call_sid = %meta.call_sid, "transcript store disabled, not recording");
        None
    }

    async fn append_message(&self, _r: &TranscriptRef, _speaker: Speaker, _content: &str) {}

    async fn append_tool_call(&self, _r: &TranscriptRef, _name: &str, _args: &str, _result: &str) {}

    async fn end_call(&self, _r: &TranscriptRef, _duration_seconds: u64) {}
}

/// REST transcript store: `calls`, `messages` and `tool_calls` tables
/// behind a PostgREST-style endpoint.
pub struct RestSink {
    http: reqwest::Client,
    base_url: String,
    api_key: String,
}

impl RestSink {
    pub fn new(base_url: impl Into<String>, api_key: impl Into<String>) -> Self {
        let http = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(10))
            .build()
            .expect("reqwest client");
        Self {
            http,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            api_key: api_key.into(),
        }
    }

    async fn insert(&self, table: &str, row: serde_json::Value) -> bool {
        let url = format!("{}/rest/v1/{table}", self.base_url);
        let result = self
            .http
            .post(&url)
            .header("apikey", &self.api_key)
            .json(&row)
            .send()
            .await;
        match result {
            Ok(response) if response.status().is_success() => true,
            Ok(response) => {
                warn!(table, status = %response.status(), "transcript insert refused");
                false
            }
            Err(e) => {
                warn!(table, error = %e, "transcript insert failed");
                false
            }
        }
    }
}

#[async_trait]
impl TranscriptSink for RestSink {
    async fn start_call(&self, meta: CallMeta) -> Option<TranscriptRef> {
        let id = Uuid::new_v4().to_string();
        let row = json!({
            "id": id,
            "call_sid": meta.call_sid,
            "caller_phone": meta.caller_phone,
            "customer_name": meta.customer_name,
            "identified": meta.identified,
            "started_at": Utc::now().to_rfc3339(),
        });
        if self.insert("calls", row).await {
            Some(TranscriptRef(id))
        } else {
            None
        }
    }

    async fn append_message(&self, r: &TranscriptRef, speaker: Speaker, content: &str) {
        let row = json!({
            "call_id": r.0,
            "speaker": speaker,
            "content": content,
            "created_at": Utc::now().to_rfc3339(),
        });
        self.insert("messages", row).await;
    }

    async fn append_tool_call(&self, r: &TranscriptRef, name: &str, args: &str, result: &str) {
        let row = json!({
            "call_id": r.0,
            "tool_name": name,
            "arguments": args,
            "result": result,
            "created_at": Utc::now().to_rfc3339(),
        });
        self.insert("tool_calls", row).await;
    }

    async fn end_call(&self, r: &TranscriptRef, duration_seconds: u64) {
        let url = format!("{}/rest/v1/calls?id=eq.{}", self.base_url, r.0);
        let row = json!({
            "ended_at": Utc::now().to_rfc3339(),
            "duration_seconds": duration_seconds,
        });
        let result = self
            .http
            .patch(&url)
            .header("apikey", &self.api_key)
            .json(&row)
            .send()
            .await;
        if let Err(e) = result {
            warn!(error = %e, "transcript finalize failed");
        }
    }
}

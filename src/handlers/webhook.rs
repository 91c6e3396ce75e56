//! Inbound call webhooks.
//!
//! The carrier POSTs here when a call arrives. Identification runs
//! synchronously inside the webhook deadline (one attempt; the backend
//! client's internal auth retry applies), and the response XML tells the
//! carrier to open the media stream with the lookup result smuggled
//! through a custom parameter.

use std::sync::Arc;

use axum::extract::State;
use axum::http::{header, HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Form;
use serde::Deserialize;
use tracing::{info, warn};

use crate::carrier::twiml;
use crate::session::{
    encode_context, PARAM_CALLER_PHONE, PARAM_CALL_SID, PARAM_CUSTOMER_CONTEXT,
};
use crate::state::AppState;

/// Form fields of the carrier's call-start request. Anything beyond the
/// two we need is ignored.
#[derive(Debug, Deserialize)]
pub struct VoiceWebhookForm {
    #[serde(rename = "CallSid")]
    pub call_sid: Option<String>,
    #[serde(rename = "From")]
    pub from: Option<String>,
}

/// Dial status callback fields, logged for the transfer audit trail.
#[derive(Debug, Deserialize)]
pub struct CallStatusForm {
    #[serde(rename = "CallSid")]
    pub call_sid: Option<String>,
    #[serde(rename = "CallStatus")]
    pub call_status: Option<String>,
    #[serde(rename = "DialCallStatus")]
    pub dial_call_status: Option<String>,
}

fn xml_response(body: String) -> Response {
    (
        StatusCode::OK,
        [(header::CONTENT_TYPE, "text/xml")],
        body,
    )
        .into_response()
}

/// `POST /voice/incoming`
pub async fn voice_webhook(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Form(form): Form<VoiceWebhookForm>,
) -> Response {
    let (Some(call_sid), Some(from)) = (form.call_sid, form.from) else {
        warn!("webhook missing CallSid or From");
        return xml_response(twiml::apology_hangup(
            "申し訳ございません。お電話を受け付けられませんでした。",
        ));
    };

    info!(%call_sid, "incoming call");

    // Synchronous identification; failure degrades to a neutral context
    // and never blocks the call.
    let ident = state.orders.search_by_phone(&from).await;
    let encoded = encode_context(&ident);

    let host = state
        .config
        .public_host
        .clone()
        .or_else(|| {
            headers
                .get(header::HOST)
                .and_then(|h| h.to_str().ok())
                .map(str::to_string)
        })
        .unwrap_or_else(|| "localhost".to_string());

    let xml = twiml::stream_connect(
        &host,
        &[
            (PARAM_CUSTOMER_CONTEXT, encoded.as_str()),
            (PARAM_CALLER_PHONE, from.as_str()),
            (PARAM_CALL_SID, call_sid.as_str()),
        ],
    );
    xml_response(xml)
}

/// `POST /call-status`
pub async fn call_status_webhook(Form(form): Form<CallStatusForm>) -> StatusCode {
    info!(
        call_sid = form.call_sid.as_deref().unwrap_or("-"),
        call_status = form.call_status.as_deref().unwrap_or("-"),
        dial_call_status = form.dial_call_status.as_deref().unwrap_or("-"),
        "call status callback"
    );
    StatusCode::OK
}

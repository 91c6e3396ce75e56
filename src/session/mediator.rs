//! Per-call session mediator.
//!
//! One mediator instance owns one call: it decodes the identification
//! context smuggled through the stream parameters, opens the LLM session,
//! and then runs the duplex loop that couples the carrier and LLM streams
//! under the turn arbiter's rules. Session state is never shared across
//! calls.

use std::sync::Arc;
use std::time::Duration;

use serde_json::json;
use tokio::sync::mpsc;
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

use crate::backend::IdentificationContext;
use crate::carrier::{CarrierCommand, CarrierEvent, StreamStart, PLAYBACK_COMPLETE_MARK};
use crate::llm::{
    build_session_config, LlmEvent, LlmSession, RealtimeOptions,
};
use crate::tools::{tool_schemas, ToolCallContext, ToolDispatcher, ToolOutcome};
use crate::transcript::{CallMeta, Speaker, TranscriptRef, TranscriptSink};

use super::arbiter::{BargeIn, TurnArbiter};
use super::context::{
    decode_context, CallIdentity, PARAM_CALLER_PHONE, PARAM_CALL_SID, PARAM_CUSTOMER_CONTEXT,
};
use super::prompt;

/// Longest we wait for the LLM's session-config acknowledgement. Missing
/// the ack is logged but never fatal.
const SESSION_READY_TIMEOUT: Duration = Duration::from_secs(3);

/// Wait after session setup before the greeting, so the carrier's media
/// path is established and the opening is not clipped.
const GREETING_SETTLE: Duration = Duration::from_millis(1200);

/// Spoken through the assistant when a tool requests a human handoff.
const HANDOFF_MESSAGE: &str =
    "かしこまりました。担当者におつなぎいたしますので、そのままお待ちください。";

/// Call lifecycle phase. Mostly a telemetry concern; the forwarding rules
/// depend on the arbiter and the initialized flag, not on the phase.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum CallPhase {
    Connecting,
    Greeting,
    Listening,
    Responding,
    InTool,
    Closing,
}

/// A finished tool execution, reported back into the mediator loop.
struct CompletedTool {
    call_id: String,
    name: String,
    arguments: String,
    outcome: ToolOutcome,
}

pub struct CallSession {
    options: RealtimeOptions,
    dispatcher: Arc<ToolDispatcher>,
    transcripts: Arc<dyn TranscriptSink>,
    shop_name: String,
}

impl CallSession {
    pub fn new(
        options: RealtimeOptions,
        dispatcher: Arc<ToolDispatcher>,
        transcripts: Arc<dyn TranscriptSink>,
        shop_name: String,
    ) -> Self {
        Self {
            options,
            dispatcher,
            transcripts,
            shop_name,
        }
    }

    /// Run one call to completion. Returning closes the carrier socket.
    pub async fn run(
        self,
        mut carrier_rx: mpsc::Receiver<CarrierEvent>,
        carrier_tx: mpsc::Sender<CarrierCommand>,
    ) {
        // The carrier sends `connected` then `start`; everything before
        // `start` carries no session state.
        let start = loop {
            match carrier_rx.recv().await {
                Some(CarrierEvent::Start { start }) => break start,
                Some(CarrierEvent::Connected) => continue,
                Some(CarrierEvent::Stop) | None => {
                    debug!("carrier closed before the stream started");
                    return;
                }
                Some(other) => {
                    debug!(event = ?other, "ignoring pre-start carrier frame");
                    continue;
                }
            }
        };

        let (identity, ident) = unpack_start(&start);
        info!(
            call_sid = %identity.call_sid,
            identified = ident.found,
            lookup_error = ident.error,
            "media stream started"
        );

        let transcript = self
            .transcripts
            .start_call(CallMeta {
                call_sid: identity.call_sid.clone(),
                caller_phone: identity.caller_number.clone(),
                customer_name: ident.customer_name.clone(),
                identified: ident.found,
            })
            .await;

        let instructions = prompt::compose(&ident, &self.shop_name);
        let (llm, mut llm_events) = match LlmSession::connect(&self.options).await {
            Ok(pair) => pair,
            Err(e) => {
                // The carrier plays its own failure prompt once we hang up.
                error!(call_sid = %identity.call_sid, error = %e, "LLM connect failed");
                return;
            }
        };

        let ctx = ToolCallContext {
            caller_phone: identity.caller_number.clone(),
            ident,
        };

        self.run_connected(
            &llm,
            &mut llm_events,
            &mut carrier_rx,
            &carrier_tx,
            &start.stream_sid,
            &identity,
            ctx,
            instructions,
            transcript.as_ref(),
        )
        .await;

        let duration = (chrono::Utc::now() - identity.started_at)
            .num_seconds()
            .max(0) as u64;
        if let Some(r) = transcript.as_ref() {
            self.transcripts.end_call(r, duration).await;
        }
        llm.disconnect();
        info!(call_sid = %identity.call_sid, duration_seconds = duration, "call finished");
    }

    /// Session setup and the duplex loop, once both sockets exist.
    #[allow(clippy::too_many_arguments)]
    async fn run_connected(
        &self,
        llm: &LlmSession,
        llm_events: &mut mpsc::Receiver<LlmEvent>,
        carrier_rx: &mut mpsc::Receiver<CarrierEvent>,
        carrier_tx: &mpsc::Sender<CarrierCommand>,
        stream_sid: &str,
        identity: &CallIdentity,
        ctx: ToolCallContext,
        instructions: String,
        transcript: Option<&TranscriptRef>,
    ) {
        let mut phase = CallPhase::Connecting;
        let mut arbiter = TurnArbiter::new();

        let config = build_session_config(&self.options, instructions, tool_schemas());
        if llm.update_session(config).await.is_err() {
            error!(call_sid = %identity.call_sid, "LLM session vanished during setup");
            return;
        }

        match wait_session_ready(llm_events).await {
            SetupResult::Acknowledged => {
                debug!(call_sid = %identity.call_sid, "LLM session config acknowledged")
            }
            SetupResult::TimedOut => {
                warn!(call_sid = %identity.call_sid, "no session ack in time, proceeding")
            }
            SetupResult::Failed => {
                error!(call_sid = %identity.call_sid, "LLM session failed during setup");
                return;
            }
        }
        let initialized = true;

        // Let the carrier's media path settle so the greeting opening is
        // not clipped, then drop whatever caller audio queued up while we
        // were not ready to forward it.
        tokio::time::sleep(GREETING_SETTLE).await;
        loop {
            match carrier_rx.try_recv() {
                Ok(CarrierEvent::Media { .. }) => continue,
                Ok(CarrierEvent::Stop) => {
                    debug!(call_sid = %identity.call_sid, "carrier stopped during setup");
                    return;
                }
                Ok(_) => continue,
                Err(_) => break,
            }
        }

        if llm.create_response().await.is_err() {
            return;
        }
        phase = transition(phase, CallPhase::Greeting, identity);

        let (tool_tx, mut tool_rx) = mpsc::channel::<CompletedTool>(8);

        loop {
            let cooldown = arbiter.cooldown_deadline();
            // Biased polling order: an elapsed cooldown opens the gate
            // before any queued frame is judged, and carrier frames are
            // consumed before LLM events so gating decisions see playback
            // acks first.
            tokio::select! {
                biased;

                _ = async { tokio::time::sleep_until(cooldown.unwrap()).await }, if cooldown.is_some() => {
                    arbiter.on_cooldown_elapsed();
                }

                event = carrier_rx.recv() => {
                    match event {
                        Some(CarrierEvent::Media { media }) => {
                            if initialized && !arbiter.gate_caller_audio() {
                                if llm.send_audio(media.payload).await.is_err() {
                                    break;
                                }
                            }
                        }
                        Some(CarrierEvent::Mark { mark }) => {
                            if mark.name == PLAYBACK_COMPLETE_MARK {
                                arbiter.on_playback_mark(Instant::now());
                            } else {
                                debug!(name = %mark.name, "unexpected mark ack");
                            }
                        }
                        Some(CarrierEvent::Stop) | None => {
                            break;
                        }
                        Some(_) => {}
                    }
                }

                event = llm_events.recv() => {
                    let Some(event) = event else { break };
                    match event {
                        LlmEvent::AudioDelta { delta } => {
                            arbiter.on_assistant_audio();
                            if carrier_tx
                                .send(CarrierCommand::media(stream_sid, delta))
                                .await
                                .is_err()
                            {
                                break;
                            }
                        }
                        LlmEvent::AudioDone => {
                            // The cooldown arms on the carrier's ack, not
                            // here: generation finishing is not playback
                            // finishing.
                            if carrier_tx
                                .send(CarrierCommand::playback_mark(stream_sid))
                                .await
                                .is_err()
                            {
                                break;
                            }
                        }
                        LlmEvent::ResponseCreated => {
                            arbiter.on_response_created();
                            phase = transition(phase, CallPhase::Responding, identity);
                        }
                        LlmEvent::ResponseDone => {
                            arbiter.on_response_done();
                            if phase != CallPhase::InTool {
                                phase = transition(phase, CallPhase::Listening, identity);
                            }
                        }
                        LlmEvent::SpeechStarted => {
                            if arbiter.on_speech_started() == BargeIn::CancelAssistant {
                                debug!(call_sid = %identity.call_sid, "barge-in, cancelling response");
                                if llm.cancel_response().await.is_err() {
                                    break;
                                }
                                if carrier_tx
                                    .send(CarrierCommand::clear(stream_sid))
                                    .await
                                    .is_err()
                                {
                                    break;
                                }
                            }
                        }
                        LlmEvent::SpeechStopped => {}
                        LlmEvent::TranscriptionCompleted { transcript: text } => {
                            if let Some(r) = transcript {
                                self.transcripts.append_message(r, Speaker::Caller, &text).await;
                            }
                        }
                        LlmEvent::AudioTranscriptDone { transcript: text } => {
                            if let Some(r) = transcript {
                                self.transcripts
                                    .append_message(r, Speaker::Assistant, &text)
                                    .await;
                            }
                        }
                        LlmEvent::FunctionCallArgumentsDone { name, call_id, arguments } => {
                            phase = transition(phase, CallPhase::InTool, identity);
                            let dispatcher = Arc::clone(&self.dispatcher);
                            let ctx = ctx.clone();
                            let tx = tool_tx.clone();
                            tokio::spawn(async move {
                                let outcome = dispatcher.execute(&name, &arguments, &ctx).await;
                                // The call may be gone by now; the result
                                // is simply dropped then.
                                let _ = tx
                                    .send(CompletedTool { call_id, name, arguments, outcome })
                                    .await;
                            });
                        }
                        LlmEvent::Error { error } => {
                            if error.is_benign_cancel_race() {
                                debug!("cancel raced response completion, ignoring");
                            } else {
                                error!(
                                    code = error.code.as_deref().unwrap_or("-"),
                                    message = %error.message,
                                    "LLM error event"
                                );
                            }
                        }
                        LlmEvent::SessionCreated | LlmEvent::SessionUpdated => {}
                        LlmEvent::Unknown { kind, .. } => {
                            debug!(%kind, "unhandled LLM event kind");
                        }
                        LlmEvent::Closed => {
                            warn!(call_sid = %identity.call_sid, "LLM session closed mid-call");
                            break;
                        }
                    }
                }

                completed = tool_rx.recv() => {
                    let Some(completed) = completed else { break };
                    let result = render_tool_result(&completed, identity);
                    if let Some(r) = transcript {
                        self.transcripts
                            .append_tool_call(r, &completed.name, &completed.arguments, &result)
                            .await;
                    }
                    // Every tool call is answered exactly once, and the
                    // follow-up response request rides along.
                    if llm.send_tool_result(&completed.call_id, &result).await.is_err() {
                        break;
                    }
                    phase = transition(phase, CallPhase::Listening, identity);
                }
            }
        }

        transition(phase, CallPhase::Closing, identity);
    }
}

/// Identity and identification context from a `start` frame. A missing or
/// corrupt context parameter degrades to the lookup-failed context.
fn unpack_start(start: &StreamStart) -> (CallIdentity, IdentificationContext) {
    let call_sid = start
        .custom_parameters
        .get(PARAM_CALL_SID)
        .cloned()
        .unwrap_or_else(|| start.call_sid.clone());
    let caller_phone = start
        .custom_parameters
        .get(PARAM_CALLER_PHONE)
        .cloned()
        .unwrap_or_else(|| "unknown".to_string());

    let ident = match start.custom_parameters.get(PARAM_CUSTOMER_CONTEXT) {
        Some(encoded) => match decode_context(encoded) {
            Ok(ctx) => ctx,
            Err(e) => {
                warn!(error = %e, "invalid customer context parameter");
                IdentificationContext::lookup_failed()
            }
        },
        None => {
            warn!("customer context parameter missing");
            IdentificationContext::lookup_failed()
        }
    };

    (CallIdentity::new(call_sid, caller_phone), ident)
}

enum SetupResult {
    Acknowledged,
    TimedOut,
    Failed,
}

/// One-shot wait for the session-config acknowledgement, bounded by
/// [`SESSION_READY_TIMEOUT`]. A setup-phase LLM error aborts the call; a
/// timeout does not.
async fn wait_session_ready(llm_events: &mut mpsc::Receiver<LlmEvent>) -> SetupResult {
    let wait = async {
        loop {
            match llm_events.recv().await {
                Some(LlmEvent::SessionUpdated) => return SetupResult::Acknowledged,
                Some(LlmEvent::Error { error }) if !error.is_benign_cancel_race() => {
                    error!(message = %error.message, "LLM error during setup");
                    return SetupResult::Failed;
                }
                Some(LlmEvent::Closed) | None => return SetupResult::Failed,
                Some(_) => continue,
            }
        }
    };
    match tokio::time::timeout(SESSION_READY_TIMEOUT, wait).await {
        Ok(result) => result,
        Err(_) => SetupResult::TimedOut,
    }
}

/// Serialize a tool outcome into the string handed back to the LLM.
fn render_tool_result(completed: &CompletedTool, identity: &CallIdentity) -> String {
    match &completed.outcome {
        ToolOutcome::Text(text) => text.clone(),
        ToolOutcome::Structured {
            success,
            message,
            requires_handoff,
        } => json!({
            "success": success,
            "message": message,
            "requiresHandoff": requires_handoff,
        })
        .to_string(),
        ToolOutcome::Handoff {
            reason,
            summary,
            priority,
        } => {
            // Spoken-only handoff: the assistant voices the message. A
            // carrier-level transfer would be issued from here.
            info!(
                call_sid = %identity.call_sid,
                %reason,
                summary = summary.as_deref().unwrap_or("-"),
                priority = ?priority,
                "handoff requested"
            );
            json!({
                "success": true,
                "action": "handoff",
                "message": HANDOFF_MESSAGE,
            })
            .to_string()
        }
    }
}

fn transition(from: CallPhase, to: CallPhase, identity: &CallIdentity) -> CallPhase {
    if from != to {
        debug!(call_sid = %identity.call_sid, from = ?from, to = ?to, "phase");
    }
    to
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::OrderClient;
    use crate::llm::ClientEvent;
    use crate::tools::email::NoopEmailer;
    use crate::transcript::NoopSink;
    use tokio::sync::mpsc::error::TryRecvError;

    struct Harness {
        llm_cmds: mpsc::Receiver<ClientEvent>,
        llm_events: mpsc::Sender<LlmEvent>,
        carrier_in: mpsc::Sender<CarrierEvent>,
        carrier_out: mpsc::Receiver<CarrierCommand>,
        task: tokio::task::JoinHandle<()>,
    }

    fn media(payload: &str) -> CarrierEvent {
        CarrierEvent::parse(&format!(
            r#"{{"event":"media","media":{{"payload":"{payload}"}}}}"#
        ))
        .unwrap()
    }

    fn playback_ack() -> CarrierEvent {
        CarrierEvent::parse(&format!(
            r#"{{"event":"mark","mark":{{"name":"{PLAYBACK_COMPLETE_MARK}"}}}}"#
        ))
        .unwrap()
    }

    /// Spin up a connected session with channel-backed peers and run the
    /// greeting sequence to completion.
    async fn start_session() -> Harness {
        let (llm_cmd_tx, mut llm_cmds) = mpsc::channel(64);
        let (llm_event_tx, llm_events_rx) = mpsc::channel(64);
        let (carrier_in_tx, carrier_in_rx) = mpsc::channel(64);
        let (carrier_out_tx, carrier_out) = mpsc::channel(64);

        let orders = Arc::new(OrderClient::new("http://127.0.0.1:9", "id", "secret", "rt"));
        let dispatcher = Arc::new(ToolDispatcher::new(
            orders,
            Arc::new(NoopEmailer),
            "サンプルストア".to_string(),
        ));
        let session = CallSession::new(
            RealtimeOptions {
                api_key: "test".to_string(),
                model: "gpt-4o-realtime-preview".to_string(),
                voice: "alloy".to_string(),
            },
            dispatcher,
            Arc::new(NoopSink),
            "サンプルストア".to_string(),
        );

        let llm = LlmSession::from_parts(llm_cmd_tx);
        let mut llm_events_owned = llm_events_rx;
        let mut carrier_in_owned = carrier_in_rx;
        let identity = CallIdentity::new("CA1", "+815012345678");
        let ctx = ToolCallContext {
            caller_phone: identity.caller_number.clone(),
            ident: IdentificationContext::unknown(),
        };
        let events_for_ready = llm_event_tx.clone();
        let task = tokio::spawn(async move {
            session
                .run_connected(
                    &llm,
                    &mut llm_events_owned,
                    &mut carrier_in_owned,
                    &carrier_out_tx,
                    "MZ1",
                    &identity,
                    ctx,
                    "test instructions".to_string(),
                    None,
                )
                .await;
        });

        // Session setup: expect the config, acknowledge it.
        match llm_cmds.recv().await.unwrap() {
            ClientEvent::SessionUpdate { session } => {
                assert_eq!(session.tool_choice.as_deref(), Some("auto"));
            }
            other => panic!("expected session update, got {other:?}"),
        }
        events_for_ready.send(LlmEvent::SessionUpdated).await.unwrap();

        // Greeting: the settle delay elapses (paused clock), then the
        // first response is requested.
        assert!(matches!(
            llm_cmds.recv().await.unwrap(),
            ClientEvent::ResponseCreate
        ));

        Harness {
            llm_cmds,
            llm_events: llm_event_tx,
            carrier_in: carrier_in_tx,
            carrier_out,
            task,
        }
    }

    #[tokio::test(start_paused = true)]
    async fn greeting_follows_setup_and_stop_ends_the_call() {
        let mut h = start_session().await;
        h.carrier_in
            .send(CarrierEvent::parse(r#"{"event":"stop"}"#).unwrap())
            .await
            .unwrap();
        h.task.await.unwrap();
        assert!(matches!(h.llm_cmds.try_recv(), Err(TryRecvError::Disconnected)));
    }

    #[tokio::test(start_paused = true)]
    async fn barge_in_cancels_and_clears_exactly_once() {
        let mut h = start_session().await;

        h.llm_events.send(LlmEvent::ResponseCreated).await.unwrap();
        h.llm_events.send(LlmEvent::SpeechStarted).await.unwrap();

        assert!(matches!(
            h.llm_cmds.recv().await.unwrap(),
            ClientEvent::ResponseCancel
        ));
        assert!(matches!(
            h.carrier_out.recv().await.unwrap(),
            CarrierCommand::Clear { .. }
        ));

        // Idle speech produces no cancel: the next outbound LLM event
        // after speech-start must be the audio forward, not a cancel.
        h.llm_events.send(LlmEvent::ResponseDone).await.unwrap();
        h.llm_events.send(LlmEvent::SpeechStarted).await.unwrap();
        h.carrier_in.send(media("AAAA")).await.unwrap();
        match h.llm_cmds.recv().await.unwrap() {
            ClientEvent::InputAudioBufferAppend { audio } => assert_eq!(audio, "AAAA"),
            other => panic!("expected audio append, got {other:?}"),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn playback_ack_gates_caller_audio_for_the_cooldown_window() {
        let mut h = start_session().await;

        // Assistant audio flows out, then generation finishes: the bridge
        // emits the playback marker but does not gate yet.
        h.llm_events
            .send(LlmEvent::AudioDelta { delta: "QQQQ".to_string() })
            .await
            .unwrap();
        match h.carrier_out.recv().await.unwrap() {
            CarrierCommand::Media { media, .. } => assert_eq!(media.payload, "QQQQ"),
            other => panic!("expected media, got {other:?}"),
        }
        h.llm_events.send(LlmEvent::AudioDone).await.unwrap();
        match h.carrier_out.recv().await.unwrap() {
            CarrierCommand::Mark { mark, .. } => assert_eq!(mark.name, PLAYBACK_COMPLETE_MARK),
            other => panic!("expected mark, got {other:?}"),
        }

        // The carrier acks playback: the next caller frame is inside the
        // cooldown window and must be dropped.
        h.carrier_in.send(playback_ack()).await.unwrap();
        h.carrier_in.send(media("DROPPED")).await.unwrap();

        // After the window, audio flows again; only the late frame
        // reaches the LLM.
        tokio::time::sleep(Duration::from_millis(500)).await;
        h.carrier_in.send(media("KEPT")).await.unwrap();
        match h.llm_cmds.recv().await.unwrap() {
            ClientEvent::InputAudioBufferAppend { audio } => assert_eq!(audio, "KEPT"),
            other => panic!("expected audio append, got {other:?}"),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn assistant_audio_preempts_an_armed_cooldown() {
        let mut h = start_session().await;

        h.carrier_in.send(playback_ack()).await.unwrap();
        // A fresh delta means we are not in the playback tail: the gate
        // must open immediately, with no timer wait.
        h.llm_events
            .send(LlmEvent::AudioDelta { delta: "QQQQ".to_string() })
            .await
            .unwrap();
        assert!(matches!(
            h.carrier_out.recv().await.unwrap(),
            CarrierCommand::Media { .. }
        ));

        h.carrier_in.send(media("AAAA")).await.unwrap();
        match h.llm_cmds.recv().await.unwrap() {
            ClientEvent::InputAudioBufferAppend { audio } => assert_eq!(audio, "AAAA"),
            other => panic!("expected audio append, got {other:?}"),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn tool_call_is_answered_once_then_a_response_follows() {
        let mut h = start_session().await;

        h.llm_events
            .send(LlmEvent::FunctionCallArgumentsDone {
                name: "transfer_to_human".to_string(),
                call_id: "call_9".to_string(),
                arguments: r#"{"reason":"payment trouble"}"#.to_string(),
            })
            .await
            .unwrap();

        match h.llm_cmds.recv().await.unwrap() {
            ClientEvent::ConversationItemCreate { item } => {
                assert_eq!(item.call_id.as_deref(), Some("call_9"));
                let output = item.output.unwrap();
                assert!(output.contains("handoff"));
                assert!(output.contains("担当者"));
            }
            other => panic!("expected tool result item, got {other:?}"),
        }
        assert!(matches!(
            h.llm_cmds.recv().await.unwrap(),
            ClientEvent::ResponseCreate
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn llm_close_ends_the_call() {
        let mut h = start_session().await;
        h.llm_events.send(LlmEvent::Closed).await.unwrap();
        h.task.await.unwrap();
        assert!(h.carrier_out.recv().await.is_none());
    }
}

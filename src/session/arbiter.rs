//! Turn arbitration between the caller, the assistant, and the
//! assistant's own voice echoing back through the handset microphone.
//!
//! The arbiter is a plain state machine; the mediator owns the clock and
//! drives it from both event streams. The cooldown is represented as a
//! deadline the mediator selects on, so "at most one timer" holds by
//! construction: arming replaces the deadline, clearing removes it.

use std::time::Duration;

use tokio::time::Instant;

/// Quiet window after the carrier confirms playback finished, during
/// which inbound caller audio is assumed to be echoed tail audio.
pub const ECHO_COOLDOWN: Duration = Duration::from_millis(400);

/// Decision for a `speech_started` event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BargeIn {
    /// Assistant is mid-response: cancel it and flush carrier playback.
    CancelAssistant,
    /// Nothing to interrupt.
    Ignore,
}

#[derive(Debug)]
pub struct TurnArbiter {
    response_active: bool,
    echo_cooldown: bool,
    cooldown_deadline: Option<Instant>,
}

impl TurnArbiter {
    pub fn new() -> Self {
        Self {
            response_active: false,
            echo_cooldown: false,
            cooldown_deadline: None,
        }
    }

    /// The LLM started generating a response.
    pub fn on_response_created(&mut self) {
        self.response_active = true;
    }

    /// The LLM finished (or aborted) the response. Spurious `done`
    /// without a matching start is a benign no-op.
    pub fn on_response_done(&mut self) {
        self.response_active = false;
    }

    /// Caller speech detected. Barge-in applies only while a response is
    /// active; it is deliberately not gated by the echo cooldown, because
    /// the server-side VAD needs the continuous signal.
    pub fn on_speech_started(&mut self) -> BargeIn {
        if self.response_active {
            BargeIn::CancelAssistant
        } else {
            BargeIn::Ignore
        }
    }

    /// An assistant audio frame is going out: we are not in the playback
    /// tail, so any pending cooldown is wrong and is dropped.
    pub fn on_assistant_audio(&mut self) {
        self.echo_cooldown = false;
        self.cooldown_deadline = None;
    }

    /// The carrier acknowledged end of playback: arm the echo cooldown.
    /// A fresh mark replaces any previously armed deadline.
    pub fn on_playback_mark(&mut self, now: Instant) {
        self.echo_cooldown = true;
        self.cooldown_deadline = Some(now + ECHO_COOLDOWN);
    }

    /// The cooldown deadline elapsed; caller audio flows again.
    pub fn on_cooldown_elapsed(&mut self) {
        self.echo_cooldown = false;
        self.cooldown_deadline = None;
    }

    /// Whether inbound caller audio must be dropped instead of forwarded.
    /// Gating tracks the echo cooldown and nothing else.
    pub fn gate_caller_audio(&self) -> bool {
        self.echo_cooldown
    }

    pub fn response_active(&self) -> bool {
        self.response_active
    }

    /// Deadline for the mediator's cooldown select branch, if armed.
    pub fn cooldown_deadline(&self) -> Option<Instant> {
        self.cooldown_deadline
    }
}

impl Default for TurnArbiter {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn caller_audio_is_gated_only_during_cooldown() {
        let mut arbiter = TurnArbiter::new();
        assert!(!arbiter.gate_caller_audio());

        arbiter.on_playback_mark(Instant::now());
        assert!(arbiter.gate_caller_audio());

        arbiter.on_cooldown_elapsed();
        assert!(!arbiter.gate_caller_audio());
    }

    #[tokio::test(start_paused = true)]
    async fn mark_arms_exactly_one_cooldown_deadline() {
        let mut arbiter = TurnArbiter::new();
        let start = Instant::now();
        arbiter.on_playback_mark(start);
        assert_eq!(arbiter.cooldown_deadline(), Some(start + ECHO_COOLDOWN));

        // A second mark replaces the deadline rather than stacking.
        tokio::time::advance(Duration::from_millis(100)).await;
        let later = Instant::now();
        arbiter.on_playback_mark(later);
        assert_eq!(arbiter.cooldown_deadline(), Some(later + ECHO_COOLDOWN));
    }

    #[tokio::test(start_paused = true)]
    async fn assistant_audio_preempts_the_cooldown() {
        let mut arbiter = TurnArbiter::new();
        arbiter.on_playback_mark(Instant::now());
        assert!(arbiter.gate_caller_audio());

        arbiter.on_assistant_audio();
        assert!(!arbiter.gate_caller_audio());
        assert!(arbiter.cooldown_deadline().is_none());
    }

    #[test]
    fn barge_in_fires_only_while_a_response_is_active() {
        let mut arbiter = TurnArbiter::new();
        assert_eq!(arbiter.on_speech_started(), BargeIn::Ignore);

        arbiter.on_response_created();
        assert_eq!(arbiter.on_speech_started(), BargeIn::CancelAssistant);

        arbiter.on_response_done();
        assert_eq!(arbiter.on_speech_started(), BargeIn::Ignore);
    }

    #[test]
    fn spurious_response_done_is_a_no_op() {
        let mut arbiter = TurnArbiter::new();
        arbiter.on_response_done();
        assert!(!arbiter.response_active());
        assert_eq!(arbiter.on_speech_started(), BargeIn::Ignore);
    }

    #[tokio::test(start_paused = true)]
    async fn barge_in_is_not_gated_by_the_cooldown() {
        let mut arbiter = TurnArbiter::new();
        arbiter.on_response_created();
        arbiter.on_playback_mark(Instant::now());
        // Even inside the cooldown window, speech cancels the response.
        assert_eq!(arbiter.on_speech_started(), BargeIn::CancelAssistant);
    }
}

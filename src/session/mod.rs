//! Per-call session machinery: identity/context plumbing, the prompt
//! composer, the turn arbiter, and the mediator that owns the call.

pub mod arbiter;
pub mod context;
pub mod mediator;
pub mod prompt;

pub use arbiter::{BargeIn, TurnArbiter, ECHO_COOLDOWN};
pub use context::{
    decode_context, encode_context, CallIdentity, ContextError, PARAM_CALLER_PHONE,
    PARAM_CALL_SID, PARAM_CUSTOMER_CONTEXT,
};
pub use mediator::CallSession;

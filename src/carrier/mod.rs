//! Telephony carrier protocol: media-stream frames and response XML.

pub mod messages;
pub mod twiml;

pub use messages::{
    CarrierCommand, CarrierEvent, MediaFrame, StreamStart, PLAYBACK_COMPLETE_MARK,
};

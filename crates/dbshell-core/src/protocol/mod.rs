//! Protocol module containing the event types, request ids and the envelope codec.

pub mod codec;
pub mod messages;
pub mod sequence;

pub use codec::{decode_event, encode_event, ProtocolError};
pub use messages::*;
pub use sequence::{RequestSequence, UNCORRELATED};

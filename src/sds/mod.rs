//! Storage network (SDS) side of the relay.
//!
//! # Data Flow
//! ```text
//! SP websocket (topic "broadcast")
//!     → websocket.rs (dial with topic header)
//!     → messages.rs (RelayFrame → UnsignedMsgs → UnsignedMessage)
//!     → relay::broadcaster
//! ```

pub mod messages;
pub mod websocket;

pub use messages::{decode_frame, DecodeError, SignatureKey, UnsignedMessage};

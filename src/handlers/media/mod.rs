//! Telephony media-stream socket: framing types and the bridging handler.

pub mod handler;
pub mod messages;

pub use handler::media_socket;

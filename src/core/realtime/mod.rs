//! Realtime speech-to-speech session management.
//!
//! Negotiates an ephemeral credential with the speech provider, opens the
//! duplex session socket, and exposes the session as a command handle plus an
//! event stream. The reader/writer run on their own task; nothing here blocks
//! another call's progress.

pub mod base;
pub mod openai;

pub use base::{
    RealtimeError, RealtimeResult, RealtimeSessionConfig, SessionEvent, SessionHandle,
    SessionToolDefinition,
};
pub use openai::client::{connect, connect_with_retry};

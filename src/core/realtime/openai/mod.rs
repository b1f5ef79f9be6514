//! OpenAI Realtime API session client.
//!
//! Setup is two-phase: a one-shot REST call mints an ephemeral client secret
//! scoped to the session configuration, then the persistent session socket is
//! opened with that secret. Both phases run inside one bounded timeout.

pub mod client;
pub mod config;
pub mod messages;

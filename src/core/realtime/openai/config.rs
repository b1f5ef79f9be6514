//! Endpoint constants and defaults for the OpenAI Realtime API.

/// Path of the ephemeral-credential negotiation endpoint, relative to the
/// REST base.
pub const SESSIONS_PATH: &str = "/realtime/sessions";

/// Path of the session socket, relative to the WebSocket base.
pub const REALTIME_PATH: &str = "/realtime";

/// Beta header required by the Realtime API.
pub const BETA_HEADER: (&str, &str) = ("OpenAI-Beta", "realtime=v1");

/// Default realtime model.
pub const DEFAULT_MODEL: &str = "gpt-4o-realtime-preview";

/// Default voice.
pub const DEFAULT_VOICE: &str = "alloy";

/// Voices the provider currently accepts.
pub const SUPPORTED_VOICES: &[&str] = &[
    "alloy", "ash", "ballad", "coral", "echo", "sage", "shimmer", "verse",
];

/// Fall back to the default when an unknown voice is configured.
pub fn normalize_voice(voice: &str) -> &str {
    if SUPPORTED_VOICES.iter().any(|v| v.eq_ignore_ascii_case(voice)) {
        voice
    } else {
        DEFAULT_VOICE
    }
}

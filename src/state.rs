//! Shared application state accessible from all handlers.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Instant, SystemTime};

use dashmap::DashMap;

use crate::config::ServerConfig;
use crate::telephony::CallState;
use crate::tools::ToolRegistry;

/// Diagnostic snapshot of an active call, kept in the registry.
///
/// The owning media handler holds the authoritative `CallSession`; the
/// registry only mirrors enough for drain accounting and introspection.
#[derive(Debug, Clone)]
pub struct CallSnapshot {
    pub call_sid: Option<String>,
    pub state: CallState,
    pub started_at: SystemTime,
}

/// Registry of active calls, keyed by session id.
#[derive(Debug, Default)]
pub struct CallRegistry {
    calls: DashMap<String, CallSnapshot>,
}

impl CallRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, session_id: &str, snapshot: CallSnapshot) {
        self.calls.insert(session_id.to_string(), snapshot);
    }

    pub fn update(&self, session_id: &str, call_sid: Option<String>, state: CallState) {
        if let Some(mut entry) = self.calls.get_mut(session_id) {
            if call_sid.is_some() {
                entry.call_sid = call_sid;
            }
            entry.state = state;
        }
    }

    pub fn remove(&self, session_id: &str) {
        self.calls.remove(session_id);
    }

    pub fn active_count(&self) -> usize {
        self.calls.len()
    }

    pub fn snapshot(&self, session_id: &str) -> Option<CallSnapshot> {
        self.calls.get(session_id).map(|e| e.clone())
    }
}

/// Process-wide state: immutable configuration, the tool dispatch table, the
/// call registry, and the drain flag.
pub struct AppState {
    pub config: ServerConfig,
    pub tools: Arc<ToolRegistry>,
    pub calls: CallRegistry,
    pub started_at: Instant,
    draining: AtomicBool,
}

impl AppState {
    pub fn new(config: ServerConfig, tools: Arc<ToolRegistry>) -> Arc<Self> {
        Arc::new(Self {
            config,
            tools,
            calls: CallRegistry::new(),
            started_at: Instant::now(),
            draining: AtomicBool::new(false),
        })
    }

    /// Uptime in whole seconds.
    pub fn uptime_secs(&self) -> u64 {
        self.started_at.elapsed().as_secs()
    }

    /// Once draining, new calls are refused while in-flight calls finish.
    pub fn begin_drain(&self) {
        self.draining.store(true, Ordering::SeqCst);
    }

    pub fn is_draining(&self) -> bool {
        self.draining.load(Ordering::SeqCst)
    }

    /// Whether the `/answer` webhook should accept a new call right now.
    pub fn accepting_calls(&self) -> bool {
        self.config.is_voice_enabled() && !self.is_draining()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tools::ToolRegistry;

    fn state_with_voice(enabled: bool) -> Arc<AppState> {
        let config = ServerConfig {
            voice_enabled: Some(enabled),
            ..ServerConfig::default()
        };
        AppState::new(config, Arc::new(ToolRegistry::new()))
    }

    #[test]
    fn drain_refuses_new_calls() {
        let state = state_with_voice(true);
        assert!(state.accepting_calls());
        state.begin_drain();
        assert!(!state.accepting_calls());
    }

    #[test]
    fn disabled_voice_refuses_new_calls() {
        let state = state_with_voice(false);
        assert!(!state.accepting_calls());
    }

    #[test]
    fn registry_tracks_call_lifecycle() {
        let registry = CallRegistry::new();
        registry.insert(
            "cs1",
            CallSnapshot {
                call_sid: None,
                state: CallState::Ringing,
                started_at: SystemTime::now(),
            },
        );
        assert_eq!(registry.active_count(), 1);

        registry.update("cs1", Some("CA123".into()), CallState::Bridging);
        let snap = registry.snapshot("cs1").unwrap();
        assert_eq!(snap.call_sid.as_deref(), Some("CA123"));
        assert_eq!(snap.state, CallState::Bridging);

        registry.remove("cs1");
        assert_eq!(registry.active_count(), 0);
    }
}

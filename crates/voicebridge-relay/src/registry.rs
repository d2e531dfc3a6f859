//! Process-wide session registry — the exclusive owner of all sessions.
//!
//! The registry lock is held only for map operations; per-session work
//! happens under the individual session's lock after the registry lock is
//! released, so the two lock levels can never invert.

use std::collections::HashMap;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tracing::info;

use voicebridge_core::config::Config;
use voicebridge_core::session::{LegRole, Session, SessionId, VoiceConfig};

/// Full up-front session configuration, the dual-outbound entry point.
/// Empty strings mean "use caller-side default".
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewSessionRequest {
    #[serde(default)]
    pub source_language: String,
    #[serde(default)]
    pub target_language: String,
    #[serde(default)]
    pub source_voice_provider: String,
    #[serde(default)]
    pub source_voice_name: String,
    #[serde(default)]
    pub target_voice_provider: String,
    #[serde(default)]
    pub target_voice_name: String,
}

pub struct SessionRegistry {
    sessions: Mutex<HashMap<SessionId, Arc<Mutex<Session>>>>,
}

impl Default for SessionRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self {
            sessions: Mutex::new(HashMap::new()),
        }
    }

    /// Create a fully-configured session and return its id.
    pub async fn create(&self, config: &Config, request: NewSessionRequest) -> SessionId {
        let id = SessionId::generate();

        let source_language = non_empty_or(request.source_language, || {
            config.default_source_language()
        });
        let target_language = non_empty_or(request.target_language, || {
            config.default_target_language()
        });

        let mut session = Session::new(id.clone(), source_language, target_language);
        session.set_voice(
            LegRole::Source,
            VoiceConfig {
                provider: request.source_voice_provider,
                voice: request.source_voice_name,
            },
        );
        session.set_voice(
            LegRole::Target,
            VoiceConfig {
                provider: request.target_voice_provider,
                voice: request.target_voice_name,
            },
        );

        let mut sessions = self.sessions.lock().await;
        sessions.insert(id.clone(), Arc::new(Mutex::new(session)));
        info!(session_id = %id, "Session created");
        id
    }

    /// Look up a session, creating one with default languages if absent
    /// (the attach-on-first-contact entry point).
    pub async fn get_or_create(&self, config: &Config, id: &SessionId) -> Arc<Mutex<Session>> {
        let mut sessions = self.sessions.lock().await;
        sessions
            .entry(id.clone())
            .or_insert_with(|| {
                info!(session_id = %id, "Session created on first contact");
                Arc::new(Mutex::new(Session::new(
                    id.clone(),
                    config.default_source_language(),
                    config.default_target_language(),
                )))
            })
            .clone()
    }

    pub async fn get(&self, id: &SessionId) -> Option<Arc<Mutex<Session>>> {
        self.sessions.lock().await.get(id).cloned()
    }

    /// Permanently remove a session. Only the teardown coordinator calls
    /// this; identifiers are never reused.
    pub async fn remove(&self, id: &SessionId) -> Option<Arc<Mutex<Session>>> {
        self.sessions.lock().await.remove(id)
    }

    pub async fn len(&self) -> usize {
        self.sessions.lock().await.len()
    }
}

fn non_empty_or(value: String, default: impl FnOnce() -> String) -> String {
    if value.is_empty() { default() } else { value }
}

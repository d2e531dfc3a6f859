//! Teardown coordinator — drains and closes both legs together.
//!
//! Safe to invoke concurrently from either leg's task: the `Draining`
//! transition inside the session lock makes every later call a no-op, so
//! the pair is closed and removed from the registry exactly once.

use std::sync::Arc;

use tracing::{debug, info};

use voicebridge_core::protocol::OutboundEvent;
use voicebridge_core::session::SessionId;

use crate::state::RelayState;

/// Tear down a whole session: best-effort `sessionEnd` to both legs, close
/// both handles, remove the session from the registry.
pub async fn teardown_session(state: &Arc<RelayState>, session_id: &SessionId, reason: &str) {
    let Some(session) = state.registry.get(session_id).await else {
        return;
    };

    let channels = {
        let mut session = session.lock().await;
        if !session.begin_teardown() {
            return;
        }
        session.take_channels()
    };

    info!(session_id = %session_id, reason, "Tearing down session");

    let end = OutboundEvent::SessionEnd {
        reason: reason.to_string(),
    };
    let (source, target) = channels;
    for channel in [source, target].into_iter().flatten() {
        // Notification and close are both best-effort and independent;
        // teardown always completes.
        if !channel.send(end.clone()) {
            debug!(session_id = %session_id, "sessionEnd undeliverable, leg writer already gone");
        }
        channel.close();
    }

    state.registry.remove(session_id).await;
    session.lock().await.complete_teardown();
    info!(session_id = %session_id, "Session closed");
}

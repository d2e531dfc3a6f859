//! Per-leg relay dispatcher — the event loop behind each leg's WebSocket.
//!
//! Classifies inbound events, drives the translation pipeline for
//! utterances, and escalates terminal conditions to the teardown
//! coordinator. Each leg runs its own task; the two tasks of a session
//! share only the session entity, under its lock, and never hold that
//! lock across an await.

use std::sync::Arc;

use axum::extract::ws::{Message, WebSocket};
use futures::{SinkExt, StreamExt};
use tokio::sync::{mpsc, Mutex};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use voicebridge_core::protocol::{InboundEvent, OutboundEvent};
use voicebridge_core::session::{AttachOutcome, LegChannel, LegRole, LifecycleState, Session, SessionId};

use crate::readiness;
use crate::state::RelayState;
use crate::teardown;

/// Soft `error {}` events tolerated on a leg before escalating to teardown.
const SOFT_ERROR_LIMIT: u32 = 2;

/// Handle one leg's WebSocket from attach to teardown.
pub async fn handle_leg_connection(
    state: Arc<RelayState>,
    ws: WebSocket,
    role: LegRole,
    session_id: SessionId,
) {
    info!(session_id = %session_id, role = role.as_str(), "Leg connected");

    let (mut ws_tx, mut ws_rx) = ws.split();
    let (event_tx, mut event_rx) = mpsc::unbounded_channel::<OutboundEvent>();
    let cancel = CancellationToken::new();

    // Writer task: the only owner of the socket sink. Stops when the
    // channel handle is closed (teardown or handle replacement).
    let writer_cancel = cancel.clone();
    let writer = tokio::spawn(async move {
        loop {
            tokio::select! {
                _ = writer_cancel.cancelled() => {
                    let _ = ws_tx.send(Message::Close(None)).await;
                    break;
                }
                event = event_rx.recv() => {
                    let Some(event) = event else { break };
                    let Ok(msg) = serde_json::to_string(&event) else { continue };
                    if ws_tx.send(Message::Text(msg.into())).await.is_err() {
                        break;
                    }
                }
            }
        }
    });

    let session = state.registry.get_or_create(&state.config, &session_id).await;
    let channel = LegChannel::new(event_tx, cancel.clone());
    let outcome = readiness::attach_leg(&state, &session, role, channel).await;

    if outcome == AttachOutcome::Rejected {
        warn!(session_id = %session_id, role = role.as_str(), "Attach refused, session already draining");
        cancel.cancel();
        let _ = writer.await;
        return;
    }

    let mut soft_errors = 0u32;
    let mut escalation: Option<String> = None;

    while let Some(msg_result) = ws_rx.next().await {
        match msg_result {
            Ok(Message::Text(text)) => {
                let event = match serde_json::from_str::<InboundEvent>(&text) {
                    Ok(event) => event,
                    Err(e) => {
                        debug!(%e, "Undecodable frame, ignoring");
                        continue;
                    }
                };
                if let Some(reason) =
                    handle_event(&state, &session, role, event, &mut soft_errors).await
                {
                    escalation = Some(reason);
                    break;
                }
            }
            Ok(Message::Close(_)) => {
                debug!(session_id = %session_id, role = role.as_str(), "Leg requested close");
                break;
            }
            Err(e) => {
                warn!(session_id = %session_id, role = role.as_str(), %e, "Leg transport error");
                break;
            }
            _ => {}
        }
    }

    // A cancelled token with no escalation means this handle was closed on
    // purpose (teardown, or replaced by a re-attach); tearing the session
    // down here would kill the replacement leg.
    if escalation.is_some() || !cancel.is_cancelled() {
        let reason =
            escalation.unwrap_or_else(|| format!("{} leg disconnected", role.as_str()));
        teardown::teardown_session(&state, &session_id, &reason).await;
    }

    cancel.cancel();
    let _ = writer.await;
    info!(session_id = %session_id, role = role.as_str(), "Leg closed");
}

/// Classify and handle one inbound event. Returns a teardown reason when
/// the event escalates to a terminal condition.
async fn handle_event(
    state: &Arc<RelayState>,
    session: &Arc<Mutex<Session>>,
    role: LegRole,
    event: InboundEvent,
    soft_errors: &mut u32,
) -> Option<String> {
    match event {
        InboundEvent::Setup { leg_id } => {
            let accepted = session.lock().await.set_leg_id(role, leg_id.clone());
            if accepted {
                info!(role = role.as_str(), leg_id, "Leg identified");
            } else {
                warn!(role = role.as_str(), leg_id, "Setup repeated with a different leg id, keeping the first");
            }
            None
        }
        InboundEvent::Utterance { text } => {
            relay_utterance(state, session, role, text).await;
            None
        }
        InboundEvent::Status { name, value } => {
            debug!(role = role.as_str(), name, value, "Leg status");
            None
        }
        InboundEvent::Interruption {} => {
            // No mid-stream cancellation is defined; in-flight fragments
            // keep flowing.
            info!(role = role.as_str(), "Speaker interruption");
            None
        }
        InboundEvent::Error {} => {
            *soft_errors += 1;
            if *soft_errors >= SOFT_ERROR_LIMIT {
                warn!(role = role.as_str(), count = *soft_errors, "Repeated leg errors, escalating");
                Some(format!("repeated errors on {} leg", role.as_str()))
            } else {
                warn!(role = role.as_str(), "Leg reported an error");
                None
            }
        }
        InboundEvent::Unknown => {
            debug!(role = role.as_str(), "Unrecognized event kind, ignoring");
            None
        }
    }
}

/// Translate one utterance and stream the fragments to the counterpart.
async fn relay_utterance(
    state: &Arc<RelayState>,
    session: &Arc<Mutex<Session>>,
    role: LegRole,
    text: String,
) {
    // Single critical section: readiness check plus handle snapshot. The
    // handles are cloned out so nothing is locked while translating.
    let (lifecycle, own, counterpart, source_lang, target_lang) = {
        let session = session.lock().await;
        (
            session.state(),
            session.channel(role),
            session.counterpart_channel(role),
            session.leg(role).language.clone(),
            session.leg(role.counterpart()).language.clone(),
        )
    };

    let counterpart = match counterpart {
        Some(counterpart) if lifecycle == LifecycleState::Active => counterpart,
        _ => {
            // A disconnected peer makes translation meaningless; the
            // utterance is dropped, never queued.
            warn!(role = role.as_str(), lifecycle = ?lifecycle, "Utterance with no reachable counterpart, dropped");
            if lifecycle == LifecycleState::AwaitingPeer {
                if let Some(own) = &own {
                    readiness::notify_waiting(state, own);
                }
            }
            return;
        }
    };

    let mut fragments = match state
        .translator
        .translate(&text, &source_lang, &target_lang)
        .await
    {
        Ok(fragments) => fragments,
        Err(e) => {
            // The session stays active; only this utterance is lost.
            warn!(role = role.as_str(), %e, "Translation failed, utterance dropped");
            return;
        }
    };

    // Hold cue to the originating leg: issued after the request, before
    // any fragment, and never blocks forwarding.
    if let Some(own) = &own {
        if !own.send(state.hold_audio()) {
            debug!(role = role.as_str(), "Hold cue undeliverable");
        }
    }

    let mut counterpart_gone = false;
    while let Some(item) = fragments.next().await {
        match item {
            Ok(fragment) => {
                if counterpart_gone {
                    // Drain and discard; the stream is finite.
                    continue;
                }
                let delivered = counterpart.send(OutboundEvent::TextFragment {
                    text: fragment.text,
                    is_final: fragment.is_final,
                });
                if !delivered {
                    warn!(role = role.as_str(), "Counterpart gone mid-utterance, discarding remaining fragments");
                    counterpart_gone = true;
                }
            }
            Err(e) => {
                warn!(role = role.as_str(), %e, "Translation stream failed mid-utterance");
                // The counterpart already saw partial fragments; close the
                // utterance so its synthesis side is not left waiting for
                // an end-of-utterance marker that never comes.
                if !counterpart_gone {
                    counterpart.send(OutboundEvent::final_fragment());
                }
                break;
            }
        }
    }
}

//! Readiness gate — pair-completeness evaluation and its notifications.
//!
//! A lone leg is never rejected: it hears waiting audio until its
//! counterpart attaches. The moment the pair completes, each leg gets a
//! one-time "ready" announcement localized into its own language.

use std::sync::Arc;

use tokio::sync::Mutex;
use tokio_stream::StreamExt;
use tracing::{debug, info, warn};

use voicebridge_core::protocol::OutboundEvent;
use voicebridge_core::session::{AttachOutcome, LegChannel, LegRole, Session};

use crate::state::RelayState;

/// Neutral-language announcement template, translated per leg.
const READY_TEMPLATE: &str =
    "You are connected. Live translation is active, you can start speaking now.";

/// Attach a leg's channel handle and run the gate. The attach itself is a
/// single critical section under the session lock; the side-effecting
/// notifications happen after the lock is released.
pub async fn attach_leg(
    state: &Arc<RelayState>,
    session: &Arc<Mutex<Session>>,
    role: LegRole,
    channel: LegChannel,
) -> AttachOutcome {
    let (outcome, announce, legs) = {
        let mut session = session.lock().await;
        let outcome = session.attach_channel(role, channel);
        let announce =
            outcome == AttachOutcome::NowActive && session.mark_ready_announced();
        let legs = [LegRole::Source, LegRole::Target].map(|r| {
            (
                session.channel(r),
                session.leg(r).language.clone(),
            )
        });
        (outcome, announce, legs)
    };

    match outcome {
        AttachOutcome::AwaitingPeer => {
            debug!(role = role.as_str(), "Leg attached, counterpart not yet present");
            if let (Some(own), _) = &legs[leg_index(role)] {
                notify_waiting(state, own);
            }
        }
        AttachOutcome::NowActive if announce => {
            info!("Both legs attached, session active");
            // Activation blocks on the announcements; they are short and
            // bounded by the translator's deadline.
            for (channel, language) in legs.into_iter() {
                if let Some(channel) = channel {
                    announce_ready(state, &channel, &language).await;
                }
            }
        }
        _ => {}
    }

    outcome
}

/// Side-channel waiting cue for a leg whose counterpart is absent.
pub fn notify_waiting(state: &Arc<RelayState>, channel: &LegChannel) {
    if !channel.send(state.waiting_audio()) {
        debug!("Waiting notification undeliverable, leg writer gone");
    }
}

/// Stream the localized ready announcement to one leg. Falls back to the
/// untranslated template when the translator fails; the call is not worth
/// losing over a cosmetic announcement.
async fn announce_ready(state: &Arc<RelayState>, channel: &LegChannel, language: &str) {
    // The template is already English; skip the upstream round-trip.
    if language.starts_with("en") {
        send_plain_announcement(channel);
        return;
    }

    match state.translator.translate(READY_TEMPLATE, "en-US", language).await {
        Ok(mut fragments) => {
            while let Some(item) = fragments.next().await {
                match item {
                    Ok(fragment) => {
                        if !channel.send(OutboundEvent::TextFragment {
                            text: fragment.text,
                            is_final: fragment.is_final,
                        }) {
                            return;
                        }
                    }
                    Err(e) => {
                        warn!(%e, language, "Ready announcement translation failed mid-stream");
                        channel.send(OutboundEvent::final_fragment());
                        return;
                    }
                }
            }
        }
        Err(e) => {
            warn!(%e, language, "Ready announcement translation failed, sending untranslated");
            send_plain_announcement(channel);
        }
    }
}

fn send_plain_announcement(channel: &LegChannel) {
    channel.send(OutboundEvent::TextFragment {
        text: READY_TEMPLATE.to_string(),
        is_final: false,
    });
    channel.send(OutboundEvent::final_fragment());
}

fn leg_index(role: LegRole) -> usize {
    match role {
        LegRole::Source => 0,
        LegRole::Target => 1,
    }
}

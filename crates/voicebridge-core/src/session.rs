//! Session model — the paired record joining a source leg and a target leg.
//!
//! A session owns at most one live outbound channel handle per leg. All
//! mutation happens under the per-session lock held by the registry entry;
//! every method here is a single read-then-write critical section.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::protocol::OutboundEvent;

/// Opaque session identifier, unique for the registry's lifetime.
#[derive(Debug, Clone, Hash, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionId(String);

impl SessionId {
    pub fn generate() -> Self {
        SessionId(Uuid::new_v4().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for SessionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<String> for SessionId {
    fn from(s: String) -> Self {
        SessionId(s)
    }
}

/// Which side of the paired conversation a leg is.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LegRole {
    Source,
    Target,
}

impl LegRole {
    pub fn counterpart(self) -> Self {
        match self {
            LegRole::Source => LegRole::Target,
            LegRole::Target => LegRole::Source,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            LegRole::Source => "source",
            LegRole::Target => "target",
        }
    }
}

impl std::str::FromStr for LegRole {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "source" => Ok(LegRole::Source),
            "target" => Ok(LegRole::Target),
            other => Err(format!("unknown leg role: {other}")),
        }
    }
}

/// TTS provider and voice name for one leg. Empty strings mean
/// "caller-side default".
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct VoiceConfig {
    pub provider: String,
    pub voice: String,
}

/// Session lifecycle.
///
/// `Pending` -> `AwaitingPeer` -> `Active` -> `Draining` -> `Closed`.
/// No transition leaves `Closed`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LifecycleState {
    Pending,
    AwaitingPeer,
    Active,
    Draining,
    Closed,
}

/// Outbound handle for one leg: an unbounded event sender feeding the leg's
/// writer task, plus a token that tears that task (and its socket) down.
#[derive(Debug, Clone)]
pub struct LegChannel {
    tx: mpsc::UnboundedSender<OutboundEvent>,
    cancel: CancellationToken,
}

impl LegChannel {
    pub fn new(tx: mpsc::UnboundedSender<OutboundEvent>, cancel: CancellationToken) -> Self {
        Self { tx, cancel }
    }

    /// Queue an event for the leg's writer task. Never blocks. Returns
    /// false if the writer is gone.
    pub fn send(&self, event: OutboundEvent) -> bool {
        self.tx.send(event).is_ok()
    }

    /// Stop the writer task and close the underlying socket.
    pub fn close(&self) {
        self.cancel.cancel();
    }

    pub fn is_closed(&self) -> bool {
        self.cancel.is_cancelled()
    }
}

/// Per-leg state inside a session.
#[derive(Debug, Default)]
pub struct LegState {
    /// External call identifier, set once by the leg's `setup` event.
    pub leg_id: Option<String>,
    /// Live outbound handle. At most one per leg at any instant.
    pub channel: Option<LegChannel>,
    /// BCP-47-style language tag, immutable after creation.
    pub language: String,
    pub voice: VoiceConfig,
}

/// Outcome of attaching a leg's channel handle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AttachOutcome {
    /// Both legs are now live; the session just became `Active`.
    NowActive,
    /// The counterpart is not attached yet.
    AwaitingPeer,
    /// The session is already draining or closed; the handle was not taken.
    Rejected,
}

/// One paired conversation.
#[derive(Debug)]
pub struct Session {
    id: SessionId,
    state: LifecycleState,
    pub created_at: DateTime<Utc>,
    source: LegState,
    target: LegState,
    ready_announced: bool,
}

impl Session {
    pub fn new(id: SessionId, source_language: String, target_language: String) -> Self {
        Self {
            id,
            state: LifecycleState::Pending,
            created_at: Utc::now(),
            source: LegState {
                language: source_language,
                ..Default::default()
            },
            target: LegState {
                language: target_language,
                ..Default::default()
            },
            ready_announced: false,
        }
    }

    pub fn id(&self) -> &SessionId {
        &self.id
    }

    pub fn state(&self) -> LifecycleState {
        self.state
    }

    pub fn leg(&self, role: LegRole) -> &LegState {
        match role {
            LegRole::Source => &self.source,
            LegRole::Target => &self.target,
        }
    }

    pub fn leg_mut(&mut self, role: LegRole) -> &mut LegState {
        match role {
            LegRole::Source => &mut self.source,
            LegRole::Target => &mut self.target,
        }
    }

    pub fn set_voice(&mut self, role: LegRole, voice: VoiceConfig) {
        self.leg_mut(role).voice = voice;
    }

    /// Record the leg's external identifier from its `setup` event.
    /// Immutable once set; a repeat with a different id is refused.
    pub fn set_leg_id(&mut self, role: LegRole, leg_id: String) -> bool {
        let leg = self.leg_mut(role);
        match &leg.leg_id {
            None => {
                leg.leg_id = Some(leg_id);
                true
            }
            Some(existing) => existing == &leg_id,
        }
    }

    /// Attach a live channel handle for `role`, closing any prior handle
    /// first so a stale duplex connection can never leak.
    pub fn attach_channel(&mut self, role: LegRole, channel: LegChannel) -> AttachOutcome {
        if matches!(self.state, LifecycleState::Draining | LifecycleState::Closed) {
            channel.close();
            return AttachOutcome::Rejected;
        }

        let leg = self.leg_mut(role);
        if let Some(old) = leg.channel.take() {
            old.close();
        }
        leg.channel = Some(channel);

        if self.leg(role.counterpart()).channel.is_some() {
            self.state = LifecycleState::Active;
            AttachOutcome::NowActive
        } else {
            self.state = LifecycleState::AwaitingPeer;
            AttachOutcome::AwaitingPeer
        }
    }

    /// True once both legs have live handles.
    pub fn is_ready(&self) -> bool {
        self.state == LifecycleState::Active
    }

    /// A snapshot of the counterpart's channel handle, if live. Cloned out
    /// so no lock is held while sending.
    pub fn counterpart_channel(&self, role: LegRole) -> Option<LegChannel> {
        self.leg(role.counterpart()).channel.clone()
    }

    pub fn channel(&self, role: LegRole) -> Option<LegChannel> {
        self.leg(role).channel.clone()
    }

    /// Latch for the one-time "ready" announcement. True exactly once,
    /// however many attach transitions re-evaluate readiness.
    pub fn mark_ready_announced(&mut self) -> bool {
        if self.ready_announced {
            false
        } else {
            self.ready_announced = true;
            true
        }
    }

    /// Enter `Draining`. Returns false if teardown already started, making
    /// the coordinator idempotent.
    pub fn begin_teardown(&mut self) -> bool {
        match self.state {
            LifecycleState::Draining | LifecycleState::Closed => false,
            _ => {
                self.state = LifecycleState::Draining;
                true
            }
        }
    }

    /// Take both channel handles out of the session for closing. Only
    /// meaningful while `Draining`.
    pub fn take_channels(&mut self) -> (Option<LegChannel>, Option<LegChannel>) {
        (self.source.channel.take(), self.target.channel.take())
    }

    /// Terminal transition; the registry removes the entry right after.
    pub fn complete_teardown(&mut self) {
        self.state = LifecycleState::Closed;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_channel() -> (LegChannel, mpsc::UnboundedReceiver<OutboundEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (LegChannel::new(tx, CancellationToken::new()), rx)
    }

    fn test_session() -> Session {
        Session::new(SessionId::generate(), "en-US".into(), "de-DE".into())
    }

    #[test]
    fn test_attach_first_leg_awaits_peer() {
        let mut session = test_session();
        let (ch, _rx) = test_channel();
        assert_eq!(
            session.attach_channel(LegRole::Source, ch),
            AttachOutcome::AwaitingPeer
        );
        assert_eq!(session.state(), LifecycleState::AwaitingPeer);
        assert!(!session.is_ready());
    }

    #[test]
    fn test_attach_both_legs_goes_active() {
        let mut session = test_session();
        let (a, _ra) = test_channel();
        let (b, _rb) = test_channel();
        session.attach_channel(LegRole::Source, a);
        assert_eq!(
            session.attach_channel(LegRole::Target, b),
            AttachOutcome::NowActive
        );
        assert!(session.is_ready());
    }

    #[test]
    fn test_reattach_closes_prior_handle() {
        let mut session = test_session();
        let (first, _r1) = test_channel();
        let (second, _r2) = test_channel();
        let first_probe = first.clone();
        session.attach_channel(LegRole::Source, first);
        session.attach_channel(LegRole::Source, second);

        // Single-live-handle invariant: the replaced handle is closed.
        assert!(first_probe.is_closed());
        assert!(!session.channel(LegRole::Source).unwrap().is_closed());
    }

    #[test]
    fn test_attach_rejected_while_draining() {
        let mut session = test_session();
        let (a, _ra) = test_channel();
        session.attach_channel(LegRole::Source, a);
        assert!(session.begin_teardown());

        let (late, _rl) = test_channel();
        let probe = late.clone();
        assert_eq!(
            session.attach_channel(LegRole::Target, late),
            AttachOutcome::Rejected
        );
        assert!(probe.is_closed());
    }

    #[test]
    fn test_teardown_is_idempotent() {
        let mut session = test_session();
        assert!(session.begin_teardown());
        assert!(!session.begin_teardown());
        session.complete_teardown();
        assert!(!session.begin_teardown());
        assert_eq!(session.state(), LifecycleState::Closed);
    }

    #[test]
    fn test_leg_id_immutable_once_set() {
        let mut session = test_session();
        assert!(session.set_leg_id(LegRole::Source, "CA1".into()));
        assert!(session.set_leg_id(LegRole::Source, "CA1".into()));
        assert!(!session.set_leg_id(LegRole::Source, "CA2".into()));
        assert_eq!(session.leg(LegRole::Source).leg_id.as_deref(), Some("CA1"));
    }

    #[test]
    fn test_language_tags_survive_unchanged() {
        let session = Session::new(SessionId::generate(), "en-US".into(), "ar-SA".into());
        assert_eq!(session.leg(LegRole::Source).language, "en-US");
        assert_eq!(session.leg(LegRole::Target).language, "ar-SA");
    }

    #[test]
    fn test_ready_announcement_latches_once() {
        let mut session = test_session();
        assert!(session.mark_ready_announced());
        assert!(!session.mark_ready_announced());
    }

    #[test]
    fn test_counterpart_roles() {
        assert_eq!(LegRole::Source.counterpart(), LegRole::Target);
        assert_eq!(LegRole::Target.counterpart(), LegRole::Source);
    }
}

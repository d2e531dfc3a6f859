//! VoiceBridge leg wire protocol.
//!
//! Each call leg is a JSON-over-WebSocket duplex channel. Inbound events
//! come from the telephony side (transcribed speech and signaling);
//! outbound events carry translated text fragments and side-channel audio
//! cues back to that leg for synthesis.

use serde::{Deserialize, Serialize};

/// Event received from a leg's transport.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum InboundEvent {
    /// First event on a freshly attached leg; carries its external call id.
    #[serde(rename_all = "camelCase")]
    Setup { leg_id: String },

    /// A finalized speech-to-text transcript of one spoken utterance.
    Utterance { text: String },

    /// Transport status report, logged only.
    Status { name: String, value: String },

    /// The speaker barged in over playback. Logged only; no in-flight
    /// translation is cancelled.
    Interruption {},

    /// Soft error report from the leg's own transport.
    Error {},

    /// Any event kind this version does not understand.
    #[serde(other)]
    Unknown,
}

/// Event sent to a leg's transport.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum OutboundEvent {
    /// One incremental unit of translated text. The fragment stream for an
    /// utterance ends with exactly one `is_final` fragment with empty text.
    #[serde(rename_all = "camelCase")]
    TextFragment { text: String, is_final: bool },

    /// Side-channel audio cue (hold music, waiting tone) played by the
    /// telephony side without interrupting synthesis.
    #[serde(rename_all = "camelCase")]
    SideChannelAudio {
        source: String,
        #[serde(rename = "loop")]
        loop_count: u32,
        preemptible: bool,
        interruptible: bool,
    },

    /// Terminal event; the leg's transport should hang up after this.
    SessionEnd { reason: String },
}

impl OutboundEvent {
    /// The terminal fragment closing an utterance's stream.
    pub fn final_fragment() -> Self {
        OutboundEvent::TextFragment {
            text: String::new(),
            is_final: true,
        }
    }
}

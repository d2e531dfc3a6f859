//! Relay shared state.

use std::sync::Arc;

use voicebridge_core::config::Config;
use voicebridge_core::protocol::OutboundEvent;
use voicebridge_translate::Translator;

use crate::registry::SessionRegistry;

/// Default side-channel audio, used when the config has no `audio` section.
const DEFAULT_AUDIO_SOURCE: &str =
    "https://com.twilio.sounds.music.s3.amazonaws.com/MARKOVICHAMP-Borghestral.mp3";

/// Shared relay state accessible from all leg connections and handlers.
pub struct RelayState {
    pub config: Arc<Config>,
    pub registry: SessionRegistry,
    pub translator: Arc<dyn Translator>,
}

impl RelayState {
    pub fn new(config: Arc<Config>, translator: Arc<dyn Translator>) -> Self {
        Self {
            config,
            registry: SessionRegistry::new(),
            translator,
        }
    }

    /// Looped audio cue for a lone leg waiting on its counterpart.
    pub fn waiting_audio(&self) -> OutboundEvent {
        let source = self
            .config
            .audio
            .as_ref()
            .and_then(|a| a.waiting_source.clone())
            .unwrap_or_else(|| DEFAULT_AUDIO_SOURCE.to_string());
        OutboundEvent::SideChannelAudio {
            source,
            loop_count: 0,
            preemptible: true,
            interruptible: true,
        }
    }

    /// One-shot audio cue played to the speaking leg while its utterance
    /// is being translated.
    pub fn hold_audio(&self) -> OutboundEvent {
        let source = self
            .config
            .audio
            .as_ref()
            .and_then(|a| a.hold_source.clone())
            .unwrap_or_else(|| DEFAULT_AUDIO_SOURCE.to_string());
        OutboundEvent::SideChannelAudio {
            source,
            loop_count: 1,
            preemptible: true,
            interruptible: true,
        }
    }
}

//! Translation service adapter.
//!
//! Wraps a streaming text-translation upstream behind the [`Translator`]
//! trait. A translation is a lazy, finite, non-restartable sequence of
//! [`Fragment`]s ending with exactly one final fragment with empty text.

use std::pin::Pin;

use async_trait::async_trait;
use futures::Stream;

use voicebridge_core::error::Result;

pub mod openai;
pub mod sse;

pub use openai::OpenAiTranslator;

/// An incremental unit of translated text.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Fragment {
    pub text: String,
    pub is_final: bool,
}

impl Fragment {
    pub fn text(text: impl Into<String>) -> Self {
        Fragment {
            text: text.into(),
            is_final: false,
        }
    }

    /// The terminal marker closing a translation stream.
    pub fn terminal() -> Self {
        Fragment {
            text: String::new(),
            is_final: true,
        }
    }
}

pub type FragmentStream = Pin<Box<dyn Stream<Item = Result<Fragment>> + Send>>;

/// A streaming text translator.
///
/// Fails with `UpstreamUnavailable` when the service cannot be reached
/// within its deadline and `UpstreamError` on a malformed or error
/// response; neither is swallowed here, the caller decides what to do.
#[async_trait]
pub trait Translator: Send + Sync {
    async fn translate(
        &self,
        text: &str,
        source_lang: &str,
        target_lang: &str,
    ) -> Result<FragmentStream>;
}

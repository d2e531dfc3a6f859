//! OpenAI-compatible streaming translator.
//!
//! Issues one streaming `/v1/chat/completions` call per utterance with a
//! fixed interpreter system prompt and maps the token deltas onto the
//! fragment contract: text fragments in generation order, then exactly one
//! terminal fragment.

use std::time::Duration;

use async_trait::async_trait;
use futures::Stream;
use serde::{Deserialize, Serialize};
use serde_json::json;
use tokio_stream::StreamExt;
use tracing::{debug, warn};

use voicebridge_core::config::TranslationConfig;
use voicebridge_core::error::{Result, VoiceBridgeError};

use crate::sse::data_stream;
use crate::{Fragment, FragmentStream, Translator};

const OPENAI_BASE_URL: &str = "https://api.openai.com";
const DEFAULT_MODEL: &str = "gpt-4o";
const DEFAULT_API_KEY_ENV: &str = "OPENAI_API_KEY";
const DEFAULT_TIMEOUT_SECS: u64 = 30;

pub struct OpenAiTranslator {
    base_url: String,
    model: String,
    api_key: String,
    request_timeout: Duration,
    client: reqwest::Client,
}

impl OpenAiTranslator {
    pub fn new(
        base_url: Option<&str>,
        model: Option<&str>,
        api_key: String,
        request_timeout: Duration,
    ) -> Self {
        Self {
            base_url: base_url
                .unwrap_or(OPENAI_BASE_URL)
                .trim_end_matches('/')
                .to_string(),
            model: model.unwrap_or(DEFAULT_MODEL).to_string(),
            api_key,
            request_timeout,
            // Client-level timeout bounds the whole call including the
            // streamed body, so no translation waits forever.
            client: reqwest::Client::builder()
                .timeout(request_timeout)
                .build()
                .unwrap_or_default(),
        }
    }

    pub fn from_config(config: Option<&TranslationConfig>) -> Self {
        let key_env = config
            .and_then(|c| c.api_key_env.as_deref())
            .unwrap_or(DEFAULT_API_KEY_ENV);
        let api_key = std::env::var(key_env).unwrap_or_default();
        if api_key.is_empty() {
            warn!(env = key_env, "Translation API key not set; translation calls will fail");
        }

        Self::new(
            config.and_then(|c| c.base_url.as_deref()),
            config.and_then(|c| c.model.as_deref()),
            api_key,
            Duration::from_secs(
                config
                    .and_then(|c| c.timeout_secs)
                    .unwrap_or(DEFAULT_TIMEOUT_SECS),
            ),
        )
    }
}

fn interpreter_prompt(source_lang: &str, target_lang: &str) -> String {
    format!(
        "You are a live call interpreter. Translate everything the user says \
         from {source_lang} to {target_lang}. Respond with the translation only, \
         no commentary."
    )
}

// --- Upstream request/response types ---

#[derive(Debug, Serialize)]
struct CompletionsRequest {
    model: String,
    messages: Vec<serde_json::Value>,
    stream: bool,
}

#[derive(Debug, Deserialize)]
struct CompletionsChunk {
    #[serde(default)]
    choices: Vec<ChunkChoice>,
}

#[derive(Debug, Deserialize)]
struct ChunkChoice {
    #[serde(default)]
    delta: ChunkDelta,
}

#[derive(Debug, Default, Deserialize)]
struct ChunkDelta {
    #[serde(default)]
    content: Option<String>,
}

/// Map SSE payloads onto the fragment contract. The `[DONE]` sentinel (or
/// body end) becomes the single terminal fragment; an undecodable payload
/// surfaces as `UpstreamError` and ends the stream.
fn fragment_stream(
    payloads: impl Stream<Item = Result<String>> + Send + 'static,
) -> impl Stream<Item = Result<Fragment>> + Send {
    struct State<S> {
        payloads: std::pin::Pin<Box<S>>,
        finished: bool,
    }

    futures::stream::unfold(
        State {
            payloads: Box::pin(payloads),
            finished: false,
        },
        |mut state| async move {
            loop {
                if state.finished {
                    return None;
                }

                match state.payloads.next().await {
                    Some(Ok(payload)) => {
                        let data = payload.trim();
                        if data == "[DONE]" {
                            state.finished = true;
                            return Some((Ok(Fragment::terminal()), state));
                        }

                        let chunk: CompletionsChunk = match serde_json::from_str(data) {
                            Ok(c) => c,
                            Err(e) => {
                                state.finished = true;
                                return Some((
                                    Err(VoiceBridgeError::UpstreamError(format!(
                                        "undecodable chunk: {e}"
                                    ))),
                                    state,
                                ));
                            }
                        };

                        match chunk.choices.first().and_then(|c| c.delta.content.clone()) {
                            Some(content) if !content.is_empty() => {
                                return Some((Ok(Fragment::text(content)), state));
                            }
                            _ => continue,
                        }
                    }
                    Some(Err(e)) => {
                        state.finished = true;
                        return Some((Err(e), state));
                    }
                    None => {
                        // Body ended without [DONE]; still honor the
                        // exactly-one-terminal contract.
                        state.finished = true;
                        return Some((Ok(Fragment::terminal()), state));
                    }
                }
            }
        },
    )
}

#[async_trait]
impl Translator for OpenAiTranslator {
    async fn translate(
        &self,
        text: &str,
        source_lang: &str,
        target_lang: &str,
    ) -> Result<FragmentStream> {
        let body = CompletionsRequest {
            model: self.model.clone(),
            messages: vec![
                json!({ "role": "system", "content": interpreter_prompt(source_lang, target_lang) }),
                json!({ "role": "user", "content": text }),
            ],
            stream: true,
        };

        debug!(model = %self.model, source_lang, target_lang, "Streaming translation request");

        let request = self
            .client
            .post(format!("{}/v1/chat/completions", self.base_url))
            .header("content-type", "application/json")
            .header("authorization", format!("Bearer {}", self.api_key))
            .json(&body);

        let response = tokio::time::timeout(self.request_timeout, request.send())
            .await
            .map_err(|_| {
                VoiceBridgeError::UpstreamUnavailable(format!(
                    "no response within {:?}",
                    self.request_timeout
                ))
            })?
            .map_err(|e| {
                if e.is_timeout() || e.is_connect() {
                    VoiceBridgeError::UpstreamUnavailable(e.to_string())
                } else {
                    VoiceBridgeError::UpstreamError(e.to_string())
                }
            })?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(VoiceBridgeError::UpstreamError(format!(
                "upstream returned {status}: {body}"
            )));
        }

        Ok(Box::pin(fragment_stream(data_stream(response))))
    }
}

//! SSE decoding for the upstream's streamed completions.
//!
//! The upstream only ever uses `data:` fields, so the decoder collects
//! data lines and dispatches one payload per blank-line-terminated event.

use futures::Stream;
use tokio_stream::StreamExt;

use voicebridge_core::error::{Result, VoiceBridgeError};

/// Incremental SSE decoder. Feed it raw body chunks, get back complete
/// event payloads.
#[derive(Debug, Default)]
pub struct SseDecoder {
    buffer: String,
    data_lines: Vec<String>,
}

impl SseDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Consume one body chunk; returns every event payload it completed.
    pub fn feed(&mut self, chunk: &[u8]) -> Vec<String> {
        self.buffer.push_str(&String::from_utf8_lossy(chunk));

        let mut events = Vec::new();
        while let Some(newline_pos) = self.buffer.find('\n') {
            let line = self.buffer[..newline_pos].trim_end_matches('\r').to_string();
            self.buffer.drain(..=newline_pos);

            if line.is_empty() {
                if !self.data_lines.is_empty() {
                    events.push(self.data_lines.join("\n"));
                    self.data_lines.clear();
                }
            } else if let Some(value) = line.strip_prefix("data:") {
                self.data_lines.push(value.trim_start().to_string());
            }
            // event:/id:/comment lines carry nothing we use
        }
        events
    }

    /// Flush a payload left dangling when the body ends without a blank line.
    pub fn finish(&mut self) -> Option<String> {
        if self.data_lines.is_empty() {
            None
        } else {
            Some(std::mem::take(&mut self.data_lines).join("\n"))
        }
    }
}

/// Decode a streaming response body into event payloads.
pub fn data_stream(response: reqwest::Response) -> impl Stream<Item = Result<String>> {
    struct State {
        body: std::pin::Pin<
            Box<dyn Stream<Item = std::result::Result<bytes::Bytes, reqwest::Error>> + Send>,
        >,
        decoder: SseDecoder,
        pending: std::collections::VecDeque<String>,
        done: bool,
    }

    futures::stream::unfold(
        State {
            body: Box::pin(response.bytes_stream()),
            decoder: SseDecoder::new(),
            pending: std::collections::VecDeque::new(),
            done: false,
        },
        |mut state| async move {
            loop {
                if let Some(payload) = state.pending.pop_front() {
                    return Some((Ok(payload), state));
                }
                if state.done {
                    return None;
                }

                match state.body.next().await {
                    Some(Ok(chunk)) => {
                        state.pending.extend(state.decoder.feed(&chunk));
                    }
                    Some(Err(e)) => {
                        state.done = true;
                        return Some((
                            Err(VoiceBridgeError::UpstreamUnavailable(format!(
                                "stream interrupted: {e}"
                            ))),
                            state,
                        ));
                    }
                    None => {
                        state.done = true;
                        if let Some(payload) = state.decoder.finish() {
                            state.pending.push_back(payload);
                        }
                    }
                }
            }
        },
    )
}

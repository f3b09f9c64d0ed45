//! Incremental decoder for OpenAI-style server-sent event streams.
//!
//! Network chunks do not line up with event boundaries, so the decoder
//! buffers partial lines between calls to [`SseDecoder::push`].

use serde_json::Value;

use crate::error::BackendError;

/// Sentinel payload closing a chat-completion stream.
const DONE_SENTINEL: &str = "[DONE]";

#[derive(Debug, Clone, PartialEq)]
pub enum SseEvent {
    Data(String),
    Done,
}

#[derive(Debug, Default)]
pub struct SseDecoder {
    buffer: Vec<u8>,
}

impl SseDecoder {
    /// Feed raw bytes, returning every complete `data:` event.
    pub fn push(&mut self, chunk: &[u8]) -> Vec<SseEvent> {
        self.buffer.extend_from_slice(chunk);
        let mut events = Vec::new();

        // Decode whole lines only, so multi-byte characters split across
        // chunks are reassembled first.
        while let Some(newline) = self.buffer.iter().position(|b| *b == b'\n') {
            let raw: Vec<u8> = self.buffer.drain(..=newline).collect();
            let line = String::from_utf8_lossy(&raw);
            let line = line.trim_end_matches(['\r', '\n']);
            let Some(data) = line.strip_prefix("data:") else {
                continue;
            };
            let data = data.trim();
            if data == DONE_SENTINEL {
                events.push(SseEvent::Done);
            } else if !data.is_empty() {
                events.push(SseEvent::Data(data.to_string()));
            }
        }
        events
    }
}

/// Extract `choices[0].delta.content` from a chat-completion chunk.
pub fn parse_delta(data: &str) -> Result<Option<String>, BackendError> {
    let value: Value = serde_json::from_str(data)
        .map_err(|e| BackendError::Parse(format!("invalid stream chunk: {e}")))?;
    if let Some(message) = value.pointer("/error/message").and_then(Value::as_str) {
        return Err(BackendError::Rejected(message.to_string()));
    }
    Ok(value
        .pointer("/choices/0/delta/content")
        .and_then(Value::as_str)
        .filter(|s| !s.is_empty())
        .map(str::to_string))
}

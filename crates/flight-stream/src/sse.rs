// Copyright 2025 Chris Custine
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! Incremental `text/event-stream` decoder.
//!
//! Bytes arrive in arbitrary chunks. Complete lines are processed as they
//! appear: `data:` lines accumulate, a blank line ends the event, lines
//! starting with `:` are comments. Only the data of each event is returned;
//! `event`, `id` and `retry` fields are ignored.

use crate::source::FeedError;

/// Largest event accepted, counting buffered line bytes and data.
pub const MAX_EVENT_BYTES: usize = 16 * 1024 * 1024;

/// Splits a byte stream into event data strings.
#[derive(Debug)]
pub struct EventStreamDecoder {
    pending: Vec<u8>,
    data: Vec<String>,
    data_len: usize,
    max_event_bytes: usize,
}

impl Default for EventStreamDecoder {
    fn default() -> Self {
        Self::with_limit(MAX_EVENT_BYTES)
    }
}

impl EventStreamDecoder {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Decoder that rejects events larger than `max_event_bytes`.
    #[must_use]
    pub fn with_limit(max_event_bytes: usize) -> Self {
        Self {
            pending: Vec::new(),
            data: Vec::new(),
            data_len: 0,
            max_event_bytes,
        }
    }

    /// Feed a chunk and return the data of every event it completed.
    ///
    /// Fails when an unterminated event outgrows the size limit; the buffer
    /// is discarded and the stream should be reopened.
    pub fn feed(&mut self, chunk: &[u8]) -> Result<Vec<String>, FeedError> {
        self.pending.extend_from_slice(chunk);
        let mut events = Vec::new();

        while let Some(newline) = self.pending.iter().position(|&b| b == b'\n') {
            let mut line: Vec<u8> = self.pending.drain(..=newline).collect();
            line.pop();
            if line.last() == Some(&b'\r') {
                line.pop();
            }
            let line = String::from_utf8_lossy(&line);

            if line.is_empty() {
                if !self.data.is_empty() {
                    events.push(self.data.join("\n"));
                    self.data.clear();
                    self.data_len = 0;
                }
                continue;
            }
            if line.starts_with(':') {
                continue;
            }

            let (field, value) = match line.split_once(':') {
                Some((field, value)) => (field, value.strip_prefix(' ').unwrap_or(value)),
                None => (line.as_ref(), ""),
            };
            if field == "data" {
                self.data_len += value.len() + 1;
                self.data.push(value.to_string());
            }
        }

        let buffered = self.pending.len() + self.data_len;
        if buffered > self.max_event_bytes {
            self.pending.clear();
            self.data.clear();
            self.data_len = 0;
            return Err(FeedError::Decode(format!(
                "server-push event exceeds {} bytes",
                self.max_event_bytes
            )));
        }

        Ok(events)
    }

    /// Whether a partial line or event is buffered.
    #[must_use]
    pub fn has_partial(&self) -> bool {
        !self.pending.is_empty() || !self.data.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_single_event() {
        let mut decoder = EventStreamDecoder::new();
        let events = decoder.feed(b"data: {\"time\":1}\n\n").unwrap();
        assert_eq!(events, vec!["{\"time\":1}".to_string()]);
        assert!(!decoder.has_partial());
    }

    #[test]
    fn test_split_across_chunks() {
        let mut decoder = EventStreamDecoder::new();
        assert!(decoder.feed(b"da").unwrap().is_empty());
        assert!(decoder.feed(b"ta: hel").unwrap().is_empty());
        assert!(decoder.feed(b"lo\r\n").unwrap().is_empty());
        assert!(decoder.has_partial());
        assert_eq!(decoder.feed(b"\r\n").unwrap(), vec!["hello".to_string()]);
    }

    #[test]
    fn test_multiline_data_and_comments() {
        let mut decoder = EventStreamDecoder::new();
        let events = decoder
            .feed(b": keepalive\n\nevent: update\ndata: a\ndata: b\nid: 7\n\ndata:c\n\n")
            .unwrap();
        assert_eq!(events, vec!["a\nb".to_string(), "c".to_string()]);
    }

    #[test]
    fn test_utf8_split_mid_character() {
        let mut decoder = EventStreamDecoder::new();
        let bytes = "data: Zürich\n\n".as_bytes();
        let (a, b) = bytes.split_at(8);
        assert!(decoder.feed(a).unwrap().is_empty());
        assert_eq!(decoder.feed(b).unwrap(), vec!["Zürich".to_string()]);
    }

    #[test]
    fn test_unterminated_event_is_capped() {
        let mut decoder = EventStreamDecoder::with_limit(64);
        assert!(decoder.feed(b"data: ").unwrap().is_empty());
        // A line that never ends
        assert!(decoder.feed(&[b'x'; 40]).unwrap().is_empty());
        assert!(matches!(decoder.feed(&[b'x'; 40]), Err(FeedError::Decode(_))));
        assert!(!decoder.has_partial());

        // Many data lines with no blank-line terminator
        let line = b"data: 0123456789\n";
        let mut result = Ok(Vec::new());
        for _ in 0..10 {
            result = decoder.feed(line);
            if result.is_err() {
                break;
            }
        }
        assert!(matches!(result, Err(FeedError::Decode(_))));

        // Usable again afterwards
        assert_eq!(decoder.feed(b"data: ok\n\n").unwrap(), vec!["ok".to_string()]);
    }
}

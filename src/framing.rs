//! # Brace-Balanced JSON Framing
//!
//! Watch streams deliver back-to-back JSON objects with no delimiter or length
//! prefix. [`FrameExtractor`] recovers the object boundaries by counting brace
//! depth over an append-only buffer.
//!
//! ## Known limitation
//!
//! Braces inside string literals are not special-cased. Gateway payloads carry
//! keys and values base64-encoded, so a literal `{` or `}` never appears inside
//! a string there. Reusing this extractor for arbitrary JSON streams would need
//! a real tokenizer.

use serde_json::Value;

use crate::error::{Error, Result};

/// Default ceiling for a single unterminated document.
pub const DEFAULT_MAX_FRAME_BYTES: usize = 1 << 14;

const OPEN: u8 = b'{';
const CLOSE: u8 = b'}';

/// Incremental extractor turning an arbitrarily chunked byte stream into
/// complete JSON documents.
///
/// Bytes are appended with [`push`](Self::push) and documents are taken out
/// with [`pull_complete`](Self::pull_complete). Each byte is scanned exactly
/// once; a partial trailing document stays buffered for the next call.
#[derive(Debug)]
pub struct FrameExtractor {
    buffer: Vec<u8>,
    /// Next byte to scan
    cursor: usize,
    /// Start of the document currently open (or of unscanned bytes at depth 0)
    start: usize,
    depth: usize,
    max_frame_bytes: usize,
    /// Parse failure held back so documents preceding it are emitted first
    deferred: Option<Error>,
}

impl Default for FrameExtractor {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_FRAME_BYTES)
    }
}

impl FrameExtractor {
    pub fn new(max_frame_bytes: usize) -> Self {
        Self {
            buffer: Vec::new(),
            cursor: 0,
            start: 0,
            depth: 0,
            max_frame_bytes,
            deferred: None,
        }
    }

    /// Append raw stream bytes.
    pub fn push(&mut self, bytes: &[u8]) {
        self.buffer.extend_from_slice(bytes);
    }

    /// Remove and return every complete document accumulated so far.
    ///
    /// When a framing or parse error is found after some documents already
    /// closed in the same call, those documents are returned first and the
    /// error is raised by the next call.
    ///
    /// # Errors
    /// - `Error::Frame` on an unmatched `}`, on anything other than ASCII
    ///   whitespace between documents, or when an open document grows past
    ///   the frame ceiling
    /// - `Error::Parse` when a balanced span is not valid JSON
    pub fn pull_complete(&mut self) -> Result<Vec<Value>> {
        if let Some(err) = self.deferred.take() {
            return Err(err);
        }

        let mut documents = Vec::new();
        while self.cursor < self.buffer.len() {
            let byte = self.buffer[self.cursor];
            if self.depth == 0 {
                // Between documents: only whitespace may separate them. A
                // rejected byte is left unconsumed and reported again.
                match byte {
                    OPEN => self.depth = 1,
                    b if b.is_ascii_whitespace() => self.start = self.cursor + 1,
                    CLOSE => {
                        return self.fail_or_flush(documents, Error::frame("Invalid bracket closure in stream"));
                    }
                    other => {
                        return self.fail_or_flush(
                            documents,
                            Error::frame(format!("Unexpected byte 0x{:02x} between documents", other)),
                        );
                    }
                }
                self.cursor += 1;
                continue;
            }

            match byte {
                OPEN => self.depth += 1,
                CLOSE => self.depth -= 1,
                _ => {}
            }
            self.cursor += 1;

            if self.depth == 0 {
                let span = &self.buffer[self.start..self.cursor];
                let parsed = serde_json::from_slice::<Value>(span);
                self.start = self.cursor;
                match parsed {
                    Ok(value) => documents.push(value),
                    Err(e) => {
                        let err = Error::parse(format!(
                            "{}: {}",
                            e,
                            String::from_utf8_lossy(span)
                        ));
                        return self.fail_or_flush(documents, err);
                    }
                }
            } else if self.cursor - self.start > self.max_frame_bytes {
                return self.fail_or_flush(
                    documents,
                    Error::frame(format!(
                        "Huge unparsed json data: more than {} bytes without a closing brace",
                        self.max_frame_bytes
                    )),
                );
            }
        }

        self.compact();
        Ok(documents)
    }

    /// Reset to the empty state, keeping the allocated buffer.
    pub fn clear(&mut self) {
        self.buffer.clear();
        self.cursor = 0;
        self.start = 0;
        self.depth = 0;
        self.deferred = None;
    }

    /// Bytes currently held (scanned or not) for an unfinished document
    pub fn buffered_len(&self) -> usize {
        self.buffer.len() - self.start
    }

    fn fail_or_flush(&mut self, documents: Vec<Value>, err: Error) -> Result<Vec<Value>> {
        self.compact();
        if documents.is_empty() {
            Err(err)
        } else {
            self.deferred = Some(err);
            Ok(documents)
        }
    }

    /// Drop bytes belonging to documents already emitted.
    fn compact(&mut self) {
        if self.start == 0 {
            return;
        }
        self.buffer.drain(..self.start);
        self.cursor -= self.start;
        self.start = 0;
    }
}

//! Incremental action-block extractor.
//!
//! A [`BlockExtractor`] owns the parse buffer of exactly one streamed
//! generation. Fragments are appended as they arrive; each call to
//! [`BlockExtractor::try_extract`] pulls at most one complete block off the
//! front of the buffer.
//!
//! Extraction is lossy by contract: every byte before and including the
//! matched block is discarded, so prose the model writes around its tags is
//! never delivered anywhere. Callers that need the commentary must capture
//! the raw stream before feeding it here.
//!
//! The extractor is not shared between tasks and takes `&mut self`; the
//! owning session serializes all calls.

use std::ops::Range;

use tracing::{debug, trace, warn};

use crate::config::ExtractorConfig;
use crate::grammar::{Action, ActionBlock, MarkerParser, TagFamily, TYPE_ATTRIBUTE};
use crate::{AppError, Result};

/// Byte layout of one complete block inside the buffer.
#[derive(Debug, Clone)]
struct BlockSpan {
    /// The full `<TAG ...>` opening marker.
    marker: Range<usize>,
    /// Body text, trailing line break removed.
    body: Range<usize>,
    /// Offset just past the closing literal.
    end: usize,
}

/// Outcome of scanning the current buffer.
enum Scan {
    /// No opening marker yet.
    NoMarker,
    /// An opening marker was found at this offset but its block is still open.
    Open(usize),
    /// A complete block is present.
    Complete(BlockSpan),
}

/// Extracts complete action blocks of one tag family from a growing buffer.
#[derive(Debug)]
pub struct BlockExtractor {
    parser: MarkerParser,
    buffer: String,
    max_buffer_bytes: usize,
    max_malformed_retries: u32,
    malformed_attempts: u32,
    next_sequence: u64,
    /// `(marker_start, resume_at)` for the closing-literal search of the
    /// block currently streaming in. Valid only while the buffer only grows.
    close_cursor: Option<(usize, usize)>,
}

impl BlockExtractor {
    /// Create an extractor for `family` with an empty buffer.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Config` if the marker grammar cannot be compiled.
    pub fn new(family: TagFamily, config: &ExtractorConfig) -> Result<Self> {
        Ok(Self {
            parser: MarkerParser::new(family)?,
            buffer: String::new(),
            max_buffer_bytes: config.max_buffer_bytes,
            max_malformed_retries: config.max_malformed_retries,
            malformed_attempts: 0,
            next_sequence: 0,
            close_cursor: None,
        })
    }

    /// Tag family this extractor recognizes.
    #[must_use]
    pub fn family(&self) -> TagFamily {
        self.parser.family()
    }

    /// Unconsumed buffered text.
    #[must_use]
    pub fn buffer(&self) -> &str {
        &self.buffer
    }

    /// Append a received fragment. No parsing happens here.
    pub fn append(&mut self, fragment: &str) {
        self.buffer.push_str(fragment);
    }

    /// Pull at most one complete block off the buffer.
    ///
    /// Returns `Ok(None)` when no complete block is present; the buffer is
    /// left untouched so a later call finds the same opening marker again.
    /// Call repeatedly to drain several back-to-back blocks.
    ///
    /// # Errors
    ///
    /// - `AppError::MalformedBlock` when a complete block fails to parse. The
    ///   buffer is preserved until the block has failed
    ///   `max_malformed_retries` times, after which it is discarded.
    /// - `AppError::BufferLimit` when no block can be extracted and the
    ///   buffer exceeds `max_buffer_bytes`.
    pub fn try_extract(&mut self) -> Result<Option<ActionBlock>> {
        let span = match self.scan() {
            Scan::Complete(span) => span,
            Scan::Open(start) => {
                trace!(
                    tag = self.family().tag_name(),
                    marker_at = start,
                    buffered = self.buffer.len(),
                    "extractor: block still streaming"
                );
                return self.check_limit().map(|()| None);
            }
            Scan::NoMarker => return self.check_limit().map(|()| None),
        };

        match self.build_block(&span) {
            Ok(block) => {
                self.consume(span.end);
                self.next_sequence += 1;
                debug!(
                    tag = block.tag_name(),
                    action_type = %block.action_type,
                    sequence = block.sequence,
                    "extractor: block extracted"
                );
                Ok(Some(block))
            }
            Err(err) => {
                self.malformed_attempts += 1;
                if self.malformed_attempts >= self.max_malformed_retries {
                    warn!(
                        tag = self.family().tag_name(),
                        attempts = self.malformed_attempts,
                        error = %err,
                        "extractor: dropping malformed block"
                    );
                    self.consume(span.end);
                } else {
                    warn!(
                        tag = self.family().tag_name(),
                        attempts = self.malformed_attempts,
                        error = %err,
                        "extractor: malformed block, buffer preserved"
                    );
                }
                Err(err)
            }
        }
    }

    /// End the generation, returning the tail of an unclosed block if any.
    ///
    /// The tail is never dispatched; it is returned for logging only.
    #[must_use]
    pub fn finish(mut self) -> Option<String> {
        match self.scan() {
            Scan::Open(start) => Some(self.buffer.split_off(start)),
            Scan::Complete(span) => Some(self.buffer.split_off(span.marker.start)),
            Scan::NoMarker => None,
        }
    }

    fn check_limit(&self) -> Result<()> {
        if self.buffer.len() > self.max_buffer_bytes {
            return Err(AppError::BufferLimit(format!(
                "{} buffered bytes without a complete <{}> block (limit {})",
                self.buffer.len(),
                self.family().tag_name(),
                self.max_buffer_bytes
            )));
        }
        Ok(())
    }

    /// Drop everything up to `end` and reset per-block state.
    fn consume(&mut self, end: usize) {
        self.buffer.drain(..end);
        self.malformed_attempts = 0;
        self.close_cursor = None;
    }

    fn build_block(&self, span: &BlockSpan) -> Result<ActionBlock> {
        let family = self.family();
        let attributes = self
            .parser
            .parse_attributes(&self.buffer[span.marker.clone()])?;
        let action_type = attributes
            .iter()
            .find(|(name, _)| name == TYPE_ATTRIBUTE)
            .map(|(_, value)| value.clone())
            .unwrap_or_default();
        let body = self.buffer[span.body.clone()].to_owned();
        let action = Action::from_parts(family, &action_type, &attributes, &body)?;

        Ok(ActionBlock {
            family,
            action_type,
            attributes,
            body,
            action,
            sequence: self.next_sequence,
        })
    }

    /// Locate the first opening marker and, after it, the closing literal.
    fn scan(&mut self) -> Scan {
        let closing = self.family().closing_marker();
        let buf = self.buffer.as_str();

        let mut line_start = 0;
        while line_start < buf.len() {
            let line_end = buf[line_start..]
                .find('\n')
                .map_or(buf.len(), |i| line_start + i);

            if let Some(marker) = self.parser.find_opening(&buf[line_start..line_end]) {
                let marker_start = line_start + marker.start;
                let marker_end = line_start + marker.end;

                let search_from = match self.close_cursor {
                    Some((start, resume)) if start == marker_start => resume.max(marker_end),
                    _ => marker_end,
                };
                let Some(rel) = buf[search_from..].find(closing) else {
                    let resume = floor_char_boundary(
                        buf,
                        buf.len().saturating_sub(closing.len() - 1).max(search_from),
                    );
                    self.close_cursor = Some((marker_start, resume));
                    return Scan::Open(marker_start);
                };
                let close_start = search_from + rel;

                // Body starts on the next line unless the marker line carries
                // content of its own.
                let body_start = if close_start <= line_end
                    || !buf[marker_end..line_end].trim().is_empty()
                {
                    marker_end
                } else {
                    line_end + 1
                };
                let body_end = trim_one_line_break(buf, body_start, close_start);

                return Scan::Complete(BlockSpan {
                    marker: marker_start..marker_end,
                    body: body_start..body_end,
                    end: close_start + closing.len(),
                });
            }

            if line_end == buf.len() {
                break;
            }
            line_start = line_end + 1;
        }

        Scan::NoMarker
    }
}

/// End of `buf[start..end]` with a single trailing `\n` or `\r\n` removed.
fn trim_one_line_break(buf: &str, start: usize, end: usize) -> usize {
    let body = &buf[start..end];
    if let Some(stripped) = body.strip_suffix("\r\n") {
        start + stripped.len()
    } else if let Some(stripped) = body.strip_suffix('\n') {
        start + stripped.len()
    } else {
        end
    }
}

fn floor_char_boundary(buf: &str, mut index: usize) -> usize {
    while index > 0 && !buf.is_char_boundary(index) {
        index -= 1;
    }
    index
}

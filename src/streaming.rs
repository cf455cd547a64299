//! Frame-at-a-time parsing shared by the one-shot and streaming paths.
//!
//! A format only has to say how to cut the next complete frame off the
//! front of a buffer ([`WireParser::next_frame`]) and what to do with an
//! unterminated tail at end of input ([`WireParser::flush`]). One-shot
//! parsing and chunked streaming drive the same matcher, so feeding a
//! response in one piece or split anywhere yields the same messages.

use crate::intermediate::IntermediateMessage;
use serde::{Deserialize, Serialize};

#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum ParseError {
    #[error("no message frames recognized in {len} bytes of completion text")]
    NoFramesRecognized { len: usize },
}

/// Outcome of trying to match one frame at the front of a buffer.
#[derive(Debug, Clone, PartialEq)]
pub enum Frame {
    /// A frame (or a malformed fragment) ended `consumed` bytes in.
    /// Malformed fragments are skipped and carry no messages.
    Complete {
        messages: Vec<IntermediateMessage>,
        consumed: usize,
        recognized: bool,
    },
    /// More input is needed before anything can be decided.
    Pending,
}

impl Frame {
    pub(crate) fn recognized(messages: Vec<IntermediateMessage>, consumed: usize) -> Self {
        Frame::Complete {
            messages,
            consumed,
            recognized: true,
        }
    }

    pub(crate) fn skipped(consumed: usize) -> Self {
        Frame::Complete {
            messages: Vec::new(),
            consumed,
            recognized: false,
        }
    }
}

/// Streaming parse state for one session.
///
/// Owned by value: every operation takes the state and returns the next
/// one, so a session can be cloned, serialized, replayed or dropped at any
/// point. After any `feed` the buffer holds no complete frame.
#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq)]
pub struct ParserState {
    buffer: String,
    completed: Vec<IntermediateMessage>,
    frames: usize,
    /// Text skipped while no frame has been recognized yet.
    #[serde(default)]
    discarded: String,
}

impl ParserState {
    pub(crate) fn with_buffer(prefix: &str) -> Self {
        Self {
            buffer: prefix.to_string(),
            ..Default::default()
        }
    }

    /// Whether at least one completed message is waiting to be drained.
    pub fn has_ready(&self) -> bool {
        !self.completed.is_empty()
    }

    /// Text received but not yet resolved into a frame.
    pub fn buffered(&self) -> &str {
        &self.buffer
    }

    /// Number of frames recognized so far in this session.
    pub fn frames_recognized(&self) -> usize {
        self.frames
    }

    /// Takes every completed message, leaving the buffer in place.
    pub fn drain(mut self) -> (Vec<IntermediateMessage>, ParserState) {
        let ready = std::mem::take(&mut self.completed);
        (ready, self)
    }
}

/// Result of scanning a whole text for frames.
pub(crate) struct Scan {
    pub messages: Vec<IntermediateMessage>,
    pub frames: usize,
    pub rest: usize,
    /// Concatenation of every skipped fragment.
    pub discarded: String,
}

/// Matches frames repeatedly from the front of `text`.
pub(crate) fn scan<P: WireParser + ?Sized>(parser: &P, text: &str) -> Scan {
    let mut messages = Vec::new();
    let mut frames = 0;
    let mut offset = 0;
    let mut discarded = String::new();
    while offset < text.len() {
        match parser.next_frame(&text[offset..]) {
            Frame::Complete {
                messages: found,
                consumed,
                recognized,
            } => {
                if recognized {
                    frames += 1;
                } else {
                    discarded.push_str(&text[offset..offset + consumed]);
                }
                messages.extend(found);
                if consumed == 0 {
                    break;
                }
                offset += consumed;
            }
            Frame::Pending => break,
        }
    }
    Scan {
        messages,
        frames,
        rest: offset,
        discarded,
    }
}

/// Strips the longest suffix of `text` that is a cut-off prefix of one of
/// `markers`.
pub(crate) fn trim_partial_marker<'a>(text: &'a str, markers: &[&str]) -> &'a str {
    let cut = markers
        .iter()
        .flat_map(|marker| (2..marker.len()).filter(move |len| text.ends_with(&marker[..*len])))
        .max()
        .unwrap_or(0);
    &text[..text.len() - cut]
}

/// A completion-text parser for one wire format.
pub trait WireParser {
    /// Cuts the next complete frame off the front of `buffer`.
    ///
    /// Must only decide on text it has seen: a frame reported complete
    /// must stay complete, with the same messages, however much more text
    /// is appended.
    fn next_frame(&self, buffer: &str) -> Frame;

    /// Resolves an unterminated tail at end of input.
    fn flush(&self, remainder: &str) -> Vec<IntermediateMessage>;

    /// Text the input is assumed to start with (an implicit opener).
    fn preamble(&self) -> &str {
        ""
    }

    /// Applied to the result of a one-shot [`WireParser::parse`] only.
    fn post_process(&self, messages: Vec<IntermediateMessage>) -> Vec<IntermediateMessage> {
        messages
    }

    /// Parses a complete response.
    ///
    /// Never fails. Equivalent to feeding `text` as a single chunk and
    /// finishing the session, so an unterminated last frame is flushed and
    /// non-blank text without any frame comes back as one assistant message.
    fn parse(&self, text: &str) -> Vec<IntermediateMessage> {
        let state = self.feed(self.start(), text);
        self.post_process(self.finish(state))
    }

    /// Parses complete frames only, reporting non-blank text without any
    /// frame as an error instead of degrading. An unterminated tail is
    /// ignored.
    fn try_parse(&self, text: &str) -> Result<Vec<IntermediateMessage>, ParseError> {
        let input = format!("{}{}", self.preamble(), text);
        let scan = scan(self, &input);
        if scan.frames == 0 && !text.trim().is_empty() {
            return Err(ParseError::NoFramesRecognized { len: text.len() });
        }
        let rest = &input[scan.rest..];
        if !rest.trim().is_empty() {
            tracing::debug!(tail = rest, "ignoring incomplete trailing frame");
        }
        Ok(self.post_process(scan.messages))
    }

    /// A fresh session state.
    fn start(&self) -> ParserState {
        ParserState::with_buffer(self.preamble())
    }

    /// Appends a chunk and moves every frame it completes out of the buffer.
    fn feed(&self, state: ParserState, chunk: &str) -> ParserState {
        let ParserState {
            mut buffer,
            mut completed,
            mut frames,
            mut discarded,
        } = state;
        buffer.push_str(chunk);
        let scan = scan(self, &buffer);
        frames += scan.frames;
        // Skipped text is kept until a frame proves the stream is framed.
        if frames == 0 {
            discarded.push_str(&scan.discarded);
        } else {
            discarded.clear();
        }
        completed.extend(scan.messages);
        buffer.drain(..scan.rest);
        ParserState {
            buffer,
            completed,
            frames,
            discarded,
        }
    }

    /// Ends a session: returns every message not yet drained, including a
    /// flushed unterminated tail. If the whole session produced no frame,
    /// all non-blank text received comes back as one raw assistant message.
    fn finish(&self, state: ParserState) -> Vec<IntermediateMessage> {
        let ParserState {
            buffer,
            mut completed,
            frames,
            mut discarded,
        } = state;
        let flushed = self.flush(&buffer);
        if frames == 0 && flushed.is_empty() {
            discarded.push_str(&buffer);
            let raw = discarded.strip_prefix(self.preamble()).unwrap_or(&discarded);
            if !raw.trim().is_empty() {
                tracing::warn!("no frames in stream, returning raw text");
                completed.push(IntermediateMessage::fallback(raw));
            }
            return completed;
        }
        completed.extend(flushed);
        completed
    }
}

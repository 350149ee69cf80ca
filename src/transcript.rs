//! Transcript accumulation for a live session
//!
//! Finalized fragments from the speech transport are buffered twice: once in
//! the pending buffer that feeds the next structuring call, and once in the
//! append-only session log used for full regenerations, autosave and export.
//! All sizes are in characters, not bytes, because the structuring payload
//! budget is a character budget.

use serde::{Deserialize, Serialize};
use std::collections::VecDeque;

/// Character budget for full-regeneration payloads. Older transcript content
/// beyond this window is dropped from the request, never from the log.
pub(crate) const MAX_CONTEXT_CHARS: usize = 16_000;

/// One finalized span of recognized speech
#[derive(Debug, Clone, Serialize, Deserialize)]
pub(crate) struct TranscriptFragment {
    /// Finalized text as recognized
    pub text: String,
    /// Speaker index when diarization attributed the span
    pub speaker: Option<u32>,
    /// Seconds since the start of the session
    pub timestamp: f64,
    /// Recognition confidence in 0.0..=1.0
    pub confidence: f32,
}

impl TranscriptFragment {
    pub(crate) fn new(
        text: impl Into<String>,
        speaker: Option<u32>,
        timestamp: f64,
        confidence: f32,
    ) -> Self {
        TranscriptFragment {
            text: text.into(),
            speaker,
            timestamp,
            confidence,
        }
    }

    /// Parse one console line into a fragment.
    ///
    /// Lines of the form `[Speaker N]: text` carry a speaker attribution;
    /// anything else is taken verbatim with no speaker.
    pub(crate) fn parse_line(line: &str, timestamp: f64) -> Self {
        if let Some(rest) = line.strip_prefix("[Speaker ") {
            if let Some((index, text)) = rest.split_once("]:") {
                if let Ok(speaker) = index.trim().parse() {
                    return TranscriptFragment::new(text.trim(), Some(speaker), timestamp, 1.0);
                }
            }
        }
        TranscriptFragment::new(line.trim(), None, timestamp, 1.0)
    }

    /// Render the fragment the way it is embedded in request payloads and
    /// the session log. Fragments that already carry a speaker tag in their
    /// text are not tagged again.
    pub(crate) fn formatted(&self) -> String {
        match self.speaker {
            Some(index) if !self.text.trim_start().starts_with("[Speaker") => {
                format!("[Speaker {}]: {}", index, self.text)
            }
            _ => self.text.clone(),
        }
    }
}

/// Render a batch of fragments as one request payload block.
pub(crate) fn fragments_text(fragments: &[TranscriptFragment]) -> String {
    fragments
        .iter()
        .map(TranscriptFragment::formatted)
        .collect::<Vec<_>>()
        .join("\n")
}

/// Characters the batch occupies at the tail of the session log, including
/// the separator joining it to earlier content. May overestimate by one
/// character for the first batch of a session, which is harmless: the tail
/// window only ever grows from it.
pub(crate) fn fragments_char_span(fragments: &[TranscriptFragment]) -> usize {
    fragments
        .iter()
        .map(|f| f.formatted().chars().count() + 1)
        .sum()
}

/// Fragments awaiting the next structuring call
#[derive(Debug, Default)]
pub(crate) struct PendingBuffer {
    fragments: VecDeque<TranscriptFragment>,
}

impl PendingBuffer {
    pub(crate) fn push(&mut self, fragment: TranscriptFragment) {
        self.fragments.push_back(fragment);
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.fragments.is_empty()
    }

    pub(crate) fn len(&self) -> usize {
        self.fragments.len()
    }

    /// Take every buffered fragment, leaving the buffer empty.
    pub(crate) fn take_all(&mut self) -> Vec<TranscriptFragment> {
        self.fragments.drain(..).collect()
    }

    /// Return fragments consumed by a failed call to the head of the buffer,
    /// ahead of anything that arrived while the call was in flight.
    pub(crate) fn restore(&mut self, consumed: Vec<TranscriptFragment>) {
        for fragment in consumed.into_iter().rev() {
            self.fragments.push_front(fragment);
        }
    }
}

/// Append-only log of every finalized fragment in the session
#[derive(Debug, Default)]
pub(crate) struct TranscriptLog {
    lines: Vec<String>,
    char_count: usize,
}

impl TranscriptLog {
    pub(crate) fn push(&mut self, fragment: &TranscriptFragment) {
        let line = fragment.formatted();
        self.char_count += line.chars().count() + usize::from(!self.lines.is_empty());
        self.lines.push(line);
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.lines.is_empty()
    }

    /// Total characters of the rendered log, separators included.
    pub(crate) fn char_count(&self) -> usize {
        self.char_count
    }

    /// Full rendered log, one fragment per line.
    pub(crate) fn text(&self) -> String {
        self.lines.join("\n")
    }

    /// Exactly the last `max_chars` characters of the rendered log, or the
    /// whole log when it is shorter than that.
    pub(crate) fn tail(&self, max_chars: usize) -> String {
        let text = self.text();
        if self.char_count <= max_chars {
            return text;
        }
        text.chars().skip(self.char_count - max_chars).collect()
    }
}

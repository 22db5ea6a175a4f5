//! Messages from the speech-recognition worker.

use serde::{Deserialize, Serialize};

use crate::cue::Cue;

/// Partial or final transcription output.
///
/// Both variants carry the full transcript so far; a consumer only ever
/// needs the latest message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum TranscriptMessage {
    Update { text: String, chunks: Vec<Cue> },
    Complete { text: String, chunks: Vec<Cue> },
}

impl TranscriptMessage {
    pub fn text(&self) -> &str {
        match self {
            Self::Update { text, .. } | Self::Complete { text, .. } => text,
        }
    }

    pub fn chunks(&self) -> &[Cue] {
        match self {
            Self::Update { chunks, .. } | Self::Complete { chunks, .. } => chunks,
        }
    }

    pub fn is_complete(&self) -> bool {
        matches!(self, Self::Complete { .. })
    }
}

/// Folds a stream of transcript messages into the latest cue list.
#[derive(Debug, Clone, Default)]
pub struct TranscriptState {
    latest: Option<TranscriptMessage>,
}

impl TranscriptState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a message. Updates arriving after completion are ignored.
    pub fn apply(&mut self, message: TranscriptMessage) {
        if self.is_complete() && !message.is_complete() {
            tracing::debug!("Ignoring transcript update after completion");
            return;
        }
        self.latest = Some(message);
    }

    pub fn is_complete(&self) -> bool {
        self.latest
            .as_ref()
            .is_some_and(TranscriptMessage::is_complete)
    }

    /// Cues of the most recent message, or none yet.
    pub fn cues(&self) -> &[Cue] {
        self.latest.as_ref().map(|m| m.chunks()).unwrap_or(&[])
    }

    pub fn text(&self) -> &str {
        self.latest.as_ref().map(|m| m.text()).unwrap_or("")
    }
}

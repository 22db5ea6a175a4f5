//! Error types shared across Subforge crates.

use std::path::PathBuf;

/// Top-level error type for Subforge operations.
///
/// Variants follow the render pipeline's failure taxonomy so callers can tell
/// a malformed source apart from a codec failure or a half-written output.
#[derive(Debug, thiserror::Error)]
pub enum SubforgeError {
    #[error("Demux error: {message}")]
    Demux { message: String },

    #[error("Codec negotiation error: {message}")]
    Negotiation { message: String },

    #[error("Codec error: {message}")]
    Codec { message: String },

    #[error("Mux error: {message}")]
    Mux { message: String },

    #[error("Finalization error: {message}")]
    Finalize { message: String },

    #[error("Font loading error: {message}")]
    FontLoad { message: String },

    #[error("Render error: {message}")]
    Render { message: String },

    #[error("Cue error: {message}")]
    Cue { message: String },

    #[error("Configuration error: {message}")]
    Config { message: String },

    #[error("File not found: {path}")]
    FileNotFound { path: PathBuf },

    #[error("Unsupported operation: {message}")]
    Unsupported { message: String },

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

/// Result type alias using SubforgeError.
pub type SubforgeResult<T> = Result<T, SubforgeError>;

impl SubforgeError {
    pub fn demux(msg: impl Into<String>) -> Self {
        Self::Demux {
            message: msg.into(),
        }
    }

    pub fn negotiation(msg: impl Into<String>) -> Self {
        Self::Negotiation {
            message: msg.into(),
        }
    }

    pub fn codec(msg: impl Into<String>) -> Self {
        Self::Codec {
            message: msg.into(),
        }
    }

    pub fn mux(msg: impl Into<String>) -> Self {
        Self::Mux {
            message: msg.into(),
        }
    }

    pub fn finalize(msg: impl Into<String>) -> Self {
        Self::Finalize {
            message: msg.into(),
        }
    }

    pub fn font_load(msg: impl Into<String>) -> Self {
        Self::FontLoad {
            message: msg.into(),
        }
    }

    pub fn render(msg: impl Into<String>) -> Self {
        Self::Render {
            message: msg.into(),
        }
    }

    pub fn cue(msg: impl Into<String>) -> Self {
        Self::Cue {
            message: msg.into(),
        }
    }

    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config {
            message: msg.into(),
        }
    }

    pub fn unsupported(msg: impl Into<String>) -> Self {
        Self::Unsupported {
            message: msg.into(),
        }
    }

    /// Short name of the stage that produced this error.
    pub fn stage(&self) -> &'static str {
        match self {
            Self::Demux { .. } => "demux",
            Self::Negotiation { .. } => "negotiate",
            Self::Codec { .. } => "codec",
            Self::Mux { .. } => "mux",
            Self::Finalize { .. } => "finalize",
            Self::FontLoad { .. } => "fonts",
            Self::Render { .. } => "render",
            Self::Cue { .. } => "cues",
            Self::Config { .. } => "config",
            Self::FileNotFound { .. } | Self::Io(_) => "io",
            Self::Unsupported { .. } => "unsupported",
            Self::Json(_) => "json",
            Self::Other(_) => "other",
        }
    }

    /// Whether the output sink may hold a partially written file.
    pub fn may_leave_partial_output(&self) -> bool {
        matches!(self, Self::Finalize { .. } | Self::Mux { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stage_names() {
        assert_eq!(SubforgeError::demux("bad moov").stage(), "demux");
        assert_eq!(SubforgeError::finalize("close failed").stage(), "finalize");
        assert_eq!(SubforgeError::font_load("missing").stage(), "fonts");
    }

    #[test]
    fn test_partial_output_flag() {
        assert!(SubforgeError::finalize("x").may_leave_partial_output());
        assert!(!SubforgeError::codec("x").may_leave_partial_output());
    }

    #[test]
    fn test_display_includes_message() {
        let err = SubforgeError::negotiation("resolution not supported");
        assert_eq!(
            err.to_string(),
            "Codec negotiation error: resolution not supported"
        );
    }
}

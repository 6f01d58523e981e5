//! Text encoding of sessions

use std::path::{Path, PathBuf};

use crate::model::Session;
use crate::{Result, TraceError};

/// Extension used for session files
pub const SESSION_FILE_EXTENSION: &str = "json";

/// Session file path, with the session extension added when `path` has none
#[must_use]
pub fn session_path(path: &Path) -> PathBuf {
    if path.extension().is_some() {
        path.to_path_buf()
    } else {
        path.with_extension(SESSION_FILE_EXTENSION)
    }
}

/// Encode a session
///
/// # Errors
///
/// Returns error if a custom payload cannot be represented as JSON
pub fn to_string(session: &Session) -> Result<String> {
    serde_json::to_string_pretty(session)
        .map_err(|e| TraceError::Validation(format!("Failed to encode session: {e}")))
}

/// Decode a session
///
/// # Errors
///
/// Returns [`TraceError::Deserialization`] if the document is not a session
pub fn from_str(text: &str) -> Result<Session> {
    if text.trim().is_empty() {
        return Err(TraceError::Deserialization(
            "session document is empty".to_string(),
        ));
    }
    Ok(serde_json::from_str(text)?)
}

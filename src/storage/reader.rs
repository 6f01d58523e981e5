//! Session file reader

use std::fs;
use std::path::Path;

use tracing::debug;

use crate::model::Session;
use crate::{Result, TraceError};

use super::format::from_str;

/// Read a session from `path`
///
/// # Errors
///
/// Returns [`TraceError::Io`] if the file cannot be read and
/// [`TraceError::Deserialization`] if it is not a session document
pub fn load(path: &Path) -> Result<Session> {
    let text = fs::read_to_string(path)?;
    let session = from_str(&text).map_err(|e| match e {
        TraceError::Deserialization(msg) => {
            TraceError::Deserialization(format!("{}: {msg}", path.display()))
        }
        other => other,
    })?;

    debug!(
        "Read session {} ({} entries) from {}",
        session.id,
        session.entries.len(),
        path.display()
    );
    Ok(session)
}

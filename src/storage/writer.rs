//! Session file writer

use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::Path;

use tracing::{debug, warn};

use crate::model::Session;
use crate::Result;

use super::format::to_string;

/// Write a session to `path`, replacing any existing file
///
/// The document is written to a sibling temporary file first and renamed
/// into place, so a failed save never leaves a truncated session behind.
///
/// # Errors
///
/// Returns error if encoding fails or the file cannot be written
pub fn save(session: &Session, path: &Path) -> Result<()> {
    let text = to_string(session)?;

    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent)?;
    }

    let tmp_path = path.with_extension("tmp");
    if let Err(e) = write_and_rename(&tmp_path, path, &text) {
        if let Err(cleanup) = fs::remove_file(&tmp_path) {
            if cleanup.kind() != std::io::ErrorKind::NotFound {
                warn!(
                    "Failed to remove temporary file {}: {}",
                    tmp_path.display(),
                    cleanup
                );
            }
        }
        return Err(e.into());
    }

    debug!(
        "Wrote session {} ({} entries, {} bytes) to {}",
        session.id,
        session.entries.len(),
        text.len(),
        path.display()
    );
    Ok(())
}

fn write_and_rename(tmp_path: &Path, path: &Path, text: &str) -> std::io::Result<()> {
    let mut file = OpenOptions::new()
        .write(true)
        .create(true)
        .truncate(true)
        .open(tmp_path)?;
    file.write_all(text.as_bytes())?;
    file.sync_all()?;
    drop(file);
    fs::rename(tmp_path, path)
}

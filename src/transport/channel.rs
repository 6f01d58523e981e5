//! Channel name to socket address mapping

use std::path::PathBuf;

/// Socket file suffix
const SOCKET_EXTENSION: &str = "sock";

/// Socket path for a channel name
///
/// Plain names live in the system temporary directory. A name containing
/// `/` is taken as a path as is, which lets tests and side-by-side
/// deployments pick their own location.
#[must_use]
pub fn socket_path(channel: &str) -> PathBuf {
    if channel.contains('/') {
        PathBuf::from(channel)
    } else {
        std::env::temp_dir().join(format!("{channel}.{SOCKET_EXTENSION}"))
    }
}

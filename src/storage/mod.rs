//! Session store: self-describing text encoding of recorded sessions
//!
//! A session file is a pretty-printed JSON document. Top-level fields are
//! the session metadata; `entries` is the ordered entry array, each entry
//! carrying a `kind` discriminator used for polymorphic decoding. Unknown
//! fields are ignored and missing optional fields take their defaults, so
//! files written by newer builds still load.

mod format;
mod reader;
mod writer;

pub use format::{from_str, session_path, to_string, SESSION_FILE_EXTENSION};
pub use reader::load;
pub use writer::save;

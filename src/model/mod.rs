//! Captured entries and the sessions that hold them

mod entry;
mod session;

pub use entry::{
    ControlIdentity, CustomPayload, Entry, EntryKind, EntryPayload, HttpPayload,
    InteractionAction, InteractionPayload,
};
pub use session::{Session, TargetDescriptor};

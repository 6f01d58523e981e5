//! Point-to-point channel between an instrumented process and a collector
//!
//! Messages travel as newline-delimited JSON over a Unix-domain socket.
//! Each line is a [`TransportMessage`] whose `type` field selects the
//! payload decoder; `event` payloads nest a kind-tagged [`Entry`].
//!
//! [`Entry`]: crate::model::Entry

mod channel;
mod client;
mod message;
mod relay;
mod server;

pub use channel::socket_path;
pub use client::TransportClient;
pub use message::{
    CommandPayload, ErrorPayload, EventPayload, MessageBody, StatusPayload, TransportMessage,
};
pub use relay::Relay;
pub use server::{ServerEvent, TransportServer};

//! Outgoing-request interception
//!
//! Wraps the application's HTTP call path so that every call produces a
//! request entry and a response entry sharing one pair id.

pub mod capture;
mod client;
mod interceptor;

pub use client::{build_request, RecordingClient};
pub use interceptor::Interceptor;

//! Tracewire - capture, correlate and relay application activity
//!
//! UI interactions and outgoing HTTP calls are funnelled through one
//! [`recording::Coordinator`], which orders and correlates them, and are
//! streamed to an out-of-process collector over a local transport.

#![deny(unsafe_op_in_unsafe_fn)]
#![warn(missing_docs, clippy::all, clippy::pedantic, clippy::cargo)]
#![allow(
    clippy::module_name_repetitions,
    clippy::must_use_candidate,
    clippy::cast_possible_truncation,
    clippy::cast_precision_loss,
    clippy::field_reassign_with_default,
    clippy::multiple_crate_versions
)]

pub mod collector;
pub mod config;
pub mod error;
pub mod intercept;
pub mod model;
pub mod recording;
pub mod storage;
pub mod transport;

pub use error::{Result, TraceError};

//! Composition root for the Tether offline stack.
//!
//! [`OfflineContext`] wires the connectivity monitor, retrying request
//! executor, durable operation queue, sync engine and telemetry batcher
//! into one explicitly constructed object, and exposes `submit()` as
//! the single entry point for remote operations.

pub mod context;

pub use context::{ContextBuilder, OfflineContext, Outcome};

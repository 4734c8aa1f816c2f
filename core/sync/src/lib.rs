//! Durable offline queueing and replay for the Tether stack.
//!
//! This crate provides:
//! - The durable operation queue that persists deferred work
//! - The sync engine that drains it when connectivity returns
//! - Optimistic result synthesis for queued mutations
//! - The telemetry event batcher with bounded offline fallback

pub mod batcher;
pub mod engine;
pub mod optimistic;
pub mod queue;

#[cfg(test)]
mod testutil;

pub use batcher::{
    EventBatch, EventBatcher, FlushOutcome, TelemetryEvent, DEFAULT_TELEMETRY_TARGET,
};
pub use engine::{DrainReport, SyncEngine};
pub use optimistic::{synthesize, OptimisticResponse, PENDING_MARKER};
pub use queue::{OperationQueue, Priority, Status, WorkItem, WorkKind};

//! Common types shared across the Tether offline layer.
//!
//! This crate provides the error taxonomy and runtime configuration used
//! by every other component, ensuring callers see one consistent surface.

pub mod config;
pub mod error;

pub use config::OfflineConfig;
pub use error::{ApiError, ErrorCode, Result};

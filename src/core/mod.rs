//! Core types shared across varia
//!
//! This module holds the error taxonomy used by every stage of variant resolution
//! and rendering. See [`error`] for the full list of failure modes.

pub mod error;

pub use error::{ConfigProblem, ErrorContext, VariaError, user_friendly_error};

/// Result alias used by the rendering engine.
pub type Result<T> = std::result::Result<T, VariaError>;

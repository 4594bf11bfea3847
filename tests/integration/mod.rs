//! Integration test suite for Varia
//!
//! End-to-end tests of recipe rendering, through the library and through the
//! `varia` binary.
//!
//! # Running Integration Tests
//!
//! ```bash
//! cargo test --test integration
//! ```
//!
//! # Test Organization
//!
//! - **scenarios**: Reference scenarios of variant reduction
//! - **outputs**: Multi-output recipes
//! - **best_effort**: Failure handling and best-effort mode
//! - **determinism**: Ordering, idempotence and parallel/serial agreement
//! - **config_discovery**: Layering of variant config files
//! - **cli**: The `render`, `variants` and `validate` commands

#[path = "../common/mod.rs"]
mod common;

mod best_effort;
mod cli;
mod config_discovery;
mod determinism;
mod outputs;
mod scenarios;

//! # Tadbir Support
//!
//! Shared utilities for the Tadbir runtime.
//!
//! This crate provides:
//! - Text rendering for error messages and dependency graphs
//! - A `tracing` subscriber bootstrap for binaries and tests

pub mod logging;
pub mod rendering;

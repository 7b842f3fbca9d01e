//! Core types and error definitions for Forage.
//!
//! This crate provides the foundational types shared across all Forage crates.
//!
//! # Main types
//!
//! - [`ForageError`]: Unified error enum for all Forage subsystems.
//! - [`ForageResult`]: Convenience alias for `Result<T, ForageError>`.
//! - [`LaunchSpec`]: How to spawn one child capability-server.
//! - [`ToolDescriptor`]: A capability as advertised in an MCP catalog.
//! - [`SearchResult`] / [`Source`]: The uniform discovery hit shape.

mod error;
mod launch;
mod search;
mod tool;

pub use error::{ForageError, ForageResult};
pub use launch::LaunchSpec;
pub use search::{SearchResult, Source};
pub use tool::{error_result, json_result, text_result, ToolDescriptor};

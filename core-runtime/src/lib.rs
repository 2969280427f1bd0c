//! # Core Runtime Module
//!
//! Shared runtime infrastructure for the photo sync core:
//! - Configuration builder with fail-fast validation
//! - Logging and tracing setup
//! - Async event bus for task-based consumers
//! - Synchronous observer registries for in-process callbacks
//!
//! Every other core crate depends on this one for its ambient concerns; it
//! depends only on `bridge-traits`.

pub mod config;
pub mod error;
pub mod events;
pub mod logging;
pub mod signals;

pub use error::{Error, Result};

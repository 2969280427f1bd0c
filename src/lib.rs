//! Workspace placeholder crate.
//!
//! This crate exists to expose shared feature flags that map to the individual
//! workspace crates (e.g., `core-service`, `core-sync`, `core-cache`).
//! Host applications can depend on `photo-vault-workspace` and enable the
//! documented features without needing to wire each crate individually.

#[cfg(any(feature = "desktop-shims", feature = "preview-prefetch"))]
pub use core_service::{CoreError, PhotoVaultService};

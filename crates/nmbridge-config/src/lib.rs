//! Configuration types and loaders for nmbridge.
//!
//! This crate owns the on-disk configuration schema so the proxy runtime, the
//! tool wrappers, and the binary share a single source of truth.

pub mod bridge;

pub use bridge::{config_path, BridgeConfig, PluginSection, SessionSection, ToolsSection};

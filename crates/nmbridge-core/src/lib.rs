//! Shared infrastructure for nmbridge binaries: the logging subsystem and
//! platform directory lookup.

pub mod logging;

pub use logging::{init as init_logging, log_dir, LogOptions};

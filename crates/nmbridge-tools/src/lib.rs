//! Wrappers over the CryptoPro `certmgr` and `csptest` command-line tools.
//!
//! Both tools print human-readable reports; the operations here run them
//! with fixed argument lists and scrape status markers, thumbprints, and
//! container names out of the text.

pub mod error;
pub mod manager;
pub mod runner;
pub mod scrape;

pub use error::{Result, ToolError};
pub use manager::{CertManager, Container, InstallPfxResult};
pub use runner::{Tool, ToolExec, ToolOutput, ToolRunner};


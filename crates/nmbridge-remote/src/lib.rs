//! Remote object proxy for the nmcades browser plugin host.
//!
//! The plugin runs as a child process speaking length-prefixed JSON over its
//! standard streams. This crate owns that channel, the per-session counters,
//! the callback handshake the plugin interleaves with replies, and typed
//! views over the CAdESCOM objects it exposes.

pub mod callback;
pub mod error;
pub mod extract;
pub mod objects;
pub mod protocol;
pub mod proxy;
pub mod session;
pub mod transport;

#[cfg(test)]
mod testing;

pub use error::{BridgeError, Result};
pub use extract::{Extraction, Field, Partial};
pub use protocol::{Param, ResponseData};
pub use proxy::Handle;
pub use session::{Session, SessionOptions};
pub use transport::{ByteOrder, Canceller, Transport};

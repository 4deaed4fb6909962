//! Best-effort assembly of a value from many independent remote reads.
//!
//! The first failing read is kept; every read after it is skipped without
//! touching the plugin. Whatever was read before the failure is still
//! returned alongside the error.

use crate::error::{BridgeError, Result};

/// Outcome of one read within an [`Extraction`].
#[derive(Debug, Clone, PartialEq)]
pub enum Field<T> {
    Read(T),
    /// This read produced the extraction's error.
    Failed,
    /// An earlier read failed, so this one never ran.
    Skipped,
}

impl<T> Field<T> {
    pub fn ok(self) -> Option<T> {
        match self {
            Field::Read(value) => Some(value),
            Field::Failed | Field::Skipped => None,
        }
    }

    pub fn is_read(&self) -> bool {
        matches!(self, Field::Read(_))
    }
}

impl<T: Default> Field<T> {
    /// The value read, or `T::default()`.
    pub fn value(self) -> T {
        self.ok().unwrap_or_default()
    }
}

/// Accumulates the first error of a sequence of reads.
#[derive(Debug, Default)]
pub struct Extraction {
    error: Option<BridgeError>,
}

impl Extraction {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn field<T>(&mut self, read: impl FnOnce() -> Result<T>) -> Field<T> {
        if self.error.is_some() {
            return Field::Skipped;
        }

        match read() {
            Ok(value) => Field::Read(value),
            Err(err) => {
                self.error = Some(err);
                Field::Failed
            }
        }
    }

    pub fn has_failed(&self) -> bool {
        self.error.is_some()
    }

    pub fn error(&self) -> Option<&BridgeError> {
        self.error.as_ref()
    }

    pub fn finish<T>(self, value: T) -> Partial<T> {
        Partial {
            value,
            error: self.error,
        }
    }
}

/// A possibly incomplete value and the first error met while building it.
#[derive(Debug)]
pub struct Partial<T> {
    pub value: T,
    pub error: Option<BridgeError>,
}

impl<T> Partial<T> {
    pub fn is_complete(&self) -> bool {
        self.error.is_none()
    }

    /// Discard the partial value if anything failed.
    pub fn into_result(self) -> Result<T> {
        match self.error {
            Some(err) => Err(err),
            None => Ok(self.value),
        }
    }
}

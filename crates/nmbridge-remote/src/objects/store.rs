use std::ops::BitOr;

use super::{remote_object, Certificates, RemoteObject};
use crate::error::Result;
use crate::protocol::Param;
use crate::session::Session;

/// Name of the personal certificate store.
pub const MY_STORE: &str = "My";

remote_object!(
    /// `CAdESCOM.Store`: a certificate store.
    Store
);

/// Where a store lives.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum StoreLocation {
    Memory = 0,
    LocalMachine = 1,
    CurrentUser = 2,
    ActiveDirectoryUser = 3,
    SmartCardUser = 4,
}

impl TryFrom<u8> for StoreLocation {
    type Error = u8;

    fn try_from(value: u8) -> std::result::Result<Self, Self::Error> {
        Ok(match value {
            0 => Self::Memory,
            1 => Self::LocalMachine,
            2 => Self::CurrentUser,
            3 => Self::ActiveDirectoryUser,
            4 => Self::SmartCardUser,
            other => return Err(other),
        })
    }
}

/// Store open flags; combine with `|`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct OpenMode(pub u32);

impl OpenMode {
    pub const READ_ONLY: Self = Self(0);
    pub const READ_WRITE: Self = Self(1);
    pub const MAXIMUM_ALLOWED: Self = Self(2);
    pub const EXISTING_ONLY: Self = Self(128);
    pub const INCLUDE_ARCHIVED: Self = Self(256);

    pub fn bits(self) -> u32 {
        self.0
    }
}

impl BitOr for OpenMode {
    type Output = Self;

    fn bitor(self, rhs: Self) -> Self {
        Self(self.0 | rhs.0)
    }
}

impl Store {
    pub const PROG_ID: &'static str = "CAdESCOM.Store";

    pub fn create(session: &Session) -> Result<Self> {
        session.create_object(Self::PROG_ID).map(Self::from_handle)
    }

    pub fn open(&self, location: StoreLocation, name: &str, mode: OpenMode) -> Result<()> {
        self.handle.call_void_method(
            "Open",
            vec![
                Param::from(location as u8),
                Param::from(name),
                Param::from(mode.bits()),
            ],
        )
    }

    pub fn close(&self) -> Result<()> {
        self.handle.call_void_method("Close", Vec::new())
    }

    pub fn certificates(&self) -> Result<Certificates> {
        self.handle
            .get_object_property("Certificates")
            .map(Certificates::from_handle)
    }
}

use std::any::Any;

use super::{remote_object, Certificate, RemoteObject};
use crate::error::Result;
use crate::protocol::{arguments_to_params, Param};

remote_object!(
    /// A certificate collection.
    Certificates
);

/// Search criteria kinds accepted by [`Certificates::find`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum FindType {
    Sha1Hash = 0,
    SubjectName = 1,
    IssuerName = 2,
    RootName = 3,
    TemplateName = 4,
    Extension = 5,
    ExtendedProperty = 6,
    ApplicationPolicy = 7,
    CertificatePolicy = 8,
    TimeValid = 9,
    TimeNotYetValid = 10,
    TimeExpired = 11,
    KeyUsage = 12,
}

impl Certificates {
    pub fn count(&self) -> Result<u16> {
        self.handle.get_property("Count")
    }

    /// Certificate at a 1-based position.
    pub fn item(&self, index: u16) -> Result<Certificate> {
        self.handle
            .call_object_method("Item", vec![Param::from(index)])
            .map(Certificate::from_handle)
    }

    /// Filtered sub-collection. `criteria` may be a string, a date, or a
    /// number depending on `find_type`.
    pub fn find(&self, find_type: FindType, criteria: &dyn Any, valid_only: bool) -> Result<Self> {
        let kind = find_type as u8;
        let params = arguments_to_params(3, &[&kind, criteria, &valid_only])?;
        self.handle
            .call_object_method("Find", params)
            .map(Self::from_handle)
    }

    /// Every certificate in the collection, in order.
    pub fn items(&self) -> Result<Vec<Certificate>> {
        (1..=self.count()?).map(|index| self.item(index)).collect()
    }
}

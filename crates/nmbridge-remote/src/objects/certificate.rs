use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::debug;

use super::{remote_object, PrivateKey, RemoteObject};
use crate::error::{BridgeError, Result};
use crate::extract::{Extraction, Field, Partial};
use crate::protocol::{format_utc, parse_utc};

remote_object!(
    /// An X.509 certificate held by the plugin.
    Certificate
);

/// Flat, serializable snapshot of a certificate.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CertificateExport {
    pub valid: ValidityExport,
    pub issuer: String,
    pub subject: String,
    pub thumbprint: String,
    pub serial_number: String,
    pub has_private_key: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub private_key: Option<PrivateKeyExport>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ValidityExport {
    pub from: String,
    pub to: String,
    pub expired: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PrivateKeyExport {
    pub provider_name: String,
    pub container_name: String,
    pub unique_container_name: String,
}

impl Certificate {
    pub fn has_private_key(&self) -> Result<bool> {
        self.handle.call_typed("HasPrivateKey", Vec::new())
    }

    pub fn private_key(&self) -> Result<PrivateKey> {
        self.handle
            .get_object_property("PrivateKey")
            .map(PrivateKey::from_handle)
    }

    pub fn thumbprint(&self) -> Result<String> {
        self.handle.get_property("Thumbprint")
    }

    pub fn version(&self) -> Result<i32> {
        self.handle.get_property("Version")
    }

    pub fn subject_name(&self) -> Result<String> {
        self.handle.get_property("SubjectName")
    }

    pub fn issuer_name(&self) -> Result<String> {
        self.handle.get_property("IssuerName")
    }

    pub fn serial_number(&self) -> Result<String> {
        self.handle.get_property("SerialNumber")
    }

    pub fn valid_from_date(&self) -> Result<DateTime<Utc>> {
        parse_utc(&self.handle.get_property::<String>("ValidFromDate")?)
    }

    pub fn valid_to_date(&self) -> Result<DateTime<Utc>> {
        parse_utc(&self.handle.get_property::<String>("ValidToDate")?)
    }

    pub fn is_expired(&self) -> Result<bool> {
        Ok(Utc::now() > self.valid_to_date()?)
    }

    /// Read every exported field, stopping at the first failure.
    ///
    /// The returned value holds whatever was read before the failure.
    pub fn to_export(&self) -> Partial<CertificateExport> {
        let mut extraction = Extraction::new();

        let from = extraction.field(|| self.valid_from_date());
        let to = extraction.field(|| self.valid_to_date());
        let expired = match &to {
            Field::Read(date) => Utc::now() > *date,
            Field::Failed | Field::Skipped => false,
        };

        let issuer = extraction.field(|| self.issuer_name());
        let subject = extraction.field(|| self.subject_name());
        let thumbprint = extraction.field(|| self.thumbprint());
        let serial_number = extraction.field(|| self.serial_number());
        let has_private_key = extraction.field(|| self.has_private_key()).value();

        let private_key = if has_private_key {
            extraction
                .field(|| self.private_key())
                .ok()
                .map(|key| PrivateKeyExport {
                    provider_name: extraction.field(|| key.provider_name()).value(),
                    container_name: extraction.field(|| key.container_name()).value(),
                    unique_container_name: extraction
                        .field(|| key.unique_container_name())
                        .value(),
                })
        } else {
            None
        };

        let export = CertificateExport {
            valid: ValidityExport {
                from: from.ok().map(|date| format_utc(&date)).unwrap_or_default(),
                to: to.ok().map(|date| format_utc(&date)).unwrap_or_default(),
                expired,
            },
            issuer: issuer.value(),
            subject: subject.value(),
            thumbprint: thumbprint.value(),
            serial_number: serial_number.value(),
            has_private_key,
            private_key,
        };

        if let Some(err) = extraction.error() {
            debug!(handle = self.id(), error = %err, "certificate export incomplete");
        }
        extraction.finish(export)
    }

    /// Export as JSON; fails if any field could not be read.
    pub fn to_json(&self) -> Result<String> {
        let export = self.to_export().into_result()?;
        serde_json::to_string(&export).map_err(BridgeError::Encode)
    }
}

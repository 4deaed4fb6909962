use std::fmt;

use semver::VersionReq;
use tracing::info;

use super::{remote_object, RemoteObject};
use crate::error::{BridgeError, Result};
use crate::session::Session;

remote_object!(
    /// `CAdESCOM.About`: plugin and CSP version information.
    About
);

remote_object!(
    /// A version object returned by [`About`].
    Version
);

impl About {
    pub const PROG_ID: &'static str = "CAdESCOM.About";

    pub fn create(session: &Session) -> Result<Self> {
        session.create_object(Self::PROG_ID).map(Self::from_handle)
    }

    pub fn major_version(&self) -> Result<u32> {
        self.handle.get_property("MajorVersion")
    }

    pub fn minor_version(&self) -> Result<u32> {
        self.handle.get_property("MinorVersion")
    }

    pub fn build_version(&self) -> Result<u32> {
        self.handle.get_property("BuildVersion")
    }

    pub fn version(&self) -> Result<String> {
        self.handle.get_property("Version")
    }

    pub fn plugin_version(&self) -> Result<Version> {
        self.handle
            .get_object_property("PluginVersion")
            .map(Version::from_handle)
    }

    pub fn csp_version(&self) -> Result<Version> {
        self.handle
            .call_object_method("CSPVersion", Vec::new())
            .map(Version::from_handle)
    }
}

impl Version {
    pub fn major_version(&self) -> Result<u32> {
        self.handle.get_property("MajorVersion")
    }

    pub fn minor_version(&self) -> Result<u32> {
        self.handle.get_property("MinorVersion")
    }

    pub fn build_version(&self) -> Result<u32> {
        self.handle.get_property("BuildVersion")
    }

    /// The plugin's own rendering of the version (remote `toString`).
    pub fn to_string(&self) -> Result<String> {
        self.handle.call_typed("toString", Vec::new())
    }

    /// Read all three components.
    pub fn triple(&self) -> Result<VersionTriple> {
        Ok(VersionTriple {
            major: self.major_version()?,
            minor: self.minor_version()?,
            build: self.build_version()?,
        })
    }
}

/// Major, minor, and build numbers of a plugin or CSP version.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct VersionTriple {
    pub major: u32,
    pub minor: u32,
    pub build: u32,
}

impl VersionTriple {
    pub fn to_semver(self) -> semver::Version {
        semver::Version::new(
            u64::from(self.major),
            u64::from(self.minor),
            u64::from(self.build),
        )
    }

    pub fn satisfies(self, requirement: &VersionReq) -> bool {
        requirement.matches(&self.to_semver())
    }
}

impl fmt::Display for VersionTriple {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}.{}", self.major, self.minor, self.build)
    }
}

/// Version of the browser plugin itself.
pub fn plugin_version(session: &Session) -> Result<VersionTriple> {
    About::create(session)?.plugin_version()?.triple()
}

/// Version of the cryptographic service provider behind the plugin.
pub fn csp_version(session: &Session) -> Result<VersionTriple> {
    About::create(session)?.csp_version()?.triple()
}

/// Read the plugin version and require it to satisfy `requirement`.
pub fn check_plugin_version(session: &Session, requirement: &VersionReq) -> Result<VersionTriple> {
    let version = plugin_version(session)?;
    if !version.satisfies(requirement) {
        return Err(BridgeError::IncompatiblePlugin {
            version: version.to_string(),
            required: requirement.to_string(),
        });
    }
    info!(%version, %requirement, "plugin version accepted");
    Ok(version)
}

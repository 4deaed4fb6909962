use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{bail, Context, Result};
use semver::VersionReq;
use serde::{Deserialize, Serialize};

/// Default `tabid` sent with every envelope.
pub const DEFAULT_TAB_ID: &str = "CadesAgent";
/// Default logical destination of plugin requests.
pub const DEFAULT_DESTINATION: &str = "nmcades";
/// Default local endpoint identity announced during init and callbacks.
pub const DEFAULT_CALLBACK_URL: &str = "http://localhost:42217/cades";

/// Bridge configuration loaded from `config.toml`.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct BridgeConfig {
    pub plugin: PluginSection,
    pub session: SessionSection,
    pub tools: ToolsSection,
}

/// Plugin process startup metadata.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct PluginSection {
    pub executable: Option<PathBuf>,
    pub args: Vec<String>,
    /// Semver requirement the plugin's reported version must satisfy.
    pub min_version: Option<String>,
}

/// Per-session protocol settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct SessionSection {
    pub tab_id: String,
    pub destination: String,
    pub callback_url: String,
    pub response_timeout_ms: u64,
    pub max_callback_rounds: u32,
    pub max_frame_bytes: usize,
}

impl Default for SessionSection {
    fn default() -> Self {
        Self {
            tab_id: DEFAULT_TAB_ID.to_string(),
            destination: DEFAULT_DESTINATION.to_string(),
            callback_url: DEFAULT_CALLBACK_URL.to_string(),
            response_timeout_ms: 30_000,
            max_callback_rounds: 16,
            max_frame_bytes: 16 * 1024 * 1024,
        }
    }
}

/// Paths and flags for the certificate/key administration executables.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ToolsSection {
    pub certmgr: Option<PathBuf>,
    pub csptest: Option<PathBuf>,
    /// Decode tool output from code page 866 before matching.
    pub decode_cp866: bool,
    /// Drop `-silent` from argument lists (legacy hosts reject it).
    pub strip_silent: bool,
}

impl Default for ToolsSection {
    fn default() -> Self {
        Self {
            certmgr: None,
            csptest: None,
            decode_cp866: cfg!(windows),
            strip_silent: false,
        }
    }
}

impl BridgeConfig {
    /// Parse and validate config TOML.
    pub fn from_toml_str(input: &str) -> Result<Self> {
        let config: Self = toml::from_str(input).context("failed to parse nmbridge config TOML")?;
        config.validate()?;
        Ok(config)
    }

    /// Load and validate a config file from disk.
    pub fn from_path(path: &Path) -> Result<Self> {
        let raw = fs::read_to_string(path)
            .with_context(|| format!("failed to read nmbridge config at {}", path.display()))?;

        Self::from_toml_str(&raw)
            .with_context(|| format!("invalid nmbridge config at {}", path.display()))
    }

    /// Load an explicit config path, or the default location when it exists.
    ///
    /// Falls back to built-in defaults when no file is present.
    pub fn load(explicit: Option<&Path>) -> Result<Self> {
        if let Some(path) = explicit {
            return Self::from_path(path);
        }

        let path = config_path();
        if path.is_file() {
            Self::from_path(&path)
        } else {
            Ok(Self::default())
        }
    }

    /// Validate required fields and semantic constraints.
    pub fn validate(&self) -> Result<()> {
        if let Some(executable) = &self.plugin.executable {
            validate_path("plugin.executable", executable)?;
        }
        validate_args(&self.plugin.args)?;
        if let Some(requirement) = &self.plugin.min_version {
            VersionReq::parse(requirement).with_context(|| {
                format!("plugin.min_version must be a valid semver requirement: {requirement}")
            })?;
        }

        validate_nonempty("session.tab_id", &self.session.tab_id)?;
        validate_nonempty("session.destination", &self.session.destination)?;
        validate_nonempty("session.callback_url", &self.session.callback_url)?;
        if self.session.response_timeout_ms == 0 {
            bail!("session.response_timeout_ms must be greater than zero");
        }
        if self.session.max_callback_rounds == 0 {
            bail!("session.max_callback_rounds must be greater than zero");
        }
        if self.session.max_frame_bytes == 0 {
            bail!("session.max_frame_bytes must be greater than zero");
        }

        if let Some(certmgr) = &self.tools.certmgr {
            validate_path("tools.certmgr", certmgr)?;
        }
        if let Some(csptest) = &self.tools.csptest {
            validate_path("tools.csptest", csptest)?;
        }

        Ok(())
    }

    /// Plugin executable, or an error naming the missing setting.
    pub fn plugin_executable(&self) -> Result<&Path> {
        match &self.plugin.executable {
            Some(path) => Ok(path),
            None => bail!("plugin.executable is not configured"),
        }
    }

    /// Parsed `plugin.min_version` requirement, if one is configured.
    pub fn min_plugin_version(&self) -> Result<Option<VersionReq>> {
        self.plugin
            .min_version
            .as_deref()
            .map(|requirement| {
                VersionReq::parse(requirement).with_context(|| {
                    format!("plugin.min_version must be a valid semver requirement: {requirement}")
                })
            })
            .transpose()
    }
}

impl SessionSection {
    pub fn response_timeout(&self) -> Duration {
        Duration::from_millis(self.response_timeout_ms)
    }
}

/// Return the default config file path.
///
/// Precedence: `NMBRIDGE_CONFIG` env var > `<config dir>/nmbridge/config.toml`
/// > `./nmbridge.toml`.
pub fn config_path() -> PathBuf {
    if let Ok(path) = std::env::var("NMBRIDGE_CONFIG") {
        return PathBuf::from(path);
    }

    if let Some(dir) = dirs::config_dir() {
        return dir.join("nmbridge").join("config.toml");
    }

    PathBuf::from("nmbridge.toml")
}

fn validate_nonempty(field: &str, value: &str) -> Result<()> {
    if value.trim().is_empty() {
        bail!("{field} must not be empty")
    }
    Ok(())
}

fn validate_path(field: &str, path: &Path) -> Result<()> {
    if path.as_os_str().is_empty() {
        bail!("{field} must not be empty")
    }
    Ok(())
}

fn validate_args(args: &[String]) -> Result<()> {
    for arg in args {
        if arg.trim().is_empty() {
            bail!("plugin.args entries must not be empty");
        }
        if arg.trim() != arg {
            bail!("plugin.args entry {:?} has leading/trailing whitespace", arg);
        }
    }

    Ok(())
}

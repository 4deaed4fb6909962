//! Spawning the command-line tools and capturing their output.

use std::path::PathBuf;
use std::process::Command;

use encoding_rs::IBM866;
use nmbridge_config::ToolsSection;
use tracing::debug;

use crate::error::{Result, ToolError};

/// Flag dropped from argument lists on hosts that reject it.
pub const SILENT_FLAG: &str = "-silent";

/// The two external executables.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Tool {
    /// Certificate store administration.
    CertMgr,
    /// Key container administration.
    CspTest,
}

impl Tool {
    pub fn name(self) -> &'static str {
        match self {
            Tool::CertMgr => "certmgr",
            Tool::CspTest => "csptest",
        }
    }

    fn setting(self) -> &'static str {
        match self {
            Tool::CertMgr => "tools.certmgr",
            Tool::CspTest => "tools.csptest",
        }
    }
}

/// Combined stdout/stderr of one run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ToolOutput {
    pub text: String,
    pub success: bool,
    pub code: Option<i32>,
}

impl ToolOutput {
    pub fn contains(&self, needle: &str) -> bool {
        self.text.contains(needle)
    }
}

/// Runs a tool with an argument list.
pub trait ToolExec {
    fn run(&self, tool: Tool, args: &[String]) -> Result<ToolOutput>;
}

/// Runs the real executables named in configuration.
#[derive(Debug, Clone, Default)]
pub struct ToolRunner {
    certmgr: Option<PathBuf>,
    csptest: Option<PathBuf>,
    decode_cp866: bool,
    strip_silent: bool,
}

impl From<&ToolsSection> for ToolRunner {
    fn from(section: &ToolsSection) -> Self {
        Self {
            certmgr: section.certmgr.clone(),
            csptest: section.csptest.clone(),
            decode_cp866: section.decode_cp866,
            strip_silent: section.strip_silent,
        }
    }
}

impl ToolExec for ToolRunner {
    fn run(&self, tool: Tool, args: &[String]) -> Result<ToolOutput> {
        let program = match tool {
            Tool::CertMgr => self.certmgr.as_ref(),
            Tool::CspTest => self.csptest.as_ref(),
        }
        .ok_or(ToolError::NotConfigured(tool.setting()))?;

        let args = if self.strip_silent {
            strip_silent(args)
        } else {
            args.to_vec()
        };
        debug!(tool = tool.name(), program = %program.display(), ?args, "running tool");

        let output = Command::new(program)
            .args(&args)
            .output()
            .map_err(|source| ToolError::Spawn {
                tool: tool.name(),
                source,
            })?;

        let mut raw = output.stdout;
        raw.extend_from_slice(&output.stderr);

        Ok(ToolOutput {
            text: decode_output(&raw, self.decode_cp866),
            success: output.status.success(),
            code: output.status.code(),
        })
    }
}

/// Decode raw tool output, from code page 866 when `cp866` is set.
pub fn decode_output(raw: &[u8], cp866: bool) -> String {
    if cp866 {
        let (text, _, _) = IBM866.decode(raw);
        text.into_owned()
    } else {
        String::from_utf8_lossy(raw).into_owned()
    }
}

/// Argument list without any `-silent` flag.
pub fn strip_silent(args: &[String]) -> Vec<String> {
    args.iter()
        .filter(|arg| arg.as_str() != SILENT_FLAG)
        .cloned()
        .collect()
}

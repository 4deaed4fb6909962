use thiserror::Error;

use crate::manager::Container;

pub type Result<T> = std::result::Result<T, ToolError>;

/// Failures of the certificate and key container command-line tools.
#[derive(Debug, Error)]
pub enum ToolError {
    #[error("{0} is not configured")]
    NotConfigured(&'static str),

    #[error("failed to start {tool}: {source}")]
    Spawn {
        tool: &'static str,
        #[source]
        source: std::io::Error,
    },

    #[error("{tool} failed (code={code:?})")]
    Failed {
        tool: &'static str,
        code: Option<i32>,
        output: String,
    },

    #[error("container {0} not found")]
    ContainerNotFound(String),

    /// The destination already held a container; it is returned as found.
    #[error("container {} exists", .container.container_name)]
    ContainerExists { container: Container },

    #[error("container is not exportable")]
    ContainerNotExportable,

    #[error("invalid container pattern: {0}")]
    Pattern(#[from] regex::Error),
}

impl ToolError {
    /// Captured tool output, when the tool ran and failed.
    pub fn output(&self) -> Option<&str> {
        match self {
            ToolError::Failed { output, .. } => Some(output),
            _ => None,
        }
    }
}

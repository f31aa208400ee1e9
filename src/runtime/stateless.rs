use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};

use crate::config::ServerConfig;
use crate::limits::Limits;
use crate::state::Kernel;

/// Bootstraps a one-shot `Kernel` scoped to a single file's parent
/// directory, for the CLI: a process that opens one workbook and exits
/// doesn't need a workspace of its own, just the file's directory
/// allow-listed.
#[derive(Debug, Default, Clone)]
pub struct StatelessRuntime;

impl StatelessRuntime {
    pub fn normalize_existing_file(&self, path: &Path) -> Result<PathBuf> {
        fs::canonicalize(path).with_context(|| format!("'{}' does not exist", path.display()))
    }

    /// Builds a `Kernel` rooted at `file`'s parent directory and returns it
    /// alongside the absolute path string tool calls expect.
    pub fn open_kernel_for_file(&self, path: &Path, allow_write: bool) -> Result<(Arc<Kernel>, String)> {
        let absolute = self.normalize_existing_file(path)?;
        let config = self.build_cli_config(&absolute, allow_write)?;
        let kernel = Kernel::new(config);
        Ok((kernel, absolute.to_string_lossy().to_string()))
    }

    fn build_cli_config(&self, file: &Path, allow_write: bool) -> Result<ServerConfig> {
        let workspace_root = file
            .parent()
            .map(Path::to_path_buf)
            .unwrap_or_else(|| PathBuf::from("."));
        let workspace_root = fs::canonicalize(&workspace_root)
            .with_context(|| format!("workspace root '{}' does not exist", workspace_root.display()))?;

        Ok(ServerConfig {
            workspace_roots: vec![workspace_root],
            supported_extensions: vec!["xlsx".into(), "xlsm".into(), "xls".into(), "xlsb".into()],
            allow_write,
            enabled_tools: None,
            limits: Limits {
                cleanup_period: Duration::from_secs(3600),
                ..Limits::default()
            },
        })
    }
}

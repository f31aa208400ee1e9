use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result, bail, ensure};
use clap::Parser;
use serde::Deserialize;

use crate::limits::Limits;

/// Layered, immutable server configuration: CLI args override config-file
/// values, which override hardcoded defaults. Every numeric field is
/// validated strictly positive at construction time.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub workspace_roots: Vec<PathBuf>,
    pub supported_extensions: Vec<String>,
    pub allow_write: bool,
    pub enabled_tools: Option<HashSet<String>>,
    pub limits: Limits,
}

impl ServerConfig {
    pub fn from_args(args: CliArgs) -> Result<Self> {
        let CliArgs {
            config,
            workspace_roots: cli_workspace_roots,
            extensions: cli_extensions,
            allow_write: cli_allow_write,
            enabled_tools: cli_enabled_tools,
            max_concurrent_requests: cli_max_concurrent_requests,
            max_open_workbooks: cli_max_open_workbooks,
            max_payload_bytes: cli_max_payload_bytes,
            max_cells_per_op: cli_max_cells_per_op,
            preview_rows: cli_preview_rows,
            operation_timeout_ms: cli_operation_timeout_ms,
            admission_wait_ms: cli_admission_wait_ms,
            idle_ttl_secs: cli_idle_ttl_secs,
            cleanup_period_ms: cli_cleanup_period_ms,
        } = args;

        let file_config = if let Some(path) = config.as_ref() {
            load_config_file(path)?
        } else {
            PartialConfig::default()
        };

        let PartialConfig {
            workspace_roots: file_workspace_roots,
            extensions: file_extensions,
            allow_write: file_allow_write,
            enabled_tools: file_enabled_tools,
            max_concurrent_requests: file_max_concurrent_requests,
            max_open_workbooks: file_max_open_workbooks,
            max_payload_bytes: file_max_payload_bytes,
            max_cells_per_op: file_max_cells_per_op,
            preview_rows: file_preview_rows,
            operation_timeout_ms: file_operation_timeout_ms,
            admission_wait_ms: file_admission_wait_ms,
            idle_ttl_secs: file_idle_ttl_secs,
            cleanup_period_ms: file_cleanup_period_ms,
        } = file_config;

        let workspace_roots: Vec<PathBuf> = cli_workspace_roots
            .or(file_workspace_roots)
            .unwrap_or_default()
            .into_iter()
            .filter(|s| !s.trim().is_empty())
            .map(PathBuf::from)
            .collect();
        ensure!(
            !workspace_roots.is_empty(),
            "at least one workspace root must be configured"
        );

        let mut canonical_roots = Vec::with_capacity(workspace_roots.len());
        for root in workspace_roots {
            let canonical = fs::canonicalize(&root)
                .with_context(|| format!("workspace root {:?} does not exist", root))?;
            ensure!(canonical.is_dir(), "workspace root {:?} is not a directory", canonical);
            canonical_roots.push(canonical);
        }

        let supported_extensions = cli_extensions
            .or(file_extensions)
            .unwrap_or_else(|| {
                vec!["xlsx".into(), "xlsm".into(), "xls".into(), "xlsb".into()]
            })
            .into_iter()
            .map(|s| s.trim().to_ascii_lowercase())
            .filter(|s| !s.is_empty())
            .collect::<Vec<_>>();
        ensure!(!supported_extensions.is_empty(), "supported_extensions must not be empty");

        let allow_write = cli_allow_write || file_allow_write.unwrap_or(false);

        let enabled_tools = cli_enabled_tools
            .or(file_enabled_tools)
            .map(|tools| tools.into_iter().collect::<HashSet<_>>());

        let limits = Limits {
            max_concurrent_requests: cli_max_concurrent_requests
                .or(file_max_concurrent_requests)
                .unwrap_or(Limits::DEFAULT_MAX_CONCURRENT_REQUESTS),
            max_open_workbooks: cli_max_open_workbooks
                .or(file_max_open_workbooks)
                .unwrap_or(Limits::DEFAULT_MAX_OPEN_WORKBOOKS),
            max_payload_bytes: cli_max_payload_bytes
                .or(file_max_payload_bytes)
                .unwrap_or(Limits::DEFAULT_MAX_PAYLOAD_BYTES),
            max_cells_per_op: cli_max_cells_per_op
                .or(file_max_cells_per_op)
                .unwrap_or(Limits::DEFAULT_MAX_CELLS_PER_OP),
            default_preview_rows: cli_preview_rows
                .or(file_preview_rows)
                .unwrap_or(Limits::DEFAULT_PREVIEW_ROWS),
            operation_timeout: Duration::from_millis(
                cli_operation_timeout_ms
                    .or(file_operation_timeout_ms)
                    .unwrap_or(Limits::DEFAULT_OPERATION_TIMEOUT_MS),
            ),
            admission_wait: Duration::from_millis(
                cli_admission_wait_ms
                    .or(file_admission_wait_ms)
                    .unwrap_or(Limits::DEFAULT_ADMISSION_WAIT_MS),
            ),
            idle_ttl: Duration::from_secs(
                cli_idle_ttl_secs.or(file_idle_ttl_secs).unwrap_or(Limits::DEFAULT_IDLE_TTL_SECS),
            ),
            cleanup_period: Duration::from_millis(
                cli_cleanup_period_ms
                    .or(file_cleanup_period_ms)
                    .unwrap_or(Limits::DEFAULT_CLEANUP_PERIOD_MS),
            ),
        };
        limits.validate()?;

        Ok(Self {
            workspace_roots: canonical_roots,
            supported_extensions,
            allow_write,
            enabled_tools,
            limits,
        })
    }

    pub fn is_tool_enabled(&self, tool: &str) -> bool {
        match &self.enabled_tools {
            Some(set) => set.contains(tool),
            None => true,
        }
    }
}

#[derive(Parser, Debug, Default, Clone)]
#[command(name = "sheetkernel-mcp", about = "Excel workbook tool server", version)]
pub struct CliArgs {
    #[arg(long, value_name = "FILE", help = "Path to a configuration file (YAML or JSON)")]
    pub config: Option<PathBuf>,

    #[arg(
        long,
        env = "SHEETKERNEL_WORKSPACE_ROOTS",
        value_name = "DIR",
        value_delimiter = ',',
        help = "Comma-separated allow-listed root directories files may be opened from"
    )]
    pub workspace_roots: Option<Vec<String>>,

    #[arg(
        long,
        env = "SHEETKERNEL_EXTENSIONS",
        value_name = "EXT",
        value_delimiter = ',',
        help = "Comma-separated list of allowed workbook extensions (default: xlsx,xlsm,xls,xlsb)"
    )]
    pub extensions: Option<Vec<String>>,

    #[arg(
        long,
        env = "SHEETKERNEL_ALLOW_WRITE",
        help = "Enable write-range and apply-formula tools"
    )]
    pub allow_write: bool,

    #[arg(
        long,
        env = "SHEETKERNEL_ENABLED_TOOLS",
        value_name = "TOOL",
        value_delimiter = ',',
        help = "Restrict execution to the provided tool names"
    )]
    pub enabled_tools: Option<Vec<String>>,

    #[arg(
        long,
        env = "SHEETKERNEL_MAX_CONCURRENT_REQUESTS",
        value_name = "N",
        help = "Max simultaneous in-flight tool calls (default: 10)",
        value_parser = clap::value_parser!(usize)
    )]
    pub max_concurrent_requests: Option<usize>,

    #[arg(
        long,
        env = "SHEETKERNEL_MAX_OPEN_WORKBOOKS",
        value_name = "N",
        help = "Max simultaneously open workbooks (default: 4)",
        value_parser = clap::value_parser!(usize)
    )]
    pub max_open_workbooks: Option<usize>,

    #[arg(
        long,
        env = "SHEETKERNEL_MAX_PAYLOAD_BYTES",
        value_name = "BYTES",
        help = "Max response payload size in bytes (default: 131072)",
        value_parser = clap::value_parser!(usize)
    )]
    pub max_payload_bytes: Option<usize>,

    #[arg(
        long,
        env = "SHEETKERNEL_MAX_CELLS_PER_OP",
        value_name = "N",
        help = "Max cells processed per operation (default: 10000)",
        value_parser = clap::value_parser!(usize)
    )]
    pub max_cells_per_op: Option<usize>,

    #[arg(
        long,
        env = "SHEETKERNEL_PREVIEW_ROWS",
        value_name = "N",
        help = "Default preview-sheet row count (default: 10)",
        value_parser = clap::value_parser!(usize)
    )]
    pub preview_rows: Option<usize>,

    #[arg(
        long,
        env = "SHEETKERNEL_OPERATION_TIMEOUT_MS",
        value_name = "MS",
        help = "Per-call deadline in milliseconds (default: 30000)",
        value_parser = clap::value_parser!(u64)
    )]
    pub operation_timeout_ms: Option<u64>,

    #[arg(
        long,
        env = "SHEETKERNEL_ADMISSION_WAIT_MS",
        value_name = "MS",
        help = "Max wait for an admission permit before BUSY_RESOURCE (default: 2000)",
        value_parser = clap::value_parser!(u64)
    )]
    pub admission_wait_ms: Option<u64>,

    #[arg(
        long,
        env = "SHEETKERNEL_IDLE_TTL_SECS",
        value_name = "SECS",
        help = "Idle handle eviction TTL in seconds (default: 600)",
        value_parser = clap::value_parser!(u64)
    )]
    pub idle_ttl_secs: Option<u64>,

    #[arg(
        long,
        env = "SHEETKERNEL_CLEANUP_PERIOD_MS",
        value_name = "MS",
        help = "Idle-evictor tick period in milliseconds (default: 30000)",
        value_parser = clap::value_parser!(u64)
    )]
    pub cleanup_period_ms: Option<u64>,
}

#[derive(Debug, Default, Deserialize)]
struct PartialConfig {
    workspace_roots: Option<Vec<String>>,
    extensions: Option<Vec<String>>,
    allow_write: Option<bool>,
    enabled_tools: Option<Vec<String>>,
    max_concurrent_requests: Option<usize>,
    max_open_workbooks: Option<usize>,
    max_payload_bytes: Option<usize>,
    max_cells_per_op: Option<usize>,
    preview_rows: Option<usize>,
    operation_timeout_ms: Option<u64>,
    admission_wait_ms: Option<u64>,
    idle_ttl_secs: Option<u64>,
    cleanup_period_ms: Option<u64>,
}

fn load_config_file(path: &Path) -> Result<PartialConfig> {
    if !path.exists() {
        bail!("config file {:?} does not exist", path);
    }
    let contents =
        fs::read_to_string(path).with_context(|| format!("failed to read config file {:?}", path))?;
    let ext = path
        .extension()
        .and_then(|os| os.to_str())
        .unwrap_or("")
        .to_ascii_lowercase();

    let parsed = match ext.as_str() {
        "yaml" | "yml" => serde_yaml::from_str(&contents)
            .with_context(|| format!("failed to parse YAML config {:?}", path))?,
        "json" => serde_json::from_str(&contents)
            .with_context(|| format!("failed to parse JSON config {:?}", path))?,
        other => bail!("unsupported config extension: {other}"),
    };
    Ok(parsed)
}

use std::time::Duration;

use anyhow::{Result, ensure};

/// Immutable snapshot of every numeric cap and duration the kernel enforces.
///
/// Initialized once at process start (`ServerConfig::into_limits`) and never
/// mutated afterward; the only process-wide mutable state is the handle
/// table (see `handles.rs`).
#[derive(Debug, Clone)]
pub struct Limits {
    pub max_concurrent_requests: usize,
    pub max_open_workbooks: usize,
    pub max_payload_bytes: usize,
    pub max_cells_per_op: usize,
    pub default_preview_rows: usize,
    pub operation_timeout: Duration,
    pub admission_wait: Duration,
    pub idle_ttl: Duration,
    pub cleanup_period: Duration,
}

impl Limits {
    pub const DEFAULT_MAX_CONCURRENT_REQUESTS: usize = 10;
    pub const DEFAULT_MAX_OPEN_WORKBOOKS: usize = 4;
    pub const DEFAULT_MAX_PAYLOAD_BYTES: usize = 128 * 1024;
    pub const DEFAULT_MAX_CELLS_PER_OP: usize = 10_000;
    pub const DEFAULT_PREVIEW_ROWS: usize = 10;
    pub const DEFAULT_OPERATION_TIMEOUT_MS: u64 = 30_000;
    pub const DEFAULT_ADMISSION_WAIT_MS: u64 = 2_000;
    pub const DEFAULT_IDLE_TTL_SECS: u64 = 600;
    pub const DEFAULT_CLEANUP_PERIOD_MS: u64 = 30_000;

    pub fn validate(&self) -> Result<()> {
        ensure!(self.max_concurrent_requests > 0, "max_concurrent_requests must be > 0");
        ensure!(self.max_open_workbooks > 0, "max_open_workbooks must be > 0");
        ensure!(self.max_payload_bytes > 0, "max_payload_bytes must be > 0");
        ensure!(self.max_cells_per_op > 0, "max_cells_per_op must be > 0");
        ensure!(self.default_preview_rows > 0, "default_preview_rows must be > 0");
        ensure!(!self.operation_timeout.is_zero(), "operation_timeout must be > 0");
        ensure!(!self.admission_wait.is_zero(), "admission_wait must be > 0");
        ensure!(!self.idle_ttl.is_zero(), "idle_ttl must be > 0");
        ensure!(!self.cleanup_period.is_zero(), "cleanup_period must be > 0");
        ensure!(
            self.admission_wait <= self.operation_timeout,
            "admission_wait must be <= operation_timeout"
        );
        Ok(())
    }
}

impl Default for Limits {
    fn default() -> Self {
        Self {
            max_concurrent_requests: Self::DEFAULT_MAX_CONCURRENT_REQUESTS,
            max_open_workbooks: Self::DEFAULT_MAX_OPEN_WORKBOOKS,
            max_payload_bytes: Self::DEFAULT_MAX_PAYLOAD_BYTES,
            max_cells_per_op: Self::DEFAULT_MAX_CELLS_PER_OP,
            default_preview_rows: Self::DEFAULT_PREVIEW_ROWS,
            operation_timeout: Duration::from_millis(Self::DEFAULT_OPERATION_TIMEOUT_MS),
            admission_wait: Duration::from_millis(Self::DEFAULT_ADMISSION_WAIT_MS),
            idle_ttl: Duration::from_secs(Self::DEFAULT_IDLE_TTL_SECS),
            cleanup_period: Duration::from_millis(Self::DEFAULT_CLEANUP_PERIOD_MS),
        }
    }
}

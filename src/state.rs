use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Result;

use crate::admission::{AdmissionController, RequestPermit};
use crate::config::ServerConfig;
use crate::errors::invalid_handle;
use crate::handles::{Handle, HandleManager};
use crate::limits::Limits;
use crate::path_guard::PathGuard;
use crate::telemetry::{CloseReason, TelemetryHooks, TracingTelemetry};

/// Assembles every core component behind one `Arc`: the single object the
/// dispatcher and the CLI both hold to run tool calls against.
pub struct Kernel {
    config: ServerConfig,
    path_guard: PathGuard,
    admission: AdmissionController,
    handles: Arc<HandleManager>,
    telemetry: Arc<dyn TelemetryHooks>,
    evictor: tokio::task::JoinHandle<()>,
}

impl Kernel {
    pub fn new(config: ServerConfig) -> Arc<Self> {
        Self::with_telemetry(config, Arc::new(TracingTelemetry))
    }

    pub fn with_telemetry(config: ServerConfig, telemetry: Arc<dyn TelemetryHooks>) -> Arc<Self> {
        let path_guard = PathGuard::new(config.workspace_roots.clone(), config.supported_extensions.clone());
        let admission = AdmissionController::new(
            config.limits.max_concurrent_requests,
            config.limits.max_open_workbooks,
            config.limits.admission_wait,
        );
        let handles = HandleManager::new(config.limits.idle_ttl);
        let evictor = handles.spawn_evictor(config.limits.cleanup_period);

        Arc::new(Self {
            config,
            path_guard,
            admission,
            handles,
            telemetry,
            evictor,
        })
    }

    pub fn limits(&self) -> &Limits {
        &self.config.limits
    }

    pub fn allow_write(&self) -> bool {
        self.config.allow_write
    }

    pub fn is_tool_enabled(&self, tool: &str) -> bool {
        self.config.is_tool_enabled(tool)
    }

    pub async fn acquire_request(&self) -> Result<RequestPermit<'_>> {
        self.admission.acquire_request().await
    }

    /// Resolves `path` through the path guard, reusing an already-open
    /// handle or opening a fresh one (acquiring a workbook permit only on
    /// the miss path, per the handle manager's `get_or_open_by_path`
    /// contract).
    pub async fn open_handle(&self, path: &str) -> Result<Arc<Handle>> {
        let canonical = self.path_guard.validate_open_path(path)?;
        if let Some(existing) = self.handles.find_by_path(&canonical) {
            return Ok(existing);
        }
        let permit = self.admission.acquire_workbook().await?;
        let handle = self.handles.open_or_reuse(canonical, permit).await?;
        self.telemetry.on_handle_open(handle.id(), &handle.path().to_string_lossy());
        Ok(handle)
    }

    pub fn get_handle(&self, id: &str) -> Result<Arc<Handle>> {
        self.handles.get(id)
    }

    pub fn close_by_id(&self, id: &str) -> Result<()> {
        self.handles.close(id)?;
        self.telemetry.on_handle_close(id, CloseReason::Requested);
        Ok(())
    }

    pub fn close_by_path(&self, path: &str) -> Result<()> {
        let canonical = self.path_guard.validate_open_path(path)?;
        let handle = self
            .handles
            .find_by_path(&canonical)
            .ok_or_else(|| invalid_handle(format!("no open handle for '{path}'")))?;
        self.close_by_id(handle.id())
    }

    pub fn canonicalize(&self, path: &str) -> Result<PathBuf> {
        self.path_guard.validate_open_path(path)
    }

    pub fn telemetry(&self) -> &Arc<dyn TelemetryHooks> {
        &self.telemetry
    }

    pub async fn shutdown(&self) {
        self.handles.shutdown();
        self.evictor.abort();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::limits::Limits;
    use std::fs;
    use std::time::Duration;

    fn fixture_config() -> ServerConfig {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("book.xlsx");
        let book = umya_spreadsheet::new_file();
        umya_spreadsheet::writer::xlsx::write(&book, &path).unwrap();
        std::mem::forget(dir);

        ServerConfig {
            workspace_roots: vec![fs::canonicalize(path.parent().unwrap()).unwrap()],
            supported_extensions: vec!["xlsx".into()],
            allow_write: false,
            enabled_tools: None,
            limits: Limits {
                cleanup_period: Duration::from_secs(3600),
                ..Limits::default()
            },
        }
    }

    #[tokio::test]
    async fn opens_and_reuses_same_handle() {
        let kernel = Kernel::new(fixture_config());
        let root = kernel.config.workspace_roots[0].clone();
        let path = root.join("book.xlsx");
        let path_str = path.to_str().unwrap();

        let first = kernel.open_handle(path_str).await.unwrap();
        let second = kernel.open_handle(path_str).await.unwrap();
        assert_eq!(first.id(), second.id());
    }

    #[tokio::test]
    async fn close_by_path_then_get_by_id_fails() {
        let kernel = Kernel::new(fixture_config());
        let root = kernel.config.workspace_roots[0].clone();
        let path = root.join("book.xlsx");
        let path_str = path.to_str().unwrap();

        let handle = kernel.open_handle(path_str).await.unwrap();
        let id = handle.id().to_string();
        drop(handle);
        kernel.close_by_path(path_str).unwrap();
        assert!(kernel.get_handle(&id).is_err());
    }

    #[tokio::test]
    async fn shutdown_closes_every_handle() {
        let kernel = Kernel::new(fixture_config());
        let root = kernel.config.workspace_roots[0].clone();
        let path_str = root.join("book.xlsx").to_str().unwrap().to_string();
        let handle = kernel.open_handle(&path_str).await.unwrap();
        let id = handle.id().to_string();
        drop(handle);
        kernel.shutdown().await;
        assert!(kernel.get_handle(&id).is_err());
    }
}

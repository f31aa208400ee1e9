use std::future::Future;
use std::sync::Arc;

use anyhow::{Result, anyhow};
use rmcp::{
    ErrorData as McpError, Json, ServerHandler, ServiceExt,
    handler::server::{router::tool::ToolRouter, wrapper::Parameters},
    model::{Implementation, ServerCapabilities, ServerInfo},
    tool, tool_handler, tool_router,
    transport::stdio,
};
use serde::Serialize;

use crate::errors::to_tool_error;
use crate::state::Kernel;
use crate::telemetry::CallOutcome;
use crate::tools;
use crate::tools::apply_formula::{ApplyFormulaParams, ApplyFormulaResponse};
use crate::tools::close::{CloseWorkbookParams, CloseWorkbookResponse};
use crate::tools::compute_statistics::{ComputeStatisticsParams, ComputeStatisticsResponse};
use crate::tools::discover::{DiscoverStructureParams, DiscoverStructureResponse};
use crate::tools::filter::{FilterParams, FilterResponse};
use crate::tools::preview::{PreviewSheetParams, PreviewSheetResponse};
use crate::tools::read_range::{ReadRangeParams, ReadRangeResponse};
use crate::tools::search::{SearchParams, SearchResponse};
use crate::tools::write_range::{WriteRangeParams, WriteRangeResponse};

const BASE_INSTRUCTIONS: &str = "\
Excel workbook tool server: bounded, typed tools over one workbook at a time.

WORKFLOW:
1) discover-structure: list sheets, dimensions, and a header-row snapshot.
2) preview-sheet: eyeball the first rows of a sheet before committing to a range.
3) read-range: fetch an exact rectangle of values once you know what you need.
4) search / filter: locate cells or rows by literal/regex match or a boolean predicate over $N column refs.
5) write-range / apply-formula: mutate a rectangle, when write tools are enabled.
6) compute-statistics: per-column count/sum/average/min/max, optionally grouped by a column.
7) close-workbook: release a handle explicitly instead of waiting for idle eviction.

PAGINATION: any call whose response carries meta.truncated=true also carries meta.next_cursor; \
pass it back as the cursor field on a follow-up call to the SAME tool to resume. A cursor is \
bound to the workbook's path and modification time; editing the file invalidates outstanding cursors.

RANGES: A1 notation (e.g. A1:C10) or a defined name.

Keep requests narrow: every operation is bounded by a cell-count budget and a response-size limit.";

const WRITE_INSTRUCTIONS: &str = "\n\nWrite tools (write-range, apply-formula) are enabled; \
every write persists to disk immediately and bumps the handle's write_version.";

const READ_ONLY_INSTRUCTIONS: &str = "\n\nWrite tools are disabled on this server; \
write-range and apply-formula calls fail with PERMISSION_DENIED.";

fn build_instructions(allow_write: bool) -> String {
    let mut instructions = BASE_INSTRUCTIONS.to_string();
    instructions.push_str(if allow_write { WRITE_INSTRUCTIONS } else { READ_ONLY_INSTRUCTIONS });
    instructions
}

/// The request-execution kernel's MCP-facing dispatcher: one async method per
/// tool, each gated by admission control, a tool-enablement check, a
/// per-call timeout, and a response-size ceiling, all funneling failures
/// through a single error boundary.
#[derive(Clone)]
pub struct SheetKernelServer {
    state: Arc<Kernel>,
    tool_router: ToolRouter<SheetKernelServer>,
}

impl SheetKernelServer {
    pub fn new(state: Arc<Kernel>) -> Self {
        Self { state, tool_router: Self::tool_router() }
    }

    pub async fn run_stdio(self) -> Result<()> {
        let service = self.serve(stdio()).await.inspect_err(|error| tracing::error!("serving error: {:?}", error))?;
        service.waiting().await?;
        Ok(())
    }

    fn ensure_tool_enabled(&self, tool: &str) -> Result<()> {
        if self.state.is_tool_enabled(tool) {
            Ok(())
        } else {
            Err(crate::errors::validation(format!("tool '{tool}' is disabled on this server")).into())
        }
    }

    /// Acquires a request-admission permit, runs `fut` under the configured
    /// operation timeout, then checks the serialized response against the
    /// configured payload-size ceiling. Reports the outcome and elapsed time
    /// to the kernel's telemetry hooks regardless of success or failure.
    async fn run_tool_with_timeout<T, F>(&self, tool: &str, fut: F) -> Result<T>
    where
        F: Future<Output = Result<T>>,
        T: Serialize,
    {
        let started = tokio::time::Instant::now();
        let outcome = self.run_tool_inner(tool, fut).await;
        let elapsed = started.elapsed();
        self.state.telemetry().on_call(
            tool,
            if outcome.is_ok() { CallOutcome::Ok } else { CallOutcome::Error },
            elapsed,
        );
        outcome
    }

    async fn run_tool_inner<T, F>(&self, tool: &str, fut: F) -> Result<T>
    where
        F: Future<Output = Result<T>>,
        T: Serialize,
    {
        let _permit = self.state.acquire_request().await?;
        let timeout_duration = self.state.limits().operation_timeout;
        let result = match tokio::time::timeout(timeout_duration, fut).await {
            Ok(result) => result,
            Err(_) => Err(crate::errors::timeout(format!(
                "tool '{tool}' timed out after {}ms",
                timeout_duration.as_millis()
            ))
            .into()),
        }?;

        self.ensure_response_size(tool, &result)?;
        Ok(result)
    }

    fn ensure_response_size<T: Serialize>(&self, tool: &str, value: &T) -> Result<()> {
        let limit = self.state.limits().max_payload_bytes;
        let payload = serde_json::to_vec(value).map_err(|e| anyhow!("failed to serialize response for {tool}: {e}"))?;
        if payload.len() > limit {
            return Err(crate::errors::payload_too_large(format!(
                "response for '{tool}' is {} bytes, exceeding the {limit}-byte limit",
                payload.len()
            ))
            .into());
        }
        Ok(())
    }
}

#[tool_router]
impl SheetKernelServer {
    #[tool(name = "discover-structure", description = "List sheets, their dimensions, and a header-row snapshot")]
    pub async fn discover_structure(
        &self,
        Parameters(params): Parameters<DiscoverStructureParams>,
    ) -> Result<Json<DiscoverStructureResponse>, McpError> {
        self.ensure_tool_enabled("discover-structure").map_err(|e| to_tool_error("discover-structure", e))?;
        self.run_tool_with_timeout("discover-structure", tools::discover::discover_structure(self.state.clone(), params))
            .await
            .map(Json)
            .map_err(|e| to_tool_error("discover-structure", e))
    }

    #[tool(name = "preview-sheet", description = "Snapshot the first rows of a sheet, paginated")]
    pub async fn preview_sheet(
        &self,
        Parameters(params): Parameters<PreviewSheetParams>,
    ) -> Result<Json<PreviewSheetResponse>, McpError> {
        self.ensure_tool_enabled("preview-sheet").map_err(|e| to_tool_error("preview-sheet", e))?;
        self.run_tool_with_timeout("preview-sheet", tools::preview::preview_sheet(self.state.clone(), params))
            .await
            .map(Json)
            .map_err(|e| to_tool_error("preview-sheet", e))
    }

    #[tool(name = "read-range", description = "Read a rectangular range of cell values, paginated by cell count")]
    pub async fn read_range(&self, Parameters(params): Parameters<ReadRangeParams>) -> Result<Json<ReadRangeResponse>, McpError> {
        self.ensure_tool_enabled("read-range").map_err(|e| to_tool_error("read-range", e))?;
        self.run_tool_with_timeout("read-range", tools::read_range::read_range(self.state.clone(), params))
            .await
            .map(Json)
            .map_err(|e| to_tool_error("read-range", e))
    }

    #[tool(name = "search", description = "Scan a sheet for a literal or regular-expression match")]
    pub async fn search(&self, Parameters(params): Parameters<SearchParams>) -> Result<Json<SearchResponse>, McpError> {
        self.ensure_tool_enabled("search").map_err(|e| to_tool_error("search", e))?;
        self.run_tool_with_timeout("search", tools::search::search(self.state.clone(), params))
            .await
            .map(Json)
            .map_err(|e| to_tool_error("search", e))
    }

    #[tool(name = "filter", description = "Scan a sheet for rows matching a boolean predicate over $N column refs")]
    pub async fn filter(&self, Parameters(params): Parameters<FilterParams>) -> Result<Json<FilterResponse>, McpError> {
        self.ensure_tool_enabled("filter").map_err(|e| to_tool_error("filter", e))?;
        self.run_tool_with_timeout("filter", tools::filter::filter(self.state.clone(), params))
            .await
            .map(Json)
            .map_err(|e| to_tool_error("filter", e))
    }

    #[tool(name = "write-range", description = "Write a rectangular block of string values and persist to disk")]
    pub async fn write_range(&self, Parameters(params): Parameters<WriteRangeParams>) -> Result<Json<WriteRangeResponse>, McpError> {
        self.ensure_tool_enabled("write-range").map_err(|e| to_tool_error("write-range", e))?;
        self.run_tool_with_timeout("write-range", tools::write_range::write_range(self.state.clone(), params))
            .await
            .map(Json)
            .map_err(|e| to_tool_error("write-range", e))
    }

    #[tool(name = "apply-formula", description = "Set the same formula text on every cell of a range and persist to disk")]
    pub async fn apply_formula(
        &self,
        Parameters(params): Parameters<ApplyFormulaParams>,
    ) -> Result<Json<ApplyFormulaResponse>, McpError> {
        self.ensure_tool_enabled("apply-formula").map_err(|e| to_tool_error("apply-formula", e))?;
        self.run_tool_with_timeout("apply-formula", tools::apply_formula::apply_formula(self.state.clone(), params))
            .await
            .map(Json)
            .map_err(|e| to_tool_error("apply-formula", e))
    }

    #[tool(name = "compute-statistics", description = "Compute per-column count/sum/average/min/max, optionally grouped")]
    pub async fn compute_statistics(
        &self,
        Parameters(params): Parameters<ComputeStatisticsParams>,
    ) -> Result<Json<ComputeStatisticsResponse>, McpError> {
        self.ensure_tool_enabled("compute-statistics").map_err(|e| to_tool_error("compute-statistics", e))?;
        self.run_tool_with_timeout(
            "compute-statistics",
            tools::compute_statistics::compute_statistics(self.state.clone(), params),
        )
        .await
        .map(Json)
        .map_err(|e| to_tool_error("compute-statistics", e))
    }

    #[tool(name = "close-workbook", description = "Close a workbook handle by id or path")]
    pub async fn close_workbook(
        &self,
        Parameters(params): Parameters<CloseWorkbookParams>,
    ) -> Result<Json<CloseWorkbookResponse>, McpError> {
        self.ensure_tool_enabled("close-workbook").map_err(|e| to_tool_error("close-workbook", e))?;
        self.run_tool_with_timeout("close-workbook", tools::close::close_workbook(self.state.clone(), params))
            .await
            .map(Json)
            .map_err(|e| to_tool_error("close-workbook", e))
    }
}

#[tool_handler]
impl ServerHandler for SheetKernelServer {
    fn get_info(&self) -> ServerInfo {
        ServerInfo {
            capabilities: ServerCapabilities::builder().enable_tools().build(),
            server_info: Implementation::from_build_env(),
            instructions: Some(build_instructions(self.state.allow_write())),
            ..ServerInfo::default()
        }
    }
}

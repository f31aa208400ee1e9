use std::time::Duration;

/// Structured observability hooks the kernel calls at the seams an operator
/// cares about: handle lifecycle and per-call outcome. Kept as a trait so a
/// future transport can swap in a metrics-backed implementation without
/// touching the tool handlers.
pub trait TelemetryHooks: Send + Sync {
    fn on_handle_open(&self, handle_id: &str, path: &str) {
        let _ = (handle_id, path);
    }

    fn on_handle_close(&self, handle_id: &str, reason: CloseReason) {
        let _ = (handle_id, reason);
    }

    fn on_call(&self, tool: &str, outcome: CallOutcome, elapsed: Duration) {
        let _ = (tool, outcome, elapsed);
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CloseReason {
    Requested,
    IdleEvicted,
    Shutdown,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallOutcome {
    Ok,
    Error,
}

/// Default implementation: everything goes through `tracing`, matching the
/// ad hoc `tracing::info!`/`tracing::warn!` call sites the rest of the
/// codebase already uses at similar seams.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingTelemetry;

impl TelemetryHooks for TracingTelemetry {
    fn on_handle_open(&self, handle_id: &str, path: &str) {
        tracing::info!(handle_id, path, "workbook handle opened");
    }

    fn on_handle_close(&self, handle_id: &str, reason: CloseReason) {
        tracing::info!(handle_id, reason = ?reason, "workbook handle closed");
    }

    fn on_call(&self, tool: &str, outcome: CallOutcome, elapsed: Duration) {
        match outcome {
            CallOutcome::Ok => tracing::info!(tool, elapsed_ms = elapsed.as_millis() as u64, "tool call completed"),
            CallOutcome::Error => tracing::warn!(tool, elapsed_ms = elapsed.as_millis() as u64, "tool call failed"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_hooks_are_no_ops_and_dont_panic() {
        struct Silent;
        impl TelemetryHooks for Silent {}
        let hooks = Silent;
        hooks.on_handle_open("h1", "/tmp/book.xlsx");
        hooks.on_handle_close("h1", CloseReason::Requested);
        hooks.on_call("read_range", CallOutcome::Ok, Duration::from_millis(5));
    }

    #[test]
    fn tracing_impl_runs_without_a_subscriber() {
        let hooks = TracingTelemetry;
        hooks.on_handle_open("h2", "/tmp/book.xlsx");
        hooks.on_handle_close("h2", CloseReason::IdleEvicted);
        hooks.on_call("search", CallOutcome::Error, Duration::from_millis(12));
    }
}

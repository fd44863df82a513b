//! Structured observability hooks for session and execution lifecycle events.
//!
//! Every event carries an `event = "..."` field. Lifecycle events log at
//! `info!`, degraded paths at `warn!`.

use tracing::{info, warn};

/// RAII guard that enters an execution-scoped span.
///
/// ```ignore
/// let _span = ExecutionSpan::enter("3f1c...", 4);
/// // events below carry session_id and seq
/// ```
pub struct ExecutionSpan {
    _span: tracing::span::EnteredSpan,
}

impl ExecutionSpan {
    pub fn enter(session_id: &str, seq: u64) -> Self {
        let span = tracing::info_span!("matbridge.execution", session_id = %session_id, seq = seq);
        Self {
            _span: span.entered(),
        }
    }
}

pub fn emit_session_opened(session_id: &str, engine: &str) {
    info!(event = "session.opened", session_id = %session_id, engine = %engine);
}

pub fn emit_session_closed(session_id: &str, reason: &str) {
    info!(event = "session.closed", session_id = %session_id, reason = %reason);
}

pub fn emit_session_poisoned(session_id: &str, reason: &str) {
    warn!(event = "session.poisoned", session_id = %session_id, reason = %reason);
}

pub fn emit_execution_started(session_id: &str, seq: u64, source: &str) {
    info!(event = "execution.started", session_id = %session_id, seq = seq, source = %source);
}

pub fn emit_execution_finished(
    session_id: &str,
    seq: u64,
    duration_ms: u64,
    success: bool,
    variables: usize,
    figures: usize,
) {
    info!(
        event = "execution.finished",
        session_id = %session_id,
        seq = seq,
        duration_ms = duration_ms,
        success = success,
        variables = variables,
        figures = figures,
    );
}

pub fn emit_execution_fault(session_id: &str, seq: u64, message: &str) {
    warn!(event = "execution.fault", session_id = %session_id, seq = seq, message = %message);
}

/// A variable became an error marker in a snapshot.
pub fn emit_variable_fault(name: &str, error: &dyn std::fmt::Display) {
    warn!(event = "snapshot.variable_fault", name = %name, error = %error);
}

/// The memory guard cleared a variable.
pub fn emit_variable_cleared(session_id: &str, name: &str, size_mb: f64) {
    warn!(
        event = "memory.variable_cleared",
        session_id = %session_id,
        name = %name,
        size_mb = size_mb,
    );
}

pub fn emit_figure_exported(session_id: &str, figure_id: u32, path: &str) {
    info!(event = "figure.exported", session_id = %session_id, figure_id = figure_id, path = %path);
}

pub fn emit_figure_export_error(session_id: &str, figure_id: u32, error: &dyn std::fmt::Display) {
    warn!(event = "figure.export_error", session_id = %session_id, figure_id = figure_id, error = %error);
}

pub fn emit_tool_called(tool: &str) {
    info!(event = "tool.called", tool = %tool);
}

pub fn emit_tool_failed(tool: &str, kind: &str, error: &dyn std::fmt::Display) {
    warn!(event = "tool.failed", tool = %tool, kind = %kind, error = %error);
}

//! Execution controller: resolves what to run, runs it on a session's
//! engine, and assembles the [`ExecutionResult`].
//!
//! Everything that can be rejected is rejected before the engine is touched.
//! Once code is submitted, the workspace keeps whatever the code did, even
//! when it faults part-way through, and the result always carries a fresh
//! snapshot.

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};

use crate::compress::{snapshot, value_from_json, WorkspaceSnapshot};
use crate::config::BridgeConfig;
use crate::engine::{Engine, EngineFault, FigureInfo, RenderedFigure};
use crate::error::{BridgeError, Result, ValidationError};
use crate::figures::{changed_figures, FigureFile, FigureSink};
use crate::memory::{self, MemoryStatus};
use crate::metrics::METRICS;
use crate::names::is_valid_identifier;
use crate::obs::{self, ExecutionSpan};
use crate::sections::{extract_sections, script_digest, SectionRange};
use crate::session::Session;
use crate::value::RuntimeValue;

/// Where the code comes from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ScriptSource {
    Inline(String),
    File(PathBuf),
}

impl ScriptSource {
    /// Build a source from the `code` / `path` / `is_file` request triple.
    /// Exactly one of `code` and `path` must be set, matching `is_file`.
    pub fn from_parts(
        code: Option<String>,
        path: Option<String>,
        is_file: bool,
    ) -> std::result::Result<Self, ValidationError> {
        match (code, path, is_file) {
            (Some(code), None, false) => Ok(ScriptSource::Inline(code)),
            (None, Some(path), true) => Ok(ScriptSource::File(PathBuf::from(path))),
            _ => Err(ValidationError::SourceConflict { is_file }),
        }
    }

    fn label(&self) -> String {
        match self {
            ScriptSource::Inline(_) => "inline".to_string(),
            ScriptSource::File(path) => path.display().to_string(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct ExecutionRequest {
    pub source: ScriptSource,
    /// Restrict a file script to these section ordinals.
    pub sections: Option<SectionRange>,
    /// Reject the request if the file's digest differs.
    pub expected_digest: Option<String>,
    /// Variables assigned before the code runs.
    pub workspace_vars: BTreeMap<String, serde_json::Value>,
    pub capture_figures: bool,
    /// When false, a section run starts from an empty workspace.
    pub maintain_workspace: bool,
}

impl ExecutionRequest {
    pub fn new(source: ScriptSource) -> Self {
        Self {
            source,
            sections: None,
            expected_digest: None,
            workspace_vars: BTreeMap::new(),
            capture_figures: true,
            maintain_workspace: true,
        }
    }

    pub fn inline(code: impl Into<String>) -> Self {
        Self::new(ScriptSource::Inline(code.into()))
    }

    pub fn file(path: impl Into<PathBuf>) -> Self {
        Self::new(ScriptSource::File(path.into()))
    }

    pub fn with_sections(mut self, range: SectionRange) -> Self {
        self.sections = Some(range);
        self
    }

    pub fn with_expected_digest(mut self, digest: impl Into<String>) -> Self {
        self.expected_digest = Some(digest.into());
        self
    }

    pub fn with_var(mut self, name: impl Into<String>, value: serde_json::Value) -> Self {
        self.workspace_vars.insert(name.into(), value);
        self
    }

    pub fn capture_figures(mut self, capture: bool) -> Self {
        self.capture_figures = capture;
        self
    }

    pub fn maintain_workspace(mut self, maintain: bool) -> Self {
        self.maintain_workspace = maintain;
        self
    }
}

/// A runtime fault raised by the executed code.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecutionError {
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub identifier: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub line: Option<usize>,
}

impl From<EngineFault> for ExecutionError {
    fn from(fault: EngineFault) -> Self {
        Self {
            detail: fault.detail(),
            message: fault.message,
            identifier: fault.identifier,
            line: fault.line,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionResult {
    pub success: bool,
    pub output_text: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<ExecutionError>,
    pub figures: Vec<FigureFile>,
    pub workspace: WorkspaceSnapshot,
    pub execution_time_ms: u64,
    pub memory: MemoryStatus,
    /// Variables the memory guard cleared before the run.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub cleared_variables: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub script_digest: Option<String>,
}

/// Code ready to submit, plus the digest of the file it came from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedScript {
    pub code: String,
    pub digest: Option<String>,
}

/// Output of the part of an execution that holds the engine.
struct EngineRun {
    output: String,
    fault: Option<EngineFault>,
    rendered: Vec<(FigureInfo, RenderedFigure)>,
    workspace: WorkspaceSnapshot,
    memory: MemoryStatus,
    cleared: Vec<String>,
}

pub struct ExecutionController {
    config: Arc<BridgeConfig>,
    sink: Arc<dyn FigureSink>,
}

impl ExecutionController {
    pub fn new(config: Arc<BridgeConfig>, sink: Arc<dyn FigureSink>) -> Self {
        Self { config, sink }
    }

    pub fn config(&self) -> &BridgeConfig {
        &self.config
    }

    /// Resolve the code a request runs, validating sources and ranges.
    pub async fn resolve(
        &self,
        request: &ExecutionRequest,
    ) -> std::result::Result<ResolvedScript, ValidationError> {
        let path = match &request.source {
            ScriptSource::Inline(code) => {
                if request.sections.is_some() || request.expected_digest.is_some() {
                    return Err(ValidationError::SectionsWithoutFile);
                }
                return Ok(ResolvedScript {
                    code: code.clone(),
                    digest: None,
                });
            }
            ScriptSource::File(path) => path,
        };

        let text = read_script(path).await?;
        let digest = script_digest(&text);
        if let Some(expected) = &request.expected_digest {
            if !expected.eq_ignore_ascii_case(&digest) {
                return Err(ValidationError::StaleScript {
                    expected: expected.clone(),
                    actual: digest,
                });
            }
        }
        let code = match request.sections {
            Some(range) => extract_sections(&text, range)?,
            None => text,
        };
        Ok(ResolvedScript {
            code,
            digest: Some(digest),
        })
    }

    /// Run a request on `session`.
    ///
    /// Validation failures return before the engine is touched. A fault in
    /// the executed code is reported inside the result, not as an error.
    pub async fn execute(
        &self,
        session: &Session,
        request: ExecutionRequest,
    ) -> Result<ExecutionResult> {
        let resolved = self.resolve(&request).await?;
        self.execute_resolved(session, request, resolved).await
    }

    /// Run code already produced by [`resolve`](Self::resolve) for `request`;
    /// the script file is not read again.
    pub async fn execute_resolved(
        &self,
        session: &Session,
        request: ExecutionRequest,
        resolved: ResolvedScript,
    ) -> Result<ExecutionResult> {
        let vars = decode_vars(&request.workspace_vars)?;

        let seq = session.next_seq();
        let session_id = session.id().to_string();
        obs::emit_execution_started(&session_id, seq, &request.source.label());
        METRICS.inc_executions();

        let config = Arc::clone(&self.config);
        let timeout = config.execution_timeout_ms.map(Duration::from_millis);
        let clear_first = request.sections.is_some() && !request.maintain_workspace;
        let capture = request.capture_figures;
        let code = resolved.code;
        let id = session_id.clone();

        let started = Instant::now();
        let run = session
            .with_engine_mut(timeout, move |engine| {
                let _span = ExecutionSpan::enter(&id, seq);
                run_on_engine(engine, &id, &code, vars, clear_first, capture, &config)
            })
            .await?;
        let run = match run {
            Ok(run) => run,
            Err(err) => {
                if let BridgeError::SessionUnavailable { reason } = &err {
                    session.poison(reason.clone());
                }
                return Err(err);
            }
        };
        let execution_time_ms = started.elapsed().as_millis() as u64;

        let figures = self.export_figures(&session_id, seq, run.rendered).await;
        let success = run.fault.is_none();
        if let Some(fault) = &run.fault {
            METRICS.inc_execution_faults();
            obs::emit_execution_fault(&session_id, seq, &fault.message);
        }
        let faults = run.workspace.error_count();
        METRICS.add_serialization_faults(faults as u64);
        METRICS.add_variables_serialized((run.workspace.len() - faults) as u64);
        obs::emit_execution_finished(
            &session_id,
            seq,
            execution_time_ms,
            success,
            run.workspace.len(),
            figures.len(),
        );

        Ok(ExecutionResult {
            success,
            output_text: run.output,
            error: run.fault.map(ExecutionError::from),
            figures,
            workspace: run.workspace,
            execution_time_ms,
            memory: run.memory,
            cleared_variables: run.cleared,
            script_digest: resolved.digest,
        })
    }

    /// Snapshot the session's workspace without executing anything.
    pub async fn workspace(&self, session: &Session) -> Result<WorkspaceSnapshot> {
        let compression = self.config.compression;
        let snap = session
            .with_engine(move |engine| snapshot(engine, &compression))
            .await??;
        Ok(snap)
    }

    /// Current memory status of the session's workspace.
    pub async fn memory(&self, session: &Session) -> Result<MemoryStatus> {
        let limit = self.config.memory_limit_mb;
        let sizes = session
            .with_engine(|engine| memory::footprints(engine))
            .await??;
        Ok(memory::memory_status(&sizes, limit))
    }

    async fn export_figures(
        &self,
        session_id: &str,
        seq: u64,
        rendered: Vec<(FigureInfo, RenderedFigure)>,
    ) -> Vec<FigureFile> {
        let mut files = Vec::with_capacity(rendered.len());
        for (info, figure) in rendered {
            match self.sink.export(session_id, seq, &figure).await {
                Ok(path) => {
                    obs::emit_figure_exported(session_id, figure.id, &path.display().to_string());
                    files.push(FigureFile {
                        figure_id: figure.id,
                        format: figure.format,
                        path,
                        title: info.title,
                        size_bytes: figure.bytes.len() as u64,
                    });
                }
                Err(e) => obs::emit_figure_export_error(session_id, figure.id, &e),
            }
        }
        METRICS.add_figures_exported(files.len() as u64);
        files
    }
}

async fn read_script(path: &std::path::Path) -> std::result::Result<String, ValidationError> {
    tokio::fs::read_to_string(path).await.map_err(|e| {
        if e.kind() == std::io::ErrorKind::NotFound {
            ValidationError::ScriptNotFound {
                path: path.display().to_string(),
            }
        } else {
            ValidationError::Unreadable {
                path: path.display().to_string(),
                reason: e.to_string(),
            }
        }
    })
}

fn decode_vars(
    vars: &BTreeMap<String, serde_json::Value>,
) -> std::result::Result<Vec<(String, RuntimeValue)>, ValidationError> {
    vars.iter()
        .map(|(name, json)| {
            if !is_valid_identifier(name) {
                return Err(ValidationError::InvalidIdentifier { name: name.clone() });
            }
            let value = value_from_json(json).map_err(|e| ValidationError::InvalidVariable {
                name: name.clone(),
                reason: e.to_string(),
            })?;
            Ok((name.clone(), value))
        })
        .collect()
}

fn run_on_engine(
    engine: &mut dyn Engine,
    session_id: &str,
    code: &str,
    vars: Vec<(String, RuntimeValue)>,
    clear_first: bool,
    capture: bool,
    config: &BridgeConfig,
) -> Result<EngineRun> {
    if clear_first {
        engine.clear_all()?;
    }
    for (name, value) in vars {
        engine.assign(&name, value)?;
    }
    let cleared = memory::enforce_limit(engine, session_id, config)?;
    let baseline = if capture { engine.figures()? } else { Vec::new() };

    let outcome = engine.eval(code)?;

    if !engine.is_alive() {
        return Ok(EngineRun {
            output: outcome.output,
            fault: outcome.fault,
            rendered: Vec::new(),
            workspace: WorkspaceSnapshot::default(),
            memory: memory::memory_status(&[], config.memory_limit_mb),
            cleared,
        });
    }

    let mut rendered = Vec::new();
    if capture {
        let formats = engine.figure_formats().to_vec();
        for info in changed_figures(&baseline, &engine.figures()?) {
            for &format in &formats {
                match engine.render_figure(info.id, format) {
                    Ok(figure) => rendered.push((info.clone(), figure)),
                    Err(e) => obs::emit_figure_export_error(session_id, info.id, &e),
                }
            }
        }
    }

    let workspace = snapshot(&*engine, &config.compression)?;
    let sizes = memory::footprints(&*engine)?;
    Ok(EngineRun {
        output: outcome.output,
        fault: outcome.fault,
        rendered,
        workspace,
        memory: memory::memory_status(&sizes, config.memory_limit_mb),
        cleared,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compress::SnapshotEntry;
    use crate::fakes::{FakeEngine, MemoryFigureSink};
    use serde_json::json;

    fn controller() -> ExecutionController {
        ExecutionController::new(
            Arc::new(BridgeConfig::default()),
            Arc::new(MemoryFigureSink::new()),
        )
    }

    fn session() -> Session {
        Session::new(Box::new(FakeEngine::new()))
    }

    #[test]
    fn source_parts_must_agree() {
        assert_eq!(
            ScriptSource::from_parts(Some("x=1".into()), None, false).unwrap(),
            ScriptSource::Inline("x=1".into())
        );
        assert!(ScriptSource::from_parts(None, Some("a.m".into()), true).is_ok());
        for (code, path, is_file) in [
            (Some("x"), Some("a.m"), true),
            (Some("x"), None, true),
            (None, Some("a.m"), false),
            (None, None, false),
        ] {
            let err = ScriptSource::from_parts(
                code.map(String::from),
                path.map(String::from),
                is_file,
            )
            .unwrap_err();
            assert_eq!(err, ValidationError::SourceConflict { is_file });
        }
    }

    #[tokio::test]
    async fn inline_execution_returns_snapshot() {
        let session = session();
        let result = controller()
            .execute(&session, ExecutionRequest::inline("x = 2;\ndisp('hi')"))
            .await
            .unwrap();
        assert!(result.success);
        assert_eq!(result.output_text, "hi\n");
        assert!(result.workspace.get("x").is_some());
        assert_eq!(result.memory.variable_count, 1);
    }

    #[tokio::test]
    async fn fault_keeps_prior_assignments() {
        let session = session();
        let result = controller()
            .execute(
                &session,
                ExecutionRequest::inline("a = 1;\nerror('bad')\nb = 2;"),
            )
            .await
            .unwrap();
        assert!(!result.success);
        let error = result.error.unwrap();
        assert_eq!(error.message, "bad");
        assert_eq!(error.line, Some(2));
        assert!(result.workspace.get("a").is_some());
        assert!(result.workspace.get("b").is_none());
        assert!(session.is_available());
    }

    #[tokio::test]
    async fn inline_with_sections_is_rejected() {
        let err = controller()
            .execute(
                &session(),
                ExecutionRequest::inline("x = 1").with_sections(SectionRange::single(1)),
            )
            .await
            .unwrap_err();
        assert_eq!(err.kind(), "validation");
    }

    #[tokio::test]
    async fn bad_range_never_reaches_engine() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("s.m");
        std::fs::write(&path, "%% A\nx = 1;\n%% B\ny = 2;\n").unwrap();
        let session = session();
        let err = controller()
            .execute(
                &session,
                ExecutionRequest::file(&path).with_sections(SectionRange::new(2, 1)),
            )
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            BridgeError::Validation(ValidationError::SectionRange { .. })
        ));
        assert_eq!(session.execution_count(), 0);
    }

    #[tokio::test]
    async fn stale_digest_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("s.m");
        std::fs::write(&path, "x = 1;\n").unwrap();
        let err = controller()
            .execute(
                &session(),
                ExecutionRequest::file(&path).with_expected_digest("00"),
            )
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            BridgeError::Validation(ValidationError::StaleScript { .. })
        ));
    }

    #[tokio::test]
    async fn resolved_code_runs_without_rereading_the_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("s.m");
        std::fs::write(&path, "first = 1;\n").unwrap();
        let ctl = controller();
        let request = ExecutionRequest::file(&path);
        let resolved = ctl.resolve(&request).await.unwrap();
        std::fs::write(&path, "second = 2;\n").unwrap();

        let result = ctl
            .execute_resolved(&session(), request, resolved.clone())
            .await
            .unwrap();
        assert!(result.workspace.get("first").is_some());
        assert!(result.workspace.get("second").is_none());
        assert_eq!(result.script_digest, resolved.digest);
    }

    #[tokio::test]
    async fn missing_file_is_validation_error() {
        let err = controller()
            .execute(&session(), ExecutionRequest::file("/nonexistent/run.m"))
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            BridgeError::Validation(ValidationError::ScriptNotFound { .. })
        ));
    }

    #[tokio::test]
    async fn section_without_maintain_clears_first() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("s.m");
        std::fs::write(&path, "%% A\nx = 1;\n%% B\ny = 2;\n").unwrap();
        let session = session();
        let ctl = controller();
        ctl.execute(&session, ExecutionRequest::inline("old = 5"))
            .await
            .unwrap();
        let result = ctl
            .execute(
                &session,
                ExecutionRequest::file(&path)
                    .with_sections(SectionRange::single(2))
                    .maintain_workspace(false),
            )
            .await
            .unwrap();
        assert_eq!(result.workspace.names().collect::<Vec<_>>(), vec!["y"]);
        assert!(result.script_digest.is_some());
    }

    #[tokio::test]
    async fn workspace_vars_are_injected() {
        let result = controller()
            .execute(
                &session(),
                ExecutionRequest::inline("disp('ok')").with_var("gain", json!([1, 2, 3])),
            )
            .await
            .unwrap();
        let Some(SnapshotEntry::Variable(var)) = result.workspace.get("gain") else {
            panic!("gain missing");
        };
        assert_eq!(var.shape(), &[1, 3]);
    }

    #[tokio::test]
    async fn bad_var_name_is_rejected() {
        let err = controller()
            .execute(
                &session(),
                ExecutionRequest::inline("x = 1").with_var("1bad", json!(1)),
            )
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            BridgeError::Validation(ValidationError::InvalidIdentifier { .. })
        ));
    }

    #[tokio::test]
    async fn changed_figures_are_exported() {
        let sink = Arc::new(MemoryFigureSink::new());
        let ctl = ExecutionController::new(Arc::new(BridgeConfig::default()), sink.clone());
        let session = session();
        let first = ctl
            .execute(&session, ExecutionRequest::inline("figure\nplot"))
            .await
            .unwrap();
        assert_eq!(first.figures.len(), 1);
        assert!(first.figures[0]
            .path
            .to_string_lossy()
            .ends_with("exec1_figure1.svg"));

        let second = ctl
            .execute(&session, ExecutionRequest::inline("x = 1"))
            .await
            .unwrap();
        assert!(second.figures.is_empty());

        let third = ctl
            .execute(
                &session,
                ExecutionRequest::inline("figure").capture_figures(false),
            )
            .await
            .unwrap();
        assert!(third.figures.is_empty());
        assert_eq!(sink.paths().len(), 1);
    }

    #[tokio::test]
    async fn timeout_marks_session_unavailable() {
        let config = BridgeConfig {
            execution_timeout_ms: Some(20),
            ..BridgeConfig::default()
        };
        let ctl = ExecutionController::new(Arc::new(config), Arc::new(MemoryFigureSink::new()));
        let session = session();
        let err = ctl
            .execute(&session, ExecutionRequest::inline("pause(0.3)"))
            .await
            .unwrap_err();
        assert_eq!(err.kind(), "session_unavailable");
        assert!(!session.is_available());
    }

    #[tokio::test]
    async fn exit_returns_result_then_session_is_gone() {
        let session = session();
        let ctl = controller();
        let result = ctl
            .execute(&session, ExecutionRequest::inline("disp('bye')\nexit"))
            .await
            .unwrap();
        assert_eq!(result.output_text, "bye\n");
        assert!(result.workspace.is_empty());
        let err = ctl.workspace(&session).await.unwrap_err();
        assert_eq!(err.kind(), "session_unavailable");
    }

    #[tokio::test]
    async fn memory_guard_clears_large_variables() {
        let config = BridgeConfig {
            memory_limit_mb: Some(0.001),
            large_variable_mb: 0.0005,
            ..BridgeConfig::default()
        };
        let ctl = ExecutionController::new(Arc::new(config), Arc::new(MemoryFigureSink::new()));
        let session = session();
        ctl.execute(&session, ExecutionRequest::inline("big = zeros(1000)\nsmall = 1"))
            .await
            .unwrap();
        let result = ctl
            .execute(&session, ExecutionRequest::inline("z = 2"))
            .await
            .unwrap();
        assert_eq!(result.cleared_variables, vec!["big"]);
        assert!(result.workspace.get("big").is_none());
        assert!(result.workspace.get("small").is_some());
    }
}

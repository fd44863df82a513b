//! Engine seam.
//!
//! An [`Engine`] owns one workspace and evaluates code against it. Calls are
//! blocking; the session layer moves them onto the blocking thread pool and
//! serializes access. Engines report user-code faults inside
//! [`EvalOutcome`]; an `Err` means the engine itself failed.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::EngineError;
use crate::value::RuntimeValue;

/// Read access to a workspace, as needed by the snapshot assembler.
pub trait WorkspaceSource {
    /// Current variable names, in the engine's listing order.
    fn variable_names(&self) -> Result<Vec<String>, EngineError>;

    /// Marshal one variable.
    fn fetch(&self, name: &str) -> Result<RuntimeValue, EngineError>;

    /// Estimated size of one variable in bytes.
    fn variable_bytes(&self, name: &str) -> Result<u64, EngineError> {
        self.fetch(name).map(|value| value.footprint_bytes())
    }
}

/// A fault raised by user code during evaluation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EngineFault {
    pub message: String,
    /// Error identifier such as `MATLAB:undefinedFunction`, when known.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub identifier: Option<String>,
    /// 1-based line of the submitted code that raised the fault.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub line: Option<usize>,
}

impl EngineFault {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            identifier: None,
            line: None,
        }
    }

    /// Best-effort one-line detail (identifier and line).
    pub fn detail(&self) -> Option<String> {
        match (&self.identifier, self.line) {
            (Some(id), Some(line)) => Some(format!("{id} (line {line})")),
            (Some(id), None) => Some(id.clone()),
            (None, Some(line)) => Some(format!("line {line}")),
            (None, None) => None,
        }
    }
}

/// Result of one `eval` call.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EvalOutcome {
    /// Captured standard output, including output written before a fault.
    pub output: String,
    pub fault: Option<EngineFault>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FigureFormat {
    Png,
    Svg,
}

impl FigureFormat {
    pub fn extension(self) -> &'static str {
        match self {
            FigureFormat::Png => "png",
            FigureFormat::Svg => "svg",
        }
    }
}

impl fmt::Display for FigureFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.extension())
    }
}

/// An open figure. `revision` increases whenever the figure's content changes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FigureInfo {
    pub id: u32,
    pub revision: u64,
    pub title: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RenderedFigure {
    pub id: u32,
    pub format: FigureFormat,
    pub bytes: Vec<u8>,
}

/// A live numeric-computation engine with a persistent workspace.
pub trait Engine: WorkspaceSource + Send + Sync {
    fn name(&self) -> &str;

    /// False once the engine has exited or lost its connection.
    fn is_alive(&self) -> bool;

    /// Evaluate `code`. Side effects made before a fault are kept.
    fn eval(&mut self, code: &str) -> Result<EvalOutcome, EngineError>;

    fn assign(&mut self, name: &str, value: RuntimeValue) -> Result<(), EngineError>;

    fn clear(&mut self, name: &str) -> Result<(), EngineError>;

    fn clear_all(&mut self) -> Result<(), EngineError>;

    fn figures(&self) -> Result<Vec<FigureInfo>, EngineError>;

    /// Formats [`Engine::render_figure`] can produce.
    fn figure_formats(&self) -> &[FigureFormat] {
        &[FigureFormat::Svg]
    }

    fn render_figure(&self, id: u32, format: FigureFormat) -> Result<RenderedFigure, EngineError>;

    fn close_figures(&mut self) -> Result<(), EngineError>;
}

/// Starts engines for the session pool.
pub trait EngineFactory: Send + Sync {
    fn launch(&self) -> Result<Box<dyn Engine>, EngineError>;
}

impl<F> EngineFactory for F
where
    F: Fn() -> Result<Box<dyn Engine>, EngineError> + Send + Sync,
{
    fn launch(&self) -> Result<Box<dyn Engine>, EngineError> {
        self()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fault_detail_combines_parts() {
        let mut fault = EngineFault::new("Undefined function 'foo'.");
        assert_eq!(fault.detail(), None);
        fault.line = Some(3);
        assert_eq!(fault.detail().as_deref(), Some("line 3"));
        fault.identifier = Some("MATLAB:undefinedFunction".into());
        assert_eq!(
            fault.detail().as_deref(),
            Some("MATLAB:undefinedFunction (line 3)")
        );
    }

    #[test]
    fn figure_format_extension() {
        assert_eq!(FigureFormat::Svg.extension(), "svg");
        assert_eq!(serde_json::to_string(&FigureFormat::Png).unwrap(), "\"png\"");
    }
}

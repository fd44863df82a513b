//! In-memory fakes for the engine and figure-sink seams (testing only).
//!
//! `FakeEngine` understands a tiny line language, one statement per line or
//! per `;`:
//!
//! * `name = 3.5`, `name = 'text'`, `name = true`, `name = zeros(n)`,
//!   `name = opaque` (a value with no textual form)
//! * `disp('text')`, `error('message')`, `pause(seconds)`
//! * `figure`, `plot`, `close all`, `clear`, `clear name`, `exit`
//!
//! Anything else raises an "undefined" fault.

use std::collections::{BTreeMap, HashMap};
use std::path::PathBuf;
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;

use crate::engine::{
    Engine, EngineFault, EvalOutcome, FigureFormat, FigureInfo, RenderedFigure, WorkspaceSource,
};
use crate::error::EngineError;
use crate::figures::FigureSink;
use crate::value::{NumericArray, OpaqueValue, RuntimeValue};

// ---------------------------------------------------------------------------
// FakeEngine
// ---------------------------------------------------------------------------

#[derive(Debug, Default)]
pub struct FakeEngine {
    workspace: BTreeMap<String, RuntimeValue>,
    figures: BTreeMap<u32, u64>,
    current_figure: Option<u32>,
    dead: bool,
}

impl FakeEngine {
    pub fn new() -> Self {
        Self::default()
    }

    fn ensure_alive(&self) -> Result<(), EngineError> {
        if self.dead {
            return Err(EngineError::Disconnected("engine exited".into()));
        }
        Ok(())
    }

    fn run_statement(&mut self, stmt: &str, out: &mut String) -> Result<(), EngineFault> {
        if let Some(arg) = call_arg(stmt, "disp") {
            out.push_str(unquote(arg));
            out.push('\n');
            return Ok(());
        }
        if let Some(arg) = call_arg(stmt, "error") {
            let mut fault = EngineFault::new(unquote(arg));
            fault.identifier = Some("fake:error".into());
            return Err(fault);
        }
        if let Some(arg) = call_arg(stmt, "pause") {
            let secs: f64 = arg.trim().parse().unwrap_or(0.0);
            std::thread::sleep(Duration::from_secs_f64(secs.max(0.0)));
            return Ok(());
        }
        match stmt {
            "exit" | "quit" => {
                self.dead = true;
                return Ok(());
            }
            "figure" => {
                let id = self.figures.keys().next_back().map_or(1, |id| id + 1);
                self.figures.insert(id, 1);
                self.current_figure = Some(id);
                return Ok(());
            }
            "plot" => {
                let id = match self.current_figure {
                    Some(id) => id,
                    None => {
                        self.figures.insert(1, 0);
                        self.current_figure = Some(1);
                        1
                    }
                };
                if let Some(revision) = self.figures.get_mut(&id) {
                    *revision += 1;
                }
                return Ok(());
            }
            "close all" => {
                self.figures.clear();
                self.current_figure = None;
                return Ok(());
            }
            "clear" => {
                self.workspace.clear();
                return Ok(());
            }
            _ => {}
        }
        if let Some(name) = stmt.strip_prefix("clear ") {
            self.workspace.remove(name.trim());
            return Ok(());
        }
        if let Some((name, rhs)) = stmt.split_once('=') {
            let value = parse_literal(rhs.trim())
                .ok_or_else(|| EngineFault::new(format!("cannot evaluate '{}'", rhs.trim())))?;
            self.workspace.insert(name.trim().to_string(), value);
            return Ok(());
        }
        Err(EngineFault {
            message: format!("Undefined function or variable '{stmt}'."),
            identifier: Some("fake:undefined".into()),
            line: None,
        })
    }
}

fn call_arg<'a>(stmt: &'a str, name: &str) -> Option<&'a str> {
    stmt.strip_prefix(name)?.strip_prefix('(')?.strip_suffix(')')
}

fn unquote(text: &str) -> &str {
    let text = text.trim();
    text.strip_prefix('\'')
        .and_then(|t| t.strip_suffix('\''))
        .unwrap_or(text)
}

fn parse_literal(text: &str) -> Option<RuntimeValue> {
    if let Ok(v) = text.parse::<f64>() {
        return Some(RuntimeValue::Scalar(v));
    }
    match text {
        "true" => return Some(RuntimeValue::Bool(true)),
        "false" => return Some(RuntimeValue::Bool(false)),
        "opaque" => {
            return Some(RuntimeValue::Opaque(OpaqueValue {
                class_name: "fake.Handle".into(),
                repr: None,
            }))
        }
        _ => {}
    }
    if text.starts_with('\'') && text.ends_with('\'') && text.len() >= 2 {
        return Some(RuntimeValue::Text(text[1..text.len() - 1].to_string()));
    }
    let n: usize = call_arg(text, "zeros")?.trim().parse().ok()?;
    Some(RuntimeValue::Numeric(NumericArray::row(vec![0.0; n])))
}

impl WorkspaceSource for FakeEngine {
    fn variable_names(&self) -> Result<Vec<String>, EngineError> {
        self.ensure_alive()?;
        self.workspace.variable_names()
    }

    fn fetch(&self, name: &str) -> Result<RuntimeValue, EngineError> {
        self.ensure_alive()?;
        self.workspace.fetch(name)
    }
}

impl Engine for FakeEngine {
    fn name(&self) -> &str {
        "fake"
    }

    fn is_alive(&self) -> bool {
        !self.dead
    }

    fn eval(&mut self, code: &str) -> Result<EvalOutcome, EngineError> {
        self.ensure_alive()?;
        let mut outcome = EvalOutcome::default();
        for (index, line) in code.lines().enumerate() {
            let line = line.trim();
            if line.is_empty() || line.starts_with('%') {
                continue;
            }
            for stmt in line.split(';').map(str::trim).filter(|s| !s.is_empty()) {
                if let Err(mut fault) = self.run_statement(stmt, &mut outcome.output) {
                    fault.line = Some(index + 1);
                    outcome.fault = Some(fault);
                    return Ok(outcome);
                }
                if self.dead {
                    return Ok(outcome);
                }
            }
        }
        Ok(outcome)
    }

    fn assign(&mut self, name: &str, value: RuntimeValue) -> Result<(), EngineError> {
        self.ensure_alive()?;
        self.workspace.insert(name.to_string(), value);
        Ok(())
    }

    fn clear(&mut self, name: &str) -> Result<(), EngineError> {
        self.ensure_alive()?;
        self.workspace.remove(name);
        Ok(())
    }

    fn clear_all(&mut self) -> Result<(), EngineError> {
        self.ensure_alive()?;
        self.workspace.clear();
        Ok(())
    }

    fn figures(&self) -> Result<Vec<FigureInfo>, EngineError> {
        self.ensure_alive()?;
        Ok(self
            .figures
            .iter()
            .map(|(&id, &revision)| FigureInfo {
                id,
                revision,
                title: None,
            })
            .collect())
    }

    fn render_figure(&self, id: u32, format: FigureFormat) -> Result<RenderedFigure, EngineError> {
        self.ensure_alive()?;
        let revision = self.figures.get(&id).ok_or(EngineError::NoSuchFigure(id))?;
        Ok(RenderedFigure {
            id,
            format,
            bytes: format!("<svg data-figure=\"{id}\" data-revision=\"{revision}\"/>").into_bytes(),
        })
    }

    fn close_figures(&mut self) -> Result<(), EngineError> {
        self.ensure_alive()?;
        self.figures.clear();
        self.current_figure = None;
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// MemoryFigureSink
// ---------------------------------------------------------------------------

/// Figure sink that keeps exported bytes in a `HashMap<path, bytes>`.
#[derive(Debug, Default)]
pub struct MemoryFigureSink {
    files: Mutex<HashMap<PathBuf, Vec<u8>>>,
}

impl MemoryFigureSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn paths(&self) -> Vec<PathBuf> {
        let mut paths: Vec<PathBuf> = self.files.lock().unwrap().keys().cloned().collect();
        paths.sort();
        paths
    }

    pub fn get(&self, path: &std::path::Path) -> Option<Vec<u8>> {
        self.files.lock().unwrap().get(path).cloned()
    }
}

#[async_trait]
impl FigureSink for MemoryFigureSink {
    async fn export(
        &self,
        session_id: &str,
        seq: u64,
        figure: &RenderedFigure,
    ) -> std::io::Result<PathBuf> {
        let path = PathBuf::from(session_id).join(format!(
            "exec{seq}_figure{}.{}",
            figure.id,
            figure.format.extension()
        ));
        self.files
            .lock()
            .unwrap()
            .insert(path.clone(), figure.bytes.clone());
        Ok(path)
    }
}

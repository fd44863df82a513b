//! [`Engine`] implementation backed by the built-in interpreter.
//!
//! Values cross the seam through [`to_runtime`] and [`from_runtime`]. Graphics
//! handles have no runtime form and fail to marshal; function handles and
//! char matrices travel as opaque values with a textual form.

use matbridge_core::value::CELL_HEADER_BYTES;
use matbridge_core::{
    CellArray, ComplexArray, Engine, EngineError, EngineFactory, EngineFault, EvalOutcome,
    FigureFormat, FigureInfo, LogicalArray, NumericArray, NumericClass, NumericData, OpaqueValue,
    RenderedFigure, RuntimeValue, Shape, WorkspaceSource,
};
use tracing::{debug, info};

use crate::error::InterpError;
use crate::format;
use crate::interp::{Interpreter, DEFAULT_STEP_LIMIT};
use crate::plot::render_svg;
use crate::value::{Array, Value};

pub struct InterpEngine {
    interp: Interpreter,
    dead: bool,
}

impl Default for InterpEngine {
    fn default() -> Self {
        Self::new()
    }
}

impl InterpEngine {
    pub fn new() -> Self {
        Self::with_step_limit(DEFAULT_STEP_LIMIT)
    }

    pub fn with_step_limit(step_limit: u64) -> Self {
        Self {
            interp: Interpreter::with_step_limit(step_limit),
            dead: false,
        }
    }

    /// Factory for the session pool; every launch gets a fresh workspace.
    pub fn factory(step_limit: u64) -> impl EngineFactory {
        move || -> Result<Box<dyn Engine>, EngineError> {
            debug!(step_limit, "launching interpreter engine");
            Ok(Box::new(InterpEngine::with_step_limit(step_limit)))
        }
    }

    pub fn interpreter(&self) -> &Interpreter {
        &self.interp
    }

    fn ensure_alive(&self) -> Result<(), EngineError> {
        if self.dead {
            return Err(EngineError::Disconnected("engine exited".into()));
        }
        Ok(())
    }
}

fn fault_from(err: &InterpError) -> EngineFault {
    EngineFault {
        message: err.to_string(),
        identifier: err.identifier().map(str::to_string),
        line: err.line(),
    }
}

fn marshal_error(class: &str, reason: impl Into<String>) -> EngineError {
    EngineError::Marshal {
        class: class.to_string(),
        reason: reason.into(),
    }
}

/// Convert an interpreter value for the compression engine.
pub fn to_runtime(value: &Value) -> Result<RuntimeValue, EngineError> {
    let invalid = |e: matbridge_core::ValueError| marshal_error(&value.class_name(), e.to_string());
    Ok(match value {
        Value::Num(a) if a.numel() == 1 => RuntimeValue::Scalar(a.data()[0]),
        Value::Num(a) => RuntimeValue::Numeric(
            NumericArray::from_f64(Shape::new(a.shape()), a.data().to_vec()).map_err(invalid)?,
        ),
        Value::Typed(class, a) => {
            let data = if *class == NumericClass::Single {
                NumericData::F32(a.data().iter().map(|v| *v as f32).collect())
            } else if class.is_signed_integer() {
                NumericData::I64(a.data().iter().map(|v| *v as i64).collect())
            } else if class.is_unsigned_integer() {
                NumericData::U64(a.data().iter().map(|v| *v as u64).collect())
            } else {
                NumericData::F64(a.data().to_vec())
            };
            RuntimeValue::Numeric(
                NumericArray::new(Shape::new(a.shape()), *class, data).map_err(invalid)?,
            )
        }
        Value::Complex(a) => RuntimeValue::Complex(
            ComplexArray::new(Shape::new(a.shape()), NumericClass::Double, a.data().to_vec())
                .map_err(invalid)?,
        ),
        Value::Bool(a) if a.numel() == 1 => RuntimeValue::Bool(a.data()[0]),
        Value::Bool(a) => RuntimeValue::Logical(
            LogicalArray::new(Shape::new(a.shape()), a.data().to_vec()).map_err(invalid)?,
        ),
        Value::Char(a) if a.rows() <= 1 && a.shape().len() == 2 => {
            RuntimeValue::Text(a.data().iter().collect())
        }
        Value::Char(_) => RuntimeValue::Opaque(OpaqueValue {
            class_name: "char".into(),
            repr: Some(format::disp(value).trim_end().to_string()),
        }),
        Value::Cell(cells) => {
            let items = cells
                .data()
                .iter()
                .map(to_runtime)
                .collect::<Result<Vec<_>, _>>()?;
            RuntimeValue::Cell(CellArray::new(Shape::new(cells.shape()), items).map_err(invalid)?)
        }
        Value::Func(handle) => RuntimeValue::Opaque(OpaqueValue {
            class_name: "function_handle".into(),
            repr: Some(handle.to_string()),
        }),
        Value::Figure(_) => {
            return Err(marshal_error(
                "matlab.ui.Figure",
                "graphics handles cannot be marshalled",
            ));
        }
    })
}

/// Convert a runtime value into an interpreter value, e.g. for `assign`.
pub fn from_runtime(value: &RuntimeValue) -> Result<Value, EngineError> {
    let invalid = |e: InterpError| marshal_error(&value.dtype(), e.to_string());
    Ok(match value {
        RuntimeValue::Scalar(v) => Value::scalar(*v),
        RuntimeValue::Bool(b) => Value::boolean(*b),
        RuntimeValue::Text(s) => Value::str(s),
        RuntimeValue::Numeric(a) => {
            let data: Vec<f64> = match a.data() {
                NumericData::F64(v) => v.clone(),
                NumericData::F32(v) => v.iter().map(|x| f64::from(*x)).collect(),
                NumericData::I64(v) => v.iter().map(|x| *x as f64).collect(),
                NumericData::U64(v) => v.iter().map(|x| *x as f64).collect(),
            };
            let array = Array::new(a.shape().dims().to_vec(), data).map_err(invalid)?;
            match a.class() {
                NumericClass::Double => Value::Num(array),
                class => Value::Typed(class, array),
            }
        }
        RuntimeValue::Complex(a) => Value::Complex(
            Array::new(a.shape().dims().to_vec(), a.data().to_vec()).map_err(invalid)?,
        )
        .simplify(),
        RuntimeValue::Logical(a) => {
            Value::Bool(Array::new(a.shape().dims().to_vec(), a.data().to_vec()).map_err(invalid)?)
        }
        RuntimeValue::Cell(c) => {
            let items = c
                .items()
                .iter()
                .map(from_runtime)
                .collect::<Result<Vec<_>, _>>()?;
            Value::Cell(Array::new(c.shape().dims().to_vec(), items).map_err(invalid)?)
        }
        RuntimeValue::Opaque(o) => {
            return Err(marshal_error(&o.class_name, "opaque values cannot be assigned"));
        }
    })
}

/// Approximate storage size of a value, without marshalling it.
fn footprint(value: &Value) -> u64 {
    let n = value.numel() as u64;
    match value {
        Value::Num(_) => n * 8,
        Value::Typed(class, _) => n * class.byte_width(),
        Value::Complex(_) => n * 16,
        Value::Bool(_) => n,
        Value::Char(_) => n * 2,
        Value::Cell(cells) => cells
            .data()
            .iter()
            .map(|item| CELL_HEADER_BYTES + footprint(item))
            .sum(),
        Value::Func(_) | Value::Figure(_) => 0,
    }
}

impl WorkspaceSource for InterpEngine {
    fn variable_names(&self) -> Result<Vec<String>, EngineError> {
        self.ensure_alive()?;
        Ok(self.interp.variable_names())
    }

    fn fetch(&self, name: &str) -> Result<RuntimeValue, EngineError> {
        self.ensure_alive()?;
        let value = self
            .interp
            .get(name)
            .ok_or_else(|| EngineError::NoSuchVariable(name.to_string()))?;
        to_runtime(value)
    }

    fn variable_bytes(&self, name: &str) -> Result<u64, EngineError> {
        self.ensure_alive()?;
        self.interp
            .get(name)
            .map(footprint)
            .ok_or_else(|| EngineError::NoSuchVariable(name.to_string()))
    }
}

impl Engine for InterpEngine {
    fn name(&self) -> &str {
        "builtin"
    }

    fn is_alive(&self) -> bool {
        !self.dead
    }

    fn eval(&mut self, code: &str) -> Result<EvalOutcome, EngineError> {
        self.ensure_alive()?;
        let result = self.interp.run(code);
        let mut outcome = EvalOutcome {
            output: self.interp.take_output(),
            fault: None,
        };
        match result {
            Ok(()) => {}
            Err(InterpError::Exit) => {
                info!("interpreter exited on request");
                self.dead = true;
            }
            Err(err) => {
                debug!(error = %err, line = ?err.line(), "script fault");
                outcome.fault = Some(fault_from(&err));
            }
        }
        Ok(outcome)
    }

    fn assign(&mut self, name: &str, value: RuntimeValue) -> Result<(), EngineError> {
        self.ensure_alive()?;
        let value = from_runtime(&value)?;
        self.interp.set(name, value);
        Ok(())
    }

    fn clear(&mut self, name: &str) -> Result<(), EngineError> {
        self.ensure_alive()?;
        self.interp.remove(name);
        Ok(())
    }

    fn clear_all(&mut self) -> Result<(), EngineError> {
        self.ensure_alive()?;
        self.interp.clear_all();
        Ok(())
    }

    fn figures(&self) -> Result<Vec<FigureInfo>, EngineError> {
        self.ensure_alive()?;
        Ok(self.interp.figures().infos())
    }

    fn render_figure(&self, id: u32, format: FigureFormat) -> Result<RenderedFigure, EngineError> {
        self.ensure_alive()?;
        if format != FigureFormat::Svg {
            return Err(EngineError::Other(format!(
                "figure format {format} is not supported"
            )));
        }
        let figure = self
            .interp
            .figures()
            .get(id)
            .ok_or(EngineError::NoSuchFigure(id))?;
        Ok(RenderedFigure {
            id,
            format,
            bytes: render_svg(figure).into_bytes(),
        })
    }

    fn close_figures(&mut self) -> Result<(), EngineError> {
        self.ensure_alive()?;
        self.interp.figures_mut().close_all();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fault_reports_line_and_keeps_state() {
        let mut engine = InterpEngine::new();
        let outcome = engine
            .eval("a = 1;\nb = 2;\nc = undefined_thing + 1;\nd = 4;")
            .unwrap();
        let fault = outcome.fault.unwrap();
        assert_eq!(fault.line, Some(3));
        assert_eq!(fault.identifier.as_deref(), Some("MATLAB:UndefinedFunction"));
        assert_eq!(engine.variable_names().unwrap(), vec!["a", "b"]);
    }

    #[test]
    fn marshals_arrays_column_major() {
        let mut engine = InterpEngine::new();
        engine.eval("m = [1 2 3; 4 5 6];").unwrap();
        let RuntimeValue::Numeric(a) = engine.fetch("m").unwrap() else {
            panic!("expected numeric")
        };
        assert_eq!(a.shape().dims(), &[2, 3]);
        assert_eq!(a.data(), &NumericData::F64(vec![1.0, 4.0, 2.0, 5.0, 3.0, 6.0]));
    }

    #[test]
    fn marshals_scalars_text_and_classes() {
        let mut engine = InterpEngine::new();
        engine
            .eval("x = 2.5; s = 'hi'; t = true; k = int16([1 -2]); f = @(v) v + 1;")
            .unwrap();
        assert_eq!(engine.fetch("x").unwrap(), RuntimeValue::Scalar(2.5));
        assert_eq!(engine.fetch("s").unwrap(), RuntimeValue::Text("hi".into()));
        assert_eq!(engine.fetch("t").unwrap(), RuntimeValue::Bool(true));
        let RuntimeValue::Numeric(k) = engine.fetch("k").unwrap() else {
            panic!("expected numeric")
        };
        assert_eq!(k.class(), NumericClass::Int16);
        assert_eq!(k.data(), &NumericData::I64(vec![1, -2]));
        let RuntimeValue::Opaque(f) = engine.fetch("f").unwrap() else {
            panic!("expected opaque")
        };
        assert_eq!(f.class_name, "function_handle");
        assert_eq!(f.repr.as_deref(), Some("@(v)v+1"));
    }

    #[test]
    fn figure_handles_do_not_marshal() {
        let mut engine = InterpEngine::new();
        engine.eval("f = figure;").unwrap();
        assert!(matches!(
            engine.fetch("f"),
            Err(EngineError::Marshal { .. })
        ));
        assert_eq!(engine.variable_bytes("f").unwrap(), 0);
    }

    #[test]
    fn assign_round_trips_through_workspace() {
        let mut engine = InterpEngine::new();
        let cell = RuntimeValue::Cell(CellArray::row(vec![
            RuntimeValue::Scalar(1.0),
            RuntimeValue::Text("two".into()),
        ]));
        engine.assign("c", cell.clone()).unwrap();
        let outcome = engine.eval("n = numel(c); s = c{2};").unwrap();
        assert!(outcome.fault.is_none());
        assert_eq!(engine.fetch("n").unwrap(), RuntimeValue::Scalar(2.0));
        assert_eq!(engine.fetch("c").unwrap(), cell);
    }

    #[test]
    fn renders_svg_figures() {
        let mut engine = InterpEngine::new();
        engine.eval("plot([1 2 3]); title('Line');").unwrap();
        let figures = engine.figures().unwrap();
        assert_eq!(figures.len(), 1);
        let rendered = engine.render_figure(figures[0].id, FigureFormat::Svg).unwrap();
        let svg = String::from_utf8(rendered.bytes).unwrap();
        assert!(svg.starts_with("<svg"));
        assert!(svg.contains("Line"));
        assert!(matches!(
            engine.render_figure(figures[0].id, FigureFormat::Png),
            Err(EngineError::Other(_))
        ));
        engine.close_figures().unwrap();
        assert!(engine.figures().unwrap().is_empty());
    }

    #[test]
    fn exit_disconnects() {
        let mut engine = InterpEngine::new();
        let outcome = engine.eval("disp('bye'); exit").unwrap();
        assert_eq!(outcome.output, "bye\n");
        assert!(!engine.is_alive());
        assert!(matches!(
            engine.eval("x = 1"),
            Err(EngineError::Disconnected(_))
        ));
    }

    #[test]
    fn step_limit_is_a_fault() {
        let mut engine = InterpEngine::with_step_limit(1_000);
        let outcome = engine.eval("while true\nend").unwrap();
        let fault = outcome.fault.unwrap();
        assert_eq!(fault.identifier.as_deref(), Some("matbridge:stepLimit"));
        assert!(engine.is_alive());
    }
}

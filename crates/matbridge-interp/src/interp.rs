//! Tree-walking evaluator.
//!
//! One [`Interpreter`] owns a workspace, the figures drawn so far and the
//! output produced by the current run. Every statement and loop iteration
//! consumes one step from a budget so runaway loops end with an error.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Instant;

use matbridge_core::Complex;
use rand::rngs::StdRng;
use rand::SeedableRng;
use tracing::{debug, warn};

use crate::ast::{Expr, LValue, PostfixOp, Stmt, StmtKind, Subscript};
use crate::error::{InterpError, InterpResult};
use crate::format;
use crate::index::{
    assign_brace, assign_paren, brace_values, empty_like, end_value, index_value, IndexArg,
};
use crate::ops;
use crate::parser::{parse, parse_expression};
use crate::plot::FigureStore;
use crate::value::{Array, FunctionHandle, Value};

/// Steps allowed per `run` unless configured otherwise.
pub const DEFAULT_STEP_LIMIT: u64 = 50_000_000;

const MAX_CALL_DEPTH: usize = 256;

struct EndContext {
    shape: Vec<usize>,
    position: usize,
    count: usize,
}

enum Flow {
    Next,
    Break,
    Continue,
    Return,
}

pub struct Interpreter {
    vars: BTreeMap<String, Value>,
    out: String,
    pub(crate) figures: FigureStore,
    pub(crate) rng: StdRng,
    pub(crate) timer: Option<Instant>,
    steps: u64,
    step_limit: u64,
    depth: usize,
    ends: Vec<EndContext>,
}

impl Default for Interpreter {
    fn default() -> Self {
        Self::new()
    }
}

impl Interpreter {
    pub fn new() -> Self {
        Self::with_step_limit(DEFAULT_STEP_LIMIT)
    }

    pub fn with_step_limit(step_limit: u64) -> Self {
        Self {
            vars: BTreeMap::new(),
            out: String::new(),
            figures: FigureStore::new(),
            rng: StdRng::seed_from_u64(0),
            timer: None,
            steps: 0,
            step_limit,
            depth: 0,
            ends: Vec::new(),
        }
    }

    /// Parse and execute `source`. Output and workspace changes made before
    /// an error are kept.
    pub fn run(&mut self, source: &str) -> InterpResult<()> {
        let program = parse(source)?;
        debug!(statements = program.len(), "executing script");
        self.steps = 0;
        self.depth = 0;
        self.ends.clear();
        self.exec_block(&program).map(|_| ())
    }

    /// Evaluate a single expression, e.g. for `str2num`.
    pub fn eval_source(&mut self, source: &str) -> InterpResult<Value> {
        let expr = parse_expression(source)?;
        self.eval(&expr)
    }

    pub fn take_output(&mut self) -> String {
        std::mem::take(&mut self.out)
    }

    pub(crate) fn print(&mut self, text: &str) {
        self.out.push_str(text);
    }

    pub fn variable_names(&self) -> Vec<String> {
        self.vars.keys().cloned().collect()
    }

    pub fn get(&self, name: &str) -> Option<&Value> {
        self.vars.get(name)
    }

    pub fn set(&mut self, name: impl Into<String>, value: Value) {
        self.vars.insert(name.into(), value);
    }

    pub fn remove(&mut self, name: &str) -> Option<Value> {
        self.vars.remove(name)
    }

    pub fn clear_all(&mut self) {
        self.vars.clear();
    }

    pub fn figures(&self) -> &FigureStore {
        &self.figures
    }

    pub fn figures_mut(&mut self) -> &mut FigureStore {
        &mut self.figures
    }

    fn tick(&mut self) -> InterpResult<()> {
        self.steps += 1;
        if self.steps > self.step_limit {
            warn!(limit = self.step_limit, "step limit exceeded");
            return Err(InterpError::StepLimit {
                limit: self.step_limit,
                line: None,
            });
        }
        Ok(())
    }

    // ── Statements ────────────────────────────────────────────

    fn exec_block(&mut self, stmts: &[Stmt]) -> InterpResult<Flow> {
        for stmt in stmts {
            match self.exec(stmt).map_err(|e| e.at_line(stmt.line))? {
                Flow::Next => {}
                flow => return Ok(flow),
            }
        }
        Ok(Flow::Next)
    }

    fn exec(&mut self, stmt: &Stmt) -> InterpResult<Flow> {
        self.tick()?;
        match &stmt.kind {
            StmtKind::Expr { expr, display } => self.exec_expr(expr, *display)?,
            StmtKind::Assign {
                targets,
                value,
                display,
            } => self.exec_assign(targets, value, *display)?,
            StmtKind::If {
                branches,
                otherwise,
            } => {
                for (cond, body) in branches {
                    if self.eval(cond)?.is_true()? {
                        return self.exec_block(body);
                    }
                }
                if let Some(body) = otherwise {
                    return self.exec_block(body);
                }
            }
            StmtKind::For { var, iter, body } => {
                let iter = self.eval(iter)?;
                let count = if iter.is_empty() {
                    0
                } else {
                    iter.shape()[1..].iter().product()
                };
                for k in 0..count {
                    self.tick()?;
                    let column = index_value(
                        &iter,
                        &[
                            IndexArg::Colon,
                            IndexArg::Value(Value::scalar((k + 1) as f64)),
                        ],
                    )?;
                    self.vars.insert(var.clone(), column);
                    match self.exec_block(body)? {
                        Flow::Break => break,
                        Flow::Return => return Ok(Flow::Return),
                        Flow::Next | Flow::Continue => {}
                    }
                }
            }
            StmtKind::While { cond, body } => loop {
                self.tick()?;
                if !self.eval(cond)?.is_true()? {
                    break;
                }
                match self.exec_block(body)? {
                    Flow::Break => break,
                    Flow::Return => return Ok(Flow::Return),
                    Flow::Next | Flow::Continue => {}
                }
            },
            StmtKind::Break => return Ok(Flow::Break),
            StmtKind::Continue => return Ok(Flow::Continue),
            StmtKind::Return => return Ok(Flow::Return),
            StmtKind::Command { name, args } => {
                let args = args.iter().map(|a| Value::str(a)).collect();
                if let Some(v) = self.call_function(name, args, 0)?.into_iter().next() {
                    self.print(&format::display("ans", &v));
                    self.vars.insert("ans".to_string(), v);
                }
            }
        }
        Ok(Flow::Next)
    }

    fn exec_expr(&mut self, expr: &Expr, display: bool) -> InterpResult<()> {
        if let Expr::Ident(name) = expr {
            if let Some(v) = self.vars.get(name) {
                if display {
                    let text = format::display(name, v);
                    self.print(&text);
                }
                return Ok(());
            }
        }
        if let Some(v) = self.eval_n(expr, 0)?.into_iter().next() {
            if display {
                self.print(&format::display("ans", &v));
            }
            self.vars.insert("ans".to_string(), v);
        }
        Ok(())
    }

    fn exec_assign(&mut self, targets: &[LValue], value: &Expr, display: bool) -> InterpResult<()> {
        let values = if targets.len() == 1 {
            vec![self.eval(value)?]
        } else {
            let values = self.eval_n(value, targets.len())?;
            let needed = targets
                .iter()
                .rposition(|t| !matches!(t, LValue::Ignore))
                .map_or(0, |i| i + 1);
            if values.len() < needed {
                return Err(InterpError::with_id(
                    "MATLAB:needMoreRhsOutputs",
                    "Insufficient number of outputs from right hand side of equal sign to \
                     satisfy assignment.",
                ));
            }
            values
        };
        for (target, value) in targets.iter().zip(values) {
            let LValue::Var { name, subscript } = target else {
                continue;
            };
            match subscript {
                None => {
                    self.vars.insert(name.clone(), value);
                }
                Some(sub) => self.assign_indexed(name, sub, value)?,
            }
            if display {
                if let Some(v) = self.vars.get(name) {
                    let text = format::display(name, v);
                    self.print(&text);
                }
            }
        }
        Ok(())
    }

    fn assign_indexed(&mut self, name: &str, sub: &Subscript, value: Value) -> InterpResult<()> {
        let shape = self
            .vars
            .get(name)
            .map_or_else(|| vec![0, 0], Value::shape);
        let (args, brace) = match sub {
            Subscript::Paren(args) => (args, false),
            Subscript::Brace(args) => (args, true),
        };
        let idx = self.eval_index_args(&shape, args)?;
        let existed = self.vars.contains_key(name);
        let slot = self.vars.entry(name.to_string()).or_insert_with(|| {
            if brace {
                Value::Cell(Array::empty())
            } else {
                empty_like(&value)
            }
        });
        let result = if brace {
            assign_brace(slot, &idx, value)
        } else {
            assign_paren(slot, &idx, &value)
        };
        if result.is_err() && !existed {
            self.vars.remove(name);
        }
        result
    }

    // ── Expressions ───────────────────────────────────────────

    pub(crate) fn eval(&mut self, expr: &Expr) -> InterpResult<Value> {
        Ok(match expr {
            Expr::Number(n) => Value::scalar(*n),
            Expr::Imaginary(n) => Value::Complex(Array::scalar(Complex::new(0.0, *n))),
            Expr::Str(s) => Value::str(s),
            Expr::Colon => {
                return Err(InterpError::runtime(
                    "Colon subscripts are only valid inside an index.",
                ));
            }
            Expr::End => {
                let ctx = self.ends.last().ok_or_else(|| {
                    InterpError::runtime("'end' is only valid inside an index expression.")
                })?;
                Value::scalar(end_value(&ctx.shape, ctx.position, ctx.count) as f64)
            }
            Expr::Ident(_) | Expr::Index(..) | Expr::CellIndex(..) => {
                match self.eval_n(expr, 1)?.into_iter().next() {
                    Some(v) => v,
                    None => {
                        return Err(InterpError::with_id(
                            "MATLAB:TooManyOutputs",
                            "Too many output arguments.",
                        ));
                    }
                }
            }
            Expr::Unary(op, inner) => ops::unary(*op, &self.eval(inner)?)?,
            Expr::Postfix(op, inner) => {
                let v = self.eval(inner)?;
                ops::transpose(&v, *op == PostfixOp::Transpose)?
            }
            Expr::Binary(op, l, r) => {
                let a = self.eval(l)?;
                let b = self.eval(r)?;
                ops::binary(*op, &a, &b)?
            }
            Expr::AndAnd(l, r) => {
                let result = self.logical_scalar(l, "&&")? && self.logical_scalar(r, "&&")?;
                Value::boolean(result)
            }
            Expr::OrOr(l, r) => {
                let result = self.logical_scalar(l, "||")? || self.logical_scalar(r, "||")?;
                Value::boolean(result)
            }
            Expr::Range { start, step, stop } => {
                let start = self.eval(start)?;
                let step = match step {
                    Some(step) => Some(self.eval(step)?),
                    None => None,
                };
                let stop = self.eval(stop)?;
                let first = |v: &Value| -> InterpResult<Option<f64>> {
                    Ok(v.to_f64_array()?.data().first().copied())
                };
                let step = match &step {
                    Some(v) => first(v)?,
                    None => Some(1.0),
                };
                match (first(&start)?, step, first(&stop)?) {
                    (Some(a), Some(s), Some(b)) => ops::range(a, s, b)?,
                    _ => Value::Num(Array::new(vec![1, 0], Vec::new())?),
                }
            }
            Expr::Matrix(rows) => {
                let mut row_values = Vec::with_capacity(rows.len());
                for row in rows {
                    let mut items = Vec::with_capacity(row.len());
                    for e in row {
                        items.extend(self.eval_list(e)?);
                    }
                    row_values.push(if items.len() == 1 {
                        items.pop().unwrap_or_default()
                    } else {
                        ops::concat(items, true)?
                    });
                }
                match row_values.len() {
                    0 => Value::empty(),
                    1 => row_values.pop().unwrap_or_default(),
                    _ => ops::concat(row_values, false)?,
                }
            }
            Expr::CellLiteral(rows) => {
                let mut row_values = Vec::with_capacity(rows.len());
                for row in rows {
                    let mut items = Vec::with_capacity(row.len());
                    for e in row {
                        for v in self.eval_list(e)? {
                            items.push(Value::Cell(Array::scalar(v)));
                        }
                    }
                    if !items.is_empty() {
                        row_values.push(ops::concat(items, true)?);
                    }
                }
                if row_values.is_empty() {
                    Value::Cell(Array::empty())
                } else {
                    ops::concat(row_values, false)?
                }
            }
            Expr::FuncHandle(name) => Value::Func(Arc::new(FunctionHandle::Named(name.clone()))),
            Expr::Lambda { params, body } => {
                let mut names = Vec::new();
                free_identifiers(body, &mut names);
                let captured = names
                    .into_iter()
                    .filter(|n| !params.contains(n))
                    .filter_map(|n| self.vars.get(&n).map(|v| (n, v.clone())))
                    .collect();
                Value::Func(Arc::new(FunctionHandle::Anonymous {
                    params: params.clone(),
                    body: Arc::new((**body).clone()),
                    captured,
                }))
            }
            Expr::Paren(inner) => self.eval(inner)?,
        })
    }

    fn logical_scalar(&mut self, expr: &Expr, op: &str) -> InterpResult<bool> {
        let v = self.eval(expr)?;
        if v.numel() != 1 {
            return Err(InterpError::with_id(
                "MATLAB:nonLogicalConditional",
                format!(
                    "Operands to the {op} operator must be convertible to logical scalar values."
                ),
            ));
        }
        v.is_true()
    }

    /// Values of an element in a list context, expanding `c{:}`.
    fn eval_list(&mut self, expr: &Expr) -> InterpResult<Vec<Value>> {
        match expr {
            Expr::CellIndex(..) => self.eval_n(expr, 1),
            other => Ok(vec![self.eval(other)?]),
        }
    }

    /// Evaluate an expression that may produce several values.
    fn eval_n(&mut self, expr: &Expr, nargout: usize) -> InterpResult<Vec<Value>> {
        match expr {
            Expr::Ident(name) => match self.vars.get(name) {
                Some(v) => Ok(vec![v.clone()]),
                None => self.call_function(name, Vec::new(), nargout),
            },
            Expr::Index(base, args) => {
                if let Expr::Ident(name) = base.as_ref() {
                    return match self.vars.get(name) {
                        None => {
                            let args = self.eval_call_args(args)?;
                            self.call_function(name, args, nargout)
                        }
                        Some(Value::Func(handle)) => {
                            let handle = Arc::clone(handle);
                            let args = self.eval_call_args(args)?;
                            self.call_handle(&handle, args, nargout)
                        }
                        Some(v) => {
                            let shape = v.shape();
                            let idx = self.eval_index_args(&shape, args)?;
                            let v = self.vars.get(name).ok_or_else(|| InterpError::undefined(name))?;
                            Ok(vec![index_value(v, &idx)?])
                        }
                    };
                }
                let target = self.eval(base)?;
                if let Value::Func(handle) = &target {
                    let args = self.eval_call_args(args)?;
                    return self.call_handle(handle, args, nargout);
                }
                let idx = self.eval_index_args(&target.shape(), args)?;
                Ok(vec![index_value(&target, &idx)?])
            }
            Expr::CellIndex(base, args) => {
                if let Expr::Ident(name) = base.as_ref() {
                    if let Some(v) = self.vars.get(name) {
                        let shape = v.shape();
                        let idx = self.eval_index_args(&shape, args)?;
                        let v = self.vars.get(name).ok_or_else(|| InterpError::undefined(name))?;
                        return brace_values(v, &idx);
                    }
                    return Err(InterpError::undefined(name));
                }
                let target = self.eval(base)?;
                let idx = self.eval_index_args(&target.shape(), args)?;
                brace_values(&target, &idx)
            }
            other => Ok(vec![self.eval(other)?]),
        }
    }

    fn eval_index_args(&mut self, shape: &[usize], args: &[Expr]) -> InterpResult<Vec<IndexArg>> {
        let mut out = Vec::with_capacity(args.len());
        for (position, arg) in args.iter().enumerate() {
            if let Expr::Colon = arg {
                out.push(IndexArg::Colon);
                continue;
            }
            self.ends.push(EndContext {
                shape: shape.to_vec(),
                position,
                count: args.len(),
            });
            let value = self.eval(arg);
            self.ends.pop();
            let value = value?;
            // A ':' string subscript behaves like a bare colon.
            if value.as_text().as_deref() == Some(":") {
                out.push(IndexArg::Colon);
            } else {
                out.push(IndexArg::Value(value));
            }
        }
        Ok(out)
    }

    fn eval_call_args(&mut self, args: &[Expr]) -> InterpResult<Vec<Value>> {
        let mut out = Vec::with_capacity(args.len());
        for arg in args {
            if let Expr::Colon = arg {
                out.push(Value::str(":"));
                continue;
            }
            out.extend(self.eval_list(arg)?);
        }
        Ok(out)
    }

    // ── Calls ─────────────────────────────────────────────────

    /// Call a named function: a builtin, since scripts cannot define functions.
    pub(crate) fn call_function(
        &mut self,
        name: &str,
        args: Vec<Value>,
        nargout: usize,
    ) -> InterpResult<Vec<Value>> {
        if !crate::builtins::is_builtin(name) {
            return Err(InterpError::undefined(name));
        }
        self.call_builtin(name, args, nargout)
    }

    pub(crate) fn call_handle(
        &mut self,
        handle: &FunctionHandle,
        args: Vec<Value>,
        nargout: usize,
    ) -> InterpResult<Vec<Value>> {
        match handle {
            FunctionHandle::Named(name) => self.call_function(name, args, nargout),
            FunctionHandle::Anonymous {
                params,
                body,
                captured,
            } => {
                if args.len() > params.len() {
                    return Err(InterpError::with_id(
                        "MATLAB:TooManyInputs",
                        "Too many input arguments.",
                    ));
                }
                if self.depth >= MAX_CALL_DEPTH {
                    return Err(InterpError::with_id(
                        "MATLAB:recursionLimit",
                        format!("Maximum recursion limit of {MAX_CALL_DEPTH} reached."),
                    ));
                }
                let mut scope: BTreeMap<String, Value> = captured.iter().cloned().collect();
                scope.extend(params.iter().cloned().zip(args));
                let saved = std::mem::replace(&mut self.vars, scope);
                let saved_ends = std::mem::take(&mut self.ends);
                self.depth += 1;
                let result = self.eval_n(body, nargout);
                self.depth -= 1;
                self.ends = saved_ends;
                self.vars = saved;
                result
            }
        }
    }

    /// Call any callable value: a handle or a function name.
    pub(crate) fn call_value(
        &mut self,
        callee: &Value,
        args: Vec<Value>,
        nargout: usize,
    ) -> InterpResult<Vec<Value>> {
        match callee {
            Value::Func(handle) => self.call_handle(handle, args, nargout),
            other => match other.as_text() {
                Some(name) => self.call_function(&name, args, nargout),
                None => Err(InterpError::runtime(
                    "Argument must be a function handle or a function name.",
                )),
            },
        }
    }

    /// Call and require one value.
    pub(crate) fn call_value1(&mut self, callee: &Value, args: Vec<Value>) -> InterpResult<Value> {
        self.call_value(callee, args, 1)?
            .into_iter()
            .next()
            .ok_or_else(|| {
                InterpError::with_id("MATLAB:TooManyOutputs", "Too many output arguments.")
            })
    }
}

/// Identifiers referenced by an expression, in first-use order.
fn free_identifiers(expr: &Expr, out: &mut Vec<String>) {
    fn push(name: &String, out: &mut Vec<String>) {
        if !out.contains(name) {
            out.push(name.clone());
        }
    }
    match expr {
        Expr::Ident(name) => push(name, out),
        Expr::Number(_)
        | Expr::Imaginary(_)
        | Expr::Str(_)
        | Expr::Colon
        | Expr::End
        | Expr::FuncHandle(_) => {}
        Expr::Unary(_, e) | Expr::Postfix(_, e) | Expr::Paren(e) => free_identifiers(e, out),
        Expr::Binary(_, l, r) | Expr::AndAnd(l, r) | Expr::OrOr(l, r) => {
            free_identifiers(l, out);
            free_identifiers(r, out);
        }
        Expr::Range { start, step, stop } => {
            free_identifiers(start, out);
            if let Some(step) = step {
                free_identifiers(step, out);
            }
            free_identifiers(stop, out);
        }
        Expr::Index(base, args) | Expr::CellIndex(base, args) => {
            free_identifiers(base, out);
            args.iter().for_each(|a| free_identifiers(a, out));
        }
        Expr::Matrix(rows) | Expr::CellLiteral(rows) => rows
            .iter()
            .flatten()
            .for_each(|e| free_identifiers(e, out)),
        Expr::Lambda { params, body } => {
            let mut inner = Vec::new();
            free_identifiers(body, &mut inner);
            for name in inner.iter().filter(|n| !params.contains(n)) {
                push(name, out);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn run(source: &str) -> (Interpreter, String) {
        let mut interp = Interpreter::new();
        interp.run(source).unwrap();
        let out = interp.take_output();
        (interp, out)
    }

    #[test]
    fn assignment_echo_and_suppression() {
        let (interp, out) = run("x = 3\ny = x * 2;\nz = 1.5");
        assert_eq!(out, "x = 3\nz = 1.5000\n");
        assert_eq!(interp.get("y"), Some(&Value::scalar(6.0)));
    }

    #[test]
    fn expression_statement_sets_ans() {
        let (interp, out) = run("2 + 3");
        assert_eq!(out, "ans = 5\n");
        assert_eq!(interp.get("ans"), Some(&Value::scalar(5.0)));
    }

    #[test]
    fn control_flow() {
        let (interp, _) = run(
            "total = 0;\nfor k = 1:10\n  if mod(k, 2) == 0\n    continue\n  end\n  \
             total = total + k;\n  if k >= 7, break; end\nend\nn = 0;\nwhile n < 5\n  n = n + 2;\nend",
        );
        assert_eq!(interp.get("total"), Some(&Value::scalar(16.0)));
        assert_eq!(interp.get("n"), Some(&Value::scalar(6.0)));
    }

    #[test]
    fn indexing_with_end_and_growth() {
        let (interp, _) = run("v = [1 2 3];\nlast = v(end);\nv(end+1) = 4;");
        assert_eq!(interp.get("last"), Some(&Value::scalar(3.0)));
        assert_eq!(interp.get("v"), Some(&Value::row(vec![1.0, 2.0, 3.0, 4.0])));
    }

    #[test]
    fn errors_carry_line_and_keep_earlier_state() {
        let mut interp = Interpreter::new();
        let err = interp.run("a = 1;\nb = undefined_thing + 1;\nc = 3;").unwrap_err();
        assert_eq!(err.line(), Some(2));
        assert!(err.to_string().contains("undefined_thing"));
        assert!(interp.get("a").is_some());
        assert!(interp.get("c").is_none());
    }

    #[test]
    fn oversized_arrays_are_refused() {
        let mut interp = Interpreter::new();
        interp.run("keep = 7;").unwrap();
        for source in [
            "z = zeros(1, 2^62);",
            "o = ones(1e5, 1e5);",
            "r = 1:1e12;",
            "g = []; g(1e12) = 1;",
            "m = magic(1e6);",
        ] {
            let err = interp.run(source).unwrap_err();
            assert_eq!(
                err.identifier(),
                Some("MATLAB:array:SizeLimitExceeded"),
                "{source}"
            );
            assert!(err.to_string().contains("exceeds maximum array size"));
        }
        assert_eq!(interp.get("keep"), Some(&Value::scalar(7.0)));
        assert!(interp.get("z").is_none());
    }

    #[test]
    fn anonymous_functions_capture_values() {
        let (interp, _) = run("k = 3;\nf = @(x) x * k;\nk = 100;\ny = f(2);");
        assert_eq!(interp.get("y"), Some(&Value::scalar(6.0)));
    }

    #[test]
    fn cell_arrays_and_cs_lists() {
        let (interp, _) = run("c = {1, 'two', [3 4]};\nn = c{3}(2);\nm = [c{[1 3]}];");
        assert_eq!(interp.get("n"), Some(&Value::scalar(4.0)));
        assert_eq!(interp.get("m"), Some(&Value::row(vec![1.0, 3.0, 4.0])));
    }

    #[test]
    fn multiple_outputs() {
        let (interp, _) = run("[r, c] = size(zeros(2, 5));\n[~, i] = max([3 9 1]);");
        assert_eq!(interp.get("r"), Some(&Value::scalar(2.0)));
        assert_eq!(interp.get("c"), Some(&Value::scalar(5.0)));
        assert_eq!(interp.get("i"), Some(&Value::scalar(2.0)));
    }

    #[test]
    fn step_limit_stops_runaway_loops() {
        let mut interp = Interpreter::with_step_limit(1_000);
        let err = interp.run("x = 0;\nwhile true\n  x = x + 1;\nend").unwrap_err();
        assert!(matches!(err, InterpError::StepLimit { .. }));
        assert!(interp.get("x").is_some());
    }

    #[test]
    fn short_circuit_skips_right_side() {
        let (interp, _) = run("ok = false && undefined_fn(1);");
        assert_eq!(interp.get("ok"), Some(&Value::boolean(false)));
    }
}

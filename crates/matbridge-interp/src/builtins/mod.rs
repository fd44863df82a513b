//! Built-in functions, dispatched by name.

mod math;
mod text;

use std::f64::consts::PI;
use std::sync::Arc;
use std::time::Instant;

use matbridge_core::{Complex, NumericClass};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use tracing::{debug, trace};

use self::math::{arg, not_enough, size_args};
use crate::error::{InterpError, InterpResult};
use crate::format;
use crate::index::{index_value, IndexArg};
use crate::interp::Interpreter;
use crate::ops;
use crate::plot;
use crate::value::{cast_to, Array, FunctionHandle, Value};

/// Every name `call_builtin` answers to.
const BUILTINS: &[&str] = &[
    // construction
    "zeros", "ones", "eye", "Inf", "inf", "NaN", "nan", "pi", "eps", "i", "j", "true", "false",
    "cell", "linspace", "repmat", "reshape", "magic", "rand", "randn", "randi", "intmax",
    "intmin", "realmax", "realmin", "horzcat", "vertcat", "cat",
    // size
    "size", "numel", "length", "ndims", "isempty", "isscalar", "isvector", "isrow", "iscolumn",
    "ismatrix",
    // elementary
    "abs", "sqrt", "exp", "log", "log2", "log10", "sin", "cos", "tan", "asin", "acos", "atan",
    "sinh", "cosh", "tanh", "floor", "ceil", "round", "fix", "sign", "real", "imag", "conj",
    "angle", "mod", "rem", "atan2", "hypot", "power", "isnan", "isinf", "isfinite",
    // reductions
    "sum", "prod", "mean", "median", "std", "var", "cumsum", "cumprod", "any", "all", "max",
    "min", "sort", "find", "diff", "norm", "dot", "trapz", "nnz",
    // matrices and integers
    "det", "inv", "trace", "transpose", "fliplr", "flipud", "unique", "factorial", "nchoosek",
    "isprime", "primes", "isequal",
    // types
    "double", "single", "int8", "int16", "int32", "int64", "uint8", "uint16", "uint32",
    "uint64", "logical", "char", "class", "isa", "isnumeric", "ischar", "iscell", "islogical",
    "isreal", "isfloat", "isinteger", "isstruct", "isstring", "iscellstr", "func2str",
    "str2func", "num2cell",
    // text
    "strcat", "upper", "lower", "strtrim", "deblank", "strsplit", "strjoin", "strrep", "strcmp",
    "strcmpi", "contains", "startsWith", "endsWith", "num2str", "int2str", "str2double",
    "str2num", "mat2str", "sprintf", "regexprep", "regexp", "blanks", "isspace",
    // output
    "disp", "fprintf", "error", "warning",
    // session state
    "rng", "tic", "toc", "clc", "clear", "clearvars", "who", "exist", "format", "exit", "quit",
    // functional
    "feval", "cellfun", "arrayfun", "deal",
    // figures
    "figure", "plot", "hold", "title", "xlabel", "ylabel", "grid", "legend", "close", "clf",
    "gcf", "drawnow",
];

pub fn is_builtin(name: &str) -> bool {
    BUILTINS.contains(&name)
}

fn count(n: usize) -> Value {
    Value::scalar(n as f64)
}

/// `on`/`off` argument of `hold` and `grid`; no argument toggles.
fn switch(args: &[Value], current: bool) -> InterpResult<bool> {
    match args.first() {
        None => Ok(!current),
        Some(v) => match v.expect_text("Option")?.to_ascii_lowercase().as_str() {
            "on" => Ok(true),
            "off" => Ok(false),
            other => Err(InterpError::runtime(format!("Unknown option '{other}'."))),
        },
    }
}

fn eps(args: &[Value]) -> InterpResult<Value> {
    let spacing = |x: f64| {
        let x = x.abs();
        if !x.is_finite() {
            f64::NAN
        } else if x < f64::MIN_POSITIVE {
            f64::from_bits(1)
        } else {
            2f64.powi(x.log2().floor() as i32 - 52)
        }
    };
    match args.first() {
        None => Ok(Value::scalar(f64::EPSILON)),
        Some(v) => match v.as_text().as_deref() {
            Some("single") => Ok(Value::Typed(
                NumericClass::Single,
                Array::scalar(f32::EPSILON as f64),
            )),
            Some("double") => Ok(Value::scalar(f64::EPSILON)),
            Some(other) => Err(InterpError::runtime(format!("Class name '{other}' is not supported."))),
            None => Ok(Value::Num(v.to_f64_array()?.map(|x| spacing(*x)))),
        },
    }
}

fn int_limit(args: &[Value], max: bool) -> InterpResult<Value> {
    let class = match args.first() {
        Some(v) => {
            let name = v.expect_text("Class name")?;
            NumericClass::parse(&name)
                .filter(|c| c.is_signed_integer() || c.is_unsigned_integer())
                .ok_or_else(|| InterpError::runtime(format!("Invalid class name '{name}'.")))?
        }
        None => NumericClass::Int32,
    };
    let limit = if max { f64::INFINITY } else { f64::NEG_INFINITY };
    Ok(Value::Typed(class, Array::scalar(cast_to(class, limit))))
}

fn convert(v: &Value, class: NumericClass) -> InterpResult<Value> {
    match (class, v) {
        (NumericClass::Double, Value::Complex(_)) => Ok(v.clone()),
        (NumericClass::Double, other) => Ok(Value::Num(other.to_f64_array()?)),
        (c, Value::Complex(_)) => Err(InterpError::runtime(format!(
            "Complex values cannot be converted to {c}."
        ))),
        (c, other) => Ok(Value::Typed(c, other.to_f64_array()?.map(|x| cast_to(c, *x)))),
    }
}

fn to_char(args: &[Value]) -> InterpResult<Value> {
    let code = |x: f64| char::from_u32(x.max(0.0) as u32).unwrap_or('\0');
    match args {
        [] => Ok(Value::str("")),
        [Value::Char(_)] => Ok(args[0].clone()),
        [Value::Cell(cells)] => {
            let lines = cells
                .data()
                .iter()
                .map(|c| c.expect_text("Cell elements"))
                .collect::<InterpResult<Vec<_>>>()?;
            Ok(text::char_rows(&lines))
        }
        [single] => Ok(Value::Char(single.to_f64_array()?.map(|x| code(*x)))),
        many => {
            let lines = many
                .iter()
                .map(|v| match v.as_text() {
                    Some(t) => Ok(t),
                    None => Ok(v.to_f64_array()?.data().iter().map(|x| code(*x)).collect()),
                })
                .collect::<InterpResult<Vec<String>>>()?;
            Ok(text::char_rows(&lines))
        }
    }
}

fn isa(v: &Value, class: &str) -> bool {
    match class {
        "numeric" => v.is_numeric(),
        "float" => matches!(
            v,
            Value::Num(_) | Value::Complex(_) | Value::Typed(NumericClass::Single, _)
        ),
        "integer" => matches!(v, Value::Typed(c, _) if !c.is_float()),
        other => v.class_name() == other,
    }
}

fn values_equal(a: &Value, b: &Value) -> bool {
    match (a, b) {
        (Value::Cell(x), Value::Cell(y)) => {
            x.shape() == y.shape()
                && x.data().iter().zip(y.data()).all(|(p, q)| values_equal(p, q))
        }
        (Value::Cell(_), _) | (_, Value::Cell(_)) => false,
        (Value::Func(x), Value::Func(y)) => x == y,
        (Value::Figure(x), Value::Figure(y)) => x == y,
        _ => match (a.to_complex_array(), b.to_complex_array()) {
            (Ok(x), Ok(y)) => x.shape() == y.shape() && x.data() == y.data(),
            _ => false,
        },
    }
}

fn deal(args: Vec<Value>, nargout: usize) -> InterpResult<Vec<Value>> {
    let wanted = nargout.max(1);
    match args.len() {
        0 => Err(not_enough()),
        1 => Ok(vec![args[0].clone(); wanted]),
        n if n == wanted => Ok(args),
        _ => Err(InterpError::runtime(
            "The number of outputs should match the number of inputs.",
        )),
    }
}

fn num2cell(v: &Value) -> InterpResult<Value> {
    let items = (0..v.numel())
        .map(|i| index_value(v, &[IndexArg::Value(count(i + 1))]))
        .collect::<InterpResult<Vec<_>>>()?;
    Ok(Value::Cell(Array::new(v.shape(), items)?))
}

/// Collect per-element results of `cellfun`/`arrayfun` into one array.
fn uniform(shape: Vec<usize>, values: Vec<Value>, output: usize) -> InterpResult<Value> {
    if let Some(i) = values.iter().position(|v| v.numel() != 1) {
        return Err(InterpError::with_id(
            "MATLAB:cellfun:NotAScalarOutput",
            format!(
                "Non-scalar in Uniform output, at index {}, output {}.\nSet 'UniformOutput' to false.",
                i + 1,
                output + 1
            ),
        ));
    }
    if !values.is_empty() && values.iter().all(|v| matches!(v, Value::Bool(_))) {
        let data = values
            .iter()
            .map(|v| Ok(v.to_bool_array()?.data()[0]))
            .collect::<InterpResult<_>>()?;
        return Ok(Value::Bool(Array::new(shape, data)?));
    }
    if !values.is_empty() && values.iter().all(|v| matches!(v, Value::Complex(_) | Value::Num(_))) && values.iter().any(|v| matches!(v, Value::Complex(_))) {
        let data = values
            .iter()
            .map(|v| Ok(v.to_complex_array()?.data()[0]))
            .collect::<InterpResult<_>>()?;
        return Ok(Value::Complex(Array::new(shape, data)?));
    }
    let data = values
        .iter()
        .map(|v| Ok(v.to_f64_array()?.data()[0]))
        .collect::<InterpResult<_>>()?;
    Ok(Value::Num(Array::new(shape, data)?))
}

/// Split `error`/`warning` arguments into an identifier and a message.
fn message_parts(args: &[Value]) -> InterpResult<(Option<String>, String)> {
    let first = arg(args, 0)?.expect_text("Message")?;
    if args.len() == 1 {
        return Ok((None, first));
    }
    let looks_like_id = first.contains(':')
        && !first.contains(char::is_whitespace)
        && !first.ends_with(':')
        && !first.contains('%');
    if looks_like_id {
        let template = arg(args, 1)?.expect_text("Message")?;
        let message = format::sprintf(&template, &args[2..])?;
        Ok((Some(first), message))
    } else {
        Ok((None, format::sprintf(&first, &args[1..])?))
    }
}

impl Interpreter {
    /// Call builtin `name`. Procedures such as `disp` return no values.
    pub(crate) fn call_builtin(
        &mut self,
        name: &str,
        args: Vec<Value>,
        nargout: usize,
    ) -> InterpResult<Vec<Value>> {
        trace!(name, nargs = args.len(), nargout, "builtin call");
        let a = args.as_slice();
        let value = match name {
            // ── construction ──
            "zeros" => math::filled(a, 0.0)?,
            "ones" => math::filled(a, 1.0)?,
            "eye" => math::eye(a)?,
            "Inf" | "inf" => math::filled(a, f64::INFINITY)?,
            "NaN" | "nan" => math::filled(a, f64::NAN)?,
            "pi" => math::filled(a, PI)?,
            "eps" => eps(a)?,
            "i" | "j" => Value::Complex(Array::scalar(Complex::new(0.0, 1.0))),
            "true" => math::filled_bool(a, true)?,
            "false" => math::filled_bool(a, false)?,
            "cell" => {
                let (dims, _) = size_args(a)?;
                Value::Cell(Array::filled(dims, Value::empty()))
            }
            "linspace" => math::linspace(a)?,
            "repmat" => math::repmat(a)?,
            "reshape" => math::reshape(a)?,
            "magic" => math::magic(a)?,
            "rand" => self.random(a, false)?,
            "randn" => self.random(a, true)?,
            "randi" => self.randi(a)?,
            "intmax" => int_limit(a, true)?,
            "intmin" => int_limit(a, false)?,
            "realmax" => Value::scalar(f64::MAX),
            "realmin" => Value::scalar(f64::MIN_POSITIVE),
            "horzcat" => ops::concat(args.clone(), true)?,
            "vertcat" => ops::concat(args.clone(), false)?,
            "cat" => match arg(a, 0)?.to_usize("Dimension")? {
                1 => ops::concat(a[1..].to_vec(), false)?,
                2 => ops::concat(a[1..].to_vec(), true)?,
                _ => {
                    return Err(InterpError::runtime(
                        "cat supports concatenation along dimensions 1 and 2.",
                    ));
                }
            },

            // ── size ──
            "size" => return math::size(a, nargout),
            "numel" => count(arg(a, 0)?.numel()),
            "length" => count(math::length(arg(a, 0)?)),
            "ndims" => count(arg(a, 0)?.shape().len()),
            "isempty" => Value::boolean(arg(a, 0)?.is_empty()),
            "isscalar" => Value::boolean(arg(a, 0)?.numel() == 1),
            "isvector" => {
                let shape = arg(a, 0)?.shape();
                Value::boolean(
                    shape.len() == 2 && (shape[0] == 1 || shape[1] == 1) && shape[0] * shape[1] >= 1,
                )
            }
            "isrow" => {
                let shape = arg(a, 0)?.shape();
                Value::boolean(shape.len() == 2 && shape[0] == 1)
            }
            "iscolumn" => {
                let shape = arg(a, 0)?.shape();
                Value::boolean(shape.len() == 2 && shape[1] == 1)
            }
            "ismatrix" => Value::boolean(arg(a, 0)?.shape().len() == 2),

            // ── elementary ──
            "round" if a.len() > 1 => math::round_digits(&a[0], &a[1])?,
            n if math::ELEMENTARY.contains(&n) => math::elementary(n, arg(a, 0)?)?,
            "mod" | "rem" | "atan2" | "hypot" | "power" => {
                math::binary_math(name, arg(a, 0)?, arg(a, 1)?)?
            }
            "isnan" | "isinf" | "isfinite" => math::predicate(name, arg(a, 0)?)?,

            // ── reductions ──
            n if math::REDUCTIONS.contains(&n) => math::reduction(n, a)?,
            "cumsum" => math::cumulative(a, false)?,
            "cumprod" => math::cumulative(a, true)?,
            "any" => math::any_all(a, false)?,
            "all" => math::any_all(a, true)?,
            "max" => return math::extremum(a, nargout, true),
            "min" => return math::extremum(a, nargout, false),
            "sort" => return math::sort(a, nargout),
            "find" => return math::find(a, nargout),
            "diff" => math::diff(a)?,
            "norm" => math::norm(a)?,
            "dot" => math::dot(arg(a, 0)?, arg(a, 1)?)?,
            "trapz" => math::trapz(a)?,
            "nnz" => count(
                arg(a, 0)?
                    .to_f64_array()?
                    .data()
                    .iter()
                    .filter(|x| **x != 0.0)
                    .count(),
            ),

            // ── matrices and integers ──
            "det" => math::det(arg(a, 0)?)?,
            "inv" => math::inv(arg(a, 0)?)?,
            "trace" => math::trace(arg(a, 0)?)?,
            "transpose" => ops::transpose(arg(a, 0)?, false)?,
            "fliplr" => math::flip(arg(a, 0)?, true)?,
            "flipud" => math::flip(arg(a, 0)?, false)?,
            "unique" => math::unique(arg(a, 0)?)?,
            "factorial" => math::factorial(arg(a, 0)?)?,
            "nchoosek" => math::nchoosek(arg(a, 0)?, arg(a, 1)?)?,
            "isprime" => math::isprime(arg(a, 0)?)?,
            "primes" => math::primes(arg(a, 0)?)?,
            "isequal" => {
                if a.len() < 2 {
                    return Err(not_enough());
                }
                Value::boolean(a.windows(2).all(|w| values_equal(&w[0], &w[1])))
            }

            // ── types ──
            "logical" => Value::Bool(arg(a, 0)?.to_bool_array()?),
            "char" => to_char(a)?,
            "class" => Value::str(&arg(a, 0)?.class_name()),
            "isa" => Value::boolean(isa(arg(a, 0)?, &arg(a, 1)?.expect_text("Class name")?)),
            "isnumeric" => Value::boolean(arg(a, 0)?.is_numeric()),
            "ischar" => Value::boolean(matches!(arg(a, 0)?, Value::Char(_))),
            "iscell" => Value::boolean(matches!(arg(a, 0)?, Value::Cell(_))),
            "islogical" => Value::boolean(matches!(arg(a, 0)?, Value::Bool(_))),
            "isreal" => Value::boolean(!matches!(arg(a, 0)?, Value::Complex(_))),
            "isfloat" => Value::boolean(isa(arg(a, 0)?, "float")),
            "isinteger" => Value::boolean(isa(arg(a, 0)?, "integer")),
            "isstruct" | "isstring" => {
                arg(a, 0)?;
                Value::boolean(false)
            }
            "iscellstr" => Value::boolean(match arg(a, 0)? {
                Value::Cell(c) => c.data().iter().all(|v| v.as_text().is_some()),
                _ => false,
            }),
            "func2str" => match arg(a, 0)? {
                Value::Func(handle) => match handle.as_ref() {
                    FunctionHandle::Named(name) => Value::str(name),
                    anonymous => Value::str(&anonymous.to_string()),
                },
                _ => return Err(InterpError::runtime("Input must be a function handle.")),
            },
            "str2func" => {
                let text = arg(a, 0)?.expect_text("Function name")?;
                if text.trim_start().starts_with('@') {
                    self.eval_source(&text)?
                } else {
                    Value::Func(Arc::new(FunctionHandle::Named(text)))
                }
            }
            "num2cell" => num2cell(arg(a, 0)?)?,
            class if NumericClass::parse(class).is_some() => {
                let class = NumericClass::parse(class).ok_or_else(|| InterpError::undefined(name))?;
                convert(arg(a, 0)?, class)?
            }

            // ── text ──
            "strcat" => text::strcat(a)?,
            "upper" => text::case(arg(a, 0)?, true)?,
            "lower" => text::case(arg(a, 0)?, false)?,
            "strtrim" => text::strtrim(arg(a, 0)?)?,
            "deblank" => text::deblank(arg(a, 0)?)?,
            "strsplit" => text::strsplit(a)?,
            "strjoin" => text::strjoin(a)?,
            "strrep" => text::strrep(a)?,
            "strcmp" => text::strcmp(arg(a, 0)?, arg(a, 1)?, false)?,
            "strcmpi" => text::strcmp(arg(a, 0)?, arg(a, 1)?, true)?,
            "contains" | "startsWith" | "endsWith" => text::text_match(name, a)?,
            "num2str" => {
                let rendered = format::num2str(arg(a, 0)?, a.get(1))?;
                let lines: Vec<String> = rendered.split('\n').map(str::to_string).collect();
                text::char_rows(&lines)
            }
            "int2str" => {
                let rounded = math::elementary("round", arg(a, 0)?)?;
                Value::str(&format::num2str(&rounded, None)?)
            }
            "str2double" => text::str2double(arg(a, 0)?)?,
            "str2num" => {
                let source = arg(a, 0)?.expect_text("Input")?;
                let (value, ok) = match self.eval_source(&source) {
                    Ok(v) => (v, true),
                    Err(_) => (Value::empty(), false),
                };
                return Ok(if nargout >= 2 {
                    vec![value, Value::boolean(ok)]
                } else {
                    vec![value]
                });
            }
            "mat2str" => {
                let precision = a.get(1).map(|p| p.to_usize("Precision")).transpose()?;
                Value::str(&format::mat2str(arg(a, 0)?, precision)?)
            }
            "sprintf" => {
                let template = arg(a, 0)?.expect_text("Format")?;
                Value::str(&format::sprintf(&template, &a[1..])?)
            }
            "regexprep" => text::regexprep(a)?,
            "regexp" => return text::regexp(a, nargout),
            "blanks" => text::blanks(arg(a, 0)?)?,
            "isspace" => text::isspace(arg(a, 0)?)?,

            // ── output ──
            "disp" => {
                let text = format::disp(arg(a, 0)?);
                self.print(&text);
                return Ok(Vec::new());
            }
            "fprintf" => return self.fprintf(a, nargout),
            "error" => {
                let (identifier, message) = message_parts(a)?;
                if message.is_empty() {
                    return Ok(Vec::new());
                }
                return Err(match identifier {
                    Some(id) => InterpError::with_id(&id, message),
                    None => InterpError::runtime(message),
                });
            }
            "warning" => {
                if let Some("on" | "off") = arg(a, 0)?.as_text().as_deref() {
                    return Ok(Vec::new());
                }
                let (identifier, message) = message_parts(a)?;
                debug!(identifier = identifier.as_deref(), %message, "script warning");
                self.print(&format!("Warning: {message}\n"));
                return Ok(Vec::new());
            }

            // ── session state ──
            "rng" => {
                self.rng = match a.first() {
                    None => return Ok(Vec::new()),
                    Some(v) => match v.as_text().as_deref() {
                        Some("default") => StdRng::seed_from_u64(0),
                        Some("shuffle") => StdRng::from_entropy(),
                        Some(other) => {
                            return Err(InterpError::runtime(format!(
                                "Unknown rng setting '{other}'."
                            )));
                        }
                        None => StdRng::seed_from_u64(v.to_usize("Seed")? as u64),
                    },
                };
                return Ok(Vec::new());
            }
            "tic" => {
                self.timer = Some(Instant::now());
                return Ok(Vec::new());
            }
            "toc" => {
                let started = self.timer.ok_or_else(|| {
                    InterpError::with_id(
                        "MATLAB:toc:callTicFirst",
                        "You must call TIC without an output argument before calling TOC.",
                    )
                })?;
                let elapsed = started.elapsed().as_secs_f64();
                if nargout == 0 {
                    self.print(&format!("Elapsed time is {elapsed:.6} seconds.\n"));
                    return Ok(Vec::new());
                }
                Value::scalar(elapsed)
            }
            "clc" | "format" | "drawnow" => return Ok(Vec::new()),
            "clear" | "clearvars" => {
                let names = a
                    .iter()
                    .map(|v| v.expect_text("Variable name"))
                    .collect::<InterpResult<Vec<_>>>()?;
                if names.is_empty() || names.iter().any(|n| n == "all" || n == "-all") {
                    self.clear_all();
                } else {
                    for n in &names {
                        self.remove(n);
                    }
                }
                return Ok(Vec::new());
            }
            "who" => {
                let names = self.variable_names();
                if nargout > 0 {
                    Value::Cell(Array::column(names.iter().map(|n| Value::str(n)).collect()))
                } else {
                    if !names.is_empty() {
                        self.print(&format!("Your variables are:\n\n{}\n\n", names.join("  ")));
                    }
                    return Ok(Vec::new());
                }
            }
            "exist" => {
                let target = arg(a, 0)?.expect_text("Name")?;
                count(if self.get(&target).is_some() {
                    1
                } else if is_builtin(&target) {
                    5
                } else {
                    0
                })
            }
            "exit" | "quit" => return Err(InterpError::Exit),

            // ── functional ──
            "feval" => {
                let callee = arg(a, 0)?.clone();
                return self.call_value(&callee, a[1..].to_vec(), nargout);
            }
            "cellfun" | "arrayfun" => return self.map_elements(name, args, nargout),
            "deal" => return deal(args, nargout),

            // ── figures ──
            "figure" => {
                let id = match a.first() {
                    None => self.figures.create(),
                    Some(Value::Figure(id)) => self.figures.select(*id)?,
                    Some(v) => {
                        let n = v.to_usize("Figure number")?;
                        let id = u32::try_from(n).map_err(|_| {
                            InterpError::runtime("Figure number is out of range.")
                        })?;
                        self.figures.select(id)?
                    }
                };
                if nargout == 0 {
                    return Ok(Vec::new());
                }
                Value::Figure(id)
            }
            "plot" => {
                let series = plot::plot_series(a)?;
                self.figures.current_mut().add_series(series);
                return Ok(Vec::new());
            }
            "hold" => {
                let figure = self.figures.current_mut();
                figure.hold = switch(a, figure.hold)?;
                return Ok(Vec::new());
            }
            "grid" => {
                let figure = self.figures.current_mut();
                figure.grid = switch(a, figure.grid)?;
                figure.touch();
                return Ok(Vec::new());
            }
            "title" | "xlabel" | "ylabel" => {
                let label = arg(a, 0)?.expect_text("Label")?;
                let figure = self.figures.current_mut();
                let slot = match name {
                    "title" => &mut figure.title,
                    "xlabel" => &mut figure.xlabel,
                    _ => &mut figure.ylabel,
                };
                *slot = Some(label);
                figure.touch();
                return Ok(Vec::new());
            }
            "legend" => {
                let labels = match a {
                    [] => Some(
                        (1..=self.figures.current_mut().series.len())
                            .map(|k| format!("data{k}"))
                            .collect(),
                    ),
                    [Value::Cell(cells)] => Some(
                        cells
                            .data()
                            .iter()
                            .map(|c| c.expect_text("Legend label"))
                            .collect::<InterpResult<Vec<_>>>()?,
                    ),
                    [single] if matches!(single.as_text().as_deref(), Some("off" | "hide")) => None,
                    many => Some(
                        many.iter()
                            .map(|c| c.expect_text("Legend label"))
                            .collect::<InterpResult<Vec<_>>>()?,
                    ),
                };
                let figure = self.figures.current_mut();
                figure.legend = labels;
                figure.touch();
                return Ok(Vec::new());
            }
            "close" => {
                match a.first() {
                    None => self.figures.close_current(),
                    Some(Value::Figure(id)) => self.figures.close(*id)?,
                    Some(v) => match v.as_text().as_deref() {
                        Some("all") => self.figures.close_all(),
                        Some(other) => {
                            return Err(InterpError::runtime(format!(
                                "Invalid figure specifier '{other}'."
                            )));
                        }
                        None => {
                            let id = u32::try_from(v.to_usize("Figure number")?)
                                .map_err(|_| InterpError::runtime("Figure number is out of range."))?;
                            self.figures.close(id)?;
                        }
                    },
                }
                return Ok(Vec::new());
            }
            "clf" => {
                self.figures.current_mut().clear();
                return Ok(Vec::new());
            }
            "gcf" => Value::Figure(self.figures.current_id()),

            _ => return Err(InterpError::undefined(name)),
        };
        Ok(vec![value])
    }

    fn random(&mut self, args: &[Value], normal: bool) -> InterpResult<Value> {
        let (dims, _) = size_args(args)?;
        let numel: usize = dims.iter().product();
        let data = (0..numel)
            .map(|_| {
                if normal {
                    // Box-Muller
                    let u1: f64 = 1.0 - self.rng.gen::<f64>();
                    let u2: f64 = self.rng.gen();
                    (-2.0 * u1.ln()).sqrt() * (2.0 * PI * u2).cos()
                } else {
                    self.rng.gen()
                }
            })
            .collect();
        Ok(Value::Num(Array::new(dims, data)?))
    }

    fn randi(&mut self, args: &[Value]) -> InterpResult<Value> {
        let bounds = arg(args, 0)?.to_f64_array()?;
        let (lo, hi) = match bounds.data() {
            [hi] => (1.0, *hi),
            [lo, hi] => (*lo, *hi),
            _ => return Err(InterpError::runtime("First input must be a scalar or a 2-element vector.")),
        };
        if lo.fract() != 0.0 || hi.fract() != 0.0 || lo > hi {
            return Err(InterpError::runtime(
                "Range must be a pair of increasing integers.",
            ));
        }
        let (dims, _) = size_args(&args[1..])?;
        let numel: usize = dims.iter().product();
        let (lo, hi) = (lo as i64, hi as i64);
        let data = (0..numel)
            .map(|_| self.rng.gen_range(lo..=hi) as f64)
            .collect();
        Ok(Value::Num(Array::new(dims, data)?))
    }

    fn fprintf(&mut self, args: &[Value], nargout: usize) -> InterpResult<Vec<Value>> {
        let mut rest = args;
        if let Some(first) = rest.first() {
            if !matches!(first, Value::Char(_)) && rest.len() > 1 {
                match first.to_scalar("File identifier")? {
                    fid if fid == 1.0 || fid == 2.0 => rest = &rest[1..],
                    _ => return Err(InterpError::runtime("Invalid file identifier.")),
                }
            }
        }
        let template = arg(rest, 0)?.expect_text("Format")?;
        let text = format::sprintf(&template, &rest[1..])?;
        self.print(&text);
        if nargout > 0 {
            return Ok(vec![count(text.len())]);
        }
        Ok(Vec::new())
    }

    fn map_elements(
        &mut self,
        name: &str,
        mut args: Vec<Value>,
        nargout: usize,
    ) -> InterpResult<Vec<Value>> {
        let mut uniform_output = true;
        while args.len() >= 4 {
            let option = args[args.len() - 2].as_text();
            match option.as_deref().map(str::to_ascii_lowercase).as_deref() {
                Some("uniformoutput") => {
                    uniform_output = args[args.len() - 1].is_true()?;
                    args.truncate(args.len() - 2);
                }
                _ => break,
            }
        }
        if args.len() < 2 {
            return Err(not_enough());
        }
        let func = args.remove(0);
        let shape = args[0].shape();
        let numel = args[0].numel();
        if args.iter().any(|input| input.shape() != shape) {
            return Err(InterpError::runtime(
                "All of the input arguments must be of the same size and shape.",
            ));
        }
        let cells = name == "cellfun";
        if cells && args.iter().any(|input| !matches!(input, Value::Cell(_))) {
            return Err(InterpError::runtime("Inputs to cellfun must be cell arrays."));
        }
        let outputs = nargout.max(1);
        let mut results: Vec<Vec<Value>> = vec![Vec::with_capacity(numel); outputs];
        for i in 0..numel {
            let call_args = args
                .iter()
                .map(|input| match input {
                    Value::Cell(c) if cells => Ok(c.data()[i].clone()),
                    other => index_value(other, &[IndexArg::Value(count(i + 1))]),
                })
                .collect::<InterpResult<Vec<_>>>()?;
            let out = self.call_value(&func, call_args, outputs)?;
            if out.len() < outputs {
                if nargout == 0 && out.is_empty() {
                    continue;
                }
                return Err(InterpError::with_id(
                    "MATLAB:TooManyOutputs",
                    "Too many output arguments.",
                ));
            }
            for (k, v) in out.into_iter().take(outputs).enumerate() {
                results[k].push(v);
            }
        }
        if nargout == 0 && numel > 0 && results[0].is_empty() {
            return Ok(Vec::new());
        }
        results
            .into_iter()
            .enumerate()
            .map(|(k, values)| {
                if uniform_output {
                    uniform(shape.clone(), values, k)
                } else {
                    Ok(Value::Cell(Array::new(shape.clone(), values)?))
                }
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn run(source: &str) -> Interpreter {
        let mut interp = Interpreter::new();
        interp.run(source).unwrap();
        interp
    }

    fn var(interp: &Interpreter, name: &str) -> Value {
        interp.get(name).cloned().unwrap()
    }

    #[test]
    fn every_listed_name_dispatches() {
        for name in BUILTINS {
            let mut interp = Interpreter::new();
            if let Err(InterpError::Runtime {
                identifier: Some(id),
                ..
            }) = interp.call_builtin(name, Vec::new(), 1)
            {
                assert_ne!(id, "MATLAB:UndefinedFunction", "{name} is listed but not dispatched");
            }
        }
    }

    #[test]
    fn cellfun_uniform_and_cell_outputs() {
        let interp = run("c = {'ab', 'cde', ''}; n = cellfun(@length, c); \
                          e = cellfun('isempty', c); u = cellfun(@upper, c, 'UniformOutput', false);");
        assert_eq!(var(&interp, "n"), Value::row(vec![2.0, 3.0, 0.0]));
        assert_eq!(var(&interp, "e"), Value::Bool(Array::row(vec![false, false, true])));
        let Value::Cell(u) = var(&interp, "u") else { panic!() };
        assert_eq!(u.data()[1], Value::str("CDE"));
    }

    #[test]
    fn arrayfun_with_anonymous_function() {
        let interp = run("sq = arrayfun(@(x) x^2, [1 2 3]);");
        assert_eq!(var(&interp, "sq"), Value::row(vec![1.0, 4.0, 9.0]));
    }

    #[test]
    fn error_with_identifier_and_format() {
        let mut interp = Interpreter::new();
        let err = interp.run("error('pkg:bad', 'value %d too big', 7);").unwrap_err();
        assert_eq!(err.identifier(), Some("pkg:bad"));
        assert_eq!(err.to_string(), "value 7 too big");
        assert_eq!(err.line(), Some(1));
    }

    #[test]
    fn fprintf_and_disp_write_output() {
        let mut interp = run("fprintf('%d-%d\\n', 1, 2); disp('hi'); fprintf(1, 'x\\n');");
        assert_eq!(interp.take_output(), "1-2\nhi\nx\n");
    }

    #[test]
    fn rng_makes_random_streams_repeatable() {
        let interp = run("rng(7); a = rand(1, 3); rng(7); b = rand(1, 3); r = randi([5 6], 2, 2);");
        assert_eq!(var(&interp, "a"), var(&interp, "b"));
        let r = var(&interp, "r").to_f64_array().unwrap();
        assert!(r.data().iter().all(|x| *x == 5.0 || *x == 6.0));
    }

    #[test]
    fn figures_track_state() {
        let mut interp = run("figure; plot([1 2 3], [4 5 6], 'r--'); hold on; plot([3 2 1]); \
                              title('T'); legend('a', 'b'); figure(4); close(4);");
        let ids: Vec<u32> = interp.figures().infos().iter().map(|f| f.id).collect();
        assert_eq!(ids, vec![1]);
        let fig = interp.figures_mut().current_mut();
        assert_eq!(fig.series.len(), 2);
        assert_eq!(fig.title.as_deref(), Some("T"));
        assert_eq!(fig.legend, Some(vec!["a".to_string(), "b".to_string()]));
    }

    #[test]
    fn conversions_and_class_queries() {
        let interp = run("a = int8(300); b = class(a); c = isa(a, 'integer'); d = char([72 105]); \
                          e = intmax('uint8'); f = double('A');");
        assert_eq!(var(&interp, "a"), Value::Typed(NumericClass::Int8, Array::scalar(127.0)));
        assert_eq!(var(&interp, "b"), Value::str("int8"));
        assert_eq!(var(&interp, "c"), Value::boolean(true));
        assert_eq!(var(&interp, "d"), Value::str("Hi"));
        assert_eq!(var(&interp, "e"), Value::Typed(NumericClass::Uint8, Array::scalar(255.0)));
        assert_eq!(var(&interp, "f"), Value::scalar(65.0));
    }

    #[test]
    fn exit_stops_the_run() {
        let mut interp = Interpreter::new();
        assert_eq!(interp.run("x = 1; exit; y = 2;"), Err(InterpError::Exit));
        assert!(interp.get("x").is_some());
        assert!(interp.get("y").is_none());
    }

    #[test]
    fn clear_removes_named_variables() {
        let interp = run("a = 1; b = 2; clear a");
        assert!(interp.get("a").is_none());
        assert!(interp.get("b").is_some());
    }

    #[test]
    fn num2str_and_sprintf_builtins() {
        let interp = run("s = num2str(pi); t = sprintf('%5.2f|', [1.5 2.25]); m = mat2str([1 2;3 4]);");
        assert_eq!(var(&interp, "s"), Value::str("3.1416"));
        assert_eq!(var(&interp, "t"), Value::str(" 1.50| 2.25|"));
        assert_eq!(var(&interp, "m"), Value::str("[1 2;3 4]"));
    }
}

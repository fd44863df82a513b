//! Numeric builtins: construction, elementary functions, reductions and a
//! little linear algebra.

use std::cmp::Ordering;

use matbridge_core::{Complex, NumericClass};

use crate::ast::BinOp;
use crate::error::{InterpError, InterpResult};
use crate::index::{index_value, IndexArg};
use crate::ops::{self, broadcast, c_add, c_exp, c_log, c_mul, c_sqrt};
use crate::value::{cast_to, checked_numel, Array, Value};

pub(super) fn not_enough() -> InterpError {
    InterpError::with_id("MATLAB:minrhs", "Not enough input arguments.")
}

pub(super) fn arg(args: &[Value], i: usize) -> InterpResult<&Value> {
    args.get(i).ok_or_else(not_enough)
}

// ── Construction ──────────────────────────────────────────────

fn size_input(v: f64) -> InterpResult<usize> {
    if !v.is_finite() || v.fract() != 0.0 {
        return Err(InterpError::with_id(
            "MATLAB:NonIntegerInput",
            "Size inputs must be integers.",
        ));
    }
    Ok(v.max(0.0) as usize)
}

/// Dimensions from `f(n)`, `f(m, n, ...)` or `f([m n ...])`, with an
/// optional trailing class name.
pub(super) fn size_args(args: &[Value]) -> InterpResult<(Vec<usize>, Option<NumericClass>)> {
    let mut args = args;
    let mut class = None;
    if let Some(text) = args.last().and_then(Value::as_text) {
        class = Some(NumericClass::parse(&text).ok_or_else(|| {
            InterpError::runtime(format!("Class name '{text}' is not supported."))
        })?);
        args = &args[..args.len() - 1];
    }
    let dims = match args {
        [] => vec![1, 1],
        [one] => {
            let a = one.to_f64_array()?;
            if a.numel() == 1 {
                let n = size_input(a.data()[0])?;
                vec![n, n]
            } else {
                a.data()
                    .iter()
                    .map(|v| size_input(*v))
                    .collect::<InterpResult<_>>()?
            }
        }
        many => many
            .iter()
            .map(|v| size_input(v.to_scalar("Size input")?))
            .collect::<InterpResult<_>>()?,
    };
    checked_numel(&dims)?;
    Ok((dims, class))
}

pub(super) fn filled(args: &[Value], value: f64) -> InterpResult<Value> {
    let (dims, class) = size_args(args)?;
    let a = Array::filled(dims, value);
    Ok(match class {
        Some(c) if c != NumericClass::Double => Value::Typed(c, a.map(|v| cast_to(c, *v))),
        _ => Value::Num(a),
    })
}

pub(super) fn filled_bool(args: &[Value], value: bool) -> InterpResult<Value> {
    let (dims, _) = size_args(args)?;
    Ok(Value::Bool(Array::filled(dims, value)))
}

pub(super) fn eye(args: &[Value]) -> InterpResult<Value> {
    let (dims, class) = size_args(args)?;
    if dims.len() != 2 {
        return Err(InterpError::runtime("N-dimensional identity matrices are not supported."));
    }
    let (r, c) = (dims[0], dims[1]);
    let mut data = vec![0.0; r * c];
    for k in 0..r.min(c) {
        data[k * r + k] = 1.0;
    }
    let a = Array::new(vec![r, c], data)?;
    Ok(match class {
        Some(c) if c != NumericClass::Double => Value::Typed(c, a),
        _ => Value::Num(a),
    })
}

pub(super) fn linspace(args: &[Value]) -> InterpResult<Value> {
    let a = arg(args, 0)?.to_scalar("linspace start")?;
    let b = arg(args, 1)?.to_scalar("linspace end")?;
    let n = match args.get(2) {
        Some(v) => v.to_scalar("Number of points")?.floor(),
        None => 100.0,
    };
    if n < 1.0 {
        return Ok(Value::Num(Array::new(vec![1, 0], Vec::new())?));
    }
    let n = checked_numel(&[1, n as usize])?;
    if n == 1 {
        return Ok(Value::scalar(b));
    }
    let step = (b - a) / (n - 1) as f64;
    let mut data: Vec<f64> = (0..n).map(|i| a + step * i as f64).collect();
    data[n - 1] = b;
    Ok(Value::row(data))
}

pub(super) fn repmat(args: &[Value]) -> InterpResult<Value> {
    let v = arg(args, 0)?;
    let (reps, _) = size_args(args.get(1..).filter(|r| !r.is_empty()).ok_or_else(not_enough)?)?;
    let shape = v.shape();
    let count = reps.len().max(shape.len());
    let tiled: Vec<usize> = (0..count)
        .map(|d| {
            let extent = shape.get(d).copied().unwrap_or(1);
            extent.saturating_mul(reps.get(d).copied().unwrap_or(1))
        })
        .collect();
    checked_numel(&tiled)?;
    let subs = (0..count)
        .map(|d| {
            let extent = shape.get(d).copied().unwrap_or(1);
            let times = reps.get(d).copied().unwrap_or(1);
            let idx: Vec<f64> = (0..extent * times).map(|i| (i % extent + 1) as f64).collect();
            IndexArg::Value(Value::row(idx))
        })
        .collect::<Vec<_>>();
    index_value(v, &subs)
}

pub(super) fn reshape(args: &[Value]) -> InterpResult<Value> {
    let v = arg(args, 0)?;
    let rest = args.get(1..).unwrap_or_default();
    if rest.is_empty() {
        return Err(not_enough());
    }
    let mut dims: Vec<Option<usize>> = if rest.len() == 1 {
        rest[0]
            .to_f64_array()?
            .data()
            .iter()
            .map(|d| size_input(*d).map(Some))
            .collect::<InterpResult<_>>()?
    } else {
        rest.iter()
            .map(|d| {
                if d.is_empty() {
                    Ok(None)
                } else {
                    size_input(d.to_scalar("Size argument")?).map(Some)
                }
            })
            .collect::<InterpResult<_>>()?
    };
    let known: usize = dims.iter().flatten().product();
    let open = dims.iter().filter(|d| d.is_none()).count();
    if open > 1 {
        return Err(InterpError::runtime("Only one size argument can be [] for reshape."));
    }
    if open == 1 {
        let numel = v.numel();
        if known == 0 || numel % known != 0 {
            return Err(InterpError::with_id(
                "MATLAB:getReshapeDims:notDivisible",
                format!("Product of known dimensions, {known}, not divisible into total number of elements, {numel}."),
            ));
        }
        for d in dims.iter_mut().filter(|d| d.is_none()) {
            *d = Some(numel / known);
        }
    }
    let dims: Vec<usize> = dims.into_iter().flatten().collect();
    reshape_value(v, dims)
}

pub(super) fn reshape_value(v: &Value, dims: Vec<usize>) -> InterpResult<Value> {
    Ok(match v {
        Value::Num(a) => Value::Num(a.clone().reshape(dims)?),
        Value::Typed(c, a) => Value::Typed(*c, a.clone().reshape(dims)?),
        Value::Complex(a) => Value::Complex(a.clone().reshape(dims)?),
        Value::Bool(a) => Value::Bool(a.clone().reshape(dims)?),
        Value::Char(a) => Value::Char(a.clone().reshape(dims)?),
        Value::Cell(a) => Value::Cell(a.clone().reshape(dims)?),
        other => {
            return Err(InterpError::runtime(format!(
                "Cannot reshape a {} value.",
                other.class_name()
            )));
        }
    })
}

/// `magic(n)`, built the classic way for odd, doubly-even and singly-even orders.
pub(super) fn magic(args: &[Value]) -> InterpResult<Value> {
    let n = arg(args, 0)?.to_usize("Order")?;
    checked_numel(&[n, n])?;
    let m = magic_square(n);
    let mut data = Vec::with_capacity(n * n);
    for c in 0..n {
        for row in &m {
            data.push(row[c]);
        }
    }
    Ok(Value::Num(Array::new(vec![n, n], data)?))
}

fn magic_square(n: usize) -> Vec<Vec<f64>> {
    if n == 0 {
        return Vec::new();
    }
    if n % 2 == 1 {
        let mut m = vec![vec![0.0; n]; n];
        for (i, row) in m.iter_mut().enumerate() {
            for (j, cell) in row.iter_mut().enumerate() {
                let (i1, j1) = (i + 1, j + 1);
                let a = (i1 + j1 + n - (n + 3) / 2) % n;
                let b = (i1 + 2 * j1 + n - 2) % n;
                *cell = (n * a + b + 1) as f64;
            }
        }
        return m;
    }
    if n % 4 == 0 {
        let mut m = vec![vec![0.0; n]; n];
        for (i, row) in m.iter_mut().enumerate() {
            for (j, cell) in row.iter_mut().enumerate() {
                let value = (i * n + j + 1) as f64;
                let keep = ((i + 1) % 4) / 2 == ((j + 1) % 4) / 2;
                *cell = if keep { (n * n + 1) as f64 - value } else { value };
            }
        }
        return m;
    }
    let p = n / 2;
    let small = magic_square(p);
    let pp = (p * p) as f64;
    let mut m = vec![vec![0.0; n]; n];
    for i in 0..p {
        for j in 0..p {
            let v = small[i][j];
            m[i][j] = v;
            m[i + p][j + p] = v + pp;
            m[i][j + p] = v + 2.0 * pp;
            m[i + p][j] = v + 3.0 * pp;
        }
    }
    if n == 2 {
        return m;
    }
    let k = (n - 2) / 4;
    let mut cols: Vec<usize> = (0..k).collect();
    cols.extend((n - k + 1)..n);
    for i in 0..p {
        for &j in &cols {
            let tmp = m[i][j];
            m[i][j] = m[i + p][j];
            m[i + p][j] = tmp;
        }
    }
    for j in [0, k] {
        let tmp = m[k][j];
        m[k][j] = m[k + p][j];
        m[k + p][j] = tmp;
    }
    m
}

// ── Size queries ──────────────────────────────────────────────

pub(super) fn size(args: &[Value], nargout: usize) -> InterpResult<Vec<Value>> {
    let shape = arg(args, 0)?.shape();
    if let Some(d) = args.get(1) {
        let d = d.to_usize("Dimension argument")?;
        if d == 0 {
            return Err(InterpError::runtime(
                "Dimension argument must be a positive integer scalar.",
            ));
        }
        return Ok(vec![Value::scalar(
            shape.get(d - 1).copied().unwrap_or(1) as f64,
        )]);
    }
    if nargout <= 1 {
        return Ok(vec![Value::row(shape.iter().map(|&d| d as f64).collect())]);
    }
    Ok((0..nargout)
        .map(|i| {
            let d = if i + 1 < nargout {
                shape.get(i).copied().unwrap_or(1)
            } else if i < shape.len() {
                shape[i..].iter().product()
            } else {
                1
            };
            Value::scalar(d as f64)
        })
        .collect())
}

pub(super) fn length(v: &Value) -> usize {
    if v.is_empty() {
        0
    } else {
        v.shape().into_iter().max().unwrap_or(0)
    }
}

// ── Element-wise functions ────────────────────────────────────

fn map_real(v: &Value, f: impl Fn(f64) -> f64) -> InterpResult<Value> {
    match v {
        Value::Typed(c, a) => Ok(Value::Typed(*c, a.map(|x| cast_to(*c, f(*x))))),
        other => Ok(Value::Num(other.to_f64_array()?.map(|x| f(*x)))),
    }
}

fn map_complex(v: &Value, f: impl Fn(Complex) -> Complex) -> InterpResult<Value> {
    Ok(Value::Complex(v.to_complex_array()?.map(|z| f(*z))).simplify())
}

fn any_negative(v: &Value) -> InterpResult<bool> {
    Ok(v.to_f64_array()?.data().iter().any(|x| *x < 0.0))
}

fn sign(x: f64) -> f64 {
    if x > 0.0 {
        1.0
    } else if x < 0.0 {
        -1.0
    } else {
        x
    }
}

pub(super) const ELEMENTARY: &[&str] = &[
    "abs", "sqrt", "exp", "log", "log2", "log10", "sin", "cos", "tan", "asin", "acos", "atan",
    "sinh", "cosh", "tanh", "floor", "ceil", "round", "fix", "sign", "real", "imag", "conj",
    "angle",
];

pub(super) fn elementary(name: &str, v: &Value) -> InterpResult<Value> {
    let complex = matches!(v, Value::Complex(_));
    let parts = |f: fn(f64) -> f64| map_complex(v, move |z| Complex::new(f(z.re), f(z.im)));
    match name {
        "abs" if complex => Ok(Value::Num(v.to_complex_array()?.map(|z| z.norm()))),
        "abs" => map_real(v, f64::abs),
        "sqrt" if complex || any_negative(v)? => map_complex(v, c_sqrt),
        "sqrt" => map_real(v, f64::sqrt),
        "exp" if complex => map_complex(v, c_exp),
        "exp" => map_real(v, f64::exp),
        "log" if complex || any_negative(v)? => map_complex(v, c_log),
        "log" => map_real(v, f64::ln),
        "log2" => map_real(v, f64::log2),
        "log10" => map_real(v, f64::log10),
        "sin" => map_real(v, f64::sin),
        "cos" => map_real(v, f64::cos),
        "tan" => map_real(v, f64::tan),
        "asin" => map_real(v, f64::asin),
        "acos" => map_real(v, f64::acos),
        "atan" => map_real(v, f64::atan),
        "sinh" => map_real(v, f64::sinh),
        "cosh" => map_real(v, f64::cosh),
        "tanh" => map_real(v, f64::tanh),
        "floor" if complex => parts(f64::floor),
        "floor" => map_real(v, f64::floor),
        "ceil" if complex => parts(f64::ceil),
        "ceil" => map_real(v, f64::ceil),
        "round" if complex => parts(f64::round),
        "round" => map_real(v, f64::round),
        "fix" if complex => parts(f64::trunc),
        "fix" => map_real(v, f64::trunc),
        "sign" => map_real(v, sign),
        "real" if complex => Ok(Value::Num(v.to_complex_array()?.map(|z| z.re))),
        "real" => map_real(v, |x| x),
        "imag" if complex => Ok(Value::Num(v.to_complex_array()?.map(|z| z.im))),
        "imag" => map_real(v, |_| 0.0),
        "conj" if complex => map_complex(v, |z| Complex::new(z.re, -z.im)),
        "conj" => map_real(v, |x| x),
        "angle" => Ok(Value::Num(v.to_complex_array()?.map(|z| z.im.atan2(z.re)))),
        _ => Err(InterpError::undefined(name)),
    }
}

pub(super) fn round_digits(v: &Value, digits: &Value) -> InterpResult<Value> {
    let n = digits.to_scalar("Number of digits")?;
    let scale = 10f64.powf(n);
    map_real(v, move |x| (x * scale).round() / scale)
}

/// Two-operand functions that keep an integer class.
pub(super) fn binary_math(name: &str, a: &Value, b: &Value) -> InterpResult<Value> {
    let class = match (a, b) {
        (Value::Typed(c, _), _) | (_, Value::Typed(c, _)) => Some(*c),
        _ => None,
    };
    let x = a.to_f64_array()?;
    let y = b.to_f64_array()?;
    let f: fn(f64, f64) -> f64 = match name {
        "mod" => |p, q| {
            if q == 0.0 {
                p
            } else {
                let r = p - (p / q).floor() * q;
                if r != 0.0 && (r < 0.0) != (q < 0.0) {
                    r + q
                } else {
                    r
                }
            }
        },
        "rem" => |p, q| if q == 0.0 { f64::NAN } else { p - (p / q).trunc() * q },
        "atan2" => f64::atan2,
        "hypot" => f64::hypot,
        "power" => return ops::binary(BinOp::ElPow, a, b),
        _ => return Err(InterpError::undefined(name)),
    };
    let out = broadcast(&x, &y, |p, q| f(*p, *q))?;
    Ok(match class {
        Some(c) => Value::Typed(c, out.map(|v| cast_to(c, *v))),
        None => Value::Num(out),
    })
}

pub(super) fn predicate(name: &str, v: &Value) -> InterpResult<Value> {
    let f: fn(f64) -> bool = match name {
        "isnan" => f64::is_nan,
        "isinf" => f64::is_infinite,
        "isfinite" => f64::is_finite,
        _ => return Err(InterpError::undefined(name)),
    };
    Ok(Value::Bool(match v {
        Value::Complex(a) => a.map(|z| {
            if name == "isfinite" {
                f(z.re) && f(z.im)
            } else {
                f(z.re) || f(z.im)
            }
        }),
        other => other.to_f64_array()?.map(|x| f(*x)),
    }))
}

// ── Reductions ────────────────────────────────────────────────

fn default_dim(shape: &[usize]) -> usize {
    shape.iter().position(|&d| d != 1).unwrap_or(0)
}

fn dim_arg(args: &[Value], i: usize, shape: &[usize]) -> InterpResult<usize> {
    match args.get(i) {
        Some(v) if !v.is_empty() => {
            let d = v.to_usize("Dimension argument")?;
            if d == 0 {
                return Err(InterpError::runtime(
                    "Dimension argument must be a positive integer scalar.",
                ));
            }
            Ok(d - 1)
        }
        _ => Ok(default_dim(shape)),
    }
}

fn slice_layout(shape: &[usize], dim: usize) -> (Vec<usize>, usize, usize, usize) {
    let mut shape = shape.to_vec();
    while shape.len() <= dim {
        shape.push(1);
    }
    let len = shape[dim];
    let stride: usize = shape[..dim].iter().product();
    let outer: usize = shape[dim + 1..].iter().product();
    (shape, len, stride, outer)
}

/// Reduce each slice along `dim` to one value.
pub(super) fn along<T: Clone, R: Clone>(
    a: &Array<T>,
    dim: usize,
    mut f: impl FnMut(&[T]) -> R,
) -> Array<R> {
    let (mut shape, len, stride, outer) = slice_layout(a.shape(), dim);
    let mut out = Vec::with_capacity(stride * outer);
    let mut buf = Vec::with_capacity(len);
    for o in 0..outer {
        for i in 0..stride {
            buf.clear();
            buf.extend((0..len).map(|k| a.data()[o * len * stride + k * stride + i].clone()));
            out.push(f(&buf));
        }
    }
    shape[dim] = 1;
    Array::from_parts(shape, out)
}

/// Map each slice along `dim` to a new slice of uniform length.
pub(super) fn along_vec<T: Clone, R: Clone>(
    a: &Array<T>,
    dim: usize,
    mut f: impl FnMut(&[T]) -> Vec<R>,
) -> Array<R> {
    let (mut shape, len, stride, outer) = slice_layout(a.shape(), dim);
    let mut slices = Vec::with_capacity(stride * outer);
    let mut buf = Vec::with_capacity(len);
    for o in 0..outer {
        for i in 0..stride {
            buf.clear();
            buf.extend((0..len).map(|k| a.data()[o * len * stride + k * stride + i].clone()));
            slices.push(f(&buf));
        }
    }
    let m = slices.first().map_or(0, Vec::len);
    let mut data: Vec<Option<R>> = vec![None; stride * outer * m];
    for o in 0..outer {
        for i in 0..stride {
            for (k, v) in slices[o * stride + i].iter().enumerate().take(m) {
                data[o * m * stride + k * stride + i] = Some(v.clone());
            }
        }
    }
    shape[dim] = m;
    Array::from_parts(shape, data.into_iter().flatten().collect())
}

type RealFold<'a> = dyn Fn(&[f64]) -> f64 + 'a;
type ComplexFold<'a> = dyn Fn(&[Complex]) -> Complex + 'a;

fn reduce(
    args: &[Value],
    dim_index: usize,
    real: &RealFold<'_>,
    complex: Option<&ComplexFold<'_>>,
    keep_class: bool,
) -> InterpResult<Value> {
    let v = arg(args, 0)?;
    let shape = v.shape();
    // sum([]) and friends reduce a 0x0 input to a scalar.
    let whole = args.get(dim_index).is_none() && shape == [0, 0];
    let dim = dim_arg(args, dim_index, &shape)?;
    if let (Value::Complex(a), Some(complex)) = (v, complex) {
        let out = if whole {
            Array::scalar(complex(&[]))
        } else {
            along(a, dim, |s| complex(s))
        };
        return Ok(Value::Complex(out).simplify());
    }
    let a = v.to_f64_array()?;
    let out = if whole {
        Array::scalar(real(&[]))
    } else {
        along(&a, dim, |s| real(s))
    };
    Ok(match v {
        Value::Typed(c, _) if keep_class => Value::Typed(*c, out.map(|x| cast_to(*c, *x))),
        _ => Value::Num(out),
    })
}

fn variance(s: &[f64], weight: f64) -> f64 {
    let n = s.len() as f64;
    if s.is_empty() {
        return f64::NAN;
    }
    if s.len() == 1 {
        return 0.0;
    }
    let mean = s.iter().sum::<f64>() / n;
    let ss: f64 = s.iter().map(|x| (x - mean) * (x - mean)).sum();
    if weight == 1.0 {
        ss / n
    } else {
        ss / (n - 1.0)
    }
}

fn median(s: &[f64]) -> f64 {
    if s.is_empty() || s.iter().any(|x| x.is_nan()) {
        return f64::NAN;
    }
    let mut v = s.to_vec();
    v.sort_by(|a, b| a.total_cmp(b));
    let n = v.len();
    if n % 2 == 1 {
        v[n / 2]
    } else {
        (v[n / 2 - 1] + v[n / 2]) / 2.0
    }
}

pub(super) const REDUCTIONS: &[&str] = &["sum", "prod", "mean", "median", "std", "var"];

pub(super) fn reduction(name: &str, args: &[Value]) -> InterpResult<Value> {
    let complex_sum = |s: &[Complex]| -> Complex { s.iter().fold(Complex::default(), |acc, z| c_add(acc, *z)) };
    match name {
        "sum" => reduce(args, 1, &|s: &[f64]| s.iter().sum(), Some(&complex_sum), true),
        "prod" => reduce(
            args,
            1,
            &|s: &[f64]| s.iter().product(),
            Some(&|s: &[Complex]| s.iter().fold(Complex::new(1.0, 0.0), |acc, z| c_mul(acc, *z))),
            true,
        ),
        "mean" => reduce(
            args,
            1,
            &|s: &[f64]| s.iter().sum::<f64>() / s.len() as f64,
            Some(&|s: &[Complex]| {
                let total = complex_sum(s);
                let n = s.len() as f64;
                Complex::new(total.re / n, total.im / n)
            }),
            false,
        ),
        "median" => reduce(args, 1, &median, None, false),
        "std" | "var" => {
            let weight = match args.get(1) {
                Some(w) if !w.is_empty() => w.to_scalar("Weight")?,
                _ => 0.0,
            };
            if name == "std" {
                reduce(args, 2, &|s: &[f64]| variance(s, weight).sqrt(), None, false)
            } else {
                reduce(args, 2, &|s: &[f64]| variance(s, weight), None, false)
            }
        }
        _ => Err(InterpError::undefined(name)),
    }
}

pub(super) fn any_all(args: &[Value], all: bool) -> InterpResult<Value> {
    let v = arg(args, 0)?;
    let shape = v.shape();
    let a = v.to_f64_array()?;
    let test = |s: &[f64]| {
        if all {
            s.iter().all(|x| *x != 0.0)
        } else {
            s.iter().any(|x| *x != 0.0 && !x.is_nan())
        }
    };
    if args.len() < 2 && shape == [0, 0] {
        return Ok(Value::boolean(test(&[])));
    }
    let dim = dim_arg(args, 1, &shape)?;
    Ok(Value::Bool(along(&a, dim, test)))
}

pub(super) fn cumulative(args: &[Value], product: bool) -> InterpResult<Value> {
    let v = arg(args, 0)?;
    let shape = v.shape();
    let dim = dim_arg(args, 1, &shape)?;
    let a = v.to_f64_array()?;
    let out = along_vec(&a, dim, |s| {
        let mut acc = if product { 1.0 } else { 0.0 };
        s.iter()
            .map(|x| {
                acc = if product { acc * x } else { acc + x };
                acc
            })
            .collect()
    });
    Ok(Value::Num(out))
}

pub(super) fn diff(args: &[Value]) -> InterpResult<Value> {
    let v = arg(args, 0)?;
    let order = match args.get(1) {
        Some(n) if !n.is_empty() => n.to_usize("Difference order")?,
        _ => 1,
    };
    let shape = v.shape();
    let dim = dim_arg(args, 2, &shape)?;
    let mut a = v.to_f64_array()?;
    for _ in 0..order {
        a = along_vec(&a, dim, |s| s.windows(2).map(|w| w[1] - w[0]).collect());
    }
    Ok(Value::Num(a))
}

/// `max`/`min`: reduction with indices, or the element-wise two-operand form.
pub(super) fn extremum(args: &[Value], nargout: usize, is_max: bool) -> InterpResult<Vec<Value>> {
    let v = arg(args, 0)?;
    let better = move |a: f64, b: f64| if is_max { a > b } else { a < b };
    if let Some(other) = args.get(1).filter(|o| !o.is_empty()) {
        if nargout > 1 {
            return Err(InterpError::with_id(
                "MATLAB:TooManyOutputs",
                "Two-operand max and min return one output.",
            ));
        }
        let x = v.to_f64_array()?;
        let y = other.to_f64_array()?;
        let out = broadcast(&x, &y, |p, q| {
            if p.is_nan() || (!q.is_nan() && better(*q, *p)) {
                *q
            } else {
                *p
            }
        })?;
        let class = match (v, other) {
            (Value::Typed(c, _), _) | (_, Value::Typed(c, _)) => Some(*c),
            _ => None,
        };
        return Ok(vec![match class {
            Some(c) => Value::Typed(c, out.map(|x| cast_to(c, *x))),
            None => Value::Num(out),
        }]);
    }
    if v.is_empty() {
        return Ok(vec![Value::empty(), Value::empty()]);
    }
    let shape = v.shape();
    let dim = dim_arg(args, 2, &shape)?;
    let a = v.to_f64_array()?;
    let pairs = along(&a, dim, |s| {
        let mut best: Option<(f64, usize)> = None;
        for (i, &x) in s.iter().enumerate() {
            if x.is_nan() {
                continue;
            }
            match best {
                Some((b, _)) if !better(x, b) => {}
                _ => best = Some((x, i)),
            }
        }
        best.map_or((f64::NAN, 1.0), |(x, i)| (x, (i + 1) as f64))
    });
    let values = pairs.map(|p| p.0);
    let values = match v {
        Value::Typed(c, _) => Value::Typed(*c, values),
        _ => Value::Num(values),
    };
    let mut out = vec![values];
    if nargout >= 2 {
        out.push(Value::Num(pairs.map(|p| p.1)));
    }
    Ok(out)
}

fn nan_last(a: f64, b: f64) -> Ordering {
    match (a.is_nan(), b.is_nan()) {
        (true, true) => Ordering::Equal,
        (true, false) => Ordering::Greater,
        (false, true) => Ordering::Less,
        (false, false) => a.partial_cmp(&b).unwrap_or(Ordering::Equal),
    }
}

pub(super) fn sort(args: &[Value], nargout: usize) -> InterpResult<Vec<Value>> {
    let v = arg(args, 0)?;
    let mut descending = false;
    let mut dim_value = None;
    for extra in &args[1..] {
        match extra.as_text().as_deref() {
            Some("descend") => descending = true,
            Some("ascend") => descending = false,
            Some(other) => {
                return Err(InterpError::runtime(format!(
                    "Sort direction must be 'ascend' or 'descend', not '{other}'."
                )));
            }
            None => dim_value = Some(extra.clone()),
        }
    }
    if let Value::Cell(cells) = v {
        let mut items: Vec<(String, usize)> = cells
            .data()
            .iter()
            .enumerate()
            .map(|(i, c)| {
                c.as_text()
                    .map(|t| (t, i))
                    .ok_or_else(|| InterpError::runtime("Only cell arrays of character vectors can be sorted."))
            })
            .collect::<InterpResult<_>>()?;
        items.sort_by(|a, b| if descending { b.0.cmp(&a.0) } else { a.0.cmp(&b.0) });
        let sorted = items.iter().map(|(t, _)| Value::str(t)).collect();
        let idx = items.iter().map(|(_, i)| (i + 1) as f64).collect();
        let shape = cells.shape().to_vec();
        let mut out = vec![Value::Cell(Array::new(shape.clone(), sorted)?)];
        if nargout >= 2 {
            out.push(Value::Num(Array::new(shape, idx)?));
        }
        return Ok(out);
    }
    let shape = v.shape();
    let dim = match &dim_value {
        Some(d) => dim_arg(std::slice::from_ref(d), 0, &shape)?,
        None => default_dim(&shape),
    };
    let a = v.to_f64_array()?;
    let pairs = along_vec(&a, dim, |s| {
        let mut order: Vec<usize> = (0..s.len()).collect();
        order.sort_by(|&i, &j| {
            if descending {
                nan_last(s[j], s[i])
            } else {
                nan_last(s[i], s[j])
            }
        });
        order.into_iter().map(|i| (s[i], (i + 1) as f64)).collect()
    });
    let values = pairs.map(|p| p.0);
    let values = match v {
        Value::Typed(c, _) => Value::Typed(*c, values),
        Value::Char(_) => Value::Char(values.map(|x| char::from_u32(*x as u32).unwrap_or('\0'))),
        Value::Bool(_) => Value::Bool(values.map(|x| *x != 0.0)),
        _ => Value::Num(values),
    };
    let mut out = vec![values];
    if nargout >= 2 {
        out.push(Value::Num(pairs.map(|p| p.1)));
    }
    Ok(out)
}

pub(super) fn find(args: &[Value], nargout: usize) -> InterpResult<Vec<Value>> {
    let v = arg(args, 0)?;
    let a = v.to_f64_array()?;
    let limit = match args.get(1) {
        Some(k) => k.to_usize("Number of results")?,
        None => usize::MAX,
    };
    let hits: Vec<usize> = a
        .data()
        .iter()
        .enumerate()
        .filter(|(_, x)| **x != 0.0)
        .map(|(i, _)| i)
        .take(limit)
        .collect();
    let shape_for = |n: usize| if a.is_row() && a.numel() != 1 { vec![1, n] } else { vec![n, 1] };
    let as_value = |data: Vec<f64>| -> InterpResult<Value> {
        if data.is_empty() && a.shape() == [0, 0] {
            return Ok(Value::empty());
        }
        let shape = shape_for(data.len());
        Ok(Value::Num(Array::new(shape, data)?))
    };
    if nargout <= 1 {
        return Ok(vec![as_value(hits.iter().map(|&i| (i + 1) as f64).collect())?]);
    }
    let rows = a.rows().max(1);
    let mut out = vec![
        as_value(hits.iter().map(|&i| (i % rows + 1) as f64).collect())?,
        as_value(hits.iter().map(|&i| (i / rows + 1) as f64).collect())?,
    ];
    if nargout >= 3 {
        out.push(as_value(hits.iter().map(|&i| a.data()[i]).collect())?);
    }
    Ok(out)
}

pub(super) fn norm(args: &[Value]) -> InterpResult<Value> {
    let v = arg(args, 0)?;
    let a = match v {
        Value::Complex(z) => z.map(|z| z.norm()),
        other => other.to_f64_array()?,
    };
    let p = match args.get(1) {
        None => Norm::Two,
        Some(p) => match p.as_text().as_deref() {
            Some("fro") => Norm::Fro,
            Some("inf" | "Inf") => Norm::P(f64::INFINITY),
            Some(other) => {
                return Err(InterpError::runtime(format!("Unknown norm type '{other}'.")));
            }
            None => match p.to_scalar("Norm type")? {
                x if x == 2.0 => Norm::Two,
                x => Norm::P(x),
            },
        },
    };
    let abs: Vec<f64> = a.data().iter().map(|x| x.abs()).collect();
    let fro = || abs.iter().map(|x| x * x).sum::<f64>().sqrt();
    if a.is_vector() || a.is_empty() {
        return Ok(Value::scalar(match p {
            Norm::Two | Norm::Fro => fro(),
            Norm::P(x) if x == f64::INFINITY => abs.iter().copied().fold(0.0, f64::max),
            Norm::P(x) if x == f64::NEG_INFINITY => abs.iter().copied().fold(f64::INFINITY, f64::min),
            Norm::P(x) => abs.iter().map(|v| v.powf(x)).sum::<f64>().powf(1.0 / x),
        }));
    }
    let (r, c) = (a.rows(), a.cols());
    Ok(Value::scalar(match p {
        Norm::Fro => fro(),
        Norm::P(x) if x == 1.0 => (0..c)
            .map(|j| (0..r).map(|i| a.at(i, j).abs()).sum::<f64>())
            .fold(0.0, f64::max),
        Norm::P(x) if x == f64::INFINITY => (0..r)
            .map(|i| (0..c).map(|j| a.at(i, j).abs()).sum::<f64>())
            .fold(0.0, f64::max),
        Norm::Two => spectral_norm(&a),
        Norm::P(_) => {
            return Err(InterpError::runtime(
                "Matrix norms support 1, 2, Inf and 'fro' only.",
            ));
        }
    }))
}

enum Norm {
    Two,
    Fro,
    P(f64),
}

/// Largest singular value, by power iteration on A'A.
fn spectral_norm(a: &Array<f64>) -> f64 {
    let (r, c) = (a.rows(), a.cols());
    let mut x = vec![1.0 / (c as f64).sqrt(); c];
    let mut sigma = 0.0;
    for _ in 0..500 {
        let ax: Vec<f64> = (0..r)
            .map(|i| (0..c).map(|j| a.at(i, j) * x[j]).sum())
            .collect();
        let mut y: Vec<f64> = (0..c)
            .map(|j| (0..r).map(|i| a.at(i, j) * ax[i]).sum())
            .collect();
        let len = y.iter().map(|v| v * v).sum::<f64>().sqrt();
        if len == 0.0 {
            return 0.0;
        }
        y.iter_mut().for_each(|v| *v /= len);
        let next = len.sqrt();
        x = y;
        if (next - sigma).abs() <= 1e-14 * next.max(1.0) {
            return next;
        }
        sigma = next;
    }
    sigma
}

pub(super) fn dot(a: &Value, b: &Value) -> InterpResult<Value> {
    let x = a.to_f64_array()?;
    let y = b.to_f64_array()?;
    if x.numel() != y.numel() {
        return Err(InterpError::runtime("A and B must be the same size."));
    }
    Ok(Value::scalar(
        x.data().iter().zip(y.data()).map(|(p, q)| p * q).sum(),
    ))
}

pub(super) fn trapz(args: &[Value]) -> InterpResult<Value> {
    let (x, y) = match args {
        [y] => (None, y),
        [x, y, ..] => (Some(x.to_f64_array()?), y),
        [] => return Err(not_enough()),
    };
    let a = y.to_f64_array()?;
    let dim = default_dim(a.shape());
    let mut failure = None;
    let out = along(&a, dim, |s| {
        let spacing = |k: usize| match &x {
            Some(x) => x.data().get(k + 1).copied().unwrap_or(f64::NAN) - x.data()[k],
            None => 1.0,
        };
        if let Some(x) = &x {
            if x.numel() != s.len() {
                failure = Some(InterpError::runtime(
                    "Length of X must match the length of Y along the integration dimension.",
                ));
            }
        }
        (0..s.len().saturating_sub(1))
            .map(|k| spacing(k) * (s[k] + s[k + 1]) / 2.0)
            .sum::<f64>()
    });
    match failure {
        Some(err) => Err(err),
        None => Ok(Value::Num(out)),
    }
}

pub(super) fn flip(v: &Value, columns: bool) -> InterpResult<Value> {
    let shape = v.shape();
    let (extent, pos) = if columns { (shape[1], 1) } else { (shape[0], 0) };
    let reversed = Value::row((1..=extent).rev().map(|i| i as f64).collect());
    let mut subs = vec![IndexArg::Colon, IndexArg::Colon];
    subs[pos] = IndexArg::Value(reversed);
    index_value(v, &subs)
}

pub(super) fn unique(v: &Value) -> InterpResult<Value> {
    if let Value::Cell(cells) = v {
        let mut items: Vec<String> = cells
            .data()
            .iter()
            .map(|c| {
                c.as_text()
                    .ok_or_else(|| InterpError::runtime("Cell array input must be a cell array of character vectors."))
            })
            .collect::<InterpResult<_>>()?;
        items.sort();
        items.dedup();
        let values: Vec<Value> = items.iter().map(|t| Value::str(t)).collect();
        return Ok(Value::Cell(if cells.is_row() {
            Array::row(values)
        } else {
            Array::column(values)
        }));
    }
    let a = v.to_f64_array()?;
    let mut data = a.data().to_vec();
    data.sort_by(|p, q| nan_last(*p, *q));
    data.dedup_by(|p, q| p == q);
    let out = if a.is_row() {
        Array::row(data)
    } else {
        Array::column(data)
    };
    Ok(match v {
        Value::Char(_) => Value::Char(out.map(|x| char::from_u32(*x as u32).unwrap_or('\0'))),
        Value::Bool(_) => Value::Bool(out.map(|x| *x != 0.0)),
        Value::Typed(c, _) => Value::Typed(*c, out),
        _ => Value::Num(out),
    })
}

// ── Linear algebra ────────────────────────────────────────────

fn square(v: &Value, what: &str) -> InterpResult<Array<f64>> {
    let a = v.to_f64_array()?;
    if a.shape().len() != 2 || a.rows() != a.cols() {
        return Err(InterpError::with_id(
            "MATLAB:square",
            format!("Matrix must be square for {what}."),
        ));
    }
    Ok(a)
}

pub(super) fn det(v: &Value) -> InterpResult<Value> {
    let a = square(v, "det")?;
    let n = a.rows();
    let mut m: Vec<Vec<f64>> = (0..n).map(|i| (0..n).map(|j| *a.at(i, j)).collect()).collect();
    let mut det = 1.0;
    for col in 0..n {
        let pivot = (col..n)
            .max_by(|&i, &j| m[i][col].abs().total_cmp(&m[j][col].abs()))
            .unwrap_or(col);
        if m[pivot][col] == 0.0 {
            return Ok(Value::scalar(0.0));
        }
        if pivot != col {
            m.swap(pivot, col);
            det = -det;
        }
        det *= m[col][col];
        for row in col + 1..n {
            let factor = m[row][col] / m[col][col];
            for k in col..n {
                m[row][k] -= factor * m[col][k];
            }
        }
    }
    Ok(Value::scalar(det))
}

pub(super) fn inv(v: &Value) -> InterpResult<Value> {
    let a = square(v, "inv")?;
    let n = a.rows();
    let identity = eye(&[Value::scalar(n as f64)])?;
    ops::binary(BinOp::MatLeftDiv, &Value::Num(a), &identity)
}

pub(super) fn trace(v: &Value) -> InterpResult<Value> {
    let a = square(v, "trace")?;
    Ok(Value::scalar((0..a.rows()).map(|i| a.at(i, i)).sum()))
}

// ── Integers ──────────────────────────────────────────────────

pub(super) fn factorial(v: &Value) -> InterpResult<Value> {
    map_real(v, |n| {
        if n < 0.0 || n.fract() != 0.0 {
            f64::NAN
        } else if n > 170.0 {
            f64::INFINITY
        } else {
            (1..=n as u64).map(|k| k as f64).product()
        }
    })
}

pub(super) fn nchoosek(n: &Value, k: &Value) -> InterpResult<Value> {
    let n = n.to_usize("N")?;
    let k = k.to_usize("K")?;
    if k > n {
        return Err(InterpError::runtime("K must be an integer between 0 and N."));
    }
    let k = k.min(n - k);
    let mut acc = 1.0;
    for i in 0..k {
        acc = acc * (n - i) as f64 / (i + 1) as f64;
    }
    Ok(Value::scalar(acc.round()))
}

fn is_prime(n: f64) -> bool {
    if n < 2.0 || n.fract() != 0.0 {
        return false;
    }
    let n = n as u64;
    (2..).take_while(|d| d * d <= n).all(|d| n % d != 0)
}

pub(super) fn isprime(v: &Value) -> InterpResult<Value> {
    Ok(Value::Bool(v.to_f64_array()?.map(|x| is_prime(*x))))
}

pub(super) fn primes(v: &Value) -> InterpResult<Value> {
    let limit = v.to_scalar("Limit")?.floor();
    if limit.is_finite() && limit > 0.0 {
        checked_numel(&[1, limit as usize])?;
    }
    let data = (2..=limit.max(1.0) as u64)
        .map(|p| p as f64)
        .filter(|p| is_prime(*p))
        .collect();
    Ok(Value::row(data))
}

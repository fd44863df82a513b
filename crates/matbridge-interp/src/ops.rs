//! Operators: element-wise arithmetic with implicit expansion, matrix
//! algebra, comparisons, ranges and concatenation.

use matbridge_core::{Complex, NumericClass};

use crate::ast::{BinOp, UnaryOp};
use crate::error::{InterpError, InterpResult};
use crate::value::{cast_to, checked_numel, normalize_shape, Array, Value};

// ── Implicit expansion ────────────────────────────────────────

pub fn broadcast_shape(a: &[usize], b: &[usize]) -> InterpResult<Vec<usize>> {
    let n = a.len().max(b.len());
    let mut out = Vec::with_capacity(n);
    for i in 0..n {
        let da = a.get(i).copied().unwrap_or(1);
        let db = b.get(i).copied().unwrap_or(1);
        let d = if da == db {
            da
        } else if da == 1 {
            db
        } else if db == 1 {
            da
        } else {
            return Err(InterpError::with_id(
                "MATLAB:sizeDimensionsMustMatch",
                "Arrays have incompatible sizes for this operation.",
            ));
        };
        out.push(d);
    }
    checked_numel(&out)?;
    Ok(out)
}

/// Apply `f` element-wise, expanding singleton dimensions.
pub fn broadcast<T: Clone, U: Clone, R: Clone>(
    a: &Array<T>,
    b: &Array<U>,
    mut f: impl FnMut(&T, &U) -> R,
) -> InterpResult<Array<R>> {
    if a.shape() == b.shape() {
        let data = a.data().iter().zip(b.data()).map(|(x, y)| f(x, y)).collect();
        return Ok(Array::from_parts(a.shape().to_vec(), data));
    }
    if b.is_scalar() {
        let y = &b.data()[0];
        return Ok(Array::from_parts(
            a.shape().to_vec(),
            a.data().iter().map(|x| f(x, y)).collect(),
        ));
    }
    if a.is_scalar() {
        let x = &a.data()[0];
        return Ok(Array::from_parts(
            b.shape().to_vec(),
            b.data().iter().map(|y| f(x, y)).collect(),
        ));
    }
    let shape = broadcast_shape(a.shape(), b.shape())?;
    let numel: usize = shape.iter().product();
    let mut data = Vec::with_capacity(numel);
    let mut sub = vec![0usize; shape.len()];
    for _ in 0..numel {
        let ia = expanded_index(a.shape(), &sub);
        let ib = expanded_index(b.shape(), &sub);
        data.push(f(&a.data()[ia], &b.data()[ib]));
        for (d, s) in sub.iter_mut().enumerate() {
            *s += 1;
            if *s < shape[d] {
                break;
            }
            *s = 0;
        }
    }
    Ok(Array::from_parts(shape, data))
}

fn expanded_index(shape: &[usize], sub: &[usize]) -> usize {
    let mut index = 0;
    let mut stride = 1;
    for (d, &s) in sub.iter().enumerate() {
        let dim = shape.get(d).copied().unwrap_or(1);
        if dim != 1 {
            index += s * stride;
        }
        stride *= dim;
    }
    index
}

// ── Complex helpers ───────────────────────────────────────────

pub fn c_add(a: Complex, b: Complex) -> Complex {
    Complex::new(a.re + b.re, a.im + b.im)
}

pub fn c_sub(a: Complex, b: Complex) -> Complex {
    Complex::new(a.re - b.re, a.im - b.im)
}

pub fn c_mul(a: Complex, b: Complex) -> Complex {
    Complex::new(a.re * b.re - a.im * b.im, a.re * b.im + a.im * b.re)
}

pub fn c_div(a: Complex, b: Complex) -> Complex {
    let d = b.re * b.re + b.im * b.im;
    if b.im == 0.0 {
        return Complex::new(a.re / b.re, a.im / b.re);
    }
    Complex::new(
        (a.re * b.re + a.im * b.im) / d,
        (a.im * b.re - a.re * b.im) / d,
    )
}

pub fn c_exp(z: Complex) -> Complex {
    let m = z.re.exp();
    Complex::new(m * z.im.cos(), m * z.im.sin())
}

pub fn c_log(z: Complex) -> Complex {
    Complex::new(z.norm().ln(), z.im.atan2(z.re))
}

pub fn c_sqrt(z: Complex) -> Complex {
    if z.im == 0.0 && z.re >= 0.0 {
        return Complex::new(z.re.sqrt(), 0.0);
    }
    let r = z.norm();
    let re = ((r + z.re) / 2.0).sqrt();
    let im = ((r - z.re) / 2.0).sqrt().copysign(if z.im == 0.0 { 1.0 } else { z.im });
    Complex::new(re, im)
}

pub fn c_pow(a: Complex, b: Complex) -> Complex {
    if a.re == 0.0 && a.im == 0.0 {
        return if b.re == 0.0 && b.im == 0.0 {
            Complex::new(1.0, 0.0)
        } else {
            Complex::new(0.0, 0.0)
        };
    }
    c_exp(c_mul(b, c_log(a)))
}

// ── Operand classification ────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq)]
enum Domain {
    Real,
    Typed(NumericClass),
    Complex,
}

fn operand_domain(op: &str, a: &Value, b: &Value) -> InterpResult<Domain> {
    for v in [a, b] {
        if matches!(v, Value::Cell(_) | Value::Func(_) | Value::Figure(_)) {
            return Err(InterpError::with_id(
                "MATLAB:UndefinedFunction",
                format!(
                    "Operator '{op}' is not supported for operands of type '{}'.",
                    v.class_name()
                ),
            ));
        }
    }
    match (a, b) {
        (Value::Typed(ca, _), Value::Typed(cb, _)) if ca != cb => Err(InterpError::with_id(
            "MATLAB:mixedClasses",
            "Integers can only be combined with integers of the same class, or scalar doubles.",
        )),
        (Value::Typed(c, _), Value::Complex(_)) | (Value::Complex(_), Value::Typed(c, _))
            if *c != NumericClass::Single =>
        {
            Err(InterpError::runtime(
                "Complex integer arithmetic is not supported.",
            ))
        }
        (Value::Typed(c, _), _) | (_, Value::Typed(c, _)) => Ok(Domain::Typed(*c)),
        (Value::Complex(_), _) | (_, Value::Complex(_)) => Ok(Domain::Complex),
        _ => Ok(Domain::Real),
    }
}

// ── Binary operators ──────────────────────────────────────────

pub fn binary(op: BinOp, a: &Value, b: &Value) -> InterpResult<Value> {
    match op {
        BinOp::Eq | BinOp::Ne | BinOp::Lt | BinOp::Le | BinOp::Gt | BinOp::Ge => {
            compare(op, a, b)
        }
        BinOp::And | BinOp::Or => {
            let x = a.to_bool_array()?;
            let y = b.to_bool_array()?;
            let out = if op == BinOp::And {
                broadcast(&x, &y, |p, q| *p && *q)?
            } else {
                broadcast(&x, &y, |p, q| *p || *q)?
            };
            Ok(Value::Bool(out))
        }
        BinOp::MatMul => {
            if a.numel() == 1 || b.numel() == 1 {
                elementwise(BinOp::ElMul, a, b)
            } else {
                matmul(a, b)
            }
        }
        BinOp::MatDiv => {
            if b.numel() == 1 {
                elementwise(BinOp::ElDiv, a, b)
            } else {
                // x * b = a  <=>  b' * x' = a'
                let solved = left_divide(&transpose(b, false)?, &transpose(a, false)?)?;
                transpose(&solved, false)
            }
        }
        BinOp::MatLeftDiv => {
            if a.numel() == 1 {
                elementwise(BinOp::ElLeftDiv, a, b)
            } else {
                left_divide(a, b)
            }
        }
        BinOp::MatPow => {
            if a.numel() == 1 && b.numel() == 1 {
                elementwise(BinOp::ElPow, a, b)
            } else {
                matrix_power(a, b)
            }
        }
        BinOp::Add
        | BinOp::Sub
        | BinOp::ElMul
        | BinOp::ElDiv
        | BinOp::ElLeftDiv
        | BinOp::ElPow => elementwise(op, a, b),
    }
}

fn elementwise(op: BinOp, a: &Value, b: &Value) -> InterpResult<Value> {
    let domain = operand_domain(op.symbol(), a, b)?;
    match domain {
        Domain::Complex => complex_elementwise(op, a, b),
        Domain::Real => {
            let x = a.to_f64_array()?;
            let y = b.to_f64_array()?;
            if op == BinOp::ElPow && needs_complex_power(&x, &y) {
                return complex_elementwise(op, a, b);
            }
            Ok(Value::Num(broadcast(&x, &y, |p, q| real_op(op, *p, *q))?))
        }
        Domain::Typed(class) => {
            let x = a.to_f64_array()?;
            let y = b.to_f64_array()?;
            Ok(Value::Typed(
                class,
                broadcast(&x, &y, |p, q| cast_to(class, real_op(op, *p, *q)))?,
            ))
        }
    }
}

fn needs_complex_power(x: &Array<f64>, y: &Array<f64>) -> bool {
    let negative_base = x.data().iter().any(|v| *v < 0.0);
    let fractional_exp = y.data().iter().any(|v| v.fract() != 0.0);
    negative_base && fractional_exp
}

fn real_op(op: BinOp, p: f64, q: f64) -> f64 {
    match op {
        BinOp::Add => p + q,
        BinOp::Sub => p - q,
        BinOp::ElMul | BinOp::MatMul => p * q,
        BinOp::ElDiv | BinOp::MatDiv => p / q,
        BinOp::ElLeftDiv | BinOp::MatLeftDiv => q / p,
        BinOp::ElPow | BinOp::MatPow => p.powf(q),
        _ => f64::NAN,
    }
}

fn complex_elementwise(op: BinOp, a: &Value, b: &Value) -> InterpResult<Value> {
    let x = a.to_complex_array()?;
    let y = b.to_complex_array()?;
    let out = broadcast(&x, &y, |p, q| match op {
        BinOp::Add => c_add(*p, *q),
        BinOp::Sub => c_sub(*p, *q),
        BinOp::ElMul | BinOp::MatMul => c_mul(*p, *q),
        BinOp::ElDiv | BinOp::MatDiv => c_div(*p, *q),
        BinOp::ElLeftDiv | BinOp::MatLeftDiv => c_div(*q, *p),
        _ => c_pow(*p, *q),
    })?;
    Ok(Value::Complex(out).simplify())
}

fn compare(op: BinOp, a: &Value, b: &Value) -> InterpResult<Value> {
    operand_domain(op.symbol(), a, b)?;
    let complex = matches!(a, Value::Complex(_)) || matches!(b, Value::Complex(_));
    if complex && matches!(op, BinOp::Eq | BinOp::Ne) {
        let x = a.to_complex_array()?;
        let y = b.to_complex_array()?;
        let eq = op == BinOp::Eq;
        let out = broadcast(&x, &y, |p, q| (p.re == q.re && p.im == q.im) == eq)?;
        return Ok(Value::Bool(out));
    }
    let x = a.to_f64_array()?;
    let y = b.to_f64_array()?;
    let out = broadcast(&x, &y, |p, q| match op {
        BinOp::Eq => p == q,
        BinOp::Ne => p != q,
        BinOp::Lt => p < q,
        BinOp::Le => p <= q,
        BinOp::Gt => p > q,
        _ => p >= q,
    })?;
    Ok(Value::Bool(out))
}

// ── Matrix algebra ────────────────────────────────────────────

fn require_2d(shape: &[usize], what: &str) -> InterpResult<(usize, usize)> {
    if shape.len() > 2 {
        return Err(InterpError::runtime(format!(
            "Arguments must be 2-D, or at least one argument must be scalar. Use {what} for \
             elementwise operations."
        )));
    }
    Ok((shape[0], shape[1]))
}

fn matmul(a: &Value, b: &Value) -> InterpResult<Value> {
    let domain = operand_domain("*", a, b)?;
    let (m, k) = require_2d(&a.shape(), "TIMES (.*)")?;
    let (k2, n) = require_2d(&b.shape(), "TIMES (.*)")?;
    if k != k2 {
        return Err(InterpError::with_id(
            "MATLAB:innerdim",
            "Incorrect dimensions for matrix multiplication. Check that the number of columns \
             in the first matrix matches the number of rows in the second matrix.",
        ));
    }
    checked_numel(&[m, n])?;
    match domain {
        Domain::Complex => {
            let x = a.to_complex_array()?;
            let y = b.to_complex_array()?;
            let mut data = vec![Complex::default(); m * n];
            for j in 0..n {
                for p in 0..k {
                    let bv = y.data()[j * k + p];
                    for i in 0..m {
                        data[j * m + i] = c_add(data[j * m + i], c_mul(x.data()[p * m + i], bv));
                    }
                }
            }
            Ok(Value::Complex(Array::from_parts(vec![m, n], data)).simplify())
        }
        Domain::Real | Domain::Typed(_) => {
            let x = a.to_f64_array()?;
            let y = b.to_f64_array()?;
            let mut data = vec![0.0; m * n];
            for j in 0..n {
                for p in 0..k {
                    let bv = y.data()[j * k + p];
                    for i in 0..m {
                        data[j * m + i] += x.data()[p * m + i] * bv;
                    }
                }
            }
            let out = Array::from_parts(vec![m, n], data);
            Ok(match domain {
                Domain::Typed(class) => Value::Typed(class, out.map(|v| cast_to(class, *v))),
                _ => Value::Num(out),
            })
        }
    }
}

/// Solve `a * x = b`: LU with partial pivoting for square `a`, least squares
/// through the normal equations otherwise.
fn left_divide(a: &Value, b: &Value) -> InterpResult<Value> {
    if matches!(a, Value::Complex(_)) || matches!(b, Value::Complex(_)) {
        return Err(InterpError::runtime(
            "Complex linear systems are not supported by the built-in engine.",
        ));
    }
    let x = a.to_f64_array()?;
    let y = b.to_f64_array()?;
    let (m, n) = require_2d(x.shape(), "LDIVIDE (.\\)")?;
    let (rows, rhs) = require_2d(y.shape(), "LDIVIDE (.\\)")?;
    if rows != m {
        return Err(InterpError::with_id(
            "MATLAB:dimagree",
            "Matrix dimensions must agree.",
        ));
    }
    if m == n {
        return Ok(Value::Num(solve_square(&x, &y, n, rhs)?));
    }
    let xt = x.transpose()?;
    let normal = matmul(&Value::Num(xt.clone()), &Value::Num(x))?.to_f64_array()?;
    let target = matmul(&Value::Num(xt), &Value::Num(y))?.to_f64_array()?;
    Ok(Value::Num(solve_square(&normal, &target, n, rhs)?))
}

fn solve_square(a: &Array<f64>, b: &Array<f64>, n: usize, rhs: usize) -> InterpResult<Array<f64>> {
    let mut m: Vec<Vec<f64>> = (0..n)
        .map(|i| (0..n).map(|j| *a.at(i, j)).collect())
        .collect();
    let mut r: Vec<Vec<f64>> = (0..n)
        .map(|i| (0..rhs).map(|j| *b.at(i, j)).collect())
        .collect();
    let mut singular = false;
    for col in 0..n {
        let pivot = (col..n)
            .max_by(|&p, &q| m[p][col].abs().total_cmp(&m[q][col].abs()))
            .unwrap_or(col);
        if m[pivot][col].abs() < f64::EPSILON {
            singular = true;
            continue;
        }
        m.swap(col, pivot);
        r.swap(col, pivot);
        for row in col + 1..n {
            let factor = m[row][col] / m[col][col];
            if factor == 0.0 {
                continue;
            }
            for k in col..n {
                m[row][k] -= factor * m[col][k];
            }
            for k in 0..rhs {
                r[row][k] -= factor * r[col][k];
            }
        }
    }
    if singular {
        tracing::debug!(event = "interp.singular_matrix", n = n);
    }
    let mut out = vec![vec![0.0; rhs]; n];
    for k in 0..rhs {
        for row in (0..n).rev() {
            let mut acc = r[row][k];
            for j in row + 1..n {
                acc -= m[row][j] * out[j][k];
            }
            out[row][k] = acc / m[row][row];
        }
    }
    let mut data = Vec::with_capacity(n * rhs);
    for k in 0..rhs {
        for row in out.iter() {
            data.push(row[k]);
        }
    }
    Ok(Array::from_parts(vec![n, rhs], data))
}

fn matrix_power(a: &Value, b: &Value) -> InterpResult<Value> {
    let shape = a.shape();
    let square = shape.len() == 2 && shape[0] == shape[1];
    let exponent = if b.numel() == 1 {
        Some(b.to_scalar("Exponent")?)
    } else {
        None
    };
    match exponent {
        Some(p) if square && p >= 0.0 && p.fract() == 0.0 => {
            let n = shape[0];
            let mut identity = vec![0.0; n * n];
            for i in 0..n {
                identity[i * n + i] = 1.0;
            }
            let mut result = Value::Num(Array::from_parts(vec![n, n], identity));
            let mut base = a.clone();
            let mut e = p as u64;
            while e > 0 {
                if e & 1 == 1 {
                    result = matmul(&result, &base)?;
                }
                base = matmul(&base, &base)?;
                e >>= 1;
            }
            Ok(result)
        }
        _ => Err(InterpError::runtime(
            "Incorrect dimensions for raising a matrix to a power. Check that the matrix is \
             square and the power is a scalar. To operate on each element of the matrix \
             individually, use POWER (.^) for elementwise power.",
        )),
    }
}

// ── Unary operators ───────────────────────────────────────────

pub fn unary(op: UnaryOp, a: &Value) -> InterpResult<Value> {
    if matches!(a, Value::Cell(_) | Value::Func(_) | Value::Figure(_)) {
        let sym = match op {
            UnaryOp::Neg => "-",
            UnaryOp::Plus => "+",
            UnaryOp::Not => "~",
        };
        return Err(InterpError::runtime(format!(
            "Operator '{sym}' is not supported for operands of type '{}'.",
            a.class_name()
        )));
    }
    match op {
        UnaryOp::Not => Ok(Value::Bool(a.to_bool_array()?.map(|b| !b))),
        UnaryOp::Plus => match a {
            Value::Bool(_) | Value::Char(_) => Ok(Value::Num(a.to_f64_array()?)),
            other => Ok(other.clone()),
        },
        UnaryOp::Neg => match a {
            Value::Complex(z) => Ok(Value::Complex(z.map(|v| Complex::new(-v.re, -v.im)))),
            Value::Typed(class, x) => Ok(Value::Typed(*class, x.map(|v| cast_to(*class, -v)))),
            other => Ok(Value::Num(other.to_f64_array()?.map(|v| -v))),
        },
    }
}

pub fn transpose(a: &Value, conjugate: bool) -> InterpResult<Value> {
    Ok(match a {
        Value::Num(x) => Value::Num(x.transpose()?),
        Value::Typed(c, x) => Value::Typed(*c, x.transpose()?),
        Value::Complex(x) => {
            let t = x.transpose()?;
            Value::Complex(if conjugate {
                t.map(|z| Complex::new(z.re, -z.im))
            } else {
                t
            })
        }
        Value::Bool(x) => Value::Bool(x.transpose()?),
        Value::Char(x) => Value::Char(x.transpose()?),
        Value::Cell(x) => Value::Cell(x.transpose()?),
        other => other.clone(),
    })
}

// ── Ranges ────────────────────────────────────────────────────

pub fn range(start: f64, step: f64, stop: f64) -> InterpResult<Value> {
    if step == 0.0 || !step.is_finite() || !start.is_finite() || !stop.is_finite() {
        return Ok(Value::Num(Array::from_parts(vec![1, 0], Vec::new())));
    }
    let span = (stop - start) / step;
    if span < 0.0 {
        return Ok(Value::Num(Array::from_parts(vec![1, 0], Vec::new())));
    }
    let n = (span + span.abs() * f64::EPSILON * 4.0 + 1e-10).floor() + 1.0;
    let n = checked_numel(&[1, n as usize])?;
    let data = (0..n).map(|i| start + i as f64 * step).collect();
    Ok(Value::Num(Array::row(data)))
}

// ── Concatenation ─────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq)]
enum Kind {
    Num,
    Typed(NumericClass),
    Complex,
    Bool,
    Char,
    Cell,
}

fn result_kind(items: &[Value]) -> InterpResult<Kind> {
    let mut kind = Kind::Bool;
    for item in items {
        let k = match item {
            Value::Cell(_) => return Ok(Kind::Cell),
            Value::Func(_) | Value::Figure(_) => {
                return Err(InterpError::runtime(format!(
                    "Concatenation of {} values is not supported.",
                    item.class_name()
                )));
            }
            Value::Char(_) => Kind::Char,
            Value::Typed(c, _) => Kind::Typed(*c),
            Value::Complex(_) => Kind::Complex,
            Value::Num(_) => Kind::Num,
            Value::Bool(_) => Kind::Bool,
        };
        kind = match (kind, k) {
            (Kind::Char, _) | (_, Kind::Char) => Kind::Char,
            (Kind::Typed(c), _) | (_, Kind::Typed(c)) => Kind::Typed(c),
            (Kind::Complex, _) | (_, Kind::Complex) => Kind::Complex,
            (Kind::Num, _) | (_, Kind::Num) => Kind::Num,
            _ => Kind::Bool,
        };
    }
    Ok(kind)
}

fn to_char_array(v: &Value) -> InterpResult<Array<char>> {
    match v {
        Value::Char(a) => Ok(a.clone()),
        other => Ok(other
            .to_f64_array()?
            .map(|c| char::from_u32(*c as u32).unwrap_or('\0'))),
    }
}

/// `[a, b, ...]` (`horizontal`) or `[a; b; ...]`.
pub fn concat(items: Vec<Value>, horizontal: bool) -> InterpResult<Value> {
    let first = items.first().cloned();
    let mut items: Vec<Value> = items.into_iter().filter(|v| !v.is_empty()).collect();
    if items.is_empty() {
        return Ok(first.unwrap_or_default());
    }
    if items.len() == 1 {
        return Ok(items.remove(0));
    }
    let kind = result_kind(&items)?;
    Ok(match kind {
        Kind::Cell => Value::Cell(join_all_cells(items, horizontal)?),
        Kind::Char => Value::Char(join(
            items.iter().map(to_char_array).collect::<InterpResult<_>>()?,
            horizontal,
        )?),
        Kind::Bool => Value::Bool(join(
            items
                .iter()
                .map(Value::to_bool_array)
                .collect::<InterpResult<_>>()?,
            horizontal,
        )?),
        Kind::Complex => Value::Complex(join(
            items
                .iter()
                .map(Value::to_complex_array)
                .collect::<InterpResult<_>>()?,
            horizontal,
        )?),
        Kind::Typed(class) => Value::Typed(
            class,
            join(
                items
                    .iter()
                    .map(|v| Ok(v.to_f64_array()?.map(|x| cast_to(class, *x))))
                    .collect::<InterpResult<_>>()?,
                horizontal,
            )?,
        ),
        Kind::Num => Value::Num(join(
            items
                .iter()
                .map(Value::to_f64_array)
                .collect::<InterpResult<_>>()?,
            horizontal,
        )?),
    })
}

fn join_all_cells(items: Vec<Value>, horizontal: bool) -> InterpResult<Array<Value>> {
    let arrays = items
        .into_iter()
        .map(|v| match v {
            Value::Cell(a) => a,
            other => Array::scalar(other),
        })
        .collect();
    join(arrays, horizontal)
}

fn join<T: Clone>(arrays: Vec<Array<T>>, horizontal: bool) -> InterpResult<Array<T>> {
    for a in &arrays {
        if a.shape().len() > 2 {
            return Err(InterpError::runtime(
                "Concatenation of N-D arrays is not supported by the built-in engine.",
            ));
        }
    }
    let inconsistent = || {
        InterpError::with_id(
            "MATLAB:catenate:dimensionMismatch",
            "Dimensions of arrays being concatenated are not consistent.",
        )
    };
    if horizontal {
        let rows = arrays[0].rows();
        if arrays.iter().any(|a| a.rows() != rows) {
            return Err(inconsistent());
        }
        let cols = arrays.iter().map(|a| a.cols()).sum();
        let data = arrays.into_iter().flat_map(|a| a.into_data()).collect();
        Ok(Array::from_parts(vec![rows, cols], data))
    } else {
        let cols = arrays[0].cols();
        if arrays.iter().any(|a| a.cols() != cols) {
            return Err(inconsistent());
        }
        let rows: usize = arrays.iter().map(|a| a.rows()).sum();
        let mut data = Vec::with_capacity(rows * cols);
        for j in 0..cols {
            for a in &arrays {
                let r = a.rows();
                data.extend_from_slice(&a.data()[j * r..(j + 1) * r]);
            }
        }
        Ok(Array::from_parts(normalize_shape(vec![rows, cols]), data))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn matrix(rows: usize, cols: usize, row_major: &[f64]) -> Value {
        let mut data = Vec::new();
        for c in 0..cols {
            for r in 0..rows {
                data.push(row_major[r * cols + c]);
            }
        }
        Value::Num(Array::new(vec![rows, cols], data).unwrap())
    }

    #[test]
    fn implicit_expansion_row_plus_column() {
        let row = Value::row(vec![1.0, 2.0, 3.0]);
        let col = transpose(&Value::row(vec![10.0, 20.0]), false).unwrap();
        let out = binary(BinOp::Add, &row, &col).unwrap();
        assert_eq!(out.shape(), vec![2, 3]);
        assert_eq!(
            out.to_f64_array().unwrap().data(),
            &[11.0, 21.0, 12.0, 22.0, 13.0, 23.0]
        );
    }

    #[test]
    fn incompatible_sizes_error() {
        let a = Value::row(vec![1.0, 2.0]);
        let b = Value::row(vec![1.0, 2.0, 3.0]);
        assert!(binary(BinOp::Add, &a, &b).is_err());
    }

    #[test]
    fn matrix_product() {
        let a = matrix(2, 2, &[1.0, 2.0, 3.0, 4.0]);
        let b = matrix(2, 1, &[5.0, 6.0]);
        let out = binary(BinOp::MatMul, &a, &b).unwrap();
        assert_eq!(out.to_f64_array().unwrap().data(), &[17.0, 39.0]);
    }

    #[test]
    fn linear_solve() {
        let a = matrix(2, 2, &[2.0, 1.0, 1.0, 3.0]);
        let b = matrix(2, 1, &[3.0, 5.0]);
        let x = binary(BinOp::MatLeftDiv, &a, &b).unwrap();
        let x = x.to_f64_array().unwrap();
        assert!((x.data()[0] - 0.8).abs() < 1e-12);
        assert!((x.data()[1] - 1.4).abs() < 1e-12);
    }

    #[test]
    fn negative_base_fractional_power_is_complex() {
        let out = binary(BinOp::ElPow, &Value::scalar(-4.0), &Value::scalar(0.5)).unwrap();
        let Value::Complex(z) = out else {
            panic!("expected complex")
        };
        assert!(z.data()[0].re.abs() < 1e-12);
        assert!((z.data()[0].im - 2.0).abs() < 1e-12);
    }

    #[test]
    fn integer_arithmetic_saturates() {
        let a = Value::Typed(NumericClass::Uint8, Array::scalar(200.0));
        let out = binary(BinOp::Add, &a, &Value::scalar(100.0)).unwrap();
        assert_eq!(out, Value::Typed(NumericClass::Uint8, Array::scalar(255.0)));
    }

    #[test]
    fn ranges() {
        let r = range(0.0, 0.1, 1.0).unwrap();
        assert_eq!(r.numel(), 11);
        assert_eq!(range(5.0, 1.0, 1.0).unwrap().shape(), vec![1, 0]);
        let err = range(1.0, 1.0, 1e12).unwrap_err();
        assert_eq!(err.identifier(), Some("MATLAB:array:SizeLimitExceeded"));
    }

    #[test]
    fn concatenation_rules() {
        let v = concat(vec![Value::row(vec![1.0, 2.0]), Value::scalar(3.0)], true).unwrap();
        assert_eq!(v.shape(), vec![1, 3]);
        let m = concat(
            vec![Value::row(vec![1.0, 2.0]), Value::row(vec![3.0, 4.0])],
            false,
        )
        .unwrap();
        assert_eq!(m.to_f64_array().unwrap().data(), &[1.0, 3.0, 2.0, 4.0]);
        let s = concat(vec![Value::str("ab"), Value::str("c")], true).unwrap();
        assert_eq!(s.as_text().as_deref(), Some("abc"));
        assert!(concat(
            vec![Value::row(vec![1.0, 2.0]), Value::row(vec![3.0])],
            false
        )
        .is_err());
    }

    #[test]
    fn scalar_matrix_power() {
        let a = matrix(2, 2, &[1.0, 1.0, 0.0, 1.0]);
        let out = binary(BinOp::MatPow, &a, &Value::scalar(3.0)).unwrap();
        assert_eq!(out.to_f64_array().unwrap().data(), &[1.0, 0.0, 3.0, 1.0]);
    }
}

//! Subscripted reference, assignment (with growth) and deletion.
//!
//! A single subscript addresses elements in column-major linear order;
//! several subscripts address dimensions, with the last one spanning any
//! remaining dimensions.

use matbridge_core::Complex;

use crate::error::{InterpError, InterpResult};
use crate::value::{cast_to, checked_numel, normalize_shape, Array, Value};

/// An evaluated subscript.
#[derive(Debug, Clone)]
pub enum IndexArg {
    Colon,
    Value(Value),
}

/// Value of `end` in subscript `position` of `count`.
pub fn end_value(shape: &[usize], position: usize, count: usize) -> usize {
    if count == 1 {
        return shape.iter().product();
    }
    if position >= shape.len() {
        return 1;
    }
    if position + 1 == count {
        shape[position..].iter().product()
    } else {
        shape[position]
    }
}

struct Resolved {
    /// Zero-based positions.
    idx: Vec<usize>,
    /// Shape of the subscript itself.
    shape: Vec<usize>,
    colon: bool,
}

fn resolve(arg: &IndexArg, extent: usize) -> InterpResult<Resolved> {
    match arg {
        IndexArg::Colon => Ok(Resolved {
            idx: (0..extent).collect(),
            shape: vec![extent, 1],
            colon: true,
        }),
        IndexArg::Value(Value::Bool(mask)) => {
            let idx: Vec<usize> = mask
                .data()
                .iter()
                .enumerate()
                .filter(|(_, b)| **b)
                .map(|(i, _)| i)
                .collect();
            let shape = if mask.is_row() {
                vec![1, idx.len()]
            } else {
                vec![idx.len(), 1]
            };
            Ok(Resolved {
                idx,
                shape,
                colon: false,
            })
        }
        IndexArg::Value(v) => {
            if matches!(v, Value::Cell(_) | Value::Func(_) | Value::Figure(_)) {
                return Err(invalid_subscript());
            }
            let numbers = v.to_f64_array()?;
            let mut idx = Vec::with_capacity(numbers.numel());
            for &n in numbers.data() {
                if n < 1.0 || n.fract() != 0.0 || !n.is_finite() {
                    return Err(invalid_subscript());
                }
                idx.push(n as usize - 1);
            }
            Ok(Resolved {
                idx,
                shape: numbers.shape().to_vec(),
                colon: false,
            })
        }
    }
}

fn invalid_subscript() -> InterpError {
    InterpError::with_id(
        "MATLAB:badsubscript",
        "Array indices must be positive integers or logical values.",
    )
}

/// Dimensions as seen through `count` subscripts.
fn effective_dims(shape: &[usize], count: usize) -> Vec<usize> {
    if count >= shape.len() {
        let mut dims = shape.to_vec();
        dims.resize(count, 1);
        dims
    } else {
        let mut dims = shape[..count - 1].to_vec();
        dims.push(shape[count - 1..].iter().product());
        dims
    }
}

fn strides(dims: &[usize]) -> Vec<usize> {
    let mut out = Vec::with_capacity(dims.len());
    let mut acc: usize = 1;
    for d in dims {
        out.push(acc);
        acc = acc.saturating_mul(*d);
    }
    out
}

/// Linear offsets of every selected element, in column-major order of the
/// subscripts.
fn offsets(lists: &[Vec<usize>], strides: &[usize]) -> InterpResult<Vec<usize>> {
    let lens: Vec<usize> = lists.iter().map(Vec::len).collect();
    let total = checked_numel(&lens)?;
    let mut out = Vec::with_capacity(total);
    if total == 0 {
        return Ok(out);
    }
    let mut counter = vec![0usize; lists.len()];
    for _ in 0..total {
        out.push(
            counter
                .iter()
                .enumerate()
                .map(|(d, &c)| lists[d][c] * strides[d])
                .sum(),
        );
        for (d, c) in counter.iter_mut().enumerate() {
            *c += 1;
            if *c < lists[d].len() {
                break;
            }
            *c = 0;
        }
    }
    Ok(out)
}

// ── Reference ─────────────────────────────────────────────────

pub fn select<T: Clone>(a: &Array<T>, args: &[IndexArg]) -> InterpResult<Array<T>> {
    match args.len() {
        0 => Ok(a.clone()),
        1 => {
            let numel = a.numel();
            let r = resolve(&args[0], numel)?;
            if let Some(&bad) = r.idx.iter().find(|&&i| i >= numel) {
                return Err(InterpError::with_id(
                    "MATLAB:index:outOfBounds",
                    format!(
                        "Index exceeds the number of array elements. Index must not exceed \
                         {numel} (requested {}).",
                        bad + 1
                    ),
                ));
            }
            let data: Vec<T> = r.idx.iter().map(|&i| a.data()[i].clone()).collect();
            let n = data.len();
            let shape = if r.colon {
                vec![n, 1]
            } else if a.numel() != 1 && a.is_vector() && is_vector_shape(&r.shape) {
                if a.is_row() {
                    vec![1, n]
                } else {
                    vec![n, 1]
                }
            } else {
                r.shape
            };
            Ok(Array::from_parts(shape, data))
        }
        count => {
            let dims = effective_dims(a.shape(), count);
            let mut lists = Vec::with_capacity(count);
            for (pos, arg) in args.iter().enumerate() {
                let r = resolve(arg, dims[pos])?;
                if r.idx.iter().any(|&i| i >= dims[pos]) {
                    return Err(InterpError::with_id(
                        "MATLAB:index:outOfBounds",
                        format!(
                            "Index in position {} exceeds array bounds (must not exceed {}).",
                            pos + 1,
                            dims[pos]
                        ),
                    ));
                }
                lists.push(r.idx);
            }
            let st = strides(&dims);
            let data = offsets(&lists, &st)?
                .into_iter()
                .map(|o| a.data()[o].clone())
                .collect();
            let shape = lists.iter().map(Vec::len).collect();
            Ok(Array::from_parts(shape, data))
        }
    }
}

fn is_vector_shape(shape: &[usize]) -> bool {
    shape.len() == 2 && (shape[0] == 1 || shape[1] == 1)
}

// ── Assignment ────────────────────────────────────────────────

fn resize<T: Clone>(a: &Array<T>, new_dims: &[usize], fill: T) -> InterpResult<Array<T>> {
    let old_dims = effective_dims(a.shape(), new_dims.len());
    let numel = checked_numel(new_dims)?;
    let mut data = vec![fill; numel];
    let new_strides = strides(new_dims);
    let lists: Vec<Vec<usize>> = old_dims.iter().map(|&d| (0..d).collect()).collect();
    for (src, dst) in offsets(&lists, &strides(&old_dims))?
        .into_iter()
        .zip(offsets(&lists, &new_strides)?)
    {
        data[dst] = a.data()[src].clone();
    }
    Ok(Array::from_parts(new_dims.to_vec(), data))
}

fn count_mismatch() -> InterpError {
    InterpError::with_id(
        "MATLAB:subsassignnumelmismatch",
        "Unable to perform assignment because the left and right sides have a different \
         number of elements.",
    )
}

pub fn assign<T: Clone>(
    a: &mut Array<T>,
    args: &[IndexArg],
    rhs: &Array<T>,
    fill: T,
) -> InterpResult<()> {
    match args.len() {
        0 => {
            *a = rhs.clone();
            Ok(())
        }
        1 => {
            let numel = a.numel();
            let r = resolve(&args[0], numel)?;
            let r = if r.colon && numel == 0 {
                resolve(&IndexArg::Colon, rhs.numel())?
            } else {
                r
            };
            check_count(r.idx.len(), rhs)?;
            let needed = r.idx.iter().max().map(|m| m + 1).unwrap_or(0);
            if needed > numel {
                checked_numel(&[needed])?;
                let new_shape = if numel == 0 {
                    if a.shape().first() == Some(&0) && a.shape().get(1) == Some(&1) {
                        vec![needed, 1]
                    } else {
                        vec![1, needed]
                    }
                } else if a.is_row() {
                    vec![1, needed]
                } else if a.is_vector() {
                    vec![needed, 1]
                } else {
                    return Err(InterpError::with_id(
                        "MATLAB:indexed:ambiguousGrowth",
                        "Attempt to grow array along ambiguous dimension.",
                    ));
                };
                let mut data = std::mem::take(a.data_mut());
                data.resize(needed, fill);
                *a = Array::from_parts(new_shape, data);
            }
            write(a, &r.idx, rhs)
        }
        count => {
            let mut dims = effective_dims(a.shape(), count);
            let grows = count >= a.shape().len();
            let mut lists = Vec::with_capacity(count);
            let mut new_dims = dims.clone();
            for (pos, arg) in args.iter().enumerate() {
                let extent = match arg {
                    IndexArg::Colon if dims[pos] == 0 => {
                        rhs.shape().get(pos).copied().unwrap_or(1)
                    }
                    _ => dims[pos],
                };
                let r = resolve(arg, extent)?;
                if let Some(max) = r.idx.iter().max() {
                    new_dims[pos] = new_dims[pos].max(max + 1);
                }
                lists.push(r.idx);
            }
            let lens: Vec<usize> = lists.iter().map(Vec::len).collect();
            check_count(checked_numel(&lens)?, rhs)?;
            if new_dims != dims {
                if !grows {
                    return Err(InterpError::with_id(
                        "MATLAB:index:outOfBounds",
                        "Index exceeds array bounds; linearly collapsed dimensions cannot grow.",
                    ));
                }
                *a = resize(a, &new_dims, fill)?;
                dims = new_dims;
            }
            let st = strides(&dims);
            let targets = offsets(&lists, &st)?;
            write(a, &targets, rhs)
        }
    }
}

fn check_count<T: Clone>(selected: usize, rhs: &Array<T>) -> InterpResult<()> {
    if rhs.numel() == 1 || rhs.numel() == selected {
        Ok(())
    } else {
        Err(count_mismatch())
    }
}

fn write<T: Clone>(a: &mut Array<T>, targets: &[usize], rhs: &Array<T>) -> InterpResult<()> {
    let data = a.data_mut();
    if rhs.numel() == 1 {
        for &t in targets {
            data[t] = rhs.data()[0].clone();
        }
        return Ok(());
    }
    if rhs.numel() != targets.len() {
        return Err(count_mismatch());
    }
    for (&t, v) in targets.iter().zip(rhs.data()) {
        data[t] = v.clone();
    }
    Ok(())
}

// ── Deletion ──────────────────────────────────────────────────

pub fn delete<T: Clone>(a: &mut Array<T>, args: &[IndexArg]) -> InterpResult<()> {
    match args.len() {
        0 => Ok(()),
        1 => {
            let numel = a.numel();
            let r = resolve(&args[0], numel)?;
            if r.idx.iter().any(|&i| i >= numel) {
                return Err(InterpError::with_id(
                    "MATLAB:index:outOfBounds",
                    "Matrix index is out of range for deletion.",
                ));
            }
            let mut remove = vec![false; numel];
            for i in r.idx {
                remove[i] = true;
            }
            let column = a.is_vector() && !a.is_row();
            let kept: Vec<T> = a
                .data()
                .iter()
                .zip(remove)
                .filter(|(_, drop)| !drop)
                .map(|(v, _)| v.clone())
                .collect();
            let n = kept.len();
            *a = if r.colon {
                Array::empty()
            } else if column {
                Array::from_parts(vec![n, 1], kept)
            } else {
                Array::from_parts(vec![1, n], kept)
            };
            Ok(())
        }
        count => {
            let dims = effective_dims(a.shape(), count);
            let mut target = None;
            let mut lists = Vec::with_capacity(count);
            for (pos, arg) in args.iter().enumerate() {
                let r = resolve(arg, dims[pos])?;
                if r.idx.iter().any(|&i| i >= dims[pos]) {
                    return Err(InterpError::with_id(
                        "MATLAB:index:outOfBounds",
                        "Matrix index is out of range for deletion.",
                    ));
                }
                let mut seen = vec![false; dims[pos]];
                for &i in &r.idx {
                    seen[i] = true;
                }
                let full = seen.iter().all(|s| *s);
                if !full {
                    if target.is_some() {
                        return Err(InterpError::with_id(
                            "MATLAB:nullAssignmentNonColon",
                            "A null assignment can have only one non-colon index.",
                        ));
                    }
                    target = Some(pos);
                }
                lists.push(seen);
            }
            let axis = target.unwrap_or(0);
            let keep_lists: Vec<Vec<usize>> = lists
                .iter()
                .enumerate()
                .map(|(d, seen)| {
                    if d == axis {
                        (0..dims[d]).filter(|&i| !seen[i]).collect()
                    } else {
                        (0..dims[d]).collect()
                    }
                })
                .collect();
            let data = offsets(&keep_lists, &strides(&dims))?
                .into_iter()
                .map(|o| a.data()[o].clone())
                .collect();
            let shape = keep_lists.iter().map(Vec::len).collect();
            *a = Array::from_parts(normalize_shape(shape), data);
            Ok(())
        }
    }
}

// ── Value-level dispatch ──────────────────────────────────────

pub fn index_value(v: &Value, args: &[IndexArg]) -> InterpResult<Value> {
    Ok(match v {
        Value::Num(a) => Value::Num(select(a, args)?),
        Value::Typed(c, a) => Value::Typed(*c, select(a, args)?),
        Value::Complex(a) => Value::Complex(select(a, args)?),
        Value::Bool(a) => Value::Bool(select(a, args)?),
        Value::Char(a) => Value::Char(select(a, args)?),
        Value::Cell(a) => Value::Cell(select(a, args)?),
        Value::Func(_) | Value::Figure(_) => {
            let selected = select(&Array::scalar(()), args)?;
            if selected.numel() != 1 {
                return Err(InterpError::runtime(format!(
                    "Array indexing is not supported for {} values.",
                    v.class_name()
                )));
            }
            v.clone()
        }
    })
}

/// Contents of the selected cells, as a comma-separated list.
pub fn brace_values(v: &Value, args: &[IndexArg]) -> InterpResult<Vec<Value>> {
    match v {
        Value::Cell(a) => Ok(select(a, args)?.into_data()),
        other => Err(InterpError::with_id(
            "MATLAB:cellRefFromNonCell",
            format!(
                "Brace indexing is not supported for variables of this type ({}).",
                other.class_name()
            ),
        )),
    }
}

fn is_null(v: &Value) -> bool {
    matches!(v, Value::Num(a) if a.shape() == [0, 0])
}

/// Initial value for a variable first created by indexed assignment.
pub fn empty_like(rhs: &Value) -> Value {
    match rhs {
        Value::Cell(_) => Value::Cell(Array::empty()),
        Value::Char(_) => Value::Char(Array::empty()),
        Value::Bool(_) => Value::Bool(Array::empty()),
        Value::Complex(_) => Value::Complex(Array::empty()),
        Value::Typed(c, _) => Value::Typed(*c, Array::empty()),
        _ => Value::empty(),
    }
}

/// `target(args) = rhs`, including deletion when `rhs` is `[]`. On error the
/// target is left unchanged.
pub fn assign_paren(target: &mut Value, args: &[IndexArg], rhs: &Value) -> InterpResult<()> {
    if is_null(rhs) {
        return delete_value(target, args);
    }
    match (&mut *target, rhs) {
        (Value::Cell(a), Value::Cell(r)) => assign(a, args, r, Value::empty()),
        (Value::Cell(_), other) => Err(InterpError::runtime(format!(
            "Conversion to cell from {} is not possible.",
            other.class_name()
        ))),
        (_, Value::Cell(_)) => Err(InterpError::runtime(
            "Conversion to double from cell is not possible.",
        )),
        (Value::Func(_) | Value::Figure(_), _) | (_, Value::Func(_) | Value::Figure(_)) => {
            Err(InterpError::runtime(
                "Indexed assignment of handles is not supported by the built-in engine.",
            ))
        }
        (Value::Bool(a), Value::Bool(r)) => assign(a, args, r, false),
        (Value::Char(a), Value::Char(r)) => assign(a, args, r, '\0'),
        (Value::Typed(c, a), r) => {
            let class = *c;
            let r = r.to_f64_array()?.map(|v| cast_to(class, *v));
            assign(a, args, &r, 0.0)
        }
        (Value::Num(a), r) if !matches!(r, Value::Complex(_)) => {
            assign(a, args, &r.to_f64_array()?, 0.0)
        }
        (Value::Complex(a), r) => {
            assign(a, args, &r.to_complex_array()?, Complex::default())?;
            if a.data().iter().all(|z| z.im == 0.0) {
                *target = Value::Num(a.map(|z| z.re));
            }
            Ok(())
        }
        (t, r) => {
            // Promotion: logical or char targets take the right side's type.
            let promoted = if let Value::Complex(r) = r {
                let mut a = t.to_complex_array()?;
                assign(&mut a, args, r, Complex::default())?;
                Value::Complex(a)
            } else {
                let mut a = t.to_f64_array()?;
                assign(&mut a, args, &r.to_f64_array()?, 0.0)?;
                Value::Num(a)
            };
            *t = promoted;
            Ok(())
        }
    }
}

fn delete_value(v: &mut Value, args: &[IndexArg]) -> InterpResult<()> {
    match v {
        Value::Num(a) | Value::Typed(_, a) => delete(a, args),
        Value::Complex(a) => delete(a, args),
        Value::Bool(a) => delete(a, args),
        Value::Char(a) => delete(a, args),
        Value::Cell(a) => delete(a, args),
        other => Err(InterpError::runtime(format!(
            "Deletion is not supported for {} values.",
            other.class_name()
        ))),
    }
}

/// `target{args} = rhs`.
pub fn assign_brace(target: &mut Value, args: &[IndexArg], rhs: Value) -> InterpResult<()> {
    if is_null(target) {
        *target = Value::Cell(Array::empty());
    }
    match target {
        Value::Cell(cells) => assign(cells, args, &Array::scalar(rhs), Value::empty()),
        other => Err(InterpError::with_id(
            "MATLAB:cellAssToNonCell",
            format!(
                "Unable to perform assignment because brace indexing is not supported for \
                 variables of this type ({}).",
                other.class_name()
            ),
        )),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn num(v: f64) -> IndexArg {
        IndexArg::Value(Value::scalar(v))
    }

    fn magic3() -> Array<f64> {
        // [8 1 6; 3 5 7; 4 9 2]
        Array::new(vec![3, 3], vec![8.0, 3.0, 4.0, 1.0, 5.0, 9.0, 6.0, 7.0, 2.0]).unwrap()
    }

    #[test]
    fn linear_and_subscript_reference() {
        let m = magic3();
        assert_eq!(select(&m, &[num(4.0)]).unwrap().data(), &[1.0]);
        let row = select(&m, &[num(2.0), IndexArg::Colon]).unwrap();
        assert_eq!(row.shape(), &[1, 3]);
        assert_eq!(row.data(), &[3.0, 5.0, 7.0]);
        let all = select(&m, &[IndexArg::Colon]).unwrap();
        assert_eq!(all.shape(), &[9, 1]);
    }

    #[test]
    fn out_of_bounds_reference() {
        let err = select(&magic3(), &[num(10.0)]).unwrap_err();
        assert!(err.to_string().contains("must not exceed 9"));
    }

    #[test]
    fn vector_index_keeps_source_orientation() {
        let v = Array::row(vec![10.0, 20.0, 30.0]);
        let idx = IndexArg::Value(Value::Num(Array::column(vec![1.0, 3.0])));
        assert_eq!(select(&v, &[idx]).unwrap().shape(), &[1, 2]);
    }

    #[test]
    fn logical_mask() {
        let v = Array::row(vec![1.0, -2.0, 3.0]);
        let mask = IndexArg::Value(Value::Bool(Array::row(vec![true, false, true])));
        assert_eq!(select(&v, &[mask]).unwrap().data(), &[1.0, 3.0]);
    }

    #[test]
    fn end_values() {
        assert_eq!(end_value(&[3, 4], 0, 1), 12);
        assert_eq!(end_value(&[3, 4], 0, 2), 3);
        assert_eq!(end_value(&[3, 4], 1, 2), 4);
        assert_eq!(end_value(&[2, 3, 4], 1, 2), 12);
    }

    #[test]
    fn growth_on_assignment() {
        let mut v = Array::row(vec![1.0]);
        assign(&mut v, &[num(3.0)], &Array::scalar(7.0), 0.0).unwrap();
        assert_eq!(v.data(), &[1.0, 0.0, 7.0]);

        let mut m = Array::<f64>::empty();
        assign(&mut m, &[num(2.0), num(3.0)], &Array::scalar(5.0), 0.0).unwrap();
        assert_eq!(m.shape(), &[2, 3]);
        assert_eq!(m.data()[5], 5.0);

        let mut m = magic3();
        let err = assign(&mut m, &[num(12.0)], &Array::scalar(1.0), 0.0).unwrap_err();
        assert!(err.to_string().contains("ambiguous"));
    }

    #[test]
    fn assignment_count_mismatch() {
        let mut v = Array::row(vec![1.0, 2.0, 3.0]);
        let idx = IndexArg::Value(Value::row(vec![1.0, 2.0]));
        let err = assign(&mut v, &[idx], &Array::row(vec![1.0, 2.0, 3.0]), 0.0).unwrap_err();
        assert!(err.to_string().contains("different number of elements"));
    }

    #[test]
    fn deletion() {
        let mut v = Array::row(vec![1.0, 2.0, 3.0, 4.0]);
        delete(&mut v, &[IndexArg::Value(Value::row(vec![2.0, 4.0]))]).unwrap();
        assert_eq!(v.data(), &[1.0, 3.0]);

        let mut m = magic3();
        delete(&mut m, &[num(2.0), IndexArg::Colon]).unwrap();
        assert_eq!(m.shape(), &[2, 3]);
        assert_eq!(m.data(), &[8.0, 4.0, 1.0, 9.0, 6.0, 2.0]);
    }

    #[test]
    fn paren_assignment_promotes_types() {
        let mut target = Value::Bool(Array::row(vec![true, false]));
        assign_paren(&mut target, &[num(2.0)], &Value::scalar(5.0)).unwrap();
        assert_eq!(target, Value::row(vec![1.0, 5.0]));
    }

    #[test]
    fn failed_assignment_leaves_target_unchanged() {
        let mut target = Value::row(vec![1.0, 2.0]);
        let rhs = Value::row(vec![1.0, 2.0, 3.0]);
        assert!(assign_paren(&mut target, &[num(5.0)], &rhs).is_err());
        assert_eq!(target, Value::row(vec![1.0, 2.0]));
    }

    #[test]
    fn null_assignment_deletes() {
        let mut target = Value::row(vec![1.0, 2.0, 3.0]);
        assign_paren(&mut target, &[num(2.0)], &Value::empty()).unwrap();
        assert_eq!(target, Value::row(vec![1.0, 3.0]));
    }

    #[test]
    fn brace_assignment_creates_cells() {
        let mut target = Value::empty();
        assign_brace(&mut target, &[num(2.0)], Value::str("x")).unwrap();
        let Value::Cell(cells) = target else { panic!() };
        assert_eq!(cells.shape(), &[1, 2]);
        assert_eq!(cells.data()[0], Value::empty());
    }
}

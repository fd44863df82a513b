//! Interpreter values.
//!
//! Arrays are stored column-major with at least two dimensions, the same
//! layout `matbridge_core` uses, so marshalling is a copy rather than a
//! transpose.

use std::fmt;
use std::sync::Arc;

use matbridge_core::{Complex, NumericClass};

use crate::ast::Expr;
use crate::error::{InterpError, InterpResult};

#[derive(Debug, Clone, PartialEq)]
pub struct Array<T> {
    shape: Vec<usize>,
    data: Vec<T>,
}

impl<T: Clone> Array<T> {
    pub fn new(shape: Vec<usize>, data: Vec<T>) -> InterpResult<Self> {
        let shape = normalize_shape(shape);
        let numel: usize = shape.iter().product();
        if numel != data.len() {
            return Err(InterpError::runtime(format!(
                "Internal array size mismatch: shape {} needs {numel} element(s), got {}.",
                shape_text(&shape),
                data.len()
            )));
        }
        Ok(Self { shape, data })
    }

    /// Build without checking; callers guarantee `product(shape) == data.len()`.
    pub(crate) fn from_parts(shape: Vec<usize>, data: Vec<T>) -> Self {
        Self {
            shape: normalize_shape(shape),
            data,
        }
    }

    pub fn scalar(value: T) -> Self {
        Self {
            shape: vec![1, 1],
            data: vec![value],
        }
    }

    pub fn row(data: Vec<T>) -> Self {
        Self {
            shape: vec![1, data.len()],
            data,
        }
    }

    pub fn column(data: Vec<T>) -> Self {
        Self {
            shape: vec![data.len(), 1],
            data,
        }
    }

    pub fn empty() -> Self {
        Self {
            shape: vec![0, 0],
            data: Vec::new(),
        }
    }

    pub fn filled(shape: Vec<usize>, value: T) -> Self {
        let shape = normalize_shape(shape);
        let numel = shape.iter().product();
        Self {
            shape,
            data: vec![value; numel],
        }
    }

    pub fn shape(&self) -> &[usize] {
        &self.shape
    }

    pub fn data(&self) -> &[T] {
        &self.data
    }

    pub fn data_mut(&mut self) -> &mut Vec<T> {
        &mut self.data
    }

    pub fn into_data(self) -> Vec<T> {
        self.data
    }

    pub fn numel(&self) -> usize {
        self.data.len()
    }

    pub fn rows(&self) -> usize {
        self.shape[0]
    }

    pub fn cols(&self) -> usize {
        self.shape[1..].iter().product()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    pub fn is_scalar(&self) -> bool {
        self.data.len() == 1
    }

    pub fn is_vector(&self) -> bool {
        self.shape.len() == 2 && (self.shape[0] == 1 || self.shape[1] == 1)
    }

    pub fn is_row(&self) -> bool {
        self.shape.len() == 2 && self.shape[0] == 1
    }

    pub fn map<U: Clone>(&self, f: impl FnMut(&T) -> U) -> Array<U> {
        Array {
            shape: self.shape.clone(),
            data: self.data.iter().map(f).collect(),
        }
    }

    pub fn reshape(self, shape: Vec<usize>) -> InterpResult<Self> {
        let numel: usize = shape.iter().product();
        if numel != self.data.len() {
            return Err(InterpError::with_id(
                "MATLAB:getReshapeDims:notSameNumel",
                "Number of elements must not change. Use [] as one of the size inputs to \
                 automatically calculate the appropriate size for that dimension.",
            ));
        }
        Ok(Self::from_parts(shape, self.data))
    }

    /// 2-D transpose.
    pub fn transpose(&self) -> InterpResult<Self> {
        if self.shape.len() > 2 {
            return Err(InterpError::runtime(
                "Transpose on ND array is not defined. Use PERMUTE instead.",
            ));
        }
        let (r, c) = (self.shape[0], self.shape[1]);
        let mut data = Vec::with_capacity(self.data.len());
        for i in 0..r {
            for j in 0..c {
                data.push(self.data[j * r + i].clone());
            }
        }
        Ok(Self {
            shape: vec![c, r],
            data,
        })
    }

    /// Element at 2-D position.
    pub fn at(&self, row: usize, col: usize) -> &T {
        &self.data[col * self.shape[0] + row]
    }
}

/// Pad to two dimensions and drop trailing singleton dimensions past the second.
pub fn normalize_shape(mut shape: Vec<usize>) -> Vec<usize> {
    while shape.len() < 2 {
        shape.push(1);
    }
    while shape.len() > 2 && shape.last() == Some(&1) {
        shape.pop();
    }
    shape
}

/// Largest element count one array may hold.
pub const MAX_ARRAY_ELEMENTS: usize = 1 << 28;

/// Element count of an array with dimensions `dims`, or a size-limit fault
/// when it exceeds [`MAX_ARRAY_ELEMENTS`].
pub fn checked_numel(dims: &[usize]) -> InterpResult<usize> {
    dims.iter()
        .try_fold(1usize, |acc, &d| acc.checked_mul(d))
        .filter(|&n| n <= MAX_ARRAY_ELEMENTS)
        .ok_or_else(|| {
            InterpError::with_id(
                "MATLAB:array:SizeLimitExceeded",
                format!(
                    "Requested {} array exceeds maximum array size preference.",
                    shape_text(dims)
                ),
            )
        })
}

pub fn shape_text(shape: &[usize]) -> String {
    shape
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("x")
}

/// A callable value.
#[derive(Debug, Clone, PartialEq)]
pub enum FunctionHandle {
    Named(String),
    Anonymous {
        params: Vec<String>,
        body: Arc<Expr>,
        /// Workspace variables referenced by the body, captured at creation.
        captured: Vec<(String, Value)>,
    },
}

impl fmt::Display for FunctionHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FunctionHandle::Named(name) => write!(f, "@{name}"),
            FunctionHandle::Anonymous { params, body, .. } => {
                write!(f, "@({}){body}", params.join(","))
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    /// Double-precision real array.
    Num(Array<f64>),
    /// `single` or integer array. Elements are kept as `f64` already rounded
    /// and saturated to the class's range.
    Typed(NumericClass, Array<f64>),
    Complex(Array<Complex>),
    Bool(Array<bool>),
    Char(Array<char>),
    Cell(Array<Value>),
    Func(Arc<FunctionHandle>),
    /// Figure handle.
    Figure(u32),
}

impl Default for Value {
    fn default() -> Self {
        Value::Num(Array::empty())
    }
}

impl Value {
    pub fn scalar(v: f64) -> Self {
        Value::Num(Array::scalar(v))
    }

    pub fn boolean(b: bool) -> Self {
        Value::Bool(Array::scalar(b))
    }

    pub fn str(text: &str) -> Self {
        Value::Char(Array::row(text.chars().collect()))
    }

    pub fn row(data: Vec<f64>) -> Self {
        Value::Num(Array::row(data))
    }

    pub fn empty() -> Self {
        Value::default()
    }

    pub fn class_name(&self) -> String {
        match self {
            Value::Num(_) | Value::Complex(_) => "double".to_string(),
            Value::Typed(class, _) => class.to_string(),
            Value::Bool(_) => "logical".to_string(),
            Value::Char(_) => "char".to_string(),
            Value::Cell(_) => "cell".to_string(),
            Value::Func(_) => "function_handle".to_string(),
            Value::Figure(_) => "matlab.ui.Figure".to_string(),
        }
    }

    pub fn shape(&self) -> Vec<usize> {
        match self {
            Value::Num(a) | Value::Typed(_, a) => a.shape().to_vec(),
            Value::Complex(a) => a.shape().to_vec(),
            Value::Bool(a) => a.shape().to_vec(),
            Value::Char(a) => a.shape().to_vec(),
            Value::Cell(a) => a.shape().to_vec(),
            Value::Func(_) | Value::Figure(_) => vec![1, 1],
        }
    }

    pub fn numel(&self) -> usize {
        self.shape().iter().product()
    }

    pub fn is_empty(&self) -> bool {
        self.numel() == 0
    }

    pub fn is_numeric(&self) -> bool {
        matches!(self, Value::Num(_) | Value::Typed(..) | Value::Complex(_))
    }

    /// Text of a char row, if this is one.
    pub fn as_text(&self) -> Option<String> {
        match self {
            Value::Char(a) if a.rows() <= 1 => Some(a.data().iter().collect()),
            _ => None,
        }
    }

    pub fn expect_text(&self, what: &str) -> InterpResult<String> {
        self.as_text().ok_or_else(|| {
            InterpError::runtime(format!("{what} must be a character vector."))
        })
    }

    /// Real elements as doubles. Chars convert to code points and logicals to 0/1.
    pub fn to_f64_array(&self) -> InterpResult<Array<f64>> {
        match self {
            Value::Num(a) | Value::Typed(_, a) => Ok(a.clone()),
            Value::Bool(a) => Ok(a.map(|b| if *b { 1.0 } else { 0.0 })),
            Value::Char(a) => Ok(a.map(|c| *c as u32 as f64)),
            Value::Complex(a) => Ok(a.map(|z| z.re)),
            other => Err(InterpError::runtime(format!(
                "Conversion to double from {} is not possible.",
                other.class_name()
            ))),
        }
    }

    pub fn to_complex_array(&self) -> InterpResult<Array<Complex>> {
        match self {
            Value::Complex(a) => Ok(a.clone()),
            other => Ok(other.to_f64_array()?.map(|v| Complex::new(*v, 0.0))),
        }
    }

    /// A real scalar, e.g. a size argument.
    pub fn to_scalar(&self, what: &str) -> InterpResult<f64> {
        let array = self.to_f64_array()?;
        if array.numel() != 1 {
            return Err(InterpError::runtime(format!("{what} must be a scalar.")));
        }
        Ok(array.data()[0])
    }

    pub fn to_usize(&self, what: &str) -> InterpResult<usize> {
        let v = self.to_scalar(what)?;
        if v < 0.0 || v.fract() != 0.0 || !v.is_finite() {
            return Err(InterpError::runtime(format!(
                "{what} must be a nonnegative integer."
            )));
        }
        Ok(v as usize)
    }

    /// Truth value as used by `if` and `while`: non-empty and all nonzero.
    pub fn is_true(&self) -> InterpResult<bool> {
        match self {
            Value::Bool(a) => Ok(!a.is_empty() && a.data().iter().all(|b| *b)),
            Value::Complex(a) => Ok(!a.is_empty() && a.data().iter().all(|z| z.re != 0.0 || z.im != 0.0)),
            Value::Num(_) | Value::Typed(..) | Value::Char(_) => {
                let a = self.to_f64_array()?;
                if a.data().iter().any(|v| v.is_nan()) {
                    return Err(InterpError::with_id(
                        "MATLAB:nologicalnan",
                        "NaN's cannot be converted to logicals.",
                    ));
                }
                Ok(!a.is_empty() && a.data().iter().all(|v| *v != 0.0))
            }
            other => Err(InterpError::runtime(format!(
                "Conversion to logical from {} is not possible.",
                other.class_name()
            ))),
        }
    }

    pub fn to_bool_array(&self) -> InterpResult<Array<bool>> {
        match self {
            Value::Bool(a) => Ok(a.clone()),
            other => {
                let a = other.to_f64_array()?;
                if a.data().iter().any(|v| v.is_nan()) {
                    return Err(InterpError::with_id(
                        "MATLAB:nologicalnan",
                        "NaN's cannot be converted to logicals.",
                    ));
                }
                Ok(a.map(|v| *v != 0.0))
            }
        }
    }

    /// Drop a zero imaginary part, as arithmetic results do.
    pub fn simplify(self) -> Value {
        match self {
            Value::Complex(a) if a.data().iter().all(|z| z.im == 0.0) => {
                Value::Num(a.map(|z| z.re))
            }
            other => other,
        }
    }
}

/// Round and saturate `v` into `class`.
pub fn cast_to(class: NumericClass, v: f64) -> f64 {
    let (lo, hi) = match class {
        NumericClass::Double => return v,
        NumericClass::Single => return v as f32 as f64,
        NumericClass::Int8 => (i8::MIN as f64, i8::MAX as f64),
        NumericClass::Int16 => (i16::MIN as f64, i16::MAX as f64),
        NumericClass::Int32 => (i32::MIN as f64, i32::MAX as f64),
        NumericClass::Int64 => (i64::MIN as f64, i64::MAX as f64),
        NumericClass::Uint8 => (0.0, u8::MAX as f64),
        NumericClass::Uint16 => (0.0, u16::MAX as f64),
        NumericClass::Uint32 => (0.0, u32::MAX as f64),
        NumericClass::Uint64 => (0.0, u64::MAX as f64),
    };
    if v.is_nan() {
        return 0.0;
    }
    v.round().clamp(lo, hi)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transpose_swaps_layout() {
        let a = Array::new(vec![2, 3], vec![1, 2, 3, 4, 5, 6]).unwrap();
        let t = a.transpose().unwrap();
        assert_eq!(t.shape(), &[3, 2]);
        assert_eq!(t.data(), &[1, 3, 5, 2, 4, 6]);
    }

    #[test]
    fn shapes_are_normalized() {
        let a = Array::filled(vec![2, 2, 1], 0.0);
        assert_eq!(a.shape(), &[2, 2]);
        assert_eq!(Array::<f64>::empty().shape(), &[0, 0]);
    }

    #[test]
    fn integer_casts_saturate() {
        assert_eq!(cast_to(NumericClass::Uint8, 300.0), 255.0);
        assert_eq!(cast_to(NumericClass::Int8, -2.5), -3.0);
        assert_eq!(cast_to(NumericClass::Int32, f64::NAN), 0.0);
    }

    #[test]
    fn truthiness() {
        assert!(Value::row(vec![1.0, 2.0]).is_true().unwrap());
        assert!(!Value::row(vec![1.0, 0.0]).is_true().unwrap());
        assert!(!Value::empty().is_true().unwrap());
        assert!(Value::scalar(f64::NAN).is_true().is_err());
    }
}

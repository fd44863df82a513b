//! Runtime values as seen by the compression engine.
//!
//! Engines marshal their workspace variables into [`RuntimeValue`], a closed
//! tagged union over the value kinds the serializer understands. Anything
//! else arrives as [`RuntimeValue::Opaque`] so that classification and
//! serialization stay exhaustive matches.
//!
//! Array data is stored in column-major order, the natural linear-index order
//! of the engine. Every array has at least two dimensions.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::ValueError;

/// Bytes MATLAB reports per cell element header on 64-bit platforms.
pub const CELL_HEADER_BYTES: u64 = 112;

/// Bytes per character of a char array (UTF-16 storage).
pub const CHAR_BYTES: u64 = 2;

/// Dimension sizes of a value.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Shape(Vec<usize>);

impl Shape {
    /// Build a shape, padding to at least two dimensions and dropping
    /// trailing singleton dimensions beyond the second.
    pub fn new(dims: impl Into<Vec<usize>>) -> Self {
        let mut dims = dims.into();
        while dims.len() < 2 {
            dims.push(1);
        }
        while dims.len() > 2 && dims.last() == Some(&1) {
            dims.pop();
        }
        Self(dims)
    }

    pub fn scalar() -> Self {
        Self(vec![1, 1])
    }

    pub fn row(len: usize) -> Self {
        Self(vec![1, len])
    }

    pub fn column(len: usize) -> Self {
        Self(vec![len, 1])
    }

    pub fn matrix(rows: usize, cols: usize) -> Self {
        Self(vec![rows, cols])
    }

    pub fn dims(&self) -> &[usize] {
        &self.0
    }

    /// Total element count, or `None` when the product overflows.
    pub fn checked_numel(&self) -> Option<usize> {
        self.0.iter().try_fold(1usize, |acc, &d| acc.checked_mul(d))
    }

    /// Total element count (product of all dimensions), saturating at
    /// `usize::MAX`.
    pub fn numel(&self) -> usize {
        self.checked_numel().unwrap_or(usize::MAX)
    }

    /// True for `1xN` and `Nx1` shapes (scalars included).
    pub fn is_vector(&self) -> bool {
        self.0.len() == 2 && (self.0[0] == 1 || self.0[1] == 1)
    }

    pub fn is_empty(&self) -> bool {
        self.numel() == 0
    }
}

impl fmt::Display for Shape {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let parts: Vec<String> = self.0.iter().map(|d| d.to_string()).collect();
        f.write_str(&parts.join("x"))
    }
}

/// Numeric storage class of a real or complex array.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NumericClass {
    Double,
    Single,
    Int8,
    Int16,
    Int32,
    Int64,
    Uint8,
    Uint16,
    Uint32,
    Uint64,
}

impl NumericClass {
    /// Bytes per real element.
    pub fn byte_width(self) -> u64 {
        match self {
            Self::Double | Self::Int64 | Self::Uint64 => 8,
            Self::Single | Self::Int32 | Self::Uint32 => 4,
            Self::Int16 | Self::Uint16 => 2,
            Self::Int8 | Self::Uint8 => 1,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Double => "double",
            Self::Single => "single",
            Self::Int8 => "int8",
            Self::Int16 => "int16",
            Self::Int32 => "int32",
            Self::Int64 => "int64",
            Self::Uint8 => "uint8",
            Self::Uint16 => "uint16",
            Self::Uint32 => "uint32",
            Self::Uint64 => "uint64",
        }
    }

    pub fn parse(name: &str) -> Option<Self> {
        Some(match name {
            "double" => Self::Double,
            "single" => Self::Single,
            "int8" => Self::Int8,
            "int16" => Self::Int16,
            "int32" => Self::Int32,
            "int64" => Self::Int64,
            "uint8" => Self::Uint8,
            "uint16" => Self::Uint16,
            "uint32" => Self::Uint32,
            "uint64" => Self::Uint64,
            _ => return None,
        })
    }

    pub fn is_float(self) -> bool {
        matches!(self, Self::Double | Self::Single)
    }

    pub fn is_signed_integer(self) -> bool {
        matches!(self, Self::Int8 | Self::Int16 | Self::Int32 | Self::Int64)
    }

    pub fn is_unsigned_integer(self) -> bool {
        matches!(self, Self::Uint8 | Self::Uint16 | Self::Uint32 | Self::Uint64)
    }
}

impl fmt::Display for NumericClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Element storage for real arrays, kept in the class's native precision.
#[derive(Debug, Clone, PartialEq)]
pub enum NumericData {
    F64(Vec<f64>),
    F32(Vec<f32>),
    I64(Vec<i64>),
    U64(Vec<u64>),
}

impl NumericData {
    pub fn len(&self) -> usize {
        match self {
            Self::F64(v) => v.len(),
            Self::F32(v) => v.len(),
            Self::I64(v) => v.len(),
            Self::U64(v) => v.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn fits(&self, class: NumericClass) -> bool {
        match self {
            Self::F64(_) => class == NumericClass::Double,
            Self::F32(_) => class == NumericClass::Single,
            Self::I64(_) => class.is_signed_integer(),
            Self::U64(_) => class.is_unsigned_integer(),
        }
    }
}

/// A complex number with double-precision parts.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Complex {
    pub re: f64,
    pub im: f64,
}

impl Complex {
    pub fn new(re: f64, im: f64) -> Self {
        Self { re, im }
    }

    /// Magnitude, computed without intermediate overflow.
    pub fn norm(self) -> f64 {
        self.re.hypot(self.im)
    }

    pub fn is_finite(self) -> bool {
        self.re.is_finite() && self.im.is_finite()
    }
}

/// Real N-D array.
#[derive(Debug, Clone, PartialEq)]
pub struct NumericArray {
    shape: Shape,
    class: NumericClass,
    data: NumericData,
}

impl NumericArray {
    pub fn new(shape: Shape, class: NumericClass, data: NumericData) -> Result<Self, ValueError> {
        if !data.fits(class) {
            return Err(ValueError::ClassMismatch {
                class: class.to_string(),
            });
        }
        check_len(&shape, data.len())?;
        Ok(Self { shape, class, data })
    }

    /// Double array from column-major data.
    pub fn from_f64(shape: Shape, data: Vec<f64>) -> Result<Self, ValueError> {
        Self::new(shape, NumericClass::Double, NumericData::F64(data))
    }

    /// Double row vector.
    pub fn row(data: Vec<f64>) -> Self {
        Self {
            shape: Shape::row(data.len()),
            class: NumericClass::Double,
            data: NumericData::F64(data),
        }
    }

    pub fn shape(&self) -> &Shape {
        &self.shape
    }

    pub fn class(&self) -> NumericClass {
        self.class
    }

    pub fn data(&self) -> &NumericData {
        &self.data
    }
}

/// Complex N-D array.
#[derive(Debug, Clone, PartialEq)]
pub struct ComplexArray {
    shape: Shape,
    class: NumericClass,
    data: Vec<Complex>,
}

impl ComplexArray {
    pub fn new(shape: Shape, class: NumericClass, data: Vec<Complex>) -> Result<Self, ValueError> {
        if !class.is_float() {
            return Err(ValueError::ClassMismatch {
                class: format!("complex {class}"),
            });
        }
        check_len(&shape, data.len())?;
        Ok(Self { shape, class, data })
    }

    pub fn shape(&self) -> &Shape {
        &self.shape
    }

    pub fn class(&self) -> NumericClass {
        self.class
    }

    pub fn data(&self) -> &[Complex] {
        &self.data
    }
}

/// Boolean N-D array.
#[derive(Debug, Clone, PartialEq)]
pub struct LogicalArray {
    shape: Shape,
    data: Vec<bool>,
}

impl LogicalArray {
    pub fn new(shape: Shape, data: Vec<bool>) -> Result<Self, ValueError> {
        check_len(&shape, data.len())?;
        Ok(Self { shape, data })
    }

    pub fn shape(&self) -> &Shape {
        &self.shape
    }

    pub fn data(&self) -> &[bool] {
        &self.data
    }
}

/// Heterogeneous aggregate ("cell array").
#[derive(Debug, Clone, PartialEq)]
pub struct CellArray {
    shape: Shape,
    items: Vec<RuntimeValue>,
}

impl CellArray {
    pub fn new(shape: Shape, items: Vec<RuntimeValue>) -> Result<Self, ValueError> {
        check_len(&shape, items.len())?;
        Ok(Self { shape, items })
    }

    /// Cell row vector.
    pub fn row(items: Vec<RuntimeValue>) -> Self {
        Self {
            shape: Shape::row(items.len()),
            items,
        }
    }

    pub fn shape(&self) -> &Shape {
        &self.shape
    }

    pub fn items(&self) -> &[RuntimeValue] {
        &self.items
    }
}

/// A value the engine could name but not marshal into a supported kind.
#[derive(Debug, Clone, PartialEq)]
pub struct OpaqueValue {
    pub class_name: String,
    /// Textual form, when the engine can produce one.
    pub repr: Option<String>,
}

/// One workspace variable's value.
#[derive(Debug, Clone, PartialEq)]
pub enum RuntimeValue {
    /// Real double scalar.
    Scalar(f64),
    Bool(bool),
    /// Character row vector.
    Text(String),
    Numeric(NumericArray),
    Complex(ComplexArray),
    Logical(LogicalArray),
    Cell(CellArray),
    Opaque(OpaqueValue),
}

impl RuntimeValue {
    pub fn shape(&self) -> Shape {
        match self {
            Self::Scalar(_) | Self::Bool(_) | Self::Opaque(_) => Shape::scalar(),
            Self::Text(s) => Shape::row(s.chars().count()),
            Self::Numeric(a) => a.shape.clone(),
            Self::Complex(a) => a.shape.clone(),
            Self::Logical(a) => a.shape.clone(),
            Self::Cell(c) => c.shape.clone(),
        }
    }

    /// Top-level element count. Cells count their cells, not their contents.
    pub fn element_count(&self) -> usize {
        match self {
            Self::Scalar(_) | Self::Bool(_) | Self::Opaque(_) => 1,
            Self::Text(s) => s.chars().count(),
            Self::Numeric(a) => a.data.len(),
            Self::Complex(a) => a.data.len(),
            Self::Logical(a) => a.data.len(),
            Self::Cell(c) => c.items.len(),
        }
    }

    /// Element type tag as reported on the wire.
    pub fn dtype(&self) -> String {
        match self {
            Self::Scalar(_) => "double".to_string(),
            Self::Bool(_) | Self::Logical(_) => "logical".to_string(),
            Self::Text(_) => "char".to_string(),
            Self::Numeric(a) => a.class.to_string(),
            Self::Complex(a) => format!("complex {}", a.class),
            Self::Cell(_) => "cell".to_string(),
            Self::Opaque(o) => o.class_name.clone(),
        }
    }

    /// Estimated memory footprint in bytes.
    pub fn footprint_bytes(&self) -> u64 {
        match self {
            Self::Scalar(_) => 8,
            Self::Bool(_) => 1,
            Self::Text(s) => s.chars().count() as u64 * CHAR_BYTES,
            Self::Numeric(a) => a.data.len() as u64 * a.class.byte_width(),
            Self::Complex(a) => a.data.len() as u64 * 2 * a.class.byte_width(),
            Self::Logical(a) => a.data.len() as u64,
            Self::Cell(c) => c
                .items
                .iter()
                .map(|item| CELL_HEADER_BYTES + item.footprint_bytes())
                .sum(),
            Self::Opaque(_) => 0,
        }
    }

    /// Short MATLAB-style description such as `1x500 double`.
    pub fn describe(&self) -> String {
        format!("{} {}", self.shape(), self.dtype())
    }
}

fn check_len(shape: &Shape, len: usize) -> Result<(), ValueError> {
    if shape.numel() != len {
        return Err(ValueError::ShapeMismatch {
            shape: shape.to_string(),
            expected: shape.numel(),
            actual: len,
        });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn shape_pads_and_trims() {
        assert_eq!(Shape::new(vec![5]).dims(), &[5, 1]);
        assert_eq!(Shape::new(vec![2, 3, 1, 1]).dims(), &[2, 3]);
        assert_eq!(Shape::new(vec![2, 3, 4]).dims(), &[2, 3, 4]);
        assert_eq!(Shape::matrix(3, 4).to_string(), "3x4");
    }

    #[test]
    fn vector_detection() {
        assert!(Shape::row(10).is_vector());
        assert!(Shape::column(10).is_vector());
        assert!(Shape::scalar().is_vector());
        assert!(!Shape::matrix(2, 2).is_vector());
        assert!(!Shape::new(vec![1, 1, 3]).is_vector());
    }

    #[test]
    fn element_count_overflow_is_detected() {
        let shape = Shape::new(vec![usize::MAX, 2]);
        assert_eq!(shape.checked_numel(), None);
        assert_eq!(shape.numel(), usize::MAX);
        assert_eq!(Shape::new(vec![3, 4, 5]).checked_numel(), Some(60));
    }

    #[test]
    fn numeric_array_rejects_bad_length() {
        let err = NumericArray::from_f64(Shape::matrix(2, 2), vec![1.0, 2.0, 3.0]).unwrap_err();
        assert!(err.to_string().contains("2x2"));
    }

    #[test]
    fn numeric_array_rejects_class_mismatch() {
        let err = NumericArray::new(
            Shape::row(1),
            NumericClass::Int32,
            NumericData::F64(vec![1.0]),
        )
        .unwrap_err();
        assert!(matches!(err, ValueError::ClassMismatch { .. }));
    }

    #[test]
    fn footprint_uses_class_width() {
        let ints = NumericArray::new(
            Shape::row(4),
            NumericClass::Int16,
            NumericData::I64(vec![1, 2, 3, 4]),
        )
        .unwrap();
        assert_eq!(RuntimeValue::Numeric(ints).footprint_bytes(), 8);

        let z = ComplexArray::new(
            Shape::row(2),
            NumericClass::Double,
            vec![Complex::new(1.0, 1.0); 2],
        )
        .unwrap();
        assert_eq!(RuntimeValue::Complex(z).footprint_bytes(), 32);
        assert_eq!(RuntimeValue::Text("abc".into()).footprint_bytes(), 6);
    }

    #[test]
    fn cell_counts_top_level_only() {
        let inner = RuntimeValue::Numeric(NumericArray::row(vec![0.0; 50]));
        let cell = RuntimeValue::Cell(CellArray::row(vec![inner, RuntimeValue::Scalar(1.0)]));
        assert_eq!(cell.element_count(), 2);
        assert_eq!(cell.dtype(), "cell");
        assert_eq!(cell.footprint_bytes(), 2 * CELL_HEADER_BYTES + 400 + 8);
    }

    #[test]
    fn describe_reads_like_matlab() {
        let v = RuntimeValue::Numeric(NumericArray::row(vec![0.0; 500]));
        assert_eq!(v.describe(), "1x500 double");
    }
}

//! Tier-specific payloads for workspace variables.
//!
//! Full payloads lay data out as nested row-major lists (vectors stay flat)
//! and can be decoded back into the same [`RuntimeValue`]. Summary and
//! metadata payloads carry statistics and a short preview in storage
//! (column-major) order. Floats are written in shortest round-trip form;
//! non-finite values become the strings `"NaN"`, `"Inf"` and `"-Inf"`.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use super::stats::{value_stats, StatNumber};
use super::tier::{classify, Tier};
use crate::config::CompressionConfig;
use crate::error::SerializationFault;
use crate::value::{
    CellArray, Complex, ComplexArray, LogicalArray, NumericArray, NumericClass, NumericData,
    OpaqueValue, RuntimeValue, Shape,
};

/// Longest text shown verbatim in a cell preview.
const PREVIEW_TEXT_CHARS: usize = 32;

/// Wire form of one variable, tagged by `_type`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "_type", rename_all = "snake_case")]
pub enum SerializedVariable {
    Full(FullPayload),
    Summary(SummaryPayload),
    Metadata(MetadataPayload),
}

impl SerializedVariable {
    pub fn tier(&self) -> Tier {
        match self {
            SerializedVariable::Full(_) => Tier::Full,
            SerializedVariable::Summary(_) => Tier::Summary,
            SerializedVariable::Metadata(_) => Tier::Metadata,
        }
    }

    pub fn dtype(&self) -> &str {
        match self {
            SerializedVariable::Full(p) => &p.dtype,
            SerializedVariable::Summary(p) => &p.dtype,
            SerializedVariable::Metadata(p) => &p.dtype,
        }
    }

    pub fn shape(&self) -> &[usize] {
        match self {
            SerializedVariable::Full(p) => &p.shape,
            SerializedVariable::Summary(p) => &p.shape,
            SerializedVariable::Metadata(p) => &p.shape,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FullPayload {
    pub shape: Vec<usize>,
    pub dtype: String,
    pub data: Value,
}

/// Statistics and a preview for a variable too large to send in full.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SummaryPayload {
    pub shape: Vec<usize>,
    pub dtype: String,
    pub total_elements: usize,
    pub min: Option<StatNumber>,
    pub max: Option<StatNumber>,
    pub mean: Option<f64>,
    #[serde(default, skip_serializing_if = "is_zero")]
    pub non_finite_elements: usize,
    /// First elements in column-major storage order, so a 2x2 `[1 2; 3 4]`
    /// previews as `[1, 3, 2, 4]`. Unlike [`FullPayload::data`], this list
    /// is flat and not row-major.
    pub sample_data: Vec<Value>,
    pub memory_usage_bytes: u64,
}

/// Like [`SummaryPayload`], with a shorter column-major preview and a note.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetadataPayload {
    pub shape: Vec<usize>,
    pub dtype: String,
    pub total_elements: usize,
    pub min: Option<StatNumber>,
    pub max: Option<StatNumber>,
    pub mean: Option<f64>,
    #[serde(default, skip_serializing_if = "is_zero")]
    pub non_finite_elements: usize,
    pub sample_data: Vec<Value>,
    pub memory_usage_bytes: u64,
    pub note: String,
}

fn is_zero(n: &usize) -> bool {
    *n == 0
}

/// Serialize `value` at `tier`.
///
/// Logical values are always emitted in full. Opaque values fall back to
/// their textual form, or fault when they have none.
pub fn serialize(
    value: &RuntimeValue,
    tier: Tier,
    config: &CompressionConfig,
) -> Result<SerializedVariable, SerializationFault> {
    serialize_at(value, tier, config, 0)
}

/// Classify and serialize in one step.
pub fn serialize_value(
    value: &RuntimeValue,
    config: &CompressionConfig,
) -> Result<SerializedVariable, SerializationFault> {
    serialize(value, classify(value, config), config)
}

fn serialize_at(
    value: &RuntimeValue,
    tier: Tier,
    config: &CompressionConfig,
    depth: usize,
) -> Result<SerializedVariable, SerializationFault> {
    if let RuntimeValue::Opaque(opaque) = value {
        return opaque_fallback(opaque);
    }
    if matches!(value, RuntimeValue::Bool(_) | RuntimeValue::Logical(_)) {
        return full(value, config, depth);
    }
    match tier {
        Tier::Full => full(value, config, depth),
        Tier::Summary => Ok(SerializedVariable::Summary(summarize(
            value,
            config.preview_element_count,
        ))),
        Tier::Metadata => {
            let preview = config.metadata_preview();
            let summary = summarize(value, preview);
            let note = format!(
                "Large variable: {} elements ({} {}); data omitted, showing first {}",
                summary.total_elements,
                value.shape(),
                summary.dtype,
                summary.sample_data.len()
            );
            Ok(SerializedVariable::Metadata(with_note(summary, note)))
        }
    }
}

fn opaque_fallback(opaque: &OpaqueValue) -> Result<SerializedVariable, SerializationFault> {
    match &opaque.repr {
        Some(repr) => Ok(SerializedVariable::Full(FullPayload {
            shape: Shape::scalar().dims().to_vec(),
            dtype: opaque.class_name.clone(),
            data: Value::String(repr.clone()),
        })),
        None => Err(SerializationFault::Unsupported {
            class: opaque.class_name.clone(),
        }),
    }
}

fn full(
    value: &RuntimeValue,
    config: &CompressionConfig,
    depth: usize,
) -> Result<SerializedVariable, SerializationFault> {
    let shape = value.shape();
    let data = match value {
        RuntimeValue::Scalar(v) => encode_f64(*v),
        RuntimeValue::Bool(b) => Value::Bool(*b),
        RuntimeValue::Text(s) => Value::String(s.clone()),
        RuntimeValue::Numeric(array) => layout(&shape, |i| Ok(numeric_element(array, i)))?,
        RuntimeValue::Complex(array) => layout(&shape, |i| Ok(encode_complex(array.data()[i])))?,
        RuntimeValue::Logical(array) => layout(&shape, |i| Ok(Value::Bool(array.data()[i])))?,
        RuntimeValue::Cell(cell) => {
            layout(&shape, |i| member_payload(&cell.items()[i], config, depth + 1))?
        }
        RuntimeValue::Opaque(opaque) => return opaque_fallback(opaque),
    };
    Ok(SerializedVariable::Full(FullPayload {
        shape: shape.dims().to_vec(),
        dtype: value.dtype(),
        data,
    }))
}

/// Payload of one cell member. Cells below the first nesting level, and
/// first-level cells with more than `small_threshold` cells, are reduced to
/// their count.
fn member_payload(
    item: &RuntimeValue,
    config: &CompressionConfig,
    depth: usize,
) -> Result<Value, SerializationFault> {
    let serialized = match item {
        RuntimeValue::Cell(inner) if depth >= 2 || inner.items().len() > config.small_threshold => {
            count_only(inner)
        }
        RuntimeValue::Cell(_) => serialize_at(item, Tier::Full, config, depth)?,
        _ => serialize_at(item, classify(item, config), config, depth)?,
    };
    serde_json::to_value(&serialized).map_err(|e| SerializationFault::Malformed(e.to_string()))
}

fn count_only(cell: &CellArray) -> SerializedVariable {
    let count = cell.items().len();
    SerializedVariable::Metadata(MetadataPayload {
        shape: cell.shape().dims().to_vec(),
        dtype: "cell".to_string(),
        total_elements: count,
        min: None,
        max: None,
        mean: None,
        non_finite_elements: 0,
        sample_data: Vec::new(),
        memory_usage_bytes: RuntimeValue::Cell(cell.clone()).footprint_bytes(),
        note: format!("Nested cell with {count} elements; contents omitted"),
    })
}

fn summarize(value: &RuntimeValue, preview: usize) -> SummaryPayload {
    let stats = value_stats(value);
    let total_elements = match value {
        RuntimeValue::Cell(cell) => super::tier::aggregate_count(cell),
        other => other.element_count(),
    };
    SummaryPayload {
        shape: value.shape().dims().to_vec(),
        dtype: value.dtype(),
        total_elements,
        min: stats.min,
        max: stats.max,
        mean: stats.mean,
        non_finite_elements: stats.non_finite_count,
        sample_data: sample(value, preview),
        memory_usage_bytes: value.footprint_bytes(),
    }
}

fn with_note(summary: SummaryPayload, note: String) -> MetadataPayload {
    MetadataPayload {
        shape: summary.shape,
        dtype: summary.dtype,
        total_elements: summary.total_elements,
        min: summary.min,
        max: summary.max,
        mean: summary.mean,
        non_finite_elements: summary.non_finite_elements,
        sample_data: summary.sample_data,
        memory_usage_bytes: summary.memory_usage_bytes,
        note,
    }
}

fn sample(value: &RuntimeValue, n: usize) -> Vec<Value> {
    match value {
        RuntimeValue::Scalar(v) => vec![encode_f64(*v)],
        RuntimeValue::Bool(b) => vec![Value::Bool(*b)],
        RuntimeValue::Text(s) => vec![Value::String(s.chars().take(n).collect())],
        RuntimeValue::Numeric(array) => (0..array.data().len().min(n))
            .map(|i| numeric_element(array, i))
            .collect(),
        RuntimeValue::Complex(array) => array
            .data()
            .iter()
            .take(n)
            .map(|z| encode_complex(*z))
            .collect(),
        RuntimeValue::Logical(array) => array
            .data()
            .iter()
            .take(n)
            .map(|b| Value::Bool(*b))
            .collect(),
        RuntimeValue::Cell(cell) => cell.items().iter().take(n).map(member_preview).collect(),
        RuntimeValue::Opaque(o) => vec![Value::String(o.repr.clone().unwrap_or_default())],
    }
}

fn member_preview(item: &RuntimeValue) -> Value {
    match item {
        RuntimeValue::Scalar(v) => encode_f64(*v),
        RuntimeValue::Bool(b) => Value::Bool(*b),
        RuntimeValue::Text(s) if s.chars().count() <= PREVIEW_TEXT_CHARS => {
            Value::String(s.clone())
        }
        other => Value::String(format!("[{}]", other.describe())),
    }
}

fn encode_f64(v: f64) -> Value {
    if v.is_nan() {
        Value::String("NaN".into())
    } else if v.is_infinite() {
        Value::String(if v > 0.0 { "Inf" } else { "-Inf" }.into())
    } else {
        Value::from(v)
    }
}

fn encode_complex(z: Complex) -> Value {
    let mut map = Map::new();
    map.insert("real".into(), encode_f64(z.re));
    map.insert("imag".into(), encode_f64(z.im));
    Value::Object(map)
}

fn numeric_element(array: &NumericArray, i: usize) -> Value {
    match array.data() {
        NumericData::F64(v) => encode_f64(v[i]),
        NumericData::F32(v) => encode_f64(f64::from(v[i])),
        NumericData::I64(v) => Value::from(v[i]),
        NumericData::U64(v) => Value::from(v[i]),
    }
}

fn column_major_strides(dims: &[usize]) -> Vec<usize> {
    let mut strides = Vec::with_capacity(dims.len());
    let mut stride: usize = 1;
    for d in dims {
        strides.push(stride);
        stride = stride.saturating_mul(*d);
    }
    strides
}

/// Arrange column-major elements as a flat list (vectors) or nested
/// row-major lists (everything else).
fn layout<F>(shape: &Shape, mut element: F) -> Result<Value, SerializationFault>
where
    F: FnMut(usize) -> Result<Value, SerializationFault>,
{
    if shape.is_vector() {
        let items = (0..shape.numel())
            .map(&mut element)
            .collect::<Result<Vec<_>, _>>()?;
        return Ok(Value::Array(items));
    }
    let dims = shape.dims();
    let strides = column_major_strides(dims);
    nest(dims, &strides, 0, 0, &mut element)
}

fn nest<F>(
    dims: &[usize],
    strides: &[usize],
    level: usize,
    offset: usize,
    element: &mut F,
) -> Result<Value, SerializationFault>
where
    F: FnMut(usize) -> Result<Value, SerializationFault>,
{
    let mut items = Vec::with_capacity(dims[level]);
    for i in 0..dims[level] {
        let index = offset + i * strides[level];
        if level + 1 == dims.len() {
            items.push(element(index)?);
        } else {
            items.push(nest(dims, strides, level + 1, index, element)?);
        }
    }
    Ok(Value::Array(items))
}

/// Inverse of [`layout`]: elements in column-major order.
fn unlayout<'a>(shape: &Shape, data: &'a Value) -> Result<Vec<&'a Value>, SerializationFault> {
    if shape.is_vector() {
        let items = data
            .as_array()
            .ok_or_else(|| malformed("expected a list for vector data"))?;
        if items.len() != shape.numel() {
            return Err(malformed(&format!(
                "expected {} elements, found {}",
                shape.numel(),
                items.len()
            )));
        }
        return Ok(items.iter().collect());
    }
    let dims = shape.dims();
    let expected = shape
        .checked_numel()
        .ok_or_else(|| malformed(&format!("shape {shape} is too large")))?;
    let found = nested_len(data, dims.len())
        .ok_or_else(|| malformed(&format!("expected lists nested {} deep", dims.len())))?;
    if found != expected {
        return Err(malformed(&format!(
            "expected {expected} elements, found {found}"
        )));
    }
    let strides = column_major_strides(dims);
    let mut out: Vec<Option<&Value>> = vec![None; expected];
    fill(dims, &strides, 0, 0, data, &mut out)?;
    out.into_iter()
        .collect::<Option<Vec<_>>>()
        .ok_or_else(|| malformed("nested data does not cover the shape"))
}

/// Leaf count of `data` taken `depth` lists deep.
fn nested_len(data: &Value, depth: usize) -> Option<usize> {
    if depth == 0 {
        return Some(1);
    }
    data.as_array()?
        .iter()
        .try_fold(0usize, |acc, child| Some(acc + nested_len(child, depth - 1)?))
}

fn fill<'a>(
    dims: &[usize],
    strides: &[usize],
    level: usize,
    offset: usize,
    data: &'a Value,
    out: &mut [Option<&'a Value>],
) -> Result<(), SerializationFault> {
    let items = data
        .as_array()
        .filter(|items| items.len() == dims[level])
        .ok_or_else(|| malformed(&format!("expected a list of {} at depth {level}", dims[level])))?;
    for (i, child) in items.iter().enumerate() {
        let index = offset + i * strides[level];
        if level + 1 == dims.len() {
            out[index] = Some(child);
        } else {
            fill(dims, strides, level + 1, index, child, out)?;
        }
    }
    Ok(())
}

fn malformed(reason: &str) -> SerializationFault {
    SerializationFault::Malformed(reason.to_string())
}

fn decode_f64(v: &Value) -> Result<f64, SerializationFault> {
    match v {
        Value::Number(n) => n.as_f64().ok_or_else(|| malformed("number out of range")),
        Value::String(s) => match s.as_str() {
            "NaN" => Ok(f64::NAN),
            "Inf" => Ok(f64::INFINITY),
            "-Inf" => Ok(f64::NEG_INFINITY),
            other => Err(malformed(&format!("not a number: {other:?}"))),
        },
        other => Err(malformed(&format!("not a number: {other}"))),
    }
}

fn decode_complex(v: &Value) -> Result<Complex, SerializationFault> {
    let re = v.get("real").ok_or_else(|| malformed("complex element without real"))?;
    let im = v.get("imag").ok_or_else(|| malformed("complex element without imag"))?;
    Ok(Complex::new(decode_f64(re)?, decode_f64(im)?))
}

fn decode_numeric(
    class: NumericClass,
    items: &[&Value],
) -> Result<NumericData, SerializationFault> {
    Ok(match class {
        NumericClass::Double => NumericData::F64(
            items
                .iter()
                .map(|v| decode_f64(v))
                .collect::<Result<_, _>>()?,
        ),
        NumericClass::Single => NumericData::F32(
            items
                .iter()
                .map(|v| decode_f64(v).map(|x| x as f32))
                .collect::<Result<_, _>>()?,
        ),
        c if c.is_signed_integer() => NumericData::I64(
            items
                .iter()
                .map(|v| v.as_i64().ok_or_else(|| malformed("expected an integer")))
                .collect::<Result<_, _>>()?,
        ),
        _ => NumericData::U64(
            items
                .iter()
                .map(|v| v.as_u64().ok_or_else(|| malformed("expected an unsigned integer")))
                .collect::<Result<_, _>>()?,
        ),
    })
}

/// Reconstruct a runtime value from a full payload.
pub fn decode_full(payload: &FullPayload) -> Result<RuntimeValue, SerializationFault> {
    let shape = Shape::new(payload.shape.clone());
    let dtype = payload.dtype.as_str();
    let data = &payload.data;

    match dtype {
        "double" if !data.is_array() => Ok(RuntimeValue::Scalar(decode_f64(data)?)),
        "logical" if data.is_boolean() => Ok(RuntimeValue::Bool(data.as_bool().unwrap_or(false))),
        "logical" => {
            let bits = unlayout(&shape, data)?
                .into_iter()
                .map(|v| v.as_bool().ok_or_else(|| malformed("expected a boolean")))
                .collect::<Result<Vec<_>, _>>()?;
            Ok(RuntimeValue::Logical(LogicalArray::new(shape, bits)?))
        }
        "char" => data
            .as_str()
            .map(|s| RuntimeValue::Text(s.to_string()))
            .ok_or_else(|| malformed("char data must be a string")),
        "cell" => {
            let members = unlayout(&shape, data)?
                .into_iter()
                .map(|member| {
                    match serde_json::from_value::<SerializedVariable>(member.clone()) {
                        Ok(SerializedVariable::Full(inner)) => decode_full(&inner),
                        Ok(other) => Err(malformed(&format!(
                            "cell member was compressed to {}",
                            other.tier()
                        ))),
                        Err(e) => Err(malformed(&e.to_string())),
                    }
                })
                .collect::<Result<Vec<_>, _>>()?;
            Ok(RuntimeValue::Cell(CellArray::new(shape, members)?))
        }
        _ => {
            if let Some(class) = dtype.strip_prefix("complex ").and_then(NumericClass::parse) {
                let items = unlayout(&shape, data)?
                    .into_iter()
                    .map(decode_complex)
                    .collect::<Result<Vec<_>, _>>()?;
                return Ok(RuntimeValue::Complex(ComplexArray::new(shape, class, items)?));
            }
            if let Some(class) = NumericClass::parse(dtype) {
                let items = unlayout(&shape, data)?;
                let numeric = decode_numeric(class, &items)?;
                return Ok(RuntimeValue::Numeric(NumericArray::new(shape, class, numeric)?));
            }
            Ok(RuntimeValue::Opaque(OpaqueValue {
                class_name: payload.dtype.clone(),
                repr: data.as_str().map(str::to_string),
            }))
        }
    }
}

/// Convert a client-supplied JSON value into a runtime value.
///
/// Numbers become double scalars, number lists row vectors, lists of equally
/// long number lists matrices (one list per row), and boolean lists logical
/// rows. Full payloads decode exactly. Other lists become cell rows.
pub fn value_from_json(value: &Value) -> Result<RuntimeValue, SerializationFault> {
    match value {
        Value::Null => Err(malformed("null has no workspace equivalent")),
        Value::Bool(b) => Ok(RuntimeValue::Bool(*b)),
        Value::Number(_) => Ok(RuntimeValue::Scalar(decode_f64(value)?)),
        Value::String(s) => Ok(RuntimeValue::Text(s.clone())),
        Value::Object(map) if map.contains_key("_type") => {
            match serde_json::from_value::<SerializedVariable>(value.clone()) {
                Ok(SerializedVariable::Full(payload)) => decode_full(&payload),
                Ok(other) => Err(malformed(&format!(
                    "{} payloads cannot be restored",
                    other.tier()
                ))),
                Err(e) => Err(malformed(&e.to_string())),
            }
        }
        Value::Object(_) => Err(malformed("only full payloads are accepted as objects")),
        Value::Array(items) => array_from_json(items),
    }
}

fn array_from_json(items: &[Value]) -> Result<RuntimeValue, SerializationFault> {
    if items.is_empty() {
        return Ok(RuntimeValue::Numeric(NumericArray::from_f64(
            Shape::matrix(0, 0),
            Vec::new(),
        )?));
    }
    if items.iter().all(Value::is_number) {
        let data = items.iter().map(decode_f64).collect::<Result<Vec<_>, _>>()?;
        return Ok(RuntimeValue::Numeric(NumericArray::row(data)));
    }
    if items.iter().all(Value::is_boolean) {
        let bits: Vec<bool> = items.iter().filter_map(Value::as_bool).collect();
        return Ok(RuntimeValue::Logical(LogicalArray::new(
            Shape::row(bits.len()),
            bits,
        )?));
    }
    if let Some(rows) = numeric_rows(items) {
        let (r, c) = (rows.len(), rows[0].len());
        let mut data = vec![0.0; r * c];
        for (i, row) in rows.iter().enumerate() {
            for (j, v) in row.iter().enumerate() {
                data[i + j * r] = *v;
            }
        }
        return Ok(RuntimeValue::Numeric(NumericArray::from_f64(
            Shape::matrix(r, c),
            data,
        )?));
    }
    let members = items
        .iter()
        .map(value_from_json)
        .collect::<Result<Vec<_>, _>>()?;
    Ok(RuntimeValue::Cell(CellArray::row(members)))
}

fn numeric_rows(items: &[Value]) -> Option<Vec<Vec<f64>>> {
    let rows = items
        .iter()
        .map(|item| {
            item.as_array()?
                .iter()
                .map(Value::as_f64)
                .collect::<Option<Vec<_>>>()
        })
        .collect::<Option<Vec<_>>>()?;
    let width = rows.first()?.len();
    (width > 0 && rows.iter().all(|row| row.len() == width)).then_some(rows)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn config() -> CompressionConfig {
        CompressionConfig::new(100, 10_000, 10).unwrap()
    }

    fn matrix(rows: usize, cols: usize, row_major: &[f64]) -> RuntimeValue {
        let mut data = vec![0.0; rows * cols];
        for r in 0..rows {
            for c in 0..cols {
                data[r + c * rows] = row_major[r * cols + c];
            }
        }
        RuntimeValue::Numeric(NumericArray::from_f64(Shape::matrix(rows, cols), data).unwrap())
    }

    fn full_payload(v: &SerializedVariable) -> &FullPayload {
        match v {
            SerializedVariable::Full(p) => p,
            other => panic!("expected full payload, got {other:?}"),
        }
    }

    #[test]
    fn scalar_full_payload() {
        let out = serialize_value(&RuntimeValue::Scalar(2.5), &config()).unwrap();
        let json = serde_json::to_value(&out).unwrap();
        assert_eq!(
            json,
            json!({"_type": "full", "shape": [1, 1], "dtype": "double", "data": 2.5})
        );
    }

    #[test]
    fn matrix_is_row_major_nested() {
        let values: Vec<f64> = (1..=6).map(f64::from).collect();
        let out = serialize_value(&matrix(2, 3, &values), &config()).unwrap();
        let payload = full_payload(&out);
        assert_eq!(payload.shape, vec![2, 3]);
        assert_eq!(payload.data, json!([[1.0, 2.0, 3.0], [4.0, 5.0, 6.0]]));
    }

    #[test]
    fn three_d_nests_by_dimension() {
        let shape = Shape::new(vec![2, 2, 2]);
        let data: Vec<f64> = (0..8).map(f64::from).collect();
        let value = RuntimeValue::Numeric(NumericArray::from_f64(shape, data).unwrap());
        let out = serialize_value(&value, &config()).unwrap();
        // element (i, j, k) lives at i + 2j + 4k
        assert_eq!(
            full_payload(&out).data,
            json!([[[0.0, 4.0], [2.0, 6.0]], [[1.0, 5.0], [3.0, 7.0]]])
        );
    }

    #[test]
    fn non_finite_values_are_strings() {
        let value = RuntimeValue::Numeric(NumericArray::row(vec![
            1.0,
            f64::NAN,
            f64::INFINITY,
            f64::NEG_INFINITY,
        ]));
        let out = serialize_value(&value, &config()).unwrap();
        assert_eq!(full_payload(&out).data, json!([1.0, "NaN", "Inf", "-Inf"]));
    }

    #[test]
    fn summary_has_stats_and_preview() {
        let data: Vec<f64> = (0..500).map(f64::from).collect();
        let value = RuntimeValue::Numeric(NumericArray::row(data));
        let out = serialize_value(&value, &config()).unwrap();
        let SerializedVariable::Summary(payload) = out else {
            panic!("expected summary");
        };
        assert_eq!(payload.total_elements, 500);
        assert_eq!(payload.min, Some(StatNumber::Float(0.0)));
        assert_eq!(payload.max, Some(StatNumber::Float(499.0)));
        assert_eq!(payload.mean, Some(249.5));
        assert_eq!(payload.sample_data.len(), 10);
        assert_eq!(payload.sample_data[3], json!(3.0));
        assert_eq!(payload.memory_usage_bytes, 4000);
    }

    #[test]
    fn summary_preview_is_column_major() {
        let value = matrix(2, 2, &[1.0, 2.0, 3.0, 4.0]);
        let out = serialize(&value, Tier::Summary, &config()).unwrap();
        let SerializedVariable::Summary(payload) = out else {
            panic!("expected summary");
        };
        assert_eq!(
            payload.sample_data,
            vec![json!(1.0), json!(3.0), json!(2.0), json!(4.0)]
        );
        let full = serialize(&value, Tier::Full, &config()).unwrap();
        assert_eq!(full_payload(&full).data, json!([[1.0, 2.0], [3.0, 4.0]]));
    }

    #[test]
    fn summary_reports_excluded_non_finite() {
        let mut data = vec![1.0; 200];
        data[7] = f64::NAN;
        let out = serialize_value(&RuntimeValue::Numeric(NumericArray::row(data)), &config())
            .unwrap();
        let json = serde_json::to_value(&out).unwrap();
        assert_eq!(json["non_finite_elements"], json!(1));
        assert_eq!(json["mean"], json!(1.0));
    }

    #[test]
    fn metadata_has_short_preview_and_note() {
        let value = RuntimeValue::Numeric(NumericArray::row(vec![0.5; 20_000]));
        let out = serialize_value(&value, &config()).unwrap();
        let SerializedVariable::Metadata(payload) = out else {
            panic!("expected metadata");
        };
        assert_eq!(payload.sample_data.len(), 3);
        assert!(payload.note.contains("20000 elements"));
        assert!(payload.note.contains("omitted"));
    }

    #[test]
    fn forced_tier_still_keeps_logical_full() {
        let mask = LogicalArray::new(Shape::row(3), vec![true, false, true]).unwrap();
        let out = serialize(&RuntimeValue::Logical(mask), Tier::Metadata, &config()).unwrap();
        assert_eq!(full_payload(&out).data, json!([true, false, true]));
    }

    #[test]
    fn complex_elements_are_objects() {
        let z = ComplexArray::new(
            Shape::row(1),
            NumericClass::Double,
            vec![Complex::new(1.0, -2.0)],
        )
        .unwrap();
        let out = serialize_value(&RuntimeValue::Complex(z), &config()).unwrap();
        let payload = full_payload(&out);
        assert_eq!(payload.dtype, "complex double");
        assert_eq!(payload.data, json!([{"real": 1.0, "imag": -2.0}]));
    }

    #[test]
    fn opaque_with_repr_falls_back_to_text() {
        let value = RuntimeValue::Opaque(OpaqueValue {
            class_name: "function_handle".into(),
            repr: Some("@(x) x.^2".into()),
        });
        let out = serialize_value(&value, &config()).unwrap();
        assert_eq!(full_payload(&out).data, json!("@(x) x.^2"));
    }

    #[test]
    fn opaque_without_repr_faults() {
        let value = RuntimeValue::Opaque(OpaqueValue {
            class_name: "java.lang.Object".into(),
            repr: None,
        });
        let err = serialize_value(&value, &config()).unwrap_err();
        assert!(matches!(err, SerializationFault::Unsupported { .. }));
    }

    #[test]
    fn cell_members_carry_their_own_payloads() {
        let cell = CellArray::row(vec![
            RuntimeValue::Scalar(1.0),
            RuntimeValue::Text("label".into()),
        ]);
        let out = serialize_value(&RuntimeValue::Cell(cell), &config()).unwrap();
        let payload = full_payload(&out);
        assert_eq!(payload.data[0]["_type"], json!("full"));
        assert_eq!(payload.data[1]["data"], json!("label"));
    }

    #[test]
    fn deep_cells_are_reduced_to_counts() {
        let innermost = RuntimeValue::Cell(CellArray::row(vec![RuntimeValue::Scalar(9.0)]));
        let middle = RuntimeValue::Cell(CellArray::row(vec![innermost]));
        let outer = RuntimeValue::Cell(CellArray::row(vec![middle]));
        let out = serialize_value(&outer, &config()).unwrap();
        let middle_json = &full_payload(&out).data[0];
        assert_eq!(middle_json["_type"], json!("full"));
        let inner_json = &middle_json["data"][0];
        assert_eq!(inner_json["_type"], json!("metadata"));
        assert_eq!(inner_json["total_elements"], json!(1));
    }

    #[test]
    fn large_first_level_cell_is_reduced_to_count() {
        let wide = RuntimeValue::Cell(CellArray::row(vec![RuntimeValue::Scalar(0.0); 150]));
        let outer = RuntimeValue::Cell(CellArray::row(vec![wide]));
        let out = serialize_value(&outer, &config()).unwrap();
        assert_eq!(full_payload(&out).data[0]["_type"], json!("metadata"));
    }

    #[test]
    fn large_cell_summary_previews_members() {
        let big = RuntimeValue::Numeric(NumericArray::row(vec![2.0; 500]));
        let cell = CellArray::row(vec![RuntimeValue::Scalar(4.0), big]);
        let out = serialize_value(&RuntimeValue::Cell(cell), &config()).unwrap();
        let SerializedVariable::Summary(payload) = out else {
            panic!("expected summary");
        };
        assert_eq!(payload.total_elements, 501);
        assert_eq!(payload.sample_data, vec![json!(4.0), json!("[1x500 double]")]);
        assert_eq!(payload.max, Some(StatNumber::Float(4.0)));
    }

    #[test]
    fn full_payloads_round_trip() {
        let values = vec![
            RuntimeValue::Scalar(-0.25),
            RuntimeValue::Bool(true),
            RuntimeValue::Text("hello".into()),
            matrix(3, 3, &(1..=9).map(f64::from).collect::<Vec<_>>()),
            RuntimeValue::Numeric(
                NumericArray::new(
                    Shape::matrix(2, 2),
                    NumericClass::Uint8,
                    NumericData::U64(vec![1, 2, 3, 255]),
                )
                .unwrap(),
            ),
            RuntimeValue::Logical(
                LogicalArray::new(Shape::matrix(2, 2), vec![true, false, false, true]).unwrap(),
            ),
            RuntimeValue::Cell(CellArray::row(vec![
                RuntimeValue::Scalar(1.0),
                RuntimeValue::Text("a".into()),
            ])),
        ];
        for value in values {
            let first = serialize_value(&value, &config()).unwrap();
            let decoded = decode_full(full_payload(&first)).unwrap();
            assert_eq!(decoded, value);
            let second = serialize_value(&decoded, &config()).unwrap();
            assert_eq!(first, second);
        }
    }

    #[test]
    fn wire_payload_deserializes() {
        let value = RuntimeValue::Numeric(NumericArray::row(vec![1.5; 300]));
        let out = serialize_value(&value, &config()).unwrap();
        let text = serde_json::to_string(&out).unwrap();
        let back: SerializedVariable = serde_json::from_str(&text).unwrap();
        assert_eq!(back, out);
    }

    #[test]
    fn json_numbers_lists_and_matrices() {
        assert_eq!(value_from_json(&json!(4)).unwrap(), RuntimeValue::Scalar(4.0));
        assert_eq!(
            value_from_json(&json!([1, 2, 3])).unwrap(),
            RuntimeValue::Numeric(NumericArray::row(vec![1.0, 2.0, 3.0]))
        );
        let m = value_from_json(&json!([[1, 2, 3], [4, 5, 6]])).unwrap();
        assert_eq!(m, matrix(2, 3, &[1.0, 2.0, 3.0, 4.0, 5.0, 6.0]));
    }

    #[test]
    fn json_mixed_list_becomes_cell() {
        let v = value_from_json(&json!([1, "two", [3, 4]])).unwrap();
        let RuntimeValue::Cell(cell) = v else {
            panic!("expected cell");
        };
        assert_eq!(cell.items().len(), 3);
        assert_eq!(cell.items()[1], RuntimeValue::Text("two".into()));
    }

    #[test]
    fn json_full_payload_is_decoded() {
        let payload = json!({"_type": "full", "shape": [1, 2], "dtype": "int32", "data": [7, -1]});
        let v = value_from_json(&payload).unwrap();
        assert_eq!(v.dtype(), "int32");
        assert_eq!(v.element_count(), 2);
    }

    #[test]
    fn oversized_shapes_are_rejected_before_allocating() {
        let overflowing = json!({
            "_type": "full",
            "shape": [4294967296u64, 4294967296u64, 2],
            "dtype": "double",
            "data": [[[1.0]]],
        });
        assert!(value_from_json(&overflowing).is_err());

        let huge = json!({"_type": "full", "shape": [1000000, 1000000], "dtype": "double", "data": [[1.0, 2.0]]});
        let err = value_from_json(&huge).unwrap_err();
        assert!(err.to_string().contains("found 2"));

        let short_row = json!({"_type": "full", "shape": [1, 1000000000000u64], "dtype": "double", "data": [1.0]});
        assert!(value_from_json(&short_row).is_err());
    }

    #[test]
    fn json_rejects_null_and_summaries() {
        assert!(value_from_json(&json!(null)).is_err());
        let summary = serialize_value(
            &RuntimeValue::Numeric(NumericArray::row(vec![1.0; 500])),
            &config(),
        )
        .unwrap();
        let err = value_from_json(&serde_json::to_value(&summary).unwrap()).unwrap_err();
        assert!(err.to_string().contains("summary"));
    }
}

//! Single-pass summary statistics over finite elements.
//!
//! Min and max keep the native element type (integers stay exact). The mean
//! uses compensated summation. Non-finite elements are excluded and counted.
//! Complex data is summarized by magnitude.

use std::cmp::Ordering;

use serde::{Deserialize, Serialize};

use crate::value::{CellArray, ComplexArray, NumericArray, NumericData, RuntimeValue};

/// A statistic in the element's native numeric domain.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum StatNumber {
    Int(i64),
    UInt(u64),
    Float(f64),
}

impl StatNumber {
    pub fn as_f64(self) -> f64 {
        match self {
            StatNumber::Int(v) => v as f64,
            StatNumber::UInt(v) => v as f64,
            StatNumber::Float(v) => v,
        }
    }

    fn compare(self, other: StatNumber) -> Ordering {
        match (self, other) {
            (StatNumber::Int(a), StatNumber::Int(b)) => a.cmp(&b),
            (StatNumber::UInt(a), StatNumber::UInt(b)) => a.cmp(&b),
            (StatNumber::Int(a), StatNumber::UInt(b)) => {
                if a < 0 {
                    Ordering::Less
                } else {
                    (a as u64).cmp(&b)
                }
            }
            (StatNumber::UInt(a), StatNumber::Int(b)) => {
                if b < 0 {
                    Ordering::Greater
                } else {
                    a.cmp(&(b as u64))
                }
            }
            (a, b) => a.as_f64().total_cmp(&b.as_f64()),
        }
    }
}

/// Result of summarizing one value.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct SummaryStats {
    pub min: Option<StatNumber>,
    pub max: Option<StatNumber>,
    pub mean: Option<f64>,
    pub finite_count: usize,
    pub non_finite_count: usize,
}

#[derive(Debug, Default)]
struct Accumulator {
    min: Option<StatNumber>,
    max: Option<StatNumber>,
    sum: f64,
    compensation: f64,
    count: usize,
    non_finite: usize,
}

impl Accumulator {
    fn observe(&mut self, value: StatNumber) {
        if self.min.is_none_or(|m| value.compare(m) == Ordering::Less) {
            self.min = Some(value);
        }
        if self.max.is_none_or(|m| value.compare(m) == Ordering::Greater) {
            self.max = Some(value);
        }
        self.add(value.as_f64());
        self.count += 1;
    }

    fn add(&mut self, x: f64) {
        let t = self.sum + x;
        if self.sum.abs() >= x.abs() {
            self.compensation += (self.sum - t) + x;
        } else {
            self.compensation += (x - t) + self.sum;
        }
        self.sum = t;
    }

    fn push_f64(&mut self, value: f64) {
        if value.is_finite() {
            self.observe(StatNumber::Float(value));
        } else {
            self.non_finite += 1;
        }
    }

    fn push_array(&mut self, array: &NumericArray) {
        match array.data() {
            NumericData::F64(values) => values.iter().for_each(|v| self.push_f64(*v)),
            NumericData::F32(values) => values.iter().for_each(|v| self.push_f64(f64::from(*v))),
            NumericData::I64(values) => values
                .iter()
                .for_each(|v| self.observe(StatNumber::Int(*v))),
            NumericData::U64(values) => values
                .iter()
                .for_each(|v| self.observe(StatNumber::UInt(*v))),
        }
    }

    fn push_complex(&mut self, array: &ComplexArray) {
        for z in array.data() {
            if z.is_finite() {
                self.push_f64(z.norm());
            } else {
                self.non_finite += 1;
            }
        }
    }

    fn finish(self) -> SummaryStats {
        let mean = (self.count > 0).then(|| (self.sum + self.compensation) / self.count as f64);
        SummaryStats {
            min: self.min,
            max: self.max,
            mean,
            finite_count: self.count,
            non_finite_count: self.non_finite,
        }
    }
}

pub fn numeric_stats(array: &NumericArray) -> SummaryStats {
    let mut acc = Accumulator::default();
    acc.push_array(array);
    acc.finish()
}

pub fn complex_stats(array: &ComplexArray) -> SummaryStats {
    let mut acc = Accumulator::default();
    acc.push_complex(array);
    acc.finish()
}

/// Statistics over the numeric members of a cell, one level deep.
///
/// Text, logical, opaque and nested cell members do not contribute.
pub fn cell_stats(cell: &CellArray) -> SummaryStats {
    let mut acc = Accumulator::default();
    for item in cell.items() {
        match item {
            RuntimeValue::Scalar(v) => acc.push_f64(*v),
            RuntimeValue::Numeric(array) => acc.push_array(array),
            RuntimeValue::Complex(array) => acc.push_complex(array),
            _ => {}
        }
    }
    acc.finish()
}

/// Statistics for any value; kinds without numeric content yield empty stats.
pub fn value_stats(value: &RuntimeValue) -> SummaryStats {
    match value {
        RuntimeValue::Scalar(v) => {
            let mut acc = Accumulator::default();
            acc.push_f64(*v);
            acc.finish()
        }
        RuntimeValue::Numeric(array) => numeric_stats(array),
        RuntimeValue::Complex(array) => complex_stats(array),
        RuntimeValue::Cell(cell) => cell_stats(cell),
        RuntimeValue::Bool(_)
        | RuntimeValue::Logical(_)
        | RuntimeValue::Text(_)
        | RuntimeValue::Opaque(_) => SummaryStats::default(),
    }
}

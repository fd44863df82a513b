//! Variable classification into compression tiers.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::config::CompressionConfig;
use crate::value::{CellArray, RuntimeValue};

/// Compression level, ordered from least to most compressed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Tier {
    Full,
    Summary,
    Metadata,
}

impl fmt::Display for Tier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Tier::Full => "full",
            Tier::Summary => "summary",
            Tier::Metadata => "metadata",
        })
    }
}

/// Tier for a raw element count.
pub fn tier_for_count(count: usize, config: &CompressionConfig) -> Tier {
    if count <= config.small_threshold {
        Tier::Full
    } else if count <= config.medium_threshold {
        Tier::Summary
    } else {
        Tier::Metadata
    }
}

/// Element count a cell is classified by: its members' counts, one level deep.
///
/// Nested cells contribute their own number of cells, not their contents.
pub fn aggregate_count(cell: &CellArray) -> usize {
    cell.items().iter().map(RuntimeValue::element_count).sum()
}

/// Assign `value` to a tier.
///
/// Logical data is never summarized: a compressed mask loses the positions
/// that make it useful.
pub fn classify(value: &RuntimeValue, config: &CompressionConfig) -> Tier {
    match value {
        RuntimeValue::Scalar(_)
        | RuntimeValue::Bool(_)
        | RuntimeValue::Logical(_)
        | RuntimeValue::Opaque(_) => Tier::Full,
        RuntimeValue::Text(_) | RuntimeValue::Numeric(_) | RuntimeValue::Complex(_) => {
            tier_for_count(value.element_count(), config)
        }
        RuntimeValue::Cell(cell) => tier_for_count(aggregate_count(cell), config),
    }
}

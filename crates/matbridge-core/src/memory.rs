//! Workspace memory accounting and the pre-execution memory guard.

use serde::{Deserialize, Serialize};

use crate::config::BridgeConfig;
use crate::engine::{Engine, WorkspaceSource};
use crate::error::EngineError;
use crate::obs;

/// Fraction of the configured limit at which a workspace counts as near it.
pub const NEAR_LIMIT_FRACTION: f64 = 0.8;

const BYTES_PER_MB: f64 = 1024.0 * 1024.0;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VariableFootprint {
    pub name: String,
    pub bytes: u64,
}

impl VariableFootprint {
    pub fn megabytes(&self) -> f64 {
        self.bytes as f64 / BYTES_PER_MB
    }
}

/// Memory summary returned with every execution.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MemoryStatus {
    pub total_size_mb: f64,
    pub variable_count: usize,
    pub largest_variable: Option<String>,
    pub largest_variable_size_mb: f64,
    pub memory_limit_mb: Option<f64>,
    pub near_limit: bool,
}

/// Sizes of all variables. Variables whose size cannot be read are skipped.
pub fn footprints<W>(source: &W) -> Result<Vec<VariableFootprint>, EngineError>
where
    W: WorkspaceSource + ?Sized,
{
    let names = source.variable_names()?;
    Ok(names
        .into_iter()
        .filter_map(|name| {
            let bytes = source.variable_bytes(&name).ok()?;
            Some(VariableFootprint { name, bytes })
        })
        .collect())
}

pub fn memory_status(footprints: &[VariableFootprint], limit_mb: Option<f64>) -> MemoryStatus {
    let total_bytes: u64 = footprints.iter().map(|f| f.bytes).sum();
    let total_size_mb = total_bytes as f64 / BYTES_PER_MB;
    // first of equally large variables wins
    let largest = footprints
        .iter()
        .fold(None::<&VariableFootprint>, |best, f| match best {
            Some(b) if b.bytes >= f.bytes => Some(b),
            _ => Some(f),
        });
    MemoryStatus {
        total_size_mb,
        variable_count: footprints.len(),
        largest_variable: largest.map(|f| f.name.clone()),
        largest_variable_size_mb: largest.map(VariableFootprint::megabytes).unwrap_or(0.0),
        memory_limit_mb: limit_mb,
        near_limit: limit_mb.is_some_and(|limit| total_size_mb > limit * NEAR_LIMIT_FRACTION),
    }
}

/// Names the guard would clear: with a limit configured and exceeded, every
/// variable larger than `large_variable_mb`.
pub fn variables_to_clear(footprints: &[VariableFootprint], config: &BridgeConfig) -> Vec<String> {
    let Some(limit) = config.memory_limit_mb else {
        return Vec::new();
    };
    let total_mb = footprints.iter().map(|f| f.bytes).sum::<u64>() as f64 / BYTES_PER_MB;
    if total_mb <= limit {
        return Vec::new();
    }
    footprints
        .iter()
        .filter(|f| f.megabytes() > config.large_variable_mb)
        .map(|f| f.name.clone())
        .collect()
}

/// Clear large variables when the workspace is over its limit.
pub fn enforce_limit(
    engine: &mut dyn Engine,
    session_id: &str,
    config: &BridgeConfig,
) -> Result<Vec<String>, EngineError> {
    if config.memory_limit_mb.is_none() {
        return Ok(Vec::new());
    }
    let sizes = footprints(&*engine)?;
    let doomed = variables_to_clear(&sizes, config);
    for name in &doomed {
        engine.clear(name)?;
        if let Some(f) = sizes.iter().find(|f| &f.name == name) {
            obs::emit_variable_cleared(session_id, name, f.megabytes());
        }
    }
    Ok(doomed)
}

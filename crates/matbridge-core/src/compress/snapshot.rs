//! Whole-workspace snapshots with per-variable fault isolation.

use std::collections::BTreeMap;
use std::panic::{self, AssertUnwindSafe};

use serde::{Deserialize, Serialize};

use super::serialize::{serialize_value, SerializedVariable};
use crate::config::CompressionConfig;
use crate::engine::WorkspaceSource;
use crate::error::{EngineError, SerializationFault};
use crate::obs;
use crate::value::RuntimeValue;

/// Stand-in for a variable that could not be fetched or serialized.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "_type", rename = "error")]
pub struct ErrorMarker {
    pub name: String,
    pub message: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum SnapshotEntry {
    Variable(SerializedVariable),
    Error(ErrorMarker),
}

impl SnapshotEntry {
    pub fn is_error(&self) -> bool {
        matches!(self, SnapshotEntry::Error(_))
    }

    pub fn as_variable(&self) -> Option<&SerializedVariable> {
        match self {
            SnapshotEntry::Variable(v) => Some(v),
            SnapshotEntry::Error(_) => None,
        }
    }
}

/// Serialized workspace keyed by variable name.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct WorkspaceSnapshot(BTreeMap<String, SnapshotEntry>);

impl WorkspaceSnapshot {
    pub fn get(&self, name: &str) -> Option<&SnapshotEntry> {
        self.0.get(name)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.0.keys().map(String::as_str)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &SnapshotEntry)> {
        self.0.iter().map(|(k, v)| (k.as_str(), v))
    }

    pub fn error_count(&self) -> usize {
        self.0.values().filter(|entry| entry.is_error()).count()
    }
}

/// A plain in-memory workspace.
impl WorkspaceSource for BTreeMap<String, RuntimeValue> {
    fn variable_names(&self) -> Result<Vec<String>, EngineError> {
        Ok(self.keys().cloned().collect())
    }

    fn fetch(&self, name: &str) -> Result<RuntimeValue, EngineError> {
        self.get(name)
            .cloned()
            .ok_or_else(|| EngineError::NoSuchVariable(name.to_string()))
    }
}

/// Serialize every variable of `source`.
///
/// Fails only when the variable listing itself cannot be read; a variable
/// that cannot be fetched or serialized becomes an [`ErrorMarker`].
pub fn snapshot<W>(source: &W, config: &CompressionConfig) -> Result<WorkspaceSnapshot, EngineError>
where
    W: WorkspaceSource + ?Sized,
{
    let names = source.variable_names()?;
    let mut entries = BTreeMap::new();
    for name in names {
        let entry = snapshot_one(source, &name, config);
        entries.insert(name, entry);
    }
    Ok(WorkspaceSnapshot(entries))
}

fn snapshot_one<W>(source: &W, name: &str, config: &CompressionConfig) -> SnapshotEntry
where
    W: WorkspaceSource + ?Sized,
{
    let outcome = panic::catch_unwind(AssertUnwindSafe(|| {
        let value = source
            .fetch(name)
            .map_err(|e| SerializationFault::Fetch(e.to_string()))?;
        serialize_value(&value, config)
    }));
    let fault = match outcome {
        Ok(Ok(serialized)) => return SnapshotEntry::Variable(serialized),
        Ok(Err(fault)) => fault,
        Err(payload) => SerializationFault::Panicked(panic_message(payload.as_ref())),
    };
    obs::emit_variable_fault(name, &fault);
    SnapshotEntry::Error(ErrorMarker {
        name: name.to_string(),
        message: fault.to_string(),
    })
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

//! Workspace compression: classification, tiered serialization, snapshots.

pub mod serialize;
pub mod snapshot;
pub mod stats;
pub mod tier;

pub use serialize::{
    decode_full, serialize, serialize_value, value_from_json, FullPayload, MetadataPayload,
    SerializedVariable, SummaryPayload,
};
pub use snapshot::{snapshot, ErrorMarker, SnapshotEntry, WorkspaceSnapshot};
pub use stats::{StatNumber, SummaryStats};
pub use tier::{classify, Tier};

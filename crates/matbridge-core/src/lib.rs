//! matbridge core library
//!
//! Brokers access to a long-lived numeric-computation engine session:
//! section-addressable execution against a persistent workspace, and a
//! tiered compression engine that keeps workspace snapshots small enough
//! for a token-constrained client.

pub mod compress;
pub mod config;
pub mod controller;
pub mod engine;
pub mod error;
pub mod fakes;
pub mod figures;
pub mod memory;
pub mod metrics;
pub mod names;
pub mod obs;
pub mod sections;
pub mod session;
pub mod telemetry;
pub mod tools;
pub mod value;

pub use compress::{
    classify, decode_full, serialize, snapshot, ErrorMarker, SerializedVariable, SnapshotEntry,
    Tier, WorkspaceSnapshot,
};
pub use config::{BridgeConfig, CompressionConfig};
pub use controller::{
    ExecutionController, ExecutionError, ExecutionRequest, ExecutionResult, ScriptSource,
};
pub use engine::{
    Engine, EngineFactory, EngineFault, EvalOutcome, FigureFormat, FigureInfo, RenderedFigure,
    WorkspaceSource,
};
pub use error::{
    BridgeError, ConfigError, EngineError, Result, SerializationFault, ValidationError, ValueError,
};
pub use figures::{FigureFile, FigureSink, FsFigureSink};
pub use memory::MemoryStatus;
pub use sections::{build_index, extract_sections, script_digest, Section, SectionRange};
pub use session::{Session, SessionPool, SessionStatus};
pub use tools::{tool_specs, ToolRouter, ToolSpec};
pub use value::{
    CellArray, Complex, ComplexArray, LogicalArray, NumericArray, NumericClass, NumericData,
    OpaqueValue, RuntimeValue, Shape,
};

//! Error taxonomy for matbridge.
//!
//! Validation errors are rejected before any side effect, serialization
//! faults stay inside the snapshot as error markers, and only
//! [`BridgeError::SessionUnavailable`] asks the caller to replace a session.
//! Runtime faults raised by user code are not errors at this level: they are
//! reported inside an `ExecutionResult`.

/// Malformed requests, rejected before anything reaches the engine.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ValidationError {
    #[error("exactly one of `code` or `path` must be provided (is_file={is_file})")]
    SourceConflict { is_file: bool },

    #[error("script not found: {path}")]
    ScriptNotFound { path: String },

    #[error("could not read script {path}: {reason}")]
    Unreadable { path: String, reason: String },

    #[error("invalid section range {start}..={end}: script has {count} section(s)")]
    SectionRange {
        start: usize,
        end: usize,
        count: usize,
    },

    #[error("section execution requires a script file")]
    SectionsWithoutFile,

    #[error("script changed since it was indexed: expected digest {expected}, found {actual}")]
    StaleScript { expected: String, actual: String },

    #[error("invalid identifier: {name:?}")]
    InvalidIdentifier { name: String },

    #[error("invalid value for workspace variable {name:?}: {reason}")]
    InvalidVariable { name: String, reason: String },

    #[error("invalid parameters for tool {tool}: {reason}")]
    InvalidParams { tool: String, reason: String },

    #[error("unknown tool: {tool}")]
    UnknownTool { tool: String },
}

/// A runtime value that violates its own shape or class invariants.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ValueError {
    #[error("shape {shape} holds {expected} element(s) but {actual} were supplied")]
    ShapeMismatch {
        shape: String,
        expected: usize,
        actual: usize,
    },

    #[error("element storage does not match class {class}")]
    ClassMismatch { class: String },
}

/// A single variable that could not be represented.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SerializationFault {
    #[error("unsupported type {class} has no textual representation")]
    Unsupported { class: String },

    #[error("could not read variable: {0}")]
    Fetch(String),

    #[error("malformed payload: {0}")]
    Malformed(String),

    #[error("invalid value: {0}")]
    Value(#[from] ValueError),

    #[error("serializer panicked: {0}")]
    Panicked(String),
}

/// Errors raised by an engine implementation.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum EngineError {
    #[error("engine disconnected: {0}")]
    Disconnected(String),

    #[error("engine failed to start: {0}")]
    Launch(String),

    #[error("no such variable: {0}")]
    NoSuchVariable(String),

    #[error("cannot marshal {class}: {reason}")]
    Marshal { class: String, reason: String },

    #[error("no such figure: {0}")]
    NoSuchFigure(u32),

    #[error("engine error: {0}")]
    Other(String),
}

/// Invalid configuration, reported at startup.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("invalid compression config: {0}")]
    Compression(String),

    #[error("invalid bridge config: {0}")]
    Bridge(String),

    #[error("could not read config {path}: {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("could not parse config: {0}")]
    Parse(#[from] toml::de::Error),
}

/// Top-level error for bridge operations.
#[derive(Debug, thiserror::Error)]
pub enum BridgeError {
    #[error("validation error: {0}")]
    Validation(#[from] ValidationError),

    #[error("session unavailable: {reason}")]
    SessionUnavailable { reason: String },

    #[error("session not found: {0}")]
    SessionNotFound(uuid::Uuid),

    #[error("session pool exhausted: {max_sessions} session(s) open")]
    PoolExhausted { max_sessions: usize },

    #[error("engine error: {0}")]
    Engine(EngineError),

    #[error("config error: {0}")]
    Config(#[from] ConfigError),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Json(#[from] serde_json::Error),
}

impl From<EngineError> for BridgeError {
    fn from(err: EngineError) -> Self {
        match err {
            EngineError::Disconnected(reason) | EngineError::Launch(reason) => {
                BridgeError::SessionUnavailable { reason }
            }
            other => BridgeError::Engine(other),
        }
    }
}

impl BridgeError {
    /// Stable kind label used in tool responses.
    pub fn kind(&self) -> &'static str {
        match self {
            BridgeError::Validation(_) => "validation",
            BridgeError::SessionUnavailable { .. }
            | BridgeError::SessionNotFound(_)
            | BridgeError::PoolExhausted { .. } => "session_unavailable",
            BridgeError::Engine(_) => "engine",
            BridgeError::Config(_) => "config",
            BridgeError::Io(_) => "io",
            BridgeError::Json(_) => "serialization",
        }
    }
}

/// Result type for bridge operations.
pub type Result<T> = std::result::Result<T, BridgeError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn section_range_message_names_bounds() {
        let err = ValidationError::SectionRange {
            start: 2,
            end: 1,
            count: 3,
        };
        let msg = err.to_string();
        assert!(msg.contains("2..=1"));
        assert!(msg.contains("3 section"));
    }

    #[test]
    fn disconnect_maps_to_session_unavailable() {
        let err: BridgeError = EngineError::Disconnected("pipe closed".into()).into();
        assert_eq!(err.kind(), "session_unavailable");
        assert!(err.to_string().contains("pipe closed"));
    }

    #[test]
    fn other_engine_errors_stay_engine_errors() {
        let err: BridgeError = EngineError::NoSuchFigure(4).into();
        assert_eq!(err.kind(), "engine");
    }

    #[test]
    fn validation_kind() {
        let err: BridgeError = ValidationError::SectionsWithoutFile.into();
        assert_eq!(err.kind(), "validation");
    }
}

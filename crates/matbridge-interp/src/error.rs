//! Interpreter error types.

/// A fault raised while lexing, parsing or evaluating user code.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum InterpError {
    #[error("{message}")]
    Syntax { message: String, line: usize },

    #[error("{message}")]
    Runtime {
        message: String,
        identifier: Option<String>,
        line: Option<usize>,
    },

    #[error("Execution step limit of {limit} exceeded.")]
    StepLimit { limit: u64, line: Option<usize> },

    /// `exit` or `quit` was evaluated.
    #[error("engine exited")]
    Exit,
}

impl InterpError {
    pub fn syntax(message: impl Into<String>, line: usize) -> Self {
        InterpError::Syntax {
            message: message.into(),
            line,
        }
    }

    pub fn runtime(message: impl Into<String>) -> Self {
        InterpError::Runtime {
            message: message.into(),
            identifier: None,
            line: None,
        }
    }

    pub fn with_id(identifier: &str, message: impl Into<String>) -> Self {
        InterpError::Runtime {
            message: message.into(),
            identifier: Some(identifier.to_string()),
            line: None,
        }
    }

    pub fn undefined(name: &str) -> Self {
        Self::with_id(
            "MATLAB:UndefinedFunction",
            format!("Unrecognized function or variable '{name}'."),
        )
    }

    /// Attach a line number unless one is already recorded.
    pub fn at_line(self, at: usize) -> Self {
        match self {
            InterpError::Runtime {
                message,
                identifier,
                line: None,
            } => InterpError::Runtime {
                message,
                identifier,
                line: Some(at),
            },
            InterpError::StepLimit { limit, line: None } => InterpError::StepLimit {
                limit,
                line: Some(at),
            },
            other => other,
        }
    }

    pub fn line(&self) -> Option<usize> {
        match self {
            InterpError::Syntax { line, .. } => Some(*line),
            InterpError::Runtime { line, .. } | InterpError::StepLimit { line, .. } => *line,
            InterpError::Exit => None,
        }
    }

    pub fn identifier(&self) -> Option<&str> {
        match self {
            InterpError::Syntax { .. } => Some("MATLAB:parse"),
            InterpError::Runtime { identifier, .. } => identifier.as_deref(),
            InterpError::StepLimit { .. } => Some("matbridge:stepLimit"),
            InterpError::Exit => None,
        }
    }
}

pub type InterpResult<T> = Result<T, InterpError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn at_line_keeps_first_line() {
        let err = InterpError::runtime("boom").at_line(4).at_line(9);
        assert_eq!(err.line(), Some(4));
    }

    #[test]
    fn undefined_names_the_symbol() {
        let err = InterpError::undefined("foo");
        assert_eq!(err.identifier(), Some("MATLAB:UndefinedFunction"));
        assert!(err.to_string().contains("'foo'"));
    }
}

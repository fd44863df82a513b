//! Built-in interpreter for a MATLAB-like language.
//!
//! Implements enough of the language (matrices, cells, indexing with `end`,
//! control flow, anonymous functions, a library of builtins and simple line
//! plots) to run analysis scripts without an external engine. [`InterpEngine`]
//! plugs it into the `matbridge-core` session layer.

pub mod ast;
pub mod builtins;
pub mod engine;
pub mod error;
pub mod format;
pub mod index;
pub mod interp;
pub mod lexer;
pub mod ops;
pub mod parser;
pub mod plot;
pub mod token;
pub mod value;

pub use engine::{from_runtime, to_runtime, InterpEngine};
pub use error::{InterpError, InterpResult};
pub use interp::{Interpreter, DEFAULT_STEP_LIMIT};
pub use value::{Array, FunctionHandle, Value};

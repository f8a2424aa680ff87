//! Error type shared by the engine, contexts, the value bridge and receivers.
//!
//! Early termination is deliberately absent: a script that stops itself is a
//! [`Status`](crate::Status), not an error.

use thiserror::Error;

use crate::value::Kind;

/// Main error type for bridge operations.
#[derive(Error, Debug)]
pub enum Error {
    /// The interpreter could not allocate a state or apply its limits.
    #[error("allocation failure: {0}")]
    Allocation(String),

    /// The per-request session could not be acquired.
    #[error("request startup failed: {0}")]
    RequestStartup(String),

    /// An eval fragment did not compile.
    #[error("compile failure: {0}")]
    Compile(String),

    /// A script raised an error nobody caught.
    #[error("execution failure: {0}")]
    Execution(String),

    /// The host rejected construction of a receiver instance.
    #[error("failed to instantiate method receiver '{0}'")]
    ReceiverConstruction(String),

    /// A receiver instance was used before a successful construction.
    #[error("method receiver '{0}' is not initialized")]
    ReceiverNotInitialized(String),

    /// A receiver class with this name is already registered.
    #[error("method receiver '{0}' is already defined")]
    DuplicateReceiver(String),

    /// A receiver class name was empty.
    #[error("method receiver name must not be empty")]
    EmptyReceiverName,

    /// The interpreter datum is outside the eight representable kinds.
    #[error("unsupported value type '{0}'")]
    UnsupportedValueType(&'static str),

    /// An operation was applied to a value of the wrong kind.
    #[error("expected {expected} value, found {found}")]
    KindMismatch {
        /// Kind (or kind family) the operation needs.
        expected: &'static str,
        /// Kind actually held by the value.
        found: Kind,
    },

    /// A value created by one session was handed to another.
    #[error("value belongs to a different interpreter session")]
    ForeignValue,

    /// Conversion recursed past the nesting limit (usually a cyclic table).
    #[error("value nesting exceeds {0} levels")]
    NestingTooDeep(usize),

    /// Configuration file could not be read.
    #[error("config: {0}")]
    Io(#[from] std::io::Error),

    /// Any other interpreter error raised while the bridge worked on a value.
    #[error("interpreter error: {0}")]
    Lua(#[from] mlua::Error),
}

/// Result type alias for bridge operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Convert a bridge error into a script-visible error carrying its message.
pub(crate) fn script_error(err: Error) -> mlua::Error {
    mlua::Error::RuntimeError(err.to_string())
}

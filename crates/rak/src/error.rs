//! The closed error taxonomy shared by the lexer, compiler, and VM.
//!
//! Errors carry short human-readable messages with a `line:column` location
//! where one is available. The compiler surfaces at most one error per
//! invocation; the VM surfaces at most one error per dispatch turn, leaving
//! the fiber inspectable. There is no unwinding — everything propagates
//! explicitly through [`Result`].

use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Clone, PartialEq, Error)]
pub enum Error {
    // --- Lexical errors ---
    #[error("unexpected character '{ch}' at {ln}:{col}")]
    UnexpectedCharacter { ch: char, ln: u32, col: u32 },

    #[error("unexpected end of file at {ln}:{col}")]
    UnexpectedEof { ln: u32, col: u32 },

    // --- Syntactic errors ---
    #[error("unexpected token '{got}' at {ln}:{col}")]
    UnexpectedToken { got: String, ln: u32, col: u32 },

    #[error("expected {expected}, but got '{got}' at {ln}:{col}")]
    ExpectedToken {
        expected: &'static str,
        got: String,
        ln: u32,
        col: u32,
    },

    #[error("invalid number format")]
    FormatError,

    #[error("duplicate local variable '{name}' at {ln}:{col}")]
    DuplicateLocal { name: String, ln: u32, col: u32 },

    #[error("undefined local variable '{name}' at {ln}:{col}")]
    UndefinedLocal { name: String, ln: u32, col: u32 },

    #[error("too many local variables")]
    TooManyLocals,

    #[error("too many constants")]
    TooManyConstants,

    #[error("too many instructions")]
    TooManyInstructions,

    #[error("too many nested functions")]
    TooManyNestedFunctions,

    #[error("too many elements in array literal")]
    TooManyElements,

    #[error("too many fields in record literal")]
    TooManyFields,

    // --- Runtime errors (recoverable: the fiber stays inspectable) ---
    #[error("type error: {0}")]
    TypeError(String),

    #[error("{0} index out of range")]
    IndexOutOfRange(&'static str),

    #[error("wrong number of arguments: expected {expected}, got {got}")]
    ArityMismatch { expected: u8, got: u8 },

    #[error("division by zero")]
    DivisionByZero,

    // --- Fatal errors ---
    #[error("stack overflow")]
    StackOverflow,

    #[error("cannot resume a fiber that is {0}")]
    FiberState(&'static str),
}

impl Error {
    /// Whether the error leaves the fiber unusable.
    pub fn is_fatal(&self) -> bool {
        matches!(self, Error::StackOverflow)
    }
}

//! Decode diagnostics.
//!
//! Every decode failure is reported once and aborts the walk. A diagnostic
//! carries the error code, the byte offset of the failing opcode (`pc`), a
//! secondary offset for the production's token when one is relevant (`pt`,
//! equal to `pc` otherwise), and a formatted message. Diagnostics own their
//! bytes; they hold no host pointers.

use std::fmt;

use thiserror::Error;

/// Failure taxonomy of the decoder/verifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCode {
    UnknownOpcode,
    UnsupportedOpcode,
    /// The production ran off the end of the byte window.
    Truncated,
    TypeError,
    LocalIndexOutOfBounds,
    GlobalIndexOutOfBounds,
    FunctionIndexOutOfBounds,
    /// `break`/`continue` outside any block, or targeting a depth that is
    /// not on the control stack (or not a loop, for `continue`).
    BreakDepth,
    ArityMismatch,
    /// Memory opcode with no module environment attached.
    NoMemory,
    /// Builder contract violation; never produced for malformed input.
    InternalError,
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// A single decode failure.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{code} @+{pc} (pt +{pt}): {message}")]
pub struct DecodeError {
    pub code: ErrorCode,
    /// Byte offset of the failing opcode, relative to the body start.
    pub pc: usize,
    /// Byte offset of the offending token (index byte, arity byte, …).
    pub pt: usize,
    pub message: String,
}

impl DecodeError {
    pub fn new(code: ErrorCode, pc: usize, message: impl Into<String>) -> Self {
        let message = message.into();
        Self {
            code,
            pc,
            pt: pc,
            message,
        }
    }

    /// Attach a secondary token offset.
    pub fn with_pt(mut self, pt: usize) -> Self {
        self.pt = pt;
        self
    }
}

/// Result of decoding one function body.
pub type DecodeResult<T> = Result<T, DecodeError>;

use thiserror::Error;

macro_rules! malformed_error {
    // Single string version
    ($msg:expr) => {
        crate::Error::Malformed {
            message: $msg.to_string(),
            file: file!(),
            line: line!(),
        }
    };

    // Format string with arguments version
    ($fmt:expr, $($arg:tt)*) => {
        crate::Error::Malformed {
            message: format!($fmt, $($arg)*),
            file: file!(),
            line: line!(),
        }
    };
}

/// The generic Error type, which provides coverage for all errors this library can potentially
/// return.
///
/// Every failure aborts the rewrite of the current method only. Callers keep the method's
/// original, unmodified body in place; none of these conditions is retried automatically.
///
/// # Error Categories
///
/// ## Malformed input
/// - [`Error::Malformed`] - Corrupted or unsupported bytecode / metadata structure
/// - [`Error::OutOfBounds`] - Attempted to read beyond the provided buffer
/// - [`Error::Empty`] - Empty input provided
///
/// ## Shape and capacity limits
/// - [`Error::UnsupportedShape`] - Method exceeds a fixed safety ceiling
/// - [`Error::BufferTooSmall`] - Destination buffer cannot hold the produced output
///
/// ## Resolution
/// - [`Error::ResolutionFailed`] - A required type or member reference could not be found
///   in the module context
///
/// ## Internal invariants
/// - [`Error::LayoutDiverged`] - The branch-layout fixpoint exceeded its pass bound
#[derive(Error, Debug)]
pub enum Error {
    /// The method body is damaged and could not be parsed.
    ///
    /// Raised for unsupported opcode families, truncated operands, branch targets that
    /// do not land on an instruction boundary, and out-of-range exception-clause
    /// boundaries. The error carries the source location where the malformation was
    /// detected for debugging purposes.
    #[error("Malformed - {file}:{line}: {message}")]
    Malformed {
        /// The message to be printed for the Malformed error
        message: String,
        /// The source file in which this error occured
        file: &'static str,
        /// The source line in which this error occured
        line: u32,
    },

    /// An out of bound access was attempted while parsing the method body.
    ///
    /// This is a safety check to prevent buffer overruns when decoding malformed or
    /// truncated input.
    #[error("Out of Bound read would have occurred!")]
    OutOfBounds,

    /// Provided input was empty.
    #[error("Provided input was empty")]
    Empty,

    /// The method's shape exceeds a fixed safety ceiling.
    ///
    /// Raised when a signature is too large for the working buffers, or when a method
    /// declares more arguments or locals than the rewriter is willing to handle.
    #[error("Unsupported method shape: {0}")]
    UnsupportedShape(String),

    /// A required reference could not be resolved from the module context.
    ///
    /// Typically a generic type-specification with a matching variable number, or a
    /// primitive boxing reference, is missing from the precomputed module tokens.
    #[error("Failed to resolve required reference: {0}")]
    ResolutionFailed(String),

    /// The destination buffer is smaller than the produced output.
    ///
    /// Callers must size output buffers generously and treat this as fatal for the
    /// current method rather than truncating.
    #[error("Destination buffer too small: need {needed} bytes, have {available}")]
    BufferTooSmall {
        /// Bytes the operation would have written
        needed: usize,
        /// Bytes actually available in the destination
        available: usize,
    },

    /// The branch re-layout loop failed to reach a stable encoding.
    ///
    /// Widening only ever grows offsets, so the fixpoint is bounded by the number of
    /// branch instructions; exceeding that bound indicates a broken internal invariant,
    /// not bad input.
    #[error("Branch layout did not converge within {0} passes")]
    LayoutDiverged(usize),
}

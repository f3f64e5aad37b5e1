//! Custom error types for the dap2-reader crate.

use thiserror::Error;

/// The primary error type for all operations in this crate.
#[derive(Debug, Error)]
pub enum DapError {
    /// An error originating from I/O operations.
    #[error("I/O error: {0:?}")]
    Io(#[from] std::io::Error),

    /// The XDR stream is malformed: a read or seek landed outside the payload,
    /// or the payload is not shaped the way the type tree requires.
    #[error("malformed XDR stream: {0}")]
    MalformedStream(String),

    /// The DATADDS binary section ended before the data its DDS declares.
    ///
    /// Some servers append a textual error in place of the missing data; when
    /// one is found near the payload tail it is carried here for diagnostics.
    #[error("DATADDS is shorter than its DDS declares{}", .server_message.as_deref().map(|m| format!(" (server reports: {m})")).unwrap_or_default())]
    TruncatedData { server_message: Option<String> },

    /// An index or count falls outside a known bound.
    #[error("coordinate out of range for {context}: index {index}, bound {bound}")]
    InvalidCoords {
        context: &'static str,
        index: usize,
        bound: usize,
    },

    /// The element count carried in the stream disagrees with the declared
    /// dimension product, which signals client/server disagreement about shape.
    #[error("dimension mismatch for {name}: declared {declared}, stream carries {received}")]
    DimensionMismatch {
        name: String,
        declared: usize,
        received: usize,
    },

    /// A sequence record boundary held a byte other than the two sentinels.
    #[error("invalid sequence record marker: {0:#04x}")]
    InvalidRecordMarker(u8),

    /// The requested field or element was omitted by the server constraint.
    /// Recoverable: the compiler represents it as a hole rather than failing.
    #[error("no data: field or element omitted from the response")]
    NoData,

    /// API misuse: wrong cursor mode, type mismatch, or an argument that can
    /// never be satisfied.
    #[error("invalid argument: {0}")]
    InvalidArgument(&'static str),
}

/// A convenience `Result` type alias using the crate's `DapError` type.
pub type Result<T> = std::result::Result<T, DapError>;

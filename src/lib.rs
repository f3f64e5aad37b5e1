//! # dap2-reader
//!
//! Client-side core for the DAP2 (OPeNDAP) protocol: the type-tree model for
//! DDS/DAS/DATADDS responses, the XDR payload decoder, content cursors for
//! navigating a DATADDS without materializing it, and an optional one-pass
//! compiler that mirrors a payload into memory for random access.
//!
//! **Note:** fetching responses over HTTP and parsing the DDS/DAS text
//! grammars are out of scope; trees are assembled through [`TreeBuilder`]
//! and payloads attached as raw bytes.
pub mod dap;

// Re-export the main types for convenience
pub use dap::{
    AtomicType, Attribute, Content, ContentPool, DapError, Endianness, Mode, Node, NodeId,
    NodeKind, PoolHandle, PrimitiveData, ResponseKind, Result, Tree, TreeBuilder,
};

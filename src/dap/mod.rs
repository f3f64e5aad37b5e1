//! Core DAP2 client data-access module

pub mod error;
pub mod models;
mod content;
mod decoder;
mod memtree;
mod tree;
mod xdr;

pub use content::{Content, ContentPool, PoolHandle};
pub use error::{DapError, Result};
pub use memtree::COMPILE_CEILING;
pub use models::{
    AtomicType, Attribute, Mode, Node, NodeId, NodeKind, PrimitiveData, ResponseKind,
};
pub use tree::{Tree, TreeBuilder};
pub use xdr::{Endianness, BYTES_PER_XDR_UNIT, END_OF_SEQUENCE, START_OF_SEQUENCE};

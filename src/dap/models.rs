//! Data structures representing the DAP2 type-tree model.

use super::error::{DapError, Result};

/// Handle to a node inside a [`Tree`](super::tree::Tree) arena.
///
/// All cross references between nodes (container, dimensions, children) are
/// indices into the owning tree, never live references.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct NodeId(pub(crate) usize);

impl NodeId {
    pub(crate) fn index(self) -> usize {
        self.0
    }
}

/// The grammar class of a type-tree node.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeKind {
    Dataset,
    Structure,
    Sequence,
    Grid,
    Dimension,
    Attribute,
    AttributeSet,
    Primitive,
}

impl NodeKind {
    /// True for the container kinds whose wire form is the concatenation of
    /// their children (everything except Sequence and Primitive leaves).
    pub(crate) fn is_constructor(self) -> bool {
        matches!(
            self,
            NodeKind::Dataset | NodeKind::Structure | NodeKind::Grid
        )
    }
}

/// The DAP2 atomic types a Primitive node can carry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AtomicType {
    Byte,
    UByte,
    Char,
    Int16,
    UInt16,
    Int32,
    UInt32,
    Int64,
    UInt64,
    Float32,
    Float64,
    String,
    Url,
}

impl AtomicType {
    /// Number of 4-byte XDR units one non-packed value occupies on the wire.
    /// Strings are length-prefixed and have no fixed width.
    pub fn xdr_units(self) -> usize {
        match self {
            AtomicType::Int64 | AtomicType::UInt64 | AtomicType::Float64 => 2,
            AtomicType::String | AtomicType::Url => 0,
            _ => 1,
        }
    }

    /// Byte/UByte/Char arrays are packed four values per XDR unit.
    pub fn is_packable(self) -> bool {
        matches!(self, AtomicType::Byte | AtomicType::UByte | AtomicType::Char)
    }

    /// Non-string primitive arrays carry their leading element count twice;
    /// String/URL arrays carry it once.
    pub fn has_redundant_count(self) -> bool {
        !matches!(self, AtomicType::String | AtomicType::Url)
    }
}

/// Which response a tree was built from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResponseKind {
    Dds,
    Das,
    DataDds,
}

/// Navigation state of a content cursor (see the mode-transition table in
/// [`content`](super::content)).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    /// Freshly reset, not yet positioned.
    Null,
    /// At the i'th field of a constructor (or record body).
    Field,
    /// At the i'th element of a ranked array.
    Dim,
    /// At the i'th record of a sequence.
    Record,
    /// At a primitive leaf, ready for extraction.
    Data,
    /// Pooled and unused.
    Empty,
}

/// One attribute attached to a node (name, type, textual values).
#[derive(Debug, Clone)]
pub struct Attribute {
    pub name: String,
    pub etype: AtomicType,
    pub values: Vec<String>,
}

/// One node of a parsed DDS/DAS/DATADDS grammar tree.
///
/// Built by [`TreeBuilder`](super::tree::TreeBuilder) (the seam fed by the
/// external grammar parser) and finished by the tree's computation passes.
#[derive(Debug)]
pub struct Node {
    pub kind: NodeKind,
    /// Valid only for `Primitive` nodes (and `Attribute` nodes in DAS trees).
    pub etype: Option<AtomicType>,
    pub name: Option<String>,
    /// Dot-joined path from the nearest named ancestor below the dataset root.
    pub full_name: Option<String>,
    /// Enclosing node; `None` only for the tree root.
    pub container: Option<NodeId>,
    /// Ordered Dimension nodes; empty for scalars.
    pub dimensions: Vec<NodeId>,
    /// Ordered subnodes. For a Grid, child 0 is the array and 1..N the maps.
    pub children: Vec<NodeId>,
    pub attributes: Vec<Attribute>,
    /// Declared size; valid only for `Dimension` nodes.
    pub decl_size: usize,
    /// The array node that declared this dimension; valid only for `Dimension`.
    pub array_of: Option<NodeId>,
    /// Wire bytes of one non-array instance, 0 when non-uniform.
    pub instance_size: usize,
    /// Wire bytes of one fully-dimensioned instance (count headers included),
    /// 0 when non-uniform.
    pub array_size: usize,
}

impl Node {
    pub fn rank(&self) -> usize {
        self.dimensions.len()
    }

    pub fn is_scalar(&self) -> bool {
        self.dimensions.is_empty()
    }

    /// The atomic type of a Primitive node.
    pub(crate) fn atomic_type(&self) -> Result<AtomicType> {
        self.etype
            .ok_or(DapError::InvalidArgument("node has no atomic type"))
    }
}

/// Decoded primitive values, discriminated by atomic type.
///
/// Serves both as the payload of a compiled [`MemNode`](super::memtree::MemNode)
/// and as the return of leaf reads, so the streaming and compiled paths yield
/// bit-comparable results.
#[derive(Debug, Clone, PartialEq)]
pub enum PrimitiveData {
    /// Byte, UByte and Char values (raw octets).
    Bytes(Vec<u8>),
    Int16(Vec<i16>),
    UInt16(Vec<u16>),
    Int32(Vec<i32>),
    UInt32(Vec<u32>),
    Int64(Vec<i64>),
    UInt64(Vec<u64>),
    Float32(Vec<f32>),
    Float64(Vec<f64>),
    Strings(Vec<String>),
}

impl PrimitiveData {
    pub fn len(&self) -> usize {
        match self {
            PrimitiveData::Bytes(v) => v.len(),
            PrimitiveData::Int16(v) => v.len(),
            PrimitiveData::UInt16(v) => v.len(),
            PrimitiveData::Int32(v) => v.len(),
            PrimitiveData::UInt32(v) => v.len(),
            PrimitiveData::Int64(v) => v.len(),
            PrimitiveData::UInt64(v) => v.len(),
            PrimitiveData::Float32(v) => v.len(),
            PrimitiveData::Float64(v) => v.len(),
            PrimitiveData::Strings(v) => v.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Copy out `count` values starting at `start`.
    pub(crate) fn slice(&self, start: usize, count: usize) -> Result<PrimitiveData> {
        let end = start + count;
        if end > self.len() {
            return Err(DapError::InvalidCoords {
                context: "compiled value buffer",
                index: end,
                bound: self.len(),
            });
        }
        Ok(match self {
            PrimitiveData::Bytes(v) => PrimitiveData::Bytes(v[start..end].to_vec()),
            PrimitiveData::Int16(v) => PrimitiveData::Int16(v[start..end].to_vec()),
            PrimitiveData::UInt16(v) => PrimitiveData::UInt16(v[start..end].to_vec()),
            PrimitiveData::Int32(v) => PrimitiveData::Int32(v[start..end].to_vec()),
            PrimitiveData::UInt32(v) => PrimitiveData::UInt32(v[start..end].to_vec()),
            PrimitiveData::Int64(v) => PrimitiveData::Int64(v[start..end].to_vec()),
            PrimitiveData::UInt64(v) => PrimitiveData::UInt64(v[start..end].to_vec()),
            PrimitiveData::Float32(v) => PrimitiveData::Float32(v[start..end].to_vec()),
            PrimitiveData::Float64(v) => PrimitiveData::Float64(v[start..end].to_vec()),
            PrimitiveData::Strings(v) => PrimitiveData::Strings(v[start..end].to_vec()),
        })
    }
}

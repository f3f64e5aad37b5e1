//! The owned node arena for one fetched response, its computation passes, and
//! the builder fed by the external DDS/DAS grammar parser.

use std::path::Path;

use log::info;

use super::error::{DapError, Result};
use super::memtree::MemTree;
use super::models::{AtomicType, Attribute, Node, NodeId, NodeKind, ResponseKind};
use super::xdr::{padded, Endianness, XdrStream, BYTES_PER_XDR_UNIT};

/// One fetched DDS/DAS/DATADDS response: the owned node set plus, for a
/// DATADDS, the binary payload (live stream and, once compiled, its in-memory
/// mirror).
#[derive(Debug)]
pub struct Tree {
    pub(crate) kind: ResponseKind,
    pub(crate) text: Option<String>,
    pub(crate) nodes: Vec<Node>,
    pub(crate) root: NodeId,
    pub(crate) payload: Option<DataPayload>,
}

/// The binary side of a DATADDS tree.
#[derive(Debug)]
pub(crate) struct DataPayload {
    pub(crate) stream: XdrStream,
    pub(crate) endianness: Endianness,
    pub(crate) mem: Option<MemTree>,
}

impl Tree {
    pub fn kind(&self) -> ResponseKind {
        self.kind
    }

    /// The response text (for a DATADDS, the DDS preamble before `Data:`).
    pub fn text(&self) -> Option<&str> {
        self.text.as_deref()
    }

    pub fn root(&self) -> NodeId {
        self.root
    }

    pub fn node(&self, id: NodeId) -> &Node {
        &self.nodes[id.index()]
    }

    pub fn num_nodes(&self) -> usize {
        self.nodes.len()
    }

    /// Whether a compiled in-memory mirror is installed.
    pub fn is_compiled(&self) -> bool {
        self.payload.as_ref().is_some_and(|p| p.mem.is_some())
    }

    /// Total declared element count of a node's dimension list (1 for scalars).
    pub fn total_dim_size(&self, id: NodeId) -> usize {
        total_dim_size(&self.nodes, id)
    }

    /// Attach a DATADDS payload whose beginning-of-data offset is already
    /// known.
    pub fn attach_payload(&mut self, data: Vec<u8>, bod: usize) -> Result<()> {
        if self.kind != ResponseKind::DataDds {
            return Err(DapError::InvalidArgument(
                "payload attached to a non-DATADDS tree",
            ));
        }
        let stream = XdrStream::new(data, bod)?;
        info!(
            "DATADDS payload attached: {} bytes, BOD at {}",
            stream.len(),
            stream.bod()
        );
        self.payload = Some(DataPayload {
            stream,
            endianness: Endianness::detect(),
            mem: None,
        });
        Ok(())
    }

    /// Attach a raw DATADDS response, splitting it at the literal `Data:`
    /// marker into the DDS preamble text and the binary section.
    pub fn attach_response(&mut self, raw: Vec<u8>) -> Result<()> {
        let (text, stream) = XdrStream::from_response(raw)?;
        let bod = stream.bod();
        let data_len = stream.len();
        if self.kind != ResponseKind::DataDds {
            return Err(DapError::InvalidArgument(
                "payload attached to a non-DATADDS tree",
            ));
        }
        info!("DATADDS response split: {} bytes, BOD at {}", data_len, bod);
        self.text = Some(text);
        self.payload = Some(DataPayload {
            stream,
            endianness: Endianness::detect(),
            mem: None,
        });
        Ok(())
    }

    /// Convenience: read a stored DATADDS response from disk and attach it.
    pub fn attach_response_file(&mut self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();
        info!("Reading DATADDS response: {}", path.display());
        let raw = std::fs::read(path)?;
        self.attach_response(raw)
    }
}

/// Incremental construction seam for the external grammar parser.
///
/// The builder records nodes in parse order; [`TreeBuilder::finish`] runs the
/// bottom-up passes (dimension re-containering, full names, decode sizes) and
/// yields the immutable tree.
#[derive(Debug)]
pub struct TreeBuilder {
    kind: ResponseKind,
    text: Option<String>,
    nodes: Vec<Node>,
    root: Option<NodeId>,
}

impl TreeBuilder {
    pub fn new(kind: ResponseKind) -> Self {
        TreeBuilder {
            kind,
            text: None,
            nodes: Vec::new(),
            root: None,
        }
    }

    /// Record the raw response text (DDS/DAS source).
    pub fn text(&mut self, text: impl Into<String>) -> &mut Self {
        self.text = Some(text.into());
        self
    }

    fn push(&mut self, kind: NodeKind, name: Option<&str>, container: Option<NodeId>) -> NodeId {
        let id = NodeId(self.nodes.len());
        self.nodes.push(Node {
            kind,
            etype: None,
            name: name.map(str::to_owned),
            full_name: None,
            container,
            dimensions: Vec::new(),
            children: Vec::new(),
            attributes: Vec::new(),
            decl_size: 0,
            array_of: None,
            instance_size: 0,
            array_size: 0,
        });
        if let Some(parent) = container {
            self.nodes[parent.index()].children.push(id);
        }
        id
    }

    /// The tree root. Must be created exactly once, before any other node.
    pub fn dataset(&mut self, name: &str) -> NodeId {
        debug_assert!(self.root.is_none(), "dataset node created twice");
        let id = self.push(NodeKind::Dataset, Some(name), None);
        self.root = Some(id);
        id
    }

    pub fn structure(&mut self, parent: NodeId, name: &str) -> NodeId {
        self.push(NodeKind::Structure, Some(name), Some(parent))
    }

    pub fn sequence(&mut self, parent: NodeId, name: &str) -> NodeId {
        self.push(NodeKind::Sequence, Some(name), Some(parent))
    }

    /// Child 0 must be the grid array; subsequent children are the maps.
    pub fn grid(&mut self, parent: NodeId, name: &str) -> NodeId {
        self.push(NodeKind::Grid, Some(name), Some(parent))
    }

    pub fn primitive(&mut self, parent: NodeId, name: &str, etype: AtomicType) -> NodeId {
        let id = self.push(NodeKind::Primitive, Some(name), Some(parent));
        self.nodes[id.index()].etype = Some(etype);
        id
    }

    /// Declare a dimension on `array`. Dimension nodes live in the arena but
    /// are referenced from the array's dimension list, not its children.
    pub fn dimension(&mut self, array: NodeId, name: Option<&str>, size: usize) -> NodeId {
        let id = self.push(NodeKind::Dimension, name, None);
        self.nodes[id.index()].decl_size = size;
        self.nodes[id.index()].array_of = Some(array);
        self.nodes[array.index()].dimensions.push(id);
        id
    }

    /// A named attribute container in a DAS tree.
    pub fn attribute_set(&mut self, parent: NodeId, name: &str) -> NodeId {
        self.push(NodeKind::AttributeSet, Some(name), Some(parent))
    }

    /// A typed attribute leaf in a DAS tree.
    pub fn attribute_node(
        &mut self,
        parent: NodeId,
        name: &str,
        etype: AtomicType,
        values: Vec<String>,
    ) -> NodeId {
        let id = self.push(NodeKind::Attribute, Some(name), Some(parent));
        self.nodes[id.index()].etype = Some(etype);
        self.nodes[id.index()].attributes.push(Attribute {
            name: name.to_owned(),
            etype,
            values,
        });
        id
    }

    /// Attach a parsed attribute to a node.
    pub fn attribute(
        &mut self,
        node: NodeId,
        name: &str,
        etype: AtomicType,
        values: Vec<String>,
    ) -> &mut Self {
        self.nodes[node.index()].attributes.push(Attribute {
            name: name.to_owned(),
            etype,
            values,
        });
        self
    }

    /// Run the computation passes and produce the finished tree.
    pub fn finish(mut self) -> Result<Tree> {
        let root = self
            .root
            .ok_or(DapError::InvalidArgument("tree has no dataset root"))?;
        compute_semantics(&mut self.nodes);
        compute_full_names(&mut self.nodes, root);
        // DAS trees hold attribute grammar, not decodable shapes.
        if self.kind != ResponseKind::Das {
            compute_sizes(&mut self.nodes, root);
        }
        info!("type tree finished: {} nodes", self.nodes.len());
        Ok(Tree {
            kind: self.kind,
            text: self.text,
            nodes: self.nodes,
            root,
            payload: None,
        })
    }
}

/// Product of a node's declared dimension sizes; 1 for scalars.
pub(crate) fn total_dim_size(nodes: &[Node], id: NodeId) -> usize {
    nodes[id.index()]
        .dimensions
        .iter()
        .map(|d| nodes[d.index()].decl_size)
        .product()
}

/// Dimensions are declared once but referenced by their array node; give each
/// Dimension the container of the array that owns it.
fn compute_semantics(nodes: &mut [Node]) {
    let fixes: Vec<(usize, Option<NodeId>)> = nodes
        .iter()
        .enumerate()
        .filter(|(_, n)| n.kind == NodeKind::Dimension)
        .filter_map(|(i, n)| n.array_of.map(|a| (i, nodes[a.index()].container)))
        .collect();
    for (i, container) in fixes {
        nodes[i].container = container;
    }
}

/// Dot-joined name paths. The dataset root has no container and contributes
/// nothing, so a field `a` of structure `S` becomes `S.a`.
fn compute_full_names(nodes: &mut [Node], root: NodeId) {
    let mut stack = vec![root];
    while let Some(id) = stack.pop() {
        stack.extend(nodes[id.index()].children.iter().copied());
        if nodes[id.index()].name.is_none() {
            continue;
        }
        let mut parts: Vec<String> = Vec::new();
        let mut cur = Some(id);
        while let Some(c) = cur {
            let node = &nodes[c.index()];
            if node.container.is_some() {
                if let Some(name) = &node.name {
                    parts.push(name.clone());
                }
            }
            cur = node.container;
        }
        parts.reverse();
        nodes[id.index()].full_name = if parts.is_empty() {
            nodes[id.index()].name.clone()
        } else {
            Some(parts.join("."))
        };
    }
}

/// Bottom-up uniform-size computation: where a subtree's wire size is fixed,
/// record it so the decoder can bulk-skip instead of walking field by field.
///
/// Returns the fully-dimensioned (array-level) size so parents can sum it;
/// 0 means non-uniform, decode record by record.
fn compute_sizes(nodes: &mut [Node], id: NodeId) -> usize {
    let count = total_dim_size(nodes, id);
    let scalar = nodes[id.index()].is_scalar();
    let children = nodes[id.index()].children.clone();

    let mut subnode_sum = 0usize;
    let mut nonuniform = false;
    for child in children {
        let size = compute_sizes(nodes, child);
        if size == 0 {
            nonuniform = true;
        }
        subnode_sum += size;
    }
    if nonuniform {
        subnode_sum = 0;
    }

    let node = &nodes[id.index()];
    let (instance, array) = match node.kind {
        NodeKind::Primitive => match node.etype {
            None => unreachable!("primitive node without atomic type"),
            Some(AtomicType::String) | Some(AtomicType::Url) => (0, 0),
            Some(e) if e.is_packable() => {
                if scalar {
                    (BYTES_PER_XDR_UNIT, BYTES_PER_XDR_UNIT)
                } else {
                    // Packed four per unit, zero-padded, plus the doubled count.
                    (1, padded(count) + 2 * BYTES_PER_XDR_UNIT)
                }
            }
            Some(e) => {
                let instance = e.xdr_units() * BYTES_PER_XDR_UNIT;
                let array = count * instance
                    + if scalar { 0 } else { 2 * BYTES_PER_XDR_UNIT };
                (instance, array)
            }
        },
        // Record count unknown until decode; instances may still be uniform.
        NodeKind::Sequence => (subnode_sum, 0),
        NodeKind::Dataset | NodeKind::Structure | NodeKind::Grid => {
            let array = if subnode_sum == 0 {
                0
            } else {
                count * subnode_sum + if scalar { 0 } else { BYTES_PER_XDR_UNIT }
            };
            (subnode_sum, array)
        }
        kind => unreachable!("size computation reached {:?} node", kind),
    };

    let node = &mut nodes[id.index()];
    node.instance_size = instance;
    node.array_size = array;
    array
}

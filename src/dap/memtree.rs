//! The compiled in-memory mirror of a DATADDS payload.
//!
//! Compilation trades one linear scan of the whole XDR section for O(1) random
//! access afterward. The mirror must answer every navigation and leaf read
//! with exactly the values the streaming path yields.

use log::{error, info};

use super::decoder;
use super::error::{DapError, Result};
use super::models::{AtomicType, Mode, Node, NodeId, NodeKind, PrimitiveData};
use super::tree::{total_dim_size, Tree};
use super::xdr::{padded, Endianness, XdrStream, END_OF_SEQUENCE, START_OF_SEQUENCE};

/// Payloads larger than this (past BOD) stay in streaming mode; the compile
/// request is skipped silently rather than failed.
pub const COMPILE_CEILING: usize = 64 * 1024 * 1024;

/// Handle to a node inside a [`MemTree`] arena.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MemId(usize);

/// The compiled mirror: one arena of mirror nodes per tree.
#[derive(Debug)]
pub struct MemTree {
    nodes: Vec<MemNode>,
    root: MemId,
}

/// The mirror of one type-tree node instance.
#[derive(Debug)]
pub struct MemNode {
    pub(crate) kind: NodeKind,
    pub(crate) etype: Option<AtomicType>,
    /// The cursor mode a content positioned on this node carries; must agree
    /// with what the mode-transition table computes on the streaming path.
    pub(crate) mode: Mode,
    pub(crate) data: MemData,
}

/// A mirror node's payload, discriminated by `(kind, etype, mode)`.
#[derive(Debug)]
pub(crate) enum MemData {
    /// Decoded primitive run (or single scalar value).
    Values(PrimitiveData),
    /// Owned child mirrors; `None` marks a constraint-omitted hole.
    Slots(Vec<Option<MemId>>),
}

impl MemNode {
    pub(crate) fn count(&self) -> usize {
        match &self.data {
            MemData::Values(v) => v.len(),
            MemData::Slots(s) => s.len(),
        }
    }
}

impl MemTree {
    pub(crate) fn root(&self) -> MemId {
        self.root
    }

    pub(crate) fn node(&self, id: MemId) -> &MemNode {
        &self.nodes[id.0]
    }

    /// Indexed child lookup; a null slot is a constraint-omitted hole.
    pub(crate) fn slot(&self, id: MemId, index: usize) -> Result<MemId> {
        match &self.node(id).data {
            MemData::Slots(slots) => slots
                .get(index)
                .copied()
                .flatten()
                .ok_or(DapError::NoData),
            MemData::Values(_) => Err(DapError::InvalidArgument(
                "compiled node holds values, not children",
            )),
        }
    }

    /// Bulk copy from a compiled primitive buffer.
    pub(crate) fn read_values(
        &self,
        id: MemId,
        etype: AtomicType,
        start: usize,
        count: usize,
    ) -> Result<PrimitiveData> {
        let md = self.node(id);
        if md.kind != NodeKind::Primitive {
            return Err(DapError::InvalidArgument(
                "compiled node holds children, not values",
            ));
        }
        if md.etype != Some(etype) {
            return Err(DapError::InvalidArgument(
                "compiled node type disagrees with template",
            ));
        }
        match &md.data {
            MemData::Values(values) => values.slice(start, count),
            MemData::Slots(_) => Err(DapError::InvalidArgument(
                "compiled node holds children, not values",
            )),
        }
    }
}

impl Tree {
    /// One-shot compile of the whole payload into an in-memory mirror.
    ///
    /// Skipped silently when the payload exceeds [`COMPILE_CEILING`] or a
    /// mirror is already installed; streaming access keeps working either way.
    /// On a decode failure nothing is installed and the partial mirror is
    /// dropped whole.
    pub fn compile(&mut self) -> Result<()> {
        let Tree {
            ref nodes,
            root,
            ref mut payload,
            ..
        } = *self;
        let payload = payload
            .as_mut()
            .ok_or_else(|| DapError::MalformedStream("tree has no payload".to_string()))?;
        if payload.mem.is_some() {
            return Ok(());
        }
        let data_len = payload.stream.len() - payload.stream.bod();
        if data_len > COMPILE_CEILING {
            info!(
                "payload of {data_len} bytes exceeds compile ceiling ({COMPILE_CEILING}); \
                 staying in streaming mode"
            );
            return Ok(());
        }
        let en = payload.endianness;
        let bod = payload.stream.bod();
        let mem = payload.stream.scoped(bod, |xdrs| {
            let mut compiler = Compiler {
                nodes,
                xdrs,
                en,
                arena: Vec::new(),
            };
            let root_mem = compiler.compile_node(root)?;
            Ok(MemTree {
                nodes: compiler.arena,
                root: root_mem,
            })
        })?;
        info!("DATADDS compiled: {} mirror nodes", mem.nodes.len());
        payload.mem = Some(mem);
        Ok(())
    }
}

struct Compiler<'a, 'x> {
    nodes: &'a [Node],
    xdrs: &'x mut XdrStream,
    en: Endianness,
    arena: Vec<MemNode>,
}

impl Compiler<'_, '_> {
    fn alloc(&mut self, node: MemNode) -> MemId {
        let id = MemId(self.arena.len());
        self.arena.push(node);
        id
    }

    /// A constraint-omitted field or element becomes a hole, not a failure.
    fn hole(
        &mut self,
        f: impl FnOnce(&mut Self) -> Result<MemId>,
    ) -> Result<Option<MemId>> {
        match f(self) {
            Ok(id) => Ok(Some(id)),
            Err(DapError::NoData) => Ok(None),
            Err(e) => Err(e),
        }
    }

    fn compile_node(&mut self, id: NodeId) -> Result<MemId> {
        let node = &self.nodes[id.index()];
        match node.kind {
            NodeKind::Dataset | NodeKind::Structure | NodeKind::Grid => {
                if node.is_scalar() {
                    self.compile_fields(id)
                } else {
                    let received = self.read_validated_count(id)?;
                    let mut slots = Vec::with_capacity(received);
                    for _ in 0..received {
                        let slot = self.hole(|c| c.compile_fields(id))?;
                        slots.push(slot);
                    }
                    Ok(self.alloc(MemNode {
                        kind: node.kind,
                        etype: None,
                        mode: Mode::Dim,
                        data: MemData::Slots(slots),
                    }))
                }
            }
            NodeKind::Sequence => {
                let mut slots = Vec::new();
                loop {
                    match self.xdrs.read_tag()? {
                        START_OF_SEQUENCE => {
                            let slot = self.hole(|c| c.compile_fields(id))?;
                            slots.push(slot);
                        }
                        END_OF_SEQUENCE => break,
                        tag => {
                            error!("missing or invalid begin/end record marker: {tag:#04x}");
                            return Err(DapError::InvalidRecordMarker(tag));
                        }
                    }
                }
                Ok(self.alloc(MemNode {
                    kind: NodeKind::Sequence,
                    etype: None,
                    mode: Mode::Record,
                    data: MemData::Slots(slots),
                }))
            }
            NodeKind::Primitive => self.compile_primitive(id),
            kind => unreachable!("compile dispatched on {:?} node", kind),
        }
    }

    /// One instance body: a slot per child, holes where the constraint
    /// removed a field.
    fn compile_fields(&mut self, id: NodeId) -> Result<MemId> {
        let node = &self.nodes[id.index()];
        let kind = node.kind;
        let children = node.children.clone();
        let mut slots = Vec::with_capacity(children.len());
        for child in children {
            let slot = self.hole(|c| c.compile_node(child))?;
            slots.push(slot);
        }
        Ok(self.alloc(MemNode {
            kind,
            etype: None,
            mode: Mode::Field,
            data: MemData::Slots(slots),
        }))
    }

    fn compile_primitive(&mut self, id: NodeId) -> Result<MemId> {
        let node = &self.nodes[id.index()];
        let etype = node.atomic_type()?;
        let (mode, values) = if node.is_scalar() {
            let values = decoder::read_values(self.xdrs, self.en, etype, false, 0, 1)?;
            (Mode::Data, values)
        } else {
            let received = self.read_validated_count(id)?;
            if etype.has_redundant_count() {
                let _ = self.xdrs.read_count()?;
            }
            let values = if etype.is_packable() {
                let raw = self.xdrs.read_bytes(padded(received))?;
                PrimitiveData::Bytes(raw[..received].to_vec())
            } else {
                decoder::read_values(self.xdrs, self.en, etype, false, 0, received)?
            };
            (Mode::Dim, values)
        };
        Ok(self.alloc(MemNode {
            kind: NodeKind::Primitive,
            etype: Some(etype),
            mode,
            data: MemData::Values(values),
        }))
    }

    /// A leading count that disagrees with the declared dimension product
    /// signals client/server disagreement about shape and is fatal.
    fn read_validated_count(&mut self, id: NodeId) -> Result<usize> {
        let declared = total_dim_size(self.nodes, id);
        let received = self.xdrs.read_count()?;
        if received != declared {
            let node = &self.nodes[id.index()];
            return Err(DapError::DimensionMismatch {
                name: node
                    .full_name
                    .clone()
                    .or_else(|| node.name.clone())
                    .unwrap_or_else(|| "<anonymous>".to_string()),
                declared,
                received,
            });
        }
        Ok(received)
    }
}

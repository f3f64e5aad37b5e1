//! Content cursors: the navigation state machine over a DATADDS payload.
//!
//! A cursor walks the type tree in lock-step with either the live XDR stream
//! or the compiled mirror. Navigation is always `(parent cursor, index) ->
//! child cursor`; every live-path operation runs inside a scoped position
//! guard, so the shared stream offset a parent checkpointed is identical
//! before and after, on success and on error alike. That makes sibling
//! navigation commutative and repeatable regardless of order.
//!
//! Mode transitions (`next(currentMode, child)`):
//!
//! | current  | ranked | scalar Primitive | Sequence | else  |
//! |----------|--------|------------------|----------|-------|
//! | Dim      | n/a    | Data             | Record   | Field |
//! | Record   | Dim    | Data             | Field    | Field |
//! | Null/Field | Dim  | Data             | Record   | Field |
//! | Data     | Data (terminal)                              |
//!
//! `maxIndex` mirrors the same table with counts: ranked arrays use the
//! declared dimension product, sequences use 0 (unknown until scanned),
//! scalar primitives 1, containers their child count.

use log::error;

use super::decoder;
use super::error::{DapError, Result};
use super::models::{Mode, Node, NodeId, NodeKind, PrimitiveData, ResponseKind};
use super::tree::{total_dim_size, Tree};
use super::xdr::{END_OF_SEQUENCE, START_OF_SEQUENCE};
use super::memtree::MemId;

/// Transient navigation state over one tree's payload. Never outlives its
/// tree; reusable after a reset (see [`ContentPool`]).
#[derive(Debug, Clone)]
pub struct Content {
    mode: Mode,
    node: Option<NodeId>,
    /// Position among siblings; for packed or compiled element cursors this
    /// is the element offset inside the parent's primitive run.
    index: usize,
    /// Bound among siblings; 0 means unknown (sequence records).
    max_index: usize,
    packed: bool,
    /// Live-path checkpoint: stream offset where this content begins.
    checkpoint: Option<usize>,
    /// Compiled-path position.
    mem: Option<MemId>,
}

impl Content {
    fn unused() -> Self {
        Content {
            mode: Mode::Empty,
            node: None,
            index: 0,
            max_index: 0,
            packed: false,
            checkpoint: None,
            mem: None,
        }
    }

    /// Return to the freshly-reset state.
    pub fn reset(&mut self) {
        *self = Content::unused();
        self.mode = Mode::Null;
    }

    pub fn mode(&self) -> Mode {
        self.mode
    }

    /// The template node this cursor currently represents.
    pub fn node(&self) -> Option<NodeId> {
        self.node
    }

    pub fn index(&self) -> usize {
        self.index
    }

    /// 0 means the bound is unknown until the payload is scanned.
    pub fn max_index(&self) -> usize {
        self.max_index
    }

    pub fn is_packed(&self) -> bool {
        self.packed
    }

    fn require_node(&self) -> Result<NodeId> {
        self.node
            .ok_or(DapError::InvalidArgument("cursor is not positioned"))
    }

    fn require_checkpoint(&self) -> Result<usize> {
        self.checkpoint
            .ok_or(DapError::InvalidArgument("cursor has no stream checkpoint"))
    }
}

/// The mode a child cursor carries, given the parent's mode and the node it
/// lands on.
fn mode_transition(node: &Node, src: Mode) -> Mode {
    match src {
        Mode::Dim => match node.kind {
            NodeKind::Sequence => Mode::Record,
            NodeKind::Primitive => Mode::Data,
            _ => Mode::Field,
        },
        Mode::Record => {
            if node.rank() > 0 {
                Mode::Dim
            } else if node.kind == NodeKind::Primitive {
                Mode::Data
            } else {
                Mode::Field
            }
        }
        Mode::Data => Mode::Data,
        Mode::Null | Mode::Field => {
            if node.rank() > 0 {
                Mode::Dim
            } else if node.kind == NodeKind::Primitive {
                Mode::Data
            } else if node.kind == NodeKind::Sequence {
                Mode::Record
            } else {
                Mode::Field
            }
        }
        Mode::Empty => unreachable!("no mode transition from a pooled cursor"),
    }
}

/// Sibling bound for the cursor `mode_transition` produces; same table,
/// counts instead of modes.
fn max_index_for(nodes: &[Node], id: NodeId, src: Mode) -> usize {
    let node = &nodes[id.index()];
    match src {
        Mode::Dim => match node.kind {
            NodeKind::Sequence => 0,
            NodeKind::Primitive => 1,
            _ => node.children.len(),
        },
        Mode::Record | Mode::Null | Mode::Field => {
            if node.rank() > 0 {
                total_dim_size(nodes, id)
            } else if node.kind == NodeKind::Primitive {
                1
            } else if node.kind == NodeKind::Sequence && src != Mode::Record {
                0
            } else {
                node.children.len()
            }
        }
        Mode::Data => 1,
        Mode::Empty => unreachable!("no mode transition from a pooled cursor"),
    }
}

impl Tree {
    /// A cursor positioned at the dataset root, in Field mode over its
    /// top-level variables.
    pub fn root_content(&self) -> Result<Content> {
        if self.kind != ResponseKind::DataDds {
            return Err(DapError::NoData);
        }
        let payload = self
            .payload
            .as_ref()
            .ok_or_else(|| DapError::MalformedStream("tree has no payload".to_string()))?;
        let root = self.root;
        let mut content = Content {
            mode: Mode::Field,
            node: Some(root),
            index: 0,
            max_index: self.nodes[root.index()].children.len(),
            packed: false,
            checkpoint: None,
            mem: None,
        };
        if let Some(mem) = &payload.mem {
            content.mem = Some(mem.root());
            content.mode = mem.node(mem.root()).mode;
        } else {
            content.checkpoint = Some(payload.stream.bod());
        }
        Ok(content)
    }

    /// Dispatch to array/record/field navigation on the parent's mode.
    pub fn child_content(&mut self, parent: &mut Content, index: usize) -> Result<Content> {
        match parent.mode {
            Mode::Dim => self.array_content(parent, index),
            Mode::Record => self.record_content(parent, index),
            Mode::Field => self.field_content(parent, index),
            _ => Err(DapError::InvalidArgument(
                "cursor mode has no child contents",
            )),
        }
    }

    /// Position on the `index`'th element of a ranked array.
    ///
    /// Element indexing is against the count the DATADDS carries, not the DDS
    /// declaration: asking for an element the stream does not carry is
    /// `NoData`, while an index outside the declared bound is out of range.
    pub fn array_content(&mut self, parent: &mut Content, index: usize) -> Result<Content> {
        let node_id = parent.require_node()?;
        if parent.mode != Mode::Dim {
            return Err(DapError::InvalidArgument("cursor is not in array mode"));
        }
        let Tree {
            ref nodes,
            ref mut payload,
            ..
        } = *self;
        let node = &nodes[node_id.index()];
        if node.rank() == 0 {
            return Err(DapError::InvalidArgument(
                "array navigation on a scalar node",
            ));
        }
        if parent.max_index > 0 && index >= parent.max_index {
            return Err(DapError::InvalidCoords {
                context: "array element",
                index,
                bound: parent.max_index,
            });
        }
        parent.index = index;

        let etype = node.etype;
        let packed = node.kind == NodeKind::Primitive
            && etype.is_some_and(|e| e.is_packable());

        let mut child = Content {
            mode: mode_transition(node, Mode::Dim),
            node: Some(node_id), // same node: elements, not nested fields
            index: 0,
            max_index: max_index_for(nodes, node_id, Mode::Dim),
            packed,
            checkpoint: None,
            mem: None,
        };

        let payload = payload
            .as_mut()
            .ok_or_else(|| DapError::MalformedStream("tree has no payload".to_string()))?;

        if let Some(mem_id) = parent.mem {
            let mem = payload
                .mem
                .as_ref()
                .ok_or(DapError::InvalidArgument("stale compiled cursor"))?;
            let md = mem.node(mem_id);
            debug_assert_eq!(md.mode, Mode::Dim);
            if node.kind == NodeKind::Primitive {
                // Leave the primitive run whole; leaf reads index into it.
                if index >= md.count() {
                    return Err(DapError::NoData);
                }
                child.mem = Some(mem_id);
                child.index = index;
            } else {
                if index >= md.count() {
                    return Err(DapError::NoData);
                }
                child.mem = Some(mem.slot(mem_id, index)?);
            }
            return Ok(child);
        }

        let checkpoint = parent.require_checkpoint()?;
        payload.stream.scoped(checkpoint, |xdrs| {
            let xdrcount = xdrs.read_count()?;
            if index >= xdrcount {
                return Err(DapError::NoData);
            }
            if let Some(e) = etype {
                if e.has_redundant_count() {
                    let _ = xdrs.read_count()?;
                }
            }
            if packed {
                // Positions inside a packed run are not addressable: record
                // the destination and re-read from the array start at leaf
                // extraction.
                child.index = index;
                child.checkpoint = Some(checkpoint);
            } else {
                for _ in 0..index {
                    decoder::skip_instance(nodes, node_id, xdrs)?;
                }
                child.checkpoint = Some(xdrs.pos());
            }
            Ok(())
        })?;
        Ok(child)
    }

    /// Position on the `index`'th record of a sequence, scanning the
    /// sentinel-delimited records from the parent's checkpoint.
    pub fn record_content(&mut self, parent: &mut Content, index: usize) -> Result<Content> {
        let node_id = parent.require_node()?;
        if parent.mode != Mode::Record {
            return Err(DapError::InvalidArgument("cursor is not in record mode"));
        }
        let Tree {
            ref nodes,
            ref mut payload,
            ..
        } = *self;
        let node = &nodes[node_id.index()];
        if node.kind != NodeKind::Sequence {
            return Err(DapError::InvalidArgument(
                "record navigation on a non-sequence node",
            ));
        }
        if parent.max_index > 0 && index >= parent.max_index {
            return Err(DapError::InvalidCoords {
                context: "sequence record",
                index,
                bound: parent.max_index,
            });
        }
        parent.index = index;

        let mut child = Content {
            mode: mode_transition(node, Mode::Record),
            node: Some(node_id),
            index: 0,
            max_index: max_index_for(nodes, node_id, Mode::Record),
            packed: false,
            checkpoint: None,
            mem: None,
        };

        let payload = payload
            .as_mut()
            .ok_or_else(|| DapError::MalformedStream("tree has no payload".to_string()))?;

        if let Some(mem_id) = parent.mem {
            let mem = payload
                .mem
                .as_ref()
                .ok_or(DapError::InvalidArgument("stale compiled cursor"))?;
            let md = mem.node(mem_id);
            debug_assert_eq!(md.mode, Mode::Record);
            if index >= md.count() {
                return Err(DapError::NoData);
            }
            child.mem = Some(mem.slot(mem_id, index)?);
            return Ok(child);
        }

        let checkpoint = parent.require_checkpoint()?;
        payload.stream.scoped(checkpoint, |xdrs| {
            for seen in 0..index {
                match xdrs.read_tag()? {
                    START_OF_SEQUENCE => decoder::skip_instance(nodes, node_id, xdrs)?,
                    END_OF_SEQUENCE => {
                        // Not enough records.
                        return Err(DapError::InvalidCoords {
                            context: "sequence record",
                            index,
                            bound: seen,
                        });
                    }
                    tag => {
                        error!("missing or invalid begin/end record marker: {tag:#04x}");
                        return Err(DapError::InvalidRecordMarker(tag));
                    }
                }
            }
            // Step past the chosen record's begin marker to its contents.
            match xdrs.read_tag()? {
                START_OF_SEQUENCE => {
                    child.checkpoint = Some(xdrs.pos());
                    Ok(())
                }
                END_OF_SEQUENCE => Err(DapError::InvalidCoords {
                    context: "sequence record",
                    index,
                    bound: index,
                }),
                tag => {
                    error!("missing or invalid begin/end record marker: {tag:#04x}");
                    Err(DapError::InvalidRecordMarker(tag))
                }
            }
        })?;
        Ok(child)
    }

    /// Position on the `index`'th field of a constructor (or record body).
    ///
    /// Constraints may have removed fields from the DATADDS, so a field can
    /// be present in the type tree yet have no representation in the data;
    /// the compiled path reports those as `NoData` holes.
    pub fn field_content(&mut self, parent: &mut Content, index: usize) -> Result<Content> {
        let node_id = parent.require_node()?;
        if parent.mode != Mode::Field {
            return Err(DapError::InvalidArgument("cursor is not in field mode"));
        }
        let Tree {
            ref nodes,
            ref mut payload,
            ..
        } = *self;
        let node = &nodes[node_id.index()];
        if !node.kind.is_constructor() && node.kind != NodeKind::Sequence {
            return Err(DapError::InvalidArgument(
                "field navigation on a leaf node",
            ));
        }
        if parent.max_index > 0 && index >= parent.max_index {
            return Err(DapError::InvalidCoords {
                context: "field",
                index,
                bound: parent.max_index,
            });
        }
        if index >= node.children.len() {
            return Err(DapError::InvalidCoords {
                context: "field",
                index,
                bound: node.children.len(),
            });
        }
        parent.index = index;

        let field_id = node.children[index];
        let mut child = Content {
            mode: mode_transition(&nodes[field_id.index()], Mode::Field),
            node: Some(field_id),
            index: 0,
            max_index: max_index_for(nodes, field_id, Mode::Field),
            packed: false,
            checkpoint: None,
            mem: None,
        };

        let payload = payload
            .as_mut()
            .ok_or_else(|| DapError::MalformedStream("tree has no payload".to_string()))?;

        if let Some(mem_id) = parent.mem {
            let mem = payload
                .mem
                .as_ref()
                .ok_or(DapError::InvalidArgument("stale compiled cursor"))?;
            let md = mem.node(mem_id);
            debug_assert_eq!(md.mode, Mode::Field);
            if index >= md.count() {
                return Err(DapError::NoData);
            }
            child.mem = Some(mem.slot(mem_id, index)?);
            return Ok(child);
        }

        let checkpoint = parent.require_checkpoint()?;
        payload.stream.scoped(checkpoint, |xdrs| {
            for sibling in &node.children[..index] {
                decoder::skip(nodes, *sibling, xdrs)?;
            }
            child.checkpoint = Some(xdrs.pos());
            Ok(())
        })?;
        Ok(child)
    }

    /// Extract `count` leaf values beginning at zero-based `start`.
    ///
    /// Valid on a Dim-mode cursor over a primitive array, a Data-mode element
    /// cursor, or a scalar's Data-mode cursor (then `start` must be 0 and
    /// `count` 1). Identical values come back whether the payload is
    /// streaming or compiled.
    pub fn read_leaf(
        &mut self,
        content: &Content,
        start: usize,
        count: usize,
    ) -> Result<PrimitiveData> {
        let node_id = content.require_node()?;
        let Tree {
            ref nodes,
            ref mut payload,
            ..
        } = *self;
        let node = &nodes[node_id.index()];
        if node.kind != NodeKind::Primitive {
            return Err(DapError::InvalidArgument(
                "leaf read on a non-primitive node",
            ));
        }
        let etype = node.atomic_type()?;
        let scalar = node.is_scalar();
        if scalar && (start != 0 || count != 1) {
            return Err(DapError::InvalidCoords {
                context: "scalar read",
                index: start + count,
                bound: 1,
            });
        }
        if content.max_index > 0 && start + count > content.max_index {
            return Err(DapError::InvalidCoords {
                context: "leaf read",
                index: start + count,
                bound: content.max_index,
            });
        }
        if !matches!(content.mode, Mode::Dim | Mode::Data) {
            return Err(DapError::InvalidArgument(
                "cursor does not address primitive data",
            ));
        }

        let payload = payload
            .as_mut()
            .ok_or_else(|| DapError::MalformedStream("tree has no payload".to_string()))?;

        if let Some(mem_id) = content.mem {
            let mem = payload
                .mem
                .as_ref()
                .ok_or(DapError::InvalidArgument("stale compiled cursor"))?;
            // Element cursors carry their offset into the compiled run.
            let offset = if content.mode == Mode::Data {
                content.index + start
            } else {
                start
            };
            return mem.read_values(mem_id, etype, offset, count);
        }

        let checkpoint = content.require_checkpoint()?;
        let en = payload.endianness;
        let result = payload.stream.scoped(checkpoint, |xdrs| {
            match content.mode {
                Mode::Data if content.packed => {
                    // Checkpoint sits at the array start: re-consume the
                    // counts and re-read the packed prefix every time.
                    let xdrcount = xdrs.read_count()?;
                    let offset = content.index + start;
                    if offset + count > xdrcount {
                        return Err(DapError::InvalidCoords {
                            context: "packed element",
                            index: offset + count,
                            bound: xdrcount,
                        });
                    }
                    let _ = xdrs.read_count()?; // redundant second count
                    decoder::read_values(xdrs, en, etype, true, offset, count)
                }
                Mode::Data => {
                    // Element or scalar cursor: checkpoint sits at the value.
                    decoder::read_values(xdrs, en, etype, false, 0, count)
                }
                Mode::Dim => {
                    let xdrcount = xdrs.read_count()?;
                    if start + count > xdrcount {
                        return Err(DapError::InvalidCoords {
                            context: "array read",
                            index: start + count,
                            bound: xdrcount,
                        });
                    }
                    if etype.has_redundant_count() {
                        let _ = xdrs.read_count()?;
                    }
                    let packed = etype.is_packable();
                    decoder::read_values(xdrs, en, etype, packed, start, count)
                }
                _ => unreachable!("leaf read mode already validated"),
            }
        });
        match result {
            Err(DapError::MalformedStream(_)) => {
                error!("DATADDS appears to be too short");
                Err(DapError::TruncatedData {
                    server_message: payload.stream.embedded_error_message(),
                })
            }
            other => other,
        }
    }

    /// How many children the cursor can navigate to.
    ///
    /// Field mode answers from the type tree, Dim mode from the count the
    /// payload carries, Record mode by a full sentinel scan (or the compiled
    /// count), Data mode is always 1.
    pub fn content_count(&mut self, content: &Content) -> Result<usize> {
        let node_id = content.require_node()?;
        let Tree {
            ref nodes,
            ref mut payload,
            ..
        } = *self;
        let node = &nodes[node_id.index()];
        match content.mode {
            Mode::Data => Ok(1),
            Mode::Field => Ok(node.children.len()),
            Mode::Dim => {
                let payload = payload
                    .as_mut()
                    .ok_or_else(|| DapError::MalformedStream("tree has no payload".to_string()))?;
                if let Some(mem_id) = content.mem {
                    let mem = payload
                        .mem
                        .as_ref()
                        .ok_or(DapError::InvalidArgument("stale compiled cursor"))?;
                    return Ok(mem.node(mem_id).count());
                }
                let checkpoint = content.require_checkpoint()?;
                payload.stream.scoped(checkpoint, |xdrs| xdrs.read_count())
            }
            Mode::Record => {
                if node.kind != NodeKind::Sequence {
                    return Err(DapError::InvalidArgument(
                        "record count on a non-sequence node",
                    ));
                }
                let payload = payload
                    .as_mut()
                    .ok_or_else(|| DapError::MalformedStream("tree has no payload".to_string()))?;
                if let Some(mem_id) = content.mem {
                    let mem = payload
                        .mem
                        .as_ref()
                        .ok_or(DapError::InvalidArgument("stale compiled cursor"))?;
                    return Ok(mem.node(mem_id).count());
                }
                let checkpoint = content.require_checkpoint()?;
                payload
                    .stream
                    .scoped(checkpoint, |xdrs| decoder::skip_records(nodes, node_id, xdrs))
            }
            _ => Err(DapError::InvalidArgument("cursor is not positioned")),
        }
    }
}

/// Handle into a [`ContentPool`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PoolHandle(usize);

/// Connection-owned recycling pool for cursors: a slab with a free-index
/// list. Purely an allocation-churn optimization; its only obligation is
/// resetting a slot before reuse.
#[derive(Debug, Default)]
pub struct ContentPool {
    slots: Vec<Content>,
    free: Vec<usize>,
}

impl ContentPool {
    pub fn new() -> Self {
        ContentPool::default()
    }

    /// A freshly-reset cursor slot.
    pub fn acquire(&mut self) -> PoolHandle {
        if let Some(i) = self.free.pop() {
            self.slots[i].reset();
            PoolHandle(i)
        } else {
            let mut slot = Content::unused();
            slot.reset();
            self.slots.push(slot);
            PoolHandle(self.slots.len() - 1)
        }
    }

    pub fn get(&self, handle: PoolHandle) -> &Content {
        &self.slots[handle.0]
    }

    pub fn get_mut(&mut self, handle: PoolHandle) -> &mut Content {
        &mut self.slots[handle.0]
    }

    /// Mark a slot unused and make it available again.
    pub fn release(&mut self, handle: PoolHandle) {
        self.slots[handle.0] = Content::unused();
        self.free.push(handle.0);
    }

    /// Slots currently handed out.
    pub fn in_use(&self) -> usize {
        self.slots.len() - self.free.len()
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }
}

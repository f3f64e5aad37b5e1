//! Skip and value-decode routines over the XDR payload.
//!
//! Both the streaming cursor and the materialization compiler dispatch through
//! these. Skips take the bulk fast path whenever the sizes pass proved a
//! subtree uniform, and walk the subtree shape otherwise.

use log::error;

use super::error::{DapError, Result};
use super::models::{AtomicType, Node, NodeId, NodeKind, PrimitiveData};
use super::xdr::{
    Endianness, XdrStream, BYTES_PER_XDR_UNIT, END_OF_SEQUENCE, START_OF_SEQUENCE,
};

/// Skip one fully-dimensioned instance of `id` (leading counts included).
pub(crate) fn skip(nodes: &[Node], id: NodeId, xdrs: &mut XdrStream) -> Result<()> {
    let node = &nodes[id.index()];
    if node.array_size > 0 {
        return xdrs.skip(node.array_size);
    }
    match node.kind {
        NodeKind::Dataset | NodeKind::Structure | NodeKind::Grid => {
            if node.is_scalar() {
                for child in &node.children {
                    skip(nodes, *child, xdrs)?;
                }
            } else {
                let n = xdrs.read_count()?;
                for _ in 0..n {
                    skip_instance(nodes, id, xdrs)?;
                }
            }
            Ok(())
        }
        NodeKind::Sequence => skip_records(nodes, id, xdrs).map(|_| ()),
        NodeKind::Primitive => {
            // Every fixed-width primitive is uniform and took the bulk path;
            // only length-prefixed strings reach here.
            debug_assert!(!node.atomic_type()?.has_redundant_count());
            let n = if node.is_scalar() {
                1
            } else {
                xdrs.read_count()?
            };
            for _ in 0..n {
                xdrs.skip_string()?;
            }
            Ok(())
        }
        kind => unreachable!("skip dispatched on {:?} node", kind),
    }
}

/// Skip exactly one non-array instance of `id`; any leading count has already
/// been consumed by the caller.
pub(crate) fn skip_instance(nodes: &[Node], id: NodeId, xdrs: &mut XdrStream) -> Result<()> {
    let node = &nodes[id.index()];
    if node.instance_size > 0 {
        return xdrs.skip(node.instance_size);
    }
    match node.kind {
        NodeKind::Dataset | NodeKind::Structure | NodeKind::Grid | NodeKind::Sequence => {
            // One instance (for a Sequence, one record body) is the
            // concatenation of its fields' full arrays.
            for child in &node.children {
                skip(nodes, *child, xdrs)?;
            }
            Ok(())
        }
        NodeKind::Primitive => xdrs.skip_string(),
        kind => unreachable!("skip_instance dispatched on {:?} node", kind),
    }
}

/// Walk a sequence's sentinel-delimited records from the current position,
/// skipping each, until the end marker. Returns the record count; the stream
/// is left just past the end marker.
pub(crate) fn skip_records(nodes: &[Node], id: NodeId, xdrs: &mut XdrStream) -> Result<usize> {
    let mut count = 0;
    loop {
        match xdrs.read_tag()? {
            START_OF_SEQUENCE => {
                skip_instance(nodes, id, xdrs)?;
                count += 1;
            }
            END_OF_SEQUENCE => return Ok(count),
            tag => {
                error!("missing or invalid begin/end record marker: {tag:#04x}");
                return Err(DapError::InvalidRecordMarker(tag));
            }
        }
    }
}

fn read_unit(xdrs: &mut XdrStream, en: Endianness) -> Result<u32> {
    Ok(en.unit(xdrs.read_raw_unit()?))
}

fn read_quad(xdrs: &mut XdrStream, en: Endianness) -> Result<u64> {
    let first = read_unit(xdrs, en)?;
    let second = read_unit(xdrs, en)?;
    Ok(en.quad(first, second))
}

/// Decode `count` values beginning at zero-based `start`.
///
/// The stream must sit at the first data byte of the run (leading counts
/// already consumed). Packed runs are read from that first byte on every call:
/// positions inside a packed run are not otherwise addressable, so the
/// `start + count` prefix is always re-read. For strings, the first `start`
/// values are decoded and discarded; strings are never randomly addressable
/// either. The caller is responsible for restoring the stream position.
pub(crate) fn read_values(
    xdrs: &mut XdrStream,
    en: Endianness,
    etype: AtomicType,
    packed: bool,
    start: usize,
    count: usize,
) -> Result<PrimitiveData> {
    match etype {
        AtomicType::Byte | AtomicType::UByte | AtomicType::Char if packed => {
            let prefix = xdrs.read_bytes(start + count)?;
            Ok(PrimitiveData::Bytes(prefix[start..].to_vec()))
        }
        AtomicType::Byte | AtomicType::UByte | AtomicType::Char => {
            // Unpacked (scalar) bytes ride in the low byte of a full unit.
            xdrs.skip(start * BYTES_PER_XDR_UNIT)?;
            let mut out = Vec::with_capacity(count);
            for _ in 0..count {
                out.push(read_unit(xdrs, en)? as u8);
            }
            Ok(PrimitiveData::Bytes(out))
        }
        AtomicType::String | AtomicType::Url => {
            for _ in 0..start {
                xdrs.skip_string()?;
            }
            let mut out = Vec::with_capacity(count);
            for _ in 0..count {
                out.push(xdrs.read_string()?);
            }
            Ok(PrimitiveData::Strings(out))
        }
        AtomicType::Int16 => {
            xdrs.skip(start * BYTES_PER_XDR_UNIT)?;
            let mut out = Vec::with_capacity(count);
            for _ in 0..count {
                out.push(read_unit(xdrs, en)? as u16 as i16);
            }
            Ok(PrimitiveData::Int16(out))
        }
        AtomicType::UInt16 => {
            xdrs.skip(start * BYTES_PER_XDR_UNIT)?;
            let mut out = Vec::with_capacity(count);
            for _ in 0..count {
                out.push(read_unit(xdrs, en)? as u16);
            }
            Ok(PrimitiveData::UInt16(out))
        }
        AtomicType::Int32 => {
            xdrs.skip(start * BYTES_PER_XDR_UNIT)?;
            let mut out = Vec::with_capacity(count);
            for _ in 0..count {
                out.push(read_unit(xdrs, en)? as i32);
            }
            Ok(PrimitiveData::Int32(out))
        }
        AtomicType::UInt32 => {
            xdrs.skip(start * BYTES_PER_XDR_UNIT)?;
            let mut out = Vec::with_capacity(count);
            for _ in 0..count {
                out.push(read_unit(xdrs, en)?);
            }
            Ok(PrimitiveData::UInt32(out))
        }
        AtomicType::Float32 => {
            xdrs.skip(start * BYTES_PER_XDR_UNIT)?;
            let mut out = Vec::with_capacity(count);
            for _ in 0..count {
                out.push(f32::from_bits(read_unit(xdrs, en)?));
            }
            Ok(PrimitiveData::Float32(out))
        }
        AtomicType::Int64 => {
            xdrs.skip(start * 2 * BYTES_PER_XDR_UNIT)?;
            let mut out = Vec::with_capacity(count);
            for _ in 0..count {
                out.push(read_quad(xdrs, en)? as i64);
            }
            Ok(PrimitiveData::Int64(out))
        }
        AtomicType::UInt64 => {
            xdrs.skip(start * 2 * BYTES_PER_XDR_UNIT)?;
            let mut out = Vec::with_capacity(count);
            for _ in 0..count {
                out.push(read_quad(xdrs, en)?);
            }
            Ok(PrimitiveData::UInt64(out))
        }
        AtomicType::Float64 => {
            xdrs.skip(start * 2 * BYTES_PER_XDR_UNIT)?;
            let mut out = Vec::with_capacity(count);
            for _ in 0..count {
                out.push(f64::from_bits(read_quad(xdrs, en)?));
            }
            Ok(PrimitiveData::Float64(out))
        }
    }
}

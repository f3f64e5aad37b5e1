//! Shared fixtures: an XDR payload writer and the small trees the
//! integration tests navigate.
#![allow(dead_code)]

use dap2_reader::dap::{END_OF_SEQUENCE, START_OF_SEQUENCE};
use dap2_reader::{AtomicType, ResponseKind, Tree, TreeBuilder};

pub fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

/// Builds big-endian XDR payload bytes the way a DAP2 server serializes them.
#[derive(Default)]
pub struct Xdr {
    buf: Vec<u8>,
}

impl Xdr {
    pub fn new() -> Self {
        Xdr::default()
    }

    pub fn unit(mut self, v: u32) -> Self {
        self.buf.extend_from_slice(&v.to_be_bytes());
        self
    }

    /// Single leading count (String/URL arrays).
    pub fn count(self, n: usize) -> Self {
        self.unit(n as u32)
    }

    /// Doubled leading count (all non-string primitive arrays).
    pub fn counts(self, n: usize) -> Self {
        self.count(n).count(n)
    }

    pub fn i32s(mut self, vals: &[i32]) -> Self {
        for &v in vals {
            self = self.unit(v as u32);
        }
        self
    }

    pub fn f32s(mut self, vals: &[f32]) -> Self {
        for &v in vals {
            self = self.unit(v.to_bits());
        }
        self
    }

    /// 64-bit values ride in two units, high word first.
    pub fn f64s(mut self, vals: &[f64]) -> Self {
        for &v in vals {
            let bits = v.to_bits();
            self = self.unit((bits >> 32) as u32).unit(bits as u32);
        }
        self
    }

    pub fn i64s(mut self, vals: &[i64]) -> Self {
        for &v in vals {
            let bits = v as u64;
            self = self.unit((bits >> 32) as u32).unit(bits as u32);
        }
        self
    }

    /// Raw octets, zero-padded to the enclosing unit boundary.
    pub fn packed_bytes(mut self, bytes: &[u8]) -> Self {
        self.buf.extend_from_slice(bytes);
        while self.buf.len() % 4 != 0 {
            self.buf.push(0);
        }
        self
    }

    /// One scalar byte in the low byte of a full unit.
    pub fn byte_unit(self, b: u8) -> Self {
        self.unit(b as u32)
    }

    /// One `(length, bytes, pad)` string value.
    pub fn string(mut self, s: &str) -> Self {
        self = self.count(s.len());
        self.packed_bytes(s.as_bytes())
    }

    /// Begin-record sentinel (tag byte in an opaque unit).
    pub fn start(self) -> Self {
        self.unit((START_OF_SEQUENCE as u32) << 24)
    }

    /// End-of-records sentinel.
    pub fn end(self) -> Self {
        self.unit((END_OF_SEQUENCE as u32) << 24)
    }

    pub fn raw(mut self, bytes: &[u8]) -> Self {
        self.buf.extend_from_slice(bytes);
        self
    }

    pub fn build(self) -> Vec<u8> {
        self.buf
    }
}

/// `Dataset { Structure S { Int32 a[3]; }; }` with the given payload attached.
pub fn struct_int32_tree(payload: Vec<u8>) -> Tree {
    let mut b = TreeBuilder::new(ResponseKind::DataDds);
    let ds = b.dataset("test");
    let s = b.structure(ds, "S");
    let a = b.primitive(s, "a", AtomicType::Int32);
    b.dimension(a, Some("d"), 3);
    let mut tree = b.finish().unwrap();
    tree.attach_payload(payload, 0).unwrap();
    tree
}

/// The scenario-A payload for [`struct_int32_tree`]: count 3 (doubled), then
/// 7, 11, 13.
pub fn struct_int32_payload() -> Vec<u8> {
    Xdr::new().counts(3).i32s(&[7, 11, 13]).build()
}

/// `Dataset { Byte a[5]; }` with the given payload attached.
pub fn packed_byte_tree(payload: Vec<u8>) -> Tree {
    let mut b = TreeBuilder::new(ResponseKind::DataDds);
    let ds = b.dataset("test");
    let a = b.primitive(ds, "a", AtomicType::Byte);
    b.dimension(a, None, 5);
    let mut tree = b.finish().unwrap();
    tree.attach_payload(payload, 0).unwrap();
    tree
}

pub fn packed_byte_payload() -> Vec<u8> {
    Xdr::new().counts(5).packed_bytes(&[10, 20, 30, 40, 50]).build()
}

/// `Dataset { Sequence q { Int32 i; String name; }; }` with two records.
pub fn sequence_tree(payload: Vec<u8>) -> Tree {
    let mut b = TreeBuilder::new(ResponseKind::DataDds);
    let ds = b.dataset("test");
    let q = b.sequence(ds, "q");
    b.primitive(q, "i", AtomicType::Int32);
    b.primitive(q, "name", AtomicType::String);
    let mut tree = b.finish().unwrap();
    tree.attach_payload(payload, 0).unwrap();
    tree
}

pub fn sequence_payload() -> Vec<u8> {
    Xdr::new()
        .start()
        .i32s(&[1])
        .string("ab")
        .start()
        .i32s(&[2])
        .string("xyz")
        .end()
        .build()
}

/// `Dataset { Grid g { Array: Float32 v[2][2]; Maps: Float64 x[2], y[2]; }; }`
pub fn grid_tree(payload: Vec<u8>) -> Tree {
    let mut b = TreeBuilder::new(ResponseKind::DataDds);
    let ds = b.dataset("test");
    let g = b.grid(ds, "g");
    let v = b.primitive(g, "v", AtomicType::Float32);
    b.dimension(v, Some("x"), 2);
    b.dimension(v, Some("y"), 2);
    let x = b.primitive(g, "x", AtomicType::Float64);
    b.dimension(x, Some("x"), 2);
    let y = b.primitive(g, "y", AtomicType::Float64);
    b.dimension(y, Some("y"), 2);
    let mut tree = b.finish().unwrap();
    tree.attach_payload(payload, 0).unwrap();
    tree
}

pub fn grid_payload() -> Vec<u8> {
    Xdr::new()
        .counts(4)
        .f32s(&[1.0, 2.0, 3.0, 4.0])
        .counts(2)
        .f64s(&[10.5, 20.5])
        .counts(2)
        .f64s(&[-1.25, -2.25])
        .build()
}

/// `Dataset { Structure pt[2] { Int32 x; Int32 y; }; }`
pub fn struct_array_tree(payload: Vec<u8>) -> Tree {
    let mut b = TreeBuilder::new(ResponseKind::DataDds);
    let ds = b.dataset("test");
    let pt = b.structure(ds, "pt");
    b.dimension(pt, None, 2);
    b.primitive(pt, "x", AtomicType::Int32);
    b.primitive(pt, "y", AtomicType::Int32);
    let mut tree = b.finish().unwrap();
    tree.attach_payload(payload, 0).unwrap();
    tree
}

pub fn struct_array_payload() -> Vec<u8> {
    // Constructor arrays carry a single leading count.
    Xdr::new().count(2).i32s(&[1, 2, 3, 4]).build()
}

/// `Dataset { String s[2]; }` with values "hi" and "world".
pub fn string_array_tree() -> Tree {
    let mut b = TreeBuilder::new(ResponseKind::DataDds);
    let ds = b.dataset("test");
    let s = b.primitive(ds, "s", AtomicType::String);
    b.dimension(s, None, 2);
    let mut tree = b.finish().unwrap();
    let payload = Xdr::new().count(2).string("hi").string("world").build();
    tree.attach_payload(payload, 0).unwrap();
    tree
}

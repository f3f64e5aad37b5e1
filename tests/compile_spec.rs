//! The compiled in-memory mirror must answer navigation and leaf reads with
//! exactly the values the streaming path yields.

mod common;

use common::*;
use dap2_reader::{
    AtomicType, DapError, Mode, PrimitiveData, ResponseKind, Tree, TreeBuilder,
};

/// Run the same extraction before and after compiling and insist the results
/// are bit-identical.
fn assert_compiled_matches(
    mut tree: Tree,
    extract: impl Fn(&mut Tree) -> Vec<PrimitiveData>,
) {
    init_logging();
    let streamed = extract(&mut tree);
    assert!(!tree.is_compiled());
    tree.compile().unwrap();
    assert!(tree.is_compiled());
    let compiled = extract(&mut tree);
    assert_eq!(streamed, compiled);
}

#[test]
fn compiled_array_reads_match_streaming() {
    assert_compiled_matches(struct_int32_tree(struct_int32_payload()), |tree| {
        let mut root = tree.root_content().unwrap();
        let mut s = tree.child_content(&mut root, 0).unwrap();
        let mut a = tree.child_content(&mut s, 0).unwrap();
        let mut out = vec![tree.read_leaf(&a, 0, 3).unwrap(), tree.read_leaf(&a, 1, 2).unwrap()];
        for k in 0..3 {
            let elem = tree.child_content(&mut a, k).unwrap();
            out.push(tree.read_leaf(&elem, 0, 1).unwrap());
        }
        out
    });
}

#[test]
fn compiled_packed_bytes_match_streaming() {
    assert_compiled_matches(packed_byte_tree(packed_byte_payload()), |tree| {
        let mut root = tree.root_content().unwrap();
        let mut a = tree.child_content(&mut root, 0).unwrap();
        let mut out = vec![tree.read_leaf(&a, 0, 5).unwrap(), tree.read_leaf(&a, 2, 3).unwrap()];
        for k in (0..5).rev() {
            let elem = tree.child_content(&mut a, k).unwrap();
            out.push(tree.read_leaf(&elem, 0, 1).unwrap());
        }
        out
    });
}

#[test]
fn compiled_sequence_records_match_streaming() {
    assert_compiled_matches(sequence_tree(sequence_payload()), |tree| {
        let mut root = tree.root_content().unwrap();
        let mut q = tree.child_content(&mut root, 0).unwrap();
        let mut out = Vec::new();
        for r in (0..tree.content_count(&q).unwrap()).rev() {
            let mut rec = tree.child_content(&mut q, r).unwrap();
            let i = tree.child_content(&mut rec, 0).unwrap();
            out.push(tree.read_leaf(&i, 0, 1).unwrap());
            let name = tree.child_content(&mut rec, 1).unwrap();
            out.push(tree.read_leaf(&name, 0, 1).unwrap());
        }
        out
    });
}

#[test]
fn compiled_grid_maps_match_streaming() {
    assert_compiled_matches(grid_tree(grid_payload()), |tree| {
        let mut root = tree.root_content().unwrap();
        let mut g = tree.child_content(&mut root, 0).unwrap();
        let mut out = Vec::new();
        for field in [2, 0, 1] {
            let c = tree.child_content(&mut g, field).unwrap();
            let n = tree.content_count(&c).unwrap();
            out.push(tree.read_leaf(&c, 0, n).unwrap());
        }
        out
    });
}

#[test]
fn compiled_structure_array_elements_match_streaming() {
    assert_compiled_matches(struct_array_tree(struct_array_payload()), |tree| {
        let mut root = tree.root_content().unwrap();
        let mut pt = tree.child_content(&mut root, 0).unwrap();
        let mut out = Vec::new();
        for e in [1, 0] {
            let mut elem = tree.child_content(&mut pt, e).unwrap();
            for f in 0..2 {
                let leaf = tree.child_content(&mut elem, f).unwrap();
                out.push(tree.read_leaf(&leaf, 0, 1).unwrap());
            }
        }
        out
    });
}

#[test]
fn compiled_string_arrays_match_streaming() {
    assert_compiled_matches(string_array_tree(), |tree| {
        let mut root = tree.root_content().unwrap();
        let s = tree.child_content(&mut root, 0).unwrap();
        vec![
            tree.read_leaf(&s, 0, 2).unwrap(),
            tree.read_leaf(&s, 1, 1).unwrap(),
        ]
    });
}

#[test]
fn compiled_counts_match_streaming() {
    init_logging();
    let mut tree = sequence_tree(sequence_payload());
    let mut root = tree.root_content().unwrap();
    let q = tree.child_content(&mut root, 0).unwrap();
    let streamed = tree.content_count(&q).unwrap();

    tree.compile().unwrap();
    let mut root = tree.root_content().unwrap();
    let q = tree.child_content(&mut root, 0).unwrap();
    assert_eq!(tree.content_count(&q).unwrap(), streamed);
    assert_eq!(q.mode(), Mode::Record);
}

#[test]
fn compile_rejects_a_count_that_disagrees_with_the_declaration() {
    init_logging();
    let payload = Xdr::new().counts(2).i32s(&[7, 11]).build();
    let mut tree = struct_int32_tree(payload);
    match tree.compile().unwrap_err() {
        DapError::DimensionMismatch {
            name,
            declared,
            received,
        } => {
            assert_eq!(name, "S.a");
            assert_eq!(declared, 3);
            assert_eq!(received, 2);
        }
        other => panic!("expected DimensionMismatch, got {other:?}"),
    }
    // Nothing was installed; streaming access still works.
    assert!(!tree.is_compiled());
    let mut root = tree.root_content().unwrap();
    let mut s = tree.child_content(&mut root, 0).unwrap();
    let a = tree.child_content(&mut s, 0).unwrap();
    assert_eq!(
        tree.read_leaf(&a, 0, 2).unwrap(),
        PrimitiveData::Int32(vec![7, 11])
    );
}

#[test]
fn compile_is_idempotent() {
    init_logging();
    let mut tree = struct_int32_tree(struct_int32_payload());
    tree.compile().unwrap();
    tree.compile().unwrap();
    assert!(tree.is_compiled());
}

#[test]
fn compile_requires_a_payload() {
    init_logging();
    let mut b = TreeBuilder::new(ResponseKind::DataDds);
    b.dataset("test");
    let mut tree = b.finish().unwrap();
    assert!(matches!(
        tree.compile().unwrap_err(),
        DapError::MalformedStream(_)
    ));
}

#[test]
fn compiled_scalars_match_streaming() {
    init_logging();
    let mut b = TreeBuilder::new(ResponseKind::DataDds);
    let ds = b.dataset("test");
    b.primitive(ds, "n", AtomicType::Int32);
    b.primitive(ds, "f", AtomicType::Float64);
    b.primitive(ds, "b", AtomicType::Byte);
    let mut tree = b.finish().unwrap();
    let payload = Xdr::new().i32s(&[42]).f64s(&[2.5]).byte_unit(9).build();
    tree.attach_payload(payload, 0).unwrap();

    assert_compiled_matches(tree, |tree| {
        let mut root = tree.root_content().unwrap();
        (0..3)
            .map(|f| {
                let c = tree.child_content(&mut root, f).unwrap();
                tree.read_leaf(&c, 0, 1).unwrap()
            })
            .collect()
    });
}

#[test]
fn compiled_int64_arrays_match_streaming() {
    init_logging();
    let mut b = TreeBuilder::new(ResponseKind::DataDds);
    let ds = b.dataset("test");
    let a = b.primitive(ds, "a", AtomicType::Int64);
    b.dimension(a, None, 2);
    let mut tree = b.finish().unwrap();
    let payload = Xdr::new()
        .counts(2)
        .i64s(&[-5_000_000_000, 6_000_000_007])
        .build();
    tree.attach_payload(payload, 0).unwrap();

    assert_compiled_matches(tree, |tree| {
        let mut root = tree.root_content().unwrap();
        let a = tree.child_content(&mut root, 0).unwrap();
        vec![
            tree.read_leaf(&a, 0, 2).unwrap(),
            tree.read_leaf(&a, 1, 1).unwrap(),
        ]
    });
}

#[test]
fn compiled_out_of_range_errors_match_streaming() {
    init_logging();
    let mut tree = struct_int32_tree(struct_int32_payload());
    tree.compile().unwrap();
    let mut root = tree.root_content().unwrap();
    let mut s = tree.child_content(&mut root, 0).unwrap();
    let mut a = tree.child_content(&mut s, 0).unwrap();
    assert!(matches!(
        tree.child_content(&mut a, 3).unwrap_err(),
        DapError::InvalidCoords { .. }
    ));
    assert!(matches!(
        tree.read_leaf(&a, 2, 2).unwrap_err(),
        DapError::InvalidCoords { .. }
    ));
}

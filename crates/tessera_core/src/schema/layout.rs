//! # Packed Struct Layout
//!
//! Byte offsets for writing one row of a component into a flat buffer that an
//! external consumer (typically a GPU uniform or storage buffer) reads with
//! std140 rules:
//!
//! - scalars align to their own size
//! - arrays and nested structs align to 16 bytes
//! - array elements are tightly packed, array size rounds up to 16
//!   (so `[f32; 3]` occupies 16 bytes)
//! - struct size rounds up to 16
//!
//! The WGSL rule that lets a scalar fill the tail of a preceding `vec3` is
//! not applied: a field after any array starts at the next 16 byte boundary.
//! Consumers declare such fields with std140 padding (or as `vec4`).

use super::{ScalarKind, Shape};

const VEC4_SIZE: usize = 16;

/// Byte offset and kind of one leaf.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct LeafSlot {
    /// Offset from the start of the row.
    pub offset: usize,
    /// Leaf kind.
    pub kind: ScalarKind,
}

/// Offsets of every leaf of a shape, computed once per column.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct StructLayout {
    size: usize,
    align: usize,
    leaves: Vec<LeafSlot>,
}

impl StructLayout {
    /// Computes the layout of `shape`. Opaque shapes have none.
    #[must_use]
    pub fn of(shape: &Shape) -> Option<Self> {
        let mut leaves = Vec::with_capacity(shape.leaf_count());
        let (size, align) = place(shape, 0, &mut leaves)?;
        Some(Self {
            size,
            align,
            leaves,
        })
    }

    /// Total size of one packed row in bytes.
    #[inline]
    #[must_use]
    pub const fn size(&self) -> usize {
        self.size
    }

    /// Required alignment of a packed row.
    #[inline]
    #[must_use]
    pub const fn align(&self) -> usize {
        self.align
    }

    /// Leaf slots in storage order.
    #[inline]
    #[must_use]
    pub fn leaves(&self) -> &[LeafSlot] {
        &self.leaves
    }
}

#[inline]
const fn round_up(value: usize, align: usize) -> usize {
    (value + align - 1) / align * align
}

/// Places `shape` at `base`, returning `(size, align)`.
fn place(shape: &Shape, base: usize, leaves: &mut Vec<LeafSlot>) -> Option<(usize, usize)> {
    match shape {
        Shape::Scalar(kind) => {
            leaves.push(LeafSlot {
                offset: base,
                kind: *kind,
            });
            Some((kind.size(), kind.size()))
        }
        Shape::Array { item, len } => {
            // std140: the whole array occupies a multiple of 16, even `[f32; 2]`
            let stride = item.size();
            leaves.extend((0..*len).map(|i| LeafSlot {
                offset: base + i * stride,
                kind: *item,
            }));
            Some((round_up(stride * len, VEC4_SIZE), VEC4_SIZE))
        }
        Shape::Struct(fields) => {
            let mut offset = 0;
            for field in fields {
                let align = field_align(&field.shape)?;
                offset = round_up(offset, align);
                let (size, _) = place(&field.shape, base + offset, leaves)?;
                offset += size;
            }
            Some((round_up(offset, VEC4_SIZE), VEC4_SIZE))
        }
        Shape::Opaque => None,
    }
}

fn field_align(shape: &Shape) -> Option<usize> {
    match shape {
        Shape::Scalar(kind) => Some(kind.size()),
        Shape::Array { .. } | Shape::Struct(_) => Some(VEC4_SIZE),
        Shape::Opaque => None,
    }
}

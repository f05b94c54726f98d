//! Memory layout calculations
//!
//! Computes in-memory sizes, alignments and field offsets under the target
//! ABI. These decide structure sizes in records, padding markers, and the
//! offsets correlation descriptors point at.

use crate::types::{ArrayForm, Field, TypeId, TypeKind, UnionArm};
use crate::TypeEnv;

/// Memory size and alignment of a type
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Layout {
    pub size: u32,
    pub align: u32,
}

impl Layout {
    pub const EMPTY: Layout = Layout { size: 0, align: 1 };

    fn scalar(size: u32) -> Self {
        Self {
            size,
            align: size.max(1),
        }
    }

    /// Calculate padding needed before this type at a given position
    pub fn padding_at(&self, position: u32) -> u32 {
        padding(position, self.align)
    }
}

/// Bytes needed to bring `position` up to a multiple of `align`
pub fn padding(position: u32, align: u32) -> u32 {
    if align <= 1 {
        return 0;
    }
    let remainder = position % align;
    if remainder == 0 {
        0
    } else {
        align - remainder
    }
}

pub fn align_up(position: u32, align: u32) -> u32 {
    position.saturating_add(padding(position, align))
}

impl<'a> TypeEnv<'a> {
    /// Memory size and alignment of `ty`
    ///
    /// By-value cycles (which classification rejects) contribute nothing
    /// instead of recursing forever.
    pub fn memsize(&self, ty: TypeId) -> Layout {
        self.memsize_guarded(ty, &mut Vec::new())
    }

    /// Offset of every field of a structure, in declaration order
    pub fn field_offsets(&self, fields: &[Field]) -> Vec<u32> {
        self.fold_fields(fields, &mut Vec::new()).0
    }

    fn memsize_guarded(&self, ty: TypeId, stack: &mut Vec<TypeId>) -> Layout {
        let ps = self.pointer_size();
        match &self.arena.get(ty).kind {
            TypeKind::Void => Layout::EMPTY,
            TypeKind::Basic(basic) => Layout::scalar(basic.size(ps)),
            // The wire policy only changes the format character; in memory an
            // enum is always an int
            TypeKind::Enum(_) => Layout::scalar(4),
            TypeKind::Pointer(_) | TypeKind::Interface { .. } => Layout::scalar(ps),
            TypeKind::Alias(target) => self.memsize_guarded(*target, stack),
            TypeKind::Array(array) => match array.form {
                ArrayForm::Pointer => Layout::scalar(ps),
                ArrayForm::Declared => {
                    let elem = self.memsize_guarded(array.element, stack);
                    match array.dim {
                        Some(dim) if array.size_is.is_none() => Layout {
                            size: elem.size.saturating_mul(dim),
                            align: elem.align,
                        },
                        _ => Layout {
                            size: 0,
                            align: elem.align,
                        },
                    }
                }
            },
            TypeKind::Struct(fields) => {
                if stack.contains(&ty) {
                    return Layout::EMPTY;
                }
                stack.push(ty);
                let (_, end, align) = self.fold_fields(fields, stack);
                stack.pop();
                Layout {
                    size: align_up(end, align),
                    align,
                }
            }
            TypeKind::Union(arms) => {
                if stack.contains(&ty) {
                    return Layout::EMPTY;
                }
                stack.push(ty);
                let arms = self.arms_layout(arms, stack);
                stack.pop();
                arms
            }
            TypeKind::EncapsulatedUnion { switch, arms } => {
                if stack.contains(&ty) {
                    return Layout::EMPTY;
                }
                stack.push(ty);
                let switch = self.memsize_guarded(switch.ty, stack);
                let arms = self.arms_layout(arms, stack);
                stack.pop();
                let align = switch.align.max(arms.align);
                let size = align_up(switch.size, arms.align).saturating_add(arms.size);
                Layout {
                    size: align_up(size, align),
                    align,
                }
            }
            TypeKind::Function(_) | TypeKind::Module(_) | TypeKind::Coclass(_) => Layout::EMPTY,
        }
    }

    /// Returns (field offsets, end of last field, max alignment)
    pub(crate) fn fold_fields(&self, fields: &[Field], stack: &mut Vec<TypeId>) -> (Vec<u32>, u32, u32) {
        let mut offsets = Vec::with_capacity(fields.len());
        let mut offset = 0u32;
        let mut align = 1;
        for field in fields {
            let layout = self.memsize_guarded(field.ty, stack);
            offset = align_up(offset, layout.align);
            offsets.push(offset);
            offset = offset.saturating_add(layout.size);
            align = align.max(layout.align);
        }
        (offsets, offset, align)
    }

    /// Size of the largest arm, rounded to the largest arm alignment
    pub(crate) fn arms_layout(&self, arms: &[UnionArm], stack: &mut Vec<TypeId>) -> Layout {
        let mut size = 0;
        let mut align = 1;
        for field in arms.iter().filter_map(|arm| arm.field.as_ref()) {
            let layout = self.memsize_guarded(field.ty, stack);
            size = size.max(layout.size);
            align = align.max(layout.align);
        }
        Layout {
            size: align_up(size, align),
            align,
        }
    }
}

//! Pointer layouts of fast structures and arrays
//!
//! Instance offsets are relative to the start of the outermost structure or
//! array being described; repeat entries list the pointers of the first
//! element.

use super::Use;
use crate::classify::{ClassifyFlags, Shape};
use crate::context::{Compilation, Scope};
use crate::error::{MidlError, Result};
use crate::types::{ArrayForm, TypeId, TypeKind};
use ndr_format::records::{PointerInstance, PointerLayout, PointerLayoutEntry, PointerRecord};

fn instance(at: u32, pointer: PointerRecord) -> PointerInstance {
    PointerInstance {
        memory_offset: at,
        buffer_offset: at,
        pointer,
    }
}

impl<'a> Compilation<'a> {
    pub(crate) fn struct_pointer_layout(&mut self, ty: TypeId) -> Result<PointerLayout> {
        let mut entries = Vec::new();
        self.collect_struct_pointers(ty, 0, &mut entries)?;
        Ok(PointerLayout { entries })
    }

    /// Pointer layout of a standalone array, None when its elements hold
    /// no pointers
    pub(crate) fn array_pointer_layout(&mut self, ty: TypeId) -> Result<Option<PointerLayout>> {
        Ok(self.array_repeat(ty, 0)?.map(|entry| PointerLayout {
            entries: vec![entry],
        }))
    }

    fn collect_struct_pointers(
        &mut self,
        ty: TypeId,
        base: u32,
        entries: &mut Vec<PointerLayoutEntry>,
    ) -> Result<()> {
        let structure = self.arena.resolve(ty);
        let fields = self.struct_fields(structure).ok_or_else(|| {
            MidlError::internal(format!("{} is not a structure", self.arena.name_of(ty)))
        })?;
        let offsets = self.env().field_offsets(fields);
        let saved = self.scope;

        for (field, &offset) in fields.iter().zip(&offsets) {
            let at = base + offset;
            self.scope = Some(Scope {
                structure,
                field_offset: offset,
            });
            let shape = self
                .env()
                .classify(field.ty, &field.attrs, ClassifyFlags::empty())?;
            match shape {
                Shape::Pointer(kind) => {
                    let pointer = self.pointer_record(field.ty, &field.attrs, kind, Use::Embedded)?;
                    entries.push(PointerLayoutEntry::NoRepeat(instance(at, pointer)));
                }
                Shape::String if !self.is_declared_array(field.ty) => {
                    let pointer = self.string_pointer_record(field.ty, &field.attrs, Use::Embedded)?;
                    entries.push(PointerLayoutEntry::NoRepeat(instance(at, pointer)));
                }
                Shape::Struct(_) => self.collect_struct_pointers(field.ty, at, entries)?,
                Shape::Array(_) => {
                    if let Some(entry) = self.array_repeat(field.ty, at)? {
                        entries.push(entry);
                    }
                }
                _ => {}
            }
        }

        self.scope = saved;
        Ok(())
    }

    /// Repeat entry for the array `ty` placed at `at`
    fn array_repeat(&mut self, ty: TypeId, at: u32) -> Result<Option<PointerLayoutEntry>> {
        let arena = self.arena;
        let TypeKind::Array(array) = &arena.get(arena.resolve(ty)).kind else {
            return Ok(None);
        };
        let pointers = self.element_pointers(array.element, at)?;
        if pointers.is_empty() {
            return Ok(None);
        }
        let increment = self.env().memsize(array.element).size;
        Ok(Some(match array.dim {
            Some(iterations) if !array.is_conformant() && !array.is_varying() => {
                PointerLayoutEntry::FixedRepeat {
                    iterations,
                    increment,
                    offset_to_array: at,
                    pointers,
                }
            }
            _ => PointerLayoutEntry::VariableRepeat {
                variable_offset: array.is_varying(),
                increment,
                offset_to_array: at,
                pointers,
            },
        }))
    }

    /// Pointers inside one element placed at `at`
    fn element_pointers(&mut self, element: TypeId, at: u32) -> Result<Vec<PointerInstance>> {
        let arena = self.arena;
        let shape = self.env().classify(element, &[], ClassifyFlags::empty())?;
        Ok(match shape {
            Shape::Pointer(kind) => {
                vec![instance(at, self.pointer_record(element, &[], kind, Use::Embedded)?)]
            }
            Shape::Struct(_) => {
                let mut entries = Vec::new();
                self.collect_struct_pointers(element, at, &mut entries)?;
                let mut pointers = Vec::with_capacity(entries.len());
                for entry in entries {
                    match entry {
                        PointerLayoutEntry::NoRepeat(instance) => pointers.push(instance),
                        _ => {
                            return Err(MidlError::unsupported(
                                arena.name_of(element),
                                "array elements with pointer arrays inside",
                            ))
                        }
                    }
                }
                pointers
            }
            Shape::Array(_) => match &arena.get(arena.resolve(element)).kind {
                // Fixed inner dimensions flatten into the outer element
                TypeKind::Array(inner) => {
                    let size = self.env().memsize(inner.element).size;
                    let mut pointers = Vec::new();
                    for i in 0..inner.dim.unwrap_or(0) {
                        pointers.extend(self.element_pointers(inner.element, at + i * size)?);
                    }
                    pointers
                }
                _ => Vec::new(),
            },
            _ => Vec::new(),
        })
    }

    pub(crate) fn is_declared_array(&self, ty: TypeId) -> bool {
        matches!(
            &self.arena.get(self.arena.resolve(ty)).kind,
            TypeKind::Array(array) if array.form == ArrayForm::Declared
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{BasicType, Field, TypeArena};
    use crate::CompileOptions;
    use ndr_format::records::PointerRecord;
    use ndr_format::{FormatChar, PointerFlags};
    use pretty_assertions::assert_eq;

    fn unique_long() -> PointerRecord {
        PointerRecord::Simple {
            pointer: FormatChar::UniquePointer,
            flags: PointerFlags::empty(),
            base: FormatChar::Long,
        }
    }

    #[test]
    fn test_nested_struct_offsets_are_absolute() {
        let mut arena = TypeArena::new();
        let long = arena.basic(BasicType::Long);
        let p = arena.pointer(long, vec![]);
        let inner = arena.structure("inner", vec![Field::new("x", long), Field::new("p", p)]);
        let outer = arena.structure("outer", vec![Field::new("a", long), Field::new("in", inner)]);
        let mut c = Compilation::new(&arena, CompileOptions::x86());
        let layout = c.struct_pointer_layout(outer).unwrap();
        assert_eq!(
            layout.entries,
            vec![PointerLayoutEntry::NoRepeat(instance(8, unique_long()))]
        );
    }

    #[test]
    fn test_fixed_array_repeat() {
        let mut arena = TypeArena::new();
        let long = arena.basic(BasicType::Long);
        let p = arena.pointer(long, vec![]);
        let pair = arena.structure("pair", vec![Field::new("n", long), Field::new("p", p)]);
        let arr = arena.fixed_array(pair, 3);
        let s = arena.structure("s", vec![Field::new("k", long), Field::new("items", arr)]);
        let mut c = Compilation::new(&arena, CompileOptions::x86());
        let layout = c.struct_pointer_layout(s).unwrap();
        assert_eq!(
            layout.entries,
            vec![PointerLayoutEntry::FixedRepeat {
                iterations: 3,
                increment: 8,
                offset_to_array: 4,
                pointers: vec![instance(8, unique_long())],
            }]
        );
    }

    #[test]
    fn test_scalar_array_has_no_layout() {
        let mut arena = TypeArena::new();
        let long = arena.basic(BasicType::Long);
        let arr = arena.fixed_array(long, 3);
        let mut c = Compilation::new(&arena, CompileOptions::x86());
        assert_eq!(c.array_pointer_layout(arr).unwrap(), None);
    }
}

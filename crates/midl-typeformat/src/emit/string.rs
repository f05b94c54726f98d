//! String records

use super::Use;
use crate::context::Compilation;
use crate::error::{MidlError, Result};
use crate::types::{ArrayForm, Attribute, BasicType, TypeId, TypeKind};
use ndr_format::correlation::CorrelationDesc;
use ndr_format::records::{PointerRecord, StringRecord};
use ndr_format::{FormatChar, Target};

/// Conformant and fixed string characters of one element width
struct StringChars {
    conformant: FormatChar,
    fixed: FormatChar,
}

impl<'a> Compilation<'a> {
    fn string_chars(&self, ty: TypeId) -> Result<StringChars> {
        let arena = self.arena;
        let element = match &arena.get(arena.resolve(ty)).kind {
            TypeKind::Pointer(referent) => *referent,
            TypeKind::Array(array) => array.element,
            _ => {
                return Err(MidlError::internal(format!(
                    "{} is neither a pointer nor an array",
                    arena.name_of(ty)
                )))
            }
        };
        match arena.get(arena.resolve(element)).kind {
            TypeKind::Basic(BasicType::Char | BasicType::Byte) => Ok(StringChars {
                conformant: FormatChar::CCString,
                fixed: FormatChar::CString,
            }),
            TypeKind::Basic(BasicType::WChar) => Ok(StringChars {
                conformant: FormatChar::CWString,
                fixed: FormatChar::WString,
            }),
            _ => Err(MidlError::unsupported(
                arena.name_of(ty),
                "string elements must be char, byte or wchar_t",
            )),
        }
    }

    /// `size_is` of a pointer-form string, if it has one
    fn string_size_is(&self, ty: TypeId) -> Option<&'a crate::expr::Expr> {
        let arena = self.arena;
        match &arena.get(arena.resolve(ty)).kind {
            TypeKind::Array(array) => array.size_is.as_ref(),
            _ => None,
        }
    }

    /// Pointer record of a string pointer, emitting the sized string record
    /// it points at when there is one
    pub(crate) fn string_pointer_record(
        &mut self,
        ty: TypeId,
        attrs: &[Attribute],
        site: Use,
    ) -> Result<PointerRecord> {
        let kind = self.env().pointer_kind(ty, attrs, site.is_top_level());
        let pointer = kind.format_char();
        let flags = self.pointer_flags(kind, site);
        let chars = self.string_chars(ty)?;
        match self.string_size_is(ty) {
            Some(expr) => {
                let structure = self.scope.map(|s| s.structure);
                let size_is = self.write_conf(structure, 0, ty, Some(expr))?;
                let target = self.tfs.emit(&StringRecord::Sized {
                    fc: chars.conformant,
                    size_is,
                })?;
                Ok(PointerRecord::Referent {
                    pointer,
                    flags,
                    target: Target::At(target),
                })
            }
            None => Ok(PointerRecord::String {
                pointer,
                flags,
                string: chars.conformant,
            }),
        }
    }

    pub(crate) fn emit_string(&mut self, ty: TypeId, attrs: &[Attribute], site: Use) -> Result<Target> {
        let arena = self.arena;
        let chars = self.string_chars(ty)?;

        if let TypeKind::Array(array) = &arena.get(arena.resolve(ty)).kind {
            if array.form == ArrayForm::Declared {
                let record = if array.is_conformant() {
                    let size_is = match &array.size_is {
                        Some(expr) => {
                            let (structure, base) = match self.scope {
                                Some(scope) => (Some(scope.structure), scope.field_offset),
                                None => (None, 0),
                            };
                            self.write_conf(structure, base, ty, Some(expr))?
                        }
                        None => CorrelationDesc::Absent,
                    };
                    if size_is == CorrelationDesc::Absent {
                        StringRecord::Unsized { fc: chars.conformant }
                    } else {
                        StringRecord::Sized {
                            fc: chars.conformant,
                            size_is,
                        }
                    }
                } else {
                    let dim = array.dim.unwrap_or(0);
                    if dim > 0xffff {
                        return Err(MidlError::capacity(
                            arena.name_of(ty),
                            "string dimension",
                            dim as u64,
                            0xffff,
                        ));
                    }
                    StringRecord::Fixed {
                        fc: chars.fixed,
                        dim,
                    }
                };
                return Ok(Target::At(self.tfs.emit(&record)?));
            }
        }

        if !site.is_top_level() {
            let record = self.string_pointer_record(ty, attrs, site)?;
            return Ok(Target::At(self.tfs.emit(&record)?));
        }

        // Top level: a pointer wrapper, followed by the sized record if any
        let kind = self.env().pointer_kind(ty, attrs, true);
        let pointer = kind.format_char();
        let flags = self.pointer_flags(kind, site);
        let wrapper = self.tfs.offset();
        match self.string_size_is(ty) {
            Some(expr) => {
                let size_is = self.write_conf(None, 0, ty, Some(expr))?;
                self.tfs.emit(&PointerRecord::Referent {
                    pointer,
                    flags,
                    target: Target::At(wrapper + PointerRecord::SIZE),
                })?;
                self.tfs.emit(&StringRecord::Sized {
                    fc: chars.conformant,
                    size_is,
                })?;
            }
            None => {
                self.tfs.emit(&PointerRecord::String {
                    pointer,
                    flags,
                    string: chars.conformant,
                })?;
            }
        }
        Ok(Target::At(wrapper))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::expr::Expr;
    use crate::types::{ParamDirection, TypeArena};
    use crate::CompileOptions;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_top_level_strings() {
        let mut arena = TypeArena::new();
        let ch = arena.basic(BasicType::Char);
        let wch = arena.basic(BasicType::WChar);
        let s = arena.pointer(ch, vec![Attribute::String]);
        let ws = arena.sized_pointer(wch, Some(Expr::ident("n")), None);
        let mut c = Compilation::new(&arena, CompileOptions::x86());

        let first = c.emit_type(s, &[], Use::Param(ParamDirection::In)).unwrap();
        let second = c
            .emit_type(ws, &[Attribute::String], Use::Param(ParamDirection::In))
            .unwrap();
        assert_eq!(first, Target::At(1));
        assert_eq!(second, Target::At(5));
        assert_eq!(
            &c.tfs.as_bytes()[1..],
            &[
                0x11, 0x08, 0x22, 0x5c, // [string] char *
                0x11, 0x00, 0x02, 0x00, // wrapper -> +2
                0x25, 0x44, 0x20, 0x00, 0x00, 0x00, // sized wide string
            ]
        );
    }

    #[test]
    fn test_fixed_string_array() {
        let mut arena = TypeArena::new();
        let ch = arena.basic(BasicType::Char);
        let name = arena.fixed_array(ch, 16);
        let mut c = Compilation::new(&arena, CompileOptions::x86());
        c.emit_type(name, &[Attribute::String], Use::Embedded).unwrap();
        assert_eq!(&c.tfs.as_bytes()[1..], &[0x26, 0x5c, 0x10, 0x00]);
    }

    #[test]
    fn test_bad_string_element() {
        let mut arena = TypeArena::new();
        let long = arena.basic(BasicType::Long);
        let p = arena.pointer(long, vec![Attribute::String]);
        let mut c = Compilation::new(&arena, CompileOptions::x86());
        let err = c.emit_type(p, &[], Use::Param(ParamDirection::In)).unwrap_err();
        assert!(matches!(err, MidlError::Unsupported { .. }));
    }
}

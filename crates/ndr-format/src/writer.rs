//! Format string writer
//!
//! Tracks the absolute offset of everything written and turns absolute
//! targets into the relative 16-bit offsets the runtime expects. Targets that
//! are not known yet are written through a [`Label`] and patched on `bind`.

use crate::error::{FormatError, Result};
use crate::fc::FormatChar;
use bytes::{BufMut, Bytes, BytesMut};

/// A forward reference to an offset that is not known yet
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Label(u32);

impl Label {
    /// Raw label number, for diagnostics
    pub fn index(self) -> u32 {
        self.0
    }
}

/// Where a relative offset field points
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Target {
    /// A known absolute offset
    At(u32),
    /// An offset resolved later through `FormatWriter::bind`
    Label(Label),
}

impl From<u32> for Target {
    fn from(offset: u32) -> Self {
        Target::At(offset)
    }
}

impl From<Label> for Target {
    fn from(label: Label) -> Self {
        Target::Label(label)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum LabelState {
    Unbound,
    Bound(u32),
    /// Bound to "nothing": every use is encoded as a zero offset
    Null,
}

/// A relative offset field waiting for its label
#[derive(Debug, Clone, Copy)]
struct Fixup {
    at: u32,
    label: Label,
}

/// Something that serializes itself into a format string
pub trait Encode {
    fn encode(&self, w: &mut FormatWriter) -> Result<()>;
}

/// Append-only format string buffer with label patching
#[derive(Debug, Default)]
pub struct FormatWriter {
    buf: BytesMut,
    labels: Vec<LabelState>,
    fixups: Vec<Fixup>,
}

impl FormatWriter {
    /// Create an empty writer
    pub fn new() -> Self {
        Self::default()
    }

    /// Current absolute offset (the offset of the next byte written)
    #[inline]
    pub fn offset(&self) -> u32 {
        self.buf.len() as u32
    }

    /// Bytes written so far
    pub fn as_bytes(&self) -> &[u8] {
        &self.buf
    }

    /// Encode a record and return the offset it starts at
    pub fn emit<E: Encode + ?Sized>(&mut self, record: &E) -> Result<u32> {
        let start = self.offset();
        record.encode(self)?;
        Ok(start)
    }

    /// Put a format character
    #[inline]
    pub fn put_fc(&mut self, fc: FormatChar) {
        self.buf.put_u8(fc.as_u8());
    }

    /// Put a u8
    #[inline]
    pub fn put_u8(&mut self, value: u8) {
        self.buf.put_u8(value);
    }

    /// Put a u16
    #[inline]
    pub fn put_u16(&mut self, value: u16) {
        self.buf.put_u16_le(value);
    }

    /// Put an i16
    #[inline]
    pub fn put_i16(&mut self, value: i16) {
        self.buf.put_i16_le(value);
    }

    /// Put a u32
    #[inline]
    pub fn put_u32(&mut self, value: u32) {
        self.buf.put_u32_le(value);
    }

    /// Put raw bytes
    #[inline]
    pub fn put_slice(&mut self, bytes: &[u8]) {
        self.buf.put_slice(bytes);
    }

    /// Put a u16 field, checking that `value` fits
    pub fn put_u16_checked(&mut self, what: &'static str, value: u64) -> Result<()> {
        let v = u16::try_from(value).map_err(|_| FormatError::FieldOverflow {
            what,
            value,
            max: u16::MAX as u64,
        })?;
        self.put_u16(v);
        Ok(())
    }

    /// Put a u32 field, checking that `value` fits
    pub fn put_u32_checked(&mut self, what: &'static str, value: u64) -> Result<()> {
        let v = u32::try_from(value).map_err(|_| FormatError::FieldOverflow {
            what,
            value,
            max: u32::MAX as u64,
        })?;
        self.put_u32(v);
        Ok(())
    }

    /// Put a 16-bit offset relative to the position of the field itself
    pub fn put_offset(&mut self, target: Target) -> Result<()> {
        let at = self.offset();
        match target {
            Target::At(abs) => {
                let rel = relative(at, abs)?;
                self.put_i16(rel);
            }
            Target::Label(label) => match self.labels[label.0 as usize] {
                LabelState::Bound(abs) => {
                    let rel = relative(at, abs)?;
                    self.put_i16(rel);
                }
                LabelState::Null => self.put_i16(0),
                LabelState::Unbound => {
                    self.fixups.push(Fixup { at, label });
                    self.put_i16(0);
                }
            },
        }
        Ok(())
    }

    /// Terminate a record with `FC_END`, inserting `FC_PAD` first when needed
    /// so that the record ends on an even offset
    pub fn put_end(&mut self) {
        if self.offset() % 2 == 0 {
            self.put_fc(FormatChar::Pad);
        }
        self.put_fc(FormatChar::End);
    }

    /// Allocate a new unbound label
    pub fn new_label(&mut self) -> Label {
        let label = Label(self.labels.len() as u32);
        self.labels.push(LabelState::Unbound);
        label
    }

    /// The offset a label is bound to, if any
    pub fn resolve(&self, label: Label) -> Option<u32> {
        match self.labels.get(label.0 as usize) {
            Some(LabelState::Bound(abs)) => Some(*abs),
            _ => None,
        }
    }

    /// Bind a label to an absolute offset and patch every pending use
    pub fn bind(&mut self, label: Label, offset: u32) -> Result<()> {
        self.set_label(label, LabelState::Bound(offset))?;
        let pending: Vec<Fixup> = self.take_fixups(label);
        for fixup in pending {
            let rel = relative(fixup.at, offset)?;
            let at = fixup.at as usize;
            self.buf[at..at + 2].copy_from_slice(&rel.to_le_bytes());
        }
        Ok(())
    }

    /// Bind a label to "no target"; every use stays encoded as zero
    pub fn bind_null(&mut self, label: Label) -> Result<()> {
        self.set_label(label, LabelState::Null)?;
        self.take_fixups(label);
        Ok(())
    }

    /// Number of offset fields still waiting for a label
    pub fn pending_fixups(&self) -> usize {
        self.fixups.len()
    }

    /// Finish writing, failing if any label use was never resolved
    pub fn finish(self) -> Result<Bytes> {
        if let Some(fixup) = self.fixups.first() {
            return Err(FormatError::UnboundLabel(fixup.label.0));
        }
        Ok(self.buf.freeze())
    }

    fn set_label(&mut self, label: Label, state: LabelState) -> Result<()> {
        let slot = &mut self.labels[label.0 as usize];
        if *slot != LabelState::Unbound {
            return Err(FormatError::LabelRebound(label.0));
        }
        *slot = state;
        Ok(())
    }

    fn take_fixups(&mut self, label: Label) -> Vec<Fixup> {
        let (matching, rest): (Vec<Fixup>, Vec<Fixup>) =
            self.fixups.drain(..).partition(|f| f.label == label);
        self.fixups = rest;
        matching
    }
}

fn relative(at: u32, target: u32) -> Result<i16> {
    let rel = target as i64 - at as i64;
    i16::try_from(rel).map_err(|_| FormatError::OffsetOverflow { at, offset: rel })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_backward_offset() {
        let mut w = FormatWriter::new();
        w.put_u32(0);
        w.put_offset(Target::At(0)).unwrap();
        assert_eq!(&w.as_bytes()[4..], &(-4i16).to_le_bytes());
    }

    #[test]
    fn test_forward_label_patched() {
        let mut w = FormatWriter::new();
        let label = w.new_label();
        w.put_u8(0xaa);
        w.put_offset(Target::Label(label)).unwrap();
        assert_eq!(w.pending_fixups(), 1);
        w.put_slice(&[0; 7]);
        w.bind(label, 10).unwrap();
        assert_eq!(w.pending_fixups(), 0);
        assert_eq!(&w.as_bytes()[1..3], &9i16.to_le_bytes());

        // Uses after binding resolve immediately
        w.put_offset(Target::Label(label)).unwrap();
        assert_eq!(&w.as_bytes()[10..12], &0i16.to_le_bytes());
    }

    #[test]
    fn test_null_label_and_unbound() {
        let mut w = FormatWriter::new();
        let null = w.new_label();
        w.put_offset(Target::Label(null)).unwrap();
        w.bind_null(null).unwrap();
        assert_eq!(w.as_bytes(), &[0, 0]);
        assert_eq!(w.bind(null, 3), Err(FormatError::LabelRebound(0)));

        let dangling = w.new_label();
        w.put_offset(Target::Label(dangling)).unwrap();
        assert_eq!(w.finish(), Err(FormatError::UnboundLabel(1)));
    }

    #[test]
    fn test_put_end_even() {
        let mut w = FormatWriter::new();
        w.put_u8(1);
        w.put_end();
        assert_eq!(w.as_bytes(), &[1, 0x5b]);

        let mut w = FormatWriter::new();
        w.put_u16(1);
        w.put_end();
        assert_eq!(w.as_bytes(), &[1, 0, 0x5c, 0x5b]);
    }

    #[test]
    fn test_offset_overflow() {
        let mut w = FormatWriter::new();
        let err = w.put_offset(Target::At(40_000)).unwrap_err();
        assert!(err.is_capacity());
    }
}

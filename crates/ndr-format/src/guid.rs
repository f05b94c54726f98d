//! Interface identifiers

use crate::error::{FormatError, Result};
use bytes::BufMut;
use std::fmt;
use std::str::FromStr;

/// A GUID as declared by an `[uuid(...)]` attribute
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct Guid {
    pub data1: u32,
    pub data2: u16,
    pub data3: u16,
    pub data4: [u8; 8],
}

impl Guid {
    /// Parse from string format "xxxxxxxx-xxxx-xxxx-xxxx-xxxxxxxxxxxx"
    pub fn parse(s: &str) -> Option<Self> {
        let s = s.trim();
        if s.len() != 36 {
            return None;
        }
        let parts: Vec<&str> = s.split('-').collect();
        if parts.len() != 5 || parts[3].len() != 4 || parts[4].len() != 12 {
            return None;
        }

        let data1 = u32::from_str_radix(parts[0], 16).ok()?;
        let data2 = u16::from_str_radix(parts[1], 16).ok()?;
        let data3 = u16::from_str_radix(parts[2], 16).ok()?;
        let clock = u16::from_str_radix(parts[3], 16).ok()?;

        let mut data4 = [0u8; 8];
        data4[0] = (clock >> 8) as u8;
        data4[1] = clock as u8;
        for i in 0..6 {
            data4[i + 2] = u8::from_str_radix(&parts[4][i * 2..i * 2 + 2], 16).ok()?;
        }

        Some(Self {
            data1,
            data2,
            data3,
            data4,
        })
    }

    /// Encode the 16-byte in-memory layout the runtime compares against
    pub fn encode<B: BufMut>(&self, buf: &mut B) {
        buf.put_u32_le(self.data1);
        buf.put_u16_le(self.data2);
        buf.put_u16_le(self.data3);
        buf.put_slice(&self.data4);
    }

    /// Encode GUID to 16 bytes in little-endian format
    pub fn to_bytes_le(&self) -> [u8; 16] {
        let mut bytes = [0u8; 16];
        bytes[0..4].copy_from_slice(&self.data1.to_le_bytes());
        bytes[4..6].copy_from_slice(&self.data2.to_le_bytes());
        bytes[6..8].copy_from_slice(&self.data3.to_le_bytes());
        bytes[8..16].copy_from_slice(&self.data4);
        bytes
    }
}

impl FromStr for Guid {
    type Err = FormatError;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s).ok_or_else(|| FormatError::InvalidGuid(s.to_string()))
    }
}

impl fmt::Display for Guid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{:08x}-{:04x}-{:04x}-{:02x}{:02x}-",
            self.data1, self.data2, self.data3, self.data4[0], self.data4[1]
        )?;
        for b in &self.data4[2..] {
            write!(f, "{:02x}", b)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_and_display() {
        let text = "00000000-0000-0000-c000-000000000046";
        let guid = Guid::parse(text).unwrap();
        assert_eq!(guid.data1, 0);
        assert_eq!(guid.data4, [0xc0, 0, 0, 0, 0, 0, 0, 0x46]);
        assert_eq!(guid.to_string(), text);
    }

    #[test]
    fn test_little_endian_layout() {
        let guid: Guid = "12345678-9abc-def0-0102-030405060708".parse().unwrap();
        let bytes = guid.to_bytes_le();
        assert_eq!(&bytes[0..4], &[0x78, 0x56, 0x34, 0x12]);
        assert_eq!(&bytes[4..6], &[0xbc, 0x9a]);
        assert_eq!(&bytes[6..8], &[0xf0, 0xde]);
        assert_eq!(&bytes[8..], &[1, 2, 3, 4, 5, 6, 7, 8]);

        let mut buf = Vec::new();
        guid.encode(&mut buf);
        assert_eq!(buf, bytes.to_vec());
    }

    #[test]
    fn test_rejects_malformed() {
        assert!(Guid::parse("not-a-guid").is_none());
        assert!("12345678-9abc-def0-0102-03040506070".parse::<Guid>().is_err());
    }
}

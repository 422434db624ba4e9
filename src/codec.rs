//! Byte-level helpers shared by the pvAccess wire encodings in this crate.
//!
//! pvAccess does not fix the byte order of a connection; each side announces it
//! during the handshake. Everything here therefore takes a [`nom::number::Endianness`]
//! rather than assuming big-endian like Channel Access does.

use std::io::{self, Write};

use nom::{
    IResult, Parser,
    error::{Error, ErrorKind},
    number::{Endianness, complete as number},
};

/// Marker byte for a null (absent) size
const NULL_SIZE: u8 = 0xFF;
/// Marker byte announcing a 32-bit size follows
const LONG_SIZE: u8 = 0xFE;

/// Ties nom parsing and writing of a value to a single type, for a given byte order.
pub trait PVSerialize {
    fn parse(input: &[u8], endian: Endianness) -> IResult<&[u8], Self>
    where
        Self: Sized;

    fn write<W: Write>(&self, writer: &mut W, endian: Endianness) -> io::Result<()>;

    /// Convenience: serialize into a fresh byte vector
    fn to_bytes(&self, endian: Endianness) -> Vec<u8> {
        let mut buffer = Vec::new();
        // Writing into a Vec cannot fail
        let _ = self.write(&mut buffer, endian);
        buffer
    }
}

fn is_big(endian: Endianness) -> bool {
    match endian {
        Endianness::Big => true,
        Endianness::Little => false,
        Endianness::Native => cfg!(target_endian = "big"),
    }
}

pub(crate) fn u64_bytes(value: u64, endian: Endianness) -> [u8; 8] {
    if is_big(endian) {
        value.to_be_bytes()
    } else {
        value.to_le_bytes()
    }
}

pub(crate) fn i32_bytes(value: i32, endian: Endianness) -> [u8; 4] {
    if is_big(endian) {
        value.to_be_bytes()
    } else {
        value.to_le_bytes()
    }
}

/// Write a pvAccess variable-length size.
///
/// `None` is the null marker. Sizes below 254 take one byte, anything else is
/// the 0xFE marker followed by a signed 32-bit count.
pub fn write_size<W: Write>(
    size: Option<usize>,
    writer: &mut W,
    endian: Endianness,
) -> io::Result<()> {
    match size {
        None => writer.write_all(&[NULL_SIZE]),
        Some(size) if size < LONG_SIZE as usize => writer.write_all(&[size as u8]),
        Some(size) => {
            let size = i32::try_from(size).map_err(|_| {
                io::Error::new(
                    io::ErrorKind::InvalidInput,
                    format!("Size {size} does not fit a pvAccess size field"),
                )
            })?;
            writer.write_all(&[LONG_SIZE])?;
            writer.write_all(&i32_bytes(size, endian))
        }
    }
}

/// Parse a pvAccess variable-length size, the inverse of [`write_size`]
pub fn parse_size(input: &[u8], endian: Endianness) -> IResult<&[u8], Option<usize>> {
    let (input, marker) = number::u8::<&[u8], Error<&[u8]>>.parse(input)?;
    match marker {
        NULL_SIZE => Ok((input, None)),
        LONG_SIZE => {
            let (rest, size) = number::i32::<&[u8], Error<&[u8]>>(endian).parse(input)?;
            if size < 0 {
                return Err(nom::Err::Error(Error::new(input, ErrorKind::Verify)));
            }
            Ok((rest, Some(size as usize)))
        }
        size => Ok((input, Some(size as usize))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn size_bytes(size: Option<usize>, endian: Endianness) -> Vec<u8> {
        let mut buffer = Vec::new();
        write_size(size, &mut buffer, endian).unwrap();
        buffer
    }

    #[test]
    fn size_encoding() {
        assert_eq!(size_bytes(None, Endianness::Big), vec![0xFF]);
        assert_eq!(size_bytes(Some(0), Endianness::Big), vec![0x00]);
        assert_eq!(size_bytes(Some(253), Endianness::Big), vec![0xFD]);
        assert_eq!(
            size_bytes(Some(254), Endianness::Big),
            vec![0xFE, 0x00, 0x00, 0x00, 0xFE]
        );
        assert_eq!(
            size_bytes(Some(0x1234), Endianness::Little),
            vec![0xFE, 0x34, 0x12, 0x00, 0x00]
        );
    }

    #[test]
    fn size_parsing() {
        for endian in [Endianness::Big, Endianness::Little] {
            for size in [None, Some(0), Some(17), Some(253), Some(254), Some(70000)] {
                let data = size_bytes(size, endian);
                let (rest, parsed) = parse_size(&data, endian).unwrap();
                assert!(rest.is_empty());
                assert_eq!(parsed, size);
            }
        }
        // Negative long sizes are rejected
        assert!(parse_size(&[0xFE, 0xFF, 0xFF, 0xFF, 0xFF], Endianness::Big).is_err());
        // Truncated
        assert!(parse_size(&[0xFE, 0x00], Endianness::Big).is_err());
        assert!(parse_size(&[], Endianness::Big).is_err());
    }
}

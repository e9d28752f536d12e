//! The byte-granular stream abstraction the core codec is built against.
//!
//! The actual buffered, optionally-compressed byte stream is an external
//! collaborator owned by the surrounding application; what the core depends
//! on is the *contract*: seekable byte/word/int/int64/string/double reads and
//! writes. [`GdxRead`]/[`GdxWrite`] are that contract, implemented as blanket
//! extension traits layered over a plain `Read + Seek` / `Write + Seek`
//! bound. A symbol's `compressed` flag is carried as wire metadata, but the
//! byte-level (de)compression it would gate stays with that external stream.

use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use std::io::{self, Read, Seek, Write};

/// Typed reads over a seekable byte stream.
pub trait GdxRead: Read + Seek {
    fn read_byte(&mut self) -> io::Result<u8> {
        self.read_u8()
    }

    fn read_word(&mut self) -> io::Result<u16> {
        self.read_u16::<LittleEndian>()
    }

    fn read_int(&mut self) -> io::Result<i32> {
        self.read_i32::<LittleEndian>()
    }

    fn read_int64(&mut self) -> io::Result<i64> {
        self.read_i64::<LittleEndian>()
    }

    fn read_double(&mut self) -> io::Result<f64> {
        self.read_f64::<LittleEndian>()
    }

    /// One length byte (`0..=255`) followed by that many bytes of content —
    /// the encoding used for every length-prefixed string on the wire.
    fn read_gdx_string(&mut self) -> io::Result<String> {
        let len = self.read_byte()? as usize;
        let mut buf = vec![0u8; len];
        self.read_exact(&mut buf)?;
        Ok(String::from_utf8_lossy(&buf).into_owned())
    }

    /// Reads and asserts an exact marker string (e.g. `"_SYMB_"`), returning
    /// a mismatch as `Ok(false)` rather than an error — callers decide which
    /// [`crate::error::GdxErrorCode`] a given marker failure maps to.
    fn expect_marker(&mut self, marker: &str) -> io::Result<bool> {
        Ok(self.read_gdx_string()? == marker)
    }
}

impl<T: Read + Seek + ?Sized> GdxRead for T {}

/// Typed writes over a seekable byte stream.
pub trait GdxWrite: Write + Seek {
    fn write_byte(&mut self, v: u8) -> io::Result<()> {
        self.write_u8(v)
    }

    fn write_word(&mut self, v: u16) -> io::Result<()> {
        self.write_u16::<LittleEndian>(v)
    }

    fn write_int(&mut self, v: i32) -> io::Result<()> {
        self.write_i32::<LittleEndian>(v)
    }

    fn write_int64(&mut self, v: i64) -> io::Result<()> {
        self.write_i64::<LittleEndian>(v)
    }

    fn write_double(&mut self, v: f64) -> io::Result<()> {
        self.write_f64::<LittleEndian>(v)
    }

    fn write_gdx_string(&mut self, s: &str) -> io::Result<()> {
        let bytes = s.as_bytes();
        debug_assert!(bytes.len() <= 255, "GDX strings are length-prefixed by a single byte");
        let len = bytes.len().min(255);
        self.write_byte(len as u8)?;
        self.write_all(&bytes[..len])
    }
}

impl<T: Write + Seek + ?Sized> GdxWrite for T {}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    #[test]
    fn string_round_trips() {
        let mut buf = Cursor::new(Vec::new());
        buf.write_gdx_string("seattle").unwrap();
        buf.set_position(0);
        assert_eq!(buf.read_gdx_string().unwrap(), "seattle");
    }

    #[test]
    fn empty_string_round_trips() {
        let mut buf = Cursor::new(Vec::new());
        buf.write_gdx_string("").unwrap();
        buf.set_position(0);
        assert_eq!(buf.read_gdx_string().unwrap(), "");
    }

    #[test]
    fn typed_values_round_trip() {
        let mut buf = Cursor::new(Vec::new());
        buf.write_byte(7).unwrap();
        buf.write_word(40000).unwrap();
        buf.write_int(-12345).unwrap();
        buf.write_int64(9_000_000_000).unwrap();
        buf.write_double(3.5).unwrap();
        buf.set_position(0);
        assert_eq!(buf.read_byte().unwrap(), 7);
        assert_eq!(buf.read_word().unwrap(), 40000);
        assert_eq!(buf.read_int().unwrap(), -12345);
        assert_eq!(buf.read_int64().unwrap(), 9_000_000_000);
        assert_eq!(buf.read_double().unwrap(), 3.5);
    }

    #[test]
    fn marker_mismatch_is_reported_not_erred() {
        let mut buf = Cursor::new(Vec::new());
        buf.write_gdx_string("_SETT_").unwrap();
        buf.set_position(0);
        assert!(!buf.expect_marker("_SYMB_").unwrap());
    }
}

//! Record-stream codec: delta-compressed keys plus the ten-case value
//! indicator byte.
//!
//! Two key-write paths: a `255 - dim - 1` fast path for a same-dimension
//! delta, and a general path that re-emits every key from `first_changed_dim`
//! onward at its dimension's chosen width. Values use a ten-case indicator
//! byte (a byte tag, optionally followed by a raw double).

use std::io::{self, Read, Seek, Write};

use crate::acronym::ACRONYM_BASE;
use crate::config::SpecialValues;
use crate::stream::{GdxRead, GdxWrite};
use crate::util::IntWidth;

/// `first_changed_dim == dim` fast path upper bound for the last
/// dimension's delta.
fn delta_for_write(dim: usize) -> i32 {
    255 - dim as i32 - 1
}

const TERMINATOR: u8 = 255;

/// Per-dimension `(min, max)` bounds recorded in the `_DATA_` header,
/// selecting the delta encoding width.
#[derive(Debug, Clone)]
pub struct KeyBounds {
    pub min: Vec<i32>,
    pub max: Vec<i32>,
}

impl KeyBounds {
    pub fn width(&self, d: usize) -> IntWidth {
        IntWidth::for_span((self.max[d] - self.min[d]) as i64)
    }

    pub fn write(&self, w: &mut impl GdxWrite) -> io::Result<()> {
        for d in 0..self.min.len() {
            w.write_int(self.min[d])?;
            w.write_int(self.max[d])?;
        }
        Ok(())
    }

    pub fn read(r: &mut impl GdxRead, dim: usize) -> io::Result<Self> {
        let mut min = Vec::with_capacity(dim);
        let mut max = Vec::with_capacity(dim);
        for _ in 0..dim {
            min.push(r.read_int()?);
            max.push(r.read_int()?);
        }
        Ok(KeyBounds { min, max })
    }
}

/// Indicator byte classes for a single value slot. `Normal` covers every
/// other finite double and is followed by the raw IEEE-754 bytes on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ValueClass {
    Undef,
    Na,
    PosInf,
    NegInf,
    Eps,
    Zero,
    One,
    MinusOne,
    Half,
    Two,
    Normal,
}

const CLASS_ORDER: [ValueClass; 10] = [
    ValueClass::Undef,
    ValueClass::Na,
    ValueClass::PosInf,
    ValueClass::NegInf,
    ValueClass::Eps,
    ValueClass::Zero,
    ValueClass::One,
    ValueClass::MinusOne,
    ValueClass::Half,
    ValueClass::Two,
];

fn classify(v: f64, sv: &SpecialValues) -> ValueClass {
    let bits = v.to_bits();
    if bits == sv.undef.to_bits() {
        return ValueClass::Undef;
    }
    if bits == sv.na.to_bits() {
        return ValueClass::Na;
    }
    if bits == sv.posinf.to_bits() {
        return ValueClass::PosInf;
    }
    if bits == sv.neginf.to_bits() {
        return ValueClass::NegInf;
    }
    if bits == sv.eps.to_bits() {
        return ValueClass::Eps;
    }
    if v == 0.0 {
        return ValueClass::Zero;
    }
    if v == 1.0 {
        return ValueClass::One;
    }
    if v == -1.0 {
        return ValueClass::MinusOne;
    }
    if v == 0.5 {
        return ValueClass::Half;
    }
    if v == 2.0 {
        return ValueClass::Two;
    }
    // Special values take priority over the small-constant shortcuts above
    // when a caller has overridden e.g. `eps` to equal `0.0` -- the bit
    // comparisons already ran first, so falling through here is safe.
    if v.is_nan() {
        return ValueClass::Na;
    }
    if v.is_infinite() {
        return if v > 0.0 { ValueClass::PosInf } else { ValueClass::NegInf };
    }
    ValueClass::Normal
}

fn canonical(class: ValueClass, sv: &SpecialValues) -> f64 {
    match class {
        ValueClass::Undef => sv.undef,
        ValueClass::Na => sv.na,
        ValueClass::PosInf => sv.posinf,
        ValueClass::NegInf => sv.neginf,
        ValueClass::Eps => sv.eps,
        ValueClass::Zero => 0.0,
        ValueClass::One => 1.0,
        ValueClass::MinusOne => -1.0,
        ValueClass::Half => 0.5,
        ValueClass::Two => 2.0,
        ValueClass::Normal => unreachable!("Normal has no canonical constant"),
    }
}

/// Writes one value slot's indicator byte (and, for `Normal`, the raw
/// double). Returns `true` when an acronym encoding was written, so the
/// caller can register it on the needs-remap list.
pub fn write_value(w: &mut impl GdxWrite, v: f64, sv: &SpecialValues) -> io::Result<bool> {
    let class = classify(v, sv);
    match CLASS_ORDER.iter().position(|&c| c == class) {
        Some(idx) => {
            w.write_byte(idx as u8)?;
            Ok(false)
        }
        None => {
            w.write_byte(10)?;
            w.write_double(v)?;
            Ok(v.is_finite() && v.abs() >= ACRONYM_BASE)
        }
    }
}

/// Reads one value slot, resolving special-value indicator bytes 0..=9
/// through `sv` and returning the raw double for indicator 10.
pub fn read_value(r: &mut impl GdxRead, sv: &SpecialValues) -> io::Result<f64> {
    let tag = r.read_byte()?;
    if tag == 10 {
        r.read_double()
    } else {
        match CLASS_ORDER.get(tag as usize) {
            Some(&class) => Ok(canonical(class, sv)),
            None => Err(io::Error::new(io::ErrorKind::InvalidData, format!("bad value indicator byte {tag}"))),
        }
    }
}

/// Key-delta write state for one symbol's record block.
pub struct KeyWriter {
    dim: usize,
    bounds: KeyBounds,
    last: Vec<i32>,
    count: i64,
}

impl KeyWriter {
    pub fn new(dim: usize, bounds: KeyBounds) -> Self {
        KeyWriter {
            dim,
            bounds,
            last: vec![-256; dim],
            count: 0,
        }
    }

    /// Writes one record's keys, using the fast path when only the last
    /// dimension changed by a small-enough delta, else the general path.
    pub fn write_keys(&mut self, w: &mut impl GdxWrite, keys: &[i32]) -> io::Result<()> {
        debug_assert_eq!(keys.len(), self.dim);
        let mut first_changed = self.dim + 1;
        for d in 0..self.dim {
            if keys[d] != self.last[d] {
                first_changed = d + 1;
                break;
            }
        }
        if first_changed > self.dim {
            // Nothing changed: first record of a scalar, or an exact repeat
            // (callers divert repeats to the error list before calling us).
            w.write_byte(1)?;
        } else if first_changed == self.dim
            && keys[self.dim - 1] - self.last[self.dim - 1] > 0
            && keys[self.dim - 1] - self.last[self.dim - 1] <= delta_for_write(self.dim)
        {
            let delta = keys[self.dim - 1] - self.last[self.dim - 1];
            w.write_byte((self.dim as i32 + delta) as u8)?;
            self.last[self.dim - 1] = keys[self.dim - 1];
            self.count += 1;
            return Ok(());
        } else {
            self.write_general(w, first_changed, keys)?;
        }
        self.count += 1;
        Ok(())
    }

    fn write_general(&mut self, w: &mut impl GdxWrite, first_changed: usize, keys: &[i32]) -> io::Result<()> {
        w.write_byte(first_changed as u8)?;
        for d in (first_changed - 1)..self.dim {
            let v = keys[d] - self.bounds.min[d];
            match self.bounds.width(d) {
                IntWidth::Byte => w.write_byte(v as u8)?,
                IntWidth::Word => w.write_word(v as u16)?,
                IntWidth::Int => w.write_int(v)?,
            }
            self.last[d] = keys[d];
        }
        Ok(())
    }

    pub fn finish(self, w: &mut impl GdxWrite) -> io::Result<i64> {
        w.write_byte(TERMINATOR)?;
        Ok(self.count)
    }
}

/// Key-delta read state, mirroring [`KeyWriter`].
pub struct KeyReader {
    dim: usize,
    bounds: KeyBounds,
    last: Vec<i32>,
}

impl KeyReader {
    pub fn new(dim: usize, bounds: KeyBounds) -> Self {
        KeyReader {
            dim,
            last: vec![0; dim],
            bounds,
        }
    }

    /// Reads one record's keys into `self.last`, returning `None` at the
    /// `255` terminator.
    pub fn read_keys(&mut self, r: &mut impl GdxRead) -> io::Result<Option<&[i32]>> {
        let b = r.read_byte()?;
        if b == TERMINATOR {
            return Ok(None);
        }
        if b as usize > self.dim {
            let delta = b as i32 - self.dim as i32;
            if self.dim > 0 {
                self.last[self.dim - 1] += delta;
            }
        } else {
            let first_changed = b as usize;
            for d in (first_changed - 1)..self.dim {
                let raw = match self.bounds.width(d) {
                    IntWidth::Byte => r.read_byte()? as i32,
                    IntWidth::Word => r.read_word()? as i32,
                    IntWidth::Int => r.read_int()?,
                };
                self.last[d] = raw + self.bounds.min[d];
            }
        }
        Ok(Some(&self.last))
    }
}

/// Writes a `_DATA_` block header: marker, dim byte, record count (may be
/// `-1` if unknown up front) and per-dimension bounds.
pub fn write_block_header(
    w: &mut (impl GdxWrite + Seek),
    dim: usize,
    record_count: i32,
    bounds: &KeyBounds,
) -> io::Result<u64> {
    w.write_gdx_string("_DATA_")?;
    w.write_byte(dim as u8)?;
    w.write_int(record_count)?;
    bounds.write(w)?;
    w.stream_position()
}

/// Reads a `_DATA_` block header, returning `(dim, record_count, bounds)`.
pub fn read_block_header(r: &mut impl GdxRead) -> io::Result<(usize, i32, KeyBounds)> {
    if !r.expect_marker("_DATA_")? {
        return Err(io::Error::new(io::ErrorKind::InvalidData, "bad _DATA_ marker"));
    }
    let dim = r.read_byte()? as usize;
    let record_count = r.read_int()?;
    let bounds = KeyBounds::read(r, dim)?;
    Ok((dim, record_count, bounds))
}

/// Patches a previously-reserved `i32` record-count slot, the way the
/// original seeks back after `DataCount` is finally known.
pub fn patch_record_count(w: &mut (impl Write + Seek), at: u64, count: i32) -> io::Result<()> {
    let cur = w.stream_position()?;
    w.seek(io::SeekFrom::Start(at))?;
    w.write_all(&count.to_le_bytes())?;
    w.seek(io::SeekFrom::Start(cur))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    fn sv() -> SpecialValues {
        SpecialValues::default()
    }

    #[test]
    fn special_values_round_trip() {
        let sv = sv();
        for v in [sv.undef, sv.na, sv.posinf, sv.neginf, sv.eps] {
            let mut buf = Cursor::new(Vec::new());
            write_value(&mut buf, v, &sv).unwrap();
            buf.set_position(0);
            let back = read_value(&mut buf, &sv).unwrap();
            assert_eq!(back.to_bits(), v.to_bits());
        }
    }

    #[test]
    fn small_constants_round_trip_without_double_payload() {
        let sv = sv();
        for v in [0.0, 1.0, -1.0, 0.5, 2.0] {
            let mut buf = Cursor::new(Vec::new());
            write_value(&mut buf, v, &sv).unwrap();
            assert_eq!(buf.get_ref().len(), 1);
            buf.set_position(0);
            assert_eq!(read_value(&mut buf, &sv).unwrap(), v);
        }
    }

    #[test]
    fn normal_value_round_trips_with_double_payload() {
        let sv = sv();
        let mut buf = Cursor::new(Vec::new());
        write_value(&mut buf, 23.0, &sv).unwrap();
        assert_eq!(buf.get_ref().len(), 9);
        buf.set_position(0);
        assert_eq!(read_value(&mut buf, &sv).unwrap(), 23.0);
    }

    #[test]
    fn acronym_encoded_value_is_flagged_for_remap() {
        let sv = sv();
        let mut buf = Cursor::new(Vec::new());
        let flagged = write_value(&mut buf, crate::acronym::encode(3), &sv).unwrap();
        assert!(flagged);
    }

    #[test]
    fn keys_round_trip_across_widths() {
        for max in [10, 300, 70000] {
            let dim = 1;
            let bounds = KeyBounds { min: vec![0], max: vec![max] };
            let mut buf = Cursor::new(Vec::new());
            let mut kw = KeyWriter::new(dim, bounds.clone());
            kw.write_keys(&mut buf, &[0]).unwrap();
            kw.write_keys(&mut buf, &[max]).unwrap();
            kw.finish(&mut buf).unwrap();
            buf.set_position(0);
            let mut kr = KeyReader::new(dim, bounds);
            let first = kr.read_keys(&mut buf).unwrap().unwrap().to_vec();
            assert_eq!(first, vec![0]);
            let second = kr.read_keys(&mut buf).unwrap().unwrap().to_vec();
            assert_eq!(second, vec![max]);
            assert!(kr.read_keys(&mut buf).unwrap().is_none());
        }
    }

    #[test]
    fn fast_path_handles_consecutive_last_dim_deltas() {
        let dim = 2;
        let bounds = KeyBounds { min: vec![0, 0], max: vec![5, 5] };
        let mut buf = Cursor::new(Vec::new());
        let mut kw = KeyWriter::new(dim, bounds.clone());
        kw.write_keys(&mut buf, &[1, 1]).unwrap();
        kw.write_keys(&mut buf, &[1, 2]).unwrap();
        kw.write_keys(&mut buf, &[1, 5]).unwrap();
        kw.finish(&mut buf).unwrap();
        buf.set_position(0);
        let mut kr = KeyReader::new(dim, bounds);
        assert_eq!(kr.read_keys(&mut buf).unwrap().unwrap(), &[1, 1]);
        assert_eq!(kr.read_keys(&mut buf).unwrap().unwrap(), &[1, 2]);
        assert_eq!(kr.read_keys(&mut buf).unwrap().unwrap(), &[1, 5]);
        assert!(kr.read_keys(&mut buf).unwrap().is_none());
    }

    #[test]
    fn scalar_block_has_a_single_prefix_byte_record() {
        let bounds = KeyBounds { min: vec![], max: vec![] };
        let mut buf = Cursor::new(Vec::new());
        let mut kw = KeyWriter::new(0, bounds.clone());
        kw.write_keys(&mut buf, &[]).unwrap();
        kw.finish(&mut buf).unwrap();
        buf.set_position(0);
        let mut kr = KeyReader::new(0, bounds);
        assert_eq!(kr.read_keys(&mut buf).unwrap().unwrap(), &[] as &[i32]);
        assert!(kr.read_keys(&mut buf).unwrap().is_none());
    }
}

//! Symbol write/read session state machines.
//!
//! A session is a coroutine-like iterator: opened once per symbol, fed or
//! asked for records one at a time, then closed. Raw mode streams straight
//! through [`crate::codec`]; mapped and string modes buffer into a
//! [`crate::accumulator::Accumulator`] and only touch the stream once
//! sorted.

use std::io;

use crate::accumulator::Accumulator;
use crate::codec::{self, KeyBounds, KeyReader, KeyWriter};
use crate::config::SpecialValues;
use crate::error::{Error, GdxErrorCode};
use crate::error_record::ErrorRecordList;
use crate::stream::{GdxRead, GdxWrite};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteMode {
    Raw,
    Mapped,
    String,
}

/// A symbol write session. On-disk keys are always storage indices: mapped
/// mode resolves user indices down to storage indices before buffering,
/// string mode interns labels down to storage indices.
pub struct WriteSession {
    dim: usize,
    val_count: usize,
    mode: WriteMode,
    wr_bitmap: Vec<Option<Vec<bool>>>,
    special: SpecialValues,
    errors: ErrorRecordList,
    last_key: Option<Vec<i32>>,
    record_count: i64,
    /// The record to synthesize for a dim-0 symbol that closes without the
    /// caller ever writing one: a scalar's record block always holds
    /// exactly one record.
    scalar_default: Vec<f64>,
    /// Storage-index keys actually committed for a dim-1 session, used to
    /// build the owning set's write-time membership bitmap on close.
    written_keys: Vec<i32>,
    // Raw-mode streaming state, live from `start_raw` onward.
    raw: Option<RawState>,
    // Mapped/string buffering state.
    accumulator: Option<Accumulator>,
}

struct RawState {
    key_writer: KeyWriter,
    count_patch_pos: u64,
}

impl WriteSession {
    fn new(
        dim: usize,
        val_count: usize,
        mode: WriteMode,
        wr_bitmap: Vec<Option<Vec<bool>>>,
        special: SpecialValues,
        scalar_default: Vec<f64>,
    ) -> Self {
        WriteSession {
            dim,
            val_count,
            mode,
            wr_bitmap,
            special,
            errors: ErrorRecordList::new(),
            last_key: None,
            record_count: 0,
            scalar_default,
            written_keys: Vec::new(),
            raw: None,
            accumulator: None,
        }
    }

    /// Opens a raw-mode session, writing the `_DATA_` header immediately
    /// with unconstrained `(0, i32::MAX)` bounds per dimension.
    pub fn start_raw(
        w: &mut (impl GdxWrite + io::Seek),
        dim: usize,
        val_count: usize,
        wr_bitmap: Vec<Option<Vec<bool>>>,
        special: SpecialValues,
        scalar_default: Vec<f64>,
    ) -> io::Result<Self> {
        let bounds = KeyBounds {
            min: vec![0; dim],
            max: vec![i32::MAX; dim],
        };
        let count_patch_pos = {
            w.write_gdx_string("_DATA_")?;
            w.write_byte(dim as u8)?;
            let pos = io::Seek::stream_position(w)?;
            w.write_int(-1)?;
            bounds.write(w)?;
            pos
        };
        let mut session = WriteSession::new(dim, val_count, WriteMode::Raw, wr_bitmap, special, scalar_default);
        session.raw = Some(RawState {
            key_writer: KeyWriter::new(dim, bounds),
            count_patch_pos,
        });
        Ok(session)
    }

    pub fn start_buffered(
        mode: WriteMode,
        dim: usize,
        val_count: usize,
        wr_bitmap: Vec<Option<Vec<bool>>>,
        special: SpecialValues,
        scalar_default: Vec<f64>,
    ) -> Self {
        debug_assert!(mode != WriteMode::Raw);
        let mut session = WriteSession::new(dim, val_count, mode, wr_bitmap, special, scalar_default);
        session.accumulator = Some(Accumulator::new(dim, val_count));
        session
    }

    pub fn errors(&self) -> &ErrorRecordList {
        &self.errors
    }

    /// Installs a freshly-registered domain's write-time membership bitmap
    /// on an already-open session. Domain registration can run between a
    /// symbol's write start and its first data call.
    pub fn set_wr_bitmap(&mut self, wr_bitmap: Vec<Option<Vec<bool>>>) {
        self.wr_bitmap = wr_bitmap;
    }

    fn domain_violations(&self, keys: &[i32]) -> Option<Vec<bool>> {
        if self.wr_bitmap.iter().all(Option::is_none) {
            return None;
        }
        let mut any = false;
        let flags: Vec<bool> = self
            .wr_bitmap
            .iter()
            .zip(keys.iter())
            .map(|(bm, &k)| {
                let bad = match bm {
                    Some(bits) => !(k >= 1 && (k as usize) <= bits.len() && bits[(k - 1) as usize]),
                    None => false,
                };
                any |= bad;
                bad
            })
            .collect();
        if any {
            Some(flags)
        } else {
            None
        }
    }

    /// Buffers one record for mapped/string mode. Keys must already be
    /// resolved down to storage indices by the caller.
    pub fn push_buffered(&mut self, keys: &[i32], values: &[f64]) {
        self.accumulator.as_mut().expect("push_buffered on raw session").push(keys, values);
    }

    /// Writes (or diverts to the error list) one record in raw mode.
    pub fn write_raw(&mut self, w: &mut (impl GdxWrite + io::Seek), keys: &[i32], values: &[f64]) -> io::Result<()> {
        self.emit(w, keys, values)
    }

    fn emit(&mut self, w: &mut (impl GdxWrite + io::Seek), keys: &[i32], values: &[f64]) -> io::Result<()> {
        if let Some(violations) = self.domain_violations(keys) {
            self.errors.push_domain_violation(keys, values, &violations);
            return Ok(());
        }
        let ordering = self.last_key.as_deref().map(|last| keys.cmp(last));
        match ordering {
            Some(std::cmp::Ordering::Less) => {
                self.errors.push(keys, values);
                return Ok(());
            }
            Some(std::cmp::Ordering::Equal) => {
                self.errors.push(keys, values);
                return Ok(());
            }
            _ => {}
        }
        let raw = self.raw.as_mut().expect("emit requires an open raw writer");
        raw.key_writer.write_keys(w, keys)?;
        for &v in values.iter().take(self.val_count) {
            codec::write_value(w, v, &self.special)?;
        }
        if self.dim == 1 {
            self.written_keys.push(keys[0]);
        }
        self.last_key = Some(keys.to_vec());
        self.record_count += 1;
        Ok(())
    }

    /// Finalizes the session: raw mode writes the terminator and patches
    /// the record count; mapped/string mode sorts the accumulator, then
    /// replays every record through [`Self::emit`] as if it were raw.
    pub fn finish(mut self, w: &mut (impl GdxWrite + io::Seek)) -> io::Result<(i64, ErrorRecordList, Vec<i32>)> {
        match self.mode {
            WriteMode::Raw => {
                if self.dim == 0 && self.record_count == 0 {
                    let default = self.scalar_default.clone();
                    self.emit(w, &[], &default)?;
                }
                let raw = self.raw.take().expect("raw session missing state");
                w.write_byte(255)?;
                codec::patch_record_count(w, raw.count_patch_pos, self.record_count as i32)?;
            }
            WriteMode::Mapped | WriteMode::String => {
                let mut acc = self.accumulator.take().expect("buffered session missing accumulator");
                let mut records: Vec<(Vec<i32>, Vec<f64>)> = acc
                    .start_read(None)
                    .map(|r| (r.keys.clone(), r.values.clone()))
                    .collect();
                if self.dim == 0 && records.is_empty() {
                    records.push((Vec::new(), self.scalar_default.clone()));
                }
                let (min, max) = if records.is_empty() {
                    (vec![0; self.dim], vec![0; self.dim])
                } else {
                    let mut min = vec![i32::MAX; self.dim];
                    let mut max = vec![0; self.dim];
                    for (keys, _) in &records {
                        for d in 0..self.dim {
                            min[d] = min[d].min(keys[d]);
                            max[d] = max[d].max(keys[d]);
                        }
                    }
                    (min, max)
                };
                let bounds = KeyBounds { min, max };
                let count_patch_pos = {
                    w.write_gdx_string("_DATA_")?;
                    w.write_byte(self.dim as u8)?;
                    let pos = io::Seek::stream_position(w)?;
                    w.write_int(-1)?;
                    bounds.write(w)?;
                    pos
                };
                self.raw = Some(RawState {
                    key_writer: KeyWriter::new(self.dim, bounds),
                    count_patch_pos,
                });
                for (keys, values) in records {
                    self.emit(w, &keys, &values)?;
                }
                let raw = self.raw.take().unwrap();
                w.write_byte(255)?;
                codec::patch_record_count(w, raw.count_patch_pos, self.record_count as i32)?;
            }
        }
        Ok((self.record_count, self.errors, self.written_keys))
    }
}

/// Per-dimension action for a read session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReadAction {
    /// Pass raw storage indices through unchanged.
    Unmapped,
    /// Map to user index; if absent, allocate a new one.
    Expand,
    /// Map to user index; if absent, divert to the error list.
    Strict,
    /// Map to user index through filter `nr`; entries outside the filter
    /// (or unmapped altogether) divert.
    Filter(i32),
}

pub struct ReadSession {
    dim: usize,
    val_count: usize,
    reader: KeyReader,
    special: SpecialValues,
    errors: ErrorRecordList,
    exhausted: bool,
}

impl ReadSession {
    pub fn open(r: &mut impl GdxRead, special: SpecialValues) -> io::Result<Self> {
        let (dim, _record_count, bounds) = codec::read_block_header(r)?;
        Ok(ReadSession {
            dim,
            val_count: 0,
            reader: KeyReader::new(dim, bounds),
            special,
            errors: ErrorRecordList::new(),
            exhausted: false,
        })
    }

    pub fn with_val_count(mut self, val_count: usize) -> Self {
        self.val_count = val_count;
        self
    }

    pub fn dim(&self) -> usize {
        self.dim
    }

    pub fn errors(&self) -> &ErrorRecordList {
        &self.errors
    }

    pub fn errors_mut(&mut self) -> &mut ErrorRecordList {
        &mut self.errors
    }

    /// Reads the next raw record (storage-index keys, no action applied).
    /// Caller applies [`ReadAction`] resolution with the UEL table.
    pub fn next_raw(&mut self, r: &mut impl GdxRead) -> io::Result<Option<(Vec<i32>, Vec<f64>)>> {
        if self.exhausted {
            return Ok(None);
        }
        let keys = match self.reader.read_keys(r)? {
            Some(k) => k.to_vec(),
            None => {
                self.exhausted = true;
                return Ok(None);
            }
        };
        let mut values = Vec::with_capacity(self.val_count);
        for _ in 0..self.val_count {
            values.push(codec::read_value(r, &self.special)?);
        }
        Ok(Some((keys, values)))
    }
}

/// Resolves one dimension's storage index under `action`, given the UEL
/// table's `storage_to_user` lookup and an optional filter membership
/// check. Returns `None` when the record should divert to the error list.
pub fn resolve_action(
    action: ReadAction,
    storage_idx: i32,
    storage_to_user: impl Fn(i32) -> i32,
    mut new_user_uel: impl FnMut(i32) -> i32,
    filter_contains: impl Fn(i32, i32) -> bool,
) -> Option<i32> {
    match action {
        ReadAction::Unmapped => Some(storage_idx),
        ReadAction::Expand => {
            let u = storage_to_user(storage_idx);
            if u >= 0 {
                Some(u)
            } else {
                Some(new_user_uel(storage_idx))
            }
        }
        ReadAction::Strict => {
            let u = storage_to_user(storage_idx);
            if u >= 0 {
                Some(u)
            } else {
                None
            }
        }
        ReadAction::Filter(nr) => {
            let u = storage_to_user(storage_idx);
            if u >= 0 && filter_contains(nr, u) {
                Some(u)
            } else {
                None
            }
        }
    }
}

pub fn mode_requires_sort(actions: &[ReadAction], user_map_is_identity: bool) -> bool {
    actions.iter().any(|a| !matches!(a, ReadAction::Unmapped)) && !user_map_is_identity
}

pub fn bad_mode() -> Error {
    Error::Code(GdxErrorCode::BadMode)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stream::GdxWrite as _;
    use std::io::Cursor;

    fn sv() -> SpecialValues {
        SpecialValues::default()
    }

    #[test]
    fn raw_write_then_read_round_trips_in_order() {
        let mut buf = Cursor::new(Vec::new());
        let mut session = WriteSession::start_raw(&mut buf, 1, 1, vec![None], sv(), vec![0.0]).unwrap();
        session.write_raw(&mut buf, &[1], &[10.0]).unwrap();
        session.write_raw(&mut buf, &[2], &[20.0]).unwrap();
        session.write_raw(&mut buf, &[5], &[50.0]).unwrap();
        let (count, errors, written_keys) = session.finish(&mut buf).unwrap();
        assert_eq!(count, 3);
        assert_eq!(errors.count(), 0);
        assert_eq!(written_keys, vec![1, 2, 5]);

        buf.set_position(0);
        let mut read = ReadSession::open(&mut buf, sv()).unwrap().with_val_count(1);
        let mut out = Vec::new();
        while let Some((keys, values)) = read.next_raw(&mut buf).unwrap() {
            out.push((keys[0], values[0]));
        }
        assert_eq!(out, vec![(1, 10.0), (2, 20.0), (5, 50.0)]);
    }

    #[test]
    fn out_of_order_raw_write_diverts_to_error_list() {
        let mut buf = Cursor::new(Vec::new());
        let mut session = WriteSession::start_raw(&mut buf, 1, 1, vec![None], sv(), vec![0.0]).unwrap();
        session.write_raw(&mut buf, &[1], &[1.0]).unwrap();
        session.write_raw(&mut buf, &[2], &[2.0]).unwrap();
        session.write_raw(&mut buf, &[5], &[5.0]).unwrap();
        session.write_raw(&mut buf, &[3], &[3.0]).unwrap();
        let (count, errors, _) = session.finish(&mut buf).unwrap();
        assert_eq!(count, 3);
        assert_eq!(errors.count(), 1);
        assert_eq!(errors.get(0).unwrap().keys, vec![3]);
    }

    #[test]
    fn duplicate_whole_key_diverts_to_error_list() {
        let mut buf = Cursor::new(Vec::new());
        let mut session = WriteSession::start_raw(&mut buf, 1, 1, vec![None], sv(), vec![0.0]).unwrap();
        for i in 1..=8 {
            session.write_raw(&mut buf, &[i], &[0.0]).unwrap();
        }
        session.write_raw(&mut buf, &[1], &[0.0]).unwrap();
        let (count, errors, _) = session.finish(&mut buf).unwrap();
        assert_eq!(count, 8);
        assert_eq!(errors.count(), 1);
        assert_eq!(errors.get(0).unwrap().keys, vec![1]);
    }

    #[test]
    fn mapped_mode_sorts_then_streams_in_key_order() {
        let mut buf = Cursor::new(Vec::new());
        let mut session = WriteSession::start_buffered(WriteMode::Mapped, 1, 1, vec![None], sv(), vec![0.0]);
        for &k in &[5, 6, 7, 8] {
            session.push_buffered(&[k], &[k as f64]);
        }
        let (count, _, _) = session.finish(&mut buf).unwrap();
        assert_eq!(count, 4);

        buf.set_position(0);
        let mut read = ReadSession::open(&mut buf, sv()).unwrap().with_val_count(1);
        let mut out = Vec::new();
        while let Some((keys, _)) = read.next_raw(&mut buf).unwrap() {
            out.push(keys[0]);
        }
        assert_eq!(out, vec![5, 6, 7, 8]);
    }

    #[test]
    fn domain_violation_is_recorded_and_not_written() {
        let mut buf = Cursor::new(Vec::new());
        let bitmap = vec![false, true, false, false, true];
        let mut session = WriteSession::start_raw(&mut buf, 1, 1, vec![Some(bitmap)], sv(), vec![0.0]).unwrap();
        session.write_raw(&mut buf, &[2], &[1.0]).unwrap();
        session.write_raw(&mut buf, &[3], &[2.0]).unwrap();
        let (count, errors, _) = session.finish(&mut buf).unwrap();
        assert_eq!(count, 1);
        assert_eq!(errors.count(), 1);
        assert_eq!(errors.get(0).unwrap().keys, vec![-3]);
    }

    #[test]
    fn dim_zero_session_synthesizes_one_default_record_when_empty() {
        let mut buf = Cursor::new(Vec::new());
        let session = WriteSession::start_raw(&mut buf, 0, 1, vec![], sv(), vec![7.0]).unwrap();
        let (count, errors, _) = session.finish(&mut buf).unwrap();
        assert_eq!(count, 1);
        assert_eq!(errors.count(), 0);

        buf.set_position(0);
        let mut read = ReadSession::open(&mut buf, sv()).unwrap().with_val_count(1);
        let (keys, values) = read.next_raw(&mut buf).unwrap().unwrap();
        assert!(keys.is_empty());
        assert_eq!(values, vec![7.0]);
    }

    #[test]
    fn resolve_action_expand_allocates_when_unmapped() {
        let mut allocated = None;
        let result = resolve_action(
            ReadAction::Expand,
            7,
            |_| -1,
            |s| {
                allocated = Some(s);
                42
            },
            |_, _| true,
        );
        assert_eq!(result, Some(42));
        assert_eq!(allocated, Some(7));
    }

    #[test]
    fn resolve_action_strict_diverts_when_unmapped() {
        let result = resolve_action(ReadAction::Strict, 7, |_| -1, |_| 0, |_, _| true);
        assert_eq!(result, None);
    }

    #[test]
    fn resolve_action_filter_diverts_outside_membership() {
        let result = resolve_action(ReadAction::Filter(1), 7, |_| 3, |_| 0, |_, u| u != 3);
        assert_eq!(result, None);
    }
}

//! The top-level file object: mode state machine, header/trailer
//! orchestration, and the public surface every other module is wired
//! through.
//!
//! One object per open file, `fmode`-gated operations, a `LastError`
//! slot, and a fixed sequence of trailer sections written at close.

use std::io::{self, Read, Seek, Write};

use crate::accumulator::Accumulator;
use crate::acronym::{self, AcronymTable};
use crate::config::{GdxReadOptions, GdxWriteOptions, CURRENT_FILE_VERSION, LEGACY_MAX_DIM, LEGACY_MAX_DIM_VERSION, MIN_LEGACY_VERSION};
use crate::error::{Error, GdxErrorCode, TraceLevel};
use crate::filter::FilterTable;
use crate::session::{ReadAction, ReadSession, WriteMode, WriteSession};
use crate::settext::SetTextTable;
use crate::stream::{GdxRead, GdxWrite};
use crate::symbol::{DomainRef, SymbolDescriptor, SymbolKind, SymbolTable, VarEquType};
use crate::uel::UelTable;
use crate::util::MAX_DIMENSION;

pub const MAGIC_BYTE: u8 = 123;
pub const MAGIC_STRING: &str = "GAMSGDX";
pub const MARK_BOI: i32 = 19_510_624;

const MARK_SYMB: &str = "_SYMB_";
const MARK_SETT: &str = "_SETT_";
const MARK_UEL: &str = "_UEL_";
const MARK_ACRO: &str = "_ACRO_";
const MARK_DOMS: &str = "_DOMS_";

/// Public file modes. Each operation checks its mode set; mismatches
/// return [`GdxErrorCode::BadMode`] and leave the file open in its
/// current mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileMode {
    NotOpen,
    ReadInit,
    WriteInit,
    WriteRaw,
    WriteMap,
    WriteStr,
    RegisterRaw,
    RegisterMap,
    RegisterStr,
    ReadRaw,
    ReadMap,
}

struct OpenWriteSession {
    symbol: i32,
    write_mode: WriteMode,
    session: WriteSession,
}

struct OpenReadSession {
    actions: Vec<ReadAction>,
    session: ReadSession,
    /// Populated only when the requested actions require sorting by user
    /// order; otherwise records are resolved and handed out one at a time
    /// straight off the stream.
    buffered: Option<std::vec::IntoIter<(Vec<i32>, Vec<f64>)>>,
}

/// The top-level GDX file object. One per open file; holds exclusive
/// access to `stream` for its whole lifetime.
pub struct GdxFile<S> {
    stream: S,
    mode: FileMode,
    uels: UelTable,
    symbols: SymbolTable,
    set_text: SetTextTable,
    acronyms: AcronymTable,
    filters: FilterTable,
    write_opts: GdxWriteOptions,
    read_opts: GdxReadOptions,
    trace_level: TraceLevel,
    file_version: i32,
    last_error: GdxErrorCode,
    error_count: i64,
    write_session: Option<OpenWriteSession>,
    read_session: Option<OpenReadSession>,
    acronym_remap_needed: Vec<i64>,
    domain_string_ids: std::collections::HashMap<i32, Vec<i32>>,
}

impl<S: Read + Write + Seek> GdxFile<S> {
    /// Opens `stream` for writing, emitting the fixed-position header
    /// immediately.
    pub fn open_write(mut stream: S, opts: GdxWriteOptions) -> Result<Self, Error> {
        opts.special_values.validate()?;
        stream.write_byte(MAGIC_BYTE)?;
        stream.write_gdx_string(MAGIC_STRING)?;
        stream.write_int(opts.file_version)?;
        stream.write_int(opts.compress as i32)?;
        stream.write_gdx_string(&opts.audit_line)?;
        stream.write_gdx_string(&opts.producer)?;
        stream.write_int(MARK_BOI)?;
        // Six int64 offsets (symbol, UEL, set-text, acronym, next-write, domain-string),
        // reserved as zero and patched on close.
        for _ in 0..6 {
            stream.write_int64(0)?;
        }
        let file_version = opts.file_version;
        let trace_level = opts.trace_level;
        Ok(GdxFile {
            stream,
            mode: FileMode::WriteInit,
            uels: UelTable::new(),
            symbols: SymbolTable::new(),
            set_text: SetTextTable::new(),
            acronyms: AcronymTable::new(),
            filters: FilterTable::new(),
            write_opts: opts,
            read_opts: GdxReadOptions::default(),
            trace_level,
            file_version,
            last_error: GdxErrorCode::NoError,
            error_count: 0,
            write_session: None,
            read_session: None,
            acronym_remap_needed: Vec::new(),
            domain_string_ids: std::collections::HashMap::new(),
        })
    }

    /// Opens `stream` for reading: validates the header and jumps to the
    /// trailer via the six reserved offsets, then loads every trailer
    /// section.
    pub fn open_read(mut stream: S, opts: GdxReadOptions) -> Result<Self, Error> {
        opts.special_values.validate()?;
        let magic = stream.read_byte()?;
        if magic != MAGIC_BYTE {
            return Err(Error::Code(GdxErrorCode::OpenFileHeader));
        }
        let tag = stream.read_gdx_string()?;
        if tag != MAGIC_STRING {
            return Err(Error::Code(GdxErrorCode::OpenFileHeader));
        }
        let file_version = stream.read_int()?;
        if file_version > CURRENT_FILE_VERSION || file_version < MIN_LEGACY_VERSION {
            return Err(Error::Code(GdxErrorCode::OpenFileVersion));
        }
        let _compress = stream.read_int()?;
        let _audit = stream.read_gdx_string()?;
        let _producer = stream.read_gdx_string()?;
        let boi = stream.read_int()?;
        if boi != MARK_BOI {
            return Err(Error::Code(GdxErrorCode::OpenBoi));
        }
        // Versions <= MIN_LEGACY_VERSION wrote int32 offsets instead of int64.
        let read_offset = |s: &mut S| -> io::Result<i64> {
            if file_version <= MIN_LEGACY_VERSION {
                Ok(s.read_int()? as i64)
            } else {
                s.read_int64()
            }
        };
        let symb_pos = read_offset(&mut stream)?;
        let uel_pos = read_offset(&mut stream)?;
        let sett_pos = read_offset(&mut stream)?;
        let acro_pos = read_offset(&mut stream)?;
        let _next_write_pos = read_offset(&mut stream)?;
        let doms_pos = read_offset(&mut stream)?;

        let mut uels = UelTable::new();
        stream.seek(io::SeekFrom::Start(uel_pos as u64))?;
        if !stream.expect_marker(MARK_UEL)? {
            return Err(Error::Code(GdxErrorCode::OpenUelMarker1));
        }
        uels.load(&mut stream)?;
        if !stream.expect_marker(MARK_UEL)? {
            return Err(Error::Code(GdxErrorCode::OpenUelMarker2));
        }

        let mut set_text = SetTextTable::new();
        stream.seek(io::SeekFrom::Start(sett_pos as u64))?;
        if !stream.expect_marker(MARK_SETT)? {
            return Err(Error::Code(GdxErrorCode::OpenTextMarker1));
        }
        set_text.load(&mut stream)?;
        if !stream.expect_marker(MARK_SETT)? {
            return Err(Error::Code(GdxErrorCode::OpenTextMarker2));
        }

        let mut acronyms = AcronymTable::new();
        stream.seek(io::SeekFrom::Start(acro_pos as u64))?;
        if !stream.expect_marker(MARK_ACRO)? {
            return Err(Error::Code(GdxErrorCode::OpenAcroMarker1));
        }
        acronyms.load(&mut stream)?;
        if !stream.expect_marker(MARK_ACRO)? {
            return Err(Error::Code(GdxErrorCode::OpenAcroMarker2));
        }

        stream.seek(io::SeekFrom::Start(symb_pos as u64))?;
        if !stream.expect_marker(MARK_SYMB)? {
            return Err(Error::Code(GdxErrorCode::OpenSymbolMarker1));
        }
        let mut symbols = SymbolTable::new();
        let symbol_count = stream.read_int()?;
        let mut domain_ordinals: Vec<(i32, Vec<i32>)> = Vec::new();
        for _ in 0..symbol_count {
            let name = stream.read_gdx_string()?;
            let position = stream.read_int64()?;
            let dim = stream.read_int()? as usize;
            let type_byte = stream.read_byte()?;
            let user_info = stream.read_int()?;
            let record_count = stream.read_int()? as i64;
            let error_count = stream.read_int()? as i64;
            let has_text = stream.read_byte()?;
            let explanatory_text = if has_text != 0 { stream.read_gdx_string()? } else { String::new() };
            let compressed = stream.read_byte()? != 0;
            let domain_present = stream.read_byte()?;
            let mut ordinals = Vec::new();
            if domain_present != 0 {
                for _ in 0..dim {
                    ordinals.push(stream.read_int()?);
                }
            }
            let comment_count = stream.read_int()?;
            let mut comments = Vec::with_capacity(comment_count.max(0) as usize);
            for _ in 0..comment_count {
                comments.push(stream.read_gdx_string()?);
            }
            let kind = match type_byte {
                0 => SymbolKind::Set,
                1 => SymbolKind::Parameter,
                2 => SymbolKind::Variable(user_info as u8),
                3 => SymbolKind::Equation(user_info as u8),
                4 => SymbolKind::Alias(user_info),
                _ => return Err(Error::Code(GdxErrorCode::BadDataType)),
            };
            let ordinal = symbols.add(&name, dim, kind, &explanatory_text)?;
            {
                let descr = symbols.get_mut(ordinal);
                descr.position = position;
                descr.record_count = record_count;
                descr.error_count = error_count;
                descr.compressed = compressed;
                descr.comments = comments;
            }
            if domain_present != 0 {
                domain_ordinals.push((ordinal, ordinals));
            }
        }
        if !stream.expect_marker(MARK_SYMB)? {
            return Err(Error::Code(GdxErrorCode::OpenSymbolMarker2));
        }
        for (ordinal, ordinals) in domain_ordinals {
            let refs = ordinals.into_iter().map(DomainRef::Ordinal).collect();
            symbols.get_mut(ordinal).domain = Some(refs);
        }

        let mut domain_string_ids = std::collections::HashMap::new();
        stream.seek(io::SeekFrom::Start(doms_pos as u64))?;
        if stream.expect_marker(MARK_DOMS)? {
            loop {
                let ordinal = stream.read_int()?;
                if ordinal < 0 {
                    break;
                }
                let dim = symbols.get(ordinal).dim;
                let mut ids = Vec::with_capacity(dim);
                for _ in 0..dim {
                    ids.push(stream.read_int()?);
                }
                domain_string_ids.insert(ordinal, ids);
            }
            if !stream.expect_marker(MARK_DOMS)? {
                return Err(Error::Code(GdxErrorCode::OpenDomsMarker3));
            }
        }

        let trace_level = opts.trace_level;
        Ok(GdxFile {
            stream,
            mode: FileMode::ReadInit,
            uels,
            symbols,
            set_text,
            acronyms,
            filters: FilterTable::new(),
            write_opts: GdxWriteOptions::default(),
            read_opts: opts,
            trace_level,
            file_version,
            last_error: GdxErrorCode::NoError,
            error_count: 0,
            write_session: None,
            read_session: None,
            acronym_remap_needed: Vec::new(),
            domain_string_ids,
        })
    }

    fn fail(&mut self, code: GdxErrorCode) -> Error {
        self.last_error = code;
        self.error_count += 1;
        Error::Code(code)
    }

    fn require_mode(&mut self, allowed: &[FileMode]) -> Result<(), Error> {
        if allowed.contains(&self.mode) {
            Ok(())
        } else {
            Err(self.fail(GdxErrorCode::BadMode))
        }
    }

    /// `get_last_error`: returns and clears the last-error slot.
    pub fn get_last_error(&mut self) -> GdxErrorCode {
        std::mem::replace(&mut self.last_error, GdxErrorCode::NoError)
    }

    pub fn error_count(&self) -> i64 {
        self.error_count
    }

    pub fn mode(&self) -> FileMode {
        self.mode
    }

    pub fn trace_level(&self) -> TraceLevel {
        self.trace_level
    }

    /// Emits a human-readable line to stderr when the file's configured
    /// [`TraceLevel`] allows `required`, independently of the `log` facade.
    fn trace(&self, required: TraceLevel, msg: impl FnOnce() -> String) {
        if self.trace_level.allows(required) {
            eprintln!("{}", msg());
        }
    }

    pub fn acronym_remap_needed(&self) -> &[i64] {
        &self.acronym_remap_needed
    }

    pub fn domain_strings(&self, ordinal: i32) -> Option<&[i32]> {
        self.domain_string_ids.get(&ordinal).map(|v| v.as_slice())
    }

    fn legacy_max_dim(&self) -> usize {
        if self.file_version <= LEGACY_MAX_DIM_VERSION {
            LEGACY_MAX_DIM
        } else {
            MAX_DIMENSION as usize
        }
    }

    // ---- UEL registration ----

    pub fn uel_register_raw(&mut self, s: &str) -> Result<i32, Error> {
        self.require_mode(&[FileMode::WriteInit, FileMode::RegisterRaw, FileMode::ReadInit])?;
        self.mode = FileMode::RegisterRaw;
        self.uels.register_raw(s)
    }

    pub fn uel_register_mapped(&mut self, user_idx: i32, s: &str) -> Result<i32, Error> {
        self.require_mode(&[FileMode::WriteInit, FileMode::RegisterMap])?;
        self.mode = FileMode::RegisterMap;
        self.uels.register_mapped(user_idx, s)
    }

    pub fn uel_register_str(&mut self, s: &str) -> Result<i32, Error> {
        self.require_mode(&[FileMode::WriteInit, FileMode::RegisterStr, FileMode::ReadInit])?;
        self.mode = FileMode::RegisterStr;
        self.uels.register_str(s)
    }

    pub fn uel_register_done(&mut self) {
        if matches!(self.mode, FileMode::RegisterRaw | FileMode::RegisterMap | FileMode::RegisterStr) {
            self.mode = FileMode::WriteInit;
        }
    }

    pub fn uel_count(&self) -> usize {
        self.uels.count()
    }

    pub fn uel_text(&self, storage_idx: i32) -> &str {
        self.uels.get_string(storage_idx)
    }

    // ---- Domain registration ----

    /// Registers `domain` (one symbol ordinal per dimension, `0` =
    /// universe) as `symbol`'s domain, building the per-dimension
    /// write-time membership bitmap from the domain set's elements.
    pub fn domain_set(&mut self, symbol: i32, domain: &[i32]) -> Result<(), Error> {
        if domain.len() != self.symbols.get(symbol).dim {
            return Err(self.fail(GdxErrorCode::BadDomain));
        }
        let mut bitmaps = Vec::with_capacity(domain.len());
        for &dom_ordinal in domain {
            if dom_ordinal == 0 {
                bitmaps.push(None);
                continue;
            }
            let dom = self.symbols.get(dom_ordinal);
            if !matches!(dom.kind, SymbolKind::Set | SymbolKind::Alias(_)) {
                return Err(self.fail(GdxErrorCode::UnknownDomain));
            }
            // An alias carries no records of its own; its membership is its
            // target's.
            let resolved = match dom.kind {
                SymbolKind::Alias(target) if target != 0 => self.symbols.get(target),
                _ => dom,
            };
            bitmaps.push(resolved.set_bitmap.clone());
        }
        self.symbols.get_mut(symbol).domain = Some(domain.iter().map(|&o| DomainRef::Ordinal(o)).collect());
        self.symbols.get_mut(symbol).wr_bitmap = bitmaps.clone();
        if let Some(open) = self.write_session.as_mut() {
            if open.symbol == symbol {
                open.session.set_wr_bitmap(bitmaps);
            }
        }
        Ok(())
    }

    /// `domain_get`: per-dimension domain ordinals, if registered.
    pub fn domain_get(&self, symbol: i32) -> Option<Vec<i32>> {
        self.symbols.get(symbol).domain.as_ref().map(|refs| {
            refs.iter()
                .map(|r| match r {
                    DomainRef::Ordinal(o) => *o,
                    DomainRef::Relaxed(_) => -1,
                })
                .collect()
        })
    }

    // ---- Symbol write sessions ----

    fn begin_symbol(&mut self, name: &str, dim: usize, kind: SymbolKind, explanatory_text: &str) -> Result<i32, Error> {
        if dim > self.legacy_max_dim() {
            return Err(self.fail(GdxErrorCode::BadDimension));
        }
        let ordinal = self.symbols.add(name, dim, kind, explanatory_text)?;
        self.symbols.get_mut(ordinal).compressed = self.write_opts.compress;
        Ok(ordinal)
    }

    /// The record a dim-0 symbol gets if the caller closes its write
    /// session without ever writing one: a scalar's record block always
    /// holds exactly one record.
    fn scalar_default_for(kind: &SymbolKind) -> Vec<f64> {
        match kind {
            SymbolKind::Variable(t) | SymbolKind::Equation(t) => crate::symbol::default_record(VarEquType::from_subtype(*t)).to_vec(),
            SymbolKind::Set | SymbolKind::Parameter | SymbolKind::Alias(_) => vec![0.0],
        }
    }

    pub fn data_write_raw_start(&mut self, name: &str, dim: usize, kind: SymbolKind, explanatory_text: &str) -> Result<(), Error> {
        self.require_mode(&[FileMode::WriteInit])?;
        log::trace!("opening raw write session for symbol {name:?} (dim {dim})");
        let ordinal = self.begin_symbol(name, dim, kind, explanatory_text)?;
        let wr_bitmap = self.symbols.get(ordinal).wr_bitmap.clone();
        let val_count = self.symbols.get(ordinal).kind.val_count();
        let scalar_default = Self::scalar_default_for(&self.symbols.get(ordinal).kind);
        let position = self.stream.stream_position()?;
        let session = WriteSession::start_raw(&mut self.stream, dim, val_count, wr_bitmap, self.write_opts.special_values, scalar_default)?;
        self.symbols.get_mut(ordinal).position = position as i64;
        self.write_session = Some(OpenWriteSession { symbol: ordinal, write_mode: WriteMode::Raw, session });
        self.mode = FileMode::WriteRaw;
        Ok(())
    }

    pub fn data_write_map_start(&mut self, name: &str, dim: usize, kind: SymbolKind, explanatory_text: &str) -> Result<(), Error> {
        self.require_mode(&[FileMode::WriteInit])?;
        let ordinal = self.begin_symbol(name, dim, kind, explanatory_text)?;
        let wr_bitmap = self.symbols.get(ordinal).wr_bitmap.clone();
        let val_count = self.symbols.get(ordinal).kind.val_count();
        let scalar_default = Self::scalar_default_for(&self.symbols.get(ordinal).kind);
        let session = WriteSession::start_buffered(WriteMode::Mapped, dim, val_count, wr_bitmap, self.write_opts.special_values, scalar_default);
        self.write_session = Some(OpenWriteSession { symbol: ordinal, write_mode: WriteMode::Mapped, session });
        self.mode = FileMode::WriteMap;
        Ok(())
    }

    pub fn data_write_str_start(&mut self, name: &str, dim: usize, kind: SymbolKind, explanatory_text: &str) -> Result<(), Error> {
        self.require_mode(&[FileMode::WriteInit])?;
        let ordinal = self.begin_symbol(name, dim, kind, explanatory_text)?;
        let wr_bitmap = self.symbols.get(ordinal).wr_bitmap.clone();
        let val_count = self.symbols.get(ordinal).kind.val_count();
        let scalar_default = Self::scalar_default_for(&self.symbols.get(ordinal).kind);
        let session = WriteSession::start_buffered(WriteMode::String, dim, val_count, wr_bitmap, self.write_opts.special_values, scalar_default);
        self.write_session = Some(OpenWriteSession { symbol: ordinal, write_mode: WriteMode::String, session });
        self.mode = FileMode::WriteStr;
        Ok(())
    }

    pub fn data_write_raw(&mut self, keys: &[i32], values: &[f64]) -> Result<(), Error> {
        self.require_mode(&[FileMode::WriteRaw])?;
        let open = self.write_session.as_mut().expect("write session missing");
        open.session.write_raw(&mut self.stream, keys, values)?;
        Ok(())
    }

    pub fn data_write_map(&mut self, user_keys: &[i32], values: &[f64]) -> Result<(), Error> {
        self.require_mode(&[FileMode::WriteMap])?;
        let mut storage_keys = Vec::with_capacity(user_keys.len());
        for &u in user_keys {
            let s = self.uels.user_to_storage(u);
            if s < 0 {
                return Err(self.fail(GdxErrorCode::UndefUel));
            }
            storage_keys.push(s);
        }
        self.write_session.as_mut().expect("write session missing").session.push_buffered(&storage_keys, values);
        Ok(())
    }

    pub fn data_write_str(&mut self, labels: &[&str], values: &[f64]) -> Result<(), Error> {
        self.require_mode(&[FileMode::WriteStr])?;
        let mut storage_keys = Vec::with_capacity(labels.len());
        for &label in labels {
            storage_keys.push(self.uels.register_raw(label)?);
        }
        self.write_session.as_mut().expect("write session missing").session.push_buffered(&storage_keys, values);
        Ok(())
    }

    /// Ends the current write session, folding its stats back into the
    /// symbol descriptor.
    pub fn data_write_done(&mut self) -> Result<(), Error> {
        let open = self.write_session.take().ok_or_else(|| self.fail(GdxErrorCode::BadMode))?;
        let position_before = if open.write_mode != WriteMode::Raw {
            Some(self.stream.stream_position()?)
        } else {
            None
        };
        let (record_count, errors, written_keys) = open.session.finish(&mut self.stream)?;
        if errors.total_count() > 0 {
            log::warn!(
                "symbol {:?} closed with {} data error(s)",
                self.symbols.get(open.symbol).name,
                errors.total_count()
            );
            self.trace(TraceLevel::Errors, || {
                format!(
                    "*** Error: symbol '{}' has {} data error(s)",
                    self.symbols.get(open.symbol).name,
                    errors.total_count()
                )
            });
        }
        log::trace!("closed write session for symbol {:?}: {record_count} record(s)", self.symbols.get(open.symbol).name);
        self.error_count += errors.total_count();
        let (dim, is_set) = {
            let descr = self.symbols.get_mut(open.symbol);
            descr.record_count = record_count;
            descr.error_count = errors.total_count();
            if let Some(pos) = position_before {
                descr.position = pos as i64;
            }
            (descr.dim, matches!(descr.kind, SymbolKind::Set))
        };
        if dim == 1 && is_set {
            // Sized to the highest storage index actually written, not the
            // global UEL count: a domain set's membership bitmap only
            // needs to answer for indices that could plausibly appear as a
            // dependent symbol's key.
            let span = written_keys.iter().copied().max().unwrap_or(0).max(0) as usize;
            let mut bitmap = vec![false; span];
            for k in written_keys {
                if k >= 1 && (k as usize) <= span {
                    bitmap[(k - 1) as usize] = true;
                }
            }
            self.symbols.get_mut(open.symbol).set_bitmap = Some(bitmap);
        }
        self.mode = FileMode::WriteInit;
        Ok(())
    }

    // ---- Symbol read sessions ----

    pub fn data_read_raw_start(&mut self, symbol: i32) -> Result<(), Error> {
        self.require_mode(&[FileMode::ReadInit])?;
        let descr = self.symbols.get(symbol);
        let dim = descr.dim;
        let val_count = descr.kind.val_count();
        self.stream.seek(io::SeekFrom::Start(descr.position as u64))?;
        let session = ReadSession::open(&mut self.stream, self.read_opts.special_values)?.with_val_count(val_count);
        self.read_session = Some(OpenReadSession {
            actions: vec![ReadAction::Unmapped; dim],
            session,
            buffered: None,
        });
        self.mode = FileMode::ReadRaw;
        Ok(())
    }

    pub fn data_read_map_start(&mut self, symbol: i32, actions: Vec<ReadAction>) -> Result<(), Error> {
        self.require_mode(&[FileMode::ReadInit])?;
        let descr = self.symbols.get(symbol);
        let dim = descr.dim;
        if actions.len() != dim {
            return Err(self.fail(GdxErrorCode::BadDimension));
        }
        let val_count = descr.kind.val_count();
        self.stream.seek(io::SeekFrom::Start(descr.position as u64))?;
        let mut session = ReadSession::open(&mut self.stream, self.read_opts.special_values)?.with_val_count(val_count);

        let identity = self.uels.user_map_status() == crate::uel::UserMapStatus::Sorted;
        let needs_sort = crate::session::mode_requires_sort(&actions, identity);
        let buffered = if needs_sort {
            let mut acc = Accumulator::new(dim, val_count);
            while let Some((keys, values)) = session.next_raw(&mut self.stream)? {
                match self.resolve_keys(&actions, &keys) {
                    Some(resolved) => acc.push(&resolved, &values),
                    None => session.errors_mut().push(&keys, &values),
                }
            }
            let sorted: Vec<(Vec<i32>, Vec<f64>)> =
                acc.start_read(None).map(|r| (r.keys.clone(), r.values.clone())).collect();
            Some(sorted.into_iter())
        } else {
            None
        };
        self.read_session = Some(OpenReadSession { actions, session, buffered });
        self.mode = FileMode::ReadMap;
        Ok(())
    }

    /// Resolves every dimension of one record's storage keys via `actions`,
    /// returning `None` when any dimension should divert to the error list.
    fn resolve_keys(&mut self, actions: &[ReadAction], keys: &[i32]) -> Option<Vec<i32>> {
        let mut resolved = Vec::with_capacity(keys.len());
        for (d, &action) in actions.iter().enumerate() {
            let storage_idx = keys[d];
            let v = match action {
                ReadAction::Unmapped => storage_idx,
                ReadAction::Expand => {
                    let u = self.uels.storage_to_user(storage_idx);
                    if u >= 0 {
                        u
                    } else {
                        self.uels.new_user_uel(storage_idx).ok()?
                    }
                }
                ReadAction::Strict => {
                    let u = self.uels.storage_to_user(storage_idx);
                    if u >= 0 {
                        u
                    } else {
                        return None;
                    }
                }
                ReadAction::Filter(nr) => {
                    let u = self.uels.storage_to_user(storage_idx);
                    if u >= 0 && self.filters.get(nr).map(|f| f.contains(u)).unwrap_or(false) {
                        u
                    } else {
                        return None;
                    }
                }
            };
            resolved.push(v);
        }
        Some(resolved)
    }

    /// Returns the next resolved record, or `None` at end of symbol.
    /// Unresolvable records (per [`ReadAction`]) are diverted to the open
    /// session's error list and skipped transparently.
    pub fn data_read_next(&mut self) -> Result<Option<(Vec<i32>, Vec<f64>)>, Error> {
        self.require_mode(&[FileMode::ReadRaw, FileMode::ReadMap])?;
        let mut open = self.read_session.take().ok_or_else(|| self.fail(GdxErrorCode::BadMode))?;
        let result = loop {
            if let Some(iter) = open.buffered.as_mut() {
                break Ok(iter.next());
            }
            match open.session.next_raw(&mut self.stream) {
                Err(e) => break Err(Error::from(e)),
                Ok(None) => break Ok(None),
                Ok(Some((keys, values))) => match self.resolve_keys(&open.actions, &keys) {
                    Some(resolved) => break Ok(Some((resolved, values))),
                    None => {
                        self.trace(TraceLevel::Some, || format!("*** record {keys:?} diverted: unmapped or filtered key"));
                        open.session.errors_mut().push(&keys, &values);
                        continue;
                    }
                },
            }
        };
        self.read_session = Some(open);
        result
    }

    pub fn data_read_done(&mut self) -> Result<(), Error> {
        if let Some(open) = self.read_session.take() {
            self.error_count += open.session.errors().total_count();
        }
        self.mode = FileMode::ReadInit;
        Ok(())
    }

    pub fn data_read_error_count(&self) -> i64 {
        self.read_session.as_ref().map(|s| s.session.errors().count() as i64).unwrap_or(0)
    }

    // ---- Aliases ----

    pub fn add_alias(&mut self, target_name: &str, alias_name: &str) -> Result<i32, Error> {
        self.require_mode(&[FileMode::WriteInit])?;
        let target = self.symbols.find(target_name).ok_or_else(|| self.fail(GdxErrorCode::UnknownDomain))?;
        let descr = self.symbols.get(target);
        if !matches!(descr.kind, SymbolKind::Set) && target != 0 {
            return Err(self.fail(GdxErrorCode::AliasSetExpected));
        }
        let text = format!("Aliased with {target_name}");
        self.symbols.add(alias_name, 1, SymbolKind::Alias(target), &text)
    }

    pub fn symbol_count(&self) -> usize {
        self.symbols.count()
    }

    pub fn symbol_info(&self, ordinal: i32) -> &SymbolDescriptor {
        self.symbols.get(ordinal)
    }

    pub fn find_symbol(&self, name: &str) -> Option<i32> {
        self.symbols.find(name)
    }

    pub fn data_write_error_count(&self) -> i64 {
        self.write_session.as_ref().map(|s| s.session.errors().count() as i64).unwrap_or(0)
    }

    // ---- Filters ----

    pub fn filter_register_start(&mut self, nr: i32) {
        let span = self.uels.count().max(1);
        self.filters.register_start(nr, span);
    }

    pub fn filter_register(&mut self, user_idx: i32) -> Result<(), Error> {
        self.filters.register(user_idx)
    }

    pub fn filter_register_done(&mut self) -> Result<i32, Error> {
        self.filters.register_done()
    }

    // ---- Set text ----

    pub fn set_text_add(&mut self, text: &str) -> i32 {
        self.set_text.add(text)
    }

    pub fn set_text_get(&self, index: i32) -> &str {
        self.set_text.get(index)
    }

    // ---- Close ----

    /// Closes the file: ends any active record block, writes the trailer
    /// sections, then patches the six header offsets.
    pub fn close(mut self) -> Result<S, Error> {
        log::debug!("closing GDX file: {} symbol(s), {} UEL(s)", self.symbols.count(), self.uels.count());
        if self.write_session.is_some() {
            self.data_write_done()?;
        }
        let symb_pos = self.stream.stream_position()?;
        self.write_symbol_trailer()?;

        let sett_pos = self.stream.stream_position()?;
        self.stream.write_gdx_string(MARK_SETT)?;
        self.set_text.save(&mut self.stream)?;
        self.stream.write_gdx_string(MARK_SETT)?;

        let uel_pos = self.stream.stream_position()?;
        self.stream.write_gdx_string(MARK_UEL)?;
        self.uels.save(&mut self.stream)?;
        self.stream.write_gdx_string(MARK_UEL)?;

        let acro_pos = self.stream.stream_position()?;
        self.stream.write_gdx_string(MARK_ACRO)?;
        self.acronyms.save(&mut self.stream)?;
        self.stream.write_gdx_string(MARK_ACRO)?;

        let doms_pos = self.stream.stream_position()?;
        self.write_domain_string_trailer()?;

        let next_write_pos = self.stream.stream_position()?;

        self.patch_offsets(symb_pos as i64, uel_pos as i64, sett_pos as i64, acro_pos as i64, next_write_pos as i64, doms_pos as i64)?;

        self.mode = FileMode::NotOpen;
        Ok(self.stream)
    }

    /// Re-walks the fixed-format header to find the six offset slots and
    /// overwrites them, mirroring [`Self::open_read`]'s own header walk so
    /// the two can never disagree about field widths.
    fn patch_offsets(&mut self, symb: i64, uel: i64, sett: i64, acro: i64, next: i64, doms: i64) -> io::Result<()> {
        self.stream.seek(io::SeekFrom::Start(0))?;
        let _ = self.stream.read_byte()?;
        let _ = self.stream.read_gdx_string()?;
        let _ = self.stream.read_int()?;
        let _ = self.stream.read_int()?;
        let _ = self.stream.read_gdx_string()?;
        let _ = self.stream.read_gdx_string()?;
        let _ = self.stream.read_int()?;
        for v in [symb, uel, sett, acro, next, doms] {
            self.stream.write_int64(v)?;
        }
        Ok(())
    }

    fn write_symbol_trailer(&mut self) -> io::Result<()> {
        self.stream.write_gdx_string(MARK_SYMB)?;
        self.stream.write_int(self.symbols.count() as i32)?;
        let descriptors: Vec<SymbolDescriptor> = self.symbols.iter().cloned().collect();
        for descr in &descriptors {
            self.stream.write_gdx_string(&descr.name)?;
            self.stream.write_int64(descr.position)?;
            self.stream.write_int(descr.dim as i32)?;
            self.stream.write_byte(descr.kind.type_byte())?;
            self.stream.write_int(descr.kind.user_info())?;
            self.stream.write_int(descr.record_count as i32)?;
            self.stream.write_int(descr.error_count as i32)?;
            let has_text = !descr.explanatory_text.is_empty();
            self.stream.write_byte(has_text as u8)?;
            if has_text {
                self.stream.write_gdx_string(&descr.explanatory_text)?;
            }
            self.stream.write_byte(descr.compressed as u8)?;
            match &descr.domain {
                Some(refs) if refs.iter().all(|r| matches!(r, DomainRef::Ordinal(_))) => {
                    self.stream.write_byte(1)?;
                    for r in refs {
                        if let DomainRef::Ordinal(o) = r {
                            self.stream.write_int(*o)?;
                        }
                    }
                }
                _ => {
                    self.stream.write_byte(0)?;
                }
            }
            self.stream.write_int(descr.comments.len() as i32)?;
            for c in &descr.comments {
                self.stream.write_gdx_string(c)?;
            }
        }
        self.stream.write_gdx_string(MARK_SYMB)?;
        Ok(())
    }

    fn write_domain_string_trailer(&mut self) -> io::Result<()> {
        self.stream.write_gdx_string(MARK_DOMS)?;
        for descr in self.symbols.iter() {
            if let Some(domain) = &descr.domain {
                if domain.iter().any(|r| matches!(r, DomainRef::Relaxed(_))) {
                    self.stream.write_int(descr.ordinal)?;
                    for r in domain {
                        let id = match r {
                            DomainRef::Relaxed(name) => self.uels.index_of(name).unwrap_or(-1),
                            DomainRef::Ordinal(_) => -1,
                        };
                        self.stream.write_int(id)?;
                    }
                }
            }
        }
        self.stream.write_int(-1)?;
        self.stream.write_gdx_string(MARK_DOMS)?;
        Ok(())
    }

    /// Maps a finite double `>= 10^300` back to a caller-known or
    /// auto-assigned acronym index, tracking it on the needs-remap list.
    pub fn acronym_remap(&mut self, v: f64) -> f64 {
        if acronym::is_acronym_value(v) {
            let idx = acronym::decode(v);
            let acro_idx = self.acronyms.add_auto(idx);
            self.acronym_remap_needed.push(idx);
            acronym::encode(self.acronyms.get(acro_idx).read_map_index)
        } else {
            v
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{GdxReadOptions, GdxWriteOptions};
    use std::io::Cursor;

    fn round_trip(write: impl FnOnce(&mut GdxFile<Cursor<Vec<u8>>>)) -> GdxFile<Cursor<Vec<u8>>> {
        let mut file = GdxFile::open_write(Cursor::new(Vec::new()), GdxWriteOptions::default()).unwrap();
        write(&mut file);
        let stream = file.close().unwrap();
        GdxFile::open_read(stream, GdxReadOptions::default()).unwrap()
    }

    #[test]
    fn scalar_parameter_round_trips() {
        let read = round_trip(|w| {
            w.data_write_raw_start("x", 0, SymbolKind::Parameter, "a scalar").unwrap();
            w.data_write_raw(&[], &[3.5]).unwrap();
            w.data_write_done().unwrap();
        });
        let ordinal = read.find_symbol("x").unwrap();
        assert_eq!(read.symbol_info(ordinal).dim, 0);
    }

    #[test]
    fn raw_write_then_read_preserves_record_order() {
        let mut file = GdxFile::open_write(Cursor::new(Vec::new()), GdxWriteOptions::default()).unwrap();
        file.uel_register_raw("seattle").unwrap();
        file.uel_register_raw("san-diego").unwrap();
        file.uel_register_done();
        file.data_write_raw_start("i", 1, SymbolKind::Set, "cities").unwrap();
        file.data_write_raw(&[1], &[0.0]).unwrap();
        file.data_write_raw(&[2], &[0.0]).unwrap();
        file.data_write_done().unwrap();
        let stream = file.close().unwrap();

        let mut read = GdxFile::open_read(stream, GdxReadOptions::default()).unwrap();
        let ordinal = read.find_symbol("i").unwrap();
        read.data_read_raw_start(ordinal).unwrap();
        let mut out = Vec::new();
        while let Some((keys, _)) = read.data_read_next().unwrap() {
            out.push(keys[0]);
        }
        assert_eq!(out, vec![1, 2]);
        read.data_read_done().unwrap();
    }

    #[test]
    fn alias_resolves_to_target_ordinal() {
        let mut file = GdxFile::open_write(Cursor::new(Vec::new()), GdxWriteOptions::default()).unwrap();
        file.data_write_raw_start("i", 1, SymbolKind::Set, "cities").unwrap();
        file.data_write_done().unwrap();
        let i = file.find_symbol("i").unwrap();
        let ai = file.add_alias("i", "ai").unwrap();
        assert_eq!(file.symbol_info(ai).kind.user_info(), i);
    }

    #[test]
    fn mapped_write_sorts_before_read() {
        let mut file = GdxFile::open_write(Cursor::new(Vec::new()), GdxWriteOptions::default()).unwrap();
        file.uel_register_mapped(1, "seattle").unwrap();
        file.uel_register_mapped(2, "san-diego").unwrap();
        file.uel_register_done();
        file.data_write_map_start("i", 1, SymbolKind::Set, "cities").unwrap();
        file.data_write_map(&[2], &[0.0]).unwrap();
        file.data_write_map(&[1], &[0.0]).unwrap();
        file.data_write_done().unwrap();
        let stream = file.close().unwrap();

        let mut read = GdxFile::open_read(stream, GdxReadOptions::default()).unwrap();
        let ordinal = read.find_symbol("i").unwrap();
        read.data_read_raw_start(ordinal).unwrap();
        let mut out = Vec::new();
        while let Some((keys, _)) = read.data_read_next().unwrap() {
            out.push(keys[0]);
        }
        assert_eq!(out, vec![1, 2]);
    }

    #[test]
    fn out_of_order_raw_records_divert_to_symbol_error_count() {
        let mut file = GdxFile::open_write(Cursor::new(Vec::new()), GdxWriteOptions::default()).unwrap();
        file.data_write_raw_start("p", 1, SymbolKind::Parameter, "").unwrap();
        file.data_write_raw(&[2], &[1.0]).unwrap();
        file.data_write_raw(&[1], &[2.0]).unwrap();
        file.data_write_done().unwrap();
        let ordinal = file.find_symbol("p").unwrap();
        assert_eq!(file.symbol_info(ordinal).error_count, 1);
    }

    #[test]
    fn duplicate_keys_in_string_mode_divert_to_error_count() {
        let mut file = GdxFile::open_write(Cursor::new(Vec::new()), GdxWriteOptions::default()).unwrap();
        file.data_write_str_start("s", 1, SymbolKind::Set, "").unwrap();
        file.data_write_str(&["a"], &[0.0]).unwrap();
        file.data_write_str(&["a"], &[0.0]).unwrap();
        file.data_write_done().unwrap();
        let ordinal = file.find_symbol("s").unwrap();
        assert_eq!(file.symbol_info(ordinal).error_count, 1);
    }

    #[test]
    fn domain_violation_is_rejected_for_unknown_domain_symbol() {
        let mut file = GdxFile::open_write(Cursor::new(Vec::new()), GdxWriteOptions::default()).unwrap();
        file.data_write_raw_start("p", 1, SymbolKind::Parameter, "").unwrap();
        file.data_write_done().unwrap();
        let p = file.find_symbol("p").unwrap();
        assert!(file.domain_set(p, &[999]).is_err());
    }

    #[test]
    fn bad_mode_is_rejected_with_gdx_error_code() {
        let mut file = GdxFile::open_write(Cursor::new(Vec::new()), GdxWriteOptions::default()).unwrap();
        let err = file.data_write_raw(&[1], &[0.0]).unwrap_err();
        assert!(matches!(err, Error::Code(GdxErrorCode::BadMode)));
    }

    #[test]
    fn domain_violation_is_detected_end_to_end() {
        let mut file = GdxFile::open_write(Cursor::new(Vec::new()), GdxWriteOptions::default()).unwrap();
        file.data_write_raw_start("i", 1, SymbolKind::Set, "").unwrap();
        file.data_write_raw(&[1], &[0.0]).unwrap();
        file.data_write_raw(&[2], &[0.0]).unwrap();
        file.data_write_done().unwrap();
        let i = file.find_symbol("i").unwrap();
        assert_eq!(file.symbol_info(i).set_bitmap.as_deref(), Some(&[true, true][..]));

        file.data_write_raw_start("p", 1, SymbolKind::Parameter, "").unwrap();
        let p = file.find_symbol("p").unwrap();
        file.domain_set(p, &[i]).unwrap();
        file.data_write_raw(&[1], &[5.0]).unwrap();
        file.data_write_raw(&[3], &[6.0]).unwrap();
        assert_eq!(file.data_write_error_count(), 1);
        file.data_write_done().unwrap();
        assert_eq!(file.symbol_info(p).error_count, 1);
        assert_eq!(file.symbol_info(p).record_count, 1);
    }

    #[test]
    fn zero_record_scalar_gets_a_synthesized_default_record() {
        let mut file = GdxFile::open_write(Cursor::new(Vec::new()), GdxWriteOptions::default()).unwrap();
        file.data_write_raw_start("x", 0, SymbolKind::Parameter, "never written").unwrap();
        file.data_write_done().unwrap();
        let stream = file.close().unwrap();

        let mut read = GdxFile::open_read(stream, GdxReadOptions::default()).unwrap();
        let x = read.find_symbol("x").unwrap();
        assert_eq!(read.symbol_info(x).record_count, 1);
        read.data_read_raw_start(x).unwrap();
        let (keys, values) = read.data_read_next().unwrap().unwrap();
        assert!(keys.is_empty());
        assert_eq!(values, vec![0.0]);
        assert!(read.data_read_next().unwrap().is_none());
    }

    #[test]
    fn zero_record_scalar_variable_gets_its_subtype_default() {
        let mut file = GdxFile::open_write(Cursor::new(Vec::new()), GdxWriteOptions::default()).unwrap();
        file.data_write_raw_start("v", 0, SymbolKind::Variable(3), "positive variable").unwrap();
        file.data_write_done().unwrap();
        let stream = file.close().unwrap();

        let mut read = GdxFile::open_read(stream, GdxReadOptions::default()).unwrap();
        let v = read.find_symbol("v").unwrap();
        read.data_read_raw_start(v).unwrap();
        let (_, values) = read.data_read_next().unwrap().unwrap();
        assert_eq!(values, crate::symbol::default_record(crate::symbol::VarEquType::Positive).to_vec());
    }

    #[test]
    fn read_opened_file_reports_its_own_configured_trace_level() {
        let file = GdxFile::open_write(Cursor::new(Vec::new()), GdxWriteOptions::default()).unwrap();
        let stream = file.close().unwrap();
        let mut opts = GdxReadOptions::default();
        opts.trace_level = TraceLevel::All;
        let read = GdxFile::open_read(stream, opts).unwrap();
        assert_eq!(read.trace_level(), TraceLevel::All);
    }
}

//! Error types for the GDX core.
//!
//! Two layers: [`Error`] is what Rust functions return with `?`;
//! [`GdxErrorCode`] is the stable numeric code a [`crate::file::GdxFile`]
//! records in its `last_error` slot, the way `gdxGetLastError` does for
//! callers that poll rather than propagate.

use std::io;

#[derive(Debug)]
pub enum Error {
    Io(io::Error),
    SerdeJson(serde_json::Error),
    Code(GdxErrorCode),
    InvalidState(String),
}

impl From<io::Error> for Error {
    fn from(err: io::Error) -> Self {
        Error::Io(err)
    }
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Error::SerdeJson(err)
    }
}

impl From<GdxErrorCode> for Error {
    fn from(code: GdxErrorCode) -> Self {
        Error::Code(code)
    }
}

impl std::fmt::Display for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Error::Io(e) => write!(f, "I/O error: {e}"),
            Error::SerdeJson(e) => write!(f, "config error: {e}"),
            Error::Code(c) => write!(f, "{} ({})", error_text(*c), *c as i32),
            Error::InvalidState(s) => write!(f, "{s}"),
        }
    }
}

impl std::error::Error for Error {}

/// Numeric error codes, matching the `ERR_*` constants of the format this
/// crate implements. Not every code is reachable from every operation; the
/// ones most worth knowing are documented per-variant below.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(i32)]
pub enum GdxErrorCode {
    NoError = 0,
    /// File name is empty.
    NoFile = -100_000,
    /// File I/O error.
    FileError = -100_001,
    /// Operation not valid in the file's current mode.
    BadMode = -100_002,
    /// Dimension outside `0..=20`.
    BadDimension = -100_003,
    /// Element index out of the UEL's valid range.
    BadElementIndex = -100_004,
    BadSymbolIndex = -100_005,
    ElementSequence = -100_006,
    /// A symbol with this name (or an acronym colliding with it) already exists.
    DuplicateSymbol = -100_007,
    /// Raw-mode write received keys out of non-decreasing order.
    DataNotSorted = -100_008,
    /// A record was submitted whose whole key duplicates a previous record.
    DataDuplicate = -100_009,
    /// A filter read referenced a filter number that was never registered.
    UnknownFilter = -100_010,
    BadStringFormat = -100_011,
    /// Symbol or UEL name fails identifier rules (length, characters).
    BadIdentFormat = -100_012,
    UelConflict = -100_013,
    DuplicateSpecVal = -100_014,
    BadErrorRecord = -100_015,
    DuplicateUel = -100_016,
    /// UEL string exceeds 63 bytes, mixes quote styles, or has control chars.
    BadUelStr = -100_017,
    UndefUel = -100_018,
    UelSecondWrite = -100_019,
    UelNotEmpty = -100_020,
    BadFilterNr = -100_021,
    BadFilterIndex = -100_022,
    FilterUnmapped = -100_023,
    ObsoleteFunction = -100_024,
    RawNotSorted = -100_025,
    BadAliasDim = -100_026,
    BadDataMarkerData = -100_029,
    BadDataMarkerDim = -100_030,
    OpenBoi = -100_031,
    OpenFileHeader = -100_032,
    OpenFileVersion = -100_033,
    OpenFileMarker = -100_034,
    OpenSymbolMarker1 = -100_035,
    OpenSymbolMarker2 = -100_036,
    OpenUelMarker1 = -100_037,
    OpenUelMarker2 = -100_038,
    OpenTextMarker1 = -100_039,
    OpenTextMarker2 = -100_040,
    BadDataFormat = -100_041,
    OutOfMemory = -100_043,
    ZlibNotFound = -100_044,
    OpenAcroMarker1 = -100_045,
    OpenAcroMarker2 = -100_046,
    BadAcroIndex = -100_047,
    BadAcroNumber = -100_048,
    BadAcroName = -100_049,
    AcroDupeMap = -100_050,
    AcroBadAddition = -100_051,
    UnknownDomain = -100_052,
    BadDomain = -100_053,
    NoDomainData = -100_054,
    AliasSetExpected = -100_055,
    BadDataType = -100_056,
    NoSymbolForComment = -100_057,
    /// A written or read key fell outside its dimension's registered domain set.
    DomainViolation = -100_058,
    FileAlreadyOpen = -100_059,
    FileTooOldForAppend = -100_060,
    OpenDomsMarker1 = -100_061,
    OpenDomsMarker2 = -100_062,
    OpenDomsMarker3 = -100_063,
}

/// Pure lookup from code to human-readable text.
pub fn error_text(code: GdxErrorCode) -> &'static str {
    use GdxErrorCode::*;
    match code {
        NoError => "No error",
        NoFile => "File name is empty",
        FileError => "File I/O error",
        BadMode => "Bad mode",
        BadDimension => "Bad dimension",
        BadElementIndex => "Bad element index",
        BadSymbolIndex => "Bad symbol index",
        ElementSequence => "Element index out of sequence",
        DuplicateSymbol => "Duplicate symbol",
        DataNotSorted => "Data is not sorted",
        DataDuplicate => "Duplicate keys",
        UnknownFilter => "Unknown filter",
        BadStringFormat => "Bad string format",
        BadIdentFormat => "Illegal identifier",
        UelConflict => "UEL conflict",
        DuplicateSpecVal => "Duplicate special value",
        BadErrorRecord => "Bad error record",
        DuplicateUel => "Duplicate UEL",
        BadUelStr => "Bad UEL string",
        UndefUel => "Undefined UEL",
        UelSecondWrite => "UEL table already written",
        UelNotEmpty => "UEL table not empty",
        BadFilterNr => "Bad filter number",
        BadFilterIndex => "Bad filter index",
        FilterUnmapped => "Unmapped element in filter",
        ObsoleteFunction => "Obsolete function",
        RawNotSorted => "Data not sorted (raw mode)",
        BadAliasDim => "Alias dimension mismatch",
        BadDataMarkerData => "Bad data marker (data)",
        BadDataMarkerDim => "Bad data marker (dim)",
        OpenBoi => "Cannot find beginning-of-index marker",
        OpenFileHeader => "Bad file header",
        OpenFileVersion => "Unsupported file version",
        OpenFileMarker => "Bad file marker",
        OpenSymbolMarker1 | OpenSymbolMarker2 => "Bad symbol table marker",
        OpenUelMarker1 | OpenUelMarker2 => "Bad UEL table marker",
        OpenTextMarker1 | OpenTextMarker2 => "Bad set-text table marker",
        BadDataFormat => "Bad data format",
        OutOfMemory => "Out of memory",
        ZlibNotFound => "Compression library not available",
        OpenAcroMarker1 | OpenAcroMarker2 => "Bad acronym table marker",
        BadAcroIndex => "Bad acronym index",
        BadAcroNumber => "Bad acronym number",
        BadAcroName => "Bad acronym name",
        AcroDupeMap => "Acronym already mapped to a different index",
        AcroBadAddition => "Cannot add acronym",
        UnknownDomain => "Unknown domain",
        BadDomain => "Bad domain",
        NoDomainData => "No domain data",
        AliasSetExpected => "Alias target must be a set",
        BadDataType => "Bad data type",
        NoSymbolForComment => "No symbol for comment",
        DomainViolation => "Domain violation",
        FileAlreadyOpen => "File already open",
        FileTooOldForAppend => "File too old to append to",
        OpenDomsMarker1 | OpenDomsMarker2 | OpenDomsMarker3 => "Bad domain-string table marker",
    }
}

/// Trace verbosity gating stderr output.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Default, serde::Serialize, serde::Deserialize)]
pub enum TraceLevel {
    #[default]
    None,
    Errors,
    Some,
    All,
}

impl TraceLevel {
    pub fn allows(self, required: TraceLevel) -> bool {
        self >= required
    }
}

//! Open/write-time configuration: plain `serde`-derived option structs.
//!
//! Two small structs rather than one: [`SpecialValues`] is data that travels
//! with a single file (it is read back from the header's special-value
//! overrides on some GDX variants), while [`GdxWriteOptions`] is caller-side
//! policy that never touches the wire.

use serde::{Deserialize, Serialize};

use crate::error::{Error, GdxErrorCode, TraceLevel};

/// The five distinguished double bit patterns, plus the three small
/// constants that also get their own indicator byte.
///
/// The mapping is user-overridable but must remain pairwise distinct
/// [`Self::validate`] is the one place that invariant is checked.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SpecialValues {
    pub undef: f64,
    pub na: f64,
    pub posinf: f64,
    pub neginf: f64,
    pub eps: f64,
}

/// `GMS_SV_UNDEF`'s bit pattern: a NaN payload distinct from the one used
/// for "not available" below.
const UNDEF_BITS: u64 = 0x7FF0_0000_0000_0001;

impl Default for SpecialValues {
    fn default() -> Self {
        SpecialValues {
            undef: f64::from_bits(UNDEF_BITS),
            na: f64::NAN,
            posinf: f64::INFINITY,
            neginf: f64::NEG_INFINITY,
            eps: 0.0,
        }
    }
}

impl SpecialValues {
    /// Returns `Err` if any two of the five values share a bit pattern.
    pub fn validate(&self) -> Result<(), Error> {
        let bits = [
            self.undef.to_bits(),
            self.na.to_bits(),
            self.posinf.to_bits(),
            self.neginf.to_bits(),
            self.eps.to_bits(),
        ];
        for i in 0..bits.len() {
            for j in (i + 1)..bits.len() {
                if bits[i] == bits[j] {
                    return Err(Error::Code(GdxErrorCode::DuplicateSpecVal));
                }
            }
        }
        Ok(())
    }
}

/// File-version support: a writer always targets `CURRENT`; a reader must
/// accept any version down to `MIN_LEGACY`.
pub const CURRENT_FILE_VERSION: i32 = 7;
pub const MIN_LEGACY_VERSION: i32 = 5;
/// Versions at or below this used a fixed 10-dimension cap for delta encoding.
pub const LEGACY_MAX_DIM_VERSION: i32 = 6;
pub const LEGACY_MAX_DIM: usize = 10;

/// Options governing how a file is opened for writing.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GdxWriteOptions {
    #[serde(default)]
    pub compress: bool,
    #[serde(default = "default_producer")]
    pub producer: String,
    #[serde(default)]
    pub audit_line: String,
    #[serde(default)]
    pub special_values: SpecialValues,
    #[serde(default = "default_file_version")]
    pub file_version: i32,
    #[serde(default)]
    pub trace_level: TraceLevel,
}

fn default_producer() -> String {
    "gdx-rs".to_string()
}

fn default_file_version() -> i32 {
    CURRENT_FILE_VERSION
}

impl Default for GdxWriteOptions {
    fn default() -> Self {
        GdxWriteOptions {
            compress: false,
            producer: default_producer(),
            audit_line: String::new(),
            special_values: SpecialValues::default(),
            file_version: CURRENT_FILE_VERSION,
            trace_level: TraceLevel::default(),
        }
    }
}

/// Options governing how an existing file is opened for reading.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct GdxReadOptions {
    #[serde(default)]
    pub special_values: SpecialValues,
    #[serde(default)]
    pub trace_level: TraceLevel,
}

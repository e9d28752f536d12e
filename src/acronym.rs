//! Acronym table: named symbolic values encoded into double fields via the
//! `i * 10^300` convention.

use crate::error::{Error, GdxErrorCode};
use crate::util::{is_good_ident, sanitize_text};

/// The magnitude above which a double is treated as an acronym encoding
/// rather than an ordinary finite value.
pub const ACRONYM_BASE: f64 = 1.0e300;

/// Encodes acronym index `i` (`i >= 1`) as a double.
pub fn encode(i: i64) -> f64 {
    i as f64 * ACRONYM_BASE
}

/// Returns `true` if `v` is in acronym-encoding range.
pub fn is_acronym_value(v: f64) -> bool {
    v.is_finite() && v.abs() >= ACRONYM_BASE
}

/// Recovers the acronym index encoded in `v`. Caller must have already
/// checked [`is_acronym_value`].
pub fn decode(v: f64) -> i64 {
    (v / ACRONYM_BASE).round() as i64
}

#[derive(Debug, Clone)]
pub struct Acronym {
    pub name: String,
    pub text: String,
    /// The index this acronym was originally registered/encountered under.
    pub original_index: i64,
    /// Index assigned by the reader when remapping on load; `0` if unset.
    pub read_map_index: i64,
    pub auto_generated: bool,
}

#[derive(Default)]
pub struct AcronymTable {
    entries: Vec<Acronym>,
}

impl AcronymTable {
    pub fn new() -> Self {
        AcronymTable::default()
    }

    pub fn count(&self) -> usize {
        self.entries.len()
    }

    pub fn find_by_name(&self, name: &str) -> Option<usize> {
        self.entries.iter().position(|a| a.name.eq_ignore_ascii_case(name))
    }

    pub fn find_by_index(&self, original_index: i64) -> Option<usize> {
        self.entries.iter().position(|a| a.original_index == original_index)
    }

    /// Registers an acronym. Duplicate names are rejected unless
    /// `original_index` matches the existing entry's.
    pub fn add(&mut self, name: &str, text: &str, original_index: i64) -> Result<usize, Error> {
        if !is_good_ident(name) {
            return Err(Error::Code(GdxErrorCode::BadAcroName));
        }
        if let Some(idx) = self.find_by_name(name) {
            if self.entries[idx].original_index != original_index {
                return Err(Error::Code(GdxErrorCode::AcroDupeMap));
            }
            return Ok(idx);
        }
        self.entries.push(Acronym {
            name: name.to_string(),
            text: sanitize_text(text),
            original_index,
            read_map_index: 0,
            auto_generated: false,
        });
        Ok(self.entries.len() - 1)
    }

    /// Registers an acronym encountered while reading, auto-naming it when
    /// the caller has no prior registration for `original_index`.
    pub fn add_auto(&mut self, original_index: i64) -> usize {
        if let Some(idx) = self.find_by_index(original_index) {
            return idx;
        }
        let name = format!("acronym{original_index}");
        self.entries.push(Acronym {
            name,
            text: String::new(),
            original_index,
            read_map_index: original_index,
            auto_generated: true,
        });
        self.entries.len() - 1
    }

    pub fn set_read_map_index(&mut self, idx: usize, read_map_index: i64) {
        self.entries[idx].read_map_index = read_map_index;
    }

    pub fn get(&self, idx: usize) -> &Acronym {
        &self.entries[idx]
    }

    pub fn iter(&self) -> impl Iterator<Item = &Acronym> {
        self.entries.iter()
    }

    pub fn save(&self, writer: &mut impl crate::stream::GdxWrite) -> std::io::Result<()> {
        writer.write_int(self.entries.len() as i32)?;
        for a in &self.entries {
            writer.write_gdx_string(&a.name)?;
            writer.write_gdx_string(&a.text)?;
            writer.write_int(a.original_index as i32)?;
        }
        Ok(())
    }

    pub fn load(&mut self, reader: &mut impl crate::stream::GdxRead) -> std::io::Result<()> {
        let count = reader.read_int()?;
        self.entries.clear();
        for _ in 0..count {
            let name = reader.read_gdx_string()?;
            let text = reader.read_gdx_string()?;
            let original_index = reader.read_int()? as i64;
            self.entries.push(Acronym {
                name,
                text,
                original_index,
                read_map_index: original_index,
                auto_generated: false,
            });
        }
        Ok(())
    }
}

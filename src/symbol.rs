//! Symbol table: ordered name -> descriptor map.
//!
//! Symbol kinds are a tagged variant over an arena index rather than object
//! pointers: an alias holds the *ordinal* of its target symbol (0 for the
//! universe), domain references hold per-dimension ordinals, and everything
//! is resolved lazily through [`SymbolTable::get`].

use crate::error::{Error, GdxErrorCode};
use crate::interner::{CaseMode, StringInterner};
use crate::util::{is_good_ident, sanitize_text, MAX_DIMENSION};

/// Variable/equation subkind, with the default level/marginal/lower/upper
/// bounds a record gets before any value is written, drawn from a static
/// table indexed by subtype.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum VarEquType {
    Unknown = 0,
    Binary = 1,
    Integer = 2,
    Positive = 3,
    Negative = 4,
    Free = 5,
    SOS1 = 6,
    SOS2 = 7,
    SemiCont = 8,
    SemiInt = 9,
}

impl VarEquType {
    /// Recovers a subtype from the raw `user_info` byte stored on
    /// [`SymbolKind::Variable`]/[`SymbolKind::Equation`], falling back to
    /// `Unknown` for anything out of range.
    pub fn from_subtype(t: u8) -> Self {
        match t {
            1 => VarEquType::Binary,
            2 => VarEquType::Integer,
            3 => VarEquType::Positive,
            4 => VarEquType::Negative,
            5 => VarEquType::Free,
            6 => VarEquType::SOS1,
            7 => VarEquType::SOS2,
            8 => VarEquType::SemiCont,
            9 => VarEquType::SemiInt,
            _ => VarEquType::Unknown,
        }
    }
}

/// Default `(level, marginal, lower, upper, scale)` record for a fresh
/// variable/equation of this subtype.
pub fn default_record(kind: VarEquType) -> [f64; 5] {
    use VarEquType::*;
    match kind {
        Binary => [0.0, 0.0, 0.0, 1.0, 1.0],
        Integer => [0.0, 0.0, 0.0, f64::INFINITY, 1.0],
        Negative => [0.0, 0.0, f64::NEG_INFINITY, 0.0, 1.0],
        Positive | SemiCont | SemiInt => [0.0, 0.0, 0.0, f64::INFINITY, 1.0],
        Free | Unknown => [0.0, 0.0, f64::NEG_INFINITY, f64::INFINITY, 1.0],
        SOS1 | SOS2 => [0.0, 0.0, 0.0, f64::INFINITY, 1.0],
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SymbolKind {
    Set,
    Parameter,
    Variable(u8),
    Equation(u8),
    /// Ordinal of the aliased symbol; `0` for the universe alias.
    Alias(i32),
}

impl SymbolKind {
    /// `valCount` for a record of this kind: 1 for sets/parameters, 5 for
    /// variables/equations.
    pub fn val_count(&self) -> usize {
        match self {
            SymbolKind::Set | SymbolKind::Parameter | SymbolKind::Alias(_) => 1,
            SymbolKind::Variable(_) | SymbolKind::Equation(_) => 5,
        }
    }

    /// Byte tag used on the wire for the symbol table trailer.
    pub fn type_byte(&self) -> u8 {
        match self {
            SymbolKind::Set => 0,
            SymbolKind::Parameter => 1,
            SymbolKind::Variable(_) => 2,
            SymbolKind::Equation(_) => 3,
            SymbolKind::Alias(_) => 4,
        }
    }

    /// The `user_info` trailer field: variable/equation subtype, alias
    /// target ordinal, or 0 for set/parameter.
    pub fn user_info(&self) -> i32 {
        match self {
            SymbolKind::Variable(t) | SymbolKind::Equation(t) => *t as i32,
            SymbolKind::Alias(target) => *target,
            SymbolKind::Set | SymbolKind::Parameter => 0,
        }
    }
}

/// A per-dimension domain reference: either a resolved symbol ordinal
/// (`0` = universe) or, for a relaxed domain, an identifier name that may
/// not (yet) name a registered set.
#[derive(Debug, Clone)]
pub enum DomainRef {
    Ordinal(i32),
    Relaxed(String),
}

#[derive(Debug, Clone)]
pub struct SymbolDescriptor {
    pub name: String,
    pub ordinal: i32,
    pub dim: usize,
    pub kind: SymbolKind,
    pub record_count: i64,
    pub error_count: i64,
    pub explanatory_text: String,
    pub compressed: bool,
    pub domain: Option<Vec<DomainRef>>,
    pub comments: Vec<String>,
    /// Present only for dim-1 sets/aliases with domain-set storage enabled.
    pub set_bitmap: Option<Vec<bool>>,
    /// Byte offset of the `_DATA_` block for this symbol; `0` until written.
    pub position: i64,
    /// Per-dimension domain-check bitmaps set by domain registration.
    pub wr_bitmap: Vec<Option<Vec<bool>>>,
}

impl SymbolDescriptor {
    fn universe() -> Self {
        SymbolDescriptor {
            name: "*".to_string(),
            ordinal: 0,
            dim: 1,
            kind: SymbolKind::Set,
            record_count: 0,
            error_count: 0,
            explanatory_text: String::new(),
            compressed: false,
            domain: None,
            comments: Vec::new(),
            set_bitmap: None,
            position: 0,
            wr_bitmap: vec![None],
        }
    }
}

/// Ordered name -> descriptor map. Symbol 0 is always the implicit universe:
/// dimension 1, type set, name `*`.
pub struct SymbolTable {
    names: StringInterner,
    descriptors: Vec<SymbolDescriptor>,
}

impl Default for SymbolTable {
    fn default() -> Self {
        Self::new()
    }
}

impl SymbolTable {
    pub fn new() -> Self {
        let mut names = StringInterner::new(CaseMode::Insensitive);
        names.add("*");
        SymbolTable {
            names,
            descriptors: vec![SymbolDescriptor::universe()],
        }
    }

    /// Number of real symbols, excluding the universe.
    pub fn count(&self) -> usize {
        self.descriptors.len() - 1
    }

    pub fn find(&self, name: &str) -> Option<i32> {
        self.names.index_of(name).map(|id| (id - 1) as i32)
    }

    pub fn get(&self, ordinal: i32) -> &SymbolDescriptor {
        &self.descriptors[ordinal as usize]
    }

    pub fn get_mut(&mut self, ordinal: i32) -> &mut SymbolDescriptor {
        &mut self.descriptors[ordinal as usize]
    }

    /// Registers a new symbol, validating its name and dimension. Returns
    /// its ordinal.
    pub fn add(
        &mut self,
        name: &str,
        dim: usize,
        kind: SymbolKind,
        explanatory_text: &str,
    ) -> Result<i32, Error> {
        if !is_good_ident(name) {
            return Err(Error::Code(GdxErrorCode::BadIdentFormat));
        }
        if dim > MAX_DIMENSION as usize {
            return Err(Error::Code(GdxErrorCode::BadDimension));
        }
        if self.find(name).is_some() {
            return Err(Error::Code(GdxErrorCode::DuplicateSymbol));
        }
        let id = self.names.add(name);
        debug_assert_eq!(id as usize, self.descriptors.len());
        let ordinal = id as i32 - 1;
        self.descriptors.push(SymbolDescriptor {
            name: name.to_string(),
            ordinal,
            dim,
            wr_bitmap: vec![None; dim],
            kind,
            record_count: 0,
            error_count: 0,
            explanatory_text: sanitize_text(explanatory_text),
            compressed: false,
            domain: None,
            comments: Vec::new(),
            set_bitmap: None,
            position: 0,
        });
        Ok(ordinal)
    }

    pub fn iter(&self) -> impl Iterator<Item = &SymbolDescriptor> {
        self.descriptors.iter().skip(1)
    }
}

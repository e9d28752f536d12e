//! Ordered, optionally case-insensitive string interner.
//!
//! Ids are assigned in insertion order starting at 1, a custom hash table
//! (not `std::collections::HashMap`) buckets entries by a `211 * acc +
//! byte` rolling hash masked to 31 bits, and the table is rehashed into one
//! of a handful of fixed prime sizes as the entry count crosses thresholds.
//! A lazily-built permutation supports enumerating entries in sorted order
//! without disturbing insertion-order ids.

use std::cmp::Ordering;

const HASH_SIZES: [usize; 6] = [997, 9973, 99991, 999979, 9999991, 99999989];
const REHASH_AT: [usize; 6] = [1500, 15000, 150000, 1500000, 15000000, usize::MAX];

fn table_size_for_count(count: usize) -> usize {
    for (i, &threshold) in REHASH_AT.iter().enumerate() {
        if count < threshold {
            return HASH_SIZES[i];
        }
    }
    *HASH_SIZES.last().unwrap()
}

/// Whether lookups and hashing fold ASCII case.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CaseMode {
    Insensitive,
    Sensitive,
}

fn fold(c: u8, mode: CaseMode) -> u8 {
    match mode {
        CaseMode::Insensitive => c.to_ascii_uppercase(),
        CaseMode::Sensitive => c,
    }
}

fn hash_str(s: &str, table_size: usize, mode: CaseMode) -> usize {
    let mut acc: u32 = 0;
    for &b in s.as_bytes() {
        acc = acc.wrapping_mul(211).wrapping_add(fold(b, mode) as u32);
    }
    ((acc & 0x7FFF_FFFF) as usize) % table_size
}

fn entry_equal(a: &str, b: &str, mode: CaseMode) -> bool {
    match mode {
        CaseMode::Insensitive => a.eq_ignore_ascii_case(b),
        CaseMode::Sensitive => a == b,
    }
}

fn compare(a: &str, b: &str, mode: CaseMode) -> Ordering {
    match mode {
        CaseMode::Insensitive => {
            let au = a.to_ascii_uppercase();
            let bu = b.to_ascii_uppercase();
            au.cmp(&bu)
        }
        CaseMode::Sensitive => a.cmp(b),
    }
}

/// One bucket slot: the string, and the next entry (by insertion index)
/// chained into the same hash slot.
struct Bucket {
    value: String,
    next: i64,
}

/// An append-only, 1-based string interner.
pub struct StringInterner {
    mode: CaseMode,
    entries: Vec<Bucket>,
    table_size: usize,
    rehash_at: usize,
    table: Vec<i64>,
    sort_map: Option<Vec<usize>>,
}

impl StringInterner {
    pub fn new(mode: CaseMode) -> Self {
        let table_size = HASH_SIZES[0];
        StringInterner {
            mode,
            entries: Vec::new(),
            table_size,
            rehash_at: REHASH_AT[0],
            table: vec![-1; table_size],
            sort_map: None,
        }
    }

    pub fn count(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    fn rehash(&mut self) {
        self.table_size = table_size_for_count(self.entries.len());
        self.rehash_at = REHASH_AT
            .iter()
            .zip(HASH_SIZES.iter())
            .find(|(_, &size)| size == self.table_size)
            .map(|(&next, _)| next)
            .unwrap_or(usize::MAX);
        self.table = vec![-1; self.table_size];
        for idx in 0..self.entries.len() {
            let hv = hash_str(&self.entries[idx].value, self.table_size, self.mode);
            self.entries[idx].next = self.table[hv];
            self.table[hv] = idx as i64;
        }
    }

    /// Returns the 1-based id of `s`, interning it if not already present.
    pub fn add(&mut self, s: &str) -> u32 {
        if let Some(id) = self.index_of(s) {
            return id;
        }
        if self.entries.len() >= self.rehash_at {
            self.rehash();
        }
        let hv = hash_str(s, self.table_size, self.mode);
        let idx = self.entries.len();
        self.entries.push(Bucket {
            value: s.to_string(),
            next: self.table[hv],
        });
        self.table[hv] = idx as i64;
        self.sort_map = None;
        (idx + 1) as u32
    }

    /// Looks up `s`, returning its 1-based id if present.
    pub fn index_of(&self, s: &str) -> Option<u32> {
        let hv = hash_str(s, self.table_size, self.mode);
        let mut cursor = self.table[hv];
        while cursor >= 0 {
            let bucket = &self.entries[cursor as usize];
            if entry_equal(&bucket.value, s, self.mode) {
                return Some((cursor + 1) as u32);
            }
            cursor = bucket.next;
        }
        None
    }

    /// Renames the entry at 1-based `id` to `s`, re-bucketing it by hash.
    pub fn rename(&mut self, id: u32, s: &str) {
        let idx = (id - 1) as usize;
        let old_hv = hash_str(&self.entries[idx].value, self.table_size, self.mode);
        let new_hv = hash_str(s, self.table_size, self.mode);
        if old_hv != new_hv {
            if self.table[old_hv] as usize == idx {
                self.table[old_hv] = self.entries[idx].next;
            } else {
                let mut cur = self.table[old_hv];
                while self.entries[cur as usize].next as usize != idx {
                    cur = self.entries[cur as usize].next;
                }
                self.entries[cur as usize].next = self.entries[idx].next;
            }
            self.entries[idx].next = self.table[new_hv];
            self.table[new_hv] = idx as i64;
        }
        self.entries[idx].value = s.to_string();
        self.sort_map = None;
    }

    /// Returns the string stored at 1-based `id`.
    pub fn get(&self, id: u32) -> &str {
        &self.entries[(id - 1) as usize].value
    }

    fn ensure_sorted(&mut self) {
        if self.sort_map.is_some() {
            return;
        }
        let mut map: Vec<usize> = (0..self.entries.len()).collect();
        map.sort_by(|&a, &b| compare(&self.entries[a].value, &self.entries[b].value, self.mode));
        self.sort_map = Some(map);
    }

    /// Returns the 1-based id of the `n`-th entry (0-based `n`) in sorted
    /// order, building the sort permutation lazily on first call.
    pub fn sorted_id(&mut self, n: usize) -> u32 {
        self.ensure_sorted();
        (self.sort_map.as_ref().unwrap()[n] + 1) as u32
    }

    pub fn save(&mut self, writer: &mut impl crate::stream::GdxWrite) -> std::io::Result<()> {
        writer.write_int(self.entries.len() as i32)?;
        for idx in 0..self.entries.len() {
            writer.write_gdx_string(&self.entries[idx].value)?;
        }
        Ok(())
    }

    pub fn load(&mut self, reader: &mut impl crate::stream::GdxRead) -> std::io::Result<()> {
        let count = reader.read_int()?;
        self.entries.clear();
        self.table = vec![-1; self.table_size];
        self.sort_map = None;
        for _ in 0..count {
            let s = reader.read_gdx_string()?;
            self.add(&s);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ids_are_consecutive_from_one() {
        let mut interner = StringInterner::new(CaseMode::Insensitive);
        assert_eq!(interner.add("i1"), 1);
        assert_eq!(interner.add("i2"), 2);
        assert_eq!(interner.add("i1"), 1);
        assert_eq!(interner.count(), 2);
    }

    #[test]
    fn case_insensitive_lookup_preserves_storage_case() {
        let mut interner = StringInterner::new(CaseMode::Insensitive);
        let id = interner.add("Seattle");
        assert_eq!(interner.index_of("SEATTLE"), Some(id));
        assert_eq!(interner.get(id), "Seattle");
    }

    #[test]
    fn case_sensitive_variant_distinguishes_case() {
        let mut interner = StringInterner::new(CaseMode::Sensitive);
        let a = interner.add("Seattle");
        let b = interner.add("SEATTLE");
        assert_ne!(a, b);
    }

    #[test]
    fn rename_preserves_lookup() {
        let mut interner = StringInterner::new(CaseMode::Insensitive);
        let id = interner.add("i1");
        interner.rename(id, "i1-renamed");
        assert_eq!(interner.index_of("i1"), None);
        assert_eq!(interner.index_of("i1-renamed"), Some(id));
    }

    #[test]
    fn rehashing_preserves_all_entries() {
        let mut interner = StringInterner::new(CaseMode::Insensitive);
        for i in 0..2000 {
            interner.add(&format!("uel{i}"));
        }
        assert_eq!(interner.count(), 2000);
        for i in 0..2000 {
            assert_eq!(interner.index_of(&format!("uel{i}")), Some((i + 1) as u32));
        }
    }

    #[test]
    fn sorted_enumeration_does_not_change_ids() {
        let mut interner = StringInterner::new(CaseMode::Insensitive);
        interner.add("zebra");
        interner.add("apple");
        interner.add("mango");
        let id0 = interner.sorted_id(0);
        let id1 = interner.sorted_id(1);
        let id2 = interner.sorted_id(2);
        assert_eq!(interner.get(id0), "apple");
        assert_eq!(interner.get(id1), "mango");
        assert_eq!(interner.get(id2), "zebra");
        assert_eq!(interner.index_of("zebra"), Some(1));
    }
}

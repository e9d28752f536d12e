//! Set-text table: explanatory texts attached to set element records.
//! Append-only and zero-based; slot 0 is always the empty string.

use crate::util::{sanitize_text, MAX_TEXT_LEN};

struct SetTextEntry {
    text: String,
    node_number: i32,
    referenced: bool,
}

pub struct SetTextTable {
    entries: Vec<SetTextEntry>,
}

impl Default for SetTextTable {
    fn default() -> Self {
        Self::new()
    }
}

impl SetTextTable {
    pub fn new() -> Self {
        SetTextTable {
            entries: vec![SetTextEntry {
                text: String::new(),
                node_number: 0,
                referenced: false,
            }],
        }
    }

    pub fn count(&self) -> usize {
        self.entries.len()
    }

    /// Adds `text` (truncated to [`MAX_TEXT_LEN`] bytes), returning the
    /// existing zero-based index on an exact (case-sensitive) re-add.
    pub fn add(&mut self, text: &str) -> i32 {
        let text = sanitize_text(text);
        if let Some(idx) = self.entries.iter().position(|e| e.text == text) {
            self.entries[idx].referenced = true;
            return idx as i32;
        }
        self.entries.push(SetTextEntry {
            text,
            node_number: 0,
            referenced: true,
        });
        (self.entries.len() - 1) as i32
    }

    pub fn get(&self, index: i32) -> &str {
        &self.entries[index as usize].text
    }

    pub fn set_node_number(&mut self, index: i32, node_number: i32) {
        self.entries[index as usize].node_number = node_number;
    }

    pub fn node_number(&self, index: i32) -> i32 {
        self.entries[index as usize].node_number
    }

    pub fn is_referenced(&self, index: i32) -> bool {
        self.entries[index as usize].referenced
    }

    pub fn save(&self, writer: &mut impl crate::stream::GdxWrite) -> std::io::Result<()> {
        // Index 0 (the empty string) is implicit and not stored.
        writer.write_int((self.entries.len() - 1) as i32)?;
        for entry in self.entries.iter().skip(1) {
            writer.write_gdx_string(&entry.text)?;
            writer.write_int(entry.node_number)?;
        }
        Ok(())
    }

    pub fn load(&mut self, reader: &mut impl crate::stream::GdxRead) -> std::io::Result<()> {
        let count = reader.read_int()?;
        self.entries.truncate(1);
        for _ in 0..count {
            let text = reader.read_gdx_string()?;
            let node_number = reader.read_int()?;
            self.entries.push(SetTextEntry {
                text,
                node_number,
                referenced: false,
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn index_zero_is_empty_string() {
        let table = SetTextTable::new();
        assert_eq!(table.get(0), "");
    }

    #[test]
    fn adding_duplicate_returns_existing_index() {
        let mut table = SetTextTable::new();
        let a = table.add("capital");
        let b = table.add("capital");
        assert_eq!(a, b);
        assert_eq!(table.count(), 2);
    }

    #[test]
    fn dedup_is_case_sensitive() {
        let mut table = SetTextTable::new();
        let a = table.add("Capital");
        let b = table.add("capital");
        assert_ne!(a, b);
    }

    #[test]
    fn text_longer_than_255_is_truncated() {
        let mut table = SetTextTable::new();
        let long = "y".repeat(300);
        let idx = table.add(&long);
        assert_eq!(table.get(idx).len(), MAX_TEXT_LEN);
    }

    #[test]
    fn node_numbers_round_trip() {
        let mut table = SetTextTable::new();
        let idx = table.add("capital");
        table.set_node_number(idx, 7);
        assert_eq!(table.node_number(idx), 7);
    }
}

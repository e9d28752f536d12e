//! UEL (Unique Element Label) table: a case-insensitive [`StringInterner`]
//! plus a bidirectional storage-index <-> user-index mapping.

use crate::error::{Error, GdxErrorCode};
use crate::interner::{CaseMode, StringInterner};
use crate::intmap::IntMap;
use crate::util::{is_good_uel_string, MAX_IDENT_LEN};

/// Classification of how the user-index assignment relates to storage
/// order, cached after a single walk and invalidated by any mapping change.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UserMapStatus {
    /// No classification has run since the last invalidation.
    Unknown,
    /// Every storage id has a user index assigned, user index == storage id.
    Sorted,
    /// Every storage id has a user index, monotonically increasing but not
    /// necessarily equal to storage id.
    SortFull,
    /// A strict prefix of storage ids has user indices assigned, in
    /// monotonically increasing order (registration still in progress).
    SortGrow,
    /// User indices were assigned out of increasing order.
    Unsorted,
}

pub struct UelTable {
    strings: StringInterner,
    /// 0-based by storage id - 1; `-1` for unassigned.
    storage_to_user: Vec<i32>,
    user_to_storage: IntMap,
    next_user_idx: i32,
    max_length: usize,
    status_cache: Option<UserMapStatus>,
}

impl Default for UelTable {
    fn default() -> Self {
        Self::new()
    }
}

impl UelTable {
    pub fn new() -> Self {
        UelTable {
            strings: StringInterner::new(CaseMode::Insensitive),
            storage_to_user: Vec::new(),
            user_to_storage: IntMap::new(),
            next_user_idx: 1,
            max_length: 0,
            status_cache: None,
        }
    }

    pub fn count(&self) -> usize {
        self.strings.count()
    }

    pub fn max_length(&self) -> usize {
        self.max_length
    }

    pub fn get_string(&self, storage_idx: i32) -> &str {
        self.strings.get(storage_idx as u32)
    }

    pub fn index_of(&self, s: &str) -> Option<i32> {
        self.strings.index_of(s).map(|id| id as i32)
    }

    pub fn storage_to_user(&self, storage_idx: i32) -> i32 {
        self.storage_to_user
            .get((storage_idx - 1) as usize)
            .copied()
            .unwrap_or(-1)
    }

    pub fn user_to_storage(&self, user_idx: i32) -> i32 {
        self.user_to_storage.get(user_idx)
    }

    fn validate(&self, s: &str) -> Result<(), Error> {
        if !is_good_uel_string(s) {
            return Err(Error::Code(GdxErrorCode::BadUelStr));
        }
        Ok(())
    }

    fn intern_raw(&mut self, s: &str) -> i32 {
        let was_new = self.strings.index_of(s).is_none();
        let id = self.strings.add(s) as i32;
        if was_new {
            self.storage_to_user.push(-1);
            self.max_length = self.max_length.max(s.len());
            self.status_cache = None;
        }
        id
    }

    /// `register_raw(s)`: add only, no user index.
    pub fn register_raw(&mut self, s: &str) -> Result<i32, Error> {
        self.validate(s)?;
        Ok(self.intern_raw(s))
    }

    /// `register_mapped(user_idx, s)`: add if new, then bind `user_idx` to
    /// its storage id. Re-registering the same storage id with the same
    /// `user_idx` is a no-op; a different `user_idx` is a conflict.
    pub fn register_mapped(&mut self, user_idx: i32, s: &str) -> Result<i32, Error> {
        self.validate(s)?;
        let storage_idx = self.intern_raw(s);
        let existing_user = self.storage_to_user(storage_idx);
        if existing_user >= 0 && existing_user != user_idx {
            return Err(Error::Code(GdxErrorCode::UelConflict));
        }
        let existing_storage = self.user_to_storage(user_idx);
        if existing_storage >= 0 && existing_storage != storage_idx {
            return Err(Error::Code(GdxErrorCode::UelConflict));
        }
        self.storage_to_user[(storage_idx - 1) as usize] = user_idx;
        self.user_to_storage.set(user_idx, storage_idx);
        self.next_user_idx = self.next_user_idx.max(user_idx + 1);
        self.status_cache = None;
        Ok(storage_idx)
    }

    /// `register_str(s) -> user_idx`: add if new; if the storage id has no
    /// user index yet, allocate the next-highest one.
    pub fn register_str(&mut self, s: &str) -> Result<i32, Error> {
        self.validate(s)?;
        let storage_idx = self.intern_raw(s);
        let existing = self.storage_to_user(storage_idx);
        if existing >= 0 {
            return Ok(existing);
        }
        self.new_user_uel(storage_idx)
    }

    /// `new_user_uel(storage_idx) -> user_idx`: like [`Self::register_str`]
    /// but addressed by an already-known storage id.
    pub fn new_user_uel(&mut self, storage_idx: i32) -> Result<i32, Error> {
        let existing = self.storage_to_user(storage_idx);
        if existing >= 0 {
            return Ok(existing);
        }
        let user_idx = self.next_user_idx;
        self.next_user_idx += 1;
        self.storage_to_user[(storage_idx - 1) as usize] = user_idx;
        self.user_to_storage.set(user_idx, storage_idx);
        self.status_cache = None;
        Ok(user_idx)
    }

    pub fn rename(&mut self, storage_idx: i32, s: &str) -> Result<(), Error> {
        self.validate(s)?;
        self.strings.rename(storage_idx as u32, s);
        Ok(())
    }

    fn classify(&self) -> UserMapStatus {
        let count = self.storage_to_user.len();
        if count == 0 {
            return UserMapStatus::Unknown;
        }
        let mut any_assigned = false;
        let mut any_unassigned = false;
        let mut prev_user = 0i32;
        let mut monotone = true;
        let mut is_identity = true;
        for (i, &u) in self.storage_to_user.iter().enumerate() {
            if u < 0 {
                any_unassigned = true;
                continue;
            }
            any_assigned = true;
            if u <= prev_user {
                monotone = false;
            }
            if u != (i as i32 + 1) {
                is_identity = false;
            }
            prev_user = u;
        }
        if !any_assigned {
            return UserMapStatus::Unknown;
        }
        if !monotone {
            return UserMapStatus::Unsorted;
        }
        if is_identity && !any_unassigned {
            return UserMapStatus::Sorted;
        }
        if any_unassigned {
            UserMapStatus::SortGrow
        } else {
            UserMapStatus::SortFull
        }
    }

    /// Walks all ids once and caches the result; any mapping change
    /// invalidates the cache.
    pub fn user_map_status(&mut self) -> UserMapStatus {
        if let Some(status) = self.status_cache {
            return status;
        }
        let status = self.classify();
        self.status_cache = Some(status);
        status
    }

    pub fn save(&mut self, writer: &mut impl crate::stream::GdxWrite) -> std::io::Result<()> {
        self.strings.save(writer)
    }

    pub fn load(&mut self, reader: &mut impl crate::stream::GdxRead) -> std::io::Result<()> {
        self.strings.load(reader)?;
        self.storage_to_user = vec![-1; self.strings.count()];
        self.status_cache = None;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bidirectional_maps_agree_after_mapped_registration() {
        let mut uels = UelTable::new();
        let storage = uels.register_mapped(5, "First").unwrap();
        assert_eq!(uels.user_to_storage(5), storage);
        assert_eq!(uels.storage_to_user(storage), 5);
    }

    #[test]
    fn reregistering_same_user_idx_succeeds() {
        let mut uels = UelTable::new();
        let storage = uels.register_mapped(5, "First").unwrap();
        assert!(uels.register_mapped(5, "First").is_ok());
        assert_eq!(uels.storage_to_user(storage), 5);
    }

    #[test]
    fn reregistering_with_different_user_idx_fails() {
        let mut uels = UelTable::new();
        uels.register_mapped(5, "First").unwrap();
        assert!(uels.register_mapped(6, "First").is_err());
    }

    #[test]
    fn register_str_allocates_next_highest_user_index() {
        let mut uels = UelTable::new();
        uels.register_mapped(5, "First").unwrap();
        let idx = uels.register_str("Second").unwrap();
        assert_eq!(idx, 6);
    }

    #[test]
    fn rename_preserves_both_maps() {
        let mut uels = UelTable::new();
        let storage = uels.register_mapped(3, "i1").unwrap();
        uels.rename(storage, "i1-renamed").unwrap();
        assert_eq!(uels.storage_to_user(storage), 3);
        assert_eq!(uels.user_to_storage(3), storage);
        assert_eq!(uels.get_string(storage), "i1-renamed");
    }

    #[test]
    fn raw_registration_leaves_user_index_unassigned() {
        let mut uels = UelTable::new();
        let storage = uels.register_raw("i1").unwrap();
        assert_eq!(uels.storage_to_user(storage), -1);
    }

    #[test]
    fn bad_uel_string_is_rejected() {
        let mut uels = UelTable::new();
        let too_long = "x".repeat(MAX_IDENT_LEN + 1);
        assert!(uels.register_raw(&too_long).is_err());
    }

    #[test]
    fn user_map_status_detects_identity_mapping() {
        let mut uels = UelTable::new();
        uels.register_mapped(1, "a").unwrap();
        uels.register_mapped(2, "b").unwrap();
        assert_eq!(uels.user_map_status(), UserMapStatus::Sorted);
    }

    #[test]
    fn user_map_status_detects_unsorted_assignment() {
        let mut uels = UelTable::new();
        uels.register_mapped(5, "a").unwrap();
        uels.register_mapped(1, "b").unwrap();
        assert_eq!(uels.user_map_status(), UserMapStatus::Unsorted);
    }
}

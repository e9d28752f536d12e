//! Out-of-order record buffer with multi-key radix sort.
//!
//! Conceptually this is a singly-linked list of fixed-size records so it can
//! grow without reallocating a contiguous buffer, with a radix sort that
//! relinks nodes into per-key buckets and concatenates them back together.
//! A `Vec<Record>` plus index-addressed buckets gives the same algorithm —
//! same bucket pass per dimension, same O(dim * (n + range)) cost, same
//! stability — without hand-rolled pointer chasing.

/// One accumulated record: `dim` integer keys, `val_count` double values.
#[derive(Debug, Clone)]
pub struct Record {
    pub keys: Vec<i32>,
    pub values: Vec<f64>,
}

pub struct Accumulator {
    dim: usize,
    val_count: usize,
    records: Vec<Record>,
    min_key: i32,
    max_key: i32,
    /// `None` once a sort has run without a subsequent [`Accumulator::reopen`]
    /// call. A linked-list radix sort has nowhere natural to leave the tail
    /// pointer once buckets are reconcatenated, so rather than silently
    /// leaving it dangling this flags further pushes as a programming error.
    tail_valid: bool,
}

impl Accumulator {
    pub fn new(dim: usize, val_count: usize) -> Self {
        Accumulator {
            dim,
            val_count,
            records: Vec::new(),
            min_key: i32::MAX,
            max_key: 0,
            tail_valid: true,
        }
    }

    pub fn count(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Appends a record, tracking the running min/max across all keys in
    /// any dimension. Panics in debug builds if called after [`Self::sort`]
    /// without an intervening [`Self::reopen`].
    pub fn push(&mut self, keys: &[i32], values: &[f64]) {
        debug_assert!(
            self.tail_valid,
            "push after sort: call reopen() first (see the linked-accumulator open question)"
        );
        debug_assert_eq!(keys.len(), self.dim);
        debug_assert_eq!(values.len(), self.val_count);
        for &k in keys {
            self.min_key = self.min_key.min(k);
            self.max_key = self.max_key.max(k);
        }
        self.records.push(Record {
            keys: keys.to_vec(),
            values: values.to_vec(),
        });
    }

    /// Re-validates the accumulator for further [`Self::push`] calls after
    /// a [`Self::sort`].
    pub fn reopen(&mut self) {
        self.tail_valid = true;
    }

    fn dim_index(map: Option<&[usize]>, d: usize) -> usize {
        map.map(|m| m[d]).unwrap_or(d)
    }

    /// Short-circuits the sort when the records are already in order under
    /// `map`.
    fn is_sorted(&self, map: Option<&[usize]>) -> bool {
        for window in self.records.windows(2) {
            let (a, b) = (&window[0], &window[1]);
            for d in 0..self.dim {
                let idx = Self::dim_index(map, d);
                match a.keys[idx].cmp(&b.keys[idx]) {
                    std::cmp::Ordering::Less => break,
                    std::cmp::Ordering::Greater => return false,
                    std::cmp::Ordering::Equal => continue,
                }
            }
        }
        true
    }

    /// Stable multi-key radix sort by all keys under the `map` permutation
    /// (dimension `d` of the sort key is `keys[map[d]]`), from last
    /// dimension to first.
    pub fn sort(&mut self, map: Option<&[usize]>) {
        if self.records.is_empty() || self.is_sorted(map) {
            self.tail_valid = false;
            return;
        }
        log::trace!("radix-sorting {} records across {} dimensions", self.records.len(), self.dim);
        let base = self.min_key;
        let bucket_count = (self.max_key - base + 1).max(1) as usize;
        let mut records = std::mem::take(&mut self.records);
        for d in (0..self.dim).rev() {
            let idx = Self::dim_index(map, d);
            let mut buckets: Vec<Vec<Record>> = (0..bucket_count).map(|_| Vec::new()).collect();
            for rec in records.drain(..) {
                let key = (rec.keys[idx] - base) as usize;
                buckets[key].push(rec);
            }
            records = buckets.into_iter().flatten().collect();
        }
        self.records = records;
        self.tail_valid = false;
    }

    /// `start_read`: sorts lazily (if needed) and returns an iterator over
    /// `(keys, values)` pairs in sorted order.
    pub fn start_read(&mut self, map: Option<&[usize]>) -> impl Iterator<Item = &Record> {
        self.sort(map);
        self.records.iter()
    }

    pub fn min_key(&self) -> i32 {
        self.min_key
    }

    pub fn max_key(&self) -> i32 {
        self.max_key
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rec(keys: &[i32]) -> (Vec<i32>, Vec<f64>) {
        (keys.to_vec(), vec![1.0])
    }

    #[test]
    fn sorts_single_dimension() {
        let mut acc = Accumulator::new(1, 1);
        for k in [5, 2, 8, 1, 3] {
            let (keys, vals) = rec(&[k]);
            acc.push(&keys, &vals);
        }
        let out: Vec<i32> = acc.start_read(None).map(|r| r.keys[0]).collect();
        assert_eq!(out, vec![1, 2, 3, 5, 8]);
    }

    #[test]
    fn sorts_lexicographically_multi_dimension() {
        let mut acc = Accumulator::new(2, 1);
        for keys in [[2, 1], [1, 2], [1, 1], [2, 2]] {
            let (k, v) = rec(&keys);
            acc.push(&k, &v);
        }
        let out: Vec<(i32, i32)> = acc.start_read(None).map(|r| (r.keys[0], r.keys[1])).collect();
        assert_eq!(out, vec![(1, 1), (1, 2), (2, 1), (2, 2)]);
    }

    #[test]
    fn sort_is_stable_for_duplicate_keys() {
        let mut acc = Accumulator::new(1, 1);
        acc.push(&[1], &[10.0]);
        acc.push(&[1], &[20.0]);
        let out: Vec<f64> = acc.start_read(None).map(|r| r.values[0]).collect();
        assert_eq!(out, vec![10.0, 20.0]);
    }

    #[test]
    fn map_permutation_sorts_by_remapped_dimension_order() {
        let mut acc = Accumulator::new(2, 1);
        for keys in [[1, 9], [1, 1], [2, 1]] {
            let (k, v) = rec(&keys);
            acc.push(&k, &v);
        }
        // map = [1, 0] sorts by dim 1 first, then dim 0.
        let out: Vec<(i32, i32)> = acc
            .start_read(Some(&[1, 0]))
            .map(|r| (r.keys[0], r.keys[1]))
            .collect();
        assert_eq!(out, vec![(1, 1), (2, 1), (1, 9)]);
    }

    #[test]
    fn already_sorted_input_short_circuits() {
        let mut acc = Accumulator::new(1, 1);
        for k in [1, 2, 3] {
            acc.push(&[k], &[0.0]);
        }
        let out: Vec<i32> = acc.start_read(None).map(|r| r.keys[0]).collect();
        assert_eq!(out, vec![1, 2, 3]);
    }

    #[test]
    #[should_panic(expected = "push after sort")]
    fn push_after_sort_without_reopen_panics_in_debug() {
        let mut acc = Accumulator::new(1, 1);
        acc.push(&[2], &[0.0]);
        acc.push(&[1], &[0.0]);
        acc.sort(None);
        acc.push(&[3], &[0.0]);
    }

    #[test]
    fn reopen_allows_further_pushes() {
        let mut acc = Accumulator::new(1, 1);
        acc.push(&[2], &[0.0]);
        acc.sort(None);
        acc.reopen();
        acc.push(&[1], &[0.0]);
        let out: Vec<i32> = acc.start_read(None).map(|r| r.keys[0]).collect();
        assert_eq!(out, vec![1, 2]);
    }
}

//! Named bitmap filters over user-index space.

use crate::error::{Error, GdxErrorCode};
use std::collections::HashMap;

pub struct Filter {
    number: i32,
    bits: Vec<bool>,
    sorted: bool,
}

impl Filter {
    fn new(number: i32, span: usize) -> Self {
        Filter {
            number,
            bits: vec![false; span],
            sorted: true,
        }
    }

    pub fn number(&self) -> i32 {
        self.number
    }

    pub fn sorted(&self) -> bool {
        self.sorted
    }

    /// Whether `user_idx` was set in the bitmap. Out-of-range indices are
    /// simply not present — they're unmapped entries, which divert to the
    /// error list the same way a missing bit does.
    pub fn contains(&self, user_idx: i32) -> bool {
        let idx = (user_idx - 1) as usize;
        self.bits.get(idx).copied().unwrap_or(false)
    }
}

#[derive(Default)]
pub struct FilterTable {
    filters: HashMap<i32, Filter>,
    building: Option<(Filter, Vec<i32>)>,
}

impl FilterTable {
    pub fn new() -> Self {
        FilterTable::default()
    }

    /// `filter_register_start(nr)`: allocates a named bitmap spanning the
    /// current user-index range.
    pub fn register_start(&mut self, nr: i32, span: usize) {
        self.building = Some((Filter::new(nr, span), Vec::new()));
    }

    /// `filter_register(user_idx)`: sets a bit in the filter under
    /// construction.
    pub fn register(&mut self, user_idx: i32) -> Result<(), Error> {
        let (filter, order) = self
            .building
            .as_mut()
            .ok_or(Error::Code(GdxErrorCode::BadFilterNr))?;
        let idx = (user_idx - 1) as usize;
        if user_idx < 1 || idx >= filter.bits.len() {
            return Err(Error::Code(GdxErrorCode::BadFilterIndex));
        }
        filter.bits[idx] = true;
        order.push(user_idx);
        Ok(())
    }

    /// `filter_register_done()`: finalizes the filter under construction,
    /// reclassifying `sorted` by whether the registration order was
    /// monotonically increasing, and stores it under its number.
    pub fn register_done(&mut self) -> Result<i32, Error> {
        let (mut filter, order) = self
            .building
            .take()
            .ok_or(Error::Code(GdxErrorCode::BadFilterNr))?;
        filter.sorted = order.windows(2).all(|w| w[0] < w[1]);
        let nr = filter.number;
        self.filters.insert(nr, filter);
        Ok(nr)
    }

    pub fn get(&self, nr: i32) -> Option<&Filter> {
        self.filters.get(&nr)
    }
}

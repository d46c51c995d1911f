// Copyright: Kyler Chin <kyler@catenarymaps.org>
// Catenary Transit Initiatives

//! Compact bitset over the days of a feed's calendar window.
//!
//! Bit `k` marks day `k` counted from the feed start date. Equality and
//! hashing ignore trailing zero words, so two sets with the same days are
//! interchangeable as interning keys regardless of how they were grown.

use serde::{Deserialize, Serialize};
use std::hash::{Hash, Hasher};

const WORD_BITS: usize = 64;

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct DayBitset {
    words: Vec<u64>,
}

impl DayBitset {
    pub fn new() -> Self {
        Self { words: Vec::new() }
    }

    /// Preallocates room for `days` bits. Purely a capacity hint; the set
    /// still grows on demand.
    pub fn with_days(days: usize) -> Self {
        Self {
            words: vec![0; days.div_ceil(WORD_BITS)],
        }
    }

    pub fn set(&mut self, day: usize) {
        let word = day / WORD_BITS;
        if word >= self.words.len() {
            self.words.resize(word + 1, 0);
        }
        self.words[word] |= 1u64 << (day % WORD_BITS);
    }

    pub fn get(&self, day: usize) -> bool {
        self.words
            .get(day / WORD_BITS)
            .is_some_and(|w| w & (1u64 << (day % WORD_BITS)) != 0)
    }

    /// Number of set days.
    pub fn cardinality(&self) -> usize {
        self.words.iter().map(|w| w.count_ones() as usize).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.words.iter().all(|&w| w == 0)
    }

    /// True when at least one day is set in both sets.
    pub fn intersects(&self, other: &DayBitset) -> bool {
        self.words
            .iter()
            .zip(other.words.iter())
            .any(|(a, b)| a & b != 0)
    }

    pub fn or_with(&mut self, other: &DayBitset) {
        if other.words.len() > self.words.len() {
            self.words.resize(other.words.len(), 0);
        }
        for (a, b) in self.words.iter_mut().zip(other.words.iter()) {
            *a |= b;
        }
    }

    pub fn and_with(&mut self, other: &DayBitset) {
        for (i, a) in self.words.iter_mut().enumerate() {
            *a &= other.words.get(i).copied().unwrap_or(0);
        }
    }

    /// Clears every day that is set in `other`.
    pub fn and_not(&mut self, other: &DayBitset) {
        for (a, b) in self.words.iter_mut().zip(other.words.iter()) {
            *a &= !b;
        }
    }

    /// Returns a copy with every set day moved `days` later. Used for trips
    /// whose scheduled times spill past midnight into the next calendar day.
    pub fn shift_left_by(&self, days: usize) -> DayBitset {
        if days == 0 {
            return self.clone();
        }
        let mut shifted = DayBitset::new();
        for day in self.ones() {
            shifted.set(day + days);
        }
        shifted
    }

    /// Iterates set day indices in ascending order.
    pub fn ones(&self) -> impl Iterator<Item = usize> + '_ {
        self.words.iter().enumerate().flat_map(|(i, &word)| {
            (0..WORD_BITS)
                .filter(move |bit| word & (1u64 << bit) != 0)
                .map(move |bit| i * WORD_BITS + bit)
        })
    }

    fn trimmed(&self) -> &[u64] {
        let mut len = self.words.len();
        while len > 0 && self.words[len - 1] == 0 {
            len -= 1;
        }
        &self.words[..len]
    }
}

impl PartialEq for DayBitset {
    fn eq(&self, other: &Self) -> bool {
        self.trimmed() == other.trimmed()
    }
}

impl Eq for DayBitset {}

impl Hash for DayBitset {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.trimmed().hash(state);
    }
}

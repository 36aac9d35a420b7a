//! Address indexes over module-relative offsets.
//!
//! [`SymbolRangeList`] maps half-open ranges `[start, end)` to the symbols
//! that cover them. Ranges from different symbols may overlap (a function and
//! a global inside it); the list maintains the invariant that any two stored
//! ranges are either disjoint or identical, splitting stored ranges as
//! insertions and removals require.
//!
//! [`PublicAddressList`] maps exact addresses to public symbols and answers
//! nearest-at-or-below queries.


use crate::sym::SymbolId;

/// One stored range and the symbols covering it.
#[derive(Clone, Debug)]
struct AddressRange {
    start: u64,
    end: u64,
    symbols: Vec<SymbolId>,
}

/// A list of half-open address ranges in sorted order, binary searchable by
/// offset.
#[derive(Default)]
pub struct SymbolRangeList {
    ranges: Vec<AddressRange>,
}

fn remove_one(list: &mut Vec<SymbolId>, symbol: SymbolId) {
    if let Some(pos) = list.iter().position(|&s| s == symbol) {
        list.remove(pos);
    }
}

impl SymbolRangeList {
    /// Creates an empty range list.
    pub fn new() -> Self {
        Self::default()
    }

    /// Finds the symbols whose ranges cover `offset`.
    pub fn find(&self, offset: u64) -> Option<&[SymbolId]> {
        let idx = self.ranges.partition_point(|r| r.end <= offset);
        let rng = self.ranges.get(idx)?;
        if rng.start <= offset {
            Some(&rng.symbols)
        } else {
            None
        }
    }

    /// Adds `symbol` over the half-open range `[start, end)`, splitting
    /// stored ranges as needed so the covered region is a union of full
    /// sub-ranges each carrying the symbol.
    pub fn add(&mut self, mut start: u64, end: u64, symbol: SymbolId) {
        if start >= end {
            return;
        }

        let mut cur = self.ranges.partition_point(|r| r.end < start);

        if cur == self.ranges.len() {
            self.ranges.push(AddressRange {
                start,
                end,
                symbols: vec![symbol],
            });
            return;
        }

        if end <= self.ranges[cur].start {
            self.ranges.insert(
                cur,
                AddressRange {
                    start,
                    end,
                    symbols: vec![symbol],
                },
            );
            return;
        }

        // There is overlap with at least one stored range. Walk forward,
        // adding the symbol where a stored range lies inside [start, end) and
        // splitting where one straddles a boundary.
        while start < end {
            if cur >= self.ranges.len() {
                self.ranges.push(AddressRange {
                    start,
                    end,
                    symbols: vec![symbol],
                });
                return;
            }

            let (rng_start, rng_end) = {
                let rng = &self.ranges[cur];
                (rng.start, rng.end)
            };

            if start == rng_start && end == rng_end {
                self.ranges[cur].symbols.push(symbol);
                return;
            }

            // A leading piece before the current stored range gets its own
            // new range.
            if start < rng_start {
                let piece_end = end.min(rng_start);
                self.ranges.insert(
                    cur,
                    AddressRange {
                        start,
                        end: piece_end,
                        symbols: vec![symbol],
                    },
                );
                cur += 1;
                start = piece_end;
                continue;
            }

            if start >= rng_start && start < rng_end {
                if start > rng_start {
                    // Split off the prefix [rng_start, start), which keeps
                    // its prior symbol list and does not gain the new symbol.
                    let prefix = AddressRange {
                        start: rng_start,
                        end: start,
                        symbols: self.ranges[cur].symbols.clone(),
                    };
                    self.ranges.insert(cur, prefix);
                    cur += 1;
                    self.ranges[cur].start = start;
                    continue;
                } else if end >= rng_end {
                    // The stored range lies entirely inside [start, end).
                    self.ranges[cur].symbols.push(symbol);
                    start = rng_end;
                    cur += 1;
                    continue;
                } else {
                    // The insertion ends inside the stored range: split off
                    // the suffix [end, rng_end), which retains the prior
                    // list, and add the symbol to [start, end).
                    let suffix = AddressRange {
                        start: end,
                        end: rng_end,
                        symbols: self.ranges[cur].symbols.clone(),
                    };
                    self.ranges.insert(cur + 1, suffix);
                    self.ranges[cur].end = end;
                    self.ranges[cur].symbols.push(symbol);
                    return;
                }
            }

            // An adjacent (end == start) range; move past it.
            cur += 1;
        }
    }

    /// Removes `symbol` from every stored sub-range inside `[start, end)`,
    /// splitting boundary-straddling ranges so nothing outside the region is
    /// affected. Sub-ranges left without symbols are retained as empty.
    pub fn remove(&mut self, start: u64, end: u64, symbol: SymbolId) {
        if start >= end {
            return;
        }

        let mut cur = self.ranges.partition_point(|r| r.end < start);

        while cur < self.ranges.len() && end > self.ranges[cur].start {
            let (rng_start, rng_end) = {
                let rng = &self.ranges[cur];
                (rng.start, rng.end)
            };

            if start <= rng_start && end >= rng_end {
                remove_one(&mut self.ranges[cur].symbols, symbol);
                cur += 1;
                continue;
            }

            if start > rng_start && start < rng_end {
                // Split at the removal start; the prefix keeps the symbol.
                let suffix = AddressRange {
                    start,
                    end: rng_end,
                    symbols: self.ranges[cur].symbols.clone(),
                };
                self.ranges.insert(cur + 1, suffix);
                self.ranges[cur].end = start;
                cur += 1;
                continue;
            }

            if end > rng_start && end < rng_end {
                // Split at the removal end; the suffix keeps the symbol.
                let suffix = AddressRange {
                    start: end,
                    end: rng_end,
                    symbols: self.ranges[cur].symbols.clone(),
                };
                self.ranges.insert(cur + 1, suffix);
                self.ranges[cur].end = end;
                remove_one(&mut self.ranges[cur].symbols, symbol);
                cur += 1;
                continue;
            }

            cur += 1;
        }
    }

    #[cfg(test)]
    fn assert_sorted_disjoint(&self) {
        for w in self.ranges.windows(2) {
            assert!(w[0].start < w[0].end);
            assert!(w[0].end <= w[1].start, "ranges must not overlap");
        }
    }
}

/// An entry in the public-address index.
#[derive(Clone, Debug)]
struct PublicAddress {
    address: u64,
    symbols: Vec<SymbolId>,
}

/// Public symbol addresses in sorted order, searchable for the nearest
/// symbols at or below a given address.
#[derive(Default)]
pub struct PublicAddressList {
    addresses: Vec<PublicAddress>,
}

impl PublicAddressList {
    /// Creates an empty list.
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a public symbol at an exact address.
    pub fn add(&mut self, address: u64, symbol: SymbolId) {
        let idx = self.addresses.partition_point(|a| a.address < address);
        match self.addresses.get_mut(idx) {
            Some(entry) if entry.address == address => entry.symbols.push(symbol),
            _ => self.addresses.insert(
                idx,
                PublicAddress {
                    address,
                    symbols: vec![symbol],
                },
            ),
        }
    }

    /// Removes a public symbol from an address.
    pub fn remove(&mut self, address: u64, symbol: SymbolId) {
        let idx = self.addresses.partition_point(|a| a.address < address);
        if let Some(entry) = self.addresses.get_mut(idx) {
            if entry.address == address {
                remove_one(&mut entry.symbols, symbol);
                if entry.symbols.is_empty() {
                    self.addresses.remove(idx);
                }
            }
        }
    }

    /// Finds the nearest entry at or below `address`: its exact address and
    /// the symbols registered there.
    pub fn find_nearest(&self, address: u64) -> Option<(u64, &[SymbolId])> {
        let idx = self.addresses.partition_point(|a| a.address <= address);
        let entry = self.addresses.get(idx.checked_sub(1)?)?;
        Some((entry.address, &entry.symbols))
    }
}

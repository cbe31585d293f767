// Copyright (C) 2023 Intel Corporation
// SPDX-License-Identifier: Apache-2.0

//! An open-chained `u32`-keyed map, used as the valuation dedup store.
//!
//! This deliberately does not reach for `std::collections::HashMap`: the reference
//! implementation's point is that keys are already uniform 32-bit hashes, so a plain
//! power-of-two table with chaining is sufficient and the table is allowed to grow but never
//! shrink. `fit(key) = key % table_size`; the table need not be prime since collisions among
//! uniform hash keys are harmless.

#[derive(Debug)]
struct Entry<V> {
    key: u32,
    value: V,
    next: Option<Box<Entry<V>>>,
}

/// Open-chained map keyed by `u32`. Doubles its table when the load factor exceeds 0.5.
#[derive(Debug)]
pub struct ValueMap<V> {
    table: Vec<Option<Box<Entry<V>>>>,
    size: usize,
}

impl<V> ValueMap<V> {
    pub fn new(table_size: usize) -> Self {
        let table_size = table_size.max(1);
        let mut table = Vec::with_capacity(table_size);
        table.resize_with(table_size, || None);
        Self { table, size: 0 }
    }

    fn fit(key: u32, table_size: usize) -> usize {
        (key as usize) % table_size
    }

    pub fn len(&self) -> usize {
        self.size
    }

    pub fn is_empty(&self) -> bool {
        self.size == 0
    }

    pub fn contains(&self, key: u32) -> bool {
        self.get(key).is_some()
    }

    pub fn get(&self, key: u32) -> Option<&V> {
        let idx = Self::fit(key, self.table.len());
        let mut cur = self.table[idx].as_deref();
        while let Some(entry) = cur {
            if entry.key == key {
                return Some(&entry.value);
            }
            cur = entry.next.as_deref();
        }
        None
    }

    /// Insert `key -> value`, prepending into its bucket's chain. Rehashes (doubling the table)
    /// if the load factor now exceeds 0.5.
    pub fn insert(&mut self, key: u32, value: V) {
        let idx = Self::fit(key, self.table.len());
        let entry = Box::new(Entry {
            key,
            value,
            next: self.table[idx].take(),
        });
        self.table[idx] = Some(entry);
        self.size += 1;

        if self.size > self.table.len() / 2 {
            self.resize(self.table.len() * 2);
        }
    }

    /// Remove the entry for `key`, if any, returning its value.
    pub fn remove(&mut self, key: u32) -> Option<V> {
        let idx = Self::fit(key, self.table.len());
        let mut slot = &mut self.table[idx];

        loop {
            match slot {
                Some(entry) if entry.key == key => {
                    let mut taken = slot.take().expect("checked Some above");
                    *slot = taken.next.take();
                    self.size -= 1;
                    return Some(taken.value);
                }
                Some(entry) => {
                    slot = &mut entry.next;
                }
                None => return None,
            }
        }
    }

    fn resize(&mut self, new_table_size: usize) {
        let mut new_table = Vec::with_capacity(new_table_size);
        new_table.resize_with(new_table_size, || None);

        for bucket in self.table.drain(..) {
            let mut cur = bucket;
            while let Some(mut entry) = cur {
                cur = entry.next.take();
                let idx = Self::fit(entry.key, new_table_size);
                entry.next = new_table[idx].take();
                new_table[idx] = Some(entry);
            }
        }

        self.table = new_table;
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn insert_then_get_roundtrips() {
        let mut map: ValueMap<Option<()>> = ValueMap::new(4);
        map.insert(42, None);
        assert!(map.contains(42));
        assert!(!map.contains(43));
    }

    #[test]
    fn rejects_rediscovery_but_size_grows_by_one_per_unique() {
        let mut map: ValueMap<Option<()>> = ValueMap::new(4);
        map.insert(1, None);
        let before = map.len();
        if !map.contains(1) {
            map.insert(1, None);
        }
        assert_eq!(map.len(), before);
    }

    #[test]
    fn resizes_past_half_load_factor() {
        let mut map: ValueMap<Option<()>> = ValueMap::new(4);
        for key in 0..10 {
            map.insert(key, None);
        }
        assert_eq!(map.len(), 10);
        assert!(map.table.len() > 4);
        for key in 0..10 {
            assert!(map.contains(key));
        }
    }

    #[test]
    fn remove_unlinks_entry() {
        let mut map: ValueMap<Option<()>> = ValueMap::new(4);
        map.insert(7, None);
        map.insert(11, None); // shares a bucket with 7 mod 4
        assert!(map.remove(7).is_some());
        assert!(!map.contains(7));
        assert!(map.contains(11));
    }

    #[test]
    fn never_shrinks() {
        let mut map: ValueMap<Option<()>> = ValueMap::new(4);
        for key in 0..10 {
            map.insert(key, None);
        }
        let grown = map.table.len();
        for key in 0..10 {
            map.remove(key);
        }
        assert_eq!(map.table.len(), grown);
    }
}

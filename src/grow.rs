//! Incremental growth.
//!
//! A growth allocates a new bucket array and keeps the previous one as the
//! old array. Each insert or remove then evacuates the old bucket it is about
//! to touch plus one more, in order, so the old array drains in a bounded
//! number of mutations without ever pausing for a full rehash.

use rand::RngCore;

use crate::bucket::BUCKET_SIZE;
use crate::bucket::EVACUATED_EMPTY;
use crate::bucket::EVACUATED_X;
use crate::bucket::Fallibility;
use crate::bucket::Generation;
use crate::bucket::MIN_TOP_HASH;
use crate::bucket::is_empty;
use crate::bucket::over_load_factor;
use crate::bucket::tophash;
use crate::elem::ElemType;
use crate::hash_table::GenKey;
use crate::hash_table::HashTable;
use crate::hash_table::ITERATOR;
use crate::hash_table::OLD_ITERATOR;
use crate::hash_table::SAME_SIZE_GROW;
use crate::hash_table::TryReserveError;
use crate::hash_table::occupied;

/// Upper bound on already-evacuated buckets skipped per mark advance.
const EVACUATION_SCAN_LIMIT: usize = 1024;

impl<T, E> HashTable<T, E> {
    /// Reports whether the table is growing.
    #[inline(always)]
    pub(crate) fn growing(&self) -> bool {
        self.old_buckets.is_some()
    }

    #[inline(always)]
    pub(crate) fn same_size_grow(&self) -> bool {
        self.flags & SAME_SIZE_GROW != 0
    }

    /// Number of buckets in the old array while growing.
    #[inline]
    pub(crate) fn noldbuckets(&self) -> usize {
        let mut old_b = self.b;
        if !self.same_size_grow() {
            old_b -= 1;
        }
        1 << old_b
    }

    #[inline]
    pub(crate) fn old_bucket_mask(&self) -> usize {
        self.noldbuckets() - 1
    }

    /// Increments the overflow bucket counter.
    ///
    /// Exact for tables with fewer than `2^16` buckets. Above that the counter
    /// is bumped with probability `1/2^(b-15)`, so that it reaches `2^15` at
    /// about the time there are as many overflow buckets as buckets.
    pub(crate) fn incr_noverflow(&mut self) {
        if self.b < 16 {
            self.noverflow = self.noverflow.saturating_add(1);
            return;
        }
        let mask = (1u64 << (self.b - 15).min(63)) - 1;
        if self.rng.next_u64() & mask == 0 {
            self.noverflow = self.noverflow.saturating_add(1);
        }
    }

    fn any_pinned(&self) -> bool {
        self.generations.values().any(Generation::is_pinned)
    }

    /// Hands a finished bucket array to the retired list, which keeps it
    /// alive for as long as a cursor pins it.
    pub(crate) fn retire(&mut self, key: GenKey) {
        self.retired.push(key);
        self.sweep_retired();
    }

    /// Frees retired bucket arrays that no cursor holds anymore.
    pub(crate) fn sweep_retired(&mut self) {
        let generations = &mut self.generations;
        self.retired.retain(|&key| match generations.get(key) {
            Some(generation) if generation.is_pinned() => true,
            Some(_) => {
                generations.remove(key);
                false
            }
            None => false,
        });
    }
}

impl<T, E> HashTable<T, E>
where
    E: ElemType<T>,
{
    /// Starts a growth: to the next size class when over the load factor,
    /// otherwise a same-size growth that compacts overflow chains.
    ///
    /// The new array is allocated before any state changes, so a failure
    /// leaves the table as it was. The actual copying is done incrementally by
    /// [`grow_work`](Self::grow_work).
    pub(crate) fn hash_grow(&mut self, fallibility: Fallibility) -> Result<(), TryReserveError> {
        let bigger = over_load_factor(self.count + 1, self.b);
        let new_b = if bigger {
            self.b
                .checked_add(1)
                .ok_or_else(|| fallibility.capacity_overflow())?
        } else {
            self.b
        };
        let generation = Generation::try_new(new_b, fallibility)?;

        // Commit. Evacuation must leave the old array readable if any cursor
        // can still reach it.
        let mut flags = self.flags & !(ITERATOR | OLD_ITERATOR);
        if self.flags & ITERATOR != 0 || self.any_pinned() {
            flags |= OLD_ITERATOR;
        }
        if bigger {
            self.bigger_grows += 1;
        } else {
            flags |= SAME_SIZE_GROW;
            self.same_size_grows += 1;
        }
        self.flags = flags;
        self.b = new_b;
        self.old_buckets = self.buckets;
        self.buckets = Some(self.generations.insert(generation));
        self.nevacuate = 0;
        self.noverflow = 0;
        self.sweep_retired();
        Ok(())
    }

    pub(crate) fn grow_work(
        &mut self,
        bucket: usize,
        fallibility: Fallibility,
    ) -> Result<(), TryReserveError> {
        // Make sure we evacuate the old bucket corresponding to the bucket we're
        // about to use.
        self.evacuate(bucket & self.old_bucket_mask(), fallibility)?;

        // Evacuate one more old bucket to make progress on growing.
        if self.growing() {
            self.evacuate(self.nevacuate, fallibility)?;
        }
        Ok(())
    }

    fn bucket_evacuated(&self, old_key: GenKey, bucket: usize) -> bool {
        self.generations[old_key].buckets[bucket].is_evacuated()
    }

    fn evacuate(
        &mut self,
        oldbucket: usize,
        fallibility: Fallibility,
    ) -> Result<(), TryReserveError> {
        let (Some(old_key), Some(new_key)) = (self.old_buckets, self.buckets) else {
            return Ok(());
        };
        let newbit = self.noldbuckets();
        if !self.bucket_evacuated(old_key, oldbucket) {
            // The two destination chains together never need more overflow
            // buckets than the source chain has buckets.
            let chain = self.generations[old_key].chain_len(oldbucket);
            self.generations[new_key].reserve_overflow(chain, fallibility)?;

            let new_overflows = self.evacuate_chain(old_key, new_key, oldbucket, newbit);
            for _ in 0..new_overflows {
                self.incr_noverflow();
            }
        }

        if oldbucket == self.nevacuate {
            self.advance_evacuation_mark(old_key, newbit);
        }
        Ok(())
    }

    /// Moves every element of the chain at `oldbucket` into the new array and
    /// returns how many overflow buckets that took.
    ///
    /// In a bigger growth each element goes to bucket `oldbucket` (X) or
    /// `oldbucket + newbit` (Y), decided by the `newbit` bit of its hash.
    fn evacuate_chain(
        &mut self,
        old_key: GenKey,
        new_key: GenKey,
        oldbucket: usize,
        newbit: usize,
    ) -> usize {
        let same_size = self.same_size_grow();
        let iterating = self.flags & ITERATOR != 0;
        let cloner = if self.flags & OLD_ITERATOR != 0 {
            self.cloner
        } else {
            None
        };
        let Self {
            elem,
            generations,
            seed,
            ..
        } = self;
        let Some([old, new]) = generations.get_disjoint_mut([old_key, new_key]) else {
            panic!("bad set state");
        };

        // (bucket, next slot) in the X and Y halves.
        let mut dst = [(oldbucket, 0usize), (oldbucket + newbit, 0usize)];
        let mut overflows = 0;
        let mut idx = Some(oldbucket);
        while let Some(b) = idx {
            for i in 0..BUCKET_SIZE {
                let top = old.buckets[b].tags[i];
                if is_empty(top) {
                    old.buckets[b].tags[i] = EVACUATED_EMPTY;
                    continue;
                }
                if top < MIN_TOP_HASH {
                    panic!("bad set state");
                }

                let (use_y, top, copy) = {
                    let value = occupied(&old.buckets[b].slots[i]);
                    let mut top = top;
                    let mut use_y = 0;
                    if !same_size {
                        let hash = elem.hash(value, *seed);
                        if iterating && !elem.reflexive() && !elem.equal(value, value) {
                            // A value that is not equal to itself hashes
                            // differently every time, so its destination is
                            // picked from the low bit of its old tag, which
                            // cursors can recompute. It gets a fresh tag for
                            // the next growth.
                            use_y = top & 1;
                            top = tophash(hash);
                        } else if hash & newbit as u64 != 0 {
                            use_y = 1;
                        }
                    }
                    (use_y, top, cloner.map(|clone| clone(value)))
                };

                old.buckets[b].tags[i] = EVACUATED_X + use_y;
                let value = match copy {
                    Some(value) => value,
                    None => match old.buckets[b].slots[i].take() {
                        Some(value) => value,
                        None => panic!("bad set state"),
                    },
                };

                let (bucket, slot) = &mut dst[usize::from(use_y)];
                if *slot == BUCKET_SIZE {
                    *bucket = new.new_overflow(*bucket);
                    *slot = 0;
                    overflows += 1;
                }
                let target = &mut new.buckets[*bucket];
                target.tags[*slot] = top;
                target.slots[*slot] = Some(value);
                *slot += 1;
            }
            idx = old.buckets[b].overflow;
        }
        overflows
    }

    fn advance_evacuation_mark(&mut self, old_key: GenKey, newbit: usize) {
        self.nevacuate += 1;
        let stop = (self.nevacuate + EVACUATION_SCAN_LIMIT).min(newbit);
        while self.nevacuate != stop && self.bucket_evacuated(old_key, self.nevacuate) {
            self.nevacuate += 1;
        }
        if self.nevacuate == newbit {
            // Growing is all done. Free the old bucket array.
            if let Some(old) = self.old_buckets.take() {
                self.retire(old);
            }
            self.flags &= !SAME_SIZE_GROW;
        }
    }
}

#[cfg(test)]
mod tests {
    use alloc::vec::Vec;

    use super::*;

    /// Places elements by their low bits and tags them by their high bits.
    #[derive(Clone)]
    struct Identity;

    impl ElemType<u64> for Identity {
        fn hash(&self, value: &u64, _seed: u64) -> u64 {
            *value
        }

        fn equal(&self, a: &u64, b: &u64) -> bool {
            a == b
        }
    }

    fn grown_table(n: u64) -> HashTable<u64, Identity> {
        let mut table = HashTable::new(Identity);
        for i in 0..n {
            table.insert(i);
        }
        table
    }

    fn sorted(mut values: Vec<u64>) -> Vec<u64> {
        values.sort();
        values
    }

    #[test]
    fn ninth_insert_starts_bigger_growth() {
        let mut table = grown_table(8);
        assert_eq!(table.b, 0);
        assert!(!table.growing());
        table.insert(8);
        // A single old bucket is evacuated by the insert that started the
        // growth.
        assert_eq!(table.b, 1);
        assert!(!table.growing());
        assert_eq!(table.debug_stats().bigger_grows, 1);
        assert_eq!(sorted(table.to_vec()), (0..9).collect::<Vec<_>>());
    }

    #[test]
    fn evacuation_splits_by_newbit() {
        let mut table = grown_table(64);
        while table.growing() {
            table.insert(1_000_000);
            table.remove(&1_000_000);
        }
        let key = table.current_key();
        let mask = (1usize << table.b) - 1;
        let generation = &table.generations[key];
        for bucket in 0..generation.primary_len() {
            let mut idx = Some(bucket);
            while let Some(b) = idx {
                for i in 0..BUCKET_SIZE {
                    if let Some(value) = &generation.buckets[b].slots[i] {
                        assert_eq!(*value as usize & mask, bucket);
                    }
                }
                idx = generation.buckets[b].overflow;
            }
        }
    }

    #[test]
    fn evacuation_finishes_within_old_bucket_count() {
        let mut table = HashTable::new(Identity);
        let mut i = 0u64;
        while !table.growing() || table.noldbuckets() < 8 {
            table.insert(i);
            i += 1;
        }
        let old = table.noldbuckets();
        let mut mutations = 0;
        while table.growing() {
            table.insert(10_000_000 + mutations as u64);
            mutations += 1;
        }
        assert!(mutations <= old, "{mutations} > {old}");
        assert!(table.old_buckets.is_none());
        assert!(table.retired.is_empty());
        assert_eq!(table.generations.len(), 1);
    }

    #[test]
    fn lookups_see_both_arrays_mid_growth() {
        let mut table = HashTable::new(Identity);
        let mut i = 0u64;
        while !table.growing() || table.noldbuckets() < 4 {
            table.insert(i);
            i += 1;
        }
        assert!(table.growing());
        assert!(table.nevacuate < table.noldbuckets());
        for v in 0..i {
            assert!(table.contains(&v), "{v}");
        }
        for v in (0..i).step_by(2) {
            assert_eq!(table.remove(&v), Some(v));
        }
        for v in 0..i {
            assert_eq!(table.contains(&v), v % 2 == 1, "{v}");
        }
    }

    /// Hashes `group | id << 40`: every element of a group shares a bucket
    /// of a four bucket table, and ids keep the elements distinct.
    #[derive(Clone)]
    struct Grouped;

    impl ElemType<(u64, u64)> for Grouped {
        fn hash(&self, value: &(u64, u64), _seed: u64) -> u64 {
            value.0 | (value.1 << 40)
        }

        fn equal(&self, a: &(u64, u64), b: &(u64, u64)) -> bool {
            a == b
        }
    }

    #[test]
    fn churn_triggers_same_size_growth() {
        let mut table = HashTable::with_capacity(20, Grouped);
        assert_eq!(table.b, 2);
        // Fill each group past one bucket, then delete most of it. The
        // overflow buckets stay, so the overflow counter climbs while the
        // load stays low.
        let mut id = 0u64;
        for round in 0..8 {
            let group = round % 4;
            let members: Vec<(u64, u64)> = (0..12)
                .map(|_| {
                    id += 1;
                    (group, id)
                })
                .collect();
            for &m in &members {
                table.insert(m);
            }
            for &m in &members[1..] {
                table.remove(&m);
            }
            if table.debug_stats().same_size_grows > 0 {
                break;
            }
        }
        let stats = table.debug_stats();
        assert!(stats.same_size_grows > 0);
        assert_eq!(stats.bigger_grows, 0);
        assert_eq!(table.b, 2);

        // Survivors remain reachable through and after the growth.
        while table.growing() {
            table.insert((0, 1 << 20));
            table.remove(&(0, 1 << 20));
        }
        assert_eq!(table.len(), table.to_vec().len());
        for (group, id) in table.to_vec() {
            assert!(table.contains(&(group, id)));
        }
        assert!(table.noverflow < 4);
    }

    #[test]
    fn failed_growth_allocation_leaves_table_unchanged() {
        let mut table = grown_table(8);
        table.b = 62;
        let before = table.generations.len();
        let result = table.hash_grow(Fallibility::Fallible);
        assert!(matches!(result, Err(TryReserveError::CapacityOverflow)));
        assert_eq!(table.b, 62);
        assert!(!table.growing());
        assert_eq!(table.generations.len(), before);
    }

    #[test]
    fn failed_evacuation_reservation_leaves_table_unchanged() {
        let mut table = HashTable::new(Identity);
        table.b = 1;
        let generation = Generation::try_new(1, Fallibility::Infallible).unwrap();
        table.buckets = Some(table.generations.insert(generation));
        // Bucket 0 chains two buckets (nine even values), bucket 1 holds
        // four odd values: thirteen in all, the limit for two buckets.
        let values: Vec<u64> = (0..9).map(|i| i * 2).chain((0..4).map(|i| i * 2 + 1)).collect();
        for &v in &values {
            table.insert(v);
        }
        assert!(!table.growing());
        table.hash_grow(Fallibility::Fallible).unwrap();
        assert!(table.growing());
        let old_key = table.old_buckets.unwrap();
        let new_key = table.current_key();
        let primary = table.generations[new_key].primary_len();
        table.generations[new_key].reserve_limit = Some(primary);

        // 100 lands in new bucket 0, fed by the two-bucket old chain 0.
        let result = table.try_insert(100);
        assert!(matches!(result, Err(TryReserveError::AllocError { .. })));
        assert!(table.growing());
        assert_eq!(table.nevacuate, 0);
        assert!(!table.generations[old_key].buckets[0].is_evacuated());
        assert_eq!(table.generations[old_key].chain_len(0), 2);
        assert_eq!(table.len(), values.len());
        assert!(!table.contains(&100));
        for v in &values {
            assert!(table.contains(v), "{v}");
        }

        table.generations[new_key].reserve_limit = None;
        assert_eq!(table.try_insert(100), Ok(true));
        assert_eq!(table.len(), values.len() + 1);
        for v in values.iter().chain([100].iter()) {
            assert!(table.contains(v), "{v}");
        }
    }

    #[test]
    fn probabilistic_overflow_counter() {
        let mut table = grown_table(1);
        table.b = 20;
        for _ in 0..4096 {
            table.incr_noverflow();
        }
        // Expected value is 4096 / 32 = 128.
        assert!(table.noverflow > 32 && table.noverflow < 512, "{}", table.noverflow);

        table.b = 3;
        table.noverflow = u16::MAX;
        table.incr_noverflow();
        assert_eq!(table.noverflow, u16::MAX);
    }

    #[test]
    fn retired_arrays_wait_for_pins() {
        let mut table = grown_table(8);
        let key = table.current_key();
        let pin = table.generations[key].pin.clone();
        table.insert(8);
        assert!(!table.growing());
        assert_eq!(table.retired, [key]);
        assert!(table.generations.contains_key(key));

        drop(pin);
        table.sweep_retired();
        assert!(table.retired.is_empty());
        assert!(!table.generations.contains_key(key));
    }
}

#![cfg(test)]

// Property tests for ChainHashMap kept inside the crate so they can use
// internal construction knobs without feature gates.

use crate::{ChainHashMap, Handle, HeapStorage};
use proptest::prelude::*;
use proptest::test_runner::TestCaseError;
use std::cell::Cell;
use std::collections::HashMap;
use std::hash::{BuildHasher, Hasher};
use std::rc::Rc;

// Hashes a u64 key to itself so the model can predict bucket placement.
#[derive(Clone, Default)]
struct IdentityBuildHasher;
struct IdentityHasher(u64);
impl BuildHasher for IdentityBuildHasher {
    type Hasher = IdentityHasher;
    fn build_hasher(&self) -> Self::Hasher {
        IdentityHasher(0)
    }
}
impl Hasher for IdentityHasher {
    fn write(&mut self, bytes: &[u8]) {
        let mut buf = [0u8; 8];
        for (d, s) in buf.iter_mut().zip(bytes) {
            *d = *s;
        }
        self.0 = u64::from_ne_bytes(buf);
    }
    fn write_u64(&mut self, i: u64) {
        self.0 = i;
    }
    fn finish(&self) -> u64 {
        self.0
    }
}

// Collision variant: every key hashes to 0, so all entries share bucket 0
// and every lookup resolves by equality probing alone.
#[derive(Clone, Default)]
struct ConstBuildHasher;
struct ConstHasher;
impl BuildHasher for ConstBuildHasher {
    type Hasher = ConstHasher;
    fn build_hasher(&self) -> Self::Hasher {
        ConstHasher
    }
}
impl Hasher for ConstHasher {
    fn write(&mut self, _bytes: &[u8]) {}
    fn finish(&self) -> u64 {
        0
    }
}

// Pool-indexed operations to improve shrinking: indices shrink to earlier
// keys, pool length shrinks, and op lists shrink in length.
#[derive(Clone, Debug)]
enum OpI {
    Insert(usize, i32),
    GetOrInsert(usize, i32),
    Remove(usize),
    RemoveAt(usize),
    Find(usize),
    Contains(usize),
    Mutate(usize, i32),
    Iterate,
    Rehash(usize),
    Clear,
}

fn arb_scenario() -> impl Strategy<Value = (Vec<u64>, Vec<OpI>)> {
    proptest::collection::btree_set(0u64..64, 1..=12).prop_flat_map(|pool| {
        let pool: Vec<u64> = pool.into_iter().collect();
        let idx = proptest::sample::select((0..pool.len()).collect::<Vec<_>>());
        let op = prop_oneof![
            4 => (idx.clone(), any::<i32>()).prop_map(|(i, v)| OpI::Insert(i, v)),
            2 => (idx.clone(), any::<i32>()).prop_map(|(i, v)| OpI::GetOrInsert(i, v)),
            2 => idx.clone().prop_map(OpI::Remove),
            1 => idx.clone().prop_map(OpI::RemoveAt),
            2 => idx.clone().prop_map(OpI::Find),
            1 => idx.clone().prop_map(OpI::Contains),
            2 => (idx.clone(), any::<i32>()).prop_map(|(i, d)| OpI::Mutate(i, d)),
            1 => Just(OpI::Iterate),
            1 => (0usize..16).prop_map(OpI::Rehash),
            1 => Just(OpI::Clear),
        ];
        proptest::collection::vec(op, 1..60).prop_map(move |ops| (pool.clone(), ops))
    })
}

/// Replay an index rebuild on the model chain: stable-group entries by their
/// new bucket, groups ordered by first appearance.
fn regroup(chain: &mut Vec<u64>, count: usize, bucket_of: fn(u64, usize) -> usize) {
    let mut groups: Vec<(usize, Vec<u64>)> = Vec::new();
    for &k in chain.iter() {
        let b = bucket_of(k, count);
        match groups.iter_mut().find(|(gb, _)| *gb == b) {
            Some((_, seg)) => seg.push(k),
            None => groups.push((b, vec![k])),
        }
    }
    chain.clear();
    for (_, seg) in groups {
        chain.extend(seg);
    }
}

/// Replay an insert on the model chain: new entries lead their bucket's
/// segment; a first-of-bucket entry lands at the global tail.
fn model_splice(chain: &mut Vec<u64>, count: usize, bucket_of: fn(u64, usize) -> usize, key: u64) {
    let b = bucket_of(key, count);
    match chain.iter().position(|&k| bucket_of(k, count) == b) {
        Some(pos) => chain.insert(pos, key),
        None => chain.push(key),
    }
}

// Invariants exercised across random operation sequences:
// - try_insert keeps the first value and returns the existing position for a
//   present key; get_or_insert_with runs its closure only on a real insert.
// - The chain visits exactly the live keys, in the predicted order: insert
//   splices at the bucket segment front, rehash stable-regroups.
// - Stale handles never resolve; live handles resolve to their entry.
// - len parity and value parity with the model after every op.
fn run_scenario<S: BuildHasher>(
    mut sut: ChainHashMap<u64, i32, S>,
    bucket_of: fn(u64, usize) -> usize,
    pool: &[u64],
    ops: Vec<OpI>,
) -> Result<(), TestCaseError> {
    let mut chain: Vec<u64> = Vec::new();
    let mut values: HashMap<u64, i32> = HashMap::new();
    let mut live: HashMap<u64, Handle> = HashMap::new();
    let mut stale: Vec<Handle> = Vec::new();
    let default_calls = Rc::new(Cell::new(0u32));

    for op in ops {
        match op {
            OpI::Insert(i, v) => {
                let k = pool[i];
                let already = values.contains_key(&k);
                let before = sut.bucket_count();
                let (h, inserted) = sut.try_insert(k, v).expect("heap storage cannot fail");
                let after = sut.bucket_count();
                prop_assert_eq!(inserted, !already);
                if inserted {
                    if after != before {
                        regroup(&mut chain, after, bucket_of);
                    }
                    model_splice(&mut chain, after, bucket_of, k);
                    values.insert(k, v);
                    live.insert(k, h);
                } else {
                    prop_assert_eq!(after, before, "duplicate insert must not grow");
                    prop_assert_eq!(Some(&h), live.get(&k), "existing position is returned");
                }
            }
            OpI::GetOrInsert(i, v) => {
                let k = pool[i];
                let already = values.contains_key(&k);
                let counter = default_calls.clone();
                let calls_before = counter.get();
                let before = sut.bucket_count();
                let got = *sut
                    .get_or_insert_with(k, move || {
                        counter.set(counter.get() + 1);
                        v
                    })
                    .expect("heap storage cannot fail");
                let after = sut.bucket_count();
                if already {
                    prop_assert_eq!(got, values[&k], "present key keeps its value");
                    prop_assert_eq!(default_calls.get(), calls_before, "closure must not run");
                } else {
                    prop_assert_eq!(got, v);
                    prop_assert_eq!(default_calls.get(), calls_before + 1, "closure runs once");
                    if after != before {
                        regroup(&mut chain, after, bucket_of);
                    }
                    model_splice(&mut chain, after, bucket_of, k);
                    values.insert(k, v);
                    let h = sut.find(&k).expect("freshly inserted key is findable");
                    live.insert(k, h);
                }
            }
            OpI::Remove(i) => {
                let k = pool[i];
                let removed = sut.remove_entry(&k);
                match values.remove(&k) {
                    Some(v) => {
                        let (rk, rv) = removed.expect("present key must remove");
                        prop_assert_eq!(rk, k);
                        prop_assert_eq!(rv, v);
                        chain.retain(|&c| c != k);
                        stale.push(live.remove(&k).expect("live handle tracked"));
                    }
                    None => prop_assert!(removed.is_none(), "absent key removal is a no-op"),
                }
            }
            OpI::RemoveAt(i) => {
                let k = pool[i];
                if let Some(&h) = live.get(&k) {
                    let (rk, rv) = sut.remove_at(h).expect("live handle must remove");
                    prop_assert_eq!(rk, k);
                    prop_assert_eq!(rv, values.remove(&k).expect("present in model"));
                    chain.retain(|&c| c != k);
                    live.remove(&k);
                    stale.push(h);
                } else {
                    prop_assert!(sut.find(&k).is_none());
                }
            }
            OpI::Find(i) => {
                let k = pool[i];
                let found = sut.find(&k);
                prop_assert_eq!(found.is_some(), values.contains_key(&k));
                if let Some(h) = found {
                    prop_assert_eq!(Some(&h), live.get(&k), "find returns the stable position");
                }
            }
            OpI::Contains(i) => {
                let k = pool[i];
                prop_assert_eq!(sut.contains_key(&k), values.contains_key(&k));
            }
            OpI::Mutate(i, d) => {
                let k = pool[i];
                if let Some(&h) = live.get(&k) {
                    let vr = h.value_mut(&mut sut).expect("live handle must resolve");
                    *vr = vr.saturating_add(d);
                    if let Some(mv) = values.get_mut(&k) {
                        *mv = mv.saturating_add(d);
                    }
                }
            }
            OpI::Iterate => {
                let forward: Vec<u64> = sut.iter().map(|(k, _)| *k).collect();
                let mut backward: Vec<u64> = sut.iter().rev().map(|(k, _)| *k).collect();
                backward.reverse();
                prop_assert_eq!(forward, backward, "reverse iteration mirrors forward");
                let segments: usize = (0..sut.bucket_count())
                    .map(|b| sut.bucket_len(b).expect("in-range bucket"))
                    .sum();
                prop_assert_eq!(segments, sut.len(), "segments partition the chain");
            }
            OpI::Rehash(headroom) => {
                let before = sut.bucket_count();
                sut.rehash(headroom).expect("heap storage cannot fail");
                let after = sut.bucket_count();
                prop_assert!(after >= before, "rehash never shrinks the index");
                prop_assert!(
                    (sut.len() + headroom) as f32 <= sut.max_load_factor() * after as f32,
                    "requested headroom must fit the bound"
                );
                if after != before {
                    regroup(&mut chain, after, bucket_of);
                }
            }
            OpI::Clear => {
                sut.clear();
                for (_, h) in live.drain() {
                    stale.push(h);
                }
                values.clear();
                chain.clear();
            }
        }

        // Post-conditions after each op
        let sut_chain: Vec<u64> = sut.iter().map(|(k, _)| *k).collect();
        prop_assert_eq!(&sut_chain, &chain, "chain order parity with the model");
        prop_assert_eq!(sut.len(), values.len());
        prop_assert_eq!(sut.is_empty(), values.is_empty());
        for (k, v) in &values {
            prop_assert_eq!(sut.get(k), Some(v));
        }
        for &h in &stale {
            prop_assert!(h.value(&sut).is_none(), "stale handles must not resolve");
        }
    }
    Ok(())
}

// Property: state-machine equivalence against std HashMap plus a chain-order
// model, with deterministic bucket placement (identity hashing).
proptest! {
    #![proptest_config(ProptestConfig { cases: 64, .. ProptestConfig::default() })]
    #[test]
    fn prop_state_machine((pool, ops) in arb_scenario()) {
        let sut: ChainHashMap<u64, i32, IdentityBuildHasher> =
            ChainHashMap::with_buckets_hasher_in(4, IdentityBuildHasher, HeapStorage);
        run_scenario(sut, |k, count| (k % count as u64) as usize, &pool, ops)?;
    }
}

// Property: the same invariants under worst-case collisions (constant
// hasher); every entry shares bucket 0, so lookups and erase repair are
// driven purely by equality probing and segment structure.
proptest! {
    #![proptest_config(ProptestConfig { cases: 64, .. ProptestConfig::default() })]
    #[test]
    fn prop_state_machine_with_collisions((pool, ops) in arb_scenario()) {
        let sut: ChainHashMap<u64, i32, ConstBuildHasher> =
            ChainHashMap::with_buckets_hasher_in(4, ConstBuildHasher, HeapStorage);
        run_scenario(sut, |_k, _count| 0, &pool, ops)?;
    }
}

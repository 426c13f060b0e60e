use rand::seq::SliceRandom;
use rand::SeedableRng;
use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use ymir::constants::N_INITIAL_BUCKETS;
use ymir::{reduce, ConcurrentMap};

fn h(key: u64) -> u64 {
    let mut hasher = DefaultHasher::new();
    key.hash(&mut hasher);
    hasher.finish()
}

// Serial insertion of 100k distinct keys starting from the minimal bucket
// arrays: every segment rehashes repeatedly, no key may be lost, and the
// load-factor bound must hold at the end.
#[test]
fn rehash_under_load_keeps_every_key() {
    const N: u64 = 100_000;
    let map = ConcurrentMap::with_threads(4);
    map.set_max_load_factor(1.0);

    let mut keys: Vec<u64> = (0..N).collect();
    let mut rng = rand::rngs::StdRng::seed_from_u64(0x5eed);
    keys.shuffle(&mut rng);

    for &k in &keys {
        map.set(k, h(k), k * 3 + 1, reduce::overwrite);
    }

    assert_eq!(map.n_keys(), N as usize);
    assert!(map.n_buckets() >= N as usize, "bucket total below key count at load factor 1.0");
    assert!(map.n_keys() as f32 <= map.n_buckets() as f32 * map.max_load_factor());
    for k in 0..N {
        assert_eq!(map.get(&k, h(k)), Some(k * 3 + 1), "key {k} lost across rehashes");
    }
}

#[test]
fn clear_and_shrink_returns_to_initial_geometry() {
    let n_threads = 4;
    let map = ConcurrentMap::with_threads(n_threads);
    for k in 0..50_000u64 {
        map.set(k, h(k), k, reduce::overwrite);
    }
    assert!(map.n_buckets() > N_INITIAL_BUCKETS * n_threads * 7);

    map.clear_and_shrink();
    assert_eq!(map.n_keys(), 0);
    // Seven segments per thread, each back at the smallest cascade prime.
    assert_eq!(map.n_buckets(), N_INITIAL_BUCKETS * n_threads * 7);

    // The table stays usable after shrinking.
    map.set(9, h(9), 9, reduce::overwrite);
    assert_eq!(map.get(&9, h(9)), Some(9));
}

#[test]
fn reserve_presizes_segments() {
    let map: ConcurrentMap<u64, u64> = ConcurrentMap::with_threads(2);
    let before = map.n_buckets();
    map.reserve(200_000);
    assert!(map.n_buckets() > before);
    // A reserved table absorbs that many keys without rehashing past the bound.
    for k in 0..200_000u64 {
        map.set(k, h(k), k, reduce::overwrite);
    }
    assert_eq!(map.n_keys(), 200_000);
    assert!(map.n_keys() as f32 <= map.n_buckets() as f32 * map.max_load_factor());
}

use std::sync::Arc;
use ymir::comm::MeshComm;
use ymir::parallel::Parallel;
use ymir::{reduce, DistMap};

// Four ranks each emit the same word stream; sums must fold across the whole
// job regardless of which rank owns which word.
#[test]
fn word_count_across_four_ranks() {
    let endpoints = MeshComm::mesh(4);
    std::thread::scope(|scope| {
        for comm in endpoints {
            scope.spawn(move || {
                let ctx = Parallel::with_comm(Arc::new(comm), 2);
                let map: DistMap<String, u64> = DistMap::new(ctx.clone());
                map.set(0, "a".to_string(), 1, reduce::sum);
                map.set(0, "b".to_string(), 1, reduce::sum);
                map.set(1, "a".to_string(), 2, reduce::sum);
                map.sync(reduce::sum, false).unwrap();

                assert_eq!(map.get_n_keys().unwrap(), 2);
                for (word, want) in [("a", 12u64), ("b", 4)] {
                    let key = word.to_string();
                    if map.owner(map.hash(&key)) == ctx.rank() {
                        assert_eq!(map.get(&key), Some(want), "bad fold for {word:?}");
                        assert!(map.has(&key));
                    } else {
                        assert_eq!(map.get(&key), None);
                        assert!(!map.has(&key));
                    }
                }
            });
        }
    });
}

// Emissions before a sync are only locally visible; the collective makes
// ownership authoritative.
#[test]
fn remote_emissions_become_visible_after_sync() {
    let endpoints = MeshComm::mesh(2);
    std::thread::scope(|scope| {
        for comm in endpoints {
            scope.spawn(move || {
                let ctx = Parallel::with_comm(Arc::new(comm), 1);
                let map: DistMap<u64, u64> = DistMap::new(ctx.clone());
                // Only rank 0 emits; after sync each key must sit on its owner.
                if ctx.rank() == 0 {
                    for k in 0..100u64 {
                        map.set(0, k, k + 1, reduce::overwrite);
                    }
                }
                map.sync(reduce::overwrite, false).unwrap();
                assert_eq!(map.get_n_keys().unwrap(), 100);
                for k in 0..100u64 {
                    let owned = map.owner(map.hash(&k)) == ctx.rank();
                    assert_eq!(map.has(&k), owned);
                    if owned {
                        assert_eq!(map.get(&k), Some(k + 1));
                    }
                }
            });
        }
    });
}

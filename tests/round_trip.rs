use std::sync::Arc;
use ymir::comm::LocalComm;
use ymir::parallel::Parallel;
use ymir::{reduce, DistMap};

// A serialized partition reloads into an identical key/value set, whatever
// iteration order the segments produce.
#[test]
fn to_bytes_from_bytes_identity() {
    let ctx = Parallel::with_comm(Arc::new(LocalComm), 2);
    let map: DistMap<(i64, String), u64> = DistMap::new(ctx.clone());
    for i in 0..500i64 {
        map.set(0, (i, format!("key-{i}")), i as u64 * 7, reduce::overwrite);
    }
    map.sync(reduce::overwrite, false).unwrap();
    assert_eq!(map.n_keys(), 500);

    let bytes = map.to_bytes().unwrap();
    // Leading 8 bytes carry the little-endian pair count.
    assert_eq!(u64::from_le_bytes(bytes[..8].try_into().unwrap()), 500);

    let reloaded: DistMap<(i64, String), u64> = DistMap::from_bytes(ctx, &bytes).unwrap();
    assert_eq!(reloaded.n_keys(), 500);
    for i in 0..500i64 {
        let key = (i, format!("key-{i}"));
        assert_eq!(reloaded.get(&key), Some(i as u64 * 7));
    }
}

#[test]
fn from_bytes_rejects_truncated_images() {
    let ctx = Parallel::with_comm(Arc::new(LocalComm), 1);
    let map: DistMap<u64, u64> = DistMap::new(ctx.clone());
    for i in 0..10u64 {
        map.set(0, i, i, reduce::overwrite);
    }
    map.sync(reduce::overwrite, false).unwrap();

    let bytes = map.to_bytes().unwrap();
    assert!(DistMap::<u64, u64>::from_bytes(ctx.clone(), &bytes[..4]).is_err());
    assert!(DistMap::<u64, u64>::from_bytes(ctx, &bytes[..bytes.len() - 1]).is_err());
}

#[test]
fn empty_map_round_trips() {
    let ctx = Parallel::with_comm(Arc::new(LocalComm), 1);
    let map: DistMap<String, String> = DistMap::new(ctx.clone());
    let bytes = map.to_bytes().unwrap();
    assert_eq!(bytes.len(), 8);
    let reloaded: DistMap<String, String> = DistMap::from_bytes(ctx, &bytes).unwrap();
    assert_eq!(reloaded.n_keys(), 0);
}

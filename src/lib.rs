pub mod bare_map;
pub mod codec;
pub mod comm;
pub mod concurrent_map;
pub mod constants;
pub mod dist_map;
pub mod dist_range;
pub mod parallel;
pub mod primes;
pub mod reduce;

pub use bare_map::BareMap;
pub use codec::{Bincode, Codec};
pub use comm::{Comm, LocalComm, MeshComm};
pub use concurrent_map::ConcurrentMap;
pub use dist_map::DistMap;
pub use dist_range::DistRange;
pub use parallel::Parallel;

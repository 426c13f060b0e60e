//! Bucket-count selection from a fixed prime cascade.
//!
//! Bucket counts are always a prime from the table below or a product of such
//! primes. Prime counts give a cheap modulo distribution that tolerates hash
//! functions of uneven quality without storing power-of-two masks.

pub(crate) const BUCKET_PRIMES: [usize; 16] = [
    11, 17, 29, 47, 79, 127, 211, 337, 547, 887, 1433, 2311, 3739, 6053, 9791, 15859,
];

/// Returns a bucket count greater than or roughly equal to `n_min`.
///
/// The count is either a single prime from the cascade or a product of cascade
/// primes: `n_min` (scaled by `inflation`) is divided by the largest prime
/// until the remainder fits the table, then the smallest prime at least the
/// remainder is picked by binary search.
pub fn n_buckets_for(n_min: usize, inflation: f32) -> usize {
    let last = BUCKET_PRIMES[BUCKET_PRIMES.len() - 1];
    let mut remaining = (n_min as f64 * inflation as f64).ceil() as usize;
    let mut product = 1usize;
    while remaining > last {
        remaining /= last;
        product *= last;
    }
    let idx = BUCKET_PRIMES.partition_point(|&p| p < remaining);
    product * BUCKET_PRIMES[idx]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn small_counts_round_up_to_a_prime() {
        assert_eq!(n_buckets_for(0, 1.0), 11);
        assert_eq!(n_buckets_for(1, 1.0), 11);
        assert_eq!(n_buckets_for(11, 1.0), 11);
        assert_eq!(n_buckets_for(12, 1.0), 17);
        assert_eq!(n_buckets_for(888, 1.0), 1433);
        assert_eq!(n_buckets_for(15859, 1.0), 15859);
    }

    #[test]
    fn large_counts_become_prime_products() {
        let n = n_buckets_for(100_000, 1.0);
        assert!(n >= 100_000);
        assert_eq!(n % 15859, 0);
    }

    #[test]
    fn inflation_scales_the_target() {
        let plain = n_buckets_for(1000, 1.0);
        let inflated = n_buckets_for(1000, 1.25);
        assert!(inflated >= plain);
        assert!(inflated >= 1250);
    }

    #[test]
    fn results_factor_over_the_cascade() {
        for &n in &[5usize, 100, 3000, 20_000, 1_000_000, 50_000_000] {
            let mut picked = n_buckets_for(n, 1.0);
            for &p in BUCKET_PRIMES.iter().rev() {
                while picked % p == 0 {
                    picked /= p;
                }
            }
            assert_eq!(picked, 1, "bucket count for {n} is not a cascade product");
        }
    }
}

//! Binary Fuse filter implementation for 64-bit keys.
//!
//! A binary fuse filter is a static approximate-membership structure: build it
//! once from a collection of unique keys with [`BinaryFuseFilter::build`],
//! then answer membership queries with [`BinaryFuseFilter::contains`]. Queries
//! never report a stored key as absent; unrelated keys are reported as present
//! at a rate of roughly 0.4% for the default 8-bit fingerprints, at a cost of
//! about 9 bits of storage per key. Large key sets can be sharded and built in
//! parallel with [`BinaryFuseFilter::build_partitioned`].

use rayon::prelude::*;
use std::cmp;
use std::fmt;
use std::mem;
use std::ops::{BitXor, BitXorAssign};
use std::thread;
use std::time::{Duration, Instant};

/// Number of hash-derived table positions per key.
const ARITY: u32 = 3;
/// Default bound on reseed attempts before construction gives up.
const MAX_ITERATIONS: usize = 100;
const MAX_SEGMENT_LENGTH: u32 = 1 << 18;

#[derive(Clone, Copy, Debug)]
struct Layout {
    segment_length: u32,
    segment_length_mask: u32,
    segment_count: u32,
    segment_count_length: u32,
    array_length: u32,
}

/// Error returned when construction of the filter fails.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BuildError {
    /// The provided configuration values are invalid.
    InvalidConfig(&'static str),
    /// Construction exhausted its reseed budget.
    ConstructionFailed(&'static str),
}

/// Configuration options for building a [`BinaryFuseFilter`].
#[derive(Clone, Copy, Debug)]
pub struct FilterConfig {
    /// Starting state of the seed stream. Two constructions with identical
    /// keys and identical values here produce bit-identical filters.
    pub seed: u64,
    /// Number of construction attempts before giving up. Each attempt draws a
    /// fresh hashing seed; failure past a handful of attempts almost always
    /// means the input contains duplicate keys.
    pub max_iterations: usize,
}

impl Default for FilterConfig {
    fn default() -> Self {
        Self {
            seed: 1,
            max_iterations: MAX_ITERATIONS,
        }
    }
}

/// Output of building a [`BinaryFuseFilter`].
#[derive(Debug)]
pub struct BuildOutput<Fingerprint = u8>
where
    Fingerprint: FingerprintValue,
{
    pub filter: BinaryFuseFilter<Fingerprint>,
    /// Number of construction attempts, including the successful one.
    pub iterations: usize,
    pub total_slots: usize,
    /// Ratio of table slots to keys.
    pub actual_overhead: f64,
}

/// Build output specialized for 8-bit fingerprints.
pub type BuildOutput8 = BuildOutput<u8>;
/// Build output specialized for 16-bit fingerprints.
pub type BuildOutput16 = BuildOutput<u16>;
/// Build output specialized for 32-bit fingerprints.
pub type BuildOutput32 = BuildOutput<u32>;

/// Configuration for partitioned construction.
#[derive(Clone, Copy, Debug)]
pub struct PartitionConfig {
    /// Configuration used for each partition's filter.
    pub base: FilterConfig,
    /// Desired average number of keys per partition (must be greater than 0).
    pub target_partition_size: usize,
    /// Seed used to assign keys to partitions.
    pub partition_seed: u64,
    /// Maximum number of worker threads used during construction (0 = auto).
    pub max_threads: usize,
}

impl Default for PartitionConfig {
    fn default() -> Self {
        Self {
            base: FilterConfig::default(),
            target_partition_size: 100_000,
            partition_seed: 0xD4E9_CB4D_EF64_9B27,
            max_threads: 0,
        }
    }
}

impl PartitionConfig {
    fn partition_count(&self, key_count: usize) -> usize {
        if key_count == 0 {
            1
        } else {
            let count = (key_count + self.target_partition_size.saturating_sub(1))
                / self.target_partition_size;
            count.max(1)
        }
    }
}

/// Summary statistics for an individual partition.
#[derive(Debug)]
pub struct PartitionStats {
    pub key_count: usize,
    pub iterations: usize,
    pub total_slots: usize,
    pub actual_overhead: f64,
    pub build_time: Duration,
}

/// Output of building a [`PartitionedFuseFilter`].
#[derive(Debug)]
pub struct PartitionedBuildOutput<Fingerprint = u8>
where
    Fingerprint: FingerprintValue,
{
    pub filter: PartitionedFuseFilter<Fingerprint>,
    pub partition_stats: Vec<PartitionStats>,
    pub total_bytes: usize,
    pub bytes_per_key: f64,
    pub total_build_time: Duration,
}

/// A static binary fuse filter for 64-bit keys parameterized over fingerprint
/// width.
#[derive(Debug)]
pub struct BinaryFuseFilter<Fingerprint = u8>
where
    Fingerprint: FingerprintValue,
{
    seed: u64,
    layout: Layout,
    fingerprints: Vec<Fingerprint>,
}

/// Binary fuse filter using 8-bit fingerprints.
pub type BinaryFuseFilter8 = BinaryFuseFilter<u8>;
/// Binary fuse filter using 16-bit fingerprints.
pub type BinaryFuseFilter16 = BinaryFuseFilter<u16>;
/// Binary fuse filter using 32-bit fingerprints.
pub type BinaryFuseFilter32 = BinaryFuseFilter<u32>;

/// A collection of independently built filters, one per key shard.
#[derive(Debug)]
pub struct PartitionedFuseFilter<Fingerprint = u8>
where
    Fingerprint: FingerprintValue,
{
    partition_seed: u64,
    filters: Vec<BinaryFuseFilter<Fingerprint>>,
}

/// Fingerprint stored per table slot. Implemented for `u8`, `u16`, and `u32`;
/// wider fingerprints trade storage for a lower false-positive rate.
pub trait FingerprintValue:
    Copy
    + Default
    + PartialEq
    + BitXor<Output = Self>
    + BitXorAssign
    + fmt::Debug
    + Send
    + Sync
    + 'static
{
    fn from_hash(hash: u64) -> Self;
}

impl FingerprintValue for u8 {
    #[inline]
    fn from_hash(hash: u64) -> Self {
        fingerprint(hash) as u8
    }
}

impl FingerprintValue for u16 {
    #[inline]
    fn from_hash(hash: u64) -> Self {
        fingerprint(hash) as u16
    }
}

impl FingerprintValue for u32 {
    #[inline]
    fn from_hash(hash: u64) -> Self {
        fingerprint(hash) as u32
    }
}

impl<F> BinaryFuseFilter<F>
where
    F: FingerprintValue,
{
    /// Returns true when `key` is (probably) in the set.
    /// Returns false when `key` is definitely not in the set.
    #[inline]
    pub fn contains(&self, key: u64) -> bool {
        let hash = mixsplit(key, self.seed);
        let (h0, h1, h2) = hash_positions(hash, self.layout);
        let mut fp = F::from_hash(hash);
        fp ^= self.fingerprints[h0 as usize];
        fp ^= self.fingerprints[h1 as usize];
        fp ^= self.fingerprints[h2 as usize];
        fp == F::default()
    }

    /// Returns the hashing seed the successful construction settled on.
    pub fn seed(&self) -> u64 {
        self.seed
    }

    /// Returns the number of fingerprint slots in the table.
    pub fn table_length(&self) -> usize {
        self.fingerprints.len()
    }

    /// Returns the number of bytes used to store the fingerprints.
    pub fn fingerprint_bytes(&self) -> usize {
        self.fingerprints.len() * mem::size_of::<F>()
    }

    fn build_internal(keys: &[u64], config: &FilterConfig) -> Result<BuildOutput<F>, BuildError> {
        validate_config(config)?;

        let size = keys.len();
        let layout = calculate_layout(size)?;
        let capacity = layout.array_length as usize;

        let mut rng_counter = config.seed;
        let mut seed = splitmix64(&mut rng_counter);

        // Scratch is allocated once and reused across reseed attempts.
        // `reverse_order` doubles as the bucketed hash buffer and the peel
        // stack; the trailing sentinel keeps the bucketing probe below from
        // running past the end on a terminal collision.
        let mut reverse_order = vec![0u64; size + 1];
        reverse_order[size] = 1;
        let mut reverse_h = vec![0u8; size];
        let mut t2count = vec![0u8; capacity];
        let mut t2hash = vec![0u64; capacity];
        let mut alone = vec![0u32; capacity];

        let mut block_bits = 1u32;
        while (1u64 << block_bits) < u64::from(layout.segment_count) {
            block_bits += 1;
        }
        let block_count = 1usize << block_bits;
        let mut start_pos = vec![0usize; block_count];

        let mut iterations = 0usize;
        loop {
            iterations += 1;
            if iterations > config.max_iterations {
                return Err(BuildError::ConstructionFailed(
                    "too many iterations, the input probably contains duplicate keys",
                ));
            }

            // Bucket the key hashes by their top bits. The incidence pass
            // below then walks `t2count`/`t2hash` in roughly increasing slot
            // order, which keeps its accesses cache-local on large key sets.
            // Zero marks an empty slot; stored hashes are nonzero with
            // overwhelming probability.
            for (i, pos) in start_pos.iter_mut().enumerate() {
                *pos = ((i as u64 * size as u64) >> block_bits) as usize;
            }
            for &key in keys {
                let hash = mixsplit(key, seed);
                let mut block = (hash >> (64 - block_bits)) as usize;
                while reverse_order[start_pos[block]] != 0 {
                    block += 1;
                    block &= block_count - 1;
                }
                reverse_order[start_pos[block]] = hash;
                start_pos[block] += 1;
            }

            // Count edge incidences and xor-accumulate hashes per slot. The
            // upper six bits of a `t2count` entry hold the count; the low two
            // bits hold the xor of the hash-position tags of the incident
            // edges, so a slot that drops to one edge names the position that
            // edge occupies there.
            let mut overflow = false;
            for i in 0..size {
                let hash = reverse_order[i];
                let (h0, h1, h2) = hash_positions(hash, layout);
                let (h0, h1, h2) = (h0 as usize, h1 as usize, h2 as usize);
                t2count[h0] = t2count[h0].wrapping_add(4);
                t2hash[h0] ^= hash;
                t2count[h1] = t2count[h1].wrapping_add(4);
                t2count[h1] ^= 1;
                t2hash[h1] ^= hash;
                t2count[h2] = t2count[h2].wrapping_add(4);
                t2count[h2] ^= 2;
                t2hash[h2] ^= hash;
                // A slot past 63 incident edges wraps its count field; the
                // bookkeeping is corrupt from here on, so fail the attempt.
                if t2count[h0] < 4 || t2count[h1] < 4 || t2count[h2] < 4 {
                    overflow = true;
                    break;
                }
            }

            let mut stack_size = 0usize;
            if !overflow {
                // Seed the queue with every slot currently holding exactly
                // one edge.
                let mut qsize = 0usize;
                for (i, &count) in t2count.iter().enumerate() {
                    alone[qsize] = i as u32;
                    if count >> 2 == 1 {
                        qsize += 1;
                    }
                }

                while qsize > 0 {
                    qsize -= 1;
                    let index = alone[qsize] as usize;
                    if t2count[index] >> 2 != 1 {
                        continue;
                    }
                    // Degree-1 slot: the xor-sum is the surviving edge's full
                    // hash and the tag bits name the hash position this slot
                    // plays for it.
                    let hash = t2hash[index];
                    let found = t2count[index] & 3;
                    reverse_h[stack_size] = found;
                    reverse_order[stack_size] = hash;
                    stack_size += 1;

                    let (h0, h1, h2) = hash_positions(hash, layout);
                    let h012 = [h0, h1, h2, h0, h1];

                    let other1 = h012[(found + 1) as usize] as usize;
                    alone[qsize] = other1 as u32;
                    if t2count[other1] >> 2 == 2 {
                        qsize += 1;
                    }
                    t2count[other1] = t2count[other1].wrapping_sub(4);
                    t2count[other1] ^= mod3(found + 1);
                    t2hash[other1] ^= hash;

                    let other2 = h012[(found + 2) as usize] as usize;
                    alone[qsize] = other2 as u32;
                    if t2count[other2] >> 2 == 2 {
                        qsize += 1;
                    }
                    t2count[other2] = t2count[other2].wrapping_sub(4);
                    t2count[other2] ^= mod3(found + 2);
                    t2hash[other2] ^= hash;
                }
            }

            if stack_size == size {
                break;
            }

            for slot in reverse_order[..size].iter_mut() {
                *slot = 0;
            }
            t2count.fill(0);
            t2hash.fill(0);
            seed = splitmix64(&mut rng_counter);
        }

        // Assign fingerprints in reverse peel order. At each step the peeled
        // slot is the only one of the edge's three slots not yet final, so
        // setting it makes the three-way xor equal the key's fingerprint.
        let mut fingerprints = vec![F::default(); capacity];
        for i in (0..size).rev() {
            let hash = reverse_order[i];
            let found = reverse_h[i] as usize;
            let (h0, h1, h2) = hash_positions(hash, layout);
            let h012 = [
                h0 as usize,
                h1 as usize,
                h2 as usize,
                h0 as usize,
                h1 as usize,
            ];
            fingerprints[h012[found]] =
                F::from_hash(hash) ^ fingerprints[h012[found + 1]] ^ fingerprints[h012[found + 2]];
        }

        Ok(BuildOutput {
            filter: Self {
                seed,
                layout,
                fingerprints,
            },
            iterations,
            total_slots: capacity,
            actual_overhead: if size == 0 {
                0.0
            } else {
                capacity as f64 / size as f64
            },
        })
    }
}

impl BinaryFuseFilter {
    /// Attempts to build an 8-bit fingerprint filter from the provided set of
    /// unique keys.
    pub fn build(keys: &[u64]) -> Result<BuildOutput, BuildError> {
        Self::build_with_config(keys, &FilterConfig::default())
    }

    /// Builds an 8-bit fingerprint filter using the supplied configuration.
    pub fn build_with_config(
        keys: &[u64],
        config: &FilterConfig,
    ) -> Result<BuildOutput, BuildError> {
        Self::build_internal(keys, config)
    }

    /// Attempts to build a 16-bit fingerprint filter from the provided set of
    /// unique keys.
    pub fn build_16(keys: &[u64]) -> Result<BuildOutput16, BuildError> {
        BinaryFuseFilter::<u16>::build_with_config(keys, &FilterConfig::default())
    }

    /// Builds a 16-bit fingerprint filter using the supplied configuration.
    pub fn build_16_with_config(
        keys: &[u64],
        config: &FilterConfig,
    ) -> Result<BuildOutput16, BuildError> {
        BinaryFuseFilter::<u16>::build_with_config(keys, config)
    }

    /// Attempts to build a 32-bit fingerprint filter from the provided set of
    /// unique keys.
    pub fn build_32(keys: &[u64]) -> Result<BuildOutput32, BuildError> {
        BinaryFuseFilter::<u32>::build_with_config(keys, &FilterConfig::default())
    }

    /// Builds a 32-bit fingerprint filter using the supplied configuration.
    pub fn build_32_with_config(
        keys: &[u64],
        config: &FilterConfig,
    ) -> Result<BuildOutput32, BuildError> {
        BinaryFuseFilter::<u32>::build_with_config(keys, config)
    }

    /// Builds partitioned 8-bit filters using the default configuration.
    pub fn build_partitioned(keys: &[u64]) -> Result<PartitionedBuildOutput, BuildError> {
        Self::build_partitioned_with_config(keys, &PartitionConfig::default())
    }

    /// Builds partitioned 8-bit filters using the supplied configuration.
    pub fn build_partitioned_with_config(
        keys: &[u64],
        config: &PartitionConfig,
    ) -> Result<PartitionedBuildOutput, BuildError> {
        build_partitioned_generic::<u8>(keys, config)
    }
}

impl BinaryFuseFilter<u16> {
    /// Builds a 16-bit fingerprint filter using the supplied configuration.
    pub fn build_with_config(
        keys: &[u64],
        config: &FilterConfig,
    ) -> Result<BuildOutput<u16>, BuildError> {
        Self::build_internal(keys, config)
    }
}

impl BinaryFuseFilter<u32> {
    /// Builds a 32-bit fingerprint filter using the supplied configuration.
    pub fn build_with_config(
        keys: &[u64],
        config: &FilterConfig,
    ) -> Result<BuildOutput<u32>, BuildError> {
        Self::build_internal(keys, config)
    }
}

fn validate_partition_config(config: &PartitionConfig) -> Result<(), BuildError> {
    if config.target_partition_size == 0 {
        return Err(BuildError::InvalidConfig(
            "target_partition_size must be greater than 0",
        ));
    }
    Ok(())
}

fn build_partitioned_generic<F>(
    keys: &[u64],
    config: &PartitionConfig,
) -> Result<PartitionedBuildOutput<F>, BuildError>
where
    F: FingerprintValue,
{
    validate_partition_config(config)?;

    let partition_count = config.partition_count(keys.len());
    let mut raw_partitions: Vec<Vec<u64>> = Vec::with_capacity(partition_count);
    raw_partitions.resize_with(partition_count, Vec::new);

    for &key in keys {
        let idx = if partition_count == 1 {
            0
        } else {
            (mixsplit(key, config.partition_seed) % partition_count as u64) as usize
        };
        raw_partitions[idx].push(key);
    }

    let worker_count = if config.max_threads == 0 {
        thread::available_parallelism()
            .map(|n| n.get())
            .unwrap_or(1)
    } else {
        config.max_threads
    };

    let process = || -> Result<Vec<(BinaryFuseFilter<F>, PartitionStats)>, BuildError> {
        raw_partitions
            .into_par_iter()
            .map(|partition_keys| {
                let build_start = Instant::now();
                let build = BinaryFuseFilter::<F>::build_internal(&partition_keys, &config.base)?;
                let stats = PartitionStats {
                    key_count: partition_keys.len(),
                    iterations: build.iterations,
                    total_slots: build.total_slots,
                    actual_overhead: build.actual_overhead,
                    build_time: build_start.elapsed(),
                };
                Ok((build.filter, stats))
            })
            .collect()
    };

    let results = rayon::ThreadPoolBuilder::new()
        .num_threads(worker_count)
        .build()
        .map_err(|_| BuildError::InvalidConfig("failed to create thread pool"))?
        .install(process)?;

    let mut filters = Vec::with_capacity(results.len());
    let mut stats = Vec::with_capacity(results.len());
    let mut total_bytes = 0usize;
    let mut total_build_time = Duration::default();

    for (filter_part, stats_part) in results {
        total_bytes = total_bytes.saturating_add(filter_part.fingerprint_bytes());
        total_build_time += stats_part.build_time;
        filters.push(filter_part);
        stats.push(stats_part);
    }

    let bytes_per_key = if keys.is_empty() {
        0.0
    } else {
        total_bytes as f64 / keys.len() as f64
    };

    let filter = PartitionedFuseFilter {
        partition_seed: config.partition_seed,
        filters,
    };

    Ok(PartitionedBuildOutput {
        filter,
        partition_stats: stats,
        total_bytes,
        bytes_per_key,
        total_build_time,
    })
}

impl<F> PartitionedFuseFilter<F>
where
    F: FingerprintValue,
{
    /// Returns true when `key` is (probably) in the set.
    /// Returns false when `key` is definitely not in the set.
    pub fn contains(&self, key: u64) -> bool {
        if self.filters.is_empty() {
            return false;
        }
        let idx = if self.filters.len() == 1 {
            0
        } else {
            (mixsplit(key, self.partition_seed) % self.filters.len() as u64) as usize
        };
        self.filters[idx].contains(key)
    }

    /// Returns the number of partitions.
    pub fn len(&self) -> usize {
        self.filters.len()
    }

    /// Returns true when no partitions are present.
    pub fn is_empty(&self) -> bool {
        self.filters.is_empty()
    }

    /// Returns the seed used for partitioning.
    pub fn partition_seed(&self) -> u64 {
        self.partition_seed
    }

    /// Returns the filters for each partition.
    pub fn partitions(&self) -> &[BinaryFuseFilter<F>] {
        &self.filters
    }
}

fn validate_config(config: &FilterConfig) -> Result<(), BuildError> {
    if config.max_iterations == 0 {
        return Err(BuildError::InvalidConfig(
            "max_iterations must be greater than 0",
        ));
    }
    Ok(())
}

fn calculate_layout(key_count: usize) -> Result<Layout, BuildError> {
    let size = key_count as u64;
    let segment_length = u64::from(segment_length_for(size));
    let capacity = (size as f64 * size_factor_for(size)).round() as u64;

    let init_segment_count =
        ((capacity + segment_length - 1) / segment_length).saturating_sub(u64::from(ARITY - 1));
    let array_length = (init_segment_count + u64::from(ARITY - 1)) * segment_length;
    let mut segment_count = (array_length + segment_length - 1) / segment_length;
    if segment_count <= u64::from(ARITY - 1) {
        segment_count = 1;
    } else {
        segment_count -= u64::from(ARITY - 1);
    }
    let array_length = (segment_count + u64::from(ARITY - 1)) * segment_length;
    let array_length = u32::try_from(array_length)
        .map_err(|_| BuildError::InvalidConfig("filter size overflow"))?;

    let segment_length = segment_length as u32;
    Ok(Layout {
        segment_length,
        segment_length_mask: segment_length - 1,
        segment_count: segment_count as u32,
        segment_count_length: segment_count as u32 * segment_length,
        array_length,
    })
}

fn segment_length_for(key_count: u64) -> u32 {
    let log_size = (cmp::max(key_count, 2) as f64).ln();
    let segment_length = 2u64 << ((0.831 * log_size + 1.25).round() as u32);
    cmp::min(segment_length, u64::from(MAX_SEGMENT_LENGTH)) as u32
}

fn size_factor_for(key_count: u64) -> f64 {
    let log_size = (cmp::max(key_count, 2) as f64).ln();
    (0.4 + 9.3 / log_size).max(1.125)
}

/// Derives the three table indices of a hash. The indices land in three
/// consecutive segments of the window starting at `h0`'s segment, so they are
/// pairwise distinct.
#[inline]
fn hash_positions(hash: u64, layout: Layout) -> (u32, u32, u32) {
    let hi = ((u128::from(hash) * u128::from(layout.segment_count_length)) >> 64) as u64;
    let h0 = hi as u32;
    let mut h1 = h0 + layout.segment_length;
    let mut h2 = h1 + layout.segment_length;
    h1 ^= (hash >> 18) as u32 & layout.segment_length_mask;
    h2 ^= hash as u32 & layout.segment_length_mask;
    (h0, h1, h2)
}

/// Scrambles a key under a seed into the 64-bit hash all table positions and
/// fingerprints are derived from.
#[inline]
pub fn mixsplit(key: u64, seed: u64) -> u64 {
    murmur64(key ^ seed)
}

#[inline]
fn murmur64(mut h: u64) -> u64 {
    h ^= h >> 33;
    h = h.wrapping_mul(0xFF51_AFD7_ED55_8CCD);
    h ^= h >> 33;
    h = h.wrapping_mul(0xC4CE_B9FE_1A85_EC53);
    h ^= h >> 33;
    h
}

#[inline]
fn splitmix64(state: &mut u64) -> u64 {
    *state = state.wrapping_add(0x9E37_79B9_7F4A_7C15);
    let mut z = *state;
    z = (z ^ (z >> 30)).wrapping_mul(0xBF58_476D_1CE4_E5B9);
    z = (z ^ (z >> 27)).wrapping_mul(0x94D0_49BB_1331_11EB);
    z ^ (z >> 31)
}

#[inline]
fn fingerprint(hash: u64) -> u64 {
    hash ^ (hash >> 32)
}

#[inline]
fn mod3(x: u8) -> u8 {
    if x > 2 {
        x - 3
    } else {
        x
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::SmallRng;
    use rand::{Rng, SeedableRng};
    use std::collections::HashSet;

    fn splitmix_keys(count: usize, state: &mut u64) -> Vec<u64> {
        (0..count).map(|_| splitmix64(state)).collect()
    }

    #[test]
    fn singleton_membership() {
        let build = BinaryFuseFilter::build(&[42]).expect("singleton filter should build");
        assert!(build.filter.contains(42));
    }

    #[test]
    fn empty_set_builds() {
        let build = BinaryFuseFilter::build(&[]).expect("empty filter should build");
        assert_eq!(build.iterations, 1);
        // Querying an empty filter is permitted; the answer is unspecified.
        let _ = build.filter.contains(123);
    }

    #[test]
    fn small_set_has_no_false_negatives() {
        let keys: Vec<u64> = (1..=1000).collect();
        let filter = BinaryFuseFilter::build(&keys)
            .expect("filter should build")
            .filter;
        for &k in &keys {
            assert!(filter.contains(k), "missing key: {k}");
        }
        let spurious = (10_001..=20_000u64).filter(|&k| filter.contains(k)).count();
        assert!(spurious < 40, "too many false positives: {spurious}");
    }

    #[test]
    fn duplicate_keys_exhaust_retries() {
        let keys = vec![7u64; 1000];
        let err = BinaryFuseFilter::build(&keys).unwrap_err();
        assert!(matches!(err, BuildError::ConstructionFailed(_)));
    }

    #[test]
    fn zero_iteration_budget_is_rejected() {
        let config = FilterConfig {
            max_iterations: 0,
            ..FilterConfig::default()
        };
        let err = BinaryFuseFilter::<u8>::build_with_config(&[1, 2, 3], &config).unwrap_err();
        assert!(matches!(err, BuildError::InvalidConfig(_)));
    }

    #[test]
    fn layout_bounds_for_a_million_keys() {
        let layout = calculate_layout(1_000_000).expect("layout should fit");
        assert!(layout.segment_length.is_power_of_two());
        assert!((1 << 12..=1 << 18).contains(&layout.segment_length));
        let ratio = f64::from(layout.array_length) / 1_000_000.0;
        assert!(
            (1.125..=1.30).contains(&ratio),
            "load ratio out of range: {ratio}"
        );
    }

    #[test]
    fn tiny_layouts_are_sane() {
        for key_count in [0usize, 1, 2, 3, 10] {
            let layout = calculate_layout(key_count).expect("layout should fit");
            assert!(layout.segment_length.is_power_of_two());
            assert!(layout.segment_count >= 1);
            assert_eq!(
                layout.array_length,
                (layout.segment_count + 2) * layout.segment_length
            );
            assert!(layout.array_length as usize >= 3 * key_count);
        }
    }

    #[test]
    fn hash_positions_land_in_consecutive_segments() {
        let layout = calculate_layout(100_000).expect("layout should fit");
        let mut state = 0xDEAD_BEEF_u64;
        for _ in 0..10_000 {
            let hash = splitmix64(&mut state);
            let (h0, h1, h2) = hash_positions(hash, layout);
            assert!(h0 < layout.array_length);
            assert!(h1 < layout.array_length);
            assert!(h2 < layout.array_length);
            let segment = |h: u32| h / layout.segment_length;
            assert_eq!(segment(h1), segment(h0) + 1);
            assert_eq!(segment(h2), segment(h0) + 2);
        }
    }

    #[test]
    fn construction_is_deterministic() {
        let mut state = 0x5A5A_u64;
        let keys = splitmix_keys(50_000, &mut state);
        let a = BinaryFuseFilter::build(&keys).expect("first build");
        let b = BinaryFuseFilter::build(&keys).expect("second build");
        assert_eq!(a.filter.seed, b.filter.seed);
        assert_eq!(a.iterations, b.iterations);
        assert_eq!(a.filter.fingerprints, b.filter.fingerprints);
    }

    #[test]
    fn different_seed_streams_agree_on_membership() {
        let keys: Vec<u64> = (0..10_000u64).map(|i| i.wrapping_mul(13_791)).collect();
        for seed in [1u64, 0xC0FFEE, 0xDEAD_BEEF] {
            let config = FilterConfig {
                seed,
                ..FilterConfig::default()
            };
            let filter = BinaryFuseFilter::<u8>::build_with_config(&keys, &config)
                .expect("filter should build")
                .filter;
            for &k in &keys {
                assert!(filter.contains(k), "missing key {k} under seed {seed}");
            }
        }
    }

    #[test]
    fn false_positive_rate_is_near_advertised() {
        let mut rng = SmallRng::seed_from_u64(0x5EED);
        let mut key_set = HashSet::with_capacity(100_000);
        while key_set.len() < 100_000 {
            key_set.insert(rng.gen::<u64>());
        }
        let keys: Vec<u64> = key_set.iter().copied().collect();

        let build = BinaryFuseFilter::build(&keys).expect("filter should build");
        assert!(
            build.iterations <= 5,
            "unexpected reseeds: {}",
            build.iterations
        );
        let filter = build.filter;

        for &k in &keys {
            assert!(filter.contains(k), "missing key: {k}");
        }

        let probes = 1_000_000u32;
        let mut tested = 0u32;
        let mut false_positives = 0u32;
        while tested < probes {
            let probe = rng.gen::<u64>();
            if key_set.contains(&probe) {
                continue;
            }
            tested += 1;
            if filter.contains(probe) {
                false_positives += 1;
            }
        }
        let rate = f64::from(false_positives) / f64::from(probes);
        assert!(
            (0.002..0.006).contains(&rate),
            "false positive rate out of range: {rate}"
        );
    }

    #[test]
    fn load_stays_within_budget() {
        let mut state = 17u64;
        let keys = splitmix_keys(100_000, &mut state);
        let build = BinaryFuseFilter::build(&keys).expect("filter should build");
        assert!((1.125..=1.25).contains(&build.actual_overhead));
        assert_eq!(build.total_slots, build.filter.table_length());
    }

    #[test]
    fn sixteen_bit_filter_builds() {
        let mut state = 7u64;
        let keys = splitmix_keys(4_096, &mut state);
        let build = BinaryFuseFilter::build_16(&keys).expect("16-bit filter should build");
        let filter = build.filter;
        for &k in &keys {
            assert!(filter.contains(k), "missing key: {k}");
        }
        let spurious = (0..100_000)
            .map(|_| splitmix64(&mut state))
            .filter(|&k| filter.contains(k))
            .count();
        assert!(spurious < 20, "16-bit spurious hits: {spurious}");
    }

    #[test]
    fn thirty_two_bit_filter_builds() {
        let mut state = 11u64;
        let keys = splitmix_keys(4_096, &mut state);
        let build = BinaryFuseFilter::build_32(&keys).expect("32-bit filter should build");
        let filter = build.filter;
        for &k in &keys {
            assert!(filter.contains(k), "missing key: {k}");
        }
        let spurious = (0..100_000)
            .map(|_| splitmix64(&mut state))
            .filter(|&k| filter.contains(k))
            .count();
        assert!(spurious < 5, "32-bit spurious hits: {spurious}");
    }

    #[test]
    fn partitioned_filter_no_false_negatives() {
        let mut state = 99u64;
        let keys = splitmix_keys(20_000, &mut state);
        let config = PartitionConfig {
            target_partition_size: 3_000,
            ..PartitionConfig::default()
        };
        let build = BinaryFuseFilter::build_partitioned_with_config(&keys, &config)
            .expect("partitioned filter should build");
        assert!(build.filter.len() > 1);
        for &k in &keys {
            assert!(build.filter.contains(k), "missing key: {k}");
        }
        let total_keys: usize = build.partition_stats.iter().map(|s| s.key_count).sum();
        assert_eq!(total_keys, keys.len());
        assert_eq!(
            build.total_bytes,
            build
                .filter
                .partitions()
                .iter()
                .map(|f| f.fingerprint_bytes())
                .sum::<usize>()
        );
    }

    #[test]
    fn partitioned_config_is_validated() {
        let config = PartitionConfig {
            target_partition_size: 0,
            ..PartitionConfig::default()
        };
        let err = BinaryFuseFilter::build_partitioned_with_config(&[1, 2, 3], &config).unwrap_err();
        assert!(matches!(err, BuildError::InvalidConfig(_)));
    }
}

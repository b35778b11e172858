use std::time::Instant;

use fuse_filter::{BinaryFuseFilter, FilterConfig};

fn main() {
    // ------------------------------------------------------------
    // 1) Build a 1,000,000-key dataset (integers 0..1_000_000).
    // ------------------------------------------------------------
    let key_count = 1_000_000usize;
    let keys: Vec<u64> = (0..(key_count as u64)).collect();

    // ------------------------------------------------------------
    // 2) Configure construction.
    // ------------------------------------------------------------
    let config = FilterConfig {
        // Starting state of the seed stream; change this if you want a
        // different table layout for the same keys.
        seed: 1,
        // Reseed attempts before construction gives up. The default is
        // generous; real failures indicate duplicate keys.
        max_iterations: 100,
    };

    // ------------------------------------------------------------
    // 3) Build the filter.
    // ------------------------------------------------------------
    let build_start = Instant::now();
    let build = BinaryFuseFilter::<u8>::build_with_config(&keys, &config).expect("filter should build");
    let build_time = build_start.elapsed();

    println!("built filter for {key_count} keys in {build_time:?}");
    println!("construction attempts: {}", build.iterations);
    println!("table slots: {}", build.total_slots);
    println!("slots per key: {:.4}", build.actual_overhead);
    println!(
        "bits per key: {:.3}",
        build.filter.fingerprint_bytes() as f64 * 8.0 / key_count as f64
    );

    let filter = build.filter;

    // ------------------------------------------------------------
    // 4) Query a few known-present keys.
    // ------------------------------------------------------------
    for &key in &[0_u64, 42, (key_count as u64) - 1] {
        assert!(
            filter.contains(key),
            "present key {key} should be reported as present"
        );
    }

    // ------------------------------------------------------------
    // 5) Query a few known-absent keys.
    //
    // Note: false positives are expected with any probabilistic filter.
    // ------------------------------------------------------------
    for &key in &[(key_count as u64), (key_count as u64) + 123] {
        let hit = filter.contains(key);
        println!("query {key}: {hit} (true means false positive)");
    }

    // ------------------------------------------------------------
    // 6) Scan the full key set for false negatives.
    //
    // This is always zero by construction, but we keep the check here
    // as a sanity test.
    // ------------------------------------------------------------
    let mut false_negatives = 0usize;
    for &key in &keys {
        if !filter.contains(key) {
            false_negatives += 1;
        }
    }
    println!("false negatives over full set: {false_negatives}");
}

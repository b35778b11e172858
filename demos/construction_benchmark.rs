use std::env;
use std::hint::black_box;
use std::time::Instant;

#[path = "support/bench_common.rs"]
mod bench_common;

use bench_common::{generate_seed, random_keys, SplitMix64};
use fuse_filter::{BinaryFuseFilter, FilterConfig, PartitionConfig};

fn main() {
    let mut key_count = 1_000_000usize;
    let mut query_count = 1_000_000usize;
    let mut runs = 3u32;
    let mut seed = generate_seed();
    let mut partitioned = false;

    let mut args = env::args().skip(1);
    while let Some(flag) = args.next() {
        fn parse<T: std::str::FromStr>(value: Option<String>, name: &str) -> T
        where
            T::Err: std::fmt::Display,
        {
            let value = value.unwrap_or_else(|| panic!("expected value after {name}"));
            value
                .parse::<T>()
                .unwrap_or_else(|err| panic!("invalid value for {name}: {err}"))
        }

        match flag.as_str() {
            "--keys" => key_count = parse(args.next(), "--keys"),
            "--queries" => query_count = parse(args.next(), "--queries"),
            "--runs" => runs = parse(args.next(), "--runs"),
            "--seed" => seed = parse(args.next(), "--seed"),
            "--partitioned" => partitioned = true,
            other => panic!("unknown flag: {other}"),
        }
    }

    println!(
        "running {runs} runs with key_count={key_count}, query_count={query_count}, seed={seed:#x}"
    );

    let mut generator = SplitMix64::new(seed);
    for run in 0..runs {
        let keys = random_keys(key_count, &mut generator);
        let probes = random_keys(query_count, &mut generator);

        if partitioned {
            let config = PartitionConfig::default();
            let build_start = Instant::now();
            let build = BinaryFuseFilter::build_partitioned_with_config(&keys, &config)
                .expect("partitioned filter should build");
            let build_time = build_start.elapsed();

            let query_start = Instant::now();
            let mut hits = 0u64;
            for &probe in &probes {
                if build.filter.contains(probe) {
                    hits += 1;
                }
            }
            let query_time = query_start.elapsed();
            black_box(hits);

            println!(
                "run {run}: partitions={} build={build_time:?} (worker total {:?}) query={query_time:?} bytes/key={:.4}",
                build.filter.len(),
                build.total_build_time,
                build.bytes_per_key
            );
        } else {
            let config = FilterConfig::default();
            let build_start = Instant::now();
            let build = BinaryFuseFilter::<u8>::build_with_config(&keys, &config)
                .expect("filter should build");
            let build_time = build_start.elapsed();

            let query_start = Instant::now();
            let mut hits = 0u64;
            for &probe in &probes {
                if build.filter.contains(probe) {
                    hits += 1;
                }
            }
            let query_time = query_start.elapsed();
            black_box(hits);

            let mqps = query_count as f64 / query_time.as_secs_f64() / 1.0e6;
            println!(
                "run {run}: attempts={} build={build_time:?} query={query_time:?} ({mqps:.1} Mq/s) slots/key={:.4}",
                build.iterations, build.actual_overhead
            );
        }
    }
}

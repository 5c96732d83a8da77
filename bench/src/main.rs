#![forbid(unsafe_code)]
//! Similarity index benchmarks for facematch.
//!
//! Scenarios:
//! - `search`: exact top-1 scan over normalized embeddings
//! - `build`: batched index population as done on startup and rebuild
//! - `enroll`: duplicate check + in-memory store insert + index mirror

use std::env;
use std::process;
use std::time::{Duration, Instant};

use facematch_core::{
    encode_embedding, l2_squared, normalize_l2, EnrollDecision, Identity, MatchPolicy,
    RecordStore, SimilarityIndex, VectorStore, VectorValidationOptions,
};

const DEFAULT_DIMENSION: usize = 512;
const DEFAULT_DATASET_SIZE: usize = 10_000;
const DEFAULT_BATCH_SIZE: usize = 1_000;
const DEFAULT_WARMUP_RUNS: usize = 5;
const DEFAULT_MEASURED_RUNS: usize = 30;
const MATCH_THRESHOLD: f32 = 0.8;

#[derive(Clone, Copy)]
struct BenchConfig {
    dimension: usize,
    dataset_size: usize,
    batch_size: usize,
    warmup_runs: usize,
    measured_runs: usize,
}

fn main() {
    if cfg!(debug_assertions) && env::var("FACEMATCH_ALLOW_DEBUG_BENCH").as_deref() != Ok("1") {
        eprintln!(
            "error=debug_build_not_allowed message=\"run `cargo run --release -p facematch-bench`\""
        );
        process::exit(2);
    }

    let mode = if cfg!(debug_assertions) {
        "debug"
    } else {
        "release"
    };
    let config = load_config();

    let scenario = env::var("FACEMATCH_BENCH_SCENARIO").unwrap_or_else(|_| "all".to_string());
    let ok = match scenario.as_str() {
        "all" => {
            run_search_bench(mode, config)
                && run_build_bench(mode, config)
                && run_enroll_bench(mode, config)
        }
        "search" => run_search_bench(mode, config),
        "build" => run_build_bench(mode, config),
        "enroll" => run_enroll_bench(mode, config),
        _ => {
            eprintln!(
                "error=invalid_scenario scenario=\"{scenario}\" allowed=\"all,search,build,enroll\""
            );
            false
        }
    };

    if !ok {
        process::exit(1);
    }
}

fn load_config() -> BenchConfig {
    BenchConfig {
        dimension: read_usize_env_with_min("FACEMATCH_BENCH_DIMENSION", DEFAULT_DIMENSION, 1),
        dataset_size: read_usize_env_with_min(
            "FACEMATCH_BENCH_DATASET_SIZE",
            DEFAULT_DATASET_SIZE,
            1,
        ),
        batch_size: read_usize_env_with_min("FACEMATCH_BENCH_BATCH_SIZE", DEFAULT_BATCH_SIZE, 1),
        warmup_runs: read_usize_env_with_min("FACEMATCH_BENCH_WARMUP_RUNS", DEFAULT_WARMUP_RUNS, 0),
        measured_runs: read_usize_env_with_min(
            "FACEMATCH_BENCH_MEASURED_RUNS",
            DEFAULT_MEASURED_RUNS,
            1,
        ),
    }
}

fn run_search_bench(mode: &str, config: BenchConfig) -> bool {
    let Some(dataset) = generate_dataset(config.dataset_size, config.dimension) else {
        return false;
    };
    let Some(index) = build_index(&dataset, config) else {
        return false;
    };
    let Some(query) = normalized_vector(1_337, config.dimension) else {
        return false;
    };

    for _ in 0..config.warmup_runs {
        if search_once(&index, &query).is_none() {
            return false;
        }
    }

    let mut elapsed_samples = Vec::with_capacity(config.measured_runs);
    let mut total_duration = Duration::ZERO;
    let mut last_best: Option<(Identity, f32)> = None;
    for _ in 0..config.measured_runs {
        let Some((elapsed, best)) = search_once(&index, &query) else {
            return false;
        };
        elapsed_samples.push(elapsed.as_secs_f64() * 1_000.0);
        total_duration += elapsed;
        last_best = best;
    }

    let (p50_ms, p95_ms, avg_ms) = summarize_ms(&elapsed_samples);
    let qps = config.measured_runs as f64 / total_duration.as_secs_f64();
    let (best_id, best_distance) = last_best.unwrap_or((0, f32::NAN));
    let Some(expected_distance) = brute_force_best(&dataset, &query) else {
        return false;
    };
    if (best_distance - expected_distance).abs() > 1e-4 {
        eprintln!(
            "error=inexact_search best_distance={best_distance:.6} expected_distance={expected_distance:.6}"
        );
        return false;
    }

    println!(
        "bench=index_search mode={mode} dataset_size={} dimension={} measured_runs={} p50_ms={p50_ms:.6} p95_ms={p95_ms:.6} avg_ms={avg_ms:.6} qps={qps:.2} best_id={best_id} best_distance={best_distance:.6}",
        config.dataset_size, config.dimension, config.measured_runs
    );
    true
}

fn run_build_bench(mode: &str, config: BenchConfig) -> bool {
    let Some(dataset) = generate_dataset(config.dataset_size, config.dimension) else {
        return false;
    };

    for _ in 0..config.warmup_runs {
        if build_index(&dataset, config).is_none() {
            return false;
        }
    }

    let mut elapsed_samples = Vec::with_capacity(config.measured_runs);
    let mut total_duration = Duration::ZERO;
    for _ in 0..config.measured_runs {
        let started_at = Instant::now();
        let Some(index) = build_index(&dataset, config) else {
            return false;
        };
        let elapsed = started_at.elapsed();
        if index.len() != dataset.len() {
            eprintln!(
                "error=build_incomplete expected={} got={}",
                dataset.len(),
                index.len()
            );
            return false;
        }
        elapsed_samples.push(elapsed.as_secs_f64() * 1_000.0);
        total_duration += elapsed;
    }

    let (p50_ms, p95_ms, avg_ms) = summarize_ms(&elapsed_samples);
    let rows_per_sec =
        (config.measured_runs * config.dataset_size) as f64 / total_duration.as_secs_f64();

    println!(
        "bench=index_build mode={mode} dataset_size={} dimension={} batch_size={} measured_runs={} p50_ms={p50_ms:.6} p95_ms={p95_ms:.6} avg_ms={avg_ms:.6} rows_per_sec={rows_per_sec:.2}",
        config.dataset_size, config.dimension, config.batch_size, config.measured_runs
    );
    true
}

fn run_enroll_bench(mode: &str, config: BenchConfig) -> bool {
    let policy = match MatchPolicy::new(MATCH_THRESHOLD) {
        Ok(policy) => policy,
        Err(error) => {
            eprintln!("error=policy_failed detail=\"{error}\"");
            return false;
        }
    };
    let Some(dataset) = generate_dataset(config.dataset_size, config.dimension) else {
        return false;
    };

    let store = RecordStore::in_memory();
    let mut index = match SimilarityIndex::new(config.dimension) {
        Ok(index) => index,
        Err(error) => {
            eprintln!("error=index_create_failed detail=\"{error}\"");
            return false;
        }
    };

    let started_at = Instant::now();
    let mut enrolled = 0usize;
    let mut duplicates = 0usize;
    for (position, embedding) in dataset.iter().enumerate() {
        let nearest = match index.search(embedding, 1) {
            Ok(neighbors) => neighbors.into_iter().next(),
            Err(error) => {
                eprintln!("error=search_failed detail=\"{error}\"");
                return false;
            }
        };
        if let EnrollDecision::Duplicate(_) = policy.enrollment_decision(nearest) {
            duplicates += 1;
            continue;
        }

        let identity =
            match store.insert_record(&format!("user-{position}"), &encode_embedding(embedding)) {
                Ok(identity) => identity,
                Err(error) => {
                    eprintln!("error=store_insert_failed detail=\"{error}\"");
                    return false;
                }
            };
        if let Err(error) = index.insert(identity, embedding) {
            eprintln!("error=index_insert_failed identity={identity} detail=\"{error}\"");
            return false;
        }
        enrolled += 1;
    }
    let elapsed = started_at.elapsed();
    let ops_per_sec = dataset.len() as f64 / elapsed.as_secs_f64();

    println!(
        "bench=enroll mode={mode} attempts={} dimension={} enrolled={enrolled} duplicates={duplicates} total_ms={:.3} ops_per_sec={ops_per_sec:.2}",
        dataset.len(),
        config.dimension,
        elapsed.as_secs_f64() * 1_000.0
    );
    true
}

fn search_once(
    index: &SimilarityIndex,
    query: &[f32],
) -> Option<(Duration, Option<(Identity, f32)>)> {
    let started_at = Instant::now();
    match index.search(query, 1) {
        Ok(neighbors) => Some((
            started_at.elapsed(),
            neighbors
                .first()
                .map(|neighbor| (neighbor.identity, neighbor.distance)),
        )),
        Err(error) => {
            eprintln!("error=search_failed detail=\"{error}\"");
            None
        }
    }
}

/// Scalar reference scan the indexed search must agree with.
fn brute_force_best(dataset: &[Vec<f32>], query: &[f32]) -> Option<f32> {
    let mut best = f32::INFINITY;
    for row in dataset {
        match l2_squared(query, row) {
            Ok(distance) => best = best.min(distance),
            Err(error) => {
                eprintln!("error=reference_distance_failed detail=\"{error}\"");
                return None;
            }
        }
    }
    Some(best)
}

fn build_index(dataset: &[Vec<f32>], config: BenchConfig) -> Option<SimilarityIndex> {
    let mut index = match SimilarityIndex::new(config.dimension) {
        Ok(index) => index,
        Err(error) => {
            eprintln!("error=index_create_failed detail=\"{error}\"");
            return None;
        }
    };

    for (chunk_index, chunk) in dataset.chunks(config.batch_size).enumerate() {
        let offset = chunk_index * config.batch_size;
        let batch: Vec<(Identity, Vec<f32>)> = chunk
            .iter()
            .enumerate()
            .map(|(position, values)| ((offset + position + 1) as Identity, values.clone()))
            .collect();
        if let Err(error) = index.insert_batch(&batch) {
            eprintln!("error=insert_batch_failed batch={chunk_index} detail=\"{error}\"");
            return None;
        }
    }
    Some(index)
}

fn summarize_ms(samples_ms: &[f64]) -> (f64, f64, f64) {
    let p50_ms = percentile_ms(samples_ms, 0.50);
    let p95_ms = percentile_ms(samples_ms, 0.95);
    let avg_ms = samples_ms.iter().sum::<f64>() / samples_ms.len() as f64;
    (p50_ms, p95_ms, avg_ms)
}

fn percentile_ms(samples_ms: &[f64], quantile: f64) -> f64 {
    if samples_ms.is_empty() {
        return 0.0;
    }

    let mut sorted = samples_ms.to_vec();
    sorted.sort_by(f64::total_cmp);
    let last_index = sorted.len().saturating_sub(1);
    let position = (quantile.clamp(0.0, 1.0) * last_index as f64).round() as usize;
    sorted[position]
}

fn generate_dataset(size: usize, dimension: usize) -> Option<Vec<Vec<f32>>> {
    (0..size)
        .map(|id| normalized_vector(id as u64, dimension))
        .collect()
}

fn normalized_vector(seed: u64, dimension: usize) -> Option<Vec<f32>> {
    let raw: Vec<f32> = (0..dimension)
        .map(|index| {
            let mixed = (seed as usize)
                .wrapping_mul(2_654_435_761)
                .wrapping_add(index.wrapping_mul(40_503))
                % 10_000;
            mixed as f32 / 10_000.0 - 0.5
        })
        .collect();

    match normalize_l2(&raw, VectorValidationOptions::strict()) {
        Ok(values) => Some(values),
        Err(error) => {
            eprintln!("error=normalize_failed seed={seed} detail=\"{error}\"");
            None
        }
    }
}

fn read_usize_env_with_min(key: &str, default: usize, min: usize) -> usize {
    match env::var(key) {
        Ok(raw) => match raw.parse::<usize>() {
            Ok(value) if value >= min => value,
            _ => {
                eprintln!("warning=invalid_env key={key} value=\"{raw}\" fallback={default}");
                default
            }
        },
        Err(_) => default,
    }
}

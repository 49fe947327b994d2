use piano_ann::ann::builder::{build_graph, robust_prune, NeighborOracle};
use piano_ann::ann::search::SearchFrontend;
use piano_ann::ann::{GraphStore, MemoryGraphStore};
use piano_ann::l2_distance;
use rand::prelude::*;
use rand_chacha::ChaCha8Rng;
use std::time::Duration;

fn main() {
    divan::main();
}

fn random_vectors(rng: &mut ChaCha8Rng, n: usize, dim: usize) -> Vec<Vec<f32>> {
    (0..n).map(|_| (0..dim).map(|_| rng.random::<f32>()).collect()).collect()
}

/// Exhaustive-scan candidate oracle; a real deployment plugs in HNSW or NGT.
struct ExactScanOracle {
    vectors: Vec<Vec<f32>>,
}

impl NeighborOracle for ExactScanOracle {
    fn knn(&self, v: &[f32], k: usize) -> Vec<u32> {
        let mut order: Vec<(u32, f32)> = self
            .vectors
            .iter()
            .enumerate()
            .map(|(i, w)| (i as u32, l2_distance(v, w)))
            .collect();
        order.sort_by(|a, b| a.1.total_cmp(&b.1));
        order.into_iter().take(k).map(|(i, _)| i).collect()
    }
}

#[divan::bench(max_time = Duration::from_secs(30))]
fn prune_64_candidates_to_16(bencher: divan::Bencher) {
    let mut rng = ChaCha8Rng::from_os_rng();
    let vectors = random_vectors(&mut rng, 2048, 128);
    let candidates: Vec<u32> = (1..=64).collect();

    bencher.bench_local(move || divan::black_box(robust_prune(&vectors, 0, candidates.clone(), 16, 1.2)));
}

#[divan::bench(max_time = Duration::from_secs(60), sample_count = 3, sample_size = 1)]
fn build_graph_500_vertices(bencher: divan::Bencher) {
    let mut rng = ChaCha8Rng::from_os_rng();
    let vectors = random_vectors(&mut rng, 500, 32);
    let oracle = ExactScanOracle { vectors: vectors.clone() };

    bencher.bench_local(move || divan::black_box(build_graph(&vectors, 8, &oracle, 7)).is_ok());
}

#[divan::bench(max_time = Duration::from_secs(60), skip_ext_time = true)]
fn plaintext_search_step(bencher: divan::Bencher) {
    const N: usize = 10_000;
    const M: usize = 16;

    let mut rng = ChaCha8Rng::from_os_rng();
    let vectors = random_vectors(&mut rng, N, 64);

    // uniform random adjacency is enough to price one walk round
    let graph: Vec<Vec<u32>> = (0..N)
        .map(|u| {
            let mut row = Vec::with_capacity(M);
            while row.len() < M {
                let v = rng.random_range(0..N as u32);
                if v as usize != u && !row.contains(&v) {
                    row.push(v);
                }
            }
            row
        })
        .collect();

    let store = MemoryGraphStore::new(vectors.clone(), graph).unwrap();
    let mut frontend = SearchFrontend::new(GraphStore::InMemory(store));
    frontend.preprocess().unwrap();

    bencher.bench_local(move || {
        let query: Vec<f32> = (0..64).map(|_| rng.random::<f32>()).collect();
        divan::black_box(frontend.search_knn(&query, 10, 1, 2, false)).is_ok()
    });
}

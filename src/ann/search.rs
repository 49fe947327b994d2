use crate::ann::{GraphStore, Vertex};
use crate::internals::{distance::l2_distance, error::PianoANNError};
use rand::prelude::*;
use rand_chacha::ChaCha8Rng;
use std::cmp::Ordering;
use std::collections::{BinaryHeap, HashMap};

/// Heap entry ordered so that [`BinaryHeap`] pops the closest vertex first.
struct FrontierEntry {
    dist: f32,
    vertex: Vertex,
}

impl PartialEq for FrontierEntry {
    fn eq(&self, other: &Self) -> bool {
        self.dist.total_cmp(&other.dist) == Ordering::Equal
    }
}
impl Eq for FrontierEntry {}
impl PartialOrd for FrontierEntry {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}
impl Ord for FrontierEntry {
    fn cmp(&self, other: &Self) -> Ordering {
        // reversed: smallest distance on top
        other.dist.total_cmp(&self.dist)
    }
}

/// Beam-search walker over a [`GraphStore`].
///
/// Each round pops the `parallel` most promising frontier vertices, fetches all
/// their neighbors through the store in one batch and folds the answers back
/// into the frontier. With a PIR-backed store the per-round access pattern the
/// server sees is a fixed-size batch of indices regardless of where the walk
/// actually is; an empty frontier is papered over with uniformly random ids so
/// even a stalled walk stays indistinguishable.
pub struct SearchFrontend {
    store: GraphStore,
    start_vertices: Vec<Vertex>,
    rng: ChaCha8Rng,
}

impl SearchFrontend {
    pub fn new(store: GraphStore) -> SearchFrontend {
        SearchFrontend::with_rng(store, ChaCha8Rng::from_os_rng())
    }

    pub fn with_rng(store: GraphStore, rng: ChaCha8Rng) -> SearchFrontend {
        SearchFrontend {
            store,
            start_vertices: Vec::new(),
            rng,
        }
    }

    /// Prepares the store (for a PIR-backed store this runs the full offline
    /// phase) and pins the public seed set.
    pub fn preprocess(&mut self) -> Result<(), PianoANNError> {
        self.store.preprocess()?;
        self.start_vertices = self.store.start_vertices()?;
        Ok(())
    }

    /// Walks the graph for `max_step` rounds and returns the `k` closest
    /// discovered ids plus the round each was first reached, both padded with
    /// `-1` when fewer than `k` vertices were discovered.
    ///
    /// `benchmarking` suppresses seeding and result handling and issues purely
    /// random batches, measuring store throughput under worst-case access.
    pub fn search_knn(
        &mut self,
        query: &[f32],
        k: usize,
        max_step: usize,
        parallel: usize,
        benchmarking: bool,
    ) -> Result<(Vec<i64>, Vec<i64>), PianoANNError> {
        let meta = self.store.metadata();

        let mut reach_step: HashMap<usize, usize> = HashMap::new();
        let mut known: HashMap<usize, Vertex> = HashMap::new();
        let mut frontier: BinaryHeap<FrontierEntry> = BinaryHeap::new();

        if !benchmarking {
            let mut seeds: Vec<FrontierEntry> = self
                .start_vertices
                .iter()
                .map(|v| FrontierEntry {
                    dist: l2_distance(&v.vector, query),
                    vertex: v.clone(),
                })
                .collect();
            seeds.sort_by(|a, b| a.dist.total_cmp(&b.dist));

            for seed in seeds {
                if frontier.len() >= parallel {
                    break;
                }
                if known.contains_key(&seed.vertex.id) {
                    continue;
                }
                known.insert(seed.vertex.id, seed.vertex.clone());
                reach_step.insert(seed.vertex.id, 0);
                frontier.push(seed);
            }
        }

        for step in 0..max_step {
            let mut batch: Vec<usize> = Vec::with_capacity(parallel * meta.m);
            for _ in 0..parallel {
                match frontier.pop() {
                    Some(entry) if !benchmarking => {
                        batch.extend(entry.vertex.neighbors.iter().map(|&v| v as usize));
                    }
                    _ => {
                        // keep the batch shape (and the access pattern) steady
                        batch.extend((0..meta.m).map(|_| self.rng.random_range(0..meta.n)));
                    }
                }
            }

            let fetched = self.store.vertex_info(&batch)?;
            if benchmarking {
                continue;
            }

            for vertex in fetched {
                if known.contains_key(&vertex.id) {
                    continue;
                }
                // an all-zero neighbor row is the store's failure sentinel
                if vertex.neighbors.iter().all(|&v| v == 0) {
                    continue;
                }
                let dist = l2_distance(&vertex.vector, query);
                known.insert(vertex.id, vertex.clone());
                reach_step.insert(vertex.id, step);
                frontier.push(FrontierEntry { dist, vertex });
            }
        }

        let mut ranked: Vec<(usize, f32)> = known
            .values()
            .map(|v| (v.id, l2_distance(&v.vector, query)))
            .collect();
        ranked.sort_by(|a, b| a.1.total_cmp(&b.1));

        let mut ids = vec![-1i64; k];
        let mut steps = vec![-1i64; k];
        for (slot, &(id, _)) in ranked.iter().take(k).enumerate() {
            ids[slot] = id as i64;
            steps[slot] = reach_step[&id] as i64;
        }

        Ok((ids, steps))
    }

    /// Runs [`SearchFrontend::search_knn`] over a batch of query vectors.
    pub fn search_knn_batch(
        &mut self,
        queries: &[Vec<f32>],
        k: usize,
        max_step: usize,
        parallel: usize,
        benchmarking: bool,
    ) -> Result<(Vec<Vec<i64>>, Vec<Vec<i64>>), PianoANNError> {
        let mut ids = Vec::with_capacity(queries.len());
        let mut steps = Vec::with_capacity(queries.len());
        for query in queries {
            let (row_ids, row_steps) = self.search_knn(query, k, max_step, parallel, benchmarking)?;
            ids.push(row_ids);
            steps.push(row_steps);
        }
        Ok((ids, steps))
    }

    #[inline]
    pub fn store(&self) -> &GraphStore {
        &self.store
    }

    #[inline]
    pub fn store_mut(&mut self) -> &mut GraphStore {
        &mut self.store
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::ann::MemoryGraphStore;
    use crate::internals::distance::l2_distance;

    fn grid_world(n: usize, m: usize, rng: &mut ChaCha8Rng) -> (Vec<Vec<f32>>, Vec<Vec<u32>>) {
        let vectors: Vec<Vec<f32>> = (0..n).map(|_| (0..8).map(|_| rng.random::<f32>()).collect()).collect();

        // exact m-NN graph; small enough to scan
        let graph: Vec<Vec<u32>> = (0..n)
            .map(|u| {
                let mut order: Vec<(u32, f32)> = (0..n)
                    .filter(|&v| v != u)
                    .map(|v| (v as u32, l2_distance(&vectors[u], &vectors[v])))
                    .collect();
                order.sort_by(|a, b| a.1.total_cmp(&b.1));
                order.into_iter().take(m).map(|(v, _)| v).collect()
            })
            .collect();

        (vectors, graph)
    }

    #[test]
    fn finds_the_queried_vertex_itself() {
        let mut rng = ChaCha8Rng::seed_from_u64(41);
        let (vectors, graph) = grid_world(600, 8, &mut rng);

        let store = MemoryGraphStore::new(vectors.clone(), graph).unwrap();
        let mut frontend = SearchFrontend::with_rng(GraphStore::InMemory(store), ChaCha8Rng::seed_from_u64(42));
        frontend.preprocess().unwrap();

        let mut hits = 0;
        for target in [3usize, 99, 410, 555] {
            let (ids, steps) = frontend.search_knn(&vectors[target], 5, 15, 2, false).unwrap();
            assert_eq!(ids.len(), 5);
            assert_eq!(steps.len(), 5);
            if ids[0] == target as i64 {
                hits += 1;
            }
        }
        assert!(hits >= 3, "self-query hit only {} of 4 targets", hits);
    }

    #[test]
    fn pads_with_minus_one_when_world_is_tiny() {
        let mut rng = ChaCha8Rng::seed_from_u64(43);
        let (vectors, graph) = grid_world(5, 2, &mut rng);

        let store = MemoryGraphStore::new(vectors.clone(), graph).unwrap();
        let mut frontend = SearchFrontend::with_rng(GraphStore::InMemory(store), ChaCha8Rng::seed_from_u64(44));
        frontend.preprocess().unwrap();

        let (ids, steps) = frontend.search_knn(&vectors[0], 10, 3, 2, false).unwrap();
        assert!(ids.contains(&-1));
        assert_eq!(ids.iter().filter(|&&id| id == -1).count(), steps.iter().filter(|&&s| s == -1).count());
    }

    #[test]
    fn benchmarking_mode_reports_nothing() {
        let mut rng = ChaCha8Rng::seed_from_u64(47);
        let (vectors, graph) = grid_world(100, 4, &mut rng);

        let store = MemoryGraphStore::new(vectors.clone(), graph).unwrap();
        let mut frontend = SearchFrontend::with_rng(GraphStore::InMemory(store), ChaCha8Rng::seed_from_u64(48));
        frontend.preprocess().unwrap();

        let (ids, _) = frontend.search_knn(&vectors[0], 3, 4, 2, true).unwrap();
        assert_eq!(ids, vec![-1, -1, -1]);
    }
}

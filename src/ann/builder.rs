use crate::ann::search::SearchFrontend;
use crate::ann::{GraphStore, MemoryGraphStore};
use crate::internals::{branch_opt, distance::l2_distance, error::PianoANNError};
use rand::prelude::*;
use rand_chacha::ChaCha8Rng;
use rayon::prelude::*;

/// Diversity factor of the prune rule; the DiskANN-style sweet spot.
const ALPHA: f32 = 1.2;

/// Vertex stripes run by independent workers during both build passes.
const STRIPE_COUNT: usize = 16;

/// Black-box nearest-neighbor oracle consulted during candidate generation,
/// typically an HNSW or NGT index built out-of-band. Results may be noisy or
/// partial; ids at or beyond the vector count and the query vertex itself are
/// dropped by the builder.
pub trait NeighborOracle: Sync {
    fn knn(&self, v: &[f32], k: usize) -> Vec<u32>;
}

/// Cuts a candidate list down to at most `m` diverse neighbors of `u`.
///
/// Candidates are visited in ascending distance from `u`. The nearest is always
/// taken; a later candidate `c` survives only if no already-accepted `p` has
/// `alpha * l2(p, c) < l2(u, c)`. If the diversity test leaves fewer than `m`,
/// the discard pile tops the list back up in distance order. The returned ids
/// keep accept order, so distances to `u` are non-decreasing.
pub fn robust_prune(vectors: &[Vec<f32>], u: usize, candidates: Vec<u32>, m: usize, alpha: f32) -> Vec<u32> {
    if candidates.len() <= m {
        return candidates;
    }

    let mut dist2u: Vec<(u32, f32)> = candidates
        .into_iter()
        .map(|c| (c, l2_distance(&vectors[u], &vectors[c as usize])))
        .collect();
    dist2u.sort_by(|a, b| a.1.total_cmp(&b.1));

    let mut accept: Vec<(u32, f32)> = Vec::with_capacity(m);
    let mut discarded: Vec<(u32, f32)> = Vec::new();

    for &(c, dist_uc) in &dist2u {
        let diverse = accept
            .iter()
            .all(|&(p, _)| l2_distance(&vectors[p as usize], &vectors[c as usize]) * alpha >= dist_uc);
        if diverse {
            accept.push((c, dist_uc));
            if accept.len() == m {
                break;
            }
        } else {
            discarded.push((c, dist_uc));
        }
    }

    if accept.len() < m {
        for &(c, dist_uc) in &discarded {
            accept.push((c, dist_uc));
            if accept.len() == m {
                break;
            }
        }
    }

    accept.into_iter().map(|(c, _)| c).collect()
}

/// Builds a bounded-degree proximity graph over `vectors` with out-degree `m`.
///
/// Two passes, both striped over vertices:
///
/// 1. candidate generation — each vertex asks the oracle for ~1.5m neighbors
///    and prunes them to at most m;
/// 2. degree rebalance — out- and in-edges are merged, each edge `(u, v)`
///    survives with probability `min(1.5m / indeg(v), 1)`, survivors are pruned
///    back to m, and short rows are topped up with random distinct vertices.
///
/// Stripe `t` derives its PRNG from `seed` and its start index, so identical
/// inputs reproduce the identical graph regardless of scheduling.
pub fn build_graph(
    vectors: &[Vec<f32>],
    m: usize,
    oracle: &dyn NeighborOracle,
    seed: u64,
) -> Result<Vec<Vec<u32>>, PianoANNError> {
    let n = vectors.len();
    if branch_opt::unlikely(n == 0) {
        return Err(PianoANNError::VectorSetEmpty);
    }
    if branch_opt::unlikely(m + 1 > n) {
        return Err(PianoANNError::DegreeTooLargeForVectorSet { degree: m, vector_count: n });
    }

    let candidate_num = (m as f32 * 1.5) as usize;
    let per_stripe = n.div_ceil(STRIPE_COUNT);

    // pass 1: oracle candidates, pruned per vertex
    let mut graph: Vec<Vec<u32>> = vec![Vec::new(); n];
    graph.par_chunks_mut(per_stripe).enumerate().for_each(|(stripe, rows)| {
        let base = stripe * per_stripe;
        for (row_idx, row) in rows.iter_mut().enumerate() {
            let u = base + row_idx;
            let candidates: Vec<u32> = oracle
                .knn(&vectors[u], candidate_num)
                .into_iter()
                .filter(|&v| v as usize != u && (v as usize) < n)
                .collect();
            *row = robust_prune(vectors, u, candidates, m, ALPHA);
        }
    });
    tracing::info!(n, m, "candidate pass done");

    // pass 2: symmetrize, then thin the high in-degree vertices
    let mut bi_graph: Vec<Vec<u32>> = vec![Vec::new(); n];
    for u in 0..n {
        for &v in &graph[u] {
            bi_graph[u].push(v);
            bi_graph[v as usize].push(u as u32);
        }
    }
    let inbounds: Vec<usize> = bi_graph.iter().map(|edges| edges.len()).collect();

    graph.par_chunks_mut(per_stripe).enumerate().for_each(|(stripe, rows)| {
        let base = stripe * per_stripe;
        let mut rng = ChaCha8Rng::seed_from_u64(seed.wrapping_add(base as u64));

        for (row_idx, row) in rows.iter_mut().enumerate() {
            let u = base + row_idx;

            let mut connection: Vec<u32> = bi_graph[u]
                .iter()
                .copied()
                .filter(|&v| {
                    let keep_prob = (1.5 * m as f64 / inbounds[v as usize] as f64).min(1.0);
                    rng.random::<f64>() < keep_prob
                })
                .collect();

            // the merged edge list repeats mutual neighbors; keep first sightings only
            let mut seen = std::collections::HashSet::with_capacity(connection.len());
            connection.retain(|&v| seen.insert(v));

            if connection.len() > m {
                connection = robust_prune(vectors, u, connection, m, ALPHA);
            }

            while connection.len() < m {
                let v = rng.random_range(0..n) as u32;
                if v as usize == u || connection.contains(&v) {
                    continue;
                }
                connection.push(v);
            }

            *row = connection;
        }
    });

    let mut final_inbounds = vec![0usize; n];
    for row in &graph {
        for &v in row {
            final_inbounds[v as usize] += 1;
        }
    }
    let min_inbound = final_inbounds.iter().min().copied().unwrap_or(0);
    let max_inbound = final_inbounds.iter().max().copied().unwrap_or(0);
    tracing::info!(min_inbound, max_inbound, "rebalance pass done");

    Ok(graph)
}

/// Self-query probe over a finished graph: searches for random vertices and
/// reports `(hit_rate, average_steps_to_hit)`. A healthy build finds the
/// queried vertex itself as the top answer almost always, within a few steps.
pub fn evaluate_graph_quality(
    vectors: &[Vec<f32>],
    graph: &[Vec<u32>],
    rng: &mut ChaCha8Rng,
) -> Result<(f64, f64), PianoANNError> {
    let store = MemoryGraphStore::new(vectors.to_vec(), graph.to_vec())?;
    let mut frontend = SearchFrontend::new(GraphStore::InMemory(store));
    frontend.preprocess()?;

    let n = vectors.len();
    let num_queries = 100;
    let mut hit = 0usize;
    let mut total_steps = 0f64;

    for _ in 0..num_queries {
        let target = rng.random_range(0..n);
        let (knn, steps) = frontend.search_knn(&vectors[target], 20, 20, 2, false)?;
        if knn[0] == target as i64 {
            hit += 1;
            total_steps += steps[0] as f64;
        }
    }

    let hit_rate = hit as f64 / num_queries as f64;
    let avg_steps = if hit > 0 { total_steps / hit as f64 } else { 0.0 };
    tracing::info!(hit_rate, avg_steps, "graph quality probe");

    Ok((hit_rate, avg_steps))
}

/// Recall@k of `response` rows against ground-truth rows. A repeated answer
/// within a row counts once; `-1` padding never matches.
pub fn compute_recall(ground_truth: &[Vec<i64>], response: &[Vec<i64>], k: usize) -> f32 {
    let num_queries = response.len().min(ground_truth.len());
    if num_queries == 0 {
        return 0.0;
    }

    let mut recall = 0f32;
    for (gnd, row) in ground_truth.iter().zip(response.iter()).take(num_queries) {
        let mut hit = 0usize;
        for j in 0..k.min(row.len()) {
            if row[..j].contains(&row[j]) {
                continue;
            }
            if gnd[..k.min(gnd.len())].contains(&row[j]) {
                hit += 1;
            }
        }
        recall += hit as f32 / k as f32;
    }

    recall / num_queries as f32
}

/// Index of the vector closest to the coordinate-wise mean of the set.
pub fn find_medoid(vectors: &[Vec<f32>]) -> usize {
    let n = vectors.len();
    let dim = vectors[0].len();

    let mut mean = vec![0f32; dim];
    for v in vectors {
        for (acc, &x) in mean.iter_mut().zip(v.iter()) {
            *acc += x;
        }
    }
    for acc in &mut mean {
        *acc /= n as f32;
    }

    let mut medoid = 0;
    let mut min_dist = f32::MAX;
    for (i, v) in vectors.iter().enumerate() {
        let d = l2_distance(v, &mean);
        if d < min_dist {
            min_dist = d;
            medoid = i;
        }
    }
    medoid
}

#[cfg(test)]
mod test {
    use super::*;

    fn random_vectors(rng: &mut ChaCha8Rng, n: usize, dim: usize) -> Vec<Vec<f32>> {
        (0..n).map(|_| (0..dim).map(|_| rng.random::<f32>()).collect()).collect()
    }

    /// Exhaustive-scan oracle; stands in for the external HNSW/NGT index.
    pub(crate) struct ExactScanOracle<'a> {
        pub vectors: &'a [Vec<f32>],
    }

    impl NeighborOracle for ExactScanOracle<'_> {
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

    #[test]
    fn prune_bounds_output_size() {
        let mut rng = ChaCha8Rng::seed_from_u64(23);
        let vectors = random_vectors(&mut rng, 200, 16);

        for candidate_num in [3usize, 8, 64, 199] {
            let candidates: Vec<u32> = (1..=candidate_num as u32).collect();
            let pruned = robust_prune(&vectors, 0, candidates.clone(), 8, ALPHA);
            assert_eq!(pruned.len(), candidate_num.min(8));

            // pruned ids must come from the candidate list
            assert!(pruned.iter().all(|id| candidates.contains(id)));
        }
    }

    #[test]
    fn prune_keeps_distance_order_when_diverse() {
        let mut rng = ChaCha8Rng::seed_from_u64(29);
        let vectors = random_vectors(&mut rng, 100, 16);

        let candidates: Vec<u32> = (1..100).collect();
        let pruned = robust_prune(&vectors, 0, candidates, 10, ALPHA);

        let dists: Vec<f32> = pruned.iter().map(|&c| l2_distance(&vectors[0], &vectors[c as usize])).collect();
        // the diversity-accepted prefix is non-decreasing; top-ups may break it,
        // so only check the first two, which always come from the accept loop
        assert!(dists[0] <= dists[1]);
    }

    #[test]
    fn built_graph_upholds_structural_invariants() {
        let mut rng = ChaCha8Rng::seed_from_u64(31);
        let n = 500;
        let m = 8;
        let vectors = random_vectors(&mut rng, n, 16);
        let oracle = ExactScanOracle { vectors: &vectors };

        let graph = build_graph(&vectors, m, &oracle, 77).unwrap();

        assert_eq!(graph.len(), n);
        for (u, row) in graph.iter().enumerate() {
            assert_eq!(row.len(), m);
            assert!(row.iter().all(|&v| (v as usize) < n));
            assert!(!row.contains(&(u as u32)));

            let mut dedup = row.clone();
            dedup.sort_unstable();
            dedup.dedup();
            assert_eq!(dedup.len(), m, "vertex {} carries duplicate edges", u);
        }
    }

    #[test]
    fn identical_inputs_reproduce_the_graph() {
        let mut rng = ChaCha8Rng::seed_from_u64(37);
        let vectors = random_vectors(&mut rng, 400, 12);
        let oracle = ExactScanOracle { vectors: &vectors };

        let a = build_graph(&vectors, 6, &oracle, 123).unwrap();
        let b = build_graph(&vectors, 6, &oracle, 123).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn recall_counts_each_answer_once() {
        let gnd = vec![vec![1i64, 2, 3, 4]];
        let full = vec![vec![1i64, 2, 3, 4]];
        let repeated = vec![vec![1i64, 1, 1, 1]];
        let padded = vec![vec![1i64, 2, -1, -1]];

        assert_eq!(compute_recall(&gnd, &full, 4), 1.0);
        assert_eq!(compute_recall(&gnd, &repeated, 4), 0.25);
        assert_eq!(compute_recall(&gnd, &padded, 4), 0.5);
    }

    #[test]
    fn medoid_of_a_cluster_sits_inside_it() {
        let mut vectors = vec![vec![10.0f32; 4]; 9];
        vectors.push(vec![0.0f32; 4]);
        assert!(find_medoid(&vectors) < 9);
    }
}

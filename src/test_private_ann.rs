#![cfg(test)]

use crate::ann::builder::{build_graph, compute_recall, NeighborOracle};
use crate::ann::pir_store::PirGraphStore;
use crate::ann::search::SearchFrontend;
use crate::ann::{GraphStore, MemoryGraphStore};
use crate::internals::distance::l2_distance;
use crate::pir::batch::BatchPianoPir;
use crate::pir::PianoPir;
use crate::PianoANNError;
use rand::prelude::*;
use rand_chacha::ChaCha8Rng;

fn random_raw_db(rng: &mut ChaCha8Rng, db_size: usize, entry_words: usize) -> Vec<u64> {
    (0..db_size * entry_words).map(|_| rng.random()).collect()
}

fn random_vectors(rng: &mut ChaCha8Rng, n: usize, dim: usize) -> Vec<Vec<f32>> {
    (0..n).map(|_| (0..dim).map(|_| rng.random::<f32>()).collect()).collect()
}

/// Exhaustive-scan stand-in for the external HNSW/NGT candidate oracle.
struct ExactScanOracle<'a> {
    vectors: &'a [Vec<f32>],
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

fn brute_force_knn(vectors: &[Vec<f32>], query: &[f32], k: usize) -> Vec<i64> {
    let mut order: Vec<(usize, f32)> = vectors.iter().enumerate().map(|(i, w)| (i, l2_distance(query, w))).collect();
    order.sort_by(|a, b| a.1.total_cmp(&b.1));
    order.into_iter().take(k).map(|(i, _)| i as i64).collect()
}

#[test]
fn single_partition_serves_every_entry_for_a_full_epoch() {
    const DB_SIZE: usize = 18750;
    const ENTRY_WORDS: usize = 4;

    let mut rng = ChaCha8Rng::seed_from_u64(101);
    let raw_db = random_raw_db(&mut rng, DB_SIZE, ENTRY_WORDS);

    let mut pir = PianoPir::with_rng(DB_SIZE, ENTRY_WORDS * 8, raw_db.clone(), 40, ChaCha8Rng::seed_from_u64(102)).unwrap();
    pir.preprocessing().unwrap();

    let max_query_num = pir.client().max_query_num();
    for _ in 0..max_query_num {
        let idx = rng.random_range(0..DB_SIZE as u64);
        let response = pir.query(idx, true).unwrap();
        assert_eq!(response, raw_db[idx as usize * ENTRY_WORDS..(idx as usize + 1) * ENTRY_WORDS].to_vec());
    }
}

#[test]
fn repeated_index_is_served_from_cache() {
    const DB_SIZE: usize = 4096;
    const ENTRY_WORDS: usize = 4;

    let mut rng = ChaCha8Rng::seed_from_u64(103);
    let raw_db = random_raw_db(&mut rng, DB_SIZE, ENTRY_WORDS);

    let mut pir = PianoPir::with_rng(DB_SIZE, ENTRY_WORDS * 8, raw_db.clone(), 40, ChaCha8Rng::seed_from_u64(104)).unwrap();
    pir.preprocessing().unwrap();

    let first = pir.query(1234, true).unwrap();
    let spent = pir.client().finished_query_num();

    let second = pir.query(1234, true).unwrap();
    assert_eq!(first, second);
    // the cache answers locally, no budget is consumed and no round-trip happens
    assert_eq!(pir.client().finished_query_num(), spent);
}

#[test]
fn refreshed_hint_parity_stays_consistent() {
    const DB_SIZE: usize = 4096;
    const ENTRY_WORDS: usize = 4;

    let mut rng = ChaCha8Rng::seed_from_u64(105);
    let raw_db = random_raw_db(&mut rng, DB_SIZE, ENTRY_WORDS);

    let mut pir = PianoPir::with_rng(DB_SIZE, ENTRY_WORDS * 8, raw_db.clone(), 40, ChaCha8Rng::seed_from_u64(106)).unwrap();
    pir.preprocessing().unwrap();

    for idx in [17u64, 930, 4000] {
        let _ = pir.query(idx, true).unwrap();

        let client = pir.client();
        let params = client.params().clone();
        let hint = client.last_refreshed_hint_for(idx).expect("served hint must be programmed");
        let (tag, program_point) = client.hint_state(hint);
        assert_eq!(program_point, idx);

        // recompute the set parity from the raw database: the pseudorandom member
        // per chunk, except the programmed chunk contributes the served entry
        let offset_mask = (params.chunk_size - 1) as u64;
        let mut expected = vec![0u64; ENTRY_WORDS];
        for chunk in 0..params.set_size as u64 {
            let member = if chunk == idx / params.chunk_size as u64 {
                idx
            } else {
                chunk * params.chunk_size as u64 + (client.prf().eval(tag, chunk) & offset_mask)
            };
            if member >= DB_SIZE as u64 {
                continue;
            }
            let member = member as usize;
            for w in 0..ENTRY_WORDS {
                expected[w] ^= raw_db[member * ENTRY_WORDS + w];
            }
        }

        assert_eq!(client.parity_of_hint(hint), expected.as_slice());
    }
}

#[test]
fn batch_pir_under_and_over_subscription() {
    const DB_SIZE: usize = 1_000_000;
    const ENTRY_WORDS: usize = 16;
    const BATCH_SIZE: usize = 32;

    // entry i holds the value i in every word, which makes mismatches obvious
    let mut raw_db = vec![0u64; DB_SIZE * ENTRY_WORDS];
    for i in 0..DB_SIZE {
        raw_db[i * ENTRY_WORDS..(i + 1) * ENTRY_WORDS].fill(i as u64);
    }

    let mut pir = BatchPianoPir::new(DB_SIZE, ENTRY_WORDS * 8, BATCH_SIZE, raw_db, 20).unwrap();
    pir.preprocessing().unwrap();

    let params = pir.params().clone();
    let mut rng = ChaCha8Rng::seed_from_u64(107);

    // one query per partition below the quota: everything must come back exact
    let mut batch: Vec<u64> = Vec::new();
    for partition in 0..params.partition_num {
        let start = (partition * params.partition_size) as u64;
        let end = (((partition + 1) * params.partition_size).min(DB_SIZE)) as u64;
        for _ in 0..params.queries_per_partition - 1 {
            batch.push(start + rng.random_range(0..end - start));
        }
    }
    let responses = pir.query(&batch).unwrap();
    assert_eq!(responses.len(), batch.len());
    for (idx, response) in batch.iter().zip(responses.iter()) {
        assert_eq!(response, &vec![*idx; ENTRY_WORDS]);
    }

    // four per partition, still within the per-batch arithmetic: exact again
    let mut batch: Vec<u64> = Vec::new();
    for partition in 0..params.partition_num {
        let start = (partition * params.partition_size) as u64;
        let end = (((partition + 1) * params.partition_size).min(DB_SIZE)) as u64;
        for _ in 0..4 {
            batch.push(start + rng.random_range(0..end - start));
        }
    }
    let responses = pir.query(&batch).unwrap();
    for (idx, response) in batch.iter().zip(responses.iter()) {
        assert_eq!(response, &vec![*idx; ENTRY_WORDS]);
    }

    // everything aimed at partition 0: only its quota survives, the rest zero out
    let mut seen = std::collections::HashSet::new();
    let mut batch: Vec<u64> = Vec::new();
    while batch.len() < BATCH_SIZE {
        let idx = rng.random_range(0..params.partition_size as u64);
        if seen.insert(idx) {
            batch.push(idx);
        }
    }
    let responses = pir.query(&batch).unwrap();
    for (slot, (idx, response)) in batch.iter().zip(responses.iter()).enumerate() {
        if slot < params.queries_per_partition {
            assert_eq!(response, &vec![*idx; ENTRY_WORDS]);
        } else {
            assert_eq!(response, &vec![0u64; ENTRY_WORDS]);
        }
    }
}

#[test]
fn dummy_preprocessing_returns_zero_entries() {
    const DB_SIZE: usize = 10_000;
    const ENTRY_WORDS: usize = 4;

    let mut rng = ChaCha8Rng::seed_from_u64(109);
    let raw_db = random_raw_db(&mut rng, DB_SIZE, ENTRY_WORDS);

    let mut pir = BatchPianoPir::new(DB_SIZE, ENTRY_WORDS * 8, 8, raw_db, 8).unwrap();
    pir.dummy_preprocessing();

    let batch: Vec<u64> = (0..8).map(|_| rng.random_range(0..DB_SIZE as u64)).collect();
    let responses = pir.query(&batch).unwrap();
    assert!(responses.iter().all(|r| r.iter().all(|&w| w == 0)));
}

#[test]
fn construction_rejects_a_short_raw_db() {
    let raw_db = vec![0u64; 100];
    let outcome = PianoPir::new(1024, 32, raw_db, 20);
    assert!(matches!(outcome, Err(PianoANNError::RawDBSizeMismatch { got: 100, expected: 4096 })));
}

#[test]
fn transparent_epoch_rollovers_preserve_correctness() {
    const DB_SIZE: usize = 3000;
    const ENTRY_WORDS: usize = 4;

    let mut rng = ChaCha8Rng::seed_from_u64(111);
    let raw_db = random_raw_db(&mut rng, DB_SIZE, ENTRY_WORDS);

    // failure_prob_log2 = 8 keeps the epoch short, forcing several rollovers
    let mut pir = PianoPir::with_rng(DB_SIZE, ENTRY_WORDS * 8, raw_db.clone(), 8, ChaCha8Rng::seed_from_u64(112)).unwrap();
    pir.preprocessing().unwrap();

    let max_query_num = pir.client().max_query_num();
    let mut rollovers = 0usize;
    let mut last_finished = 0usize;
    let mut served = 0usize;

    for _ in 0..3 * max_query_num {
        let idx = rng.random_range(0..DB_SIZE as u64);
        match pir.query(idx, true) {
            Ok(response) => {
                assert_eq!(response, raw_db[idx as usize * ENTRY_WORDS..(idx as usize + 1) * ENTRY_WORDS].to_vec());
                served += 1;
            }
            // the occasional hint miss is within contract at this failure budget
            Err(PianoANNError::NoUsableHint) | Err(PianoANNError::ChunkBudgetExhausted(_)) => {}
            Err(err) => panic!("unexpected query failure: {}", err),
        }

        let finished = pir.client().finished_query_num();
        if finished < last_finished {
            rollovers += 1;
        }
        last_finished = finished;
    }

    assert!(rollovers >= 2, "expected at least two epoch rollovers, saw {}", rollovers);
    assert!(served > 2 * max_query_num);
}

#[test]
fn private_search_recall_on_synthetic_vectors() {
    const N: usize = 2000;
    const DIM: usize = 24;
    const M: usize = 8;
    const K: usize = 10;
    const MAX_STEP: usize = 10;
    const PARALLEL: usize = 2;
    const QUERY_NUM: usize = 20;

    let mut rng = ChaCha8Rng::seed_from_u64(113);
    let vectors = random_vectors(&mut rng, N, DIM);
    let queries = random_vectors(&mut rng, QUERY_NUM, DIM);

    let oracle = ExactScanOracle { vectors: &vectors };
    let graph = build_graph(&vectors, M, &oracle, 2024).unwrap();

    let ground_truth: Vec<Vec<i64>> = queries.iter().map(|q| brute_force_knn(&vectors, q, K)).collect();

    // plaintext walk as the quality baseline
    let store = MemoryGraphStore::new(vectors.clone(), graph.clone()).unwrap();
    let mut baseline = SearchFrontend::with_rng(GraphStore::InMemory(store), ChaCha8Rng::seed_from_u64(114));
    baseline.preprocess().unwrap();
    let (baseline_ids, _) = baseline.search_knn_batch(&queries, K, MAX_STEP, PARALLEL, false).unwrap();
    let baseline_recall = compute_recall(&ground_truth, &baseline_ids, K);

    // the same walk with every vertex fetch going through the batch PIR
    let store = PirGraphStore::new(vectors.clone(), graph, false, false).unwrap();
    let mut private = SearchFrontend::with_rng(GraphStore::PirBacked(store), ChaCha8Rng::seed_from_u64(115));
    private.preprocess().unwrap();
    let (private_ids, private_steps) = private.search_knn_batch(&queries, K, MAX_STEP, PARALLEL, false).unwrap();
    let private_recall = compute_recall(&ground_truth, &private_ids, K);

    assert!(baseline_recall > 0.3, "baseline recall {} is no better than random", baseline_recall);
    assert!(private_recall > 0.3, "private recall {} is no better than random", private_recall);

    // each reported neighbor carries the round it was first reached
    for (ids, steps) in private_ids.iter().zip(private_steps.iter()) {
        for (id, step) in ids.iter().zip(steps.iter()) {
            assert_eq!(*id == -1, *step == -1);
            assert!(*step < MAX_STEP as i64);
        }
    }

    if let GraphStore::PirBacked(store) = private.store() {
        assert!(store.total_query_num() > 0);
        assert!(store.success_rate() > 0.5, "fetch success rate {} is implausibly low", store.success_rate());
    }
}

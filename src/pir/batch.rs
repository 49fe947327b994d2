use crate::internals::{branch_opt, error::PianoANNError};
use crate::pir::PianoPir;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::Instant;

/// Marks a padded slot in a partition bucket; never a legal database index here.
const PADDING_SENTINEL: u64 = 0xdead_beef;

/// How many queries of a batch one partition is sized to absorb on average.
pub const DEFAULT_QUERIES_PER_PARTITION: usize = 2;

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct BatchParams {
    pub db_size: usize,
    pub entry_bytes: usize,
    pub entry_words: usize,
    pub batch_size: usize,
    /// Single source for the per-partition query budget; also the divisor in
    /// `support_batch_num`.
    pub queries_per_partition: usize,
    pub partition_num: usize,
    pub partition_size: usize,
    pub failure_prob_log2: u32,
}

/// Cost figures recorded after each preprocessing run.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct BatchStats {
    pub local_storage_bytes: usize,
    pub online_comm_bytes_per_batch: usize,
    pub offline_comm_bytes_per_batch: usize,
    /// Batches one epoch supports before preprocessing must run again.
    pub support_batch_num: usize,
    pub preprocessing_seconds: f64,
}

impl BatchStats {
    pub fn to_bytes(&self) -> Result<Vec<u8>, PianoANNError> {
        bincode::serialize(&self).map_err(|err| PianoANNError::FailedToSerializeStats(err.to_string()))
    }
}

/// Database-partitioning batch wrapper.
///
/// The database is cut into `batch_size / queries_per_partition` partitions,
/// each served by its own single-partition Piano instance. A batch of indices
/// is bucketed by partition; every partition answers exactly
/// `batch_len / partition_num` sub-queries per batch, padded with dummy queries
/// where a bucket runs short, so the server-visible traffic is independent of
/// where the batch actually landed. Oversubscribed buckets lose their surplus
/// (those outputs come back zero), which the search layer treats as skippable.
pub struct BatchPianoPir {
    params: BatchParams,
    sub_pirs: Vec<PianoPir>,

    finished_batch_num: usize,
    queries_made_in_partition: usize,
    stats: BatchStats,
}

impl BatchPianoPir {
    pub fn new(
        db_size: usize,
        entry_bytes: usize,
        batch_size: usize,
        raw_db: Vec<u64>,
        failure_prob_log2: u32,
    ) -> Result<BatchPianoPir, PianoANNError> {
        BatchPianoPir::with_queries_per_partition(db_size, entry_bytes, batch_size, raw_db, failure_prob_log2, DEFAULT_QUERIES_PER_PARTITION)
    }

    pub fn with_queries_per_partition(
        db_size: usize,
        entry_bytes: usize,
        batch_size: usize,
        mut raw_db: Vec<u64>,
        failure_prob_log2: u32,
        queries_per_partition: usize,
    ) -> Result<BatchPianoPir, PianoANNError> {
        if branch_opt::unlikely(batch_size == 0 || queries_per_partition == 0 || batch_size % queries_per_partition != 0) {
            return Err(PianoANNError::BatchSizeNotPartitionable { batch_size, queries_per_partition });
        }

        let entry_words = entry_bytes / 8;
        if branch_opt::unlikely(raw_db.len() != db_size * entry_words) {
            return Err(PianoANNError::RawDBSizeMismatch {
                got: raw_db.len(),
                expected: db_size * entry_words,
            });
        }

        let partition_num = batch_size / queries_per_partition;
        let partition_size = db_size.div_ceil(partition_num);

        let params = BatchParams {
            db_size,
            entry_bytes,
            entry_words,
            batch_size,
            queries_per_partition,
            partition_num,
            partition_size,
            failure_prob_log2,
        };

        // hand each partition ownership of its slice of the raw database
        let mut sub_pirs = Vec::with_capacity(partition_num);
        for i in 0..partition_num {
            let start = i * partition_size;
            let end = ((i + 1) * partition_size).min(db_size);
            let tail = raw_db.split_off((end - start) * entry_words);
            let partition_db = std::mem::replace(&mut raw_db, tail);
            sub_pirs.push(PianoPir::new(end - start, entry_bytes, partition_db, failure_prob_log2)?);
        }

        Ok(BatchPianoPir {
            params,
            sub_pirs,
            finished_batch_num: 0,
            queries_made_in_partition: 0,
            stats: BatchStats::default(),
        })
    }

    /// Preprocesses every partition. Partitions are independent, so they run
    /// in parallel; the call returns once the slowest one is done.
    pub fn preprocessing(&mut self) -> Result<(), PianoANNError> {
        self.finished_batch_num = 0;
        self.queries_made_in_partition = 0;

        let started = Instant::now();
        self.sub_pirs.par_iter_mut().try_for_each(|pir| pir.preprocessing())?;
        let elapsed = started.elapsed().as_secs_f64();

        tracing::info!(partitions = self.params.partition_num, elapsed_s = elapsed, "batch preprocessing done");
        self.record_stats(elapsed);
        Ok(())
    }

    /// Benchmarking-only: all partitions skip the database fold.
    pub fn dummy_preprocessing(&mut self) {
        self.finished_batch_num = 0;
        self.queries_made_in_partition = 0;
        for pir in &mut self.sub_pirs {
            pir.dummy_preprocessing();
        }
        self.record_stats(0.0);
    }

    fn record_stats(&mut self, preprocessing_seconds: f64) {
        let support_batch_num = self.sub_pirs[0].client().max_query_num() / self.params.queries_per_partition;
        let db_bytes = self.params.db_size * self.params.entry_bytes;

        self.stats = BatchStats {
            local_storage_bytes: self.sub_pirs.iter().map(|p| p.local_storage_bytes()).sum(),
            online_comm_bytes_per_batch: self
                .sub_pirs
                .iter()
                .map(|p| p.comm_cost_per_query() * self.params.queries_per_partition)
                .sum(),
            offline_comm_bytes_per_batch: db_bytes / support_batch_num.max(1),
            support_batch_num,
            preprocessing_seconds,
        };
    }

    /// Serves one batch of absolute indices; the output row `i` answers
    /// `indices[i]`.
    ///
    /// Indices whose partition bucket overflows the per-batch budget come back
    /// as the all-zero entry, as do sub-queries that lost their hint-table
    /// coin flip. When any partition nears its epoch budget, all partitions
    /// are re-preprocessed before the next batch.
    pub fn query(&mut self, indices: &[u64]) -> Result<Vec<Vec<u64>>, PianoANNError> {
        let p = &self.params;
        let query_num_to_make = indices.len() / p.partition_num;

        let mut buckets: Vec<Vec<u64>> = vec![Vec::new(); p.partition_num];
        for &idx in indices {
            if branch_opt::unlikely(idx >= p.db_size as u64) {
                return Err(PianoANNError::IndexOutOfRange(idx));
            }
            buckets[(idx / p.partition_size as u64) as usize].push(idx);
        }

        let mut responses: HashMap<u64, Vec<u64>> = HashMap::with_capacity(indices.len());

        for (partition, bucket) in buckets.iter_mut().enumerate() {
            if bucket.len() < query_num_to_make {
                bucket.resize(query_num_to_make, PADDING_SENTINEL);
            }

            let base = (partition * p.partition_size) as u64;
            for &idx in bucket.iter().take(query_num_to_make) {
                if idx == PADDING_SENTINEL {
                    let _ = self.sub_pirs[partition].query(0, false)?;
                } else {
                    let response = match self.sub_pirs[partition].query(idx - base, true) {
                        Ok(response) => response,
                        // a per-query miss degrades this one answer to zeros
                        Err(PianoANNError::NoUsableHint)
                        | Err(PianoANNError::ChunkBudgetExhausted(_))
                        | Err(PianoANNError::QueryBudgetExhausted) => vec![0u64; p.entry_words],
                        Err(err) => return Err(err),
                    };
                    responses.insert(idx, response);
                }
            }
        }

        let output = indices
            .iter()
            .map(|idx| responses.get(idx).cloned().unwrap_or_else(|| vec![0u64; p.entry_words]))
            .collect();

        // roll the epoch over two queries early so no partition ever faults mid-batch
        let budget = self.sub_pirs[0].client().max_query_num().saturating_sub(2);
        if self.sub_pirs.iter().any(|pir| pir.client().finished_query_num() >= budget)
            || self.queries_made_in_partition + query_num_to_make >= budget
        {
            tracing::info!(batches = self.finished_batch_num, "partition budget nearly spent, re-running preprocessing");
            self.preprocessing()?;
        } else {
            self.finished_batch_num += indices.len() / p.batch_size;
            self.queries_made_in_partition += query_num_to_make;
        }

        Ok(output)
    }

    #[inline]
    pub fn params(&self) -> &BatchParams {
        &self.params
    }

    #[inline]
    pub fn stats(&self) -> &BatchStats {
        &self.stats
    }

    #[inline]
    pub fn finished_batch_num(&self) -> usize {
        self.finished_batch_num
    }

    #[inline]
    pub fn support_batch_num(&self) -> usize {
        self.stats.support_batch_num
    }

    pub fn local_storage_bytes(&self) -> usize {
        self.sub_pirs.iter().map(|p| p.local_storage_bytes()).sum()
    }
}

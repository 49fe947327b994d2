use crate::internals::{
    branch_opt,
    error::PianoANNError,
    params::{PianoParams, UNSET_PROGRAM_POINT},
    prf::HintPrf,
    xor,
};
use crate::pir::server::PianoServer;
use rand::prelude::*;
use rand_chacha::ChaCha8Rng;
use rayon::prelude::*;
use std::collections::HashMap;

/// Stateful Piano client: owns every hint table and the epoch master key.
///
/// A primary hint is a keyed pseudorandom set (one member per chunk) together
/// with the xor of its database entries. Answering a query consumes one primary
/// hint and one replacement slot of the queried chunk, then repairs the hint in
/// place from a backup parity that was precomputed with the queried chunk left
/// out.
pub struct PianoClient {
    params: PianoParams,
    skip_prep: bool,

    rng: ChaCha8Rng,
    prf: HintPrf,

    finished_query_num: usize,
    query_histogram: Vec<usize>,

    // primary hint table, parities flattened at entry_words stride
    primary_short_tag: Vec<u64>,
    primary_parity: Vec<u64>,
    primary_program_point: Vec<u64>,

    // one replacement group and one backup group per chunk
    replacement_idx: Vec<Vec<u64>>,
    replacement_val: Vec<Vec<u64>>,
    backup_short_tag: Vec<Vec<u64>>,
    backup_parity: Vec<Vec<u64>>,

    local_cache: HashMap<u64, Vec<u64>>,
}

impl PianoClient {
    pub fn new(params: PianoParams) -> Result<PianoClient, PianoANNError> {
        PianoClient::with_rng(params, ChaCha8Rng::from_os_rng())
    }

    /// Seedable constructor; tests pin the RNG to make failure cases replayable.
    pub fn with_rng(params: PianoParams, mut rng: ChaCha8Rng) -> Result<PianoClient, PianoANNError> {
        let prf = HintPrf::from_rng(&mut rng);

        let mut client = PianoClient {
            params,
            skip_prep: false,
            rng,
            prf,
            finished_query_num: 0,
            query_histogram: Vec::new(),
            primary_short_tag: Vec::new(),
            primary_parity: Vec::new(),
            primary_program_point: Vec::new(),
            replacement_idx: Vec::new(),
            replacement_val: Vec::new(),
            backup_short_tag: Vec::new(),
            backup_parity: Vec::new(),
            local_cache: HashMap::new(),
        };
        client.initialization();

        Ok(client)
    }

    /// Resets the client into a fresh epoch: new master key, zeroed counters
    /// and parities, sequentially assigned short tags, cleared cache.
    pub fn initialization(&mut self) {
        let p = &self.params;

        self.prf = HintPrf::from_rng(&mut self.rng);
        self.finished_query_num = 0;
        self.query_histogram = vec![0; p.set_size];

        let mut short_tag_count = 0u64;

        self.primary_short_tag = (0..p.primary_hint_num as u64).collect();
        short_tag_count += p.primary_hint_num as u64;
        self.primary_parity = vec![0u64; p.primary_hint_num * p.entry_words];
        self.primary_program_point = vec![UNSET_PROGRAM_POINT; p.primary_hint_num];

        self.replacement_idx = vec![vec![UNSET_PROGRAM_POINT; p.max_query_per_chunk]; p.set_size];
        self.replacement_val = vec![vec![0u64; p.max_query_per_chunk * p.entry_words]; p.set_size];
        self.backup_parity = vec![vec![0u64; p.max_query_per_chunk * p.entry_words]; p.set_size];
        self.backup_short_tag = (0..p.set_size)
            .map(|_| {
                let group: Vec<u64> = (short_tag_count..short_tag_count + p.max_query_per_chunk as u64).collect();
                short_tag_count += p.max_query_per_chunk as u64;
                group
            })
            .collect();

        self.local_cache = HashMap::new();
    }

    /// Runs the offline phase: one linear scan of `raw_db`, folding each chunk
    /// into every primary and backup parity and capturing the replacement
    /// entries for that chunk.
    pub fn preprocessing(&mut self, raw_db: &[u64]) -> Result<(), PianoANNError> {
        self.initialization();
        if self.skip_prep {
            return Ok(());
        }

        if branch_opt::unlikely(raw_db.len() != self.params.raw_db_words()) {
            return Err(PianoANNError::RawDBSizeMismatch {
                got: raw_db.len(),
                expected: self.params.raw_db_words(),
            });
        }

        let chunk_words = self.params.chunk_size * self.params.entry_words;
        for chunk_id in 0..self.params.set_size {
            let start = chunk_id * chunk_words;
            let end = start + chunk_words;
            if end > raw_db.len() {
                // tail chunk: pad the copy with zero entries
                let mut padded = vec![0u64; chunk_words];
                if start < raw_db.len() {
                    padded[..raw_db.len() - start].copy_from_slice(&raw_db[start..]);
                }
                self.fold_chunk(chunk_id, &padded);
            } else {
                self.fold_chunk(chunk_id, &raw_db[start..end]);
            }
        }

        Ok(())
    }

    /// Benchmarking-only path: fresh tables, no fold over the database. Every
    /// subsequent query decodes to the all-zero entry.
    pub fn skip_preprocessing(&mut self) {
        self.initialization();
        self.skip_prep = true;
    }

    /// Folds one chunk of the database into all hint tables.
    ///
    /// Each parity is owned by exactly one rayon work item, so the two loops
    /// below are free of shared mutation.
    fn fold_chunk(&mut self, chunk_id: usize, chunk: &[u64]) {
        let entry_words = self.params.entry_words;
        let offset_mask = (self.params.chunk_size - 1) as u64;
        let prf = &self.prf;

        debug_assert_eq!(chunk.len(), self.params.chunk_size * entry_words);

        let primary_tags = &self.primary_short_tag;
        self.primary_parity
            .par_chunks_mut(entry_words)
            .zip(primary_tags.par_iter())
            .for_each(|(parity, &tag)| {
                let offset = (prf.eval(tag, chunk_id as u64) & offset_mask) as usize;
                xor::xor_into(parity, &chunk[offset * entry_words..(offset + 1) * entry_words]);
            });

        let backup_tags = &self.backup_short_tag;
        self.backup_parity.par_iter_mut().enumerate().for_each(|(group, parities)| {
            // the group for this very chunk keeps its hole
            if group == chunk_id {
                return;
            }
            for (slot, &tag) in backup_tags[group].iter().enumerate() {
                let offset = (prf.eval(tag, chunk_id as u64) & offset_mask) as usize;
                xor::xor_into(
                    &mut parities[slot * entry_words..(slot + 1) * entry_words],
                    &chunk[offset * entry_words..(offset + 1) * entry_words],
                );
            }
        });

        for slot in 0..self.params.max_query_per_chunk {
            let offset = (self.rng.next_u64() & offset_mask) as usize;
            self.replacement_idx[chunk_id][slot] = (offset + chunk_id * self.params.chunk_size) as u64;
            self.replacement_val[chunk_id][slot * entry_words..(slot + 1) * entry_words]
                .copy_from_slice(&chunk[offset * entry_words..(offset + 1) * entry_words]);
        }
    }

    /// Serves one online query against the colocated `server`.
    ///
    /// A dummy query (`real == false`) uploads uniformly random offsets,
    /// discards the reply and returns the zero entry; it exists so that batch
    /// padding is indistinguishable from real traffic.
    pub fn query(&mut self, idx: u64, server: &PianoServer, real: bool) -> Result<Vec<u64>, PianoANNError> {
        let p = &self.params;
        let entry_words = p.entry_words;
        let offset_mask = (p.chunk_size - 1) as u64;

        if !real {
            let offsets: Vec<u32> = (0..p.set_size).map(|_| (self.rng.next_u64() & offset_mask) as u32).collect();
            let _ = server.private_query(&offsets);
            return Ok(vec![0u64; entry_words]);
        }

        if branch_opt::unlikely(idx >= p.db_size as u64) {
            return Err(PianoANNError::IndexOutOfRange(idx));
        }

        if let Some(cached) = self.local_cache.get(&idx) {
            return Ok(cached.clone());
        }

        if branch_opt::unlikely(self.finished_query_num >= p.max_query_num) {
            tracing::warn!(finished = self.finished_query_num, "per-epoch query budget spent");
            return Err(PianoANNError::QueryBudgetExhausted);
        }

        let chunk_id = (idx / p.chunk_size as u64) as usize;
        let offset = idx & offset_mask;

        if branch_opt::unlikely(self.query_histogram[chunk_id] >= p.max_query_per_chunk) {
            tracing::warn!(chunk = chunk_id, "per-chunk query budget spent");
            return Err(PianoANNError::ChunkBudgetExhausted(chunk_id));
        }

        // scan for a primary hint that covers the queried offset and was not
        // already programmed inside this chunk
        let hit = (0..p.primary_hint_num).find(|&h| {
            self.prf.eval(self.primary_short_tag[h], chunk_id as u64) & offset_mask == offset
                && (self.primary_program_point[h] == UNSET_PROGRAM_POINT
                    || self.primary_program_point[h] / p.chunk_size as u64 != chunk_id as u64)
        });
        let Some(hit) = hit else {
            return Err(PianoANNError::NoUsableHint);
        };

        // expand the hint into its full set, honoring a prior program point
        let tag = self.primary_short_tag[hit];
        let mut query_set: Vec<u64> = (0..p.set_size as u64)
            .map(|chunk| chunk * p.chunk_size as u64 + (self.prf.eval(tag, chunk) & offset_mask))
            .collect();
        let program_point = self.primary_program_point[hit];
        if program_point != UNSET_PROGRAM_POINT {
            query_set[(program_point / p.chunk_size as u64) as usize] = program_point;
        }

        // swap the queried chunk's member for the next unconsumed replacement
        let slot = self.query_histogram[chunk_id];
        query_set[chunk_id] = self.replacement_idx[chunk_id][slot];
        let replacement_val = &self.replacement_val[chunk_id][slot * entry_words..(slot + 1) * entry_words];

        let offsets: Vec<u32> = query_set.iter().map(|&member| (member & offset_mask) as u32).collect();
        let mut response = server.private_query(&offsets);

        // peel off the replacement term and the set parity; what remains is the entry
        xor::xor_into(&mut response, replacement_val);
        xor::xor_into(&mut response, &self.primary_parity[hit * entry_words..(hit + 1) * entry_words]);

        // refresh the consumed hint in place from the backup group of this
        // chunk; xoring the response patches the backup parity's hole. The
        // consumed backup slot is never read again this epoch.
        self.primary_short_tag[hit] = self.backup_short_tag[chunk_id][slot];
        let backup = &self.backup_parity[chunk_id][slot * entry_words..(slot + 1) * entry_words];
        let parity = &mut self.primary_parity[hit * entry_words..(hit + 1) * entry_words];
        parity.copy_from_slice(backup);
        xor::xor_into(parity, &response);
        self.primary_program_point[hit] = idx;

        self.finished_query_num += 1;
        self.query_histogram[chunk_id] += 1;
        self.local_cache.insert(idx, response.clone());

        Ok(response)
    }

    /// Client-side storage in bytes: short tags, parities and program points of
    /// the primary table plus the replacement and backup groups.
    pub fn local_storage_bytes(&self) -> usize {
        let p = &self.params;
        let backup_total = p.set_size * p.max_query_per_chunk;

        let mut bytes = 0;
        bytes += p.primary_hint_num * 8; // primary short tags
        bytes += p.primary_hint_num * p.entry_bytes; // primary parities
        bytes += p.primary_hint_num * 8; // program points
        bytes += backup_total * 8; // replacement indices
        bytes += backup_total * p.entry_bytes; // replacement values
        bytes += backup_total * 8; // backup short tags
        bytes += backup_total * p.entry_bytes; // backup parities
        bytes
    }

    #[inline]
    pub fn finished_query_num(&self) -> usize {
        self.finished_query_num
    }

    #[inline]
    pub fn max_query_num(&self) -> usize {
        self.params.max_query_num
    }

    #[inline]
    pub fn params(&self) -> &PianoParams {
        &self.params
    }

    #[cfg(test)]
    pub(crate) fn parity_of_hint(&self, hint: usize) -> &[u64] {
        &self.primary_parity[hint * self.params.entry_words..(hint + 1) * self.params.entry_words]
    }

    #[cfg(test)]
    pub(crate) fn hint_state(&self, hint: usize) -> (u64, u64) {
        (self.primary_short_tag[hint], self.primary_program_point[hint])
    }

    #[cfg(test)]
    pub(crate) fn prf(&self) -> &HintPrf {
        &self.prf
    }

    #[cfg(test)]
    pub(crate) fn last_refreshed_hint_for(&self, idx: u64) -> Option<usize> {
        self.primary_program_point.iter().position(|&pp| pp == idx)
    }
}

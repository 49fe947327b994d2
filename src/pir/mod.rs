pub mod batch;
pub mod client;
pub mod server;

use crate::internals::{error::PianoANNError, params::PianoParams};
use client::PianoClient;
use rand_chacha::ChaCha8Rng;
use server::PianoServer;
use std::time::Instant;

/// One single-partition Piano instance: a client and its colocated server.
///
/// The pairing is a benchmarking convenience, not a protocol requirement; the
/// only data crossing the boundary per online query is the offset upload and
/// the xor-fold download, so the two halves split across a network untouched.
pub struct PianoPir {
    client: PianoClient,
    server: PianoServer,
}

impl PianoPir {
    /// Builds the pair over `raw_db`, deriving all table shapes from `db_size`.
    pub fn new(db_size: usize, entry_bytes: usize, raw_db: Vec<u64>, failure_prob_log2: u32) -> Result<PianoPir, PianoANNError> {
        let params = PianoParams::derive(db_size, entry_bytes, failure_prob_log2)?;
        let client = PianoClient::new(params.clone())?;
        let server = PianoServer::new(params, raw_db)?;
        Ok(PianoPir { client, server })
    }

    /// Same as [`PianoPir::new`] but with a caller-pinned client RNG.
    pub fn with_rng(
        db_size: usize,
        entry_bytes: usize,
        raw_db: Vec<u64>,
        failure_prob_log2: u32,
        rng: ChaCha8Rng,
    ) -> Result<PianoPir, PianoANNError> {
        let params = PianoParams::derive(db_size, entry_bytes, failure_prob_log2)?;
        let client = PianoClient::with_rng(params.clone(), rng)?;
        let server = PianoServer::new(params, raw_db)?;
        Ok(PianoPir { client, server })
    }

    /// Runs the offline phase; must complete before any real query.
    pub fn preprocessing(&mut self) -> Result<(), PianoANNError> {
        let started = Instant::now();
        self.client.preprocessing(self.server.raw_db())?;
        tracing::info!(elapsed = ?started.elapsed(), db_size = self.params().db_size, "piano preprocessing done");
        Ok(())
    }

    /// Benchmarking-only: skips the database fold, so every query decodes to zero.
    pub fn dummy_preprocessing(&mut self) {
        self.client.skip_preprocessing();
    }

    /// One online query. When the epoch budget is spent the instance rolls the
    /// epoch over transparently (full re-preprocessing) before serving.
    pub fn query(&mut self, idx: u64, real: bool) -> Result<Vec<u64>, PianoANNError> {
        if self.client.finished_query_num() == self.client.max_query_num() {
            tracing::info!(max_query_num = self.client.max_query_num(), "epoch exhausted, re-running preprocessing");
            self.client.preprocessing(self.server.raw_db())?;
        }
        self.client.query(idx, &self.server, real)
    }

    /// Plaintext read path for the non-private baseline.
    pub fn non_private_query(&self, idx: u64) -> Result<Vec<u64>, PianoANNError> {
        self.server.non_private_query(idx)
    }

    pub fn local_storage_bytes(&self) -> usize {
        self.client.local_storage_bytes()
    }

    /// Upload plus download bytes of one online query.
    pub fn comm_cost_per_query(&self) -> usize {
        self.params().comm_cost_per_query()
    }

    #[inline]
    pub fn params(&self) -> &PianoParams {
        self.server.params()
    }

    #[inline]
    pub(crate) fn client(&self) -> &PianoClient {
        &self.client
    }
}

use crate::internals::{branch_opt, error::PianoANNError, params::PianoParams, xor};

/// Holder of the raw database; the only party that ever touches it online.
///
/// The server is stateless across queries: it answers each upload of
/// `set_size` chunk-local offsets with the word-wise xor of the selected
/// entries and learns nothing about which of them the client wanted.
pub struct PianoServer {
    params: PianoParams,
    raw_db: Vec<u64>,
}

impl PianoServer {
    /// # Returns
    ///
    /// * `Ok(PianoServer)` - When `raw_db` holds exactly `db_size * entry_words` words.
    /// * `Err(PianoANNError::RawDBSizeMismatch)` - Otherwise.
    pub fn new(params: PianoParams, raw_db: Vec<u64>) -> Result<PianoServer, PianoANNError> {
        if branch_opt::unlikely(raw_db.len() != params.raw_db_words()) {
            return Err(PianoANNError::RawDBSizeMismatch {
                got: raw_db.len(),
                expected: params.raw_db_words(),
            });
        }
        Ok(PianoServer { params, raw_db })
    }

    /// Answers one private query: xor of `raw_db[i * chunk_size + offsets[i]]`
    /// over all chunks `i`. Set elements falling into the padded tail beyond
    /// `db_size` contribute a zero term and are skipped silently.
    pub fn private_query(&self, offsets: &[u32]) -> Vec<u64> {
        debug_assert_eq!(offsets.len(), self.params.set_size);

        let entry_words = self.params.entry_words;
        let mut response = vec![0u64; entry_words];

        for (chunk, &offset) in offsets.iter().enumerate() {
            let idx = chunk * self.params.chunk_size + offset as usize;
            if idx >= self.params.db_size {
                continue;
            }
            xor::xor_into(&mut response, &self.raw_db[idx * entry_words..(idx + 1) * entry_words]);
        }

        response
    }

    /// Direct (non-private) read, used by the plaintext baseline mode.
    ///
    /// Reads into the padded tail return the all-zero entry; reads beyond the
    /// padded range are a caller bug and fail.
    pub fn non_private_query(&self, idx: u64) -> Result<Vec<u64>, PianoANNError> {
        let entry_words = self.params.entry_words;
        let idx = idx as usize;

        if branch_opt::unlikely(idx >= self.params.db_size) {
            if idx < self.params.chunk_size * self.params.set_size {
                return Ok(vec![0u64; entry_words]);
            }
            return Err(PianoANNError::IndexOutOfRange(idx as u64));
        }

        Ok(self.raw_db[idx * entry_words..(idx + 1) * entry_words].to_vec())
    }

    #[inline]
    pub(crate) fn raw_db(&self) -> &[u64] {
        &self.raw_db
    }

    #[inline]
    pub fn params(&self) -> &PianoParams {
        &self.params
    }
}

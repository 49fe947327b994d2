use crate::internals::{branch_opt, error::PianoANNError};
use serde::{Deserialize, Serialize};

/// Sentinel for "this hint was never programmed" and for unfilled replacement slots.
pub const UNSET_PROGRAM_POINT: u64 = 0x7fff_ffff;

/// Work-partition width used when rounding per-table budgets.
pub const DEFAULT_THREAD_NUM: usize = 8;

/// Short tags are packed as `(tag << 35) | x` into the PRF block, so the whole
/// tag space of one epoch has to stay below 2^29.
pub const SHORT_TAG_CEILING: u64 = 1 << 29;

#[inline]
pub const fn round_up_to(x: usize, multiple: usize) -> usize {
    (x + multiple - 1) / multiple * multiple
}

/// Derived layout of one single-partition PIR instance.
///
/// All table sizes follow from `db_size` alone: the database is cut into
/// `set_size` chunks of `chunk_size` entries (the last chunk may be padding),
/// and every pseudorandom hint set holds exactly one entry per chunk.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct PianoParams {
    pub db_size: usize,
    pub entry_bytes: usize,
    /// Entry length in 64-bit words.
    pub entry_words: usize,
    /// Smallest power of two at or above `2 * sqrt(db_size)`.
    pub chunk_size: usize,
    /// Chunk count, rounded up to a multiple of 4 for the xor kernel.
    pub set_size: usize,
    pub thread_num: usize,
    /// Per-query hint-miss probability is kept at or below `2^-(failure_prob_log2 + 1)`.
    pub failure_prob_log2: u32,
    /// Real queries served per epoch before preprocessing must run again.
    pub max_query_num: usize,
    pub primary_hint_num: usize,
    pub max_query_per_chunk: usize,
}

impl PianoParams {
    /// Derives the full parameter set for a database of `db_size` entries of
    /// `entry_bytes` bytes each.
    ///
    /// # Returns
    ///
    /// * `Ok(PianoParams)` - When the entry shape fits the xor kernel and the
    ///   derived hint tables fit the short-tag space.
    /// * `Err(PianoANNError)` - Otherwise; all violations here are construction-time fatal.
    pub fn derive(db_size: usize, entry_bytes: usize, failure_prob_log2: u32) -> Result<PianoParams, PianoANNError> {
        if branch_opt::unlikely(db_size == 0) {
            return Err(PianoANNError::EmptyDatabase);
        }
        if branch_opt::unlikely(entry_bytes == 0 || entry_bytes % 8 != 0) {
            return Err(PianoANNError::EntryBytesNotWordAligned(entry_bytes));
        }

        let entry_words = entry_bytes / 8;
        if branch_opt::unlikely(entry_words % 4 != 0) {
            return Err(PianoANNError::EntryWordsNotXorAligned(entry_words));
        }

        let target_chunk_size = (2.0 * (db_size as f64).sqrt()) as usize;
        let mut chunk_size = 1usize;
        while chunk_size < target_chunk_size {
            chunk_size *= 2;
        }

        let set_size = round_up_to(db_size.div_ceil(chunk_size), 4);

        let max_query_num = ((db_size as f64).sqrt() * (db_size as f64).ln()) as usize;

        let thread_num = DEFAULT_THREAD_NUM;
        let hints_per_chunk = (std::f64::consts::LN_2 * f64::from(failure_prob_log2 + 1)).ceil() as usize;
        let primary_hint_num = round_up_to(hints_per_chunk * chunk_size, thread_num);
        let max_query_per_chunk = round_up_to((3 * max_query_num).div_ceil(set_size), thread_num);

        let params = PianoParams {
            db_size,
            entry_bytes,
            entry_words,
            chunk_size,
            set_size,
            thread_num,
            failure_prob_log2,
            max_query_num,
            primary_hint_num,
            max_query_per_chunk,
        };
        params.validate_tag_space()?;

        Ok(params)
    }

    /// Every primary hint and every backup slot consumes one short tag per epoch;
    /// the whole allocation has to fit below [`SHORT_TAG_CEILING`].
    fn validate_tag_space(&self) -> Result<(), PianoANNError> {
        let demand = (self.primary_hint_num + self.set_size * self.max_query_per_chunk) as u64;
        if branch_opt::unlikely(demand >= SHORT_TAG_CEILING) {
            return Err(PianoANNError::TagSpaceExhausted(demand));
        }
        Ok(())
    }

    /// Total words in the raw database this layout expects.
    #[inline]
    pub const fn raw_db_words(&self) -> usize {
        self.db_size * self.entry_words
    }

    /// Upload cost of one online query plus its download, in bytes.
    pub const fn comm_cost_per_query(&self) -> usize {
        self.set_size * 4 + self.entry_words * 8
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn derivation_matches_reference_shape() {
        let params = PianoParams::derive(18750, 4 * 8, 40).unwrap();

        // 2 * sqrt(18750) ≈ 273.9 -> next power of two
        assert_eq!(params.chunk_size, 512);
        // ceil(18750 / 512) = 37 -> rounded to a multiple of 4
        assert_eq!(params.set_size, 40);
        // floor(sqrt(18750) * ln(18750)) ≈ 1347
        assert!((1346..=1348).contains(&params.max_query_num));
        // ceil(ln 2 * 41) = 29 hints per chunk slot
        assert_eq!(params.primary_hint_num, round_up_to(29 * 512, DEFAULT_THREAD_NUM));
        assert!(params.max_query_per_chunk % DEFAULT_THREAD_NUM == 0);
    }

    #[test]
    fn rejects_misaligned_entries() {
        assert_eq!(PianoParams::derive(1024, 12, 40).unwrap_err(), PianoANNError::EntryBytesNotWordAligned(12));
        assert_eq!(PianoParams::derive(1024, 16, 40).unwrap_err(), PianoANNError::EntryWordsNotXorAligned(2));
        assert_eq!(PianoParams::derive(0, 32, 40).unwrap_err(), PianoANNError::EmptyDatabase);
    }
}

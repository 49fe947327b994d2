use crate::ann::{GraphMetadata, Vertex};
use crate::internals::{branch_opt, error::PianoANNError};
use crate::pir::batch::BatchPianoPir;
use rand::prelude::*;
use rand_chacha::ChaCha8Rng;
use std::collections::HashSet;

/// Hint-miss exponent used for the vertex database; per-fetch failures at
/// 2^-9 are far below what the walk's redundancy can absorb.
const FAILURE_PROB_LOG2: u32 = 8;

/// Vertex supplier that answers fetches through the batch PIR.
///
/// Offline, every vertex is packed as `f32 lanes of the vector ‖ u32 neighbor
/// ids`, little-endian, re-chunked into 64-bit words, and the flat
/// concatenation becomes the PIR raw database. Online, a batch of vertex ids
/// turns into one batch PIR query; the plaintext copy kept here only seeds the
/// walk (the seed set is public) and scores fetch success for diagnostics.
pub struct PirGraphStore {
    vectors: Vec<Vec<f32>>,
    graph: Vec<Vec<u32>>,
    dim: usize,
    m: usize,
    entry_bytes: usize,

    skip_prep: bool,
    non_private: bool,
    pir: Option<BatchPianoPir>,
    rng: ChaCha8Rng,

    total_query_num: usize,
    succ_query_num: usize,
}

impl PirGraphStore {
    /// # Arguments
    ///
    /// * `skip_prep` - Benchmarking mode: the PIR skips its database fold and
    ///   every fetch decodes to zeros.
    /// * `non_private` - Plaintext baseline: fetches bypass the PIR entirely.
    pub fn new(
        vectors: Vec<Vec<f32>>,
        graph: Vec<Vec<u32>>,
        skip_prep: bool,
        non_private: bool,
    ) -> Result<PirGraphStore, PianoANNError> {
        if branch_opt::unlikely(vectors.is_empty() || graph.len() != vectors.len()) {
            return Err(PianoANNError::VectorSetEmpty);
        }
        let dim = vectors[0].len();
        let m = graph[0].len();
        if let Some(bad) = vectors.iter().find(|v| v.len() != dim) {
            return Err(PianoANNError::VectorDimensionMismatch { got: bad.len(), expected: dim });
        }

        let entry_bytes = dim * 4 + m * 4;
        if branch_opt::unlikely(entry_bytes % 8 != 0) {
            return Err(PianoANNError::EntryBytesNotWordAligned(entry_bytes));
        }
        if branch_opt::unlikely((entry_bytes / 8) % 4 != 0) {
            return Err(PianoANNError::EntryWordsNotXorAligned(entry_bytes / 8));
        }

        Ok(PirGraphStore {
            vectors,
            graph,
            dim,
            m,
            entry_bytes,
            skip_prep,
            non_private,
            pir: None,
            rng: ChaCha8Rng::from_os_rng(),
            total_query_num: 0,
            succ_query_num: 0,
        })
    }

    /// Packs the vertex database and runs the PIR offline phase.
    pub fn preprocess(&mut self) -> Result<(), PianoANNError> {
        let n = self.vectors.len();
        let entry_words = self.entry_bytes / 8;

        let mut raw_db = Vec::with_capacity(n * entry_words);
        for (vector, neighbors) in self.vectors.iter().zip(self.graph.iter()) {
            raw_db.extend(pack_entry(vector, neighbors));
        }

        tracing::info!(
            entries = n,
            entry_bytes = self.entry_bytes,
            db_mib = (n * self.entry_bytes) as f64 / 1024.0 / 1024.0,
            "packing vertex database for PIR"
        );

        let mut pir = BatchPianoPir::new(n, self.entry_bytes, self.m, raw_db, FAILURE_PROB_LOG2)?;
        if self.skip_prep {
            pir.dummy_preprocessing();
        } else {
            pir.preprocessing()?;
        }
        self.pir = Some(pir);

        Ok(())
    }

    pub fn metadata(&self) -> GraphMetadata {
        GraphMetadata {
            n: self.vectors.len(),
            dim: self.dim,
            m: self.m,
        }
    }

    /// Fetches a batch of vertices through the PIR (or the plaintext copy in
    /// non-private mode). A fetch whose decoded neighbor row matches the
    /// ground-truth adjacency counts as successful; mismatches come from PIR
    /// hint misses and surface as the all-zero sentinel the walker skips.
    pub fn vertex_info(&mut self, ids: &[usize]) -> Result<Vec<Vertex>, PianoANNError> {
        self.total_query_num += ids.len();

        if self.non_private {
            self.succ_query_num += ids.len();
            return ids
                .iter()
                .map(|&id| {
                    if id >= self.vectors.len() {
                        return Err(PianoANNError::IndexOutOfRange(id as u64));
                    }
                    Ok(Vertex {
                        id,
                        neighbors: self.graph[id].clone(),
                        vector: self.vectors[id].clone(),
                    })
                })
                .collect();
        }

        let pir = self.pir.as_mut().ok_or(PianoANNError::StoreNotPreprocessed)?;

        let indices: Vec<u64> = ids.iter().map(|&id| id as u64).collect();
        let responses = pir.query(&indices)?;

        let mut vertices = Vec::with_capacity(ids.len());
        for (&id, response) in ids.iter().zip(responses.iter()) {
            let (vector, neighbors) = unpack_entry(response, self.dim, self.m);
            if neighbors == self.graph[id] {
                self.succ_query_num += 1;
            }
            vertices.push(Vertex { id, neighbors, vector });
        }

        Ok(vertices)
    }

    /// Samples about `sqrt(n)` distinct seed vertices, served from the local
    /// copy; the seed set carries no query information, so no PIR is spent.
    pub fn start_vertices(&mut self) -> Result<Vec<Vertex>, PianoANNError> {
        let n = self.vectors.len();
        let target_num = ((n as f64).sqrt() as usize).max(1);

        let mut picked = HashSet::with_capacity(target_num);
        while picked.len() < target_num {
            picked.insert(self.rng.random_range(0..n));
        }

        Ok(picked
            .into_iter()
            .map(|id| Vertex {
                id,
                neighbors: self.graph[id].clone(),
                vector: self.vectors[id].clone(),
            })
            .collect())
    }

    #[inline]
    pub fn total_query_num(&self) -> usize {
        self.total_query_num
    }

    #[inline]
    pub fn successful_query_num(&self) -> usize {
        self.succ_query_num
    }

    /// Fraction of vertex fetches whose decoded row matched ground truth.
    pub fn success_rate(&self) -> f64 {
        if self.total_query_num == 0 {
            return 0.0;
        }
        self.succ_query_num as f64 / self.total_query_num as f64
    }

    #[inline]
    pub fn pir(&self) -> Option<&BatchPianoPir> {
        self.pir.as_ref()
    }
}

/// `f32 lanes ‖ u32 neighbor ids`, little-endian, re-chunked into u64 words.
pub(crate) fn pack_entry(vector: &[f32], neighbors: &[u32]) -> Vec<u64> {
    let mut bytes = Vec::with_capacity(vector.len() * 4 + neighbors.len() * 4);
    for &lane in vector {
        bytes.extend_from_slice(&lane.to_le_bytes());
    }
    for &id in neighbors {
        bytes.extend_from_slice(&id.to_le_bytes());
    }

    bytes
        .chunks_exact(8)
        .map(|word| u64::from_le_bytes(word.try_into().unwrap()))
        .collect()
}

pub(crate) fn unpack_entry(entry: &[u64], dim: usize, m: usize) -> (Vec<f32>, Vec<u32>) {
    let mut bytes = Vec::with_capacity(entry.len() * 8);
    for &word in entry {
        bytes.extend_from_slice(&word.to_le_bytes());
    }

    let vector = bytes[..dim * 4]
        .chunks_exact(4)
        .map(|lane| f32::from_le_bytes(lane.try_into().unwrap()))
        .collect();
    let neighbors = bytes[dim * 4..(dim + m) * 4]
        .chunks_exact(4)
        .map(|id| u32::from_le_bytes(id.try_into().unwrap()))
        .collect();

    (vector, neighbors)
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn entry_layout_is_bit_exact() {
        let vector = vec![1.0f32, -2.5, 0.0, f32::MIN_POSITIVE];
        let neighbors = vec![7u32, 0, u32::MAX, 42];

        let packed = pack_entry(&vector, &neighbors);
        assert_eq!(packed.len(), (vector.len() * 4 + neighbors.len() * 4) / 8);

        // first word: lanes 0 and 1 side by side, little-endian
        let expected = u64::from(1.0f32.to_bits()) | (u64::from((-2.5f32).to_bits()) << 32);
        assert_eq!(packed[0], expected);

        let (vec_back, nbr_back) = unpack_entry(&packed, vector.len(), neighbors.len());
        assert_eq!(vec_back, vector);
        assert_eq!(nbr_back, neighbors);
    }

    #[test]
    fn rejects_misaligned_vertex_shapes() {
        let vectors = vec![vec![0.0f32; 5]];
        let graph = vec![vec![0u32; 4]];
        // 5 floats + 4 ids = 36 bytes, not word-aligned
        assert!(matches!(
            PirGraphStore::new(vectors, graph, false, false),
            Err(PianoANNError::EntryBytesNotWordAligned(36))
        ));
    }
}

pub mod builder;
pub mod pir_store;
pub mod search;

use crate::internals::error::PianoANNError;
use pir_store::PirGraphStore;

/// One graph vertex as the search walker sees it: the embedded point plus its
/// fixed-degree out-neighborhood.
#[derive(Clone, Debug, PartialEq)]
pub struct Vertex {
    pub id: usize,
    pub neighbors: Vec<u32>,
    pub vector: Vec<f32>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct GraphMetadata {
    /// Vertex count.
    pub n: usize,
    /// Vector dimension.
    pub dim: usize,
    /// Out-degree of every vertex.
    pub m: usize,
}

/// Vertex supplier behind the search frontend.
///
/// Two concrete suppliers exist: a plaintext in-memory one (baselines,
/// graph-quality evaluation) and the PIR-backed one (private fetches). The
/// frontend is written against this sum so swapping privacy on and off never
/// touches the walk itself.
pub enum GraphStore {
    InMemory(MemoryGraphStore),
    PirBacked(PirGraphStore),
}

impl GraphStore {
    pub fn preprocess(&mut self) -> Result<(), PianoANNError> {
        match self {
            GraphStore::InMemory(_) => Ok(()),
            GraphStore::PirBacked(store) => store.preprocess(),
        }
    }

    pub fn metadata(&self) -> GraphMetadata {
        match self {
            GraphStore::InMemory(store) => store.metadata(),
            GraphStore::PirBacked(store) => store.metadata(),
        }
    }

    /// Resolves a batch of vertex ids; row `i` of the output answers `ids[i]`.
    pub fn vertex_info(&mut self, ids: &[usize]) -> Result<Vec<Vertex>, PianoANNError> {
        match self {
            GraphStore::InMemory(store) => store.vertex_info(ids),
            GraphStore::PirBacked(store) => store.vertex_info(ids),
        }
    }

    /// The fixed public seed set the walker starts from, about `sqrt(n)` vertices.
    pub fn start_vertices(&mut self) -> Result<Vec<Vertex>, PianoANNError> {
        match self {
            GraphStore::InMemory(store) => store.start_vertices(),
            GraphStore::PirBacked(store) => store.start_vertices(),
        }
    }
}

/// Plaintext supplier serving straight from owned vectors and adjacency rows.
pub struct MemoryGraphStore {
    vectors: Vec<Vec<f32>>,
    graph: Vec<Vec<u32>>,
    dim: usize,
}

impl MemoryGraphStore {
    pub fn new(vectors: Vec<Vec<f32>>, graph: Vec<Vec<u32>>) -> Result<MemoryGraphStore, PianoANNError> {
        if vectors.is_empty() || graph.len() != vectors.len() {
            return Err(PianoANNError::VectorSetEmpty);
        }
        let dim = vectors[0].len();
        Ok(MemoryGraphStore { vectors, graph, dim })
    }

    pub fn metadata(&self) -> GraphMetadata {
        GraphMetadata {
            n: self.vectors.len(),
            dim: self.dim,
            m: self.graph[0].len(),
        }
    }

    pub fn vertex_info(&mut self, ids: &[usize]) -> Result<Vec<Vertex>, PianoANNError> {
        ids.iter()
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
            .collect()
    }

    pub fn start_vertices(&mut self) -> Result<Vec<Vertex>, PianoANNError> {
        let target_num = (self.vectors.len() as f64).sqrt() as usize;
        let ids: Vec<usize> = (0..target_num.max(1)).collect();
        self.vertex_info(&ids)
    }
}

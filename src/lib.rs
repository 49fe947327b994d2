//! PianoANN: privacy-preserving approximate nearest-neighbor search over a single-server Piano PIR.
//!
//! This crate lets a client walk a bounded-degree proximity graph held by an untrusted server
//! and retrieve the top-k closest database vectors without revealing which vertices the walk
//! touched. It combines an offline/online Piano-family PIR (pseudorandom hint sets with
//! primary/backup tables and a database-partitioning batch wrapper) with a beam-search walker
//! whose per-step vertex fetches are satisfied through the PIR.
//!
//! ## Features
//!
//! * **Access-pattern privacy:** Every search round uploads a fixed-shape batch of chunk
//!   offsets; an honest-but-curious server learns nothing about which vertices the walk visits.
//! * **Sub-linear online cost:** One online query uploads `O(sqrt(n))` 32-bit offsets and
//!   downloads a single entry; the linear work happens once per epoch, offline.
//! * **Self-healing hints:** Served hints are repaired in place from precomputed backup
//!   parities, so one preprocessing supports thousands of queries before rolling over.
//! * **Graph construction included:** A robust-prune builder with bi-directional degree
//!   rebalance turns any external k-NN oracle into a fixed-degree search graph.
//!
//! ## Usage
//!
//! Add the crate to your `Cargo.toml`:
//!
//! ```toml
//! [dependencies]
//! piano-ann = "=0.1.0"
//! ```
//!
//! Retrieving database entries privately:
//!
//! ```rust
//! use piano_ann::pir::PianoPir;
//!
//! fn main() {
//!     let db_size = 1024;
//!     let entry_bytes = 32; // four 64-bit words per entry
//!     let raw_db: Vec<u64> = (0..db_size as u64 * 4).collect();
//!
//!     let mut pir = PianoPir::new(db_size, entry_bytes, raw_db.clone(), 20).expect("parameter derivation failed");
//!     pir.preprocessing().expect("offline phase failed");
//!
//!     let entry = pir.query(20, true).expect("online query failed");
//!     assert_eq!(entry, raw_db[20 * 4..21 * 4].to_vec());
//! }
//! ```
//!
//! Searching a graph without revealing the walk:
//!
//! ```rust
//! use piano_ann::ann::{pir_store::PirGraphStore, search::SearchFrontend, GraphStore};
//! use rand::prelude::*;
//! use rand_chacha::ChaCha8Rng;
//!
//! fn main() {
//!     let mut rng = ChaCha8Rng::seed_from_u64(1);
//!     let n = 256;
//!     let vectors: Vec<Vec<f32>> = (0..n).map(|_| (0..24).map(|_| rng.random()).collect()).collect();
//!     // adjacency rows normally come from `ann::builder::build_graph` over a k-NN oracle
//!     let graph: Vec<Vec<u32>> = (0..n).map(|u| (1..=8).map(|d| ((u + d) % n) as u32).collect()).collect();
//!
//!     let store = PirGraphStore::new(vectors.clone(), graph, false, false).expect("store setup failed");
//!     let mut frontend = SearchFrontend::new(GraphStore::PirBacked(store));
//!     frontend.preprocess().expect("offline phase failed");
//!
//!     let (ids, reach_steps) = frontend.search_knn(&vectors[3], 10, 8, 2, false).expect("search failed");
//!     assert_eq!(ids.len(), 10);
//!     assert_eq!(reach_steps.len(), 10);
//! }
//! ```
//!
//! ## Modules
//!
//! * `pir`: The single-partition Piano client/server pair and the batch wrapper that
//!   partitions a database for near-linear throughput in batch size.
//! * `ann`: The proximity-graph builder, the beam-search frontend and the two vertex
//!   suppliers (plaintext in-memory, PIR-backed).

pub use internals::distance::l2_distance;
pub use internals::error::PianoANNError;
pub use internals::params::PianoParams;

pub mod ann;
pub mod pir;

mod internals;

mod test_private_ann;

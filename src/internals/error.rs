use std::{error::Error, fmt::Display};

#[derive(Debug, PartialEq)]
pub enum PianoANNError {
    // Parameter derivation
    EmptyDatabase,
    EntryBytesNotWordAligned(usize),
    EntryWordsNotXorAligned(usize),
    RawDBSizeMismatch { got: usize, expected: usize },
    TagSpaceExhausted(u64),

    // Single-partition PIR, online phase
    IndexOutOfRange(u64),
    QueryBudgetExhausted,
    ChunkBudgetExhausted(usize),
    NoUsableHint,

    // Batch PIR
    BatchSizeNotPartitionable { batch_size: usize, queries_per_partition: usize },

    // Graph construction and search
    StoreNotPreprocessed,
    VectorSetEmpty,
    VectorDimensionMismatch { got: usize, expected: usize },
    DegreeTooLargeForVectorSet { degree: usize, vector_count: usize },

    // Stats snapshot
    FailedToSerializeStats(String),
}

impl Display for PianoANNError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::EmptyDatabase => write!(f, "The database must hold at least one entry."),
            Self::EntryBytesNotWordAligned(bytes) => write!(f, "An entry of {} bytes does not fit whole 64-bit words.", bytes),
            Self::EntryWordsNotXorAligned(words) => {
                write!(f, "An entry of {} words breaks the 4-word alignment required by the xor kernel.", words)
            }
            Self::RawDBSizeMismatch { got, expected } => {
                write!(f, "The raw database holds {} words but the configuration demands {}.", got, expected)
            }
            Self::TagSpaceExhausted(demand) => {
                write!(f, "The hint tables demand {} short tags, which does not fit below 2^29.", demand)
            }

            Self::IndexOutOfRange(idx) => write!(f, "Index {} lies beyond the database.", idx),
            Self::QueryBudgetExhausted => write!(f, "The per-epoch query budget is spent; preprocessing must run again."),
            Self::ChunkBudgetExhausted(chunk) => write!(f, "Chunk {} received more queries than its per-epoch budget.", chunk),
            Self::NoUsableHint => write!(f, "No primary hint covers the queried offset."),

            Self::BatchSizeNotPartitionable { batch_size, queries_per_partition } => {
                write!(f, "A batch of {} cannot be split into partitions absorbing {} queries each.", batch_size, queries_per_partition)
            }

            Self::StoreNotPreprocessed => write!(f, "The vertex store must run its offline phase before serving fetches."),
            Self::VectorSetEmpty => write!(f, "Can not build a proximity graph over an empty vector set."),
            Self::VectorDimensionMismatch { got, expected } => {
                write!(f, "Vector has dimension {} but the store was built for {}.", got, expected)
            }
            Self::DegreeTooLargeForVectorSet { degree, vector_count } => {
                write!(f, "Target degree {} does not leave enough distinct neighbors among {} vectors.", degree, vector_count)
            }

            Self::FailedToSerializeStats(e) => write!(f, "Stats serialization failed with: {}", e),
        }
    }
}

impl Error for PianoANNError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        None
    }
}

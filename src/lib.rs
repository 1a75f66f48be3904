//! Embedding-backed memory of prompt/response pairs with nearest-match
//! retrieval, usage statistics and intent classification.

pub mod config;
pub mod embeddings;
pub mod error;
pub mod index;
pub mod intent;
pub mod memory;
pub mod ranker;
pub mod stats;
pub mod types;

pub use config::Settings;
pub use embeddings::{Embedder, LiteEmbedder, SocketEmbedder};
pub use error::{Error, Result};
pub use index::MemoryStore;
pub use intent::{Classification, IntentClassifier, IntentLibrary};
pub use memory::{LearnRequest, MemoryEngine};
pub use ranker::MatchPolicy;
pub use types::{CleanupFilter, Match, MemoryRecord, MemoryUpdate, NewMemory};

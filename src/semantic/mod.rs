//! Semantic search over customer profiles.
//!
//! # Architecture
//!
//! - `provider`: embedding provider trait
//! - `openai`: OpenAI-compatible HTTP provider
//! - `embeddings`: local fastembed provider (feature `local-embeddings`)
//! - `index`: in-memory vector index with readiness gate
//! - `ranker`: cosine similarity scoring
//! - `builder`: load-and-embed pipeline populating the index
//! - `service`: query path

mod builder;
#[cfg(feature = "local-embeddings")]
pub mod embeddings;
mod errors;
mod index;
pub mod openai;
mod provider;
mod ranker;
mod service;

pub use builder::{BuildOptions, BuildPhase, IndexBuilder};
#[cfg(feature = "local-embeddings")]
pub use embeddings::LocalEmbedder;
pub use errors::{BuildError, EmbeddingError, ErrorKind, SearchError};
pub use index::VectorIndex;
pub use openai::OpenAiEmbedder;
pub use provider::EmbeddingProvider;
pub use service::{SearchRequest, SearchResponse, SearchService};

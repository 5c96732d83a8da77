#![forbid(unsafe_code)]
//! Core primitives for facematch.
//!
//! Holds the in-memory similarity index over L2-normalized face embeddings,
//! the threshold policy that turns a nearest neighbor into an accept/reject
//! decision, the embedding wire codec and the authoritative record store the
//! index is rebuilt from.

pub mod embedding;
pub mod index;
pub mod matcher;
pub mod store;
pub mod vector;

pub use embedding::{decode_embedding, encode_embedding, DecodeError};
pub use index::{Identity, IndexError, Neighbor, SimilarityIndex};
pub use matcher::{EnrollDecision, MatchPolicy, PolicyError, QueryDecision};
pub use store::{
    RecordStore, StoreError, StoreOptions, StorePaths, StoredRecord, VectorStore, WalRecord,
};
pub use vector::{
    l2_squared, normalize_l2, validate_embedding, VectorError, VectorValidationOptions,
};

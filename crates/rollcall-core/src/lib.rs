//! rollcall-core: Face descriptor matching for attendance.
//!
//! Compares a captured face embedding against a catalog of enrolled
//! identities by Euclidean distance, and converts embeddings to and from
//! their stored text form. Everything here is pure: no I/O, no logging.

pub mod codec;
pub mod extractor;
pub mod matcher;
pub mod types;

pub use codec::CodecError;
pub use extractor::{DescriptorStream, EmbeddingExtractor, ExtractError};
pub use matcher::{EuclideanMatcher, MatchReport, MatchResult, Matcher, SkipReason, SkippedEntry};
pub use types::{Embedding, Identity, IdentityRecord, MatchError, DEFAULT_EMBEDDING_DIM};

//! presence-core: Face enrollment and matching for attendance tracking.
//!
//! Owns the identity keys, the directory-backed embedding store, the
//! first-match linear scan, and the ONNX face embedder (SCRFD detection,
//! landmark alignment, ArcFace recognition).

pub mod alignment;
pub mod detector;
pub mod embedder;
pub mod frame;
pub mod identity;
pub mod matcher;
pub mod recognizer;
pub mod store;
pub mod types;

pub use embedder::{EmbedError, FaceEmbedder, OnnxEmbedder};
pub use frame::{Frame, FrameError};
pub use identity::{Identity, IdentityError};
pub use matcher::{recognize, MatchError};
pub use store::{EmbeddingStore, EnrollOutcome, StoreError};
pub use types::{BoundingBox, Comparison, Embedding, EmbeddingRecord, MatchResult};

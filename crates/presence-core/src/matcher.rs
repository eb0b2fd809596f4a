//! First-match linear scan of a probe face against the store.
//!
//! The probe is compared with each record in lexicographic identity order
//! and the scan stops at the first record the embedder calls the same
//! person. When several records would match, the lexicographically first
//! identity wins, deterministically. This is deliberately not a best-score
//! search.

use thiserror::Error;

use crate::embedder::{EmbedError, FaceEmbedder};
use crate::frame::Frame;
use crate::store::{EmbeddingStore, StoreError};
use crate::types::{Embedding, EmbeddingRecord, MatchResult};

#[derive(Error, Debug)]
pub enum MatchError {
    #[error(transparent)]
    Embed(#[from] EmbedError),
    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Identify the person in `frame`.
pub fn recognize<E>(
    embedder: &mut E,
    store: &EmbeddingStore,
    frame: &Frame,
) -> Result<MatchResult, MatchError>
where
    E: FaceEmbedder + ?Sized,
{
    let faces = embedder.embed(frame)?;
    let Some(probe) = faces.first() else {
        tracing::debug!("probe image has no face");
        return Ok(MatchResult::NoPersonsFound);
    };
    if faces.len() > 1 {
        tracing::debug!(faces = faces.len(), "multiple faces in probe, using the first");
    }

    let found = first_match(probe, store.list_all()?, |known, probe| {
        embedder.same_person(known, probe)
    })?;

    Ok(match found {
        Some(record) => MatchResult::Matched(record.identity),
        None => MatchResult::UnknownPerson,
    })
}

/// Return the first record in `gallery` that `same_person` accepts.
///
/// Stops reading the gallery at the first match; a gallery error is
/// returned as soon as it is reached.
pub fn first_match<I, F>(
    probe: &Embedding,
    gallery: I,
    same_person: F,
) -> Result<Option<EmbeddingRecord>, StoreError>
where
    I: IntoIterator<Item = Result<EmbeddingRecord, StoreError>>,
    F: Fn(&Embedding, &Embedding) -> bool,
{
    let mut scanned = 0usize;
    for record in gallery {
        let record = record?;
        scanned += 1;
        if same_person(&record.embedding, probe) {
            tracing::debug!(identity = %record.identity, scanned, "probe matched");
            return Ok(Some(record));
        }
    }
    tracing::debug!(scanned, "probe matched no enrolled identity");
    Ok(None)
}

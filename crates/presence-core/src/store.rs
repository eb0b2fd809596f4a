//! Directory-backed embedding store.
//!
//! Layout, one pair of files per enrolled identity:
//!
//! ```text
//! <dir>/<identity>.png   reference image, kept for audit and display
//! <dir>/<identity>.json  embedding record
//! ```
//!
//! Each file is written to a temp file in the same directory and renamed
//! into place, so a concurrent scan sees either the old record or the new
//! one. The `.json` file is written last and is what makes an identity
//! visible to [`EmbeddingStore::list_all`]. Both files are staged and synced
//! before either is renamed; if the `.json` rename still fails, the earlier
//! reference image is put back.

use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tempfile::NamedTempFile;
use thiserror::Error;

use crate::identity::Identity;
use crate::types::{Embedding, EmbeddingRecord};

const EMBEDDING_EXT: &str = "json";
const REFERENCE_EXT: &str = "png";

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("store I/O: {0}")]
    Io(#[from] io::Error),
    #[error("corrupt embedding record {path}: {source}")]
    Corrupt {
        path: PathBuf,
        source: serde_json::Error,
    },
    #[error("refusing to enroll an empty embedding")]
    EmptyEmbedding,
    #[error("serialize embedding record: {0}")]
    Serialize(#[source] serde_json::Error),
}

/// On-disk body of `<identity>.json`. The identity is the file stem.
#[derive(Debug, Serialize, Deserialize)]
struct RecordFile {
    embedding: Embedding,
    enrolled_at: DateTime<Utc>,
}

/// Result of a successful enrollment.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EnrollOutcome {
    /// An earlier record for the same identity was overwritten.
    pub replaced: bool,
}

pub struct EmbeddingStore {
    dir: PathBuf,
}

impl EmbeddingStore {
    /// Open (creating if needed) a store rooted at `dir`.
    pub fn open(dir: impl Into<PathBuf>) -> Result<Self, StoreError> {
        let dir = dir.into();
        fs::create_dir_all(&dir)?;
        tracing::debug!(dir = %dir.display(), "embedding store opened");
        Ok(Self { dir })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn reference_image_path(&self, identity: &Identity) -> PathBuf {
        self.dir.join(format!("{identity}.{REFERENCE_EXT}"))
    }

    fn embedding_path(&self, identity: &Identity) -> PathBuf {
        self.dir.join(format!("{identity}.{EMBEDDING_EXT}"))
    }

    /// Persist the reference image and embedding for `identity`,
    /// replacing any earlier enrollment (last write wins).
    pub fn enroll(
        &self,
        identity: &Identity,
        reference_png: &[u8],
        embedding: &Embedding,
    ) -> Result<EnrollOutcome, StoreError> {
        if embedding.is_empty() {
            return Err(StoreError::EmptyEmbedding);
        }

        let embedding_path = self.embedding_path(identity);
        let replaced = embedding_path.exists();

        let body = serde_json::to_vec_pretty(&RecordFile {
            embedding: embedding.clone(),
            enrolled_at: Utc::now(),
        })
        .map_err(StoreError::Serialize)?;

        // Stage both files first so write and fsync errors surface before
        // anything visible changes.
        let reference_tmp = self.stage(reference_png)?;
        let embedding_tmp = self.stage(&body)?;

        let reference_path = self.reference_image_path(identity);
        let previous_reference = match fs::read(&reference_path) {
            Ok(bytes) => Some(bytes),
            Err(e) if e.kind() == io::ErrorKind::NotFound => None,
            Err(e) => return Err(e.into()),
        };

        reference_tmp
            .persist(&reference_path)
            .map_err(|e| StoreError::Io(e.error))?;
        if let Err(e) = embedding_tmp.persist(&embedding_path) {
            self.restore_reference(identity, &reference_path, previous_reference.as_deref());
            return Err(StoreError::Io(e.error));
        }

        tracing::debug!(
            identity = %identity,
            dim = embedding.dim(),
            replaced,
            "embedding record written"
        );

        Ok(EnrollOutcome { replaced })
    }

    /// Write `bytes` to a synced temp file in the store directory.
    fn stage(&self, bytes: &[u8]) -> Result<NamedTempFile, StoreError> {
        let mut tmp = NamedTempFile::new_in(&self.dir)?;
        tmp.write_all(bytes)?;
        tmp.as_file().sync_all()?;
        Ok(tmp)
    }

    /// Put back the reference image that was in place before a failed enroll.
    fn restore_reference(&self, identity: &Identity, path: &Path, previous: Option<&[u8]>) {
        let restored = match previous {
            Some(bytes) => self
                .stage(bytes)
                .and_then(|tmp| {
                    tmp.persist(path)
                        .map(|_| ())
                        .map_err(|e| StoreError::Io(e.error))
                }),
            None => fs::remove_file(path).map_err(StoreError::from),
        };
        if let Err(e) = restored {
            tracing::error!(
                identity = %identity,
                error = %e,
                "could not roll back reference image after failed enroll"
            );
        }
    }

    /// Enrolled identities in lexicographic order.
    ///
    /// Directory entries that are not `<valid identity>.json` are ignored.
    pub fn identities(&self) -> Result<Vec<Identity>, StoreError> {
        let mut identities = Vec::new();
        for entry in fs::read_dir(&self.dir)? {
            let entry = entry?;
            if !entry.file_type()?.is_file() {
                continue;
            }
            let name = entry.file_name();
            let Some(stem) = name
                .to_str()
                .and_then(|n| n.strip_suffix(EMBEDDING_EXT))
                .and_then(|n| n.strip_suffix('.'))
            else {
                continue;
            };
            match Identity::parse(stem) {
                Ok(identity) => identities.push(identity),
                Err(e) => tracing::debug!(file = ?name, error = %e, "skipping store entry"),
            }
        }
        identities.sort();
        Ok(identities)
    }

    /// Lazily load every record in lexicographic identity order.
    ///
    /// Each call rescans the directory; the iterator is a snapshot of the
    /// identities present at call time, not a live view. A record removed
    /// after the scan started is skipped, and so is one whose file does not
    /// parse.
    pub fn list_all(&self) -> Result<Records<'_>, StoreError> {
        Ok(Records {
            store: self,
            pending: self.identities()?.into_iter(),
        })
    }

    /// Load the record for `identity`, if enrolled.
    pub fn get(&self, identity: &Identity) -> Result<Option<EmbeddingRecord>, StoreError> {
        let path = self.embedding_path(identity);
        let bytes = match fs::read(&path) {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        let file: RecordFile =
            serde_json::from_slice(&bytes).map_err(|source| StoreError::Corrupt { path, source })?;
        Ok(Some(EmbeddingRecord {
            identity: identity.clone(),
            embedding: file.embedding,
            enrolled_at: file.enrolled_at,
        }))
    }

    pub fn len(&self) -> Result<usize, StoreError> {
        Ok(self.identities()?.len())
    }

    pub fn is_empty(&self) -> Result<bool, StoreError> {
        Ok(self.len()? == 0)
    }
}

/// Iterator returned by [`EmbeddingStore::list_all`].
pub struct Records<'a> {
    store: &'a EmbeddingStore,
    pending: std::vec::IntoIter<Identity>,
}

impl Iterator for Records<'_> {
    type Item = Result<EmbeddingRecord, StoreError>;

    fn next(&mut self) -> Option<Self::Item> {
        for identity in self.pending.by_ref() {
            match self.store.get(&identity) {
                Ok(Some(record)) => return Some(Ok(record)),
                Ok(None) => {
                    tracing::debug!(identity = %identity, "record vanished during scan");
                }
                Err(e @ StoreError::Corrupt { .. }) => {
                    tracing::warn!(identity = %identity, error = %e, "skipping unreadable record");
                }
                Err(e) => return Some(Err(e)),
            }
        }
        None
    }
}

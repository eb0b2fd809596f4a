use std::sync::Arc;

use presence_core::frame::{self, Frame, FrameError};
use presence_core::{
    recognize, Comparison, EmbedError, EmbeddingStore, FaceEmbedder, Identity, MatchError,
    MatchResult, StoreError,
};
use thiserror::Error;
use tokio::sync::{mpsc, oneshot};

#[derive(Error, Debug)]
pub enum EngineError {
    #[error("image decode error: {0}")]
    Decode(#[from] FrameError),
    #[error("no face detected in image")]
    NoFaceDetected,
    #[error("embedding error: {0}")]
    Embed(#[from] EmbedError),
    #[error("store error: {0}")]
    Store(#[from] StoreError),
    #[error("spawn engine thread: {0}")]
    Spawn(#[source] std::io::Error),
    #[error("engine thread exited")]
    ChannelClosed,
}

impl From<MatchError> for EngineError {
    fn from(err: MatchError) -> Self {
        match err {
            MatchError::Embed(e) => EngineError::Embed(e),
            MatchError::Store(e) => EngineError::Store(e),
        }
    }
}

/// Result of an enrollment operation.
#[derive(Debug, Clone)]
pub struct EnrollResult {
    pub identity: Identity,
    /// An earlier enrollment for the same identity was overwritten.
    pub replaced: bool,
    /// Faces found in the image; only the first was enrolled.
    pub faces: usize,
}

/// Messages sent from HTTP handlers to the engine thread.
enum EngineRequest {
    Enroll {
        identity: Identity,
        image: Vec<u8>,
        reply: oneshot::Sender<Result<EnrollResult, EngineError>>,
    },
    Recognize {
        image: Vec<u8>,
        reply: oneshot::Sender<Result<MatchResult, EngineError>>,
    },
}

/// Clone-safe handle to the engine thread.
#[derive(Clone)]
pub struct EngineHandle {
    tx: mpsc::Sender<EngineRequest>,
    comparison: Comparison,
}

impl EngineHandle {
    /// Decode the upload, embed the first face, and store it under `identity`.
    pub async fn enroll(
        &self,
        identity: Identity,
        image: Vec<u8>,
    ) -> Result<EnrollResult, EngineError> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.tx
            .send(EngineRequest::Enroll {
                identity,
                image,
                reply: reply_tx,
            })
            .await
            .map_err(|_| EngineError::ChannelClosed)?;
        reply_rx.await.map_err(|_| EngineError::ChannelClosed)?
    }

    /// Decode the upload and match its first face against the store.
    pub async fn recognize(&self, image: Vec<u8>) -> Result<MatchResult, EngineError> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.tx
            .send(EngineRequest::Recognize {
                image,
                reply: reply_tx,
            })
            .await
            .map_err(|_| EngineError::ChannelClosed)?;
        reply_rx.await.map_err(|_| EngineError::ChannelClosed)?
    }

    /// Same-person rule of the embedder the engine owns.
    pub fn comparison(&self) -> Comparison {
        self.comparison
    }
}

/// Spawn the engine on a dedicated OS thread.
///
/// The thread owns the embedder (ONNX sessions need exclusive access) and
/// serves requests in arrival order until every handle is dropped.
pub fn spawn_engine(
    mut embedder: Box<dyn FaceEmbedder>,
    store: Arc<EmbeddingStore>,
    queue_depth: usize,
) -> Result<EngineHandle, EngineError> {
    let comparison = embedder.comparison();
    let (tx, mut rx) = mpsc::channel::<EngineRequest>(queue_depth.max(1));

    std::thread::Builder::new()
        .name("presence-engine".into())
        .spawn(move || {
            tracing::info!("engine thread started");
            while let Some(req) = rx.blocking_recv() {
                match req {
                    EngineRequest::Enroll {
                        identity,
                        image,
                        reply,
                    } => {
                        let result = run_enroll(embedder.as_mut(), &store, identity, &image);
                        let _ = reply.send(result);
                    }
                    EngineRequest::Recognize { image, reply } => {
                        let result = run_recognize(embedder.as_mut(), &store, &image);
                        let _ = reply.send(result);
                    }
                }
            }
            tracing::info!("engine thread exiting");
        })
        .map_err(EngineError::Spawn)?;

    Ok(EngineHandle { tx, comparison })
}

fn run_enroll(
    embedder: &mut dyn FaceEmbedder,
    store: &EmbeddingStore,
    identity: Identity,
    bytes: &[u8],
) -> Result<EnrollResult, EngineError> {
    let image = frame::decode_image(bytes)?;
    let faces = embedder.embed(&Frame::from_image(&image))?;
    let face_count = faces.len();
    let Some(embedding) = faces.into_iter().next() else {
        tracing::info!(identity = %identity, "enroll rejected: no face detected");
        return Err(EngineError::NoFaceDetected);
    };

    let reference = frame::encode_png(&image)?;
    let outcome = store.enroll(&identity, &reference, &embedding)?;
    if outcome.replaced {
        tracing::warn!(identity = %identity, "re-enrollment replaced existing record");
    }
    tracing::info!(
        identity = %identity,
        faces = face_count,
        dim = embedding.dim(),
        "enrolled"
    );

    Ok(EnrollResult {
        identity,
        replaced: outcome.replaced,
        faces: face_count,
    })
}

fn run_recognize(
    embedder: &mut dyn FaceEmbedder,
    store: &EmbeddingStore,
    bytes: &[u8],
) -> Result<MatchResult, EngineError> {
    let frame = Frame::decode(bytes)?;
    let result = recognize(embedder, store, &frame)?;
    tracing::info!(user = result.user(), matched = result.is_match(), "recognize");
    Ok(result)
}

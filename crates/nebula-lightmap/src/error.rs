//! Bake error types.

use std::path::PathBuf;

use crate::scene::ObjectId;

/// Boxed error returned by collaborator implementations.
pub type CollaboratorError = Box<dyn std::error::Error + Send + Sync>;

/// Errors that abort a bake.
///
/// Cancellation is not an error: a cancelled bake ends in
/// [`BakeStage::Cancelled`](crate::BakeStage::Cancelled).
#[derive(Debug, thiserror::Error)]
pub enum BakeError {
    /// `start` was called while a previous bake is still running.
    #[error("a lightmap bake is already running")]
    AlreadyRunning,

    /// A map could not be allocated.
    #[error("out of memory allocating a {width}x{height} object-space map")]
    OutOfMemory { width: u32, height: u32 },

    /// The rasterizer failed to produce geometry buffers for an object.
    #[error("rasterizing geometry buffers for {object:?} failed: {source}")]
    Rasterizer {
        object: ObjectId,
        #[source]
        source: CollaboratorError,
    },

    /// The rasterizer resized its targets.
    #[error("geometry targets for {object:?} are {actual} texels, expected {expected}")]
    TargetSize {
        object: ObjectId,
        expected: usize,
        actual: usize,
    },

    /// The bake worker thread could not be spawned.
    #[error("failed to spawn bake worker: {0}")]
    WorkerSpawn(#[source] std::io::Error),

    /// The texel thread pool could not be built.
    #[error("failed to build texel thread pool: {0}")]
    ThreadPool(#[source] rayon::ThreadPoolBuildError),

    /// The bake worker panicked.
    #[error("bake worker panicked")]
    WorkerPanicked,

    /// Writing a debug image failed.
    #[error("failed to write debug image {path}: {source}")]
    DebugOutput {
        path: PathBuf,
        #[source]
        source: png::EncodingError,
    },
}

use std::path::PathBuf;

use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum MatchError {
    #[error("gallery is empty")]
    EmptyGallery,

    /// A zero-norm (or non-finite) vector reached the matcher. `index` is the
    /// offending gallery entry, or `None` when no gallery is involved.
    #[error("degenerate embedding ({})", entry_source(.index, "query"))]
    DegenerateEmbedding { index: Option<usize> },

    #[error(
        "embedding dimension mismatch: query has {query}, {} has {entry}",
        entry_source(.index, "other vector")
    )]
    DimensionMismatch {
        index: Option<usize>,
        query: usize,
        entry: usize,
    },
}

fn entry_source(index: &Option<usize>, fallback: &str) -> String {
    match index {
        Some(i) => format!("gallery entry {}", i),
        None => fallback.to_string(),
    }
}

#[derive(Error, Debug)]
pub enum GalleryError {
    #[error("{embeddings} embeddings but {paths} paths; sequences must be index-aligned")]
    LengthMismatch { embeddings: usize, paths: usize },

    #[error("gallery entry {index} has {found} dimensions, expected {expected}")]
    MixedDimensions {
        index: usize,
        expected: usize,
        found: usize,
    },

    #[error("gallery embeddings have {found} dimensions but the configured model emits {expected}; rebuild the gallery")]
    IncompatibleModel { expected: usize, found: usize },

    #[error("gallery file {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("gallery file {} is corrupt: {source}", path.display())]
    Encoding {
        path: PathBuf,
        #[source]
        source: postcard::Error,
    },
}

/// Why a single gallery image was skipped.
#[derive(Error, Debug)]
pub enum FailureReason {
    #[error("cannot read file: {0}")]
    Io(#[source] std::io::Error),

    #[error("cannot decode image: {0}")]
    Decode(#[source] image::ImageError),

    #[error("no face detected")]
    NoFace,

    #[error("embedding has {found} dimensions, expected {expected}")]
    ShapeMismatch { expected: usize, found: usize },

    #[error("embedding failed: {0:#}")]
    Extraction(anyhow::Error),
}

#[derive(Error, Debug)]
pub enum BuildError {
    #[error("none of the {attempted} gallery images produced an embedding")]
    NothingExtracted { attempted: usize },

    #[error(transparent)]
    Gallery(#[from] GalleryError),

    #[error("writing {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

#[derive(Error, Debug)]
pub enum IdentifyError {
    #[error(transparent)]
    Match(#[from] MatchError),

    #[error("face pipeline failed: {0:#}")]
    Pipeline(anyhow::Error),
}

#[derive(Error, Debug)]
pub enum UploadError {
    #[error("invalid upload file name {0:?}")]
    InvalidName(String),

    #[error("creating {}: {source}", path.display())]
    CreateDir {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("writing {}: {source}", path.display())]
    Write {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

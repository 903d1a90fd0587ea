pub mod builder;
pub mod config;
pub mod context;
pub mod error;
pub mod gallery;
pub mod identify;
pub mod matcher;
pub mod server;
pub mod upload;

// Re-export vision types for convenience
pub use celebmatch_vision::{
    extractor, face, locator, pipeline, video, BoundingBox, Embedding, EmbeddingExtractor,
    FaceLocator, Pipeline, VggFaceExtractor, VisionError, YuNetLocator,
};

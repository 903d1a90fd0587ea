pub mod extractor;
pub mod face;
pub mod locator;
pub mod model;
pub mod pipeline;
pub mod video;
pub mod yunet;

// Re-export commonly used types
pub use extractor::{Embedding, EmbeddingExtractor, ModelParams, VggFaceExtractor};
pub use face::{BoundingBox, Detection};
pub use locator::{FaceLocator, SelectionPolicy, YuNetLocator};
pub use model::VisionError;
pub use pipeline::Pipeline;
pub use video::Camera;

use axum::body::Bytes;
use axum_typed_multipart::{FieldData, TryFromMultipart};
use serde::{Deserialize, Serialize};

/// Multipart body of `POST /predict`.
#[derive(TryFromMultipart)]
pub struct PredictRequest {
    pub file: FieldData<Bytes>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct PredictResponse {
    /// Display name of the closest gallery face.
    pub name: String,
    /// Cosine similarity as a percentage, two decimals.
    pub match_percentage: f32,
    /// Copy of the matched gallery image under `/static`.
    pub matched_image_url: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct HealthResponse {
    pub gallery_size: usize,
    pub dimension: Option<usize>,
}

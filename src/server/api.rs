use std::sync::Arc;

use axum::extract::State;
use axum::http::StatusCode;
use axum::Json;
use axum_typed_multipart::TypedMultipart;
use tokio::task::spawn_blocking;

use super::error::{ApiError, Result};
use super::types::*;
use crate::context::AppContext;
use crate::identify::Identification;
use crate::upload;

/// Match an uploaded photo against the gallery.
pub async fn predict_handler(
    State(ctx): State<Arc<AppContext>>,
    TypedMultipart(req): TypedMultipart<PredictRequest>,
) -> Result<Json<PredictResponse>> {
    let file_name = req
        .file
        .metadata
        .file_name
        .clone()
        .unwrap_or_else(|| "upload.jpg".to_string());
    let bytes = req.file.contents;

    let response = spawn_blocking(move || predict(&ctx, &file_name, &bytes))
        .await
        .map_err(ApiError::internal)??;
    Ok(Json(response))
}

fn predict(ctx: &AppContext, file_name: &str, bytes: &[u8]) -> Result<PredictResponse> {
    let artifacts = &ctx.config.artifacts;
    let img = image::load_from_memory(bytes).map_err(|e| {
        ApiError::new(StatusCode::BAD_REQUEST, format!("Cannot decode image: {}", e))
    })?;

    let saved = upload::save_upload(&artifacts.upload_dir, file_name, bytes)?;
    log::info!("received {} ({} bytes)", saved.display(), bytes.len());

    let result = match ctx.identify(&img)? {
        Identification::NoFace => return Err(ApiError::no_face()),
        Identification::Match { result, .. } => result,
    };

    let published = upload::publish_match(&artifacts.static_dir, &result.path)?;
    Ok(PredictResponse {
        match_percentage: result.percentage(),
        name: result.label,
        matched_image_url: format!(
            "{}/static/{}",
            ctx.config.server.public_url.trim_end_matches('/'),
            published
        ),
    })
}

pub async fn health_handler(State(ctx): State<Arc<AppContext>>) -> Json<HealthResponse> {
    Json(HealthResponse {
        gallery_size: ctx.gallery.len(),
        dimension: ctx.gallery.dimension(),
    })
}

use image::DynamicImage;
use serde::Serialize;

use crate::error::IdentifyError;
use crate::gallery::Gallery;
use crate::matcher::{self, MatchResult};
use crate::{BoundingBox, Pipeline};

/// Outcome of running one image through locate, embed and match.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum Identification {
    /// The image holds no detectable face.
    NoFace,
    Match { face: BoundingBox, result: MatchResult },
}

/// Run the full query pipeline. A missing face stops before embedding or
/// matching; an empty gallery or degenerate vector is an error, never a
/// fallback match.
pub fn identify(
    pipeline: &mut Pipeline,
    gallery: &Gallery,
    img: &DynamicImage,
) -> Result<Identification, IdentifyError> {
    let Some((face, embedding)) = pipeline.process_image(img).map_err(IdentifyError::Pipeline)? else {
        log::info!("no face detected");
        return Ok(Identification::NoFace);
    };

    let result = matcher::best_match(&embedding, gallery)?;
    log::info!(
        "matched {} ({:.2}%) at gallery index {}",
        result.label,
        result.percentage(),
        result.index
    );
    Ok(Identification::Match { face, result })
}

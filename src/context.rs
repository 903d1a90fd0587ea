use std::sync::{Mutex, PoisonError};

use anyhow::{Context, Result};
use image::DynamicImage;

use crate::config::Config;
use crate::error::{GalleryError, IdentifyError};
use crate::gallery::Gallery;
use crate::identify::{self, Identification};
use crate::{Pipeline, VggFaceExtractor, YuNetLocator};

/// Everything a front-end needs, built once at startup and shared by
/// reference. The models are loaded before any request can be served.
pub struct AppContext {
    pub config: Config,
    pub gallery: Gallery,
    pipeline: Mutex<Pipeline>,
}

impl AppContext {
    pub fn new(config: Config, gallery: Gallery, pipeline: Pipeline) -> Self {
        Self {
            config,
            gallery,
            pipeline: Mutex::new(pipeline),
        }
    }

    /// Load the detector, the embedding model and the gallery named in
    /// `config`. Any of them failing aborts startup.
    pub fn load(config: Config) -> Result<Self> {
        let pipeline = load_pipeline(&config)?;
        let gallery = Gallery::load(&config.artifacts.gallery_file)
            .context("loading gallery (run `celebmatch build` first)")?;
        check_gallery(&config, &gallery)?;

        Ok(Self::new(config, gallery, pipeline))
    }

    pub fn identify(&self, img: &DynamicImage) -> Result<Identification, IdentifyError> {
        let mut pipeline = self.pipeline.lock().unwrap_or_else(PoisonError::into_inner);
        identify::identify(&mut pipeline, &self.gallery, img)
    }
}

/// Refuse a gallery built with a different embedding model than the one
/// configured; every query against it would fail. Unpooled feature maps have
/// no fixed length and are not checked.
pub fn check_gallery(config: &Config, gallery: &Gallery) -> Result<(), GalleryError> {
    let expected = config
        .model
        .base_model
        .output_dim(config.model.include_top, config.model.pooling);
    match (expected, gallery.dimension()) {
        (Some(expected), Some(found)) if expected != found => {
            Err(GalleryError::IncompatibleModel { expected, found })
        }
        _ => Ok(()),
    }
}

/// Detector plus embedding model, as configured.
pub fn load_pipeline(config: &Config) -> Result<Pipeline> {
    let locator = YuNetLocator::load(
        &config.detector.model_path,
        config.detector.score_threshold,
        config.detector.nms_threshold,
        config.detector.policy,
    )?;
    let extractor = VggFaceExtractor::load(config.model.clone())?;
    Ok(Pipeline::new(locator, extractor))
}

use std::path::Path;

use anyhow::{Context, Result};
use image::{DynamicImage, GenericImageView};
use ort::session::Session;
use serde::{Deserialize, Serialize};

use crate::face::{self, BoundingBox, Detection};
use crate::model::{self, ModelKind, VisionError};

/// Finds the face to match in a raw image.
///
/// `Ok(None)` means the image holds no detectable face. That is an expected
/// outcome, not a fault; `Err` is reserved for genuine failures.
pub trait FaceLocator {
    fn locate(&mut self, img: &DynamicImage) -> Result<Option<BoundingBox>>;
}

/// Which detection to keep when the detector reports several faces.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SelectionPolicy {
    /// The first face in detector order.
    #[default]
    First,
    /// The face with the highest detector score.
    MostConfident,
}

impl SelectionPolicy {
    pub fn select<'a>(&self, detections: &'a [Detection]) -> Option<&'a Detection> {
        match self {
            SelectionPolicy::First => detections.first(),
            SelectionPolicy::MostConfident => detections
                .iter()
                .reduce(|best, d| if d.score > best.score { d } else { best }),
        }
    }
}

pub struct YuNetLocator {
    session: Session,
    pub score_threshold: f32,
    pub nms_threshold: f32,
    pub policy: SelectionPolicy,
}

impl YuNetLocator {
    pub fn load(
        path: &Path,
        score_threshold: f32,
        nms_threshold: f32,
        policy: SelectionPolicy,
    ) -> Result<Self, VisionError> {
        Ok(Self {
            session: model::load_session(ModelKind::Detector, path)?,
            score_threshold,
            nms_threshold,
            policy,
        })
    }
}

impl FaceLocator for YuNetLocator {
    fn locate(&mut self, img: &DynamicImage) -> Result<Option<BoundingBox>> {
        let mut detections = face::detect_faces(
            &mut self.session,
            img,
            self.score_threshold,
            self.nms_threshold,
        )
        .context("detecting faces")?;

        let (w, h) = img.dimensions();
        detections.retain(|d| BoundingBox::from_detection(d, w, h).is_some());
        let picked = self
            .policy
            .select(&detections)
            .and_then(|d| BoundingBox::from_detection(d, w, h));

        match &picked {
            Some(b) => log::debug!(
                "{} face(s) detected, using {}x{} at ({}, {})",
                detections.len(),
                b.width,
                b.height,
                b.x,
                b.y
            ),
            None => log::debug!("no face detected"),
        }
        Ok(picked)
    }
}

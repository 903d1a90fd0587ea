use anyhow::{Context, Result};
use image::DynamicImage;

use crate::extractor::{Embedding, EmbeddingExtractor};
use crate::face::{self, BoundingBox};
use crate::locator::FaceLocator;

/// Query-time pipeline: locate the face, crop it, embed the crop.
pub struct Pipeline {
    pub locator: Box<dyn FaceLocator + Send>,
    pub extractor: Box<dyn EmbeddingExtractor + Send>,
}

impl Pipeline {
    pub fn new(
        locator: impl FaceLocator + Send + 'static,
        extractor: impl EmbeddingExtractor + Send + 'static,
    ) -> Self {
        Self {
            locator: Box::new(locator),
            extractor: Box::new(extractor),
        }
    }

    /// Returns `None` when no face is found; the extractor is not run then.
    pub fn process_image(&mut self, img: &DynamicImage) -> Result<Option<(BoundingBox, Embedding)>> {
        let Some(bbox) = self.locator.locate(img).context("locating face")? else {
            return Ok(None);
        };

        let crop = face::crop(img, &bbox);
        let embedding = self.extractor.embed(&crop).context("encoding face")?;
        Ok(Some((bbox, embedding)))
    }

    /// Embed the whole image without localisation.
    pub fn embed_whole(&mut self, img: &DynamicImage) -> Result<Embedding> {
        self.extractor.embed(img).context("encoding image")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    struct FixedLocator(Option<BoundingBox>);

    impl FaceLocator for FixedLocator {
        fn locate(&mut self, _img: &DynamicImage) -> Result<Option<BoundingBox>> {
            Ok(self.0)
        }
    }

    /// Embeds a crop as its (width, height) and counts calls.
    struct SizeExtractor(Arc<AtomicUsize>);

    impl EmbeddingExtractor for SizeExtractor {
        fn embed(&mut self, face: &DynamicImage) -> Result<Embedding> {
            self.0.fetch_add(1, Ordering::SeqCst);
            Ok(Embedding::from_vec(vec![face.width() as f32, face.height() as f32]))
        }
    }

    #[test]
    fn test_no_face_skips_extractor() {
        let calls = Arc::new(AtomicUsize::new(0));
        let mut pipeline = Pipeline::new(FixedLocator(None), SizeExtractor(calls.clone()));

        let out = pipeline.process_image(&DynamicImage::new_rgb8(32, 32)).unwrap();
        assert!(out.is_none());
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_embeds_the_crop() {
        let calls = Arc::new(AtomicUsize::new(0));
        let bbox = BoundingBox {
            x: 4,
            y: 2,
            width: 10,
            height: 6,
        };
        let mut pipeline = Pipeline::new(FixedLocator(Some(bbox)), SizeExtractor(calls.clone()));

        let (found, emb) = pipeline
            .process_image(&DynamicImage::new_rgb8(32, 32))
            .unwrap()
            .unwrap();
        assert_eq!(found, bbox);
        assert_eq!(emb.vector.to_vec(), vec![10.0, 6.0]);

        let whole = pipeline.embed_whole(&DynamicImage::new_rgb8(32, 20)).unwrap();
        assert_eq!(whole.vector.to_vec(), vec![32.0, 20.0]);
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }
}

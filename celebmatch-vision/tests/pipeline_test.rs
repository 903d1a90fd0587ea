use std::path::Path;

use anyhow::Result;
use celebmatch_vision::extractor::ModelParams;
use celebmatch_vision::{
    EmbeddingExtractor, FaceLocator, Pipeline, SelectionPolicy, VggFaceExtractor, YuNetLocator,
};
use image::{DynamicImage, Rgb, RgbImage};

const DETECTOR: &str = "../models/face_detection_yunet_2023mar.onnx";
const EMBEDDER: &str = "../models/vggface_resnet50.onnx";

fn models_present() -> bool {
    for path in [DETECTOR, EMBEDDER] {
        if !Path::new(path).exists() {
            println!("⊘ Skipping: {} not found", path);
            return false;
        }
    }
    true
}

fn extractor() -> Result<VggFaceExtractor> {
    Ok(VggFaceExtractor::load(ModelParams {
        model_path: EMBEDDER.into(),
        ..ModelParams::default()
    })?)
}

fn gradient() -> DynamicImage {
    DynamicImage::ImageRgb8(RgbImage::from_fn(300, 240, |x, y| {
        Rgb([(x % 256) as u8, (y % 256) as u8, ((x + y) % 256) as u8])
    }))
}

#[test]
fn test_embedding_is_deterministic() -> Result<()> {
    env_logger::try_init().ok();
    if !models_present() {
        return Ok(());
    }
    let mut extractor = extractor()?;
    let img = gradient();

    let first = extractor.embed(&img)?;
    let second = extractor.embed(&img)?;
    assert_eq!(first.len(), 2048);
    assert_eq!(first, second);
    assert!(first.norm() > 0.0);
    println!("✓ {}-d embedding, norm {:.3}", first.len(), first.norm());
    Ok(())
}

#[test]
fn test_blank_image_has_no_face() -> Result<()> {
    env_logger::try_init().ok();
    if !models_present() {
        return Ok(());
    }
    let mut locator = YuNetLocator::load(Path::new(DETECTOR), 0.6, 0.3, SelectionPolicy::First)?;
    let blank = DynamicImage::ImageRgb8(RgbImage::from_pixel(320, 240, Rgb([128, 128, 128])));
    assert_eq!(locator.locate(&blank)?, None);

    let mut pipeline = Pipeline::new(locator, extractor()?);
    assert!(pipeline.process_image(&blank)?.is_none());
    println!("✓ No face reported for a flat grey frame");
    Ok(())
}

#[test]
fn test_face_photos_if_available() -> Result<()> {
    env_logger::try_init().ok();
    let dir = Path::new("../test_faces");
    if !models_present() || !dir.is_dir() {
        println!("⊘ Skipping: no sample faces");
        return Ok(());
    }
    let mut pipeline = Pipeline::new(
        YuNetLocator::load(Path::new(DETECTOR), 0.6, 0.3, SelectionPolicy::First)?,
        extractor()?,
    );

    for entry in std::fs::read_dir(dir)? {
        let path = entry?.path();
        let Ok(img) = image::open(&path) else {
            continue;
        };
        match pipeline.process_image(&img)? {
            Some((bbox, embedding)) => {
                assert!(bbox.x + bbox.width <= img.width());
                assert!(bbox.y + bbox.height <= img.height());
                assert_eq!(embedding.len(), 2048);
                println!("✓ {}: face at {:?}", path.display(), bbox);
            }
            None => println!("  {}: no face", path.display()),
        }
    }
    Ok(())
}

use crate::yunet;
use anyhow::Result;
use image::{DynamicImage, GenericImageView};
use ndarray::Array4;
use ort::{session::Session, value::Value};
use serde::{Deserialize, Serialize};

/// YuNet runs on a fixed square input.
const DETECTOR_INPUT: u32 = 640;

/// Raw detector output mapped back into source-image pixels.
#[derive(Debug, Clone)]
pub struct Detection {
    pub bbox: [f32; 4], // x, y, w, h
    pub score: f32,
    pub landmarks: [f32; 10], // 5 points: x1,y1,x2,y2,...,x5,y5
}

/// Integer face box in source-image pixels. `width` and `height` are never zero.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BoundingBox {
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
}

impl BoundingBox {
    /// Round a detection to whole pixels and clip it to the image. Boxes that
    /// lie entirely outside the image collapse to `None`.
    pub fn from_detection(det: &Detection, image_width: u32, image_height: u32) -> Option<Self> {
        let [x, y, w, h] = det.bbox;
        if !(x.is_finite() && y.is_finite() && w.is_finite() && h.is_finite()) {
            return None;
        }

        let clip = |v: f32, max: u32| v.round().clamp(0.0, max as f32) as u32;
        let x0 = clip(x, image_width);
        let y0 = clip(y, image_height);
        let x1 = clip(x + w, image_width);
        let y1 = clip(y + h, image_height);

        if x1 <= x0 || y1 <= y0 {
            return None;
        }

        Some(Self {
            x: x0,
            y: y0,
            width: x1 - x0,
            height: y1 - y0,
        })
    }

    pub fn area(&self) -> u64 {
        self.width as u64 * self.height as u64
    }
}

/// Cut the face region out of the source image.
pub fn crop(img: &DynamicImage, bbox: &BoundingBox) -> DynamicImage {
    img.crop_imm(bbox.x, bbox.y, bbox.width, bbox.height)
}

/// Source image letterboxed onto the detector canvas.
struct Letterbox {
    tensor: Array4<f32>,
    scale: f32,
    offset_x: f32,
    offset_y: f32,
}

impl Letterbox {
    fn new(img: &DynamicImage) -> Result<Self> {
        let (width, height) = img.dimensions();
        if width == 0 || height == 0 {
            anyhow::bail!("cannot detect faces in an empty image");
        }

        let scale = DETECTOR_INPUT as f32 / width.max(height) as f32;
        let fit_w = ((width as f32 * scale) as u32).clamp(1, DETECTOR_INPUT);
        let fit_h = ((height as f32 * scale) as u32).clamp(1, DETECTOR_INPUT);
        let resized = img.resize_exact(fit_w, fit_h, image::imageops::FilterType::Triangle);

        let offset_x = (DETECTOR_INPUT - fit_w) / 2;
        let offset_y = (DETECTOR_INPUT - fit_h) / 2;
        let mut canvas = DynamicImage::new_rgb8(DETECTOR_INPUT, DETECTOR_INPUT);
        image::imageops::overlay(&mut canvas, &resized, offset_x as i64, offset_y as i64);

        // planar BGR, raw 0..255
        let side = DETECTOR_INPUT as usize;
        let mut tensor = Array4::<f32>::zeros((1, 3, side, side));
        for (x, y, px) in canvas.to_rgb8().enumerate_pixels() {
            let (x, y) = (x as usize, y as usize);
            tensor[[0, 0, y, x]] = px[2] as f32;
            tensor[[0, 1, y, x]] = px[1] as f32;
            tensor[[0, 2, y, x]] = px[0] as f32;
        }

        Ok(Self {
            tensor,
            scale,
            offset_x: offset_x as f32,
            offset_y: offset_y as f32,
        })
    }

    /// Map a normalised canvas coordinate back to source pixels.
    fn unmap_x(&self, v: f32) -> f32 {
        (v * DETECTOR_INPUT as f32 - self.offset_x) / self.scale
    }

    fn unmap_y(&self, v: f32) -> f32 {
        (v * DETECTOR_INPUT as f32 - self.offset_y) / self.scale
    }

    fn unmap_len(&self, v: f32) -> f32 {
        v * DETECTOR_INPUT as f32 / self.scale
    }
}

/// Detect faces with YuNet. Results keep the detector's own emission order
/// (stride 8 grid first, row-major), with overlapping boxes suppressed.
pub fn detect_faces(
    session: &mut Session,
    img: &DynamicImage,
    score_threshold: f32,
    nms_threshold: f32,
) -> Result<Vec<Detection>> {
    let letterbox = Letterbox::new(img)?;
    let input = Value::from_array(letterbox.tensor.clone())?;
    let outputs = session.run(ort::inputs![input])?;

    let mut heads: Vec<(Vec<i64>, Vec<f32>)> = Vec::with_capacity(12);
    for (_name, output) in outputs.iter() {
        let (shape, data) = output.try_extract_tensor::<f32>()?;
        heads.push((shape.iter().copied().collect(), data.to_vec()));
    }

    let decoder = yunet::Decoder::new(DETECTOR_INPUT as usize);
    let raw = decoder.decode(&heads, score_threshold)?;
    log::debug!("yunet produced {} candidates", raw.len());

    let detections: Vec<Detection> = raw
        .into_iter()
        .map(|d| {
            let mut landmarks = [0.0f32; 10];
            for (i, v) in d.landmarks.iter().enumerate() {
                landmarks[i] = if i % 2 == 0 {
                    letterbox.unmap_x(*v)
                } else {
                    letterbox.unmap_y(*v)
                };
            }
            Detection {
                bbox: [
                    letterbox.unmap_x(d.bbox[0]),
                    letterbox.unmap_y(d.bbox[1]),
                    letterbox.unmap_len(d.bbox[2]),
                    letterbox.unmap_len(d.bbox[3]),
                ],
                score: d.score,
                landmarks,
            }
        })
        .collect();

    if nms_threshold < 1.0 {
        Ok(nms(&detections, nms_threshold))
    } else {
        Ok(detections)
    }
}

/// Non-maximum suppression. Stronger boxes suppress weaker overlapping ones;
/// survivors are returned in their input order.
pub fn nms(detections: &[Detection], iou_threshold: f32) -> Vec<Detection> {
    let mut by_score: Vec<usize> = (0..detections.len()).collect();
    by_score.sort_by(|&a, &b| detections[b].score.total_cmp(&detections[a].score));

    let mut keep = vec![false; detections.len()];
    let mut suppressed = vec![false; detections.len()];

    for (rank, &i) in by_score.iter().enumerate() {
        if suppressed[i] {
            continue;
        }
        keep[i] = true;
        for &j in &by_score[rank + 1..] {
            if !suppressed[j] && compute_iou(&detections[i].bbox, &detections[j].bbox) > iou_threshold
            {
                suppressed[j] = true;
            }
        }
    }

    detections
        .iter()
        .zip(keep)
        .filter_map(|(d, k)| k.then(|| d.clone()))
        .collect()
}

fn compute_iou(a: &[f32; 4], b: &[f32; 4]) -> f32 {
    let x1 = a[0].max(b[0]);
    let y1 = a[1].max(b[1]);
    let x2 = (a[0] + a[2]).min(b[0] + b[2]);
    let y2 = (a[1] + a[3]).min(b[1] + b[3]);

    if x2 <= x1 || y2 <= y1 {
        return 0.0;
    }

    let inter = (x2 - x1) * (y2 - y1);
    inter / (a[2] * a[3] + b[2] * b[3] - inter)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn det(bbox: [f32; 4], score: f32) -> Detection {
        Detection {
            bbox,
            score,
            landmarks: [0.0; 10],
        }
    }

    #[test]
    fn test_iou() {
        let a = [10.0, 10.0, 20.0, 20.0];
        let b = [15.0, 15.0, 20.0, 20.0];
        let iou = compute_iou(&a, &b);
        assert!(iou > 0.0 && iou < 1.0);

        let c = [100.0, 100.0, 10.0, 10.0];
        assert_eq!(compute_iou(&a, &c), 0.0);
        assert!((compute_iou(&a, &a) - 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_nms_keeps_input_order() {
        let detections = vec![
            det([100.0, 100.0, 20.0, 20.0], 0.7),
            det([10.0, 10.0, 20.0, 20.0], 0.8),
            det([12.0, 12.0, 20.0, 20.0], 0.9),
        ];

        let kept = nms(&detections, 0.3);
        assert_eq!(kept.len(), 2);
        // the 0.9 box wins its cluster, but the unrelated 0.7 box stays first
        assert_eq!(kept[0].score, 0.7);
        assert_eq!(kept[1].score, 0.9);
    }

    #[test]
    fn test_bbox_clamps_to_image() {
        let b = BoundingBox::from_detection(&det([-5.4, 3.6, 50.0, 200.0], 0.9), 40, 100).unwrap();
        assert_eq!(
            b,
            BoundingBox {
                x: 0,
                y: 4,
                width: 40,
                height: 96
            }
        );
    }

    #[test]
    fn test_bbox_outside_image_is_none() {
        assert!(BoundingBox::from_detection(&det([120.0, 10.0, 30.0, 30.0], 0.9), 100, 100).is_none());
        assert!(BoundingBox::from_detection(&det([f32::NAN, 0.0, 3.0, 3.0], 0.9), 100, 100).is_none());
    }

    #[test]
    fn test_crop_dimensions() {
        let img = DynamicImage::new_rgb8(64, 48);
        let face = crop(
            &img,
            &BoundingBox {
                x: 8,
                y: 4,
                width: 20,
                height: 30,
            },
        );
        assert_eq!(face.dimensions(), (20, 30));
    }
}

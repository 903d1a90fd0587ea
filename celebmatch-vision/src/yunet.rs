//! YuNet output decoding.
//!
//! The 2023 YuNet export emits twelve tensors, four heads for each of the
//! strides 8, 16 and 32, in the order `cls_*`, `obj_*`, `bbox_*`, `kps_*`:
//!
//! - cls / obj: `[1, H*W, 1]`, already passed through a sigmoid
//! - bbox: `[1, H*W, 4]` as (dx, dy, log w, log h) in stride units
//! - kps: `[1, H*W, 10]` as five (dx, dy) landmark offsets in stride units
//!
//! Decoding is anchor-free: every grid cell proposes one face centred at
//! `(col + dx, row + dy) * stride`.

use anyhow::Result;

const STRIDES: [usize; 3] = [8, 16, 32];

/// A decoded candidate, coordinates normalised to the square input.
#[derive(Debug, Clone)]
pub struct RawDetection {
    pub bbox: [f32; 4], // x, y, w, h
    pub score: f32,
    pub landmarks: [f32; 10],
}

/// Per-stride views into the flat head buffers.
struct Level<'a> {
    stride: usize,
    cells: usize,
    cls: &'a [f32],
    obj: &'a [f32],
    bbox: &'a [f32],
    kps: &'a [f32],
}

pub struct Decoder {
    input_size: usize,
}

impl Decoder {
    pub fn new(input_size: usize) -> Self {
        Self { input_size }
    }

    fn cells(&self, stride: usize) -> usize {
        let side = self.input_size / stride;
        side * side
    }

    /// Check one head's shape and return its data.
    fn head<'a>(
        &self,
        heads: &'a [(Vec<i64>, Vec<f32>)],
        index: usize,
        width: usize,
        name: &str,
    ) -> Result<&'a [f32]> {
        let (shape, data) = heads
            .get(index)
            .ok_or_else(|| anyhow::anyhow!("missing {} head at output {}", name, index))?;
        let cells = self.cells(STRIDES[index % 3]);
        let expected = [1, cells as i64, width as i64];
        if shape.as_slice() != expected {
            anyhow::bail!(
                "unexpected {} shape at output {}: {:?}, expected {:?}",
                name,
                index,
                shape,
                expected
            );
        }
        if data.len() != cells * width {
            anyhow::bail!("{} head at output {} has {} values", name, index, data.len());
        }
        Ok(data)
    }

    fn levels<'a>(&self, heads: &'a [(Vec<i64>, Vec<f32>)]) -> Result<Vec<Level<'a>>> {
        if heads.len() != 12 {
            anyhow::bail!("yunet should emit 12 outputs, got {}", heads.len());
        }
        STRIDES
            .iter()
            .enumerate()
            .map(|(i, &stride)| {
                Ok(Level {
                    stride,
                    cells: self.cells(stride),
                    cls: self.head(heads, i, 1, "cls")?,
                    obj: self.head(heads, i + 3, 1, "obj")?,
                    bbox: self.head(heads, i + 6, 4, "bbox")?,
                    kps: self.head(heads, i + 9, 10, "kps")?,
                })
            })
            .collect()
    }

    /// Decode every grid cell whose score reaches `score_threshold`.
    pub fn decode(
        &self,
        heads: &[(Vec<i64>, Vec<f32>)],
        score_threshold: f32,
    ) -> Result<Vec<RawDetection>> {
        let size = self.input_size as f32;
        let mut out = Vec::new();

        for level in self.levels(heads)? {
            let side = self.input_size / level.stride;
            let stride = level.stride as f32;

            for idx in 0..level.cells {
                let score = face_score(level.cls[idx], level.obj[idx]);
                if score < score_threshold {
                    continue;
                }

                let row = (idx / side) as f32;
                let col = (idx % side) as f32;
                let b = &level.bbox[idx * 4..idx * 4 + 4];

                let cx = (col + b[0]) * stride;
                let cy = (row + b[1]) * stride;
                let w = b[2].exp() * stride;
                let h = b[3].exp() * stride;

                let mut landmarks = [0.0f32; 10];
                let k = &level.kps[idx * 10..idx * 10 + 10];
                for p in 0..5 {
                    landmarks[p * 2] = (col + k[p * 2]) * stride / size;
                    landmarks[p * 2 + 1] = (row + k[p * 2 + 1]) * stride / size;
                }

                out.push(RawDetection {
                    bbox: [
                        (cx - w / 2.0) / size,
                        (cy - h / 2.0) / size,
                        w / size,
                        h / size,
                    ],
                    score,
                    landmarks,
                });
            }
        }

        Ok(out)
    }
}

/// Geometric mean of the class and objectness probabilities.
pub fn face_score(cls: f32, obj: f32) -> f32 {
    (cls.clamp(0.0, 1.0) * obj.clamp(0.0, 1.0)).sqrt()
}

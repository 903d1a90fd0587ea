use std::path::PathBuf;

use anyhow::{Context, Result};
use image::DynamicImage;
use ndarray::{Array1, Array4};
use ort::{session::Session, value::Value};
use serde::{Deserialize, Serialize};

use crate::model::{self, ModelKind, VisionError};

/// Side length the embedding network expects.
pub const INPUT_SIZE: u32 = 224;

/// Fixed-length identity vector produced by the embedding network.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Embedding {
    pub vector: Array1<f32>,
}

impl Embedding {
    pub fn from_vec(values: Vec<f32>) -> Self {
        Self {
            vector: Array1::from_vec(values),
        }
    }

    pub fn len(&self) -> usize {
        self.vector.len()
    }

    pub fn is_empty(&self) -> bool {
        self.vector.is_empty()
    }

    pub fn dot(&self, other: &Embedding) -> f32 {
        self.vector.dot(&other.vector)
    }

    pub fn norm(&self) -> f32 {
        self.dot(self).sqrt()
    }
}

/// Turns a face crop into an embedding.
pub trait EmbeddingExtractor {
    fn embed(&mut self, face: &DynamicImage) -> Result<Embedding>;
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BaseModel {
    #[default]
    Vgg16,
    Resnet50,
    Senet50,
}

impl BaseModel {
    /// Length of the vector the network emits for a given head configuration.
    pub fn output_dim(&self, include_top: bool, pooling: Pooling) -> Option<usize> {
        match (self, include_top, pooling) {
            (BaseModel::Vgg16, true, _) => Some(2622),
            (_, true, _) => Some(8631),
            (_, false, Pooling::None) => None,
            (BaseModel::Vgg16, false, _) => Some(512),
            (_, false, _) => Some(2048),
        }
    }

    pub fn default_normalization(&self) -> Normalization {
        match self {
            BaseModel::Vgg16 => Normalization::V1,
            BaseModel::Resnet50 | BaseModel::Senet50 => Normalization::V2,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Pooling {
    #[default]
    Avg,
    Max,
    None,
}

/// VGGFace mean-subtraction conventions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Normalization {
    V1,
    V2,
}

impl Normalization {
    /// Per-channel means in B, G, R order.
    pub fn bgr_means(&self) -> [f32; 3] {
        match self {
            Normalization::V1 => [93.5940, 104.7624, 129.1863],
            Normalization::V2 => [91.4953, 103.8827, 131.0912],
        }
    }
}

/// Tensor layout of the exported network, for both input and feature maps.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Layout {
    #[default]
    Nhwc,
    Nchw,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ModelParams {
    pub model_path: PathBuf,
    pub base_model: BaseModel,
    pub include_top: bool,
    pub pooling: Pooling,
    /// Defaults to the convention matching `base_model`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub normalization: Option<Normalization>,
    pub layout: Layout,
}

impl Default for ModelParams {
    fn default() -> Self {
        Self {
            model_path: PathBuf::from("models/vggface_resnet50.onnx"),
            base_model: BaseModel::Resnet50,
            include_top: false,
            pooling: Pooling::Avg,
            normalization: None,
            layout: Layout::Nhwc,
        }
    }
}

impl ModelParams {
    pub fn normalization(&self) -> Normalization {
        self.normalization
            .unwrap_or_else(|| self.base_model.default_normalization())
    }
}

/// Resize to 224x224, swap to BGR, subtract the channel means and wrap the
/// result as a single-image batch.
pub fn preprocess(face: &DynamicImage, norm: Normalization, layout: Layout) -> Array4<f32> {
    let rgb = face
        .resize_exact(INPUT_SIZE, INPUT_SIZE, image::imageops::FilterType::Triangle)
        .to_rgb8();
    let side = INPUT_SIZE as usize;
    let means = norm.bgr_means();

    let mut tensor = match layout {
        Layout::Nhwc => Array4::<f32>::zeros((1, side, side, 3)),
        Layout::Nchw => Array4::<f32>::zeros((1, 3, side, side)),
    };

    for (x, y, px) in rgb.enumerate_pixels() {
        let (x, y) = (x as usize, y as usize);
        let bgr = [px[2], px[1], px[0]];
        for c in 0..3 {
            let v = bgr[c] as f32 - means[c];
            match layout {
                Layout::Nhwc => tensor[[0, y, x, c]] = v,
                Layout::Nchw => tensor[[0, c, y, x]] = v,
            }
        }
    }

    tensor
}

/// Reduce the network output to a 1-D vector. Rank-4 feature maps are
/// globally pooled when a pooling mode is set; everything else is flattened.
pub fn postprocess(shape: &[i64], data: &[f32], pooling: Pooling, layout: Layout) -> Result<Embedding> {
    if data.is_empty() {
        anyhow::bail!("embedding model produced an empty output");
    }
    // a rank-1 output is already the vector, with no batch axis
    if shape.len() >= 2 && shape[0] != 1 {
        anyhow::bail!("expected a single-image batch, got output shape {:?}", shape);
    }

    if shape.len() != 4 || pooling == Pooling::None {
        return Ok(Embedding::from_vec(data.to_vec()));
    }

    let (channels, spatial) = match layout {
        Layout::Nhwc => (shape[3] as usize, (shape[1] * shape[2]) as usize),
        Layout::Nchw => (shape[1] as usize, (shape[2] * shape[3]) as usize),
    };
    if channels * spatial != data.len() || spatial == 0 {
        anyhow::bail!("output shape {:?} does not match {} values", shape, data.len());
    }

    let at = |s: usize, c: usize| match layout {
        Layout::Nhwc => data[s * channels + c],
        Layout::Nchw => data[c * spatial + s],
    };

    let pooled = (0..channels)
        .map(|c| {
            let cells = (0..spatial).map(|s| at(s, c));
            match pooling {
                Pooling::Max => cells.fold(f32::NEG_INFINITY, f32::max),
                _ => cells.sum::<f32>() / spatial as f32,
            }
        })
        .collect();

    Ok(Embedding::from_vec(pooled))
}

/// VGGFace network exported to ONNX.
pub struct VggFaceExtractor {
    session: Session,
    params: ModelParams,
}

impl VggFaceExtractor {
    pub fn load(params: ModelParams) -> Result<Self, VisionError> {
        let session = model::load_session(ModelKind::Embedding, &params.model_path)?;
        log::info!(
            "embedding model {:?} (include_top={}, pooling={:?}, normalization={:?})",
            params.base_model,
            params.include_top,
            params.pooling,
            params.normalization()
        );
        Ok(Self { session, params })
    }

    pub fn params(&self) -> &ModelParams {
        &self.params
    }
}

impl EmbeddingExtractor for VggFaceExtractor {
    fn embed(&mut self, face: &DynamicImage) -> Result<Embedding> {
        let input = preprocess(face, self.params.normalization(), self.params.layout);
        let input = Value::from_array(input)?;
        let outputs = self
            .session
            .run(ort::inputs![input])
            .context("running embedding model")?;

        let (shape, data) = outputs[0].try_extract_tensor::<f32>()?;
        let shape: Vec<i64> = shape.iter().copied().collect();
        let embedding = postprocess(&shape, data, self.params.pooling, self.params.layout)?;

        if let Some(dim) = self
            .params
            .base_model
            .output_dim(self.params.include_top, self.params.pooling)
        {
            if embedding.len() != dim {
                anyhow::bail!(
                    "{:?} should produce {} values, model returned {}",
                    self.params.base_model,
                    dim,
                    embedding.len()
                );
            }
        }

        Ok(embedding)
    }
}

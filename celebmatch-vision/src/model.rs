use std::fmt;
use std::path::{Path, PathBuf};

use anyhow::Result;
use ort::{
    ep::{self, ExecutionProvider},
    session::{
        builder::{GraphOptimizationLevel, SessionBuilder},
        Session,
    },
};
use thiserror::Error;

/// Which of the two pretrained networks a session belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ModelKind {
    Detector,
    Embedding,
}

impl fmt::Display for ModelKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ModelKind::Detector => f.write_str("face detector"),
            ModelKind::Embedding => f.write_str("embedding model"),
        }
    }
}

#[derive(Debug, Error)]
pub enum VisionError {
    #[error("{model} unavailable at {}: {reason}", path.display())]
    ModelUnavailable {
        model: ModelKind,
        path: PathBuf,
        reason: String,
    },
}

pub fn session_builder() -> Result<SessionBuilder> {
    #[allow(unused_mut)]
    let mut builder =
        Session::builder()?.with_optimization_level(GraphOptimizationLevel::Level3)?;

    #[cfg(feature = "openvino")]
    {
        let ep = ep::OpenVINO::default();
        if ep.is_available()? {
            ep.register(&mut builder)?;
        } else {
            log::warn!("openvino feature is enabled, onnx runtime not compiled with openvino")
        }
    }

    #[cfg(feature = "cuda")]
    {
        let ep = ep::CUDA::default();
        if ep.is_available()? {
            ep.register(&mut builder)?;
        } else {
            log::warn!("cuda feature is enabled, onnx runtime not compiled with cuda")
        }
    }

    Ok(builder)
}

/// Load an ONNX model from disk. Any failure is reported as `ModelUnavailable`
/// so callers can refuse to start instead of serving half-initialised.
pub fn load_session(kind: ModelKind, path: &Path) -> Result<Session, VisionError> {
    let unavailable = |reason: String| VisionError::ModelUnavailable {
        model: kind,
        path: path.to_path_buf(),
        reason,
    };

    if !path.exists() {
        return Err(unavailable("file not found".to_string()));
    }

    let session = session_builder()
        .map_err(|e| unavailable(e.to_string()))?
        .commit_from_file(path)
        .map_err(|e| unavailable(e.to_string()))?;

    log::info!("loaded {} from {}", kind, path.display());
    Ok(session)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_model_is_unavailable() {
        let err = load_session(ModelKind::Embedding, Path::new("/nonexistent/vggface.onnx"))
            .unwrap_err();
        let VisionError::ModelUnavailable { model, path, .. } = &err;
        assert_eq!(*model, ModelKind::Embedding);
        assert_eq!(path, Path::new("/nonexistent/vggface.onnx"));
        assert!(err.to_string().contains("embedding model unavailable"));
    }
}

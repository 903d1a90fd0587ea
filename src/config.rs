use anyhow::{Context, Result};
use celebmatch_vision::{ModelParams, SelectionPolicy};
use once_cell::sync::Lazy;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

pub static CONFIG_PATH: Lazy<&'static Path> = Lazy::new(|| {
    Path::new(option_env!("CELEBMATCH_CONFIG_PATH").unwrap_or("config/celebmatch.toml"))
});

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub camera: String,
    /// Run face localisation on gallery images before embedding them.
    pub locate_faces_on_build: bool,
    pub artifacts: Artifacts,
    pub model: ModelParams,
    pub detector: DetectorConfig,
    pub server: ServerConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            camera: "/dev/video0".to_string(),
            locate_faces_on_build: false,
            artifacts: Artifacts::default(),
            model: ModelParams::default(),
            detector: DetectorConfig::default(),
            server: ServerConfig::default(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Artifacts {
    /// Postcard-encoded list of (path, embedding) pairs.
    pub gallery_file: PathBuf,
    pub upload_dir: PathBuf,
    pub static_dir: PathBuf,
}

impl Default for Artifacts {
    fn default() -> Self {
        Self {
            gallery_file: PathBuf::from("artifacts/gallery/gallery.bin"),
            upload_dir: PathBuf::from("artifacts/uploads"),
            static_dir: PathBuf::from("static"),
        }
    }
}

impl Artifacts {
    /// Failed gallery paths are listed next to the gallery file.
    pub fn failures_file(&self) -> PathBuf {
        self.gallery_file.with_file_name("failed_files.txt")
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DetectorConfig {
    pub model_path: PathBuf,
    pub score_threshold: f32,
    pub nms_threshold: f32,
    pub policy: SelectionPolicy,
}

impl Default for DetectorConfig {
    fn default() -> Self {
        Self {
            model_path: PathBuf::from("models/face_detection_yunet_2023mar.onnx"),
            score_threshold: 0.6,
            nms_threshold: 0.3,
            policy: SelectionPolicy::First,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub addr: String,
    /// Prefix for the matched-image URLs handed back to clients.
    pub public_url: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            addr: "127.0.0.1:8000".to_string(),
            public_url: "http://127.0.0.1:8000".to_string(),
        }
    }
}

pub fn load_config(path: Option<&Path>) -> Result<Config> {
    let path = path.unwrap_or(&CONFIG_PATH);
    if !path.exists() {
        log::debug!("no config at {}, using defaults", path.display());
        return Ok(Config::default());
    }
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("reading config at {}", path.display()))?;
    toml::from_str(&raw).with_context(|| format!("parsing config {}", path.display()))
}

pub fn save_config(cfg: &Config, path: Option<&Path>) -> Result<()> {
    let path = path.unwrap_or(&CONFIG_PATH);
    let data = toml::to_string_pretty(cfg)?;
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    std::fs::write(path, data)?;
    Ok(())
}

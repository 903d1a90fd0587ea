//! Offline gallery construction.
//!
//! Every input image is embedded independently. A file that cannot be read,
//! decoded or embedded is recorded and skipped, so one bad image never aborts
//! the batch. Surviving entries keep the relative order of their inputs.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use image::DynamicImage;
use indicatif::{ProgressBar, ProgressStyle};
use walkdir::WalkDir;

use crate::error::{BuildError, FailureReason};
use crate::gallery::{Gallery, GalleryEntry};
use crate::{Embedding, EmbeddingExtractor, Pipeline};

const IMAGE_EXTENSIONS: [&str; 5] = ["jpg", "jpeg", "png", "bmp", "webp"];

#[derive(Debug)]
pub struct BuildFailure {
    pub path: PathBuf,
    pub reason: FailureReason,
}

#[derive(Debug, Default)]
pub struct BuildReport {
    pub entries: Vec<GalleryEntry>,
    pub failures: Vec<BuildFailure>,
}

impl BuildReport {
    pub fn attempted(&self) -> usize {
        self.entries.len() + self.failures.len()
    }

    pub fn into_gallery(self) -> Result<Gallery, BuildError> {
        if self.entries.is_empty() {
            return Err(BuildError::NothingExtracted {
                attempted: self.failures.len(),
            });
        }
        Ok(Gallery::new(self.entries)?)
    }
}

/// Embed each image as a whole, without face localisation.
pub fn build(paths: &[PathBuf], extractor: &mut dyn EmbeddingExtractor) -> BuildReport {
    build_with(paths, |img| {
        extractor.embed(img).map_err(FailureReason::Extraction)
    })
}

/// Locate the face in each image first and embed only the crop, the same
/// way queries are processed.
pub fn build_located(paths: &[PathBuf], pipeline: &mut Pipeline) -> BuildReport {
    build_with(paths, |img| match pipeline.process_image(img) {
        Ok(Some((_, embedding))) => Ok(embedding),
        Ok(None) => Err(FailureReason::NoFace),
        Err(e) => Err(FailureReason::Extraction(e)),
    })
}

fn open_image(path: &Path) -> Result<DynamicImage, FailureReason> {
    image::open(path).map_err(|e| match e {
        image::ImageError::IoError(io) => FailureReason::Io(io),
        other => FailureReason::Decode(other),
    })
}

fn build_with<F>(paths: &[PathBuf], mut embed: F) -> BuildReport
where
    F: FnMut(&DynamicImage) -> Result<Embedding, FailureReason>,
{
    let bar = ProgressBar::new(paths.len() as u64);
    bar.set_style(
        ProgressStyle::with_template("{msg} {wide_bar} {pos}/{len} [{elapsed_precise}<{eta}]")
            .unwrap_or_else(|_| ProgressStyle::default_bar()),
    );
    bar.set_message("Extracting features");

    let mut report = BuildReport::default();
    let mut dimension = None;

    for path in paths {
        let outcome = open_image(path).and_then(|img| embed(&img)).and_then(|e| {
            let expected = *dimension.get_or_insert(e.len());
            if e.len() == expected {
                Ok(e)
            } else {
                Err(FailureReason::ShapeMismatch {
                    expected,
                    found: e.len(),
                })
            }
        });

        match outcome {
            Ok(embedding) => report.entries.push(GalleryEntry::new(path.clone(), embedding)),
            Err(reason) => {
                log::warn!("skipped {}: {}", path.display(), reason);
                report.failures.push(BuildFailure {
                    path: path.clone(),
                    reason,
                });
            }
        }
        bar.inc(1);
    }
    bar.finish_and_clear();

    log::info!(
        "embedded {} of {} gallery images ({} failed)",
        report.entries.len(),
        paths.len(),
        report.failures.len()
    );
    report
}

/// Persist a build: the gallery file, plus `failures_file` listing skipped
/// paths one per line when there are any. Nothing is written if no image
/// produced an embedding.
pub fn write_report(
    report: BuildReport,
    gallery_file: &Path,
    failures_file: &Path,
) -> Result<Gallery, BuildError> {
    let failed: Vec<String> = report
        .failures
        .iter()
        .map(|f| f.path.display().to_string())
        .collect();
    let gallery = report.into_gallery()?;
    gallery.save(gallery_file)?;
    log::info!(
        "saved {} embeddings to {}",
        gallery.len(),
        gallery_file.display()
    );

    let io = |source| BuildError::Io {
        path: failures_file.to_path_buf(),
        source,
    };
    if failed.is_empty() {
        if failures_file.exists() {
            std::fs::remove_file(failures_file).map_err(io)?;
        }
    } else {
        log::warn!(
            "failed to process {} files, listed in {}",
            failed.len(),
            failures_file.display()
        );
        std::fs::write(failures_file, failed.join("\n")).map_err(io)?;
    }
    Ok(gallery)
}

/// One image path per line; blank lines and `#` comments are ignored.
pub fn read_manifest(path: &Path) -> Result<Vec<PathBuf>> {
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("reading manifest {}", path.display()))?;
    Ok(raw
        .lines()
        .map(str::trim)
        .filter(|l| !l.is_empty() && !l.starts_with('#'))
        .map(PathBuf::from)
        .collect())
}

/// Collect every image below `root`, laid out as `<root>/<Person_Name>/<file>`,
/// in sorted path order.
pub fn scan_directory(root: &Path) -> Result<Vec<PathBuf>> {
    let mut paths = Vec::new();
    for entry in WalkDir::new(root).sort_by_file_name() {
        let entry = entry.with_context(|| format!("scanning {}", root.display()))?;
        if !entry.file_type().is_file() {
            continue;
        }
        let is_image = entry
            .path()
            .extension()
            .and_then(|e| e.to_str())
            .is_some_and(|e| IMAGE_EXTENSIONS.contains(&e.to_ascii_lowercase().as_str()));
        if is_image {
            paths.push(entry.into_path());
        }
    }
    log::info!("found {} images under {}", paths.len(), root.display());
    Ok(paths)
}

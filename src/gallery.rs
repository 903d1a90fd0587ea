use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::GalleryError;
use crate::Embedding;

/// One known face: the image it came from and its embedding, kept together
/// so the two can never drift apart.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GalleryEntry {
    pub path: PathBuf,
    pub embedding: Embedding,
}

impl GalleryEntry {
    pub fn new(path: impl Into<PathBuf>, embedding: Embedding) -> Self {
        Self {
            path: path.into(),
            embedding,
        }
    }

    pub fn label(&self) -> String {
        display_name(&self.path)
    }
}

/// Reference collection matched against. Read-only once loaded.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Gallery {
    entries: Vec<GalleryEntry>,
}

impl Gallery {
    /// All entries must share one embedding dimension.
    pub fn new(entries: Vec<GalleryEntry>) -> Result<Self, GalleryError> {
        if let Some(first) = entries.first() {
            let expected = first.embedding.len();
            if let Some((index, e)) = entries
                .iter()
                .enumerate()
                .find(|(_, e)| e.embedding.len() != expected)
            {
                return Err(GalleryError::MixedDimensions {
                    index,
                    expected,
                    found: e.embedding.len(),
                });
            }
        }
        Ok(Self { entries })
    }

    /// Pair up two index-aligned sequences, as older galleries stored them.
    pub fn from_parallel(
        embeddings: Vec<Embedding>,
        paths: Vec<PathBuf>,
    ) -> Result<Self, GalleryError> {
        if embeddings.len() != paths.len() {
            return Err(GalleryError::LengthMismatch {
                embeddings: embeddings.len(),
                paths: paths.len(),
            });
        }
        Self::new(
            paths
                .into_iter()
                .zip(embeddings)
                .map(|(path, embedding)| GalleryEntry { path, embedding })
                .collect(),
        )
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Embedding length, or `None` for an empty gallery.
    pub fn dimension(&self) -> Option<usize> {
        self.entries.first().map(|e| e.embedding.len())
    }

    pub fn get(&self, index: usize) -> Option<&GalleryEntry> {
        self.entries.get(index)
    }

    pub fn iter(&self) -> std::slice::Iter<'_, GalleryEntry> {
        self.entries.iter()
    }

    pub fn entries(&self) -> &[GalleryEntry] {
        &self.entries
    }

    pub fn load(path: &Path) -> Result<Self, GalleryError> {
        let data = std::fs::read(path).map_err(|source| GalleryError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let entries: Vec<GalleryEntry> =
            postcard::from_bytes(&data).map_err(|source| GalleryError::Encoding {
                path: path.to_path_buf(),
                source,
            })?;
        let gallery = Self::new(entries)?;
        log::info!(
            "loaded {} gallery entries from {}",
            gallery.len(),
            path.display()
        );
        Ok(gallery)
    }

    pub fn save(&self, path: &Path) -> Result<(), GalleryError> {
        let io = |source| GalleryError::Io {
            path: path.to_path_buf(),
            source,
        };
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).map_err(io)?;
        }
        let data = postcard::to_allocvec(&self.entries).map_err(|source| GalleryError::Encoding {
            path: path.to_path_buf(),
            source,
        })?;
        std::fs::write(path, data).map_err(io)
    }
}

impl<'a> IntoIterator for &'a Gallery {
    type Item = &'a GalleryEntry;
    type IntoIter = std::slice::Iter<'a, GalleryEntry>;

    fn into_iter(self) -> Self::IntoIter {
        self.entries.iter()
    }
}

/// Human-readable name for a gallery image: its parent directory with
/// underscores turned into spaces, e.g. `data/Tom_Hanks/01.jpg` -> `Tom Hanks`.
pub fn display_name(path: &Path) -> String {
    path.parent()
        .and_then(Path::file_name)
        .map(|n| n.to_string_lossy().replace('_', " "))
        .filter(|n| !n.is_empty())
        .unwrap_or_else(|| "Unknown".to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn emb(v: &[f32]) -> Embedding {
        Embedding::from_vec(v.to_vec())
    }

    #[test]
    fn display_name_from_parent_dir() {
        assert_eq!(display_name(Path::new("data/Amitabh_Bachchan/1.jpg")), "Amitabh Bachchan");
        assert_eq!(display_name(Path::new("/abs/Shah_Rukh_Khan/x.png")), "Shah Rukh Khan");
        assert_eq!(display_name(Path::new("lonely.jpg")), "Unknown");
    }

    #[test]
    fn from_parallel_pairs_by_position() {
        let g = Gallery::from_parallel(
            vec![emb(&[1.0, 0.0]), emb(&[0.0, 1.0])],
            vec![PathBuf::from("a/A/1.jpg"), PathBuf::from("b/B/1.jpg")],
        )
        .unwrap();
        assert_eq!(g.len(), 2);
        assert_eq!(g.dimension(), Some(2));
        assert_eq!(g.get(1).unwrap().label(), "B");
        assert_eq!(g.get(1).unwrap().embedding, emb(&[0.0, 1.0]));
    }

    #[test]
    fn from_parallel_rejects_desynchronised_sequences() {
        // a rebuilt embeddings list that skipped a failure no longer lines up
        // with the full path list
        let err = Gallery::from_parallel(
            vec![emb(&[1.0]), emb(&[2.0])],
            vec!["x/A/1.jpg".into(), "x/B/1.jpg".into(), "x/C/1.jpg".into()],
        )
        .unwrap_err();
        assert!(matches!(
            err,
            GalleryError::LengthMismatch {
                embeddings: 2,
                paths: 3
            }
        ));
    }

    #[test]
    fn rejects_mixed_dimensions() {
        let err = Gallery::new(vec![
            GalleryEntry::new("a/A/1.jpg", emb(&[1.0, 2.0])),
            GalleryEntry::new("a/B/1.jpg", emb(&[1.0, 2.0, 3.0])),
        ])
        .unwrap_err();
        assert!(matches!(
            err,
            GalleryError::MixedDimensions {
                index: 1,
                expected: 2,
                found: 3
            }
        ));
    }

    #[test]
    fn save_and_load_keep_pairs_together() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("gallery/gallery.bin");
        let g = Gallery::new(vec![
            GalleryEntry::new("data/Kajol/1.jpg", emb(&[0.5, -0.25, 3.0])),
            GalleryEntry::new("data/Rani_Mukerji/7.jpg", emb(&[1.0, 0.0, 0.0])),
        ])
        .unwrap();
        g.save(&file).unwrap();

        let loaded = Gallery::load(&file).unwrap();
        assert_eq!(loaded, g);
        assert_eq!(loaded.get(1).unwrap().label(), "Rani Mukerji");
    }

    #[test]
    fn load_missing_and_corrupt_files() {
        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("absent.bin");
        assert!(matches!(Gallery::load(&missing), Err(GalleryError::Io { .. })));

        let corrupt = dir.path().join("corrupt.bin");
        std::fs::write(&corrupt, [0xff, 0xff, 0xff]).unwrap();
        assert!(matches!(Gallery::load(&corrupt), Err(GalleryError::Encoding { .. })));
    }
}

use std::path::{Path, PathBuf};

use crate::error::UploadError;

fn ensure_dir(dir: &Path) -> Result<(), UploadError> {
    std::fs::create_dir_all(dir).map_err(|source| UploadError::CreateDir {
        path: dir.to_path_buf(),
        source,
    })
}

/// Reduce a client-supplied file name to a bare final component.
fn sanitize(name: &str) -> Result<String, UploadError> {
    let last = name
        .rsplit(['/', '\\'])
        .next()
        .unwrap_or_default()
        .trim();
    if last.is_empty() || last == "." || last == ".." {
        return Err(UploadError::InvalidName(name.to_string()));
    }
    Ok(last.to_string())
}

/// Store an uploaded image under `dir` and return where it landed. The
/// client's name is kept after a fresh uuid prefix, so uploads sharing a
/// name never overwrite each other.
pub fn save_upload(dir: &Path, file_name: &str, bytes: &[u8]) -> Result<PathBuf, UploadError> {
    let name = sanitize(file_name)?;
    ensure_dir(dir)?;
    let path = dir.join(format!("{}_{}", uuid::Uuid::new_v4().simple(), name));
    std::fs::write(&path, bytes).map_err(|source| UploadError::Write {
        path: path.clone(),
        source,
    })?;
    log::debug!("saved upload to {}", path.display());
    Ok(path)
}

/// Copy the matched gallery image into the static directory under a fresh
/// unique name, keeping its extension. Returns the new file name.
pub fn publish_match(static_dir: &Path, source: &Path) -> Result<String, UploadError> {
    ensure_dir(static_dir)?;
    let mut name = uuid::Uuid::new_v4().to_string();
    if let Some(ext) = source.extension() {
        name.push('.');
        name.push_str(&ext.to_string_lossy());
    }
    let target = static_dir.join(&name);
    std::fs::copy(source, &target).map_err(|source| UploadError::Write {
        path: target.clone(),
        source,
    })?;
    Ok(name)
}

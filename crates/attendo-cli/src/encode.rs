//! Build the known-face table from a directory of labeled images.

use attendo_core::{EmbeddingTable, FaceEncoder, FaceLocator, KnownFace};
use std::path::{Path, PathBuf};

const IMAGE_EXTENSIONS: &[&str] = &["jpg", "jpeg", "png", "bmp"];

/// An input image that produced no entry.
#[derive(Debug)]
pub struct Skipped {
    pub path: PathBuf,
    pub reason: String,
}

/// Image files in `dir`, sorted by name so the table order is stable.
pub fn image_files(dir: &Path) -> std::io::Result<Vec<PathBuf>> {
    let mut files = Vec::new();
    for entry in std::fs::read_dir(dir)? {
        let path = entry?.path();
        let is_image = path
            .extension()
            .and_then(|e| e.to_str())
            .map(|e| IMAGE_EXTENSIONS.contains(&e.to_ascii_lowercase().as_str()))
            .unwrap_or(false);
        if path.is_file() && is_image {
            files.push(path);
        }
    }
    files.sort();
    Ok(files)
}

/// Encode the first face of every image. The identity is the file stem and
/// is only recorded together with a successful encoding.
pub fn build_table(
    files: &[PathBuf],
    locator: &mut dyn FaceLocator,
    encoder: &mut dyn FaceEncoder,
) -> (EmbeddingTable, Vec<Skipped>) {
    let mut entries = Vec::new();
    let mut skipped = Vec::new();

    for path in files {
        match encode_one(path, locator, encoder) {
            Ok(known) => {
                tracing::info!(identity = %known.identity, path = %path.display(), "encoded face");
                entries.push(known);
            }
            Err(reason) => {
                tracing::warn!(path = %path.display(), %reason, "skipping image");
                skipped.push(Skipped {
                    path: path.clone(),
                    reason,
                });
            }
        }
    }
    (EmbeddingTable::new(entries), skipped)
}

fn encode_one(
    path: &Path,
    locator: &mut dyn FaceLocator,
    encoder: &mut dyn FaceEncoder,
) -> Result<KnownFace, String> {
    let identity = path
        .file_stem()
        .and_then(|s| s.to_str())
        .ok_or_else(|| "file name is not valid UTF-8".to_string())?
        .to_string();
    let image = image::open(path).map_err(|e| format!("unreadable image: {e}"))?.to_rgb8();
    let faces = locator.locate(&image).map_err(|e| e.to_string())?;
    let first = faces.first().ok_or_else(|| "no face found".to_string())?;
    let embedding = encoder.encode(&image, first).map_err(|e| e.to_string())?;
    Ok(KnownFace { identity, embedding })
}

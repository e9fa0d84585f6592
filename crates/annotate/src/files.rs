//! Discovery of images and model weights on disk.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

pub const IMAGE_EXTENSIONS: [&str; 5] = ["jpg", "jpeg", "png", "bmp", "webp"];
pub const MODEL_EXTENSIONS: [&str; 1] = ["onnx"];

fn has_extension(path: &Path, allowed: &[&str]) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .is_some_and(|ext| allowed.iter().any(|a| a.eq_ignore_ascii_case(ext)))
}

/// Sorted file names directly under `dir` with one of `allowed` extensions.
/// A missing directory yields an empty list.
fn list_files(dir: &Path, allowed: &[&str]) -> io::Result<Vec<String>> {
    let entries = match fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => return Err(e),
    };

    let mut names = Vec::new();
    for entry in entries {
        let path = entry?.path();
        if path.is_file() && has_extension(&path, allowed) {
            if let Some(name) = path.file_name().and_then(|n| n.to_str()) {
                names.push(name.to_string());
            }
        }
    }
    names.sort();
    Ok(names)
}

pub fn list_images(dir: &Path) -> io::Result<Vec<String>> {
    list_files(dir, &IMAGE_EXTENSIONS)
}

pub fn list_model_files(dir: &Path) -> io::Result<Vec<String>> {
    list_files(dir, &MODEL_EXTENSIONS)
}

/// Full paths of the images under `dir`, in listing order.
pub fn image_paths(dir: &Path) -> io::Result<Vec<PathBuf>> {
    Ok(list_images(dir)?.into_iter().map(|n| dir.join(n)).collect())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lists_supported_images_sorted() {
        let dir = tempfile::tempdir().unwrap();
        for name in ["b.png", "a.JPG", "c.webp", "notes.txt", "model.onnx"] {
            fs::write(dir.path().join(name), b"x").unwrap();
        }
        fs::create_dir(dir.path().join("nested.png")).unwrap();

        assert_eq!(
            list_images(dir.path()).unwrap(),
            vec!["a.JPG", "b.png", "c.webp"]
        );
        assert_eq!(list_model_files(dir.path()).unwrap(), vec!["model.onnx"]);
        assert_eq!(image_paths(dir.path()).unwrap()[0], dir.path().join("a.JPG"));
    }

    #[test]
    fn test_missing_directory_is_empty() {
        let dir = tempfile::tempdir().unwrap();
        assert!(list_images(&dir.path().join("absent")).unwrap().is_empty());
    }
}

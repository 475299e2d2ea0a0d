use std::fs;
use std::io;
use std::path::{Path, PathBuf};

const IMAGE_EXTENSIONS: [&str; 3] = ["jpg", "jpeg", "png"];

fn has_image_extension(path: &Path) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .is_some_and(|ext| IMAGE_EXTENSIONS.contains(&ext.to_ascii_lowercase().as_str()))
}

/// A single file as given, or the non-empty jpg/jpeg/png files directly
/// under a directory, sorted by name.
pub fn collect_sources(source: &Path) -> io::Result<Vec<PathBuf>> {
    if source.is_file() {
        return Ok(vec![source.to_path_buf()]);
    }
    if !source.is_dir() {
        return Err(io::Error::new(
            io::ErrorKind::NotFound,
            format!("{} does not exist", source.display()),
        ));
    }

    let mut images = Vec::new();
    for entry in fs::read_dir(source)? {
        let path = entry?.path();
        let metadata = fs::metadata(&path)?;
        if metadata.is_file() && metadata.len() > 0 && has_image_extension(&path) {
            images.push(path);
        }
    }
    images.sort();
    Ok(images)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn directory_scan_keeps_non_empty_images() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("b.JPG"), b"x").unwrap();
        fs::write(dir.path().join("a.png"), b"x").unwrap();
        fs::write(dir.path().join("empty.jpeg"), b"").unwrap();
        fs::write(dir.path().join("notes.txt"), b"x").unwrap();
        fs::create_dir(dir.path().join("nested.png")).unwrap();

        let found = collect_sources(dir.path()).unwrap();
        let names: Vec<_> = found
            .iter()
            .map(|p| p.file_name().unwrap().to_string_lossy().into_owned())
            .collect();
        assert_eq!(names, ["a.png", "b.JPG"]);
    }

    #[test]
    fn single_file_is_passed_through() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("photo.bin");
        fs::write(&path, b"x").unwrap();
        assert_eq!(collect_sources(&path).unwrap(), vec![path]);
        assert!(collect_sources(&dir.path().join("missing.png")).is_err());
    }
}

//! Identity store loading from a directory of reference photos.
//!
//! Each image contributes at most one identity, named after its file stem.
//! Unreadable images, grayscale images, and images without a detectable face
//! are logged and skipped; only an unreadable directory is an error.

use crate::engine::{EngineError, FaceEncoder};
use crate::types::{Embedding, IdentityStore, KnownIdentity};
use image::{ColorType, ImageReader};
use std::path::{Path, PathBuf};
use thiserror::Error;

/// File extensions accepted as reference images (compared case-insensitively).
pub const IMAGE_EXTENSIONS: [&str; 3] = ["png", "jpg", "jpeg"];

#[derive(Error, Debug)]
pub enum EnrollError {
    #[error("cannot read known-faces directory {}: {source}", path.display())]
    ReadDir {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Why a single reference image contributed no identity.
#[derive(Error, Debug)]
enum Skip {
    #[error("failed to load image: {0}")]
    Decode(#[from] image::ImageError),
    #[error("not a color image ({0:?})")]
    NotColor(ColorType),
    #[error("no face detected")]
    NoFace,
    #[error("face encoding failed: {0}")]
    Encode(#[from] EngineError),
}

/// Load every reference image in `dir` into an [`IdentityStore`].
///
/// Entries keep `read_dir` order. Two images with the same stem produce two
/// identities with the same name.
pub fn load_known_faces<E: FaceEncoder>(
    dir: &Path,
    encoder: &mut E,
) -> Result<IdentityStore, EnrollError> {
    let entries = std::fs::read_dir(dir).map_err(|source| EnrollError::ReadDir {
        path: dir.to_path_buf(),
        source,
    })?;

    let mut store = IdentityStore::default();
    let mut skipped = 0usize;

    for entry in entries {
        let path = match entry {
            Ok(entry) => entry.path(),
            Err(e) => {
                tracing::warn!(dir = %dir.display(), error = %e, "skipping unreadable directory entry");
                continue;
            }
        };
        if !is_reference_image(&path) {
            continue;
        }

        match load_reference(&path, encoder) {
            Ok(embedding) => {
                let name = identity_name(&path);
                tracing::debug!(name = %name, path = %path.display(), "loaded known face");
                store.push(KnownIdentity {
                    name,
                    embedding,
                    source: path,
                });
            }
            Err(skip) => {
                skipped += 1;
                tracing::warn!(path = %path.display(), reason = %skip, "skipping reference image");
            }
        }
    }

    tracing::info!(
        dir = %dir.display(),
        loaded = store.len(),
        skipped,
        "known faces loaded"
    );
    Ok(store)
}

/// Decode one image and return the embedding of its first detected face.
fn load_reference<E: FaceEncoder>(path: &Path, encoder: &mut E) -> Result<Embedding, Skip> {
    let decoded = ImageReader::open(path)
        .map_err(image::ImageError::from)?
        .with_guessed_format()
        .map_err(image::ImageError::from)?
        .decode()?;

    let color = decoded.color();
    if !color.has_color() {
        return Err(Skip::NotColor(color));
    }
    let rgb = decoded.into_rgb8();

    let mut faces = encoder.encode(&rgb)?;
    if faces.len() > 1 {
        tracing::debug!(
            path = %path.display(),
            faces = faces.len(),
            "multiple faces in reference image, keeping the first"
        );
    }
    if faces.is_empty() {
        return Err(Skip::NoFace);
    }
    Ok(faces.swap_remove(0))
}

fn is_reference_image(path: &Path) -> bool {
    path.is_file()
        && path
            .extension()
            .and_then(|ext| ext.to_str())
            .is_some_and(|ext| IMAGE_EXTENSIONS.iter().any(|e| ext.eq_ignore_ascii_case(e)))
}

/// Identity name for a reference image: its file name without the extension.
pub fn identity_name(path: &Path) -> String {
    path.file_stem()
        .map(|stem| stem.to_string_lossy().into_owned())
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::detector::DetectorError;
    use image::{GrayImage, Luma, Rgb, RgbImage, Rgba, RgbaImage};
    use std::ffi::OsString;
    use tempfile::TempDir;

    /// Derives faces from the top-left pixel so tests need no models.
    ///
    /// black → no face, (1,1,1) → encoder failure, red channel 255 → two
    /// faces, anything else → one face embedding of the normalized color.
    struct PixelEncoder {
        calls: usize,
    }

    impl FaceEncoder for PixelEncoder {
        fn encode(&mut self, image: &RgbImage) -> Result<Vec<Embedding>, EngineError> {
            self.calls += 1;
            let Rgb([r, g, b]) = *image.get_pixel(0, 0);
            let color = Embedding::new(vec![r as f32 / 255.0, g as f32 / 255.0, b as f32 / 255.0]);
            match (r, g, b) {
                (0, 0, 0) => Ok(vec![]),
                (1, 1, 1) => Err(EngineError::Detector(DetectorError::EmptyFrame)),
                (255, _, _) => Ok(vec![color, Embedding::new(vec![9.0, 9.0, 9.0])]),
                _ => Ok(vec![color]),
            }
        }
    }

    fn write_rgb(dir: &Path, file: &str, color: [u8; 3]) {
        RgbImage::from_pixel(8, 8, Rgb(color))
            .save(dir.join(file))
            .expect("write rgb image");
    }

    fn load(dir: &Path) -> IdentityStore {
        load_known_faces(dir, &mut PixelEncoder { calls: 0 }).expect("load known faces")
    }

    #[test]
    fn test_loads_valid_and_skips_invalid() {
        let tmp = TempDir::new().unwrap();
        let dir = tmp.path();

        write_rgb(dir, "alice.png", [10, 20, 30]);
        write_rgb(dir, "bob.jpg", [40, 50, 60]);
        write_rgb(dir, "carol.jpeg", [70, 80, 90]);
        // invalid ones
        write_rgb(dir, "nobody.png", [0, 0, 0]);
        write_rgb(dir, "broken_model.png", [1, 1, 1]);
        std::fs::write(dir.join("corrupt.jpg"), b"definitely not a jpeg").unwrap();
        GrayImage::from_pixel(8, 8, Luma([200]))
            .save(dir.join("gray.png"))
            .unwrap();

        let store = load(dir);
        let mut names: Vec<&str> = store.names().collect();
        names.sort_unstable();
        assert_eq!(names, vec!["alice", "bob", "carol"]);
    }

    #[test]
    fn test_order_follows_directory_listing() {
        let tmp = TempDir::new().unwrap();
        let dir = tmp.path();
        for (i, name) in ["zed", "amy", "mo", "kim"].iter().enumerate() {
            write_rgb(dir, &format!("{name}.png"), [10 + i as u8, 20, 30]);
        }

        let listing: Vec<String> = std::fs::read_dir(dir)
            .unwrap()
            .map(|e| identity_name(&e.unwrap().path()))
            .collect();

        let store = load(dir);
        assert_eq!(store.names().collect::<Vec<_>>(), listing);
    }

    #[test]
    fn test_non_image_files_are_ignored_without_decoding() {
        let tmp = TempDir::new().unwrap();
        let dir = tmp.path();
        write_rgb(dir, "alice.png", [10, 20, 30]);
        std::fs::write(dir.join("notes.txt"), b"hello").unwrap();
        std::fs::write(dir.join("README"), b"hello").unwrap();
        std::fs::create_dir(dir.join("folder.png")).unwrap();

        let mut encoder = PixelEncoder { calls: 0 };
        let store = load_known_faces(dir, &mut encoder).unwrap();
        assert_eq!(store.len(), 1);
        assert_eq!(encoder.calls, 1);
    }

    #[test]
    fn test_uppercase_extension_accepted() {
        let tmp = TempDir::new().unwrap();
        write_rgb(tmp.path(), "Dana.PNG", [10, 20, 30]);
        let store = load(tmp.path());
        assert_eq!(store.names().collect::<Vec<_>>(), vec!["Dana"]);
    }

    #[test]
    fn test_first_face_wins_for_multi_face_reference() {
        let tmp = TempDir::new().unwrap();
        write_rgb(tmp.path(), "group.png", [255, 0, 0]);

        let store = load(tmp.path());
        assert_eq!(store.len(), 1);
        let id = store.iter().next().unwrap();
        assert_eq!(id.embedding.values, vec![1.0, 0.0, 0.0]);
    }

    #[test]
    fn test_duplicate_names_are_retained() {
        let tmp = TempDir::new().unwrap();
        write_rgb(tmp.path(), "erin.png", [10, 20, 30]);
        write_rgb(tmp.path(), "erin.jpg", [40, 50, 60]);

        let store = load(tmp.path());
        assert_eq!(store.names().collect::<Vec<_>>(), vec!["erin", "erin"]);
        let sources: Vec<_> = store.iter().map(|i| i.source.clone()).collect();
        assert_ne!(sources[0], sources[1]);
    }

    #[test]
    fn test_rgba_image_is_converted_to_rgb() {
        let tmp = TempDir::new().unwrap();
        RgbaImage::from_pixel(8, 8, Rgba([10, 20, 30, 128]))
            .save(tmp.path().join("frank.png"))
            .unwrap();

        let store = load(tmp.path());
        assert_eq!(store.names().collect::<Vec<_>>(), vec!["frank"]);
    }

    #[test]
    fn test_missing_directory_is_an_error() {
        let tmp = TempDir::new().unwrap();
        let missing = tmp.path().join("nope");
        let err = load_known_faces(&missing, &mut PixelEncoder { calls: 0 }).unwrap_err();
        assert!(matches!(err, EnrollError::ReadDir { .. }));
    }

    #[test]
    fn test_empty_directory_yields_empty_store() {
        let tmp = TempDir::new().unwrap();
        assert!(load(tmp.path()).is_empty());
    }

    #[test]
    fn test_identity_name_uses_last_extension_only() {
        assert_eq!(identity_name(Path::new("faces/john.doe.jpg")), "john.doe");
        assert_eq!(identity_name(Path::new("alice.png")), "alice");
        assert_eq!(identity_name(Path::new(&OsString::from("dir/bob.jpeg"))), "bob");
    }
}

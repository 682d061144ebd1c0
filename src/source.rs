// Ultralytics 🚀 AGPL-3.0 License - https://ultralytics.com/license

//! Input source handling for the streaming engine.
//!
//! A [`Source`] is a parsed selector (webcam index, stream URL, video path
//! or image directory). Opening one yields a [`FrameSource`], the seam the
//! engine reads frames through; custom decoders plug in via
//! [`SourceOpener`]. The built-in opener serves image directories and
//! single image files, which is what the bundled CLI works with.

use std::path::{Path, PathBuf};

use image::RgbImage;

use crate::error::{ActionError, Result};

/// A parsed input selector.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Source {
    /// Webcam device index.
    Webcam(u32),
    /// Streaming URL (RTSP, RTMP, HTTP).
    Stream(String),
    /// Path to a video or single image file.
    Video(PathBuf),
    /// Directory containing frame images.
    ImageDir(PathBuf),
}

impl Source {
    /// Check if this source is a live capture device or network stream.
    #[must_use]
    pub const fn is_live(&self) -> bool {
        matches!(self, Self::Webcam(_) | Self::Stream(_))
    }

    /// Get the filesystem path if this source has one.
    #[must_use]
    pub fn path(&self) -> Option<&Path> {
        match self {
            Self::Video(p) | Self::ImageDir(p) => Some(p),
            Self::Webcam(_) | Self::Stream(_) => None,
        }
    }
}

impl std::fmt::Display for Source {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Webcam(idx) => write!(f, "webcam {idx}"),
            Self::Stream(url) => write!(f, "stream {url}"),
            Self::Video(path) => write!(f, "video {}", path.display()),
            Self::ImageDir(path) => write!(f, "directory {}", path.display()),
        }
    }
}

/// Convert a selector string to a Source.
impl From<&str> for Source {
    fn from(s: &str) -> Self {
        // A bare number selects a capture device.
        if let Ok(idx) = s.parse::<u32>() {
            return Self::Webcam(idx);
        }

        if s.starts_with("rtsp://")
            || s.starts_with("rtmp://")
            || s.starts_with("http://")
            || s.starts_with("https://")
        {
            return Self::Stream(s.to_string());
        }

        let path = PathBuf::from(s);
        if path.is_dir() {
            return Self::ImageDir(path);
        }
        Self::Video(path)
    }
}

impl From<String> for Source {
    fn from(s: String) -> Self {
        Self::from(s.as_str())
    }
}

impl From<u32> for Source {
    fn from(idx: u32) -> Self {
        Self::Webcam(idx)
    }
}

/// An opened stream of frames.
///
/// `read` returning `Ok(None)` means no frame is available right now; the
/// engine backs off and tries again rather than tearing the stream down, so
/// a stuttering camera keeps its session.
pub trait FrameSource: Send {
    /// Read the next frame if one is available.
    ///
    /// # Errors
    ///
    /// Returns an error if a frame was present but could not be decoded.
    fn read(&mut self) -> Result<Option<RgbImage>>;

    /// Human-readable description for logs.
    fn describe(&self) -> String;
}

/// Factory turning a selector into an opened frame source.
///
/// The engine worker owns open and close; implementations only need to
/// produce a fresh [`FrameSource`] per call.
pub trait SourceOpener: Send {
    /// Open the given source.
    ///
    /// # Errors
    ///
    /// Returns an error if the source cannot be opened.
    fn open(&self, source: &Source) -> Result<Box<dyn FrameSource>>;
}

/// Check if a path is an image file based on extension.
fn is_image_file(path: &Path) -> bool {
    path.extension().is_some_and(|ext| {
        let ext = ext.to_string_lossy().to_lowercase();
        matches!(
            ext.as_str(),
            "jpg" | "jpeg" | "png" | "bmp" | "gif" | "webp" | "tiff" | "tif"
        )
    })
}

/// Frame source over a fixed list of image files.
///
/// Each image is yielded once in sorted order; afterwards `read` reports no
/// frame. A file that fails to decode surfaces its error once and is then
/// skipped.
pub struct ImageDirSource {
    paths: Vec<PathBuf>,
    cursor: usize,
    label: String,
}

impl ImageDirSource {
    /// Collect all image files from a directory, sorted by name.
    ///
    /// # Errors
    ///
    /// Returns an error if the path is not a readable directory or holds no
    /// images.
    pub fn from_dir<P: AsRef<Path>>(dir: P) -> Result<Self> {
        let dir = dir.as_ref();
        if !dir.is_dir() {
            return Err(ActionError::SourceError(format!(
                "not a directory: {}",
                dir.display()
            )));
        }
        let mut paths: Vec<PathBuf> = std::fs::read_dir(dir)
            .map_err(|e| {
                ActionError::SourceError(format!("failed to read {}: {e}", dir.display()))
            })?
            .filter_map(std::result::Result::ok)
            .map(|entry| entry.path())
            .filter(|path| is_image_file(path))
            .collect();
        paths.sort();
        if paths.is_empty() {
            return Err(ActionError::SourceError(format!(
                "no images in {}",
                dir.display()
            )));
        }
        let label = format!("directory {} ({} images)", dir.display(), paths.len());
        Ok(Self {
            paths,
            cursor: 0,
            label,
        })
    }

    /// Source over a single image file.
    #[must_use]
    pub fn single(path: PathBuf) -> Self {
        let label = format!("image {}", path.display());
        Self {
            paths: vec![path],
            cursor: 0,
            label,
        }
    }

    /// Number of images not yet yielded.
    #[must_use]
    pub fn remaining(&self) -> usize {
        self.paths.len() - self.cursor
    }
}

impl FrameSource for ImageDirSource {
    fn read(&mut self) -> Result<Option<RgbImage>> {
        let Some(path) = self.paths.get(self.cursor) else {
            return Ok(None);
        };
        self.cursor += 1;
        let image = image::open(path).map_err(|e| {
            ActionError::ImageError(format!("failed to load {}: {e}", path.display()))
        })?;
        Ok(Some(image.to_rgb8()))
    }

    fn describe(&self) -> String {
        self.label.clone()
    }
}

/// Built-in opener covering the file-based sources.
///
/// Live capture devices and network streams need a decoder this crate does
/// not ship; supply a custom [`SourceOpener`] for those.
#[derive(Debug, Clone, Copy, Default)]
pub struct DefaultSourceOpener;

impl SourceOpener for DefaultSourceOpener {
    fn open(&self, source: &Source) -> Result<Box<dyn FrameSource>> {
        match source {
            Source::ImageDir(dir) => Ok(Box::new(ImageDirSource::from_dir(dir)?)),
            Source::Video(path) if is_image_file(path) => {
                if !path.is_file() {
                    return Err(ActionError::SourceError(format!(
                        "image not found: {}",
                        path.display()
                    )));
                }
                Ok(Box::new(ImageDirSource::single(path.clone())))
            }
            other => Err(ActionError::SourceError(format!(
                "no decoder available for {other}; supply a custom source opener"
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn write_png(path: &Path, width: u32, height: u32) {
        RgbImage::new(width, height).save(path).unwrap();
    }

    #[test]
    fn test_selector_parsing() {
        assert_eq!(Source::from("0"), Source::Webcam(0));
        assert_eq!(Source::from("3"), Source::Webcam(3));
        assert!(matches!(
            Source::from("rtsp://cam.local/stream"),
            Source::Stream(_)
        ));
        assert!(matches!(
            Source::from("http://cam.local/feed"),
            Source::Stream(_)
        ));
        assert!(matches!(Source::from("clip.mp4"), Source::Video(_)));
        assert!(matches!(Source::from("5x"), Source::Video(_)));

        let dir = tempfile::tempdir().unwrap();
        let selector = dir.path().to_string_lossy().to_string();
        assert!(matches!(Source::from(selector), Source::ImageDir(_)));
    }

    #[test]
    fn test_source_display_and_helpers() {
        assert_eq!(Source::Webcam(1).to_string(), "webcam 1");
        assert!(Source::Webcam(1).is_live());
        assert!(!Source::Video(PathBuf::from("a.mp4")).is_live());
        assert_eq!(
            Source::Video(PathBuf::from("a.mp4")).path(),
            Some(Path::new("a.mp4"))
        );
        assert_eq!(Source::Stream("rtsp://x".to_string()).path(), None);
    }

    #[test]
    fn test_image_dir_source_yields_sorted_then_none() {
        let dir = tempfile::tempdir().unwrap();
        write_png(&dir.path().join("b.png"), 4, 4);
        write_png(&dir.path().join("a.png"), 2, 2);
        std::fs::write(dir.path().join("notes.txt"), "skip me").unwrap();

        let mut source = ImageDirSource::from_dir(dir.path()).unwrap();
        assert_eq!(source.remaining(), 2);

        let first = source.read().unwrap().unwrap();
        assert_eq!(first.dimensions(), (2, 2));
        let second = source.read().unwrap().unwrap();
        assert_eq!(second.dimensions(), (4, 4));
        assert!(source.read().unwrap().is_none());
        assert!(source.read().unwrap().is_none());
    }

    #[test]
    fn test_image_dir_source_skips_corrupt_file_after_error() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("a.png"), b"not a png").unwrap();
        write_png(&dir.path().join("b.png"), 3, 3);

        let mut source = ImageDirSource::from_dir(dir.path()).unwrap();
        assert!(source.read().is_err());
        assert!(source.read().unwrap().is_some());
        assert!(source.read().unwrap().is_none());
    }

    #[test]
    fn test_image_dir_source_rejects_empty_dir() {
        let dir = tempfile::tempdir().unwrap();
        assert!(matches!(
            ImageDirSource::from_dir(dir.path()),
            Err(ActionError::SourceError(_))
        ));
    }

    #[test]
    fn test_default_opener() {
        let dir = tempfile::tempdir().unwrap();
        write_png(&dir.path().join("a.png"), 2, 2);

        let opener = DefaultSourceOpener;
        let source = opener.open(&Source::ImageDir(dir.path().to_path_buf()));
        assert!(source.is_ok());

        let single = opener.open(&Source::Video(dir.path().join("a.png")));
        assert!(single.is_ok());

        assert!(matches!(
            opener.open(&Source::Webcam(0)),
            Err(ActionError::SourceError(_))
        ));
        assert!(matches!(
            opener.open(&Source::Video(dir.path().join("missing.png"))),
            Err(ActionError::SourceError(_))
        ));
    }
}

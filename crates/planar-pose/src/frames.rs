//! Frame input and output.
//!
//! A [`FrameSource`] yields frames one at a time until it is exhausted.
//! [`ImageSequence`] plays back a single image file or a directory of images
//! in file-name order.

use planar_pose_core::{Frame, GeometryError, PixelFormat};
use std::collections::VecDeque;
use std::fs;
use std::path::{Path, PathBuf};

#[derive(thiserror::Error, Debug)]
pub enum FrameError {
    #[error("failed to access {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[cfg(feature = "image")]
    #[error("failed to decode or encode {}: {source}", path.display())]
    Image {
        path: PathBuf,
        #[source]
        source: image::ImageError,
    },
    #[error("no images found in {}", .0.display())]
    Empty(PathBuf),
    #[error(transparent)]
    Geometry(#[from] GeometryError),
}

/// A stream of frames. `Ok(None)` marks the end of the stream.
pub trait FrameSource {
    fn next_frame(&mut self) -> Result<Option<Frame>, FrameError>;
}

impl<S: FrameSource + ?Sized> FrameSource for &mut S {
    fn next_frame(&mut self) -> Result<Option<Frame>, FrameError> {
        (**self).next_frame()
    }
}

/// In-memory frames, mostly for tests and embedding.
impl FrameSource for VecDeque<Frame> {
    fn next_frame(&mut self) -> Result<Option<Frame>, FrameError> {
        Ok(self.pop_front())
    }
}

const IMAGE_EXTENSIONS: &[&str] = &["png", "jpg", "jpeg", "bmp", "tif", "tiff", "pgm", "ppm"];

fn has_image_extension(path: &Path) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .is_some_and(|e| IMAGE_EXTENSIONS.contains(&e.to_ascii_lowercase().as_str()))
}

/// Image files to play back for `input`: the file itself, or every image in
/// the directory sorted by file name.
pub fn list_frames(input: &Path) -> Result<Vec<PathBuf>, FrameError> {
    let io_err = |source| FrameError::Io {
        path: input.to_path_buf(),
        source,
    };
    let meta = fs::metadata(input).map_err(io_err)?;
    if !meta.is_dir() {
        return Ok(vec![input.to_path_buf()]);
    }
    let mut paths = Vec::new();
    for entry in fs::read_dir(input).map_err(io_err)? {
        let path = entry.map_err(io_err)?.path();
        if path.is_file() && has_image_extension(&path) {
            paths.push(path);
        }
    }
    if paths.is_empty() {
        return Err(FrameError::Empty(input.to_path_buf()));
    }
    paths.sort();
    Ok(paths)
}

/// Frames decoded from image files with the `image` crate.
#[cfg(feature = "image")]
#[derive(Debug)]
pub struct ImageSequence {
    paths: VecDeque<PathBuf>,
    current: Option<PathBuf>,
}

#[cfg(feature = "image")]
impl ImageSequence {
    pub fn open(input: impl AsRef<Path>) -> Result<Self, FrameError> {
        let paths = list_frames(input.as_ref())?;
        log::debug!("image sequence with {} frames", paths.len());
        Ok(Self::from_paths(paths))
    }

    pub fn from_paths(paths: Vec<PathBuf>) -> Self {
        Self {
            paths: paths.into(),
            current: None,
        }
    }

    /// Path of the frame most recently returned by [`FrameSource::next_frame`].
    pub fn current_path(&self) -> Option<&Path> {
        self.current.as_deref()
    }

    pub fn remaining(&self) -> usize {
        self.paths.len()
    }
}

#[cfg(feature = "image")]
impl FrameSource for ImageSequence {
    fn next_frame(&mut self) -> Result<Option<Frame>, FrameError> {
        let Some(path) = self.paths.pop_front() else {
            self.current = None;
            return Ok(None);
        };
        let frame = read_frame(&path)?;
        self.current = Some(path);
        Ok(Some(frame))
    }
}

/// Decode an image file; color images become RGB frames, the rest gray.
#[cfg(feature = "image")]
pub fn read_frame(path: &Path) -> Result<Frame, FrameError> {
    let img = image::ImageReader::open(path)
        .map_err(|source| FrameError::Io {
            path: path.to_path_buf(),
            source,
        })?
        .decode()
        .map_err(|source| FrameError::Image {
            path: path.to_path_buf(),
            source,
        })?;
    Ok(frame_from_image(&img)?)
}

#[cfg(feature = "image")]
pub fn frame_from_image(img: &image::DynamicImage) -> Result<Frame, GeometryError> {
    if img.color().has_color() {
        let rgb = img.to_rgb8();
        let (w, h) = rgb.dimensions();
        Frame::new(w as usize, h as usize, PixelFormat::Rgb8, rgb.into_raw())
    } else {
        let gray = img.to_luma8();
        let (w, h) = gray.dimensions();
        Frame::new(w as usize, h as usize, PixelFormat::Gray8, gray.into_raw())
    }
}

#[cfg(feature = "image")]
pub fn frame_to_image(frame: &Frame) -> Option<image::DynamicImage> {
    let (w, h) = (frame.width() as u32, frame.height() as u32);
    match frame.format() {
        PixelFormat::Gray8 => image::GrayImage::from_raw(w, h, frame.data().to_vec())
            .map(image::DynamicImage::ImageLuma8),
        PixelFormat::Rgb8 => image::RgbImage::from_raw(w, h, frame.data().to_vec())
            .map(image::DynamicImage::ImageRgb8),
        PixelFormat::Bgr8 => {
            let rgb: Vec<u8> = frame
                .data()
                .chunks_exact(3)
                .flat_map(|px| [px[2], px[1], px[0]])
                .collect();
            image::RgbImage::from_raw(w, h, rgb).map(image::DynamicImage::ImageRgb8)
        }
    }
}

/// Encode `frame` to `path`; the format follows the file extension.
#[cfg(feature = "image")]
pub fn write_frame(frame: &Frame, path: &Path) -> Result<(), FrameError> {
    let img = frame_to_image(frame).ok_or_else(|| {
        GeometryError::mismatch(
            "frame buffer",
            format!("{}x{} {:?}", frame.width(), frame.height(), frame.format()),
            frame.data().len(),
        )
    })?;
    img.save(path).map_err(|source| FrameError::Image {
        path: path.to_path_buf(),
        source,
    })
}

//! Multi-channel 8-bit frames and the per-pixel remapping operations used by
//! the rectification and undistortion drivers.

use crate::camera::apply_k;
use crate::{CameraIntrinsics, GeometryError, GrayImage, Homography};
use nalgebra::{Point2, Vector3};
use serde::{Deserialize, Serialize};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PixelFormat {
    Gray8,
    Rgb8,
    Bgr8,
}

impl PixelFormat {
    pub fn channels(self) -> usize {
        match self {
            Self::Gray8 => 1,
            Self::Rgb8 | Self::Bgr8 => 3,
        }
    }
}

/// Interleaved, row-major 8-bit frame.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Frame {
    width: usize,
    height: usize,
    format: PixelFormat,
    data: Vec<u8>,
}

impl Frame {
    pub fn new(
        width: usize,
        height: usize,
        format: PixelFormat,
        data: Vec<u8>,
    ) -> Result<Self, GeometryError> {
        let expected = width * height * format.channels();
        if data.len() != expected {
            return Err(GeometryError::mismatch(
                "frame buffer",
                format!("{expected} bytes"),
                data.len(),
            ));
        }
        Ok(Self {
            width,
            height,
            format,
            data,
        })
    }

    /// Black frame of the given geometry.
    pub fn blank(width: usize, height: usize, format: PixelFormat) -> Self {
        Self {
            width,
            height,
            format,
            data: vec![0; width * height * format.channels()],
        }
    }

    pub fn width(&self) -> usize {
        self.width
    }

    pub fn height(&self) -> usize {
        self.height
    }

    pub fn format(&self) -> PixelFormat {
        self.format
    }

    pub fn data(&self) -> &[u8] {
        &self.data
    }

    pub fn is_empty(&self) -> bool {
        self.width == 0 || self.height == 0
    }

    /// Luminance image (ITU-R BT.601 weights for color input).
    pub fn to_gray(&self) -> GrayImage {
        let data = match self.format {
            PixelFormat::Gray8 => self.data.clone(),
            PixelFormat::Rgb8 => self.data.chunks_exact(3).map(|c| luma(c[0], c[1], c[2])).collect(),
            PixelFormat::Bgr8 => self.data.chunks_exact(3).map(|c| luma(c[2], c[1], c[0])).collect(),
        };
        GrayImage {
            width: self.width,
            height: self.height,
            data,
        }
    }

    #[inline]
    fn texel(&self, x: i64, y: i64, ch: usize) -> f64 {
        if x < 0 || y < 0 || x >= self.width as i64 || y >= self.height as i64 {
            return 0.0;
        }
        let idx = (y as usize * self.width + x as usize) * self.format.channels() + ch;
        self.data[idx] as f64
    }

    fn sample_into(&self, x: f64, y: f64, out: &mut [u8]) {
        let x0 = x.floor();
        let y0 = y.floor();
        let fx = x - x0;
        let fy = y - y0;
        let (xi, yi) = (x0 as i64, y0 as i64);
        for (ch, o) in out.iter_mut().enumerate() {
            let p00 = self.texel(xi, yi, ch);
            let p10 = self.texel(xi + 1, yi, ch);
            let p01 = self.texel(xi, yi + 1, ch);
            let p11 = self.texel(xi + 1, yi + 1, ch);
            let a = p00 + fx * (p10 - p00);
            let b = p01 + fx * (p11 - p01);
            *o = (a + fy * (b - a)).round().clamp(0.0, 255.0) as u8;
        }
    }

    /// Build an output frame by sampling `self` at `map(x, y)` for every
    /// output pixel; `None` leaves the pixel black.
    pub fn remap<F>(&self, out_w: usize, out_h: usize, map: F) -> Frame
    where
        F: Fn(f64, f64) -> Option<Point2<f64>>,
    {
        let ch = self.format.channels();
        let mut out = Frame::blank(out_w, out_h, self.format);
        for y in 0..out_h {
            for x in 0..out_w {
                if let Some(src) = map(x as f64, y as f64) {
                    if !src.x.is_finite() || !src.y.is_finite() {
                        continue;
                    }
                    let idx = (y * out_w + x) * ch;
                    self.sample_into(src.x, src.y, &mut out.data[idx..idx + ch]);
                }
            }
        }
        out
    }
}

#[inline]
fn luma(r: u8, g: u8, b: u8) -> u8 {
    (0.299 * r as f64 + 0.587 * g as f64 + 0.114 * b as f64)
        .round()
        .clamp(0.0, 255.0) as u8
}

impl From<GrayImage> for Frame {
    fn from(img: GrayImage) -> Self {
        Self {
            width: img.width,
            height: img.height,
            format: PixelFormat::Gray8,
            data: img.data,
        }
    }
}

/// Perspective warp: output pixel `p` takes the value of `src` at
/// `h_src_from_dst * p`. Pixels mapping outside `src` are black.
pub fn warp_perspective(
    src: &Frame,
    h_src_from_dst: &Homography,
    out_w: usize,
    out_h: usize,
) -> Frame {
    src.remap(out_w, out_h, |x, y| {
        let v = h_src_from_dst.h * Vector3::new(x, y, 1.0);
        (v.z.abs() > f64::EPSILON).then(|| Point2::new(v.x / v.z, v.y / v.z))
    })
}

/// Remove lens distortion from a frame, keeping the same calibration matrix
/// and frame size.
pub fn undistort_frame(src: &Frame, intrinsics: &CameraIntrinsics) -> Result<Frame, GeometryError> {
    let k_inv = intrinsics.k_inverse()?;
    if intrinsics.distortion.is_zero() {
        return Ok(src.clone());
    }
    Ok(src.remap(src.width, src.height, |x, y| {
        let v = k_inv * Vector3::new(x, y, 1.0);
        let n = Point2::new(v.x / v.z, v.y / v.z);
        Some(apply_k(&intrinsics.mat_k, intrinsics.distortion.distort(n)))
    }))
}

/// Per-channel absolute difference of two frames of identical geometry.
pub fn abs_diff(a: &Frame, b: &Frame) -> Result<Frame, GeometryError> {
    if a.width != b.width || a.height != b.height || a.format != b.format {
        return Err(GeometryError::mismatch(
            "frame for difference",
            format!("{}x{} {:?}", a.width, a.height, a.format),
            b.data.len(),
        ));
    }
    let data = a
        .data
        .iter()
        .zip(&b.data)
        .map(|(&p, &q)| p.abs_diff(q))
        .collect();
    Ok(Frame {
        width: a.width,
        height: a.height,
        format: a.format,
        data,
    })
}

//! Lightweight 8-bit image containers and bilinear sampling.
//!
//! Pixel centres sit on integer coordinates: pixel `(x, y)` covers
//! `[x - 0.5, x + 0.5) x [y - 0.5, y + 0.5)`.

use crate::GeometryError;

#[derive(Clone, Copy, Debug)]
pub struct GrayImageView<'a> {
    pub width: usize,
    pub height: usize,
    pub data: &'a [u8], // row-major, len = w*h
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct GrayImage {
    pub width: usize,
    pub height: usize,
    pub data: Vec<u8>,
}

impl GrayImage {
    pub fn new(width: usize, height: usize) -> Self {
        Self {
            width,
            height,
            data: vec![0; width * height],
        }
    }

    /// Wrap an existing buffer, checking its length.
    pub fn from_raw(width: usize, height: usize, data: Vec<u8>) -> Result<Self, GeometryError> {
        if data.len() != width * height {
            return Err(GeometryError::mismatch(
                "gray image buffer",
                format!("{} bytes", width * height),
                data.len(),
            ));
        }
        Ok(Self {
            width,
            height,
            data,
        })
    }

    pub fn view(&self) -> GrayImageView<'_> {
        GrayImageView {
            width: self.width,
            height: self.height,
            data: &self.data,
        }
    }

    #[inline]
    pub fn get(&self, x: usize, y: usize) -> u8 {
        self.data[y * self.width + x]
    }
}

impl GrayImageView<'_> {
    #[inline]
    pub fn get(&self, x: usize, y: usize) -> u8 {
        self.data[y * self.width + x]
    }

    pub fn to_owned(&self) -> GrayImage {
        GrayImage {
            width: self.width,
            height: self.height,
            data: self.data.to_vec(),
        }
    }
}

#[inline]
fn get_gray(src: &GrayImageView<'_>, x: i64, y: i64) -> u8 {
    if x < 0 || y < 0 || x >= src.width as i64 || y >= src.height as i64 {
        return 0;
    }
    src.data[y as usize * src.width + x as usize]
}

/// Bilinear sample; samples outside the image read as 0.
#[inline]
pub fn sample_bilinear(src: &GrayImageView<'_>, x: f64, y: f64) -> f64 {
    let x0 = x.floor();
    let y0 = y.floor();
    let fx = x - x0;
    let fy = y - y0;
    let (xi, yi) = (x0 as i64, y0 as i64);

    let p00 = get_gray(src, xi, yi) as f64;
    let p10 = get_gray(src, xi + 1, yi) as f64;
    let p01 = get_gray(src, xi, yi + 1) as f64;
    let p11 = get_gray(src, xi + 1, yi + 1) as f64;

    let a = p00 + fx * (p10 - p00);
    let b = p01 + fx * (p11 - p01);
    a + fy * (b - a)
}

/// Bilinear sample with coordinates clamped to the image, so borders replicate.
#[inline]
pub fn sample_bilinear_clamped(src: &GrayImageView<'_>, x: f64, y: f64) -> f64 {
    let max_x = src.width.saturating_sub(1) as f64;
    let max_y = src.height.saturating_sub(1) as f64;
    sample_bilinear(src, x.clamp(0.0, max_x), y.clamp(0.0, max_y))
}

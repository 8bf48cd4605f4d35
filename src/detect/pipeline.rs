//! Foreground mask transform chain.
//!
//! Each stage is a full-frame transform over 8-bit single-channel images:
//! grayscale, Gaussian blur, inverted adaptive threshold, median blur and
//! dilation. Border handling mirrors the usual image-processing conventions:
//! reflect-101 for the smoothing blur, replicate for the threshold's local
//! mean and for the median, and ignored samples for dilation.

use image::{GrayImage, Luma};

use super::result::{Stage, TransformError};
use crate::frame::Frame;

const FOREGROUND: u8 = 255;

/// Tunables for the transform chain. Defaults match the calibrated lot.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct PipelineParams {
    pub blur_ksize: u32,
    pub blur_sigma: f64,
    pub block_size: u32,
    pub offset: f64,
    pub median_ksize: u32,
    pub dilate_iterations: u32,
}

impl Default for PipelineParams {
    fn default() -> Self {
        Self {
            blur_ksize: 3,
            blur_sigma: 1.0,
            block_size: 25,
            offset: 16.0,
            median_ksize: 5,
            dilate_iterations: 1,
        }
    }
}

impl PipelineParams {
    pub fn validate(&self) -> Result<(), TransformError> {
        check_odd_kernel(Stage::GaussianBlur, self.blur_ksize, 1)?;
        check_odd_kernel(Stage::AdaptiveThreshold, self.block_size, 3)?;
        check_odd_kernel(Stage::MedianBlur, self.median_ksize, 1)?;
        if self.dilate_iterations == 0 {
            return Err(TransformError::new(
                Stage::Dilate,
                "at least one dilation pass is required",
            ));
        }
        if !self.offset.is_finite() {
            return Err(TransformError::new(
                Stage::AdaptiveThreshold,
                "offset must be finite",
            ));
        }
        Ok(())
    }
}

fn check_odd_kernel(stage: Stage, ksize: u32, min: u32) -> Result<(), TransformError> {
    if ksize < min || ksize % 2 == 0 {
        return Err(TransformError::new(
            stage,
            format!("kernel size must be odd and >= {}, got {}", min, ksize),
        ));
    }
    Ok(())
}

/// Runs the full chain on one frame and returns the binary mask.
#[derive(Clone, Debug, Default)]
pub struct ForegroundPipeline {
    params: PipelineParams,
}

impl ForegroundPipeline {
    pub fn new(params: PipelineParams) -> Result<Self, TransformError> {
        params.validate()?;
        Ok(Self { params })
    }

    pub fn params(&self) -> &PipelineParams {
        &self.params
    }

    pub fn mask(&self, frame: &Frame) -> Result<GrayImage, TransformError> {
        let gray = grayscale(frame)?;
        let blurred = gaussian_blur(&gray, self.params.blur_ksize, self.params.blur_sigma)?;
        let thresh =
            adaptive_threshold_inv(&blurred, self.params.block_size, self.params.offset)?;
        let median = median_blur(&thresh, self.params.median_ksize)?;
        Ok(dilate(&median, self.params.dilate_iterations))
    }
}

/// Luma from RGB with 14-bit fixed-point weights (0.299, 0.587, 0.114).
pub fn grayscale(frame: &Frame) -> Result<GrayImage, TransformError> {
    let (width, height) = (frame.width(), frame.height());
    if width == 0 || height == 0 {
        return Err(TransformError::new(
            Stage::Grayscale,
            format!("empty frame {}x{}", width, height),
        ));
    }
    let rgb = frame.pixels();
    let mut gray = Vec::with_capacity(width as usize * height as usize);
    for px in rgb.chunks_exact(3) {
        let y = px[0] as u32 * 4899 + px[1] as u32 * 9617 + px[2] as u32 * 1868 + (1 << 13);
        gray.push((y >> 14) as u8);
    }
    GrayImage::from_raw(width, height, gray)
        .ok_or_else(|| TransformError::new(Stage::Grayscale, "pixel buffer size mismatch"))
}

pub fn gaussian_blur(src: &GrayImage, ksize: u32, sigma: f64) -> Result<GrayImage, TransformError> {
    check_odd_kernel(Stage::GaussianBlur, ksize, 1)?;
    let kernel = gaussian_kernel(ksize, sigma);
    separable_filter(src, &kernel, reflect_101, Stage::GaussianBlur)
}

/// Inverted adaptive threshold against a Gaussian-weighted local mean.
///
/// A pixel turns on when it is at least `offset` darker than its
/// neighbourhood: `src - mean <= -floor(offset)`.
pub fn adaptive_threshold_inv(
    src: &GrayImage,
    block_size: u32,
    offset: f64,
) -> Result<GrayImage, TransformError> {
    check_odd_kernel(Stage::AdaptiveThreshold, block_size, 3)?;
    let kernel = gaussian_kernel(block_size, 0.0);
    let mean = separable_filter(src, &kernel, replicate, Stage::AdaptiveThreshold)?;
    let delta = offset.floor() as i32;
    let out: Vec<u8> = src
        .as_raw()
        .iter()
        .zip(mean.as_raw())
        .map(|(s, m)| {
            let diff = *s as i32 - *m as i32;
            if diff > -delta {
                0
            } else {
                FOREGROUND
            }
        })
        .collect();
    GrayImage::from_raw(src.width(), src.height(), out)
        .ok_or_else(|| TransformError::new(Stage::AdaptiveThreshold, "mask size mismatch"))
}

pub fn median_blur(src: &GrayImage, ksize: u32) -> Result<GrayImage, TransformError> {
    check_odd_kernel(Stage::MedianBlur, ksize, 1)?;
    let (w, h) = (src.width() as i64, src.height() as i64);
    let radius = (ksize / 2) as i64;
    let area = (ksize * ksize) as usize;
    let mid = area / 2;
    let mut window = Vec::with_capacity(area);
    let mut out = GrayImage::new(src.width(), src.height());
    for y in 0..h {
        for x in 0..w {
            window.clear();
            for dy in -radius..=radius {
                let sy = replicate(y + dy, h);
                for dx in -radius..=radius {
                    let sx = replicate(x + dx, w);
                    window.push(src.get_pixel(sx as u32, sy as u32).0[0]);
                }
            }
            let (_, median, _) = window.select_nth_unstable(mid);
            out.put_pixel(x as u32, y as u32, Luma([*median]));
        }
    }
    Ok(out)
}

/// 3x3 rectangular dilation. Samples outside the image never win the max.
pub fn dilate(src: &GrayImage, iterations: u32) -> GrayImage {
    let mut current = src.clone();
    for _ in 0..iterations {
        let horizontal = max_pass(&current, true);
        current = max_pass(&horizontal, false);
    }
    current
}

fn max_pass(src: &GrayImage, horizontal: bool) -> GrayImage {
    let (w, h) = (src.width(), src.height());
    GrayImage::from_fn(w, h, |x, y| {
        let (pos, len) = if horizontal { (x, w) } else { (y, h) };
        let lo = pos.saturating_sub(1);
        let hi = (pos + 1).min(len - 1);
        let best = (lo..=hi)
            .map(|p| {
                let (sx, sy) = if horizontal { (p, y) } else { (x, p) };
                src.get_pixel(sx, sy).0[0]
            })
            .max()
            .unwrap_or(0);
        Luma([best])
    })
}

/// Normalised 1-D Gaussian. A non-positive sigma is derived from the size.
pub fn gaussian_kernel(ksize: u32, sigma: f64) -> Vec<f64> {
    let sigma = if sigma > 0.0 {
        sigma
    } else {
        0.3 * ((ksize as f64 - 1.0) * 0.5 - 1.0) + 0.8
    };
    let scale = -0.5 / (sigma * sigma);
    let center = (ksize as f64 - 1.0) * 0.5;
    let raw: Vec<f64> = (0..ksize)
        .map(|i| {
            let x = i as f64 - center;
            (scale * x * x).exp()
        })
        .collect();
    let sum: f64 = raw.iter().sum();
    raw.into_iter().map(|v| v / sum).collect()
}

fn separable_filter(
    src: &GrayImage,
    kernel: &[f64],
    border: fn(i64, i64) -> i64,
    stage: Stage,
) -> Result<GrayImage, TransformError> {
    let (w, h) = (src.width() as i64, src.height() as i64);
    let radius = (kernel.len() / 2) as i64;
    let raw = src.as_raw();

    let mut rows = vec![0f64; raw.len()];
    for y in 0..h {
        let row = (y * w) as usize;
        for x in 0..w {
            let mut acc = 0.0;
            for (k, weight) in kernel.iter().enumerate() {
                let sx = border(x + k as i64 - radius, w);
                acc += weight * raw[row + sx as usize] as f64;
            }
            rows[row + x as usize] = acc;
        }
    }

    let mut out = vec![0u8; raw.len()];
    for y in 0..h {
        for x in 0..w {
            let mut acc = 0.0;
            for (k, weight) in kernel.iter().enumerate() {
                let sy = border(y + k as i64 - radius, h);
                acc += weight * rows[(sy * w + x) as usize];
            }
            out[(y * w + x) as usize] = acc.round().clamp(0.0, 255.0) as u8;
        }
    }
    GrayImage::from_raw(src.width(), src.height(), out)
        .ok_or_else(|| TransformError::new(stage, "filtered buffer size mismatch"))
}

/// `gfedcb|abcdefgh|gfedcba`
fn reflect_101(mut i: i64, len: i64) -> i64 {
    if len == 1 {
        return 0;
    }
    loop {
        if i < 0 {
            i = -i;
        } else if i >= len {
            i = 2 * len - 2 - i;
        } else {
            return i;
        }
    }
}

/// `aaaaaa|abcdefgh|hhhhhhh`
fn replicate(i: i64, len: i64) -> i64 {
    i.clamp(0, len - 1)
}

//! Marker-based watershed segmentation of a single slice.
//!
//! The pipeline follows the classic "sure background / sure foreground /
//! unknown" recipe: the slice is normalized to 8 bit, binarized against the
//! [`ThresholdBand`], opened, split into foreground and background estimates
//! and flooded from connected-component seeds. The final relabel pass runs in
//! row chunks and yields to the runtime between them.

use std::ops::Range;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use image::{GrayImage, Luma};
use log::debug;
use ndarray::Array2;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::enums::BoundaryPolicy;
use crate::labelmap::LabelBuffer;
use crate::matrix_ops::{self, ImageprocOps, Keep, MatrixOps, WSHED};
use crate::stats::{ThresholdBand, map_to_range};

#[derive(Debug, Error)]
pub enum WatershedError {
    #[error("Invalid image dimensions {width}x{height}")]
    InvalidDimensions { width: usize, height: usize },

    #[error("Pixel buffer holds {actual} samples, expected {expected}")]
    BufferSizeMismatch { expected: usize, actual: usize },

    #[error("Threshold band is not finite: {0:?}")]
    InvalidThresholds(ThresholdBand),

    #[error("Matrix operation failed: {0}")]
    Matrix(String),

    #[error("Segmentation cancelled")]
    Cancelled,
}

/// Shared flag checked by the engine between row chunks.
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }

    pub fn reset(&self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct WatershedParams {
    /// Apply the 5x5 binomial blur before binarization.
    pub smooth: bool,
    /// Fraction of the peak distance a pixel needs to count as sure foreground.
    pub foreground_ratio: f32,
    /// Labels covering fewer pixels are zeroed. `0` disables the filter.
    pub min_region_size: usize,
    pub boundary_policy: BoundaryPolicy,
    pub rows_per_chunk: usize,
}

impl Default for WatershedParams {
    fn default() -> Self {
        Self {
            smooth: true,
            foreground_ratio: 0.0,
            min_region_size: 0,
            boundary_policy: BoundaryPolicy::Background,
            rows_per_chunk: 16,
        }
    }
}

pub struct Watershed<O = ImageprocOps> {
    ops: O,
    params: WatershedParams,
}

impl Default for Watershed<ImageprocOps> {
    fn default() -> Self {
        Self::new(ImageprocOps, WatershedParams::default())
    }
}

impl<O: MatrixOps> Watershed<O> {
    pub fn new(ops: O, params: WatershedParams) -> Self {
        Self { ops, params }
    }

    pub fn params(&self) -> &WatershedParams {
        &self.params
    }

    pub fn set_params(&mut self, params: WatershedParams) {
        self.params = params;
    }

    /// Segment one `width` x `height` slice into at most `max_labels` labels.
    ///
    /// # Errors
    ///
    /// Fails on inconsistent input, on a primitive failure and when `cancel`
    /// fires. No label buffer is produced in any of these cases.
    pub async fn segment(
        &self,
        width: usize,
        height: usize,
        pixels: &[f32],
        band: &ThresholdBand,
        max_labels: u16,
        cancel: &CancelToken,
    ) -> Result<LabelBuffer, WatershedError> {
        if width == 0 || height == 0 || width > u32::MAX as usize || height > u32::MAX as usize {
            return Err(WatershedError::InvalidDimensions { width, height });
        }
        if pixels.len() != width * height {
            return Err(WatershedError::BufferSizeMismatch {
                expected: width * height,
                actual: pixels.len(),
            });
        }
        if !band.is_finite() {
            return Err(WatershedError::InvalidThresholds(*band));
        }

        let gray = normalize_to_u8(width, height, pixels, band)?;
        let mut markers = self.seed_markers(&gray, band)?;
        self.ops.watershed(&gray, &mut markers)?;

        if self.params.min_region_size > 0 {
            zero_small_regions(&mut markers, self.params.min_region_size);
        }

        let markers = clamp_labels(&markers, max_labels);
        let mut labels = vec![0u16; width * height];
        let mut running = 1u16;
        let chunk = self.params.rows_per_chunk.max(1);
        let mut start = 0;
        while start < height {
            if cancel.is_cancelled() {
                return Err(WatershedError::Cancelled);
            }
            let end = (start + chunk).min(height);
            resolve_rows(
                &markers,
                start..end,
                self.params.boundary_policy,
                &mut running,
                &mut labels,
            );
            start = end;
            tokio::task::yield_now().await;
        }
        Ok(labels)
    }

    fn seed_markers(
        &self,
        gray: &GrayImage,
        band: &ThresholdBand,
    ) -> Result<Array2<i32>, WatershedError> {
        let source = if self.params.smooth {
            matrix_ops::smooth(gray)
        } else {
            gray.clone()
        };
        let lower = self.ops.binarize(&source, band.lower_threshold, Keep::AtLeast);
        let upper = self.ops.binarize(&source, band.upper_threshold, Keep::AtMost);
        let in_band = matrix_ops::bitwise_and(&lower, &upper)?;

        let opening = self.ops.dilate(&self.ops.erode(&in_band));
        let background = self.ops.dilate(&opening);
        let distances = self.ops.distance_transform(&opening);
        let foreground = threshold_distances(&distances, self.params.foreground_ratio);
        let unknown = matrix_ops::subtract(&background, &foreground)?;

        let mut markers = self.ops.connected_components(&foreground);
        if markers.dim() != (gray.height() as usize, gray.width() as usize) {
            return Err(WatershedError::Matrix(format!(
                "component map is {:?}",
                markers.dim()
            )));
        }
        let mut seeds = 0usize;
        for ((y, x), marker) in markers.indexed_iter_mut() {
            if unknown.get_pixel(x as u32, y as u32)[0] == 255 {
                *marker = 0;
            } else {
                *marker += 1;
                seeds = seeds.max(*marker as usize);
            }
        }
        debug!(
            "watershed seeds: {} labels over {}x{}",
            seeds,
            gray.width(),
            gray.height()
        );
        Ok(markers)
    }
}

fn normalize_to_u8(
    width: usize,
    height: usize,
    pixels: &[f32],
    band: &ThresholdBand,
) -> Result<GrayImage, WatershedError> {
    let data: Vec<u8> = pixels
        .par_iter()
        .map(|&value| {
            map_to_range(value as f64, band.min_threshold, band.max_threshold).clamp(0.0, 255.0)
                as u8
        })
        .collect();
    GrayImage::from_raw(width as u32, height as u32, data)
        .ok_or(WatershedError::InvalidDimensions { width, height })
}

fn threshold_distances(distances: &Array2<f32>, ratio: f32) -> GrayImage {
    let (rows, cols) = distances.dim();
    let peak = distances.iter().copied().fold(0.0_f32, f32::max);
    GrayImage::from_fn(cols as u32, rows as u32, |x, y| {
        let distance = distances[[y as usize, x as usize]];
        let foreground = peak > 0.0 && distance / peak > ratio;
        Luma([if foreground { 255 } else { 0 }])
    })
}

/// Zero every positive label that covers fewer than `min_size` pixels.
pub fn zero_small_regions(markers: &mut Array2<i32>, min_size: usize) {
    let peak = markers.iter().copied().max().unwrap_or(0).max(0) as usize;
    let mut counts = vec![0usize; peak + 1];
    for &marker in markers.iter().filter(|&&marker| marker > 0) {
        counts[marker as usize] += 1;
    }
    for marker in markers.iter_mut().filter(|marker| **marker > 0) {
        if counts[*marker as usize] < min_size {
            *marker = 0;
        }
    }
}

/// Clamp positive markers to `max_labels` (at least `1`), leaving ridges and
/// background alone.
pub fn clamp_labels(markers: &Array2<i32>, max_labels: u16) -> Array2<i32> {
    let cap = max_labels.max(1) as i32;
    markers.mapv(|marker| marker.min(cap))
}

/// Turn a flooded marker map into a label buffer in one pass.
pub fn resolve_markers(
    markers: &Array2<i32>,
    max_labels: u16,
    policy: BoundaryPolicy,
) -> LabelBuffer {
    let markers = clamp_labels(markers, max_labels);
    let (rows, cols) = markers.dim();
    let mut labels = vec![0; rows * cols];
    let mut running = 1;
    resolve_rows(&markers, 0..rows, policy, &mut running, &mut labels);
    labels
}

/// Expects markers already passed through [`clamp_labels`].
fn resolve_rows(
    markers: &Array2<i32>,
    rows: Range<usize>,
    policy: BoundaryPolicy,
    running: &mut u16,
    labels: &mut [u16],
) {
    let (height, width) = markers.dim();
    for y in rows {
        for x in 0..width {
            let marker = markers[[y, x]];
            let index = y * width + x;
            labels[index] = if marker == WSHED {
                let on_frame = y == 0 || x == 0 || y + 1 == height || x + 1 == width;
                match policy {
                    BoundaryPolicy::RunningLabel if !on_frame => *running,
                    _ => 0,
                }
            } else if marker >= 1 {
                *running = marker as u16;
                *running
            } else {
                0
            };
        }
    }
}

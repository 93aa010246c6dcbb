use image::ImageBuffer;
use image::Luma;
use ndarray::Array3;
use ndarray::ArrayView2;
use ndarray::s;
use rayon::prelude::*;
use thiserror::Error;

use crate::stats::{map_to_range, min_max};

#[derive(Debug, Error)]
pub enum ImageSourceError {
    #[error("Slice {index} out of range (volume has {count} slices)")]
    SliceOutOfRange { index: usize, count: usize },

    #[error("Unexpected slice layout: {0}")]
    Shape(String),
}

/// Raw samples of one slice plus what is needed to interpret them.
#[derive(Debug, Clone, PartialEq)]
pub struct PixelSlice {
    pub rows: usize,
    pub columns: usize,
    pub slope: f64,
    pub intercept: f64,
    pub data: Vec<f32>,
}

impl PixelSlice {
    pub fn new(rows: usize, columns: usize, data: Vec<f32>) -> Self {
        Self {
            rows,
            columns,
            slope: 1.0,
            intercept: 0.0,
            data,
        }
    }

    pub fn with_rescale(mut self, slope: f64, intercept: f64) -> Self {
        self.slope = slope;
        self.intercept = intercept;
        self
    }
}

/// Supplies the pixel buffers of a series, slice by slice.
pub trait ImageSource {
    fn series_uid(&self) -> &str;

    fn slice_count(&self) -> usize;

    fn image_id(&self, index: usize) -> Option<&str>;

    fn pixel_slice(&self, index: usize) -> Result<PixelSlice, ImageSourceError>;
}

/// Axial stack of stored pixel values, `(depth, height, width)`.
#[derive(Default)]
pub struct Volume {
    pub data: Array3<f32>,
    pub spacing: (f32, f32, f32),
    pub series_uid: String,
    pub image_ids: Vec<String>,
    pub rescale: (f64, f64),
}

impl Volume {
    pub fn new(data: Array3<f32>, spacing: (f32, f32, f32)) -> Self {
        let depth = data.dim().0;
        Self {
            data,
            spacing,
            series_uid: String::new(),
            image_ids: (0..depth).map(|index| format!("slice-{index}")).collect(),
            rescale: (1.0, 0.0),
        }
    }

    pub fn with_identity(mut self, series_uid: impl Into<String>, image_ids: Vec<String>) -> Self {
        self.series_uid = series_uid.into();
        if image_ids.len() == self.data.dim().0 {
            self.image_ids = image_ids;
        }
        self
    }

    pub fn with_rescale(mut self, slope: f64, intercept: f64) -> Self {
        self.rescale = (slope, intercept);
        self
    }

    /// Get the dimensions of the volume (depth, height, width)
    pub fn dim(&self) -> (usize, usize, usize) {
        self.data.dim()
    }

    pub fn get_slice(&self, index: usize) -> Option<ArrayView2<'_, f32>> {
        if index >= self.dim().0 {
            return None;
        }
        Some(self.data.slice(s![index, .., ..]))
    }

    /// Slice rendered to 8 bit over its own value range.
    pub fn slice_preview(&self, index: usize) -> Option<ImageBuffer<Luma<u8>, Vec<u8>>> {
        let slice = self.get_slice(index)?;
        let (height, width) = slice.dim();
        let values: Vec<f32> = slice.iter().copied().collect();
        let (min, max) = min_max(&values);
        let pixel_data: Vec<u8> = values
            .into_par_iter()
            .map(|v| map_to_range(v as f64, min, max).clamp(0.0, 255.0) as u8)
            .collect();
        ImageBuffer::from_raw(width as u32, height as u32, pixel_data)
    }
}

impl ImageSource for Volume {
    fn series_uid(&self) -> &str {
        &self.series_uid
    }

    fn slice_count(&self) -> usize {
        self.dim().0
    }

    fn image_id(&self, index: usize) -> Option<&str> {
        self.image_ids.get(index).map(String::as_str)
    }

    fn pixel_slice(&self, index: usize) -> Result<PixelSlice, ImageSourceError> {
        let slice = self
            .get_slice(index)
            .ok_or(ImageSourceError::SliceOutOfRange {
                index,
                count: self.slice_count(),
            })?;
        let (rows, columns) = slice.dim();
        let data: Vec<f32> = slice.iter().copied().collect();
        if data.len() != rows * columns {
            return Err(ImageSourceError::Shape(format!(
                "{} samples for {}x{}",
                data.len(),
                rows,
                columns
            )));
        }
        let (slope, intercept) = self.rescale;
        Ok(PixelSlice::new(rows, columns, data).with_rescale(slope, intercept))
    }
}

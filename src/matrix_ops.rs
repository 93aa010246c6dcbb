//! Image primitives used by the watershed engine.
//!
//! The engine only talks to [`MatrixOps`]; [`ImageprocOps`] implements it
//! on top of `imageproc` for the morphology, distance and labelling steps
//! and floods markers itself.

use std::collections::VecDeque;

use image::{GrayImage, Luma};
use imageproc::distance_transform::{Norm, euclidean_squared_distance_transform};
use imageproc::filter::separable_filter_equal;
use imageproc::morphology;
use imageproc::region_labelling::{Connectivity, connected_components};
use ndarray::Array2;

use crate::watershed::WatershedError;

/// Marker value written on watershed ridges and on the image frame.
pub const WSHED: i32 = -1;
const IN_QUEUE: i32 = -2;

/// Which side of a threshold survives binarization.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Keep {
    AtLeast,
    AtMost,
}

pub trait MatrixOps {
    /// `255` where the pixel is kept, `0` elsewhere.
    fn binarize(&self, image: &GrayImage, threshold: f64, keep: Keep) -> GrayImage;

    /// One pass with a 3x3 structuring element.
    fn erode(&self, image: &GrayImage) -> GrayImage;

    /// One pass with a 3x3 structuring element.
    fn dilate(&self, image: &GrayImage) -> GrayImage;

    /// Euclidean distance of every foreground pixel to the closest
    /// background pixel, `0` on the background.
    fn distance_transform(&self, image: &GrayImage) -> Array2<f32>;

    /// 8-connected labelling of the non-zero pixels, background `0`,
    /// components numbered from `1`.
    fn connected_components(&self, image: &GrayImage) -> Array2<i32>;

    /// Flood `markers` over `image`. Positive markers are seeds, `0` is
    /// unknown; ridges and the frame end up as [`WSHED`].
    fn watershed(&self, image: &GrayImage, markers: &mut Array2<i32>) -> Result<(), WatershedError>;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct ImageprocOps;

impl MatrixOps for ImageprocOps {
    fn binarize(&self, image: &GrayImage, threshold: f64, keep: Keep) -> GrayImage {
        let mut out = image.clone();
        for pixel in out.pixels_mut() {
            let value = pixel[0] as f64;
            let kept = match keep {
                Keep::AtLeast => value >= threshold,
                Keep::AtMost => value <= threshold,
            };
            pixel[0] = if kept { 255 } else { 0 };
        }
        out
    }

    fn erode(&self, image: &GrayImage) -> GrayImage {
        morphology::erode(image, Norm::LInf, 1)
    }

    fn dilate(&self, image: &GrayImage) -> GrayImage {
        morphology::dilate(image, Norm::LInf, 1)
    }

    fn distance_transform(&self, image: &GrayImage) -> Array2<f32> {
        let (width, height) = image.dimensions();
        // imageproc measures the distance to the nearest non-zero pixel, so
        // the background has to be the non-zero side
        let mut background = image.clone();
        for pixel in background.pixels_mut() {
            pixel[0] = if pixel[0] == 0 { 255 } else { 0 };
        }
        let squared = euclidean_squared_distance_transform(&background);
        // no background at all: every pixel is as far as it can be
        let ceiling = (width + height) as f32;

        Array2::from_shape_fn((height as usize, width as usize), |(y, x)| {
            let distance = squared.get_pixel(x as u32, y as u32)[0].sqrt() as f32;
            if distance.is_finite() {
                distance
            } else {
                ceiling
            }
        })
    }

    fn connected_components(&self, image: &GrayImage) -> Array2<i32> {
        let (width, height) = image.dimensions();
        let labels = connected_components(image, Connectivity::Eight, Luma([0u8]));
        Array2::from_shape_fn((height as usize, width as usize), |(y, x)| {
            labels.get_pixel(x as u32, y as u32)[0] as i32
        })
    }

    fn watershed(
        &self,
        image: &GrayImage,
        markers: &mut Array2<i32>,
    ) -> Result<(), WatershedError> {
        let (width, height) = image.dimensions();
        if markers.dim() != (height as usize, width as usize) {
            return Err(WatershedError::Matrix(format!(
                "markers are {:?}, image is {}x{}",
                markers.dim(),
                height,
                width
            )));
        }
        flood(image, markers);
        Ok(())
    }
}

/// Meyer flooding with 256 FIFO buckets keyed by intensity difference.
fn flood(image: &GrayImage, markers: &mut Array2<i32>) {
    let (rows, cols) = markers.dim();
    if rows == 0 || cols == 0 {
        return;
    }
    for x in 0..cols {
        markers[[0, x]] = WSHED;
        markers[[rows - 1, x]] = WSHED;
    }
    for y in 0..rows {
        markers[[y, 0]] = WSHED;
        markers[[y, cols - 1]] = WSHED;
    }
    if rows < 3 || cols < 3 {
        return;
    }

    let intensity = |y: usize, x: usize| image.get_pixel(x as u32, y as u32)[0];
    let neighbours = |y: usize, x: usize| [(y - 1, x), (y, x - 1), (y, x + 1), (y + 1, x)];
    let mut queues: Vec<VecDeque<(usize, usize)>> = vec![VecDeque::new(); 256];

    for y in 1..rows - 1 {
        for x in 1..cols - 1 {
            if markers[[y, x]] != 0 {
                continue;
            }
            let centre = intensity(y, x);
            let priority = neighbours(y, x)
                .into_iter()
                .filter(|&(ny, nx)| markers[[ny, nx]] > 0)
                .map(|(ny, nx)| centre.abs_diff(intensity(ny, nx)) as usize)
                .min();
            if let Some(priority) = priority {
                markers[[y, x]] = IN_QUEUE;
                queues[priority].push_back((y, x));
            }
        }
    }

    let mut active = 0usize;
    loop {
        while active < queues.len() && queues[active].is_empty() {
            active += 1;
        }
        let Some((y, x)) = queues.get_mut(active).and_then(VecDeque::pop_front) else {
            break;
        };

        let mut label = 0;
        for (ny, nx) in neighbours(y, x) {
            let neighbour = markers[[ny, nx]];
            if neighbour <= 0 {
                continue;
            }
            if label == 0 {
                label = neighbour;
            } else if label != neighbour {
                label = WSHED;
            }
        }
        if label == 0 {
            label = WSHED;
        }
        markers[[y, x]] = label;
        if label == WSHED {
            continue;
        }

        let centre = intensity(y, x);
        for (ny, nx) in neighbours(y, x) {
            if markers[[ny, nx]] != 0 {
                continue;
            }
            markers[[ny, nx]] = IN_QUEUE;
            let priority = centre.abs_diff(intensity(ny, nx)) as usize;
            queues[priority].push_back((ny, nx));
            active = active.min(priority);
        }
    }
}

/// 5x5 binomial smoothing, borders padded by continuity.
pub fn smooth(image: &GrayImage) -> GrayImage {
    const KERNEL: [f32; 5] = [0.0625, 0.25, 0.375, 0.25, 0.0625];
    if image.width() == 0 || image.height() == 0 {
        return image.clone();
    }
    separable_filter_equal(image, &KERNEL)
}

/// Pixel-wise AND of two binary images.
pub fn bitwise_and(left: &GrayImage, right: &GrayImage) -> Result<GrayImage, WatershedError> {
    ensure_same_size(left, right)?;
    Ok(GrayImage::from_fn(left.width(), left.height(), |x, y| {
        Luma([left.get_pixel(x, y)[0] & right.get_pixel(x, y)[0]])
    }))
}

/// Saturating pixel-wise `left - right`.
pub fn subtract(left: &GrayImage, right: &GrayImage) -> Result<GrayImage, WatershedError> {
    ensure_same_size(left, right)?;
    Ok(GrayImage::from_fn(left.width(), left.height(), |x, y| {
        Luma([left.get_pixel(x, y)[0].saturating_sub(right.get_pixel(x, y)[0])])
    }))
}

fn ensure_same_size(left: &GrayImage, right: &GrayImage) -> Result<(), WatershedError> {
    if left.dimensions() != right.dimensions() {
        return Err(WatershedError::Matrix(format!(
            "size mismatch: {:?} vs {:?}",
            left.dimensions(),
            right.dimensions()
        )));
    }
    Ok(())
}

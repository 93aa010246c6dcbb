use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;

use image::{GrayImage, ImageResult};

/// One label per pixel, row-major. `0` is unlabeled.
pub type LabelBuffer = Vec<u16>;

/// A slice label map as handed to a [`LabelmapStore`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LabelMap2D {
    pub pixel_data: LabelBuffer,
    pub segments_on_labelmap: Vec<u16>,
}

impl LabelMap2D {
    pub fn new(pixel_data: LabelBuffer) -> Self {
        let segments_on_labelmap = segments_on_labelmap(&pixel_data);
        Self {
            pixel_data,
            segments_on_labelmap,
        }
    }
}

/// Sink for label maps, usually the segmentation module of a viewer.
pub trait LabelmapStore {
    fn set_segments_per_labelmap(&mut self, count: u16);

    fn write_slice(&mut self, index: usize, labelmap: LabelMap2D);

    fn write_volume(&mut self, labelmaps: Vec<(usize, LabelMap2D)>);

    fn request_redraw(&mut self);
}

/// Label maps kept in memory, keyed by slice index.
#[derive(Debug, Default)]
pub struct InMemoryLabelmaps {
    pub segments_per_labelmap: u16,
    pub slices: BTreeMap<usize, LabelMap2D>,
    pub redraws: usize,
}

impl InMemoryLabelmaps {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn slice(&self, index: usize) -> Option<&LabelMap2D> {
        self.slices.get(&index)
    }

    /// Save one slice as an 8-bit image, labels spread over the gray range.
    pub fn save_slice(
        &self,
        index: usize,
        width: u32,
        height: u32,
        path: impl AsRef<Path>,
    ) -> ImageResult<bool> {
        let Some(labelmap) = self.slices.get(&index) else {
            return Ok(false);
        };
        let step = (255 / self.segments_per_labelmap.max(1)).max(1);
        let pixels: Vec<u8> = labelmap
            .pixel_data
            .iter()
            .map(|&label| label.saturating_mul(step).min(255) as u8)
            .collect();
        match GrayImage::from_raw(width, height, pixels) {
            Some(image) => image.save(path).map(|_| true),
            None => Ok(false),
        }
    }
}

impl LabelmapStore for InMemoryLabelmaps {
    fn set_segments_per_labelmap(&mut self, count: u16) {
        self.segments_per_labelmap = count;
    }

    fn write_slice(&mut self, index: usize, labelmap: LabelMap2D) {
        self.slices.insert(index, labelmap);
    }

    fn write_volume(&mut self, labelmaps: Vec<(usize, LabelMap2D)>) {
        self.slices.extend(labelmaps);
    }

    fn request_redraw(&mut self) {
        self.redraws += 1;
    }
}

/// Sorted distinct values present in `buffer`.
pub fn segments_on_labelmap(buffer: &[u16]) -> Vec<u16> {
    buffer
        .iter()
        .copied()
        .collect::<BTreeSet<_>>()
        .into_iter()
        .collect()
}

/// Label covering the most stroke pixels, ties going to the lowest label.
///
/// Labels above `masks_number` are not counted. `None` when the stroke misses
/// the buffer entirely.
pub fn majority_label(
    buffer: &[u16],
    columns: usize,
    coords: &[(usize, usize)],
    masks_number: u16,
) -> Option<u16> {
    let mut counts = vec![0usize; masks_number as usize + 1];
    let mut hits = 0usize;
    for &(x, y) in coords {
        if x >= columns {
            continue;
        }
        let Some(&label) = buffer.get(y * columns + x) else {
            continue;
        };
        if let Some(count) = counts.get_mut(label as usize) {
            *count += 1;
            hits += 1;
        }
    }
    if hits == 0 {
        return None;
    }
    let max = counts.iter().copied().max()?;
    counts
        .iter()
        .position(|&count| count == max)
        .map(|label| label as u16)
}

/// Zero every cell carrying `label`. Returns the number of cleared cells.
pub fn erase_label(buffer: &mut [u16], label: u16) -> usize {
    replace_label(buffer, label, 0)
}

/// Zero the cells under the stroke.
pub fn erase_at(buffer: &mut [u16], columns: usize, coords: &[(usize, usize)]) -> usize {
    let mut erased = 0;
    for &(x, y) in coords {
        if x >= columns {
            continue;
        }
        if let Some(cell) = buffer.get_mut(y * columns + x) {
            if *cell != 0 {
                erased += 1;
            }
            *cell = 0;
        }
    }
    erased
}

/// Rewrite every `from` cell to `to`. Returns the number of rewritten cells.
pub fn replace_label(buffer: &mut [u16], from: u16, to: u16) -> usize {
    if from == to {
        return 0;
    }
    let mut changed = 0;
    for cell in buffer.iter_mut().filter(|cell| **cell == from) {
        *cell = to;
        changed += 1;
    }
    changed
}

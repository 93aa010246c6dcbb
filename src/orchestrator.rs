use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use log::{debug, warn};

use crate::enums::{ClickPhase, ProcessType};
use crate::labelmap::{
    LabelBuffer, LabelMap2D, erase_at, erase_label, majority_label, replace_label,
};
use crate::matrix_ops::{ImageprocOps, MatrixOps};
use crate::session::SessionError;
use crate::stats::ThresholdBand;
use crate::volume::{ImageSource, PixelSlice};
use crate::watershed::{CancelToken, Watershed, WatershedError, WatershedParams};

/// What a stroke sees of the slice under the pointer.
pub struct StrokeContext<'a> {
    pub slice_index: usize,
    pub pixels: Arc<PixelSlice>,
    /// Required for segmentation, ignored by the edit modes.
    pub band: Option<ThresholdBand>,
    pub masks_number: u16,
    pub cancel: &'a CancelToken,
}

/// Labels remembered between strokes of the erase and pick workflows.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct EditState {
    pub picked_label: Option<u16>,
    pub label_to_erase: Option<u16>,
    pub label_to_change: Option<u16>,
    pub click_phase: ClickPhase,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EditOutcome {
    /// Label maps that changed, ready for the labelmap store.
    Updated {
        mode: ProcessType,
        labelmaps: Vec<(usize, LabelMap2D)>,
    },
    /// First click of the pick workflow; nothing changed yet.
    LabelPicked(u16),
    NoOp,
}

/// Per-series segmentation state.
///
/// Single-image strokes work on one buffer (`current`). Multi-image strokes
/// fill and edit a store keyed by slice index. Pixel buffers fetched for the
/// multi-image path are cached until the series changes.
pub struct SliceOrchestrator<O = ImageprocOps> {
    engine: Watershed<O>,
    current: Option<LabelBuffer>,
    slices: BTreeMap<usize, LabelBuffer>,
    pixels: HashMap<usize, Arc<PixelSlice>>,
    edit: EditState,
}

impl Default for SliceOrchestrator<ImageprocOps> {
    fn default() -> Self {
        Self::new(Watershed::default())
    }
}

impl<O: MatrixOps> SliceOrchestrator<O> {
    pub fn new(engine: Watershed<O>) -> Self {
        Self {
            engine,
            current: None,
            slices: BTreeMap::new(),
            pixels: HashMap::new(),
            edit: EditState::default(),
        }
    }

    pub fn set_params(&mut self, params: WatershedParams) {
        self.engine.set_params(params);
    }

    pub fn edit_state(&self) -> EditState {
        self.edit
    }

    pub fn current(&self) -> Option<&LabelBuffer> {
        self.current.as_ref()
    }

    pub fn slice(&self, index: usize) -> Option<&LabelBuffer> {
        self.slices.get(&index)
    }

    /// Every stored slice as a [`LabelMap2D`], in slice order.
    pub fn labelmaps(&self) -> Vec<(usize, LabelMap2D)> {
        self.slices
            .iter()
            .map(|(&index, buffer)| (index, LabelMap2D::new(buffer.clone())))
            .collect()
    }

    /// Seed the buffer of slice `index` with an existing label map.
    pub fn restore(&mut self, index: usize, buffer: LabelBuffer, multi: bool) {
        if multi {
            self.slices.insert(index, buffer);
        } else {
            self.current = Some(buffer);
        }
    }

    /// Forget the single-image buffer and the edit workflow. A series change
    /// also drops the slice store and the pixel cache.
    pub fn reset(&mut self, series_changed: bool) {
        self.current = None;
        self.edit = EditState::default();
        if series_changed {
            self.slices.clear();
            self.pixels.clear();
        }
    }

    pub async fn process_single_image(
        &mut self,
        mode: ProcessType,
        ctx: &StrokeContext<'_>,
        coords: &[(usize, usize)],
    ) -> Result<EditOutcome, SessionError> {
        match mode {
            ProcessType::Segment => {
                let band = ctx.band.ok_or(SessionError::DegenerateStatistics)?;
                let labels = self.segment(&ctx.pixels, &band, ctx).await?;
                self.current = Some(labels.clone());
                Ok(updated(mode, vec![(ctx.slice_index, labels)]))
            }
            _ => self.edit_active(mode, ctx, coords, false),
        }
    }

    /// Run `mode` over slices `[start, end)` of `source`.
    ///
    /// Reversed bounds are swapped and `end` is clamped to the slice count.
    /// Segmentation stops at the first failure and only commits the range
    /// once every slice succeeded.
    pub async fn process_multi_image<S: ImageSource + ?Sized>(
        &mut self,
        mode: ProcessType,
        ctx: &StrokeContext<'_>,
        coords: &[(usize, usize)],
        start: usize,
        end: usize,
        source: &S,
    ) -> Result<EditOutcome, SessionError> {
        let (start, end) = if start > end { (end, start) } else { (start, end) };
        let end = end.min(source.slice_count());

        match mode {
            ProcessType::Segment => {
                let band = ctx.band.ok_or(SessionError::DegenerateStatistics)?;
                self.pixels.insert(ctx.slice_index, Arc::clone(&ctx.pixels));
                let mut labelmaps = Vec::with_capacity(end.saturating_sub(start));
                for index in start..end {
                    if ctx.cancel.is_cancelled() {
                        return Err(WatershedError::Cancelled.into());
                    }
                    let pixels = self.pixels_for(index, source)?;
                    let labels = match self.segment(&pixels, &band, ctx).await {
                        Ok(labels) => labels,
                        Err(err) => {
                            warn!("segmentation stopped at slice {index}: {err}");
                            return Err(err);
                        }
                    };
                    labelmaps.push((index, labels));
                }
                for (index, labels) in &labelmaps {
                    self.slices.insert(*index, labels.clone());
                }
                debug!("segmented slices {start}..{end}");
                Ok(updated(mode, labelmaps))
            }
            ProcessType::EraseByLabel if !self.slices.is_empty() => {
                let columns = ctx.pixels.columns;
                let Some(active) = self.slices.get(&ctx.slice_index) else {
                    return Ok(EditOutcome::NoOp);
                };
                let Some(label) = majority_label(active, columns, coords, ctx.masks_number) else {
                    return Ok(EditOutcome::NoOp);
                };
                self.edit.label_to_erase = Some(label);
                let mut erased = 0;
                let mut labelmaps = Vec::new();
                for (&index, buffer) in self.slices.range_mut(start..end) {
                    erased += erase_label(buffer, label);
                    labelmaps.push((index, buffer.clone()));
                }
                debug!("erased label {label} from {erased} cells in {start}..{end}");
                Ok(updated(mode, labelmaps))
            }
            _ => self.edit_active(mode, ctx, coords, true),
        }
    }

    async fn segment(
        &self,
        pixels: &PixelSlice,
        band: &ThresholdBand,
        ctx: &StrokeContext<'_>,
    ) -> Result<LabelBuffer, SessionError> {
        let labels = self
            .engine
            .segment(
                pixels.columns,
                pixels.rows,
                &pixels.data,
                band,
                ctx.masks_number,
                ctx.cancel,
            )
            .await?;
        Ok(labels)
    }

    /// Pixel buffer of slice `index`, fetched from `source` on a cache miss.
    pub fn pixels_for<S: ImageSource + ?Sized>(
        &mut self,
        index: usize,
        source: &S,
    ) -> Result<Arc<PixelSlice>, SessionError> {
        if let Some(pixels) = self.pixels.get(&index) {
            return Ok(Arc::clone(pixels));
        }
        let pixels = Arc::new(source.pixel_slice(index)?);
        self.pixels.insert(index, Arc::clone(&pixels));
        Ok(pixels)
    }

    /// Erase and pick modes on the buffer of the active slice.
    fn edit_active(
        &mut self,
        mode: ProcessType,
        ctx: &StrokeContext<'_>,
        coords: &[(usize, usize)],
        multi: bool,
    ) -> Result<EditOutcome, SessionError> {
        let columns = ctx.pixels.columns;
        let masks = ctx.masks_number;
        let buffer = if multi && !self.slices.is_empty() {
            self.slices.get_mut(&ctx.slice_index)
        } else {
            self.current.as_mut()
        };
        let Some(buffer) = buffer else {
            return Ok(EditOutcome::NoOp);
        };

        match mode {
            ProcessType::Segment => Ok(EditOutcome::NoOp),
            ProcessType::EraseByLabel => {
                let Some(label) = majority_label(buffer, columns, coords, masks) else {
                    return Ok(EditOutcome::NoOp);
                };
                self.edit.label_to_erase = Some(label);
                erase_label(buffer, label);
                Ok(updated(mode, vec![(ctx.slice_index, buffer.clone())]))
            }
            ProcessType::EraseManual => {
                if coords.is_empty() {
                    return Ok(EditOutcome::NoOp);
                }
                let erased = erase_at(buffer, columns, coords);
                debug!("erased {erased} cells by hand");
                Ok(updated(mode, vec![(ctx.slice_index, buffer.clone())]))
            }
            ProcessType::PickLabel => {
                let Some(label) = majority_label(buffer, columns, coords, masks) else {
                    return Ok(EditOutcome::NoOp);
                };
                match (self.edit.click_phase, self.edit.picked_label) {
                    (ClickPhase::Second, Some(picked)) => {
                        self.edit.label_to_change = Some(label);
                        self.edit.click_phase = ClickPhase::First;
                        let changed = replace_label(buffer, label, picked);
                        debug!("repainted {changed} cells from {label} to {picked}");
                        Ok(updated(mode, vec![(ctx.slice_index, buffer.clone())]))
                    }
                    _ => {
                        self.edit.picked_label = Some(label);
                        self.edit.click_phase = ClickPhase::Second;
                        Ok(EditOutcome::LabelPicked(label))
                    }
                }
            }
        }
    }
}

fn updated(mode: ProcessType, buffers: Vec<(usize, LabelBuffer)>) -> EditOutcome {
    EditOutcome::Updated {
        mode,
        labelmaps: buffers
            .into_iter()
            .map(|(index, buffer)| (index, LabelMap2D::new(buffer)))
            .collect(),
    }
}

//! Pointer-driven state machine around the segmentation brush.
//!
//! A [`WatershedSession`] keeps the identity of the image under the brush,
//! the cached [`ThresholdBand`] and the per-series label maps. Each pointer
//! event resolves a [`ProcessType`] from the held modifiers, samples the
//! brush footprint and hands the stroke to the [`SliceOrchestrator`]. Label
//! maps reach the [`LabelmapStore`] only when a stroke succeeds.

use log::{debug, error, info};
use thiserror::Error;

use crate::circle::get_circle;
use crate::config::ToolConfig;
use crate::enums::{Modifiers, ProcessType};
use crate::labelmap::{LabelBuffer, LabelmapStore};
use crate::matrix_ops::{ImageprocOps, MatrixOps};
use crate::orchestrator::{EditOutcome, EditState, SliceOrchestrator, StrokeContext};
use crate::stats::ThresholdBand;
use crate::volume::{ImageSource, ImageSourceError};
use crate::watershed::{CancelToken, Watershed, WatershedError};

#[derive(Debug, Error)]
pub enum SessionError {
    #[error("Stroke statistics are degenerate")]
    DegenerateStatistics,

    #[error("Watershed error: {0}")]
    Watershed(#[from] WatershedError),

    #[error("Image source error: {0}")]
    ImageSource(#[from] ImageSourceError),
}

/// Pointer position in image pixel coordinates.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PointerEvent {
    pub x: f64,
    pub y: f64,
    pub slice_index: usize,
    pub modifiers: Modifiers,
    pub primary_button: bool,
}

impl PointerEvent {
    pub fn new(x: f64, y: f64, slice_index: usize) -> Self {
        Self {
            x,
            y,
            slice_index,
            modifiers: Modifiers::NONE,
            primary_button: true,
        }
    }

    pub fn with_modifiers(mut self, modifiers: Modifiers) -> Self {
        self.modifiers = modifiers;
        self
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StrokeOutcome {
    /// The pointer was outside the image or the event does not start a stroke.
    Ignored,
    /// Nothing to edit yet.
    NoOp,
    /// First click of the pick workflow.
    Picked(u16),
    /// Label maps of these slices were written to the store.
    Written {
        mode: ProcessType,
        slices: Vec<usize>,
    },
}

/// Snapshot of what the session currently tracks.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct SessionState {
    pub current_image_id: Option<String>,
    pub current_series_id: Option<String>,
    pub slice_index: usize,
    pub slices_number: usize,
    pub multi_image: bool,
    pub start_index: Option<usize>,
    pub end_index: Option<usize>,
    pub masks_number: u16,
    pub edit: EditState,
}

pub struct WatershedSession<O = ImageprocOps> {
    config: ToolConfig,
    orchestrator: SliceOrchestrator<O>,
    band: Option<ThresholdBand>,
    image_id: Option<String>,
    series_id: Option<String>,
    slice_index: usize,
    slices_number: usize,
    cancel: CancelToken,
    in_progress: bool,
}

impl WatershedSession<ImageprocOps> {
    pub fn new<L: LabelmapStore + ?Sized>(config: ToolConfig, store: &mut L) -> Self {
        Self::with_engine(config, ImageprocOps, store)
    }
}

impl<O: MatrixOps> WatershedSession<O> {
    /// Build a session on custom matrix primitives and register the label
    /// count with `store`.
    pub fn with_engine<L: LabelmapStore + ?Sized>(
        config: ToolConfig,
        ops: O,
        store: &mut L,
    ) -> Self {
        store.set_segments_per_labelmap(config.masks_number());
        let engine = Watershed::new(ops, config.watershed);
        Self {
            config,
            orchestrator: SliceOrchestrator::new(engine),
            band: None,
            image_id: None,
            series_id: None,
            slice_index: 0,
            slices_number: 0,
            cancel: CancelToken::new(),
            in_progress: false,
        }
    }

    pub fn config(&self) -> &ToolConfig {
        &self.config
    }

    pub fn orchestrator(&self) -> &SliceOrchestrator<O> {
        &self.orchestrator
    }

    pub fn threshold_band(&self) -> Option<ThresholdBand> {
        self.band
    }

    pub fn radius(&self) -> i32 {
        self.config.radius
    }

    pub fn in_progress(&self) -> bool {
        self.in_progress
    }

    /// Handle that stops the running stroke at its next chunk or slice
    /// boundary.
    pub fn cancel_handle(&self) -> CancelToken {
        self.cancel.clone()
    }

    pub fn state(&self) -> SessionState {
        SessionState {
            current_image_id: self.image_id.clone(),
            current_series_id: self.series_id.clone(),
            slice_index: self.slice_index,
            slices_number: self.slices_number,
            multi_image: self.config.multi_image,
            start_index: self.config.start_index,
            end_index: self.config.end_index,
            masks_number: self.config.masks_number(),
            edit: self.orchestrator.edit_state(),
        }
    }

    /// Switch between single and multi image mode.
    pub fn toggle(
        &mut self,
        multi_image: bool,
        start_index: Option<usize>,
        end_index: Option<usize>,
        masks_number: Option<u16>,
    ) {
        self.config
            .toggle(multi_image, start_index, end_index, masks_number);
        info!(
            "watershed mode: multi_image={} range={:?}..={:?} masks={}",
            multi_image,
            self.config.start_index,
            self.config.end_index,
            self.config.masks_number
        );
    }

    /// Resume editing a label map produced elsewhere for `slice_index`.
    pub fn restore<S: ImageSource + ?Sized>(
        &mut self,
        slice_index: usize,
        buffer: LabelBuffer,
        source: &S,
    ) -> Result<(), SessionError> {
        self.check_identity(slice_index, source);
        let pixels = self.orchestrator.pixels_for(slice_index, source)?;
        let expected = pixels.rows * pixels.columns;
        if buffer.len() != expected {
            return Err(WatershedError::BufferSizeMismatch {
                expected,
                actual: buffer.len(),
            }
            .into());
        }
        self.orchestrator
            .restore(slice_index, buffer, self.config.multi_image);
        Ok(())
    }

    pub fn increase_sensitivity(&mut self) {
        self.config.sensitivity_factor.increase();
        self.band = None;
    }

    pub fn decrease_sensitivity(&mut self) {
        self.config.sensitivity_factor.decrease();
        self.band = None;
    }

    /// Resize the brush when a modifier is held. Returns whether the wheel
    /// event was consumed.
    pub fn on_wheel(&mut self, delta_y: f64, modifiers: Modifiers) -> bool {
        if !modifiers.any() {
            return false;
        }
        self.config.radius += if delta_y > 0.0 { 1 } else { -1 };
        self.config.radius = self.config.radius.max(1);
        true
    }

    pub async fn on_pointer_down<S, L>(
        &mut self,
        event: PointerEvent,
        source: &S,
        store: &mut L,
    ) -> Result<StrokeOutcome, SessionError>
    where
        S: ImageSource + ?Sized,
        L: LabelmapStore + ?Sized,
    {
        if !event.primary_button {
            return Ok(StrokeOutcome::Ignored);
        }
        self.stroke(event, source, store).await
    }

    /// Drags only continue manual erasing.
    pub async fn on_pointer_drag<S, L>(
        &mut self,
        event: PointerEvent,
        source: &S,
        store: &mut L,
    ) -> Result<StrokeOutcome, SessionError>
    where
        S: ImageSource + ?Sized,
        L: LabelmapStore + ?Sized,
    {
        if !event.primary_button || !event.modifiers.shift {
            return Ok(StrokeOutcome::Ignored);
        }
        let event = event.with_modifiers(Modifiers {
            shift: true,
            ..Modifiers::NONE
        });
        self.stroke(event, source, store).await
    }

    async fn stroke<S, L>(
        &mut self,
        event: PointerEvent,
        source: &S,
        store: &mut L,
    ) -> Result<StrokeOutcome, SessionError>
    where
        S: ImageSource + ?Sized,
        L: LabelmapStore + ?Sized,
    {
        self.check_identity(event.slice_index, source);

        let pixels = self.orchestrator.pixels_for(event.slice_index, source)?;
        let (rows, columns) = (pixels.rows, pixels.columns);
        if !(event.x >= 0.0 && event.y >= 0.0)
            || event.x >= columns as f64
            || event.y >= rows as f64
        {
            return Ok(StrokeOutcome::Ignored);
        }

        let mode = ProcessType::from_modifiers(event.modifiers);
        let coords = get_circle(self.config.radius, rows, columns, event.x, event.y);

        if mode == ProcessType::Segment && self.band.is_none() {
            let band = ThresholdBand::estimate(
                &pixels.data,
                columns,
                &coords,
                self.config.min_threshold,
                self.config.max_threshold,
                self.config.sensitivity_factor,
            )
            .filter(ThresholdBand::is_finite)
            .ok_or(SessionError::DegenerateStatistics)?;
            debug!(
                "threshold band {:.2}..{:.2} over {}..{}",
                band.lower_threshold, band.upper_threshold, band.min_threshold, band.max_threshold
            );
            self.band = Some(band);
        }

        self.cancel.reset();
        self.in_progress = true;
        let ctx = StrokeContext {
            slice_index: event.slice_index,
            pixels,
            band: self.band,
            masks_number: self.config.masks_number(),
            cancel: &self.cancel,
        };
        let result = match self.config.slice_range(source.slice_count()) {
            Some(range) => {
                self.orchestrator
                    .process_multi_image(mode, &ctx, &coords, range.start, range.end, source)
                    .await
            }
            None => {
                self.orchestrator
                    .process_single_image(mode, &ctx, &coords)
                    .await
            }
        };
        self.in_progress = false;

        let outcome = match result {
            Ok(outcome) => outcome,
            Err(err) => {
                error!("{mode:?} stroke on slice {} failed: {err}", event.slice_index);
                return Err(err);
            }
        };

        Ok(match outcome {
            EditOutcome::NoOp => StrokeOutcome::NoOp,
            EditOutcome::LabelPicked(label) => StrokeOutcome::Picked(label),
            EditOutcome::Updated { mode, labelmaps } => {
                let slices = labelmaps.iter().map(|(index, _)| *index).collect();
                if self.config.multi_image {
                    store.write_volume(labelmaps);
                } else {
                    for (index, labelmap) in labelmaps {
                        store.write_slice(index, labelmap);
                    }
                }
                store.request_redraw();
                StrokeOutcome::Written { mode, slices }
            }
        })
    }

    fn check_identity<S: ImageSource + ?Sized>(&mut self, slice_index: usize, source: &S) {
        let series = source.series_uid();
        let image = source.image_id(slice_index);
        let series_changed = self.series_id.as_deref() != Some(series);
        let image_changed = self.image_id.as_deref() != image;
        if series_changed || image_changed {
            debug!("brush moved to image {image:?} of series {series:?}");
            self.band = None;
            self.orchestrator.reset(series_changed);
            self.series_id = Some(series.to_string());
            self.image_id = image.map(str::to_string);
        }
        self.slice_index = slice_index;
        self.slices_number = source.slice_count();
    }
}

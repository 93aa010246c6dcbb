//! # DICOM-watershed library
//!
//! This crate provides an interactive watershed segmentation brush for
//! stacks of DICOM slices.
//!
//! A stroke samples a circular region under the pointer, derives an
//! intensity band from it and runs a marker-based watershed over the slice
//! (or over a range of slices of the same series). The resulting label maps
//! can then be edited stroke by stroke:
//!  - Plain click: segment
//!  - Ctrl+click: erase the label under the brush across the range
//!  - Shift+click or drag: erase the brush footprint
//!  - Alt+click twice: pick a label, then repaint another label with it
//!
//! Slices are read through the [`ImageSource`] trait and label maps are
//! written through [`LabelmapStore`], so the brush can sit inside any viewer.
//! [`Volume`] and [`InMemoryLabelmaps`] implement both sides for series
//! loaded from disk with [`VolumeLoader`]. DICOM files are assumed to have
//! the following attributes:
//!   - No multiframe (always the first frame is used)
//!   - Images from the same series (Series Instance UID)
//!
//! # Examples
//!
//! ## Segmenting the region under a click
//!
//! Load all DICOM files from the dicom/ directory sorted by InstanceNumber,
//! then segment the region around pixel (120, 96) of the middle slice.
//!
//! ```no_run
//! # use dicom_watershed::{
//! #     ImageSource, InMemoryLabelmaps, PointerEvent, SortBy, ToolConfig, VolumeLoader,
//! #     WatershedSession,
//! # };
//! # async fn run() -> Result<(), Box<dyn std::error::Error>> {
//! let volume = VolumeLoader::load_from_directory("dicom", SortBy::InstanceNumber)?;
//! let mut store = InMemoryLabelmaps::new();
//! let mut session = WatershedSession::new(ToolConfig::default(), &mut store);
//!
//! let slice = volume.slice_count() / 2;
//! session
//!     .on_pointer_down(PointerEvent::new(120.0, 96.0, slice), &volume, &mut store)
//!     .await?;
//! let (_, rows, columns) = volume.dim();
//! store.save_slice(slice, columns as u32, rows as u32, "labels.png")?;
//! # Ok(())
//! # }
//! ```

pub mod circle;
pub mod config;
pub mod enums;
pub mod labelmap;
pub mod matrix_ops;
pub mod orchestrator;
pub mod session;
pub mod stats;
pub mod volume;
pub mod volume_loader;
pub mod watershed;

pub use config::{ConfigError, ToolConfig, ToolDescriptor};
pub use enums::{BoundaryPolicy, ClickPhase, Modifiers, ProcessType, SortBy};
pub use labelmap::{InMemoryLabelmaps, LabelBuffer, LabelMap2D, LabelmapStore};
pub use orchestrator::{EditOutcome, SliceOrchestrator};
pub use session::{PointerEvent, SessionError, SessionState, StrokeOutcome, WatershedSession};
pub use stats::{SensitivityFactor, ThresholdBand};
pub use volume::{ImageSource, ImageSourceError, PixelSlice, Volume};
pub use volume_loader::{VolumeLoader, VolumeLoaderError};
pub use watershed::{CancelToken, Watershed, WatershedError, WatershedParams};

use std::fs;
use std::ops::Range;
use std::path::Path;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::stats::SensitivityFactor;
use crate::watershed::WatershedParams;

pub const DEFAULT_MASKS_NUMBER: u16 = 10;
pub const DEFAULT_RADIUS: i32 = 10;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// User-facing settings of the segmentation brush.
///
/// `end_index` is inclusive here; [`ToolConfig::slice_range`] turns the pair
/// into the half-open range the orchestrator works with.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct ToolConfig {
    pub multi_image: bool,
    pub start_index: Option<usize>,
    pub end_index: Option<usize>,
    pub masks_number: u16,
    pub sensitivity_factor: SensitivityFactor,
    pub radius: i32,
    /// Overrides the observed minimum when normalizing intensities.
    pub min_threshold: Option<f64>,
    /// Overrides the observed maximum when normalizing intensities.
    pub max_threshold: Option<f64>,
    pub watershed: WatershedParams,
}

impl Default for ToolConfig {
    fn default() -> Self {
        Self {
            multi_image: false,
            start_index: None,
            end_index: None,
            masks_number: DEFAULT_MASKS_NUMBER,
            sensitivity_factor: SensitivityFactor::default(),
            radius: DEFAULT_RADIUS,
            min_threshold: None,
            max_threshold: None,
            watershed: WatershedParams::default(),
        }
    }
}

impl ToolConfig {
    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let text = fs::read_to_string(path)?;
        Self::from_json_str(&text)
    }

    pub fn from_json_str(text: &str) -> Result<Self, ConfigError> {
        let mut config: Self = serde_json::from_str(text)?;
        config.masks_number = config.masks_number.max(1);
        config.radius = config.radius.max(1);
        config.sensitivity_factor = SensitivityFactor::new(config.sensitivity_factor.value());
        Ok(config)
    }

    /// Switch between single and multi image mode.
    ///
    /// Reversed bounds are swapped and `masks_number` falls back to the
    /// default when absent.
    pub fn toggle(
        &mut self,
        multi_image: bool,
        start_index: Option<usize>,
        end_index: Option<usize>,
        masks_number: Option<u16>,
    ) {
        let (start_index, end_index) = match (start_index, end_index) {
            (Some(start), Some(end)) if end < start => (Some(end), Some(start)),
            bounds => bounds,
        };
        self.multi_image = multi_image;
        if multi_image {
            self.start_index = start_index;
            self.end_index = end_index;
        } else {
            self.start_index = None;
            self.end_index = None;
        }
        self.masks_number = masks_number.unwrap_or(DEFAULT_MASKS_NUMBER).max(1);
    }

    /// Half-open slice range of a multi image stroke, `None` in single image
    /// mode.
    pub fn slice_range(&self, slices_number: usize) -> Option<Range<usize>> {
        if !self.multi_image {
            return None;
        }
        let start = self.start_index.unwrap_or(0);
        let end = self.end_index.map_or(slices_number, |end| end.saturating_add(1));
        let (start, end) = if end < start { (end, start) } else { (start, end) };
        Some(start.min(slices_number)..end.min(slices_number))
    }

    pub fn masks_number(&self) -> u16 {
        self.masks_number.max(1)
    }
}

/// Registration metadata a host viewer lists the tool under.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolDescriptor {
    pub name: &'static str,
    pub class: &'static str,
    pub description: &'static str,
    pub shortcut: &'static str,
    #[serde(rename = "type")]
    pub kind: &'static str,
    pub mouse_button_mask: u8,
    pub cleanable: bool,
}

impl ToolDescriptor {
    pub const WATERSHED: ToolDescriptor = ToolDescriptor {
        name: "WSToggle",
        class: "WSToggleTool",
        description: "Watershed Segmentation Algorithm based on selected area",
        shortcut: "ctrl-t",
        kind: "segmentation",
        mouse_button_mask: 1,
        cleanable: true,
    };
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn defaults_match_the_registered_tool() {
        let config = ToolConfig::default();
        assert!(!config.multi_image);
        assert_eq!(config.masks_number, 10);
        assert_eq!(config.sensitivity_factor.value(), 1.7);
        assert_eq!(config.slice_range(20), None);
        assert_eq!(ToolDescriptor::WATERSHED.shortcut, "ctrl-t");
    }

    #[test]
    fn inclusive_end_becomes_exclusive() {
        let config = ToolConfig {
            multi_image: true,
            start_index: Some(2),
            end_index: Some(4),
            ..Default::default()
        };
        assert_eq!(config.slice_range(10), Some(2..5));
        assert_eq!(config.slice_range(4), Some(2..4));
    }

    #[test]
    fn open_bounds_cover_the_series() {
        let config = ToolConfig {
            multi_image: true,
            ..Default::default()
        };
        assert_eq!(config.slice_range(7), Some(0..7));
    }

    #[test]
    fn toggle_swaps_reversed_bounds() {
        let mut config = ToolConfig::default();
        config.toggle(true, Some(8), Some(3), Some(0));
        assert_eq!((config.start_index, config.end_index), (Some(3), Some(8)));
        assert_eq!(config.masks_number, 1);
        assert_eq!(config.slice_range(20), Some(3..9));

        config.toggle(false, Some(1), Some(2), None);
        assert_eq!((config.start_index, config.end_index), (None, None));
        assert_eq!(config.masks_number, 10);
    }

    #[test]
    fn loads_partial_json_files() {
        let mut file = tempfile::NamedTempFile::new().expect("temp file");
        let json = r#"{
            "multiImage": true,
            "endIndex": 3,
            "masksNumber": 0,
            "watershed": { "boundaryPolicy": "runningLabel" }
        }"#;
        file.write_all(json.as_bytes()).expect("write config");

        let config = ToolConfig::from_json_file(file.path()).expect("config");
        assert!(config.multi_image);
        assert_eq!(config.masks_number, 1);
        assert_eq!(config.radius, DEFAULT_RADIUS);
        assert_eq!(
            config.watershed.boundary_policy,
            crate::enums::BoundaryPolicy::RunningLabel
        );
        assert_eq!(config.slice_range(10), Some(0..4));
    }

    #[test]
    fn malformed_json_is_reported() {
        assert!(matches!(
            ToolConfig::from_json_str("{\"radius\": \"big\"}"),
            Err(ConfigError::Json(_))
        ));
        assert!(matches!(
            ToolConfig::from_json_file("/definitely/not/here.json"),
            Err(ConfigError::Io(_))
        ));
    }
}

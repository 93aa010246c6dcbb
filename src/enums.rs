use serde::{Deserialize, Serialize};

/// Operation applied by a stroke.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcessType {
    /// Plain click: run the watershed segmentation.
    Segment,
    /// Ctrl+click: erase the label found most often under the brush.
    EraseByLabel,
    /// Shift+click or shift+drag: zero the brush footprint.
    EraseManual,
    /// Alt+click: pick a label, then repaint another label with it.
    PickLabel,
}

impl ProcessType {
    /// Resolve the stroke mode from the modifier keys held during the event.
    pub fn from_modifiers(modifiers: Modifiers) -> Self {
        if modifiers.ctrl {
            ProcessType::EraseByLabel
        } else if modifiers.shift {
            ProcessType::EraseManual
        } else if modifiers.alt {
            ProcessType::PickLabel
        } else {
            ProcessType::Segment
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Modifiers {
    pub ctrl: bool,
    pub shift: bool,
    pub alt: bool,
}

impl Modifiers {
    pub const NONE: Modifiers = Modifiers {
        ctrl: false,
        shift: false,
        alt: false,
    };

    pub fn any(&self) -> bool {
        self.ctrl || self.shift || self.alt
    }
}

/// Step of the two-click pick/repaint workflow.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum ClickPhase {
    #[default]
    First,
    Second,
}

/// How watershed ridge pixels (marker `-1`) end up in the label buffer.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum BoundaryPolicy {
    /// Every ridge pixel is background.
    #[default]
    Background,
    /// Frame pixels are background, interior ridges take the label most
    /// recently seen in row-major order.
    RunningLabel,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum SortBy {
    #[default]
    ImagePositionPatient,
    TablePosition,
    InstanceNumber,
    None,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn modifiers_resolve_in_priority_order() {
        let all = Modifiers {
            ctrl: true,
            shift: true,
            alt: true,
        };
        assert_eq!(ProcessType::from_modifiers(all), ProcessType::EraseByLabel);
        let shift_alt = Modifiers {
            shift: true,
            alt: true,
            ..Modifiers::NONE
        };
        assert_eq!(
            ProcessType::from_modifiers(shift_alt),
            ProcessType::EraseManual
        );
        let alt = Modifiers {
            alt: true,
            ..Modifiers::NONE
        };
        assert_eq!(ProcessType::from_modifiers(alt), ProcessType::PickLabel);
        assert_eq!(
            ProcessType::from_modifiers(Modifiers::NONE),
            ProcessType::Segment
        );
    }
}

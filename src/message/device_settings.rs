use bitcode::{Decode, Encode};

#[derive(Encode, Decode, Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RecordingMode {
    #[default]
    Off,
    Continuous,
}

/// Runtime-adjustable device configuration pushed by the relay in a
/// `ConfigUpdate`.
#[derive(Encode, Decode, Debug, Clone, PartialEq, Eq, Default)]
pub struct DeviceSettings {
    pub recording: RecordingMode,
    pub latest_frame_only: bool,

    /// Clockwise rotation in degrees; one of 0, 90, 180 or 270.
    pub rotation: u16,
    pub horizontal_flip: bool,
    pub vertical_flip: bool,
}

impl DeviceSettings {
    /// Rotation snapped down to the nearest supported quarter turn.
    pub fn normalized_rotation(&self) -> u16 {
        (self.rotation % 360) / 90 * 90
    }
}

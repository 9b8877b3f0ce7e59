//! Transfer status values exchanged with the sender

use std::fmt;

/// Display names indexed by status code
const STATE_NAMES: [&str; 7] = [
    "NONE",
    "TRANSMITTING",
    "OK",
    "COMPLETE",
    "ERROR",
    "CANCEL",
    "START",
];

/// Transfer status as written to and reported over the status characteristic
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[repr(u8)]
pub enum TransmitState {
    #[default]
    None = 0,
    Transmitting = 1,
    Ok = 2,
    Complete = 3,
    Error = 4,
    Cancel = 5,
    Start = 6,
}

impl TransmitState {
    /// Wire code
    pub fn code(self) -> u8 {
        self as u8
    }

    pub fn from_code(code: u8) -> Option<Self> {
        match code {
            0 => Some(TransmitState::None),
            1 => Some(TransmitState::Transmitting),
            2 => Some(TransmitState::Ok),
            3 => Some(TransmitState::Complete),
            4 => Some(TransmitState::Error),
            5 => Some(TransmitState::Cancel),
            6 => Some(TransmitState::Start),
            _ => None,
        }
    }

    pub fn name(self) -> &'static str {
        STATE_NAMES[self.code() as usize]
    }

    /// States in which payload fragments are accepted
    pub fn accepts_fragments(self) -> bool {
        matches!(
            self,
            TransmitState::Transmitting | TransmitState::Start | TransmitState::Ok
        )
    }
}

impl fmt::Display for TransmitState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_codes_round_trip() {
        for code in 0..7u8 {
            let state = TransmitState::from_code(code).unwrap();
            assert_eq!(state.code(), code);
        }
        assert_eq!(TransmitState::from_code(7), None);
    }

    #[test]
    fn test_names() {
        assert_eq!(TransmitState::Complete.to_string(), "COMPLETE");
        assert_eq!(TransmitState::Start.name(), "START");
        assert_eq!(TransmitState::default(), TransmitState::None);
    }
}

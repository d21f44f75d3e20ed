// Purpose - external interfaces, MIDI to engine event conversion

pub mod converter;
pub mod midi;

use crate::RHYTHM_CHANNEL;

/// Which MIDI channel drives which part. Unassigned MIDI channels are ignored.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChannelMap {
    parts: [Option<u8>; 16],
}

impl ChannelMap {
    /// Melodic parts on MIDI channels `first..first + 8`, rhythm on MIDI 10.
    fn with_melodic_from(first: usize) -> Self {
        let mut parts = [None; 16];
        for part in 0..RHYTHM_CHANNEL {
            parts[first + part as usize] = Some(part);
        }
        parts[9] = Some(RHYTHM_CHANNEL);
        Self { parts }
    }

    /// MIDI 1 through 8 play parts 1 through 8.
    pub fn alternate() -> Self {
        Self::with_melodic_from(0)
    }

    pub fn empty() -> Self {
        Self { parts: [None; 16] }
    }

    /// `midi_channel` is 0-based.
    pub fn part(&self, midi_channel: u8) -> Option<u8> {
        self.parts.get(midi_channel as usize).copied().flatten()
    }

    pub fn assign(&mut self, midi_channel: u8, part: Option<u8>) {
        if let Some(slot) = self.parts.get_mut(midi_channel as usize) {
            *slot = part;
        }
    }
}

/// MIDI 2 through 9 play parts 1 through 8, rhythm on MIDI 10.
impl Default for ChannelMap {
    fn default() -> Self {
        Self::with_melodic_from(1)
    }
}

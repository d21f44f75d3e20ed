/// Channel voice message as received from a MIDI port. `channel` is 0-based.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MidiEvent {
    NoteOn { channel: u8, key: u8, velocity: u8 },
    NoteOff { channel: u8, key: u8, velocity: u8 },
    ControlChange { channel: u8, controller: u8, value: u8 },
    /// 14-bit, 8192 is centre.
    PitchBend { channel: u8, value: u16 },
    ProgramChange { channel: u8, program: u8 },
}

impl MidiEvent {
    /// Decode a channel voice message from its status and data bytes.
    pub fn from_bytes(bytes: &[u8]) -> Option<Self> {
        let (&status, data) = bytes.split_first()?;
        let channel = status & 0x0F;
        let data1 = data.first().copied().unwrap_or(0) & 0x7F;
        let data2 = data.get(1).copied().unwrap_or(0) & 0x7F;
        let event = match status & 0xF0 {
            0x80 if data.len() >= 2 => MidiEvent::NoteOff {
                channel,
                key: data1,
                velocity: data2,
            },
            0x90 if data.len() >= 2 => MidiEvent::NoteOn {
                channel,
                key: data1,
                velocity: data2,
            },
            0xB0 if data.len() >= 2 => MidiEvent::ControlChange {
                channel,
                controller: data1,
                value: data2,
            },
            0xC0 if !data.is_empty() => MidiEvent::ProgramChange {
                channel,
                program: data1,
            },
            0xE0 if data.len() >= 2 => MidiEvent::PitchBend {
                channel,
                value: ((data2 as u16) << 7) | data1 as u16,
            },
            _ => return None,
        };
        Some(event)
    }
}

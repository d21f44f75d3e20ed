use std::collections::VecDeque;

#[cfg(feature = "rtrb")]
use rtrb::Consumer;

/// Channel-addressed events accepted by the engine. `channel` is the part
/// index (0..=8), not the MIDI channel; see `io::ChannelMap`.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum SynthMessage {
    NoteOn { channel: u8, key: u8, velocity: u8 },
    NoteOff { channel: u8, key: u8 },
    ControlChange { channel: u8, controller: u8, value: u8 },
    ProgramChange { channel: u8, program: u8 },
    /// 14-bit value centred on 8192.
    PitchBend { channel: u8, value: u16 },
    AllNotesOff { channel: u8 },
    AllSoundOff { channel: u8 },
}

impl SynthMessage {
    pub fn channel(&self) -> u8 {
        match *self {
            SynthMessage::NoteOn { channel, .. }
            | SynthMessage::NoteOff { channel, .. }
            | SynthMessage::ControlChange { channel, .. }
            | SynthMessage::ProgramChange { channel, .. }
            | SynthMessage::PitchBend { channel, .. }
            | SynthMessage::AllNotesOff { channel }
            | SynthMessage::AllSoundOff { channel } => channel,
        }
    }
}

pub trait MessageReceiver {
    fn pop(&mut self) -> Option<SynthMessage>;
}

#[cfg(feature = "rtrb")]
impl MessageReceiver for Consumer<SynthMessage> {
    fn pop(&mut self) -> Option<SynthMessage> {
        Consumer::pop(self).ok()
    }
}

impl MessageReceiver for VecDeque<SynthMessage> {
    fn pop(&mut self) -> Option<SynthMessage> {
        self.pop_front()
    }
}

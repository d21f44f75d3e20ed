use crate::{
    io::{midi::MidiEvent, ChannelMap},
    synth::message::SynthMessage,
};

/// Route a MIDI event to its part. Events on unmapped MIDI channels yield `None`.
pub fn midi_to_synth(midi: MidiEvent, map: &ChannelMap) -> Option<SynthMessage> {
    let msg = match midi {
        // Running-status note-off
        MidiEvent::NoteOn {
            channel,
            key,
            velocity: 0,
        }
        | MidiEvent::NoteOff { channel, key, .. } => SynthMessage::NoteOff {
            channel: map.part(channel)?,
            key,
        },
        MidiEvent::NoteOn {
            channel,
            key,
            velocity,
        } => SynthMessage::NoteOn {
            channel: map.part(channel)?,
            key,
            velocity,
        },
        MidiEvent::ControlChange {
            channel,
            controller: 0x78,
            ..
        } => SynthMessage::AllSoundOff {
            channel: map.part(channel)?,
        },
        MidiEvent::ControlChange {
            channel,
            controller: 0x7B..=0x7F,
            ..
        } => SynthMessage::AllNotesOff {
            channel: map.part(channel)?,
        },
        MidiEvent::ControlChange {
            channel,
            controller,
            value,
        } => SynthMessage::ControlChange {
            channel: map.part(channel)?,
            controller,
            value,
        },
        MidiEvent::ProgramChange { channel, program } => SynthMessage::ProgramChange {
            channel: map.part(channel)?,
            program,
        },
        MidiEvent::PitchBend { channel, value } => SynthMessage::PitchBend {
            channel: map.part(channel)?,
            value,
        },
    };
    Some(msg)
}

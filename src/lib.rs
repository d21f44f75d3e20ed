pub mod io; // MIDI decoding and channel routing
pub mod patch; // Instrument data and the per-channel partial cache
pub mod rom; // Hardware variant capabilities
pub mod synth; // Voice admission and partial allocation

/// Eight melodic parts plus the rhythm part.
pub const CHANNEL_COUNT: usize = 9;
pub const RHYTHM_CHANNEL: u8 = 8;

pub use patch::{PatchCache, PatchParam, PatchTemp, RhythmSetting, SoundBank, TimbreParam};
pub use rom::ControlRomFeatures;
pub use synth::{Engine, NoteDropped, NoteOn, ReportHandler, SynthMessage, UnitDriver};

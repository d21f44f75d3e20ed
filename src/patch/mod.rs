//! Instrument data: patches, timbres and the rhythm key table.
//!
//! These mirror the memory areas of the sound module. The engine never decodes
//! sample data or envelope parameters; a `PartialParam` is carried through to
//! the synthesis-unit driver untouched apart from the fields the voice
//! allocator needs.

pub mod cache;

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

use crate::rom::MAX_RHYTHM_SETTINGS;

pub use cache::{PatchCache, PatchCacheEntry};

/// Patches selectable through program change.
pub const PATCH_COUNT: usize = 128;
/// Timbre slots: groups A, B, memory and rhythm, 64 each.
pub const TIMBRE_COUNT: usize = 256;
/// Rhythm timbre selector meaning "no sound on this key".
pub const DRUM_TIMBRE_OFF: u8 = 127;
/// Key shift value meaning "no shift" (raw range is 0..=48).
pub const KEY_SHIFT_NONE: u8 = 24;

#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "serde", serde(default))]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct PartialParam {
    pub waveform: u8,
    pub pcm_wave: u8,
}

#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "serde", serde(default))]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TimbreParam {
    pub name: String,
    /// Structure type (0..=12) for partials 1 and 2.
    pub partial_structure12: u8,
    /// Structure type (0..=12) for partials 3 and 4.
    pub partial_structure34: u8,
    /// Bit `n` set means partial `n` plays.
    pub partial_mute: u8,
    pub no_sustain: bool,
    pub partials: [PartialParam; 4],
}

impl Default for TimbreParam {
    fn default() -> Self {
        Self {
            name: String::new(),
            partial_structure12: 0,
            partial_structure34: 0,
            partial_mute: 0b0001,
            no_sustain: false,
            partials: [PartialParam::default(); 4],
        }
    }
}

impl TimbreParam {
    pub fn named(name: impl Into<String>) -> Self {
        let mut name: String = name.into();
        name.truncate(10);
        Self {
            name,
            ..Self::default()
        }
    }

    pub fn with_mute(mut self, partial_mute: u8) -> Self {
        self.partial_mute = partial_mute;
        self
    }

    pub fn with_structures(mut self, structure12: u8, structure34: u8) -> Self {
        self.partial_structure12 = structure12;
        self.partial_structure34 = structure34;
        self
    }

    pub fn with_no_sustain(mut self, no_sustain: bool) -> Self {
        self.no_sustain = no_sustain;
        self
    }
}

#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "serde", serde(default))]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PatchParam {
    pub timbre_group: u8,
    pub timbre_num: u8,
    /// Raw key shift, 0..=48 with 24 meaning none.
    pub key_shift: u8,
    pub fine_tune: u8,
    /// Semitones, 0..=24.
    pub bender_range: u8,
    /// Bit 1 clear: single assign. Bit 0 set: priority to first received.
    pub assign_mode: u8,
    pub reverb_switch: bool,
}

impl Default for PatchParam {
    fn default() -> Self {
        Self {
            timbre_group: 0,
            timbre_num: 0,
            key_shift: KEY_SHIFT_NONE,
            fine_tune: 50,
            bender_range: 12,
            assign_mode: 0,
            reverb_switch: true,
        }
    }
}

impl PatchParam {
    pub fn abs_timbre_num(&self) -> usize {
        self.timbre_group as usize * 64 + self.timbre_num as usize
    }

    pub fn is_single_assign(&self) -> bool {
        self.assign_mode & 2 == 0
    }

    pub fn priority_to_first(&self) -> bool {
        self.assign_mode & 1 != 0
    }
}

/// Live per-channel patch state.
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "serde", serde(default))]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PatchTemp {
    pub patch: PatchParam,
    /// 0..=100
    pub output_level: u8,
    /// 0..=14
    pub panpot: u8,
}

impl Default for PatchTemp {
    fn default() -> Self {
        Self {
            patch: PatchParam::default(),
            output_level: 80,
            panpot: 7,
        }
    }
}

/// One entry of the rhythm key table.
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "serde", serde(default))]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RhythmSetting {
    /// Drum timbre selector; `DRUM_TIMBRE_OFF` disables the key.
    pub timbre: u8,
    pub output_level: u8,
    pub panpot: u8,
    pub reverb_switch: bool,
}

impl Default for RhythmSetting {
    fn default() -> Self {
        Self {
            timbre: DRUM_TIMBRE_OFF,
            output_level: 100,
            panpot: 7,
            reverb_switch: true,
        }
    }
}

impl RhythmSetting {
    pub fn drum(timbre: u8) -> Self {
        Self {
            timbre,
            ..Self::default()
        }
    }
}

/// Everything the engine may select from: patches, timbres and the rhythm table.
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "serde", serde(default))]
#[derive(Debug, Clone, PartialEq)]
pub struct SoundBank {
    pub patches: Vec<PatchParam>,
    pub timbres: Vec<TimbreParam>,
    pub rhythm: Vec<RhythmSetting>,
}

impl SoundBank {
    /// A bank with no sounding timbres and an unmapped rhythm table.
    pub fn empty() -> Self {
        Self {
            patches: vec![PatchParam::default(); PATCH_COUNT],
            timbres: vec![TimbreParam::default().with_mute(0); TIMBRE_COUNT],
            rhythm: vec![RhythmSetting::default(); MAX_RHYTHM_SETTINGS],
        }
    }

    pub fn patch(&self, num: usize) -> Option<&PatchParam> {
        self.patches.get(num)
    }

    pub fn timbre(&self, abs_timbre_num: usize) -> Option<&TimbreParam> {
        self.timbres.get(abs_timbre_num)
    }

    /// Timbre played by a rhythm key whose drum selector is `drum_timbre`.
    pub fn drum_timbre(&self, drum_timbre: u8) -> Option<&TimbreParam> {
        self.timbre(drum_timbre as usize + 128)
    }

    pub fn set_patch(&mut self, num: usize, patch: PatchParam) {
        if let Some(slot) = self.patches.get_mut(num) {
            *slot = patch;
        }
    }

    pub fn set_timbre(&mut self, abs_timbre_num: usize, timbre: TimbreParam) {
        if abs_timbre_num >= self.timbres.len() && abs_timbre_num < TIMBRE_COUNT {
            self.timbres
                .resize(abs_timbre_num + 1, TimbreParam::default().with_mute(0));
        }
        if let Some(slot) = self.timbres.get_mut(abs_timbre_num) {
            *slot = timbre;
        }
    }

    pub fn set_rhythm(&mut self, drum: usize, setting: RhythmSetting) {
        if let Some(slot) = self.rhythm.get_mut(drum) {
            *slot = setting;
        }
    }
}

impl Default for SoundBank {
    /// Placeholder content: every patch points at its own two-partial timbre and
    /// the General MIDI percussion keys (35..=81) map to single-partial drums.
    fn default() -> Self {
        let patches = (0..PATCH_COUNT)
            .map(|n| PatchParam {
                timbre_group: (n / 64) as u8,
                timbre_num: (n % 64) as u8,
                ..PatchParam::default()
            })
            .collect();
        let timbres = (0..TIMBRE_COUNT)
            .map(|abs| {
                let timbre = TimbreParam::named(format!("Timbre{abs:03}"));
                if abs < 128 {
                    timbre.with_mute(0b0011)
                } else {
                    timbre.with_mute(0b0001).with_no_sustain(true)
                }
            })
            .collect();
        let rhythm = (0..MAX_RHYTHM_SETTINGS)
            .map(|drum| {
                let key = drum + 24;
                if (35..=81).contains(&key) {
                    RhythmSetting::drum(64 + ((key - 35) % 6) as u8)
                } else {
                    RhythmSetting::default()
                }
            })
            .collect();
        Self {
            patches,
            timbres,
            rhythm,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn abs_timbre_number_combines_group_and_number() {
        let patch = PatchParam {
            timbre_group: 2,
            timbre_num: 5,
            ..PatchParam::default()
        };
        assert_eq!(patch.abs_timbre_num(), 133);
    }

    #[test]
    fn assign_mode_bits() {
        let mut patch = PatchParam::default();
        assert!(patch.is_single_assign());
        assert!(!patch.priority_to_first());

        patch.assign_mode = 3;
        assert!(!patch.is_single_assign());
        assert!(patch.priority_to_first());
    }

    #[test]
    fn placeholder_bank_maps_gm_percussion_only() {
        let bank = SoundBank::default();
        assert_eq!(bank.rhythm[35 - 24].timbre, 64);
        assert_eq!(bank.rhythm[0].timbre, DRUM_TIMBRE_OFF);
        assert_eq!(bank.timbre(7).map(|t| t.name.as_str()), Some("Timbre007"));
    }

    #[test]
    fn timbre_names_fit_ten_characters() {
        let timbre = TimbreParam::named("Acoustic Piano 2");
        assert_eq!(timbre.name, "Acoustic P");
    }
}

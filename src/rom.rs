//! Hardware-variant capability flags.
//!
//! Different generations of the module share the same voice logic but differ in
//! a handful of documented places: how the pan controller is scaled, where the
//! patch key shift is applied, and how many rhythm timbres the control ROM maps.

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// Number of rhythm settings in the reference hardware (keys 24..=108).
pub const MAX_RHYTHM_SETTINGS: usize = 85;

#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "serde", serde(default))]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ControlRomFeatures {
    /// Pan is `value / 9` instead of `value * 8 / 68`.
    pub quirk_pan_mult: bool,
    /// Key shift is applied later in the pitch path; note keys are not remapped.
    pub quirk_key_shift: bool,
    /// Rhythm settings refreshed on the percussion channel.
    pub rhythm_settings_count: usize,
    /// Rhythm timbres available after the 64 melodic-group slots.
    pub timbre_r_count: usize,
    /// Synthesis units ("partials") in the shared pool.
    pub partial_count: usize,
    /// Voice slots ("polys") in the shared pool.
    pub voice_count: usize,
}

impl ControlRomFeatures {
    /// First-generation MT-32.
    pub fn mt32_gen0() -> Self {
        Self {
            quirk_pan_mult: true,
            quirk_key_shift: true,
            timbre_r_count: 30,
            ..Self::cm32l()
        }
    }

    /// Later MT-32 revisions.
    pub fn mt32() -> Self {
        Self {
            quirk_pan_mult: true,
            quirk_key_shift: false,
            timbre_r_count: 30,
            ..Self::cm32l()
        }
    }

    /// CM-32L / LAPC-I.
    pub fn cm32l() -> Self {
        Self {
            quirk_pan_mult: false,
            quirk_key_shift: false,
            rhythm_settings_count: MAX_RHYTHM_SETTINGS,
            timbre_r_count: 64,
            partial_count: 32,
            voice_count: 32,
        }
    }

    /// Look up a preset by its short name.
    pub fn preset(name: &str) -> Option<Self> {
        match name {
            "mt32-gen0" => Some(Self::mt32_gen0()),
            "mt32" => Some(Self::mt32()),
            "cm32l" | "lapc-i" => Some(Self::cm32l()),
            _ => None,
        }
    }

    /// Drum timbre values at or above this are unmapped.
    pub fn drum_timbre_count(&self) -> usize {
        64 + self.timbre_r_count
    }
}

impl Default for ControlRomFeatures {
    fn default() -> Self {
        Self::cm32l()
    }
}

//! Per-channel derived partial parameters.
//!
//! A timbre pairs its four partials as {1,2} and {3,4}. Each pair has one of 13
//! structure types which decide, per partial, whether it is sample (PCM) based
//! and how the two partials of the pair are mixed. The cache holds that
//! decoded view so note-on never has to look at the raw timbre again.

use super::{PartialParam, TimbreParam};

/// Bit 1: first partial of the pair is PCM. Bit 0: second partial is PCM.
const PARTIAL_STRUCT: [u8; 13] = [0, 0, 2, 2, 1, 3, 3, 0, 3, 0, 2, 1, 3];

/// Mix mode shared by both partials of a pair.
const PARTIAL_MIX_STRUCT: [u8; 13] = [0, 1, 0, 1, 1, 0, 1, 3, 3, 2, 2, 2, 2];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PatchCacheEntry {
    pub play_partial: bool,
    pub pcm_partial: bool,
    pub pcm: u8,
    pub waveform: u8,
    pub structure_mix: u8,
    /// 0 = first of the pair, 1 = second.
    pub structure_position: u8,
    /// Index of the other partial in the pair.
    pub structure_pair: usize,
    pub partial_param: PartialParam,

    // Whole-timbre values, stored redundantly in every slot
    pub partial_count: usize,
    pub sustain: bool,
    pub reverb: bool,
    pub dirty: bool,
}

impl Default for PatchCacheEntry {
    fn default() -> Self {
        Self {
            play_partial: false,
            pcm_partial: false,
            pcm: 0,
            waveform: 0,
            structure_mix: 0,
            structure_position: 0,
            structure_pair: 0,
            partial_param: PartialParam::default(),
            partial_count: 0,
            sustain: false,
            reverb: false,
            dirty: true,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct PatchCache {
    entries: [PatchCacheEntry; 4],
}

impl PatchCache {
    pub fn entries(&self) -> &[PatchCacheEntry; 4] {
        &self.entries
    }

    pub fn entry(&self, slot: usize) -> &PatchCacheEntry {
        &self.entries[slot & 3]
    }

    pub fn is_dirty(&self) -> bool {
        self.entries[0].dirty
    }

    pub fn mark_dirty(&mut self) {
        for entry in &mut self.entries {
            entry.dirty = true;
        }
    }

    pub fn set_reverb(&mut self, reverb: bool) {
        for entry in &mut self.entries {
            entry.reverb = reverb;
        }
    }

    /// Partials a note played from this cache needs.
    pub fn partial_count(&self) -> usize {
        self.entries[0].partial_count
    }

    pub fn sustain(&self) -> bool {
        self.entries[0].sustain
    }

    /// Decode `timbre` into the four slots and clear the dirty flag.
    ///
    /// Running voices must be detached from the previous contents before this
    /// is called; see `Channel::backup_cache_to_units`.
    pub fn rebuild(&mut self, timbre: &TimbreParam) {
        let mut partial_count = 0;
        for (slot, entry) in self.entries.iter_mut().enumerate() {
            let reverb = entry.reverb;
            *entry = PatchCacheEntry {
                reverb,
                ..PatchCacheEntry::default()
            };
            if (timbre.partial_mute >> slot) & 1 == 0 {
                continue;
            }
            partial_count += 1;

            let structure = if slot < 2 {
                timbre.partial_structure12
            } else {
                timbre.partial_structure34
            } as usize;
            let pcm_bits = PARTIAL_STRUCT.get(structure).copied().unwrap_or(0);
            let position = (slot & 1) as u8;
            // The first of a pair reads bit 1, the second bit 0.
            let pcm_mask = if position == 0 { 0x2 } else { 0x1 };
            let partial = timbre.partials[slot];

            entry.play_partial = true;
            entry.pcm_partial = pcm_bits & pcm_mask != 0;
            entry.pcm = partial.pcm_wave;
            entry.waveform = partial.waveform;
            entry.structure_mix = PARTIAL_MIX_STRUCT.get(structure).copied().unwrap_or(0);
            entry.structure_position = position;
            entry.structure_pair = slot ^ 1;
            entry.partial_param = partial;
        }
        for entry in &mut self.entries {
            entry.dirty = false;
            entry.partial_count = partial_count;
            entry.sustain = !timbre.no_sustain;
        }
    }
}

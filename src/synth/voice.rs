use super::{
    driver::UnitDriver,
    pool::{UnitId, VoiceId},
};
use crate::patch::PatchCache;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VoiceState {
    Playing,   // Key down, partials running
    Held,      // Key released while the hold pedal was down
    Releasing, // Partials decaying
    Inactive,  // No partials left, slot is free
}

/// A state change reported back to the owning channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Transition {
    pub from: VoiceState,
    pub to: VoiceState,
}

/// Which patch cache a voice's partials were started from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheRef {
    Melodic,
    Drum(usize),
}

/// One sounding note ("poly"), owning up to four partials.
#[derive(Debug, Clone)]
pub struct Voice {
    id: VoiceId,
    channel: Option<u8>,
    key: u8,
    velocity: u8,
    sustain: bool,
    state: VoiceState,
    units: [Option<UnitId>; 4],
    active_units: usize,
    // None once the running partials hold their own copy of the parameters
    cache: Option<CacheRef>,
}

impl Voice {
    pub(crate) fn new(id: VoiceId) -> Self {
        Self {
            id,
            channel: None,
            key: 0,
            velocity: 0,
            sustain: false,
            state: VoiceState::Inactive,
            units: [None; 4],
            active_units: 0,
            cache: None,
        }
    }

    pub(crate) fn assign(&mut self, channel: u8) {
        self.channel = Some(channel);
    }

    pub(crate) fn release_slot(&mut self) {
        self.channel = None;
        self.cache = None;
        self.units = [None; 4];
        self.active_units = 0;
        self.state = VoiceState::Inactive;
    }

    /// Start a new note on a free slot.
    pub(crate) fn reset(
        &mut self,
        key: u8,
        velocity: u8,
        sustain: bool,
        units: [Option<UnitId>; 4],
        cache: CacheRef,
    ) -> Option<Transition> {
        debug_assert!(!self.is_active(), "resetting an active poly");
        self.key = key;
        self.velocity = velocity;
        self.sustain = sustain;
        self.units = units;
        self.active_units = units.iter().flatten().count();
        self.cache = Some(cache);
        let next = if self.active_units > 0 {
            VoiceState::Playing
        } else {
            VoiceState::Inactive
        };
        self.set_state(next)
    }

    /// Returns `None` if the voice ignored the note-off. A held voice ignores
    /// further note-offs while the pedal is down.
    pub(crate) fn note_off(
        &mut self,
        pedal_held: bool,
        driver: &mut dyn UnitDriver,
    ) -> Option<Transition> {
        if matches!(self.state, VoiceState::Inactive | VoiceState::Releasing) {
            return None;
        }
        if pedal_held {
            self.set_state(VoiceState::Held)
        } else {
            self.start_decay(driver)
        }
    }

    pub(crate) fn stop_pedal_hold(&mut self, driver: &mut dyn UnitDriver) -> Option<Transition> {
        if self.state != VoiceState::Held {
            return None;
        }
        self.start_decay(driver)
    }

    pub(crate) fn start_decay(&mut self, driver: &mut dyn UnitDriver) -> Option<Transition> {
        if matches!(self.state, VoiceState::Inactive | VoiceState::Releasing) {
            return None;
        }
        let transition = self.set_state(VoiceState::Releasing);
        for unit in self.units.iter().flatten() {
            driver.start_decay(*unit);
        }
        transition
    }

    /// Ask every partial to ramp down fast. Completion arrives later through
    /// `unit_deactivated`.
    pub(crate) fn start_abort(&mut self, driver: &mut dyn UnitDriver) -> bool {
        if self.state == VoiceState::Inactive {
            return false;
        }
        for unit in self.units.iter().flatten() {
            driver.start_abort(*unit);
        }
        true
    }

    /// Detach one partial. Reports the move to `Inactive` when it was the last.
    pub(crate) fn unit_deactivated(&mut self, unit: UnitId) -> Option<Transition> {
        let slot = self.units.iter().position(|u| *u == Some(unit))?;
        self.units[slot] = None;
        self.active_units -= 1;
        if self.active_units == 0 {
            self.set_state(VoiceState::Inactive)
        } else {
            None
        }
    }

    /// Hand the partials a private copy of `cache` so the channel may overwrite it.
    pub(crate) fn backup_cache(
        &mut self,
        source: CacheRef,
        cache: &PatchCache,
        driver: &mut dyn UnitDriver,
    ) {
        if self.cache != Some(source) {
            return;
        }
        for (slot, unit) in self.units.iter().enumerate() {
            if let Some(unit) = unit {
                driver.backup_cache(*unit, cache.entry(slot));
            }
        }
        self.cache = None;
    }

    fn set_state(&mut self, next: VoiceState) -> Option<Transition> {
        if self.state == next {
            return None;
        }
        let from = self.state;
        self.state = next;
        Some(Transition { from, to: next })
    }

    pub fn id(&self) -> VoiceId {
        self.id
    }

    pub fn channel(&self) -> Option<u8> {
        self.channel
    }

    pub fn key(&self) -> u8 {
        self.key
    }

    pub fn velocity(&self) -> u8 {
        self.velocity
    }

    pub fn can_sustain(&self) -> bool {
        self.sustain
    }

    pub fn state(&self) -> VoiceState {
        self.state
    }

    pub fn is_active(&self) -> bool {
        self.state != VoiceState::Inactive
    }

    pub fn active_unit_count(&self) -> usize {
        self.active_units
    }

    pub fn units(&self) -> &[Option<UnitId>; 4] {
        &self.units
    }

    pub fn cache_ref(&self) -> Option<CacheRef> {
        self.cache
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        patch::{PatchCacheEntry, TimbreParam},
        synth::driver::UnitStart,
    };

    #[derive(Default)]
    struct Calls {
        decays: Vec<UnitId>,
        aborts: Vec<UnitId>,
        backups: Vec<UnitId>,
    }

    impl UnitDriver for Calls {
        fn start_unit(&mut self, _start: UnitStart<'_>) {}

        fn start_decay(&mut self, unit: UnitId) {
            self.decays.push(unit);
        }

        fn start_abort(&mut self, unit: UnitId) {
            self.aborts.push(unit);
        }

        fn backup_cache(&mut self, unit: UnitId, _entry: &PatchCacheEntry) {
            self.backups.push(unit);
        }
    }

    fn playing_voice() -> Voice {
        let mut voice = Voice::new(VoiceId::new(0));
        voice.assign(0);
        let units = [Some(UnitId::new(3)), None, Some(UnitId::new(4)), None];
        let t = voice.reset(60, 100, true, units, CacheRef::Melodic);
        assert_eq!(
            t,
            Some(Transition {
                from: VoiceState::Inactive,
                to: VoiceState::Playing
            })
        );
        voice
    }

    #[test]
    fn note_off_without_pedal_decays_all_partials() {
        let mut calls = Calls::default();
        let mut voice = playing_voice();

        let t = voice.note_off(false, &mut calls);
        assert_eq!(t.map(|t| t.to), Some(VoiceState::Releasing));
        assert_eq!(calls.decays, vec![UnitId::new(3), UnitId::new(4)]);

        // A releasing voice ignores further note-offs.
        assert!(voice.note_off(false, &mut calls).is_none());
    }

    #[test]
    fn pedal_holds_until_released() {
        let mut calls = Calls::default();
        let mut voice = playing_voice();

        let t = voice.note_off(true, &mut calls);
        assert_eq!(t.map(|t| t.to), Some(VoiceState::Held));
        assert!(calls.decays.is_empty());

        // Already held: the note-off passes on to the next voice.
        assert!(voice.note_off(true, &mut calls).is_none());
        assert_eq!(voice.state(), VoiceState::Held);

        let t = voice.stop_pedal_hold(&mut calls);
        assert_eq!(t.map(|t| t.to), Some(VoiceState::Releasing));
        assert_eq!(calls.decays.len(), 2);
    }

    #[test]
    fn pedal_release_ignores_playing_voice() {
        let mut calls = Calls::default();
        let mut voice = playing_voice();
        assert!(voice.stop_pedal_hold(&mut calls).is_none());
        assert_eq!(voice.state(), VoiceState::Playing);
    }

    #[test]
    fn last_partial_deactivation_makes_voice_inactive() {
        let mut voice = playing_voice();

        assert!(voice.unit_deactivated(UnitId::new(3)).is_none());
        assert_eq!(voice.active_unit_count(), 1);
        assert!(voice.unit_deactivated(UnitId::new(9)).is_none());

        let t = voice.unit_deactivated(UnitId::new(4));
        assert_eq!(t.map(|t| t.to), Some(VoiceState::Inactive));
        assert!(!voice.is_active());
    }

    #[test]
    fn abort_reaches_every_partial() {
        let mut calls = Calls::default();
        let mut voice = playing_voice();
        assert!(voice.start_abort(&mut calls));
        assert_eq!(calls.aborts.len(), 2);

        let mut idle = Voice::new(VoiceId::new(1));
        assert!(!idle.start_abort(&mut calls));
    }

    #[test]
    fn backup_only_touches_voices_of_that_cache() {
        let mut calls = Calls::default();
        let mut voice = playing_voice();
        let mut cache = PatchCache::default();
        cache.rebuild(&TimbreParam::named("Piano").with_mute(0b0101));

        voice.backup_cache(CacheRef::Drum(3), &cache, &mut calls);
        assert!(calls.backups.is_empty());

        voice.backup_cache(CacheRef::Melodic, &cache, &mut calls);
        assert_eq!(calls.backups, vec![UnitId::new(3), UnitId::new(4)]);
        assert_eq!(voice.cache_ref(), None);

        // Second pass finds nothing left to copy.
        voice.backup_cache(CacheRef::Melodic, &cache, &mut calls);
        assert_eq!(calls.backups.len(), 2);
    }
}

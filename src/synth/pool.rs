//! The shared pool of partials and polys.
//!
//! Every channel competes for the same fixed set of synthesis units. Channels
//! never touch occupancy directly; they reserve, start and release units and
//! polys through the operations here.

use std::collections::VecDeque;

use tracing::{trace, warn};

use super::{
    driver::UnitDriver,
    error::NoteDropped,
    voice::{Transition, Voice},
};

/// Handle of one synthesis unit ("partial") in the pool.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct UnitId(u16);

impl UnitId {
    pub fn new(index: usize) -> Self {
        Self(index as u16)
    }

    pub fn index(self) -> usize {
        self.0 as usize
    }
}

/// Handle of one voice slot ("poly") in the pool.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct VoiceId(u16);

impl VoiceId {
    pub fn new(index: usize) -> Self {
        Self(index as u16)
    }

    pub fn index(self) -> usize {
        self.0 as usize
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnitState {
    Free,
    /// Reserved for a note on `channel`, not started yet.
    Allocated { channel: u8 },
    Started { channel: u8, voice: VoiceId },
}

/// Units set aside for one note-on. Either every unit is started or the
/// reservation is handed back with `ResourcePool::cancel`.
#[derive(Debug)]
pub struct Reservation {
    channel: u8,
    units: [Option<UnitId>; 4],
    next: usize,
}

impl Reservation {
    pub fn channel(&self) -> u8 {
        self.channel
    }

    pub fn remaining(&self) -> usize {
        self.units[self.next.min(4)..].iter().flatten().count()
    }

    pub(crate) fn take(&mut self) -> Option<UnitId> {
        let unit = self.units.get(self.next).copied().flatten()?;
        self.next += 1;
        Some(unit)
    }
}

/// Result of a partial finishing: who owned it and what happened to the voice.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UnitRelease {
    pub channel: u8,
    pub voice: VoiceId,
    pub transition: Option<Transition>,
}

pub struct ResourcePool {
    units: Vec<UnitState>,
    free_units: usize,
    voices: Vec<Voice>,
    free_voices: VecDeque<VoiceId>,
    aborting: Option<VoiceId>,
}

impl ResourcePool {
    pub fn new(unit_count: usize, voice_count: usize) -> Self {
        let unit_count = unit_count.min(u16::MAX as usize);
        let voice_count = voice_count.min(u16::MAX as usize);
        Self {
            units: vec![UnitState::Free; unit_count],
            free_units: unit_count,
            voices: (0..voice_count).map(|i| Voice::new(VoiceId::new(i))).collect(),
            free_voices: (0..voice_count).map(VoiceId::new).collect(),
            aborting: None,
        }
    }

    pub fn unit_capacity(&self) -> usize {
        self.units.len()
    }

    pub fn voice_capacity(&self) -> usize {
        self.voices.len()
    }

    pub fn free_unit_count(&self) -> usize {
        self.free_units
    }

    pub fn free_voice_count(&self) -> usize {
        self.free_voices.len()
    }

    pub fn unit_state(&self, unit: UnitId) -> Option<UnitState> {
        self.units.get(unit.index()).copied()
    }

    /// Units started and attached to a voice.
    pub fn attached_unit_count(&self) -> usize {
        self.units
            .iter()
            .filter(|state| matches!(state, UnitState::Started { .. }))
            .count()
    }

    /// Units in use by `channel`, reserved or started.
    pub fn units_for_channel(&self, channel: u8) -> usize {
        self.units
            .iter()
            .filter(|state| match state {
                UnitState::Allocated { channel: c } | UnitState::Started { channel: c, .. } => {
                    *c == channel
                }
                UnitState::Free => false,
            })
            .count()
    }

    pub fn voice(&self, id: VoiceId) -> Option<&Voice> {
        self.voices.get(id.index())
    }

    pub(crate) fn voice_mut(&mut self, id: VoiceId) -> Option<&mut Voice> {
        self.voices.get_mut(id.index())
    }

    /// Set aside `needed` free units for `channel`, lowest index first.
    /// Nothing changes if the pool cannot cover the whole request.
    pub fn reserve(&mut self, channel: u8, needed: usize) -> Result<Reservation, NoteDropped> {
        if needed > 4 || needed > self.free_units {
            return Err(NoteDropped::InsufficientUnits {
                needed,
                free: self.free_units,
            });
        }
        let mut reservation = Reservation {
            channel,
            units: [None; 4],
            next: 0,
        };
        let free = self
            .units
            .iter_mut()
            .enumerate()
            .filter(|(_, state)| **state == UnitState::Free)
            .take(needed);
        for (slot, (index, state)) in free.enumerate() {
            *state = UnitState::Allocated { channel };
            reservation.units[slot] = Some(UnitId::new(index));
        }
        self.free_units -= needed;
        trace!(channel, needed, free = self.free_units, "reserved partials");
        Ok(reservation)
    }

    /// Return every unit of a reservation that was not started.
    pub fn cancel(&mut self, reservation: Reservation) {
        for unit in reservation.units.iter().flatten() {
            if let Some(state) = self.units.get_mut(unit.index()) {
                if matches!(state, UnitState::Allocated { .. }) {
                    *state = UnitState::Free;
                    self.free_units += 1;
                }
            }
        }
    }

    pub(crate) fn start_unit(&mut self, unit: UnitId, voice: VoiceId) {
        if let Some(state) = self.units.get_mut(unit.index()) {
            if let UnitState::Allocated { channel } = *state {
                *state = UnitState::Started { channel, voice };
            }
        }
    }

    /// A partial finished. Frees it, detaches it from its voice and ends a
    /// pending abort when that voice has nothing left.
    pub(crate) fn unit_deactivated(&mut self, unit: UnitId) -> Option<UnitRelease> {
        let Some(state) = self.units.get_mut(unit.index()) else {
            warn!(unit = unit.index(), "deactivation of unknown partial");
            return None;
        };
        let UnitState::Started { channel, voice } = *state else {
            warn!(unit = unit.index(), ?state, "deactivation of partial that was not started");
            return None;
        };
        *state = UnitState::Free;
        self.free_units += 1;

        let transition = self
            .voices
            .get_mut(voice.index())
            .and_then(|v| v.unit_deactivated(unit));
        let voice_done = self.voice(voice).map_or(true, |v| !v.is_active());
        if voice_done && self.aborting == Some(voice) {
            trace!(voice = voice.index(), "abort finished");
            self.aborting = None;
        }
        Some(UnitRelease {
            channel,
            voice,
            transition,
        })
    }

    pub(crate) fn assign_voice(&mut self, channel: u8) -> Option<VoiceId> {
        let id = self.free_voices.pop_front()?;
        if let Some(voice) = self.voices.get_mut(id.index()) {
            voice.assign(channel);
        }
        Some(id)
    }

    pub(crate) fn free_voice(&mut self, id: VoiceId) {
        let Some(voice) = self.voices.get_mut(id.index()) else {
            return;
        };
        if voice.channel().is_none() {
            return;
        }
        voice.release_slot();
        self.free_voices.push_back(id);
    }

    pub fn is_aborting(&self) -> bool {
        self.aborting.is_some()
    }

    pub fn aborting_voice(&self) -> Option<VoiceId> {
        self.aborting
    }

    /// Only one voice may be aborting at a time.
    pub(crate) fn start_abort(&mut self, id: VoiceId, driver: &mut dyn UnitDriver) -> bool {
        if self.aborting.is_some() {
            return false;
        }
        let Some(voice) = self.voices.get_mut(id.index()) else {
            return false;
        };
        if !voice.start_abort(driver) {
            return false;
        }
        self.aborting = Some(id);
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::synth::voice::{CacheRef, VoiceState};

    #[test]
    fn reservation_takes_lowest_free_units() {
        let mut pool = ResourcePool::new(8, 4);
        let mut first = pool.reserve(0, 3).unwrap();
        assert_eq!(pool.free_unit_count(), 5);
        assert_eq!(first.take(), Some(UnitId::new(0)));
        assert_eq!(first.remaining(), 2);

        pool.cancel(first);
        assert_eq!(pool.free_unit_count(), 8);
        assert_eq!(pool.unit_state(UnitId::new(0)), Some(UnitState::Free));
        assert_eq!(pool.unit_state(UnitId::new(1)), Some(UnitState::Free));
    }

    #[test]
    fn oversized_request_changes_nothing() {
        let mut pool = ResourcePool::new(4, 4);
        let _held = pool.reserve(1, 3).unwrap();
        let err = pool.reserve(2, 2).unwrap_err();
        assert_eq!(err, NoteDropped::InsufficientUnits { needed: 2, free: 1 });
        assert_eq!(pool.free_unit_count(), 1);
        assert_eq!(pool.units_for_channel(2), 0);
    }

    #[test]
    fn voice_slots_are_reused_in_fifo_order() {
        let mut pool = ResourcePool::new(4, 2);
        let a = pool.assign_voice(0).unwrap();
        let b = pool.assign_voice(0).unwrap();
        assert!(pool.assign_voice(0).is_none());

        pool.free_voice(a);
        pool.free_voice(a);
        assert_eq!(pool.free_voice_count(), 1);
        assert_eq!(pool.assign_voice(1), Some(a));
        assert_ne!(a, b);
    }

    #[test]
    fn deactivation_returns_unit_and_reports_owner() {
        let mut pool = ResourcePool::new(4, 2);
        let mut reservation = pool.reserve(5, 1).unwrap();
        let unit = reservation.take().unwrap();
        let voice = pool.assign_voice(5).unwrap();
        pool.voice_mut(voice)
            .unwrap()
            .reset(60, 100, true, [Some(unit), None, None, None], CacheRef::Melodic);
        pool.start_unit(unit, voice);
        assert_eq!(pool.attached_unit_count(), 1);

        let release = pool.unit_deactivated(unit).unwrap();
        assert_eq!(release.channel, 5);
        assert_eq!(release.voice, voice);
        assert_eq!(release.transition.map(|t| t.to), Some(VoiceState::Inactive));
        assert_eq!(pool.free_unit_count(), 4);

        // A second report for the same unit is ignored.
        assert!(pool.unit_deactivated(unit).is_none());
    }
}

//! Collaborators the engine drives but does not implement.
//!
//! The synthesis layer runs the actual partials and reports back through
//! `Engine::unit_deactivated`. The report handler receives fire-and-forget
//! notifications for displays and telemetry.

use super::pool::{UnitId, VoiceId};
use crate::patch::{PatchCacheEntry, PatchTemp, RhythmSetting};

/// Everything a partial needs to start sounding.
#[derive(Debug, Clone, Copy)]
pub struct UnitStart<'a> {
    pub unit: UnitId,
    pub voice: VoiceId,
    pub channel: u8,
    /// Internal key after remapping.
    pub key: u8,
    pub velocity: u8,
    pub cache: &'a PatchCacheEntry,
    pub patch_temp: &'a PatchTemp,
    /// Drum settings when played on the rhythm channel.
    pub rhythm: Option<&'a RhythmSetting>,
    /// The other partial of the structure pair, if it plays.
    pub pair: Option<UnitId>,
}

pub trait UnitDriver {
    fn start_unit(&mut self, start: UnitStart<'_>);

    /// Enter the release phase.
    fn start_decay(&mut self, unit: UnitId);

    /// Ramp down quickly so the unit can be reused.
    fn start_abort(&mut self, unit: UnitId);

    /// The channel is about to overwrite the cache this unit was started
    /// from; keep a private copy of `entry`.
    fn backup_cache(&mut self, unit: UnitId, entry: &PatchCacheEntry);
}

/// Discards every request. Useful when only the bookkeeping matters.
impl UnitDriver for () {
    fn start_unit(&mut self, _start: UnitStart<'_>) {}
    fn start_decay(&mut self, _unit: UnitId) {}
    fn start_abort(&mut self, _unit: UnitId) {}
    fn backup_cache(&mut self, _unit: UnitId, _entry: &PatchCacheEntry) {}
}

pub trait ReportHandler {
    /// A voice was added to or removed from `channel`.
    fn on_voice_state_changed(&mut self, _channel: u8) {}

    /// A melodic channel went from silent to audible or back.
    fn on_channel_state_changed(&mut self, _channel: u8, _audible: bool) {}

    fn on_rhythm_note_played(&mut self) {}

    fn on_program_changed(&mut self, _channel: u8, _instrument: &str) {}
}

impl ReportHandler for () {}

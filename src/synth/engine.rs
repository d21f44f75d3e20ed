use std::collections::VecDeque;

use tracing::{debug, trace, warn};

use super::{
    channel::{Admission, Channel, Context},
    driver::{ReportHandler, UnitDriver},
    error::NoteDropped,
    message::{MessageReceiver, SynthMessage},
    pool::{ResourcePool, UnitId, VoiceId},
    voice::Voice,
};
use crate::{
    patch::{PatchCache, PatchParam, PatchTemp, RhythmSetting, SoundBank, TimbreParam},
    rom::ControlRomFeatures,
    CHANNEL_COUNT, RHYTHM_CHANNEL,
};

/// Events held back while a poly is aborting.
const DEFERRED_CAPACITY: usize = 64;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NoteOn {
    Started(VoiceId),
    /// Queued until the pending abort completes.
    Deferred,
}

/// Owns every channel and the shared pool, and routes events to them.
///
/// All operations run to completion. While a voice abort is in flight every
/// incoming event is queued and replayed, in order, as soon as the aborting
/// voice reports its last partial deactivated.
pub struct Engine<D: UnitDriver, R: ReportHandler = ()> {
    channels: Vec<Channel>,
    pool: ResourcePool,
    bank: SoundBank,
    features: ControlRomFeatures,
    driver: D,
    reporter: R,
    deferred: VecDeque<SynthMessage>,
}

impl<D: UnitDriver> Engine<D, ()> {
    pub fn new(features: ControlRomFeatures, bank: SoundBank, driver: D) -> Self {
        Self::with_reporter(features, bank, driver, ())
    }
}

impl<D: UnitDriver, R: ReportHandler> Engine<D, R> {
    /// Melodic channel `n` starts on program `n`.
    pub fn with_reporter(features: ControlRomFeatures, bank: SoundBank, driver: D, reporter: R) -> Self {
        let voice_count = features.voice_count;
        let mut channels: Vec<Channel> = (0..RHYTHM_CHANNEL)
            .map(|index| {
                let patch = bank.patch(index as usize).copied().unwrap_or_default();
                let timbre = bank
                    .timbre(patch.abs_timbre_num())
                    .cloned()
                    .unwrap_or_default();
                let patch_temp = PatchTemp {
                    patch,
                    ..PatchTemp::default()
                };
                Channel::melodic(index, patch_temp, timbre, voice_count)
            })
            .collect();
        channels.push(Channel::rhythm(
            RHYTHM_CHANNEL,
            PatchTemp::default(),
            &bank.rhythm,
            voice_count,
        ));
        debug_assert_eq!(channels.len(), CHANNEL_COUNT);

        Self {
            channels,
            pool: ResourcePool::new(features.partial_count, voice_count),
            bank,
            features,
            driver,
            reporter,
            deferred: VecDeque::with_capacity(DEFERRED_CAPACITY),
        }
    }

    fn split(&mut self, channel: u8) -> Option<(&mut Channel, Context<'_>)> {
        let Self {
            channels,
            pool,
            bank,
            features,
            driver,
            reporter,
            ..
        } = self;
        let channel = channels.get_mut(channel as usize)?;
        Some((
            channel,
            Context {
                pool,
                driver,
                reporter,
                features,
                bank,
            },
        ))
    }

    fn with_channel(&mut self, channel: u8, f: impl FnOnce(&mut Channel, &mut Context<'_>)) {
        match self.split(channel) {
            Some((part, mut ctx)) => f(part, &mut ctx),
            None => debug!("Event for unknown channel {}", channel),
        }
    }

    // Event intake

    /// Drain `rx`, handling each message in arrival order.
    pub fn process_messages(&mut self, rx: &mut impl MessageReceiver) {
        while let Some(msg) = rx.pop() {
            self.handle(msg);
        }
    }

    pub fn handle(&mut self, msg: SynthMessage) {
        match msg {
            SynthMessage::NoteOn {
                channel,
                key,
                velocity,
            } => {
                // Drops are logged where they happen.
                let _ = self.note_on(channel, key, velocity);
            }
            SynthMessage::NoteOff { channel, key } => self.note_off(channel, key),
            SynthMessage::ControlChange {
                channel,
                controller,
                value,
            } => self.control_change(channel, controller, value),
            SynthMessage::ProgramChange { channel, program } => {
                self.program_change(channel, program)
            }
            SynthMessage::PitchBend { channel, value } => self.pitch_bend(channel, value),
            SynthMessage::AllNotesOff { channel } => self.all_notes_off(channel),
            SynthMessage::AllSoundOff { channel } => self.all_sound_off(channel),
        }
    }

    pub fn note_on(&mut self, channel: u8, key: u8, velocity: u8) -> Result<NoteOn, NoteDropped> {
        let msg = SynthMessage::NoteOn {
            channel,
            key,
            velocity,
        };
        if self.pool.is_aborting() {
            return self.defer(msg).map(|_| NoteOn::Deferred);
        }
        if key > 127 {
            debug!("Note-on with invalid key {} on channel {}", key, channel);
            return Err(NoteDropped::InvalidKey(key));
        }
        let (part, mut ctx) = self
            .split(channel)
            .ok_or(NoteDropped::InvalidChannel(channel))?;
        match part.note_on(&mut ctx, key, velocity.min(127))? {
            Admission::Started(voice) => Ok(NoteOn::Started(voice)),
            Admission::AbortPending => {
                if self.deferred.len() >= DEFERRED_CAPACITY {
                    warn!(?msg, "deferred event queue full, dropping retriggered note");
                    return Err(NoteDropped::DeferQueueFull);
                }
                // Ahead of anything queued while it was being handled.
                self.deferred.push_front(msg);
                trace!(channel, key, "note-on waits for abort");
                Ok(NoteOn::Deferred)
            }
        }
    }

    pub fn note_off(&mut self, channel: u8, key: u8) {
        if self.defer_while_aborting(SynthMessage::NoteOff { channel, key }) {
            return;
        }
        self.with_channel(channel, |part, ctx| part.note_off(ctx, key.min(127)));
    }

    /// MIDI control change, interpreted the way the hardware does.
    pub fn control_change(&mut self, channel: u8, controller: u8, value: u8) {
        let msg = SynthMessage::ControlChange {
            channel,
            controller,
            value,
        };
        if self.defer_while_aborting(msg) {
            return;
        }
        self.with_channel(channel, |part, ctx| match controller {
            0x01 => part.set_modulation(value),
            0x06 => part.set_data_entry_msb(value),
            0x07 => part.set_volume(value),
            0x0A => part.set_pan(ctx.features, value),
            0x0B => part.set_expression(value),
            0x40 => part.set_hold_pedal(ctx, value >= 64),
            0x62 | 0x63 => part.set_nrpn(),
            0x64 => part.set_rpn_lsb(value),
            0x65 => part.set_rpn_msb(value),
            0x78 => part.all_sound_off(ctx),
            0x79 => part.reset_all_controllers(ctx),
            // All notes off, and omni/mono/poly mode changes which imply it
            0x7B..=0x7F => part.all_notes_off(ctx),
            _ => debug!(
                "{}: Unhandled controller {:#04x} (value {})",
                part.name(),
                controller,
                value
            ),
        });
    }

    pub fn program_change(&mut self, channel: u8, program: u8) {
        if self.defer_while_aborting(SynthMessage::ProgramChange { channel, program }) {
            return;
        }
        self.with_channel(channel, |part, ctx| part.set_program(ctx, program));
    }

    pub fn pitch_bend(&mut self, channel: u8, value: u16) {
        if self.defer_while_aborting(SynthMessage::PitchBend { channel, value }) {
            return;
        }
        self.with_channel(channel, |part, _| part.set_bend(value));
    }

    pub fn all_notes_off(&mut self, channel: u8) {
        if self.defer_while_aborting(SynthMessage::AllNotesOff { channel }) {
            return;
        }
        self.with_channel(channel, |part, ctx| part.all_notes_off(ctx));
    }

    pub fn all_sound_off(&mut self, channel: u8) {
        if self.defer_while_aborting(SynthMessage::AllSoundOff { channel }) {
            return;
        }
        self.with_channel(channel, |part, ctx| part.all_sound_off(ctx));
    }

    /// `None` or a value above 100 removes the override. Zero silences the
    /// channel and stops it accepting notes.
    pub fn set_volume_override(&mut self, channel: u8, volume: Option<u8>) {
        self.with_channel(channel, |part, ctx| part.set_volume_override(ctx, volume));
    }

    /// Request an abort on `channel`, held voices first.
    pub fn abort_first_voice_prefer_held(&mut self, channel: u8) -> bool {
        match self.split(channel) {
            Some((part, mut ctx)) => part.abort_first_voice_prefer_held(&mut ctx),
            None => false,
        }
    }

    /// Request an abort of the first voice on `channel` playing internal `key`.
    pub fn abort_voice_by_key(&mut self, channel: u8, key: u8) -> bool {
        match self.split(channel) {
            Some((part, mut ctx)) => part.abort_first_voice_by_key(&mut ctx, key),
            None => false,
        }
    }

    pub fn reset(&mut self) {
        for index in 0..self.channels.len() as u8 {
            self.with_channel(index, |part, ctx| part.reset(ctx));
        }
    }

    // Synthesis layer callback

    /// The synthesis layer finished with `unit`. Frees it, updates the owning
    /// voice and channel, and replays deferred events once no abort is pending.
    pub fn unit_deactivated(&mut self, unit: UnitId) {
        let Some(release) = self.pool.unit_deactivated(unit) else {
            return;
        };
        self.with_channel(release.channel, |part, ctx| {
            part.unit_deactivated(ctx, release.voice, release.transition)
        });
        if !self.pool.is_aborting() {
            self.replay_deferred();
        }
    }

    fn defer_while_aborting(&mut self, msg: SynthMessage) -> bool {
        if !self.pool.is_aborting() {
            return false;
        }
        // A full queue is already logged; the event is lost either way.
        let _ = self.defer(msg);
        true
    }

    fn defer(&mut self, msg: SynthMessage) -> Result<(), NoteDropped> {
        if self.deferred.len() >= DEFERRED_CAPACITY {
            warn!(?msg, "deferred event queue full, dropping event");
            return Err(NoteDropped::DeferQueueFull);
        }
        trace!(?msg, "deferring event while a poly is aborting");
        self.deferred.push_back(msg);
        Ok(())
    }

    fn replay_deferred(&mut self) {
        while !self.pool.is_aborting() {
            let Some(msg) = self.deferred.pop_front() else {
                break;
            };
            self.handle(msg);
        }
    }

    // Memory writes

    /// Overwrite a channel's patch temp area; melodic channels reload their timbre.
    pub fn write_patch_temp(&mut self, channel: u8, patch_temp: PatchTemp) {
        self.with_channel(channel, |part, ctx| part.set_patch_temp(ctx, patch_temp));
    }

    pub fn write_patch(&mut self, num: usize, patch: PatchParam) {
        self.bank.set_patch(num, patch);
    }

    /// Store a timbre and invalidate every cache built from it.
    pub fn write_timbre(&mut self, abs_timbre_num: usize, timbre: TimbreParam) {
        self.bank.set_timbre(abs_timbre_num, timbre);
        let Self { channels, bank, .. } = self;
        for part in channels.iter_mut() {
            part.refresh_timbre(bank, abs_timbre_num);
        }
    }

    pub fn write_rhythm_setting(&mut self, drum: usize, setting: RhythmSetting) {
        self.bank.set_rhythm(drum, setting);
        self.with_channel(RHYTHM_CHANNEL, |part, ctx| {
            part.set_rhythm_setting(ctx, drum, setting)
        });
    }

    // Queries

    pub fn features(&self) -> &ControlRomFeatures {
        &self.features
    }

    pub fn bank(&self) -> &SoundBank {
        &self.bank
    }

    pub fn pool(&self) -> &ResourcePool {
        &self.pool
    }

    pub fn driver(&self) -> &D {
        &self.driver
    }

    pub fn driver_mut(&mut self) -> &mut D {
        &mut self.driver
    }

    pub fn reporter(&self) -> &R {
        &self.reporter
    }

    pub fn reporter_mut(&mut self) -> &mut R {
        &mut self.reporter
    }

    pub fn channels(&self) -> &[Channel] {
        &self.channels
    }

    pub fn channel(&self, channel: u8) -> Option<&Channel> {
        self.channels.get(channel as usize)
    }

    pub fn is_aborting(&self) -> bool {
        self.pool.is_aborting()
    }

    pub fn deferred_count(&self) -> usize {
        self.deferred.len()
    }

    pub fn free_unit_count(&self) -> usize {
        self.pool.free_unit_count()
    }

    pub fn active_unit_count(&self, channel: u8) -> usize {
        self.channel(channel).map_or(0, Channel::active_unit_count)
    }

    pub fn active_voice_count(&self, channel: u8) -> usize {
        self.channel(channel).map_or(0, Channel::active_voice_count)
    }

    pub fn non_releasing_voice_count(&self, channel: u8) -> usize {
        self.channel(channel)
            .map_or(0, Channel::non_releasing_voice_count)
    }

    pub fn active_non_releasing_unit_count(&self, channel: u8) -> usize {
        self.channel(channel)
            .map_or(0, |part| part.active_non_releasing_unit_count(&self.pool))
    }

    pub fn current_instrument(&self, channel: u8) -> Option<&str> {
        self.channel(channel).map(Channel::current_instrument)
    }

    pub fn patch_temp(&self, channel: u8) -> Option<&PatchTemp> {
        self.channel(channel).map(Channel::patch_temp)
    }

    pub fn patch_cache(&self, channel: u8) -> Option<&PatchCache> {
        self.channel(channel).and_then(Channel::patch_cache)
    }

    /// Active voices of `channel` in list order.
    pub fn voices(&self, channel: u8) -> impl Iterator<Item = &Voice> + '_ {
        self.channel(channel)
            .into_iter()
            .flat_map(|part| part.voices().iter())
            .filter_map(|id| self.pool.voice(id))
    }

    pub fn first_active_voice(&self, channel: u8) -> Option<&Voice> {
        self.voices(channel).next()
    }

    /// Units in use per channel, rhythm last.
    pub fn unit_usage(&self) -> [usize; CHANNEL_COUNT] {
        let mut usage = [0; CHANNEL_COUNT];
        for (index, slot) in usage.iter_mut().enumerate() {
            *slot = self.pool.units_for_channel(index as u8);
        }
        usage
    }
}

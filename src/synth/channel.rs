//! One instrument channel ("part").
//!
//! Melodic channels play a single timbre through one patch cache. The rhythm
//! channel picks a timbre per key from its drum table and keeps a cache per
//! drum. Both share the controller record and the ordered list of active
//! voices; only instrument selection and key mapping differ.

use tracing::{debug, trace};

use super::{
    driver::{ReportHandler, UnitDriver, UnitStart},
    error::NoteDropped,
    list::VoiceList,
    pool::{ResourcePool, VoiceId},
    voice::{CacheRef, Transition, VoiceState},
};
use crate::{
    patch::{PatchCache, PatchParam, PatchTemp, RhythmSetting, SoundBank, TimbreParam, DRUM_TIMBRE_OFF},
    rom::{ControlRomFeatures, MAX_RHYTHM_SETTINGS},
};

/// Pitch bender range unit per semitone.
const BENDER_RANGE_STEP: i32 = 683;
const BEND_CENTER: i32 = 8192;
const RPN_NONE: u16 = 0xFFFF;

/// Lowest and highest key accepted on the rhythm channel.
const RHYTHM_KEY_MIN: u8 = 24;
const RHYTHM_KEY_MAX: u8 = 108;

// Drum timbres that cut key 0 before sounding, and the key they sound on.
const DRUM_CUT_TO_KEY1: u8 = 64 + 6;
const DRUM_CUT_TO_KEY0: u8 = 64 + 7;

/// What a channel operation may touch besides the channel itself.
pub(crate) struct Context<'a> {
    pub pool: &'a mut ResourcePool,
    pub driver: &'a mut dyn UnitDriver,
    pub reporter: &'a mut dyn ReportHandler,
    pub features: &'a ControlRomFeatures,
    pub bank: &'a SoundBank,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Admission {
    Started(VoiceId),
    /// A same-key voice is being aborted; retry once it is gone.
    AbortPending,
}

/// 0..=127 controller value to the 0..=100 internal level.
pub fn scale_midi_level(value: u8) -> u8 {
    (value.min(127) as u32 * 100 / 127) as u8
}

/// 0..=127 pan controller to the 0..=14 panpot. Inverted compared to GM.
pub fn pan_position(midi_pan: u8, quirk_pan_mult: bool) -> u8 {
    let pan = midi_pan.min(127) as u32;
    if quirk_pan_mult {
        (pan / 9) as u8
    } else {
        ((pan << 3) / 68) as u8
    }
}

/// Signed bend from a 14-bit controller value and a bender range in
/// `semitones * 683` units. The shift floors towards negative infinity.
pub fn pitch_bend_offset(midi_bend: u16, bender_range: i32) -> i32 {
    let bend = (midi_bend.min(0x3FFF) as i32) - BEND_CENTER;
    (bend * bender_range) >> 14
}

/// Apply the raw key shift (24 = none) and fold into 36..=132 by octaves,
/// giving an internal key in 12..=108. With `quirk_key_shift` the shift is
/// applied later in the pitch path instead and the key passes unchanged.
pub fn midi_key_to_key(midi_key: u8, key_shift: u8, quirk_key_shift: bool) -> u8 {
    if quirk_key_shift {
        return midi_key;
    }
    let mut key = midi_key as i32 + key_shift as i32;
    while key < 36 {
        key += 12;
    }
    while key > 132 {
        key -= 12;
    }
    (key - 24) as u8
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Controllers {
    pub modulation: u8,
    /// 0..=100
    pub expression: u8,
    pub pitch_bend: i32,
    /// Semitones times 683.
    pub bender_range: i32,
    pub hold_pedal: bool,
    /// 0..=100, takes precedence over the patch output level.
    pub volume_override: Option<u8>,
    rpn: u16,
    nrpn: bool,
}

impl Default for Controllers {
    fn default() -> Self {
        Self {
            modulation: 0,
            expression: 100,
            pitch_bend: 0,
            bender_range: 0,
            hold_pedal: false,
            volume_override: None,
            rpn: RPN_NONE,
            nrpn: false,
        }
    }
}

#[derive(Debug, Clone)]
pub enum ChannelKind {
    Melodic {
        timbre: TimbreParam,
        cache: PatchCache,
    },
    Rhythm {
        settings: Vec<RhythmSetting>,
        caches: Vec<PatchCache>,
    },
}

#[derive(Debug, Clone)]
pub struct Channel {
    index: u8,
    name: String,
    current_instr: String,
    patch_temp: PatchTemp,
    controllers: Controllers,
    voices: VoiceList,
    active_unit_count: usize,
    non_releasing_voices: usize,
    kind: ChannelKind,
}

impl Channel {
    pub fn melodic(index: u8, patch_temp: PatchTemp, timbre: TimbreParam, voice_capacity: usize) -> Self {
        let mut cache = PatchCache::default();
        cache.set_reverb(patch_temp.patch.reverb_switch);
        let mut channel = Self {
            index,
            name: format!("Part {}", index + 1),
            current_instr: timbre.name.clone(),
            patch_temp,
            controllers: Controllers::default(),
            voices: VoiceList::new(voice_capacity),
            active_unit_count: 0,
            non_releasing_voices: 0,
            kind: ChannelKind::Melodic { timbre, cache },
        };
        channel.update_pitch_bender_range();
        channel
    }

    pub fn rhythm(index: u8, patch_temp: PatchTemp, settings: &[RhythmSetting], voice_capacity: usize) -> Self {
        let mut settings = settings.to_vec();
        settings.resize(MAX_RHYTHM_SETTINGS, RhythmSetting::default());
        let caches = settings
            .iter()
            .map(|setting| {
                let mut cache = PatchCache::default();
                cache.set_reverb(setting.reverb_switch);
                cache
            })
            .collect();
        let mut channel = Self {
            index,
            name: "Rhythm".to_string(),
            current_instr: String::new(),
            patch_temp,
            controllers: Controllers::default(),
            voices: VoiceList::new(voice_capacity),
            active_unit_count: 0,
            non_releasing_voices: 0,
            kind: ChannelKind::Rhythm { settings, caches },
        };
        channel.update_pitch_bender_range();
        channel
    }

    pub fn index(&self) -> u8 {
        self.index
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn current_instrument(&self) -> &str {
        &self.current_instr
    }

    pub fn is_rhythm(&self) -> bool {
        matches!(self.kind, ChannelKind::Rhythm { .. })
    }

    pub fn kind(&self) -> &ChannelKind {
        &self.kind
    }

    pub fn patch_temp(&self) -> &PatchTemp {
        &self.patch_temp
    }

    pub fn controllers(&self) -> &Controllers {
        &self.controllers
    }

    pub fn voices(&self) -> &VoiceList {
        &self.voices
    }

    /// Melodic channels only.
    pub fn patch_cache(&self) -> Option<&PatchCache> {
        match &self.kind {
            ChannelKind::Melodic { cache, .. } => Some(cache),
            ChannelKind::Rhythm { .. } => None,
        }
    }

    /// Rhythm channel only.
    pub fn drum_cache(&self, drum: usize) -> Option<&PatchCache> {
        match &self.kind {
            ChannelKind::Rhythm { caches, .. } => caches.get(drum),
            ChannelKind::Melodic { .. } => None,
        }
    }

    pub fn rhythm_setting(&self, drum: usize) -> Option<&RhythmSetting> {
        match &self.kind {
            ChannelKind::Rhythm { settings, .. } => settings.get(drum),
            ChannelKind::Melodic { .. } => None,
        }
    }

    /// Absolute timbre number of the selected patch; meaningless on rhythm.
    pub fn abs_timbre_num(&self) -> Option<usize> {
        if self.is_rhythm() {
            debug!("{}: Attempted to get abs timbre number - doesn't make sense for rhythm", self.name);
            return None;
        }
        Some(self.patch_temp.patch.abs_timbre_num())
    }

    pub fn active_unit_count(&self) -> usize {
        self.active_unit_count
    }

    pub fn active_voice_count(&self) -> usize {
        self.voices.len()
    }

    pub fn non_releasing_voice_count(&self) -> usize {
        self.non_releasing_voices
    }

    pub fn active_non_releasing_unit_count(&self, pool: &ResourcePool) -> usize {
        self.voices
            .iter()
            .filter_map(|id| pool.voice(id))
            .filter(|voice| voice.state() != VoiceState::Releasing)
            .map(|voice| voice.active_unit_count())
            .sum()
    }

    // Controllers

    pub fn set_volume(&mut self, midi_volume: u8) {
        self.patch_temp.output_level = scale_midi_level(midi_volume);
    }

    pub fn volume(&self) -> u8 {
        self.controllers
            .volume_override
            .unwrap_or(self.patch_temp.output_level)
    }

    /// Values above 100 clear the override. An override of 0 also silences
    /// every sounding voice.
    pub(crate) fn set_volume_override(&mut self, ctx: &mut Context<'_>, volume: Option<u8>) {
        self.controllers.volume_override = volume.filter(|v| *v <= 100);
        if self.controllers.volume_override == Some(0) {
            self.all_sound_off(ctx);
        }
    }

    pub fn set_expression(&mut self, midi_expression: u8) {
        self.controllers.expression = scale_midi_level(midi_expression);
    }

    pub fn set_pan(&mut self, features: &ControlRomFeatures, midi_pan: u8) {
        if self.is_rhythm() {
            // Written like on the hardware, but has no effect on playback.
            debug!("{}: Pointlessly setting pan ({}) on rhythm part", self.name, midi_pan);
        }
        self.patch_temp.panpot = pan_position(midi_pan, features.quirk_pan_mult);
    }

    pub fn set_modulation(&mut self, midi_modulation: u8) {
        self.controllers.modulation = midi_modulation;
    }

    pub fn set_bend(&mut self, midi_bend: u16) {
        self.controllers.pitch_bend = pitch_bend_offset(midi_bend, self.controllers.bender_range);
    }

    pub fn set_rpn_lsb(&mut self, lsb: u8) {
        self.controllers.nrpn = false;
        self.controllers.rpn = (self.controllers.rpn & 0xFF00) | lsb as u16;
    }

    pub fn set_rpn_msb(&mut self, msb: u8) {
        self.controllers.nrpn = false;
        self.controllers.rpn = (self.controllers.rpn & 0x00FF) | ((msb as u16) << 8);
    }

    pub fn set_nrpn(&mut self) {
        self.controllers.nrpn = true;
    }

    /// Only RPN 0 (bender range) is supported; NRPNs are ignored.
    pub fn set_data_entry_msb(&mut self, value: u8) {
        if self.controllers.nrpn || self.controllers.rpn != 0 {
            return;
        }
        self.patch_temp.patch.bender_range = value.min(24);
        self.update_pitch_bender_range();
    }

    pub(crate) fn set_hold_pedal(&mut self, ctx: &mut Context<'_>, pressed: bool) {
        if self.controllers.hold_pedal && !pressed {
            self.controllers.hold_pedal = false;
            self.stop_pedal_hold(ctx);
        } else {
            self.controllers.hold_pedal = pressed;
        }
    }

    pub(crate) fn reset_all_controllers(&mut self, ctx: &mut Context<'_>) {
        self.controllers.modulation = 0;
        self.controllers.expression = 100;
        self.controllers.pitch_bend = 0;
        self.set_hold_pedal(ctx, false);
    }

    pub(crate) fn reset(&mut self, ctx: &mut Context<'_>) {
        self.reset_all_controllers(ctx);
        self.all_sound_off(ctx);
        self.controllers.rpn = RPN_NONE;
    }

    fn update_pitch_bender_range(&mut self) {
        self.controllers.bender_range = self.patch_temp.patch.bender_range as i32 * BENDER_RANGE_STEP;
    }

    pub fn midi_key_to_key(&self, features: &ControlRomFeatures, midi_key: u8) -> u8 {
        midi_key_to_key(midi_key, self.patch_temp.patch.key_shift, features.quirk_key_shift)
    }

    // Instrument selection

    pub(crate) fn set_program(&mut self, ctx: &mut Context<'_>, patch_num: u8) {
        if self.is_rhythm() {
            debug!("{}: Attempt to set program ({}) on rhythm is invalid", self.name, patch_num);
            return;
        }
        let bank = ctx.bank;
        let Some(patch) = bank.patch(patch_num as usize) else {
            debug!("{}: Program {} is not in the sound bank", self.name, patch_num);
            return;
        };
        self.patch_temp.patch = *patch;
        // Released without pedal-up handling; all-sound-off follows anyway.
        self.controllers.hold_pedal = false;
        self.all_sound_off(ctx);
        self.load_timbre(bank);
        self.refresh(ctx);
    }

    /// Replace the whole patch temp area and refresh.
    pub(crate) fn set_patch_temp(&mut self, ctx: &mut Context<'_>, patch_temp: PatchTemp) {
        self.patch_temp = patch_temp;
        if !self.is_rhythm() {
            self.load_timbre(ctx.bank);
        }
        self.refresh(ctx);
    }

    pub fn set_patch(&mut self, patch: PatchParam) {
        self.patch_temp.patch = patch;
    }

    pub fn set_timbre(&mut self, new_timbre: TimbreParam) {
        match &mut self.kind {
            ChannelKind::Melodic { timbre, .. } => *timbre = new_timbre,
            ChannelKind::Rhythm { .. } => {
                debug!("{}: Attempted to call set_timbre() - doesn't make sense for rhythm", self.name);
            }
        }
    }

    fn load_timbre(&mut self, bank: &SoundBank) {
        let abs = self.patch_temp.patch.abs_timbre_num();
        match bank.timbre(abs) {
            Some(timbre) => self.set_timbre(timbre.clone()),
            None => debug!("{}: Timbre {} is not in the sound bank", self.name, abs),
        }
    }

    /// Detach running voices from the caches, then mark them for rebuild.
    pub(crate) fn refresh(&mut self, ctx: &mut Context<'_>) {
        match &mut self.kind {
            ChannelKind::Melodic { timbre, cache } => {
                backup_cache_to_units(&self.voices, ctx, CacheRef::Melodic, cache);
                cache.mark_dirty();
                cache.set_reverb(self.patch_temp.patch.reverb_switch);
                self.current_instr.clear();
                self.current_instr.push_str(&timbre.name);
                ctx.reporter.on_program_changed(self.index, &self.current_instr);
            }
            ChannelKind::Rhythm { settings, caches } => {
                let count = ctx.features.rhythm_settings_count.min(settings.len());
                for (drum, (setting, cache)) in settings.iter().zip(caches.iter_mut()).enumerate().take(count) {
                    if setting.timbre >= DRUM_TIMBRE_OFF {
                        continue;
                    }
                    backup_cache_to_units(&self.voices, ctx, CacheRef::Drum(drum), cache);
                    cache.mark_dirty();
                    cache.set_reverb(setting.reverb_switch);
                }
            }
        }
        self.update_pitch_bender_range();
    }

    /// Timbre `abs_timbre_num` was rewritten in the bank.
    pub(crate) fn refresh_timbre(&mut self, bank: &SoundBank, abs_timbre_num: usize) {
        let abs_current = self.patch_temp.patch.abs_timbre_num();
        match &mut self.kind {
            ChannelKind::Melodic { timbre, cache } => {
                if abs_current != abs_timbre_num {
                    return;
                }
                if let Some(updated) = bank.timbre(abs_timbre_num) {
                    *timbre = updated.clone();
                }
                self.current_instr.clear();
                self.current_instr.push_str(&timbre.name);
                cache.mark_dirty();
            }
            ChannelKind::Rhythm { settings, caches } => {
                for (setting, cache) in settings.iter().zip(caches.iter_mut()) {
                    if setting.timbre as usize + 128 == abs_timbre_num {
                        cache.mark_dirty();
                    }
                }
            }
        }
    }

    pub(crate) fn set_rhythm_setting(&mut self, ctx: &mut Context<'_>, drum: usize, setting: RhythmSetting) {
        match &mut self.kind {
            ChannelKind::Rhythm { settings, .. } => match settings.get_mut(drum) {
                Some(slot) => *slot = setting,
                None => {
                    debug!("{}: No rhythm setting {}", self.name, drum);
                    return;
                }
            },
            ChannelKind::Melodic { .. } => {
                debug!("{}: Rhythm settings only apply to the rhythm part", self.name);
                return;
            }
        }
        self.refresh(ctx);
    }

    // Notes

    pub(crate) fn note_on(&mut self, ctx: &mut Context<'_>, midi_key: u8, velocity: u8) -> Result<Admission, NoteDropped> {
        if self.controllers.volume_override == Some(0) {
            return Err(NoteDropped::Silenced);
        }
        match self.kind {
            ChannelKind::Melodic { .. } => self.melodic_note_on(ctx, midi_key, velocity),
            ChannelKind::Rhythm { .. } => self.rhythm_note_on(ctx, midi_key, velocity),
        }
    }

    fn melodic_note_on(&mut self, ctx: &mut Context<'_>, midi_key: u8, velocity: u8) -> Result<Admission, NoteDropped> {
        let key = self.midi_key_to_key(ctx.features, midi_key);
        let ChannelKind::Melodic { timbre, cache } = &mut self.kind else {
            return Err(NoteDropped::InvalidChannel(self.index));
        };
        if cache.is_dirty() {
            backup_cache_to_units(&self.voices, ctx, CacheRef::Melodic, cache);
            cache.rebuild(timbre);
            trace!(channel = %self.name, instrument = %self.current_instr, "recached timbre");
        }
        let cache = cache.clone();
        self.play_voice(ctx, &cache, CacheRef::Melodic, None, midi_key, key, velocity)
    }

    fn rhythm_note_on(&mut self, ctx: &mut Context<'_>, midi_key: u8, velocity: u8) -> Result<Admission, NoteDropped> {
        if !(RHYTHM_KEY_MIN..=RHYTHM_KEY_MAX).contains(&midi_key) {
            debug!("{}: Attempted to play invalid key {} (velocity {})", self.name, midi_key, velocity);
            return Err(NoteDropped::InvalidKey(midi_key));
        }
        ctx.reporter.on_rhythm_note_played();
        let drum = (midi_key - RHYTHM_KEY_MIN) as usize;
        let setting = self.rhythm_setting(drum).copied().unwrap_or_default();
        let drum_timbre = setting.timbre;
        if drum_timbre == DRUM_TIMBRE_OFF || drum_timbre as usize >= ctx.features.drum_timbre_count() {
            debug!("{}: Attempted to play unmapped key {} (velocity {})", self.name, midi_key, velocity);
            return Err(NoteDropped::UnmappedKey(midi_key));
        }

        let mut key = midi_key;
        if drum_timbre == DRUM_CUT_TO_KEY1 {
            trace!(channel = %self.name, midi_key, "drum cuts key 0, sounds on key 1");
            self.stop_note(ctx, 0);
            key = 1;
        } else if drum_timbre == DRUM_CUT_TO_KEY0 {
            trace!(channel = %self.name, midi_key, "drum cuts key 0, sounds on key 0");
            self.stop_note(ctx, 0);
            key = 0;
        }

        let bank = ctx.bank;
        let abs_timbre_num = drum_timbre as usize + 128;
        let Some(timbre) = bank.timbre(abs_timbre_num) else {
            debug!("{}: Timbre {} for key {} is not in the sound bank", self.name, abs_timbre_num, midi_key);
            return Err(NoteDropped::MissingTimbre(abs_timbre_num));
        };
        self.current_instr.clear();
        self.current_instr.push_str(&timbre.name);

        let ChannelKind::Rhythm { caches, .. } = &mut self.kind else {
            return Err(NoteDropped::InvalidChannel(self.index));
        };
        let Some(cache) = caches.get_mut(drum) else {
            return Err(NoteDropped::UnmappedKey(midi_key));
        };
        if cache.is_dirty() {
            backup_cache_to_units(&self.voices, ctx, CacheRef::Drum(drum), cache);
            cache.rebuild(timbre);
            trace!(channel = %self.name, drum, timbre = abs_timbre_num, "recached drum");
        }
        let cache = cache.clone();
        self.play_voice(ctx, &cache, CacheRef::Drum(drum), Some(&setting), midi_key, key, velocity)
    }

    #[allow(clippy::too_many_arguments)]
    fn play_voice(
        &mut self,
        ctx: &mut Context<'_>,
        cache: &PatchCache,
        cache_ref: CacheRef,
        rhythm: Option<&RhythmSetting>,
        midi_key: u8,
        key: u8,
        velocity: u8,
    ) -> Result<Admission, NoteDropped> {
        // Even in single-assign mode a fully muted timbre aborts nothing.
        let needed = cache.partial_count();
        if needed == 0 {
            debug!("{} ({}): Completely muted instrument", self.name, self.current_instr);
            return Err(NoteDropped::Muted);
        }

        if self.patch_temp.patch.is_single_assign() {
            self.abort_first_voice_by_key(ctx, key);
            if ctx.pool.is_aborting() {
                return Ok(Admission::AbortPending);
            }
        }

        let mut reservation = match ctx.pool.reserve(self.index, needed) {
            Ok(reservation) => reservation,
            Err(err) => {
                debug!(
                    "{} ({}): Insufficient free partials to play key {} (velocity {}); needed={}, free={}, assignMode={}",
                    self.name,
                    self.current_instr,
                    midi_key,
                    velocity,
                    needed,
                    ctx.pool.free_unit_count(),
                    self.patch_temp.patch.assign_mode
                );
                return Err(err);
            }
        };

        let Some(voice_id) = ctx.pool.assign_voice(self.index) else {
            ctx.pool.cancel(reservation);
            debug!(
                "{} ({}): No free poly to play key {} (velocity {})",
                self.name, self.current_instr, midi_key, velocity
            );
            return Err(NoteDropped::NoFreeVoice);
        };
        if self.patch_temp.patch.priority_to_first() {
            self.voices.prepend(voice_id);
        } else {
            self.voices.append(voice_id);
        }

        // Every handle exists before any partial starts, so pairs can refer
        // to a partner that starts after them.
        let mut units = [None; 4];
        for (slot, entry) in cache.entries().iter().enumerate() {
            if entry.play_partial {
                units[slot] = reservation.take();
            }
        }
        self.active_unit_count += units.iter().flatten().count();

        let transition = ctx
            .pool
            .voice_mut(voice_id)
            .and_then(|voice| voice.reset(key, velocity, cache.sustain(), units, cache_ref));
        if let Some(transition) = transition {
            self.voice_state_changed(ctx, transition);
        }

        for (slot, unit) in units.iter().enumerate() {
            let Some(unit) = *unit else {
                continue;
            };
            let entry = cache.entry(slot);
            ctx.pool.start_unit(unit, voice_id);
            ctx.driver.start_unit(UnitStart {
                unit,
                voice: voice_id,
                channel: self.index,
                key,
                velocity,
                cache: entry,
                patch_temp: &self.patch_temp,
                rhythm,
                pair: units[entry.structure_pair],
            });
        }
        trace!(
            channel = %self.name,
            instrument = %self.current_instr,
            midi_key,
            key,
            velocity,
            voice = voice_id.index(),
            partials = needed,
            free = ctx.pool.free_unit_count(),
            "started poly"
        );
        ctx.reporter.on_voice_state_changed(self.index);
        Ok(Admission::Started(voice_id))
    }

    pub(crate) fn note_off(&mut self, ctx: &mut Context<'_>, midi_key: u8) {
        let key = match self.kind {
            ChannelKind::Melodic { .. } => self.midi_key_to_key(ctx.features, midi_key),
            ChannelKind::Rhythm { .. } => midi_key,
        };
        self.stop_note(ctx, key);
    }

    /// Release the first matching voice in list order. Non-sustaining voices
    /// ignore note-off and die away on their own, except on key 0.
    fn stop_note(&mut self, ctx: &mut Context<'_>, key: u8) {
        trace!(channel = %self.name, instrument = %self.current_instr, key, "stopping key");
        let pedal_held = self.controllers.hold_pedal && key != 0;
        let mut cursor = self.voices.first();
        while let Some(id) = cursor {
            cursor = self.voices.next(id);
            let Some(voice) = ctx.pool.voice_mut(id) else {
                continue;
            };
            if voice.key() != key || !(voice.can_sustain() || key == 0) {
                continue;
            }
            if let Some(transition) = voice.note_off(pedal_held, &mut *ctx.driver) {
                self.voice_state_changed(ctx, transition);
                break;
            }
        }
    }

    /// Honours the hold pedal. Only sustain-capable voices react.
    pub(crate) fn all_notes_off(&mut self, ctx: &mut Context<'_>) {
        let pedal_held = self.controllers.hold_pedal;
        let mut cursor = self.voices.first();
        while let Some(id) = cursor {
            cursor = self.voices.next(id);
            let Some(voice) = ctx.pool.voice_mut(id) else {
                continue;
            };
            if !voice.can_sustain() {
                continue;
            }
            if let Some(transition) = voice.note_off(pedal_held, &mut *ctx.driver) {
                self.voice_state_changed(ctx, transition);
            }
        }
    }

    /// Every voice starts decaying, regardless of pedal or sustain.
    pub(crate) fn all_sound_off(&mut self, ctx: &mut Context<'_>) {
        let mut cursor = self.voices.first();
        while let Some(id) = cursor {
            cursor = self.voices.next(id);
            let Some(voice) = ctx.pool.voice_mut(id) else {
                continue;
            };
            if let Some(transition) = voice.start_decay(&mut *ctx.driver) {
                self.voice_state_changed(ctx, transition);
            }
        }
    }

    fn stop_pedal_hold(&mut self, ctx: &mut Context<'_>) {
        let mut cursor = self.voices.first();
        while let Some(id) = cursor {
            cursor = self.voices.next(id);
            let Some(voice) = ctx.pool.voice_mut(id) else {
                continue;
            };
            if let Some(transition) = voice.stop_pedal_hold(&mut *ctx.driver) {
                self.voice_state_changed(ctx, transition);
            }
        }
    }

    // Abort policies. Each targets the first match in list order and only
    // requests the abort; resources come back through `unit_deactivated`.

    pub(crate) fn abort_first_voice_by_key(&mut self, ctx: &mut Context<'_>, key: u8) -> bool {
        let target = self
            .voices
            .iter()
            .find(|id| ctx.pool.voice(*id).is_some_and(|voice| voice.key() == key));
        match target {
            Some(id) => ctx.pool.start_abort(id, &mut *ctx.driver),
            None => false,
        }
    }

    pub(crate) fn abort_first_voice_by_state(&mut self, ctx: &mut Context<'_>, state: VoiceState) -> bool {
        let target = self
            .voices
            .iter()
            .find(|id| ctx.pool.voice(*id).is_some_and(|voice| voice.state() == state));
        match target {
            Some(id) => ctx.pool.start_abort(id, &mut *ctx.driver),
            None => false,
        }
    }

    pub(crate) fn abort_first_voice_prefer_held(&mut self, ctx: &mut Context<'_>) -> bool {
        if self.abort_first_voice_by_state(ctx, VoiceState::Held) {
            return true;
        }
        self.abort_first_voice(ctx)
    }

    pub(crate) fn abort_first_voice(&mut self, ctx: &mut Context<'_>) -> bool {
        match self.voices.first() {
            Some(id) => ctx.pool.start_abort(id, &mut *ctx.driver),
            None => false,
        }
    }

    /// One of this channel's partials finished; `transition` is what that did
    /// to its voice.
    pub(crate) fn unit_deactivated(&mut self, ctx: &mut Context<'_>, voice_id: VoiceId, transition: Option<Transition>) {
        self.active_unit_count = self.active_unit_count.saturating_sub(1);
        if let Some(transition) = transition {
            self.voice_state_changed(ctx, transition);
        }
        let finished = ctx.pool.voice(voice_id).map_or(true, |voice| !voice.is_active());
        if finished {
            self.voices.remove(voice_id);
            ctx.pool.free_voice(voice_id);
            ctx.reporter.on_voice_state_changed(self.index);
        }
    }

    fn voice_state_changed(&mut self, ctx: &mut Context<'_>, transition: Transition) {
        let Transition { from, to } = transition;
        if from == to {
            return;
        }
        let was_sounding = matches!(from, VoiceState::Playing | VoiceState::Held);
        match to {
            VoiceState::Playing if !was_sounding => {
                self.non_releasing_voices += 1;
                if self.non_releasing_voices == 1 && !self.is_rhythm() {
                    ctx.reporter.on_channel_state_changed(self.index, true);
                }
            }
            VoiceState::Releasing | VoiceState::Inactive if was_sounding => {
                self.non_releasing_voices = self.non_releasing_voices.saturating_sub(1);
                if self.non_releasing_voices == 0 && !self.is_rhythm() {
                    ctx.reporter.on_channel_state_changed(self.index, false);
                }
            }
            _ => {}
        }
        trace!(
            channel = %self.name,
            ?from,
            ?to,
            non_releasing = self.non_releasing_voices,
            "poly state changed"
        );
    }
}

fn backup_cache_to_units(voices: &VoiceList, ctx: &mut Context<'_>, source: CacheRef, cache: &PatchCache) {
    for id in voices.iter() {
        if let Some(voice) = ctx.pool.voice_mut(id) {
            voice.backup_cache(source, cache, &mut *ctx.driver);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn volume_scaling_matches_control_rom_table() {
        assert_eq!(scale_midi_level(0), 0);
        assert_eq!(scale_midi_level(1), 0);
        assert_eq!(scale_midi_level(2), 1);
        assert_eq!(scale_midi_level(64), 50);
        assert_eq!(scale_midi_level(100), 78);
        assert_eq!(scale_midi_level(127), 100);
        assert_eq!(scale_midi_level(200), 100);
        for value in 0..=127u8 {
            assert_eq!(scale_midi_level(value) as u32, value as u32 * 100 / 127);
        }
    }

    #[test]
    fn pan_divisors_per_hardware_variant() {
        for pan in 0..=127u8 {
            assert_eq!(pan_position(pan, true), pan / 9);
            assert_eq!(pan_position(pan, false) as u32, (pan as u32 * 8) / 68);
        }
        assert_eq!(pan_position(127, true), 14);
        assert_eq!(pan_position(127, false), 14);
        assert_eq!(pan_position(64, true), 7);
        assert_eq!(pan_position(64, false), 7);
    }

    #[test]
    fn pitch_bend_floors_towards_negative_infinity() {
        for semitones in 0..=24 {
            let range = semitones * BENDER_RANGE_STEP;
            for bend in (0..=0x3FFFu16).step_by(97).chain([0, 8191, 8192, 8193, 0x3FFF]) {
                let scaled = (bend as i64 - 8192) * range as i64;
                let expected = scaled.div_euclid(16384) as i32;
                assert_eq!(pitch_bend_offset(bend, range), expected, "bend {bend} range {semitones}");
            }
        }
        assert_eq!(pitch_bend_offset(8192, 12 * 683), 0);
        assert_eq!(pitch_bend_offset(8191, 12 * 683), -1);
    }

    #[test]
    fn key_remap_stays_in_internal_range() {
        for shift in 0..=48u8 {
            for midi_key in 0..=127u8 {
                let key = midi_key_to_key(midi_key, shift, false);
                assert!((12..=108).contains(&key), "key {midi_key} shift {shift} -> {key}");
            }
        }
        assert_eq!(midi_key_to_key(60, 24, false), 60);
        assert_eq!(midi_key_to_key(60, 36, false), 72);
        assert_eq!(midi_key_to_key(0, 24, false), 12);
        assert_eq!(midi_key_to_key(127, 24, false), 103);
    }

    #[test]
    fn key_shift_quirk_is_identity() {
        for shift in [0u8, 24, 48] {
            for midi_key in 0..=127u8 {
                assert_eq!(midi_key_to_key(midi_key, shift, true), midi_key);
            }
        }
    }

    #[test]
    fn data_entry_only_follows_rpn_zero() {
        let mut channel = Channel::melodic(0, PatchTemp::default(), TimbreParam::default(), 4);

        channel.set_data_entry_msb(2);
        assert_eq!(channel.patch_temp().patch.bender_range, 12, "no RPN selected yet");

        channel.set_rpn_msb(0);
        channel.set_rpn_lsb(0);
        channel.set_data_entry_msb(30);
        assert_eq!(channel.patch_temp().patch.bender_range, 24);
        assert_eq!(channel.controllers().bender_range, 24 * 683);

        channel.set_nrpn();
        channel.set_data_entry_msb(3);
        assert_eq!(channel.patch_temp().patch.bender_range, 24);

        channel.set_rpn_lsb(1);
        channel.set_data_entry_msb(3);
        assert_eq!(channel.patch_temp().patch.bender_range, 24);
    }

    #[test]
    fn bend_uses_current_bender_range() {
        let mut channel = Channel::melodic(0, PatchTemp::default(), TimbreParam::default(), 4);
        channel.set_bend(0x3FFF);
        assert_eq!(channel.controllers().pitch_bend, (8191 * 12 * 683) >> 14);
        channel.set_bend(0);
        assert_eq!(channel.controllers().pitch_bend, -(12 * 683) / 2);
    }

    #[test]
    fn rhythm_pan_is_written_anyway() {
        let features = ControlRomFeatures::mt32();
        let mut channel = Channel::rhythm(8, PatchTemp::default(), &[], 4);
        channel.set_pan(&features, 127);
        assert_eq!(channel.patch_temp().panpot, 14);
        assert_eq!(channel.abs_timbre_num(), None);
    }
}

#![allow(dead_code)]

use la32_voices::{
    patch::PatchCacheEntry,
    synth::{Engine, ReportHandler, UnitDriver, UnitId, UnitStart, VoiceId},
    ControlRomFeatures, SoundBank,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Started {
    pub unit: UnitId,
    pub voice: VoiceId,
    pub channel: u8,
    pub key: u8,
    pub velocity: u8,
    pub entry: PatchCacheEntry,
    pub drum: bool,
    pub pair: Option<UnitId>,
}

/// Records every request and queues decaying or aborting units so a test can
/// finish them with `settle`.
#[derive(Debug, Default)]
pub struct RecordingDriver {
    pub started: Vec<Started>,
    pub decays: Vec<UnitId>,
    pub aborts: Vec<UnitId>,
    pub backups: Vec<(UnitId, PatchCacheEntry)>,
    pending: Vec<UnitId>,
}

impl RecordingDriver {
    fn finish_later(&mut self, unit: UnitId) {
        if !self.pending.contains(&unit) {
            self.pending.push(unit);
        }
    }

    pub fn take_pending(&mut self) -> Vec<UnitId> {
        std::mem::take(&mut self.pending)
    }

    pub fn take_first_pending(&mut self) -> Option<UnitId> {
        if self.pending.is_empty() {
            None
        } else {
            Some(self.pending.remove(0))
        }
    }
}

impl UnitDriver for RecordingDriver {
    fn start_unit(&mut self, start: UnitStart<'_>) {
        self.started.push(Started {
            unit: start.unit,
            voice: start.voice,
            channel: start.channel,
            key: start.key,
            velocity: start.velocity,
            entry: *start.cache,
            drum: start.rhythm.is_some(),
            pair: start.pair,
        });
    }

    fn start_decay(&mut self, unit: UnitId) {
        self.decays.push(unit);
        self.finish_later(unit);
    }

    fn start_abort(&mut self, unit: UnitId) {
        self.aborts.push(unit);
        self.finish_later(unit);
    }

    fn backup_cache(&mut self, unit: UnitId, entry: &PatchCacheEntry) {
        self.backups.push((unit, *entry));
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Report {
    VoiceStateChanged(u8),
    ChannelState(u8, bool),
    RhythmNotePlayed,
    ProgramChanged(u8, String),
}

#[derive(Debug, Default)]
pub struct RecordingReporter {
    pub reports: Vec<Report>,
}

impl RecordingReporter {
    pub fn channel_states(&self) -> Vec<(u8, bool)> {
        self.reports
            .iter()
            .filter_map(|report| match report {
                Report::ChannelState(channel, audible) => Some((*channel, *audible)),
                _ => None,
            })
            .collect()
    }

    pub fn count(&self, wanted: &Report) -> usize {
        self.reports.iter().filter(|report| *report == wanted).count()
    }
}

impl ReportHandler for RecordingReporter {
    fn on_voice_state_changed(&mut self, channel: u8) {
        self.reports.push(Report::VoiceStateChanged(channel));
    }

    fn on_channel_state_changed(&mut self, channel: u8, audible: bool) {
        self.reports.push(Report::ChannelState(channel, audible));
    }

    fn on_rhythm_note_played(&mut self) {
        self.reports.push(Report::RhythmNotePlayed);
    }

    fn on_program_changed(&mut self, channel: u8, instrument: &str) {
        self.reports
            .push(Report::ProgramChanged(channel, instrument.to_string()));
    }
}

pub type TestEngine = Engine<RecordingDriver, RecordingReporter>;

pub fn engine() -> TestEngine {
    engine_with(ControlRomFeatures::cm32l(), SoundBank::default())
}

pub fn engine_with(features: ControlRomFeatures, bank: SoundBank) -> TestEngine {
    Engine::with_reporter(
        features,
        bank,
        RecordingDriver::default(),
        RecordingReporter::default(),
    )
}

/// Let every decaying or aborting unit finish, including ones started by
/// events replayed along the way.
pub fn settle(engine: &mut TestEngine) {
    loop {
        let pending = engine.driver_mut().take_pending();
        if pending.is_empty() {
            break;
        }
        for unit in pending {
            engine.unit_deactivated(unit);
        }
    }
}

/// Finish only the oldest decaying or aborting unit.
pub fn settle_one(engine: &mut TestEngine) -> bool {
    match engine.driver_mut().take_first_pending() {
        Some(unit) => {
            engine.unit_deactivated(unit);
            true
        }
        None => false,
    }
}

pub fn keys(engine: &TestEngine, channel: u8) -> Vec<u8> {
    engine.voices(channel).map(|voice| voice.key()).collect()
}

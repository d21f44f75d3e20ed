mod common;

use common::{engine, engine_with, keys};
use la32_voices::{
    patch::{PatchParam, PatchTemp, TimbreParam},
    synth::VoiceState,
    ControlRomFeatures, NoteDropped, SoundBank,
};

fn states(engine: &common::TestEngine, channel: u8) -> Vec<VoiceState> {
    engine.voices(channel).map(|v| v.state()).collect()
}

#[test]
fn hold_pedal_keeps_released_notes() {
    let mut engine = engine();
    engine.control_change(0, 64, 127);
    engine.note_on(0, 60, 100).unwrap();
    engine.note_off(0, 60);
    assert_eq!(states(&engine, 0), [VoiceState::Held]);
    assert!(engine.driver().decays.is_empty());
    assert_eq!(engine.non_releasing_voice_count(0), 1);

    engine.control_change(0, 64, 0);
    assert_eq!(states(&engine, 0), [VoiceState::Releasing]);
    assert_eq!(engine.driver().decays.len(), 2);
    assert_eq!(engine.reporter().channel_states(), [(0, true), (0, false)]);
}

#[test]
fn all_notes_off_honours_the_pedal() {
    let mut engine = engine();
    engine.control_change(0, 64, 100);
    engine.note_on(0, 60, 100).unwrap();
    engine.note_on(0, 62, 100).unwrap();
    engine.control_change(0, 123, 0);
    assert_eq!(states(&engine, 0), [VoiceState::Held, VoiceState::Held]);

    engine.control_change(0, 64, 0);
    assert_eq!(states(&engine, 0), [VoiceState::Releasing, VoiceState::Releasing]);
}

#[test]
fn non_sustaining_notes_only_stop_on_sound_off() {
    let mut engine = engine();
    engine.write_timbre(
        0,
        TimbreParam::named("Pluck").with_mute(0b0011).with_no_sustain(true),
    );
    engine.note_on(0, 60, 100).unwrap();
    engine.note_off(0, 60);
    engine.all_notes_off(0);
    assert_eq!(states(&engine, 0), [VoiceState::Playing]);

    engine.all_sound_off(0);
    assert_eq!(states(&engine, 0), [VoiceState::Releasing]);
}

#[test]
fn note_off_releases_first_match_only() {
    let mut engine = engine();
    engine.write_patch_temp(
        0,
        PatchTemp {
            patch: PatchParam {
                assign_mode: 2,
                ..PatchParam::default()
            },
            ..PatchTemp::default()
        },
    );
    engine.note_on(0, 60, 100).unwrap();
    engine.note_on(0, 60, 100).unwrap();
    engine.note_off(0, 60);
    assert_eq!(states(&engine, 0), [VoiceState::Releasing, VoiceState::Playing]);
}

#[test]
fn pedal_holds_each_same_key_voice_in_turn() {
    let mut engine = engine();
    engine.write_patch_temp(
        0,
        PatchTemp {
            patch: PatchParam {
                assign_mode: 2,
                ..PatchParam::default()
            },
            ..PatchTemp::default()
        },
    );
    engine.note_on(0, 60, 100).unwrap();
    engine.note_on(0, 60, 100).unwrap();
    engine.control_change(0, 64, 127);

    engine.note_off(0, 60);
    engine.note_off(0, 60);
    assert_eq!(states(&engine, 0), [VoiceState::Held, VoiceState::Held]);
    assert!(engine.driver().decays.is_empty());

    engine.control_change(0, 64, 0);
    assert_eq!(states(&engine, 0), [VoiceState::Releasing, VoiceState::Releasing]);
    assert_eq!(engine.non_releasing_voice_count(0), 0);
    assert_eq!(engine.driver().decays.len(), 4);
}

#[test]
fn zero_volume_override_silences_the_channel() {
    let mut engine = engine();
    engine.note_on(0, 60, 100).unwrap();
    engine.note_on(0, 62, 100).unwrap();

    engine.set_volume_override(0, Some(0));
    assert_eq!(states(&engine, 0), [VoiceState::Releasing, VoiceState::Releasing]);
    assert_eq!(engine.non_releasing_voice_count(0), 0);
    assert_eq!(engine.note_on(0, 64, 100), Err(NoteDropped::Silenced));

    engine.set_volume_override(0, Some(50));
    assert_eq!(engine.channel(0).map(|part| part.volume()), Some(50));
    assert!(engine.note_on(0, 64, 100).is_ok());

    engine.set_volume_override(0, Some(101));
    assert_eq!(engine.channel(0).map(|part| part.volume()), Some(80));
}

#[test]
fn reset_releases_everything_and_clears_controllers() {
    let mut engine = engine();
    engine.control_change(0, 11, 0);
    engine.control_change(0, 64, 127);
    engine.note_on(0, 60, 100).unwrap();
    engine.pitch_bend(0, 0);

    engine.reset();
    assert_eq!(states(&engine, 0), [VoiceState::Releasing]);
    let controllers = engine.channel(0).map(|part| *part.controllers());
    assert_eq!(controllers.map(|c| c.expression), Some(100));
    assert_eq!(controllers.map(|c| c.hold_pedal), Some(false));
    assert_eq!(controllers.map(|c| c.pitch_bend), Some(0));
}

#[test]
fn key_shift_moves_the_internal_key() {
    let shifted = PatchTemp {
        patch: PatchParam {
            key_shift: 36,
            ..PatchParam::default()
        },
        ..PatchTemp::default()
    };

    let mut engine = engine();
    engine.write_patch_temp(0, shifted);
    engine.note_on(0, 60, 100).unwrap();
    assert_eq!(keys(&engine, 0), [72]);
    engine.note_off(0, 60);
    assert_eq!(states(&engine, 0), [VoiceState::Releasing]);

    let mut engine = engine_with(ControlRomFeatures::mt32_gen0(), SoundBank::default());
    engine.write_patch_temp(0, shifted);
    engine.note_on(0, 60, 100).unwrap();
    assert_eq!(keys(&engine, 0), [60]);
}

#[test]
fn bender_range_follows_rpn_zero() {
    let mut engine = engine();
    engine.control_change(0, 101, 0);
    engine.control_change(0, 100, 0);
    engine.control_change(0, 6, 2);
    assert_eq!(engine.patch_temp(0).map(|t| t.patch.bender_range), Some(2));

    engine.pitch_bend(0, 0x3FFF);
    let bend = engine.channel(0).map(|part| part.controllers().pitch_bend);
    assert_eq!(bend, Some((8191 * 2 * 683) >> 14));

    engine.control_change(0, 99, 0);
    engine.control_change(0, 6, 12);
    assert_eq!(engine.patch_temp(0).map(|t| t.patch.bender_range), Some(2));
}

#[test]
fn pan_scaling_depends_on_variant() {
    let mut mt32 = engine_with(ControlRomFeatures::mt32(), SoundBank::default());
    let mut cm32l = engine();
    mt32.control_change(0, 10, 60);
    cm32l.control_change(0, 10, 60);
    assert_eq!(mt32.patch_temp(0).map(|t| t.panpot), Some(6));
    assert_eq!(cm32l.patch_temp(0).map(|t| t.panpot), Some(7));
}

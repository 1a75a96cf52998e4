use std::{cell::RefCell, rc::Rc};

use approx::assert_abs_diff_eq;
use sonicflow_core::{
    config::AudioConfig, AudioBackend, AudioContext, ContextState, CrossfadeState, Engine,
    EngineConfig, EngineError, ParamId, Route, StereoFrame, Track,
};

const SAMPLE_RATE: u32 = 8_000;
const BLOCK: usize = 200;

fn config() -> EngineConfig {
    let mut config = EngineConfig::default();
    config.audio = AudioConfig {
        sample_rate: SAMPLE_RATE,
        block_size: BLOCK,
    };
    config
}

fn started(config: EngineConfig) -> Engine {
    let mut engine = Engine::new(config).unwrap();
    engine.resume_context().unwrap();
    engine
}

/// Renders `seconds` of audio and returns the peak sample seen.
fn run(engine: &mut Engine, seconds: f64) -> f32 {
    let mut out = vec![StereoFrame::SILENCE; BLOCK];
    let blocks = (seconds * SAMPLE_RATE as f64 / BLOCK as f64).round() as usize;
    let mut peak: f32 = 0.0;
    for _ in 0..blocks {
        engine.render(&mut out);
        for frame in &out {
            peak = peak.max(frame.left.abs()).max(frame.right.abs());
        }
    }
    peak
}

fn tone(id: &str, seconds: u32, genre: &str) -> Track {
    Track::new(id, format!("tone:330:{seconds}"), genre)
}

#[test]
fn queue_plays_through_with_one_transition_per_track() {
    let mut engine = started(config());
    engine.add_to_queue(tone("one", 5, "afro"));
    engine.add_to_queue(tone("two", 5, "trap"));
    engine.add_to_queue(tone("three", 30, "jazz"));

    let mut transitions = 0;
    let mut previous = CrossfadeState::Idle;
    engine.play();
    for _ in 0..(9 * SAMPLE_RATE as usize / BLOCK) {
        run(&mut engine, BLOCK as f64 / SAMPLE_RATE as f64);
        let state = engine.crossfade_state();
        if previous == CrossfadeState::Idle && state != CrossfadeState::Idle {
            transitions += 1;
        }
        previous = state;
    }

    assert_eq!(transitions, 2);
    assert_eq!(engine.current_track().unwrap().id, "three");
    assert_eq!(engine.current_genre(), Some("jazz"));
    assert_eq!(engine.chain().build_count(), 1);
}

#[test]
fn topology_is_fixed_across_genre_changes() {
    let mut engine = started(config());
    engine.set_crossfade_enabled(false);
    engine.play_song(tone("a", 30, "afro")).unwrap();
    let topology = engine.chain().topology().unwrap().clone();

    for (index, genre) in ["trap", "rock", "gospel", "electronic"].iter().enumerate() {
        engine
            .play_song(tone(&format!("t{index}"), 30, genre))
            .unwrap();
        run(&mut engine, 0.1);
    }

    assert_eq!(engine.chain().topology(), Some(&topology));
    assert_eq!(engine.chain().build_count(), 1);
}

#[test]
fn afro_then_trap_lands_on_trap_after_the_window() {
    let mut engine = started(config());
    engine.set_crossfade_enabled(false);
    engine.play_song(tone("a", 30, "afro")).unwrap();
    engine.play_song(tone("b", 30, "trap")).unwrap();

    run(&mut engine, 0.5);
    let now = engine.context_time();
    assert_abs_diff_eq!(
        engine.chain().param_value(ParamId::BassGain, now).unwrap(),
        4.0,
        epsilon = 1e-5
    );
    assert_abs_diff_eq!(
        engine.chain().param_value(ParamId::HaasDelayRight, now).unwrap(),
        0.000_86,
        epsilon = 1e-8
    );
}

#[test]
fn crossfade_is_audible_throughout() {
    let mut engine = started(config());
    engine.add_to_queue(tone("a", 30, "pop"));
    engine.add_to_queue(tone("b", 30, "pop"));
    engine.play();
    run(&mut engine, 0.5);

    engine.next().unwrap();
    for _ in 0..20 {
        assert!(run(&mut engine, 0.1) > 0.01);
    }
    run(&mut engine, 0.1);
    assert_eq!(engine.crossfade_state(), CrossfadeState::Idle);
    assert_eq!(engine.current_track().unwrap().id, "b");
    assert_eq!(engine.mixer().len(), 1);
}

#[test]
fn analysis_reaches_subscribers_and_survives_panics() {
    let mut engine = started(config());
    let received = Rc::new(RefCell::new(0));
    let counter = received.clone();
    engine.subscribe_to_analysis(|_| panic!("subscriber bug"));
    let _subscription = engine.subscribe_to_analysis(move |_| *counter.borrow_mut() += 1);

    engine.play_song(tone("a", 30, "electronic")).unwrap();
    run(&mut engine, 0.2);
    engine.display_tick();
    engine.display_tick();

    assert_eq!(*received.borrow(), 2);
    assert!(engine.analysis().energy > 0.0);
    let tempo = engine.analysis().tempo;
    assert!((60.0..=140.0).contains(&tempo));
}

#[test]
fn analysis_before_playback_is_zeroed() {
    let mut engine = Engine::new(config()).unwrap();
    engine.display_tick();
    assert_eq!(engine.analysis(), Default::default());
}

struct NoDevice;

impl AudioBackend for NoDevice {
    fn open_context(&self, _config: &AudioConfig) -> sonicflow_core::Result<AudioContext> {
        Err(EngineError::EngineUnavailable("device busy".to_string()))
    }
}

#[test]
fn missing_audio_device_degrades_to_direct_playback() {
    let mut engine = Engine::with_components(
        config(),
        Box::new(NoDevice),
        Box::new(sonicflow_core::DefaultLoader),
    )
    .unwrap();
    engine.add_to_queue(tone("a", 30, "afro"));
    engine.add_to_queue(tone("b", 30, "trap"));
    engine.play();

    assert!(engine.is_playing());
    assert!(run(&mut engine, 0.5) > 0.1);
    let adapter = engine.session().active().unwrap().adapter;
    assert_eq!(engine.mixer().adapter(adapter).unwrap().route(), Route::Direct);

    engine.next().unwrap();
    run(&mut engine, 2.5);
    assert_eq!(engine.current_track().unwrap().id, "b");
    assert_eq!(engine.take_degradations().len(), 1);
}

#[test]
fn destroy_stops_timers_and_ignores_later_calls() {
    let mut engine = started(config());
    engine.add_to_queue(tone("a", 30, "pop"));
    engine.add_to_queue(tone("b", 30, "pop"));
    engine.play();
    run(&mut engine, 0.3);
    engine.next().unwrap();
    run(&mut engine, 0.3);
    assert_eq!(engine.crossfade_state(), CrossfadeState::Ramping);

    engine.destroy();
    assert_eq!(engine.context_state(), Some(ContextState::Closed));
    assert_eq!(run(&mut engine, 1.0), 0.0);
    assert_eq!(engine.crossfade_state(), CrossfadeState::Idle);

    engine.next().unwrap();
    engine.seek_to(3.0);
    engine.set_volume(0.2);
    assert!(engine.resume_context().is_ok());
    assert!(!engine.is_playing());
}

use std::time::{Duration, Instant};

use cutwatch_core::{
    update, Admission, LoopMode, LoopRegion, NetworkState, Observation, PlaybackCapabilities,
    SeekArm, SeekEffect, SeekMsg, SeekSequence, SeekSettings, SeekState, TimeRange,
};
use pretty_assertions::assert_eq;

fn settings() -> SeekSettings {
    SeekSettings {
        capabilities: PlaybackCapabilities {
            frame_callbacks: true,
            hard_reset: true,
        },
        ..SeekSettings::default()
    }
}

fn seek(state: SeekState, target_ms: f64, now: Instant) -> (SeekState, Vec<SeekEffect>) {
    update(state, SeekMsg::Seek { target_ms, now })
}

fn signal(
    state: SeekState,
    sequence: SeekSequence,
    arm: SeekArm,
    position_ms: f64,
    now: Instant,
) -> (SeekState, Vec<SeekEffect>) {
    update(
        state,
        SeekMsg::Signal {
            sequence,
            arm,
            observation: Observation {
                position_ms,
                network_state: NetworkState::Idle,
                now,
            },
        },
    )
}

fn resolutions(effects: &[SeekEffect]) -> Vec<f64> {
    effects
        .iter()
        .filter_map(|effect| match effect {
            SeekEffect::Resolved(resolution) => Some(resolution.target_ms),
            _ => None,
        })
        .collect()
}

#[test]
fn seek_pauses_positions_and_arms_every_signal() {
    let now = Instant::now();
    let s = settings();
    let (state, effects) = seek(SeekState::new(s.clone()), 30_000.0, now);

    assert_eq!(
        effects,
        vec![
            SeekEffect::Pause,
            SeekEffect::SetPosition {
                position_ms: 30_000.0
            },
            SeekEffect::WatchFrames { sequence: 1 },
            SeekEffect::StartPositionPoll {
                sequence: 1,
                tick: s.poll_tick
            },
            SeekEffect::ScheduleNudge {
                sequence: 1,
                after: s.nudge_delay
            },
            SeekEffect::ScheduleHardReset {
                sequence: 1,
                after: s.hard_reset_delay
            },
        ]
    );
    let view = state.view();
    assert!(view.positioning);
    assert!(!view.playing);
    assert_eq!(view.target_ms, Some(30_000.0));
}

#[test]
fn capability_flags_drop_optional_arms() {
    let s = SeekSettings {
        capabilities: PlaybackCapabilities {
            frame_callbacks: false,
            hard_reset: false,
        },
        ..SeekSettings::default()
    };
    let (_, effects) = seek(SeekState::new(s), 1_000.0, Instant::now());
    assert!(!effects
        .iter()
        .any(|e| matches!(e, SeekEffect::WatchFrames { .. } | SeekEffect::ScheduleHardReset { .. })));
}

#[test]
fn first_signal_wins_and_later_arms_are_noops() {
    let now = Instant::now();
    let (state, _) = seek(SeekState::new(settings()), 5_000.0, now);
    let (state, effects) = signal(state, 1, SeekArm::NativeEvent, 5_000.0, now);
    assert_eq!(effects[0], SeekEffect::CancelArms { sequence: 1 });
    assert_eq!(resolutions(&effects), vec![5_000.0]);
    assert!(!state.view().positioning);
    assert_eq!(state.race().check(1), Admission::AlreadyResolved);

    for arm in [
        SeekArm::FrameCallback,
        SeekArm::PositionPoll,
        SeekArm::Nudge,
        SeekArm::HardReset,
        SeekArm::NativeEvent,
    ] {
        let (_, effects) = signal(state.clone(), 1, arm, 5_000.0, now);
        assert!(effects.is_empty(), "{arm:?} should be ignored");
    }
}

#[test]
fn newer_request_preempts_older_race() {
    let now = Instant::now();
    let (state, _) = seek(SeekState::new(settings()), 30_000.0, now);
    let (state, effects) = seek(state, 90_000.0, now);
    assert_eq!(effects[0], SeekEffect::CancelArms { sequence: 1 });
    assert_eq!(state.race().check(1), Admission::Stale);

    let mut state = state;
    for arm in [
        SeekArm::NativeEvent,
        SeekArm::FrameCallback,
        SeekArm::PositionPoll,
        SeekArm::Nudge,
        SeekArm::HardReset,
    ] {
        let (next, effects) = signal(state, 1, arm, 30_000.0, now + Duration::from_secs(10));
        assert!(effects.is_empty());
        state = next;
    }
    assert!(state.view().positioning);

    let (state, effects) = signal(state, 2, SeekArm::FrameCallback, 90_000.0, now);
    assert_eq!(resolutions(&effects), vec![90_000.0]);
    assert_eq!(state.view().resolved_ms, Some(90_000.0));
}

#[test]
fn poll_resolves_within_tolerance_or_gives_up() {
    let now = Instant::now();
    let s = settings();
    let (state, _) = seek(SeekState::new(s.clone()), 10_000.0, now);

    let (state, effects) = signal(state, 1, SeekArm::PositionPoll, 9_000.0, now);
    assert!(effects.is_empty());
    let (_, effects) = signal(state.clone(), 1, SeekArm::PositionPoll, 10_030.0, now);
    assert_eq!(resolutions(&effects), vec![10_000.0]);

    let late = now + s.poll_max_wait;
    let (_, effects) = signal(state, 1, SeekArm::PositionPoll, 0.0, late);
    match &effects[1] {
        SeekEffect::Resolved(resolution) => {
            assert!(resolution.best_effort);
            assert_eq!(resolution.arm, SeekArm::PositionPoll);
        }
        other => panic!("unexpected effect {other:?}"),
    }
}

#[test]
fn nudge_reasserts_just_past_target() {
    let now = Instant::now();
    let (state, _) = seek(SeekState::new(settings()), 2_000.0, now);
    let (state, effects) = signal(state, 1, SeekArm::Nudge, 0.0, now);
    assert_eq!(
        effects,
        vec![SeekEffect::SetPosition {
            position_ms: 2_001.0
        }]
    );
    assert!(state.view().positioning);
}

#[test]
fn hard_reset_only_when_source_is_lost() {
    let now = Instant::now();
    let (state, _) = seek(SeekState::new(settings()), 7_000.0, now);
    let (state, effects) = signal(state, 1, SeekArm::HardReset, 0.0, now);
    assert!(effects.is_empty());

    let (state, effects) = update(
        state,
        SeekMsg::Signal {
            sequence: 1,
            arm: SeekArm::HardReset,
            observation: Observation {
                position_ms: 0.0,
                network_state: NetworkState::NoSource,
                now,
            },
        },
    );
    assert_eq!(effects, vec![SeekEffect::ReloadSource]);

    let (state, effects) = update(state, SeekMsg::SourceReady);
    assert_eq!(
        effects,
        vec![SeekEffect::SetPosition {
            position_ms: 7_000.0
        }]
    );
    let (_, effects) = update(state, SeekMsg::SourceReady);
    assert!(effects.is_empty());
}

#[test]
fn hard_reset_suppressed_by_capability() {
    let now = Instant::now();
    let s = SeekSettings {
        capabilities: PlaybackCapabilities {
            frame_callbacks: false,
            hard_reset: false,
        },
        ..SeekSettings::default()
    };
    let (state, _) = seek(SeekState::new(s), 7_000.0, now);
    let (_, effects) = update(
        state,
        SeekMsg::Signal {
            sequence: 1,
            arm: SeekArm::HardReset,
            observation: Observation {
                position_ms: 0.0,
                network_state: NetworkState::NoSource,
                now,
            },
        },
    );
    assert!(effects.is_empty());
}

#[test]
fn media_error_surfaces_as_not_playing() {
    let (state, _) = update(SeekState::default(), SeekMsg::PlayRequested);
    assert!(state.view().playing);
    let (state, effects) = update(state, SeekMsg::MediaError);
    assert!(effects.is_empty());
    assert!(!state.view().playing);
    assert!(state.view().failed);
}

fn playing_with_region(mode: LoopMode) -> SeekState {
    let region = LoopRegion::new(
        &[
            TimeRange::new("b", 10_000, 12_000),
            TimeRange::new("a", 2_000, 4_000),
        ],
        60_000,
        mode,
    );
    let (state, _) = update(SeekState::new(settings()), SeekMsg::SetLoopRegion(region));
    let (state, _) = update(state, SeekMsg::PlayRequested);
    state
}

#[test]
fn loop_region_jumps_between_ranges_and_wraps() {
    let state = playing_with_region(LoopMode::Loop);

    let (state, effects) = update(state, SeekMsg::TimeUpdate { position_ms: 3_000.0 });
    assert!(effects.is_empty());

    let (state, effects) = update(state, SeekMsg::TimeUpdate { position_ms: 3_990.0 });
    assert_eq!(
        effects,
        vec![SeekEffect::SetPosition {
            position_ms: 10_000.0
        }]
    );

    let (state, effects) = update(state, SeekMsg::TimeUpdate { position_ms: 11_985.0 });
    assert_eq!(
        effects,
        vec![SeekEffect::SetPosition {
            position_ms: 2_000.0
        }]
    );
    assert!(state.view().playing);
}

#[test]
fn once_region_pauses_at_boundary() {
    let state = playing_with_region(LoopMode::Once);
    let (state, effects) = update(state, SeekMsg::TimeUpdate { position_ms: 12_000.0 });
    assert_eq!(
        effects,
        vec![
            SeekEffect::Pause,
            SeekEffect::SetPosition {
                position_ms: 12_000.0
            }
        ]
    );
    assert!(!state.view().playing);

    let (_, effects) = update(state, SeekMsg::TimeUpdate { position_ms: 12_500.0 });
    assert!(effects.is_empty());
}

#[test]
fn empty_region_is_rejected() {
    assert!(LoopRegion::new(&[TimeRange::new("x", 5, 5)], 100, LoopMode::Loop).is_none());
}

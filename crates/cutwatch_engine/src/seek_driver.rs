//! Runs the seek race against a real playback primitive.
//!
//! The pure [`SeekState`] decides; this driver owns the timers, the
//! animation-tick poll loop and the frame watch, and tears all of them down
//! when a sequence resolves or is superseded.

use std::future::Future;
use std::sync::{Arc, Mutex, Weak};
use std::time::Duration;

use cutwatch_core::{
    update, LoopRegion, NetworkState, Observation, SeekArm, SeekEffect, SeekMsg, SeekResolution,
    SeekSequence, SeekSettings, SeekState, SeekView,
};
use cutwatch_logging::{watch_debug, watch_trace, watch_warn};
use tokio::task::AbortHandle;

use crate::types::lock;

/// The media element being driven. Exactly one driver per primitive.
pub trait PlaybackPrimitive: Send + Sync {
    fn play(&self);
    fn pause(&self);
    fn set_position(&self, position_ms: f64);
    fn position_ms(&self) -> f64;
    fn network_state(&self) -> NetworkState;
    /// Tears down and reloads the source. Report
    /// [`PrimitiveEvent::CanAcceptPosition`] once a position can be applied.
    fn reload_source(&self);
    /// Starts or stops per-rendered-frame reporting. Only called when the
    /// frame-callback capability is enabled.
    fn watch_frames(&self, _enabled: bool) {}
}

/// Events reported by the primitive.
#[derive(Debug, Clone, PartialEq)]
pub enum PrimitiveEvent {
    Seeked,
    FrameRendered,
    TimeUpdate { position_ms: f64 },
    CanAcceptPosition,
    Playing,
    Paused,
    Error(String),
}

pub trait SeekObserver: Send + Sync {
    fn on_resolved(&self, _resolution: &SeekResolution) {}
    fn on_view(&self, _view: &SeekView) {}
}

/// Observer that ignores everything.
pub struct NoopSeekObserver;

impl SeekObserver for NoopSeekObserver {}

#[derive(Clone)]
pub struct SeekDriver {
    inner: Arc<DriverInner>,
}

struct DriverInner {
    primitive: Arc<dyn PlaybackPrimitive>,
    observer: Arc<dyn SeekObserver>,
    state: Mutex<DriverState>,
}

struct DriverState {
    seek: SeekState,
    arms: Vec<(SeekSequence, AbortHandle)>,
}

impl SeekDriver {
    /// Must be called inside a tokio runtime; arms are spawned on it.
    pub fn new(
        primitive: Arc<dyn PlaybackPrimitive>,
        settings: SeekSettings,
        observer: Arc<dyn SeekObserver>,
    ) -> Self {
        Self {
            inner: Arc::new(DriverInner {
                primitive,
                observer,
                state: Mutex::new(DriverState {
                    seek: SeekState::new(settings),
                    arms: Vec::new(),
                }),
            }),
        }
    }

    /// Issues a new seek, pre-empting any unresolved one.
    pub fn seek(&self, target_ms: f64) -> SeekSequence {
        let now = tokio::time::Instant::now().into_std();
        advance(&self.inner, SeekMsg::Seek { target_ms, now }).unwrap_or_default()
    }

    pub fn play(&self) {
        feed(&self.inner, SeekMsg::PlayRequested);
    }

    pub fn pause(&self) {
        feed(&self.inner, SeekMsg::PauseRequested);
    }

    pub fn set_loop_region(&self, region: Option<LoopRegion>) {
        feed(&self.inner, SeekMsg::SetLoopRegion(region));
    }

    pub fn handle_event(&self, event: PrimitiveEvent) {
        match event {
            PrimitiveEvent::Seeked => signal_current(&self.inner, SeekArm::NativeEvent),
            PrimitiveEvent::FrameRendered => signal_current(&self.inner, SeekArm::FrameCallback),
            PrimitiveEvent::TimeUpdate { position_ms } => {
                feed(&self.inner, SeekMsg::TimeUpdate { position_ms })
            }
            PrimitiveEvent::CanAcceptPosition => feed(&self.inner, SeekMsg::SourceReady),
            PrimitiveEvent::Playing => feed(&self.inner, SeekMsg::PlaybackChanged { playing: true }),
            PrimitiveEvent::Paused => feed(&self.inner, SeekMsg::PlaybackChanged { playing: false }),
            PrimitiveEvent::Error(message) => {
                watch_warn!("playback error: {}", message);
                feed(&self.inner, SeekMsg::MediaError);
            }
        }
    }

    pub fn view(&self) -> SeekView {
        lock(&self.inner.state).seek.view()
    }

    /// Arm tasks still registered (timers, poll loop).
    pub fn pending_arms(&self) -> usize {
        let mut state = lock(&self.inner.state);
        state.arms.retain(|(_, handle)| !handle.is_finished());
        state.arms.len()
    }
}

/// Native events carry no token; they belong to whatever race is current.
fn signal_current(inner: &Arc<DriverInner>, arm: SeekArm) {
    let current = lock(&inner.state).seek.race().current();
    if let Some(sequence) = current {
        fire(inner, sequence, arm);
    }
}

/// Reports one arm firing. Returns whether the race is still open.
fn fire(inner: &Arc<DriverInner>, sequence: SeekSequence, arm: SeekArm) -> bool {
    let observation = Observation {
        position_ms: inner.primitive.position_ms(),
        network_state: inner.primitive.network_state(),
        now: tokio::time::Instant::now().into_std(),
    };
    feed(
        inner,
        SeekMsg::Signal {
            sequence,
            arm,
            observation,
        },
    );
    let open = lock(&inner.state).seek.race().is_open(sequence);
    if !open {
        watch_trace!("seek {} arm {:?} settled or stale", sequence, arm);
    }
    open
}

fn feed(inner: &Arc<DriverInner>, msg: SeekMsg) {
    advance(inner, msg);
}

/// Runs one message through the state machine and applies its effects.
/// Returns the race that was current right after the update, read under
/// the same lock so a concurrent seek cannot swap it.
fn advance(inner: &Arc<DriverInner>, msg: SeekMsg) -> Option<SeekSequence> {
    let (effects, view, current) = {
        let mut state = lock(&inner.state);
        let seek = std::mem::take(&mut state.seek);
        let (next, effects) = update(seek, msg);
        state.seek = next;
        (effects, state.seek.view(), state.seek.race().current())
    };
    if effects.is_empty() {
        return current;
    }
    for effect in effects {
        apply(inner, effect);
    }
    inner.observer.on_view(&view);
    current
}

fn apply(inner: &Arc<DriverInner>, effect: SeekEffect) {
    let primitive = &inner.primitive;
    match effect {
        SeekEffect::Pause => primitive.pause(),
        SeekEffect::Play => primitive.play(),
        SeekEffect::SetPosition { position_ms } => primitive.set_position(position_ms),
        SeekEffect::WatchFrames { .. } => primitive.watch_frames(true),
        SeekEffect::StartPositionPoll { sequence, tick } => {
            let weak = Arc::downgrade(inner);
            spawn_arm(inner, sequence, poll_positions(weak, sequence, tick));
        }
        SeekEffect::ScheduleNudge { sequence, after } => {
            let weak = Arc::downgrade(inner);
            spawn_arm(inner, sequence, fire_after(weak, sequence, SeekArm::Nudge, after));
        }
        SeekEffect::ScheduleHardReset { sequence, after } => {
            let weak = Arc::downgrade(inner);
            spawn_arm(inner, sequence, fire_after(weak, sequence, SeekArm::HardReset, after));
        }
        SeekEffect::CancelArms { sequence } => {
            let frame_callbacks = {
                let mut state = lock(&inner.state);
                state.arms.retain(|(arm_sequence, handle)| {
                    if *arm_sequence == sequence {
                        handle.abort();
                        false
                    } else {
                        true
                    }
                });
                state.seek.settings().capabilities.frame_callbacks
            };
            if frame_callbacks {
                primitive.watch_frames(false);
            }
        }
        SeekEffect::ReloadSource => {
            watch_warn!("playback source lost during seek; reloading");
            primitive.reload_source();
        }
        SeekEffect::Resolved(resolution) => {
            watch_debug!(
                "seek {} to {}ms resolved by {:?} after {:?}{}",
                resolution.sequence,
                resolution.target_ms,
                resolution.arm,
                resolution.elapsed,
                if resolution.best_effort { " (best effort)" } else { "" }
            );
            inner.observer.on_resolved(&resolution);
        }
    }
}

fn spawn_arm<F>(inner: &Arc<DriverInner>, sequence: SeekSequence, arm: F)
where
    F: Future<Output = ()> + Send + 'static,
{
    let mut state = lock(&inner.state);
    // A synchronous resolution may already have closed this race.
    if !state.seek.race().is_open(sequence) {
        return;
    }
    let handle = tokio::spawn(arm);
    state.arms.retain(|(_, handle)| !handle.is_finished());
    state.arms.push((sequence, handle.abort_handle()));
}

async fn fire_after(inner: Weak<DriverInner>, sequence: SeekSequence, arm: SeekArm, after: Duration) {
    tokio::time::sleep(after).await;
    if let Some(inner) = inner.upgrade() {
        fire(&inner, sequence, arm);
    }
}

async fn poll_positions(inner: Weak<DriverInner>, sequence: SeekSequence, tick: Duration) {
    let mut ticker = tokio::time::interval(tick.max(Duration::from_millis(1)));
    loop {
        ticker.tick().await;
        let Some(inner) = inner.upgrade() else {
            return;
        };
        if !fire(&inner, sequence, SeekArm::PositionPoll) {
            return;
        }
    }
}

//! Seek completion as a pure state machine.
//!
//! Every seek opens a race keyed by a strictly increasing sequence token.
//! Arms (native event, frame callback, position poll, nudge, hard reset)
//! report back through [`SeekMsg::Signal`]; the [`SeekRace`] admits a signal
//! only while its sequence is current and unresolved. The caller executes the
//! returned [`SeekEffect`]s against the real playback primitive.

use std::time::{Duration, Instant};

use crate::ranges::{normalize, TimeRange, TimeRangeSet};

pub type SeekSequence = u64;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SeekArm {
    /// The primitive's own "seek complete" event.
    NativeEvent,
    /// A per-rendered-frame callback.
    FrameCallback,
    /// Animation-tick comparison of position against target.
    PositionPoll,
    /// One-shot re-assertion just past the target.
    Nudge,
    /// Full source reload when the primitive lost its resource.
    HardReset,
}

/// Resource state as reported by the primitive.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum NetworkState {
    /// Nothing loaded yet.
    Empty,
    #[default]
    Idle,
    Loading,
    /// The primitive has no usable source.
    NoSource,
}

impl NetworkState {
    pub fn lost_source(self) -> bool {
        matches!(self, Self::Empty | Self::NoSource)
    }
}

/// Platform capabilities injected by the embedding application.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PlaybackCapabilities {
    /// The primitive delivers per-rendered-frame callbacks.
    pub frame_callbacks: bool,
    /// Allow the hard-reset arm. Disable on platforms that already keep the
    /// underlying resource alive.
    pub hard_reset: bool,
}

impl Default for PlaybackCapabilities {
    fn default() -> Self {
        Self {
            frame_callbacks: false,
            hard_reset: true,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct SeekSettings {
    pub tolerance_ms: f64,
    pub poll_tick: Duration,
    pub poll_max_wait: Duration,
    pub nudge_delay: Duration,
    pub nudge_step_ms: f64,
    pub hard_reset_delay: Duration,
    pub loop_epsilon_ms: f64,
    pub capabilities: PlaybackCapabilities,
}

impl Default for SeekSettings {
    fn default() -> Self {
        Self {
            tolerance_ms: 40.0,
            poll_tick: Duration::from_millis(16),
            poll_max_wait: Duration::from_millis(5000),
            nudge_delay: Duration::from_millis(300),
            nudge_step_ms: 1.0,
            hard_reset_delay: Duration::from_millis(2500),
            loop_epsilon_ms: 30.0,
            capabilities: PlaybackCapabilities::default(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SeekRequest {
    pub target_ms: f64,
    pub sequence: SeekSequence,
    pub started_at: Instant,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SeekResolution {
    pub sequence: SeekSequence,
    pub target_ms: f64,
    pub arm: SeekArm,
    /// Resolved by the poll give-up, not by reaching the target.
    pub best_effort: bool,
    pub elapsed: Duration,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Admission {
    Admitted,
    /// The signal belongs to a superseded sequence.
    Stale,
    AlreadyResolved,
    /// No seek has been issued yet.
    Idle,
}

/// First-signal-wins combinator for the current sequence.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SeekRace {
    current: Option<SeekSequence>,
    resolved: bool,
}

impl SeekRace {
    /// Opens a race for `sequence`; returns the superseded sequence if it was
    /// still unresolved.
    fn open(&mut self, sequence: SeekSequence) -> Option<SeekSequence> {
        let superseded = self.current.filter(|_| !self.resolved);
        self.current = Some(sequence);
        self.resolved = false;
        superseded
    }

    pub fn check(&self, sequence: SeekSequence) -> Admission {
        match self.current {
            None => Admission::Idle,
            Some(current) if current != sequence => Admission::Stale,
            Some(_) if self.resolved => Admission::AlreadyResolved,
            Some(_) => Admission::Admitted,
        }
    }

    /// Like [`check`](Self::check), but closes the race when admitted.
    fn resolve(&mut self, sequence: SeekSequence) -> Admission {
        let admission = self.check(sequence);
        if admission == Admission::Admitted {
            self.resolved = true;
        }
        admission
    }

    pub fn is_open(&self, sequence: SeekSequence) -> bool {
        self.check(sequence) == Admission::Admitted
    }

    pub fn current(&self) -> Option<SeekSequence> {
        self.current
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoopMode {
    /// Wrap to the first range after the last one.
    Loop,
    /// Pause exactly at the end of the last range.
    Once,
}

/// Region played back while active. Always normalized.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoopRegion {
    ranges: Vec<TimeRange>,
    mode: LoopMode,
}

impl LoopRegion {
    /// Returns `None` when nothing remains after normalization.
    pub fn new(ranges: &[TimeRange], duration_ms: i64, mode: LoopMode) -> Option<Self> {
        let ranges = normalize(ranges, duration_ms);
        if ranges.is_empty() {
            return None;
        }
        Some(Self { ranges, mode })
    }

    pub fn from_set(set: &TimeRangeSet, mode: LoopMode) -> Option<Self> {
        if set.is_empty() {
            return None;
        }
        Some(Self {
            ranges: set.ranges().to_vec(),
            mode,
        })
    }

    pub fn ranges(&self) -> &[TimeRange] {
        &self.ranges
    }

    pub fn mode(&self) -> LoopMode {
        self.mode
    }

    fn boundary_action(&self, position_ms: f64, epsilon_ms: f64) -> Option<LoopAction> {
        let upcoming = self
            .ranges
            .iter()
            .find(|range| position_ms < range.end_ms as f64 - epsilon_ms);
        match upcoming {
            Some(range) if position_ms >= range.start_ms as f64 => None,
            Some(range) => Some(LoopAction::JumpTo(range.start_ms as f64)),
            None => {
                let (first, last) = (self.ranges.first()?, self.ranges.last()?);
                match self.mode {
                    LoopMode::Loop => Some(LoopAction::JumpTo(first.start_ms as f64)),
                    LoopMode::Once => Some(LoopAction::StopAt(last.end_ms as f64)),
                }
            }
        }
    }
}

enum LoopAction {
    JumpTo(f64),
    StopAt(f64),
}

/// What the primitive looked like when an arm fired.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Observation {
    pub position_ms: f64,
    pub network_state: NetworkState,
    pub now: Instant,
}

#[derive(Debug, Clone, PartialEq)]
pub enum SeekMsg {
    Seek { target_ms: f64, now: Instant },
    Signal {
        sequence: SeekSequence,
        arm: SeekArm,
        observation: Observation,
    },
    /// The reloaded source can accept a position again.
    SourceReady,
    PlayRequested,
    PauseRequested,
    PlaybackChanged { playing: bool },
    /// Decode failure reported by the primitive.
    MediaError,
    TimeUpdate { position_ms: f64 },
    SetLoopRegion(Option<LoopRegion>),
}

#[derive(Debug, Clone, PartialEq)]
pub enum SeekEffect {
    Pause,
    Play,
    SetPosition { position_ms: f64 },
    WatchFrames { sequence: SeekSequence },
    StartPositionPoll { sequence: SeekSequence, tick: Duration },
    ScheduleNudge { sequence: SeekSequence, after: Duration },
    ScheduleHardReset { sequence: SeekSequence, after: Duration },
    /// Tear down every timer, frame watch and poll loop of `sequence`.
    CancelArms { sequence: SeekSequence },
    ReloadSource,
    Resolved(SeekResolution),
}

/// Visible playback state for the UI.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct SeekView {
    pub sequence: Option<SeekSequence>,
    pub target_ms: Option<f64>,
    pub positioning: bool,
    pub playing: bool,
    pub failed: bool,
    pub resolved_ms: Option<f64>,
}

#[derive(Debug, Clone, Default)]
pub struct SeekState {
    settings: SeekSettings,
    next_sequence: SeekSequence,
    race: SeekRace,
    request: Option<SeekRequest>,
    positioning: bool,
    playing: bool,
    failed: bool,
    pending_reload: Option<f64>,
    last_resolution: Option<SeekResolution>,
    loop_region: Option<LoopRegion>,
}

impl SeekState {
    pub fn new(settings: SeekSettings) -> Self {
        Self {
            settings,
            ..Self::default()
        }
    }

    pub fn settings(&self) -> &SeekSettings {
        &self.settings
    }

    pub fn race(&self) -> SeekRace {
        self.race
    }

    pub fn request(&self) -> Option<SeekRequest> {
        self.request
    }

    pub fn last_resolution(&self) -> Option<SeekResolution> {
        self.last_resolution
    }

    pub fn loop_region(&self) -> Option<&LoopRegion> {
        self.loop_region.as_ref()
    }

    pub fn view(&self) -> SeekView {
        SeekView {
            sequence: self.request.map(|request| request.sequence),
            target_ms: self.request.map(|request| request.target_ms),
            positioning: self.positioning,
            playing: self.playing,
            failed: self.failed,
            resolved_ms: self.last_resolution.map(|resolution| resolution.target_ms),
        }
    }

    fn begin(&mut self, target_ms: f64, now: Instant) -> Vec<SeekEffect> {
        let target_ms = if target_ms.is_finite() {
            target_ms.max(0.0)
        } else {
            0.0
        };
        self.next_sequence += 1;
        let sequence = self.next_sequence;

        let mut effects = Vec::with_capacity(7);
        if let Some(superseded) = self.race.open(sequence) {
            effects.push(SeekEffect::CancelArms {
                sequence: superseded,
            });
        }
        self.request = Some(SeekRequest {
            target_ms,
            sequence,
            started_at: now,
        });
        self.pending_reload = None;
        self.positioning = true;
        self.playing = false;

        let settings = &self.settings;
        effects.push(SeekEffect::Pause);
        effects.push(SeekEffect::SetPosition {
            position_ms: target_ms,
        });
        if settings.capabilities.frame_callbacks {
            effects.push(SeekEffect::WatchFrames { sequence });
        }
        effects.push(SeekEffect::StartPositionPoll {
            sequence,
            tick: settings.poll_tick,
        });
        effects.push(SeekEffect::ScheduleNudge {
            sequence,
            after: settings.nudge_delay,
        });
        if settings.capabilities.hard_reset {
            effects.push(SeekEffect::ScheduleHardReset {
                sequence,
                after: settings.hard_reset_delay,
            });
        }
        effects
    }

    fn signal(&mut self, sequence: SeekSequence, arm: SeekArm, observation: Observation) -> Vec<SeekEffect> {
        let Some(request) = self.request.filter(|_| self.race.is_open(sequence)) else {
            return Vec::new();
        };

        match arm {
            SeekArm::NativeEvent | SeekArm::FrameCallback => {
                self.resolve(request, arm, false, observation.now)
            }
            SeekArm::PositionPoll => {
                let distance = (observation.position_ms - request.target_ms).abs();
                if distance <= self.settings.tolerance_ms {
                    return self.resolve(request, arm, false, observation.now);
                }
                let waited = observation.now.saturating_duration_since(request.started_at);
                if waited >= self.settings.poll_max_wait {
                    return self.resolve(request, arm, true, observation.now);
                }
                Vec::new()
            }
            SeekArm::Nudge => vec![SeekEffect::SetPosition {
                position_ms: request.target_ms + self.settings.nudge_step_ms,
            }],
            SeekArm::HardReset => {
                if !self.settings.capabilities.hard_reset || !observation.network_state.lost_source() {
                    return Vec::new();
                }
                self.pending_reload = Some(request.target_ms);
                vec![SeekEffect::ReloadSource]
            }
        }
    }

    fn resolve(&mut self, request: SeekRequest, arm: SeekArm, best_effort: bool, now: Instant) -> Vec<SeekEffect> {
        if self.race.resolve(request.sequence) != Admission::Admitted {
            return Vec::new();
        }
        let resolution = SeekResolution {
            sequence: request.sequence,
            target_ms: request.target_ms,
            arm,
            best_effort,
            elapsed: now.saturating_duration_since(request.started_at),
        };
        // Arms are torn down before the positioning flag clears.
        let effects = vec![
            SeekEffect::CancelArms {
                sequence: request.sequence,
            },
            SeekEffect::Resolved(resolution),
        ];
        self.positioning = false;
        self.last_resolution = Some(resolution);
        effects
    }

    fn time_update(&mut self, position_ms: f64) -> Vec<SeekEffect> {
        if self.positioning || !self.playing {
            return Vec::new();
        }
        let Some(region) = self.loop_region.as_ref() else {
            return Vec::new();
        };
        match region.boundary_action(position_ms, self.settings.loop_epsilon_ms) {
            None => Vec::new(),
            Some(LoopAction::JumpTo(position_ms)) => vec![SeekEffect::SetPosition { position_ms }],
            Some(LoopAction::StopAt(position_ms)) => {
                self.playing = false;
                vec![SeekEffect::Pause, SeekEffect::SetPosition { position_ms }]
            }
        }
    }
}

/// Pure update function: applies a message to state and returns any effects.
pub fn update(mut state: SeekState, msg: SeekMsg) -> (SeekState, Vec<SeekEffect>) {
    let effects = match msg {
        SeekMsg::Seek { target_ms, now } => state.begin(target_ms, now),
        SeekMsg::Signal {
            sequence,
            arm,
            observation,
        } => state.signal(sequence, arm, observation),
        SeekMsg::SourceReady => match state.pending_reload.take() {
            Some(position_ms) => vec![SeekEffect::SetPosition { position_ms }],
            None => Vec::new(),
        },
        SeekMsg::PlayRequested => {
            state.playing = true;
            state.failed = false;
            vec![SeekEffect::Play]
        }
        SeekMsg::PauseRequested => {
            state.playing = false;
            vec![SeekEffect::Pause]
        }
        SeekMsg::PlaybackChanged { playing } => {
            state.playing = playing;
            Vec::new()
        }
        SeekMsg::MediaError => {
            state.playing = false;
            state.failed = true;
            Vec::new()
        }
        SeekMsg::TimeUpdate { position_ms } => state.time_update(position_ms),
        SeekMsg::SetLoopRegion(region) => {
            state.loop_region = region;
            Vec::new()
        }
    };

    (state, effects)
}

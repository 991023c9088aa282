//! Cutwatch core: pure task-tracking state, range normalization and the
//! seek-completion state machine. No IO, no clocks of its own.
mod filter;
mod ledger;
mod ranges;
mod seek;
mod task;

pub use filter::ScopeFilter;
pub use ledger::{TaskLedger, TaskNotice, TaskOutcome, TaskView};
pub use ranges::{
    complement, normalize, TimeRange, TimeRangeSet, TrimInterval, TrimMode, TrimPayload,
};
pub use seek::{
    update, Admission, LoopMode, LoopRegion, NetworkState, Observation, PlaybackCapabilities,
    SeekArm, SeekEffect, SeekMsg, SeekRace, SeekRequest, SeekResolution, SeekSequence,
    SeekSettings, SeekState, SeekView,
};
pub use task::{
    clamp_progress, TaskKey, TaskKind, TaskProgressMessage, TaskSnapshot, TaskStatus,
};

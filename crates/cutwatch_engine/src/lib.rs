//! Cutwatch engine: push channel, routing, polling backstop and seek driving.
mod api;
mod reconcile;
mod router;
mod seek_driver;
mod transport;
mod types;
mod watch;

pub use api::{ApiSettings, HttpTaskApi, SnapshotSource, TaskEndpoint, TaskStarter};
pub use reconcile::{ReconcileExit, ReconcileSettings, Reconciler, ReconcilerHandle};
pub use router::{new_ledger, Matcher, ScopeRouter, SharedLedger, Subscription, TaskObserver};
pub use seek_driver::{NoopSeekObserver, PlaybackPrimitive, PrimitiveEvent, SeekDriver, SeekObserver};
pub use transport::{
    CloseReason, Frame, Listener, ListenerId, Topic, Transport, TransportEvent, TransportSettings,
};
pub use types::{ApiError, ConnectionState, TransportError, WatchError};
pub use watch::{TaskWatch, TaskWatcher};

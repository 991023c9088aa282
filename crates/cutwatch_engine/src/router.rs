//! Scope-based routing of task frames to subscribed observers.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError, Weak};

use cutwatch_core::{
    ScopeFilter, TaskKey, TaskKind, TaskLedger, TaskNotice, TaskOutcome, TaskProgressMessage,
};
use cutwatch_logging::{watch_debug, watch_trace};

use crate::transport::{Frame, ListenerId, Topic, Transport, TransportEvent};
use crate::types::lock;

/// Ledger shared by every path that can observe the same task. Updates and
/// their callbacks pass through one delivery gate, so an observer sees
/// notices in the order the ledger produced them.
#[derive(Clone)]
pub struct SharedLedger {
    inner: Arc<LedgerCell>,
}

struct LedgerCell {
    ledger: Mutex<TaskLedger>,
    delivery: Mutex<()>,
}

pub fn new_ledger() -> SharedLedger {
    SharedLedger {
        inner: Arc::new(LedgerCell {
            ledger: Mutex::new(TaskLedger::new()),
            delivery: Mutex::new(()),
        }),
    }
}

impl SharedLedger {
    pub fn read<R>(&self, read: impl FnOnce(&TaskLedger) -> R) -> R {
        read(&lock(&self.inner.ledger))
    }

    /// Applies `update` and delivers the resulting notices before any other
    /// update of this ledger can deliver its own. Observers must not feed
    /// the same ledger from inside a callback. Returns whether anything was
    /// delivered, plus the extra value computed by `update`.
    pub(crate) fn apply<R>(
        &self,
        observer: &dyn TaskObserver,
        key: &TaskKey,
        update: impl FnOnce(&mut TaskLedger) -> (Vec<TaskNotice>, R),
    ) -> (bool, R) {
        let _delivery = lock(&self.inner.delivery);
        let (notices, extra) = {
            let mut ledger = lock(&self.inner.ledger);
            update(&mut ledger)
        };
        let delivered = !notices.is_empty();
        deliver(observer, key, notices);
        (delivered, extra)
    }
}

/// Per-task callbacks. Terminal callbacks fire at most once per task.
pub trait TaskObserver: Send + Sync {
    fn on_progress(&self, _key: &TaskKey, _progress: f64, _text: Option<&str>) {}
    fn on_log(&self, _key: &TaskKey, _text: &str) {}
    fn on_completed(&self, _key: &TaskKey, _result_ref: Option<&str>, _text: Option<&str>) {}
    fn on_cancelled(&self, _key: &TaskKey, _text: Option<&str>) {}
    fn on_error(&self, _key: &TaskKey, _text: &str) {}
}

fn deliver(observer: &dyn TaskObserver, key: &TaskKey, notices: Vec<TaskNotice>) {
    for notice in notices {
        match notice {
            TaskNotice::Progress { progress, text } => {
                observer.on_progress(key, progress, text.as_deref())
            }
            TaskNotice::Log { text } => observer.on_log(key, &text),
            TaskNotice::Terminal(TaskOutcome::Completed { result_ref, text }) => {
                observer.on_completed(key, result_ref.as_deref(), text.as_deref())
            }
            TaskNotice::Terminal(TaskOutcome::Failed { text }) => observer.on_error(key, &text),
            TaskNotice::Terminal(TaskOutcome::Cancelled { text }) => {
                observer.on_cancelled(key, text.as_deref())
            }
        }
    }
}

/// Decides whether a message belongs to a subscription.
#[derive(Clone)]
pub enum Matcher {
    Exact(ScopeFilter),
    Predicate(Arc<dyn Fn(&TaskProgressMessage) -> bool + Send + Sync>),
}

impl Matcher {
    pub fn predicate<F>(predicate: F) -> Self
    where
        F: Fn(&TaskProgressMessage) -> bool + Send + Sync + 'static,
    {
        Self::Predicate(Arc::new(predicate))
    }

    fn matches(&self, message: &TaskProgressMessage) -> bool {
        match self {
            Matcher::Exact(filter) => filter.matches(message),
            Matcher::Predicate(predicate) => predicate(message),
        }
    }

    /// Ledger slot a matched message is recorded under. A message without a
    /// task id lands in the subscription's own task slot.
    fn slot<'a>(&'a self, message: &'a TaskProgressMessage) -> &'a str {
        let fallback = match self {
            Matcher::Exact(filter) => filter.task_id.as_deref(),
            Matcher::Predicate(_) => None,
        };
        message.task_id.as_deref().or(fallback).unwrap_or("")
    }
}

impl fmt::Debug for Matcher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Matcher::Exact(filter) => f.debug_tuple("Exact").field(filter).finish(),
            Matcher::Predicate(_) => f.write_str("Predicate(..)"),
        }
    }
}

struct Entry {
    id: u64,
    matcher: Matcher,
    ledger: SharedLedger,
    observer: Arc<dyn TaskObserver>,
}

#[derive(Clone)]
pub struct ScopeRouter {
    inner: Arc<RouterInner>,
}

struct RouterInner {
    entries: Mutex<Vec<Arc<Entry>>>,
    next_id: AtomicU64,
    attachment: Mutex<Option<(Transport, ListenerId)>>,
}

impl Default for ScopeRouter {
    fn default() -> Self {
        Self::new()
    }
}

impl ScopeRouter {
    /// A router that only sees messages handed to [`route`](Self::route).
    pub fn new() -> Self {
        Self {
            inner: Arc::new(RouterInner {
                entries: Mutex::new(Vec::new()),
                next_id: AtomicU64::new(1),
                attachment: Mutex::new(None),
            }),
        }
    }

    /// A router fed by every message frame of `transport`.
    pub fn attach(transport: &Transport) -> Self {
        let router = Self::new();
        let weak = Arc::downgrade(&router.inner);
        let listener = transport.on(Topic::Any, move |event| {
            if let (TransportEvent::Message(frame), Some(inner)) = (event, weak.upgrade()) {
                inner.route_frame(frame);
            }
        });
        *lock(&router.inner.attachment) = Some((transport.clone(), listener));
        router
    }

    /// Subscribes with a private ledger.
    pub fn subscribe(&self, filter: ScopeFilter, observer: Arc<dyn TaskObserver>) -> Subscription {
        self.subscribe_with(Matcher::Exact(filter), new_ledger(), observer)
    }

    /// Subscribes with a caller-provided ledger, typically shared with a
    /// reconciler for the same task.
    pub fn subscribe_with(
        &self,
        matcher: Matcher,
        ledger: SharedLedger,
        observer: Arc<dyn TaskObserver>,
    ) -> Subscription {
        let id = self.inner.next_id.fetch_add(1, Ordering::Relaxed);
        watch_debug!("subscription {} registered: {:?}", id, matcher);
        lock(&self.inner.entries).push(Arc::new(Entry {
            id,
            matcher,
            ledger: ledger.clone(),
            observer,
        }));
        Subscription {
            id,
            router: Arc::downgrade(&self.inner),
            ledger,
        }
    }

    pub fn route(&self, message: &TaskProgressMessage) {
        self.inner.route(message);
    }

    pub fn route_frame(&self, frame: &Frame) {
        self.inner.route_frame(frame);
    }

    pub fn subscription_count(&self) -> usize {
        lock(&self.inner.entries).len()
    }
}

impl RouterInner {
    fn route_frame(&self, frame: &Frame) {
        if TaskKind::from_token(&frame.kind).is_none() {
            return;
        }
        match serde_json::from_value::<TaskProgressMessage>(frame.body.clone()) {
            Ok(message) => self.route(&message),
            Err(err) => watch_debug!("ignoring '{}' frame without task fields: {}", frame.kind, err),
        }
    }

    fn route(&self, message: &TaskProgressMessage) {
        let entries: Vec<Arc<Entry>> = lock(&self.entries)
            .iter()
            .filter(|entry| entry.matcher.matches(message))
            .cloned()
            .collect();

        for entry in entries {
            let slot = entry.matcher.slot(message);
            let key = TaskKey {
                scope: message.scope.clone(),
                project_id: message.project_id.clone(),
                task_id: (!slot.is_empty()).then(|| slot.to_string()),
            };
            let (delivered, ()) = entry.ledger.apply(entry.observer.as_ref(), &key, |ledger| {
                (ledger.apply_message(slot, message), ())
            });
            if !delivered {
                watch_trace!(
                    "subscription {} discarded {:?} for settled task '{}'",
                    entry.id,
                    message.kind,
                    slot
                );
            }
        }
    }
}

impl Drop for RouterInner {
    fn drop(&mut self) {
        let attachment = self
            .attachment
            .get_mut()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some((transport, listener)) = attachment {
            transport.off(listener);
        }
    }
}

/// Registration handle. Dropping it unregisters the subscription; terminal
/// dispatch never does so on its own.
#[must_use = "dropping a Subscription unregisters it immediately"]
pub struct Subscription {
    id: u64,
    router: Weak<RouterInner>,
    ledger: SharedLedger,
}

impl Subscription {
    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn ledger(&self) -> SharedLedger {
        self.ledger.clone()
    }

    pub fn release(self) {}
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if let Some(inner) = self.router.upgrade() {
            lock(&inner.entries).retain(|entry| entry.id != self.id);
            watch_debug!("subscription {} released", self.id);
        }
    }
}

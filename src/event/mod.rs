//! An asynchronous publish/subscribe event bus dispatched through the
//! [`Engine`](crate::engine::Engine): [`Observable`]s accept [`Event`]
//! submissions, rewrite their id through a tap graph, and fan delivery out
//! to registered [`Observer`]s as per-observer [`Operation`](crate::op::Operation)s.
//! [`EventDaemon`] layers fixed-interval event generation on top of an
//! `Observable`.
//!
//! Grounded on `cpp/event/Observable.cpp` and `cpp/event/EventDaemon.cpp`
//! (kept in `original_source/`; `spec.md` §4.4 summarizes both).

mod daemon;
mod observable;

pub use daemon::EventDaemon;
pub use observable::Observable;

use serde_json::Value;

/// Identifies an event's type. Also used as a tap-graph node id.
pub type EventId = u64;

/// An untyped event dispatched through an [`Observable`].
///
/// Mirrors the reserved fields `spec.md` §3 calls out for the original's
/// schemaless event tree: `id` selects which taps/observers see it,
/// `sequence_id` is filled in by the `Observable` that schedules it,
/// `serial` controls whether the drain loop waits for this event's
/// fan-out before moving to the next queued event (`parallel` is the
/// complement of `serial`, per `SPEC_FULL.md` §3's resolution of the "are
/// these independent flags" open question), and `details` carries the
/// user payload.
#[derive(Debug, Clone, PartialEq)]
pub struct Event {
    pub id: EventId,
    pub sequence_id: u64,
    pub serial: bool,
    pub details: Value,
}

impl Event {
    /// Creates a new event of type `id` with no details yet and
    /// `sequence_id` unset (it is assigned when the event is scheduled).
    pub fn new(id: EventId) -> Self {
        Self { id, sequence_id: 0, serial: false, details: Value::Null }
    }

    /// Marks this event `serial`: the `Observable` that dispatches it will
    /// wait for every observer to finish before dispatching a later event.
    pub fn serial(mut self) -> Self {
        self.serial = true;
        self
    }

    /// Attaches a user payload.
    pub fn with_details(mut self, details: Value) -> Self {
        self.details = details;
        self
    }
}

/// Receives [`Event`]s from an [`Observable`] it has registered with.
///
/// Observers are held as `Arc<dyn Observer>` by the `Observable` they
/// register with — a non-owning reference in spirit (the `Observable`
/// never keeps an observer alive past [`Observable::unregister_observer`]
/// being called, and is not the application's only owner of it), promoted
/// to shared ownership because that is the idiomatic way to hand a
/// `Send + Sync` callback across the worker threads delivery runs on; see
/// `DESIGN.md` for this resolution of the design's "Observer lifetime"
/// note.
pub trait Observer: Send + Sync {
    fn event_occurred(&self, event: &Event);
}

impl<F: Fn(&Event) + Send + Sync> Observer for F {
    fn event_occurred(&self, event: &Event) {
        self(event)
    }
}

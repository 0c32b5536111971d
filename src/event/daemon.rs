//! [`EventDaemon`]: schedules a template event into an [`Observable`] at a
//! fixed interval, optionally a bounded number of times.
//!
//! Grounded on `cpp/event/EventDaemon.cpp`. Reproduced with its exact
//! reference-counting rules for [`add`](EventDaemon::add): adding the same
//! `(event, interval)` pair again coalesces into the existing entry by
//! summing `refs` and extending `count` (an infinite count stays
//! infinite) instead of creating a duplicate entry, and `refs == 0` on
//! [`remove`](EventDaemon::remove)/[`remove_by_tag`](EventDaemon::remove_by_tag)
//! means "remove unconditionally." The wait loop itself is re-expressed in
//! this crate's own idiom (`ExclusiveLock::wait_timeout` driven off
//! `Instant` deltas) rather than translated line-for-line from the
//! original's manual elapsed-time bookkeeping.

use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use super::{Event, Observable};
use crate::engine::Engine;
use crate::op::Operation;
use crate::sync::ExclusiveLock;

struct PeriodicEntry {
    event: Event,
    interval: Duration,
    remaining: Duration,
    /// `-1` repeats forever; otherwise the number of firings left.
    count: i64,
    refs: u32,
}

/// A periodic event generator that schedules events into a target
/// [`Observable`] on fixed intervals.
pub struct EventDaemon {
    engine: Arc<Engine>,
    target: Arc<Observable>,
    entries: ExclusiveLock<Vec<PeriodicEntry>>,
    running_op: Mutex<Option<Operation>>,
}

impl EventDaemon {
    /// Creates a daemon that will schedule its events into `target`,
    /// running its own loop as an `Operation` on `engine`.
    pub fn new(engine: Arc<Engine>, target: Arc<Observable>) -> Arc<Self> {
        Arc::new(Self {
            engine,
            target,
            entries: ExclusiveLock::new(Vec::new()),
            running_op: Mutex::new(None),
        })
    }

    /// Adds a periodic entry that schedules a clone of `event` every
    /// `interval`, `count` times (`-1` for forever), with `refs`
    /// references. If an entry with the same `interval` and an equal
    /// `event` already exists and `refs > 0`, the two are coalesced:
    /// `refs` are summed and `count` is extended rather than a new entry
    /// being created. `refs == 0` always creates a new, independent entry
    /// with one implicit reference. Does nothing if `count` is `0` or less
    /// than `-1`.
    pub fn add(&self, event: Event, interval: Duration, count: i64, refs: u32) {
        if !(count == -1 || count > 0) {
            return;
        }
        let mut entries = self.entries.lock();
        if refs > 0 {
            for entry in entries.iter_mut() {
                if entry.interval == interval && entry.event == event {
                    entry.refs += refs;
                    if entry.count != -1 {
                        entry.count = if count == -1 { -1 } else { entry.count + count };
                    }
                    entries.notify_all();
                    return;
                }
            }
        }
        entries.push(PeriodicEntry {
            event,
            interval,
            remaining: interval,
            count,
            refs: if refs == 0 { 1 } else { refs },
        });
        entries.notify_all();
    }

    /// Decrements `refs` references from every entry whose template event
    /// equals `event`, dropping it once its reference count reaches zero.
    /// `refs == 0` removes unconditionally.
    pub fn remove(&self, event: &Event, refs: u32) {
        let mut entries = self.entries.lock();
        entries.retain_mut(|entry| Self::decrement(&entry.event == event, entry, refs));
        entries.notify_all();
    }

    /// Like [`remove`](Self::remove), but matches entries whose template
    /// event's `details.tag` field equals `tag` instead of matching the
    /// whole event.
    pub fn remove_by_tag(&self, tag: &str, refs: u32) {
        let mut entries = self.entries.lock();
        entries.retain_mut(|entry| {
            let matches = entry.event.details.get("tag").and_then(|v| v.as_str()) == Some(tag);
            Self::decrement(matches, entry, refs)
        });
        entries.notify_all();
    }

    /// Returns `true` if `entry` should be kept.
    fn decrement(matches: bool, entry: &mut PeriodicEntry, refs: u32) -> bool {
        if !matches {
            return true;
        }
        if refs == 0 {
            return false;
        }
        entry.refs = entry.refs.saturating_sub(refs);
        entry.refs > 0
    }

    /// Starts the daemon loop if it isn't already running.
    pub fn start(self: &Arc<Self>) {
        let mut slot = self.running_op.lock().unwrap();
        if slot.is_some() {
            return;
        }
        let daemon = Arc::clone(self);
        let op = Operation::new(move || daemon.daemon_loop()).build();
        self.engine.queue(op.clone());
        *slot = Some(op);
    }

    /// Interrupts and joins the daemon loop, if it's running.
    pub fn stop(&self) {
        let op = self.running_op.lock().unwrap().take();
        if let Some(op) = op {
            op.interrupt();
            self.entries.interrupt();
            op.join().ok();
            self.entries.clear_interrupt();
        }
    }

    fn current_op_interrupted() -> bool {
        Engine::current_operation().map(|op| op.is_interrupted()).unwrap_or(false)
    }

    fn daemon_loop(&self) {
        let mut last_tick = Instant::now();
        loop {
            if Self::current_op_interrupted() {
                return;
            }
            let mut guard = self.entries.lock();
            if guard.is_empty() {
                guard = match guard.wait() {
                    Ok(g) => g,
                    Err(_) => return,
                };
                drop(guard);
                last_tick = Instant::now();
                continue;
            }

            let elapsed = last_tick.elapsed();
            last_tick = Instant::now();
            let mut due = Vec::new();
            for entry in guard.iter_mut() {
                if entry.remaining <= elapsed {
                    due.push(entry.event.clone());
                    entry.remaining = entry.interval;
                    if entry.count > 0 {
                        entry.count -= 1;
                    }
                } else {
                    entry.remaining -= elapsed;
                }
            }
            guard.retain(|entry| entry.count != 0);
            let next_wait = guard.iter().map(|entry| entry.remaining).min();
            drop(guard);

            for event in due {
                self.target.schedule(event);
            }

            if let Some(wait_time) = next_wait {
                let guard = self.entries.lock();
                match guard.wait_timeout(wait_time) {
                    Ok(_) => {}
                    Err(_) => return,
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn periodic_entry_repeats_exact_count_then_removes_itself() {
        let engine = Engine::with_pool_capacity(Some(4));
        let observable = Observable::new(Arc::clone(&engine));
        let daemon = EventDaemon::new(Arc::clone(&engine), Arc::clone(&observable));

        let fired = Arc::new(AtomicUsize::new(0));
        let fired2 = Arc::clone(&fired);
        let observer: Arc<dyn crate::event::Observer> =
            Arc::new(move |_e: &Event| { fired2.fetch_add(1, Ordering::SeqCst); });
        observable.add_tap(42, 42);
        observable.register_observer(42, observer);
        observable.start();

        daemon.add(Event::new(42), Duration::from_millis(50), 3, 1);
        daemon.start();

        for _ in 0..100 {
            if fired.load(Ordering::SeqCst) >= 3 {
                break;
            }
            std::thread::sleep(Duration::from_millis(20));
        }
        // Give the daemon one more tick's worth of time to prove it stopped
        // firing once the count was exhausted.
        std::thread::sleep(Duration::from_millis(80));
        assert_eq!(fired.load(Ordering::SeqCst), 3);
        assert!(daemon.entries.lock().is_empty());

        daemon.stop();
        observable.stop();
        engine.shutdown();
    }

    #[test]
    fn add_with_matching_refs_coalesces_instead_of_duplicating() {
        let engine = Engine::with_pool_capacity(Some(2));
        let observable = Observable::new(Arc::clone(&engine));
        let daemon = EventDaemon::new(Arc::clone(&engine), Arc::clone(&observable));

        daemon.add(Event::new(7), Duration::from_secs(1), 5, 1);
        daemon.add(Event::new(7), Duration::from_secs(1), 5, 2);

        let entries = daemon.entries.lock();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].refs, 3);
        assert_eq!(entries[0].count, 10);
        drop(entries);
        engine.shutdown();
    }

    #[test]
    fn remove_with_zero_refs_drops_entry_unconditionally() {
        let engine = Engine::with_pool_capacity(Some(2));
        let observable = Observable::new(Arc::clone(&engine));
        let daemon = EventDaemon::new(Arc::clone(&engine), Arc::clone(&observable));

        daemon.add(Event::new(9), Duration::from_secs(1), -1, 5);
        daemon.remove(&Event::new(9), 0);
        assert!(daemon.entries.lock().is_empty());
        engine.shutdown();
    }
}

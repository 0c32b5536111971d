//! A fiber with a double-buffered inbox that sleeps whenever it has
//! nothing to process.
//!
//! Grounded on `cpp/fiber/MessagableFiber.cpp`: registration with the
//! message center happens on entry and unregistration on exit,
//! automatically, rather than being left to the client.

use std::sync::Arc;

use serde_json::Value;

use super::message_center::FiberMailbox;
use super::{FiberId, FiberMessageCenter, FiberScheduler};

/// What a message handler wants to happen next.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FiberAction {
    /// Keep running: wait for more messages.
    Continue,
    /// Stop the fiber; it unregisters and exits.
    Exit,
}

/// Passed to a messagable fiber's handler for each message it processes.
pub struct MessagableFiberHandle {
    id: FiberId,
    center: Arc<FiberMessageCenter>,
}

impl MessagableFiberHandle {
    pub fn id(&self) -> FiberId {
        self.id
    }

    /// Sends `msg` to another fiber through the same message center this
    /// fiber is registered with.
    pub fn send(&self, to: FiberId, msg: Value) -> bool {
        self.center.send(to, msg)
    }
}

struct UnregisterGuard {
    center: Arc<FiberMessageCenter>,
    id: FiberId,
}

impl Drop for UnregisterGuard {
    fn drop(&mut self) {
        self.center.unregister(self.id);
    }
}

/// Spawns a fiber on `scheduler` that registers itself with `center`,
/// processes messages with `on_message`, and sleeps whenever its inbox is
/// empty.
///
/// `on_message` is called once per queued message, in the order it was
/// enqueued; returning [`FiberAction::Exit`] from it stops the fiber (its
/// mailbox is unregistered immediately, whether it returns `Exit` or the
/// coroutine body is otherwise torn down by a panic).
pub fn spawn(
    scheduler: &Arc<FiberScheduler>,
    center: Arc<FiberMessageCenter>,
    mut on_message: impl FnMut(&MessagableFiberHandle, Value) -> FiberAction + Send + 'static,
) -> Option<FiberId> {
    let scheduler_for_wake = Arc::clone(scheduler);

    scheduler.add(move |id, ctl| {
        let mailbox = Arc::new(FiberMailbox::new());
        center.register(id, Arc::clone(&mailbox), move || {
            scheduler_for_wake.wakeup(id);
        });
        let _unregister = UnregisterGuard { center: Arc::clone(&center), id };
        let handle = MessagableFiberHandle { id, center: Arc::clone(&center) };

        loop {
            let pending = mailbox.inbox.drain();
            if pending.is_empty() {
                let mailbox_for_check = Arc::clone(&mailbox);
                ctl.yield_checking_sleep(move || mailbox_for_check.inbox.is_empty());
                continue;
            }
            for msg in pending {
                if on_message(&handle, msg) == FiberAction::Exit {
                    return;
                }
            }
        }
    })
}

use std::time::Duration;

use parking_lot::{Condvar, Mutex};

/// Binary, coalescing ready flag.
///
/// Setting an already-set signal is a no-op, so any number of publishes between two checks
/// collapse into a single wake-up. Waiters always block with a timeout so they can observe a
/// stop request.
#[derive(Debug, Default)]
pub struct ReadySignal {
    flag: Mutex<bool>,
    cond: Condvar,
}

impl ReadySignal {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&self) {
        let mut flag = self.flag.lock();
        *flag = true;
        self.cond.notify_all();
    }

    pub fn clear(&self) {
        *self.flag.lock() = false;
    }

    pub fn is_set(&self) -> bool {
        *self.flag.lock()
    }

    /// Blocks until the signal is set or `timeout` elapses. Returns whether it is set.
    pub fn wait_timeout(&self, timeout: Duration) -> bool {
        let mut flag = self.flag.lock();
        self.cond.wait_while_for(&mut flag, |set| !*set, timeout);
        *flag
    }

    /// Like [`ReadySignal::wait_timeout`], but clears the signal when it was set, in the same
    /// critical section. A set that lands after this returns is kept for the next wait.
    pub fn take_timeout(&self, timeout: Duration) -> bool {
        let mut flag = self.flag.lock();
        self.cond.wait_while_for(&mut flag, |set| !*set, timeout);
        std::mem::replace(&mut *flag, false)
    }
}

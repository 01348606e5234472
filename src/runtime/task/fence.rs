use parking_lot::{Condvar, Mutex};

/// Outcome carried by a [`Fence`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FenceState {
    Pending,
    Ready,
    Failed,
}

impl FenceState {
    pub fn is_signalled(self) -> bool {
        self != Self::Pending
    }
}

/// One-shot completion signal.
///
/// Moves from `Pending` to `Ready` or `Failed` exactly once; later signals are
/// ignored, so waiters never observe a state going backwards.
#[derive(Debug)]
pub struct Fence {
    state: Mutex<FenceState>,
    condvar: Condvar,
}

impl Fence {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(FenceState::Pending),
            condvar: Condvar::new(),
        }
    }

    /// A fence that starts out signalled with `outcome`.
    pub fn signalled(outcome: FenceState) -> Self {
        let fence = Self::new();
        fence.signal(outcome);
        fence
    }

    /// Resolve the fence. Returns false if it was already resolved.
    pub fn signal(&self, outcome: FenceState) -> bool {
        debug_assert!(outcome.is_signalled(), "cannot signal a fence as pending");
        let mut state = self.state.lock();
        if state.is_signalled() {
            return false;
        }
        *state = outcome;
        self.condvar.notify_all();
        true
    }

    pub fn state(&self) -> FenceState {
        *self.state.lock()
    }

    pub fn is_signalled(&self) -> bool {
        self.state().is_signalled()
    }

    /// Block until the fence resolves and return the outcome.
    pub fn wait(&self) -> FenceState {
        let mut state = self.state.lock();
        while !state.is_signalled() {
            self.condvar.wait(&mut state);
        }
        *state
    }
}

impl Default for Fence {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn first_signal_wins() {
        let fence = Fence::new();
        assert!(fence.signal(FenceState::Failed));
        assert!(!fence.signal(FenceState::Ready));
        assert_eq!(fence.state(), FenceState::Failed);
    }

    #[test]
    fn wait_wakes_on_signal_from_other_thread() {
        let fence = Arc::new(Fence::new());
        let signaller = {
            let fence = Arc::clone(&fence);
            thread::spawn(move || {
                fence.signal(FenceState::Ready);
            })
        };
        assert_eq!(fence.wait(), FenceState::Ready);
        signaller.join().unwrap();
    }

    #[test]
    fn presignalled_fence_does_not_block() {
        let fence = Fence::signalled(FenceState::Ready);
        assert!(fence.is_signalled());
        assert_eq!(fence.wait(), FenceState::Ready);
    }
}

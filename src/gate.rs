use std::sync::{Condvar, Mutex};

struct GateState {
    waiting: usize,
    open: bool,
}

/// Barrier that releases N benchmark or test threads at once. Workers
/// call `wait`, the coordinator calls `wait_for_waiting_threads` to
/// confirm everyone is parked, then `open` releases them together.
pub struct StartingGate {
    total: usize,
    state: Mutex<GateState>,
    cv: Condvar,
}

impl StartingGate {
    pub fn new(total: usize) -> Self {
        Self {
            total,
            state: Mutex::new(GateState {
                waiting: 0,
                open: false,
            }),
            cv: Condvar::new(),
        }
    }

    /// Blocks until `open` is called. After the gate has opened,
    /// returns immediately.
    pub fn wait(&self) {
        let mut state = self.state.lock().unwrap();
        state.waiting += 1;
        self.cv.notify_all();
        while !state.open {
            state = self.cv.wait(state).unwrap();
        }
    }

    /// Blocks until all N workers have entered `wait`.
    pub fn wait_for_waiting_threads(&self) {
        let mut state = self.state.lock().unwrap();
        while state.waiting < self.total {
            state = self.cv.wait(state).unwrap();
        }
    }

    /// Releases every waiter.
    pub fn open(&self) {
        let mut state = self.state.lock().unwrap();
        state.open = true;
        self.cv.notify_all();
    }
}

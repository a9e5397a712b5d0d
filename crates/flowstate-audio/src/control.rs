//! Run/Pause/Stop signal shared between the controller and the producer.

use std::sync::Arc;
use std::time::Duration;

use parking_lot::{Condvar, Mutex};

use crate::buffer::BlockQueue;

/// What the producer has been told to do.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    Run,
    Pause,
    Stop,
}

#[derive(Debug)]
struct ControlState {
    command: Command,
    pending_seek: Option<f64>,
    /// The producer reached the end of its track and left the loop.
    finished: bool,
}

/// Producer's next action, read at each loop iteration boundary.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Step {
    /// Terminate the loop.
    Stop,
    /// Paused with a seek requested; reposition the decoder and wait again.
    SeekOnly(f64),
    /// Produce one block tagged with `epoch`, seeking first if requested.
    Run { seek: Option<f64>, epoch: u64 },
}

/// Tri-state control signal with a condition variable for the paused wait.
#[derive(Debug)]
pub struct ControlSignal {
    state: Mutex<ControlState>,
    changed: Condvar,
}

impl ControlSignal {
    pub fn new(command: Command) -> Self {
        Self {
            state: Mutex::new(ControlState {
                command,
                pending_seek: None,
                finished: false,
            }),
            changed: Condvar::new(),
        }
    }

    pub fn command(&self) -> Command {
        self.state.lock().command
    }

    pub fn set(&self, command: Command) {
        let mut state = self.state.lock();
        if state.command != command {
            state.command = command;
            self.changed.notify_all();
        }
    }

    pub fn has_pending_seek(&self) -> bool {
        self.state.lock().pending_seek.is_some()
    }

    /// Record a seek and flush the queue in one critical section.
    ///
    /// A producer reading its epoch afterwards is guaranteed to see the seek,
    /// and anything it produced before is tagged with the old epoch. Returns
    /// `None` without touching the queue once the producer has finished; the
    /// caller then owns the repositioning.
    pub fn request_seek(&self, position_secs: f64, queue: &BlockQueue) -> Option<u64> {
        let mut state = self.state.lock();
        if state.finished {
            return None;
        }
        state.pending_seek = Some(position_secs);
        let epoch = queue.clear();
        self.changed.notify_all();
        Some(epoch)
    }

    /// Called by the producer at end of stream. Returns `false` if a seek
    /// arrived first, in which case the producer keeps running.
    pub fn finish(&self) -> bool {
        let mut state = self.state.lock();
        if state.pending_seek.is_some() {
            return false;
        }
        state.finished = true;
        true
    }

    pub fn is_finished(&self) -> bool {
        self.state.lock().finished
    }

    /// Block until there is something to do.
    pub fn next_step(&self, queue: &BlockQueue) -> Step {
        let mut state = self.state.lock();
        loop {
            match state.command {
                Command::Stop => return Step::Stop,
                Command::Run => {
                    return Step::Run {
                        seek: state.pending_seek.take(),
                        epoch: queue.epoch(),
                    }
                }
                Command::Pause => {
                    if let Some(position) = state.pending_seek.take() {
                        return Step::SeekOnly(position);
                    }
                    self.changed.wait(&mut state);
                }
            }
        }
    }

    /// Wait while paused, for at most `timeout`. Returns the current command.
    pub fn wait_unpaused(&self, timeout: Duration) -> Command {
        let mut state = self.state.lock();
        if state.command == Command::Pause && state.pending_seek.is_none() {
            self.changed.wait_for(&mut state, timeout);
        }
        state.command
    }
}

impl Default for ControlSignal {
    fn default() -> Self {
        Self::new(Command::Run)
    }
}

pub type SharedControl = Arc<ControlSignal>;

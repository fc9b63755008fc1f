//! Reporting workflow events to a front-end.

use {
    crate::workflow::state::WorkflowState,
    std::sync::mpsc::{self, Receiver, Sender},
};

/// Receiver of workflow events.
///
/// Called from the worker thread. Implementations must not block.
pub trait Observer: Send {
    /// Progress in percent, non-decreasing within a run.
    fn progress(&self, value: u8);

    /// Human-readable status line.
    fn status(&self, message: &str);

    /// The workflow entered `state`.
    fn state_changed(&self, state: &WorkflowState) {
        let _ = state;
    }

    /// The run is over. Called exactly once.
    fn completed(&self);
}

/// Workflow event as delivered by [`ChannelObserver`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Event {
    /// See [`Observer::progress`].
    Progress(u8),
    /// See [`Observer::status`].
    Status(String),
    /// See [`Observer::state_changed`].
    State(WorkflowState),
    /// See [`Observer::completed`].
    Completed,
}

/// Forwards events over an `mpsc` channel.
///
/// Events sent after the receiver is gone are dropped.
#[derive(Debug, Clone)]
pub struct ChannelObserver {
    tx: Sender<Event>,
}

impl ChannelObserver {
    /// Create an observer and the receiving end of its channel.
    pub fn new() -> (Self, Receiver<Event>) {
        let (tx, rx) = mpsc::channel();
        (Self { tx }, rx)
    }

    fn send(&self, event: Event) {
        let _ = self.tx.send(event);
    }
}

impl Observer for ChannelObserver {
    fn progress(&self, value: u8) {
        self.send(Event::Progress(value));
    }

    fn status(&self, message: &str) {
        self.send(Event::Status(message.to_string()));
    }

    fn state_changed(&self, state: &WorkflowState) {
        self.send(Event::State(state.clone()));
    }

    fn completed(&self) {
        self.send(Event::Completed);
    }
}

//! Workflow state and progress bookkeeping.

use {crate::error::Error, std::fmt};

/// Phase of a fetch run.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
pub enum WorkflowState {
    /// Not started.
    #[default]
    Idle,
    /// Waiting for an MSP device to show up.
    AwaitingDevice,
    /// Talking to the board before it drops into mass-storage mode.
    RebootingToStorage,
    /// Waiting for the flash volume to be mounted.
    AwaitingMount,
    /// Copying log files to the output directory.
    CopyingFiles,
    /// Waiting for the board to come back as an MSP device.
    AwaitingReconnect,
    /// Issuing the erase command.
    Erasing,
    /// Polling until the erase has finished.
    AwaitingEraseReady,
    /// Finished successfully.
    Succeeded,
    /// Aborted by an error.
    Failed(String),
    /// Stopped on request.
    Cancelled,
}

impl WorkflowState {
    /// Whether no further transitions can happen.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Succeeded | Self::Failed(_) | Self::Cancelled)
    }
}

impl fmt::Display for WorkflowState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Idle => f.write_str("idle"),
            Self::AwaitingDevice => f.write_str("awaiting device"),
            Self::RebootingToStorage => f.write_str("rebooting to mass storage"),
            Self::AwaitingMount => f.write_str("awaiting mount"),
            Self::CopyingFiles => f.write_str("copying files"),
            Self::AwaitingReconnect => f.write_str("awaiting reconnect"),
            Self::Erasing => f.write_str("erasing"),
            Self::AwaitingEraseReady => f.write_str("awaiting erase ready"),
            Self::Succeeded => f.write_str("succeeded"),
            Self::Failed(reason) => write!(f, "failed: {reason}"),
            Self::Cancelled => f.write_str("cancelled"),
        }
    }
}

/// How a run ended.
#[derive(Debug)]
pub enum Outcome {
    /// Logs copied and flash erased.
    Succeeded,
    /// The run stopped on an error.
    Failed(Error),
    /// The run was cancelled.
    Cancelled,
}

impl Outcome {
    /// Terminal state matching this outcome.
    pub fn state(&self) -> WorkflowState {
        match self {
            Self::Succeeded => WorkflowState::Succeeded,
            Self::Failed(e) => WorkflowState::Failed(e.to_string()),
            Self::Cancelled => WorkflowState::Cancelled,
        }
    }
}

/// Upper bound of progress values.
pub const PROGRESS_MAX: u8 = 100;

/// Non-decreasing progress value, clamped to [`PROGRESS_MAX`].
#[derive(Debug, Clone, Copy, Default)]
pub struct Progress {
    last: Option<u8>,
}

impl Progress {
    /// Move to `to`. Returns the value to report, or `None` when nothing
    /// changed. Values below the current one are ignored.
    pub fn advance(&mut self, to: u32) -> Option<u8> {
        let to = u8::try_from(to.min(u32::from(PROGRESS_MAX))).unwrap_or(PROGRESS_MAX);
        match self.last {
            Some(last) if to <= last => None,
            _ => {
                self.last = Some(to);
                Some(to)
            },
        }
    }
}

/// Progress after copying `done` of `total` files: `20 + floor(60 / total) * done`.
pub fn copy_progress(done: usize, total: usize) -> u32 {
    if total == 0 {
        return 20;
    }
    let step = 60 / total;
    u32::try_from(20 + step * done).unwrap_or(u32::MAX)
}

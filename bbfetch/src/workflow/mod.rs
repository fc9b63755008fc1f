//! The fetch workflow: find the board, reboot it into mass-storage mode, copy
//! its logs, wait for it to come back and erase the flash.
//!
//! ```text
//! Idle -> AwaitingDevice -> RebootingToStorage            progress 0..20
//!      -> AwaitingMount -> CopyingFiles                   progress 20..80
//!      -> AwaitingReconnect -> Erasing -> AwaitingEraseReady
//!      -> Succeeded                                       progress 100
//! ```
//!
//! Every wait is a sleep-poll that checks the [`CancelToken`] before each
//! poll and before every blocking command, so cancellation takes effect
//! within one poll interval. A cancelled run ends in
//! [`WorkflowState::Cancelled`] and never reports a failure.
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use bbfetch::{
//!     ChannelObserver, Event, Inventory, NativeOpener, NativePlatform, Workflow,
//! };
//!
//! let inventory = Inventory::new(Arc::new(NativePlatform), Arc::new(NativeOpener));
//! let (observer, events) = ChannelObserver::new();
//! let handle = Workflow::new(inventory, observer).spawn().unwrap();
//!
//! for event in events {
//!     if let Event::Status(status) = event {
//!         println!("{status}");
//!     }
//! }
//! let outcome = handle.join();
//! ```

pub mod observer;
pub mod state;

use {
    crate::{
        board::{Board, describe_usage},
        cancel::{CancelToken, Cancelled},
        connection::Connection,
        device::{DeviceDescriptor, Inventory},
        error::Error,
    },
    log::{debug, error, info, warn},
    std::{
        fs, io,
        path::{Path, PathBuf},
        sync::{Arc, PoisonError, RwLock},
        thread::{self, JoinHandle},
        time::{Duration, Instant},
    },
};

pub use {
    observer::{ChannelObserver, Event, Observer},
    state::{Outcome, Progress, WorkflowState, copy_progress},
};

/// Status while waiting for the board.
pub const STATUS_LOOKING: &str = "Looking for device to reboot";
/// Status while copying logs.
pub const STATUS_COPYING: &str = "Copying blackbox files";
/// Status while waiting for the board to come back.
pub const STATUS_RECONNECT: &str = "Please reconnect device usb";
/// Status while erasing.
pub const STATUS_ERASING: &str = "Erasing blackbox";
/// Status after a successful run.
pub const STATUS_DONE: &str = "Job done, happy debugging!";

/// Poll intervals and delays.
#[derive(Debug, Clone)]
pub struct WorkflowConfig {
    /// Interval between device discovery attempts.
    pub device_poll: Duration,
    /// Interval between scans for mounted log files.
    pub mount_poll: Duration,
    /// Interval between erase-ready queries.
    pub erase_poll: Duration,
    /// Pause after the reboot command so the board can leave the bus.
    pub reboot_settle: Duration,
    /// Give up waiting for the device or the volume after this long.
    /// `None` waits forever.
    pub wait_timeout: Option<Duration>,
}

impl Default for WorkflowConfig {
    fn default() -> Self {
        Self {
            device_poll: Duration::from_millis(100),
            mount_poll: Duration::from_millis(100),
            erase_poll: Duration::from_secs(1),
            reboot_settle: Duration::from_secs(2),
            wait_timeout: None,
        }
    }
}

/// Output directory shared with the front-end.
///
/// May be changed while a run is in progress; it is read again before each
/// file is copied.
#[derive(Debug, Clone, Default)]
pub struct OutputDir(Arc<RwLock<PathBuf>>);

impl OutputDir {
    /// Create a shared output directory.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self(Arc::new(RwLock::new(path.into())))
    }

    /// Current directory.
    pub fn get(&self) -> PathBuf {
        self.0.read().unwrap_or_else(PoisonError::into_inner).clone()
    }

    /// Change the directory.
    pub fn set(&self, path: impl Into<PathBuf>) {
        *self.0.write().unwrap_or_else(PoisonError::into_inner) = path.into();
    }
}

/// Why a phase stopped early.
#[derive(Debug, thiserror::Error)]
pub enum Halt {
    /// The cancellation token was set.
    #[error("cancelled")]
    Cancelled,
    /// An operation failed.
    #[error(transparent)]
    Failed(#[from] Error),
}

impl From<Cancelled> for Halt {
    fn from(_: Cancelled) -> Self {
        Self::Cancelled
    }
}

impl From<io::Error> for Halt {
    fn from(e: io::Error) -> Self {
        Self::Failed(e.into())
    }
}

type PhaseResult<T> = std::result::Result<T, Halt>;

/// A single fetch run.
pub struct Workflow {
    inventory: Inventory,
    observer: Box<dyn Observer>,
    config: WorkflowConfig,
    output: OutputDir,
    cancel: CancelToken,
    state: WorkflowState,
    progress: Progress,
}

impl Workflow {
    /// Create a workflow writing into the current directory.
    pub fn new(inventory: Inventory, observer: impl Observer + 'static) -> Self {
        Self {
            inventory,
            observer: Box::new(observer),
            config: WorkflowConfig::default(),
            output: OutputDir::new("."),
            cancel: CancelToken::new(),
            state: WorkflowState::Idle,
            progress: Progress::default(),
        }
    }

    /// Replace the timing configuration.
    #[must_use]
    pub fn with_config(mut self, config: WorkflowConfig) -> Self {
        self.config = config;
        self
    }

    /// Use a shared output directory.
    #[must_use]
    pub fn with_output_dir(mut self, output: OutputDir) -> Self {
        self.output = output;
        self
    }

    /// Use an existing cancellation token.
    #[must_use]
    pub fn with_cancel_token(mut self, cancel: CancelToken) -> Self {
        self.cancel = cancel;
        self
    }

    /// Token that cancels this run.
    pub fn cancel_token(&self) -> CancelToken {
        self.cancel.clone()
    }

    /// Shared output directory.
    pub fn output_dir(&self) -> OutputDir {
        self.output.clone()
    }

    /// Current state.
    pub fn state(&self) -> &WorkflowState {
        &self.state
    }

    /// Run to completion on the calling thread.
    pub fn run(&mut self) -> Outcome {
        let outcome = match self.execute() {
            Ok(()) => Outcome::Succeeded,
            Err(Halt::Cancelled) => {
                debug!("Stopping background run");
                Outcome::Cancelled
            },
            // A blocking call cut short by the cancel request
            Err(Halt::Failed(e)) if self.cancel.is_cancelled() => {
                debug!("Stopping background run after: {e}");
                Outcome::Cancelled
            },
            Err(Halt::Failed(e)) => {
                error!("Background run failed: {e}");
                self.observer.status(&format!("Failed: {e}"));
                Outcome::Failed(e)
            },
        };
        self.set_state(outcome.state());
        self.observer.completed();
        outcome
    }

    /// Run on a dedicated worker thread.
    pub fn spawn(mut self) -> io::Result<WorkflowHandle> {
        let cancel = self.cancel_token();
        let output = self.output_dir();
        let join = thread::Builder::new()
            .name("bbfetch-workflow".into())
            .spawn(move || self.run())?;
        Ok(WorkflowHandle {
            cancel,
            output,
            join,
        })
    }

    fn execute(&mut self) -> PhaseResult<()> {
        self.report(0);
        self.status(STATUS_LOOKING);
        self.reboot_into_storage()?;
        self.report(20);

        self.status(STATUS_COPYING);
        self.copy_log_files()?;
        self.report(80);

        self.status(STATUS_RECONNECT);
        self.erase_log_flash()?;

        self.status(STATUS_DONE);
        self.report(100);
        Ok(())
    }

    fn reboot_into_storage(&mut self) -> PhaseResult<()> {
        self.set_state(WorkflowState::AwaitingDevice);
        let device = self.wait_for_device()?;
        self.set_state(WorkflowState::RebootingToStorage);

        let conn = self.connect(&device);
        conn.scoped(|conn| -> PhaseResult<()> {
            info!("Connected to {}", device.name);
            let board = Board::new(conn);

            self.checkpoint()?;
            match board.info() {
                Ok(info) => info!("Board: {info}"),
                Err(e) => warn!("Could not identify board on {}: {e}", device.name),
            }

            self.checkpoint()?;
            let usage = describe_usage(&board.dataflash_summary()?);
            info!("{usage}");
            self.status(&usage);

            self.checkpoint()?;
            board.reboot_to_mass_storage()?;
            Ok(())
        })?;

        self.pause(self.config.reboot_settle)
    }

    fn copy_log_files(&mut self) -> PhaseResult<()> {
        self.set_state(WorkflowState::AwaitingMount);
        let files = self.wait_for_log_files()?;
        self.set_state(WorkflowState::CopyingFiles);
        debug!("Found {} blackbox files: {files:?}", files.len());

        for (index, src) in files.iter().enumerate() {
            self.checkpoint()?;
            copy_log_file(src, &self.output.get())?;
            self.report(copy_progress(index + 1, files.len()));
        }
        Ok(())
    }

    fn erase_log_flash(&mut self) -> PhaseResult<()> {
        self.set_state(WorkflowState::AwaitingReconnect);
        debug!("Waiting for device to erase blackbox");
        let device = self.wait_for_device()?;
        self.set_state(WorkflowState::Erasing);

        // Closed when dropped, on every exit path
        let conn = self.connect(&device);
        conn.open()?;
        let board = Board::new(&conn);
        self.status(STATUS_ERASING);

        self.checkpoint()?;
        board.erase_dataflash()?;

        self.set_state(WorkflowState::AwaitingEraseReady);
        loop {
            self.checkpoint()?;
            if board.dataflash_summary()?.ready {
                info!("Dataflash erased");
                return Ok(());
            }
            self.pause(self.config.erase_poll)?;
        }
    }

    fn wait_for_device(&self) -> PhaseResult<DeviceDescriptor> {
        let started = Instant::now();
        loop {
            self.checkpoint()?;
            if let Some(device) = self.inventory.find_protocol_device(&self.cancel)? {
                return Ok(device);
            }
            self.check_deadline(started, "MSP device")?;
            self.pause(self.config.device_poll)?;
        }
    }

    fn wait_for_log_files(&self) -> PhaseResult<Vec<PathBuf>> {
        let started = Instant::now();
        loop {
            self.checkpoint()?;
            match self.inventory.find_log_files() {
                Ok(files) if !files.is_empty() => return Ok(files),
                Ok(_) => {},
                Err(e @ Error::Unsupported(_)) => return Err(e.into()),
                // The volume can disappear while it is being mounted
                Err(e) => debug!("Scanning for log files failed: {e}"),
            }
            self.check_deadline(started, "blackbox volume")?;
            self.pause(self.config.mount_poll)?;
        }
    }

    fn connect(&self, device: &DeviceDescriptor) -> Connection {
        self.inventory
            .connection_for(device)
            .with_cancel(self.cancel.clone())
    }

    fn check_deadline(&self, started: Instant, what: &str) -> PhaseResult<()> {
        match self.config.wait_timeout {
            Some(limit) if started.elapsed() >= limit => Err(Error::Timeout(format!(
                "No {what} found within {:.1}s",
                limit.as_secs_f64()
            ))
            .into()),
            _ => Ok(()),
        }
    }

    /// Sleep for `duration`, waking at least every device poll interval to
    /// check for cancellation.
    fn pause(&self, duration: Duration) -> PhaseResult<()> {
        let slice = self.config.device_poll.max(Duration::from_millis(1));
        let deadline = Instant::now() + duration;
        loop {
            self.checkpoint()?;
            let now = Instant::now();
            if now >= deadline {
                return Ok(());
            }
            thread::sleep(slice.min(deadline - now));
        }
    }

    fn checkpoint(&self) -> PhaseResult<()> {
        self.cancel.check().map_err(|e| {
            debug!("Force stopping background job");
            e.into()
        })
    }

    fn set_state(&mut self, state: WorkflowState) {
        if self.state == state || self.state.is_terminal() {
            return;
        }
        debug!("Workflow: {} -> {state}", self.state);
        self.observer.state_changed(&state);
        self.state = state;
    }

    fn report(&mut self, value: u32) {
        if let Some(value) = self.progress.advance(value) {
            self.observer.progress(value);
        }
    }

    fn status(&self, message: &str) {
        info!("{message}");
        self.observer.status(message);
    }
}

/// Copy `src` into `dir` under its own name unless the destination exists.
///
/// Returns the destination path when a copy was made.
pub fn copy_log_file(src: &Path, dir: &Path) -> crate::Result<Option<PathBuf>> {
    let Some(name) = src.file_name() else {
        warn!("Skipping {}: no file name", src.display());
        return Ok(None);
    };
    fs::create_dir_all(dir)?;
    let dst = dir.join(name);
    if dst.exists() {
        info!("{} already exists, skipping", dst.display());
        return Ok(None);
    }
    info!("{} -> {}", src.display(), dst.display());
    fs::copy(src, &dst)?;
    Ok(Some(dst))
}

/// A workflow running on its worker thread.
#[derive(Debug)]
pub struct WorkflowHandle {
    cancel: CancelToken,
    output: OutputDir,
    join: JoinHandle<Outcome>,
}

impl WorkflowHandle {
    /// Request cancellation.
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    /// Token shared with the worker.
    pub fn cancel_token(&self) -> CancelToken {
        self.cancel.clone()
    }

    /// Output directory shared with the worker.
    pub fn output_dir(&self) -> &OutputDir {
        &self.output
    }

    /// Whether the worker has exited.
    pub fn is_finished(&self) -> bool {
        self.join.is_finished()
    }

    /// Wait for the worker. `Err` carries the panic payload if it panicked.
    pub fn join(self) -> thread::Result<Outcome> {
        self.join.join()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_copy_log_file_skips_existing() {
        let src_dir = tempfile::tempdir().unwrap();
        let out = tempfile::tempdir().unwrap();
        let src = src_dir.path().join("LOG00001.BBL");
        fs::write(&src, b"new").unwrap();
        fs::write(out.path().join("LOG00001.BBL"), b"old").unwrap();

        assert_eq!(copy_log_file(&src, out.path()).unwrap(), None);
        assert_eq!(fs::read(out.path().join("LOG00001.BBL")).unwrap(), b"old");
    }

    #[test]
    fn test_copy_log_file_creates_output_dir() {
        let src_dir = tempfile::tempdir().unwrap();
        let out = tempfile::tempdir().unwrap();
        let src = src_dir.path().join("LOG00002.BBL");
        fs::write(&src, b"data").unwrap();
        let dir = out.path().join("nested");

        let dst = copy_log_file(&src, &dir).unwrap().unwrap();
        assert_eq!(dst, dir.join("LOG00002.BBL"));
        assert_eq!(fs::read(dst).unwrap(), b"data");
    }

    #[test]
    fn test_output_dir_shared() {
        let output = OutputDir::new("/tmp/a");
        let clone = output.clone();
        clone.set("/tmp/b");
        assert_eq!(output.get(), PathBuf::from("/tmp/b"));
    }

    #[test]
    fn test_halt_from_error() {
        let halt: Halt = Error::Timeout("x".into()).into();
        assert!(matches!(halt, Halt::Failed(Error::Timeout(_))));
        assert!(matches!(Halt::from(Cancelled), Halt::Cancelled));
    }
}

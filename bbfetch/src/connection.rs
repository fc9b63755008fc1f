//! MSP connection over a serial port.
//!
//! A [`Connection`] is constructed closed. It is opened with bounded retries
//! and holds independent read and write handles, each behind its own lock, so
//! a reader and a writer never block each other while two writers (or two
//! readers) are serialized.
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use bbfetch::{Command, Connection, NativeOpener, SerialConfig};
//!
//! fn main() -> bbfetch::Result<()> {
//!     let conn = Connection::new(SerialConfig::msp("/dev/ttyACM0"), Arc::new(NativeOpener));
//!     let variant = conn.scoped(|conn| conn.send_command(Command::FcVariant))?;
//!     println!("{variant:?}");
//!     Ok(())
//! }
//! ```

use {
    crate::{
        cancel::CancelToken,
        error::{Error, ProtocolError, Result, TransportError},
        port::{Port, PortOpener, SerialConfig},
        protocol::{
            command::{Command, Response},
            msp::{self, MspFrame},
        },
    },
    log::{Level, debug, log, trace, warn},
    std::{
        io::Read,
        sync::{Arc, Mutex, MutexGuard, PoisonError},
        thread,
        time::Duration,
    },
};

/// Number of open attempts before giving up.
pub const OPEN_ATTEMPTS: usize = 3;

/// Pause between open attempts.
pub const OPEN_RETRY_DELAY: Duration = Duration::from_millis(500);

type Slot = Mutex<Option<Box<dyn Port>>>;

/// A serial MSP connection.
pub struct Connection {
    config: SerialConfig,
    opener: Arc<dyn PortOpener>,
    reader: Slot,
    writer: Slot,
    attempts: usize,
    retry_delay: Duration,
    cancel: Option<CancelToken>,
    failure_level: Level,
}

impl Connection {
    /// Create a closed connection to the port described by `config`.
    pub fn new(config: SerialConfig, opener: Arc<dyn PortOpener>) -> Self {
        Self {
            config,
            opener,
            reader: Mutex::new(None),
            writer: Mutex::new(None),
            attempts: OPEN_ATTEMPTS,
            retry_delay: OPEN_RETRY_DELAY,
            cancel: None,
            failure_level: Level::Error,
        }
    }

    /// Override the open retry policy.
    #[must_use]
    pub fn with_retry(mut self, attempts: usize, delay: Duration) -> Self {
        self.attempts = attempts.max(1);
        self.retry_delay = delay;
        self
    }

    /// Stop retrying the open once `cancel` is cancelled.
    #[must_use]
    pub fn with_cancel(mut self, cancel: CancelToken) -> Self {
        self.cancel = Some(cancel);
        self
    }

    /// Log level for failed open attempts. Defaults to `Error`.
    #[must_use]
    pub fn with_open_failure_level(mut self, level: Level) -> Self {
        self.failure_level = level;
        self
    }

    /// Port name/path.
    pub fn name(&self) -> &str {
        &self.config.port_name
    }

    /// Whether the port is currently open.
    pub fn is_open(&self) -> bool {
        lock(&self.reader).is_some()
    }

    /// Open the port, retrying on failure.
    ///
    /// Opening an already open connection logs a warning and succeeds. No
    /// further attempts are made once the cancel token is set.
    pub fn open(&self) -> Result<()> {
        let mut reader = lock(&self.reader);
        let mut writer = lock(&self.writer);

        if reader.is_some() {
            warn!("Attempting to open already opened serial port {}", self.name());
            return Ok(());
        }

        let mut tried = 0;
        for attempt in 1..=self.attempts {
            if attempt > 1 && self.cancel.as_ref().is_some_and(CancelToken::is_cancelled) {
                debug!("Giving up on {} after cancellation", self.name());
                break;
            }
            tried = attempt;
            match self.try_open() {
                Ok((read_half, write_half)) => {
                    if attempt > 1 {
                        debug!("Port {} opened on attempt {attempt}", self.name());
                    }
                    *reader = Some(read_half);
                    *writer = Some(write_half);
                    return Ok(());
                },
                Err(e) => {
                    log!(
                        self.failure_level,
                        "Port {} connection failed (attempt {attempt}/{}): {e}",
                        self.name(),
                        self.attempts
                    );
                    if attempt < self.attempts {
                        thread::sleep(self.retry_delay);
                    }
                },
            }
        }

        Err(TransportError::ConnectFailed {
            port: self.name().to_string(),
            attempts: tried,
        }
        .into())
    }

    fn try_open(&self) -> Result<(Box<dyn Port>, Box<dyn Port>)> {
        let mut port = self.opener.open(&self.config)?;
        // Stale bytes from a previous session would desync the first frame
        if let Err(e) = port.clear_buffers() {
            trace!("Could not clear buffers on {}: {e}", self.name());
        }
        let write_half = port.try_clone_port()?;
        Ok((port, write_half))
    }

    /// Close the port. Closing a closed connection is a no-op.
    pub fn close(&self) {
        for slot in [&self.reader, &self.writer] {
            if let Some(mut port) = lock(slot).take() {
                if let Err(e) = port.close() {
                    debug!("Error closing {}: {e}", self.name());
                }
            }
        }
    }

    /// Run `f` with the connection open, closing it on every exit path.
    pub fn scoped<T, E, F>(&self, f: F) -> std::result::Result<T, E>
    where
        F: FnOnce(&Self) -> std::result::Result<T, E>,
        E: From<Error>,
    {
        self.open()?;
        let _guard = CloseGuard(self);
        f(self)
    }

    /// Write all of `bytes` under the write lock.
    pub fn write(&self, bytes: &[u8]) -> Result<()> {
        let mut writer = lock(&self.writer);
        let port = writer
            .as_mut()
            .ok_or_else(|| TransportError::NotOpen(self.name().to_string()))?;
        port.write_all_bytes(bytes)
    }

    /// Read up to `buf.len()` bytes under the read lock.
    pub fn read(&self, buf: &mut [u8]) -> Result<usize> {
        let mut reader = lock(&self.reader);
        let port = reader
            .as_mut()
            .ok_or_else(|| TransportError::NotOpen(self.name().to_string()))?;
        Ok(port.read(buf).map_err(TransportError::Io)?)
    }

    /// Read one complete frame under the read lock.
    pub fn read_frame(&self) -> Result<MspFrame> {
        let mut reader = lock(&self.reader);
        let port = reader
            .as_mut()
            .ok_or_else(|| TransportError::NotOpen(self.name().to_string()))?;
        msp::decode_response(&mut **port)
    }

    /// Send `command` and, if it expects one, decode its reply.
    ///
    /// Fire-and-forget commands still drain the board's acknowledgement, but
    /// failures while doing so are logged and ignored since the board may
    /// already be acting on the command.
    pub fn send_command(&self, command: Command) -> Result<Option<Response>> {
        debug!("Send: {command}");
        let frame = command.encode()?;
        self.write(&frame.to_bytes())?;

        let reply = self.read_frame();

        if !command.expects_response() {
            if let Err(e) = reply {
                warn!("Tried to receive {command} acknowledgement but got error, skipping: {e}");
            }
            return Ok(None);
        }

        let reply = reply?;
        let malformed = |reason: String| ProtocolError::MalformedResponse {
            command: command.name(),
            reason,
            frame: reply.clone(),
        };

        if reply.is_error() {
            return Err(malformed("board rejected the command".into()).into());
        }
        if reply.code() != command.code() as u8 {
            return Err(malformed(format!("unexpected reply code {}", reply.code())).into());
        }

        let response = command
            .decode(reply.payload())
            .map_err(|e| malformed(e.to_string()))?;
        debug!("Response: {response:?}");
        Ok(response)
    }
}

impl Drop for Connection {
    fn drop(&mut self) {
        self.close();
    }
}

struct CloseGuard<'a>(&'a Connection);

impl Drop for CloseGuard<'_> {
    fn drop(&mut self) {
        self.0.close();
    }
}

fn lock(slot: &Slot) -> MutexGuard<'_, Option<Box<dyn Port>>> {
    slot.lock().unwrap_or_else(PoisonError::into_inner)
}

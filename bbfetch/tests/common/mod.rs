//! Simulated flight controller for workflow tests.
//!
//! The board answers MSP on one serial port until it is told to reboot into
//! mass-storage mode. It then drops off the bus and exposes its flash as a
//! volume backed by a temporary directory. The first serial listing made
//! while it is in mass-storage mode plays the part of the user replugging the
//! cable: the board returns to MSP mode and shows up on the next listing.

#![allow(dead_code)]

use {
    bbfetch::{
        DeviceDescriptor, Inventory, InventoryConfig, Platform, Port, PortOpener, Result,
        SerialConfig, TransportError, Volume, WorkflowConfig,
        device::DEFAULT_VOLUME_LABEL,
        protocol::{
            CommandCode,
            msp::{self, DIRECTION_REPLY},
        },
    },
    std::{
        collections::VecDeque,
        fs,
        io::{self, Read, Write},
        path::PathBuf,
        sync::{Arc, Mutex, MutexGuard},
        thread,
        time::Duration,
    },
    tempfile::TempDir,
};

pub const PORT_NAME: &str = "/dev/ttyACM0";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    /// Not plugged in.
    Absent,
    /// Enumerated as a serial MSP device.
    Msp,
    /// Enumerated as a USB drive.
    MassStorage,
}

struct State {
    mode: Mode,
    rx: Vec<u8>,
    tx: VecDeque<u8>,
    commands: Vec<u8>,
    erase_requested: bool,
    summaries_since_erase: usize,
    erase_never_completes: bool,
    never_mounts: bool,
    never_reconnects: bool,
    silent_ports: Vec<String>,
    silent_read: Duration,
    silent_opens: usize,
}

/// Shared handle on the simulated board.
#[derive(Clone)]
pub struct SimBoard {
    state: Arc<Mutex<State>>,
    flash: Arc<TempDir>,
}

impl SimBoard {
    /// A board in MSP mode whose flash holds `logs`.
    pub fn new(logs: &[(&str, &[u8])]) -> Self {
        let flash = tempfile::tempdir().unwrap();
        for (name, data) in logs {
            fs::write(flash.path().join(name), data).unwrap();
        }
        Self {
            state: Arc::new(Mutex::new(State {
                mode: Mode::Msp,
                rx: Vec::new(),
                tx: VecDeque::new(),
                commands: Vec::new(),
                erase_requested: false,
                summaries_since_erase: 0,
                erase_never_completes: false,
                never_mounts: false,
                never_reconnects: false,
                silent_ports: Vec::new(),
                silent_read: Duration::ZERO,
                silent_opens: 0,
            })),
            flash: Arc::new(flash),
        }
    }

    /// A board that is never plugged in.
    pub fn absent() -> Self {
        let board = Self::new(&[]);
        board.state().mode = Mode::Absent;
        board
    }

    /// Keep reporting the flash as busy after an erase.
    pub fn erase_never_completes(self) -> Self {
        self.state().erase_never_completes = true;
        self
    }

    /// Expose the flash volume without it ever being mounted.
    pub fn never_mounts(self) -> Self {
        self.state().never_mounts = true;
        self
    }

    /// Stay in mass-storage mode after the reboot.
    pub fn never_reconnects(self) -> Self {
        self.state().never_reconnects = true;
        self
    }

    /// Add `count` ports, listed ahead of the board, that open but never
    /// answer. Each read blocks for `read_delay` and then times out.
    pub fn with_silent_ports(self, count: usize, read_delay: Duration) -> Self {
        {
            let mut state = self.state();
            state.silent_ports = (0..count).map(|i| format!("/dev/ttyUSB{i}")).collect();
            state.silent_read = read_delay;
        }
        self
    }

    /// How many times a silent port was opened.
    pub fn silent_opens(&self) -> usize {
        self.state().silent_opens
    }

    fn state(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap()
    }

    pub fn mode(&self) -> Mode {
        self.state().mode
    }

    /// Codes of every request received, in order.
    pub fn commands(&self) -> Vec<u8> {
        self.state().commands.clone()
    }

    pub fn flash_dir(&self) -> PathBuf {
        self.flash.path().to_path_buf()
    }

    pub fn inventory(&self) -> Inventory {
        Inventory::new(Arc::new(self.clone()), Arc::new(self.clone())).with_config(
            InventoryConfig {
                open_attempts: 1,
                open_retry_delay: Duration::ZERO,
                serial_timeout: Duration::from_millis(10),
                ..Default::default()
            },
        )
    }
}

impl State {
    fn handle(&mut self, code: u8) {
        self.commands.push(code);
        let reply: Vec<u8> = match code {
            c if c == CommandCode::ApiVersion as u8 => vec![0, 1, 46],
            c if c == CommandCode::FcVariant as u8 => b"BTFL".to_vec(),
            c if c == CommandCode::DataflashSummary as u8 => {
                let ready = if self.erase_requested {
                    self.summaries_since_erase += 1;
                    // Busy on the first poll after the erase
                    !self.erase_never_completes && self.summaries_since_erase > 1
                } else {
                    true
                };
                let used: u32 = if self.erase_requested { 0 } else { 1024 * 1024 };
                let mut payload = vec![0x02 | u8::from(ready)];
                payload.extend_from_slice(&64u32.to_le_bytes());
                payload.extend_from_slice(&(2 * 1024 * 1024u32).to_le_bytes());
                payload.extend_from_slice(&used.to_le_bytes());
                payload
            },
            c if c == CommandCode::DataflashErase as u8 => {
                self.erase_requested = true;
                Vec::new()
            },
            _ => Vec::new(),
        };

        let mut frame = msp::encode_request(code, &reply).unwrap().to_bytes();
        frame[2] = DIRECTION_REPLY;
        self.tx.extend(frame);

        if code == CommandCode::SetReboot as u8 {
            self.mode = Mode::MassStorage;
        }
    }

    fn feed(&mut self, bytes: &[u8]) {
        self.rx.extend_from_slice(bytes);
        while self.rx.len() >= msp::FRAME_OVERHEAD {
            let len = usize::from(self.rx[3]);
            let total = msp::FRAME_OVERHEAD + len;
            if self.rx.len() < total {
                break;
            }
            let code = self.rx[4];
            self.rx.drain(..total);
            self.handle(code);
        }
    }
}

struct SimPort {
    board: SimBoard,
}

impl Read for SimPort {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let mut state = self.board.state();
        if state.tx.is_empty() {
            return Err(io::Error::new(io::ErrorKind::TimedOut, "timed out"));
        }
        let n = buf.len().min(state.tx.len());
        for (slot, byte) in buf.iter_mut().zip(state.tx.drain(..n)) {
            *slot = byte;
        }
        Ok(n)
    }
}

impl Write for SimPort {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.board.state().feed(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl Port for SimPort {
    fn name(&self) -> &str {
        PORT_NAME
    }

    fn clear_buffers(&mut self) -> Result<()> {
        let mut state = self.board.state();
        state.rx.clear();
        state.tx.clear();
        Ok(())
    }

    fn try_clone_port(&self) -> Result<Box<dyn Port>> {
        Ok(Box::new(SimPort {
            board: self.board.clone(),
        }))
    }

    fn close(&mut self) -> Result<()> {
        Ok(())
    }
}

/// A port with nothing on the other end.
struct SilentPort {
    name: String,
    read_delay: Duration,
}

impl Read for SilentPort {
    fn read(&mut self, _buf: &mut [u8]) -> io::Result<usize> {
        thread::sleep(self.read_delay);
        Err(io::Error::new(io::ErrorKind::TimedOut, "timed out"))
    }
}

impl Write for SilentPort {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl Port for SilentPort {
    fn name(&self) -> &str {
        &self.name
    }

    fn clear_buffers(&mut self) -> Result<()> {
        Ok(())
    }

    fn try_clone_port(&self) -> Result<Box<dyn Port>> {
        Ok(Box::new(Self {
            name: self.name.clone(),
            read_delay: self.read_delay,
        }))
    }

    fn close(&mut self) -> Result<()> {
        Ok(())
    }
}

impl PortOpener for SimBoard {
    fn open(&self, config: &SerialConfig) -> Result<Box<dyn Port>> {
        {
            let mut state = self.state();
            if state.silent_ports.contains(&config.port_name) {
                state.silent_opens += 1;
                return Ok(Box::new(SilentPort {
                    name: config.port_name.clone(),
                    read_delay: state.silent_read,
                }));
            }
        }
        if config.port_name != PORT_NAME || self.mode() != Mode::Msp {
            return Err(TransportError::NotOpen(config.port_name.clone()).into());
        }
        Ok(Box::new(SimPort {
            board: self.clone(),
        }))
    }
}

impl Platform for SimBoard {
    fn list_serial_devices(&self) -> Result<Vec<DeviceDescriptor>> {
        let mut state = self.state();
        let mut devices: Vec<DeviceDescriptor> = state
            .silent_ports
            .iter()
            .map(|name| DeviceDescriptor::new(name.as_str()).with_usb(0x10C4, 0xEA60))
            .collect();
        match state.mode {
            Mode::Msp => devices.push(DeviceDescriptor::new(PORT_NAME).with_usb(0x0483, 0x5740)),
            Mode::MassStorage if !state.never_reconnects => state.mode = Mode::Msp,
            Mode::MassStorage | Mode::Absent => {},
        }
        Ok(devices)
    }

    fn list_volumes(&self) -> Result<Vec<Volume>> {
        let state = self.state();
        if state.mode != Mode::MassStorage || state.never_mounts {
            return Ok(Vec::new());
        }
        drop(state);
        Ok(vec![Volume {
            label: DEFAULT_VOLUME_LABEL.to_string(),
            root: self.flash_dir(),
        }])
    }
}

/// Timings short enough for tests.
pub fn fast_config() -> WorkflowConfig {
    WorkflowConfig {
        device_poll: Duration::from_millis(5),
        mount_poll: Duration::from_millis(5),
        erase_poll: Duration::from_millis(5),
        reboot_settle: Duration::from_millis(5),
        wait_timeout: None,
    }
}

pub fn init_logger() {
    let _ = env_logger::builder().is_test(true).try_init();
}

//! Native serial port implementation using the `serialport` crate.

use {
    crate::{
        error::{Result, TransportError},
        port::{DataBits, FlowControl, Parity, Port, PortOpener, SerialConfig, StopBits},
    },
    log::trace,
    serialport::ClearBuffer,
    std::io::{Read, Write},
};

/// Native serial port implementation.
pub struct NativePort {
    port: Option<Box<dyn serialport::SerialPort>>,
    name: String,
}

impl NativePort {
    /// Open a serial port with the given configuration.
    pub fn open(config: &SerialConfig) -> Result<Self> {
        let port = serialport::new(&config.port_name, config.baud_rate)
            .timeout(config.timeout)
            .data_bits(config.data_bits.into())
            .parity(config.parity.into())
            .stop_bits(config.stop_bits.into())
            .flow_control(config.flow_control.into())
            .open()
            .map_err(TransportError::Serial)?;

        trace!("Opened {} at {} baud", config.port_name, config.baud_rate);

        Ok(Self {
            port: Some(port),
            name: config.port_name.clone(),
        })
    }

    fn closed_error() -> std::io::Error {
        std::io::Error::new(std::io::ErrorKind::NotConnected, "port closed")
    }
}

impl Port for NativePort {
    fn name(&self) -> &str {
        &self.name
    }

    fn clear_buffers(&mut self) -> Result<()> {
        if let Some(ref mut p) = self.port {
            p.clear(ClearBuffer::All)
                .map_err(TransportError::Serial)?;
        }
        Ok(())
    }

    fn try_clone_port(&self) -> Result<Box<dyn Port>> {
        let port = self
            .port
            .as_ref()
            .ok_or_else(|| TransportError::NotOpen(self.name.clone()))?
            .try_clone()
            .map_err(TransportError::Serial)?;

        Ok(Box::new(Self {
            port: Some(port),
            name: self.name.clone(),
        }))
    }

    fn close(&mut self) -> Result<()> {
        // Dropping the handle closes the descriptor
        self.port.take();
        Ok(())
    }
}

impl Read for NativePort {
    fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
        self.port
            .as_mut()
            .ok_or_else(Self::closed_error)
            .and_then(|p| p.read(buf))
    }
}

impl Write for NativePort {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        self.port
            .as_mut()
            .ok_or_else(Self::closed_error)
            .and_then(|p| p.write(buf))
    }

    fn flush(&mut self) -> std::io::Result<()> {
        self.port
            .as_mut()
            .ok_or_else(Self::closed_error)
            .and_then(std::io::Write::flush)
    }
}

/// Opens [`NativePort`]s.
#[derive(Debug, Clone, Copy, Default)]
pub struct NativeOpener;

impl PortOpener for NativeOpener {
    fn open(&self, config: &SerialConfig) -> Result<Box<dyn Port>> {
        Ok(Box::new(NativePort::open(config)?))
    }
}

// Type conversions from our types to serialport types

impl From<DataBits> for serialport::DataBits {
    fn from(bits: DataBits) -> Self {
        match bits {
            DataBits::Seven => Self::Seven,
            DataBits::Eight => Self::Eight,
        }
    }
}

impl From<Parity> for serialport::Parity {
    fn from(parity: Parity) -> Self {
        match parity {
            Parity::None => Self::None,
            Parity::Odd => Self::Odd,
            Parity::Even => Self::Even,
        }
    }
}

impl From<StopBits> for serialport::StopBits {
    fn from(bits: StopBits) -> Self {
        match bits {
            StopBits::One => Self::One,
            StopBits::Two => Self::Two,
        }
    }
}

impl From<FlowControl> for serialport::FlowControl {
    fn from(flow: FlowControl) -> Self {
        match flow {
            FlowControl::None => Self::None,
            FlowControl::Hardware => Self::Hardware,
            FlowControl::Software => Self::Software,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_open_missing_port_fails() {
        let config = SerialConfig::msp("/dev/bbfetch-does-not-exist");
        assert!(NativeOpener.open(&config).is_err());
    }

    #[test]
    fn test_config_conversions() {
        assert_eq!(
            serialport::DataBits::from(DataBits::Eight),
            serialport::DataBits::Eight
        );
        assert_eq!(serialport::Parity::from(Parity::None), serialport::Parity::None);
        assert_eq!(
            serialport::StopBits::from(StopBits::One),
            serialport::StopBits::One
        );
        assert_eq!(
            serialport::FlowControl::from(FlowControl::None),
            serialport::FlowControl::None
        );
    }
}

//! Transport abstraction over the glove's byte stream. The sensor loop
//! only sees `SensorLink`; whether bytes come from a USB serial port or
//! the built-in simulator is decided at startup.

/// A byte source delivering the glove's raw stream. `read` blocks for at
/// most the link's poll interval and returns `Ok(0)` when no bytes
/// arrived, so callers can interleave other work between reads.
pub trait SensorLink: Send {
    fn read(&mut self, buf: &mut [u8]) -> Result<usize, String>;

    /// Human-readable description for logs ("serial /dev/ttyUSB0" etc).
    fn describe(&self) -> String;
}

#[cfg(feature = "hardware")]
pub use serial::SerialLink;

#[cfg(feature = "hardware")]
mod serial {
    use super::SensorLink;
    use log::info;
    use std::io::{self, Read};
    use std::time::Duration;

    /// Read timeout doubles as the idle poll interval.
    const READ_TIMEOUT_MS: u64 = 5;

    pub struct SerialLink {
        port: Box<dyn serialport::SerialPort>,
        name: String,
    }

    impl SerialLink {
        pub fn open(port_name: &str, baud_rate: u32) -> Result<Self, String> {
            info!("Opening serial port: {} @ {}", port_name, baud_rate);
            let port = serialport::new(port_name, baud_rate)
                .timeout(Duration::from_millis(READ_TIMEOUT_MS))
                .open()
                .map_err(|e| format!("failed to open {}: {}", port_name, e))?;
            Ok(Self {
                port,
                name: port_name.to_string(),
            })
        }
    }

    impl SensorLink for SerialLink {
        fn read(&mut self, buf: &mut [u8]) -> Result<usize, String> {
            match self.port.read(buf) {
                Ok(n) => Ok(n),
                Err(ref e) if e.kind() == io::ErrorKind::TimedOut => Ok(0),
                Err(e) => Err(format!("serial read: {}", e)),
            }
        }

        fn describe(&self) -> String {
            format!("serial {}", self.name)
        }
    }
}

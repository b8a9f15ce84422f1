use std::io::{Read, Write};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use serialport::SerialPort;

use super::{Result, SerialError, SerialSettings};

/// One serial line to the device.
///
/// Exactly one production implementation exists ([`SerialInterface`])
/// plus an in-memory double for offline use ([`super::FakeDeviceLink`]);
/// which one a [`super::DeviceClient`] talks to is decided at
/// construction time.
#[async_trait]
pub trait SerialLink: Send {
    /// Write one complete command line, including its `\r\n` tail.
    async fn write_line(&mut self, line: &[u8]) -> Result<()>;

    /// Read bytes up to (but not including) the reply terminator.
    /// Times out with [`SerialError::Timeout`] if no full line arrives.
    async fn read_line(&mut self) -> Result<Vec<u8>>;

    /// Release the underlying handle. Idempotent.
    fn close(&mut self);
}

/// Production link over a real serial port.
pub struct SerialInterface {
    port: Option<Box<dyn SerialPort>>,
    terminator: u8,
    timeout: Duration,
    /// Bytes read past the last terminator, kept for the next line.
    pending: Vec<u8>,
}

impl SerialInterface {
    /// Open the configured port and drain whatever stale bytes are
    /// already buffered on the line, so the first command starts from a
    /// clean stream.
    pub fn open(settings: &SerialSettings) -> Result<Self> {
        let port = serialport::new(&settings.port, settings.baud_rate)
            .timeout(settings.timeout())
            .open()
            .map_err(|e| SerialError::ConnectionFailed(e.to_string()))?;

        let mut interface = Self {
            port: Some(port),
            terminator: settings.terminator,
            timeout: settings.timeout(),
            pending: Vec::new(),
        };
        interface.drain_stale_bytes()?;

        log::info!(
            "Connected to device on {} at {} baud",
            settings.port,
            settings.baud_rate
        );
        Ok(interface)
    }

    fn drain_stale_bytes(&mut self) -> Result<()> {
        let port = self.port.as_mut().ok_or(SerialError::PortClosed)?;
        let mut scratch = [0u8; 256];
        loop {
            match port.bytes_to_read()? {
                0 => return Ok(()),
                _ => match port.read(&mut scratch) {
                    Ok(0) => return Ok(()),
                    Ok(n) => log::debug!("Drained {} stale bytes", n),
                    Err(ref e) if e.kind() == std::io::ErrorKind::TimedOut => return Ok(()),
                    Err(e) => return Err(SerialError::IoError(e)),
                },
            }
        }
    }

    /// Pop a complete line out of the pending buffer, if one is there.
    fn take_pending_line(&mut self) -> Option<Vec<u8>> {
        let pos = self.pending.iter().position(|&b| b == self.terminator)?;
        let line = self.pending[..pos].to_vec();
        self.pending.drain(..=pos);
        Some(line)
    }
}

#[async_trait]
impl SerialLink for SerialInterface {
    async fn write_line(&mut self, line: &[u8]) -> Result<()> {
        let port = self.port.as_mut().ok_or(SerialError::PortClosed)?;
        port.write_all(line).map_err(SerialError::IoError)?;
        port.flush().map_err(SerialError::IoError)?;
        Ok(())
    }

    async fn read_line(&mut self) -> Result<Vec<u8>> {
        if let Some(line) = self.take_pending_line() {
            return Ok(line);
        }

        let deadline = Instant::now() + self.timeout;
        let mut buf = [0u8; 256];
        loop {
            let port = self.port.as_mut().ok_or(SerialError::PortClosed)?;
            match port.bytes_to_read()? {
                0 => {
                    if Instant::now() >= deadline {
                        return Err(SerialError::Timeout);
                    }
                    tokio::time::sleep(Duration::from_millis(5)).await;
                }
                _ => match port.read(&mut buf) {
                    Ok(n) => {
                        self.pending.extend_from_slice(&buf[..n]);
                        if let Some(line) = self.take_pending_line() {
                            return Ok(line);
                        }
                        if Instant::now() >= deadline {
                            return Err(SerialError::Timeout);
                        }
                    }
                    Err(ref e) if e.kind() == std::io::ErrorKind::TimedOut => {
                        if Instant::now() >= deadline {
                            return Err(SerialError::Timeout);
                        }
                    }
                    Err(e) => return Err(SerialError::IoError(e)),
                },
            }
        }
    }

    fn close(&mut self) {
        if self.port.take().is_some() {
            log::info!("Serial port closed");
        }
        self.pending.clear();
    }
}

impl Drop for SerialInterface {
    fn drop(&mut self) {
        self.close();
    }
}

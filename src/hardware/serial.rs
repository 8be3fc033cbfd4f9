// src/hardware/serial.rs - Serial link to the kiln board
use super::{CommandTransport, HardwareError};
use async_trait::async_trait;
use futures_util::StreamExt;
use futures_util::stream::BoxStream;
use serial2_tokio::SerialPort;
use std::io::ErrorKind;
use std::sync::Arc;

/// Serial connection to the kiln board.
///
/// Writes go straight to the port; reads are exposed as a stream of
/// newline-delimited lines so the controller can `select!` on them.
#[derive(Clone)]
pub struct SerialLink {
    port: Arc<SerialPort>,
    name: String,
}

impl SerialLink {
    /// Open the named device at the given baud rate.
    pub fn open(port_name: &str, baud_rate: u32) -> Result<Self, HardwareError> {
        tracing::info!("Opening serial port {} at {} baud", port_name, baud_rate);
        let port = SerialPort::open(port_name, baud_rate)?;
        Ok(Self {
            port: Arc::new(port),
            name: port_name.to_string(),
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Lines received from the board, without their terminator.
    ///
    /// The stream ends when the port reports EOF or a non-timeout error.
    pub fn lines(&self) -> BoxStream<'static, String> {
        let port = self.port.clone();
        async_stream::stream! {
            let mut buf = [0u8; 256];
            let mut pending: Vec<u8> = Vec::new();
            loop {
                match port.read(&mut buf).await {
                    Ok(0) => {
                        tracing::info!("Serial connection closed by remote");
                        break;
                    }
                    Ok(n) => {
                        tracing::trace!("Read {} bytes from serial", n);
                        pending.extend_from_slice(&buf[..n]);
                        while let Some(pos) = pending.iter().position(|&b| b == b'\n') {
                            let line: Vec<u8> = pending.drain(..=pos).collect();
                            yield String::from_utf8_lossy(&line[..pos]).into_owned();
                        }
                    }
                    Err(e) if e.kind() == ErrorKind::TimedOut => continue,
                    Err(e) => {
                        tracing::error!("Serial read error: {}", e);
                        break;
                    }
                }
            }
        }
        .boxed()
    }
}

#[async_trait]
impl CommandTransport for SerialLink {
    async fn write(&self, data: &[u8]) -> Result<(), HardwareError> {
        let written = self.port.write(data).await?;
        if written != data.len() {
            return Err(HardwareError::ShortWrite {
                written,
                expected: data.len(),
            });
        }
        Ok(())
    }
}

impl std::fmt::Debug for SerialLink {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SerialLink").field("name", &self.name).finish()
    }
}

//! Hardware side channel
//!
//! Finished assistant replies are forwarded to signal sinks, fire-and-forget.
//! A sink failing never affects the conversation.

use async_trait::async_trait;
use serialport::SerialPort;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;

/// Device setting that turns forwarding off.
pub const DISABLED_DEVICE: &str = "disabled";

#[derive(Error, Debug)]
pub enum SignalError {
    #[error("Signal device error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Serial port error: {0}")]
    Serial(#[from] serialport::Error),
    #[error("Serial write task failed: {0}")]
    Task(#[from] tokio::task::JoinError),
}

const SERIAL_TIMEOUT: Duration = Duration::from_secs(2);

#[async_trait]
pub trait SignalSink: Send + Sync {
    async fn forward(&self, text: &str) -> Result<(), SignalError>;

    fn name(&self) -> &str;
}

enum DeviceWriter {
    File(tokio::fs::File),
    Serial(Box<dyn SerialPort>),
}

/// Character devices are opened as serial ports at the configured baud rate;
/// anything else is treated as a plain file.
#[cfg(unix)]
fn is_serial_device(path: &Path) -> bool {
    use std::os::unix::fs::FileTypeExt;
    std::fs::metadata(path).is_ok_and(|m| m.file_type().is_char_device())
}

#[cfg(not(unix))]
fn is_serial_device(path: &Path) -> bool {
    path.to_string_lossy().to_ascii_uppercase().starts_with("COM")
}

/// Writes each reply as one line to a serial port or a plain file. The
/// device is opened on first use and kept open.
pub struct DeviceSignalSink {
    path: PathBuf,
    baud: u32,
    name: String,
    writer: Mutex<Option<DeviceWriter>>,
}

impl DeviceSignalSink {
    pub fn new(path: impl Into<PathBuf>, baud: u32) -> Self {
        let path = path.into();
        let name = format!("device:{}", path.display());
        Self {
            path,
            baud,
            name,
            writer: Mutex::new(None),
        }
    }

    async fn open(&self) -> Result<DeviceWriter, SignalError> {
        let writer = if is_serial_device(&self.path) {
            let path = self.path.to_string_lossy().into_owned();
            let baud = self.baud;
            let port = tokio::task::spawn_blocking(move || {
                serialport::new(path, baud).timeout(SERIAL_TIMEOUT).open()
            })
            .await??;
            DeviceWriter::Serial(port)
        } else {
            let file = tokio::fs::OpenOptions::new()
                .create(true)
                .append(true)
                .open(&self.path)
                .await?;
            DeviceWriter::File(file)
        };
        tracing::info!(device = %self.path.display(), baud = self.baud, "Signal device connected");
        Ok(writer)
    }
}

async fn write_line(writer: DeviceWriter, line: String) -> Result<DeviceWriter, SignalError> {
    match writer {
        DeviceWriter::File(mut file) => {
            file.write_all(line.as_bytes()).await?;
            file.flush().await?;
            Ok(DeviceWriter::File(file))
        }
        DeviceWriter::Serial(mut port) => {
            let port = tokio::task::spawn_blocking(move || {
                port.write_all(line.as_bytes())?;
                port.flush()?;
                Ok::<_, std::io::Error>(port)
            })
            .await??;
            Ok(DeviceWriter::Serial(port))
        }
    }
}

#[async_trait]
impl SignalSink for DeviceSignalSink {
    async fn forward(&self, text: &str) -> Result<(), SignalError> {
        let mut slot = self.writer.lock().await;
        let writer = match slot.take() {
            Some(writer) => writer,
            None => self.open().await?,
        };

        let mut line = command_for(text);
        line.push('\n');
        // On failure the slot stays empty and the device is reopened on the
        // next signal.
        *slot = Some(write_line(writer, line).await?);
        Ok(())
    }

    fn name(&self) -> &str {
        &self.name
    }
}

/// Sink that only logs; used when no device is configured but forwarding is
/// still wanted for diagnostics.
pub struct LogSignalSink;

#[async_trait]
impl SignalSink for LogSignalSink {
    async fn forward(&self, text: &str) -> Result<(), SignalError> {
        tracing::debug!(chars = text.chars().count(), "Signal forwarded");
        Ok(())
    }

    fn name(&self) -> &str {
        "log"
    }
}

/// Device command for a reply. Replies are currently sent verbatim.
pub fn command_for(text: &str) -> String {
    text.to_string()
}

/// Build the configured sink, if any.
pub fn sink_for_device(device: &str, baud: u32) -> Option<Arc<dyn SignalSink>> {
    let device = device.trim();
    if device.is_empty() || device.eq_ignore_ascii_case(DISABLED_DEVICE) {
        return None;
    }
    Some(Arc::new(DeviceSignalSink::new(device, baud)))
}

/// Forward `text` to every sink on background tasks.
pub fn forward_all(sinks: &[Arc<dyn SignalSink>], text: &str) {
    for sink in sinks {
        let sink = sink.clone();
        let text = text.to_string();
        tokio::spawn(async move {
            if let Err(e) = sink.forward(&text).await {
                tracing::warn!(sink = %sink.name(), error = %e, "Signal not sent");
            }
        });
    }
}

//! Serial link to the microcontroller.
//!
//! [`LineLink`] is the seam the handshake, monitor, and relay are written
//! against. [`SerialLink`] is the real implementation on top of a tokio-serial
//! stream.

mod codec;

pub use codec::{LineCodec, MAX_LINE_LEN};

use async_trait::async_trait;
use futures::SinkExt;
use std::io;
use std::time::Duration;
use tokio::time;
use tokio_serial::{SerialPort, SerialPortBuilderExt, SerialPortType, SerialStream};
use tokio_stream::StreamExt;
use tokio_util::codec::Framed;

use crate::config::SerialConfig;
use crate::error::{Error, Result};
use crate::tracing::prelude::*;

/// Line-in, byte-out link.
#[async_trait]
pub trait LineLink: Send {
    /// Port identifier, for log and event context.
    fn port(&self) -> &str;

    /// Whether input is waiting, without blocking.
    fn has_pending_line(&self) -> Result<bool>;

    /// Read one line, waiting at most the link's read timeout.
    ///
    /// Returns an empty string if the timeout passes first or the line could
    /// not be decoded.
    async fn read_line(&mut self) -> Result<String>;

    /// Write one raw byte.
    async fn write_byte(&mut self, byte: u8) -> Result<()>;

    /// Release the link. Calling this more than once is a no-op.
    fn close(&mut self);
}

/// Exclusive owner of an open serial port.
///
/// The port is released on [`LineLink::close`] or on drop, whichever comes
/// first.
#[derive(Debug)]
pub struct SerialLink {
    port: String,
    read_timeout: Duration,
    framed: Option<Framed<SerialStream, LineCodec>>,
}

impl SerialLink {
    /// Open the configured port.
    pub fn open(config: &SerialConfig) -> Result<Self> {
        let stream = tokio_serial::new(&config.port, config.baud_rate)
            .timeout(config.read_timeout())
            .open_native_async()
            .map_err(|source| Error::PortUnavailable {
                port: config.port.clone(),
                source,
            })?;
        debug!(port = %config.port, baud = config.baud_rate, "Serial port opened");
        Ok(Self::from_stream(&config.port, stream, config.read_timeout()))
    }

    /// Wrap an already open stream.
    pub fn from_stream(
        port: &str,
        stream: SerialStream,
        read_timeout: Duration,
    ) -> Self {
        Self {
            port: port.to_string(),
            read_timeout,
            framed: Some(Framed::new(stream, LineCodec)),
        }
    }

    pub fn is_open(&self) -> bool {
        self.framed.is_some()
    }

    fn framed(&mut self) -> Result<&mut Framed<SerialStream, LineCodec>> {
        self.framed.as_mut().ok_or(Error::LinkClosed)
    }
}

#[async_trait]
impl LineLink for SerialLink {
    fn port(&self) -> &str {
        &self.port
    }

    fn has_pending_line(&self) -> Result<bool> {
        let framed = self.framed.as_ref().ok_or(Error::LinkClosed)?;
        if !framed.read_buffer().is_empty() {
            return Ok(true);
        }
        Ok(framed.get_ref().bytes_to_read()? > 0)
    }

    async fn read_line(&mut self) -> Result<String> {
        let read_timeout = self.read_timeout;
        let framed = self.framed()?;
        match time::timeout(read_timeout, framed.next()).await {
            Ok(Some(line)) => Ok(line?),
            Ok(None) => Err(Error::Io(io::Error::new(
                io::ErrorKind::UnexpectedEof,
                "serial stream closed",
            ))),
            Err(_) => {
                trace!("No complete line within {:?}", read_timeout);
                Ok(String::new())
            }
        }
    }

    async fn write_byte(&mut self, byte: u8) -> Result<()> {
        self.framed()?.send(byte).await?;
        Ok(())
    }

    fn close(&mut self) {
        if self.framed.take().is_some() {
            info!(port = %self.port, "Serial link closed");
        }
    }
}

impl Drop for SerialLink {
    fn drop(&mut self) {
        self.close();
    }
}

/// Log the serial ports present on this machine.
///
/// Informational only; nothing here is used to pick the port.
pub fn log_available_ports() {
    match tokio_serial::available_ports() {
        Ok(ports) if ports.is_empty() => info!("No serial ports found"),
        Ok(ports) => {
            info!("Available ports:");
            for p in ports {
                info!("- {}: {}", p.port_name, describe(&p.port_type));
            }
        }
        Err(e) => warn!(error = %e, "Could not enumerate serial ports"),
    }
}

fn describe(port_type: &SerialPortType) -> String {
    match port_type {
        SerialPortType::UsbPort(usb) => {
            let product = usb.product.as_deref().unwrap_or("USB serial");
            format!("{} ({:04x}:{:04x})", product, usb.vid, usb.pid)
        }
        SerialPortType::PciPort => "PCI".to_string(),
        SerialPortType::BluetoothPort => "Bluetooth".to_string(),
        SerialPortType::Unknown => "n/a".to_string(),
    }
}

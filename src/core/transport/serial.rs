//! Serial port connector

use super::tcp::frame_line;
use super::{
    Connector, ConnectorError, ConnectorErrorKind, Endpoint, Inbound, Link, OpenOptions,
    ProtocolKind, SendReport, SerialParity,
};
use async_trait::async_trait;
use bytes::BytesMut;
use serde::{Deserialize, Serialize};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio_serial::{DataBits, FlowControl, Parity, SerialPortBuilderExt, SerialStream, StopBits};

/// Serial port connector
#[derive(Debug, Clone, Copy, Default)]
pub struct SerialConnector;

#[async_trait]
impl Connector for SerialConnector {
    fn kind(&self) -> ProtocolKind {
        ProtocolKind::Serial
    }

    async fn open(
        &self,
        endpoint: &Endpoint,
        options: &OpenOptions,
    ) -> Result<Box<dyn Link>, ConnectorError> {
        let Endpoint::Serial { path, line } = endpoint else {
            return Err(ConnectorError::invalid_endpoint(format!(
                "Serial cannot open '{endpoint}'"
            )));
        };
        let line = options.serial.unwrap_or(*line);
        line.validate().map_err(ConnectorError::invalid_endpoint)?;

        let data_bits = match line.data_bits {
            5 => DataBits::Five,
            6 => DataBits::Six,
            7 => DataBits::Seven,
            _ => DataBits::Eight,
        };
        let stop_bits = match line.stop_bits {
            2 => StopBits::Two,
            _ => StopBits::One,
        };
        let parity = match line.parity {
            SerialParity::Odd => Parity::Odd,
            SerialParity::Even => Parity::Even,
            SerialParity::None => Parity::None,
        };

        let stream = tokio_serial::new(path, line.baud)
            .data_bits(data_bits)
            .stop_bits(stop_bits)
            .parity(parity)
            .flow_control(FlowControl::None)
            .open_native_async()
            .map_err(|e| map_serial_error(path, e))?;

        tracing::debug!(port = %path, %line, "serial port opened");

        Ok(Box::new(SerialLink {
            stream,
            remote: format!("{path} @ {line}"),
            append_newline: options.append_newline,
            buf: BytesMut::with_capacity(1024),
        }))
    }
}

fn map_serial_error(path: &str, e: tokio_serial::Error) -> ConnectorError {
    let kind = match e.kind() {
        tokio_serial::ErrorKind::Io(std::io::ErrorKind::PermissionDenied) => {
            ConnectorErrorKind::PermissionDenied
        }
        _ => ConnectorErrorKind::Connection,
    };
    ConnectorError::new(kind, format!("failed to open {path}")).with_cause(e)
}

/// Open serial port
pub struct SerialLink {
    stream: SerialStream,
    remote: String,
    append_newline: bool,
    buf: BytesMut,
}

#[async_trait]
impl Link for SerialLink {
    async fn send(&mut self, data: &[u8]) -> Result<SendReport, ConnectorError> {
        let frame = frame_line(data, self.append_newline);
        self.stream
            .write_all(&frame)
            .await
            .map_err(ConnectorError::from_io)?;
        self.stream.flush().await.map_err(ConnectorError::from_io)?;
        Ok(SendReport {
            written: frame.len(),
            ..SendReport::default()
        })
    }

    async fn receive(&mut self) -> Result<Inbound, ConnectorError> {
        self.buf.reserve(1024);
        let n = self
            .stream
            .read_buf(&mut self.buf)
            .await
            .map_err(ConnectorError::from_io)?;
        if n == 0 {
            return Err(ConnectorError::io(format!("{} closed", self.remote)));
        }
        Ok(Inbound {
            data: self.buf.split().freeze(),
            peer: None,
        })
    }

    async fn close(&mut self) {
        self.stream.flush().await.ok();
    }

    fn remote(&self) -> String {
        self.remote.clone()
    }
}

/// Serial port found on the system
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PortInfo {
    /// Device path
    pub name: String,
    /// Port type description
    pub description: String,
}

/// List available serial ports
pub fn list_ports() -> Result<Vec<PortInfo>, ConnectorError> {
    let ports = serialport::available_ports()
        .map_err(|e| ConnectorError::io("failed to enumerate serial ports").with_cause(e))?;

    Ok(ports
        .into_iter()
        .map(|p| {
            let description = match p.port_type {
                serialport::SerialPortType::UsbPort(usb) => match usb.product {
                    Some(product) => format!("USB {product}"),
                    None => format!("USB {:04x}:{:04x}", usb.vid, usb.pid),
                },
                serialport::SerialPortType::BluetoothPort => "Bluetooth".to_string(),
                serialport::SerialPortType::PciPort => "PCI".to_string(),
                serialport::SerialPortType::Unknown => "Unknown".to_string(),
            };
            PortInfo {
                name: p.port_name,
                description,
            }
        })
        .collect())
}

//! TCP connector

use super::{
    Connector, ConnectorError, Endpoint, Inbound, Link, OpenOptions, ProtocolKind, SendReport,
};
use async_trait::async_trait;
use bytes::{Bytes, BytesMut};
use std::net::SocketAddr;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;

const READ_CHUNK: usize = 4096;

/// Raw TCP client connector
#[derive(Debug, Clone, Copy, Default)]
pub struct TcpConnector;

#[async_trait]
impl Connector for TcpConnector {
    fn kind(&self) -> ProtocolKind {
        ProtocolKind::Tcp
    }

    async fn open(
        &self,
        endpoint: &Endpoint,
        options: &OpenOptions,
    ) -> Result<Box<dyn Link>, ConnectorError> {
        let Endpoint::Socket { host, port, .. } = endpoint else {
            return Err(ConnectorError::invalid_endpoint(format!(
                "TCP cannot open '{endpoint}'"
            )));
        };
        if endpoint.is_bind() {
            return Err(ConnectorError::invalid_endpoint(
                "TCP client needs a remote host; use listen mode to accept connections",
            ));
        }

        let addr = format!("{host}:{port}");
        let stream = TcpStream::connect(&addr)
            .await
            .map_err(|e| ConnectorError::from_open_io(&addr, e))?;

        Ok(Box::new(TcpLink::new(stream, addr, options.append_newline)))
    }
}

/// Connected TCP stream
pub struct TcpLink {
    stream: TcpStream,
    remote: String,
    append_newline: bool,
    buf: BytesMut,
}

impl TcpLink {
    /// Wrap a connected stream
    pub fn new(stream: TcpStream, remote: String, append_newline: bool) -> Self {
        // Lower latency for interactive traffic
        stream.set_nodelay(true).ok();
        Self {
            stream,
            remote,
            append_newline,
            buf: BytesMut::with_capacity(READ_CHUNK),
        }
    }

    /// Wrap a stream accepted by a listener
    pub fn accepted(stream: TcpStream, peer: SocketAddr) -> Self {
        Self::new(stream, peer.to_string(), false)
    }
}

#[async_trait]
impl Link for TcpLink {
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
        self.buf.reserve(READ_CHUNK);
        // read_buf is cancel safe
        let n = self
            .stream
            .read_buf(&mut self.buf)
            .await
            .map_err(ConnectorError::from_io)?;
        if n == 0 {
            return Err(ConnectorError::io(format!(
                "connection closed by {}",
                self.remote
            )));
        }
        let data: Bytes = self.buf.split().freeze();
        Ok(Inbound {
            data,
            peer: Some(self.remote.clone()),
        })
    }

    async fn close(&mut self) {
        self.stream.shutdown().await.ok();
    }

    fn remote(&self) -> String {
        self.remote.clone()
    }
}

/// Append `\n` unless the data already ends with one
pub(crate) fn frame_line(data: &[u8], append_newline: bool) -> std::borrow::Cow<'_, [u8]> {
    if append_newline && !data.ends_with(b"\n") {
        let mut framed = Vec::with_capacity(data.len() + 1);
        framed.extend_from_slice(data);
        framed.push(b'\n');
        std::borrow::Cow::Owned(framed)
    } else {
        std::borrow::Cow::Borrowed(data)
    }
}

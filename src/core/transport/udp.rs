//! UDP connector
//!
//! An endpoint with an empty, `*` or `0.0.0.0` host binds the port locally and
//! receives datagrams; replies go to the most recent sender. Any other host
//! sends datagrams to that remote from an ephemeral local port.

use super::{
    Connector, ConnectorError, Endpoint, Inbound, Link, OpenOptions, ProtocolKind, SendReport,
};
use async_trait::async_trait;
use bytes::Bytes;
use std::net::SocketAddr;
use tokio::net::UdpSocket;

/// Largest datagram accepted
pub const MAX_DATAGRAM: usize = 65_535;

/// UDP connector
#[derive(Debug, Clone, Copy, Default)]
pub struct UdpConnector;

#[async_trait]
impl Connector for UdpConnector {
    fn kind(&self) -> ProtocolKind {
        ProtocolKind::Udp
    }

    async fn open(
        &self,
        endpoint: &Endpoint,
        _options: &OpenOptions,
    ) -> Result<Box<dyn Link>, ConnectorError> {
        let Endpoint::Socket { host, port, .. } = endpoint else {
            return Err(ConnectorError::invalid_endpoint(format!(
                "UDP cannot open '{endpoint}'"
            )));
        };

        if endpoint.is_bind() {
            let addr = format!("0.0.0.0:{port}");
            let socket = UdpSocket::bind(&addr)
                .await
                .map_err(|e| ConnectorError::from_bind_io(&addr, e))?;
            tracing::debug!(%addr, "UDP bound");
            return Ok(Box::new(UdpLink::bound(socket, addr)));
        }

        let target = format!("{host}:{port}");
        let remote = tokio::net::lookup_host(&target)
            .await
            .map_err(|e| ConnectorError::from_open_io(&target, e))?
            .next()
            .ok_or_else(|| ConnectorError::connection(format!("{target} did not resolve")))?;

        let local = if remote.is_ipv6() { "[::]:0" } else { "0.0.0.0:0" };
        let socket = UdpSocket::bind(local)
            .await
            .map_err(|e| ConnectorError::from_bind_io(local, e))?;

        Ok(Box::new(UdpLink {
            socket,
            label: target,
            target: Some(remote),
            bound: false,
        }))
    }
}

/// UDP socket in bind or send mode
pub struct UdpLink {
    socket: UdpSocket,
    label: String,
    target: Option<SocketAddr>,
    bound: bool,
}

impl UdpLink {
    fn bound(socket: UdpSocket, label: String) -> Self {
        Self {
            socket,
            label,
            target: None,
            bound: true,
        }
    }
}

#[async_trait]
impl Link for UdpLink {
    async fn send(&mut self, data: &[u8]) -> Result<SendReport, ConnectorError> {
        let target = self.target.ok_or_else(|| {
            ConnectorError::io(format!("{} has not received from any peer yet", self.label))
        })?;
        let written = self
            .socket
            .send_to(data, target)
            .await
            .map_err(ConnectorError::from_io)?;
        Ok(SendReport {
            written,
            ..SendReport::default()
        })
    }

    async fn receive(&mut self) -> Result<Inbound, ConnectorError> {
        let mut buf = vec![0u8; MAX_DATAGRAM];
        let (n, peer) = self
            .socket
            .recv_from(&mut buf)
            .await
            .map_err(ConnectorError::from_io)?;
        buf.truncate(n);
        if self.bound {
            self.target = Some(peer);
        }
        Ok(Inbound {
            data: Bytes::from(buf),
            peer: Some(peer.to_string()),
        })
    }

    async fn close(&mut self) {}

    fn remote(&self) -> String {
        if self.bound {
            format!("bind {}", self.label)
        } else {
            self.label.clone()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::transport::ConnectorErrorKind;

    #[tokio::test]
    async fn test_udp_send_mode() {
        let peer = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let addr = peer.local_addr().unwrap();

        let endpoint = Endpoint::parse(ProtocolKind::Udp, &addr.to_string()).unwrap();
        let mut link = UdpConnector
            .open(&endpoint, &OpenOptions::default())
            .await
            .unwrap();
        assert_eq!(link.remote(), addr.to_string());

        let report = link.send(b"hello").await.unwrap();
        assert_eq!(report.written, 5);

        let mut buf = [0u8; 16];
        let (n, from) = peer.recv_from(&mut buf).await.unwrap();
        assert_eq!(&buf[..n], b"hello");

        peer.send_to(b"ack", from).await.unwrap();
        let inbound = link.receive().await.unwrap();
        assert_eq!(&inbound.data[..], b"ack");
    }

    #[tokio::test]
    async fn test_udp_bind_without_peer_cannot_send() {
        // Reserve an ephemeral port number
        let port = {
            let s = std::net::UdpSocket::bind("0.0.0.0:0").unwrap();
            s.local_addr().unwrap().port()
        };
        let endpoint = Endpoint::parse(ProtocolKind::Udp, &format!("*:{port}")).unwrap();
        let mut link = UdpConnector
            .open(&endpoint, &OpenOptions::default())
            .await
            .unwrap();
        assert!(link.remote().starts_with("bind "));

        let err = link.send(b"x").await.unwrap_err();
        assert_eq!(err.kind, ConnectorErrorKind::Io);
    }
}

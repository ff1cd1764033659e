//! Listen-mode monitor and live sessions
//!
//! The monitor owns every open session: outgoing client links, TCP and UDP
//! listeners, and the connections a TCP listener accepts. Each session is
//! driven by its own task which forwards inbound bytes as [`MonitorEvent`]s.
//!
//! The session table is the only shared state. Its lock is taken for
//! insert, remove and lookup and never held across an `.await`.

use super::device::Device;
use super::session::{SessionId, SessionInfo, SessionRole, SessionState};
use super::transport::{
    ConnectionHandle, ConnectorError, ConnectorErrorKind, ConnectorTable, HttpOptions,
    OpenOptions, ProtocolKind, SendReport, TcpLink, MAX_DATAGRAM,
};
use crate::{Error, Result};
use bytes::Bytes;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::fmt;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::{TcpListener, UdpSocket};
use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;

/// Monitor settings
#[derive(Debug, Clone)]
pub struct MonitorConfig {
    /// Longest a session task waits on a read before yielding the link to
    /// pending sends
    pub poll_interval: Duration,
    /// Events buffered per subscriber before the slowest one lags
    pub event_capacity: usize,
    /// Open timeout for device sessions and one-shot HTTP exchanges
    pub connect_timeout: Duration,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_millis(50),
            event_capacity: 1024,
            connect_timeout: Duration::from_secs(3),
        }
    }
}

/// Something that happened on a session
#[derive(Debug, Clone, PartialEq)]
pub enum MonitorEvent {
    /// Session entered a new state
    StateChanged {
        /// Session
        session: SessionId,
        /// New state
        state: SessionState,
    },
    /// Bytes arrived
    Data {
        /// Session that received them
        session: SessionId,
        /// Sender address, when known
        peer: Option<String>,
        /// Payload, uninterpreted
        bytes: Bytes,
    },
    /// A failure not tied to a caller's request
    Error {
        /// Session, if the failure belongs to one
        session: Option<SessionId>,
        /// Message
        message: String,
    },
}

/// Where `send_to` delivers
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SendTarget {
    /// A session by id
    Session(SessionId),
    /// A peer address such as `192.168.1.20:51000`
    Peer(String),
}

#[derive(Clone)]
enum SessionIo {
    Link(ConnectionHandle),
    TcpListener(CancellationToken),
    UdpServer {
        socket: Arc<UdpSocket>,
        cancel: CancellationToken,
    },
}

struct Entry {
    info: SessionInfo,
    io: SessionIo,
    last_peer: Option<SocketAddr>,
}

impl Entry {
    fn new(info: SessionInfo, io: SessionIo) -> Self {
        Self {
            info,
            io,
            last_peer: None,
        }
    }
}

enum Route {
    Link(ConnectionHandle),
    Datagram(Arc<UdpSocket>, SocketAddr),
}

struct Shared {
    table: ConnectorTable,
    config: MonitorConfig,
    sessions: Mutex<HashMap<SessionId, Entry>>,
    events: broadcast::Sender<MonitorEvent>,
    shutdown: CancellationToken,
}

/// Session manager and listener service
#[derive(Clone)]
pub struct Monitor {
    shared: Arc<Shared>,
}

impl fmt::Debug for Monitor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Monitor")
            .field("sessions", &self.shared.sessions.lock().len())
            .field("config", &self.shared.config)
            .finish()
    }
}

impl Monitor {
    /// Create a monitor using `table` for outgoing links
    pub fn new(table: ConnectorTable, config: MonitorConfig) -> Self {
        let (events, _) = broadcast::channel(config.event_capacity.max(1));
        Self {
            shared: Arc::new(Shared {
                table,
                config,
                sessions: Mutex::new(HashMap::new()),
                events,
                shutdown: CancellationToken::new(),
            }),
        }
    }

    /// Connector table used for outgoing links
    pub fn table(&self) -> &ConnectorTable {
        &self.shared.table
    }

    /// Monitor settings
    pub fn config(&self) -> &MonitorConfig {
        &self.shared.config
    }

    /// Subscribe to session events
    pub fn subscribe(&self) -> broadcast::Receiver<MonitorEvent> {
        self.shared.events.subscribe()
    }

    fn emit(&self, event: MonitorEvent) {
        // No subscribers is fine
        let _ = self.shared.events.send(event);
    }

    fn emit_state(&self, session: SessionId, state: SessionState) {
        self.emit(MonitorEvent::StateChanged { session, state });
    }

    /// Listen on all interfaces; port 0 picks a free port (see
    /// [`SessionInfo::local`])
    ///
    /// # Errors
    ///
    /// `Bind` when the port is taken, `InvalidEndpoint` for kinds other
    /// than TCP and UDP
    pub async fn start_listen(&self, kind: ProtocolKind, port: u16) -> Result<SessionId> {
        let addr = format!("0.0.0.0:{port}");
        let mut info = SessionInfo::new(kind, SessionRole::Server, SessionState::Listening);
        let id = info.id;
        let cancel = self.shared.shutdown.child_token();

        match kind {
            ProtocolKind::Tcp => {
                let listener = TcpListener::bind(&addr)
                    .await
                    .map_err(|e| ConnectorError::from_bind_io(&addr, e))?;
                info.local = Some(local_label(listener.local_addr(), &addr));
                self.register(info, SessionIo::TcpListener(cancel.clone()));
                tokio::spawn(self.clone().accept_loop(id, listener, cancel));
            }
            ProtocolKind::Udp => {
                let socket = UdpSocket::bind(&addr)
                    .await
                    .map_err(|e| ConnectorError::from_bind_io(&addr, e))?;
                info.local = Some(local_label(socket.local_addr(), &addr));
                let socket = Arc::new(socket);
                self.register(
                    info,
                    SessionIo::UdpServer {
                        socket: socket.clone(),
                        cancel: cancel.clone(),
                    },
                );
                tokio::spawn(self.clone().datagram_loop(id, socket, cancel));
            }
            other => {
                return Err(ConnectorError::invalid_endpoint(format!(
                    "{other} cannot listen, only TCP and UDP can"
                ))
                .into())
            }
        }

        tracing::info!(session = %id, %kind, port, "listening");
        Ok(id)
    }

    /// Stop a listener and close every connection it accepted
    ///
    /// # Errors
    ///
    /// `NotFound` for unknown ids, `Validation` when the session is not a
    /// listener
    pub async fn stop_listen(&self, id: SessionId) -> Result<()> {
        let removed = self.detach(id, true)?;
        self.teardown(removed).await;
        Ok(())
    }

    /// Open a client session
    ///
    /// # Errors
    ///
    /// The connector error when the open fails; an `Error` event is also
    /// published
    pub async fn open(
        &self,
        kind: ProtocolKind,
        endpoint: &str,
        options: &OpenOptions,
    ) -> Result<SessionId> {
        self.open_tagged(kind, endpoint, options, None).await
    }

    /// Open a client session to a device, tagging it with the device id
    ///
    /// # Errors
    ///
    /// `EndpointEmpty` when the device has no endpoint, otherwise as
    /// [`Monitor::open`]
    pub async fn open_for_device(&self, device: &Device) -> Result<SessionId> {
        if !device.has_endpoint() {
            return Err(ConnectorError::endpoint_empty().into());
        }
        let options = device
            .open_options()?
            .connect_timeout(self.shared.config.connect_timeout);
        self.open_tagged(
            device.protocol_kind,
            &device.endpoint,
            &options,
            Some(device.id.clone()),
        )
        .await
    }

    async fn open_tagged(
        &self,
        kind: ProtocolKind,
        endpoint: &str,
        options: &OpenOptions,
        device_id: Option<String>,
    ) -> Result<SessionId> {
        let handle = match self.shared.table.open(kind, endpoint, options).await {
            Ok(handle) => handle,
            Err(e) => {
                tracing::warn!(%kind, endpoint, error = %e, "open failed");
                self.emit(MonitorEvent::Error {
                    session: None,
                    message: e.to_string(),
                });
                return Err(e.into());
            }
        };

        let mut info = SessionInfo::new(kind, SessionRole::Client, SessionState::Connected);
        info.remote = Some(handle.remote().to_string());
        info.device_id = device_id;
        let id = info.id;
        self.register(info, SessionIo::Link(handle.clone()));
        tokio::spawn(self.clone().pump(id, handle));

        tracing::info!(session = %id, %kind, endpoint, "session opened");
        Ok(id)
    }

    /// One request/response exchange over HTTP
    ///
    /// # Errors
    ///
    /// Connector errors from the open or the request
    pub async fn http_once(
        &self,
        endpoint: &str,
        options: HttpOptions,
        body: &[u8],
    ) -> Result<SendReport> {
        let options = OpenOptions::default()
            .connect_timeout(self.shared.config.connect_timeout)
            .http(options);
        let handle = self
            .shared
            .table
            .open(ProtocolKind::Http, endpoint, &options)
            .await?;
        let report = handle.send(body).await;
        handle.close().await;

        let report = report?;
        tracing::debug!(endpoint, status = ?report.status, "http exchange finished");
        Ok(report)
    }

    /// Send bytes to a session or peer, returning the bytes written
    ///
    /// A UDP listener replies to the last sender it heard from.
    ///
    /// # Errors
    ///
    /// `NotFound` for unknown targets, `Validation` when addressing a TCP
    /// listener, `Io` when a UDP listener has no peer yet
    pub async fn send_to(&self, target: &SendTarget, data: &[u8]) -> Result<usize> {
        let route = self.route(target)?;
        match route {
            Route::Link(handle) => Ok(handle.send(data).await?.written),
            Route::Datagram(socket, peer) => Ok(socket
                .send_to(data, peer)
                .await
                .map_err(ConnectorError::from_io)?),
        }
    }

    fn route(&self, target: &SendTarget) -> Result<Route> {
        let sessions = self.shared.sessions.lock();
        match target {
            SendTarget::Session(id) => {
                let entry = sessions
                    .get(id)
                    .ok_or_else(|| Error::not_found("session", id.to_string()))?;
                match &entry.io {
                    SessionIo::Link(handle) => Ok(Route::Link(handle.clone())),
                    SessionIo::UdpServer { socket, .. } => {
                        let peer = entry.last_peer.ok_or_else(|| {
                            ConnectorError::io("no datagram received yet, peer unknown")
                        })?;
                        Ok(Route::Datagram(socket.clone(), peer))
                    }
                    SessionIo::TcpListener(_) => Err(Error::validation(format!(
                        "session {id} is a listener, address one of its connections"
                    ))),
                }
            }
            SendTarget::Peer(addr) => {
                let addr = addr.trim();
                let linked = sessions.values().find_map(|entry| match &entry.io {
                    SessionIo::Link(handle) if entry.info.remote.as_deref() == Some(addr) => {
                        Some(handle.clone())
                    }
                    _ => None,
                });
                if let Some(handle) = linked {
                    return Ok(Route::Link(handle));
                }

                let peer: SocketAddr = addr
                    .parse()
                    .map_err(|_| Error::not_found("peer", addr.to_string()))?;
                let mut servers: Vec<&Entry> = sessions
                    .values()
                    .filter(|entry| matches!(entry.io, SessionIo::UdpServer { .. }))
                    .collect();
                servers.sort_by_key(|entry| entry.last_peer != Some(peer));
                match servers.first().map(|entry| &entry.io) {
                    Some(SessionIo::UdpServer { socket, .. }) => {
                        Ok(Route::Datagram(socket.clone(), peer))
                    }
                    _ => Err(Error::not_found("peer", addr.to_string())),
                }
            }
        }
    }

    /// Close a session; closing a listener also closes its connections
    ///
    /// # Errors
    ///
    /// `NotFound` for unknown ids
    pub async fn close(&self, id: SessionId) -> Result<()> {
        let removed = self.detach(id, false)?;
        self.teardown(removed).await;
        Ok(())
    }

    /// Snapshot of every session, oldest first
    pub fn sessions(&self) -> Vec<SessionInfo> {
        let mut list: Vec<SessionInfo> = self
            .shared
            .sessions
            .lock()
            .values()
            .map(|entry| entry.info.clone())
            .collect();
        list.sort_by_key(|info| info.opened_at);
        list
    }

    /// Snapshot of one session
    pub fn session(&self, id: SessionId) -> Option<SessionInfo> {
        self.shared
            .sessions
            .lock()
            .get(&id)
            .map(|entry| entry.info.clone())
    }

    /// Sessions opened for a device
    pub fn sessions_for_device(&self, device_id: &str) -> Vec<SessionId> {
        self.shared
            .sessions
            .lock()
            .values()
            .filter(|entry| entry.info.device_id.as_deref() == Some(device_id))
            .map(|entry| entry.info.id)
            .collect()
    }

    /// Close every session and stop every listener
    pub async fn shutdown(&self) {
        self.shared.shutdown.cancel();
        let removed: Vec<(SessionId, SessionIo)> = self
            .shared
            .sessions
            .lock()
            .drain()
            .map(|(id, entry)| (id, entry.io))
            .collect();
        let count = removed.len();
        self.teardown(removed).await;
        tracing::info!(closed = count, "monitor shut down");
    }

    fn register(&self, info: SessionInfo, io: SessionIo) {
        let id = info.id;
        let state = info.state;
        self.shared.sessions.lock().insert(id, Entry::new(info, io));
        self.emit_state(id, state);
    }

    /// Remove a session and its children from the table
    fn detach(&self, id: SessionId, listener_only: bool) -> Result<Vec<(SessionId, SessionIo)>> {
        let mut sessions = self.shared.sessions.lock();
        let entry = sessions
            .get(&id)
            .ok_or_else(|| Error::not_found("session", id.to_string()))?;
        if listener_only && !entry.info.is_listener() {
            return Err(Error::validation(format!("session {id} is not a listener")));
        }

        let children: Vec<SessionId> = sessions
            .values()
            .filter(|e| e.info.parent == Some(id))
            .map(|e| e.info.id)
            .collect();

        let mut removed = Vec::with_capacity(children.len() + 1);
        for child in children {
            if let Some(e) = sessions.remove(&child) {
                removed.push((child, e.io));
            }
        }
        if let Some(e) = sessions.remove(&id) {
            removed.push((id, e.io));
        }
        Ok(removed)
    }

    async fn teardown(&self, removed: Vec<(SessionId, SessionIo)>) {
        for (id, io) in removed {
            match io {
                SessionIo::Link(handle) => handle.close().await,
                SessionIo::TcpListener(cancel) | SessionIo::UdpServer { cancel, .. } => {
                    cancel.cancel();
                }
            }
            tracing::info!(session = %id, "session closed");
            self.emit_state(id, SessionState::Disconnected);
        }
    }

    async fn accept_loop(self, id: SessionId, listener: TcpListener, cancel: CancellationToken) {
        loop {
            let (stream, peer) = tokio::select! {
                _ = cancel.cancelled() => break,
                accepted = listener.accept() => match accepted {
                    Ok(pair) => pair,
                    Err(e) => {
                        tracing::warn!(session = %id, error = %e, "accept failed");
                        self.emit(MonitorEvent::Error { session: Some(id), message: e.to_string() });
                        tokio::time::sleep(self.shared.config.poll_interval).await;
                        continue;
                    }
                },
            };

            let handle = ConnectionHandle::new(
                ProtocolKind::Tcp,
                Box::new(TcpLink::accepted(stream, peer)),
            );
            let mut info = SessionInfo::new(ProtocolKind::Tcp, SessionRole::Server, SessionState::Connected);
            info.parent = Some(id);
            info.remote = Some(peer.to_string());
            let child = info.id;

            let attached = {
                let mut sessions = self.shared.sessions.lock();
                if sessions.contains_key(&id) {
                    sessions.insert(child, Entry::new(info, SessionIo::Link(handle.clone())));
                    true
                } else {
                    false
                }
            };
            if !attached {
                // Listener stopped while this connection was being accepted
                handle.close().await;
                break;
            }

            tracing::info!(listener = %id, session = %child, %peer, "connection accepted");
            self.emit_state(child, SessionState::Connected);
            tokio::spawn(self.clone().pump(child, handle));
        }
        tracing::debug!(session = %id, "accept loop stopped");
    }

    async fn datagram_loop(self, id: SessionId, socket: Arc<UdpSocket>, cancel: CancellationToken) {
        let mut buf = vec![0u8; MAX_DATAGRAM];
        loop {
            let (len, peer) = tokio::select! {
                _ = cancel.cancelled() => break,
                received = socket.recv_from(&mut buf) => match received {
                    Ok(pair) => pair,
                    Err(e) => {
                        // ICMP port unreachable from an earlier reply shows up here
                        tracing::debug!(session = %id, error = %e, "datagram receive failed");
                        self.emit(MonitorEvent::Error { session: Some(id), message: e.to_string() });
                        tokio::time::sleep(self.shared.config.poll_interval).await;
                        continue;
                    }
                },
            };

            let first_peer = {
                let mut sessions = self.shared.sessions.lock();
                let Some(entry) = sessions.get_mut(&id) else {
                    break;
                };
                entry.last_peer = Some(peer);
                entry.info.remote = Some(peer.to_string());
                let first = entry.info.state != SessionState::Connected;
                entry.info.state = SessionState::Connected;
                first
            };
            if first_peer {
                self.emit_state(id, SessionState::Connected);
            }

            self.emit(MonitorEvent::Data {
                session: id,
                peer: Some(peer.to_string()),
                bytes: Bytes::copy_from_slice(&buf[..len]),
            });
        }
        tracing::debug!(session = %id, "datagram loop stopped");
    }

    /// Forward inbound data of one link until it closes or fails
    async fn pump(self, id: SessionId, handle: ConnectionHandle) {
        let poll = self.shared.config.poll_interval;
        let failure = loop {
            match handle.receive(poll).await {
                Ok(inbound) => {
                    let peer = inbound.peer.or_else(|| Some(handle.remote().to_string()));
                    self.emit(MonitorEvent::Data {
                        session: id,
                        peer,
                        bytes: inbound.data,
                    });
                }
                Err(e) if e.kind == ConnectorErrorKind::Timeout => {}
                Err(_) if handle.is_closed() => break None,
                Err(e) => break Some(e),
            }
        };

        let Some(err) = failure else {
            return;
        };
        let owned = self.shared.sessions.lock().remove(&id).is_some();
        handle.close().await;
        if !owned {
            return;
        }

        if err.kind == ConnectorErrorKind::Io {
            tracing::info!(session = %id, reason = %err, "peer disconnected");
            self.emit_state(id, SessionState::Disconnected);
        } else {
            tracing::warn!(session = %id, error = %err, "session failed");
            self.emit(MonitorEvent::Error {
                session: Some(id),
                message: err.to_string(),
            });
            self.emit_state(id, SessionState::Error);
        }
    }
}

fn local_label(addr: std::io::Result<SocketAddr>, fallback: &str) -> String {
    addr.map(|a| a.to_string())
        .unwrap_or_else(|_| fallback.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpStream;

    fn monitor() -> Monitor {
        Monitor::new(
            ConnectorTable::standard(),
            MonitorConfig {
                poll_interval: Duration::from_millis(20),
                ..MonitorConfig::default()
            },
        )
    }

    async fn next_event<F>(rx: &mut broadcast::Receiver<MonitorEvent>, mut pred: F) -> MonitorEvent
    where
        F: FnMut(&MonitorEvent) -> bool,
    {
        tokio::time::timeout(Duration::from_secs(5), async {
            loop {
                let event = rx.recv().await.unwrap();
                if pred(&event) {
                    return event;
                }
            }
        })
        .await
        .expect("event did not arrive")
    }

    fn listen_port(monitor: &Monitor, id: SessionId) -> u16 {
        let local = monitor.session(id).unwrap().local.unwrap();
        local.parse::<SocketAddr>().unwrap().port()
    }

    #[tokio::test]
    async fn test_tcp_listener_fans_out_and_echoes() {
        let monitor = monitor();
        let mut events = monitor.subscribe();
        let listener = monitor.start_listen(ProtocolKind::Tcp, 0).await.unwrap();
        assert_eq!(monitor.session(listener).unwrap().state, SessionState::Listening);
        let port = listen_port(&monitor, listener);

        let mut client = TcpStream::connect(("127.0.0.1", port)).await.unwrap();
        client.write_all(b"ping").await.unwrap();

        let mut received = Vec::new();
        let mut child = None;
        while received.len() < 4 {
            if let MonitorEvent::Data { session, bytes, .. } =
                next_event(&mut events, |e| matches!(e, MonitorEvent::Data { .. })).await
            {
                child = Some(session);
                received.extend_from_slice(&bytes);
            }
        }
        assert_eq!(received, b"ping");

        let child = child.unwrap();
        let info = monitor.session(child).unwrap();
        assert_eq!(info.parent, Some(listener));
        assert_eq!(info.state, SessionState::Connected);

        let written = monitor.send_to(&SendTarget::Session(child), b"pong").await.unwrap();
        assert_eq!(written, 4);
        let mut buf = [0u8; 4];
        client.read_exact(&mut buf).await.unwrap();
        assert_eq!(&buf, b"pong");

        let peer = client.local_addr().unwrap().to_string();
        monitor.send_to(&SendTarget::Peer(peer), b"again").await.unwrap();
        let mut buf = [0u8; 5];
        client.read_exact(&mut buf).await.unwrap();
        assert_eq!(&buf, b"again");

        monitor.stop_listen(listener).await.unwrap();
        assert!(monitor.sessions().is_empty());

        let mut rest = Vec::new();
        let read = tokio::time::timeout(Duration::from_secs(5), client.read_to_end(&mut rest)).await;
        assert!(matches!(read, Ok(Ok(0))));
    }

    #[tokio::test]
    async fn test_peer_disconnect_removes_child() {
        let monitor = monitor();
        let mut events = monitor.subscribe();
        let listener = monitor.start_listen(ProtocolKind::Tcp, 0).await.unwrap();
        let port = listen_port(&monitor, listener);

        let client = TcpStream::connect(("127.0.0.1", port)).await.unwrap();
        let child = match next_event(&mut events, |e| {
            matches!(e, MonitorEvent::StateChanged { state: SessionState::Connected, .. })
        })
        .await
        {
            MonitorEvent::StateChanged { session, .. } => session,
            other => panic!("unexpected {other:?}"),
        };

        drop(client);
        next_event(&mut events, |e| {
            *e == MonitorEvent::StateChanged {
                session: child,
                state: SessionState::Disconnected,
            }
        })
        .await;
        assert!(monitor.session(child).is_none());
        assert!(monitor.session(listener).is_some());
    }

    #[tokio::test]
    async fn test_listen_on_taken_port_is_bind_error() {
        let taken = std::net::TcpListener::bind("0.0.0.0:0").unwrap();
        let port = taken.local_addr().unwrap().port();

        let err = monitor().start_listen(ProtocolKind::Tcp, port).await.unwrap_err();
        assert_eq!(err.connector_kind(), Some(ConnectorErrorKind::Bind));
    }

    #[tokio::test]
    async fn test_only_tcp_and_udp_listen() {
        let err = monitor().start_listen(ProtocolKind::Serial, 0).await.unwrap_err();
        assert_eq!(err.connector_kind(), Some(ConnectorErrorKind::InvalidEndpoint));
    }

    #[tokio::test]
    async fn test_udp_listener_replies_to_last_sender() {
        let monitor = monitor();
        let mut events = monitor.subscribe();
        let server = monitor.start_listen(ProtocolKind::Udp, 0).await.unwrap();
        let port = listen_port(&monitor, server);

        let early = monitor.send_to(&SendTarget::Session(server), b"x").await;
        assert_eq!(early.unwrap_err().connector_kind(), Some(ConnectorErrorKind::Io));

        let client = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        client.send_to(b"hi", ("127.0.0.1", port)).await.unwrap();

        let event = next_event(&mut events, |e| matches!(e, MonitorEvent::Data { .. })).await;
        let client_addr = client.local_addr().unwrap().to_string();
        assert_eq!(
            event,
            MonitorEvent::Data {
                session: server,
                peer: Some(client_addr.clone()),
                bytes: Bytes::from_static(b"hi"),
            }
        );
        let info = monitor.session(server).unwrap();
        assert_eq!(info.state, SessionState::Connected);
        assert_eq!(info.remote.as_deref(), Some(client_addr.as_str()));

        monitor.send_to(&SendTarget::Session(server), b"ok").await.unwrap();
        let mut buf = [0u8; 16];
        let (len, _) = tokio::time::timeout(Duration::from_secs(5), client.recv_from(&mut buf))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(&buf[..len], b"ok");

        monitor.close(server).await.unwrap();
        assert!(monitor.session(server).is_none());
    }

    #[tokio::test]
    async fn test_client_session_receives_and_closes() {
        let server = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = server.local_addr().unwrap();
        tokio::spawn(async move {
            let (mut stream, _) = server.accept().await.unwrap();
            stream.write_all(b"hello").await.unwrap();
            let mut sink = Vec::new();
            let _ = stream.read_to_end(&mut sink).await;
        });

        let monitor = monitor();
        let mut events = monitor.subscribe();
        let id = monitor
            .open(ProtocolKind::Tcp, &addr.to_string(), &OpenOptions::default())
            .await
            .unwrap();
        assert_eq!(monitor.session(id).unwrap().role, SessionRole::Client);

        let event = next_event(&mut events, |e| matches!(e, MonitorEvent::Data { .. })).await;
        assert!(matches!(event, MonitorEvent::Data { session, ref bytes, .. } if session == id && bytes.as_ref() == b"hello"));

        monitor.close(id).await.unwrap();
        next_event(&mut events, |e| {
            *e == MonitorEvent::StateChanged {
                session: id,
                state: SessionState::Disconnected,
            }
        })
        .await;
        assert!(matches!(monitor.close(id).await, Err(Error::NotFound { .. })));
    }

    #[tokio::test]
    async fn test_failed_open_publishes_error() {
        let monitor = monitor();
        let mut events = monitor.subscribe();
        let err = monitor
            .open(ProtocolKind::Mqtt, "broker.local:1883", &OpenOptions::default())
            .await
            .unwrap_err();
        assert_eq!(err.connector_kind(), Some(ConnectorErrorKind::NoConnector));
        next_event(&mut events, |e| matches!(e, MonitorEvent::Error { session: None, .. })).await;
        assert!(monitor.sessions().is_empty());
    }

    #[tokio::test]
    async fn test_device_without_endpoint_is_rejected() {
        let device = Device::new("d1", "Lamp", ProtocolKind::Tcp);
        let err = monitor().open_for_device(&device).await.unwrap_err();
        assert_eq!(err.connector_kind(), Some(ConnectorErrorKind::EndpointEmpty));
    }

    #[tokio::test]
    async fn test_shutdown_closes_everything() {
        let server = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = server.local_addr().unwrap();
        let monitor = monitor();

        let device = Device::new("d1", "Lamp", ProtocolKind::Tcp).endpoint(addr.to_string());
        let client = monitor.open_for_device(&device).await.unwrap();
        let _accepted = server.accept().await.unwrap();
        monitor.start_listen(ProtocolKind::Udp, 0).await.unwrap();

        assert_eq!(monitor.sessions_for_device("d1"), vec![client]);
        assert_eq!(monitor.sessions().len(), 2);

        monitor.shutdown().await;
        assert!(monitor.sessions().is_empty());
    }
}

use crate::gateway_in;
use crosscontrol_core::{
    ConnectorErrorKind, ConnectorTable, MonitorEvent, OpenOptions, ProtocolKind, SendTarget,
    SessionRole, SessionState,
};
use std::net::SocketAddr;
use std::time::Duration;
use tempfile::tempdir;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::broadcast;

async fn next_data(events: &mut broadcast::Receiver<MonitorEvent>) -> (crosscontrol_core::SessionId, Vec<u8>) {
    loop {
        let event = tokio::time::timeout(Duration::from_secs(5), events.recv())
            .await
            .expect("no event within 5s")
            .unwrap();
        if let MonitorEvent::Data { session, bytes, .. } = event {
            return (session, bytes.to_vec());
        }
    }
}

#[tokio::test]
async fn test_tcp_listener_echo_over_ephemeral_port() {
    let dir = tempdir().unwrap();
    let gw = gateway_in(dir.path());
    let monitor = gw.monitor();
    let mut events = monitor.subscribe();

    let listener = monitor.start_listen(ProtocolKind::Tcp, 0).await.unwrap();
    let local: SocketAddr = monitor.session(listener).unwrap().local.unwrap().parse().unwrap();

    let mut client = TcpStream::connect(("127.0.0.1", local.port())).await.unwrap();
    client.write_all(b"hello").await.unwrap();

    let (child, data) = next_data(&mut events).await;
    assert_eq!(data, b"hello");
    let info = monitor.session(child).unwrap();
    assert_eq!(info.parent, Some(listener));
    assert_eq!(info.role, SessionRole::Server);
    assert_eq!(info.state, SessionState::Connected);

    assert_eq!(monitor.send_to(&SendTarget::Session(child), b"olleh").await.unwrap(), 5);
    let mut buf = [0u8; 5];
    client.read_exact(&mut buf).await.unwrap();
    assert_eq!(&buf, b"olleh");

    monitor.stop_listen(listener).await.unwrap();
    assert!(monitor.sessions().is_empty());
    let mut rest = Vec::new();
    let read = tokio::time::timeout(Duration::from_secs(5), client.read_to_end(&mut rest))
        .await
        .unwrap();
    assert!(read.is_err() || rest.is_empty());
}

#[tokio::test]
async fn test_udp_listener_answers_last_sender() {
    let dir = tempdir().unwrap();
    let gw = gateway_in(dir.path());
    let monitor = gw.monitor();
    let mut events = monitor.subscribe();

    let listener = monitor.start_listen(ProtocolKind::Udp, 0).await.unwrap();
    let local: SocketAddr = monitor.session(listener).unwrap().local.unwrap().parse().unwrap();

    let peer = tokio::net::UdpSocket::bind("127.0.0.1:0").await.unwrap();
    peer.send_to(b"ping", ("127.0.0.1", local.port())).await.unwrap();

    let (session, data) = next_data(&mut events).await;
    assert_eq!(session, listener);
    assert_eq!(data, b"ping");

    monitor.send_to(&SendTarget::Session(listener), b"pong").await.unwrap();
    let mut buf = [0u8; 16];
    let (n, _) = tokio::time::timeout(Duration::from_secs(5), peer.recv_from(&mut buf))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(&buf[..n], b"pong");

    gw.shutdown().await;
    assert!(monitor.sessions().is_empty());
}

#[tokio::test]
async fn test_close_cancels_pending_receive() {
    let server = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = server.local_addr().unwrap();
    let accept = tokio::spawn(async move { server.accept().await.unwrap().0 });

    let handle = ConnectorTable::standard()
        .open(ProtocolKind::Tcp, &addr.to_string(), &OpenOptions::default())
        .await
        .unwrap();
    let _peer = accept.await.unwrap();

    let waiting = handle.clone();
    let pending = tokio::spawn(async move { waiting.receive(Duration::from_secs(30)).await });
    tokio::time::sleep(Duration::from_millis(50)).await;

    handle.close().await;
    let err = tokio::time::timeout(Duration::from_secs(5), pending)
        .await
        .unwrap()
        .unwrap()
        .unwrap_err();
    assert_eq!(err.kind, ConnectorErrorKind::Cancelled);
    assert!(handle.is_closed());

    let err = handle.send(b"late").await.unwrap_err();
    assert_eq!(err.kind, ConnectorErrorKind::Io);
}

#[test]
fn test_mqtt_has_no_connector() {
    let table = ConnectorTable::standard();
    let err = tokio_test::block_on(table.open(ProtocolKind::Mqtt, "broker:1883", &OpenOptions::default()))
        .unwrap_err();
    assert_eq!(err.kind, ConnectorErrorKind::NoConnector);
}

use crate::gateway_in;
use crosscontrol_core::core::device::{ConflictPolicy, Reachability};
use crosscontrol_core::{ConnectorErrorKind, Device, Error, ImportOptions, InterchangeFormat, ProtocolKind};
use tempfile::tempdir;
use tokio::net::TcpListener;

/// A loopback port nothing listens on
fn refused_port() -> u16 {
    let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    listener.local_addr().unwrap().port()
}

#[tokio::test]
async fn test_empty_endpoint_device_fails_test_and_open() {
    let dir = tempdir().unwrap();
    let gw = gateway_in(dir.path());
    gw.devices()
        .add(&Device::new("blank", "Unwired sensor", ProtocolKind::Tcp))
        .unwrap();

    let result = gw.test_device("blank").await.unwrap();
    assert!(!result.is_success());
    assert_eq!(result.error_kind(), Some(ConnectorErrorKind::EndpointEmpty));

    let device = gw.get_device("blank").unwrap();
    assert_eq!(device.reachability, Reachability::Fail);
    assert!(device.last_seen.is_none());

    match gw.send_to_device("blank", b"x").await {
        Err(Error::Connector(e)) => assert_eq!(e.kind, ConnectorErrorKind::EndpointEmpty),
        other => panic!("expected EndpointEmpty, got {other:?}"),
    }
    assert!(gw.monitor().sessions().is_empty());
}

#[tokio::test]
async fn test_all_devices_counts_and_records() {
    let server = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let live = server.local_addr().unwrap();
    tokio::spawn(async move {
        while let Ok((stream, _)) = server.accept().await {
            drop(stream);
        }
    });

    let dir = tempdir().unwrap();
    let gw = gateway_in(dir.path());
    let devices = gw.devices();
    devices
        .add(&Device::new("up", "Live", ProtocolKind::Tcp).endpoint(live.to_string()))
        .unwrap();
    devices
        .add(&Device::new("down", "Refused", ProtocolKind::Tcp).endpoint(format!("127.0.0.1:{}", refused_port())))
        .unwrap();
    devices.add(&Device::new("blank", "Blank", ProtocolKind::Udp)).unwrap();

    let summary = gw.test_all_devices().await.unwrap();
    assert_eq!(summary.total, 3);
    assert_eq!(summary.success, 1);
    assert_eq!(summary.fail, 2);

    let up = gw.get_device("up").unwrap();
    assert_eq!(up.reachability, Reachability::Success);
    assert!(up.last_seen.is_some());
    assert_eq!(gw.get_device("down").unwrap().reachability, Reachability::Fail);
    assert_eq!(gw.get_device("blank").unwrap().reachability, Reachability::Fail);
}

#[tokio::test]
async fn test_export_import_round_trip_with_auto_connect() {
    let dir = tempdir().unwrap();
    let source = gateway_in(&dir.path().join("source"));
    source
        .devices()
        .add(
            &Device::new("relay-1", "Relay, \"east\" wall", ProtocolKind::Tcp)
                .endpoint(format!("127.0.0.1:{}", refused_port()))
                .owned_by("ops", "plant-a"),
        )
        .unwrap();
    source
        .devices()
        .add(&Device::new("probe-2", "Probe", ProtocolKind::Udp))
        .unwrap();

    let csv = dir.path().join("devices.csv");
    let ndjson = dir.path().join("devices.ndjson");
    assert_eq!(source.devices().export(&csv, InterchangeFormat::Csv).unwrap(), 2);
    assert_eq!(source.devices().export(&ndjson, InterchangeFormat::Ndjson).unwrap(), 2);

    let target = gateway_in(&dir.path().join("target"));
    let report = target
        .import_devices(
            &csv,
            InterchangeFormat::Csv,
            &ImportOptions {
                auto_connect: true,
                on_conflict: ConflictPolicy::RegenerateId,
            },
        )
        .await
        .unwrap();
    assert_eq!(report.imported_count, 2);
    assert!(report.per_record_errors.is_empty());
    // Only the device with an endpoint is dialled, and nothing answers
    assert_eq!(report.connect_errors.len(), 1);
    assert_eq!(report.connect_errors[0].device_id.as_deref(), Some("relay-1"));
    assert!(target.monitor().sessions().is_empty());

    let relay = target.get_device("relay-1").unwrap();
    assert_eq!(relay.name, "Relay, \"east\" wall");
    assert_eq!(relay.owner, "ops");
    assert_eq!(relay.group, "plant-a");

    // Second import of the same ids: skip keeps the count, regenerate adds copies
    let skipped = target
        .import_devices(
            &ndjson,
            InterchangeFormat::Ndjson,
            &ImportOptions {
                auto_connect: false,
                on_conflict: ConflictPolicy::Skip,
            },
        )
        .await
        .unwrap();
    assert_eq!(skipped.imported_count, 0);
    assert_eq!(skipped.skipped_count, 2);

    let copied = target
        .import_devices(&ndjson, InterchangeFormat::Ndjson, &ImportOptions::default())
        .await
        .unwrap();
    assert_eq!(copied.imported_count, 2);
    assert!(copied.imported_ids.iter().all(|id| id != "relay-1" && id != "probe-2"));
    assert_eq!(target.list_devices().unwrap().len(), 4);
}

#[tokio::test]
async fn test_bad_records_do_not_stop_the_batch() {
    let dir = tempdir().unwrap();
    let file = dir.path().join("mixed.csv");
    std::fs::write(
        &file,
        "id,name,endpoint,protocolKind\n\
         a,Alpha,10.0.0.1:80,tcp\n\
         b,Beta,10.0.0.2:80,carrier-pigeon\n\
         c,,10.0.0.3:80,udp\n",
    )
    .unwrap();

    let gw = gateway_in(dir.path());
    let report = gw
        .import_devices(&file, InterchangeFormat::Csv, &ImportOptions::default())
        .await
        .unwrap();
    assert_eq!(report.imported_count, 1);
    assert_eq!(report.per_record_errors.len(), 2);
    assert_eq!(report.per_record_errors[0].record, 2);
    assert_eq!(gw.get_device("a").unwrap().endpoint, "10.0.0.1:80");
}

use crosscontrol_core::{ActionStore, Error, ProtocolKind, Store};
use serde_json::json;
use tempfile::tempdir;
use tokio_test::{assert_err, assert_ok};

#[test]
fn test_action_lifecycle_survives_reopen() {
    let dir = tempdir().unwrap();
    let db = dir.path().join("actions.db");

    let id = {
        let actions = ActionStore::new(Store::open(&db).unwrap());
        let id = actions
            .save(
                "Relay on",
                ProtocolKind::Http,
                &json!({"method": "POST", "url": "http://10.0.0.9/relay", "body": {"on": true}}),
            )
            .unwrap();
        actions
            .save("Poll", ProtocolKind::Tcp, &json!({"host": "10.0.0.9", "port": 502, "body": "?"}))
            .unwrap();
        assert_ok!(actions.rename(&id, "Relay 1 on"));
        id
    };

    let actions = ActionStore::new(Store::open(&db).unwrap());
    let action = actions.get(&id).unwrap();
    assert_eq!(action.name, "Relay 1 on");
    assert_eq!(action.protocol_kind, ProtocolKind::Http);
    assert_eq!(actions.list(None).unwrap().len(), 2);
    assert_eq!(actions.list(Some(ProtocolKind::Tcp)).unwrap().len(), 1);

    let file = dir.path().join("relay.json");
    actions.export(&id, &file).unwrap();

    // Same name and kind is taken, so the copy gets a suffix
    let copy = actions.import(&file, None).unwrap();
    assert_ne!(copy, id);
    assert_eq!(actions.get(&copy).unwrap().name, "Relay 1 on (2)");
    assert_eq!(actions.load(&copy).unwrap(), action.payload);

    actions.delete(&id).unwrap();
    assert!(matches!(actions.get(&id), Err(Error::NotFound { .. })));
    assert!(matches!(actions.delete(&id), Err(Error::NotFound { .. })));
}

#[test]
fn test_duplicate_names_are_scoped_by_kind() {
    let actions = ActionStore::new(Store::open_memory().unwrap());
    let tcp = json!({"host": "h", "port": 1, "body": "x"});

    actions.save("Ping", ProtocolKind::Tcp, &tcp).unwrap();
    assert_ok!(actions.save("Ping", ProtocolKind::Udp, &tcp));

    let dup = assert_err!(actions.save("Ping", ProtocolKind::Tcp, &tcp));
    assert!(matches!(dup, Error::DuplicateName { kind: ProtocolKind::Tcp, .. }));
}

#[test]
fn test_bare_payload_import_needs_a_kind() {
    let dir = tempdir().unwrap();
    let file = dir.path().join("Heartbeat.json");
    std::fs::write(&file, r#"{"host": "10.1.1.1", "port": 7000, "body": "HB"}"#).unwrap();

    let actions = ActionStore::new(Store::open_memory().unwrap());
    assert!(matches!(actions.import(&file, None), Err(Error::Validation(_))));

    let id = actions.import(&file, Some(ProtocolKind::Udp)).unwrap();
    let action = actions.get(&id).unwrap();
    assert_eq!(action.name, "Heartbeat");
    assert_eq!(action.protocol_kind, ProtocolKind::Udp);
}

#[test]
fn test_unavailable_store_fails_every_call() {
    let actions = ActionStore::new(Store::unavailable("disk gone"));
    assert!(matches!(actions.list(None), Err(Error::StorageUnavailable(_))));
    assert!(matches!(
        actions.save("x", ProtocolKind::Tcp, &json!({"host": "h", "port": 1})),
        Err(Error::StorageUnavailable(_))
    ));
}

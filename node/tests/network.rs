//! Multi-node tests over the in-memory network.

use infodb_node::records::records_path;
use infodb_node::{Config, MemoryNetwork, Node, NodeError};
use std::net::Ipv4Addr;
use std::sync::Arc;
use std::time::{Duration, Instant};
use uuid::Uuid;

fn config() -> Config {
    Config {
        request_recv_port: 0,
        request_recv_if_address: Ipv4Addr::LOCALHOST,
        fast_tick: Duration::from_millis(20),
        status_period: Duration::from_millis(100),
        pull_timeout: Duration::from_secs(2),
        ..Config::default()
    }
}

async fn wait_for(mut condition: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + Duration::from_secs(5);
    while Instant::now() < deadline {
        if condition() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    condition()
}

#[tokio::test]
async fn create_pull_delete_purge() {
    let network = MemoryNetwork::new();
    let a = Node::new(config(), Arc::new(network.transport()));
    let b = Node::new(
        Config {
            purge_timeout: Duration::from_millis(300),
            ..config()
        },
        Arc::new(network.transport()),
    );
    a.start().await.unwrap();
    b.start().await.unwrap();

    let uuid = a.create_item("track").unwrap();
    a.update_item_field(&uuid, "callsign", "ALPHA").unwrap();
    a.update_item_field(&uuid, "heading", 270_i64).unwrap();
    a.set_item_live(&uuid).unwrap();
    assert!(wait_for(|| b.item_is_active(&uuid)).await);
    assert_eq!(b.item_field_value(&uuid, "callsign").unwrap(), "ALPHA");

    // A late joiner pulls what it missed.
    let c = Node::new(config(), Arc::new(network.transport()));
    c.start().await.unwrap();
    assert!(wait_for(|| c.item_is_active(&uuid)).await);
    assert_eq!(c.item_field_value_as_int(&uuid, "heading").unwrap(), 270);

    a.delete_item(&uuid).unwrap();
    assert!(wait_for(|| !b.item_is_active(&uuid) && !c.item_is_active(&uuid)).await);
    assert!(b.item(&uuid).unwrap().is_deleted());

    // B purges its copy once the timeout passes.
    assert!(wait_for(|| b.item(&uuid).is_err()).await);

    for node in [&a, &b, &c] {
        node.shutdown().await.unwrap();
    }
}

#[tokio::test]
async fn full_snapshot_recovers_lost_update() {
    let network = MemoryNetwork::new();
    let quiet = Config {
        fast_tick: Duration::from_secs(60),
        status_period: Duration::from_secs(60),
        full_update_period: Duration::from_secs(600),
        ..config()
    };
    let a = Node::new(quiet.clone(), Arc::new(network.transport()));
    let b_transport = Arc::new(network.transport());
    let b = Node::new(
        Config {
            auto_pull: false,
            ..quiet
        },
        b_transport.clone(),
    );
    a.start().await.unwrap();
    b.start().await.unwrap();

    let a_id = a.node_id();
    assert!(wait_for(|| b.item(&a_id).is_ok()).await);
    tokio::time::sleep(Duration::from_millis(100)).await;

    let uuid = a.create_item("track").unwrap();
    a.set_item_live(&uuid).unwrap();
    b_transport.drop_next_incoming_message();
    assert_eq!(a.flush_updates().await.unwrap(), 1);

    tokio::time::sleep(Duration::from_millis(200)).await;
    assert!(b.item(&uuid).is_err());

    a.send_full_update().await.unwrap();
    assert!(wait_for(|| b.item_is_active(&uuid)).await);

    a.shutdown().await.unwrap();
    b.shutdown().await.unwrap();
}

#[tokio::test]
async fn new_peer_is_pulled_from() {
    let network = MemoryNetwork::new();
    let owner_config = Config {
        full_update_period: Duration::from_secs(600),
        ..config()
    };
    let a = Node::new(owner_config, Arc::new(network.transport()));
    a.start().await.unwrap();

    let mut uuids = Vec::new();
    for i in 0..5_i64 {
        let uuid = a.create_item("track").unwrap();
        a.update_item_field(&uuid, "index", i).unwrap();
        a.set_item_live(&uuid).unwrap();
        uuids.push(uuid);
    }
    a.flush_updates().await.unwrap();

    let b = Node::new(config(), Arc::new(network.transport()));
    b.start().await.unwrap();

    assert!(wait_for(|| uuids.iter().all(|uuid| b.item_is_active(uuid))).await);
    assert!(wait_for(|| b.peers().iter().any(|peer| peer.node_id == a.node_id())).await);
    let peer = b
        .peers()
        .into_iter()
        .find(|peer| peer.node_id == a.node_id())
        .unwrap();
    assert_eq!(peer.request_addr, a.request_addr());

    a.shutdown().await.unwrap();
    b.shutdown().await.unwrap();
}

#[tokio::test]
async fn backup_survives_restart() {
    let dir = tempfile::tempdir().unwrap();
    let node_uuid = Uuid::new_v4();
    let backup = Config {
        node_uuid: Some(node_uuid),
        load_from_backup: true,
        save_to_backup: true,
        backup_filename: dir.path().join("backup.json"),
        ..config()
    };

    let network = MemoryNetwork::new();
    let first = Node::new(backup.clone(), Arc::new(network.transport()));
    first.start().await.unwrap();
    let live = first.create_item("track").unwrap();
    first.update_item_field(&live, "callsign", "ALPHA").unwrap();
    first.set_item_live(&live).unwrap();
    let pending = first.create_item("track").unwrap();
    first.shutdown().await.unwrap();
    assert!(backup.backup_filename.exists());

    let second = Node::new(backup, Arc::new(network.transport()));
    assert_eq!(second.node_id(), node_uuid);
    second.start().await.unwrap();
    assert!(second.item_is_active(&live));
    assert_eq!(second.item_field_value(&live, "callsign").unwrap(), "ALPHA");
    assert!(second.item(&pending).is_err());
    second.shutdown().await.unwrap();
}

#[tokio::test]
async fn owner_rejects_foreign_state_change() {
    let network = MemoryNetwork::new();
    let a = Node::new(
        Config {
            state: "primary".to_string(),
            check_state: true,
            ..config()
        },
        Arc::new(network.transport()),
    );
    let b = Node::new(config(), Arc::new(network.transport()));
    a.start().await.unwrap();
    b.start().await.unwrap();

    let owned = a.create_item("track").unwrap();
    a.set_item_live(&owned).unwrap();
    assert!(wait_for(|| b.item_is_active(&owned)).await);

    // Both changes go out in the same update message.
    b.update_item_state(&owned, "secondary").unwrap();
    let marker = b.create_item("marker").unwrap();
    b.set_item_live(&marker).unwrap();
    b.flush_updates().await.unwrap();

    assert!(wait_for(|| a.item_is_active(&marker)).await);
    assert_eq!(a.item_state(&owned).unwrap(), "primary");

    // A cannot edit what it does not own.
    assert!(matches!(
        a.update_item_field(&marker, "note", "x"),
        Err(NodeError::Engine(infodb_engine::Error::StateMismatch { .. }))
    ));

    a.shutdown().await.unwrap();
    b.shutdown().await.unwrap();
}

#[tokio::test]
async fn sent_messages_are_recorded() {
    let dir = tempfile::tempdir().unwrap();
    let base = dir.path().join("records");
    let network = MemoryNetwork::new();
    let a = Node::new(
        Config {
            save_records: true,
            record_sent_messages: true,
            record_base_filename: base.clone(),
            ..config()
        },
        Arc::new(network.transport()),
    );
    a.start().await.unwrap();
    let uuid = a.create_item("track").unwrap();
    a.set_item_live(&uuid).unwrap();
    a.flush_updates().await.unwrap();
    a.shutdown().await.unwrap();

    let today = chrono::Utc::now().date_naive();
    let text = std::fs::read_to_string(records_path(&base, today)).unwrap();
    assert!(text.lines().any(|line| line.contains("\tsent\t")));
    assert!(text.contains(&uuid.to_string()));
}

#[tokio::test]
async fn silent_peer_is_forgotten() {
    let network = MemoryNetwork::new();
    let a = Node::new(config(), Arc::new(network.transport()));
    let b = Node::new(
        Config {
            purge_timeout: Duration::from_millis(300),
            ..config()
        },
        Arc::new(network.transport()),
    );
    a.start().await.unwrap();
    b.start().await.unwrap();

    let a_id = a.node_id();
    assert!(wait_for(|| b.item(&a_id).is_ok()).await);
    assert!(wait_for(|| b.peers().iter().any(|peer| peer.node_id == a_id)).await);
    a.shutdown().await.unwrap();

    assert!(
        wait_for(|| b.item(&a_id).is_err() && b.peers().iter().all(|peer| peer.node_id != a_id))
            .await
    );
    b.shutdown().await.unwrap();
}

#[tokio::test]
async fn pull_exchange_is_recorded() {
    let dir = tempfile::tempdir().unwrap();
    let owner_base = dir.path().join("owner");
    let joiner_base = dir.path().join("joiner");
    let recording = |base: &std::path::Path| Config {
        save_records: true,
        record_sent_messages: true,
        record_base_filename: base.to_path_buf(),
        full_update_period: Duration::from_secs(600),
        ..config()
    };

    let network = MemoryNetwork::new();
    let a = Node::new(recording(&owner_base), Arc::new(network.transport()));
    a.start().await.unwrap();
    let uuid = a.create_item("track").unwrap();
    a.set_item_live(&uuid).unwrap();
    a.flush_updates().await.unwrap();

    let b = Node::new(recording(&joiner_base), Arc::new(network.transport()));
    b.start().await.unwrap();
    assert!(wait_for(|| b.item_is_active(&uuid)).await);
    tokio::time::sleep(Duration::from_millis(200)).await;
    b.shutdown().await.unwrap();
    a.shutdown().await.unwrap();

    let today = chrono::Utc::now().date_naive();
    let owner = std::fs::read_to_string(records_path(&owner_base, today)).unwrap();
    let joiner = std::fs::read_to_string(records_path(&joiner_base, today)).unwrap();
    let has = |text: &str, direction: &str, kind: &str| {
        text.lines().any(|line| {
            line.contains(direction) && line.contains(&format!("\"kind\":\"{kind}\""))
        })
    };

    assert!(has(&joiner, "\tsent\t", "itemListRequest"));
    assert!(has(&joiner, "\trecv\t", "itemList"));
    assert!(has(&owner, "\trecv\t", "itemListRequest"));
    assert!(has(&owner, "\tsent\t", "itemList"));
}

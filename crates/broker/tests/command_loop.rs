//! Drives the broker through its command channel and checks that pending
//! actions land at the safe point between dispatches.

use std::path::Path;

use serde_json::{json, Value};
use tokio::sync::{mpsc, oneshot};

use lattice_broker::{Broker, BrokerCommand, LinkSession};
use lattice_domain::BrokerConfig;
use lattice_permission::{PermissionGroups, PermissionLevel};
use lattice_upstream::escape_name;

fn test_config(root: &Path) -> BrokerConfig {
    let mut config = BrokerConfig::default();
    config.storage.root = root.to_path_buf();
    config
}

async fn round_trip(
    commands: &mpsc::Sender<BrokerCommand>,
    path: &str,
    groups: PermissionGroups,
) -> PermissionLevel {
    let (reply, rx) = oneshot::channel();
    commands
        .send(BrokerCommand::Resolve {
            path: path.into(),
            groups,
            reply,
        })
        .await
        .unwrap();
    rx.await.unwrap()
}

#[tokio::test]
async fn edits_apply_at_the_next_safe_point() {
    let root = tempfile::tempdir().unwrap();
    let mut broker = Broker::new(&test_config(root.path())).unwrap();
    let upstream_dir = broker.store().dir().to_path_buf();

    broker
        .invoke(
            "/sys/upstream/add_connection",
            &json!({"name": "u1", "url": "ws://a", "brokerName": "edge"}),
            Some(&LinkSession {
                name: "requester".into(),
                groups: PermissionGroups::new(),
            }),
        )
        .await
        .unwrap();

    let (commands, command_rx) = mpsc::channel(8);
    let event_loop = tokio::spawn(broker.run(command_rx));

    // Edit the url through the loop.
    let (reply, rx) = oneshot::channel();
    commands
        .send(BrokerCommand::SetValue {
            path: "/sys/upstream/u1/url".into(),
            value: json!("ws://b"),
            reply: Some(reply),
        })
        .await
        .unwrap();
    rx.await.unwrap().unwrap();

    // The reply fires during the dispatch; the reset drains before the
    // next command is taken. Once a second command round-trips, the drain
    // for the first has run.
    let level = round_trip(&commands, "/", PermissionGroups::new()).await;
    assert_eq!(level, PermissionLevel::Config, "root without a list is unsecured");

    let raw = std::fs::read_to_string(upstream_dir.join(escape_name("u1"))).unwrap();
    let file: Value = serde_json::from_str(&raw).unwrap();
    assert_eq!(file["url"], "ws://b");

    drop(commands);
    event_loop.await.unwrap();
}

#[tokio::test]
async fn a_delete_scheduled_by_the_last_command_still_lands() {
    let root = tempfile::tempdir().unwrap();
    let mut broker = Broker::new(&test_config(root.path())).unwrap();
    let upstream_dir = broker.store().dir().to_path_buf();

    broker
        .invoke(
            "/sys/upstream/add_connection",
            &json!({"name": "u1", "url": "ws://a", "brokerName": "edge"}),
            Some(&LinkSession {
                name: "requester".into(),
                groups: PermissionGroups::new(),
            }),
        )
        .await
        .unwrap();

    let (commands, command_rx) = mpsc::channel(8);
    let event_loop = tokio::spawn(broker.run(command_rx));

    commands
        .send(BrokerCommand::Invoke {
            path: "/sys/upstream/u1/delete".into(),
            params: Value::Null,
            link: None,
            reply: None,
        })
        .await
        .unwrap();

    // Every dispatch is followed by a drain, so closing the channel right
    // after the invoke cannot lose the scheduled delete.
    drop(commands);
    event_loop.await.unwrap();

    assert!(!upstream_dir.join(escape_name("u1")).exists());
}

#[tokio::test]
async fn resolve_command_matches_direct_resolution() {
    let root = tempfile::tempdir().unwrap();
    let mut broker = Broker::new(&test_config(root.path())).unwrap();

    broker.root_mut().set_permission_list(Some(
        [lattice_permission::PermissionPair::new(
            "default",
            PermissionLevel::Read,
        )]
        .into_iter()
        .collect(),
    ));

    let direct = broker.resolve_permission("/a/b", &["alice"].into_iter().collect());
    assert_eq!(direct, PermissionLevel::Read);

    let (commands, command_rx) = mpsc::channel(8);
    let event_loop = tokio::spawn(broker.run(command_rx));

    let level = round_trip(&commands, "/a/b", ["alice"].into_iter().collect()).await;
    assert_eq!(level, direct);

    drop(commands);
    event_loop.await.unwrap();
}

//! The `/sys/upstream` configuration subtree: the `add_connection` action
//! and the per-entry property nodes whose edits drive the upstream
//! lifecycle.

use serde_json::{json, Value};

use lattice_domain::Result;
use lattice_upstream::UpstreamSettings;

use crate::node::{BrokerNode, ChangeListener};

pub const ADD_CONNECTION: &str = "add_connection";
pub const DELETE_ACTION: &str = "delete";

/// Connection properties that trigger a reset when edited. `enabled` is
/// handled separately by [`ChangeListener::UpstreamEnabled`].
pub const CONNECTION_PROPS: [&str; 5] = ["name", "brokerName", "url", "token", "group"];

/// Build the `upstream` parent node carrying the `add_connection` action.
pub fn build_upstream_parent() -> BrokerNode {
    let mut parent = BrokerNode::new("upstream");

    let mut action = BrokerNode::new(ADD_CONNECTION);
    action.set_meta("$invokable", json!("config"));
    action.set_meta(
        "$params",
        json!([
            {"name": "name", "type": "string",
             "description": "Upstream broker name", "placeholder": "UpstreamBroker"},
            {"name": "url", "type": "string",
             "description": "Url to the upstream broker",
             "placeholder": "ws://upstream.broker/conn"},
            {"name": "brokerName", "type": "string",
             "description": "The name of the link when connected to the upstream broker",
             "placeholder": "ThisBroker"},
            {"name": "token", "type": "string",
             "description": "Broker token (if needed)", "placeholder": "OptionalAuthToken"},
            {"name": "group", "type": "string",
             "description": "default permission group"},
        ]),
    );
    parent.add_child(action);

    parent
}

/// Build a configuration entry node: six writable property children plus
/// the `delete` action.
pub fn build_entry_node(settings: &UpstreamSettings) -> BrokerNode {
    let mut entry = BrokerNode::new(&settings.name);

    for (name, value) in [
        ("name", json!(settings.name)),
        ("brokerName", json!(settings.broker_name)),
        ("url", json!(settings.url)),
        ("token", json!(settings.token)),
        ("group", json!(settings.group)),
    ] {
        let mut prop = BrokerNode::new(name);
        prop.set_meta("$writable", json!("write"));
        prop.set_meta("$type", json!("string"));
        // Seed the value before attaching the listener: the initial write
        // is construction, not a reconfiguration.
        let _ = prop.update_value(value);
        prop.set_listener(ChangeListener::UpstreamProperty);
        entry.add_child(prop);
    }

    let mut enabled = BrokerNode::new("enabled");
    enabled.set_meta("$writable", json!("write"));
    enabled.set_meta("$type", json!("bool"));
    let _ = enabled.update_value(json!(settings.enabled));
    enabled.set_listener(ChangeListener::UpstreamEnabled);
    entry.add_child(enabled);

    let mut delete = BrokerNode::new(DELETE_ACTION);
    delete.set_meta("$invokable", json!("config"));
    entry.add_child(delete);

    entry
}

/// Deep-copy the six property values of an entry node into a settings
/// snapshot, re-validating them on the way out.
pub fn snapshot_entry(entry: &BrokerNode) -> Result<UpstreamSettings> {
    let prop = |name: &str| -> Value {
        entry
            .child(name)
            .and_then(BrokerNode::value)
            .cloned()
            .unwrap_or(Value::Null)
    };
    UpstreamSettings::from_json(&json!({
        "name": prop("name"),
        "brokerName": prop("brokerName"),
        "url": prop("url"),
        "token": prop("token"),
        "group": prop("group"),
        "enabled": prop("enabled"),
    }))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn settings() -> UpstreamSettings {
        UpstreamSettings {
            name: "u1".into(),
            broker_name: "edge".into(),
            url: "ws://peer/conn".into(),
            token: String::new(),
            group: "ops".into(),
            enabled: true,
        }
    }

    #[test]
    fn parent_carries_add_connection() {
        let parent = build_upstream_parent();
        let action = parent.child(ADD_CONNECTION).unwrap();
        assert_eq!(action.meta("$invokable"), Some(&json!("config")));
        assert_eq!(action.meta("$params").unwrap().as_array().unwrap().len(), 5);
    }

    #[test]
    fn entry_node_shape() {
        let entry = build_entry_node(&settings());
        assert_eq!(entry.name(), "u1");

        for name in CONNECTION_PROPS {
            let prop = entry.child(name).unwrap();
            assert_eq!(prop.meta("$writable"), Some(&json!("write")));
            assert_eq!(prop.meta("$type"), Some(&json!("string")));
        }
        let enabled = entry.child("enabled").unwrap();
        assert_eq!(enabled.meta("$type"), Some(&json!("bool")));
        assert_eq!(enabled.value(), Some(&json!(true)));

        let delete = entry.child(DELETE_ACTION).unwrap();
        assert_eq!(delete.meta("$invokable"), Some(&json!("config")));
    }

    #[test]
    fn snapshot_round_trips_the_entry() {
        let original = settings();
        let entry = build_entry_node(&original);
        assert_eq!(snapshot_entry(&entry).unwrap(), original);
    }

    #[test]
    fn snapshot_tracks_edited_values() {
        let mut entry = build_entry_node(&settings());
        let _ = entry.child_mut("url").unwrap().update_value(json!("ws://other/conn"));
        let _ = entry.child_mut("enabled").unwrap().update_value(json!(false));

        let snapshot = snapshot_entry(&entry).unwrap();
        assert_eq!(snapshot.url, "ws://other/conn");
        assert!(!snapshot.enabled);
    }
}

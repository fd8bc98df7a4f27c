use serde_json::{json, Value};

use lattice_domain::{Error, Result};

/// The six configurable properties of an upstream entry.
///
/// This is both the on-disk schema (one JSON object per entry under
/// `<storage>/upstream/`) and the snapshot captured for a reset cycle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UpstreamSettings {
    /// Entry name; doubles as the node name segment and (escaped) the
    /// on-disk file base name.
    pub name: String,
    /// The name this broker takes when connected to the upstream peer.
    pub broker_name: String,
    /// WebSocket URL of the upstream peer.
    pub url: String,
    /// Auth token, empty when unused.
    pub token: String,
    /// Default permission group granted to traffic from the peer, empty
    /// when unused.
    pub group: String,
    pub enabled: bool,
}

impl UpstreamSettings {
    /// Extract settings from a JSON object — either `add_connection`
    /// parameters or a loaded entry file.
    ///
    /// `name`, `brokerName` and `url` must be non-empty strings; `token`
    /// and `group` default to empty; `enabled` is true unless explicitly
    /// the JSON value `false` (unknown keys and wrong-typed optionals are
    /// ignored).
    pub fn from_json(params: &Value) -> Result<Self> {
        let object = params
            .as_object()
            .ok_or_else(|| Error::InvalidParameter("expected an object".into()))?;

        let required = |key: &str| -> Result<String> {
            match object.get(key).and_then(Value::as_str) {
                Some(value) if !value.is_empty() => Ok(value.to_owned()),
                _ => Err(Error::InvalidParameter(format!("missing required string `{key}`"))),
            }
        };

        let optional = |key: &str| -> String {
            object
                .get(key)
                .and_then(Value::as_str)
                .unwrap_or_default()
                .to_owned()
        };

        Ok(Self {
            name: required("name")?,
            broker_name: required("brokerName")?,
            url: required("url")?,
            token: optional("token"),
            group: optional("group"),
            enabled: object.get("enabled") != Some(&Value::Bool(false)),
        })
    }

    /// Persisted form: exactly the six property values.
    pub fn to_json(&self) -> Value {
        json!({
            "name": self.name,
            "brokerName": self.broker_name,
            "url": self.url,
            "token": self.token,
            "group": self.group,
            "enabled": self.enabled,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn required_fields_are_enforced() {
        let missing_url = json!({"name": "u1", "brokerName": "edge"});
        assert!(UpstreamSettings::from_json(&missing_url).is_err());

        let wrong_type = json!({"name": "u1", "brokerName": "edge", "url": 17});
        assert!(UpstreamSettings::from_json(&wrong_type).is_err());

        let empty_name = json!({"name": "", "brokerName": "edge", "url": "ws://a"});
        assert!(UpstreamSettings::from_json(&empty_name).is_err());

        assert!(UpstreamSettings::from_json(&json!(["not", "an", "object"])).is_err());
    }

    #[test]
    fn optionals_default_and_unknown_keys_are_ignored() {
        let settings = UpstreamSettings::from_json(&json!({
            "name": "u1",
            "brokerName": "edge",
            "url": "ws://a",
            "unknown": {"nested": true},
        }))
        .unwrap();
        assert_eq!(settings.token, "");
        assert_eq!(settings.group, "");
        assert!(settings.enabled);
    }

    #[test]
    fn only_explicit_false_disables() {
        let base = json!({"name": "u1", "brokerName": "edge", "url": "ws://a"});

        let mut with_false = base.clone();
        with_false["enabled"] = json!(false);
        assert!(!UpstreamSettings::from_json(&with_false).unwrap().enabled);

        let mut with_string = base.clone();
        with_string["enabled"] = json!("false");
        assert!(UpstreamSettings::from_json(&with_string).unwrap().enabled);

        assert!(UpstreamSettings::from_json(&base).unwrap().enabled);
    }

    #[test]
    fn json_round_trip() {
        let settings = UpstreamSettings {
            name: "u1".into(),
            broker_name: "edge".into(),
            url: "ws://a/conn".into(),
            token: "t".into(),
            group: "ops".into(),
            enabled: false,
        };
        let reloaded = UpstreamSettings::from_json(&settings.to_json()).unwrap();
        assert_eq!(reloaded, settings);
    }
}

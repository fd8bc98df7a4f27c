//! The broker's node tree.
//!
//! Every addressable element is a [`BrokerNode`]: a name segment, a child
//! map, an optional permission list, a JSON value with metadata, and an
//! optional change-listener tag. Nodes representing a subtree contributed
//! by an attached device are [`NodeKind::Downstream`] and additionally
//! carry the permission overlay for paths the broker does not host.

use std::collections::HashMap;

use serde_json::Value;

use lattice_permission::{PermissionList, VirtualPermissionNode};

/// What a committed value write should trigger.
///
/// Listeners are tags, not callbacks: the tree layer returns the tag from
/// [`BrokerNode::update_value`] and the broker dispatches it *after* the
/// write, so a listener can never free the node it is attached to while
/// the write is still on the stack.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChangeListener {
    /// A connection property of an upstream entry changed; the entry must
    /// be reset (live poll) or rebuilt in place (no poll).
    UpstreamProperty,
    /// The `enabled` property of an upstream entry flipped; its poll must
    /// start or stop.
    UpstreamEnabled,
}

/// Node discriminant.
#[derive(Debug, Default)]
pub enum NodeKind {
    #[default]
    Internal,
    /// Subtree contributed by an attached device link. The overlay shadows
    /// the device's child tree; keys absent from it inherit from this
    /// node's own permission list.
    Downstream {
        children_permissions: HashMap<String, VirtualPermissionNode>,
    },
}

#[derive(Debug, Default)]
pub struct BrokerNode {
    name: String,
    value: Option<Value>,
    meta: serde_json::Map<String, Value>,
    permission_list: Option<PermissionList>,
    listener: Option<ChangeListener>,
    children: HashMap<String, BrokerNode>,
    kind: NodeKind,
}

impl BrokerNode {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Default::default()
        }
    }

    pub fn new_downstream(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            kind: NodeKind::Downstream {
                children_permissions: HashMap::new(),
            },
            ..Default::default()
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn kind(&self) -> &NodeKind {
        &self.kind
    }

    pub fn is_downstream(&self) -> bool {
        matches!(self.kind, NodeKind::Downstream { .. })
    }

    // ── value & metadata ─────────────────────────────────────────────

    pub fn value(&self) -> Option<&Value> {
        self.value.as_ref()
    }

    /// Commit a value write. Returns the node's listener tag so the caller
    /// can dispatch it once the write has returned.
    #[must_use = "the returned listener tag must be dispatched after the write"]
    pub fn update_value(&mut self, value: Value) -> Option<ChangeListener> {
        self.value = Some(value);
        self.listener
    }

    pub fn meta(&self, key: &str) -> Option<&Value> {
        self.meta.get(key)
    }

    pub fn set_meta(&mut self, key: impl Into<String>, value: Value) {
        self.meta.insert(key.into(), value);
    }

    // ── permissions ──────────────────────────────────────────────────

    pub fn permission_list(&self) -> Option<&PermissionList> {
        self.permission_list.as_ref()
    }

    pub fn set_permission_list(&mut self, list: Option<PermissionList>) {
        self.permission_list = list;
    }

    /// Overlay children of a downstream node; `None` for internal nodes.
    pub fn children_permissions(&self) -> Option<&HashMap<String, VirtualPermissionNode>> {
        match &self.kind {
            NodeKind::Downstream {
                children_permissions,
            } => Some(children_permissions),
            NodeKind::Internal => None,
        }
    }

    /// Attach a permission list inside this downstream node's overlay.
    /// The first path segment names the overlay root to graft onto.
    pub fn attach_permission(&mut self, path: &str, list: PermissionList) -> bool {
        let NodeKind::Downstream {
            children_permissions,
        } = &mut self.kind
        else {
            return false;
        };
        let mut segments = path.split('/').filter(|segment| !segment.is_empty());
        let Some(first) = segments.next() else {
            return false;
        };
        let rest: Vec<&str> = segments.collect();
        children_permissions
            .entry(first.to_owned())
            .or_default()
            .attach(&rest.join("/"), list);
        true
    }

    // ── listeners ────────────────────────────────────────────────────

    pub fn set_listener(&mut self, listener: ChangeListener) {
        self.listener = Some(listener);
    }

    // ── children ─────────────────────────────────────────────────────

    pub fn add_child(&mut self, child: BrokerNode) -> &mut BrokerNode {
        let name = child.name.clone();
        self.children.entry(name).or_insert(child)
    }

    pub fn has_child(&self, name: &str) -> bool {
        self.children.contains_key(name)
    }

    pub fn child(&self, name: &str) -> Option<&BrokerNode> {
        self.children.get(name)
    }

    pub fn child_mut(&mut self, name: &str) -> Option<&mut BrokerNode> {
        self.children.get_mut(name)
    }

    pub fn remove_child(&mut self, name: &str) -> Option<BrokerNode> {
        self.children.remove(name)
    }

    pub fn children(&self) -> impl Iterator<Item = &BrokerNode> {
        self.children.values()
    }

    /// Look up a descendant by absolute path (`/a/b/c`). The root itself
    /// is `/`.
    pub fn get_path(&self, path: &str) -> Option<&BrokerNode> {
        let rest = path.strip_prefix('/')?;
        let mut node = self;
        for segment in rest.split('/').filter(|segment| !segment.is_empty()) {
            node = node.child(segment)?;
        }
        Some(node)
    }

    pub fn get_path_mut(&mut self, path: &str) -> Option<&mut BrokerNode> {
        let rest = path.strip_prefix('/')?;
        let mut node = self;
        for segment in rest.split('/').filter(|segment| !segment.is_empty()) {
            node = node.child_mut(segment)?;
        }
        Some(node)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use lattice_permission::{PermissionLevel, PermissionPair};
    use serde_json::json;

    #[test]
    fn path_lookup() {
        let mut root = BrokerNode::new("");
        root.add_child(BrokerNode::new("sys"))
            .add_child(BrokerNode::new("upstream"));

        assert!(root.get_path("/sys/upstream").is_some());
        assert!(root.get_path("/sys/missing").is_none());
        assert_eq!(root.get_path("/").unwrap().name(), "");
        assert!(root.get_path("sys").is_none(), "relative paths do not resolve");
    }

    #[test]
    fn add_child_keeps_existing() {
        let mut root = BrokerNode::new("");
        root.add_child(BrokerNode::new("a")).set_meta("$type", json!("string"));
        root.add_child(BrokerNode::new("a"));
        assert_eq!(root.get_path("/a").unwrap().meta("$type"), Some(&json!("string")));
    }

    #[test]
    fn update_value_returns_listener_tag() {
        let mut node = BrokerNode::new("url");
        assert_eq!(node.update_value(json!("ws://a")), None);

        node.set_listener(ChangeListener::UpstreamProperty);
        assert_eq!(
            node.update_value(json!("ws://b")),
            Some(ChangeListener::UpstreamProperty)
        );
        assert_eq!(node.value(), Some(&json!("ws://b")));
    }

    #[test]
    fn attach_permission_requires_downstream() {
        let list: PermissionList =
            [PermissionPair::new("ops", PermissionLevel::Write)].into_iter().collect();

        let mut internal = BrokerNode::new("plain");
        assert!(!internal.attach_permission("sensor", list.clone()));

        let mut device = BrokerNode::new_downstream("dev");
        assert!(device.attach_permission("sensor/raw", list));
        let overlay = device.children_permissions().unwrap();
        assert!(overlay["sensor"].child("raw").unwrap().permission_list().is_some());
    }
}

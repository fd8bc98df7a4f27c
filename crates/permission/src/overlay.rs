use std::collections::HashMap;

use crate::list::PermissionList;

/// Path segments for permission descent.
///
/// Yields `/`-separated segments and stops at the first empty one, so a
/// trailing `/` or a doubled `//` means "no further descent" rather than
/// silently matching a child named `""`. The leading `/` of an absolute
/// path must be stripped by the caller.
pub fn descent_segments(path: &str) -> impl Iterator<Item = &str> {
    path.split('/').take_while(|segment| !segment.is_empty())
}

/// A node in the permission overlay grafted onto a downstream subtree.
///
/// The overlay mirrors a path prefix of the child tree a downstream link
/// contributes, letting the broker attach permission lists to paths it
/// does not itself host. Keys absent from the overlay simply inherit from
/// the downstream node's own list.
#[derive(Debug, Clone, Default)]
pub struct VirtualPermissionNode {
    permission_list: Option<PermissionList>,
    children: HashMap<String, VirtualPermissionNode>,
}

impl VirtualPermissionNode {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn permission_list(&self) -> Option<&PermissionList> {
        self.permission_list.as_ref()
    }

    pub fn child(&self, name: &str) -> Option<&VirtualPermissionNode> {
        self.children.get(name)
    }

    pub fn children(&self) -> impl Iterator<Item = (&String, &VirtualPermissionNode)> {
        self.children.iter()
    }

    /// Attach a permission list at `path` below this node, creating missing
    /// intermediate overlay nodes. An empty path replaces the list at this
    /// node itself.
    pub fn attach(&mut self, path: &str, list: PermissionList) {
        let mut node = self;
        for segment in path.split('/').filter(|segment| !segment.is_empty()) {
            node = node.children.entry(segment.to_owned()).or_default();
        }
        node.permission_list = Some(list);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::level::PermissionLevel;
    use crate::list::PermissionPair;

    fn read_list() -> PermissionList {
        [PermissionPair::new("default", PermissionLevel::Read)]
            .into_iter()
            .collect()
    }

    #[test]
    fn attach_creates_intermediates() {
        let mut root = VirtualPermissionNode::new();
        root.attach("sensor/raw", read_list());

        let sensor = root.child("sensor").unwrap();
        assert!(sensor.permission_list().is_none());
        let raw = sensor.child("raw").unwrap();
        assert_eq!(raw.permission_list(), Some(&read_list()));
    }

    #[test]
    fn attach_empty_path_targets_the_root() {
        let mut root = VirtualPermissionNode::new();
        root.attach("", read_list());
        assert_eq!(root.permission_list(), Some(&read_list()));
        assert_eq!(root.children().count(), 0);
    }

    #[test]
    fn attach_replaces_existing_list() {
        let mut root = VirtualPermissionNode::new();
        root.attach("sensor", read_list());
        let replacement: PermissionList =
            [PermissionPair::new("ops", PermissionLevel::Write)].into_iter().collect();
        root.attach("sensor", replacement.clone());
        assert_eq!(root.child("sensor").unwrap().permission_list(), Some(&replacement));
    }

    #[test]
    fn descent_segments_stop_at_empty() {
        let segments: Vec<&str> = descent_segments("a/b/c").collect();
        assert_eq!(segments, ["a", "b", "c"]);

        let trailing: Vec<&str> = descent_segments("a/b/").collect();
        assert_eq!(trailing, ["a", "b"]);

        let doubled: Vec<&str> = descent_segments("a//b").collect();
        assert_eq!(doubled, ["a"]);

        assert_eq!(descent_segments("").count(), 0);
    }
}

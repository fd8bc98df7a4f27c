//! The hierarchical permission resolver.
//!
//! Walks a broker-node path, descending into the permission overlay when
//! it crosses a downstream boundary, and computes the maximum permitted
//! level across the caller's groups. The resolver is total: unknown
//! paths, missing children, and empty group sets all resolve to `none`.

use lattice_permission::{
    descent_segments, PermissionGroups, PermissionLevel, VirtualPermissionNode,
};

use crate::node::{BrokerNode, NodeKind};

/// Effective permission level of `caller` on `path`, starting at `root`.
///
/// A root without any permission list means the broker is unsecured:
/// every caller gets `config`. Otherwise a path that does not begin with
/// `/` resolves to `none`.
pub fn resolve(path: &str, root: &BrokerNode, caller: &PermissionGroups) -> PermissionLevel {
    if root.permission_list().is_none() {
        return PermissionLevel::Config;
    }
    let Some(rest) = path.strip_prefix('/') else {
        return PermissionLevel::None;
    };

    let mut levels = vec![PermissionLevel::None; caller.len()];
    let mut segments = descent_segments(rest);
    walk_node(root, &mut segments, caller, &mut levels);

    levels.into_iter().max().unwrap_or(PermissionLevel::None)
}

fn walk_node<'a>(
    node: &BrokerNode,
    segments: &mut impl Iterator<Item = &'a str>,
    caller: &PermissionGroups,
    levels: &mut [PermissionLevel],
) {
    if let Some(list) = node.permission_list() {
        // config overrides everything below and across groups.
        if list.fold_levels(caller, levels) {
            return;
        }
    }
    let Some(segment) = segments.next() else {
        return;
    };
    match node.kind() {
        NodeKind::Downstream {
            children_permissions,
        } => {
            // Crossing the downstream boundary: children come from the
            // overlay, not the broker tree.
            if let Some(child) = children_permissions.get(segment) {
                walk_overlay(child, segments, caller, levels);
            }
        }
        NodeKind::Internal => {
            if let Some(child) = node.child(segment) {
                walk_node(child, segments, caller, levels);
            }
        }
    }
}

fn walk_overlay<'a>(
    node: &VirtualPermissionNode,
    segments: &mut impl Iterator<Item = &'a str>,
    caller: &PermissionGroups,
    levels: &mut [PermissionLevel],
) {
    if let Some(list) = node.permission_list() {
        if list.fold_levels(caller, levels) {
            return;
        }
    }
    let Some(segment) = segments.next() else {
        return;
    };
    if let Some(child) = node.child(segment) {
        walk_overlay(child, segments, caller, levels);
    }
}

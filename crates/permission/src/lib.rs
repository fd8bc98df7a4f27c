//! Per-path permission model for the Lattice broker.
//!
//! A node carries an ordered list of `(group, level)` pairs; a caller
//! asserts a set of group names. The effective level on a path is computed
//! by the resolver in `lattice-broker`, which folds every list it passes
//! through [`PermissionList::fold_levels`]. Subtrees contributed by
//! downstream links are shadowed by an overlay tree of
//! [`VirtualPermissionNode`]s so the broker can attach permissions to paths
//! it does not itself host.

mod level;
mod list;
mod overlay;

pub use level::PermissionLevel;
pub use list::{PermissionGroups, PermissionList, PermissionPair};
pub use overlay::{descent_segments, VirtualPermissionNode};

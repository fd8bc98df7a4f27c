use std::fmt;

/// Permission level on a broker node, totally ordered.
///
/// `Never` is a sentinel meaning "explicitly denied, do not persist": it
/// can appear in an in-memory list to mask a node, but it is never written
/// to disk and the resolver never returns it to a caller.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum PermissionLevel {
    None,
    List,
    Read,
    Write,
    Config,
    Never,
}

impl PermissionLevel {
    /// Canonical names, indexed by level.
    pub const NAMES: [&'static str; 6] = ["none", "list", "read", "write", "config", "never"];

    pub fn as_str(self) -> &'static str {
        Self::NAMES[self as usize]
    }

    /// Parse a level name as it appears in a persisted permission list.
    ///
    /// Only the five storable names are recognized; anything else
    /// (including `"never"`, which save never emits) coerces to `None`.
    pub fn parse_stored(name: &str) -> PermissionLevel {
        match name {
            "none" => PermissionLevel::None,
            "list" => PermissionLevel::List,
            "read" => PermissionLevel::Read,
            "write" => PermissionLevel::Write,
            "config" => PermissionLevel::Config,
            _ => PermissionLevel::None,
        }
    }
}

impl fmt::Display for PermissionLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

use serde_json::{json, Value};

use crate::level::PermissionLevel;

/// One `(group, level)` record in a node's permission list.
///
/// The group `"default"` matches every caller; any other group matches by
/// exact string equality.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PermissionPair {
    pub group: String,
    pub level: PermissionLevel,
}

impl PermissionPair {
    pub fn new(group: impl Into<String>, level: PermissionLevel) -> Self {
        Self {
            group: group.into(),
            level,
        }
    }
}

/// Ordered permission list attached to one node.
///
/// Order is significant: for a given caller group the first matching pair
/// wins, and a `"default"` pair shadows any explicit group pair listed
/// after it. That shadowing is the contract, not an accident — callers
/// who want an explicit override must list it before the default.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PermissionList {
    pairs: Vec<PermissionPair>,
}

impl PermissionList {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, pair: PermissionPair) {
        self.pairs.push(pair);
    }

    pub fn len(&self) -> usize {
        self.pairs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pairs.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &PermissionPair> {
        self.pairs.iter()
    }

    /// Group-local merge of this list into a caller's level vector.
    ///
    /// For each caller group, the scan stops at the first pair whose group
    /// equals it *or* equals `"default"`; that pair contributes its level
    /// if higher than what the group already holds. A `never` pair ends
    /// the scan without contributing — explicitly denied means "this list
    /// grants you nothing here", so `never` can never reach a caller.
    /// Returns `true` when a `config` level was merged, which
    /// short-circuits the whole resolution: config overrides everything
    /// below and across groups.
    pub fn fold_levels(&self, groups: &PermissionGroups, levels: &mut [PermissionLevel]) -> bool {
        for (g, group) in groups.iter().enumerate() {
            for pair in &self.pairs {
                if pair.group == *group || pair.group == "default" {
                    if levels[g] < pair.level && pair.level < PermissionLevel::Never {
                        levels[g] = pair.level;
                        if pair.level == PermissionLevel::Config {
                            return true;
                        }
                    }
                    break;
                }
            }
        }
        false
    }

    /// Persisted form: a JSON array of `[group, levelName]` pairs.
    /// Pairs at level `never` are omitted.
    pub fn to_json(&self) -> Value {
        let entries: Vec<Value> = self
            .pairs
            .iter()
            .filter(|pair| pair.level < PermissionLevel::Never)
            .map(|pair| json!([pair.group, pair.level.as_str()]))
            .collect();
        Value::Array(entries)
    }

    /// Load a persisted permission list.
    ///
    /// Malformed pairs (wrong arity, non-string elements) are skipped
    /// without aborting the list; unknown level names coerce to `none`.
    /// Empty or non-array input yields an empty list.
    pub fn from_json(json: &Value) -> Self {
        let mut list = PermissionList::new();
        let Some(entries) = json.as_array() else {
            return list;
        };
        for entry in entries {
            let Some(pair) = entry.as_array() else {
                continue;
            };
            if pair.len() != 2 {
                continue;
            }
            let (Some(group), Some(level)) = (pair[0].as_str(), pair[1].as_str()) else {
                continue;
            };
            list.push(PermissionPair::new(group, PermissionLevel::parse_stored(level)));
        }
        list
    }
}

impl FromIterator<PermissionPair> for PermissionList {
    fn from_iter<I: IntoIterator<Item = PermissionPair>>(iter: I) -> Self {
        Self {
            pairs: iter.into_iter().collect(),
        }
    }
}

/// The ordered set of group names a link asserts at session establishment.
///
/// Duplicates are allowed but carry no extra weight. An empty set resolves
/// every path to `none`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PermissionGroups {
    groups: Vec<String>,
}

impl PermissionGroups {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.groups.len()
    }

    pub fn is_empty(&self) -> bool {
        self.groups.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &String> {
        self.groups.iter()
    }
}

impl From<Vec<String>> for PermissionGroups {
    fn from(groups: Vec<String>) -> Self {
        Self { groups }
    }
}

impl<'a> FromIterator<&'a str> for PermissionGroups {
    fn from_iter<I: IntoIterator<Item = &'a str>>(iter: I) -> Self {
        Self {
            groups: iter.into_iter().map(str::to_owned).collect(),
        }
    }
}

//! On-disk registry of upstream entries.
//!
//! One JSON file per entry under `<storage>/upstream/`, named by the
//! escaped entry name. The in-memory tree stays authoritative: a failed
//! write is logged and re-attempted by the next save.

use std::fmt::Write as _;
use std::fs;
use std::path::{Path, PathBuf};

use serde_json::Value;

use lattice_domain::{Error, Result};

use crate::settings::UpstreamSettings;

/// Base names Windows refuses regardless of extension.
const RESERVED_NAMES: [&str; 22] = [
    "CON", "PRN", "AUX", "NUL", "COM1", "COM2", "COM3", "COM4", "COM5", "COM6", "COM7", "COM8",
    "COM9", "LPT1", "LPT2", "LPT3", "LPT4", "LPT5", "LPT6", "LPT7", "LPT8", "LPT9",
];

/// Escape an entry name for use as a single path segment.
///
/// ASCII alphanumerics, `-`, `_` and non-leading `.` pass through; every
/// other byte becomes `%XX`. A leading dot and the first byte of a
/// platform-reserved base name are escaped too, so the result is never a
/// dotfile, never `..`, and never `NUL`-like.
pub fn escape_name(name: &str) -> String {
    let reserved = RESERVED_NAMES
        .iter()
        .any(|reserved| name.split('.').next().unwrap_or("").eq_ignore_ascii_case(reserved));

    let mut escaped = String::with_capacity(name.len());
    for (index, byte) in name.bytes().enumerate() {
        let plain = byte.is_ascii_alphanumeric()
            || byte == b'-'
            || byte == b'_'
            || (byte == b'.' && index > 0);
        if plain && !(index == 0 && reserved) {
            escaped.push(byte as char);
        } else {
            let _ = write!(escaped, "%{byte:02X}");
        }
    }
    escaped
}

/// Inverse of [`escape_name`]. Returns `None` for malformed `%XX` runs.
pub fn unescape_name(escaped: &str) -> Option<String> {
    let mut bytes = Vec::with_capacity(escaped.len());
    let mut rest = escaped.as_bytes();
    while let Some((&byte, tail)) = rest.split_first() {
        if byte == b'%' {
            let hex = tail.get(..2)?;
            let hex = std::str::from_utf8(hex).ok()?;
            bytes.push(u8::from_str_radix(hex, 16).ok()?);
            rest = &tail[2..];
        } else {
            bytes.push(byte);
            rest = tail;
        }
    }
    String::from_utf8(bytes).ok()
}

/// Filesystem store for upstream entry files.
#[derive(Debug, Clone)]
pub struct UpstreamStore {
    dir: PathBuf,
}

impl UpstreamStore {
    /// Open (and create if needed) `<storage_root>/upstream/`.
    pub fn open(storage_root: &Path) -> Result<Self> {
        let dir = storage_root.join("upstream");
        create_dir_0770(&dir)?;
        Ok(Self { dir })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn path_for(&self, name: &str) -> PathBuf {
        self.dir.join(escape_name(name))
    }

    /// Persist one entry. The in-memory entry stays authoritative on
    /// failure; callers log and carry on.
    pub fn save(&self, settings: &UpstreamSettings) -> Result<()> {
        let path = self.path_for(&settings.name);
        let json = serde_json::to_string_pretty(&settings.to_json())?;
        fs::write(&path, json)
            .map_err(|e| Error::Storage(format!("writing {}: {e}", path.display())))?;
        tracing::debug!(name = %settings.name, path = %path.display(), "upstream entry saved");
        Ok(())
    }

    /// Remove an entry's file. A missing file is not an error.
    pub fn delete(&self, name: &str) {
        let path = self.path_for(name);
        if let Err(e) = fs::remove_file(&path) {
            if e.kind() != std::io::ErrorKind::NotFound {
                tracing::warn!(name = %name, path = %path.display(), error = %e,
                    "failed to delete upstream entry file");
            }
        }
    }

    /// Load every parseable entry file. Parse failures are logged and
    /// skipped; a single bad file never aborts startup.
    pub fn load_all(&self) -> Vec<UpstreamSettings> {
        let entries = match fs::read_dir(&self.dir) {
            Ok(entries) => entries,
            Err(e) => {
                tracing::warn!(dir = %self.dir.display(), error = %e,
                    "cannot scan upstream storage");
                return Vec::new();
            }
        };

        let mut loaded = Vec::new();
        for entry in entries.flatten() {
            let path = entry.path();
            if !entry.file_type().map(|t| t.is_file()).unwrap_or(false) {
                continue;
            }
            match read_settings(&path) {
                Ok(settings) => loaded.push(settings),
                Err(e) => {
                    tracing::warn!(path = %path.display(), error = %e,
                        "skipping unparseable upstream entry");
                }
            }
        }

        tracing::info!(count = loaded.len(), dir = %self.dir.display(), "upstream entries loaded");
        loaded
    }
}

fn read_settings(path: &Path) -> Result<UpstreamSettings> {
    let raw = fs::read_to_string(path)?;
    let json: Value = serde_json::from_str(&raw)?;
    UpstreamSettings::from_json(&json)
}

#[cfg(unix)]
fn create_dir_0770(dir: &Path) -> Result<()> {
    use std::os::unix::fs::DirBuilderExt;
    match fs::DirBuilder::new().recursive(true).mode(0o770).create(dir) {
        Ok(()) => Ok(()),
        Err(e) => Err(Error::Storage(format!("creating {}: {e}", dir.display()))),
    }
}

#[cfg(not(unix))]
fn create_dir_0770(dir: &Path) -> Result<()> {
    fs::create_dir_all(dir).map_err(|e| Error::Storage(format!("creating {}: {e}", dir.display())))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn settings(name: &str) -> UpstreamSettings {
        UpstreamSettings {
            name: name.into(),
            broker_name: "edge".into(),
            url: "ws://peer/conn".into(),
            token: String::new(),
            group: String::new(),
            enabled: true,
        }
    }

    #[test]
    fn escape_round_trips() {
        for name in ["plain", "with/slash", "100%", "tab\there", ".hidden", "..", "ü-umlaut"] {
            let escaped = escape_name(name);
            assert!(!escaped.contains('/'), "{escaped}");
            assert!(!escaped.starts_with('.'), "{escaped}");
            assert_eq!(unescape_name(&escaped).as_deref(), Some(name));
        }
    }

    #[test]
    fn escape_defuses_reserved_names() {
        for name in ["CON", "nul", "com1.json"] {
            let escaped = escape_name(name);
            assert_ne!(escaped, name);
            assert_eq!(unescape_name(&escaped).as_deref(), Some(name));
        }
    }

    #[test]
    fn unescape_rejects_malformed_runs() {
        assert_eq!(unescape_name("abc%2"), None);
        assert_eq!(unescape_name("abc%zz"), None);
    }

    #[test]
    fn save_load_delete_cycle() {
        let root = tempfile::tempdir().unwrap();
        let store = UpstreamStore::open(root.path()).unwrap();

        let entry = settings("up/stream");
        store.save(&entry).unwrap();
        assert!(store.path_for("up/stream").is_file());

        let loaded = store.load_all();
        assert_eq!(loaded, vec![entry]);

        store.delete("up/stream");
        assert!(!store.path_for("up/stream").exists());
        // Deleting again is quietly a no-op.
        store.delete("up/stream");
    }

    #[test]
    fn bad_file_is_isolated() {
        let root = tempfile::tempdir().unwrap();
        let store = UpstreamStore::open(root.path()).unwrap();

        store.save(&settings("good")).unwrap();
        std::fs::write(store.dir().join("broken"), "{not json").unwrap();
        std::fs::write(
            store.dir().join("incomplete"),
            serde_json::to_string(&json!({"name": "x"})).unwrap(),
        )
        .unwrap();

        let loaded = store.load_all();
        assert_eq!(loaded.len(), 1);
        assert_eq!(loaded[0].name, "good");
    }

    #[test]
    fn subdirectories_are_ignored() {
        let root = tempfile::tempdir().unwrap();
        let store = UpstreamStore::open(root.path()).unwrap();
        std::fs::create_dir(store.dir().join("nested")).unwrap();
        assert!(store.load_all().is_empty());
    }
}

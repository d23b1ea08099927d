//! `easyp.lock`: one `<name> <version> <hash>` line per installed module.

use std::collections::BTreeMap;
use std::io::Write;

use crate::error::{ModError, Result};
use crate::walker::{read_all, DirWalker};

pub const LOCK_FILE_NAME: &str = "easyp.lock";

/// One lockfile record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LockfileInfo {
    pub name: String,
    pub version: String,
    pub hash: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct LockEntry {
    version: String,
    hash: String,
}

/// In-memory view of the lockfile, persisted through a [`DirWalker`] on every write.
pub struct LockFile {
    walker: Box<dyn DirWalker>,
    entries: BTreeMap<String, LockEntry>,
}

impl std::fmt::Debug for LockFile {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LockFile")
            .field("entries", &self.entries)
            .finish_non_exhaustive()
    }
}

impl LockFile {
    /// Load the lockfile from `walker`. A missing file is an empty lockfile.
    pub fn open(walker: Box<dyn DirWalker>) -> Result<Self> {
        let entries = match read_all(walker.as_ref(), LOCK_FILE_NAME) {
            Ok(bytes) => parse(&String::from_utf8_lossy(&bytes)),
            Err(err) if err.is_not_found() => BTreeMap::new(),
            Err(err) => return Err(err),
        };
        tracing::debug!(
            target = "easyp.lockfile",
            entries = entries.len(),
            "loaded lockfile"
        );
        Ok(Self { walker, entries })
    }

    pub fn read(&self, name: &str) -> Result<LockfileInfo> {
        self.entries
            .get(name)
            .map(|entry| LockfileInfo {
                name: name.to_string(),
                version: entry.version.clone(),
                hash: entry.hash.clone(),
            })
            .ok_or_else(|| ModError::ModuleNotInLockfile {
                name: name.to_string(),
            })
    }

    /// Insert or replace the entry for `name` and rewrite the whole file.
    ///
    /// The in-memory view only changes once the file has been written.
    pub fn write(&mut self, name: &str, version: &str, hash: &str) -> Result<()> {
        let mut entries = self.entries.clone();
        entries.insert(
            name.to_string(),
            LockEntry {
                version: version.to_string(),
                hash: hash.to_string(),
            },
        );
        let rendered = render(&entries);
        {
            let mut out = self.walker.create(LOCK_FILE_NAME)?;
            out.write_all(rendered.as_bytes())
                .and_then(|()| out.flush())
                .map_err(ModError::io(LOCK_FILE_NAME))?;
        }
        self.entries = entries;
        Ok(())
    }

    /// All entries, sorted by module name.
    pub fn deps_iter(&self) -> impl Iterator<Item = LockfileInfo> + '_ {
        self.entries.iter().map(|(name, entry)| LockfileInfo {
            name: name.clone(),
            version: entry.version.clone(),
            hash: entry.hash.clone(),
        })
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }
}

fn render(entries: &BTreeMap<String, LockEntry>) -> String {
    let mut out = String::new();
    for (name, entry) in entries {
        out.push_str(name);
        out.push(' ');
        out.push_str(&entry.version);
        out.push(' ');
        out.push_str(&entry.hash);
        out.push('\n');
    }
    out
}

// Lines that do not have exactly three fields are ignored; a later line for the same
// module replaces an earlier one.
fn parse(text: &str) -> BTreeMap<String, LockEntry> {
    let mut entries = BTreeMap::new();
    for line in text.lines() {
        let fields: Vec<&str> = line.split_whitespace().collect();
        let [name, version, hash] = fields.as_slice() else {
            continue;
        };
        entries.insert(
            name.to_string(),
            LockEntry {
                version: version.to_string(),
                hash: hash.to_string(),
            },
        );
    }
    entries
}

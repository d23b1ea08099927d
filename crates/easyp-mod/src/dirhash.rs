//! Content hashes for installed trees and downloaded archives.
//!
//! Both use the `h1:` scheme: hash every file with SHA-256, build a manifest of
//! `"<hex digest>  <path>\n"` lines sorted by path, then SHA-256 the manifest and
//! base64-encode it. The hash covers file names and contents only, so it is stable
//! across platforms and independent of timestamps or permissions.

use std::fmt;
use std::fs;
use std::io::{self, Read};
use std::path::{Path, PathBuf};

use base64::Engine as _;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use walkdir::WalkDir;

use crate::error::{ModError, Result};
use crate::walker::to_slash;

const HASH_PREFIX: &str = "h1:";

/// An `h1:<base64>` content hash.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ModuleHash(String);

impl ModuleHash {
    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn into_string(self) -> String {
        self.0
    }
}

impl fmt::Display for ModuleHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<String> for ModuleHash {
    fn from(value: String) -> Self {
        Self(value)
    }
}

/// Hash every regular file under `dir`. Paths are relative to `dir`, `/`-separated.
pub fn hash_dir(dir: &Path) -> Result<ModuleHash> {
    let mut files: Vec<(String, PathBuf)> = Vec::new();
    for entry in WalkDir::new(dir) {
        let entry = entry?;
        if !entry.file_type().is_file() {
            continue;
        }
        let Ok(rel) = entry.path().strip_prefix(dir) else {
            continue;
        };
        files.push((to_slash(rel), entry.path().to_path_buf()));
    }

    hash_files(files, |path: &PathBuf| {
        fs::File::open(path).map_err(ModError::io(path))
    })
}

/// Hash the file entries of a zip archive, using entry names as paths.
pub fn hash_zip(archive_path: &Path) -> Result<ModuleHash> {
    let zip_err = |source| ModError::Zip {
        path: archive_path.to_path_buf(),
        source,
    };
    let file = fs::File::open(archive_path).map_err(ModError::io(archive_path))?;
    let mut archive = zip::ZipArchive::new(file).map_err(zip_err)?;

    let mut files: Vec<(String, usize)> = Vec::new();
    for index in 0..archive.len() {
        let entry = archive.by_index(index).map_err(zip_err)?;
        if entry.is_dir() {
            continue;
        }
        files.push((entry.name().to_string(), index));
    }

    let mut manifest_lines = Vec::with_capacity(files.len());
    for (name, index) in sorted_checked(files)? {
        let mut entry = archive.by_index(index).map_err(zip_err)?;
        let digest = digest_reader(&mut entry).map_err(ModError::io(archive_path))?;
        manifest_lines.push(manifest_line(&digest, &name));
    }
    Ok(finish(manifest_lines))
}

fn hash_files<K, R: Read>(
    files: Vec<(String, K)>,
    mut open: impl FnMut(&K) -> Result<R>,
) -> Result<ModuleHash> {
    let mut manifest_lines = Vec::with_capacity(files.len());
    for (name, key) in sorted_checked(files)? {
        let mut reader = open(&key)?;
        let digest = digest_reader(&mut reader).map_err(ModError::io(&name))?;
        manifest_lines.push(manifest_line(&digest, &name));
    }
    Ok(finish(manifest_lines))
}

fn sorted_checked<K>(mut files: Vec<(String, K)>) -> Result<Vec<(String, K)>> {
    if let Some((name, _)) = files.iter().find(|(name, _)| name.contains('\n')) {
        return Err(ModError::UnhashableFileName { name: name.clone() });
    }
    files.sort_by(|a, b| a.0.cmp(&b.0));
    Ok(files)
}

fn digest_reader(reader: &mut impl Read) -> io::Result<[u8; 32]> {
    let mut hasher = Sha256::new();
    io::copy(reader, &mut hasher)?;
    Ok(hasher.finalize().into())
}

fn manifest_line(digest: &[u8; 32], name: &str) -> String {
    format!("{}  {name}\n", hex::encode(digest))
}

fn finish(lines: Vec<String>) -> ModuleHash {
    let mut hasher = Sha256::new();
    for line in &lines {
        hasher.update(line.as_bytes());
    }
    let digest = hasher.finalize();
    ModuleHash(format!(
        "{HASH_PREFIX}{}",
        base64::engine::general_purpose::STANDARD.encode(digest)
    ))
}

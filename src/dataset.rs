//! Content manifests for whole dataset directories.
//!
//! Every visible regular file under a root is listed by its `/`-separated
//! relative path, its SHA-256 and its size. UTF-8 files are hashed after
//! `\r\n` and lone `\r` are rewritten to `\n`, so a checkout with Windows
//! line endings hashes like one with Unix endings. Other files are hashed
//! byte for byte. Names starting with `.` are skipped, directories included.

use crate::error::{PipelineError, Result};
use crate::fingerprint::digest;
use crate::manifest::read_json;
use serde::{Deserialize, Serialize};
use std::borrow::Cow;
use std::collections::{BTreeMap, BTreeSet};
use std::fs;
use std::io;
use std::path::{Component, Path};
use tracing::{debug, info};
use walkdir::{DirEntry, WalkDir};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileEntry {
    pub path: String,
    pub sha256: String,
    /// Size on disk, before any line-ending rewrite
    pub size: u64,
}

/// Files of a directory sorted by relative path.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DirectoryManifest {
    pub files: Vec<FileEntry>,
}

impl DirectoryManifest {
    /// SHA-256 of the compact JSON form. Entry keys serialize in sorted
    /// order, so this is also the sorted-key encoding.
    pub fn hash(&self) -> serde_json::Result<String> {
        Ok(digest(serde_json::to_string(self)?))
    }
}

/// Rewrites `\r\n` and lone `\r` to `\n`.
pub fn normalize_line_endings(data: &[u8]) -> Cow<'_, [u8]> {
    if memchr::memchr(b'\r', data).is_none() {
        return Cow::Borrowed(data);
    }
    let mut out = Vec::with_capacity(data.len());
    let mut bytes = data.iter().copied().peekable();
    while let Some(b) = bytes.next() {
        if b == b'\r' {
            bytes.next_if_eq(&b'\n');
            out.push(b'\n');
        } else {
            out.push(b);
        }
    }
    Cow::Owned(out)
}

/// Digest of a file with line endings normalized when it is valid UTF-8.
pub fn normalized_digest_file(path: &Path) -> io::Result<String> {
    let data = fs::read(path)?;
    if std::str::from_utf8(&data).is_ok() {
        Ok(digest(normalize_line_endings(&data)))
    } else {
        Ok(digest(&data))
    }
}

fn is_hidden(entry: &DirEntry) -> bool {
    entry
        .file_name()
        .to_str()
        .is_some_and(|name| name.starts_with('.'))
}

fn relative_key(root: &Path, path: &Path) -> String {
    path.strip_prefix(root)
        .unwrap_or(path)
        .components()
        .filter_map(|c| match c {
            Component::Normal(part) => Some(part.to_string_lossy()),
            _ => None,
        })
        .collect::<Vec<_>>()
        .join("/")
}

fn read_err(path: &Path, source: io::Error) -> PipelineError {
    PipelineError::DatasetRead {
        path: path.to_path_buf(),
        source,
    }
}

/// Hashes every visible file under `root`.
pub fn scan_directory(root: &Path) -> Result<DirectoryManifest> {
    if !root.is_dir() {
        return Err(PipelineError::SourceNotFound {
            path: root.to_path_buf(),
        });
    }

    let walker = WalkDir::new(root)
        .sort_by_file_name()
        .into_iter()
        .filter_entry(|e| e.depth() == 0 || !is_hidden(e));

    let mut files = Vec::new();
    for entry in walker {
        let entry = entry.map_err(|e| {
            let path = e.path().unwrap_or(root).to_path_buf();
            read_err(&path, e.into())
        })?;
        if !entry.file_type().is_file() {
            continue;
        }

        let path = entry.path();
        let sha256 = normalized_digest_file(path).map_err(|e| read_err(path, e))?;
        let size = entry.metadata().map_err(|e| read_err(path, e.into()))?.len();
        let key = relative_key(root, path);
        debug!(path = %key, size, "Hashed dataset file");

        files.push(FileEntry {
            path: key,
            sha256,
            size,
        });
    }
    files.sort_by(|a, b| a.path.cmp(&b.path));

    info!(root = %root.display(), files = files.len(), "Dataset scanned");
    Ok(DirectoryManifest { files })
}

/// One digest for the whole directory: the hash of its manifest.
pub fn directory_hash(root: &Path) -> Result<String> {
    scan_directory(root)?
        .hash()
        .map_err(|e| read_err(root, e.into()))
}

pub fn load_directory_manifest(path: &Path) -> Result<DirectoryManifest> {
    read_json(path)
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct IntegrityReport {
    pub verified: Vec<String>,
    pub modified: Vec<String>,
    pub missing: Vec<String>,
}

impl IntegrityReport {
    pub fn is_ok(&self) -> bool {
        self.modified.is_empty() && self.missing.is_empty()
    }
}

/// Rehashes every file `manifest` lists under `root`. Files present on disk
/// but absent from the manifest are not reported.
pub fn validate_directory(manifest: &DirectoryManifest, root: &Path) -> Result<IntegrityReport> {
    if !root.is_dir() {
        return Err(PipelineError::SourceNotFound {
            path: root.to_path_buf(),
        });
    }

    let mut report = IntegrityReport::default();
    for entry in &manifest.files {
        let path = root.join(&entry.path);
        if !path.is_file() {
            report.missing.push(entry.path.clone());
            continue;
        }
        let actual = normalized_digest_file(&path).map_err(|e| read_err(&path, e))?;
        if actual == entry.sha256 {
            report.verified.push(entry.path.clone());
        } else {
            report.modified.push(entry.path.clone());
        }
    }
    debug!(ok = report.is_ok(), "Dataset validation finished");
    Ok(report)
}

/// Paths of two directory manifests, bucketed and sorted.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DirectoryComparison {
    pub added: Vec<String>,
    pub removed: Vec<String>,
    pub modified: Vec<String>,
    pub unchanged: Vec<String>,
}

impl DirectoryComparison {
    pub fn is_identical(&self) -> bool {
        self.added.is_empty() && self.removed.is_empty() && self.modified.is_empty()
    }
}

pub fn compare_directories(
    old: &DirectoryManifest,
    new: &DirectoryManifest,
) -> DirectoryComparison {
    let index = |m: &DirectoryManifest| -> BTreeMap<String, String> {
        m.files
            .iter()
            .map(|f| (f.path.clone(), f.sha256.clone()))
            .collect()
    };
    let old_files = index(old);
    let new_files = index(new);
    let paths: BTreeSet<&String> = old_files.keys().chain(new_files.keys()).collect();

    let mut result = DirectoryComparison::default();
    for path in paths {
        let bucket = match (old_files.get(path), new_files.get(path)) {
            (Some(_), None) => &mut result.removed,
            (None, Some(_)) => &mut result.added,
            (Some(a), Some(b)) if a != b => &mut result.modified,
            _ => &mut result.unchanged,
        };
        bucket.push(path.clone());
    }
    result
}

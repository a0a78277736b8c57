use crate::config::{PREPROCESSING_VERSION, RUNTIME_VERSION, UNKNOWN_DUMP_DATE};
use crate::error::{PipelineError, Result};
use crate::fingerprint::{digest, fingerprint_file, Fingerprint};
use crate::models::DumpSource;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::fs::{self, File};
use std::io::{self, BufWriter, Write};
use std::num::NonZeroUsize;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

/// Identity record of one dataset build.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Manifest {
    pub wikipedia_dump: String,
    pub dump_date: String,
    pub raw_sha256: String,
    pub processed_sha256: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub raw_merkle_root: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub processed_merkle_root: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub chunk_size_bytes: Option<u64>,
    pub preprocessing_version: String,
    pub runtime_version: String,
}

impl Manifest {
    /// Merkle fields are filled only when `merkle_chunk_size` is set and both
    /// fingerprints carry a root.
    pub fn new(
        source: &DumpSource,
        raw: &Fingerprint,
        processed: &Fingerprint,
        merkle_chunk_size: Option<NonZeroUsize>,
    ) -> Self {
        let merkle = match (merkle_chunk_size, &raw.merkle_root, &processed.merkle_root) {
            (Some(size), Some(raw_root), Some(processed_root)) => {
                Some((size.get() as u64, raw_root.clone(), processed_root.clone()))
            }
            _ => None,
        };

        Self {
            wikipedia_dump: source.file_name.clone(),
            dump_date: source.dump_date.clone(),
            raw_sha256: raw.sha256.clone(),
            processed_sha256: processed.sha256.clone(),
            raw_merkle_root: merkle.as_ref().map(|m| m.1.clone()),
            processed_merkle_root: merkle.as_ref().map(|m| m.2.clone()),
            chunk_size_bytes: merkle.map(|m| m.0),
            preprocessing_version: PREPROCESSING_VERSION.to_string(),
            runtime_version: RUNTIME_VERSION.to_string(),
        }
    }

    /// Fields in their fixed serialization order.
    pub fn fields(&self) -> [(&'static str, Option<String>); 9] {
        [
            ("wikipedia_dump", Some(self.wikipedia_dump.clone())),
            ("dump_date", Some(self.dump_date.clone())),
            ("raw_sha256", Some(self.raw_sha256.clone())),
            ("processed_sha256", Some(self.processed_sha256.clone())),
            ("raw_merkle_root", self.raw_merkle_root.clone()),
            ("processed_merkle_root", self.processed_merkle_root.clone()),
            ("chunk_size_bytes", self.chunk_size_bytes.map(|n| n.to_string())),
            ("preprocessing_version", Some(self.preprocessing_version.clone())),
            ("runtime_version", Some(self.runtime_version.clone())),
        ]
    }

    /// Compact JSON with keys in sorted order, independent of field order.
    pub fn canonical_json(&self) -> serde_json::Result<String> {
        let sorted: BTreeMap<String, Value> = match serde_json::to_value(self)? {
            Value::Object(map) => map.into_iter().collect(),
            _ => BTreeMap::new(),
        };
        serde_json::to_string(&sorted)
    }

    /// SHA-256 of [`Manifest::canonical_json`], one digest naming the whole build.
    pub fn canonical_hash(&self) -> serde_json::Result<String> {
        Ok(digest(self.canonical_json()?))
    }
}

/// `YYYY-MM-DD` from the first `-`-separated token of exactly eight ASCII
/// digits, else `"unknown"`. File metadata is never consulted.
pub fn extract_dump_date(file_name: &str) -> String {
    file_name
        .split('-')
        .find(|part| part.len() == 8 && part.bytes().all(|b| b.is_ascii_digit()))
        .map(|d| format!("{}-{}-{}", &d[..4], &d[4..6], &d[6..]))
        .unwrap_or_else(|| UNKNOWN_DUMP_DATE.to_string())
}

/// Writes `manifest` as pretty JSON, replacing any previous file wholesale.
pub fn write_manifest<T: Serialize>(manifest: &T, path: &Path) -> Result<()> {
    stage_manifest(manifest, path)?.commit()
}

/// Serializes `manifest` next to `path` without touching `path` itself.
///
/// Nothing becomes visible until [`StagedManifest::commit`]; dropping the
/// staged value removes the temporary file.
pub fn stage_manifest<T: Serialize>(manifest: &T, path: &Path) -> Result<StagedManifest> {
    let write_err = |source: io::Error| PipelineError::ManifestWrite {
        path: path.to_path_buf(),
        source,
    };

    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent).map_err(write_err)?;
    }

    let tmp_path = path.with_extension("json.tmp");
    let result = (|| -> io::Result<()> {
        let mut writer = BufWriter::new(File::create(&tmp_path)?);
        serde_json::to_writer_pretty(&mut writer, manifest)?;
        writer.write_all(b"\n")?;
        writer.into_inner().map_err(|e| e.into_error())?.sync_all()
    })();

    if let Err(e) = result {
        if tmp_path.is_file() {
            let _ = fs::remove_file(&tmp_path);
        }
        return Err(write_err(e));
    }

    Ok(StagedManifest {
        tmp_path,
        path: path.to_path_buf(),
        committed: false,
    })
}

/// A fully written manifest waiting to be moved over its destination.
#[derive(Debug)]
pub struct StagedManifest {
    tmp_path: PathBuf,
    path: PathBuf,
    committed: bool,
}

impl StagedManifest {
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Renames the staged file into place.
    pub fn commit(mut self) -> Result<()> {
        fs::rename(&self.tmp_path, &self.path).map_err(|source| {
            PipelineError::ManifestWrite {
                path: self.path.clone(),
                source,
            }
        })?;
        self.committed = true;
        info!(path = %self.path.display(), "Manifest written");
        Ok(())
    }
}

impl Drop for StagedManifest {
    fn drop(&mut self) {
        if !self.committed && self.tmp_path.is_file() {
            if let Err(e) = fs::remove_file(&self.tmp_path) {
                warn!(error = %e, path = %self.tmp_path.display(), "Failed to remove staged manifest");
            }
        }
    }
}

pub fn load_manifest(path: &Path) -> Result<Manifest> {
    read_json(path)
}

pub(crate) fn read_json<T: DeserializeOwned>(path: &Path) -> Result<T> {
    let read_err = |message: String| PipelineError::ManifestRead {
        path: path.to_path_buf(),
        message,
    };
    let content = fs::read_to_string(path).map_err(|e| read_err(e.to_string()))?;
    serde_json::from_str(&content).map_err(|e| read_err(e.to_string()))
}

/// Expected versus recomputed value of one digest.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DigestCheck {
    pub expected: String,
    pub actual: String,
}

impl DigestCheck {
    pub fn matches(&self) -> bool {
        self.expected == self.actual
    }
}

#[derive(Debug, Clone)]
pub struct VerifyReport {
    pub dump_name_matches: bool,
    pub raw_sha256: DigestCheck,
    pub processed_sha256: DigestCheck,
    pub raw_merkle_root: Option<DigestCheck>,
    pub processed_merkle_root: Option<DigestCheck>,
}

impl VerifyReport {
    pub fn is_ok(&self) -> bool {
        self.dump_name_matches
            && self.raw_sha256.matches()
            && self.processed_sha256.matches()
            && self.raw_merkle_root.as_ref().map_or(true, DigestCheck::matches)
            && self
                .processed_merkle_root
                .as_ref()
                .map_or(true, DigestCheck::matches)
    }
}

/// Rehashes the dump and corpus files and compares them against `manifest`.
pub fn verify(manifest: &Manifest, dump_path: &Path, corpus_path: &Path) -> Result<VerifyReport> {
    let chunk_size = manifest
        .chunk_size_bytes
        .and_then(|n| usize::try_from(n).ok())
        .and_then(NonZeroUsize::new);

    let raw = rehash(dump_path, chunk_size)?;
    let processed = rehash(corpus_path, chunk_size)?;
    let dump_name = DumpSource::from_path(dump_path).file_name;

    let check = |expected: &str, actual: &str| DigestCheck {
        expected: expected.to_string(),
        actual: actual.to_string(),
    };
    let check_root = |expected: &Option<String>, actual: &Option<String>| {
        expected
            .as_deref()
            .map(|e| check(e, actual.as_deref().unwrap_or_default()))
    };

    let report = VerifyReport {
        dump_name_matches: dump_name == manifest.wikipedia_dump,
        raw_sha256: check(&manifest.raw_sha256, &raw.sha256),
        processed_sha256: check(&manifest.processed_sha256, &processed.sha256),
        raw_merkle_root: check_root(&manifest.raw_merkle_root, &raw.merkle_root),
        processed_merkle_root: check_root(
            &manifest.processed_merkle_root,
            &processed.merkle_root,
        ),
    };
    debug!(ok = report.is_ok(), "Verification finished");
    Ok(report)
}

fn rehash(path: &Path, chunk_size: Option<NonZeroUsize>) -> Result<Fingerprint> {
    if !path.is_file() {
        return Err(PipelineError::SourceNotFound {
            path: path.to_path_buf(),
        });
    }
    fingerprint_file(path, chunk_size).map_err(|source| PipelineError::CorruptArchive {
        path: path.to_path_buf(),
        source,
    })
}

/// One field that differs between two manifests.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldChange {
    pub field: &'static str,
    pub left: Option<String>,
    pub right: Option<String>,
}

/// Field-by-field comparison in serialization order.
pub fn diff(left: &Manifest, right: &Manifest) -> Vec<FieldChange> {
    left.fields()
        .into_iter()
        .zip(right.fields())
        .filter(|((_, l), (_, r))| l != r)
        .map(|((field, l), (_, r))| FieldChange {
            field,
            left: l,
            right: r,
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn fp(data: &str) -> Fingerprint {
        Fingerprint {
            sha256: digest(data),
            merkle_root: None,
            bytes: data.len() as u64,
        }
    }

    fn sample() -> Manifest {
        let source = DumpSource {
            file_name: "simplewiki-20260201-pages-articles.xml.bz2".to_string(),
            dump_date: "2026-02-01".to_string(),
        };
        let mut manifest = Manifest::new(&source, &fp("raw"), &fp("processed"), None);
        manifest.runtime_version = "rustc 1.87.0".to_string();
        manifest
    }

    #[test]
    fn dump_date_valid() {
        assert_eq!(
            extract_dump_date("simplewiki-20260201-pages-articles.xml.bz2"),
            "2026-02-01"
        );
    }

    #[test]
    fn dump_date_missing_is_unknown() {
        assert_eq!(extract_dump_date("no-date-file.xml.bz2"), "unknown");
        assert_eq!(extract_dump_date(""), "unknown");
    }

    #[test]
    fn dump_date_requires_whole_token() {
        assert_eq!(extract_dump_date("enwiki-202602011-pages.xml"), "unknown");
        assert_eq!(extract_dump_date("enwiki-2026020.xml"), "unknown");
        assert_eq!(extract_dump_date("enwiki-latest-20250101"), "2025-01-01");
    }

    #[test]
    fn dump_date_rejects_non_ascii_digits() {
        // Arabic-Indic digits
        assert_eq!(extract_dump_date("wiki-٢٠٢٦٠٢٠١-pages"), "unknown");
    }

    #[test]
    fn serializes_exactly_the_base_fields_without_merkle() {
        let json: Value = serde_json::to_value(sample()).unwrap();
        let mut keys: Vec<_> = json.as_object().unwrap().keys().cloned().collect();
        keys.sort();
        assert_eq!(
            keys,
            vec![
                "dump_date",
                "preprocessing_version",
                "processed_sha256",
                "raw_sha256",
                "runtime_version",
                "wikipedia_dump",
            ]
        );
    }

    #[test]
    fn merkle_fields_present_when_enabled() {
        let source = DumpSource::from_path(Path::new("x-20240101-y.xml.bz2"));
        let mut raw = fp("raw");
        raw.merkle_root = Some("aa".repeat(32));
        let mut processed = fp("processed");
        processed.merkle_root = Some("bb".repeat(32));

        let manifest = Manifest::new(&source, &raw, &processed, NonZeroUsize::new(1024));
        assert_eq!(manifest.chunk_size_bytes, Some(1024));
        assert_eq!(manifest.raw_merkle_root, raw.merkle_root);

        let json = serde_json::to_string(&manifest).unwrap();
        assert!(json.contains("raw_merkle_root"));
        assert!(json.contains("processed_merkle_root"));
        assert!(json.contains("chunk_size_bytes"));
    }

    #[test]
    fn default_versions_come_from_config() {
        let source = DumpSource::from_path(Path::new("dump.xml.bz2"));
        let manifest = Manifest::new(&source, &fp("a"), &fp("b"), None);
        assert_eq!(manifest.preprocessing_version, PREPROCESSING_VERSION);
        assert_eq!(manifest.runtime_version, RUNTIME_VERSION);
        assert!(!manifest.runtime_version.is_empty());
    }

    #[test]
    fn write_then_load() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("data").join("dataset_manifest.json");
        write_manifest(&sample(), &path).unwrap();

        assert!(path.exists());
        assert!(!path.with_extension("json.tmp").exists());
        assert_eq!(load_manifest(&path).unwrap(), sample());
    }

    #[test]
    fn staged_manifest_is_invisible_until_commit() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("dataset_manifest.json");
        fs::write(&path, "{\"stale\": true}").unwrap();

        let staged = stage_manifest(&sample(), &path).unwrap();
        assert_eq!(staged.path(), path.as_path());
        assert!(path.with_extension("json.tmp").is_file());
        assert_eq!(fs::read_to_string(&path).unwrap(), "{\"stale\": true}");

        staged.commit().unwrap();
        assert_eq!(load_manifest(&path).unwrap(), sample());
        assert!(!path.with_extension("json.tmp").exists());
    }

    #[test]
    fn dropped_stage_leaves_destination_alone() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("dataset_manifest.json");

        let staged = stage_manifest(&sample(), &path).unwrap();
        drop(staged);
        assert!(!path.exists());
        assert!(!path.with_extension("json.tmp").exists());
    }

    #[test]
    fn blocked_stage_path_is_manifest_write_error() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("dataset_manifest.json");
        fs::create_dir(path.with_extension("json.tmp")).unwrap();

        let err = stage_manifest(&sample(), &path).unwrap_err();
        assert!(matches!(err, PipelineError::ManifestWrite { .. }));
        assert!(path.with_extension("json.tmp").is_dir());
    }

    #[test]
    fn write_overwrites_wholesale() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("dataset_manifest.json");
        fs::write(&path, "{\"stale\": true}").unwrap();

        write_manifest(&sample(), &path).unwrap();
        let content = fs::read_to_string(&path).unwrap();
        assert!(!content.contains("stale"));
        assert_eq!(load_manifest(&path).unwrap(), sample());
    }

    #[test]
    fn write_to_unwritable_location_is_manifest_write_error() {
        let dir = TempDir::new().unwrap();
        let blocker = dir.path().join("not_a_dir");
        fs::write(&blocker, "file").unwrap();
        let path = blocker.join("dataset_manifest.json");

        let err = write_manifest(&sample(), &path).unwrap_err();
        assert!(matches!(err, PipelineError::ManifestWrite { .. }));
        assert_eq!(err.kind(), "ManifestWriteError");
    }

    #[test]
    fn load_missing_is_manifest_read_error() {
        let err = load_manifest(Path::new("/no/such/manifest.json")).unwrap_err();
        assert!(matches!(err, PipelineError::ManifestRead { .. }));
    }

    #[test]
    fn canonical_hash_is_stable_and_content_sensitive() {
        let a = sample();
        assert_eq!(a.canonical_hash().unwrap(), a.canonical_hash().unwrap());
        assert_eq!(a.canonical_hash().unwrap().len(), 64);

        let mut b = sample();
        b.processed_sha256 = digest("other");
        assert_ne!(a.canonical_hash().unwrap(), b.canonical_hash().unwrap());
    }

    #[test]
    fn canonical_json_sorts_keys() {
        let json = sample().canonical_json().unwrap();
        assert!(json.starts_with("{\"dump_date\":"));
        assert!(json.ends_with(&format!("\"wikipedia_dump\":\"{}\"}}", sample().wikipedia_dump)));
        assert!(!json.contains('\n'));
    }

    #[test]
    fn diff_lists_changed_fields_in_order() {
        let a = sample();
        let mut b = sample();
        b.processed_sha256 = digest("other");
        b.runtime_version = "rustc 1.90.0".to_string();

        let changes = diff(&a, &b);
        let fields: Vec<_> = changes.iter().map(|c| c.field).collect();
        assert_eq!(fields, vec!["processed_sha256", "runtime_version"]);
        assert_eq!(changes[1].right.as_deref(), Some("rustc 1.90.0"));
        assert!(diff(&a, &a).is_empty());
    }

    #[test]
    fn verify_detects_modified_corpus() {
        let dir = TempDir::new().unwrap();
        let dump = dir.path().join("simplewiki-20260201-pages-articles.xml.bz2");
        let corpus = dir.path().join("wiki_clean.txt");
        fs::write(&dump, b"raw bytes").unwrap();
        fs::write(&corpus, b"Hello world.").unwrap();

        let source = DumpSource::from_path(&dump);
        let manifest = Manifest::new(&source, &fp("raw bytes"), &fp("Hello world."), None);

        let report = verify(&manifest, &dump, &corpus).unwrap();
        assert!(report.is_ok());

        fs::write(&corpus, b"Hello world!").unwrap();
        let report = verify(&manifest, &dump, &corpus).unwrap();
        assert!(report.raw_sha256.matches());
        assert!(!report.processed_sha256.matches());
        assert!(!report.is_ok());
    }

    #[test]
    fn verify_missing_corpus_is_source_not_found() {
        let dir = TempDir::new().unwrap();
        let dump = dir.path().join("dump.xml.bz2");
        fs::write(&dump, b"raw").unwrap();
        let err = verify(&sample(), &dump, &dir.path().join("missing.txt")).unwrap_err();
        assert!(matches!(err, PipelineError::SourceNotFound { .. }));
    }
}

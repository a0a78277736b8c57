use std::num::NonZeroUsize;
use std::path::{Path, PathBuf};

/// Version tag of the normalization rules. Bump whenever any rewrite in
/// `normalize` changes, since that changes every processed fingerprint.
pub const PREPROCESSING_VERSION: &str = "v1";

/// `rustc --version` of the toolchain that built this binary
pub const RUNTIME_VERSION: &str = env!("WIKIPRINT_RUSTC_VERSION");

/// Chunk size for streaming digests (1 MiB)
pub const HASH_CHUNK_SIZE: usize = 1024 * 1024;

/// Buffer size for the decompressed XML stream
pub const READ_BUFFER_SIZE: usize = 1024 * 1024;

/// Buffer size for the corpus writer
pub const WRITE_BUFFER_SIZE: usize = 128 * 1024;

/// Separator written between consecutive articles in the processed corpus
pub const ARTICLE_SEPARATOR: &[u8] = b" ";

/// Sentinel recorded when a dump file name carries no date token
pub const UNKNOWN_DUMP_DATE: &str = "unknown";

/// Corpus location, relative to the output directory
pub const CORPUS_RELATIVE_PATH: &str = "processed/wiki_clean.txt";

/// Manifest location, relative to the output directory
pub const MANIFEST_FILE_NAME: &str = "dataset_manifest.json";

/// Progress update interval (tick every N articles)
pub const PROGRESS_INTERVAL: u64 = 1000;

/// Settings for one pipeline invocation.
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    pub input: PathBuf,
    pub output_dir: PathBuf,
    /// Also compute Merkle roots over chunks of this many bytes
    pub merkle_chunk_size: Option<NonZeroUsize>,
    pub corpus_path: Option<PathBuf>,
    pub manifest_path: Option<PathBuf>,
    pub show_progress: bool,
}

impl PipelineConfig {
    pub fn new(input: impl Into<PathBuf>, output_dir: impl Into<PathBuf>) -> Self {
        Self {
            input: input.into(),
            output_dir: output_dir.into(),
            merkle_chunk_size: None,
            corpus_path: None,
            manifest_path: None,
            show_progress: false,
        }
    }

    pub fn with_merkle_chunk_size(mut self, chunk_size: NonZeroUsize) -> Self {
        self.merkle_chunk_size = Some(chunk_size);
        self
    }

    pub fn with_corpus_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.corpus_path = Some(path.into());
        self
    }

    pub fn with_manifest_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.manifest_path = Some(path.into());
        self
    }

    pub fn with_progress(mut self, show: bool) -> Self {
        self.show_progress = show;
        self
    }

    pub fn corpus_path(&self) -> PathBuf {
        self.corpus_path
            .clone()
            .unwrap_or_else(|| default_corpus_path(&self.output_dir))
    }

    pub fn manifest_path(&self) -> PathBuf {
        self.manifest_path
            .clone()
            .unwrap_or_else(|| default_manifest_path(&self.output_dir))
    }
}

pub fn default_corpus_path(output_dir: &Path) -> PathBuf {
    output_dir.join(CORPUS_RELATIVE_PATH)
}

pub fn default_manifest_path(output_dir: &Path) -> PathBuf {
    output_dir.join(MANIFEST_FILE_NAME)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_paths_are_rooted_at_output_dir() {
        let config = PipelineConfig::new("dump.xml.bz2", "/out");
        assert_eq!(
            config.corpus_path(),
            PathBuf::from("/out/processed/wiki_clean.txt")
        );
        assert_eq!(
            config.manifest_path(),
            PathBuf::from("/out/dataset_manifest.json")
        );
    }

    #[test]
    fn explicit_paths_override_defaults() {
        let config = PipelineConfig::new("dump.xml.bz2", "/out")
            .with_corpus_path("/elsewhere/corpus.txt")
            .with_manifest_path("/elsewhere/manifest.json");
        assert_eq!(config.corpus_path(), PathBuf::from("/elsewhere/corpus.txt"));
        assert_eq!(
            config.manifest_path(),
            PathBuf::from("/elsewhere/manifest.json")
        );
    }

    #[test]
    fn merkle_disabled_by_default() {
        let config = PipelineConfig::new("a", "b");
        assert!(config.merkle_chunk_size.is_none());
        let size = NonZeroUsize::new(4096).unwrap();
        assert_eq!(
            config.with_merkle_chunk_size(size).merkle_chunk_size,
            Some(size)
        );
    }
}

use crate::config::{PipelineConfig, ARTICLE_SEPARATOR, PROGRESS_INTERVAL, WRITE_BUFFER_SIZE};
use crate::dump::DumpStream;
use crate::error::{PipelineError, Result};
use crate::fingerprint::{Fingerprint, Fingerprinter, HashingWriter};
use crate::manifest::{stage_manifest, Manifest, StagedManifest};
use crate::models::DumpSource;
use crate::normalize::normalize;
use crate::parser::WikiReader;
use crate::stats::PipelineStats;
use indicatif::ProgressBar;
use std::fs::{self, File};
use std::io::{self, BufWriter, Write};
use std::path::{Path, PathBuf};
use tracing::{info, trace, warn};

const TMP_SUFFIX: &str = ".tmp";
const BACKUP_SUFFIX: &str = ".bak";

/// Everything a successful run produced.
#[derive(Debug, Clone)]
pub struct PipelineOutcome {
    pub manifest: Manifest,
    pub corpus_path: PathBuf,
    pub manifest_path: PathBuf,
    pub stats: PipelineStats,
}

/// Runs extraction, normalization, fingerprinting and manifest emission for
/// one dump.
///
/// The corpus is built in a temporary file next to its destination and the
/// manifest is staged next to its own. Only when both exist are they moved
/// into place. On any error the temporary files are removed and the existing
/// corpus and manifest are left as they were.
pub fn run_pipeline(config: &PipelineConfig) -> Result<PipelineOutcome> {
    let source = DumpSource::from_path(&config.input);
    let corpus_path = config.corpus_path();
    let manifest_path = config.manifest_path();
    let tmp_path = sibling_path(&corpus_path, TMP_SUFFIX);

    info!(
        input = %config.input.display(),
        dump_date = %source.dump_date,
        "Starting extraction"
    );

    let mut stats = PipelineStats::new();
    let staged = build_corpus(config, &corpus_path, &tmp_path, &mut stats).and_then(
        |(raw, processed)| {
            stats.raw_bytes = raw.bytes;
            stats.processed_bytes = processed.bytes;
            let manifest = Manifest::new(&source, &raw, &processed, config.merkle_chunk_size);
            let staged = stage_manifest(&manifest, &manifest_path)?;
            Ok((manifest, staged))
        },
    );
    let (manifest, staged) = match staged {
        Ok(staged) => staged,
        Err(e) => {
            remove_leftover(&tmp_path);
            return Err(e);
        }
    };

    commit_outputs(&tmp_path, &corpus_path, staged)?;

    info!(
        articles = stats.articles(),
        empty = stats.empty(),
        raw_sha256 = %manifest.raw_sha256,
        processed_sha256 = %manifest.processed_sha256,
        "Pipeline complete"
    );

    Ok(PipelineOutcome {
        manifest,
        corpus_path,
        manifest_path,
        stats,
    })
}

/// Moves the new corpus and the staged manifest into place as a pair.
///
/// A previous corpus is set aside first and put back if either step fails,
/// so the corpus on disk always matches the manifest beside it.
fn commit_outputs(tmp_corpus: &Path, corpus_path: &Path, staged: StagedManifest) -> Result<()> {
    let corpus_err = |source: io::Error| PipelineError::CorpusWrite {
        path: corpus_path.to_path_buf(),
        source,
    };

    let backup = corpus_path
        .is_file()
        .then(|| sibling_path(corpus_path, BACKUP_SUFFIX));
    if let Some(backup) = &backup {
        if let Err(e) = fs::rename(corpus_path, backup) {
            remove_leftover(tmp_corpus);
            return Err(corpus_err(e));
        }
    }

    if let Err(e) = fs::rename(tmp_corpus, corpus_path) {
        remove_leftover(tmp_corpus);
        restore_corpus(corpus_path, backup.as_deref());
        return Err(corpus_err(e));
    }

    if let Err(e) = staged.commit() {
        restore_corpus(corpus_path, backup.as_deref());
        return Err(e);
    }

    if let Some(backup) = &backup {
        remove_leftover(backup);
    }
    Ok(())
}

fn restore_corpus(corpus_path: &Path, backup: Option<&Path>) {
    let result = match backup {
        Some(backup) => fs::rename(backup, corpus_path),
        None if corpus_path.is_file() => fs::remove_file(corpus_path),
        None => Ok(()),
    };
    if let Err(e) = result {
        warn!(error = %e, path = %corpus_path.display(), "Failed to restore previous corpus");
    }
}

fn remove_leftover(path: &Path) {
    if path.is_file() {
        if let Err(e) = fs::remove_file(path) {
            warn!(error = %e, path = %path.display(), "Failed to remove leftover file");
        }
    }
}

/// Streams every article into `tmp_path`, returning the raw and processed
/// fingerprints.
fn build_corpus(
    config: &PipelineConfig,
    corpus_path: &Path,
    tmp_path: &Path,
    stats: &mut PipelineStats,
) -> Result<(Fingerprint, Fingerprint)> {
    let corpus_err = |source: io::Error| PipelineError::CorpusWrite {
        path: corpus_path.to_path_buf(),
        source,
    };

    let mut reader = WikiReader::open(&config.input, config.merkle_chunk_size)?;

    if let Some(parent) = tmp_path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent).map_err(corpus_err)?;
    }
    let file = File::create(tmp_path).map_err(corpus_err)?;
    let mut writer = HashingWriter::new(
        BufWriter::with_capacity(WRITE_BUFFER_SIZE, file),
        Fingerprinter::from_option(config.merkle_chunk_size),
    );

    let pb = if config.show_progress {
        ProgressBar::new_spinner()
    } else {
        ProgressBar::hidden()
    };

    write_articles(&mut reader, &mut writer, stats, &pb, corpus_err)?;
    pb.finish_and_clear();

    let (buffered, processed) = writer.finish().map_err(corpus_err)?;
    let file = buffered
        .into_inner()
        .map_err(|e| corpus_err(e.into_error()))?;
    file.sync_all().map_err(corpus_err)?;

    let raw = reader.into_inner().finish()?;
    Ok((raw, processed))
}

fn write_articles<W: Write>(
    reader: &mut WikiReader<DumpStream>,
    writer: &mut HashingWriter<W>,
    stats: &mut PipelineStats,
    pb: &ProgressBar,
    corpus_err: impl Fn(io::Error) -> PipelineError,
) -> Result<()> {
    while let Some(record) = reader.next() {
        let record = record?;
        let normalized = normalize(&record.text).map_err(|e| {
            PipelineError::parse(
                reader.byte_offset(),
                format!("malformed wikitext in page \"{}\": {}", record.title, e),
            )
        })?;

        if stats.articles() > 0 {
            writer.write_all(ARTICLE_SEPARATOR).map_err(&corpus_err)?;
        }
        writer
            .write_all(normalized.as_bytes())
            .map_err(&corpus_err)?;
        stats.record_article(&normalized);

        trace!(
            title = %record.title,
            id = ?record.id,
            ns = ?record.ns,
            bytes = normalized.len(),
            "Article normalized"
        );

        if stats.articles() % PROGRESS_INTERVAL == 0 {
            pb.set_message(format!(
                "{} articles, {} MiB read, {} MiB written",
                stats.articles(),
                reader.raw_bytes_read() / (1024 * 1024),
                writer.bytes_written() / (1024 * 1024)
            ));
            pb.tick();
        }
    }
    Ok(())
}

fn sibling_path(path: &Path, suffix: &str) -> PathBuf {
    let mut name = path
        .file_name()
        .map(|n| n.to_os_string())
        .unwrap_or_default();
    name.push(suffix);
    path.with_file_name(name)
}

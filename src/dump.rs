use crate::error::{PipelineError, Result};
use crate::fingerprint::{Fingerprint, Fingerprinter, HashingReader};
use bzip2::read::MultiBzDecoder;
use std::fs::File;
use std::io::{self, Read};
use std::num::NonZeroUsize;
use std::path::{Path, PathBuf};
use tracing::debug;

enum Decoder {
    /// Multistream dumps are concatenated bzip2 streams
    Bzip2(MultiBzDecoder<HashingReader<File>>),
    Plain(HashingReader<File>),
}

/// Forward-only decompressed view of a dump file.
///
/// Compressed bytes are fingerprinted as they come off the disk, so the raw
/// digest falls out of the same pass that feeds the XML parser.
pub struct DumpStream {
    path: PathBuf,
    decoder: Decoder,
}

/// Opens `path` for streaming. `.bz2` files are decompressed, anything else
/// is read as plain XML.
pub fn open_dump(
    path: impl AsRef<Path>,
    merkle_chunk_size: Option<NonZeroUsize>,
) -> Result<DumpStream> {
    let path = path.as_ref();
    if !path.is_file() {
        return Err(PipelineError::SourceNotFound {
            path: path.to_path_buf(),
        });
    }

    let file = File::open(path).map_err(|e| match e.kind() {
        io::ErrorKind::NotFound => PipelineError::SourceNotFound {
            path: path.to_path_buf(),
        },
        _ => PipelineError::CorruptArchive {
            path: path.to_path_buf(),
            source: e,
        },
    })?;
    let raw = HashingReader::new(file, Fingerprinter::from_option(merkle_chunk_size));

    let decoder = if is_bzip2(path) {
        debug!(path = %path.display(), "Opening bzip2 dump");
        Decoder::Bzip2(MultiBzDecoder::new(raw))
    } else {
        debug!(path = %path.display(), "Opening uncompressed dump");
        Decoder::Plain(raw)
    };

    Ok(DumpStream {
        path: path.to_path_buf(),
        decoder,
    })
}

fn is_bzip2(path: &Path) -> bool {
    path.extension()
        .map(|e| e.eq_ignore_ascii_case("bz2"))
        .unwrap_or(false)
}

impl DumpStream {
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Compressed bytes consumed from disk so far.
    pub fn raw_bytes_read(&self) -> u64 {
        match &self.decoder {
            Decoder::Bzip2(d) => d.get_ref().bytes_read(),
            Decoder::Plain(r) => r.bytes_read(),
        }
    }

    /// Consumes any bytes the decoder left unread and returns the fingerprint
    /// of the whole file.
    pub fn finish(self) -> Result<Fingerprint> {
        let raw = match self.decoder {
            Decoder::Bzip2(d) => d.into_inner(),
            Decoder::Plain(r) => r,
        };
        raw.finish().map_err(|source| PipelineError::CorruptArchive {
            path: self.path,
            source,
        })
    }
}

impl Read for DumpStream {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        match &mut self.decoder {
            Decoder::Bzip2(d) => d.read(buf),
            Decoder::Plain(r) => r.read(buf),
        }
    }
}

//! Pull-based extraction of page records from a MediaWiki XML export.
//!
//! Only the open element path and the page under construction are kept in
//! memory. Each `</page>` hands out a finished [`ArticleRecord`] and the
//! reader forgets it, so memory stays bounded by the largest single page.

use crate::config::READ_BUFFER_SIZE;
use crate::dump::{open_dump, DumpStream};
use crate::error::{PipelineError, Result};
use crate::models::ArticleRecord;
use quick_xml::events::Event;
use quick_xml::reader::Reader;
use std::io::{self, BufReader, Read};
use std::num::NonZeroUsize;
use std::path::{Path, PathBuf};
use tracing::trace;

const PAGE: &[u8] = b"page";
const TITLE: &[u8] = b"title";
const ID: &[u8] = b"id";
const NS: &[u8] = b"ns";
const TEXT: &[u8] = b"text";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Field {
    Title,
    Id,
    Ns,
    Text,
}

#[derive(Default)]
struct PartialPage {
    id: Option<u64>,
    ns: Option<i32>,
    title: Option<String>,
    text: Option<String>,
}

impl PartialPage {
    fn into_record(self) -> ArticleRecord {
        ArticleRecord {
            id: self.id,
            ns: self.ns,
            title: self.title.unwrap_or_default(),
            text: self.text.unwrap_or_default(),
        }
    }
}

/// Iterator over the pages of a dump, in document order.
///
/// The sequence is finite and single-use. The first error ends it: malformed
/// regions are never skipped.
pub struct WikiReader<R: Read> {
    reader: Reader<BufReader<R>>,
    source: PathBuf,
    buf: Vec<u8>,
    /// Local names of the currently open elements, outermost first
    open: Vec<Vec<u8>>,
    page: Option<PartialPage>,
    /// Field being captured and the depth of its element
    capture: Option<(Field, usize)>,
    text_buf: String,
    seen_root: bool,
    done: bool,
}

impl WikiReader<DumpStream> {
    pub fn open(
        path: impl AsRef<Path>,
        merkle_chunk_size: Option<NonZeroUsize>,
    ) -> Result<Self> {
        let stream = open_dump(path, merkle_chunk_size)?;
        Ok(Self::new(stream))
    }

    pub fn new(stream: DumpStream) -> Self {
        let source = stream.path().to_path_buf();
        Self::from_reader(stream, source)
    }

    pub fn raw_bytes_read(&self) -> u64 {
        self.reader.get_ref().get_ref().raw_bytes_read()
    }
}

impl<R: Read> WikiReader<R> {
    /// `source` names the input in error messages.
    pub fn from_reader(inner: R, source: impl Into<PathBuf>) -> Self {
        let reader = Reader::from_reader(BufReader::with_capacity(READ_BUFFER_SIZE, inner));
        Self {
            reader,
            source: source.into(),
            buf: Vec::with_capacity(8192),
            open: Vec::new(),
            page: None,
            capture: None,
            text_buf: String::new(),
            seen_root: false,
            done: false,
        }
    }

    /// Decompressed bytes consumed by the XML reader so far.
    pub fn byte_offset(&self) -> u64 {
        self.reader.buffer_position() as u64
    }

    /// Hands back the underlying stream, e.g. to finish its fingerprint.
    pub fn into_inner(self) -> R {
        self.reader.into_inner().into_inner()
    }

    fn next_page(&mut self) -> Result<Option<ArticleRecord>> {
        let mut buf = std::mem::take(&mut self.buf);
        let result = self.pump(&mut buf);
        buf.clear();
        self.buf = buf;
        result
    }

    fn pump(&mut self, buf: &mut Vec<u8>) -> Result<Option<ArticleRecord>> {
        loop {
            buf.clear();
            let event = self
                .reader
                .read_event_into(buf)
                .map_err(|e| self.xml_error(e))?;

            match event {
                Event::Start(e) => {
                    self.open_element(e.local_name().as_ref())?;
                }
                Event::Empty(e) => {
                    let name = e.local_name();
                    self.open_element(name.as_ref())?;
                    if let Some(record) = self.close_element(name.as_ref())? {
                        return Ok(Some(record));
                    }
                }
                Event::End(e) => {
                    if let Some(record) = self.close_element(e.local_name().as_ref())? {
                        return Ok(Some(record));
                    }
                }
                Event::Text(e) => {
                    if self.capture.is_some() {
                        let text = e.unescape().map_err(|err| self.xml_error(err))?;
                        self.text_buf.push_str(&text);
                    }
                }
                Event::CData(e) => {
                    if self.capture.is_some() {
                        let text = std::str::from_utf8(&e).map_err(|err| {
                            PipelineError::parse(
                                self.byte_offset(),
                                format!("CDATA is not UTF-8: {err}"),
                            )
                        })?;
                        self.text_buf.push_str(text);
                    }
                }
                Event::Eof => return self.end_of_input(),
                _ => {}
            }
        }
    }

    fn open_element(&mut self, name: &[u8]) -> Result<()> {
        if self.open.is_empty() {
            if self.seen_root {
                return Err(PipelineError::parse(
                    self.byte_offset(),
                    format!("second root element <{}>", String::from_utf8_lossy(name)),
                ));
            }
            self.seen_root = true;
        }

        if name == PAGE {
            if self.page.is_some() {
                return Err(PipelineError::parse(
                    self.byte_offset(),
                    "<page> nested inside <page>",
                ));
            }
            self.page = Some(PartialPage::default());
        } else if let Some(page) = self.page.as_ref() {
            if self.capture.is_none() {
                let parent_is_page = self.open.last().map(|p| p == PAGE).unwrap_or(false);
                let field = match name {
                    TITLE if parent_is_page && page.title.is_none() => Some(Field::Title),
                    ID if parent_is_page && page.id.is_none() => Some(Field::Id),
                    NS if parent_is_page && page.ns.is_none() => Some(Field::Ns),
                    TEXT if page.text.is_none() => Some(Field::Text),
                    _ => None,
                };
                if let Some(field) = field {
                    self.text_buf.clear();
                    self.capture = Some((field, self.open.len() + 1));
                }
            }
        }

        self.open.push(name.to_vec());
        Ok(())
    }

    fn close_element(&mut self, name: &[u8]) -> Result<Option<ArticleRecord>> {
        let depth = self.open.len();
        match self.open.pop() {
            Some(open) if open == name => {}
            Some(open) => {
                return Err(PipelineError::parse(
                    self.byte_offset(),
                    format!(
                        "mismatched closing tag: expected </{}>, found </{}>",
                        String::from_utf8_lossy(&open),
                        String::from_utf8_lossy(name)
                    ),
                ));
            }
            None => {
                return Err(PipelineError::parse(
                    self.byte_offset(),
                    format!("unexpected closing tag </{}>", String::from_utf8_lossy(name)),
                ));
            }
        }

        if let Some((field, capture_depth)) = self.capture {
            if capture_depth == depth {
                self.capture = None;
                let value = std::mem::take(&mut self.text_buf);
                if let Some(page) = self.page.as_mut() {
                    match field {
                        Field::Title => page.title = Some(value),
                        Field::Id => page.id = value.trim().parse().ok(),
                        Field::Ns => page.ns = value.trim().parse().ok(),
                        Field::Text => page.text = Some(value),
                    }
                }
            }
        }

        if name == PAGE {
            if let Some(page) = self.page.take() {
                let record = page.into_record();
                trace!(title = %record.title, id = ?record.id, "Page complete");
                return Ok(Some(record));
            }
        }

        Ok(None)
    }

    fn end_of_input(&self) -> Result<Option<ArticleRecord>> {
        if let Some(open) = self.open.last() {
            return Err(PipelineError::parse(
                self.byte_offset(),
                format!(
                    "unexpected end of input inside <{}>",
                    String::from_utf8_lossy(open)
                ),
            ));
        }
        if !self.seen_root {
            return Err(PipelineError::parse(
                self.byte_offset(),
                "document has no root element",
            ));
        }
        Ok(None)
    }

    fn xml_error(&self, err: quick_xml::Error) -> PipelineError {
        match err {
            quick_xml::Error::Io(io_err) => {
                let io_err: &io::Error = &io_err;
                PipelineError::CorruptArchive {
                    path: self.source.clone(),
                    source: io::Error::new(io_err.kind(), io_err.to_string()),
                }
            }
            other => PipelineError::parse(self.byte_offset(), other.to_string()),
        }
    }
}

impl<R: Read> Iterator for WikiReader<R> {
    type Item = Result<ArticleRecord>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }
        match self.next_page() {
            Ok(Some(record)) => Some(Ok(record)),
            Ok(None) => {
                self.done = true;
                None
            }
            Err(e) => {
                self.done = true;
                Some(Err(e))
            }
        }
    }
}

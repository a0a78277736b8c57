use crate::manifest::extract_dump_date;
use std::path::Path;

/// One page from the dump, alive only between the parser and the normalizer.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ArticleRecord {
    pub id: Option<u64>,
    pub ns: Option<i32>,
    pub title: String,
    pub text: String,
}

/// Identity of the input dump, derived from its file name only.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DumpSource {
    pub file_name: String,
    pub dump_date: String,
}

impl DumpSource {
    pub fn from_path(path: &Path) -> Self {
        let file_name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        let dump_date = extract_dump_date(&file_name);
        Self {
            file_name,
            dump_date,
        }
    }
}

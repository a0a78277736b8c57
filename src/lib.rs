//! Wikiprint: reproducible text corpora from Wikipedia XML dumps
//!
//! Given the same dump, this crate always produces the same processed corpus
//! bytes and the same pair of SHA-256 fingerprints, on any machine. The output
//! is a plain UTF-8 corpus plus a manifest naming the dump, both digests, the
//! normalization version, and the toolchain that produced it, so two parties
//! can check they trained on exactly the same data.
//!
//! # Pipeline
//!
//! 1. **Dump reader** -- Streams the compressed dump and fingerprints the raw
//!    bytes as they are read
//! 2. **XML extraction** -- Pull-based page iterator over parser events; only
//!    the open element path and the current page are held in memory
//! 3. **Normalization** -- Fixed, ordered wikitext rewrites (templates,
//!    references, links, whitespace)
//! 4. **Fingerprinting** -- Processed bytes are hashed while they are written
//! 5. **Manifest** -- Written only after everything above succeeded
//!
//! Everything runs on one thread in one pass, in dump order. Any error aborts
//! the run; nothing is skipped and no manifest is written for a failed run.
//!
//! # Key Modules
//!
//! - [`dump`] -- Decompression stream with raw-byte fingerprinting
//! - [`parser`] -- Streaming page extraction
//! - [`normalize`] -- Deterministic wikitext cleaning
//! - [`fingerprint`] -- SHA-256 digests, Merkle roots, hashing reader/writer
//! - [`manifest`] -- Manifest construction, persistence, verification, diffing
//! - [`pipeline`] -- Wires the stages together for one run
//! - [`dataset`] -- Content manifests for whole dataset directories
//! - [`config`] -- Constants and per-run configuration
//! - [`error`] -- Error taxonomy
//!
//! # Example Usage
//!
//! ```bash
//! wikiprint process -i simplewiki-20260201-pages-articles.xml.bz2 -o data/
//! wikiprint verify -m data/dataset_manifest.json \
//!     -i simplewiki-20260201-pages-articles.xml.bz2 -c data/processed/wiki_clean.txt
//! ```

pub mod config;
pub mod dataset;
pub mod dump;
pub mod error;
pub mod fingerprint;
pub mod manifest;
pub mod models;
pub mod normalize;
pub mod parser;
pub mod pipeline;
pub mod stats;

pub use config::PipelineConfig;
pub use error::{PipelineError, Result};
pub use manifest::Manifest;
pub use pipeline::{run_pipeline, PipelineOutcome};

//! # flatdex - indexed flat-file databanks
//!
//! flatdex builds persistent indices over large collections of flat-file
//! records (EMBL, Swiss-Prot, FASTA) and answers identifier and keyword
//! queries by seeking straight to the matching records.
//!
//! ## Architecture
//!
//! - [`format`] - Record formats: delimiting, identifiers, field tokens
//! - [`index`] - Index building (collect, sort, write) and readers
//! - [`query`] - Cache manager, resolver, result sessions and record loader
//! - [`output`] - Record printing for the CLI
//! - [`utils`] - Configuration, codecs, tokenizing and wildcards
//!
//! ## Quick Start
//!
//! ```no_run
//! use flatdex::index::{build_index, BuildConfig};
//! use flatdex::query::{CacheManager, Query, Session};
//! use std::path::Path;
//!
//! let config = BuildConfig::new("sw", "/data/swissprot").with_field("org");
//! build_index(&config, Path::new("/var/flatdex"), true).unwrap();
//!
//! let manager = CacheManager::new(Path::new("/var/flatdex"), 16);
//! let query = Query::default().or("org", "homo*");
//! let mut session = Session::open(&manager, "sw", query).unwrap();
//! while let Some(record) = session.next_record().unwrap() {
//!     println!("{}", record.id);
//! }
//! ```
//!
//! Each build writes into a staging directory next to the live index set
//! and swaps it in by rename, so readers never see a half-written set.

pub mod error;
pub mod format;
pub mod index;
pub mod output;
pub mod query;
pub mod utils;

pub use error::{FlatdexError, Result};

/// Crate version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

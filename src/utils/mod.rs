//! Utility functions and data structures.
//!
//! This module provides shared utilities used throughout flatdex:
//!
//! ## Modules
//!
//! - [`app_data`] - Configuration and index directory management (XDG-compliant)
//! - [`encoding`] - Little-endian field codecs and fixed-width key columns
//! - [`progress`] - Progress bars, no-op without the `progress` feature
//! - [`tokenizer`] - Field token splitting and case normalization
//! - [`wildcard`] - Key wildcard patterns and file name filters
//!
//! ## Key Functions
//!
//! ```no_run
//! use flatdex::utils::{normalize_token, split_words, Pattern};
//!
//! let words = split_words("Homo sapiens (Human).");
//! // Returns: ["Homo", "sapiens", "Human"]
//!
//! let key = normalize_token("sapiens", false);
//! // Returns: "SAPIENS"
//!
//! let pattern = Pattern::new("HOMO*", false).unwrap();
//! assert!(pattern.is_match("HOMOLOG"));
//! ```

pub mod app_data;
pub mod encoding;
pub mod progress;
pub mod tokenizer;
pub mod wildcard;

pub use app_data::*;
pub use encoding::*;
pub use tokenizer::*;
pub use wildcard::*;

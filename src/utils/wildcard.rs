//! Wildcard patterns over index keys and file names.
//!
//! Query patterns use `*` (any run) and `?` (any single character). Every
//! other glob metacharacter is matched literally. Keys are kept sorted on
//! disk, so a pattern exposes the literal prefix before its first wildcard
//! to narrow the scanned key range.

use crate::error::{FlatdexError, Result};
use globset::{Glob, GlobBuilder, GlobMatcher, GlobSet, GlobSetBuilder};
use std::path::Path;

/// True if the text contains a query wildcard
#[inline]
pub fn has_wildcard(text: &str) -> bool {
    text.contains(['*', '?'])
}

/// Compiled key pattern
#[derive(Debug, Clone)]
pub struct Pattern {
    text: String,
    prefix: String,
    matcher: Option<GlobMatcher>,
}

impl Pattern {
    /// Compile a wildcard pattern. With `case_insensitive` the literal prefix
    /// cannot narrow a case-sensitive key range, so it is left empty.
    pub fn new(text: &str, case_insensitive: bool) -> Result<Self> {
        if !has_wildcard(text) && !case_insensitive {
            return Ok(Self::literal(text));
        }

        let glob = GlobBuilder::new(&escape_glob(text))
            .literal_separator(false)
            .backslash_escape(false)
            .case_insensitive(case_insensitive)
            .build()
            .map_err(|e| FlatdexError::configuration(format!("invalid pattern '{}': {}", text, e)))?;

        let prefix = if case_insensitive {
            String::new()
        } else {
            literal_prefix(text).to_string()
        };

        Ok(Self {
            text: text.to_string(),
            prefix,
            matcher: Some(glob.compile_matcher()),
        })
    }

    /// A pattern matching exactly `text`, wildcards included
    pub fn literal(text: &str) -> Self {
        Self {
            text: text.to_string(),
            prefix: text.to_string(),
            matcher: None,
        }
    }

    /// The exact key, if this pattern matches a single key
    pub fn exact(&self) -> Option<&str> {
        match self.matcher {
            None => Some(&self.text),
            Some(_) => None,
        }
    }

    /// Literal prefix shared by every matching key
    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    pub fn as_str(&self) -> &str {
        &self.text
    }

    pub fn is_match(&self, key: &str) -> bool {
        match &self.matcher {
            None => key == self.text,
            Some(m) => m.is_match(Path::new(key)),
        }
    }
}

/// Literal text before the first wildcard
pub fn literal_prefix(text: &str) -> &str {
    match text.find(['*', '?']) {
        Some(i) => &text[..i],
        None => text,
    }
}

/// Translate a query pattern into glob syntax: `*` and `?` keep their
/// meaning, runs of `*` collapse, bracket and brace characters become
/// single-character classes.
fn escape_glob(text: &str) -> String {
    let mut out = String::with_capacity(text.len() + 8);
    let mut prev_star = false;
    for c in text.chars() {
        match c {
            '*' => {
                if !prev_star {
                    out.push('*');
                }
                prev_star = true;
                continue;
            }
            '[' | ']' | '{' | '}' => {
                out.push('[');
                out.push(c);
                out.push(']');
            }
            _ => out.push(c),
        }
        prev_star = false;
    }
    out
}

/// Include/exclude filter over division file names
#[derive(Debug, Clone, Default)]
pub struct FileFilter {
    include: Option<GlobSet>,
    exclude: Option<GlobSet>,
}

impl FileFilter {
    pub fn new(include: &[String], exclude: &[String]) -> Result<Self> {
        Ok(Self {
            include: build_globset(include)?,
            exclude: build_globset(exclude)?,
        })
    }

    /// A filter that selects everything
    pub fn all() -> Self {
        Self::default()
    }

    /// Whether the file name passes both lists. Only the final path
    /// component is matched.
    pub fn is_selected(&self, path: &Path) -> bool {
        self.is_included(path) && !self.is_excluded(path)
    }

    /// Whether the file name hits the include list (an empty list includes all)
    pub fn is_included(&self, path: &Path) -> bool {
        let name = path.file_name().map(Path::new).unwrap_or(path);
        self.include
            .as_ref()
            .map(|set| set.is_match(name))
            .unwrap_or(true)
    }

    /// Whether the file name hits the exclude list
    pub fn is_excluded(&self, path: &Path) -> bool {
        let name = path.file_name().map(Path::new).unwrap_or(path);
        self.exclude
            .as_ref()
            .map(|set| set.is_match(name))
            .unwrap_or(false)
    }
}

fn build_globset(patterns: &[String]) -> Result<Option<GlobSet>> {
    if patterns.is_empty() {
        return Ok(None);
    }
    let mut builder = GlobSetBuilder::new();
    for p in patterns {
        let glob = Glob::new(p).map_err(|e| {
            FlatdexError::configuration(format!("invalid file pattern '{}': {}", p, e))
        })?;
        builder.add(glob);
    }
    let set = builder
        .build()
        .map_err(|e| FlatdexError::configuration(format!("invalid file patterns: {}", e)))?;
    Ok(Some(set))
}

//! Resolves the field queries of a session into entry ordinals.
//!
//! A resolver runs in passes. Without case-sensitive repeat scanning one
//! pass consumes every field query and the resolver is done as soon as a
//! pass produced a match. With it, each pass consumes one field group (a
//! field plus the `And`-linked fields after it); the resolver is done once
//! every group has run, and ordinals already surfaced by an earlier pass
//! are dropped from later ones.

use crate::error::Result;
use crate::index::types::{FieldKind, IndexMeta};
use crate::query::cache::AliasCache;
use crate::query::types::{FieldQuery, LinkOp, Query, QueryType};
use crate::utils::{Pattern, has_wildcard};
use roaring::RoaringBitmap;

/// Compile the pattern of a field query for a given field.
///
/// Case-insensitive fields store upper-case tokens, so the pattern is
/// folded the same way. A case-sensitive field queried without the
/// case-sensitive flag is matched case-insensitively over every key.
pub fn field_pattern(text: &str, field_case_sensitive: bool, query_case_sensitive: bool) -> Result<Pattern> {
    if !field_case_sensitive {
        Pattern::new(&text.to_uppercase(), false)
    } else if query_case_sensitive {
        Pattern::new(text, false)
    } else {
        Pattern::new(text, true)
    }
}

/// Literal pattern: `*` and `?` match themselves. A case-sensitive field
/// queried without the case-sensitive flag is handled by the ignore-case
/// lookups instead.
fn exact_pattern(text: &str, field_case_sensitive: bool) -> Pattern {
    if field_case_sensitive {
        Pattern::literal(text)
    } else {
        Pattern::literal(&text.to_uppercase())
    }
}

/// Whether at least one field of the query is indexed
pub fn has_indexed_field(query: &Query, meta: &IndexMeta) -> bool {
    query
        .fields
        .iter()
        .any(|fq| meta.field_kind(&fq.field).is_some())
}

#[derive(Debug, Clone)]
pub struct Resolver {
    kind: QueryType,
    fields: Vec<FieldQuery>,
    case_sensitive: bool,
    next_field: usize,
    done: bool,
    /// Ordinals handed out by earlier passes
    matched: RoaringBitmap,
}

impl Resolver {
    pub fn new(query: &Query) -> Self {
        Self {
            kind: query.kind,
            fields: query.fields.clone(),
            case_sensitive: query.case_sensitive,
            next_field: 0,
            done: false,
            matched: RoaringBitmap::new(),
        }
    }

    /// Whether a resolution pass is still available
    pub fn has_pass(&self) -> bool {
        !self.done && self.next_field < self.fields.len()
    }

    pub fn is_done(&self) -> bool {
        self.done
    }

    pub fn reset(&mut self) {
        self.next_field = 0;
        self.done = false;
        self.matched.clear();
    }

    /// End (exclusive) of the field group starting at `start`
    fn group_end(&self, start: usize) -> usize {
        let mut end = start + 1;
        while end < self.fields.len() && self.fields[end].link == LinkOp::And {
            end += 1;
        }
        end
    }

    /// Run one pass and return the ordinals it newly matched
    pub fn resolve(&mut self, cache: &AliasCache) -> Result<RoaringBitmap> {
        let start = self.next_field;
        let end = if self.case_sensitive {
            self.group_end(start)
        } else {
            self.fields.len()
        };

        let mut acc = RoaringBitmap::new();
        for i in start..end {
            let fq = &self.fields[i];
            let link = if i == 0 { LinkOp::Or } else { fq.link };

            match self.kind {
                QueryType::Entry => {
                    if link == LinkOp::ElseIfEmpty && !(acc.is_empty() && self.matched.is_empty()) {
                        continue;
                    }
                    acc |= self.lookup(cache, fq, true)?;
                }
                QueryType::Query | QueryType::All => match link {
                    LinkOp::ElseIfEmpty => {
                        if acc.is_empty() && self.matched.is_empty() {
                            acc = self.lookup(cache, fq, false)?;
                        }
                    }
                    LinkOp::And => {
                        let found = self.lookup(cache, fq, false)?;
                        acc &= found;
                    }
                    LinkOp::Or => {
                        acc |= self.lookup(cache, fq, false)?;
                    }
                },
            }
        }

        self.next_field = end;
        acc -= &self.matched;
        self.matched |= &acc;

        if self.case_sensitive {
            self.done = self.next_field >= self.fields.len();
        } else if !acc.is_empty() {
            self.done = true;
        }

        tracing::debug!(
            fields = end - start,
            matches = acc.len(),
            done = self.done,
            "resolution pass"
        );
        Ok(acc)
    }

    /// Ordinals matched by one field query. Entry queries and patterns
    /// without wildcards match keys literally. A field that is not indexed
    /// is logged and contributes nothing.
    fn lookup(&self, cache: &AliasCache, fq: &FieldQuery, exact: bool) -> Result<RoaringBitmap> {
        let meta = cache.meta();
        let (kind, config) = match (meta.field_kind(&fq.field), meta.field_config(&fq.field)) {
            (Some(kind), Some(config)) => (kind, config),
            _ => {
                tracing::warn!(field = %fq.field, alias = cache.alias(), "field is not indexed");
                return Ok(RoaringBitmap::new());
            }
        };

        let literal = exact || !has_wildcard(&fq.pattern);
        let found = if literal && config.case_sensitive && !self.case_sensitive {
            match kind {
                FieldKind::Primary => Ok(cache.find_ids_ignore_case(&fq.pattern)),
                FieldKind::Secondary => cache.find_tokens_ignore_case(&fq.field, &fq.pattern),
            }
        } else {
            let pattern = if literal {
                exact_pattern(&fq.pattern, config.case_sensitive)
            } else {
                field_pattern(&fq.pattern, config.case_sensitive, self.case_sensitive)?
            };
            match kind {
                FieldKind::Primary => Ok(cache.find_ids(&pattern)),
                FieldKind::Secondary => cache.find_tokens(&fq.field, &pattern),
            }
        };

        match found {
            Ok(found) => Ok(found),
            Err(e) if e.is_field_local() => {
                tracing::warn!(field = %fq.field, error = %e, "field lookup failed");
                Ok(RoaringBitmap::new())
            }
            Err(e) => Err(e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_field_pattern_folding() {
        let p = field_pattern("homo*", false, false).unwrap();
        assert_eq!(p.prefix(), "HOMO");
        assert!(p.is_match("HOMOLOG"));

        let p = field_pattern("Homo*", true, true).unwrap();
        assert_eq!(p.prefix(), "Homo");
        assert!(!p.is_match("HOMO"));

        let p = field_pattern("homo*", true, false).unwrap();
        assert_eq!(p.prefix(), "");
        assert!(p.is_match("HOMO"));
    }

    #[test]
    fn test_exact_pattern() {
        let p = exact_pattern("p12345", false);
        assert_eq!(p.exact(), Some("P12345"));

        // Wildcard characters are matched literally
        let p = exact_pattern("P1*", true);
        assert_eq!(p.exact(), Some("P1*"));
        assert!(!p.is_match("P12"));
    }

    #[test]
    fn test_field_groups() {
        let query = Query::new(QueryType::Query)
            .or("org", "a")
            .and("key", "b")
            .or("des", "c")
            .else_if_empty("acc", "d");
        let resolver = Resolver::new(&query);
        assert_eq!(resolver.group_end(0), 2);
        assert_eq!(resolver.group_end(2), 3);
        assert_eq!(resolver.group_end(3), 4);
    }
}

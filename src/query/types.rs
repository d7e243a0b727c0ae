use crate::index::types::DivisionId;

/// How a query is resolved
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum QueryType {
    /// Exact identifier/keyword lookups, merged by union
    Entry,
    /// Index lookups with wildcards and link operators
    #[default]
    Query,
    /// Every record of every selected division, indices ignored
    All,
}

/// How a field query combines with the results accumulated before it
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LinkOp {
    And,
    #[default]
    Or,
    /// Only evaluated while nothing has matched yet
    ElseIfEmpty,
}

/// One (field, pattern) term
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldQuery {
    pub field: String,
    pub pattern: String,
    /// Ignored for the first field of a query
    pub link: LinkOp,
}

impl FieldQuery {
    pub fn new(field: &str, pattern: &str, link: LinkOp) -> Self {
        Self {
            field: field.to_string(),
            pattern: pattern.to_string(),
            link,
        }
    }
}

/// A query against one database alias
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Query {
    pub kind: QueryType,
    pub fields: Vec<FieldQuery>,
    /// Match case-sensitive fields as written, one field group per pass
    pub case_sensitive: bool,
    /// Division file name globs; empty selects every division
    pub include: Vec<String>,
    pub exclude: Vec<String>,
    /// Dump every record regardless of the field queries
    pub all_records: bool,
}

impl Query {
    pub fn new(kind: QueryType) -> Self {
        Self {
            kind,
            ..Self::default()
        }
    }

    /// Exact lookup of one identifier in the given id field
    pub fn entry(id_field: &str, id: &str) -> Self {
        Self::new(QueryType::Entry).or(id_field, id)
    }

    pub fn all() -> Self {
        Self::new(QueryType::All)
    }

    pub fn or(mut self, field: &str, pattern: &str) -> Self {
        self.fields.push(FieldQuery::new(field, pattern, LinkOp::Or));
        self
    }

    pub fn and(mut self, field: &str, pattern: &str) -> Self {
        self.fields.push(FieldQuery::new(field, pattern, LinkOp::And));
        self
    }

    pub fn else_if_empty(mut self, field: &str, pattern: &str) -> Self {
        self.fields
            .push(FieldQuery::new(field, pattern, LinkOp::ElseIfEmpty));
        self
    }

    pub fn with_case_sensitive(mut self, case_sensitive: bool) -> Self {
        self.case_sensitive = case_sensitive;
        self
    }

    pub fn with_include(mut self, pattern: &str) -> Self {
        self.include.push(pattern.to_string());
        self
    }

    pub fn with_exclude(mut self, pattern: &str) -> Self {
        self.exclude.push(pattern.to_string());
        self
    }

    /// Whether the query ignores the indices and walks the divisions
    pub fn is_scan(&self) -> bool {
        self.kind == QueryType::All || self.all_records || self.fields.is_empty()
    }
}

/// One record streamed back to the caller
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Record {
    pub id: String,
    pub division: DivisionId,
    pub primary: Vec<u8>,
    pub secondary: Option<Vec<u8>>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builder() {
        let q = Query::new(QueryType::Query)
            .or("org", "homo*")
            .and("key", "signal")
            .else_if_empty("des", "albumin");
        assert_eq!(q.fields.len(), 3);
        assert_eq!(q.fields[1].link, LinkOp::And);
        assert_eq!(q.fields[2].link, LinkOp::ElseIfEmpty);
        assert!(!q.is_scan());
    }

    #[test]
    fn test_scan_queries() {
        assert!(Query::all().is_scan());
        assert!(Query::new(QueryType::Query).is_scan());
        let mut q = Query::entry("id", "P12345");
        assert!(!q.is_scan());
        q.all_records = true;
        assert!(q.is_scan());
    }
}

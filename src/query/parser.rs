use crate::query::types::{FieldQuery, LinkOp, Query, QueryType};

/// Parse a query string into a Query.
///
/// Terms are `field:pattern` or a bare pattern, which queries `id_field`.
/// The keywords `OR`, `AND` and `ELSE` set how the following term links to
/// the terms before it; adjacent terms default to `OR`. A pattern may be
/// double-quoted to include spaces. An empty string yields an All query.
pub fn parse_query(input: &str, id_field: &str) -> Query {
    let mut parser = QueryParser::new(input, id_field);
    parser.parse()
}

struct QueryParser<'a> {
    input: &'a str,
    pos: usize,
    id_field: &'a str,
}

impl<'a> QueryParser<'a> {
    fn new(input: &'a str, id_field: &'a str) -> Self {
        Self {
            input,
            pos: 0,
            id_field,
        }
    }

    fn parse(&mut self) -> Query {
        let mut fields = Vec::new();
        let mut link = LinkOp::Or;

        loop {
            self.skip_whitespace();
            if self.is_eof() {
                break;
            }

            let word = self.read_word();
            match word.as_str() {
                "OR" => link = LinkOp::Or,
                "AND" => link = LinkOp::And,
                "ELSE" => link = LinkOp::ElseIfEmpty,
                _ => {
                    if let Some(term) = self.make_term(&word, link) {
                        fields.push(term);
                    }
                    link = LinkOp::Or;
                }
            }
        }

        if fields.is_empty() {
            Query::new(QueryType::All)
        } else {
            Query {
                fields,
                ..Query::new(QueryType::Query)
            }
        }
    }

    /// Split a word into field and pattern
    fn make_term(&self, word: &str, link: LinkOp) -> Option<FieldQuery> {
        let (field, pattern) = match word.split_once(':') {
            Some((field, pattern)) if is_field_name(field) => (field, pattern),
            _ => (self.id_field, word),
        };
        let pattern = unquote(pattern);
        if pattern.is_empty() {
            return None;
        }
        Some(FieldQuery::new(field, pattern, link))
    }

    /// Read up to the next unquoted whitespace
    fn read_word(&mut self) -> String {
        let start = self.pos;
        let mut in_quotes = false;
        while let Some(ch) = self.peek_char() {
            if ch == '"' {
                in_quotes = !in_quotes;
            } else if ch.is_whitespace() && !in_quotes {
                break;
            }
            self.advance();
        }
        self.input[start..self.pos].to_string()
    }

    fn skip_whitespace(&mut self) {
        while !self.is_eof() && self.peek_char().map(|c| c.is_whitespace()).unwrap_or(false) {
            self.advance();
        }
    }

    fn is_eof(&self) -> bool {
        self.pos >= self.input.len()
    }

    fn peek_char(&self) -> Option<char> {
        self.input[self.pos..].chars().next()
    }

    fn advance(&mut self) {
        if let Some(ch) = self.peek_char() {
            self.pos += ch.len_utf8();
        }
    }
}

fn is_field_name(name: &str) -> bool {
    !name.is_empty()
        && name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-')
}

fn unquote(pattern: &str) -> &str {
    pattern
        .strip_prefix('"')
        .and_then(|p| p.strip_suffix('"'))
        .unwrap_or(pattern)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bare_term_uses_id_field() {
        let q = parse_query("P12345", "id");
        assert_eq!(q.kind, QueryType::Query);
        assert_eq!(q.fields, vec![FieldQuery::new("id", "P12345", LinkOp::Or)]);
    }

    #[test]
    fn test_field_terms_and_links() {
        let q = parse_query("org:homo* AND key:signal ELSE des:albumin OR acc:P1", "id");
        let links: Vec<_> = q.fields.iter().map(|f| f.link).collect();
        assert_eq!(
            links,
            vec![LinkOp::Or, LinkOp::And, LinkOp::ElseIfEmpty, LinkOp::Or]
        );
        assert_eq!(q.fields[0].field, "org");
        assert_eq!(q.fields[0].pattern, "homo*");
    }

    #[test]
    fn test_quoted_pattern() {
        let q = parse_query("des:\"serum albumin\"", "id");
        assert_eq!(q.fields[0].pattern, "serum albumin");
    }

    #[test]
    fn test_empty_query_is_all() {
        assert_eq!(parse_query("", "id").kind, QueryType::All);
        assert_eq!(parse_query("   AND  ", "id").kind, QueryType::All);
    }

    #[test]
    fn test_odd_input() {
        let q = parse_query("org: :x a:b:c \"unterminated", "id");
        assert_eq!(q.fields.len(), 3);
        assert_eq!(q.fields[0], FieldQuery::new("id", ":x", LinkOp::Or));
        assert_eq!(q.fields[1], FieldQuery::new("a", "b:c", LinkOp::Or));
        assert_eq!(q.fields[2].pattern, "\"unterminated");
    }
}

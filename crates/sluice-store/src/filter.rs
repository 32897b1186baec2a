//! Table-name filter.
//!
//! An expression is a comma-separated list of regular expressions matched
//! against `schema.table`. Matching is case-insensitive and anchored at both
//! ends, so `db1\..*` accepts `DB1.orders` but not `xdb1.orders`.

use std::fmt;

use regex::{Regex, RegexBuilder};
use sluice_core::CollaboratorError;

/// Compiled table filter.
#[derive(Clone)]
pub struct TableFilter {
    expression: String,
    patterns: Vec<Regex>,
}

impl TableFilter {
    /// Compile a filter expression.
    ///
    /// Blank entries are skipped. An expression with no entries at all
    /// accepts every table.
    pub fn parse(expression: &str) -> Result<Self, CollaboratorError> {
        let patterns = expression
            .split(',')
            .map(str::trim)
            .filter(|p| !p.is_empty())
            .map(|p| {
                RegexBuilder::new(&format!("^(?:{p})$"))
                    .case_insensitive(true)
                    .build()
                    .map_err(|e| CollaboratorError::InvalidFilter {
                        expression: expression.to_owned(),
                        message: e.to_string(),
                    })
            })
            .collect::<Result<Vec<_>, _>>()?;

        Ok(Self {
            expression: expression.to_owned(),
            patterns,
        })
    }

    /// Whether records from `table` pass the filter.
    pub fn matches(&self, table: &str) -> bool {
        self.patterns.is_empty() || self.patterns.iter().any(|re| re.is_match(table))
    }

    /// The source expression.
    pub fn expression(&self) -> &str {
        &self.expression
    }
}

impl fmt::Debug for TableFilter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("TableFilter").field(&self.expression).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;

    #[test]
    fn single_pattern_full_match() {
        let filter = TableFilter::parse(r"db1\..*").unwrap();
        assert!(filter.matches("db1.orders"));
        assert!(!filter.matches("xdb1.orders"));
        assert!(!filter.matches("db2.orders"));
    }

    #[test]
    fn case_insensitive() {
        let filter = TableFilter::parse(r"shop\.Orders").unwrap();
        assert!(filter.matches("SHOP.orders"));
    }

    #[test]
    fn comma_separated_alternatives() {
        let filter = TableFilter::parse(r"a\.t1, b\..*").unwrap();
        assert!(filter.matches("a.t1"));
        assert!(filter.matches("b.anything"));
        assert!(!filter.matches("a.t2"));
    }

    #[test]
    fn partial_match_rejected() {
        let filter = TableFilter::parse("orders").unwrap();
        assert!(!filter.matches("shop.orders"));
    }

    #[test]
    fn blank_expression_accepts_everything() {
        let filter = TableFilter::parse(" , ").unwrap();
        assert!(filter.matches("any.table"));
    }

    #[test]
    fn invalid_pattern_rejected() {
        let err = TableFilter::parse("db1.(").unwrap_err();
        assert_matches!(err, CollaboratorError::InvalidFilter { expression, .. } if expression == "db1.(");
    }

    #[test]
    fn debug_shows_expression() {
        let filter = TableFilter::parse(r"x\.y").unwrap();
        assert_eq!(format!("{filter:?}"), r#"TableFilter("x\\.y")"#);
    }
}

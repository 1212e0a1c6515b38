//! Minimal Cypher-subset parser and executor.
//!
//! One or more `MATCH` path patterns with node `(v:Label {props})` and
//! relationship `-[v:TYPE*min..max]->` syntax, an optional `WHERE` clause
//! (`AND`/`OR`/`NOT`, comparisons, `CONTAINS`, `STARTS WITH`, `ENDS WITH`,
//! `IN`), `RETURN` (list or `*`), `ORDER BY`, and `LIMIT`. Nothing more;
//! the hybrid engine treats this as an optional optimizer hint, not a
//! general query language.
//!
//! Parse failures carry a byte position ([`crate::Error::CypherParse`]);
//! execution failures surface as empty result sets at the hybrid layer.

pub mod executor;
pub mod lexer;
pub mod parser;

pub use executor::{QueryRow, collect_entity_ids, execute};
pub use parser::{CypherQuery, parse};

use crate::Result;
use crate::storage::GraphStore;

/// Parses and executes a query against a store in one call.
///
/// # Errors
///
/// Returns [`crate::Error::CypherParse`] on syntax errors and store errors
/// from execution.
pub fn run(store: &GraphStore, query_text: &str) -> Result<Vec<QueryRow>> {
    let query = parse(query_text)?;
    execute(store, &query)
}

//! Predicate trees over record metadata and document text.
//!
//! [`compile`] turns JSON-shaped `where` / `where_document` expressions into a
//! [`Predicate`], rejecting unknown operators and operand type mismatches before
//! any storage is touched. [`evaluate`] is a pure function of the predicate and
//! the record; the same tree pre-filters ANN candidates and post-filters `get`.

mod compile;
mod eval;

pub use compile::{compile, compile_where, compile_where_document};
pub use eval::evaluate;

use crate::record::MetadataValue;
use regex::Regex;

/// Compiled boolean expression.
#[derive(Debug, Clone)]
pub enum Predicate {
    /// All children must match. Evaluation stops at the first miss.
    And(Vec<Predicate>),
    /// At least one child must match. Evaluation stops at the first hit.
    Or(Vec<Predicate>),
    Metadata(MetadataCondition),
    Document(DocumentCondition),
}

/// Ordering and equality operators for metadata leaves.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompareOp {
    Eq,
    Ne,
    Gt,
    Gte,
    Lt,
    Lte,
}

impl CompareOp {
    pub fn as_str(&self) -> &'static str {
        match self {
            CompareOp::Eq => "$eq",
            CompareOp::Ne => "$ne",
            CompareOp::Gt => "$gt",
            CompareOp::Gte => "$gte",
            CompareOp::Lt => "$lt",
            CompareOp::Lte => "$lte",
        }
    }
}

/// A leaf comparing one metadata field against an operand.
#[derive(Debug, Clone, PartialEq)]
pub enum MetadataCondition {
    Compare {
        field: String,
        op: CompareOp,
        value: MetadataValue,
    },
    In {
        field: String,
        values: Vec<MetadataValue>,
    },
    NotIn {
        field: String,
        values: Vec<MetadataValue>,
    },
}

/// A leaf over the record's document text.
#[derive(Debug, Clone)]
pub enum DocumentCondition {
    Contains(String),
    NotContains(String),
    Regex(Regex),
    NotRegex(Regex),
}

impl Predicate {
    /// Conjunction of two optional predicates.
    pub fn conjoin(left: Option<Predicate>, right: Option<Predicate>) -> Option<Predicate> {
        match (left, right) {
            (Some(l), Some(r)) => Some(Predicate::And(vec![l, r])),
            (Some(p), None) | (None, Some(p)) => Some(p),
            (None, None) => None,
        }
    }

    /// Shorthand for [`evaluate`].
    pub fn matches(&self, record: &crate::record::Record) -> bool {
        evaluate(self, record)
    }
}

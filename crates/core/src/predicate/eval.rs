//! Evaluation of compiled predicates against records.
//!
//! Missing-field rules: a metadata leaf on an absent key is false, except `$ne`
//! and `$nin`, which hold. A document leaf on a record without a document is
//! false for `$contains` / `$regex` and true for their negations. Comparisons
//! across types (string vs number, bool vs anything else) are false, except
//! `$ne`. Ints and floats compare numerically.

use super::{CompareOp, DocumentCondition, MetadataCondition, Predicate};
use crate::record::{MetadataValue, Record};
use std::cmp::Ordering;

/// Returns `true` if `record` satisfies `predicate`.
pub fn evaluate(predicate: &Predicate, record: &Record) -> bool {
    match predicate {
        Predicate::And(children) => children.iter().all(|c| evaluate(c, record)),
        Predicate::Or(children) => children.iter().any(|c| evaluate(c, record)),
        Predicate::Metadata(condition) => evaluate_metadata(condition, record),
        Predicate::Document(condition) => evaluate_document(condition, record.document.as_deref()),
    }
}

fn evaluate_metadata(condition: &MetadataCondition, record: &Record) -> bool {
    match condition {
        MetadataCondition::Compare { field, op, value } => match record.metadata_value(field) {
            None => *op == CompareOp::Ne,
            Some(stored) => compare(stored, *op, value),
        },
        MetadataCondition::In { field, values } => record
            .metadata_value(field)
            .is_some_and(|stored| values.iter().any(|v| scalar_eq(stored, v))),
        MetadataCondition::NotIn { field, values } => record
            .metadata_value(field)
            .map_or(true, |stored| !values.iter().any(|v| scalar_eq(stored, v))),
    }
}

fn compare(stored: &MetadataValue, op: CompareOp, operand: &MetadataValue) -> bool {
    match op {
        CompareOp::Eq => scalar_eq(stored, operand),
        CompareOp::Ne => !scalar_eq(stored, operand),
        CompareOp::Gt => scalar_cmp(stored, operand) == Some(Ordering::Greater),
        CompareOp::Gte => matches!(
            scalar_cmp(stored, operand),
            Some(Ordering::Greater | Ordering::Equal)
        ),
        CompareOp::Lt => scalar_cmp(stored, operand) == Some(Ordering::Less),
        CompareOp::Lte => matches!(
            scalar_cmp(stored, operand),
            Some(Ordering::Less | Ordering::Equal)
        ),
    }
}

fn as_number(value: &MetadataValue) -> Option<f64> {
    match value {
        MetadataValue::Int(i) => Some(*i as f64),
        MetadataValue::Float(f) => Some(*f),
        _ => None,
    }
}

fn scalar_eq(a: &MetadataValue, b: &MetadataValue) -> bool {
    match (a, b) {
        (MetadataValue::Int(x), MetadataValue::Int(y)) => x == y,
        (MetadataValue::Bool(x), MetadataValue::Bool(y)) => x == y,
        (MetadataValue::Str(x), MetadataValue::Str(y)) => x == y,
        _ => match (as_number(a), as_number(b)) {
            (Some(x), Some(y)) => x == y,
            _ => false,
        },
    }
}

/// Ordering for numbers and strings. Bools and mixed types are unordered.
fn scalar_cmp(a: &MetadataValue, b: &MetadataValue) -> Option<Ordering> {
    match (a, b) {
        (MetadataValue::Int(x), MetadataValue::Int(y)) => Some(x.cmp(y)),
        (MetadataValue::Str(x), MetadataValue::Str(y)) => Some(x.cmp(y)),
        _ => as_number(a)?.partial_cmp(&as_number(b)?),
    }
}

fn evaluate_document(condition: &DocumentCondition, document: Option<&str>) -> bool {
    match (condition, document) {
        (DocumentCondition::Contains(needle), Some(doc)) => doc.contains(needle.as_str()),
        (DocumentCondition::NotContains(needle), Some(doc)) => !doc.contains(needle.as_str()),
        (DocumentCondition::Regex(re), Some(doc)) => re.is_match(doc),
        (DocumentCondition::NotRegex(re), Some(doc)) => !re.is_match(doc),
        (DocumentCondition::Contains(_) | DocumentCondition::Regex(_), None) => false,
        (DocumentCondition::NotContains(_) | DocumentCondition::NotRegex(_), None) => true,
    }
}

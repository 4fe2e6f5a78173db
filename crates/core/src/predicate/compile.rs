//! Compilation of `where` and `where_document` JSON into [`Predicate`] trees.
//!
//! Accepted shapes:
//! - `where`: `{"field": value}` (implicit `$eq`), `{"field": {"$op": operand}}`,
//!   `{"$and": [..]}`, `{"$or": [..]}`. Several keys in one object are AND-ed.
//! - `where_document`: `{"$contains": "s"}`, `{"$not_contains": "s"}`,
//!   `{"$regex": "p"}`, `{"$not_regex": "p"}`, and `$and` / `$or` over those.

use super::{CompareOp, DocumentCondition, MetadataCondition, Predicate};
use crate::error::{Error, Result};
use crate::record::MetadataValue;
use regex::Regex;
use serde_json::{Map, Value};

/// Compile both filter inputs into one predicate.
///
/// Returns `Ok(None)` when neither input constrains anything (absent or `{}`).
pub fn compile(
    where_: Option<&Value>,
    where_document: Option<&Value>,
) -> Result<Option<Predicate>> {
    let metadata = where_.map(compile_where).transpose()?.flatten();
    let document = where_document
        .map(compile_where_document)
        .transpose()?
        .flatten();
    Ok(Predicate::conjoin(metadata, document))
}

/// Compile a metadata `where` expression.
pub fn compile_where(value: &Value) -> Result<Option<Predicate>> {
    let object = expect_object(value, "where")?;
    let mut clauses = Vec::with_capacity(object.len());
    for (key, operand) in object {
        let clause = match key.as_str() {
            "$and" => Predicate::And(compile_list(key, operand, compile_where)?),
            "$or" => Predicate::Or(compile_list(key, operand, compile_where)?),
            op if op.starts_with('$') => return Err(Error::UnknownOperator(op.to_string())),
            field => Predicate::Metadata(compile_field(field, operand)?),
        };
        clauses.push(clause);
    }
    Ok(collapse(clauses))
}

/// Compile a `where_document` expression.
pub fn compile_where_document(value: &Value) -> Result<Option<Predicate>> {
    let object = expect_object(value, "where_document")?;
    let mut clauses = Vec::with_capacity(object.len());
    for (key, operand) in object {
        let clause = match key.as_str() {
            "$and" => Predicate::And(compile_list(key, operand, compile_where_document)?),
            "$or" => Predicate::Or(compile_list(key, operand, compile_where_document)?),
            "$contains" => {
                Predicate::Document(DocumentCondition::Contains(expect_text(key, operand)?))
            }
            "$not_contains" => {
                Predicate::Document(DocumentCondition::NotContains(expect_text(key, operand)?))
            }
            "$regex" => Predicate::Document(DocumentCondition::Regex(expect_regex(key, operand)?)),
            "$not_regex" => {
                Predicate::Document(DocumentCondition::NotRegex(expect_regex(key, operand)?))
            }
            op if op.starts_with('$') => return Err(Error::UnknownOperator(op.to_string())),
            other => {
                return Err(Error::malformed(format!(
                    "where_document expects an operator, found key '{other}'"
                )))
            }
        };
        clauses.push(clause);
    }
    Ok(collapse(clauses))
}

fn collapse(mut clauses: Vec<Predicate>) -> Option<Predicate> {
    match clauses.len() {
        0 => None,
        1 => clauses.pop(),
        _ => Some(Predicate::And(clauses)),
    }
}

fn expect_object<'a>(value: &'a Value, what: &str) -> Result<&'a Map<String, Value>> {
    value
        .as_object()
        .ok_or_else(|| Error::malformed(format!("{what} must be an object, got {value}")))
}

/// Compile every element of a `$and` / `$or` list. Empty sub-expressions are
/// rejected: `{"$and": [{}]}` has no meaning.
fn compile_list(
    op: &str,
    operand: &Value,
    compile_one: fn(&Value) -> Result<Option<Predicate>>,
) -> Result<Vec<Predicate>> {
    let items = operand
        .as_array()
        .ok_or_else(|| Error::malformed(format!("operator {op} expects a list of expressions")))?;
    if items.is_empty() {
        return Err(Error::malformed(format!(
            "operator {op} expects a non-empty list of expressions"
        )));
    }
    items
        .iter()
        .map(|item| {
            compile_one(item)?.ok_or_else(|| {
                Error::malformed(format!("operator {op} contains an empty expression"))
            })
        })
        .collect()
}

fn compile_field(field: &str, operand: &Value) -> Result<MetadataCondition> {
    let Some(object) = operand.as_object() else {
        let value = expect_scalar(field, "$eq", operand)?;
        return Ok(MetadataCondition::Compare {
            field: field.to_string(),
            op: CompareOp::Eq,
            value,
        });
    };

    if object.len() != 1 {
        return Err(Error::malformed(format!(
            "field '{field}' must have exactly one operator, found {}",
            object.len()
        )));
    }
    let (op, value) = object
        .iter()
        .next()
        .ok_or_else(|| Error::malformed(format!("field '{field}' has no operator")))?;

    let compare = |cmp: CompareOp, value: MetadataValue| MetadataCondition::Compare {
        field: field.to_string(),
        op: cmp,
        value,
    };

    match op.as_str() {
        "$eq" => Ok(compare(CompareOp::Eq, expect_scalar(field, op, value)?)),
        "$ne" => Ok(compare(CompareOp::Ne, expect_scalar(field, op, value)?)),
        "$gt" => Ok(compare(CompareOp::Gt, expect_ordered(field, op, value)?)),
        "$gte" => Ok(compare(CompareOp::Gte, expect_ordered(field, op, value)?)),
        "$lt" => Ok(compare(CompareOp::Lt, expect_ordered(field, op, value)?)),
        "$lte" => Ok(compare(CompareOp::Lte, expect_ordered(field, op, value)?)),
        "$in" => Ok(MetadataCondition::In {
            field: field.to_string(),
            values: expect_list(field, op, value)?,
        }),
        "$nin" => Ok(MetadataCondition::NotIn {
            field: field.to_string(),
            values: expect_list(field, op, value)?,
        }),
        unknown if unknown.starts_with('$') => Err(Error::UnknownOperator(unknown.to_string())),
        other => Err(Error::malformed(format!(
            "field '{field}' expects an operator, found key '{other}'"
        ))),
    }
}

fn expect_scalar(field: &str, op: &str, value: &Value) -> Result<MetadataValue> {
    MetadataValue::from_json(value).ok_or_else(|| {
        Error::malformed(format!(
            "operator {op} on field '{field}' expects a bool, number or string, got {value}"
        ))
    })
}

/// Operand for `$gt`-style operators: numbers and strings only.
fn expect_ordered(field: &str, op: &str, value: &Value) -> Result<MetadataValue> {
    match expect_scalar(field, op, value)? {
        MetadataValue::Bool(_) => Err(Error::malformed(format!(
            "operator {op} on field '{field}' expects a number or string, got {value}"
        ))),
        ordered => Ok(ordered),
    }
}

fn expect_list(field: &str, op: &str, value: &Value) -> Result<Vec<MetadataValue>> {
    let items = value.as_array().ok_or_else(|| {
        Error::malformed(format!(
            "operator {op} on field '{field}' expects a list, got {value}"
        ))
    })?;
    if items.is_empty() {
        return Err(Error::malformed(format!(
            "operator {op} on field '{field}' expects a non-empty list"
        )));
    }
    items
        .iter()
        .map(|item| expect_scalar(field, op, item))
        .collect()
}

fn expect_text(op: &str, value: &Value) -> Result<String> {
    value
        .as_str()
        .map(str::to_string)
        .ok_or_else(|| Error::malformed(format!("operator {op} expects a string, got {value}")))
}

fn expect_regex(op: &str, value: &Value) -> Result<Regex> {
    let pattern = expect_text(op, value)?;
    Regex::new(&pattern)
        .map_err(|e| Error::malformed(format!("operator {op} has an invalid pattern: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn err_of(value: Value) -> Error {
        compile_where(&value).unwrap_err()
    }

    #[test]
    fn test_bare_value_is_eq() {
        let p = compile_where(&json!({"color": "red"})).unwrap().unwrap();
        match p {
            Predicate::Metadata(MetadataCondition::Compare { field, op, value }) => {
                assert_eq!(field, "color");
                assert_eq!(op, CompareOp::Eq);
                assert_eq!(value, MetadataValue::Str("red".into()));
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn test_multiple_keys_are_and() {
        let p = compile_where(&json!({"a": 1, "b": {"$gt": 2}}))
            .unwrap()
            .unwrap();
        assert!(matches!(p, Predicate::And(ref c) if c.len() == 2));
    }

    #[test]
    fn test_empty_inputs_compile_to_none() {
        assert!(compile(None, None).unwrap().is_none());
        assert!(compile(Some(&json!({})), Some(&json!({})))
            .unwrap()
            .is_none());
    }

    #[test]
    fn test_where_and_document_are_conjoined() {
        let p = compile(Some(&json!({"a": 1})), Some(&json!({"$contains": "x"})))
            .unwrap()
            .unwrap();
        assert!(matches!(p, Predicate::And(ref c) if c.len() == 2));
    }

    // ── Rejections ────────────────────────────────────────────────────

    #[test]
    fn test_unknown_field_operator() {
        match err_of(json!({"a": {"$like": "x"}})) {
            Error::UnknownOperator(op) => assert_eq!(op, "$like"),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn test_unknown_logical_operator() {
        assert!(matches!(
            err_of(json!({"$not": [{"a": 1}]})),
            Error::UnknownOperator(_)
        ));
    }

    #[test]
    fn test_in_requires_list_and_names_operator() {
        match err_of(json!({"a": {"$in": "x"}})) {
            Error::MalformedPredicate(msg) => assert!(msg.contains("$in"), "{msg}"),
            other => panic!("unexpected {other:?}"),
        }
        match err_of(json!({"a": {"$nin": []}})) {
            Error::MalformedPredicate(msg) => assert!(msg.contains("$nin"), "{msg}"),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn test_ordering_rejects_bool() {
        assert!(matches!(
            err_of(json!({"a": {"$gt": true}})),
            Error::MalformedPredicate(_)
        ));
    }

    #[test]
    fn test_two_operators_on_one_field() {
        assert!(matches!(
            err_of(json!({"a": {"$gt": 1, "$lt": 5}})),
            Error::MalformedPredicate(_)
        ));
    }

    #[test]
    fn test_null_and_nested_operands() {
        assert!(matches!(err_of(json!({"a": null})), Error::MalformedPredicate(_)));
        assert!(matches!(
            err_of(json!({"a": {"$eq": [1]}})),
            Error::MalformedPredicate(_)
        ));
    }

    #[test]
    fn test_and_requires_non_empty_list() {
        assert!(matches!(err_of(json!({"$and": []})), Error::MalformedPredicate(_)));
        assert!(matches!(err_of(json!({"$or": {"a": 1}})), Error::MalformedPredicate(_)));
        assert!(matches!(err_of(json!({"$and": [{}]})), Error::MalformedPredicate(_)));
    }

    #[test]
    fn test_where_must_be_object() {
        assert!(matches!(err_of(json!([1, 2])), Error::MalformedPredicate(_)));
    }

    #[test]
    fn test_document_operators() {
        let p = compile_where_document(&json!({
            "$or": [{"$contains": "rust"}, {"$regex": "^go+"}]
        }))
        .unwrap()
        .unwrap();
        assert!(matches!(p, Predicate::Or(ref c) if c.len() == 2));
    }

    #[test]
    fn test_document_rejects_bad_input() {
        assert!(matches!(
            compile_where_document(&json!({"$regex": "("})).unwrap_err(),
            Error::MalformedPredicate(_)
        ));
        assert!(matches!(
            compile_where_document(&json!({"$contains": 3})).unwrap_err(),
            Error::MalformedPredicate(_)
        ));
        assert!(matches!(
            compile_where_document(&json!({"$startswith": "a"})).unwrap_err(),
            Error::UnknownOperator(_)
        ));
        assert!(matches!(
            compile_where_document(&json!({"text": "a"})).unwrap_err(),
            Error::MalformedPredicate(_)
        ));
    }
}

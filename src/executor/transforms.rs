//! Field transforms
//!
//! Server-evaluated functions that produce or update a field value
//! atomically with the enclosing commit. Each transform reads the current
//! value at its field path and writes the new one; the returned value is
//! echoed back in the write result's `transformResults`.
//!
//! Missing fields act as the identity element of the transform: 0 for
//! increment, -inf/+inf for maximum/minimum, the empty array for the array
//! transforms. Mistyped targets coerce the same way (a string target of an
//! increment counts as 0, a scalar target of an array union counts as the
//! empty array), matching production.

use chrono::{DateTime, Utc};

use crate::types::{get_field, set_field, FieldMap, Value};

/// One field transform: a target path and the operation to apply
#[derive(Debug, Clone, PartialEq)]
pub struct FieldTransform {
    /// Parsed dotted field path into the document's fields
    pub field_path: Vec<String>,
    pub kind: TransformKind,
}

/// The transform operations
#[derive(Debug, Clone, PartialEq)]
pub enum TransformKind {
    /// Set the field to the commit time
    ServerTime,
    /// Add the operand to the current value
    Increment(Value),
    /// Keep the larger of current value and operand
    Maximum(Value),
    /// Keep the smaller of current value and operand
    Minimum(Value),
    /// Append operand elements not already structurally present
    AppendMissingElements(Vec<Value>),
    /// Remove every occurrence structurally equal to an operand element
    RemoveAllFromArray(Vec<Value>),
}

/// Apply one transform in place and return the transform result value
pub fn apply_transform(
    fields: &mut FieldMap,
    transform: &FieldTransform,
    commit_time: DateTime<Utc>,
) -> Value {
    let current = get_field(fields, &transform.field_path).cloned();

    let result = match &transform.kind {
        TransformKind::ServerTime => Value::Timestamp(commit_time),
        TransformKind::Increment(operand) => increment(current, operand),
        TransformKind::Maximum(operand) => maximum(current, operand),
        TransformKind::Minimum(operand) => minimum(current, operand),
        TransformKind::AppendMissingElements(elements) => {
            let mut array = as_array(current);
            for element in elements {
                if !array.contains(element) {
                    array.push(element.clone());
                }
            }
            Value::Array(array)
        }
        TransformKind::RemoveAllFromArray(elements) => {
            let mut array = as_array(current);
            array.retain(|item| !elements.contains(item));
            Value::Array(array)
        }
    };

    set_field(fields, &transform.field_path, result.clone());
    result
}

/// Numeric view of a value; non-numeric targets coerce to integer zero
fn as_number(value: Option<Value>) -> Value {
    match value {
        Some(v @ Value::Integer(_)) | Some(v @ Value::Double(_)) => v,
        _ => Value::Integer(0),
    }
}

/// Array view of a value; non-array targets coerce to the empty array
fn as_array(value: Option<Value>) -> Vec<Value> {
    match value {
        Some(Value::Array(items)) => items,
        _ => Vec::new(),
    }
}

/// new = current + operand; integer iff both operands are integer
fn increment(current: Option<Value>, operand: &Value) -> Value {
    match (as_number(current), operand) {
        (Value::Integer(a), Value::Integer(b)) => Value::Integer(a.saturating_add(*b)),
        (Value::Integer(a), Value::Double(b)) => Value::Double(a as f64 + b),
        (Value::Double(a), Value::Integer(b)) => Value::Double(a + *b as f64),
        (Value::Double(a), Value::Double(b)) => Value::Double(a + b),
        // Operand type is validated at decode time
        (other, _) => other,
    }
}

/// new = max(current ?? -inf, operand); integer iff both operands are integer
fn maximum(current: Option<Value>, operand: &Value) -> Value {
    let current = match current {
        Some(v @ Value::Integer(_)) | Some(v @ Value::Double(_)) => v,
        // Missing or mistyped: the operand wins outright
        _ => return operand.clone(),
    };
    match (&current, operand) {
        (Value::Integer(a), Value::Integer(b)) => Value::Integer((*a).max(*b)),
        _ => {
            let a = to_f64(&current);
            let b = to_f64(operand);
            if a >= b {
                promote(&current)
            } else {
                promote(operand)
            }
        }
    }
}

/// new = min(current ?? +inf, operand); integer iff both operands are integer
fn minimum(current: Option<Value>, operand: &Value) -> Value {
    let current = match current {
        Some(v @ Value::Integer(_)) | Some(v @ Value::Double(_)) => v,
        _ => return operand.clone(),
    };
    match (&current, operand) {
        (Value::Integer(a), Value::Integer(b)) => Value::Integer((*a).min(*b)),
        _ => {
            let a = to_f64(&current);
            let b = to_f64(operand);
            if a <= b {
                promote(&current)
            } else {
                promote(operand)
            }
        }
    }
}

fn to_f64(value: &Value) -> f64 {
    match value {
        Value::Integer(i) => *i as f64,
        Value::Double(d) => *d,
        _ => 0.0,
    }
}

/// Mixed int/double comparisons yield a double result
fn promote(value: &Value) -> Value {
    match value {
        Value::Integer(i) => Value::Double(*i as f64),
        other => other.clone(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn path(p: &str) -> Vec<String> {
        p.split('.').map(|s| s.to_string()).collect()
    }

    fn commit_time() -> DateTime<Utc> {
        DateTime::from_timestamp_micros(1_000_000).unwrap()
    }

    fn apply(fields: &mut FieldMap, field_path: &str, kind: TransformKind) -> Value {
        apply_transform(
            fields,
            &FieldTransform { field_path: path(field_path), kind },
            commit_time(),
        )
    }

    #[test]
    fn test_server_time() {
        let mut fields = FieldMap::new();
        let result = apply(&mut fields, "at", TransformKind::ServerTime);
        assert_eq!(result, Value::Timestamp(commit_time()));
        assert_eq!(fields.get("at"), Some(&Value::Timestamp(commit_time())));
    }

    #[test]
    fn test_increment_from_missing() {
        let mut fields = FieldMap::new();
        let result = apply(&mut fields, "c", TransformKind::Increment(Value::Integer(1)));
        assert_eq!(result, Value::Integer(1));
        let result = apply(&mut fields, "c", TransformKind::Increment(Value::Integer(1)));
        assert_eq!(result, Value::Integer(2));
    }

    #[test]
    fn test_increment_type_promotion() {
        let mut fields = FieldMap::new();
        fields.insert("c".into(), Value::Integer(1));
        let result = apply(&mut fields, "c", TransformKind::Increment(Value::Double(0.5)));
        assert_eq!(result, Value::Double(1.5));

        // Both integers stay integer
        let mut fields = FieldMap::new();
        fields.insert("c".into(), Value::Integer(2));
        let result = apply(&mut fields, "c", TransformKind::Increment(Value::Integer(3)));
        assert_eq!(result, Value::Integer(5));
    }

    #[test]
    fn test_increment_saturates() {
        let mut fields = FieldMap::new();
        fields.insert("c".into(), Value::Integer(i64::MAX));
        let result = apply(&mut fields, "c", TransformKind::Increment(Value::Integer(1)));
        assert_eq!(result, Value::Integer(i64::MAX));
    }

    #[test]
    fn test_increment_coerces_non_numeric_target() {
        let mut fields = FieldMap::new();
        fields.insert("c".into(), Value::String("oops".into()));
        let result = apply(&mut fields, "c", TransformKind::Increment(Value::Integer(4)));
        assert_eq!(result, Value::Integer(4));
    }

    #[test]
    fn test_maximum() {
        let mut fields = FieldMap::new();
        fields.insert("m".into(), Value::Integer(5));
        let result = apply(&mut fields, "m", TransformKind::Maximum(Value::Integer(3)));
        assert_eq!(result, Value::Integer(5));
        let result = apply(&mut fields, "m", TransformKind::Maximum(Value::Integer(9)));
        assert_eq!(result, Value::Integer(9));

        // Missing field: operand is the result
        let result = apply(&mut fields, "fresh", TransformKind::Maximum(Value::Integer(-7)));
        assert_eq!(result, Value::Integer(-7));
    }

    #[test]
    fn test_maximum_mixed_types_promote() {
        let mut fields = FieldMap::new();
        fields.insert("m".into(), Value::Integer(5));
        let result = apply(&mut fields, "m", TransformKind::Maximum(Value::Double(3.0)));
        assert_eq!(result, Value::Double(5.0));
    }

    #[test]
    fn test_minimum() {
        let mut fields = FieldMap::new();
        fields.insert("m".into(), Value::Integer(5));
        let result = apply(&mut fields, "m", TransformKind::Minimum(Value::Integer(3)));
        assert_eq!(result, Value::Integer(3));

        let result = apply(&mut fields, "fresh", TransformKind::Minimum(Value::Integer(10)));
        assert_eq!(result, Value::Integer(10));
    }

    #[test]
    fn test_append_missing_elements() {
        let mut fields = FieldMap::new();
        fields.insert(
            "tags".into(),
            Value::Array(vec![Value::String("a".into()), Value::String("b".into())]),
        );
        let result = apply(
            &mut fields,
            "tags",
            TransformKind::AppendMissingElements(vec![
                Value::String("b".into()),
                Value::String("c".into()),
                Value::String("c".into()),
            ]),
        );
        // "b" already present; duplicate "c" appended once
        assert_eq!(
            result,
            Value::Array(vec![
                Value::String("a".into()),
                Value::String("b".into()),
                Value::String("c".into()),
            ])
        );
    }

    #[test]
    fn test_append_coerces_non_array_target() {
        let mut fields = FieldMap::new();
        fields.insert("tags".into(), Value::Integer(9));
        let result = apply(
            &mut fields,
            "tags",
            TransformKind::AppendMissingElements(vec![Value::Integer(1)]),
        );
        assert_eq!(result, Value::Array(vec![Value::Integer(1)]));
    }

    #[test]
    fn test_remove_all_from_array() {
        let mut fields = FieldMap::new();
        fields.insert(
            "tags".into(),
            Value::Array(vec![
                Value::Integer(1),
                Value::Integer(2),
                Value::Integer(1),
                Value::Integer(3),
            ]),
        );
        let result = apply(
            &mut fields,
            "tags",
            TransformKind::RemoveAllFromArray(vec![Value::Integer(1)]),
        );
        assert_eq!(result, Value::Array(vec![Value::Integer(2), Value::Integer(3)]));
    }

    #[test]
    fn test_remove_distinguishes_numeric_tags() {
        // Structural equality: Integer(1) does not match Double(1.0)
        let mut fields = FieldMap::new();
        fields.insert(
            "xs".into(),
            Value::Array(vec![Value::Integer(1), Value::Double(1.0)]),
        );
        let result = apply(
            &mut fields,
            "xs",
            TransformKind::RemoveAllFromArray(vec![Value::Integer(1)]),
        );
        assert_eq!(result, Value::Array(vec![Value::Double(1.0)]));
    }

    #[test]
    fn test_nested_field_path() {
        let mut fields = FieldMap::new();
        let result = apply(&mut fields, "stats.count", TransformKind::Increment(Value::Integer(1)));
        assert_eq!(result, Value::Integer(1));
        let stats = match fields.get("stats") {
            Some(Value::Map(m)) => m,
            other => panic!("expected nested map, got {:?}", other),
        };
        assert_eq!(stats.get("count"), Some(&Value::Integer(1)));
    }
}

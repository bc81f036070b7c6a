use std::cmp::Ordering;
use std::fmt;

use arbor_model::Scalar;

use crate::error::EvalErrorKind;

/// A computed value: the result of evaluating a formula or any of its
/// sub-expressions.
///
/// `Null` is a real outcome (a nullable stored value, or a nearest-match
/// lookup with no match), distinct from an evaluation failure.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Number(f64),
    Bool(bool),
    Text(String),
    Null,
}

impl Value {
    /// Numeric coercion: numbers pass through, booleans count as 1/0, and
    /// text is parsed. Null never coerces.
    pub fn coerce_number(&self) -> Result<f64, EvalErrorKind> {
        match self {
            Value::Number(n) => Ok(*n),
            Value::Bool(b) => Ok(if *b { 1.0 } else { 0.0 }),
            Value::Text(s) => s.trim().parse::<f64>().map_err(|_| EvalErrorKind::Coercion {
                value: s.clone(),
                wanted: "number",
            }),
            Value::Null => Err(EvalErrorKind::Coercion {
                value: "null".to_string(),
                wanted: "number",
            }),
        }
    }

    /// Boolean coercion: booleans pass through, text matches `true`/`false`
    /// case-insensitively, numbers are non-zero. Null never coerces.
    pub fn coerce_bool(&self) -> Result<bool, EvalErrorKind> {
        match self {
            Value::Bool(b) => Ok(*b),
            Value::Number(n) => Ok(*n != 0.0),
            Value::Text(s) => match s.trim().to_ascii_lowercase().as_str() {
                "true" => Ok(true),
                "false" => Ok(false),
                _ => Err(EvalErrorKind::Coercion {
                    value: s.clone(),
                    wanted: "boolean",
                }),
            },
            Value::Null => Err(EvalErrorKind::Coercion {
                value: "null".to_string(),
                wanted: "boolean",
            }),
        }
    }

    /// Text coercion: renders numbers and booleans. Null never coerces.
    pub fn coerce_text(&self) -> Result<String, EvalErrorKind> {
        match self {
            Value::Text(s) => Ok(s.clone()),
            Value::Number(n) => Ok(format_number(*n)),
            Value::Bool(b) => Ok(b.to_string()),
            Value::Null => Err(EvalErrorKind::Coercion {
                value: "null".to_string(),
                wanted: "text",
            }),
        }
    }

    #[must_use]
    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }
}

/// Render a number the way formula text writes one: integral values without
/// a trailing `.0`.
fn format_number(n: f64) -> String {
    if n.fract() == 0.0 && n.abs() < 1e15 {
        format!("{}", n as i64)
    } else {
        format!("{n}")
    }
}

impl From<&Scalar> for Value {
    fn from(scalar: &Scalar) -> Self {
        match scalar {
            Scalar::Number(n) => Value::Number(*n),
            Scalar::Bool(b) => Value::Bool(*b),
            Scalar::Text(s) => Value::Text(s.clone()),
            Scalar::Null => Value::Null,
        }
    }
}

impl From<f64> for Value {
    fn from(value: f64) -> Self {
        Value::Number(value)
    }
}

impl From<bool> for Value {
    fn from(value: bool) -> Self {
        Value::Bool(value)
    }
}

impl From<&str> for Value {
    fn from(value: &str) -> Self {
        Value::Text(value.to_string())
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Number(n) => write!(f, "{n}"),
            Value::Bool(b) => write!(f, "{b}"),
            Value::Text(s) => f.write_str(s),
            Value::Null => f.write_str("null"),
        }
    }
}

/// Type-appropriate ordering for comparison operators: numeric when both
/// sides coerce to numbers, text otherwise. Null does not compare.
pub(crate) fn compare(left: &Value, right: &Value) -> Result<Ordering, EvalErrorKind> {
    if left.is_null() || right.is_null() {
        return Err(EvalErrorKind::Coercion {
            value: "null".to_string(),
            wanted: "comparable value",
        });
    }
    if let (Ok(a), Ok(b)) = (left.coerce_number(), right.coerce_number()) {
        return Ok(a.partial_cmp(&b).unwrap_or(Ordering::Equal));
    }
    Ok(left.coerce_text()?.cmp(&right.coerce_text()?))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn numeric_coercion_parses_stored_text() {
        assert_eq!(Value::Text(" 4001.003 ".into()).coerce_number(), Ok(4001.003));
        assert_eq!(Value::Bool(true).coerce_number(), Ok(1.0));
        assert!(Value::Text("gold".into()).coerce_number().is_err());
        assert!(Value::Null.coerce_number().is_err());
    }

    #[test]
    fn boolean_coercion() {
        assert_eq!(Value::Text("True".into()).coerce_bool(), Ok(true));
        assert_eq!(Value::Number(0.0).coerce_bool(), Ok(false));
        assert!(Value::Text("maybe".into()).coerce_bool().is_err());
    }

    #[test]
    fn comparison_prefers_numbers() {
        assert_eq!(
            compare(&Value::Text("10".into()), &Value::Number(9.0)),
            Ok(Ordering::Greater)
        );
        assert_eq!(
            compare(&Value::Text("apple".into()), &Value::Text("banana".into())),
            Ok(Ordering::Less)
        );
        assert!(compare(&Value::Null, &Value::Number(1.0)).is_err());
    }

    #[test]
    fn integral_numbers_render_without_fraction() {
        assert_eq!(Value::Number(6.0).coerce_text(), Ok("6".to_string()));
        assert_eq!(Value::Number(2.5).coerce_text(), Ok("2.5".to_string()));
    }
}

//! The closed function library.
//!
//! Every implementation takes the ordered value list produced by argument
//! reduction; dispatch is an exhaustive match over the function tag, so a
//! new tag cannot be added without deciding its semantics here. `IF` and
//! `LOOKUP` have dedicated paths in the evaluator (short-circuiting and
//! reference inspection respectively); their entries here cover the already-
//! reduced form.

use std::cmp::Ordering;

use arbor_model::FuncName;

use crate::error::EvalErrorKind;
use crate::value::{compare, Value};

/// Apply a function tag to its reduced argument values.
pub(crate) fn apply(func: FuncName, values: Vec<Value>) -> Result<Value, EvalErrorKind> {
    match func {
        FuncName::Sum | FuncName::Add => {
            let mut total = 0.0;
            for v in &values {
                total += v.coerce_number()?;
            }
            Ok(Value::Number(total))
        }
        FuncName::Difference | FuncName::Subtract => {
            let [a, b] = binary(func, &values)?;
            Ok(Value::Number(a.coerce_number()? - b.coerce_number()?))
        }
        FuncName::Product | FuncName::Multiply => {
            let mut product = 1.0;
            for v in &values {
                product *= v.coerce_number()?;
            }
            Ok(Value::Number(product))
        }
        FuncName::Quotient | FuncName::Divide => {
            let [a, b] = binary(func, &values)?;
            let divisor = b.coerce_number()?;
            if divisor == 0.0 {
                return Err(EvalErrorKind::DivisionByZero);
            }
            Ok(Value::Number(a.coerce_number()? / divisor))
        }
        FuncName::Min => fold_numeric(func, &values, f64::min),
        FuncName::Max => fold_numeric(func, &values, f64::max),
        FuncName::Mean => {
            if values.is_empty() {
                return Err(EvalErrorKind::EmptyArguments {
                    func: func.as_str(),
                });
            }
            let mut total = 0.0;
            for v in &values {
                total += v.coerce_number()?;
            }
            Ok(Value::Number(total / values.len() as f64))
        }
        FuncName::Count => Ok(Value::Number(values.len() as f64)),
        FuncName::And | FuncName::AndOp => {
            for v in &values {
                if !v.coerce_bool()? {
                    return Ok(Value::Bool(false));
                }
            }
            Ok(Value::Bool(true))
        }
        FuncName::Or | FuncName::OrOp => {
            for v in &values {
                if v.coerce_bool()? {
                    return Ok(Value::Bool(true));
                }
            }
            Ok(Value::Bool(false))
        }
        FuncName::Not => {
            let [v] = unary(func, &values)?;
            Ok(Value::Bool(!v.coerce_bool()?))
        }
        FuncName::Gt => compare_with(func, &values, |ord| ord == Ordering::Greater),
        FuncName::Lt => compare_with(func, &values, |ord| ord == Ordering::Less),
        FuncName::Ge => compare_with(func, &values, |ord| ord != Ordering::Less),
        FuncName::Le => compare_with(func, &values, |ord| ord != Ordering::Greater),
        FuncName::Eq => compare_with(func, &values, |ord| ord == Ordering::Equal),
        FuncName::Ne => compare_with(func, &values, |ord| ord != Ordering::Equal),
        FuncName::Concatenate => {
            let mut out = String::new();
            for v in &values {
                out.push_str(&v.coerce_text()?);
            }
            Ok(Value::Text(out))
        }
        FuncName::Contains => {
            let [needle, haystack] = binary(func, &values)?;
            Ok(Value::Bool(
                haystack.coerce_text()?.contains(&needle.coerce_text()?),
            ))
        }
        FuncName::NotContains => {
            let [needle, haystack] = binary(func, &values)?;
            Ok(Value::Bool(
                !haystack.coerce_text()?.contains(&needle.coerce_text()?),
            ))
        }
        FuncName::If => {
            // The evaluator short-circuits IF before reduction; this strict
            // form handles pre-reduced argument lists.
            if values.len() != 3 {
                return Err(EvalErrorKind::ArgumentCount {
                    func: func.as_str(),
                    expected: "exactly 3",
                    got: values.len(),
                });
            }
            let [cond, then, otherwise] = <[Value; 3]>::try_from(values)
                .expect("length checked");
            Ok(if cond.coerce_bool()? { then } else { otherwise })
        }
        FuncName::Lookup => Err(EvalErrorKind::LookupReference(
            "requires child-collection attribute references".to_string(),
        )),
    }
}

/// Pass-through for a bare reference with no enclosing function.
pub(crate) fn identity(values: Vec<Value>) -> Result<Value, EvalErrorKind> {
    values
        .into_iter()
        .next()
        .ok_or(EvalErrorKind::EmptyArguments { func: "IDENTITY" })
}

fn unary<'a>(func: FuncName, values: &'a [Value]) -> Result<[&'a Value; 1], EvalErrorKind> {
    match values {
        [v] => Ok([v]),
        _ => Err(EvalErrorKind::ArgumentCount {
            func: func.as_str(),
            expected: "exactly 1",
            got: values.len(),
        }),
    }
}

fn binary<'a>(func: FuncName, values: &'a [Value]) -> Result<[&'a Value; 2], EvalErrorKind> {
    match values {
        [a, b] => Ok([a, b]),
        _ => Err(EvalErrorKind::ArgumentCount {
            func: func.as_str(),
            expected: "exactly 2",
            got: values.len(),
        }),
    }
}

fn fold_numeric(
    func: FuncName,
    values: &[Value],
    pick: fn(f64, f64) -> f64,
) -> Result<Value, EvalErrorKind> {
    let mut iter = values.iter();
    let first = iter
        .next()
        .ok_or(EvalErrorKind::EmptyArguments {
            func: func.as_str(),
        })?
        .coerce_number()?;
    let mut best = first;
    for v in iter {
        best = pick(best, v.coerce_number()?);
    }
    Ok(Value::Number(best))
}

fn compare_with(
    func: FuncName,
    values: &[Value],
    test: fn(Ordering) -> bool,
) -> Result<Value, EvalErrorKind> {
    let [a, b] = binary(func, values)?;
    Ok(Value::Bool(test(compare(a, b)?)))
}

/// Damerau-Levenshtein distance (optimal string alignment): edits are
/// insertion, deletion, substitution, and transposition of adjacent
/// characters.
pub(crate) fn damerau_levenshtein(a: &str, b: &str) -> usize {
    let a: Vec<char> = a.chars().collect();
    let b: Vec<char> = b.chars().collect();
    if a.is_empty() {
        return b.len();
    }
    if b.is_empty() {
        return a.len();
    }

    let cols = b.len() + 1;
    let mut prev2: Vec<usize> = vec![0; cols];
    let mut prev: Vec<usize> = (0..cols).collect();
    let mut curr: Vec<usize> = vec![0; cols];

    for i in 1..=a.len() {
        curr[0] = i;
        for j in 1..=b.len() {
            let cost = usize::from(a[i - 1] != b[j - 1]);
            let mut d = (prev[j] + 1)
                .min(curr[j - 1] + 1)
                .min(prev[j - 1] + cost);
            if i > 1 && j > 1 && a[i - 1] == b[j - 2] && a[i - 2] == b[j - 1] {
                d = d.min(prev2[j - 2] + 1);
            }
            curr[j] = d;
        }
        std::mem::swap(&mut prev2, &mut prev);
        std::mem::swap(&mut prev, &mut curr);
    }

    prev[b.len()]
}

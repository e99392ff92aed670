//! Condition expressions for the built-in `control` action
//!
//! Expressions arrive fully substituted, e.g. `3 < 5 && ready == true`.
//! Supported: `||`, `&&`, leading `!`, the comparisons `==`, `!=`, `<`, `<=`,
//! `>`, `>=`, `contains`, and bare literals. Operands compare numerically
//! when both parse as numbers, otherwise as strings.

use crate::action::ActionError;
use std::cmp::Ordering;

const COMPARISONS: [&str; 6] = ["==", "!=", ">=", "<=", ">", "<"];

/// Evaluate a boolean expression
pub fn evaluate_bool(expression: &str) -> Result<bool, ActionError> {
    let expression = expression.trim();
    if expression.is_empty() {
        return Ok(false);
    }

    for disjunct in split_top_level(expression, "||") {
        let mut all = true;
        for term in split_top_level(disjunct, "&&") {
            if !evaluate_term(term)? {
                all = false;
                break;
            }
        }
        if all {
            return Ok(true);
        }
    }
    Ok(false)
}

/// Evaluate an iteration count expression
pub fn evaluate_count(expression: &str) -> Result<i64, ActionError> {
    let text = unquote(expression.trim());
    if let Ok(n) = text.parse::<i64>() {
        return Ok(n);
    }
    match text.parse::<f64>() {
        Ok(f) if f.fract() == 0.0 => Ok(f as i64),
        _ => Err(ActionError::InvalidArguments(format!(
            "'{}' is not an iteration count",
            expression.trim()
        ))),
    }
}

fn evaluate_term(term: &str) -> Result<bool, ActionError> {
    let term = term.trim();
    if let Some(rest) = term.strip_prefix('!') {
        if !rest.starts_with('=') {
            return evaluate_term(rest).map(|b| !b);
        }
    }
    if let Some(inner) = enclosed(term) {
        return evaluate_bool(inner);
    }

    if let Some((left, right)) = term.split_once(" contains ") {
        return Ok(unquote(left.trim()).contains(unquote(right.trim())));
    }

    for op in COMPARISONS {
        if let Some(pos) = term.find(op) {
            let left = operand(&term[..pos]);
            let right = operand(&term[pos + op.len()..]);
            return Ok(compare(left, right, op));
        }
    }

    literal(term)
}

fn compare(left: &str, right: &str, op: &str) -> bool {
    let ordering = match (left.parse::<f64>(), right.parse::<f64>()) {
        (Ok(l), Ok(r)) => l.partial_cmp(&r),
        _ => Some(left.cmp(right)),
    };
    let Some(ordering) = ordering else {
        return op == "!=";
    };
    match op {
        "==" => ordering == Ordering::Equal,
        "!=" => ordering != Ordering::Equal,
        ">=" => ordering != Ordering::Less,
        "<=" => ordering != Ordering::Greater,
        ">" => ordering == Ordering::Greater,
        "<" => ordering == Ordering::Less,
        _ => false,
    }
}

fn literal(term: &str) -> Result<bool, ActionError> {
    let text = unquote(term);
    match text.to_ascii_lowercase().as_str() {
        "true" | "yes" => return Ok(true),
        "false" | "no" | "" | "null" => return Ok(false),
        _ => {}
    }
    match text.parse::<f64>() {
        Ok(n) => Ok(n != 0.0),
        Err(_) => Err(ActionError::InvalidArguments(format!(
            "cannot evaluate '{}' as a condition",
            term
        ))),
    }
}

fn operand(text: &str) -> &str {
    let mut text = text.trim();
    while let Some(inner) = enclosed(text) {
        text = inner.trim();
    }
    unquote(text)
}

fn unquote(text: &str) -> &str {
    for quote in ['"', '\''] {
        if let Some(inner) = text.strip_prefix(quote).and_then(|t| t.strip_suffix(quote)) {
            return inner;
        }
    }
    text
}

/// Inner text when the first `(` closes at the very end of `term`
fn enclosed(term: &str) -> Option<&str> {
    let inner = term.strip_prefix('(')?.strip_suffix(')')?;
    let mut depth = 0i32;
    let mut quote: Option<char> = None;
    for c in inner.chars() {
        match (quote, c) {
            (Some(q), c) if c == q => quote = None,
            (Some(_), _) => {}
            (None, '"' | '\'') => quote = Some(c),
            (None, '(') => depth += 1,
            (None, ')') => {
                depth -= 1;
                if depth < 0 {
                    return None;
                }
            }
            _ => {}
        }
    }
    (depth == 0).then_some(inner)
}

/// Split on `separator` outside of parentheses and quotes
fn split_top_level<'a>(text: &'a str, separator: &str) -> Vec<&'a str> {
    let mut parts = Vec::new();
    let mut depth = 0i32;
    let mut quote: Option<char> = None;
    let mut start = 0;
    let mut iter = text.char_indices().peekable();

    while let Some((i, c)) = iter.next() {
        match (quote, c) {
            (Some(q), c) if c == q => quote = None,
            (Some(_), _) => {}
            (None, '"' | '\'') => quote = Some(c),
            (None, '(') => depth += 1,
            (None, ')') => depth -= 1,
            (None, _) if depth == 0 && text[i..].starts_with(separator) => {
                parts.push(&text[start..i]);
                start = i + separator.len();
                for _ in 1..separator.len() {
                    iter.next();
                }
            }
            _ => {}
        }
    }
    parts.push(&text[start..]);
    parts
}

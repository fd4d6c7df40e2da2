//! Helpers for aggregate formulas.
//!
//! Numbers and booleans count as numeric. Blanks and text are skipped, so `average` over a
//! column with empty cells averages only the filled ones.

use crate::value::Value;

fn numbers(values: &[Value]) -> impl Iterator<Item = f64> + '_ {
    values.iter().filter_map(|value| match value {
        Value::Number(n) => Some(n.into_inner()),
        Value::Boolean(b) => Some(if *b { 1.0 } else { 0.0 }),
        Value::Blank | Value::Text(_) => None,
    })
}

pub fn sum(values: &[Value]) -> f64 {
    numbers(values).sum()
}

pub fn count(values: &[Value]) -> usize {
    numbers(values).count()
}

/// `None` when there are no numeric values.
pub fn average(values: &[Value]) -> Option<f64> {
    let (total, n) = numbers(values).fold((0.0, 0usize), |(t, n), v| (t + v, n + 1));
    (n > 0).then(|| total / n as f64)
}

pub fn min(values: &[Value]) -> Option<f64> {
    numbers(values).reduce(f64::min)
}

pub fn max(values: &[Value]) -> Option<f64> {
    numbers(values).reduce(f64::max)
}

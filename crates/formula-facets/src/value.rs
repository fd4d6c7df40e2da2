use ordered_float::OrderedFloat;
use std::fmt;

/// A single cell, aggregate or reference value.
///
/// Numbers are stored as [`OrderedFloat`] so values are hashable and totally ordered, which lets
/// them double as lookup keys.
#[derive(Clone, Debug, Default, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Value {
    #[default]
    Blank,
    Boolean(bool),
    Number(OrderedFloat<f64>),
    Text(String),
}

impl Value {
    pub fn is_blank(&self) -> bool {
        matches!(self, Value::Blank)
    }

    /// Numeric coercion used by formulas: blanks count as zero and booleans as 0/1.
    pub fn as_number(&self) -> Option<f64> {
        match self {
            Value::Blank => Some(0.0),
            Value::Boolean(b) => Some(if *b { 1.0 } else { 0.0 }),
            Value::Number(n) => Some(n.0),
            Value::Text(_) => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Boolean(b) => Some(*b),
            Value::Number(n) => Some(n.0 != 0.0),
            Value::Blank => Some(false),
            Value::Text(_) => None,
        }
    }

    pub fn as_text(&self) -> Option<&str> {
        match self {
            Value::Text(s) => Some(s),
            _ => None,
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Blank => Ok(()),
            Value::Boolean(b) => write!(f, "{}", if *b { "TRUE" } else { "FALSE" }),
            Value::Number(n) => write!(f, "{}", n.0),
            Value::Text(s) => f.write_str(s),
        }
    }
}

impl From<f64> for Value {
    fn from(value: f64) -> Self {
        Value::Number(OrderedFloat(value))
    }
}

impl From<i64> for Value {
    fn from(value: i64) -> Self {
        Value::Number(OrderedFloat(value as f64))
    }
}

impl From<i32> for Value {
    fn from(value: i32) -> Self {
        Value::Number(OrderedFloat(f64::from(value)))
    }
}

impl From<bool> for Value {
    fn from(value: bool) -> Self {
        Value::Boolean(value)
    }
}

impl From<&str> for Value {
    fn from(value: &str) -> Self {
        Value::Text(value.to_string())
    }
}

impl From<String> for Value {
    fn from(value: String) -> Self {
        Value::Text(value)
    }
}

impl<T: Into<Value>> From<Option<T>> for Value {
    fn from(value: Option<T>) -> Self {
        value.map_or(Value::Blank, Into::into)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn numeric_coercion_treats_blank_as_zero() {
        assert_eq!(Value::Blank.as_number(), Some(0.0));
        assert_eq!(Value::from(true).as_number(), Some(1.0));
        assert_eq!(Value::from("x").as_number(), None);
        assert_eq!(Value::from(2.5).as_number(), Some(2.5));
    }

    #[test]
    fn display_matches_spreadsheet_conventions() {
        assert_eq!(Value::from(false).to_string(), "FALSE");
        assert_eq!(Value::from(12).to_string(), "12");
        assert_eq!(Value::Blank.to_string(), "");
    }
}

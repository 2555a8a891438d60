//! Loosely typed business status codes.
//!
//! Backends disagree on how they type the status code (`0`, `"0"`, `true`,
//! `0.0`), so [`Code`] keeps the representation it was decoded from and offers
//! total conversions into each of the others.

use std::fmt;

use serde_json::Value;

use crate::error::Error;

/// A decoded status code together with its original JSON type.
///
/// # Examples
///
/// ```
/// use courier::response::Code;
///
/// let code = Code::Str("200".into());
/// assert_eq!(code.to_i64(), 200);
/// assert!(code.to_bool());
/// assert_eq!(Code::Int(0).to_string(), "0");
/// assert_eq!(Code::Absent.to_i64(), 0);
/// ```
#[derive(Debug, Clone, PartialEq, Default)]
pub enum Code {
    Str(String),
    Int(i64),
    Bool(bool),
    Float(f64),
    #[default]
    Absent,
}

impl Code {
    /// Reads a code out of a JSON value. Arrays and objects are rejected.
    pub fn from_json(value: Option<&Value>) -> Result<Self, Error> {
        match value {
            None | Some(Value::Null) => Ok(Self::Absent),
            Some(Value::String(s)) => Ok(Self::Str(s.clone())),
            Some(Value::Bool(b)) => Ok(Self::Bool(*b)),
            Some(Value::Number(n)) => Ok(match n.as_i64() {
                Some(i) => Self::Int(i),
                None => Self::Float(n.as_f64().unwrap_or_default()),
            }),
            Some(other) => Err(Error::TypeMismatch {
                expected: "string, number or boolean status code",
                found: json_type(other).to_owned(),
            }),
        }
    }

    pub fn is_absent(&self) -> bool {
        matches!(self, Self::Absent)
    }

    /// Integer view. Unparsable strings and absence become `0`; floats truncate.
    pub fn to_i64(&self) -> i64 {
        match self {
            Self::Str(s) => {
                let s = s.trim();
                s.parse::<i64>()
                    .ok()
                    .or_else(|| s.parse::<f64>().ok().map(|f| f as i64))
                    .unwrap_or(0)
            }
            Self::Int(i) => *i,
            Self::Bool(b) => i64::from(*b),
            Self::Float(f) => *f as i64,
            Self::Absent => 0,
        }
    }

    /// Floating-point view. Unparsable strings and absence become `0.0`.
    pub fn to_f64(&self) -> f64 {
        match self {
            Self::Str(s) => s.trim().parse().unwrap_or(0.0),
            Self::Int(i) => *i as f64,
            Self::Bool(b) => f64::from(u8::from(*b)),
            Self::Float(f) => *f,
            Self::Absent => 0.0,
        }
    }

    /// Boolean view. Numbers are `true` when non-zero; strings accept
    /// `true`/`yes` (any case) or a non-zero number.
    pub fn to_bool(&self) -> bool {
        match self {
            Self::Str(s) => {
                let s = s.trim();
                s.eq_ignore_ascii_case("true")
                    || s.eq_ignore_ascii_case("yes")
                    || s.parse::<f64>().is_ok_and(|f| f != 0.0)
            }
            Self::Int(i) => *i != 0,
            Self::Bool(b) => *b,
            Self::Float(f) => *f != 0.0,
            Self::Absent => false,
        }
    }
}

impl fmt::Display for Code {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Str(s) => f.write_str(s),
            Self::Int(i) => write!(f, "{i}"),
            Self::Bool(b) => write!(f, "{b}"),
            Self::Float(x) => write!(f, "{x}"),
            Self::Absent => Ok(()),
        }
    }
}

impl From<i64> for Code {
    fn from(value: i64) -> Self {
        Self::Int(value)
    }
}

impl From<&str> for Code {
    fn from(value: &str) -> Self {
        Self::Str(value.to_owned())
    }
}

impl From<bool> for Code {
    fn from(value: bool) -> Self {
        Self::Bool(value)
    }
}

impl From<f64> for Code {
    fn from(value: f64) -> Self {
        Self::Float(value)
    }
}

fn json_type(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

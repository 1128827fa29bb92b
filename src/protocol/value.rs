use std::fmt;

use bincode::{Decode, Encode};

/// A scalar carried in a result row or bound as a statement parameter.
#[derive(Debug, Clone, Encode, Decode, PartialEq)]
pub enum Value {
    Null,
    Integer(i64),
    Real(f64),
    Text(String),
    Blob(Vec<u8>),
}

impl From<i64> for Value {
    fn from(value: i64) -> Self {
        Value::Integer(value)
    }
}

impl From<f64> for Value {
    fn from(value: f64) -> Self {
        Value::Real(value)
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

impl From<Vec<u8>> for Value {
    fn from(value: Vec<u8>) -> Self {
        Value::Blob(value)
    }
}

impl<T: Into<Value>> From<Option<T>> for Value {
    fn from(value: Option<T>) -> Self {
        value.map_or(Value::Null, Into::into)
    }
}

/// Renders values in the printed row form used by the text client:
/// `None`, `1`, `408.99`, `1e+16`, `'text'`, `"it's"`, `b'\x00'`.
///
/// Quoting and escaping follow Python's `repr`, which that form comes from.
impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Null => write!(f, "None"),
            Value::Integer(i) => write!(f, "{i}"),
            Value::Real(r) if r.is_finite() => write_real(f, *r),
            Value::Real(r) if r.is_nan() => write!(f, "nan"),
            Value::Real(r) if *r > 0.0 => write!(f, "inf"),
            Value::Real(_) => write!(f, "-inf"),
            Value::Text(s) => {
                let quote = if s.contains('\'') && !s.contains('"') {
                    '"'
                } else {
                    '\''
                };
                write!(f, "{quote}")?;
                for c in s.chars() {
                    match c {
                        '\\' => write!(f, "\\\\")?,
                        '\n' => write!(f, "\\n")?,
                        '\r' => write!(f, "\\r")?,
                        '\t' => write!(f, "\\t")?,
                        c if c == quote => write!(f, "\\{c}")?,
                        c if c.is_control() && (c as u32) < 0x100 => {
                            write!(f, "\\x{:02x}", c as u32)?
                        }
                        c => write!(f, "{c}")?,
                    }
                }
                write!(f, "{quote}")
            }
            Value::Blob(bytes) => {
                let quote = if bytes.contains(&b'\'') && !bytes.contains(&b'"') {
                    b'"'
                } else {
                    b'\''
                };
                write!(f, "b{}", quote as char)?;
                for &b in bytes {
                    match b {
                        b'\\' => write!(f, "\\\\")?,
                        b'\n' => write!(f, "\\n")?,
                        b'\r' => write!(f, "\\r")?,
                        b'\t' => write!(f, "\\t")?,
                        b if b == quote => write!(f, "\\{}", b as char)?,
                        0x20..=0x7e => write!(f, "{}", b as char)?,
                        b => write!(f, "\\x{b:02x}")?,
                    }
                }
                write!(f, "{}", quote as char)
            }
        }
    }
}

/// Shortest round-trip form; exponents get a sign and at least two digits.
fn write_real(f: &mut fmt::Formatter<'_>, r: f64) -> fmt::Result {
    let repr = format!("{r:?}");
    match repr.split_once('e') {
        Some((mantissa, exp)) => {
            let (sign, digits) = match exp.strip_prefix('-') {
                Some(digits) => ('-', digits),
                None => ('+', exp),
            };
            write!(f, "{mantissa}e{sign}{digits:0>2}")
        }
        None => write!(f, "{repr}"),
    }
}

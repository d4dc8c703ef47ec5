//! Mapping query rows into Rust values for `get` and `select`.

use crate::{Col, RetryDbError, Result, Value};

/// Lightweight row view for name-based access helpers.
#[derive(Clone, Copy, Debug)]
pub struct RowRef<'a> {
    /// Query columns aligned with `values`.
    pub cols: &'a [Col],
    /// Row values aligned with `cols`.
    pub values: &'a [Value],
}

impl<'a> RowRef<'a> {
    /// Returns a value by case-insensitive column name.
    pub fn get(&self, name: &str) -> Option<&'a Value> {
        let idx = self
            .cols
            .iter()
            .position(|col| col.name.eq_ignore_ascii_case(name))?;
        self.values.get(idx)
    }

    /// Returns an integer value by column name.
    pub fn get_i64(&self, name: &str) -> Option<i64> {
        match self.get(name)? {
            Value::Integer(value) => Some(*value),
            _ => None,
        }
    }

    /// Returns a float value by column name.
    pub fn get_f64(&self, name: &str) -> Option<f64> {
        match self.get(name)? {
            Value::Float(value) => Some(*value),
            _ => None,
        }
    }

    /// Returns a text value by column name.
    pub fn get_text(&self, name: &str) -> Option<&'a str> {
        match self.get(name)? {
            Value::Text(value) => Some(value.as_str()),
            _ => None,
        }
    }

    /// Converts the named column, failing if it is missing or mistyped.
    pub fn try_get<T: FromValue>(&self, name: &str) -> Result<T> {
        let value = self
            .get(name)
            .ok_or_else(|| RetryDbError::Decode(format!("no column named '{name}'")))?;
        T::from_value(value)
    }

    /// Converts the column at `index`.
    pub fn try_get_at<T: FromValue>(&self, index: usize) -> Result<T> {
        let value = self.values.get(index).ok_or_else(|| {
            RetryDbError::Decode(format!(
                "column index {index} out of range for row of {} values",
                self.values.len()
            ))
        })?;
        T::from_value(value)
    }
}

/// Conversion from a single SQL value.
pub trait FromValue: Sized {
    fn from_value(value: &Value) -> Result<Self>;
}

/// Conversion from a whole row, used by `get` and `select`.
pub trait FromRow: Sized {
    fn from_row(row: RowRef<'_>) -> Result<Self>;
}

fn mismatch(expected: &str, value: &Value) -> RetryDbError {
    RetryDbError::Decode(format!("expected {expected}, got {}", value.kind()))
}

impl FromValue for Value {
    fn from_value(value: &Value) -> Result<Self> {
        Ok(value.clone())
    }
}

impl FromValue for i64 {
    fn from_value(value: &Value) -> Result<Self> {
        match value {
            Value::Integer(value) => Ok(*value),
            other => Err(mismatch("integer", other)),
        }
    }
}

impl FromValue for f64 {
    fn from_value(value: &Value) -> Result<Self> {
        match value {
            Value::Float(value) => Ok(*value),
            Value::Integer(value) => Ok(*value as f64),
            other => Err(mismatch("float", other)),
        }
    }
}

impl FromValue for bool {
    fn from_value(value: &Value) -> Result<Self> {
        match value {
            Value::Integer(value) => Ok(*value != 0),
            other => Err(mismatch("integer", other)),
        }
    }
}

impl FromValue for String {
    fn from_value(value: &Value) -> Result<Self> {
        match value {
            Value::Text(value) => Ok(value.clone()),
            other => Err(mismatch("text", other)),
        }
    }
}

impl<T: FromValue> FromValue for Option<T> {
    fn from_value(value: &Value) -> Result<Self> {
        match value {
            Value::Null => Ok(None),
            other => T::from_value(other).map(Some),
        }
    }
}

impl FromRow for Vec<Value> {
    fn from_row(row: RowRef<'_>) -> Result<Self> {
        Ok(row.values.to_vec())
    }
}

macro_rules! tuple_from_row {
    ($len:expr => $($name:ident $idx:tt),+) => {
        impl<$($name: FromValue),+> FromRow for ($($name,)+) {
            fn from_row(row: RowRef<'_>) -> Result<Self> {
                if row.values.len() != $len {
                    return Err(RetryDbError::Decode(format!(
                        "expected {} columns, got {}",
                        $len,
                        row.values.len()
                    )));
                }
                Ok(($(row.try_get_at::<$name>($idx)?,)+))
            }
        }
    };
}

tuple_from_row!(1 => A 0);
tuple_from_row!(2 => A 0, B 1);
tuple_from_row!(3 => A 0, B 1, C 2);
tuple_from_row!(4 => A 0, B 1, C 2, D 3);

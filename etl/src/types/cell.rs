use std::cmp::Ordering;
use std::fmt;

use chrono::{DateTime, NaiveDate, NaiveDateTime, SecondsFormat, Utc};
use serde::de::Error as _;
use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::bail;
use crate::error::{ErrorKind, EtlResult};
use crate::types::ColumnType;

const DATE_FORMAT: &str = "%Y-%m-%d";
const TIMESTAMP_FORMATS: [&str; 2] = ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f"];

/// A single typed value of a row.
#[derive(Debug, Clone, PartialEq)]
pub enum Cell {
    Null,
    Bool(bool),
    I64(i64),
    F64(f64),
    String(String),
    Date(NaiveDate),
    Timestamp(NaiveDateTime),
    TimestampTz(DateTime<Utc>),
    Json(serde_json::Value),
    Bytes(Vec<u8>),
}

impl Cell {
    pub fn is_null(&self) -> bool {
        matches!(self, Cell::Null)
    }

    /// Returns the column type this value belongs to, [`None`] for [`Cell::Null`].
    pub fn column_type(&self) -> Option<ColumnType> {
        let typ = match self {
            Cell::Null => return None,
            Cell::Bool(_) => ColumnType::Bool,
            Cell::I64(_) => ColumnType::Int64,
            Cell::F64(_) => ColumnType::Float64,
            Cell::String(_) => ColumnType::Text,
            Cell::Date(_) => ColumnType::Date,
            Cell::Timestamp(_) => ColumnType::Timestamp,
            Cell::TimestampTz(_) => ColumnType::TimestampTz,
            Cell::Json(_) => ColumnType::Json,
            Cell::Bytes(_) => ColumnType::Bytes,
        };

        Some(typ)
    }

    /// Equality where two nulls are equal and two NaN floats are equal.
    pub fn null_safe_eq(&self, other: &Cell) -> bool {
        match (self, other) {
            (Cell::F64(a), Cell::F64(b)) => a == b || (a.is_nan() && b.is_nan()),
            _ => self == other,
        }
    }

    /// Orders two values of compatible types.
    ///
    /// Null sorts before every other value. Integers and floats compare numerically. Returns
    /// [`None`] when the types cannot be ordered against each other.
    pub fn try_cmp(&self, other: &Cell) -> Option<Ordering> {
        let ordering = match (self, other) {
            (Cell::Null, Cell::Null) => Ordering::Equal,
            (Cell::Null, _) => Ordering::Less,
            (_, Cell::Null) => Ordering::Greater,
            (Cell::Bool(a), Cell::Bool(b)) => a.cmp(b),
            (Cell::I64(a), Cell::I64(b)) => a.cmp(b),
            (Cell::F64(a), Cell::F64(b)) => a.total_cmp(b),
            (Cell::I64(a), Cell::F64(b)) => (*a as f64).total_cmp(b),
            (Cell::F64(a), Cell::I64(b)) => a.total_cmp(&(*b as f64)),
            (Cell::String(a), Cell::String(b)) => a.cmp(b),
            (Cell::Date(a), Cell::Date(b)) => a.cmp(b),
            (Cell::Timestamp(a), Cell::Timestamp(b)) => a.cmp(b),
            (Cell::TimestampTz(a), Cell::TimestampTz(b)) => a.cmp(b),
            (Cell::Bytes(a), Cell::Bytes(b)) => a.cmp(b),
            _ => return None,
        };

        Some(ordering)
    }

    /// Returns whether the value can be stored in a column of type `typ`.
    pub fn fits(&self, typ: ColumnType) -> bool {
        self.column_type().is_none_or(|own| own == typ)
    }

    /// Converts a plain JSON value into a cell of the given column type.
    pub fn from_json(value: &serde_json::Value, typ: ColumnType) -> EtlResult<Cell> {
        use serde_json::Value;

        let cell = match (typ, value) {
            (_, Value::Null) => Cell::Null,
            (ColumnType::Bool, Value::Bool(v)) => Cell::Bool(*v),
            (ColumnType::Int64, Value::Number(n)) if n.is_i64() || n.is_u64() => match n.as_i64() {
                Some(v) => Cell::I64(v),
                None => bail!(
                    ErrorKind::InvalidData,
                    "Integer value out of range",
                    format!("{n} does not fit into int64")
                ),
            },
            (ColumnType::Float64, Value::Number(n)) => match n.as_f64() {
                Some(v) => Cell::F64(v),
                None => bail!(ErrorKind::InvalidData, "Invalid float value", n),
            },
            (ColumnType::Float64, Value::String(s)) => match s.as_str() {
                "NaN" => Cell::F64(f64::NAN),
                "inf" | "Infinity" => Cell::F64(f64::INFINITY),
                "-inf" | "-Infinity" => Cell::F64(f64::NEG_INFINITY),
                _ => bail!(ErrorKind::InvalidData, "Invalid float value", s),
            },
            (ColumnType::Text, Value::String(s)) => Cell::String(s.clone()),
            (ColumnType::Date, Value::String(s)) => {
                Cell::Date(NaiveDate::parse_from_str(s, DATE_FORMAT)?)
            }
            (ColumnType::Timestamp, Value::String(s)) => Cell::Timestamp(parse_timestamp(s)?),
            (ColumnType::TimestampTz, Value::String(s)) => {
                Cell::TimestampTz(DateTime::parse_from_rfc3339(s)?.with_timezone(&Utc))
            }
            (ColumnType::Json, v) => Cell::Json(v.clone()),
            (ColumnType::Bytes, Value::Array(items)) => {
                let mut bytes = Vec::with_capacity(items.len());
                for item in items {
                    match item.as_u64().and_then(|b| u8::try_from(b).ok()) {
                        Some(byte) => bytes.push(byte),
                        None => bail!(ErrorKind::InvalidData, "Invalid byte value", item),
                    }
                }
                Cell::Bytes(bytes)
            }
            (typ, value) => bail!(
                ErrorKind::InvalidData,
                "Value does not match the column type",
                format!("expected {typ}, got {value}")
            ),
        };

        Ok(cell)
    }

    /// Converts the cell into its plain JSON form, the inverse of [`Cell::from_json`].
    pub fn to_json(&self) -> serde_json::Value {
        use serde_json::Value;

        match self {
            Cell::Null => Value::Null,
            Cell::Bool(v) => Value::Bool(*v),
            Cell::I64(v) => Value::from(*v),
            Cell::F64(v) => match serde_json::Number::from_f64(*v) {
                Some(n) => Value::Number(n),
                None if v.is_nan() => Value::String("NaN".to_string()),
                None if v.is_sign_positive() => Value::String("inf".to_string()),
                None => Value::String("-inf".to_string()),
            },
            Cell::String(v) => Value::String(v.clone()),
            Cell::Date(v) => Value::String(v.format(DATE_FORMAT).to_string()),
            Cell::Timestamp(v) => Value::String(v.format(TIMESTAMP_FORMATS[0]).to_string()),
            Cell::TimestampTz(v) => {
                Value::String(v.to_rfc3339_opts(SecondsFormat::AutoSi, true))
            }
            Cell::Json(v) => v.clone(),
            Cell::Bytes(v) => Value::from(v.clone()),
        }
    }
}

fn parse_timestamp(value: &str) -> EtlResult<NaiveDateTime> {
    let mut last_err = None;
    for format in TIMESTAMP_FORMATS {
        match NaiveDateTime::parse_from_str(value, format) {
            Ok(timestamp) => return Ok(timestamp),
            Err(err) => last_err = Some(err),
        }
    }

    match last_err {
        Some(err) => Err(err.into()),
        None => bail!(ErrorKind::InvalidData, "Invalid timestamp", value),
    }
}

impl fmt::Display for Cell {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Cell::Null => f.write_str("NULL"),
            Cell::String(v) => write!(f, "'{v}'"),
            other => write!(f, "{}", other.to_json()),
        }
    }
}

impl From<i64> for Cell {
    fn from(value: i64) -> Self {
        Cell::I64(value)
    }
}

impl From<&str> for Cell {
    fn from(value: &str) -> Self {
        Cell::String(value.to_string())
    }
}

impl From<String> for Cell {
    fn from(value: String) -> Self {
        Cell::String(value)
    }
}

impl From<bool> for Cell {
    fn from(value: bool) -> Self {
        Cell::Bool(value)
    }
}

impl From<DateTime<Utc>> for Cell {
    fn from(value: DateTime<Utc>) -> Self {
        Cell::TimestampTz(value)
    }
}

impl<T: Into<Cell>> From<Option<T>> for Cell {
    fn from(value: Option<T>) -> Self {
        value.map_or(Cell::Null, Into::into)
    }
}

/// Self-describing form used when cells are persisted without a schema next to them.
#[derive(Serialize, Deserialize)]
struct TaggedCell {
    #[serde(rename = "type")]
    typ: ColumnType,
    value: serde_json::Value,
}

impl Serialize for Cell {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self.column_type() {
            None => serializer.serialize_none(),
            Some(typ) => TaggedCell {
                typ,
                value: self.to_json(),
            }
            .serialize(serializer),
        }
    }
}

impl<'de> Deserialize<'de> for Cell {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        match Option::<TaggedCell>::deserialize(deserializer)? {
            None => Ok(Cell::Null),
            Some(tagged) => Cell::from_json(&tagged.value, tagged.typ)
                .map_err(|err| D::Error::custom(err.to_string())),
        }
    }
}

//! Dynamically typed SQL values.
//!
//! [`Value`] is what the compiler appends to the parameter accumulator and what
//! adapters decode result columns into. It bridges to tokio-postgres through
//! [`ToSql`] / [`FromSql`], choosing the wire encoding from the parameter type
//! the server inferred for each placeholder.

use bytes::BytesMut;
use chrono::{DateTime, NaiveDate, NaiveDateTime, NaiveTime, Utc};
use rust_decimal::Decimal;
use std::error::Error;
use std::fmt;
use tokio_postgres::types::{FromSql, IsNull, Kind, ToSql, Type, to_sql_checked};
use uuid::Uuid;

type BoxError = Box<dyn Error + Sync + Send>;

/// A single SQL value.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    /// `numeric`
    Decimal(Decimal),
    Text(String),
    Bytes(Vec<u8>),
    Json(serde_json::Value),
    Uuid(Uuid),
    Timestamp(DateTime<Utc>),
    Date(NaiveDate),
    Time(NaiveTime),
    Array(Vec<Value>),
}

impl Value {
    /// Wrap raw bytes (`bytea`).
    pub fn bytes(data: impl Into<Vec<u8>>) -> Self {
        Value::Bytes(data.into())
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Value::Int(v) => Some(*v),
            Value::Float(v) if v.fract() == 0.0 => Some(*v as i64),
            Value::Decimal(d) if d.fract().is_zero() => i64::try_from(*d).ok(),
            Value::Text(s) => s.parse().ok(),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::Text(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Bool(b) => Some(*b),
            _ => None,
        }
    }

    /// Convert into a JSON value (used for serde-based row mapping).
    pub fn to_json(&self) -> serde_json::Value {
        use serde_json::Value as Json;
        match self {
            Value::Null => Json::Null,
            Value::Bool(b) => Json::Bool(*b),
            Value::Int(i) => Json::from(*i),
            Value::Float(f) => serde_json::Number::from_f64(*f).map_or(Json::Null, Json::Number),
            Value::Decimal(d) => Json::String(d.to_string()),
            Value::Text(s) => Json::String(s.clone()),
            Value::Bytes(b) => Json::Array(b.iter().map(|x| Json::from(*x)).collect()),
            Value::Json(j) => j.clone(),
            Value::Uuid(u) => Json::String(u.to_string()),
            Value::Timestamp(t) => Json::String(t.to_rfc3339()),
            Value::Date(d) => Json::String(d.to_string()),
            Value::Time(t) => Json::String(t.to_string()),
            Value::Array(items) => Json::Array(items.iter().map(Value::to_json).collect()),
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Null => f.write_str("NULL"),
            Value::Bool(b) => write!(f, "{b}"),
            Value::Int(i) => write!(f, "{i}"),
            Value::Float(v) => write!(f, "{v}"),
            Value::Decimal(d) => write!(f, "{d}"),
            Value::Text(s) => write!(f, "'{}'", s.replace('\'', "''")),
            Value::Bytes(b) => write!(f, "<{} bytes>", b.len()),
            Value::Json(j) => write!(f, "{j}"),
            Value::Uuid(u) => write!(f, "{u}"),
            Value::Timestamp(t) => write!(f, "{}", t.to_rfc3339()),
            Value::Date(d) => write!(f, "{d}"),
            Value::Time(t) => write!(f, "{t}"),
            Value::Array(items) => {
                f.write_str("{")?;
                for (i, item) in items.iter().enumerate() {
                    if i > 0 {
                        f.write_str(",")?;
                    }
                    write!(f, "{item}")?;
                }
                f.write_str("}")
            }
        }
    }
}

macro_rules! value_from {
    ($($ty:ty => $variant:ident),* $(,)?) => {
        $(
            impl From<$ty> for Value {
                fn from(v: $ty) -> Self {
                    Value::$variant(v.into())
                }
            }
        )*
    };
}

value_from! {
    bool => Bool,
    i16 => Int,
    i32 => Int,
    i64 => Int,
    u32 => Int,
    f32 => Float,
    f64 => Float,
    String => Text,
    serde_json::Value => Json,
    Uuid => Uuid,
    DateTime<Utc> => Timestamp,
    Decimal => Decimal,
    NaiveDate => Date,
    NaiveTime => Time,
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Value::Text(v.to_string())
    }
}

impl From<&String> for Value {
    fn from(v: &String) -> Self {
        Value::Text(v.clone())
    }
}

impl<T: Into<Value>> From<Option<T>> for Value {
    fn from(v: Option<T>) -> Self {
        v.map_or(Value::Null, Into::into)
    }
}

impl<T: Into<Value>> From<Vec<T>> for Value {
    fn from(v: Vec<T>) -> Self {
        Value::Array(v.into_iter().map(Into::into).collect())
    }
}

fn unsupported(value: &Value, ty: &Type) -> BoxError {
    format!("cannot encode {value} as {ty}").into()
}

impl ToSql for Value {
    fn to_sql(&self, ty: &Type, out: &mut BytesMut) -> Result<IsNull, BoxError> {
        if let Kind::Domain(inner) = ty.kind() {
            return self.to_sql(inner, out);
        }
        match self {
            Value::Null => Ok(IsNull::Yes),
            Value::Bool(b) => match *ty {
                Type::BOOL => b.to_sql(ty, out),
                Type::JSON | Type::JSONB => self.to_json().to_sql(ty, out),
                _ => Err(unsupported(self, ty)),
            },
            Value::Int(i) => match *ty {
                Type::INT2 => i16::try_from(*i)?.to_sql(ty, out),
                Type::INT4 => i32::try_from(*i)?.to_sql(ty, out),
                Type::INT8 => i.to_sql(ty, out),
                Type::OID => u32::try_from(*i)?.to_sql(ty, out),
                Type::FLOAT4 => (*i as f32).to_sql(ty, out),
                Type::FLOAT8 => (*i as f64).to_sql(ty, out),
                Type::NUMERIC => Decimal::from(*i).to_sql(ty, out),
                Type::TEXT | Type::VARCHAR | Type::BPCHAR => i.to_string().to_sql(ty, out),
                Type::JSON | Type::JSONB => serde_json::Value::from(*i).to_sql(ty, out),
                _ => Err(unsupported(self, ty)),
            },
            Value::Float(v) => match *ty {
                Type::FLOAT4 => (*v as f32).to_sql(ty, out),
                Type::FLOAT8 => v.to_sql(ty, out),
                Type::NUMERIC => Decimal::try_from(*v)?.to_sql(ty, out),
                Type::TEXT | Type::VARCHAR => v.to_string().to_sql(ty, out),
                Type::JSON | Type::JSONB => self.to_json().to_sql(ty, out),
                _ => Err(unsupported(self, ty)),
            },
            Value::Decimal(d) => match *ty {
                Type::NUMERIC => d.to_sql(ty, out),
                Type::FLOAT4 | Type::FLOAT8 => {
                    let v = f64::try_from(*d)?;
                    Value::Float(v).to_sql(ty, out)
                }
                Type::INT2 | Type::INT4 | Type::INT8 if d.fract().is_zero() => {
                    Value::Int(i64::try_from(*d)?).to_sql(ty, out)
                }
                Type::TEXT | Type::VARCHAR => d.to_string().to_sql(ty, out),
                _ => Err(unsupported(self, ty)),
            },
            Value::Text(s) => match *ty {
                Type::UUID => s.parse::<Uuid>()?.to_sql(ty, out),
                Type::TIMESTAMPTZ => s.parse::<DateTime<Utc>>()?.to_sql(ty, out),
                Type::TIMESTAMP => s.parse::<NaiveDateTime>()?.to_sql(ty, out),
                Type::DATE => s.parse::<NaiveDate>()?.to_sql(ty, out),
                Type::TIME => s.parse::<NaiveTime>()?.to_sql(ty, out),
                Type::NUMERIC => s.parse::<Decimal>()?.to_sql(ty, out),
                Type::INT2 | Type::INT4 | Type::INT8 => Value::Int(s.parse()?).to_sql(ty, out),
                Type::JSON | Type::JSONB => serde_json::Value::String(s.clone()).to_sql(ty, out),
                _ => {
                    // enums and other text-like types take the raw string
                    out.extend_from_slice(s.as_bytes());
                    Ok(IsNull::No)
                }
            },
            Value::Bytes(b) => b.as_slice().to_sql(ty, out),
            Value::Json(j) => j.to_sql(ty, out),
            Value::Uuid(u) => match *ty {
                Type::TEXT | Type::VARCHAR => u.to_string().to_sql(ty, out),
                _ => u.to_sql(ty, out),
            },
            Value::Timestamp(t) => match *ty {
                Type::TIMESTAMP => t.naive_utc().to_sql(ty, out),
                Type::DATE => t.date_naive().to_sql(ty, out),
                _ => t.to_sql(ty, out),
            },
            Value::Date(d) => match *ty {
                Type::TIMESTAMP => d.and_time(NaiveTime::MIN).to_sql(ty, out),
                Type::TIMESTAMPTZ => d.and_time(NaiveTime::MIN).and_utc().to_sql(ty, out),
                _ => d.to_sql(ty, out),
            },
            Value::Time(t) => t.to_sql(ty, out),
            Value::Array(items) => items.to_sql(ty, out),
        }
    }

    fn accepts(_ty: &Type) -> bool {
        true
    }

    to_sql_checked!();
}

impl<'a> FromSql<'a> for Value {
    fn from_sql(ty: &Type, raw: &'a [u8]) -> Result<Self, BoxError> {
        Ok(match *ty {
            Type::BOOL => Value::Bool(bool::from_sql(ty, raw)?),
            Type::INT2 => Value::Int(i16::from_sql(ty, raw)?.into()),
            Type::INT4 => Value::Int(i32::from_sql(ty, raw)?.into()),
            Type::INT8 => Value::Int(i64::from_sql(ty, raw)?),
            Type::OID => Value::Int(u32::from_sql(ty, raw)?.into()),
            Type::FLOAT4 => Value::Float(f32::from_sql(ty, raw)?.into()),
            Type::FLOAT8 => Value::Float(f64::from_sql(ty, raw)?),
            Type::NUMERIC => Value::Decimal(Decimal::from_sql(ty, raw)?),
            Type::JSON | Type::JSONB => Value::Json(serde_json::Value::from_sql(ty, raw)?),
            Type::UUID => Value::Uuid(Uuid::from_sql(ty, raw)?),
            Type::TIMESTAMPTZ => Value::Timestamp(DateTime::<Utc>::from_sql(ty, raw)?),
            Type::TIMESTAMP => Value::Timestamp(NaiveDateTime::from_sql(ty, raw)?.and_utc()),
            Type::DATE => Value::Date(NaiveDate::from_sql(ty, raw)?),
            Type::TIME => Value::Time(NaiveTime::from_sql(ty, raw)?),
            Type::BYTEA => Value::Bytes(Vec::<u8>::from_sql(ty, raw)?),
            Type::TEXT | Type::VARCHAR | Type::BPCHAR | Type::NAME | Type::UNKNOWN => {
                Value::Text(<&str>::from_sql(ty, raw)?.to_string())
            }
            _ => match ty.kind() {
                Kind::Array(_) => Value::Array(Vec::<Value>::from_sql(ty, raw)?),
                Kind::Domain(inner) => Value::from_sql(inner, raw)?,
                Kind::Enum(_) => Value::Text(<&str>::from_sql(&Type::TEXT, raw)?.to_string()),
                _ if ty.name() == "citext" => {
                    Value::Text(<&str>::from_sql(&Type::TEXT, raw)?.to_string())
                }
                _ => return Err(format!("unsupported column type {ty}").into()),
            },
        })
    }

    fn from_sql_null(_ty: &Type) -> Result<Self, BoxError> {
        Ok(Value::Null)
    }

    fn accepts(_ty: &Type) -> bool {
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn conversions() {
        assert_eq!(Value::from(1i32), Value::Int(1));
        assert_eq!(Value::from("a"), Value::Text("a".into()));
        assert_eq!(Value::from(None::<i64>), Value::Null);
        assert_eq!(
            Value::from(vec![1i64, 2]),
            Value::Array(vec![Value::Int(1), Value::Int(2)])
        );
    }

    #[test]
    fn int_encodes_into_narrow_types() {
        let mut buf = BytesMut::new();
        Value::Int(7).to_sql(&Type::INT4, &mut buf).unwrap();
        assert_eq!(&buf[..], &7i32.to_be_bytes());

        let mut buf = BytesMut::new();
        assert!(Value::Int(i64::MAX).to_sql(&Type::INT2, &mut buf).is_err());
    }

    #[test]
    fn numbers_encode_as_numeric() {
        let mut buf = BytesMut::new();
        Value::Int(10).to_sql(&Type::NUMERIC, &mut buf).unwrap();
        assert_eq!(
            Value::from_sql(&Type::NUMERIC, &buf).unwrap(),
            Value::Decimal(Decimal::from(10))
        );

        let mut buf = BytesMut::new();
        Value::Float(1.5).to_sql(&Type::NUMERIC, &mut buf).unwrap();
        assert_eq!(
            Value::from_sql(&Type::NUMERIC, &buf).unwrap(),
            Value::Decimal(Decimal::new(15, 1))
        );

        let mut buf = BytesMut::new();
        assert!(Value::Int(1).to_sql(&Type::DATE, &mut buf).is_err());
    }

    #[test]
    fn dates_and_times_decode_through_chrono() {
        let day = NaiveDate::from_ymd_opt(2000, 1, 2).unwrap();
        assert_eq!(
            Value::from_sql(&Type::DATE, &[0, 0, 0, 1]).unwrap(),
            Value::Date(day)
        );

        let mut buf = BytesMut::new();
        Value::from("12:30:00").to_sql(&Type::TIME, &mut buf).unwrap();
        assert_eq!(
            Value::from_sql(&Type::TIME, &buf).unwrap(),
            Value::Time(NaiveTime::from_hms_opt(12, 30, 0).unwrap())
        );
    }

    #[test]
    fn unknown_types_do_not_decode_as_text() {
        assert!(Value::from_sql(&Type::INTERVAL, &[0; 16]).is_err());
        assert!(Value::from_sql(&Type::INET, &[2, 32, 0, 4, 127, 0, 0, 1]).is_err());
        assert_eq!(
            Value::from_sql(&Type::TEXT, b"abc").unwrap(),
            Value::from("abc")
        );
    }

    #[test]
    fn display_escapes_text() {
        assert_eq!(Value::from("it's").to_string(), "'it''s'");
        assert_eq!(Value::from(vec![1i64, 2]).to_string(), "{1,2}");
    }
}

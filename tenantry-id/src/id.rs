//! The distributed identifier type.

use crate::error::{IdError, IdResult};
use crate::generator::{EPOCH_MS, NODE_MASK, NODE_SHIFT, SEQUENCE_MASK, TIME_SHIFT};
use serde::de::{self, Visitor};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::str::FromStr;
use tenantry_query::Value;

/// A 64-bit snowflake identifier.
///
/// Serialized to JSON as a decimal string so JavaScript clients keep every
/// digit; deserialized from either a string or a number.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct DistributedId(pub i64);

impl DistributedId {
    /// The raw integer.
    pub fn as_i64(self) -> i64 {
        self.0
    }

    /// Milliseconds since the Unix epoch at which the id was generated.
    pub fn timestamp_ms(self) -> i64 {
        (self.0 >> TIME_SHIFT) + EPOCH_MS
    }

    /// The node that generated the id.
    pub fn node(self) -> i64 {
        (self.0 >> NODE_SHIFT) & NODE_MASK
    }

    /// The per-millisecond sequence number.
    pub fn sequence(self) -> i64 {
        self.0 & SEQUENCE_MASK
    }
}

impl fmt::Display for DistributedId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for DistributedId {
    type Err = IdError;

    fn from_str(s: &str) -> IdResult<Self> {
        let s = s.trim().trim_matches('"');
        if s.is_empty() {
            return Ok(Self(0));
        }
        s.parse::<i64>()
            .map(Self)
            .map_err(|_| IdError::Parse(s.to_string()))
    }
}

impl From<i64> for DistributedId {
    fn from(id: i64) -> Self {
        Self(id)
    }
}

impl From<DistributedId> for i64 {
    fn from(id: DistributedId) -> Self {
        id.0
    }
}

impl From<DistributedId> for Value {
    fn from(id: DistributedId) -> Self {
        Value::Int(id.0)
    }
}

impl TryFrom<&Value> for DistributedId {
    type Error = IdError;

    fn try_from(value: &Value) -> IdResult<Self> {
        match value {
            Value::Int(i) => Ok(Self(*i)),
            Value::String(s) => s.parse(),
            Value::Null => Ok(Self(0)),
            other => Err(IdError::Scan(other.type_name())),
        }
    }
}

impl Serialize for DistributedId {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.0.to_string())
    }
}

struct IdVisitor;

impl<'de> Visitor<'de> for IdVisitor {
    type Value = DistributedId;

    fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("a distributed id as a string or an integer")
    }

    fn visit_str<E: de::Error>(self, v: &str) -> Result<Self::Value, E> {
        v.parse().map_err(E::custom)
    }

    fn visit_i64<E: de::Error>(self, v: i64) -> Result<Self::Value, E> {
        Ok(DistributedId(v))
    }

    fn visit_u64<E: de::Error>(self, v: u64) -> Result<Self::Value, E> {
        i64::try_from(v)
            .map(DistributedId)
            .map_err(|_| E::custom(format!("distributed id {} overflows i64", v)))
    }
}

impl<'de> Deserialize<'de> for DistributedId {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        deserializer.deserialize_any(IdVisitor)
    }
}

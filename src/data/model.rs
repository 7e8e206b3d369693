use std::collections::BTreeMap;
use std::fmt;
use std::path::Path;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use ndarray::{Array1, ArrayD};
use serde::{Deserialize, Serialize};

use super::container::Container;
use crate::process::params::{ParamValue, Params};

// ---------------------------------------------------------------------------
// AttrValue – a single attribute on a group or dataset
// ---------------------------------------------------------------------------

/// A dynamically-typed attribute value (instrument metadata, labels, ...).
/// Equality and ordering go through `total_cmp`, so floats behave as keys.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "snake_case")]
pub enum AttrValue {
    String(String),
    Integer(i64),
    Float(#[serde(with = "float_repr")] f64),
    Bool(bool),
    /// ISO-8601 date string kept as text.
    Date(String),
    Null,
}

impl PartialEq for AttrValue {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == std::cmp::Ordering::Equal
    }
}

impl Eq for AttrValue {}

impl PartialOrd for AttrValue {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for AttrValue {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        use AttrValue::*;
        fn discriminant(v: &AttrValue) -> u8 {
            match v {
                Null => 0,
                Bool(_) => 1,
                Integer(_) => 2,
                Float(_) => 3,
                String(_) => 4,
                Date(_) => 5,
            }
        }
        let da = discriminant(self);
        let db = discriminant(other);
        if da != db {
            return da.cmp(&db);
        }
        match (self, other) {
            (Null, Null) => std::cmp::Ordering::Equal,
            (Bool(a), Bool(b)) => a.cmp(b),
            (Integer(a), Integer(b)) => a.cmp(b),
            (Float(a), Float(b)) => a.total_cmp(b),
            (String(a), String(b)) | (Date(a), Date(b)) => a.cmp(b),
            _ => std::cmp::Ordering::Equal,
        }
    }
}

impl std::hash::Hash for AttrValue {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        std::mem::discriminant(self).hash(state);
        match self {
            AttrValue::String(s) | AttrValue::Date(s) => s.hash(state),
            AttrValue::Integer(i) => i.hash(state),
            AttrValue::Float(f) => f.to_bits().hash(state),
            AttrValue::Bool(b) => b.hash(state),
            AttrValue::Null => {}
        }
    }
}

impl fmt::Display for AttrValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AttrValue::String(s) => write!(f, "{s}"),
            AttrValue::Integer(i) => write!(f, "{i}"),
            AttrValue::Float(v) => write!(f, "{v}"),
            AttrValue::Bool(b) => write!(f, "{b}"),
            AttrValue::Date(d) => write!(f, "{d}"),
            AttrValue::Null => write!(f, "<null>"),
        }
    }
}

impl AttrValue {
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            AttrValue::Float(v) => Some(*v),
            AttrValue::Integer(i) => Some(*i as f64),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            AttrValue::String(s) | AttrValue::Date(s) => Some(s),
            _ => None,
        }
    }

    /// Best-effort typing of a free-text header value.
    pub fn guess(s: &str) -> Self {
        let s = s.trim();
        if s.is_empty() {
            return AttrValue::Null;
        }
        if let Ok(i) = s.parse::<i64>() {
            return AttrValue::Integer(i);
        }
        if let Ok(f) = s.parse::<f64>() {
            return AttrValue::Float(f);
        }
        if s == "true" || s == "false" {
            return AttrValue::Bool(s == "true");
        }
        AttrValue::String(s.to_string())
    }
}

impl From<&str> for AttrValue {
    fn from(s: &str) -> Self {
        AttrValue::String(s.to_string())
    }
}

impl From<String> for AttrValue {
    fn from(s: String) -> Self {
        AttrValue::String(s)
    }
}

impl From<f64> for AttrValue {
    fn from(v: f64) -> Self {
        AttrValue::Float(v)
    }
}

impl From<i64> for AttrValue {
    fn from(v: i64) -> Self {
        AttrValue::Integer(v)
    }
}

impl From<bool> for AttrValue {
    fn from(v: bool) -> Self {
        AttrValue::Bool(v)
    }
}

/// JSON has no NaN or infinity; those are written as strings.
pub(crate) mod float_repr {
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(v: &f64, s: S) -> Result<S::Ok, S::Error> {
        if v.is_finite() {
            s.serialize_f64(*v)
        } else if v.is_nan() {
            s.serialize_str("NaN")
        } else if *v > 0.0 {
            s.serialize_str("inf")
        } else {
            s.serialize_str("-inf")
        }
    }

    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Repr {
        Number(f64),
        Text(String),
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<f64, D::Error> {
        match Repr::deserialize(d)? {
            Repr::Number(v) => Ok(v),
            Repr::Text(t) => match t.as_str() {
                "NaN" => Ok(f64::NAN),
                "inf" => Ok(f64::INFINITY),
                "-inf" => Ok(f64::NEG_INFINITY),
                other => Err(serde::de::Error::custom(format!(
                    "'{other}' is not a float"
                ))),
            },
        }
    }
}

pub type Attrs = BTreeMap<String, AttrValue>;

// ---------------------------------------------------------------------------
// Role – axis (independent) vs channel (measured)
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    Axis,
    Channel,
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Role::Axis => write!(f, "axis"),
            Role::Channel => write!(f, "channel"),
        }
    }
}

impl FromStr for Role {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "axis" => Ok(Role::Axis),
            "channel" | "variable" => Ok(Role::Channel),
            other => Err(format!("unknown dataset role '{other}'")),
        }
    }
}

/// Ordering of a strictly monotonic axis.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Increasing,
    Decreasing,
}

// ---------------------------------------------------------------------------
// Dataset – a named n-dimensional array
// ---------------------------------------------------------------------------

/// A named n-dimensional array with a unit and a role.
///
/// Channels carry one axis reference per dimension. Axes carry none and have
/// at most one dimension longer than 1.
#[derive(Debug, Clone)]
pub struct Dataset {
    pub name: String,
    pub role: Role,
    pub unit: Option<String>,
    pub data: ArrayD<f64>,
    pub axes: Vec<String>,
    pub attrs: Attrs,
}

impl Dataset {
    /// A one-dimensional axis.
    pub fn axis(name: &str, values: Vec<f64>, unit: Option<&str>) -> Self {
        Dataset {
            name: name.to_string(),
            role: Role::Axis,
            unit: unit.map(str::to_string),
            data: Array1::from(values).into_dyn(),
            axes: Vec::new(),
            attrs: Attrs::new(),
        }
    }

    pub fn channel(name: &str, data: ArrayD<f64>, unit: Option<&str>, axes: &[&str]) -> Self {
        Dataset {
            name: name.to_string(),
            role: Role::Channel,
            unit: unit.map(str::to_string),
            data,
            axes: axes.iter().map(|a| a.to_string()).collect(),
            attrs: Attrs::new(),
        }
    }

    pub fn with_attr(mut self, key: &str, value: impl Into<AttrValue>) -> Self {
        self.attrs.insert(key.to_string(), value.into());
        self
    }

    pub fn is_axis(&self) -> bool {
        self.role == Role::Axis
    }

    pub fn is_channel(&self) -> bool {
        self.role == Role::Channel
    }

    pub fn shape(&self) -> &[usize] {
        self.data.shape()
    }

    pub fn ndim(&self) -> usize {
        self.data.ndim()
    }

    /// Number of points an axis spans (product of its extents).
    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Values in logical (row-major) order.
    pub fn values(&self) -> Vec<f64> {
        self.data.iter().copied().collect()
    }

    pub fn label(&self) -> Option<&str> {
        self.attrs.get("label").and_then(AttrValue::as_str)
    }

    /// True when at most one dimension has extent > 1.
    pub fn is_broadcastable_1d(&self) -> bool {
        self.shape().iter().filter(|&&n| n > 1).count() <= 1
    }

    /// Strict monotonicity along the values. Checked lazily by the
    /// operations that need it; never enforced on write.
    pub fn monotonic(&self) -> Option<Direction> {
        let values = self.values();
        if values.len() < 2 {
            return Some(Direction::Increasing);
        }
        if values.windows(2).all(|w| w[0] < w[1]) {
            Some(Direction::Increasing)
        } else if values.windows(2).all(|w| w[0] > w[1]) {
            Some(Direction::Decreasing)
        } else {
            None
        }
    }
}

/// Values compare by bit pattern, so a NaN equals the same NaN.
impl PartialEq for Dataset {
    fn eq(&self, other: &Self) -> bool {
        self.name == other.name
            && self.role == other.role
            && self.unit == other.unit
            && self.axes == other.axes
            && self.attrs == other.attrs
            && self.data.shape() == other.data.shape()
            && self
                .data
                .iter()
                .zip(other.data.iter())
                .all(|(a, b)| a.to_bits() == b.to_bits())
    }
}

// ---------------------------------------------------------------------------
// ProvenanceRecord – one applied step
// ---------------------------------------------------------------------------

/// Operation name of the record every adapter writes first.
pub const INGEST: &str = "ingest";

/// One entry of a container's append-only history.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProvenanceRecord {
    pub operation: String,
    /// Group path the step ran against ("" is the root).
    #[serde(default)]
    pub target: String,
    #[serde(default)]
    pub params: Params,
    pub timestamp: DateTime<Utc>,
    /// Fingerprint of the container state the step consumed.
    pub input: String,
}

impl ProvenanceRecord {
    pub fn new(operation: &str, target: &str, params: Params, input: String) -> Self {
        ProvenanceRecord {
            operation: operation.to_string(),
            target: target.to_string(),
            params,
            timestamp: Utc::now(),
            input,
        }
    }

    /// The record an adapter appends after building `container` from `source`.
    pub fn ingest(adapter: &str, source: &Path, container: &Container) -> Self {
        let mut params = Params::new();
        params.insert("adapter".into(), ParamValue::Text(adapter.to_string()));
        params.insert(
            "source".into(),
            ParamValue::Text(source.display().to_string()),
        );
        ProvenanceRecord::new(INGEST, "", params, container.fingerprint())
    }

    pub fn is_ingest(&self) -> bool {
        self.operation == INGEST
    }

    /// Same operation on the same input; timestamps are ignored.
    pub fn same_step(&self, other: &ProvenanceRecord) -> bool {
        self.operation == other.operation
            && self.target == other.target
            && self.params == other.params
            && self.input == other.input
    }
}
